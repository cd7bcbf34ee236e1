//! The resource manifest and the shell set.
//!
//! A [`Manifest`] is produced by the build step as a flat JSON object of
//! resource key to content fingerprint. The engine only ever reads it; the
//! copy persisted in the manifest store is what the next activation diffs
//! against.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};
use crate::key::ResourceKey;

/// Opaque content hash of one resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key to fingerprint mapping for one deployed version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    entries: HashMap<ResourceKey, Fingerprint>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a manifest from `(key, fingerprint)` pairs.
    pub fn from_pairs<K, F>(pairs: impl IntoIterator<Item = (K, F)>) -> Self
    where
        K: Into<String>,
        F: Into<String>,
    {
        Self {
            entries: pairs
                .into_iter()
                .map(|(k, f)| (ResourceKey::new(k), Fingerprint::new(f)))
                .collect(),
        }
    }

    /// Parse the build-emitted JSON object.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| CacheError::manifest(format!("invalid manifest: {e}")))
    }

    /// Parse the manifest from raw bytes, e.g. a stored response body.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| CacheError::manifest(format!("invalid stored manifest: {e}")))
    }

    /// Read a manifest file written by the build.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| CacheError::manifest(format!("{}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(&self.entries)
            .map_err(|e| CacheError::manifest(format!("cannot serialize manifest: {e}")))
    }

    /// Check the invariants the build is expected to uphold.
    pub fn validate(&self) -> Result<()> {
        if !self.entries.contains_key(ResourceKey::ROOT) {
            return Err(CacheError::manifest(
                "manifest has no entry for the root key '/'",
            ));
        }
        if let Some((key, _)) = self.entries.iter().find(|(k, _)| k.as_str().is_empty()) {
            return Err(CacheError::manifest(format!("empty resource key '{key}'")));
        }
        Ok(())
    }

    pub fn fingerprint(&self, key: &str) -> Option<&Fingerprint> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &ResourceKey> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Compare this manifest against the previous one.
    pub fn diff(&self, old: &Manifest) -> ManifestDiff {
        let mut diff = ManifestDiff::default();
        for (key, fingerprint) in &self.entries {
            match old.fingerprint(key.as_str()) {
                None => diff.added.insert(key.clone()),
                Some(prev) if prev == fingerprint => diff.unchanged.insert(key.clone()),
                Some(_) => diff.changed.insert(key.clone()),
            };
        }
        diff.removed = old
            .keys()
            .filter(|k| !self.contains(k.as_str()))
            .cloned()
            .collect();
        diff
    }
}

impl FromIterator<(ResourceKey, Fingerprint)> for Manifest {
    fn from_iter<T: IntoIterator<Item = (ResourceKey, Fingerprint)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Per-key outcome of moving from one manifest to the next.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ManifestDiff {
    pub added: BTreeSet<ResourceKey>,
    pub changed: BTreeSet<ResourceKey>,
    pub removed: BTreeSet<ResourceKey>,
    pub unchanged: BTreeSet<ResourceKey>,
}

impl ManifestDiff {
    /// Whether a cached copy of `key` made under the old manifest is still
    /// valid: both manifests list it with the same fingerprint.
    pub fn retains(&self, key: &str) -> bool {
        self.unchanged.contains(key)
    }

    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

/// The resources the application cannot boot without.
///
/// Staged with a reload fetch on every install, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShellSet(Vec<ResourceKey>);

impl ShellSet {
    pub fn new<K: Into<String>>(keys: impl IntoIterator<Item = K>) -> Self {
        Self(keys.into_iter().map(ResourceKey::new).collect())
    }

    /// Shell of a Flutter web build.
    pub fn flutter() -> Self {
        Self::new([
            "main.dart.js",
            "index.html",
            "flutter_bootstrap.js",
            "assets/AssetManifest.bin.json",
            "assets/FontManifest.json",
        ])
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceKey> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.iter().any(|k| k.as_str() == key)
    }
}

impl Default for ShellSet {
    fn default() -> Self {
        Self::flutter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_build_manifest() {
        let manifest = Manifest::from_json(
            r#"{"index.html": "d59d3c8f", "/": "d59d3c8f", "main.dart.js": "df31c76f"}"#,
        )
        .unwrap();

        assert_eq!(manifest.len(), 3);
        assert_eq!(manifest.fingerprint("/").unwrap().as_str(), "d59d3c8f");
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_rejects_non_object() {
        assert!(matches!(
            Manifest::from_json(r#"["index.html"]"#),
            Err(CacheError::Manifest(_))
        ));
    }

    #[test]
    fn test_validate_requires_root() {
        let manifest = Manifest::from_pairs([("index.html", "h")]);
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let manifest = Manifest::from_pairs([("/", "h0"), ("a.js", "h1")]);
        let restored = Manifest::from_slice(manifest.to_json().unwrap().as_bytes()).unwrap();
        assert_eq!(manifest, restored);
    }

    #[test]
    fn test_retains() {
        let old = Manifest::from_pairs([("a", "h1"), ("b", "h2"), ("d", "h4")]);
        let new = Manifest::from_pairs([("a", "h1"), ("c", "h3"), ("d", "h5")]);
        let diff = new.diff(&old);

        assert!(diff.retains("a"));
        assert!(!diff.retains("b"));
        assert!(!diff.retains("c"));
        assert!(!diff.retains("d"));
    }

    #[test]
    fn test_diff() {
        let old = Manifest::from_pairs([("a", "h1"), ("b", "h2"), ("d", "h4")]);
        let new = Manifest::from_pairs([("a", "h1"), ("c", "h3"), ("d", "h5")]);
        let diff = new.diff(&old);

        assert!(diff.unchanged.contains("a"));
        assert!(diff.removed.contains("b"));
        assert!(diff.added.contains("c"));
        assert!(diff.changed.contains("d"));
        assert!(!diff.is_noop());
        assert!(new.diff(&new).is_noop());
    }

    #[test]
    fn test_flutter_shell() {
        let shell = ShellSet::default();
        assert_eq!(shell.len(), 5);
        assert!(shell.contains("index.html"));
        assert!(!shell.contains("/"));
    }
}
