//! Resource keys and request URL normalization.
//!
//! A [`ResourceKey`] is the logical path of a static asset: the request URL
//! with the origin stripped, any `?v=` suffix removed, and the bare origin
//! folded onto the root sentinel `/`.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Marker that starts a cache-busting version suffix.
pub const VERSION_QUERY_MARKER: &str = "?v=";

/// Logical path of one static resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKey(String);

impl ResourceKey {
    /// Key of the entry document when requested as the bare origin.
    pub const ROOT: &'static str = "/";

    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The root sentinel.
    pub fn root() -> Self {
        Self(Self::ROOT.to_string())
    }

    pub fn is_root(&self) -> bool {
        self.0 == Self::ROOT
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Canonical request URL for this key under `origin`.
    ///
    /// Stored entries are always addressed by this URL, so lookups for
    /// `asset.js?v=1` and `asset.js` hit the same entry.
    pub fn to_url(&self, origin: &str) -> String {
        let origin = origin.trim_end_matches('/');
        if self.is_root() {
            format!("{origin}/")
        } else {
            format!("{origin}/{}", self.0)
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ResourceKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ResourceKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Strip `origin` and the path separator that follows it.
///
/// URLs from a different origin come back unchanged; they never match a
/// manifest entry.
fn strip_origin<'a>(raw_url: &'a str, origin: &str) -> &'a str {
    let origin = origin.trim_end_matches('/');
    match raw_url.strip_prefix(origin) {
        Some(rest) => rest.strip_prefix('/').unwrap_or(rest),
        None => raw_url,
    }
}

/// Derive the key for an intercepted request URL.
pub fn derive_key(raw_url: &str, origin: &str) -> ResourceKey {
    let trimmed_origin = origin.trim_end_matches('/');
    let mut key = strip_origin(raw_url, origin);

    if let Some(idx) = key.find(VERSION_QUERY_MARKER) {
        key = &key[..idx];
    }

    let hash_routed = raw_url
        .strip_prefix(trimmed_origin)
        .is_some_and(|rest| rest.starts_with("/#"));

    if raw_url == trimmed_origin || hash_routed || key.is_empty() {
        return ResourceKey::root();
    }
    ResourceKey::new(key)
}

/// Recover the key of an entry already stored under `stored_url`.
///
/// Stored URLs are canonical, so only the origin is stripped here.
pub fn key_for_stored(stored_url: &str, origin: &str) -> ResourceKey {
    let key = strip_origin(stored_url, origin);
    if key.is_empty() {
        ResourceKey::root()
    } else {
        ResourceKey::new(key)
    }
}
