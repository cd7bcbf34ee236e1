//! On-disk [`CacheStorage`].
//!
//! ```text
//! <state dir>/
//!     flutter-app-cache/
//!         index.json                request URL -> entry file
//!         0000000000000001.entry    one CachedResponse
//!         0000000000000002.entry
//!     flutter-temp-cache/
//!         ...
//! ```
//!
//! Entry files are written once and never modified. The index is the only
//! file rewritten on `put` and `remove`, always through a temp file and a
//! rename, and the in-memory index only changes after that rename succeeds.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use hashbrown::{HashMap, HashSet};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::{CacheStorage, CachedResponse};
use crate::error::StoreResult;

const INDEX_FILE: &str = "index.json";
const ENTRY_EXTENSION: &str = "entry";
const TMP_EXTENSION: &str = "tmp";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheIndex {
    name: String,
    /// Request URL to entry file name.
    entries: BTreeMap<String, String>,
}

impl CacheIndex {
    fn empty(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: BTreeMap::new(),
        }
    }
}

/// Cache storage persisted in a directory.
#[derive(Debug)]
pub struct FileCacheStorage {
    origin: String,
    dir: PathBuf,
    indexes: RwLock<HashMap<String, CacheIndex>>,
    next_entry: AtomicU64,
}

impl FileCacheStorage {
    /// Open the storage rooted at `dir`, loading any caches already there.
    pub async fn open_dir(origin: impl Into<String>, dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;

        let mut indexes = HashMap::new();
        let mut last_entry = 0;
        let mut listing = fs::read_dir(&dir).await?;
        while let Some(item) = listing.next_entry().await? {
            if !item.file_type().await?.is_dir() {
                continue;
            }
            let cache_dir = item.path();
            let Some(index) = load_index(&cache_dir).await? else {
                continue;
            };
            last_entry = last_entry.max(sweep_orphans(&cache_dir, &index).await?);
            debug!(cache = %index.name, entries = index.entries.len(), "Loaded cache");
            indexes.insert(index.name.clone(), index);
        }

        Ok(Self {
            origin: origin.into().trim_end_matches('/').to_string(),
            dir,
            indexes: RwLock::new(indexes),
            next_entry: AtomicU64::new(last_entry + 1),
        })
    }

    fn cache_dir(&self, cache: &str) -> PathBuf {
        self.dir.join(encode_cache_name(cache))
    }

    async fn write_index(&self, index: &CacheIndex) -> StoreResult<()> {
        let bytes = serde_json::to_vec(index)?;
        write_atomic(&self.cache_dir(&index.name).join(INDEX_FILE), &bytes).await
    }

    /// Best-effort removal of an entry file no index refers to any more.
    async fn discard(&self, path: &Path) {
        match fs::remove_file(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Could not remove entry file"),
        }
    }
}

#[async_trait]
impl CacheStorage for FileCacheStorage {
    fn origin(&self) -> &str {
        &self.origin
    }

    async fn open(&self, cache: &str) -> StoreResult<()> {
        let mut indexes = self.indexes.write().await;
        if indexes.contains_key(cache) {
            return Ok(());
        }
        let index = CacheIndex::empty(cache);
        fs::create_dir_all(self.cache_dir(cache)).await?;
        self.write_index(&index).await?;
        indexes.insert(cache.to_string(), index);
        Ok(())
    }

    async fn has(&self, cache: &str) -> StoreResult<bool> {
        Ok(self.indexes.read().await.contains_key(cache))
    }

    async fn delete(&self, cache: &str) -> StoreResult<bool> {
        let mut indexes = self.indexes.write().await;
        if !indexes.contains_key(cache) {
            return Ok(false);
        }
        match fs::remove_dir_all(self.cache_dir(cache)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        indexes.remove(cache);
        Ok(true)
    }

    async fn cache_names(&self) -> StoreResult<Vec<String>> {
        Ok(self.indexes.read().await.keys().cloned().collect())
    }

    async fn keys(&self, cache: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .indexes
            .read()
            .await
            .get(cache)
            .map(|index| index.entries.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn match_url(&self, cache: &str, url: &str) -> StoreResult<Option<CachedResponse>> {
        let path = {
            let indexes = self.indexes.read().await;
            match indexes.get(cache).and_then(|index| index.entries.get(url)) {
                Some(file) => self.cache_dir(cache).join(file),
                None => return Ok(None),
            }
        };

        match fs::read(&path).await {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(cache, url, "Indexed entry file is missing");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, cache: &str, response: CachedResponse) -> StoreResult<()> {
        let cache_dir = self.cache_dir(cache);
        let id = self.next_entry.fetch_add(1, Ordering::Relaxed);
        let file = format!("{id:016x}.{ENTRY_EXTENSION}");

        fs::create_dir_all(&cache_dir).await?;
        write_atomic(&cache_dir.join(&file), &serde_json::to_vec(&response)?).await?;

        let mut indexes = self.indexes.write().await;
        let mut index = indexes
            .get(cache)
            .cloned()
            .unwrap_or_else(|| CacheIndex::empty(cache));
        let replaced = index.entries.insert(response.url, file.clone());
        if let Err(e) = self.write_index(&index).await {
            drop(indexes);
            self.discard(&cache_dir.join(&file)).await;
            return Err(e);
        }
        indexes.insert(cache.to_string(), index);
        drop(indexes);

        if let Some(old) = replaced {
            self.discard(&cache_dir.join(old)).await;
        }
        Ok(())
    }

    async fn remove(&self, cache: &str, url: &str) -> StoreResult<bool> {
        let mut indexes = self.indexes.write().await;
        let Some(current) = indexes.get(cache) else {
            return Ok(false);
        };
        let mut index = current.clone();
        let Some(file) = index.entries.remove(url) else {
            return Ok(false);
        };
        self.write_index(&index).await?;
        indexes.insert(cache.to_string(), index);
        drop(indexes);

        self.discard(&self.cache_dir(cache).join(file)).await;
        Ok(true)
    }
}

/// Directory name for `cache`.
///
/// ASCII alphanumerics and `-` are kept; every other byte, `_` included,
/// becomes `_xx`. The empty name maps to `_`, which no other name produces.
fn encode_cache_name(cache: &str) -> String {
    if cache.is_empty() {
        return "_".to_string();
    }
    let mut encoded = String::with_capacity(cache.len());
    for byte in cache.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            encoded.push(char::from(byte));
        } else {
            encoded.push_str(&format!("_{byte:02x}"));
        }
    }
    encoded
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    let tmp = path.with_extension(TMP_EXTENSION);
    fs::write(&tmp, bytes).await?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

/// Read a cache directory's index, skipping directories without a usable one.
async fn load_index(cache_dir: &Path) -> StoreResult<Option<CacheIndex>> {
    let path = cache_dir.join(INDEX_FILE);
    let raw = match fs::read(&path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    match serde_json::from_slice(&raw) {
        Ok(index) => Ok(Some(index)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Skipping unreadable cache index");
            Ok(None)
        }
    }
}

/// Delete entry and temp files `index` does not refer to.
///
/// Returns the highest entry id still in use.
async fn sweep_orphans(cache_dir: &Path, index: &CacheIndex) -> StoreResult<u64> {
    let referenced: HashSet<&str> = index.entries.values().map(String::as_str).collect();
    let mut last_entry = 0;

    let mut listing = fs::read_dir(cache_dir).await?;
    while let Some(item) = listing.next_entry().await? {
        let path = item.path();
        let extension = path.extension().and_then(|e| e.to_str());
        if extension != Some(ENTRY_EXTENSION) && extension != Some(TMP_EXTENSION) {
            continue;
        }
        let name = item.file_name();
        let name = name.to_string_lossy();
        if referenced.contains(&*name) {
            let id = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| u64::from_str_radix(stem, 16).ok())
                .unwrap_or_default();
            last_entry = last_entry.max(id);
            continue;
        }
        debug!(path = %path.display(), "Removing orphaned cache file");
        if let Err(e) = fs::remove_file(&path).await {
            warn!(path = %path.display(), error = %e, "Could not remove orphaned cache file");
        }
    }
    Ok(last_entry)
}
