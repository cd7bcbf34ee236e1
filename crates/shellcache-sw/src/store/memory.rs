//! In-memory [`CacheStorage`].

use async_trait::async_trait;
use hashbrown::HashMap;
use tokio::sync::RwLock;

use super::{CacheStorage, CachedResponse};
use crate::error::StoreResult;

type Cache = HashMap<String, CachedResponse>;

/// Cache storage held entirely in memory.
#[derive(Debug)]
pub struct MemoryCacheStorage {
    origin: String,
    caches: RwLock<HashMap<String, Cache>>,
}

impl MemoryCacheStorage {
    /// Create empty storage for `origin`.
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into().trim_end_matches('/').to_string(),
            caches: RwLock::new(HashMap::new()),
        }
    }

    /// Number of entries in `cache`, or `None` if it does not exist.
    pub async fn len(&self, cache: &str) -> Option<usize> {
        self.caches.read().await.get(cache).map(HashMap::len)
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    fn origin(&self) -> &str {
        &self.origin
    }

    async fn open(&self, cache: &str) -> StoreResult<()> {
        self.caches
            .write()
            .await
            .entry(cache.to_string())
            .or_default();
        Ok(())
    }

    async fn has(&self, cache: &str) -> StoreResult<bool> {
        Ok(self.caches.read().await.contains_key(cache))
    }

    async fn delete(&self, cache: &str) -> StoreResult<bool> {
        Ok(self.caches.write().await.remove(cache).is_some())
    }

    async fn cache_names(&self) -> StoreResult<Vec<String>> {
        Ok(self.caches.read().await.keys().cloned().collect())
    }

    async fn keys(&self, cache: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .caches
            .read()
            .await
            .get(cache)
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn match_url(&self, cache: &str, url: &str) -> StoreResult<Option<CachedResponse>> {
        Ok(self
            .caches
            .read()
            .await
            .get(cache)
            .and_then(|c| c.get(url))
            .cloned())
    }

    async fn put(&self, cache: &str, response: CachedResponse) -> StoreResult<()> {
        self.caches
            .write()
            .await
            .entry(cache.to_string())
            .or_default()
            .insert(response.url.clone(), response);
        Ok(())
    }

    async fn remove(&self, cache: &str, url: &str) -> StoreResult<bool> {
        Ok(self
            .caches
            .write()
            .await
            .get_mut(cache)
            .is_some_and(|c| c.remove(url).is_some()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(url: &str) -> CachedResponse {
        CachedResponse::synthetic(url, "text/plain", "body")
    }

    #[tokio::test]
    async fn test_open_and_delete() {
        let storage = MemoryCacheStorage::new("https://app.example.com/");
        assert_eq!(storage.origin(), "https://app.example.com");
        assert!(!storage.has("v1").await.unwrap());

        storage.open("v1").await.unwrap();
        assert!(storage.has("v1").await.unwrap());
        assert_eq!(storage.len("v1").await, Some(0));

        assert!(storage.delete("v1").await.unwrap());
        assert!(!storage.has("v1").await.unwrap());
        assert!(!storage.delete("v1").await.unwrap());
    }

    #[tokio::test]
    async fn test_put_match_remove() {
        let storage = MemoryCacheStorage::new("https://app.example.com");
        storage.put("v1", entry("https://app.example.com/a.js")).await.unwrap();

        assert!(storage
            .match_url("v1", "https://app.example.com/a.js")
            .await
            .unwrap()
            .is_some());
        assert!(storage
            .match_url("v1", "https://app.example.com/b.js")
            .await
            .unwrap()
            .is_none());

        assert!(storage.remove("v1", "https://app.example.com/a.js").await.unwrap());
        assert!(storage.keys("v1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_cache_is_empty() {
        let storage = MemoryCacheStorage::new("https://app.example.com");
        assert!(storage.keys("nope").await.unwrap().is_empty());
        assert!(storage.match_url("nope", "x").await.unwrap().is_none());
        assert!(!storage.remove("nope", "x").await.unwrap());
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let storage = MemoryCacheStorage::new("https://app.example.com");
        let url = "https://app.example.com/a.js";
        storage.put("v1", entry(url)).await.unwrap();
        storage
            .put("v1", CachedResponse::synthetic(url, "text/plain", "newer"))
            .await
            .unwrap();

        let stored = storage.match_url("v1", url).await.unwrap().unwrap();
        assert_eq!(&stored.body[..], b"newer");
        assert_eq!(storage.len("v1").await, Some(1));
    }
}
