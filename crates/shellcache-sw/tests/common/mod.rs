//! Shared fakes for the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use http::StatusCode;
use shellcache_net::{Fetcher, NetError, Request, Response};
use shellcache_sw::error::StoreResult;
use shellcache_sw::{CacheStorage, CachedResponse, MemoryCacheStorage, StoreError};

pub const ORIGIN: &str = "https://gym.example.com";

/// Fetcher serving a mutable table of path to (status, body).
#[derive(Default)]
pub struct Origin {
    routes: Mutex<HashMap<String, (u16, String)>>,
    offline: AtomicBool,
    hits: Mutex<Vec<String>>,
}

impl Origin {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn deploy(&self, files: &[(&str, &str)]) {
        let mut routes = self.routes.lock().unwrap();
        routes.clear();
        for (path, body) in files {
            routes.insert(path.to_string(), (200, body.to_string()));
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Paths fetched so far.
    pub fn hits(&self) -> Vec<String> {
        self.hits.lock().unwrap().clone()
    }

    pub fn clear_hits(&self) {
        self.hits.lock().unwrap().clear();
    }
}

#[async_trait]
impl Fetcher for Origin {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(NetError::RequestFailed("network unreachable".to_string()));
        }
        let path = request.url.path().to_string();
        self.hits.lock().unwrap().push(path.clone());
        let (status, body) = self
            .routes
            .lock()
            .unwrap()
            .get(&path)
            .cloned()
            .unwrap_or((404, String::new()));
        Ok(Response::new(
            request.url.clone(),
            StatusCode::from_u16(status).unwrap(),
            body,
        ))
    }
}

/// Memory storage that can be told to fail writes into one cache.
pub struct FlakyStorage {
    inner: MemoryCacheStorage,
    failing_cache: Mutex<Option<String>>,
}

impl FlakyStorage {
    pub fn new(origin: &str) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryCacheStorage::new(origin),
            failing_cache: Mutex::new(None),
        })
    }

    pub fn fail_puts_into(&self, cache: Option<&str>) {
        *self.failing_cache.lock().unwrap() = cache.map(str::to_string);
    }
}

#[async_trait]
impl CacheStorage for FlakyStorage {
    fn origin(&self) -> &str {
        self.inner.origin()
    }

    async fn open(&self, cache: &str) -> StoreResult<()> {
        self.inner.open(cache).await
    }

    async fn has(&self, cache: &str) -> StoreResult<bool> {
        self.inner.has(cache).await
    }

    async fn delete(&self, cache: &str) -> StoreResult<bool> {
        self.inner.delete(cache).await
    }

    async fn cache_names(&self) -> StoreResult<Vec<String>> {
        self.inner.cache_names().await
    }

    async fn keys(&self, cache: &str) -> StoreResult<Vec<String>> {
        self.inner.keys(cache).await
    }

    async fn match_url(&self, cache: &str, url: &str) -> StoreResult<Option<CachedResponse>> {
        self.inner.match_url(cache, url).await
    }

    async fn put(&self, cache: &str, response: CachedResponse) -> StoreResult<()> {
        let failing = self.failing_cache.lock().unwrap().clone();
        if failing.as_deref() == Some(cache) {
            return Err(StoreError::Backend(format!("quota exceeded writing {cache}")));
        }
        self.inner.put(cache, response).await
    }

    async fn remove(&self, cache: &str, url: &str) -> StoreResult<bool> {
        self.inner.remove(cache, url).await
    }
}

pub fn body(response: &Response) -> String {
    String::from_utf8(response.body.to_vec()).unwrap()
}
