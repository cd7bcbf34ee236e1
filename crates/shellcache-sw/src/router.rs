//! Per-request fetch policy.
//!
//! | key                      | policy                                  |
//! |--------------------------|-----------------------------------------|
//! | not in the manifest      | pass through to the network             |
//! | `/` (entry document)     | online first, content store on failure  |
//! | any other manifest key   | content store first, lazy fill on miss  |

use std::sync::Arc;

use shellcache_net::{Fetcher, Request, Response};
use tracing::{debug, trace, warn};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::key::{derive_key, ResourceKey};
use crate::manifest::Manifest;
use crate::store::{CacheStorage, CachedResponse};

/// Where a routed response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Cache,
    Network,
}

/// Result of routing one request.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// The engine does not handle this request; the host performs its
    /// default network behavior.
    Passthrough,
    /// The engine answered the request.
    Respond {
        response: Response,
        source: ResponseSource,
    },
}

impl FetchOutcome {
    fn cached(response: Response) -> Self {
        Self::Respond {
            response,
            source: ResponseSource::Cache,
        }
    }

    fn network(response: Response) -> Self {
        Self::Respond {
            response,
            source: ResponseSource::Network,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(self, Self::Passthrough)
    }

    pub fn response(&self) -> Option<&Response> {
        match self {
            Self::Respond { response, .. } => Some(response),
            Self::Passthrough => None,
        }
    }

    pub fn source(&self) -> Option<ResponseSource> {
        match self {
            Self::Respond { source, .. } => Some(*source),
            Self::Passthrough => None,
        }
    }
}

/// Answers intercepted requests from the content store or the network.
pub struct RequestRouter {
    config: Arc<EngineConfig>,
    manifest: Arc<Manifest>,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
}

impl RequestRouter {
    pub fn new(
        config: Arc<EngineConfig>,
        manifest: Arc<Manifest>,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            config,
            manifest,
            storage,
            fetcher,
        }
    }

    /// Route one request.
    ///
    /// Errors are network failures the engine could not recover from; the
    /// host should surface them exactly as an unintercepted fetch failure.
    pub async fn route(&self, request: &Request) -> Result<FetchOutcome> {
        if !request.is_get() {
            trace!(method = %request.method, url = %request.url, "Ignoring non-GET request");
            return Ok(FetchOutcome::Passthrough);
        }

        let key = derive_key(request.url.as_str(), &self.config.origin);
        if !self.manifest.contains(key.as_str()) {
            trace!(key = %key, "Not a managed resource");
            return Ok(FetchOutcome::Passthrough);
        }

        if key.is_root() {
            self.online_first(request, &key).await
        } else {
            self.cache_first(request, &key).await
        }
    }

    async fn online_first(&self, request: &Request, key: &ResourceKey) -> Result<FetchOutcome> {
        let cache = &self.config.caches.content;
        let url = self.config.url_for(key);

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                debug!(key = %key, status = %response.status, "Online-first: network response");
                self.store(&url, &response).await;
                Ok(FetchOutcome::network(response))
            }
            Err(fetch_error) => {
                debug!(key = %key, error = %fetch_error, "Online-first: network failed, trying cache");
                match self.storage.match_url(cache, &url).await {
                    Ok(Some(entry)) => Ok(FetchOutcome::cached(entry.to_response()?)),
                    Ok(None) => Err(fetch_error.into()),
                    Err(e) => {
                        warn!(key = %key, error = %e, "Cache lookup failed after network error");
                        Err(fetch_error.into())
                    }
                }
            }
        }
    }

    async fn cache_first(&self, request: &Request, key: &ResourceKey) -> Result<FetchOutcome> {
        let cache = &self.config.caches.content;
        let url = self.config.url_for(key);

        if let Some(entry) = self.storage.match_url(cache, &url).await? {
            trace!(key = %key, "Cache-first: hit");
            return Ok(FetchOutcome::cached(entry.to_response()?));
        }

        let response = self.fetcher.fetch(request).await?;
        if response.ok() {
            debug!(key = %key, "Cache-first: miss, filling from network");
            self.store(&url, &response).await;
        } else {
            debug!(key = %key, status = %response.status, "Cache-first: not caching error response");
        }
        Ok(FetchOutcome::network(response))
    }

    /// Write-behind store; a failed write never fails the request.
    async fn store(&self, url: &str, response: &Response) {
        let entry = CachedResponse::from_response(url, response);
        if let Err(e) = self.storage.put(&self.config.caches.content, entry).await {
            warn!(url, error = %e, "Could not store response");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedFetcher, ORIGIN};
    use crate::store::MemoryCacheStorage;
    use http::Method;

    fn router(manifest: Manifest) -> (RequestRouter, Arc<MemoryCacheStorage>, Arc<ScriptedFetcher>) {
        let config = Arc::new(EngineConfig::new(ORIGIN));
        let storage = Arc::new(MemoryCacheStorage::new(ORIGIN));
        let fetcher = Arc::new(ScriptedFetcher::new());
        let router = RequestRouter::new(config, Arc::new(manifest), storage.clone(), fetcher.clone());
        (router, storage, fetcher)
    }

    fn get(path: &str) -> Request {
        Request::parse(&format!("{ORIGIN}{path}")).unwrap()
    }

    fn body(outcome: &FetchOutcome) -> String {
        String::from_utf8(outcome.response().unwrap().body.to_vec()).unwrap()
    }

    fn manifest() -> Manifest {
        Manifest::from_pairs([("/", "h0"), ("index.html", "h0"), ("a.js", "h1")])
    }

    #[tokio::test]
    async fn test_non_get_passes_through() {
        let (router, _, fetcher) = router(manifest());
        let request = Request::new(Method::POST, get("/a.js").url);

        assert!(router.route(&request).await.unwrap().is_passthrough());
        assert!(fetcher.requests().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_key_passes_through() {
        let (router, _, fetcher) = router(manifest());
        assert!(router.route(&get("/api/skills")).await.unwrap().is_passthrough());
        assert!(fetcher.requests().is_empty());
    }

    #[tokio::test]
    async fn test_cache_first_lazy_fill() {
        let (router, storage, fetcher) = router(manifest());
        fetcher.serve("/a.js", 200, "a");

        let first = router.route(&get("/a.js")).await.unwrap();
        assert_eq!(first.source(), Some(ResponseSource::Network));
        assert_eq!(body(&first), "a");

        fetcher.set_offline(true);
        let second = router.route(&get("/a.js?v=7")).await.unwrap();
        assert_eq!(second.source(), Some(ResponseSource::Cache));
        assert_eq!(body(&second), "a");
        assert_eq!(storage.len("flutter-app-cache").await, Some(1));
    }

    #[tokio::test]
    async fn test_cache_first_does_not_store_errors() {
        let (router, storage, fetcher) = router(manifest());
        fetcher.serve("/a.js", 503, "busy");

        let outcome = router.route(&get("/a.js")).await.unwrap();
        assert_eq!(outcome.response().unwrap().status.as_u16(), 503);
        assert!(storage.keys("flutter-app-cache").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cache_first_network_error_propagates() {
        let (router, _, fetcher) = router(manifest());
        fetcher.set_offline(true);

        let err = router.route(&get("/a.js")).await.unwrap_err();
        assert_eq!(err.category(), "network");
    }

    #[tokio::test]
    async fn test_online_first_prefers_network_and_stores() {
        let (router, storage, fetcher) = router(manifest());
        storage
            .put(
                "flutter-app-cache",
                CachedResponse::synthetic(format!("{ORIGIN}/"), "text/html", "old"),
            )
            .await
            .unwrap();
        fetcher.serve("/", 200, "new");

        let outcome = router.route(&get("/")).await.unwrap();
        assert_eq!(outcome.source(), Some(ResponseSource::Network));
        assert_eq!(body(&outcome), "new");

        let stored = storage
            .match_url("flutter-app-cache", &format!("{ORIGIN}/"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&stored.body[..], b"new");
    }

    #[tokio::test]
    async fn test_online_first_falls_back_to_cache() {
        let (router, _, fetcher) = router(manifest());
        fetcher.serve("/", 200, "index");
        router.route(&get("/")).await.unwrap();

        fetcher.set_offline(true);
        for path in ["", "/", "/#/calculator", "/?v=3"] {
            let outcome = router.route(&get(path)).await.unwrap();
            assert_eq!(outcome.source(), Some(ResponseSource::Cache), "{path}");
            assert_eq!(body(&outcome), "index");
        }
    }

    #[tokio::test]
    async fn test_online_first_without_cache_propagates() {
        let (router, _, fetcher) = router(manifest());
        fetcher.set_offline(true);

        assert!(router.route(&get("/")).await.is_err());
    }
}
