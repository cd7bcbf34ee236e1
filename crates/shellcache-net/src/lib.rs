//! # Shellcache Net
//!
//! The network side of the shellcache engine.
//!
//! The engine never talks to a socket directly. Every live fetch goes
//! through the [`Fetcher`] trait so the lifecycle and routing logic can run
//! against a scripted fetcher in tests and against [`HttpFetcher`] in the
//! CLI.
//!
//! ## Cache modes
//!
//! Shell resources are staged with [`CacheMode::Reload`], which asks every
//! intermediate HTTP cache to revalidate. Everything else uses
//! [`CacheMode::Default`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{CACHE_CONTROL, PRAGMA};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info, trace};
use url::Url;

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Bad status {status} for {url}")]
    BadStatus { url: Url, status: StatusCode },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// How a request interacts with upstream HTTP caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Normal HTTP caching rules apply.
    #[default]
    Default,
    /// Bypass any upstream cache and fetch a fresh copy.
    Reload,
}

/// An outbound resource request.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub cache_mode: CacheMode,
}

impl Request {
    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Create a request with an arbitrary method.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method,
            headers: HeaderMap::new(),
            cache_mode: CacheMode::Default,
        }
    }

    /// Parse `url` and create a GET request for it.
    pub fn parse(url: &str) -> Result<Self, NetError> {
        let url = Url::parse(url).map_err(|e| NetError::InvalidUrl(format!("{url}: {e}")))?;
        Ok(Self::get(url))
    }

    /// Set how this request treats upstream caches.
    pub fn with_cache_mode(mut self, mode: CacheMode) -> Self {
        self.cache_mode = mode;
        self
    }

    /// Whether this is a GET request.
    pub fn is_get(&self) -> bool {
        self.method == Method::GET
    }
}

/// A fully buffered response.
///
/// Bodies are [`Bytes`], so cloning a response to store one copy and return
/// the other is cheap.
#[derive(Debug, Clone)]
pub struct Response {
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    /// Build a response from parts.
    pub fn new(url: Url, status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            url,
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Check if request was successful (2xx).
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Turn a non-2xx response into [`NetError::BadStatus`].
    pub fn error_for_status(self) -> Result<Self, NetError> {
        if self.ok() {
            Ok(self)
        } else {
            Err(NetError::BadStatus {
                url: self.url,
                status: self.status,
            })
        }
    }
}

/// The network collaborator.
///
/// An `Err` means the fetch itself failed (DNS, connection, timeout). A
/// response with an error status is still `Ok`.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError>;
}

/// Loader configuration for [`HttpFetcher`].
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// User agent string.
    pub user_agent: String,
    /// Default timeout.
    pub default_timeout: Duration,
    /// Maximum redirects.
    pub max_redirects: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("shellcache/{}", env!("CARGO_PKG_VERSION")),
            default_timeout: Duration::from_secs(30),
            max_redirects: 10,
        }
    }
}

/// [`Fetcher`] backed by a `reqwest` client.
pub struct HttpFetcher {
    client: Client,
    config: LoaderConfig,
}

impl HttpFetcher {
    /// Create a new fetcher.
    pub fn new(config: LoaderConfig) -> Result<Self, NetError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.default_timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        info!(user_agent = %config.user_agent, "HttpFetcher initialized");

        Ok(Self { client, config })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        debug!(url = %request.url, method = %request.method, mode = ?request.cache_mode, "Fetching resource");

        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());

        if request.cache_mode == CacheMode::Reload {
            builder = builder
                .header(CACHE_CONTROL, HeaderValue::from_static("no-cache"))
                .header(PRAGMA, HeaderValue::from_static("no-cache"));
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                NetError::Timeout(self.config.default_timeout)
            } else {
                NetError::Http(e)
            }
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response.bytes().await?;

        trace!(url = %url, status = %status, body_len = body.len(), "Response received");

        Ok(Response {
            url,
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_request_builder() {
        let request = Request::parse("https://example.com/main.dart.js")
            .unwrap()
            .with_cache_mode(CacheMode::Reload);

        assert_eq!(request.method, Method::GET);
        assert_eq!(request.cache_mode, CacheMode::Reload);
        assert!(request.is_get());
    }

    #[test]
    fn test_invalid_url() {
        assert!(matches!(
            Request::parse("not a url"),
            Err(NetError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_request_id_uniqueness() {
        assert_ne!(RequestId::new(), RequestId::new());
    }

    #[test]
    fn test_error_for_status() {
        let url = Url::parse("https://example.com/missing.js").unwrap();
        let response = Response::new(url, StatusCode::NOT_FOUND, "nope");
        assert!(!response.ok());
        assert!(matches!(
            response.error_for_status(),
            Err(NetError::BadStatus { status, .. }) if status == StatusCode::NOT_FOUND
        ));
    }

    #[tokio::test]
    async fn test_reload_sends_no_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index.html"))
            .and(header("cache-control", "no-cache"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(LoaderConfig::default()).unwrap();
        let request = Request::parse(&format!("{}/index.html", server.uri()))
            .unwrap()
            .with_cache_mode(CacheMode::Reload);
        let response = fetcher.fetch(&request).await.unwrap();

        assert!(response.ok());
        assert_eq!(&response.body[..], b"<html></html>");
    }

    #[tokio::test]
    async fn test_error_status_is_not_a_fetch_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone.js"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(LoaderConfig::default()).unwrap();
        let request = Request::parse(&format!("{}/gone.js", server.uri())).unwrap();
        let response = fetcher.fetch(&request).await.unwrap();

        assert_eq!(response.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_connection_refused_is_error() {
        let fetcher = HttpFetcher::new(LoaderConfig::default()).unwrap();
        let request = Request::parse("http://127.0.0.1:9/index.html").unwrap();
        assert!(fetcher.fetch(&request).await.is_err());
    }
}
