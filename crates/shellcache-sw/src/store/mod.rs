//! The Store Manager.
//!
//! Every named cache the engine touches goes through [`CacheStorage`]. Entries
//! are addressed by canonical request URL (see
//! [`ResourceKey::to_url`](crate::key::ResourceKey::to_url)), and operating
//! on a cache that does not exist behaves like operating on an empty one.
//!
//! ```text
//! CacheStorage
//!     ├── flutter-temp-cache      (staging, lives for one install/activate)
//!     ├── flutter-app-cache       (content)
//!     └── flutter-app-manifest    (one entry: the applied manifest)
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};
use shellcache_net::Response;
use url::Url;

use crate::error::{StoreError, StoreResult};

mod file;
mod memory;

pub use file::FileCacheStorage;
pub use memory::MemoryCacheStorage;

/// One response header line.
///
/// Values that are not visible ASCII are kept base64-encoded and flagged
/// `binary`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredHeader {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub binary: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl StoredHeader {
    fn from_pair(name: &HeaderName, value: &HeaderValue) -> Self {
        match value.to_str() {
            Ok(text) => Self {
                name: name.as_str().to_string(),
                value: text.to_string(),
                binary: false,
            },
            Err(_) => Self {
                name: name.as_str().to_string(),
                value: STANDARD.encode(value.as_bytes()),
                binary: true,
            },
        }
    }

    fn to_pair(&self) -> StoreResult<(HeaderName, HeaderValue)> {
        let name = HeaderName::try_from(self.name.as_str())
            .map_err(|e| StoreError::Backend(format!("stored header name '{}': {e}", self.name)))?;
        let bytes = if self.binary {
            STANDARD.decode(self.value.as_bytes()).map_err(|e| {
                StoreError::Backend(format!("stored header '{}' is not base64: {e}", self.name))
            })?
        } else {
            self.value.clone().into_bytes()
        };
        let value = HeaderValue::from_bytes(&bytes)
            .map_err(|e| StoreError::Backend(format!("stored header '{}': {e}", self.name)))?;
        Ok((name, value))
    }
}

/// A stored request/response pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    /// Request URL the entry is stored under.
    pub url: String,

    /// Response status.
    pub status: u16,

    /// Response headers in wire order, repeated names included.
    pub headers: Vec<StoredHeader>,

    /// Response body.
    #[serde(with = "base64_body")]
    pub body: Bytes,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CachedResponse {
    /// Snapshot `response` for storage under `url`.
    pub fn from_response(url: impl Into<String>, response: &Response) -> Self {
        Self {
            url: url.into(),
            status: response.status.as_u16(),
            headers: response
                .headers
                .iter()
                .map(|(name, value)| StoredHeader::from_pair(name, value))
                .collect(),
            body: response.body.clone(),
            cached_at: now_millis(),
        }
    }

    /// A 200 response carrying `body`, used for engine-owned entries such
    /// as the persisted manifest.
    pub fn synthetic(url: impl Into<String>, content_type: &str, body: impl Into<Bytes>) -> Self {
        Self {
            url: url.into(),
            status: StatusCode::OK.as_u16(),
            headers: vec![StoredHeader {
                name: CONTENT_TYPE.as_str().to_string(),
                value: content_type.to_string(),
                binary: false,
            }],
            body: body.into(),
            cached_at: now_millis(),
        }
    }

    /// Rebuild a network response from this entry.
    pub fn to_response(&self) -> StoreResult<Response> {
        let url = Url::parse(&self.url)
            .map_err(|e| StoreError::Backend(format!("stored url '{}': {e}", self.url)))?;
        let status = StatusCode::from_u16(self.status)
            .map_err(|e| StoreError::Backend(format!("stored status {}: {e}", self.status)))?;

        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for header in &self.headers {
            let (name, value) = header.to_pair()?;
            headers.append(name, value);
        }

        Ok(Response {
            url,
            status,
            headers,
            body: self.body.clone(),
        })
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Named key-value stores of request URL to cached response.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Origin prefix used to turn stored URLs back into resource keys.
    fn origin(&self) -> &str;

    /// Open a cache, creating it if it does not exist.
    async fn open(&self, cache: &str) -> StoreResult<()>;

    /// Check if a cache exists.
    async fn has(&self, cache: &str) -> StoreResult<bool>;

    /// Delete a whole cache. Returns whether it existed.
    async fn delete(&self, cache: &str) -> StoreResult<bool>;

    /// Names of all existing caches.
    async fn cache_names(&self) -> StoreResult<Vec<String>>;

    /// Request URLs stored in `cache`.
    async fn keys(&self, cache: &str) -> StoreResult<Vec<String>>;

    /// Look up the entry stored under `url`.
    async fn match_url(&self, cache: &str, url: &str) -> StoreResult<Option<CachedResponse>>;

    /// Store `response` under its URL, replacing any previous entry.
    async fn put(&self, cache: &str, response: CachedResponse) -> StoreResult<()>;

    /// Remove one entry. Returns whether it existed.
    async fn remove(&self, cache: &str, url: &str) -> StoreResult<bool>;
}

mod base64_body {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_round_trip() {
        let url = Url::parse("https://app.example.com/main.dart.js").unwrap();
        let mut response = Response::new(url.clone(), StatusCode::OK, "void main() {}");
        response.headers.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/javascript"),
        );

        let entry = CachedResponse::from_response(url.as_str(), &response);
        assert_eq!(entry.status, 200);
        assert_eq!(entry.headers[0].name, "content-type");
        assert_eq!(entry.headers[0].value, "application/javascript");

        let restored = entry.to_response().unwrap();
        assert_eq!(restored.url, url);
        assert_eq!(restored.body, response.body);
        assert!(restored.ok());
    }

    #[test]
    fn test_body_serializes_as_base64() {
        let entry = CachedResponse::synthetic("https://app.example.com/manifest", "application/json", "{}");
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"body\":\"e30=\""));

        let restored: CachedResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(&restored.body[..], b"{}");
    }

    #[test]
    fn test_repeated_and_binary_headers_survive() {
        let url = Url::parse("https://app.example.com/a.js").unwrap();
        let mut response = Response::new(url.clone(), StatusCode::OK, "a");
        response.headers.append(http::header::VARY, HeaderValue::from_static("accept-encoding"));
        response.headers.append(http::header::VARY, HeaderValue::from_static("origin"));
        response.headers.insert(
            HeaderName::from_static("x-build"),
            HeaderValue::from_bytes(b"caf\xe9").unwrap(),
        );

        let entry = CachedResponse::from_response(url.as_str(), &response);
        let json = serde_json::to_string(&entry).unwrap();
        let restored = serde_json::from_str::<CachedResponse>(&json)
            .unwrap()
            .to_response()
            .unwrap();

        let vary: Vec<_> = restored.headers.get_all(http::header::VARY).iter().collect();
        assert_eq!(vary, vec!["accept-encoding", "origin"]);
        assert_eq!(restored.headers["x-build"].as_bytes(), b"caf\xe9");
    }
}
