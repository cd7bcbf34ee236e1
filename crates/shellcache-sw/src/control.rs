//! Commands posted by the hosting page.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use shellcache_net::{CacheMode, Fetcher};
use tracing::info;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::key::key_for_stored;
use crate::lifecycle::add_all;
use crate::manifest::Manifest;
use crate::store::CacheStorage;

/// A recognized control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Activate a waiting engine without waiting for pages to close. The
    /// page reloads itself afterwards.
    SkipWaiting,
    /// Fetch every manifest resource missing from the content store.
    DownloadOffline,
}

impl ControlCommand {
    pub const SKIP_WAITING: &'static str = "skipWaiting";
    pub const DOWNLOAD_OFFLINE: &'static str = "downloadOffline";

    /// Parse a message; unknown messages yield `None`.
    pub fn parse(message: &str) -> Option<Self> {
        match message {
            Self::SKIP_WAITING => Some(Self::SkipWaiting),
            Self::DOWNLOAD_OFFLINE => Some(Self::DownloadOffline),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SkipWaiting => Self::SKIP_WAITING,
            Self::DownloadOffline => Self::DOWNLOAD_OFFLINE,
        }
    }
}

impl FromStr for ControlCommand {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unknown control message '{s}'"))
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fetch and store every manifest resource not yet in the content store.
///
/// Returns the number of resources downloaded.
pub async fn download_offline(
    config: &EngineConfig,
    manifest: &Manifest,
    storage: &dyn CacheStorage,
    fetcher: &dyn Fetcher,
) -> Result<usize> {
    let origin = storage.origin();
    let present: HashSet<String> = storage
        .keys(&config.caches.content)
        .await?
        .iter()
        .map(|url| key_for_stored(url, origin).as_str().to_string())
        .collect();

    let mut missing: Vec<_> = manifest
        .keys()
        .filter(|key| !present.contains(key.as_str()))
        .collect();
    missing.sort();

    if missing.is_empty() {
        info!("All resources already available offline");
        return Ok(0);
    }

    info!(count = missing.len(), "Downloading resources for offline use");
    let urls = missing.into_iter().map(|key| key.to_url(origin)).collect();
    add_all(
        storage,
        fetcher,
        &config.caches.content,
        urls,
        CacheMode::Default,
        config.max_concurrent_fetches,
    )
    .await
}
