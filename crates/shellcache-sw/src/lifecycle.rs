//! Install and activate.
//!
//! Install stages the shell into the temp store. Activate reconciles the
//! content store against the manifest applied last time, merges the staged
//! shell over it, and persists the new manifest. Any failure during
//! activation wipes all three stores: an empty cache falls back to the
//! network, a half-upgraded one can serve mismatched files.

use std::sync::Arc;

use futures::{stream, StreamExt, TryStreamExt};
use serde::Serialize;
use shellcache_net::{CacheMode, Fetcher, Request};
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::key::{key_for_stored, ResourceKey};
use crate::manifest::Manifest;
use crate::store::{CacheStorage, CachedResponse};

/// Which activation path ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationMode {
    /// No manifest was stored; content was rebuilt from the staged shell.
    ColdStart,
    /// A previous manifest was found and diffed.
    Upgrade,
}

/// Summary of a successful activation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivationReport {
    pub mode: ActivationMode,
    /// Keys evicted from content because they changed or disappeared.
    pub evicted: Vec<ResourceKey>,
    /// Number of content entries kept as-is.
    pub retained: usize,
    /// Number of staged entries copied into content.
    pub merged: usize,
}

/// Fetch every URL and store the responses in `cache`.
///
/// All-or-nothing: if any fetch fails or comes back with a non-2xx status,
/// nothing is written.
pub async fn add_all(
    storage: &dyn CacheStorage,
    fetcher: &dyn Fetcher,
    cache: &str,
    urls: Vec<String>,
    mode: CacheMode,
    concurrency: usize,
) -> Result<usize> {
    let responses: Vec<CachedResponse> = stream::iter(urls)
        .map(|url| async move {
            let request = Request::parse(&url)?.with_cache_mode(mode);
            let response = fetcher.fetch(&request).await?.error_for_status()?;
            Ok::<_, crate::error::CacheError>(CachedResponse::from_response(url, &response))
        })
        .buffered(concurrency.max(1))
        .try_collect()
        .await?;

    let count = responses.len();
    storage.open(cache).await?;
    for response in responses {
        storage.put(cache, response).await?;
    }
    Ok(count)
}

/// Drives the temp, content and manifest stores through one engine
/// version's install and activation.
pub struct LifecycleController {
    config: Arc<EngineConfig>,
    manifest: Arc<Manifest>,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
}

impl LifecycleController {
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

    /// Stage every shell resource into the temp store.
    ///
    /// Returns the number of staged entries. On error the temp store is
    /// left as it was.
    pub async fn install(&self) -> Result<usize> {
        let urls: Vec<String> = self
            .config
            .shell
            .iter()
            .map(|key| self.config.url_for(key))
            .collect();

        info!(count = urls.len(), cache = %self.config.caches.temp, "Staging shell resources");

        add_all(
            self.storage.as_ref(),
            self.fetcher.as_ref(),
            &self.config.caches.temp,
            urls,
            CacheMode::Reload,
            self.config.max_concurrent_fetches,
        )
        .await
    }

    /// Reconcile the stores against the new manifest.
    ///
    /// On failure every store is deleted before the error is returned.
    pub async fn activate(&self) -> Result<ActivationReport> {
        match self.reconcile().await {
            Ok(report) => {
                info!(
                    mode = ?report.mode,
                    evicted = report.evicted.len(),
                    retained = report.retained,
                    merged = report.merged,
                    "Activation complete"
                );
                Ok(report)
            }
            Err(e) => {
                error!(error = %e, category = e.category(), "Failed to upgrade cache, wiping stores");
                self.wipe().await;
                Err(e)
            }
        }
    }

    /// Delete all three stores, logging rather than failing on errors.
    pub async fn wipe(&self) {
        for cache in self.config.caches.all() {
            if let Err(e) = self.storage.delete(cache).await {
                warn!(cache, error = %e, "Could not delete cache");
            }
        }
    }

    async fn reconcile(&self) -> Result<ActivationReport> {
        let caches = &self.config.caches;
        let storage = self.storage.as_ref();

        storage.open(&caches.content).await?;
        storage.open(&caches.temp).await?;
        storage.open(&caches.manifest).await?;

        let stored = storage
            .match_url(&caches.manifest, &self.config.manifest_url())
            .await?;

        let Some(stored) = stored else {
            debug!("No stored manifest, rebuilding content from staged shell");
            storage.delete(&caches.content).await?;
            storage.open(&caches.content).await?;
            let merged = self.merge_staged().await?;
            self.persist_manifest().await?;
            return Ok(ActivationReport {
                mode: ActivationMode::ColdStart,
                evicted: Vec::new(),
                retained: 0,
                merged,
            });
        };

        let old = Manifest::from_slice(&stored.body)?;
        let diff = self.manifest.diff(&old);
        info!(
            added = diff.added.len(),
            changed = diff.changed.len(),
            removed = diff.removed.len(),
            unchanged = diff.unchanged.len(),
            "Manifest diff"
        );

        let origin = storage.origin();

        let mut evicted = Vec::new();
        let mut retained = 0;
        for url in storage.keys(&caches.content).await? {
            let key = key_for_stored(&url, origin);
            if diff.retains(key.as_str()) {
                retained += 1;
                continue;
            }
            debug!(key = %key, "Evicting stale resource");
            storage.remove(&caches.content, &url).await?;
            evicted.push(key);
        }

        let merged = self.merge_staged().await?;
        self.persist_manifest().await?;

        evicted.sort();
        Ok(ActivationReport {
            mode: ActivationMode::Upgrade,
            evicted,
            retained,
            merged,
        })
    }

    /// Copy every staged entry into content, then drop the temp store.
    async fn merge_staged(&self) -> Result<usize> {
        let caches = &self.config.caches;
        let storage = self.storage.as_ref();

        let mut merged = 0;
        for url in storage.keys(&caches.temp).await? {
            if let Some(entry) = storage.match_url(&caches.temp, &url).await? {
                storage.put(&caches.content, entry).await?;
                merged += 1;
            }
        }
        storage.delete(&caches.temp).await?;
        Ok(merged)
    }

    async fn persist_manifest(&self) -> Result<()> {
        let entry = CachedResponse::synthetic(
            self.config.manifest_url(),
            "application/json",
            self.manifest.to_json()?,
        );
        self.storage.put(&self.config.caches.manifest, entry).await?;
        Ok(())
    }
}
