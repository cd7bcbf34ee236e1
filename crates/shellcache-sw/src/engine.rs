//! The engine as one explicit state machine.
//!
//! ```text
//! Parsed ──on_install──▶ Installing ──▶ Waiting ──on_activate──▶ Activating ──▶ Active
//!                             │                                      │
//!                             └──────────────▶ Failed ◀──────────────┘
//! ```
//!
//! The host calls the `on_*` methods when the matching browser event fires.
//! Lifecycle transitions are serialized; fetches run concurrently with
//! each other.
//!
//! ## Skip-waiting
//!
//! The engine never fires its own activate event. A successful install
//! always requests skip-waiting and emits [`EngineEvent::SkipWaiting`]; the
//! host answers that by calling [`ServiceWorkerEngine::on_activate`]. The
//! `skipWaiting` control message records the same request; if the engine
//! is `Waiting` it also activates in place. In any other state the message
//! only records the request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use shellcache_net::{Fetcher, Request};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::control::{download_offline, ControlCommand};
use crate::error::{CacheError, Result};
use crate::lifecycle::{ActivationReport, LifecycleController};
use crate::manifest::Manifest;
use crate::router::{FetchOutcome, RequestRouter};
use crate::store::CacheStorage;

/// Engine lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WorkerState {
    /// Created, nothing run yet.
    #[default]
    Parsed,
    /// Staging the shell.
    Installing,
    /// Installed, waiting for activation.
    Waiting,
    /// Reconciling stores.
    Activating,
    /// Controlling pages and routing requests.
    Active,
    /// Install or activation failed.
    Failed,
    /// Unregistered; all stores deleted.
    Redundant,
}

/// Events the host may react to.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// State changed.
    StateChanged { from: WorkerState, to: WorkerState },
    /// The engine asked to take over without waiting for open pages.
    SkipWaiting,
    /// The engine now controls all open pages.
    ClientsClaimed,
    /// All stores were deleted.
    CachesWiped { reason: String },
}

/// Offline cache engine for one deployed version of the application.
pub struct ServiceWorkerEngine {
    config: Arc<EngineConfig>,
    manifest: Arc<Manifest>,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    lifecycle: LifecycleController,
    router: RequestRouter,
    state: RwLock<WorkerState>,
    transition: Mutex<()>,
    skip_waiting: AtomicBool,
    event_tx: mpsc::UnboundedSender<EngineEvent>,
}

impl ServiceWorkerEngine {
    /// Create an engine for `manifest`.
    ///
    /// The storage must normalize keys against the configured origin.
    pub fn new(
        config: EngineConfig,
        manifest: Manifest,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<EngineEvent>)> {
        config.validate()?;
        if storage.origin() != config.origin {
            return Err(CacheError::config(format!(
                "storage origin '{}' does not match configured origin '{}'",
                storage.origin(),
                config.origin
            )));
        }

        let config = Arc::new(config);
        let manifest = Arc::new(manifest);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let lifecycle = LifecycleController::new(
            Arc::clone(&config),
            Arc::clone(&manifest),
            Arc::clone(&storage),
            Arc::clone(&fetcher),
        );
        let router = RequestRouter::new(
            Arc::clone(&config),
            Arc::clone(&manifest),
            Arc::clone(&storage),
            Arc::clone(&fetcher),
        );

        Ok((
            Self {
                config,
                manifest,
                storage,
                fetcher,
                lifecycle,
                router,
                state: RwLock::new(WorkerState::Parsed),
                transition: Mutex::new(()),
                skip_waiting: AtomicBool::new(false),
                event_tx,
            },
            event_rx,
        ))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Current state.
    pub async fn state(&self) -> WorkerState {
        *self.state.read().await
    }

    /// Whether skip-waiting has been requested.
    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::Acquire)
    }

    /// Handle the install event.
    ///
    /// Leaves the engine `Waiting` with skip-waiting requested; activation
    /// is up to the host.
    pub async fn on_install(&self) -> Result<usize> {
        let _guard = self.transition.lock().await;
        self.expect_state(&[WorkerState::Parsed, WorkerState::Failed], "install")
            .await?;
        self.set_state(WorkerState::Installing).await;

        match self.lifecycle.install().await {
            Ok(staged) => {
                self.request_skip_waiting();
                self.set_state(WorkerState::Waiting).await;
                Ok(staged)
            }
            Err(e) => {
                error!(error = %e, category = e.category(), "Install failed");
                self.set_state(WorkerState::Failed).await;
                Err(e)
            }
        }
    }

    /// Handle the activate event.
    ///
    /// Running it again while active re-applies the same manifest, which
    /// changes nothing once the temp store is gone.
    pub async fn on_activate(&self) -> Result<ActivationReport> {
        let _guard = self.transition.lock().await;
        self.expect_state(&[WorkerState::Waiting, WorkerState::Active], "activate")
            .await?;
        self.set_state(WorkerState::Activating).await;

        match self.lifecycle.activate().await {
            Ok(report) => {
                self.set_state(WorkerState::Active).await;
                self.emit(EngineEvent::ClientsClaimed);
                Ok(report)
            }
            Err(e) => {
                self.set_state(WorkerState::Failed).await;
                self.emit(EngineEvent::CachesWiped {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Handle an intercepted request.
    ///
    /// Only an active engine answers requests; in every other state the
    /// request passes through to the network.
    pub async fn on_fetch(&self, request: &Request) -> Result<FetchOutcome> {
        if self.state().await != WorkerState::Active {
            return Ok(FetchOutcome::Passthrough);
        }
        self.router.route(request).await
    }

    /// Handle a control message from the hosting page.
    pub async fn on_message(&self, message: &str) -> Result<()> {
        let Some(command) = ControlCommand::parse(message) else {
            debug!(message, "Ignoring unrecognized control message");
            return Ok(());
        };

        info!(%command, "Control message received");
        match command {
            ControlCommand::SkipWaiting => {
                self.request_skip_waiting();
                if self.state().await == WorkerState::Waiting {
                    self.on_activate().await?;
                }
                Ok(())
            }
            ControlCommand::DownloadOffline => self.download_offline().await.map(|_| ()),
        }
    }

    /// Download every manifest resource missing from the content store.
    pub async fn download_offline(&self) -> Result<usize> {
        download_offline(
            &self.config,
            &self.manifest,
            self.storage.as_ref(),
            self.fetcher.as_ref(),
        )
        .await
    }

    /// Delete every store and retire this engine.
    pub async fn unregister(&self) -> Result<()> {
        let _guard = self.transition.lock().await;
        for cache in self.storage.cache_names().await? {
            if let Err(e) = self.storage.delete(&cache).await {
                warn!(cache = %cache, error = %e, "Could not delete cache");
            }
        }
        self.set_state(WorkerState::Redundant).await;
        self.emit(EngineEvent::CachesWiped {
            reason: "unregistered".to_string(),
        });
        Ok(())
    }

    fn request_skip_waiting(&self) {
        if !self.skip_waiting.swap(true, Ordering::AcqRel) {
            self.emit(EngineEvent::SkipWaiting);
        }
    }

    async fn expect_state(&self, allowed: &[WorkerState], action: &str) -> Result<()> {
        let current = self.state().await;
        if allowed.contains(&current) {
            Ok(())
        } else {
            Err(CacheError::InvalidState(format!(
                "cannot {action} while {current:?}"
            )))
        }
    }

    async fn set_state(&self, to: WorkerState) {
        let from = std::mem::replace(&mut *self.state.write().await, to);
        if from != to {
            info!(?from, ?to, "Engine state changed");
            self.emit(EngineEvent::StateChanged { from, to });
        }
    }

    fn emit(&self, event: EngineEvent) {
        // The host may have dropped the receiver; events are advisory.
        let _ = self.event_tx.send(event);
    }
}
