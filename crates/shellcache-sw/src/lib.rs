//! # Shellcache SW
//!
//! Versioned offline cache for a browser-hosted application shell.
//!
//! ## Features
//!
//! - **Install**: stages the shell (entry document, main bundle, bootstrap
//!   script, asset manifests) with reload fetches
//! - **Activate**: diffs the stored manifest against the new one, keeps
//!   unchanged resources, evicts changed or removed ones, merges the staged
//!   shell, persists the new manifest
//! - **Fetch**: online-first for the entry document, cache-first with lazy
//!   fill for every other manifest resource
//! - **Control messages**: `skipWaiting` and `downloadOffline`
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerEngine (on_install / on_activate / on_fetch / on_message)
//!     ├── LifecycleController ──┐
//!     ├── RequestRouter ────────┼── CacheStorage (temp / content / manifest)
//!     └── control ──────────────┘        └── Fetcher (network)
//! ```

pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod key;
pub mod lifecycle;
pub mod manifest;
pub mod router;
pub mod store;

pub use config::{CacheNames, EngineConfig};
pub use control::ControlCommand;
pub use engine::{EngineEvent, ServiceWorkerEngine, WorkerState};
pub use error::{CacheError, Result, StoreError};
pub use key::{derive_key, key_for_stored, ResourceKey};
pub use lifecycle::{ActivationMode, ActivationReport, LifecycleController};
pub use manifest::{Fingerprint, Manifest, ManifestDiff, ShellSet};
pub use router::{FetchOutcome, RequestRouter, ResponseSource};
pub use store::{CacheStorage, CachedResponse, FileCacheStorage, MemoryCacheStorage, StoredHeader};
