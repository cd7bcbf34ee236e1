//! Command-line driver for the shellcache engine.
//!
//! ## Usage
//!
//! ```bash
//! # Show what an upgrade from one manifest to another would do
//! shellcache plan --old build-1/manifest.json --new build-2/manifest.json
//!
//! # Install and activate a build into a state directory
//! shellcache sync --config shellcache.json --manifest build-2/manifest.json --state-dir .cache
//!
//! # Route one request through the activated caches
//! shellcache fetch --config shellcache.json --manifest build-2/manifest.json --state-dir .cache /main.dart.js
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use shellcache_common::{init_logging, LogConfig};
use shellcache_net::{HttpFetcher, LoaderConfig, Request};
use shellcache_sw::{
    ControlCommand, EngineConfig, EngineEvent, FetchOutcome, FileCacheStorage, Manifest, RequestRouter,
    ServiceWorkerEngine,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "shellcache")]
#[command(about = "Versioned offline cache for an application shell")]
struct Cli {
    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show which keys an upgrade keeps, evicts and adds
    Plan {
        /// Manifest applied last
        #[arg(long)]
        old: PathBuf,
        /// Manifest being activated
        #[arg(long)]
        new: PathBuf,
        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Install and activate a manifest against the live origin
    Sync {
        /// Engine configuration file
        #[arg(short, long)]
        config: PathBuf,
        /// Manifest of the build to activate
        #[arg(short, long)]
        manifest: PathBuf,
        /// Directory holding the cache stores
        #[arg(long, default_value = ".shellcache")]
        state_dir: PathBuf,
        /// Also download every remaining resource for offline use
        #[arg(long)]
        offline: bool,
    },

    /// Route one GET request through the activated caches
    Fetch {
        /// Engine configuration file
        #[arg(short, long)]
        config: PathBuf,
        /// Manifest of the active build
        #[arg(short, long)]
        manifest: PathBuf,
        /// Directory holding the cache stores
        #[arg(long, default_value = ".shellcache")]
        state_dir: PathBuf,
        /// Path under the origin, or an absolute URL
        path: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Plan { old, new, json } => {
            setup_logging(None, cli.log_level.as_deref())?;
            plan(&old, &new, json)?;
        }

        Commands::Sync {
            config,
            manifest,
            state_dir,
            offline,
        } => {
            let config = EngineConfig::load(&config)?;
            setup_logging(config.logging.clone(), cli.log_level.as_deref())?;
            sync(config, &manifest, &state_dir, offline).await?;
        }

        Commands::Fetch {
            config,
            manifest,
            state_dir,
            path,
        } => {
            let config = EngineConfig::load(&config)?;
            setup_logging(config.logging.clone(), cli.log_level.as_deref())?;
            fetch(config, &manifest, &state_dir, &path).await?;
        }
    }

    Ok(())
}

fn setup_logging(
    configured: Option<LogConfig>,
    level: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut log = configured.unwrap_or_default();
    if let Some(level) = level {
        log.level = level.to_string();
    }
    init_logging(&log)?;
    Ok(())
}

fn plan(old: &Path, new: &Path, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let old = Manifest::load(old)?;
    let new = Manifest::load(new)?;
    let diff = new.diff(&old);

    if json {
        println!("{}", serde_json::to_string_pretty(&diff)?);
        return Ok(());
    }

    println!("Upgrade plan:");
    println!("  Keep:    {}", diff.unchanged.len());
    println!(
        "  Evict:   {} ({} changed, {} removed)",
        diff.changed.len() + diff.removed.len(),
        diff.changed.len(),
        diff.removed.len()
    );
    println!("  Add:     {}", diff.added.len());
    for key in &diff.changed {
        println!("  ~ {key}");
    }
    for key in &diff.removed {
        println!("  - {key}");
    }
    for key in &diff.added {
        println!("  + {key}");
    }
    if diff.is_noop() {
        println!("Nothing to do.");
    }
    Ok(())
}

async fn open_engine(
    config: EngineConfig,
    manifest: &Path,
    state_dir: &Path,
) -> Result<(ServiceWorkerEngine, UnboundedReceiver<EngineEvent>), Box<dyn std::error::Error>> {
    let manifest = Manifest::load(manifest)?;
    manifest.validate()?;
    let storage = FileCacheStorage::open_dir(config.origin.clone(), state_dir).await?;
    let fetcher = HttpFetcher::new(LoaderConfig::default())?;
    Ok(ServiceWorkerEngine::new(
        config,
        manifest,
        Arc::new(storage),
        Arc::new(fetcher),
    )?)
}

async fn sync(
    config: EngineConfig,
    manifest: &Path,
    state_dir: &Path,
    offline: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let (engine, mut events) = open_engine(config, manifest, state_dir).await?;

    let staged = engine.on_install().await?;
    info!(staged, "Install complete");
    let report = engine.on_activate().await?;
    println!(
        "Manifest of {} resources active for {}",
        engine.manifest().len(),
        engine.config().origin
    );
    println!("{}", serde_json::to_string_pretty(&report)?);

    if offline {
        engine.on_message(ControlCommand::DownloadOffline.as_str()).await?;
        println!("All resources available offline");
    }

    while let Ok(event) = events.try_recv() {
        debug!(?event, "Engine event");
    }
    Ok(())
}

async fn fetch(
    config: EngineConfig,
    manifest: &Path,
    state_dir: &Path,
    path: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let url = if path.contains("://") {
        path.to_string()
    } else {
        format!("{}/{}", config.origin, path.trim_start_matches('/'))
    };
    let request = Request::parse(&url)?;

    let manifest = Manifest::load(manifest)?;
    let storage = FileCacheStorage::open_dir(config.origin.clone(), state_dir).await?;
    let fetcher = HttpFetcher::new(LoaderConfig::default())?;
    let router = RequestRouter::new(
        Arc::new(config),
        Arc::new(manifest),
        Arc::new(storage),
        Arc::new(fetcher),
    );

    match router.route(&request).await? {
        FetchOutcome::Passthrough => println!("{url}: passthrough"),
        FetchOutcome::Respond { response, source } => println!(
            "{url}: {} from {source:?} ({} bytes)",
            response.status,
            response.body.len()
        ),
    }
    Ok(())
}
