//! bookmark-cache: keeps article content for recently changed bookmarks
//! available offline.
//!
//! A sync coordinator drives the replication engine from connectivity
//! changes and publishes one combined sync state. A download scheduler
//! watches the local bookmark list and fetches article content for bookmarks
//! updated within the recent window, with bounded queueing and concurrency.

#![warn(clippy::all)]

mod bookmarks;
mod cli;
mod config;
mod connectivity;
mod content;
mod download;
pub mod retry;
mod shutdown;
mod status;
mod sync;
#[cfg(test)]
mod test_support;
mod types;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use bookmarks::{BookmarkWatcher, JsonFileWatcher};
use cli::Command;
use config::Config;
use connectivity::ProbeMonitor;
use content::store::FsContentStore;
use content::HttpContentApi;
use download::inflight::InFlightSet;
use download::DownloadScheduler;
use status::{DownloadStatus, StatusBoard, StatusMap, SyncState};
use sync::engine::LocalOnlyEngine;
use sync::{ConnectOptions, SyncCoordinator};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

fn build_client() -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .connect_timeout(CONNECT_TIMEOUT)
        .user_agent(concat!("bookmark-cache/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")
}

fn content_api(config: &Config, client: reqwest::Client) -> anyhow::Result<HttpContentApi> {
    Ok(HttpContentApi::new(
        client,
        config.require_api_url()?,
        config.api_token.clone(),
        config.retry,
    ))
}

/// Log sync state changes and per-bookmark status transitions until
/// `token` is cancelled.
fn spawn_status_logger(
    mut sync_rx: watch::Receiver<SyncState>,
    mut download_rx: watch::Receiver<StatusMap>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last: StatusMap = HashMap::new();
        let initial = sync_rx.borrow_and_update().clone();
        tracing::info!(state = %initial, "Sync state");
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                changed = sync_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = sync_rx.borrow_and_update().clone();
                    tracing::info!(state = %state, "Sync state changed");
                }
                changed = download_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let current = download_rx.borrow_and_update().clone();
                    for (id, status) in &current {
                        if last.get(id) != Some(status) {
                            match status {
                                DownloadStatus::Failed => {
                                    tracing::warn!(bookmark_id = %id, status = status.as_str(), "Download status")
                                }
                                _ => tracing::debug!(bookmark_id = %id, status = status.as_str(), "Download status"),
                            }
                        }
                    }
                    last = current;
                }
            }
        }
    })
}

fn spawn_evictor(
    scheduler: Arc<DownloadScheduler>,
    config: &Config,
    token: CancellationToken,
) -> JoinHandle<()> {
    let policy = config.eviction;
    let every = config.evict_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = scheduler.evict(&policy, chrono::Utc::now()).await {
                tracing::warn!("Eviction sweep failed: {}", e);
            }
        }
    })
}

async fn run_daemon(config: Config) -> anyhow::Result<()> {
    let shutdown_token = shutdown::install_signal_handler()?;
    let api_url = config.require_api_url()?.to_string();

    tokio::fs::create_dir_all(&config.cache_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.cache_dir.display()))?;

    let client = build_client()?;
    let api = Arc::new(content_api(&config, client.clone())?);
    let store = Arc::new(FsContentStore::new(config.cache_dir.clone()));

    let watcher = Arc::new(JsonFileWatcher::new(
        config.bookmarks_file.clone(),
        config.watch_interval,
    ));
    let watcher_task = {
        let watcher = watcher.clone();
        let token = shutdown_token.clone();
        tokio::spawn(async move { watcher.run(token).await })
    };

    let probe_url = config.probe_url.clone().unwrap_or_else(|| api_url.clone());
    let monitor = Arc::new(ProbeMonitor::new(client, probe_url, config.probe_interval));
    let options = ConnectOptions {
        endpoint: Some(api_url),
        token: config.api_token.clone(),
        ..Default::default()
    };
    let mut sync = SyncCoordinator::new(Arc::new(LocalOnlyEngine::new()), monitor, options);

    let scheduler = Arc::new(DownloadScheduler::new(
        api,
        store,
        StatusBoard::new(),
        config.scheduler,
        shutdown_token.child_token(),
    ));

    tracing::info!(
        cache_dir = %config.cache_dir.display(),
        bookmarks_file = %config.bookmarks_file.display(),
        concurrency = config.scheduler.max_concurrency,
        "Starting bookmark-cache"
    );

    sync.startup();
    scheduler.start(watcher.subscribe());
    let logger = spawn_status_logger(
        sync.subscribe(),
        scheduler.statuses().subscribe(),
        shutdown_token.clone(),
    );
    let evictor = spawn_evictor(scheduler.clone(), &config, shutdown_token.clone());

    shutdown_token.cancelled().await;

    sync.cleanup(false).await;
    scheduler.shutdown().await;
    for (name, handle) in [
        ("bookmark watcher", watcher_task),
        ("status logger", logger),
        ("evictor", evictor),
    ] {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "{} ended abnormally", name);
        }
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn run_show(config: Config, bookmark_id: &str) -> anyhow::Result<()> {
    let client = build_client()?;
    let scheduler = DownloadScheduler::new(
        Arc::new(content_api(&config, client)?),
        Arc::new(FsContentStore::new(config.cache_dir.clone())),
        StatusBoard::new(),
        config.scheduler,
        CancellationToken::new(),
    );

    let bytes = scheduler
        .get_content(bookmark_id)
        .await
        .with_context(|| format!("Could not load content for {}", bookmark_id))?;

    let mut stdout = tokio::io::stdout();
    stdout.write_all(&bytes).await?;
    stdout.flush().await?;
    Ok(())
}

async fn run_prune(config: Config) -> anyhow::Result<()> {
    let store = FsContentStore::new(config.cache_dir.clone());
    let report = download::evict::evict(
        &store,
        &InFlightSet::new(),
        &config.eviction,
        chrono::Utc::now(),
    )
    .await?;

    println!("Cache: {}", config.cache_dir.display());
    println!("  Removed:   {}", report.removed);
    println!("  Freed:     {} bytes", report.freed_bytes);
    println!("  Remaining: {} bytes", report.remaining_bytes);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    let config = Config::from_cli(cli.command.common())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_filter())),
        )
        .with_writer(std::io::stderr)
        .init();
    tracing::debug!(?config, "Resolved configuration");

    match cli.command {
        Command::Run(_) => run_daemon(config).await,
        Command::Show { bookmark_id, .. } => run_show(config, &bookmark_id).await,
        Command::Prune(_) => run_prune(config).await,
    }
}
