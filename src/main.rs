use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use meetvault::config::{AppConfig, CliConfig, FileConfig, DEFAULT_API_URL};
use meetvault::download_queue::QueueEvent;
use meetvault::meeting_store::{
    MeetingStore, SqliteMeetingStore, SyncStatus, STATE_LAST_DISCOVERY_AT,
};
use meetvault::reconciler::Reconciler;
use meetvault::storage::MeetingStorage;
use meetvault::sync::SyncManager;

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(format!("Error resolving path '{}': {}", s, msg));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
#[command(name = "meetvault", about = "Mirror a remote meeting catalog to local storage")]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory holding the meetings database. Created if missing.
    /// Can also be specified in config file.
    #[clap(long, value_parser = parse_path)]
    pub data_dir: Option<PathBuf>,

    /// Root directory for downloaded meeting artifacts. Defaults to <data-dir>/vault.
    #[clap(long, value_parser = parse_path)]
    pub storage_root: Option<PathBuf>,

    /// Base URL of the meeting provider's GraphQL API.
    #[clap(long, default_value = DEFAULT_API_URL)]
    pub api_url: String,

    /// API key for the meeting provider. Prefer the MEETVAULT_API_KEY
    /// environment variable over this flag.
    #[clap(long)]
    pub api_key: Option<String>,

    /// Maximum number of simultaneous downloads.
    #[clap(long, default_value_t = 3)]
    pub max_concurrent: u32,

    /// Request budget against the remote API.
    #[clap(long, default_value_t = 30)]
    pub requests_per_minute: u32,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Verify the API credential and remote connectivity.
    Check,

    /// Fetch the configured catalog window and merge it into the local database.
    Discover,

    /// Download every missing artifact, then exit.
    Sync,

    /// Repair database records against what actually exists on disk.
    Reconcile,

    /// Show meeting counts and sync state.
    Status,

    /// Run continuously: periodic incremental discovery, downloads and
    /// reconcile scans until Ctrl+C.
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    let file_config = match &cli_args.config {
        Some(path) => Some(FileConfig::load(path)?),
        None => None,
    };
    let cli_config = CliConfig {
        data_dir: cli_args.data_dir.clone(),
        storage_root: cli_args.storage_root.clone(),
        api_url: cli_args.api_url.clone(),
        api_key: cli_args.api_key.clone(),
        max_concurrent: cli_args.max_concurrent,
        requests_per_minute: cli_args.requests_per_minute,
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;

    match cli_args.command {
        Command::Check => run_check(&config).await,
        Command::Discover => run_discover(&config).await,
        Command::Sync => run_sync(&config).await,
        Command::Reconcile => run_reconcile(&config),
        Command::Status => run_status(&config),
        Command::Run => run_daemon(&config).await,
    }
}

async fn run_check(config: &AppConfig) -> Result<()> {
    let manager = SyncManager::from_config(config)?;
    let shutdown = CancellationToken::new();
    manager.start(&shutdown);

    let probe = manager.check_connection().await;
    let limiter = manager.limiter_status();
    shutdown.cancel();

    if !probe.ok {
        anyhow::bail!("Connection check failed: {}", probe.detail);
    }
    println!("Connection OK: {}", probe.detail);
    println!(
        "Rate limiter: {:.0} requests available, {} waiting",
        limiter.available_tokens, limiter.queued
    );
    Ok(())
}

async fn run_discover(config: &AppConfig) -> Result<()> {
    let manager = SyncManager::from_config(config)?;
    let shutdown = CancellationToken::new();
    manager.start(&shutdown);

    let report = manager.discover().await?;
    shutdown.cancel();

    println!(
        "Discovery finished in {:.1}s: {} fetched, {} in window, {} new, {} updated, {} unchanged",
        report.elapsed.as_secs_f64(),
        report.fetched,
        report.in_window,
        report.inserted,
        report.updated,
        report.skipped
    );
    print_counts(manager.store().as_ref())?;
    Ok(())
}

async fn run_sync(config: &AppConfig) -> Result<()> {
    let manager = SyncManager::from_config(config)?;
    let shutdown = CancellationToken::new();
    manager.recover_interrupted()?;
    manager.start(&shutdown);

    // Pick up anything published since the last run before queueing.
    if let Err(e) = manager.check_for_new_meetings().await {
        warn!("Discovery before sync failed: {:#}", e);
    }

    let (queued, skipped) = manager.enqueue_pending()?;
    if queued == 0 {
        shutdown.cancel();
        println!("Nothing to download.");
        return Ok(());
    }
    info!("Queued {} download jobs ({} already queued)", queued, skipped);

    let mut events = manager.subscribe();
    let reporter = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(QueueEvent::JobCompleted { key, progress }) => {
                    info!(
                        "Downloaded {} ({}/{} done)",
                        key, progress.completed, progress.total
                    );
                }
                Ok(QueueEvent::JobFailed { key, error, .. }) => {
                    warn!("Download {} failed: {}", key, error);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    tokio::select! {
        _ = manager.wait_queue_idle() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
    }
    shutdown.cancel();
    reporter.abort();
    // Give in-flight jobs a moment to observe the cancel
    tokio::time::sleep(Duration::from_millis(100)).await;

    let progress = manager.queue_progress();
    println!(
        "Sync finished: {} downloaded, {} failed",
        progress.completed, progress.failed
    );
    print_counts(manager.store().as_ref())?;
    Ok(())
}

fn run_reconcile(config: &AppConfig) -> Result<()> {
    let store: Arc<dyn MeetingStore> =
        Arc::new(SqliteMeetingStore::new(config.meetings_db_path())?);
    let storage = Arc::new(MeetingStorage::new(&config.storage_root)?);
    let reconciler = Reconciler::new(Arc::clone(&store), storage);

    let report = reconciler.scan()?;
    println!(
        "Reconcile finished in {}ms: {} meetings scanned, {} files discovered, {} records repaired, {} statuses corrected, {} meetings skipped on error",
        report.scan_duration_ms,
        report.meetings_scanned,
        report.files_discovered,
        report.records_repaired,
        report.statuses_corrected,
        report.errors_skipped
    );
    if report.is_clean() {
        println!("Vault is consistent with the database.");
    }
    print_counts(store.as_ref())?;
    Ok(())
}

fn run_status(config: &AppConfig) -> Result<()> {
    let store = SqliteMeetingStore::new(config.meetings_db_path())?;

    println!("Database: {:?}", config.meetings_db_path());
    println!("Storage root: {:?}", config.storage_root);
    if let Some(raw) = store.get_sync_state(STATE_LAST_DISCOVERY_AT)? {
        if let Some(at) = raw
            .parse::<i64>()
            .ok()
            .and_then(chrono::DateTime::from_timestamp_millis)
        {
            println!("Last discovery: {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
        }
    }
    print_counts(&store)?;

    let failed = store.list_meetings_by_status(SyncStatus::Failed)?;
    for meeting in failed.iter().take(10) {
        println!(
            "  failed: {} \"{}\": {}",
            meeting.id,
            meeting.title,
            meeting.last_error.as_deref().unwrap_or("unknown error")
        );
    }
    if failed.len() > 10 {
        println!("  ... and {} more", failed.len() - 10);
    }
    Ok(())
}

async fn run_daemon(config: &AppConfig) -> Result<()> {
    let manager = Arc::new(SyncManager::from_config(config)?);
    let shutdown = CancellationToken::new();
    manager.recover_interrupted()?;
    manager.start(&shutdown);

    // Prime the catalog and the queue before settling into the periodic loop.
    match manager.discover().await {
        Ok(report) => info!(
            "Initial discovery: {} meetings in window ({} new)",
            report.in_window, report.inserted
        ),
        Err(e) => warn!("Initial discovery failed: {:#}", e),
    }
    match manager.reconcile() {
        Ok(report) if !report.is_clean() => info!(
            "Initial reconcile repaired {} records",
            report.files_discovered + report.records_repaired
        ),
        Ok(_) => {}
        Err(e) => warn!("Initial reconcile failed: {}", e),
    }
    match manager.enqueue_pending() {
        Ok((queued, _)) if queued > 0 => info!("Queued {} download jobs", queued),
        Ok(_) => info!("Nothing pending"),
        Err(e) => warn!("Failed to queue pending downloads: {:#}", e),
    }

    tokio::select! {
        _ = manager.run_daemon(shutdown.child_token()) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating graceful shutdown");
            shutdown.cancel();
            // Give in-flight jobs a moment to observe the cancel
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
    Ok(())
}

fn print_counts(store: &dyn MeetingStore) -> Result<()> {
    let counts = store.meeting_counts()?;
    println!(
        "Meetings: {} total, {} synced, {} syncing, {} not synced, {} failed",
        counts.total(),
        counts.synced,
        counts.syncing,
        counts.not_synced,
        counts.failed
    );
    Ok(())
}
