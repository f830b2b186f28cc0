//! Wiring of the sync pipeline: discovery, queue, limiter, reconciler.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{AppConfig, SyncSettings};
use crate::discovery::{DiscoveryConfig, DiscoveryDelta, DiscoveryEngine, DiscoveryReport};
use crate::download_queue::{DownloadQueue, QueueConfig, QueueEvent, QueueProgress};
use crate::error::SyncError;
use crate::meeting_store::{
    FileKind, FileStatus, MeetingStore, SqliteMeetingStore, SyncStatus,
};
use crate::reconciler::{ReconcileReport, Reconciler};
use crate::remote::{
    ApiClient, ApiClientConfig, ConnectionProbe, RateLimiter, RateLimiterConfig,
    RateLimiterStatus, RemoteApi, RetryPolicy,
};
use crate::storage::MeetingStorage;
use crate::sync::MeetingFileProcessor;

/// Owns every moving part of the pipeline and exposes the operations the
/// CLI runs. Background tasks are only spawned by [`SyncManager::start`];
/// until then the manager is inert and offline-safe.
pub struct SyncManager {
    api: Arc<dyn RemoteApi>,
    store: Arc<dyn MeetingStore>,
    limiter: Arc<RateLimiter>,
    queue: Arc<DownloadQueue>,
    discovery: DiscoveryEngine,
    reconciler: Reconciler,
    discovery_interval: Duration,
    reconcile_interval: Duration,
}

impl SyncManager {
    pub fn new(
        api: Arc<dyn RemoteApi>,
        store: Arc<dyn MeetingStore>,
        storage: Arc<MeetingStorage>,
        limiter: Arc<RateLimiter>,
        settings: &SyncSettings,
    ) -> Self {
        let processor = Arc::new(MeetingFileProcessor::new(
            Arc::clone(&api),
            Arc::clone(&store),
            Arc::clone(&storage),
        ));
        let queue = DownloadQueue::new(
            QueueConfig {
                max_concurrent: settings.max_concurrent as usize,
                job_spacing: Duration::from_millis(settings.job_spacing_ms),
                max_job_retries: settings.max_retries,
                ..QueueConfig::default()
            },
            processor,
        );
        let discovery = DiscoveryEngine::new(
            Arc::clone(&api),
            Arc::clone(&store),
            DiscoveryConfig {
                window_years: settings.discovery_window_years,
                page_size: settings.page_size,
                ..DiscoveryConfig::default()
            },
        );
        let reconciler = Reconciler::new(Arc::clone(&store), storage);

        Self {
            api,
            store,
            limiter,
            queue,
            discovery,
            reconciler,
            discovery_interval: Duration::from_secs(settings.discovery_interval_mins * 60),
            reconcile_interval: Duration::from_secs(settings.reconcile_interval_mins * 60),
        }
    }

    /// Build the full production pipeline from resolved configuration.
    /// Fails without an API key; offline commands should not come through
    /// here.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let api_key = config.require_api_key()?.to_string();
        let store: Arc<dyn MeetingStore> =
            Arc::new(SqliteMeetingStore::new(config.meetings_db_path())?);
        let storage = Arc::new(MeetingStorage::new(&config.storage_root)?);
        let limiter = Arc::new(RateLimiter::new(RateLimiterConfig::per_minute(
            config.sync.requests_per_minute,
        )));
        let api = ApiClient::new(
            ApiClientConfig {
                base_url: config.api_url.clone(),
                api_key,
                request_timeout: Duration::from_secs(config.sync.request_timeout_secs),
                download_timeout: Duration::from_secs(config.sync.download_timeout_secs),
                retry: RetryPolicy {
                    max_retries: config.sync.max_retries,
                    ..RetryPolicy::default()
                },
            },
            Arc::clone(&limiter),
        )?;

        Ok(Self::new(
            Arc::new(api),
            store,
            storage,
            limiter,
            &config.sync,
        ))
    }

    /// Spawn the limiter and queue drain tasks. Both stop when `shutdown`
    /// fires; the remote API is unreachable through the limiter until this
    /// runs.
    pub fn start(&self, shutdown: &CancellationToken) {
        tokio::spawn(Arc::clone(&self.limiter).run(shutdown.child_token()));
        tokio::spawn(Arc::clone(&self.queue).run(shutdown.child_token()));
    }

    pub fn store(&self) -> &Arc<dyn MeetingStore> {
        &self.store
    }

    pub async fn check_connection(&self) -> ConnectionProbe {
        self.api.test_connection().await
    }

    pub fn limiter_status(&self) -> RateLimiterStatus {
        self.limiter.status()
    }

    pub async fn discover(&self) -> Result<DiscoveryReport> {
        self.discovery.discover().await
    }

    pub async fn check_for_new_meetings(&self) -> Result<DiscoveryDelta> {
        self.discovery.check_for_new_meetings().await
    }

    pub fn reconcile(&self) -> Result<ReconcileReport, SyncError> {
        self.reconciler.scan()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.queue.subscribe()
    }

    pub fn queue_progress(&self) -> QueueProgress {
        self.queue.progress()
    }

    /// Reset download state left behind by an interrupted process. Jobs
    /// never survive a restart, so a meeting still marked syncing at
    /// startup has no job behind it. Call before [`SyncManager::start`].
    pub fn recover_interrupted(&self) -> Result<usize> {
        let stuck = self.store.list_meetings_by_status(SyncStatus::Syncing)?;
        let mut reset = 0;
        for meeting in &stuck {
            let mut downloaded = 0;
            let mut failure: Option<String> = None;
            for mut file in self.store.list_files(&meeting.id)? {
                match file.status {
                    FileStatus::Downloading => {
                        file.status = FileStatus::NotDownloaded;
                        file.size_bytes = None;
                        file.downloaded_at = None;
                        self.store.upsert_file(&file)?;
                        reset += 1;
                    }
                    FileStatus::Downloaded => downloaded += 1,
                    FileStatus::Failed => {
                        if failure.is_none() {
                            failure = file.error_message.clone();
                        }
                    }
                    FileStatus::NotDownloaded => {}
                }
            }
            let status = if downloaded == FileKind::ALL.len() {
                SyncStatus::Synced
            } else if failure.is_some() {
                SyncStatus::Failed
            } else {
                SyncStatus::NotSynced
            };
            self.store
                .set_meeting_status(&meeting.id, status, failure.as_deref())?;
        }
        if reset > 0 {
            info!("Reset {} interrupted downloads from a previous run", reset);
        }
        Ok(reset)
    }

    /// Queue download jobs for every artifact still missing from meetings
    /// that are not fully synced. Returns (queued, already queued).
    pub fn enqueue_pending(&self) -> Result<(usize, usize)> {
        let mut meetings = self.store.list_meetings_by_status(SyncStatus::NotSynced)?;
        meetings.extend(self.store.list_meetings_by_status(SyncStatus::Failed)?);

        let mut queued = 0;
        let mut skipped = 0;
        for meeting in &meetings {
            let downloaded: HashSet<FileKind> = self
                .store
                .list_files(&meeting.id)?
                .into_iter()
                .filter(|f| f.status == FileStatus::Downloaded)
                .map(|f| f.kind)
                .collect();
            let kinds: Vec<FileKind> = FileKind::ALL
                .into_iter()
                .filter(|kind| !downloaded.contains(kind))
                // No audio url means no audio job, ever.
                .filter(|kind| *kind != FileKind::Audio || meeting.audio_url.is_some())
                .collect();
            if kinds.is_empty() {
                continue;
            }
            let (added, dup) = self.queue.add_jobs(std::slice::from_ref(meeting), &kinds);
            queued += added;
            skipped += dup;
        }
        Ok((queued, skipped))
    }

    /// Block until the queue has nothing pending or in flight.
    pub async fn wait_queue_idle(&self) {
        let mut events = self.queue.subscribe();
        loop {
            if self.queue.is_idle() {
                return;
            }
            tokio::select! {
                _ = events.recv() => {}
                _ = tokio::time::sleep(Duration::from_millis(200)) => {}
            }
        }
    }

    /// Periodic loop: incremental discovery feeds the queue, and the
    /// reconciler sweeps the vault. Returns when `shutdown` fires.
    pub async fn run_daemon(&self, shutdown: CancellationToken) {
        let mut discovery_tick = tokio::time::interval(self.discovery_interval);
        let mut reconcile_tick = tokio::time::interval(self.reconcile_interval);
        // The first tick of an interval completes immediately.
        discovery_tick.tick().await;
        reconcile_tick.tick().await;

        info!(
            "Sync daemon running (discovery every {}s, reconcile every {}s)",
            self.discovery_interval.as_secs(),
            self.reconcile_interval.as_secs()
        );

        loop {
            tokio::select! {
                _ = discovery_tick.tick() => {
                    if let Err(e) = self.check_for_new_meetings().await {
                        warn!("Periodic discovery failed: {:#}", e);
                    }
                    // Durable state lives in the store; completed entries are
                    // only history and would block re-adds forever.
                    self.queue.clear_completed();
                    self.queue.retry_failed();
                    match self.enqueue_pending() {
                        Ok((queued, _)) if queued > 0 => {
                            info!("Queued {} download jobs", queued);
                        }
                        Ok(_) => {}
                        Err(e) => warn!("Failed to queue pending downloads: {:#}", e),
                    }
                }
                _ = reconcile_tick.tick() => {
                    match self.reconcile() {
                        Ok(_) => {}
                        Err(SyncError::AlreadyRunning) => {
                            debug!("Reconcile tick skipped, scan still running");
                        }
                        Err(e) => warn!("Periodic reconcile failed: {}", e),
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }
        info!("Sync daemon stopped");
    }
}
