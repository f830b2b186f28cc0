//! A fully wired sync pipeline on a temporary directory.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use meetvault::config::SyncSettings;
use meetvault::meeting_store::SqliteMeetingStore;
use meetvault::remote::{RateLimiter, RateLimiterConfig};
use meetvault::storage::MeetingStorage;
use meetvault::sync::SyncManager;

use super::remote::ScriptedRemote;
use meetvault::remote::RemoteMeeting;

pub struct TestVault {
    _tmp: TempDir,
    pub store: Arc<SqliteMeetingStore>,
    pub storage: Arc<MeetingStorage>,
    pub remote: Arc<ScriptedRemote>,
    pub manager: SyncManager,
    pub shutdown: CancellationToken,
}

impl TestVault {
    /// Wire a full pipeline against a scripted catalog and start the drain
    /// tasks. The discovery window is widened so fixtures with fixed dates
    /// stay inside it.
    pub fn spawn(catalog: Vec<RemoteMeeting>) -> Self {
        Self::spawn_with_settings(catalog, Self::settings())
    }

    pub fn spawn_with_settings(catalog: Vec<RemoteMeeting>, settings: SyncSettings) -> Self {
        Self::wire(
            TempDir::new().unwrap(),
            Arc::new(ScriptedRemote::new(catalog)),
            settings,
        )
    }

    pub fn settings() -> SyncSettings {
        SyncSettings {
            job_spacing_ms: 0,
            requests_per_minute: 6000,
            discovery_window_years: 10,
            ..SyncSettings::default()
        }
    }

    /// Tear the pipeline down and bring it back up on the same directories,
    /// like a process restart. The database and vault contents survive; the
    /// queue does not.
    pub fn restart(self) -> Self {
        self.shutdown.cancel();
        let TestVault { _tmp, remote, .. } = self;
        Self::wire(_tmp, remote, Self::settings())
    }

    fn wire(tmp: TempDir, remote: Arc<ScriptedRemote>, settings: SyncSettings) -> Self {
        let data_dir = tmp.path().join("data");
        std::fs::create_dir_all(&data_dir).unwrap();
        let store = Arc::new(SqliteMeetingStore::new(data_dir.join("meetings.db")).unwrap());
        let storage = Arc::new(MeetingStorage::new(tmp.path().join("vault")).unwrap());
        let limiter = Arc::new(RateLimiter::new(RateLimiterConfig::per_minute(
            settings.requests_per_minute,
        )));
        let manager = SyncManager::new(
            remote.clone(),
            store.clone(),
            storage.clone(),
            limiter,
            &settings,
        );
        let shutdown = CancellationToken::new();
        manager.start(&shutdown);

        Self {
            _tmp: tmp,
            store,
            storage,
            remote,
            manager,
            shutdown,
        }
    }

    /// Wait for the queue to finish everything it has. Panics if it takes
    /// longer than a scripted run plausibly can.
    pub async fn drain(&self) {
        tokio::time::timeout(Duration::from_secs(30), self.manager.wait_queue_idle())
            .await
            .expect("queue did not drain in time");
    }
}
