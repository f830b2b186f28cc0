//! Directory reconciler.
//!
//! Scans local storage and corrects the record store to match what is
//! actually on disk. Files that appeared outside the queue (manual copy,
//! crash recovery) get records; records whose files vanished are
//! downgraded; meeting statuses are recomputed from file presence.

pub mod paths;

pub use paths::{artifact_path, meeting_folder, sanitize_title, PATH_SCHEME_VERSION};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::meeting_store::{
    FileKind, FileRecord, FileStatus, MeetingRecord, MeetingStore, SyncStatus,
    STATE_PATH_SCHEME_VERSION,
};
use crate::storage::MeetingStorage;

/// Outcome of one reconcile scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Meetings inspected.
    pub meetings_scanned: usize,
    /// On-disk files that had no record and got one inserted.
    pub files_discovered: usize,
    /// Existing file records updated to match disk.
    pub records_repaired: usize,
    /// Meeting statuses flipped (either direction).
    pub statuses_corrected: usize,
    /// Meetings skipped because their scan errored.
    pub errors_skipped: usize,
    pub scan_duration_ms: i64,
}

impl ReconcileReport {
    /// True when the scan found nothing to fix.
    pub fn is_clean(&self) -> bool {
        self.files_discovered == 0
            && self.records_repaired == 0
            && self.statuses_corrected == 0
            && self.errors_skipped == 0
    }
}

#[derive(Debug, Default)]
struct MeetingScan {
    files_present: usize,
    files_discovered: usize,
    records_repaired: usize,
    status_corrected: bool,
}

/// Reconciles the record store against the storage tree.
///
/// The scan:
/// 1. Derives each meeting's expected folder from its record alone
/// 2. Probes the four canonical filenames inside that folder
/// 3. Inserts records for files that exist without one, downgrades
///    records whose files are gone
/// 4. Recomputes the meeting status from file presence
///
/// Storage is never written to; the scan only reads file existence.
pub struct Reconciler {
    store: Arc<dyn MeetingStore>,
    storage: Arc<MeetingStorage>,
    scan_running: AtomicBool,
}

struct ScanGuard<'a>(&'a AtomicBool);

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Reconciler {
    pub fn new(store: Arc<dyn MeetingStore>, storage: Arc<MeetingStorage>) -> Self {
        Self {
            store,
            storage,
            scan_running: AtomicBool::new(false),
        }
    }

    /// Run a full scan over every meeting and repair drift.
    ///
    /// Single-flight: a second call while one is in progress returns
    /// [`SyncError::AlreadyRunning`] instead of scanning twice.
    pub fn scan(&self) -> Result<ReconcileReport, SyncError> {
        if self
            .scan_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SyncError::AlreadyRunning);
        }
        let _guard = ScanGuard(&self.scan_running);

        let start = Instant::now();
        info!("Starting reconcile scan of {:?}", self.storage.root());

        self.check_path_scheme();

        let meetings = self
            .store
            .list_meetings()
            .map_err(|e| SyncError::Storage(e.to_string()))?;

        let mut report = ReconcileReport {
            meetings_scanned: meetings.len(),
            ..ReconcileReport::default()
        };

        for meeting in &meetings {
            match self.scan_meeting(meeting) {
                Ok(outcome) => {
                    report.files_discovered += outcome.files_discovered;
                    report.records_repaired += outcome.records_repaired;
                    if outcome.status_corrected {
                        report.statuses_corrected += 1;
                    }
                }
                Err(e) => {
                    warn!("Skipping meeting {} during reconcile: {:#}", meeting.id, e);
                    report.errors_skipped += 1;
                }
            }
        }

        report.scan_duration_ms = start.elapsed().as_millis() as i64;

        info!(
            "Reconcile scan finished: {} meetings, {} files discovered, {} records repaired, {} statuses corrected, {} skipped in {}ms",
            report.meetings_scanned,
            report.files_discovered,
            report.records_repaired,
            report.statuses_corrected,
            report.errors_skipped,
            report.scan_duration_ms
        );

        Ok(report)
    }

    /// Probe one meeting's folder and repair its records.
    fn scan_meeting(&self, meeting: &MeetingRecord) -> Result<MeetingScan> {
        let mut outcome = MeetingScan::default();

        for kind in FileKind::ALL {
            let rel = paths::artifact_path(meeting, kind);
            let on_disk = self.storage.exists(&rel);
            if on_disk {
                outcome.files_present += 1;
            }

            let record = self.store.get_file(&meeting.id, kind)?;
            match (on_disk, record) {
                (true, None) => {
                    debug!(
                        "Discovered {} for meeting {} at {:?}, inserting record",
                        kind.label(),
                        meeting.id,
                        rel
                    );
                    let mut record =
                        FileRecord::new(meeting.id.clone(), kind, rel.to_string_lossy().to_string());
                    record.status = FileStatus::Downloaded;
                    record.downloaded_at = Some(chrono::Utc::now().timestamp());
                    self.store.upsert_file(&record)?;
                    outcome.files_discovered += 1;
                }
                (true, Some(mut record))
                    if matches!(record.status, FileStatus::NotDownloaded | FileStatus::Failed) =>
                {
                    debug!(
                        "File {:?} exists but record says {}, promoting to downloaded",
                        rel,
                        record.status.as_str()
                    );
                    record.status = FileStatus::Downloaded;
                    record.error_message = None;
                    record.downloaded_at = Some(chrono::Utc::now().timestamp());
                    self.store.upsert_file(&record)?;
                    outcome.records_repaired += 1;
                }
                (false, Some(mut record)) if record.status == FileStatus::Downloaded => {
                    debug!(
                        "Record for {} of meeting {} says downloaded but {:?} is missing, downgrading",
                        kind.label(),
                        meeting.id,
                        rel
                    );
                    record.status = FileStatus::NotDownloaded;
                    record.size_bytes = None;
                    record.downloaded_at = None;
                    self.store.upsert_file(&record)?;
                    outcome.records_repaired += 1;
                }
                // Downloading records belong to an in-flight job, leave them alone.
                _ => {}
            }
        }

        outcome.status_corrected = self.recompute_status(meeting, outcome.files_present)?;
        Ok(outcome)
    }

    /// Recompute a meeting's status from file presence. Returns true when
    /// the status changed.
    fn recompute_status(&self, meeting: &MeetingRecord, files_present: usize) -> Result<bool> {
        let complete = files_present == FileKind::ALL.len();

        if complete && meeting.status != SyncStatus::Synced {
            debug!(
                "All files present for meeting {}, marking synced (was {})",
                meeting.id,
                meeting.status.as_str()
            );
            self.store
                .set_meeting_status(&meeting.id, SyncStatus::Synced, None)?;
            return Ok(true);
        }

        if !complete && meeting.status == SyncStatus::Synced {
            debug!(
                "Meeting {} was synced but only {}/{} files present, marking not synced",
                meeting.id,
                files_present,
                FileKind::ALL.len()
            );
            self.store
                .set_meeting_status(&meeting.id, SyncStatus::NotSynced, None)?;
            return Ok(true);
        }

        Ok(false)
    }

    /// Warn when the vault was laid out under a different path scheme.
    /// The current version is recorded on the first scan of a fresh vault.
    fn check_path_scheme(&self) {
        match self.store.get_sync_state(STATE_PATH_SCHEME_VERSION) {
            Ok(Some(recorded)) => {
                if recorded != PATH_SCHEME_VERSION.to_string() {
                    warn!(
                        "Vault was laid out with path scheme v{}, current is v{}; \
                         folders derived under the old scheme will not be probed",
                        recorded, PATH_SCHEME_VERSION
                    );
                }
            }
            Ok(None) => {
                if let Err(e) = self
                    .store
                    .set_sync_state(STATE_PATH_SCHEME_VERSION, &PATH_SCHEME_VERSION.to_string())
                {
                    warn!("Failed to record path scheme version: {:#}", e);
                }
            }
            Err(e) => {
                warn!("Failed to read path scheme version: {:#}", e);
            }
        }
    }
}
