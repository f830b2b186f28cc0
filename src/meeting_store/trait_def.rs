//! The record store capability consumed by discovery, the download queue's
//! processor, and the reconciler.

use anyhow::Result;

use super::models::{FileKind, FileRecord, MeetingCounts, MeetingRecord, MergeOutcome, SyncStatus};

/// Sync-state key holding the last incremental discovery time (epoch millis).
pub const STATE_LAST_DISCOVERY_AT: &str = "last_discovery_at";

/// Sync-state key holding the folder derivation scheme version.
pub const STATE_PATH_SCHEME_VERSION: &str = "path_scheme_version";

pub trait MeetingStore: Send + Sync {
    // ====== Meetings ======

    /// Get a meeting by its remote id.
    fn get_meeting(&self, id: &str) -> Result<Option<MeetingRecord>>;

    /// Insert or fully replace a meeting record.
    fn upsert_meeting(&self, record: &MeetingRecord) -> Result<()>;

    /// Merge a batch of freshly-fetched records inside one transaction.
    ///
    /// Per record: absent → insert; present with an overwritable status
    /// (not-synced, failed) → refresh metadata, leave status and last_error
    /// untouched; present and syncing/synced → skip entirely.
    fn merge_meetings(&self, records: &[MeetingRecord]) -> Result<MergeOutcome>;

    /// List every meeting, newest first.
    fn list_meetings(&self) -> Result<Vec<MeetingRecord>>;

    /// List meetings with the given status, newest first.
    fn list_meetings_by_status(&self, status: SyncStatus) -> Result<Vec<MeetingRecord>>;

    /// Update a meeting's status and last error.
    fn set_meeting_status(&self, id: &str, status: SyncStatus, error: Option<&str>) -> Result<()>;

    /// Per-status counts for status reporting.
    fn meeting_counts(&self) -> Result<MeetingCounts>;

    // ====== Files ======

    /// Get the file record for one (meeting, kind) pair.
    fn get_file(&self, meeting_id: &str, kind: FileKind) -> Result<Option<FileRecord>>;

    /// Insert or replace the file record for its (meeting, kind) pair.
    fn upsert_file(&self, record: &FileRecord) -> Result<()>;

    /// List all file records of a meeting.
    fn list_files(&self, meeting_id: &str) -> Result<Vec<FileRecord>>;

    // ====== Sync state ======

    /// Read one sync-state value.
    fn get_sync_state(&self, key: &str) -> Result<Option<String>>;

    /// Write one sync-state value.
    fn set_sync_state(&self, key: &str, value: &str) -> Result<()>;
}
