//! Data models for the meeting record store.
//!
//! Defines meeting records, per-file records, statuses, and the aggregate
//! types returned by store queries.

use serde::{Deserialize, Serialize};

/// Synchronization status of a meeting record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    NotSynced,
    Syncing,
    Synced,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::NotSynced => "NOT_SYNCED",
            SyncStatus::Syncing => "SYNCING",
            SyncStatus::Synced => "SYNCED",
            SyncStatus::Failed => "FAILED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "NOT_SYNCED" => Some(SyncStatus::NotSynced),
            "SYNCING" => Some(SyncStatus::Syncing),
            "SYNCED" => Some(SyncStatus::Synced),
            "FAILED" => Some(SyncStatus::Failed),
            _ => None,
        }
    }

    /// Parse a database value, falling back to NotSynced for unknown strings.
    pub fn from_db_str(s: &str) -> Self {
        Self::from_str(s).unwrap_or_else(|| {
            tracing::warn!("Unknown sync status {:?} in database, treating as NOT_SYNCED", s);
            SyncStatus::NotSynced
        })
    }

    /// Whether a discovery merge may overwrite this record's metadata.
    /// Records that are mid-flight or already reconciled are off limits.
    pub fn merge_overwritable(&self) -> bool {
        matches!(self, SyncStatus::NotSynced | SyncStatus::Failed)
    }
}

/// The four artifacts a meeting can have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileKind {
    Audio,
    TranscriptJson,
    TranscriptDoc,
    Summary,
}

impl FileKind {
    pub const ALL: [FileKind; 4] = [
        FileKind::Audio,
        FileKind::TranscriptJson,
        FileKind::TranscriptDoc,
        FileKind::Summary,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Audio => "AUDIO",
            FileKind::TranscriptJson => "TRANSCRIPT_JSON",
            FileKind::TranscriptDoc => "TRANSCRIPT_DOC",
            FileKind::Summary => "SUMMARY",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "AUDIO" => Some(FileKind::Audio),
            "TRANSCRIPT_JSON" => Some(FileKind::TranscriptJson),
            "TRANSCRIPT_DOC" => Some(FileKind::TranscriptDoc),
            "SUMMARY" => Some(FileKind::Summary),
            _ => None,
        }
    }

    /// Canonical filename inside a meeting's folder.
    pub fn filename(&self) -> &'static str {
        match self {
            FileKind::Audio => "audio.mp3",
            FileKind::TranscriptJson => "transcript.json",
            FileKind::TranscriptDoc => "transcript.md",
            FileKind::Summary => "summary.md",
        }
    }

    /// Human-readable label for logs and progress lines.
    pub fn label(&self) -> &'static str {
        match self {
            FileKind::Audio => "audio",
            FileKind::TranscriptJson => "structured transcript",
            FileKind::TranscriptDoc => "transcript document",
            FileKind::Summary => "summary",
        }
    }
}

/// Download status of a single meeting artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileStatus {
    NotDownloaded,
    Downloading,
    Downloaded,
    Failed,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::NotDownloaded => "NOT_DOWNLOADED",
            FileStatus::Downloading => "DOWNLOADING",
            FileStatus::Downloaded => "DOWNLOADED",
            FileStatus::Failed => "FAILED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "NOT_DOWNLOADED" => Some(FileStatus::NotDownloaded),
            "DOWNLOADING" => Some(FileStatus::Downloading),
            "DOWNLOADED" => Some(FileStatus::Downloaded),
            "FAILED" => Some(FileStatus::Failed),
            _ => None,
        }
    }

    pub fn from_db_str(s: &str) -> Self {
        Self::from_str(s).unwrap_or_else(|| {
            tracing::warn!("Unknown file status {:?} in database, treating as NOT_DOWNLOADED", s);
            FileStatus::NotDownloaded
        })
    }
}

/// Metadata entry for one remote meeting.
///
/// Timestamps: `started_at_ms` is epoch milliseconds as reported by the
/// remote; `created_at`/`updated_at` are local epoch seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeetingRecord {
    pub id: String,
    pub title: String,
    pub started_at_ms: i64,
    /// Duration in seconds. Zero when the remote did not report one.
    pub duration_secs: i64,
    pub organizer: Option<String>,
    pub participants: Vec<String>,
    pub transcript_url: Option<String>,
    pub audio_url: Option<String>,
    pub status: SyncStatus,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl MeetingRecord {
    /// Create a new record in the not-synced state.
    pub fn new(id: String, title: String, started_at_ms: i64) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id,
            title,
            started_at_ms,
            duration_secs: 0,
            organizer: None,
            participants: Vec::new(),
            transcript_url: None,
            audio_url: None,
            status: SyncStatus::NotSynced,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_duration(mut self, duration_secs: i64) -> Self {
        self.duration_secs = duration_secs;
        self
    }

    pub fn with_organizer(mut self, organizer: Option<String>) -> Self {
        self.organizer = organizer;
        self
    }

    pub fn with_participants(mut self, participants: Vec<String>) -> Self {
        self.participants = participants;
        self
    }

    pub fn with_urls(mut self, transcript_url: Option<String>, audio_url: Option<String>) -> Self {
        self.transcript_url = transcript_url;
        self.audio_url = audio_url;
        self
    }

    pub fn with_status(mut self, status: SyncStatus) -> Self {
        self.status = status;
        self
    }
}

/// Status record for one (meeting, file kind) artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub meeting_id: String,
    pub kind: FileKind,
    /// Always relative to the configured storage root.
    pub rel_path: String,
    pub size_bytes: Option<i64>,
    pub status: FileStatus,
    pub error_message: Option<String>,
    pub downloaded_at: Option<i64>,
}

impl FileRecord {
    pub fn new(meeting_id: String, kind: FileKind, rel_path: String) -> Self {
        Self {
            meeting_id,
            kind,
            rel_path,
            size_bytes: None,
            status: FileStatus::NotDownloaded,
            error_message: None,
            downloaded_at: None,
        }
    }
}

/// Outcome of one transactional discovery merge batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
}

impl MergeOutcome {
    pub fn absorb(&mut self, other: MergeOutcome) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.skipped += other.skipped;
    }
}

/// Per-status meeting counts for status reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MeetingCounts {
    pub not_synced: usize,
    pub syncing: usize,
    pub synced: usize,
    pub failed: usize,
}

impl MeetingCounts {
    pub fn total(&self) -> usize {
        self.not_synced + self.syncing + self.synced + self.failed
    }
}
