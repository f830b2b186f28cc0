//! Download queue job and event models.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::meeting_store::{FileKind, MeetingRecord};

/// Identity of a job: one artifact of one meeting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub meeting_id: String,
    pub kind: FileKind,
}

impl JobKey {
    pub fn new(meeting_id: impl Into<String>, kind: FileKind) -> Self {
        Self {
            meeting_id: meeting_id.into(),
            kind,
        }
    }
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.meeting_id, self.kind.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Downloading,
    Paused,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Downloading => "DOWNLOADING",
            JobStatus::Paused => "PAUSED",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    /// Completed and failed jobs never run again without explicit action.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub key: JobKey,
    pub meeting_title: String,
    pub status: JobStatus,
    /// 0..=100.
    pub progress: u8,
    pub retry_count: u32,
    /// Human label for what the job is doing, set while it runs.
    pub current_operation: Option<String>,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

impl DownloadJob {
    pub fn new(meeting: &MeetingRecord, kind: FileKind) -> Self {
        Self {
            key: JobKey::new(meeting.id.clone(), kind),
            meeting_title: meeting.title.clone(),
            status: JobStatus::Pending,
            progress: 0,
            retry_count: 0,
            current_operation: None,
            error_message: None,
            created_at: chrono::Utc::now().timestamp(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// Aggregate view of the queue, attached to every event.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueProgress {
    pub total: usize,
    pub pending: usize,
    pub downloading: usize,
    pub paused: usize,
    pub completed: usize,
    pub failed: usize,
    /// Mean per-job progress; an empty queue reads as 0.
    pub overall_pct: f64,
}

impl QueueProgress {
    pub fn from_jobs(jobs: &[DownloadJob]) -> Self {
        let mut progress = QueueProgress {
            total: jobs.len(),
            ..Default::default()
        };
        if jobs.is_empty() {
            return progress;
        }

        let mut pct_sum: u64 = 0;
        for job in jobs {
            match job.status {
                JobStatus::Pending => progress.pending += 1,
                JobStatus::Downloading => progress.downloading += 1,
                JobStatus::Paused => progress.paused += 1,
                JobStatus::Completed => progress.completed += 1,
                JobStatus::Failed => progress.failed += 1,
            }
            // A paused job keeps credit for what it got through; pending
            // and failed jobs count nothing until they run again.
            pct_sum += match job.status {
                JobStatus::Completed => 100,
                JobStatus::Downloading | JobStatus::Paused => job.progress.min(100) as u64,
                JobStatus::Pending | JobStatus::Failed => 0,
            };
        }
        progress.overall_pct = pct_sum as f64 / jobs.len() as f64;
        progress
    }
}

/// What a processor hands back for a finished job.
#[derive(Debug, Clone)]
pub struct JobOutput {
    pub rel_path: String,
    pub bytes: u64,
}

/// Broadcast on every observable queue transition.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    JobsAdded {
        added: usize,
        skipped: usize,
        progress: QueueProgress,
    },
    JobStarted {
        key: JobKey,
        progress: QueueProgress,
    },
    JobProgress {
        key: JobKey,
        pct: u8,
        progress: QueueProgress,
    },
    JobCompleted {
        key: JobKey,
        progress: QueueProgress,
    },
    JobFailed {
        key: JobKey,
        error: String,
        progress: QueueProgress,
    },
    Paused {
        progress: QueueProgress,
    },
    Resumed {
        progress: QueueProgress,
    },
    AllCancelled {
        removed: usize,
        progress: QueueProgress,
    },
    CompletedCleared {
        removed: usize,
        progress: QueueProgress,
    },
    RetryInitiated {
        retried: usize,
        progress: QueueProgress,
    },
    ConcurrencyChanged {
        max_concurrent: usize,
        progress: QueueProgress,
    },
    RateLimitChanged {
        job_spacing: Duration,
        progress: QueueProgress,
    },
}

impl QueueEvent {
    pub fn progress(&self) -> &QueueProgress {
        match self {
            QueueEvent::JobsAdded { progress, .. }
            | QueueEvent::JobStarted { progress, .. }
            | QueueEvent::JobProgress { progress, .. }
            | QueueEvent::JobCompleted { progress, .. }
            | QueueEvent::JobFailed { progress, .. }
            | QueueEvent::Paused { progress }
            | QueueEvent::Resumed { progress }
            | QueueEvent::AllCancelled { progress, .. }
            | QueueEvent::CompletedCleared { progress, .. }
            | QueueEvent::RetryInitiated { progress, .. }
            | QueueEvent::ConcurrencyChanged { progress, .. }
            | QueueEvent::RateLimitChanged { progress, .. } => progress,
        }
    }
}
