//! Canonical on-disk layout for meeting artifacts.
//!
//! Every artifact path is derived from the meeting record alone, so the
//! reconciler can rebuild the expected tree without consulting the remote.
//! Bump `PATH_SCHEME_VERSION` when the derivation changes; the reconciler
//! warns when a vault was laid out under a different scheme.

use std::path::PathBuf;

use chrono::{DateTime, TimeZone, Utc};

use crate::meeting_store::{FileKind, MeetingRecord};

pub const PATH_SCHEME_VERSION: u32 = 1;

const FALLBACK_NAME: &str = "untitled";
const MAX_TITLE_LEN: usize = 80;

/// Folder-safe form of a meeting title. Keeps alphanumerics, spaces, `-`
/// and `_`; drops everything else; whitespace runs become single dashes.
pub fn sanitize_title(title: &str) -> String {
    let kept: String = title
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '-' || *c == '_')
        .collect();

    let mut out = String::with_capacity(kept.len());
    let mut pending_gap = false;
    for c in kept.trim().chars() {
        if c.is_whitespace() {
            pending_gap = true;
            continue;
        }
        if pending_gap && !out.is_empty() {
            out.push('-');
        }
        pending_gap = false;
        out.push(c);
        if out.chars().count() >= MAX_TITLE_LEN {
            break;
        }
    }

    let trimmed = out.trim_matches(|c| c == '-' || c == '_');
    if trimmed.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Meeting folder relative to the storage root:
/// `{year}/{month}/{date}_{sanitized title}`.
pub fn meeting_folder(meeting: &MeetingRecord) -> PathBuf {
    let when = start_datetime(meeting.started_at_ms);
    let day = when.format("%Y-%m-%d");
    PathBuf::from(when.format("%Y").to_string())
        .join(when.format("%m").to_string())
        .join(format!("{}_{}", day, sanitize_title(&meeting.title)))
}

/// Relative path of one artifact inside the meeting folder.
pub fn artifact_path(meeting: &MeetingRecord, kind: FileKind) -> PathBuf {
    meeting_folder(meeting).join(kind.filename())
}

fn start_datetime(started_at_ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(started_at_ms)
        .single()
        .unwrap_or_else(|| Utc.timestamp_millis_opt(0).unwrap())
}
