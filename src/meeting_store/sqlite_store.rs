//! SQLite-backed meeting record store.

use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

use super::models::{FileKind, FileRecord, MeetingCounts, MeetingRecord, MergeOutcome, SyncStatus};
use super::schema::{BASE_DB_VERSION, MEETING_DB_SCHEMAS};
use super::trait_def::MeetingStore;
use crate::meeting_store::models::FileStatus;

pub struct SqliteMeetingStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMeetingStore {
    /// Open an existing meetings database or create a new one with the
    /// current schema.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = if db_path.as_ref().exists() {
            Connection::open_with_flags(
                &db_path,
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                    | rusqlite::OpenFlags::SQLITE_OPEN_URI
                    | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?
        } else {
            let conn = Connection::open(&db_path)?;
            MEETING_DB_SCHEMAS
                .last()
                .context("No schemas defined")?
                .create(&conn)?;
            info!("Created new meetings database at {:?}", db_path.as_ref());
            conn
        };

        conn.execute("PRAGMA foreign_keys = ON;", [])?;

        let db_version = conn
            .query_row("PRAGMA user_version;", [], |row| row.get::<usize, i64>(0))
            .context("Failed to read database version")?
            - BASE_DB_VERSION;

        if db_version < 0 {
            bail!(
                "Meetings database version marker {} is not one of ours (base {})",
                db_version + BASE_DB_VERSION,
                BASE_DB_VERSION
            );
        }
        let version = db_version as usize;

        if version >= MEETING_DB_SCHEMAS.len() {
            bail!(
                "Meetings database version {} is too new (max supported: {})",
                version,
                MEETING_DB_SCHEMAS.len() - 1
            );
        }

        MEETING_DB_SCHEMAS
            .get(version)
            .context("Failed to get schema")?
            .validate(&conn)?;

        Self::migrate_if_needed(&conn, version)?;

        Ok(SqliteMeetingStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store for testing.
    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON;", [])?;
        MEETING_DB_SCHEMAS
            .last()
            .context("No schemas defined")?
            .create(&conn)?;

        Ok(SqliteMeetingStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn migrate_if_needed(conn: &Connection, current_version: usize) -> Result<()> {
        let target_version = MEETING_DB_SCHEMAS.len() - 1;
        if current_version >= target_version {
            return Ok(());
        }

        info!(
            "Migrating meetings database from version {} to {}",
            current_version, target_version
        );
        for schema in MEETING_DB_SCHEMAS.iter().skip(current_version + 1) {
            if let Some(migration) = schema.migration {
                info!("Running meetings database migration to version {}", schema.version);
                migration(conn)?;
            }
        }
        conn.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + target_version as i64),
            [],
        )?;
        Ok(())
    }

    fn row_to_meeting(row: &rusqlite::Row) -> rusqlite::Result<MeetingRecord> {
        let participants_json: String = row.get("participants")?;
        Ok(MeetingRecord {
            id: row.get("id")?,
            title: row.get("title")?,
            started_at_ms: row.get("started_at_ms")?,
            duration_secs: row.get("duration_secs")?,
            organizer: row.get("organizer")?,
            participants: serde_json::from_str(&participants_json).unwrap_or_default(),
            transcript_url: row.get("transcript_url")?,
            audio_url: row.get("audio_url")?,
            status: SyncStatus::from_db_str(&row.get::<_, String>("status")?),
            last_error: row.get("last_error")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn row_to_file(row: &rusqlite::Row) -> rusqlite::Result<FileRecord> {
        let kind_str: String = row.get("kind")?;
        Ok(FileRecord {
            meeting_id: row.get("meeting_id")?,
            kind: FileKind::from_str(&kind_str).unwrap_or(FileKind::Summary),
            rel_path: row.get("rel_path")?,
            size_bytes: row.get("size_bytes")?,
            status: FileStatus::from_db_str(&row.get::<_, String>("status")?),
            error_message: row.get("error_message")?,
            downloaded_at: row.get("downloaded_at")?,
        })
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    fn insert_meeting(conn: &Connection, record: &MeetingRecord) -> Result<()> {
        let participants = serde_json::to_string(&record.participants)?;
        conn.execute(
            r#"INSERT INTO meetings (
                id, title, started_at_ms, duration_secs, organizer, participants,
                transcript_url, audio_url, status, last_error, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"#,
            params![
                record.id,
                record.title,
                record.started_at_ms,
                record.duration_secs,
                record.organizer,
                participants,
                record.transcript_url,
                record.audio_url,
                record.status.as_str(),
                record.last_error,
                record.created_at,
                record.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Refresh metadata columns only. Status and last_error stay untouched.
    fn refresh_metadata(conn: &Connection, record: &MeetingRecord) -> Result<()> {
        let participants = serde_json::to_string(&record.participants)?;
        conn.execute(
            r#"UPDATE meetings SET
                title = ?2, started_at_ms = ?3, duration_secs = ?4, organizer = ?5,
                participants = ?6, transcript_url = ?7, audio_url = ?8, updated_at = ?9
            WHERE id = ?1"#,
            params![
                record.id,
                record.title,
                record.started_at_ms,
                record.duration_secs,
                record.organizer,
                participants,
                record.transcript_url,
                record.audio_url,
                Self::now(),
            ],
        )?;
        Ok(())
    }
}

impl MeetingStore for SqliteMeetingStore {
    // ====== Meetings ======

    fn get_meeting(&self, id: &str) -> Result<Option<MeetingRecord>> {
        let conn = self.conn.lock().unwrap();
        let meeting = conn
            .query_row("SELECT * FROM meetings WHERE id = ?1", [id], Self::row_to_meeting)
            .optional()
            .with_context(|| format!("Failed to get meeting {}", id))?;
        Ok(meeting)
    }

    fn upsert_meeting(&self, record: &MeetingRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let participants = serde_json::to_string(&record.participants)?;
        conn.execute(
            r#"INSERT INTO meetings (
                id, title, started_at_ms, duration_secs, organizer, participants,
                transcript_url, audio_url, status, last_error, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT (id) DO UPDATE SET
                title = excluded.title,
                started_at_ms = excluded.started_at_ms,
                duration_secs = excluded.duration_secs,
                organizer = excluded.organizer,
                participants = excluded.participants,
                transcript_url = excluded.transcript_url,
                audio_url = excluded.audio_url,
                status = excluded.status,
                last_error = excluded.last_error,
                updated_at = excluded.updated_at"#,
            params![
                record.id,
                record.title,
                record.started_at_ms,
                record.duration_secs,
                record.organizer,
                participants,
                record.transcript_url,
                record.audio_url,
                record.status.as_str(),
                record.last_error,
                record.created_at,
                record.updated_at,
            ],
        )
        .with_context(|| format!("Failed to upsert meeting {}", record.id))?;
        Ok(())
    }

    fn merge_meetings(&self, records: &[MeetingRecord]) -> Result<MergeOutcome> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let mut outcome = MergeOutcome::default();

        for record in records {
            let existing: Option<String> = tx
                .query_row(
                    "SELECT status FROM meetings WHERE id = ?1",
                    [record.id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;

            match existing {
                None => {
                    Self::insert_meeting(&tx, record)?;
                    outcome.inserted += 1;
                }
                Some(status) if SyncStatus::from_db_str(&status).merge_overwritable() => {
                    Self::refresh_metadata(&tx, record)?;
                    outcome.updated += 1;
                }
                Some(_) => {
                    outcome.skipped += 1;
                }
            }
        }

        tx.commit().context("Failed to commit merge batch")?;
        Ok(outcome)
    }

    fn list_meetings(&self) -> Result<Vec<MeetingRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM meetings ORDER BY started_at_ms DESC")?;
        let meetings = stmt
            .query_map([], Self::row_to_meeting)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(meetings)
    }

    fn list_meetings_by_status(&self, status: SyncStatus) -> Result<Vec<MeetingRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT * FROM meetings WHERE status = ?1 ORDER BY started_at_ms DESC")?;
        let meetings = stmt
            .query_map([status.as_str()], Self::row_to_meeting)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(meetings)
    }

    fn set_meeting_status(&self, id: &str, status: SyncStatus, error: Option<&str>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE meetings SET status = ?2, last_error = ?3, updated_at = ?4 WHERE id = ?1",
            params![id, status.as_str(), error, Self::now()],
        )?;
        if changed == 0 {
            bail!("No meeting {} to update", id);
        }
        Ok(())
    }

    fn meeting_counts(&self) -> Result<MeetingCounts> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM meetings GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = MeetingCounts::default();
        for row in rows {
            let (status, count) = row?;
            let count = count as usize;
            match SyncStatus::from_db_str(&status) {
                SyncStatus::NotSynced => counts.not_synced += count,
                SyncStatus::Syncing => counts.syncing += count,
                SyncStatus::Synced => counts.synced += count,
                SyncStatus::Failed => counts.failed += count,
            }
        }
        Ok(counts)
    }

    // ====== Files ======

    fn get_file(&self, meeting_id: &str, kind: FileKind) -> Result<Option<FileRecord>> {
        let conn = self.conn.lock().unwrap();
        let file = conn
            .query_row(
                "SELECT * FROM meeting_files WHERE meeting_id = ?1 AND kind = ?2",
                params![meeting_id, kind.as_str()],
                Self::row_to_file,
            )
            .optional()
            .with_context(|| format!("Failed to get file {}/{}", meeting_id, kind.as_str()))?;
        Ok(file)
    }

    fn upsert_file(&self, record: &FileRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"INSERT INTO meeting_files (
                meeting_id, kind, rel_path, size_bytes, status, error_message, downloaded_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT (meeting_id, kind) DO UPDATE SET
                rel_path = excluded.rel_path,
                size_bytes = excluded.size_bytes,
                status = excluded.status,
                error_message = excluded.error_message,
                downloaded_at = excluded.downloaded_at"#,
            params![
                record.meeting_id,
                record.kind.as_str(),
                record.rel_path,
                record.size_bytes,
                record.status.as_str(),
                record.error_message,
                record.downloaded_at,
            ],
        )
        .with_context(|| {
            format!(
                "Failed to upsert file {}/{}",
                record.meeting_id,
                record.kind.as_str()
            )
        })?;
        Ok(())
    }

    fn list_files(&self, meeting_id: &str) -> Result<Vec<FileRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT * FROM meeting_files WHERE meeting_id = ?1 ORDER BY kind")?;
        let files = stmt
            .query_map([meeting_id], Self::row_to_file)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(files)
    }

    // ====== Sync state ======

    fn get_sync_state(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let value = conn
            .query_row("SELECT value FROM sync_state WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set_sync_state(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"INSERT INTO sync_state (key, value, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT (key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at"#,
            params![key, value, Self::now()],
        )?;
        Ok(())
    }
}
