//! Versioned schema for the meetings database.
//!
//! `PRAGMA user_version` stores `BASE_DB_VERSION + schema version` so an
//! arbitrary SQLite file is never mistaken for one of ours.

use anyhow::{bail, Result};
use rusqlite::Connection;

/// Offset added to the schema version in PRAGMA user_version.
pub const BASE_DB_VERSION: i64 = 52000;

pub struct Table {
    pub name: &'static str,
    pub schema: &'static str,
    pub indices: &'static [&'static str],
}

pub struct VersionedSchema {
    pub version: u32,
    pub tables: &'static [Table],
    pub migration: Option<fn(&Connection) -> Result<()>>,
}

impl VersionedSchema {
    /// Create all tables and indices of this version on a fresh database.
    pub fn create(&self, conn: &Connection) -> Result<()> {
        for table in self.tables {
            conn.execute(table.schema, [])?;
            for index in table.indices {
                conn.execute(index, [])?;
            }
        }
        conn.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + self.version as i64),
            [],
        )?;
        Ok(())
    }

    /// Check that every table of this version exists.
    pub fn validate(&self, conn: &Connection) -> Result<()> {
        for table in self.tables {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table.name],
                |row| row.get(0),
            )?;
            if count != 1 {
                bail!("Schema validation failed: missing table {}", table.name);
            }
        }
        Ok(())
    }
}

const MEETINGS_TABLE_V0: Table = Table {
    name: "meetings",
    schema: "CREATE TABLE meetings (\
        id TEXT PRIMARY KEY, \
        title TEXT NOT NULL, \
        started_at_ms INTEGER NOT NULL, \
        duration_secs INTEGER NOT NULL DEFAULT 0, \
        organizer TEXT, \
        participants TEXT NOT NULL DEFAULT '[]', \
        transcript_url TEXT, \
        audio_url TEXT, \
        status TEXT NOT NULL, \
        last_error TEXT, \
        created_at INTEGER NOT NULL, \
        updated_at INTEGER NOT NULL)",
    indices: &[
        "CREATE INDEX idx_meetings_status ON meetings (status)",
        "CREATE INDEX idx_meetings_started ON meetings (started_at_ms)",
    ],
};

const MEETING_FILES_TABLE_V0: Table = Table {
    name: "meeting_files",
    schema: "CREATE TABLE meeting_files (\
        meeting_id TEXT NOT NULL REFERENCES meetings (id) ON DELETE CASCADE, \
        kind TEXT NOT NULL, \
        rel_path TEXT NOT NULL, \
        size_bytes INTEGER, \
        status TEXT NOT NULL, \
        error_message TEXT, \
        downloaded_at INTEGER, \
        UNIQUE (meeting_id, kind))",
    indices: &["CREATE INDEX idx_meeting_files_status ON meeting_files (status)"],
};

const SYNC_STATE_TABLE_V0: Table = Table {
    name: "sync_state",
    schema: "CREATE TABLE sync_state (\
        key TEXT PRIMARY KEY, \
        value TEXT NOT NULL, \
        updated_at INTEGER NOT NULL)",
    indices: &[],
};

pub const MEETING_DB_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[MEETINGS_TABLE_V0, MEETING_FILES_TABLE_V0, SYNC_STATE_TABLE_V0],
    migration: None,
}];
