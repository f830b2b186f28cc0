//! Meeting record store
//!
//! Local SQLite catalog of discovered meetings, their per-artifact file
//! records, and sync engine state.

mod models;
mod schema;
mod sqlite_store;
mod trait_def;

pub use models::*;
pub use schema::MEETING_DB_SCHEMAS;
pub use sqlite_store::SqliteMeetingStore;
pub use trait_def::{MeetingStore, STATE_LAST_DISCOVERY_AT, STATE_PATH_SCHEME_VERSION};
