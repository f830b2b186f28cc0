//! Meetvault Library
//!
//! This library exposes the internal modules for testing and potential reuse.

pub mod config;
pub mod discovery;
pub mod download_queue;
pub mod error;
pub mod meeting_store;
pub mod reconciler;
pub mod remote;
pub mod storage;
pub mod sync;

// Re-export commonly used types for convenience
pub use config::{AppConfig, CliConfig, FileConfig};
pub use download_queue::{DownloadQueue, QueueEvent, QueueProgress};
pub use error::SyncError;
pub use meeting_store::{MeetingStore, SqliteMeetingStore};
pub use sync::SyncManager;
