//! Common test infrastructure
//!
//! Everything the end-to-end tests need: a scripted in-process remote, a
//! fully wired vault on a temp directory, and meeting fixture builders.
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{remote_meeting, TestVault};
//!
//! #[tokio::test]
//! async fn test_sync_one_meeting() {
//!     let now = chrono::Utc::now().timestamp_millis();
//!     let vault = TestVault::spawn(vec![remote_meeting("m-1", "Standup", now)]);
//!     vault.manager.discover().await.unwrap();
//!     vault.manager.enqueue_pending().unwrap();
//!     vault.drain().await;
//! }
//! ```

mod fixtures;
mod remote;
mod vault;

// Public API - this is what tests import
#[allow(unused_imports)]
pub use fixtures::{remote_meeting, MARCH_5_2024_MS};
#[allow(unused_imports)]
pub use remote::{ScriptedRemote, AUDIO_BYTES};
#[allow(unused_imports)]
pub use vault::TestVault;
