//! Pipeline assembly: the job processor and the manager that owns it.

mod manager;
mod processor;

pub use manager::SyncManager;
pub use processor::MeetingFileProcessor;
