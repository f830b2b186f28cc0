//! Download queue
//!
//! FIFO job queue with bounded concurrency, paced starts, pause/resume, and
//! per-job retry budgets. Every state change is broadcast to subscribers.

mod models;
mod queue;

pub use models::*;
pub use queue::{
    DownloadQueue, JobProcessor, JobProgressFn, QueueConfig, MAX_CONCURRENT_CEILING,
};
