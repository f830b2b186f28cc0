//! Client-side rate limiting for the remote API.
//!
//! A token bucket with continuous refill fronts every remote call. Calls are
//! queued and drained by a single task, highest priority first, so an
//! interactive probe never sits behind a pile of background discovery pages.
//! While a backlog exists the drain also spaces consecutive calls by
//! `window / capacity`, which keeps a burst of queued work from swallowing
//! the whole bucket at once.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SyncError;

/// Floor for token-wait sleeps so the drain never busy-loops on tiny waits.
const MIN_TOKEN_WAIT: Duration = Duration::from_millis(50);

/// Priorities for queued remote calls. Higher runs first.
pub mod priorities {
    /// Background discovery page fetches.
    pub const DISCOVERY: i32 = 0;
    /// Artifact fetches on behalf of download jobs.
    pub const JOB: i32 = 5;
    /// Interactive connection probes.
    pub const PROBE: i32 = 10;
}

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub requests_per_window: u32,
    pub window: Duration,
}

impl RateLimiterConfig {
    pub fn per_minute(rpm: u32) -> Self {
        Self {
            requests_per_window: rpm.max(1),
            window: Duration::from_secs(60),
        }
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self::per_minute(10)
    }
}

/// Snapshot of the limiter for status reporting.
#[derive(Debug, Clone)]
pub struct RateLimiterStatus {
    pub available_tokens: f64,
    pub queued: usize,
    pub next_token_in: Duration,
}

enum OpOutcome {
    Done,
    RateLimited(Duration),
}

type OpRunner = Box<dyn FnMut() -> BoxFuture<'static, OpOutcome> + Send>;

struct QueuedOp {
    priority: i32,
    seq: u64,
    runner: OpRunner,
}

impl PartialEq for QueuedOp {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedOp {}

impl PartialOrd for QueuedOp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedOp {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority wins, older seq wins within a priority.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct LimiterState {
    tokens: f64,
    last_refill: Instant,
    queue: BinaryHeap<QueuedOp>,
    next_seq: u64,
}

pub struct RateLimiter {
    capacity: f64,
    window: Duration,
    spacing: Duration,
    state: Mutex<LimiterState>,
    notify: Notify,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        let capacity = config.requests_per_window.max(1);
        let spacing = config.window / capacity;
        Self {
            capacity: capacity as f64,
            window: config.window,
            spacing,
            state: Mutex::new(LimiterState {
                tokens: capacity as f64,
                last_refill: Instant::now(),
                queue: BinaryHeap::new(),
                next_seq: 0,
            }),
            notify: Notify::new(),
        }
    }

    /// Minimum gap the drain enforces between calls while a backlog exists.
    pub fn request_spacing(&self) -> Duration {
        self.spacing
    }

    /// Queue a remote call and wait for its result. `op` is a factory so the
    /// call can be re-issued if the remote answers with a rate limit.
    pub async fn execute<T, F, Fut>(&self, priority: i32, op: F) -> Result<T, SyncError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, SyncError>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel::<Result<T, SyncError>>();
        let tx_slot = Arc::new(Mutex::new(Some(tx)));
        let op = Arc::new(op);

        let runner: OpRunner = Box::new(move || {
            let op = Arc::clone(&op);
            let tx_slot = Arc::clone(&tx_slot);
            Box::pin(async move {
                match op().await {
                    Err(SyncError::RateLimited { retry_after }) => {
                        OpOutcome::RateLimited(retry_after)
                    }
                    result => {
                        if let Some(tx) = tx_slot.lock().unwrap().take() {
                            let _ = tx.send(result);
                        }
                        OpOutcome::Done
                    }
                }
            })
        });

        {
            let mut state = self.state.lock().unwrap();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.queue.push(QueuedOp {
                priority,
                seq,
                runner,
            });
        }
        self.notify.notify_one();

        // Dropped ops drop their sender, which surfaces here as Cancelled.
        rx.await.unwrap_or(Err(SyncError::Cancelled))
    }

    /// Drop every queued call. Their callers see `Cancelled`.
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock().unwrap();
        let dropped = state.queue.len();
        state.queue.clear();
        if dropped > 0 {
            debug!("Cleared {} queued remote calls", dropped);
        }
        dropped
    }

    pub fn status(&self) -> RateLimiterStatus {
        let mut state = self.state.lock().unwrap();
        self.refill(&mut state);
        let next_token_in = if state.tokens >= 1.0 {
            Duration::ZERO
        } else {
            self.time_until_token(&state)
        };
        RateLimiterStatus {
            available_tokens: state.tokens,
            queued: state.queue.len(),
            next_token_in,
        }
    }

    fn refill(&self, state: &mut LimiterState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill);
        let rate = self.capacity / self.window.as_secs_f64();
        state.tokens = (state.tokens + elapsed.as_secs_f64() * rate).min(self.capacity);
        state.last_refill = now;
    }

    fn time_until_token(&self, state: &LimiterState) -> Duration {
        let rate = self.capacity / self.window.as_secs_f64();
        let deficit = (1.0 - state.tokens).max(0.0);
        Duration::from_secs_f64(deficit / rate)
    }

    /// Drain queued calls until shutdown. Spawn this once per limiter.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            "Rate limiter draining at {} requests per {:?}",
            self.capacity, self.window
        );
        loop {
            // Wait for work.
            loop {
                if shutdown.is_cancelled() {
                    self.clear();
                    return;
                }
                if !self.state.lock().unwrap().queue.is_empty() {
                    break;
                }
                tokio::select! {
                    _ = self.notify.notified() => {}
                    _ = shutdown.cancelled() => {
                        self.clear();
                        return;
                    }
                }
            }

            // Wait for a token.
            loop {
                let wait = {
                    let mut state = self.state.lock().unwrap();
                    self.refill(&mut state);
                    if state.tokens >= 1.0 {
                        state.tokens -= 1.0;
                        None
                    } else {
                        Some(self.time_until_token(&state).max(MIN_TOKEN_WAIT))
                    }
                };
                let Some(wait) = wait else { break };
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = shutdown.cancelled() => {
                        self.clear();
                        return;
                    }
                }
            }

            // A clear() may have raced us; return the token if so.
            let popped = {
                let mut state = self.state.lock().unwrap();
                let popped = state.queue.pop();
                if popped.is_none() {
                    state.tokens = (state.tokens + 1.0).min(self.capacity);
                }
                popped
            };
            let Some(mut op) = popped else { continue };

            match (op.runner)().await {
                OpOutcome::Done => {}
                OpOutcome::RateLimited(retry_after) => {
                    warn!(
                        "Remote rate limit hit, holding queue for {:?}",
                        retry_after
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(retry_after) => {}
                        _ = shutdown.cancelled() => {
                            self.clear();
                            return;
                        }
                    }
                    // Same priority, fresh seq: the call rejoins behind its
                    // own priority class.
                    let mut state = self.state.lock().unwrap();
                    op.seq = state.next_seq;
                    state.next_seq += 1;
                    state.queue.push(op);
                    continue;
                }
            }

            // Space the next call only while a backlog exists, so a one-off
            // call is never delayed.
            let backlog = !self.state.lock().unwrap().queue.is_empty();
            if backlog && !self.spacing.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.spacing) => {}
                    _ = shutdown.cancelled() => {
                        self.clear();
                        return;
                    }
                }
            }
        }
    }
}
