//! Concurrent download queue.
//!
//! Jobs run FIFO through a bounded pool of workers with a minimum gap
//! between starts. A single drain task makes every start decision; worker
//! bodies only run the processor and report back, so all queue state lives
//! behind one mutex.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::meeting_store::{FileKind, MeetingRecord};

use super::models::{
    DownloadJob, JobKey, JobOutput, JobStatus, QueueEvent, QueueProgress,
};

/// Hard ceiling on worker concurrency, whatever the config says.
pub const MAX_CONCURRENT_CEILING: usize = 10;

/// Per-job progress reporter handed to the processor.
pub type JobProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

/// Does the actual work of one job. The queue decides when and how many run;
/// the processor decides what a job means.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(
        &self,
        key: &JobKey,
        progress: JobProgressFn,
        cancel: CancellationToken,
    ) -> Result<JobOutput, SyncError>;
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub max_concurrent: usize,
    pub job_spacing: Duration,
    pub max_job_retries: u32,
    pub event_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            job_spacing: Duration::from_millis(500),
            max_job_retries: 3,
            event_capacity: 256,
        }
    }
}

struct QueueState {
    jobs: Vec<DownloadJob>,
    in_flight: HashSet<JobKey>,
    cancel_flights: HashMap<JobKey, CancellationToken>,
    active_count: usize,
    paused: bool,
    last_start: Option<Instant>,
    max_concurrent: usize,
    job_spacing: Duration,
}

enum NextStart {
    Idle,
    Wait(Duration),
    Start(JobKey),
}

pub struct DownloadQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    events: broadcast::Sender<QueueEvent>,
    processor: Arc<dyn JobProcessor>,
    max_job_retries: u32,
}

impl DownloadQueue {
    pub fn new(config: QueueConfig, processor: Arc<dyn JobProcessor>) -> Arc<Self> {
        let (events, _) = broadcast::channel(config.event_capacity.max(16));
        Arc::new(Self {
            state: Mutex::new(QueueState {
                jobs: Vec::new(),
                in_flight: HashSet::new(),
                cancel_flights: HashMap::new(),
                active_count: 0,
                paused: false,
                last_start: None,
                max_concurrent: config.max_concurrent.clamp(1, MAX_CONCURRENT_CEILING),
                job_spacing: config.job_spacing,
            }),
            notify: Notify::new(),
            events,
            processor,
            max_job_retries: config.max_job_retries,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Queue one job per (meeting, kind) pair, skipping pairs that already
    /// have a job in any state. Returns (added, skipped).
    pub fn add_jobs(&self, meetings: &[MeetingRecord], kinds: &[FileKind]) -> (usize, usize) {
        let mut added = 0;
        let mut skipped = 0;
        let event = {
            let mut state = self.state.lock().unwrap();
            let mut existing: HashSet<JobKey> = state.jobs.iter().map(|j| j.key.clone()).collect();
            for meeting in meetings {
                for kind in kinds {
                    let key = JobKey::new(meeting.id.clone(), *kind);
                    if existing.insert(key) {
                        state.jobs.push(DownloadJob::new(meeting, *kind));
                        added += 1;
                    } else {
                        skipped += 1;
                    }
                }
            }
            if added > 0 {
                info!("Queued {} download jobs ({} already present)", added, skipped);
            }
            QueueEvent::JobsAdded {
                added,
                skipped,
                progress: QueueProgress::from_jobs(&state.jobs),
            }
        };
        let _ = self.events.send(event);
        self.notify.notify_one();
        (added, skipped)
    }

    /// Stop starting jobs and pull running ones back to `Paused`.
    pub fn pause(&self) {
        let event = {
            let mut state = self.state.lock().unwrap();
            if state.paused {
                return;
            }
            state.paused = true;
            for job in &mut state.jobs {
                if job.status == JobStatus::Downloading {
                    job.status = JobStatus::Paused;
                    job.current_operation = None;
                }
            }
            for token in state.cancel_flights.values() {
                token.cancel();
            }
            info!("Download queue paused");
            QueueEvent::Paused {
                progress: QueueProgress::from_jobs(&state.jobs),
            }
        };
        let _ = self.events.send(event);
    }

    /// Put paused jobs back in line. They keep their displayed progress
    /// until they actually restart.
    pub fn resume(&self) {
        let event = {
            let mut state = self.state.lock().unwrap();
            if !state.paused {
                return;
            }
            state.paused = false;
            for job in &mut state.jobs {
                if job.status == JobStatus::Paused {
                    job.status = JobStatus::Pending;
                }
            }
            info!("Download queue resumed");
            QueueEvent::Resumed {
                progress: QueueProgress::from_jobs(&state.jobs),
            }
        };
        let _ = self.events.send(event);
        self.notify.notify_one();
    }

    /// Remove one waiting job. Running and finished jobs are left alone.
    pub fn cancel_job(&self, key: &JobKey) -> bool {
        let mut state = self.state.lock().unwrap();
        let before = state.jobs.len();
        state
            .jobs
            .retain(|j| !(j.key == *key && matches!(j.status, JobStatus::Pending | JobStatus::Paused)));
        state.jobs.len() < before
    }

    /// Drop every waiting job. A job that is already downloading keeps
    /// going and finishes or fails on its own; completed and failed jobs
    /// stay for inspection.
    pub fn cancel_all(&self) -> usize {
        let (event, removed) = {
            let mut state = self.state.lock().unwrap();
            let before = state.jobs.len();
            state
                .jobs
                .retain(|j| !matches!(j.status, JobStatus::Pending | JobStatus::Paused));
            let removed = before - state.jobs.len();
            if removed > 0 {
                info!("Cancelled {} queued downloads", removed);
            }
            (
                QueueEvent::AllCancelled {
                    removed,
                    progress: QueueProgress::from_jobs(&state.jobs),
                },
                removed,
            )
        };
        let _ = self.events.send(event);
        removed
    }

    /// Drop completed jobs from the list. Returns how many went.
    pub fn clear_completed(&self) -> usize {
        let (event, removed) = {
            let mut state = self.state.lock().unwrap();
            let before = state.jobs.len();
            state.jobs.retain(|j| j.status != JobStatus::Completed);
            let removed = before - state.jobs.len();
            (
                QueueEvent::CompletedCleared {
                    removed,
                    progress: QueueProgress::from_jobs(&state.jobs),
                },
                removed,
            )
        };
        let _ = self.events.send(event);
        removed
    }

    /// Re-queue failed jobs that still have retry budget. They keep their
    /// place in line.
    pub fn retry_failed(&self) -> usize {
        let (event, retried) = {
            let mut state = self.state.lock().unwrap();
            let max_retries = self.max_job_retries;
            let mut retried = 0;
            for job in &mut state.jobs {
                if job.status == JobStatus::Failed && job.retry_count < max_retries {
                    job.status = JobStatus::Pending;
                    job.retry_count += 1;
                    job.progress = 0;
                    job.error_message = None;
                    job.started_at = None;
                    job.completed_at = None;
                    retried += 1;
                }
            }
            if retried > 0 {
                info!("Retrying {} failed downloads", retried);
            }
            (
                QueueEvent::RetryInitiated {
                    retried,
                    progress: QueueProgress::from_jobs(&state.jobs),
                },
                retried,
            )
        };
        let _ = self.events.send(event);
        self.notify.notify_one();
        retried
    }

    pub fn set_max_concurrent(&self, max_concurrent: usize) {
        let event = {
            let mut state = self.state.lock().unwrap();
            state.max_concurrent = max_concurrent.clamp(1, MAX_CONCURRENT_CEILING);
            info!("Max concurrent downloads set to {}", state.max_concurrent);
            QueueEvent::ConcurrencyChanged {
                max_concurrent: state.max_concurrent,
                progress: QueueProgress::from_jobs(&state.jobs),
            }
        };
        let _ = self.events.send(event);
        self.notify.notify_one();
    }

    pub fn set_job_spacing(&self, job_spacing: Duration) {
        let event = {
            let mut state = self.state.lock().unwrap();
            state.job_spacing = job_spacing;
            info!("Download start spacing set to {:?}", job_spacing);
            QueueEvent::RateLimitChanged {
                job_spacing,
                progress: QueueProgress::from_jobs(&state.jobs),
            }
        };
        let _ = self.events.send(event);
        self.notify.notify_one();
    }

    pub fn jobs(&self) -> Vec<DownloadJob> {
        self.state.lock().unwrap().jobs.clone()
    }

    pub fn progress(&self) -> QueueProgress {
        let state = self.state.lock().unwrap();
        QueueProgress::from_jobs(&state.jobs)
    }

    /// True when nothing is running and nothing is waiting to run.
    pub fn is_idle(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.active_count == 0
            && !state
                .jobs
                .iter()
                .any(|j| j.status == JobStatus::Pending && !state.in_flight.contains(&j.key))
    }

    /// Drain loop. Spawn exactly once per queue.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!("Download queue draining");
        loop {
            if shutdown.is_cancelled() {
                return;
            }
            let decision = self.next_start();
            match decision {
                NextStart::Idle => {
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = shutdown.cancelled() => return,
                    }
                }
                NextStart::Wait(wait) => {
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = self.notify.notified() => {}
                        _ = shutdown.cancelled() => return,
                    }
                }
                NextStart::Start(key) => {
                    self.start_job(key, &shutdown);
                }
            }
        }
    }

    fn next_start(&self) -> NextStart {
        let state = self.state.lock().unwrap();
        if state.paused || state.active_count >= state.max_concurrent {
            return NextStart::Idle;
        }
        let next = state
            .jobs
            .iter()
            .find(|j| j.status == JobStatus::Pending && !state.in_flight.contains(&j.key));
        let Some(job) = next else {
            return NextStart::Idle;
        };
        if let Some(last_start) = state.last_start {
            let since = last_start.elapsed();
            if since < state.job_spacing {
                return NextStart::Wait(state.job_spacing - since);
            }
        }
        NextStart::Start(job.key.clone())
    }

    fn start_job(self: &Arc<Self>, key: JobKey, shutdown: &CancellationToken) {
        let cancel = shutdown.child_token();
        let event = {
            let mut state = self.state.lock().unwrap();
            let Some(job) = state.jobs.iter_mut().find(|j| j.key == key) else {
                return;
            };
            if job.status != JobStatus::Pending {
                return;
            }
            job.status = JobStatus::Downloading;
            job.current_operation = Some(format!("Fetching {}", key.kind.label()));
            job.started_at = Some(chrono::Utc::now().timestamp());
            state.in_flight.insert(key.clone());
            state.cancel_flights.insert(key.clone(), cancel.clone());
            state.active_count += 1;
            state.last_start = Some(Instant::now());
            debug!("Starting download job {}", key);
            QueueEvent::JobStarted {
                key: key.clone(),
                progress: QueueProgress::from_jobs(&state.jobs),
            }
        };
        let _ = self.events.send(event);

        let queue = Arc::clone(self);
        tokio::spawn(async move {
            let reporter = queue.progress_reporter(key.clone());
            let result = queue.processor.process(&key, reporter, cancel).await;
            queue.on_job_finished(key, result);
        });
    }

    fn progress_reporter(self: &Arc<Self>, key: JobKey) -> JobProgressFn {
        let queue = Arc::clone(self);
        Arc::new(move |pct: u8| {
            let event = {
                let mut state = queue.state.lock().unwrap();
                let Some(job) = state.jobs.iter_mut().find(|j| j.key == key) else {
                    return;
                };
                // A demoted job keeps its last shown progress.
                if job.status != JobStatus::Downloading {
                    return;
                }
                job.progress = pct.min(100);
                QueueEvent::JobProgress {
                    key: key.clone(),
                    pct: job.progress,
                    progress: QueueProgress::from_jobs(&state.jobs),
                }
            };
            let _ = queue.events.send(event);
        })
    }

    fn on_job_finished(&self, key: JobKey, result: Result<JobOutput, SyncError>) {
        let event = {
            let mut state = self.state.lock().unwrap();
            state.active_count = state.active_count.saturating_sub(1);
            state.in_flight.remove(&key);
            state.cancel_flights.remove(&key);

            let Some(job) = state.jobs.iter_mut().find(|j| j.key == key) else {
                // Cancelled away while running.
                drop(state);
                self.notify.notify_one();
                return;
            };

            match result {
                Ok(output) => {
                    // Even a job demoted to Paused mid-flight is done: the
                    // artifact is on disk.
                    job.status = JobStatus::Completed;
                    job.progress = 100;
                    job.current_operation = None;
                    job.error_message = None;
                    job.completed_at = Some(chrono::Utc::now().timestamp());
                    debug!("Job {} completed ({} bytes)", key, output.bytes);
                    Some(QueueEvent::JobCompleted {
                        key: key.clone(),
                        progress: QueueProgress::from_jobs(&state.jobs),
                    })
                }
                Err(SyncError::Cancelled) => {
                    match job.status {
                        // Pause demoted it first; leave it where pause put it.
                        JobStatus::Paused | JobStatus::Pending => {}
                        // Shutdown mid-download: back in line for next run.
                        JobStatus::Downloading => {
                            job.status = JobStatus::Pending;
                            job.progress = 0;
                            job.current_operation = None;
                            job.started_at = None;
                        }
                        JobStatus::Completed | JobStatus::Failed => {}
                    }
                    None
                }
                Err(err) => {
                    job.status = JobStatus::Failed;
                    job.current_operation = None;
                    job.error_message = Some(err.to_string());
                    warn!("Job {} failed: {}", key, err);
                    Some(QueueEvent::JobFailed {
                        key: key.clone(),
                        error: err.to_string(),
                        progress: QueueProgress::from_jobs(&state.jobs),
                    })
                }
            }
        };
        if let Some(event) = event {
            let _ = self.events.send(event);
        }
        self.notify.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meeting_store::MeetingRecord;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted processor: per-key failure budgets, a fixed per-job delay,
    /// and bookkeeping on concurrency.
    struct TestProcessor {
        delay: Duration,
        failures: Mutex<HashMap<JobKey, usize>>,
        running: AtomicUsize,
        max_seen: AtomicUsize,
        starts: Mutex<Vec<(JobKey, Instant)>>,
    }

    impl TestProcessor {
        fn instant() -> Arc<Self> {
            Self::with_delay(Duration::ZERO)
        }

        fn with_delay(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                failures: Mutex::new(HashMap::new()),
                running: AtomicUsize::new(0),
                max_seen: AtomicUsize::new(0),
                starts: Mutex::new(Vec::new()),
            })
        }

        fn fail_times(&self, key: JobKey, times: usize) {
            self.failures.lock().unwrap().insert(key, times);
        }
    }

    #[async_trait]
    impl JobProcessor for TestProcessor {
        async fn process(
            &self,
            key: &JobKey,
            progress: JobProgressFn,
            cancel: CancellationToken,
        ) -> Result<JobOutput, SyncError> {
            self.starts.lock().unwrap().push((key.clone(), Instant::now()));
            let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(running, Ordering::SeqCst);

            progress(10);
            let outcome = tokio::select! {
                _ = tokio::time::sleep(self.delay) => {
                    let mut failures = self.failures.lock().unwrap();
                    match failures.get_mut(key) {
                        Some(left) if *left > 0 => {
                            *left -= 1;
                            Err(SyncError::Network("scripted failure".to_string()))
                        }
                        _ => Ok(JobOutput {
                            rel_path: format!("{}", key),
                            bytes: 123,
                        }),
                    }
                }
                _ = cancel.cancelled() => Err(SyncError::Cancelled),
            };

            self.running.fetch_sub(1, Ordering::SeqCst);
            if outcome.is_ok() {
                progress(100);
            }
            outcome
        }
    }

    fn meetings(n: usize) -> Vec<MeetingRecord> {
        (0..n)
            .map(|i| {
                MeetingRecord::new(format!("m-{}", i), format!("Meeting {}", i), 1_700_000_000_000)
            })
            .collect()
    }

    fn queue_with(
        processor: Arc<TestProcessor>,
        config: QueueConfig,
    ) -> (Arc<DownloadQueue>, CancellationToken) {
        let queue = DownloadQueue::new(config, processor);
        let shutdown = CancellationToken::new();
        tokio::spawn(Arc::clone(&queue).run(shutdown.clone()));
        (queue, shutdown)
    }

    async fn wait_idle(queue: &Arc<DownloadQueue>) {
        for _ in 0..10_000 {
            if queue.is_idle() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("queue never went idle");
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_jobs_deduplicates() {
        let queue = DownloadQueue::new(QueueConfig::default(), TestProcessor::instant());
        let meetings = meetings(2);

        let (added, skipped) = queue.add_jobs(&meetings, &FileKind::ALL);
        assert_eq!((added, skipped), (8, 0));

        let (added, skipped) = queue.add_jobs(&meetings, &FileKind::ALL);
        assert_eq!((added, skipped), (0, 8));
        assert_eq!(queue.jobs().len(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_jobs_run_to_completion() {
        let processor = TestProcessor::instant();
        let (queue, _shutdown) = queue_with(processor, QueueConfig::default());
        let mut events = queue.subscribe();

        queue.add_jobs(&meetings(2), &[FileKind::Audio, FileKind::Summary]);
        wait_idle(&queue).await;

        let jobs = queue.jobs();
        assert_eq!(jobs.len(), 4);
        assert!(jobs.iter().all(|j| j.status == JobStatus::Completed));
        assert!(jobs.iter().all(|j| j.progress == 100));
        assert!(jobs.iter().all(|j| j.completed_at.is_some()));
        assert!(jobs.iter().all(|j| j.current_operation.is_none()));

        let mut started = 0;
        let mut completed = 0;
        while let Ok(event) = events.try_recv() {
            match event {
                QueueEvent::JobStarted { .. } => started += 1,
                QueueEvent::JobCompleted { .. } => completed += 1,
                _ => {}
            }
        }
        assert_eq!(started, 4);
        assert_eq!(completed, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let processor = TestProcessor::with_delay(Duration::from_secs(1));
        let (queue, _shutdown) = queue_with(
            Arc::clone(&processor),
            QueueConfig {
                max_concurrent: 3,
                job_spacing: Duration::ZERO,
                ..Default::default()
            },
        );

        queue.add_jobs(&meetings(3), &FileKind::ALL);
        wait_idle(&queue).await;

        assert_eq!(queue.progress().completed, 12);
        assert!(processor.max_seen.load(Ordering::SeqCst) <= 3);
        assert!(processor.max_seen.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_starts_respect_spacing() {
        let processor = TestProcessor::instant();
        let (queue, _shutdown) = queue_with(
            Arc::clone(&processor),
            QueueConfig {
                job_spacing: Duration::from_millis(500),
                ..Default::default()
            },
        );

        queue.add_jobs(&meetings(1), &FileKind::ALL);
        wait_idle(&queue).await;

        let starts = processor.starts.lock().unwrap();
        assert_eq!(starts.len(), 4);
        for pair in starts.windows(2) {
            let gap = pair[1].1.duration_since(pair[0].1);
            assert!(gap >= Duration::from_millis(500), "gap was {:?}", gap);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_worker_starts_in_submission_order() {
        let processor = TestProcessor::instant();
        let failing = JobKey::new("m-1", FileKind::Audio);
        processor.fail_times(failing.clone(), 1);
        let (queue, _shutdown) = queue_with(
            Arc::clone(&processor),
            QueueConfig {
                max_concurrent: 1,
                job_spacing: Duration::ZERO,
                ..Default::default()
            },
        );

        queue.add_jobs(&meetings(3), &[FileKind::Audio]);
        wait_idle(&queue).await;

        let keys: Vec<JobKey> = processor
            .starts
            .lock()
            .unwrap()
            .iter()
            .map(|(key, _)| key.clone())
            .collect();
        let expected: Vec<JobKey> = (0..3)
            .map(|i| JobKey::new(format!("m-{}", i), FileKind::Audio))
            .collect();
        assert_eq!(keys, expected);
        assert_eq!(queue.jobs()[1].status, JobStatus::Failed);

        // The retried job keeps its slot in the queue and starts last.
        assert_eq!(queue.retry_failed(), 1);
        wait_idle(&queue).await;

        {
            let starts = processor.starts.lock().unwrap();
            assert_eq!(starts.len(), 4);
            assert_eq!(starts[3].0, failing);
        }
        let job = &queue.jobs()[1];
        assert_eq!(job.key, failing);
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.retry_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_demotes_and_resume_requeues() {
        let processor = TestProcessor::with_delay(Duration::from_secs(30));
        let (queue, _shutdown) = queue_with(
            processor,
            QueueConfig {
                max_concurrent: 2,
                job_spacing: Duration::ZERO,
                ..Default::default()
            },
        );

        queue.add_jobs(&meetings(4), &[FileKind::Summary]);
        // Let two jobs start.
        for _ in 0..50 {
            if queue.progress().downloading == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(queue.progress().downloading, 2);
        assert!(queue
            .jobs()
            .iter()
            .filter(|j| j.status == JobStatus::Downloading)
            .all(|j| j.current_operation.as_deref() == Some("Fetching summary")));

        queue.pause();
        // Workers observe the cancel and exit; demoted jobs stay paused.
        for _ in 0..50 {
            if queue.state.lock().unwrap().active_count == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let progress = queue.progress();
        assert_eq!(progress.downloading, 0);
        assert_eq!(progress.paused, 2);
        assert_eq!(progress.pending, 2);
        assert!(queue.jobs().iter().all(|j| j.current_operation.is_none()));

        queue.resume();
        wait_idle(&queue).await;
        assert_eq!(queue.progress().completed, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_resume_keeps_queue_order() {
        // No drain loop spawned, so nothing starts between the calls.
        let queue = DownloadQueue::new(QueueConfig::default(), TestProcessor::instant());
        queue.add_jobs(&meetings(3), &[FileKind::Audio, FileKind::Summary]);
        let before: Vec<JobKey> = queue.jobs().iter().map(|j| j.key.clone()).collect();

        queue.pause();
        queue.resume();

        let after: Vec<JobKey> = queue.jobs().iter().map(|j| j.key.clone()).collect();
        assert_eq!(before, after);
        assert!(queue.jobs().iter().all(|j| j.status == JobStatus::Pending));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_job_records_error_and_retries() {
        let processor = TestProcessor::instant();
        let key = JobKey::new("m-0", FileKind::Audio);
        processor.fail_times(key.clone(), 1);
        let (queue, _shutdown) = queue_with(Arc::clone(&processor), QueueConfig::default());

        queue.add_jobs(&meetings(1), &[FileKind::Audio]);
        wait_idle(&queue).await;

        let job = &queue.jobs()[0];
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("network error: scripted failure"));

        assert_eq!(queue.retry_failed(), 1);
        wait_idle(&queue).await;

        let job = &queue.jobs()[0];
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.retry_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_respects_budget() {
        let processor = TestProcessor::instant();
        let key = JobKey::new("m-0", FileKind::Audio);
        processor.fail_times(key.clone(), 10);
        let (queue, _shutdown) = queue_with(
            Arc::clone(&processor),
            QueueConfig {
                max_job_retries: 1,
                ..Default::default()
            },
        );

        queue.add_jobs(&meetings(1), &[FileKind::Audio]);
        wait_idle(&queue).await;
        assert_eq!(queue.jobs()[0].status, JobStatus::Failed);

        assert_eq!(queue.retry_failed(), 1);
        wait_idle(&queue).await;
        assert_eq!(queue.jobs()[0].status, JobStatus::Failed);

        // Budget exhausted.
        assert_eq!(queue.retry_failed(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_waiting_jobs() {
        let queue = DownloadQueue::new(QueueConfig::default(), TestProcessor::instant());
        queue.add_jobs(&meetings(2), &[FileKind::Audio, FileKind::Summary]);

        let key = JobKey::new("m-0", FileKind::Audio);
        assert!(queue.cancel_job(&key));
        assert!(!queue.cancel_job(&key));
        assert_eq!(queue.jobs().len(), 3);

        assert_eq!(queue.cancel_all(), 3);
        assert!(queue.jobs().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_spares_downloading_jobs() {
        let processor = TestProcessor::with_delay(Duration::from_secs(5));
        let (queue, _shutdown) = queue_with(
            processor,
            QueueConfig {
                max_concurrent: 1,
                job_spacing: Duration::ZERO,
                ..Default::default()
            },
        );

        queue.add_jobs(&meetings(2), &[FileKind::Audio]);
        for _ in 0..50 {
            if queue.progress().downloading == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(queue.progress().downloading, 1);

        // Only the waiting job is removed; the running one keeps going.
        assert_eq!(queue.cancel_all(), 1);
        let jobs = queue.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Downloading);

        wait_idle(&queue).await;
        assert_eq!(queue.jobs()[0].status, JobStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_completed_keeps_failures() {
        let processor = TestProcessor::instant();
        processor.fail_times(JobKey::new("m-0", FileKind::Audio), 5);
        let (queue, _shutdown) = queue_with(Arc::clone(&processor), QueueConfig::default());

        queue.add_jobs(&meetings(2), &[FileKind::Audio]);
        wait_idle(&queue).await;

        assert_eq!(queue.clear_completed(), 1);
        let jobs = queue.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_setting_clamps() {
        let queue = DownloadQueue::new(QueueConfig::default(), TestProcessor::instant());

        queue.set_max_concurrent(0);
        assert_eq!(queue.state.lock().unwrap().max_concurrent, 1);

        queue.set_max_concurrent(99);
        assert_eq!(
            queue.state.lock().unwrap().max_concurrent,
            MAX_CONCURRENT_CEILING
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_requeues_running_jobs() {
        let processor = TestProcessor::with_delay(Duration::from_secs(60));
        let (queue, shutdown) = queue_with(
            processor,
            QueueConfig {
                max_concurrent: 1,
                ..Default::default()
            },
        );

        queue.add_jobs(&meetings(1), &[FileKind::Audio]);
        for _ in 0..50 {
            if queue.progress().downloading == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        shutdown.cancel();
        for _ in 0..50 {
            if queue.state.lock().unwrap().active_count == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let job = &queue.jobs()[0];
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);
        assert!(job.started_at.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_carry_progress_snapshots() {
        let processor = TestProcessor::instant();
        let (queue, _shutdown) = queue_with(processor, QueueConfig::default());
        let mut events = queue.subscribe();

        queue.add_jobs(&meetings(1), &[FileKind::Summary]);
        wait_idle(&queue).await;

        let mut saw_full = false;
        while let Ok(event) = events.try_recv() {
            if event.progress().overall_pct >= 100.0 {
                saw_full = true;
            }
        }
        assert!(saw_full);
    }
}
