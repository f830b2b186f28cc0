//! Meeting discovery
//!
//! Pages the remote catalog, filters to the configured time window, and
//! merges what it finds into the local store. Incremental checks only look
//! at meetings newer than the last recorded scan.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info};

use crate::error::SyncError;
use crate::meeting_store::{MeetingStore, MergeOutcome, STATE_LAST_DISCOVERY_AT};
use crate::remote::{RemoteApi, RemoteMeeting};

const MS_PER_YEAR: i64 = 365 * 86_400_000;

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub window_years: u32,
    pub page_size: u32,
    pub merge_batch_size: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            window_years: 2,
            page_size: 50,
            merge_batch_size: 100,
        }
    }
}

/// Outcome of a full discovery scan.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryReport {
    pub fetched: usize,
    pub in_window: usize,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub elapsed: Duration,
}

/// Outcome of an incremental check.
#[derive(Debug, Clone)]
pub struct DiscoveryDelta {
    pub new_meetings: usize,
    pub updated: usize,
    pub cutoff_ms: i64,
}

pub struct DiscoveryEngine {
    api: Arc<dyn RemoteApi>,
    store: Arc<dyn MeetingStore>,
    config: DiscoveryConfig,
}

impl DiscoveryEngine {
    pub fn new(
        api: Arc<dyn RemoteApi>,
        store: Arc<dyn MeetingStore>,
        config: DiscoveryConfig,
    ) -> Self {
        Self { api, store, config }
    }

    /// Scan the whole configured window and merge everything found.
    pub async fn discover(&self) -> Result<DiscoveryReport> {
        let started = Instant::now();
        let cutoff_ms = self.window_cutoff_ms();
        info!(
            "Starting discovery scan over the last {} years",
            self.config.window_years
        );

        let fetched = self.fetch_newer_than(cutoff_ms).await?;
        let mut report = DiscoveryReport {
            fetched: fetched.len(),
            ..Default::default()
        };

        let outcome = self.merge_in_window(&fetched, cutoff_ms, &mut report.in_window)?;
        report.inserted = outcome.inserted;
        report.updated = outcome.updated;
        report.skipped = outcome.skipped;
        report.elapsed = started.elapsed();

        info!(
            "Discovery scan done in {:?}: {} fetched, {} in window, {} inserted, {} updated, {} skipped",
            report.elapsed,
            report.fetched,
            report.in_window,
            report.inserted,
            report.updated,
            report.skipped
        );
        Ok(report)
    }

    /// Merge only meetings newer than the last recorded scan. The scan start
    /// is captured before fetching, so meetings created mid-scan are picked
    /// up again next time rather than missed.
    pub async fn check_for_new_meetings(&self) -> Result<DiscoveryDelta> {
        let scan_started_ms = Utc::now().timestamp_millis();
        let cutoff_ms = match self.store.get_sync_state(STATE_LAST_DISCOVERY_AT)? {
            Some(raw) => raw
                .parse::<i64>()
                .with_context(|| format!("Bad last discovery marker: {}", raw))?,
            None => self.window_cutoff_ms(),
        };

        let fetched = self.fetch_newer_than(cutoff_ms).await?;
        let mut in_window = 0;
        let outcome = self.merge_in_window(&fetched, cutoff_ms, &mut in_window)?;

        self.store
            .set_sync_state(STATE_LAST_DISCOVERY_AT, &scan_started_ms.to_string())?;

        if outcome.inserted > 0 || outcome.updated > 0 {
            info!(
                "Incremental check: {} new, {} refreshed since {}",
                outcome.inserted, outcome.updated, cutoff_ms
            );
        } else {
            debug!("Incremental check: nothing new since {}", cutoff_ms);
        }
        Ok(DiscoveryDelta {
            new_meetings: outcome.inserted,
            updated: outcome.updated,
            cutoff_ms,
        })
    }

    pub fn window_cutoff_ms(&self) -> i64 {
        Utc::now().timestamp_millis() - self.config.window_years as i64 * MS_PER_YEAR
    }

    /// Page through the catalog, newest first, stopping once a page ends
    /// older than the cutoff or comes back short.
    async fn fetch_newer_than(&self, cutoff_ms: i64) -> Result<Vec<RemoteMeeting>, SyncError> {
        let mut all = Vec::new();
        let mut skip = 0u32;
        loop {
            let page = self.api.list_meetings(self.config.page_size, skip).await?;
            let page_len = page.len();
            debug!("Fetched page at skip {}: {} meetings", skip, page_len);

            let oldest_in_page = page.last().map(|m| m.started_at_ms());
            all.extend(page);

            if page_len < self.config.page_size as usize {
                break;
            }
            if matches!(oldest_in_page, Some(oldest) if oldest < cutoff_ms) {
                break;
            }
            skip += self.config.page_size;
        }
        Ok(all)
    }

    fn merge_in_window(
        &self,
        fetched: &[RemoteMeeting],
        cutoff_ms: i64,
        in_window: &mut usize,
    ) -> Result<MergeOutcome> {
        let records: Vec<_> = fetched
            .iter()
            .filter(|m| m.started_at_ms() >= cutoff_ms)
            .map(|m| m.to_meeting_record())
            .collect();
        *in_window = records.len();

        let mut outcome = MergeOutcome::default();
        for chunk in records.chunks(self.config.merge_batch_size.max(1)) {
            outcome.absorb(self.store.merge_meetings(chunk)?);
        }
        Ok(outcome)
    }
}
