//! GraphQL client for the meeting provider.
//!
//! All catalog queries go through the rate limiter; artifact downloads hit
//! pre-signed URLs directly and are paced by the download queue instead.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::SyncError;

use super::models::{
    ConnectionProbe, GraphQlResponse, RemoteMeeting, TranscriptData, TranscriptsData, ViewerData,
    GET_MEETING_QUERY, LIST_MEETINGS_QUERY, VIEWER_QUERY,
};
use super::rate_limiter::{priorities, RateLimiter};

/// Used for 429 responses that carry no Retry-After header.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(30);

/// Progress callback for streaming downloads: (bytes so far, total if known).
pub type ChunkProgressFn = Box<dyn Fn(u64, Option<u64>) + Send + Sync>;

/// The remote side of the sync engine. Implemented by the real client and by
/// scripted stand-ins in tests.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// One page of the meeting catalog, newest first.
    async fn list_meetings(&self, limit: u32, skip: u32) -> Result<Vec<RemoteMeeting>, SyncError>;

    /// Full meeting detail including sentences and summary.
    async fn get_meeting(&self, id: &str) -> Result<RemoteMeeting, SyncError>;

    /// Cheap credential probe. Never fails; the outcome is in the probe.
    async fn test_connection(&self) -> ConnectionProbe;

    /// Stream an artifact URL to `dest`, writing through a `.part` file so a
    /// torn download never leaves a plausible-looking artifact behind.
    async fn download_to_file(
        &self,
        url: &str,
        dest: &Path,
        on_chunk: ChunkProgressFn,
        cancel: CancellationToken,
    ) -> Result<u64, SyncError>;
}

/// Exponential backoff for retryable request failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        let backoff = self.initial_backoff.as_secs_f64() * self.multiplier.powi(attempt as i32);
        Duration::from_secs_f64(backoff.min(self.max_backoff.as_secs_f64()))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub request_timeout: Duration,
    pub download_timeout: Duration,
    pub retry: RetryPolicy,
}

pub struct ApiClient {
    http: reqwest::Client,
    download_http: reqwest::Client,
    base_url: String,
    api_key: String,
    retry: RetryPolicy,
    limiter: Arc<RateLimiter>,
}

impl ApiClient {
    pub fn new(config: ApiClientConfig, limiter: Arc<RateLimiter>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        let download_http = reqwest::Client::builder()
            .timeout(config.download_timeout)
            .build()?;
        Ok(Self {
            http,
            download_http,
            base_url: config.base_url,
            api_key: config.api_key,
            retry: config.retry,
            limiter,
        })
    }

    /// Run one GraphQL query through the limiter, retrying transient errors
    /// with exponential backoff. Rate-limit responses never reach this layer;
    /// the limiter absorbs them and re-runs the call.
    async fn graphql<T>(
        &self,
        priority: i32,
        query: &'static str,
        variables: serde_json::Value,
    ) -> Result<T, SyncError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let mut attempt = 0;
        loop {
            let http = self.http.clone();
            let base_url = self.base_url.clone();
            let api_key = self.api_key.clone();
            let variables = variables.clone();
            let result = self
                .limiter
                .execute(priority, move || {
                    let http = http.clone();
                    let base_url = base_url.clone();
                    let api_key = api_key.clone();
                    let variables = variables.clone();
                    async move {
                        send_graphql::<T>(&http, &base_url, &api_key, query, variables).await
                    }
                })
                .await;

            match result {
                Err(err) if err.is_retryable() && attempt < self.retry.max_retries => {
                    let backoff = self.retry.backoff(attempt);
                    warn!(
                        "Request failed ({}), retry {}/{} in {:?}",
                        err,
                        attempt + 1,
                        self.retry.max_retries,
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

#[async_trait]
impl RemoteApi for ApiClient {
    async fn list_meetings(&self, limit: u32, skip: u32) -> Result<Vec<RemoteMeeting>, SyncError> {
        let data: TranscriptsData = self
            .graphql(
                priorities::DISCOVERY,
                LIST_MEETINGS_QUERY,
                serde_json::json!({ "limit": limit, "skip": skip }),
            )
            .await?;
        Ok(data.transcripts)
    }

    async fn get_meeting(&self, id: &str) -> Result<RemoteMeeting, SyncError> {
        let data: TranscriptData = self
            .graphql(
                priorities::JOB,
                GET_MEETING_QUERY,
                serde_json::json!({ "id": id }),
            )
            .await?;
        data.transcript
            .ok_or_else(|| SyncError::BadRequest(format!("Meeting {} not found upstream", id)))
    }

    async fn test_connection(&self) -> ConnectionProbe {
        let http = self.http.clone();
        let base_url = self.base_url.clone();
        let api_key = self.api_key.clone();
        // Single attempt: a probe should report the current state, not paper
        // over it with retries.
        let result = self
            .limiter
            .execute(priorities::PROBE, move || {
                let http = http.clone();
                let base_url = base_url.clone();
                let api_key = api_key.clone();
                async move {
                    send_graphql::<ViewerData>(
                        &http,
                        &base_url,
                        &api_key,
                        VIEWER_QUERY,
                        serde_json::json!({}),
                    )
                    .await
                }
            })
            .await;

        match result {
            Ok(data) => {
                let detail = data
                    .user
                    .and_then(|u| u.email.or(u.name))
                    .unwrap_or_else(|| "connected".to_string());
                ConnectionProbe { ok: true, detail }
            }
            Err(err) => ConnectionProbe {
                ok: false,
                detail: err.to_string(),
            },
        }
    }

    async fn download_to_file(
        &self,
        url: &str,
        dest: &Path,
        on_chunk: ChunkProgressFn,
        cancel: CancellationToken,
    ) -> Result<u64, SyncError> {
        let response = self
            .download_http
            .get(url)
            .send()
            .await
            .map_err(|e| SyncError::Network(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let message = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), message, retry_after));
        }

        let total = response.content_length();
        let file_name = dest
            .file_name()
            .ok_or_else(|| SyncError::Storage(format!("Invalid download target {:?}", dest)))?;
        let part_path = dest.with_file_name(format!("{}.part", file_name.to_string_lossy()));
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::File::create(&part_path).await?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            if cancel.is_cancelled() {
                drop(file);
                let _ = tokio::fs::remove_file(&part_path).await;
                return Err(SyncError::Cancelled);
            }
            let chunk = chunk.map_err(|e| SyncError::Network(e.to_string()))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            on_chunk(written, total);
        }
        file.flush().await?;
        drop(file);
        tokio::fs::rename(&part_path, dest).await?;
        debug!("Downloaded {} bytes to {:?}", written, dest);
        Ok(written)
    }
}

async fn send_graphql<T: DeserializeOwned>(
    http: &reqwest::Client,
    base_url: &str,
    api_key: &str,
    query: &str,
    variables: serde_json::Value,
) -> Result<T, SyncError> {
    let body = serde_json::json!({ "query": query, "variables": variables });
    let response = http
        .post(base_url)
        .bearer_auth(api_key)
        .json(&body)
        .send()
        .await
        .map_err(|e| SyncError::Network(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let retry_after = parse_retry_after(response.headers());
        let message = response.text().await.unwrap_or_default();
        return Err(classify_status(status.as_u16(), message, retry_after));
    }

    let envelope: GraphQlResponse<T> = response.json().await.map_err(|e| SyncError::Api {
        status: status.as_u16(),
        message: format!("Unparseable response body: {}", e),
    })?;

    if let Some(error) = envelope.errors.first() {
        return Err(classify_graphql_error(&error.message));
    }
    envelope.data.ok_or_else(|| SyncError::Api {
        status: status.as_u16(),
        message: "Response carried no data".to_string(),
    })
}

/// Map an HTTP error status onto the sync error taxonomy.
fn classify_status(status: u16, message: String, retry_after: Option<Duration>) -> SyncError {
    match status {
        401 | 403 => SyncError::Auth(truncate(&message)),
        429 => SyncError::RateLimited {
            retry_after: retry_after.unwrap_or(DEFAULT_RETRY_AFTER),
        },
        400..=499 => SyncError::BadRequest(truncate(&message)),
        _ => SyncError::Api {
            status,
            message: truncate(&message),
        },
    }
}

/// GraphQL errors come back as 200s; sort credential problems out of the
/// generic pile by message.
fn classify_graphql_error(message: &str) -> SyncError {
    let lowered = message.to_lowercase();
    let auth_markers = ["api key", "apikey", "auth", "unauthorized", "forbidden"];
    if auth_markers.iter().any(|marker| lowered.contains(marker)) {
        SyncError::Auth(message.to_string())
    } else {
        SyncError::BadRequest(message.to_string())
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get("retry-after")?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn truncate(message: &str) -> String {
    const MAX: usize = 300;
    if message.len() <= MAX {
        message.to_string()
    } else {
        let mut end = MAX;
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &message[..end])
    }
}
