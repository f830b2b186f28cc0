//! Job bodies for the download queue.
//!
//! One job fetches one artifact of one meeting. The processor owns the
//! record bookkeeping around a job: the file record flips to downloading
//! on start, to downloaded or failed on finish, and the meeting's status
//! is recomputed from its file records after every outcome.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::download_queue::{JobKey, JobOutput, JobProcessor, JobProgressFn};
use crate::error::SyncError;
use crate::meeting_store::{
    FileKind, FileRecord, FileStatus, MeetingRecord, MeetingStore, SyncStatus,
};
use crate::reconciler::artifact_path;
use crate::remote::{ChunkProgressFn, RemoteApi};
use crate::storage::{documents, MeetingStorage};

pub struct MeetingFileProcessor {
    api: Arc<dyn RemoteApi>,
    store: Arc<dyn MeetingStore>,
    storage: Arc<MeetingStorage>,
}

impl MeetingFileProcessor {
    pub fn new(
        api: Arc<dyn RemoteApi>,
        store: Arc<dyn MeetingStore>,
        storage: Arc<MeetingStorage>,
    ) -> Self {
        Self { api, store, storage }
    }

    fn load_meeting(&self, id: &str) -> Result<MeetingRecord, SyncError> {
        self.store
            .get_meeting(id)
            .map_err(|e| SyncError::Storage(e.to_string()))?
            .ok_or_else(|| SyncError::BadRequest(format!("Unknown meeting {}", id)))
    }

    /// Flip the file record to downloading and the meeting to syncing.
    fn mark_started(&self, meeting: &MeetingRecord, kind: FileKind, rel: &Path) -> Result<(), SyncError> {
        let mut record = FileRecord::new(
            meeting.id.clone(),
            kind,
            rel.to_string_lossy().to_string(),
        );
        record.status = FileStatus::Downloading;
        self.store
            .upsert_file(&record)
            .map_err(|e| SyncError::Storage(e.to_string()))?;
        self.store
            .set_meeting_status(&meeting.id, SyncStatus::Syncing, None)
            .map_err(|e| SyncError::Storage(e.to_string()))?;
        Ok(())
    }

    fn mark_downloaded(&self, key: &JobKey, output: &JobOutput) -> Result<(), SyncError> {
        let mut record = FileRecord::new(key.meeting_id.clone(), key.kind, output.rel_path.clone());
        record.status = FileStatus::Downloaded;
        record.size_bytes = Some(output.bytes as i64);
        record.downloaded_at = Some(chrono::Utc::now().timestamp());
        self.store
            .upsert_file(&record)
            .map_err(|e| SyncError::Storage(e.to_string()))?;
        self.recompute_meeting_status(&key.meeting_id)
    }

    fn mark_failed(&self, key: &JobKey, rel: &Path, err: &SyncError) -> Result<(), SyncError> {
        let mut record = FileRecord::new(
            key.meeting_id.clone(),
            key.kind,
            rel.to_string_lossy().to_string(),
        );
        match err {
            // Cancellation is not a failure; the artifact is simply still
            // missing and the job will run again.
            SyncError::Cancelled => {
                record.status = FileStatus::NotDownloaded;
            }
            other => {
                record.status = FileStatus::Failed;
                record.error_message = Some(other.to_string());
            }
        }
        self.store
            .upsert_file(&record)
            .map_err(|e| SyncError::Storage(e.to_string()))?;
        self.recompute_meeting_status(&key.meeting_id)
    }

    /// Derive the meeting status from its file records. The last job to
    /// finish settles the meeting.
    fn recompute_meeting_status(&self, meeting_id: &str) -> Result<(), SyncError> {
        let files = self
            .store
            .list_files(meeting_id)
            .map_err(|e| SyncError::Storage(e.to_string()))?;
        let downloaded = files
            .iter()
            .filter(|f| f.status == FileStatus::Downloaded)
            .count();
        let in_flight = files.iter().any(|f| f.status == FileStatus::Downloading);
        let failed = files.iter().find(|f| f.status == FileStatus::Failed);

        let (status, error) = if downloaded == FileKind::ALL.len() {
            (SyncStatus::Synced, None)
        } else if in_flight {
            (SyncStatus::Syncing, None)
        } else if let Some(file) = failed {
            (SyncStatus::Failed, file.error_message.as_deref())
        } else {
            (SyncStatus::NotSynced, None)
        };

        self.store
            .set_meeting_status(meeting_id, status, error)
            .map_err(|e| SyncError::Storage(e.to_string()))
    }

    async fn fetch_artifact(
        &self,
        meeting: &MeetingRecord,
        kind: FileKind,
        rel: &Path,
        progress: &JobProgressFn,
        cancel: &CancellationToken,
    ) -> Result<JobOutput, SyncError> {
        match kind {
            FileKind::Audio => self.fetch_audio(meeting, rel, progress, cancel).await,
            FileKind::TranscriptJson | FileKind::TranscriptDoc | FileKind::Summary => {
                self.fetch_document(meeting, kind, rel, progress, cancel).await
            }
        }
    }

    /// Audio is a direct streaming GET against a pre-signed URL; the queue's
    /// start spacing paces these, not the rate limiter.
    async fn fetch_audio(
        &self,
        meeting: &MeetingRecord,
        rel: &Path,
        progress: &JobProgressFn,
        cancel: &CancellationToken,
    ) -> Result<JobOutput, SyncError> {
        let url = meeting.audio_url.as_deref().ok_or_else(|| {
            SyncError::BadRequest(format!("Meeting {} has no audio url", meeting.id))
        })?;
        let dest = self.storage.absolute(rel);

        let reporter = Arc::clone(progress);
        let on_chunk: ChunkProgressFn = Box::new(move |written, total| {
            if let Some(total) = total.filter(|t| *t > 0) {
                let pct = ((written.saturating_mul(100)) / total).min(99) as u8;
                reporter(pct);
            }
        });

        progress(1);
        let bytes = self
            .api
            .download_to_file(url, &dest, on_chunk, cancel.clone())
            .await?;
        progress(100);

        Ok(JobOutput {
            rel_path: rel.to_string_lossy().to_string(),
            bytes,
        })
    }

    /// Transcripts and summaries are rendered from the meeting detail
    /// query, which goes through the rate limiter.
    async fn fetch_document(
        &self,
        meeting: &MeetingRecord,
        kind: FileKind,
        rel: &Path,
        progress: &JobProgressFn,
        cancel: &CancellationToken,
    ) -> Result<JobOutput, SyncError> {
        progress(5);
        let detail = self.api.get_meeting(&meeting.id).await?;
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        progress(60);

        let bytes = match kind {
            FileKind::TranscriptJson => documents::transcript_json(&detail)
                .map_err(|e| SyncError::Storage(e.to_string()))?,
            FileKind::TranscriptDoc => documents::transcript_markdown(&detail).into_bytes(),
            FileKind::Summary => documents::summary_markdown(&detail).into_bytes(),
            FileKind::Audio => {
                return Err(SyncError::BadRequest(
                    "Audio is not a rendered document".to_string(),
                ))
            }
        };

        let written = self.storage.write_file(rel, &bytes)?;
        progress(100);
        debug!(
            "Wrote {} for meeting {} ({} bytes)",
            kind.label(),
            meeting.id,
            written
        );

        Ok(JobOutput {
            rel_path: rel.to_string_lossy().to_string(),
            bytes: written,
        })
    }
}

#[async_trait]
impl JobProcessor for MeetingFileProcessor {
    async fn process(
        &self,
        key: &JobKey,
        progress: JobProgressFn,
        cancel: CancellationToken,
    ) -> Result<JobOutput, SyncError> {
        let meeting = self.load_meeting(&key.meeting_id)?;
        let rel: PathBuf = artifact_path(&meeting, key.kind);
        self.mark_started(&meeting, key.kind, &rel)?;

        let result = self
            .fetch_artifact(&meeting, key.kind, &rel, &progress, &cancel)
            .await;

        match result {
            Ok(output) => {
                self.mark_downloaded(key, &output)?;
                Ok(output)
            }
            Err(err) => {
                if let Err(book_err) = self.mark_failed(key, &rel, &err) {
                    warn!("Failed to record outcome for job {}: {}", key, book_err);
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meeting_store::SqliteMeetingStore;
    use crate::remote::{ConnectionProbe, RemoteMeeting, RemoteSentence, RemoteSummary};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    // 2024-03-05 09:00:00 UTC
    const MARCH_5_2024_MS: i64 = 1_709_629_200_000;

    /// Scripted remote: serves canned details, writes canned audio bytes,
    /// and can be told to fail per meeting id.
    struct ScriptedRemote {
        details: Mutex<HashMap<String, RemoteMeeting>>,
        failures: Mutex<HashMap<String, SyncError>>,
        audio_bytes: Vec<u8>,
    }

    impl ScriptedRemote {
        fn new() -> Self {
            Self {
                details: Mutex::new(HashMap::new()),
                failures: Mutex::new(HashMap::new()),
                audio_bytes: b"ID3 fake audio".to_vec(),
            }
        }

        fn with_detail(self, detail: RemoteMeeting) -> Self {
            self.details
                .lock()
                .unwrap()
                .insert(detail.id.clone(), detail);
            self
        }

        fn fail_meeting(&self, id: &str, err: SyncError) {
            self.failures.lock().unwrap().insert(id.to_string(), err);
        }
    }

    #[async_trait]
    impl RemoteApi for ScriptedRemote {
        async fn list_meetings(
            &self,
            _limit: u32,
            _skip: u32,
        ) -> Result<Vec<RemoteMeeting>, SyncError> {
            Ok(Vec::new())
        }

        async fn get_meeting(&self, id: &str) -> Result<RemoteMeeting, SyncError> {
            if let Some(err) = self.failures.lock().unwrap().get(id) {
                return Err(err.clone());
            }
            self.details
                .lock()
                .unwrap()
                .get(id)
                .cloned()
                .ok_or_else(|| SyncError::BadRequest(format!("Meeting {} not found upstream", id)))
        }

        async fn test_connection(&self) -> ConnectionProbe {
            ConnectionProbe {
                ok: true,
                detail: "scripted".to_string(),
            }
        }

        async fn download_to_file(
            &self,
            _url: &str,
            dest: &Path,
            on_chunk: ChunkProgressFn,
            cancel: CancellationToken,
        ) -> Result<u64, SyncError> {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent).map_err(SyncError::from)?;
            }
            std::fs::write(dest, &self.audio_bytes).map_err(SyncError::from)?;
            let total = self.audio_bytes.len() as u64;
            on_chunk(total, Some(total));
            Ok(total)
        }
    }

    struct TestEnv {
        _dir: TempDir,
        store: Arc<SqliteMeetingStore>,
        storage: Arc<MeetingStorage>,
        remote: Arc<ScriptedRemote>,
        processor: MeetingFileProcessor,
    }

    fn detail(id: &str) -> RemoteMeeting {
        RemoteMeeting {
            id: id.to_string(),
            title: Some("Standup".to_string()),
            date: MARCH_5_2024_MS as f64,
            duration: 900.0,
            organizer_email: Some("host@example.com".to_string()),
            participants: vec!["host@example.com".to_string()],
            transcript_url: Some(format!("https://provider/t/{}", id)),
            audio_url: Some(format!("https://provider/a/{}.mp3", id)),
            sentences: Some(vec![RemoteSentence {
                speaker_name: Some("Ana".to_string()),
                text: "Hello".to_string(),
                start_time: 0.0,
                end_time: 1.0,
            }]),
            summary: Some(RemoteSummary {
                keywords: vec!["standup".to_string()],
                action_items: None,
                outline: None,
                overview: Some("Quick one.".to_string()),
            }),
        }
    }

    fn test_env(remote: ScriptedRemote) -> TestEnv {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteMeetingStore::in_memory().unwrap());
        let storage = Arc::new(MeetingStorage::new(dir.path()).unwrap());
        let remote = Arc::new(remote);
        let processor = MeetingFileProcessor::new(remote.clone(), store.clone(), storage.clone());
        TestEnv {
            _dir: dir,
            store,
            storage,
            remote,
            processor,
        }
    }

    fn insert_meeting(env: &TestEnv, id: &str, audio: bool) -> MeetingRecord {
        let record = MeetingRecord::new(id.to_string(), "Standup".to_string(), MARCH_5_2024_MS)
            .with_urls(
                Some(format!("https://provider/t/{}", id)),
                audio.then(|| format!("https://provider/a/{}.mp3", id)),
            );
        env.store.upsert_meeting(&record).unwrap();
        record
    }

    fn noop_progress() -> JobProgressFn {
        Arc::new(|_| {})
    }

    async fn run_job(env: &TestEnv, id: &str, kind: FileKind) -> Result<JobOutput, SyncError> {
        env.processor
            .process(
                &JobKey::new(id, kind),
                noop_progress(),
                CancellationToken::new(),
            )
            .await
    }

    #[tokio::test]
    async fn test_summary_job_writes_file_and_records() {
        let env = test_env(ScriptedRemote::new().with_detail(detail("m-1")));
        let meeting = insert_meeting(&env, "m-1", true);

        let output = run_job(&env, "m-1", FileKind::Summary).await.unwrap();

        let rel = artifact_path(&meeting, FileKind::Summary);
        assert_eq!(output.rel_path, rel.to_string_lossy());
        assert!(env.storage.exists(&rel));
        let content = String::from_utf8(env.storage.read_file(&rel).unwrap()).unwrap();
        assert!(content.contains("Quick one."));

        let record = env.store.get_file("m-1", FileKind::Summary).unwrap().unwrap();
        assert_eq!(record.status, FileStatus::Downloaded);
        assert_eq!(record.size_bytes, Some(output.bytes as i64));
        assert!(record.downloaded_at.is_some());

        // One of four artifacts present, meeting is still mid-sync.
        let meeting = env.store.get_meeting("m-1").unwrap().unwrap();
        assert_eq!(meeting.status, SyncStatus::NotSynced);
    }

    #[tokio::test]
    async fn test_audio_job_streams_to_derived_path() {
        let env = test_env(ScriptedRemote::new().with_detail(detail("m-1")));
        let meeting = insert_meeting(&env, "m-1", true);

        let output = run_job(&env, "m-1", FileKind::Audio).await.unwrap();

        let rel = artifact_path(&meeting, FileKind::Audio);
        assert!(env.storage.exists(&rel));
        assert_eq!(output.bytes, env.storage.file_size(&rel).unwrap());
    }

    #[tokio::test]
    async fn test_last_artifact_marks_meeting_synced() {
        let env = test_env(ScriptedRemote::new().with_detail(detail("m-1")));
        insert_meeting(&env, "m-1", true);

        for kind in FileKind::ALL {
            run_job(&env, "m-1", kind).await.unwrap();
        }

        let meeting = env.store.get_meeting("m-1").unwrap().unwrap();
        assert_eq!(meeting.status, SyncStatus::Synced);
        assert!(meeting.last_error.is_none());

        let files = env.store.list_files("m-1").unwrap();
        assert_eq!(files.len(), 4);
        assert!(files.iter().all(|f| f.status == FileStatus::Downloaded));
    }

    #[tokio::test]
    async fn test_audio_job_without_url_is_bad_request() {
        let env = test_env(ScriptedRemote::new().with_detail(detail("m-1")));
        insert_meeting(&env, "m-1", false);

        let err = run_job(&env, "m-1", FileKind::Audio).await.unwrap_err();
        assert!(matches!(err, SyncError::BadRequest(_)));

        let meeting = env.store.get_meeting("m-1").unwrap().unwrap();
        assert_eq!(meeting.status, SyncStatus::Failed);
        assert!(meeting.last_error.unwrap().contains("no audio url"));
    }

    #[tokio::test]
    async fn test_remote_failure_marks_file_and_meeting_failed() {
        let env = test_env(ScriptedRemote::new().with_detail(detail("m-1")));
        insert_meeting(&env, "m-1", true);
        env.remote
            .fail_meeting("m-1", SyncError::Network("connection reset".to_string()));

        let err = run_job(&env, "m-1", FileKind::TranscriptDoc).await.unwrap_err();
        assert!(matches!(err, SyncError::Network(_)));

        let record = env
            .store
            .get_file("m-1", FileKind::TranscriptDoc)
            .unwrap()
            .unwrap();
        assert_eq!(record.status, FileStatus::Failed);
        assert!(record.error_message.unwrap().contains("connection reset"));

        let meeting = env.store.get_meeting("m-1").unwrap().unwrap();
        assert_eq!(meeting.status, SyncStatus::Failed);
        assert!(meeting.last_error.unwrap().contains("connection reset"));
    }

    #[tokio::test]
    async fn test_cancelled_job_resets_file_record() {
        let env = test_env(ScriptedRemote::new().with_detail(detail("m-1")));
        insert_meeting(&env, "m-1", true);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = env
            .processor
            .process(
                &JobKey::new("m-1", FileKind::Audio),
                noop_progress(),
                cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));

        let record = env.store.get_file("m-1", FileKind::Audio).unwrap().unwrap();
        assert_eq!(record.status, FileStatus::NotDownloaded);
        assert!(record.error_message.is_none());

        // Nothing else in flight, so the meeting settles back to not synced.
        let meeting = env.store.get_meeting("m-1").unwrap().unwrap();
        assert_eq!(meeting.status, SyncStatus::NotSynced);
    }

    #[tokio::test]
    async fn test_unknown_meeting_is_bad_request() {
        let env = test_env(ScriptedRemote::new());

        let err = run_job(&env, "ghost", FileKind::Summary).await.unwrap_err();
        assert!(matches!(err, SyncError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_transcript_json_contains_sentences() {
        let env = test_env(ScriptedRemote::new().with_detail(detail("m-1")));
        let meeting = insert_meeting(&env, "m-1", true);

        run_job(&env, "m-1", FileKind::TranscriptJson).await.unwrap();

        let rel = artifact_path(&meeting, FileKind::TranscriptJson);
        let parsed: serde_json::Value =
            serde_json::from_slice(&env.storage.read_file(&rel).unwrap()).unwrap();
        assert_eq!(parsed["id"], "m-1");
        assert_eq!(parsed["sentences"][0]["speaker_name"], "Ana");
    }
}
