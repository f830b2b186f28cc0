//! Scripted in-process implementation of the remote API.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use meetvault::error::SyncError;
use meetvault::remote::{ChunkProgressFn, ConnectionProbe, RemoteApi, RemoteMeeting};

/// Payload served for every audio download.
pub const AUDIO_BYTES: &[u8] = b"ID3\x03scripted vault audio payload";

/// Remote stub backed by a fixed catalog, newest first. Pages like the real
/// API, serves details for every listed meeting, and can be told to fail
/// detail fetches per meeting id.
pub struct ScriptedRemote {
    catalog: Mutex<Vec<RemoteMeeting>>,
    detail_failures: Mutex<HashMap<String, String>>,
    pub list_calls: AtomicUsize,
    pub detail_calls: AtomicUsize,
    pub download_calls: AtomicUsize,
}

impl ScriptedRemote {
    pub fn new(catalog: Vec<RemoteMeeting>) -> Self {
        Self {
            catalog: Mutex::new(catalog),
            detail_failures: Mutex::new(HashMap::new()),
            list_calls: AtomicUsize::new(0),
            detail_calls: AtomicUsize::new(0),
            download_calls: AtomicUsize::new(0),
        }
    }

    /// Publish a meeting as the newest catalog entry.
    pub fn publish(&self, meeting: RemoteMeeting) {
        self.catalog.lock().unwrap().insert(0, meeting);
    }

    /// Change the title of a catalog entry in place.
    pub fn retitle(&self, id: &str, title: &str) {
        let mut catalog = self.catalog.lock().unwrap();
        if let Some(meeting) = catalog.iter_mut().find(|m| m.id == id) {
            meeting.title = Some(title.to_string());
        }
    }

    /// Every detail fetch for `id` fails with a network error until
    /// [`ScriptedRemote::clear_failures`] is called.
    pub fn fail_details(&self, id: &str, message: &str) {
        self.detail_failures
            .lock()
            .unwrap()
            .insert(id.to_string(), message.to_string());
    }

    pub fn clear_failures(&self) {
        self.detail_failures.lock().unwrap().clear();
    }
}

#[async_trait]
impl RemoteApi for ScriptedRemote {
    async fn list_meetings(&self, limit: u32, skip: u32) -> Result<Vec<RemoteMeeting>, SyncError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let catalog = self.catalog.lock().unwrap();
        Ok(catalog
            .iter()
            .skip(skip as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn get_meeting(&self, id: &str) -> Result<RemoteMeeting, SyncError> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.detail_failures.lock().unwrap().get(id) {
            return Err(SyncError::Network(message.clone()));
        }
        let catalog = self.catalog.lock().unwrap();
        catalog
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| SyncError::BadRequest(format!("Meeting {} not found upstream", id)))
    }

    async fn test_connection(&self) -> ConnectionProbe {
        ConnectionProbe {
            ok: true,
            detail: "scripted remote".to_string(),
        }
    }

    async fn download_to_file(
        &self,
        _url: &str,
        dest: &Path,
        on_chunk: ChunkProgressFn,
        cancel: CancellationToken,
    ) -> Result<u64, SyncError> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(SyncError::from)?;
        }
        std::fs::write(dest, AUDIO_BYTES).map_err(SyncError::from)?;
        let total = AUDIO_BYTES.len() as u64;
        on_chunk(total, Some(total));
        Ok(total)
    }
}
