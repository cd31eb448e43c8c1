//! Download engine backed by a local directory
//!
//! Requests are persisted in the cache index before any bytes move, so a
//! restarted process picks up whatever was queued or in flight.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::index::{CacheIndex, IndexEntry};
use super::storage::CacheStorage;
use crate::error::{Error, Result};
use crate::offline::engine::request_id_for;
use crate::offline::{DownloadEngine, DownloadRequest, EngineEvent, RequestState};
use crate::subsonic::SubsonicResponse;

const EVENT_CAPACITY: usize = 256;

struct State {
    index: CacheIndex,
    // request id -> (generation, task)
    tasks: HashMap<String, (u64, JoinHandle<()>)>,
    generation: u64,
}

impl State {
    fn is_current(&self, request_id: &str, generation: u64) -> bool {
        self.tasks.get(request_id).map(|(g, _)| *g) == Some(generation)
    }
}

struct Inner {
    storage: CacheStorage,
    state: Mutex<State>,
    http_client: reqwest::Client,
    permits: Arc<Semaphore>,
    events: broadcast::Sender<EngineEvent>,
}

/// Downloads songs into a cache directory, a bounded number at a time
pub struct LocalDownloadEngine {
    inner: Arc<Inner>,
}

impl LocalDownloadEngine {
    /// Open the cache at `root`, creating it if needed, and resume unfinished requests
    pub async fn open(root: impl Into<PathBuf>, parallel_downloads: usize) -> Result<Self> {
        let storage = CacheStorage::new(root.into());
        storage.init().await?;

        let index = CacheIndex::load(storage.root())?.unwrap_or_default();
        let http_client = reqwest::Client::builder()
            .user_agent("offtune/0.1.0")
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Engine(format!("Failed to create HTTP client: {}", e)))?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let inner = Arc::new(Inner {
            storage,
            state: Mutex::new(State {
                index,
                tasks: HashMap::new(),
                generation: 0,
            }),
            http_client,
            permits: Arc::new(Semaphore::new(parallel_downloads.max(1))),
            events,
        });

        {
            let mut state = inner.state.lock().await;
            let unfinished = state.index.unfinished();
            if !unfinished.is_empty() {
                info!("Resuming {} unfinished downloads", unfinished.len());
            }
            for request_id in unfinished {
                if let Some(entry) = state.index.get_mut(&request_id) {
                    entry.state = RequestState::Queued;
                }
                inner.spawn(&mut state, request_id);
            }
            state.index.save(inner.storage.root())?;
        }

        Ok(Self { inner })
    }

    pub fn root(&self) -> &Path {
        self.inner.storage.root()
    }

    /// Local file of a completed song
    pub async fn path_for(&self, song_id: &str) -> Option<PathBuf> {
        let state = self.inner.state.lock().await;
        state
            .index
            .get(&request_id_for(song_id))
            .filter(|e| e.state == RequestState::Completed)
            .and_then(|e| e.file.as_deref())
            .map(|file| self.inner.storage.resolve(file))
    }

    /// Size on disk of every completed song
    pub async fn total_bytes(&self) -> u64 {
        let state = self.inner.state.lock().await;
        state.index.requests.values().filter_map(|e| e.bytes).sum()
    }
}

impl Drop for LocalDownloadEngine {
    fn drop(&mut self) {
        // In-flight requests stay `Downloading` in the index and resume on next open
        if let Ok(mut state) = self.inner.state.try_lock() {
            for (_, (_, task)) in state.tasks.drain() {
                task.abort();
            }
        }
    }
}

impl Inner {
    fn emit(&self, request_id: &str, state: RequestState) {
        let _ = self.events.send(EngineEvent::Changed {
            request_id: request_id.to_string(),
            state,
        });
    }

    fn spawn(self: &Arc<Self>, state: &mut State, request_id: String) {
        state.generation += 1;
        let generation = state.generation;

        let inner = self.clone();
        let id = request_id.clone();
        let task = tokio::spawn(async move { inner.run(id, generation).await });

        if let Some((_, previous)) = state.tasks.insert(request_id, (generation, task)) {
            previous.abort();
        }
    }

    async fn run(self: Arc<Self>, request_id: String, generation: u64) {
        let Ok(_permit) = self.permits.clone().acquire_owned().await else {
            return;
        };

        let (song_id, uri) = {
            let mut state = self.state.lock().await;
            if !state.is_current(&request_id, generation) {
                return;
            }
            let Some(entry) = state.index.get_mut(&request_id) else {
                return;
            };
            entry.state = RequestState::Downloading;
            let claimed = (entry.song_id.clone(), entry.uri.clone());
            if let Err(e) = state.index.save(self.storage.root()) {
                warn!("Failed to save cache index: {}", e);
            }
            claimed
        };
        self.emit(&request_id, RequestState::Downloading);
        debug!("Downloading song {}", song_id);

        let result = match self.fetch(&uri).await {
            Ok((data, extension)) => {
                let file = self.storage.song_file(&song_id, extension);
                self.storage
                    .write_partial(&file, &data)
                    .await
                    .map(|()| (file, data.len() as u64))
            }
            Err(e) => Err(e),
        };

        let mut state = self.state.lock().await;
        if !state.is_current(&request_id, generation) {
            // Cancelled or superseded while the bytes were in flight
            if let Ok((file, _)) = &result {
                let _ = self.storage.remove(file).await;
            }
            return;
        }
        state.tasks.remove(&request_id);

        let finished = match result {
            Ok((file, bytes)) => self.storage.promote(&file).await.map(|_| (file, bytes)),
            Err(e) => Err(e),
        };

        let Some(entry) = state.index.get_mut(&request_id) else {
            return;
        };
        let new_state = match finished {
            Ok((file, bytes)) => {
                info!("Downloaded {} ({} bytes)", song_id, bytes);
                entry.file = Some(file);
                entry.bytes = Some(bytes);
                entry.completed_at = Some(Utc::now());
                entry.error = None;
                RequestState::Completed
            }
            Err(e) => {
                warn!("Download of {} failed: {}", song_id, e);
                entry.error = Some(e.to_string());
                RequestState::Failed
            }
        };
        entry.state = new_state;

        if let Err(e) = state.index.save(self.storage.root()) {
            warn!("Failed to save cache index: {}", e);
        }
        drop(state);

        self.emit(&request_id, new_state);
    }

    /// Fetch a stream URL, rejecting Subsonic error envelopes
    async fn fetch(&self, uri: &str) -> Result<(Bytes, &'static str)> {
        let response = self
            .http_client
            .get(uri)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::Engine(format!("Failed to download: {}", e)))?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let data = response
            .bytes()
            .await
            .map_err(|e| Error::Engine(format!("Failed to read download response: {}", e)))?;

        check_body(&content_type, &data)?;
        Ok((data, extension_for(&content_type)))
    }
}

/// A stream endpoint answers errors with a JSON envelope instead of audio
fn check_body(content_type: &str, data: &[u8]) -> Result<()> {
    if content_type.contains("json") {
        if let Ok(response) = serde_json::from_slice::<SubsonicResponse<()>>(data) {
            if let Some(err) = response.subsonic_response.error {
                return Err(Error::Engine(format!(
                    "Server refused download: {} (code {})",
                    err.message, err.code
                )));
            }
        }
        return Err(Error::Engine(
            "Server answered with JSON instead of audio".to_string(),
        ));
    }
    if data.is_empty() {
        return Err(Error::Engine("Server sent an empty file".to_string()));
    }
    Ok(())
}

fn extension_for(content_type: &str) -> &'static str {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase();
    match mime.as_str() {
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/flac" | "audio/x-flac" => "flac",
        "audio/ogg" | "application/ogg" => "ogg",
        "audio/opus" => "opus",
        "audio/mp4" | "audio/aac" | "audio/x-m4a" => "m4a",
        "audio/wav" | "audio/x-wav" => "wav",
        _ => "bin",
    }
}

#[async_trait]
impl DownloadEngine for LocalDownloadEngine {
    async fn state(&self, request_id: &str) -> Result<Option<RequestState>> {
        let state = self.inner.state.lock().await;
        Ok(state.index.get(request_id).map(|e| e.state))
    }

    async fn enqueue(&self, request_id: &str, request: DownloadRequest) -> Result<()> {
        let mut state = self.inner.state.lock().await;

        if let Some(existing) = state.index.get(request_id) {
            if existing.state != RequestState::Failed {
                debug!("Request {} already {:?}", request_id, existing.state);
                return Ok(());
            }
        }

        state
            .index
            .insert(request_id, IndexEntry::queued(&request.song_id, &request.uri));
        state.index.save(self.inner.storage.root())?;
        self.inner.spawn(&mut state, request_id.to_string());
        drop(state);

        debug!("Queued {}", request_id);
        self.inner.emit(request_id, RequestState::Queued);
        Ok(())
    }

    async fn cancel_and_remove(&self, request_id: &str) -> Result<()> {
        let mut state = self.inner.state.lock().await;

        if let Some((_, task)) = state.tasks.remove(request_id) {
            task.abort();
        }
        let Some(entry) = state.index.remove(request_id) else {
            return Ok(());
        };

        let file = entry
            .file
            .unwrap_or_else(|| self.inner.storage.song_file(&entry.song_id, "bin"));
        self.inner.storage.remove(&file).await?;
        state.index.save(self.inner.storage.root())?;
        drop(state);

        info!("Removed {} from cache", entry.song_id);
        let _ = self.inner.events.send(EngineEvent::Removed {
            request_id: request_id.to_string(),
        });
        Ok(())
    }

    async fn list_requests(&self) -> Result<Vec<(String, RequestState)>> {
        let state = self.inner.state.lock().await;
        Ok(state.index.states())
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }
}
