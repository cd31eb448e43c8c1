//! Download engine contract and request-id derivation

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::Result;

/// Namespace for requests created by the offline engine
pub const REQUEST_ID_PREFIX: &str = "offtune:song:";

/// Deterministic request id for a song
pub fn request_id_for(song_id: &str) -> String {
    format!("{}{}", REQUEST_ID_PREFIX, song_id)
}

/// Recover the song id, `None` for requests we did not create
pub fn song_id_from_request(request_id: &str) -> Option<&str> {
    request_id
        .strip_prefix(REQUEST_ID_PREFIX)
        .filter(|id| !id.is_empty())
}

/// Lifecycle of one download request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Queued,
    Downloading,
    Completed,
    Failed,
}

/// What we hand the engine for one song; not persisted on our side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub song_id: String,
    pub uri: String,
}

/// Notification from the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Changed {
        request_id: String,
        state: RequestState,
    },
    Removed {
        request_id: String,
    },
}

/// The subsystem that moves bytes and owns request state
#[async_trait]
pub trait DownloadEngine: Send + Sync {
    /// Current state of a request, `None` if unknown
    async fn state(&self, request_id: &str) -> Result<Option<RequestState>>;

    async fn enqueue(&self, request_id: &str, request: DownloadRequest) -> Result<()>;

    /// Cancel if in flight and forget the request and its bytes
    async fn cancel_and_remove(&self, request_id: &str) -> Result<()>;

    /// Authoritative index of every request
    async fn list_requests(&self) -> Result<Vec<(String, RequestState)>>;

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent>;
}
