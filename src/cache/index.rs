//! Persisted request index for the local cache

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

use crate::error::{Error, Result};
use crate::offline::RequestState;

const INDEX_FILE: &str = ".offtune-index.json";
const INDEX_VERSION: u32 = 1;

/// Every request the cache knows about, keyed by request id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheIndex {
    /// Index format version
    pub version: u32,
    /// Last time any entry changed
    pub updated_at: DateTime<Utc>,
    pub requests: BTreeMap<String, IndexEntry>,
}

/// One download request and where its bytes ended up
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub song_id: String,
    /// Stream URL the bytes come from
    pub uri: String,
    pub state: RequestState,
    /// File path relative to the cache root, once completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    pub queued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Why the last attempt failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IndexEntry {
    pub fn queued(song_id: &str, uri: &str) -> Self {
        Self {
            song_id: song_id.to_string(),
            uri: uri.to_string(),
            state: RequestState::Queued,
            file: None,
            bytes: None,
            queued_at: Utc::now(),
            completed_at: None,
            error: None,
        }
    }
}

impl Default for CacheIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheIndex {
    pub fn new() -> Self {
        Self {
            version: INDEX_VERSION,
            updated_at: Utc::now(),
            requests: BTreeMap::new(),
        }
    }

    /// Load the index from the cache root, `None` if there is none yet
    pub fn load(root: &Path) -> Result<Option<Self>> {
        let index_path = root.join(INDEX_FILE);

        if !index_path.exists() {
            debug!("No cache index at {}", index_path.display());
            return Ok(None);
        }

        let content = std::fs::read_to_string(&index_path)?;
        let index: Self = serde_json::from_str(&content)?;

        if index.version > INDEX_VERSION {
            return Err(Error::Storage(format!(
                "cache index version {} is newer than supported version {}",
                index.version, INDEX_VERSION
            )));
        }

        debug!("Loaded cache index: {} requests", index.requests.len());
        Ok(Some(index))
    }

    /// Write the index through a temporary file so readers never see half of it
    pub fn save(&self, root: &Path) -> Result<()> {
        let index_path = root.join(INDEX_FILE);
        let tmp_path = root.join(format!("{}.tmp", INDEX_FILE));

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&tmp_path, content)?;
        std::fs::rename(&tmp_path, &index_path)?;

        debug!("Saved cache index to {}", index_path.display());
        Ok(())
    }

    pub fn get(&self, request_id: &str) -> Option<&IndexEntry> {
        self.requests.get(request_id)
    }

    pub fn get_mut(&mut self, request_id: &str) -> Option<&mut IndexEntry> {
        self.updated_at = Utc::now();
        self.requests.get_mut(request_id)
    }

    /// Insert or replace an entry
    pub fn insert(&mut self, request_id: &str, entry: IndexEntry) {
        self.requests.insert(request_id.to_string(), entry);
        self.updated_at = Utc::now();
    }

    pub fn remove(&mut self, request_id: &str) -> Option<IndexEntry> {
        let removed = self.requests.remove(request_id);
        if removed.is_some() {
            self.updated_at = Utc::now();
        }
        removed
    }

    /// Requests a previous process left unfinished
    pub fn unfinished(&self) -> Vec<String> {
        self.requests
            .iter()
            .filter(|(_, e)| matches!(e.state, RequestState::Queued | RequestState::Downloading))
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn states(&self) -> Vec<(String, RequestState)> {
        self.requests
            .iter()
            .map(|(id, e)| (id.clone(), e.state))
            .collect()
    }
}
