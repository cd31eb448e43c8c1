//! In-memory collaborators for tests

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::catalog::{CatalogApi, CatalogSong, PlaylistRef};
use super::engine::{
    DownloadEngine, DownloadRequest, EngineEvent, RequestState, request_id_for,
    song_id_from_request,
};
use super::CollectionKind;
use crate::error::{Error, Result};

pub fn song(id: &str) -> CatalogSong {
    CatalogSong {
        id: id.to_string(),
        title: format!("Song {}", id),
        stream_url: Some(format!("https://music.test/rest/stream?id={}", id)),
    }
}

pub fn song_without_url(id: &str) -> CatalogSong {
    CatalogSong {
        stream_url: None,
        ..song(id)
    }
}

/// Playlist mutations seen by [`FakeCatalog`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogCall {
    Add(String, Vec<String>),
    Remove(String, Vec<String>),
}

#[derive(Default)]
struct CatalogState {
    collections: HashMap<(CollectionKind, String), Vec<CatalogSong>>,
    favourites: BTreeSet<String>,
    // id -> (name, songs)
    playlists: BTreeMap<String, (String, Vec<String>)>,
    page_requests: Vec<usize>,
    fail_page_at: Option<usize>,
    failing: HashSet<&'static str>,
    mutations: Vec<CatalogCall>,
    created: usize,
}

pub struct FakeCatalog {
    state: Mutex<CatalogState>,
    create_returns_id: AtomicBool,
}

impl FakeCatalog {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CatalogState::default()),
            create_returns_id: AtomicBool::new(true),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut CatalogState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    fn check(&self, op: &'static str) -> anyhow::Result<()> {
        if self.with(|s| s.failing.contains(op)) {
            anyhow::bail!("{} unavailable", op);
        }
        Ok(())
    }

    pub fn add_collection(&self, kind: CollectionKind, id: &str, songs: Vec<CatalogSong>) {
        self.with(|s| s.collections.insert((kind, id.to_string()), songs));
    }

    pub fn add_playlist(&self, id: &str, name: &str, songs: &[&str]) {
        let songs = songs.iter().map(|s| s.to_string()).collect();
        self.with(|s| s.playlists.insert(id.to_string(), (name.to_string(), songs)));
    }

    pub fn set_favourites(&self, ids: &[&str]) {
        self.with(|s| s.favourites = ids.iter().map(|i| i.to_string()).collect());
    }

    pub fn fail(&self, op: &'static str) {
        self.with(|s| s.failing.insert(op));
    }

    pub fn recover(&self, op: &'static str) {
        self.with(|s| s.failing.remove(op));
    }

    pub fn fail_page_at(&self, start: usize) {
        self.with(|s| s.fail_page_at = Some(start));
    }

    pub fn create_returns_id(&self, returns: bool) {
        self.create_returns_id.store(returns, Ordering::SeqCst);
    }

    pub fn page_requests(&self) -> Vec<usize> {
        self.with(|s| s.page_requests.clone())
    }

    pub fn mutations(&self) -> Vec<CatalogCall> {
        self.with(|s| s.mutations.clone())
    }

    pub fn created_count(&self) -> usize {
        self.with(|s| s.created)
    }

    pub fn playlist_members(&self, id: &str) -> BTreeSet<String> {
        self.with(|s| {
            s.playlists
                .get(id)
                .map(|(_, songs)| songs.iter().cloned().collect())
                .unwrap_or_default()
        })
    }

    pub fn playlist_name(&self, id: &str) -> Option<String> {
        self.with(|s| s.playlists.get(id).map(|(name, _)| name.clone()))
    }
}

#[async_trait]
impl CatalogApi for FakeCatalog {
    async fn fetch_songs(
        &self,
        kind: CollectionKind,
        collection_id: &str,
        start: usize,
        limit: usize,
    ) -> anyhow::Result<Vec<CatalogSong>> {
        self.check("fetch_songs")?;
        self.with(|s| {
            s.page_requests.push(start);
            if s.fail_page_at == Some(start) {
                anyhow::bail!("page at {} timed out", start);
            }
            let songs = s
                .collections
                .get(&(kind, collection_id.to_string()))
                .ok_or_else(|| anyhow::anyhow!("{} {} not found", kind, collection_id))?;
            Ok(songs.iter().skip(start).take(limit).cloned().collect())
        })
    }

    async fn favourite_song_ids(&self) -> anyhow::Result<BTreeSet<String>> {
        self.check("favourite_song_ids")?;
        Ok(self.with(|s| s.favourites.clone()))
    }

    async fn find_playlists(&self, name: &str) -> anyhow::Result<Vec<PlaylistRef>> {
        self.check("find_playlists")?;
        let needle = name.to_lowercase();
        Ok(self.with(|s| {
            s.playlists
                .iter()
                .filter(|(_, (n, _))| n.to_lowercase().contains(&needle))
                .map(|(id, (n, _))| PlaylistRef {
                    id: id.clone(),
                    name: n.clone(),
                })
                .collect()
        }))
    }

    async fn create_playlist(&self, name: &str) -> anyhow::Result<Option<String>> {
        self.check("create_playlist")?;
        // Let racing callers interleave
        tokio::time::sleep(Duration::from_millis(10)).await;
        let id = self.with(|s| {
            s.created += 1;
            let id = format!("pl-{}", s.created);
            s.playlists.insert(id.clone(), (name.to_string(), Vec::new()));
            id
        });
        Ok(self.create_returns_id.load(Ordering::SeqCst).then_some(id))
    }

    async fn playlist_song_ids(&self, playlist_id: &str) -> anyhow::Result<Vec<String>> {
        self.check("playlist_song_ids")?;
        self.with(|s| {
            s.playlists
                .get(playlist_id)
                .map(|(_, songs)| songs.clone())
                .ok_or_else(|| anyhow::anyhow!("playlist {} not found", playlist_id))
        })
    }

    async fn add_to_playlist(&self, playlist_id: &str, song_ids: &[String]) -> anyhow::Result<()> {
        self.check("add_to_playlist")?;
        self.with(|s| {
            s.mutations
                .push(CatalogCall::Add(playlist_id.to_string(), song_ids.to_vec()));
            if let Some((_, songs)) = s.playlists.get_mut(playlist_id) {
                songs.extend(song_ids.iter().cloned());
            }
        });
        Ok(())
    }

    async fn remove_from_playlist(
        &self,
        playlist_id: &str,
        song_ids: &[String],
    ) -> anyhow::Result<()> {
        self.check("remove_from_playlist")?;
        self.with(|s| {
            s.mutations
                .push(CatalogCall::Remove(playlist_id.to_string(), song_ids.to_vec()));
            if let Some((_, songs)) = s.playlists.get_mut(playlist_id) {
                songs.retain(|id| !song_ids.contains(id));
            }
        });
        Ok(())
    }

    async fn set_favourite(&self, song_id: &str, favourite: bool) -> anyhow::Result<()> {
        self.check("set_favourite")?;
        self.with(|s| {
            if favourite {
                s.favourites.insert(song_id.to_string());
            } else {
                s.favourites.remove(song_id);
            }
        });
        Ok(())
    }
}

#[derive(Default)]
struct EngineState {
    // request id -> (uri, state)
    requests: BTreeMap<String, (String, RequestState)>,
    enqueued: Vec<String>,
    removed: Vec<String>,
    fail_enqueue: HashSet<String>,
    fail_remove: HashSet<String>,
}

/// Download engine that never moves bytes; tests drive state changes
pub struct FakeEngine {
    state: Mutex<EngineState>,
    events: broadcast::Sender<EngineEvent>,
    fail_listing: AtomicBool,
}

impl FakeEngine {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(EngineState::default()),
            events,
            fail_listing: AtomicBool::new(false),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut EngineState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    /// Move a song's request to `state` and notify subscribers
    pub fn set_state(&self, song_id: &str, state: RequestState) {
        let request_id = request_id_for(song_id);
        let known = self.with(|s| match s.requests.get_mut(&request_id) {
            Some(entry) => {
                entry.1 = state;
                true
            }
            None => false,
        });
        if known {
            let _ = self.events.send(EngineEvent::Changed { request_id, state });
        }
    }

    pub fn fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    pub fn fail_enqueue_of(&self, song_id: &str) {
        self.with(|s| s.fail_enqueue.insert(song_id.to_string()));
    }

    /// Make `cancel_and_remove` refuse this song until recovered
    pub fn fail_remove_of(&self, song_id: &str) {
        self.with(|s| s.fail_remove.insert(song_id.to_string()));
    }

    pub fn recover_remove_of(&self, song_id: &str) {
        self.with(|s| s.fail_remove.remove(song_id));
    }

    /// Song ids in enqueue order, including retries
    pub fn enqueued(&self) -> Vec<String> {
        self.with(|s| s.enqueued.clone())
    }

    /// Song ids passed to `cancel_and_remove`, in call order
    pub fn removed(&self) -> Vec<String> {
        self.with(|s| s.removed.clone())
    }

    pub fn live_requests(&self) -> usize {
        self.with(|s| s.requests.len())
    }

    pub fn uri_of(&self, song_id: &str) -> Option<String> {
        self.with(|s| s.requests.get(&request_id_for(song_id)).map(|(uri, _)| uri.clone()))
    }
}

#[async_trait]
impl DownloadEngine for FakeEngine {
    async fn state(&self, request_id: &str) -> Result<Option<RequestState>> {
        Ok(self.with(|s| s.requests.get(request_id).map(|(_, state)| *state)))
    }

    async fn enqueue(&self, request_id: &str, request: DownloadRequest) -> Result<()> {
        self.with(|s| {
            if s.fail_enqueue.contains(&request.song_id) {
                return Err(Error::Engine(format!("disk full for {}", request.song_id)));
            }
            s.requests
                .insert(request_id.to_string(), (request.uri, RequestState::Queued));
            s.enqueued.push(request.song_id);
            Ok(())
        })?;
        let _ = self.events.send(EngineEvent::Changed {
            request_id: request_id.to_string(),
            state: RequestState::Queued,
        });
        Ok(())
    }

    async fn cancel_and_remove(&self, request_id: &str) -> Result<()> {
        self.with(|s| {
            let song = song_id_from_request(request_id).unwrap_or(request_id);
            if s.fail_remove.contains(song) {
                return Err(Error::Engine(format!("{} is locked", song)));
            }
            s.requests.remove(request_id);
            s.removed.push(song.to_string());
            Ok(())
        })?;
        let _ = self.events.send(EngineEvent::Removed {
            request_id: request_id.to_string(),
        });
        Ok(())
    }

    async fn list_requests(&self) -> Result<Vec<(String, RequestState)>> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(Error::Engine("index unreadable".to_string()));
        }
        Ok(self.with(|s| {
            s.requests
                .iter()
                .map(|(id, (_, state))| (id.clone(), *state))
                .collect()
        }))
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}
