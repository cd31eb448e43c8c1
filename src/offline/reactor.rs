//! Background task that keeps the downloaded-state streams current
//!
//! One task owns every recomputation. Engine notifications, membership
//! changes and explicit refresh requests are all consumed by the same
//! `select!` loop, so two recomputations never race. Every engine-driven
//! recompute rescans the engine's full index instead of patching the last
//! snapshot.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::completion::{CompletionMap, completion_map, downloaded_songs};
use super::engine::{DownloadEngine, EngineEvent};
use super::metadata::MetadataStore;
use super::{CollectionKind, Memberships};

/// Shared snapshot of downloaded song ids
pub type SongSet = Arc<BTreeSet<String>>;

struct Published {
    songs: watch::Sender<SongSet>,
    albums: watch::Sender<Arc<CompletionMap>>,
    playlists: watch::Sender<Arc<CompletionMap>>,
}

/// Asks the reactor for a rescan. Requests coalesce while one is pending.
#[derive(Clone)]
pub struct RefreshTrigger {
    tx: mpsc::Sender<()>,
}

impl RefreshTrigger {
    pub fn refresh(&self) {
        // Full means a rescan is already queued
        let _ = self.tx.try_send(());
    }
}

/// Owns the reactor task; dropping it cancels the subscription
pub struct ReactorHandle {
    published: Arc<Published>,
    trigger: RefreshTrigger,
    task: JoinHandle<()>,
}

impl ReactorHandle {
    /// Start listening to `engine` and to membership changes in `metadata`
    pub fn spawn(engine: Arc<dyn DownloadEngine>, metadata: &MetadataStore) -> Self {
        let published = Arc::new(Published {
            songs: watch::Sender::new(SongSet::default()),
            albums: watch::Sender::new(Arc::default()),
            playlists: watch::Sender::new(Arc::default()),
        });
        let (tx, rx) = mpsc::channel(1);

        // Subscribe before the first scan so nothing slips between them
        let events = engine.subscribe();
        let reactor = Reactor {
            engine,
            events,
            refresh: rx,
            albums: metadata.subscribe(CollectionKind::Album),
            playlists: metadata.subscribe(CollectionKind::Playlist),
            published: published.clone(),
            downloaded: SongSet::default(),
        };
        let task = tokio::spawn(reactor.run());

        Self {
            published,
            trigger: RefreshTrigger { tx },
            task,
        }
    }

    pub fn trigger(&self) -> RefreshTrigger {
        self.trigger.clone()
    }

    pub fn refresh(&self) {
        self.trigger.refresh();
    }

    /// Song ids whose download completed. New receivers see the latest value.
    pub fn downloaded_songs(&self) -> watch::Receiver<SongSet> {
        self.published.songs.subscribe()
    }

    pub fn downloaded_albums(&self) -> watch::Receiver<Arc<CompletionMap>> {
        self.published.albums.subscribe()
    }

    pub fn downloaded_playlists(&self) -> watch::Receiver<Arc<CompletionMap>> {
        self.published.playlists.subscribe()
    }

    pub fn collections(&self, kind: CollectionKind) -> watch::Receiver<Arc<CompletionMap>> {
        match kind {
            CollectionKind::Album => self.downloaded_albums(),
            CollectionKind::Playlist => self.downloaded_playlists(),
        }
    }

    pub fn shutdown(self) {
        // Drop does the work
    }
}

impl Drop for ReactorHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct Reactor {
    engine: Arc<dyn DownloadEngine>,
    events: broadcast::Receiver<EngineEvent>,
    refresh: mpsc::Receiver<()>,
    albums: watch::Receiver<Arc<Memberships>>,
    playlists: watch::Receiver<Arc<Memberships>>,
    published: Arc<Published>,
    downloaded: SongSet,
}

enum Wake {
    Rescan,
    Memberships,
    Stop,
}

impl Reactor {
    async fn run(mut self) {
        info!("Download state reactor started");
        self.rescan().await;

        let mut engine_open = true;
        let mut albums_open = true;
        let mut playlists_open = true;

        loop {
            let wake = tokio::select! {
                cmd = self.refresh.recv() => match cmd {
                    Some(()) => Wake::Rescan,
                    None => Wake::Stop,
                },
                event = self.events.recv(), if engine_open => match event {
                    Ok(event) => {
                        debug!("Engine event: {:?}", event);
                        Wake::Rescan
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        debug!("Missed {} engine events, rescanning", missed);
                        Wake::Rescan
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("Download engine closed its event stream");
                        engine_open = false;
                        continue;
                    }
                },
                changed = self.albums.changed(), if albums_open => {
                    albums_open = changed.is_ok();
                    Wake::Memberships
                }
                changed = self.playlists.changed(), if playlists_open => {
                    playlists_open = changed.is_ok();
                    Wake::Memberships
                }
            };

            match wake {
                Wake::Rescan => self.rescan().await,
                Wake::Memberships => self.publish_completion(),
                Wake::Stop => break,
            }
        }

        info!("Download state reactor stopped");
    }

    /// Rebuild the downloaded set from the engine's index
    async fn rescan(&mut self) {
        match self.engine.list_requests().await {
            Ok(requests) => {
                let songs = downloaded_songs(&requests);
                if *self.downloaded != songs {
                    debug!("{} songs downloaded", songs.len());
                    self.downloaded = Arc::new(songs);
                    self.published.songs.send_replace(self.downloaded.clone());
                }
            }
            Err(e) => {
                warn!("Failed to read download index, keeping last snapshot: {}", e);
            }
        }
        self.publish_completion();
    }

    /// Join the current memberships with the current downloaded set
    fn publish_completion(&mut self) {
        let albums = completion_map(&self.albums.borrow_and_update(), &self.downloaded);
        let playlists = completion_map(&self.playlists.borrow_and_update(), &self.downloaded);

        publish_if_changed(&self.published.albums, albums);
        publish_if_changed(&self.published.playlists, playlists);
    }
}

fn publish_if_changed(tx: &watch::Sender<Arc<CompletionMap>>, next: CompletionMap) {
    tx.send_if_modified(|current| {
        if **current == next {
            false
        } else {
            *current = Arc::new(next);
            true
        }
    });
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::offline::engine::{DownloadRequest, RequestState, request_id_for};
    use crate::offline::kv::MemoryStore;
    use crate::offline::testing::FakeEngine;

    const WAIT: Duration = Duration::from_secs(5);

    async fn setup() -> (Arc<FakeEngine>, MetadataStore) {
        let engine = Arc::new(FakeEngine::new());
        let metadata = MetadataStore::open(Arc::new(MemoryStore::new())).await.unwrap();
        (engine, metadata)
    }

    async fn enqueue(engine: &FakeEngine, song: &str) {
        engine
            .enqueue(
                &request_id_for(song),
                DownloadRequest {
                    song_id: song.to_string(),
                    uri: format!("https://host/stream?id={}", song),
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_album_completion_follows_engine() {
        let (engine, metadata) = setup().await;
        metadata
            .set(CollectionKind::Album, "album-1", ["s1".to_string(), "s2".to_string()])
            .await
            .unwrap();
        enqueue(&engine, "s1").await;
        enqueue(&engine, "s2").await;

        let reactor = ReactorHandle::spawn(engine.clone(), &metadata);
        let mut albums = reactor.downloaded_albums();

        engine.set_state("s1", RequestState::Completed);
        let snapshot = tokio::time::timeout(WAIT, albums.wait_for(|m| m.get("album-1") == Some(&false)))
            .await
            .unwrap()
            .unwrap()
            .clone();
        assert_eq!(snapshot.get("album-1"), Some(&false));

        engine.set_state("s2", RequestState::Completed);
        tokio::time::timeout(WAIT, albums.wait_for(|m| m.get("album-1") == Some(&true)))
            .await
            .unwrap()
            .unwrap();

        let songs = reactor.downloaded_songs();
        assert_eq!(songs.borrow().len(), 2);
    }

    #[tokio::test]
    async fn test_membership_change_alone_recomputes() {
        let (engine, metadata) = setup().await;
        enqueue(&engine, "s1").await;
        engine.set_state("s1", RequestState::Completed);

        let reactor = ReactorHandle::spawn(engine.clone(), &metadata);
        let mut songs = reactor.downloaded_songs();
        tokio::time::timeout(WAIT, songs.wait_for(|s| s.contains("s1")))
            .await
            .unwrap()
            .unwrap();

        // No engine event here, only the join input changes
        metadata
            .set(CollectionKind::Playlist, "p", ["s1".to_string()])
            .await
            .unwrap();

        let mut playlists = reactor.downloaded_playlists();
        tokio::time::timeout(WAIT, playlists.wait_for(|m| m.get("p") == Some(&true)))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_index_failure_keeps_last_snapshot() {
        let (engine, metadata) = setup().await;
        enqueue(&engine, "s1").await;
        engine.set_state("s1", RequestState::Completed);

        let reactor = ReactorHandle::spawn(engine.clone(), &metadata);
        let mut songs = reactor.downloaded_songs();
        tokio::time::timeout(WAIT, songs.wait_for(|s| s.contains("s1")))
            .await
            .unwrap()
            .unwrap();

        engine.fail_listing(true);
        reactor.refresh();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(songs.borrow().contains("s1"));
    }

    #[tokio::test]
    async fn test_new_subscribers_get_latest_value() {
        let (engine, metadata) = setup().await;
        enqueue(&engine, "s1").await;
        engine.set_state("s1", RequestState::Completed);

        let reactor = ReactorHandle::spawn(engine.clone(), &metadata);
        let mut first = reactor.downloaded_songs();
        tokio::time::timeout(WAIT, first.wait_for(|s| s.contains("s1")))
            .await
            .unwrap()
            .unwrap();

        let late = reactor.downloaded_songs();
        assert!(late.borrow().contains("s1"));
    }
}
