//! Collection downloads and reference-counted removal

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::catalog::{CatalogApi, CatalogSong, resolve_stream_url};
use super::engine::{DownloadEngine, DownloadRequest, RequestState, request_id_for};
use super::metadata::{MetadataStore, referenced_songs};
use super::reactor::RefreshTrigger;
use super::CollectionKind;
use crate::error::{Error, Result};

/// Result of a successful `download_collection`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub collection_id: String,
    /// Songs recorded as members
    pub songs: usize,
    /// Songs handed to the engine by this call
    pub enqueued: Vec<String>,
    /// Songs the engine already had a live request for
    pub already_present: usize,
    /// Songs with no playable URL
    pub skipped: Vec<String>,
    /// Songs that left the collection and were no longer referenced
    pub released: Vec<String>,
}

/// Result of a successful `remove_collection_download`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemovalOutcome {
    pub collection_id: String,
    /// Songs whose device copy was removed
    pub released: Vec<String>,
    /// Songs kept because another collection still references them
    pub retained: usize,
}

pub struct DownloadOrchestrator {
    catalog: Arc<dyn CatalogApi>,
    engine: Arc<dyn DownloadEngine>,
    metadata: Arc<MetadataStore>,
    refresh: RefreshTrigger,
    page_size: usize,
    // Held from a membership write through the engine calls that depend on it
    membership_lock: Mutex<()>,
}

impl DownloadOrchestrator {
    pub fn new(
        catalog: Arc<dyn CatalogApi>,
        engine: Arc<dyn DownloadEngine>,
        metadata: Arc<MetadataStore>,
        refresh: RefreshTrigger,
        page_size: usize,
    ) -> Self {
        Self {
            catalog,
            engine,
            metadata,
            refresh,
            page_size: page_size.max(1),
            membership_lock: Mutex::new(()),
        }
    }

    /// Record a collection's members and queue every playable song
    ///
    /// Nothing is enqueued until the catalog has been fully paged and the
    /// membership is persisted, so every request this call creates is
    /// reachable from a membership entry.
    pub async fn download_collection(
        &self,
        kind: CollectionKind,
        collection_id: &str,
    ) -> Result<DownloadOutcome> {
        let collection_id = checked_id(collection_id)?;
        info!("Downloading {} {}", kind, collection_id);

        let songs = self.fetch_all_songs(kind, collection_id).await?;
        if songs.is_empty() {
            return Err(Error::EmptyResult(format!(
                "{} {} has no songs",
                kind, collection_id
            )));
        }

        let total = songs.len();
        let mut requests = Vec::with_capacity(total);
        let mut skipped = Vec::new();
        for song in songs {
            match resolve_stream_url(&song) {
                Some(uri) => requests.push(DownloadRequest {
                    song_id: song.id,
                    uri: uri.into(),
                }),
                None => {
                    debug!("No playable URL for {} ({})", song.id, song.title);
                    skipped.push(song.id);
                }
            }
        }

        if requests.is_empty() {
            return Err(Error::EmptyResult(format!(
                "none of the {} songs in {} {} are playable",
                total, kind, collection_id
            )));
        }
        if !skipped.is_empty() {
            warn!(
                "Skipping {} of {} songs in {} {}",
                skipped.len(),
                total,
                kind,
                collection_id
            );
        }

        let members: BTreeSet<String> = requests.iter().map(|r| r.song_id.clone()).collect();
        let _guard = self.membership_lock.lock().await;
        let previous = self.metadata.get(kind, collection_id).await?;
        self.metadata
            .set(kind, collection_id, members.iter().cloned())
            .await?;

        let dropped: Vec<String> = previous.difference(&members).cloned().collect();
        let released = if dropped.is_empty() {
            Vec::new()
        } else {
            debug!("{} songs left {} {}", dropped.len(), kind, collection_id);
            let release = self.release_unreferenced(dropped).await?;
            if !release.failed.is_empty() {
                // Departed songs stay members until their copy is actually gone
                let kept = members.iter().chain(&release.failed).cloned();
                self.metadata.set(kind, collection_id, kept).await?;
                self.refresh.refresh();
                return Err(release.error());
            }
            release.released
        };

        let mut outcome = DownloadOutcome {
            collection_id: collection_id.to_string(),
            songs: members.len(),
            skipped,
            released,
            ..Default::default()
        };

        for request in requests {
            let request_id = request_id_for(&request.song_id);
            match self.engine.state(&request_id).await? {
                Some(RequestState::Failed) => {
                    debug!("Retrying failed download of {}", request.song_id);
                }
                Some(_) => {
                    outcome.already_present += 1;
                    continue;
                }
                None => {}
            }

            let song_id = request.song_id.clone();
            self.engine
                .enqueue(&request_id, request)
                .await
                .inspect_err(|e| warn!("Failed to enqueue {}: {}", song_id, e))?;
            outcome.enqueued.push(song_id);
        }

        info!(
            "{} {}: {} queued, {} already present, {} skipped",
            kind,
            collection_id,
            outcome.enqueued.len(),
            outcome.already_present,
            outcome.skipped.len()
        );

        self.refresh.refresh();
        Ok(outcome)
    }

    /// Forget a collection and drop songs nothing else references
    pub async fn remove_collection_download(
        &self,
        kind: CollectionKind,
        collection_id: &str,
    ) -> Result<RemovalOutcome> {
        let collection_id = checked_id(collection_id)?;
        info!("Removing download of {} {}", kind, collection_id);

        let _guard = self.membership_lock.lock().await;
        let members = self.metadata.get(kind, collection_id).await?;
        self.metadata.remove(kind, collection_id).await?;

        let release = self.release_unreferenced(members.iter().cloned()).await;
        // Reconcile with the engine whether or not every release went through
        self.refresh.refresh();
        let release = release?;

        if !release.failed.is_empty() {
            // Keep what is still on the device reachable so a retry can release it
            self.metadata
                .set(kind, collection_id, release.failed.iter().cloned())
                .await?;
            return Err(release.error());
        }

        Ok(RemovalOutcome {
            collection_id: collection_id.to_string(),
            retained: members.len() - release.released.len(),
            released: release.released,
        })
    }

    /// Page through the catalog, first occurrence of a song id wins
    async fn fetch_all_songs(
        &self,
        kind: CollectionKind,
        collection_id: &str,
    ) -> Result<Vec<CatalogSong>> {
        let mut seen = HashSet::new();
        let mut songs = Vec::new();
        let mut start = 0;

        loop {
            let page = self
                .catalog
                .fetch_songs(kind, collection_id, start, self.page_size)
                .await
                .map_err(Error::remote)?;
            let fetched = page.len();

            songs.extend(page.into_iter().filter(|s| seen.insert(s.id.clone())));

            if fetched < self.page_size {
                break;
            }
            start += fetched;
        }

        debug!("{} {} lists {} songs", kind, collection_id, songs.len());
        Ok(songs)
    }

    /// Remove device copies of `candidates` not referenced by any collection
    ///
    /// Membership is read fresh here, so the decision reflects every removal
    /// that finished before this call. Every release is attempted.
    async fn release_unreferenced<I>(&self, candidates: I) -> Result<Release>
    where
        I: IntoIterator<Item = String>,
    {
        let albums = self.metadata.list_all(CollectionKind::Album).await?;
        let playlists = self.metadata.list_all(CollectionKind::Playlist).await?;
        let still_referenced = referenced_songs([&albums, &playlists]);

        let to_release: Vec<String> = candidates
            .into_iter()
            .filter(|song| !still_referenced.contains(song))
            .collect();

        let request_ids: Vec<String> = to_release.iter().map(|song| request_id_for(song)).collect();
        let results = join_all(
            request_ids
                .iter()
                .map(|request_id| self.engine.cancel_and_remove(request_id)),
        )
        .await;

        let mut release = Release::default();
        for (song, result) in to_release.into_iter().zip(results) {
            match result {
                Ok(()) => release.released.push(song),
                Err(e) => {
                    warn!("Failed to remove download of {}: {}", song, e);
                    release.failed.push(song);
                }
            }
        }

        debug!(
            "Released {} songs, {} failed",
            release.released.len(),
            release.failed.len()
        );
        Ok(release)
    }
}

/// Songs a release pass removed, and the ones the engine refused
#[derive(Debug, Default)]
struct Release {
    released: Vec<String>,
    failed: Vec<String>,
}

impl Release {
    fn error(&self) -> Error {
        Error::Engine(format!(
            "failed to remove {} of {} songs",
            self.failed.len(),
            self.failed.len() + self.released.len()
        ))
    }
}

/// Reject blank ids; accepted ids are used exactly as given
fn checked_id(collection_id: &str) -> Result<&str> {
    if collection_id.trim().is_empty() {
        return Err(Error::InvalidIdentifier(
            "collection id must not be empty".to_string(),
        ));
    }
    Ok(collection_id)
}
