//! Offline collection cache and favourites sync
//!
//! [`OfflineLibrary`] owns every piece of process-lifetime state: the
//! persisted memberships, the reactor publishing what is downloaded, and the
//! resolved favourites playlist. Build one at startup and share it.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::info;

pub mod catalog;
pub mod completion;
pub mod engine;
pub mod favourites;
pub mod kv;
pub mod metadata;
pub mod orchestrator;
pub mod reactor;

#[cfg(test)]
pub(crate) mod testing;

pub use catalog::{CatalogApi, CatalogSong, PlaylistRef};
pub use completion::CompletionMap;
pub use engine::{DownloadEngine, DownloadRequest, EngineEvent, RequestState};
pub use favourites::{DEFAULT_FAVOURITES_NAME, FavouritesSync, SyncReport};
pub use kv::{JsonFileStore, KeyValueStore, MemoryStore};
pub use metadata::MetadataStore;
pub use orchestrator::{DownloadOrchestrator, DownloadOutcome, RemovalOutcome};
pub use reactor::{ReactorHandle, SongSet};

use crate::error::Result;

/// `collectionId -> member song ids`
pub type Memberships = BTreeMap<String, BTreeSet<String>>;

/// The kinds of user collection that can be downloaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionKind {
    Album,
    Playlist,
}

impl CollectionKind {
    pub const ALL: [CollectionKind; 2] = [CollectionKind::Album, CollectionKind::Playlist];

    /// Key of this kind's record in the key-value store
    pub fn storage_key(self) -> &'static str {
        match self {
            CollectionKind::Album => "albums",
            CollectionKind::Playlist => "playlists",
        }
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionKind::Album => write!(f, "album"),
            CollectionKind::Playlist => write!(f, "playlist"),
        }
    }
}

/// Tunables for [`OfflineLibrary::start`]
#[derive(Debug, Clone)]
pub struct LibraryOptions {
    /// Songs requested per catalog page
    pub page_size: usize,
    /// Name of the favourites playlist
    pub favourites_name: String,
}

impl Default for LibraryOptions {
    fn default() -> Self {
        Self {
            page_size: 50,
            favourites_name: DEFAULT_FAVOURITES_NAME.to_string(),
        }
    }
}

/// Entry point for downloads, removals and favourites
pub struct OfflineLibrary {
    metadata: Arc<MetadataStore>,
    reactor: ReactorHandle,
    orchestrator: DownloadOrchestrator,
    favourites: FavouritesSync,
}

impl OfflineLibrary {
    /// Load memberships and start the reactor. Must run inside a tokio runtime.
    pub async fn start(
        catalog: Arc<dyn CatalogApi>,
        engine: Arc<dyn DownloadEngine>,
        kv: Arc<dyn KeyValueStore>,
        options: LibraryOptions,
    ) -> Result<Self> {
        let metadata = Arc::new(MetadataStore::open(kv).await?);
        let reactor = ReactorHandle::spawn(engine.clone(), &metadata);
        let orchestrator = DownloadOrchestrator::new(
            catalog.clone(),
            engine,
            metadata.clone(),
            reactor.trigger(),
            options.page_size,
        );
        let favourites = FavouritesSync::new(catalog, options.favourites_name);

        info!("Offline library started");
        Ok(Self {
            metadata,
            reactor,
            orchestrator,
            favourites,
        })
    }

    pub async fn download_collection(
        &self,
        kind: CollectionKind,
        collection_id: &str,
    ) -> Result<DownloadOutcome> {
        self.orchestrator.download_collection(kind, collection_id).await
    }

    pub async fn remove_collection_download(
        &self,
        kind: CollectionKind,
        collection_id: &str,
    ) -> Result<RemovalOutcome> {
        self.orchestrator
            .remove_collection_download(kind, collection_id)
            .await
    }

    pub async fn ensure_favourites_collection_id(&self) -> Result<String> {
        self.favourites.ensure_collection_id().await
    }

    pub async fn sync_favourites(&self) -> Result<SyncReport> {
        self.favourites.sync().await
    }

    pub async fn set_favourite(&self, song_id: &str, favourite: bool) -> Result<SyncReport> {
        self.favourites.set_favourite(song_id, favourite).await
    }

    /// Persisted members of every collection of `kind`
    pub async fn collections(&self, kind: CollectionKind) -> Result<Memberships> {
        self.metadata.list_all(kind).await
    }

    pub fn downloaded_songs(&self) -> watch::Receiver<SongSet> {
        self.reactor.downloaded_songs()
    }

    pub fn downloaded_albums(&self) -> watch::Receiver<Arc<CompletionMap>> {
        self.reactor.downloaded_albums()
    }

    pub fn downloaded_playlists(&self) -> watch::Receiver<Arc<CompletionMap>> {
        self.reactor.downloaded_playlists()
    }

    pub fn downloaded_collections(&self, kind: CollectionKind) -> watch::Receiver<Arc<CompletionMap>> {
        self.reactor.collections(kind)
    }

    /// Ask for a rescan of the download engine
    pub fn refresh(&self) {
        self.reactor.refresh();
    }
}
