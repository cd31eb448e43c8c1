//! Keeps a remote favourites playlist mirroring the user's favourite flags

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::catalog::CatalogApi;
use crate::error::{Error, Result};

/// Default name of the favourites playlist
pub const DEFAULT_FAVOURITES_NAME: &str = "Favourites";

/// Changes applied by one sync pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub playlist_id: String,
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl SyncReport {
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Songs to add and to remove so that `members` becomes `favourites`
pub fn membership_delta(
    favourites: &BTreeSet<String>,
    members: &BTreeSet<String>,
) -> (Vec<String>, Vec<String>) {
    let to_add = favourites.difference(members).cloned().collect();
    let to_remove = members.difference(favourites).cloned().collect();
    (to_add, to_remove)
}

pub struct FavouritesSync {
    catalog: Arc<dyn CatalogApi>,
    name: String,
    // Written once, only after a resolution and its first sync both succeed
    playlist_id: OnceCell<String>,
}

impl FavouritesSync {
    pub fn new(catalog: Arc<dyn CatalogApi>, name: impl Into<String>) -> Self {
        Self {
            catalog,
            name: name.into(),
            playlist_id: OnceCell::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The resolved playlist id, if this process has resolved it yet
    pub fn cached_id(&self) -> Option<&str> {
        self.playlist_id.get().map(String::as_str)
    }

    /// Find or create the favourites playlist, syncing it on first resolution
    ///
    /// Concurrent callers share one resolution; a failed attempt caches
    /// nothing and the next call starts over.
    pub async fn ensure_collection_id(&self) -> Result<String> {
        self.resolve_once().await.map(|(id, _)| id)
    }

    /// Resolve if needed, then reconcile the playlist with the favourite flags
    pub async fn sync(&self) -> Result<SyncReport> {
        match self.resolve_once().await? {
            (_, Some(report)) => Ok(report),
            (id, None) => self.sync_into(&id).await,
        }
    }

    /// Flag or unflag a song, then bring the playlist in line
    pub async fn set_favourite(&self, song_id: &str, favourite: bool) -> Result<SyncReport> {
        if song_id.trim().is_empty() {
            return Err(Error::InvalidIdentifier(
                "song id must not be empty".to_string(),
            ));
        }

        self.catalog
            .set_favourite(song_id, favourite)
            .await
            .map_err(Error::remote)?;
        debug!("Marked {} favourite={}", song_id, favourite);

        self.sync().await
    }

    /// Returns the id, plus the report when this call did the first sync
    async fn resolve_once(&self) -> Result<(String, Option<SyncReport>)> {
        let mut first_report = None;
        let slot = &mut first_report;

        let id = self
            .playlist_id
            .get_or_try_init(move || async move {
                let id = self.resolve().await?;
                *slot = Some(self.sync_into(&id).await?);
                info!("Favourites playlist {:?} is {}", self.name, id);
                Ok::<_, Error>(id)
            })
            .await?
            .clone();

        Ok((id, first_report))
    }

    async fn resolve(&self) -> Result<String> {
        if let Some(id) = self.find_exact().await? {
            return Ok(id);
        }

        info!("Creating favourites playlist {:?}", self.name);
        let created = self
            .catalog
            .create_playlist(&self.name)
            .await
            .map_err(Error::remote)?
            .filter(|id| !id.is_empty());
        if let Some(id) = created {
            return Ok(id);
        }

        warn!("Server did not return the new playlist id, looking it up");
        self.find_exact().await?.ok_or_else(|| {
            Error::Remote(anyhow::anyhow!(
                "created playlist {:?} but could not find it afterwards",
                self.name
            ))
        })
    }

    /// Server search is loose, only an exact case-insensitive name counts
    async fn find_exact(&self) -> Result<Option<String>> {
        let wanted = self.name.to_lowercase();
        let candidates = self
            .catalog
            .find_playlists(&self.name)
            .await
            .map_err(Error::remote)?;

        Ok(candidates
            .into_iter()
            .find(|p| p.name.to_lowercase() == wanted)
            .map(|p| p.id))
    }

    /// One reconciliation pass; any failed step fails the pass
    async fn sync_into(&self, playlist_id: &str) -> Result<SyncReport> {
        let favourites = self
            .catalog
            .favourite_song_ids()
            .await
            .map_err(Error::remote)?;
        let members: BTreeSet<String> = self
            .catalog
            .playlist_song_ids(playlist_id)
            .await
            .map_err(Error::remote)?
            .into_iter()
            .collect();

        let (added, removed) = membership_delta(&favourites, &members);

        if !added.is_empty() {
            self.catalog
                .add_to_playlist(playlist_id, &added)
                .await
                .map_err(Error::remote)?;
        }
        if !removed.is_empty() {
            self.catalog
                .remove_from_playlist(playlist_id, &removed)
                .await
                .map_err(Error::remote)?;
        }

        debug!(
            "Favourites sync: +{} -{} ({} favourites)",
            added.len(),
            removed.len(),
            favourites.len()
        );

        Ok(SyncReport {
            playlist_id: playlist_id.to_string(),
            added,
            removed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offline::testing::{CatalogCall, FakeCatalog};

    fn set_of(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn favourites_sync(catalog: &Arc<FakeCatalog>) -> FavouritesSync {
        FavouritesSync::new(catalog.clone(), DEFAULT_FAVOURITES_NAME)
    }

    #[test]
    fn test_delta_is_minimal() {
        let (add, remove) = membership_delta(&set_of(&["a", "b", "c"]), &set_of(&["b", "c", "d"]));
        assert_eq!(add, vec!["a".to_string()]);
        assert_eq!(remove, vec!["d".to_string()]);

        let (add, remove) = membership_delta(&set_of(&["a"]), &set_of(&["a"]));
        assert!(add.is_empty() && remove.is_empty());
    }

    #[tokio::test]
    async fn test_uses_existing_playlist_with_exact_name() {
        let catalog = Arc::new(FakeCatalog::new());
        catalog.add_playlist("pl-loose", "My Favourites 2019", &[]);
        catalog.add_playlist("pl-fav", "FAVOURITES", &["s1"]);
        catalog.set_favourites(&["s1"]);

        let sync = favourites_sync(&catalog);
        assert_eq!(sync.ensure_collection_id().await.unwrap(), "pl-fav");
        assert_eq!(catalog.created_count(), 0);
    }

    #[tokio::test]
    async fn test_creates_playlist_and_syncs_before_caching() {
        let catalog = Arc::new(FakeCatalog::new());
        catalog.set_favourites(&["s1", "s2"]);

        let sync = favourites_sync(&catalog);
        let id = sync.ensure_collection_id().await.unwrap();

        assert_eq!(catalog.created_count(), 1);
        assert_eq!(catalog.playlist_members(&id), set_of(&["s1", "s2"]));
        assert_eq!(sync.cached_id(), Some(id.as_str()));
    }

    #[tokio::test]
    async fn test_create_without_id_falls_back_to_lookup() {
        let catalog = Arc::new(FakeCatalog::new());
        catalog.create_returns_id(false);

        let sync = favourites_sync(&catalog);
        let id = sync.ensure_collection_id().await.unwrap();

        assert_eq!(catalog.created_count(), 1);
        assert_eq!(catalog.playlist_name(&id).as_deref(), Some(DEFAULT_FAVOURITES_NAME));
    }

    #[tokio::test]
    async fn test_concurrent_callers_create_once() {
        let catalog = Arc::new(FakeCatalog::new());
        catalog.set_favourites(&["s1"]);
        let sync = Arc::new(favourites_sync(&catalog));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let sync = sync.clone();
                tokio::spawn(async move { sync.ensure_collection_id().await })
            })
            .collect();

        let mut ids = BTreeSet::new();
        for task in tasks {
            ids.insert(task.await.unwrap().unwrap());
        }

        assert_eq!(ids.len(), 1);
        assert_eq!(catalog.created_count(), 1);
    }

    #[tokio::test]
    async fn test_sync_issues_exact_deltas() {
        let catalog = Arc::new(FakeCatalog::new());
        catalog.add_playlist("pl-fav", "Favourites", &["s2", "s3"]);
        catalog.set_favourites(&["s1", "s2"]);

        let sync = favourites_sync(&catalog);
        let report = sync.sync().await.unwrap();

        assert_eq!(report.added, vec!["s1".to_string()]);
        assert_eq!(report.removed, vec!["s3".to_string()]);
        assert_eq!(
            catalog.mutations(),
            vec![
                CatalogCall::Add("pl-fav".to_string(), vec!["s1".to_string()]),
                CatalogCall::Remove("pl-fav".to_string(), vec!["s3".to_string()]),
            ]
        );
    }

    #[tokio::test]
    async fn test_sync_in_step_issues_nothing() {
        let catalog = Arc::new(FakeCatalog::new());
        catalog.add_playlist("pl-fav", "Favourites", &["s1"]);
        catalog.set_favourites(&["s1"]);

        let sync = favourites_sync(&catalog);
        sync.ensure_collection_id().await.unwrap();
        let report = sync.sync().await.unwrap();

        assert!(report.is_noop());
        assert!(catalog.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_failed_sync_caches_nothing() {
        let catalog = Arc::new(FakeCatalog::new());
        catalog.add_playlist("pl-fav", "Favourites", &[]);
        catalog.set_favourites(&["s1"]);
        catalog.fail("add_to_playlist");

        let sync = favourites_sync(&catalog);
        assert!(matches!(sync.ensure_collection_id().await, Err(Error::Remote(_))));
        assert_eq!(sync.cached_id(), None);

        catalog.recover("add_to_playlist");
        assert_eq!(sync.ensure_collection_id().await.unwrap(), "pl-fav");
        assert_eq!(catalog.playlist_members("pl-fav"), set_of(&["s1"]));
    }

    #[tokio::test]
    async fn test_set_favourite_updates_playlist() {
        let catalog = Arc::new(FakeCatalog::new());
        catalog.add_playlist("pl-fav", "Favourites", &["s1"]);
        catalog.set_favourites(&["s1"]);
        let sync = favourites_sync(&catalog);
        sync.ensure_collection_id().await.unwrap();

        let report = sync.set_favourite("s2", true).await.unwrap();
        assert_eq!(report.added, vec!["s2".to_string()]);

        let report = sync.set_favourite("s1", false).await.unwrap();
        assert_eq!(report.removed, vec!["s1".to_string()]);
        assert_eq!(catalog.playlist_members("pl-fav"), set_of(&["s2"]));
    }

    #[tokio::test]
    async fn test_set_favourite_keeps_id_verbatim() {
        let catalog = Arc::new(FakeCatalog::new());
        catalog.add_playlist("pl-fav", "Favourites", &[]);
        let sync = favourites_sync(&catalog);

        assert!(matches!(
            sync.set_favourite("  ", true).await,
            Err(Error::InvalidIdentifier(_))
        ));

        let report = sync.set_favourite(" s1", true).await.unwrap();
        assert_eq!(report.added, vec![" s1".to_string()]);
        assert_eq!(catalog.playlist_members("pl-fav"), set_of(&[" s1"]));
    }
}
