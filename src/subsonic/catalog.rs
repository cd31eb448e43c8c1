//! Subsonic implementation of the offline catalog

use std::collections::BTreeSet;

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use super::{Song, SubsonicClient};
use crate::offline::{CatalogApi, CatalogSong, CollectionKind, PlaylistRef};

impl SubsonicClient {
    fn to_catalog_song(&self, song: &Song) -> CatalogSong {
        // Video entries can't be stored as audio
        let stream_url = (!song.is_video).then(|| self.get_stream_url(&song.id));
        CatalogSong {
            id: song.id.clone(),
            title: song.title.clone(),
            stream_url,
        }
    }
}

#[async_trait]
impl CatalogApi for SubsonicClient {
    async fn fetch_songs(
        &self,
        kind: CollectionKind,
        collection_id: &str,
        start: usize,
        limit: usize,
    ) -> Result<Vec<CatalogSong>> {
        // getAlbum and getPlaylist are unpaged, slice locally
        let songs = match kind {
            CollectionKind::Album => self.get_album(collection_id).await?.song,
            CollectionKind::Playlist => self.get_playlist(collection_id).await?.songs,
        };

        Ok(songs
            .iter()
            .skip(start)
            .take(limit)
            .map(|s| self.to_catalog_song(s))
            .collect())
    }

    async fn favourite_song_ids(&self) -> Result<BTreeSet<String>> {
        let starred = self.get_starred().await?;
        debug!("Server reports {} favourite songs", starred.len());
        Ok(starred.into_iter().map(|s| s.id).collect())
    }

    async fn find_playlists(&self, name: &str) -> Result<Vec<PlaylistRef>> {
        let needle = name.to_lowercase();
        Ok(self
            .get_playlists()
            .await?
            .into_iter()
            .filter(|p| p.name.to_lowercase().contains(&needle))
            .map(|p| PlaylistRef {
                id: p.id,
                name: p.name,
            })
            .collect())
    }

    async fn create_playlist(&self, name: &str) -> Result<Option<String>> {
        SubsonicClient::create_playlist(self, name).await
    }

    async fn playlist_song_ids(&self, playlist_id: &str) -> Result<Vec<String>> {
        Ok(self
            .get_playlist(playlist_id)
            .await?
            .songs
            .into_iter()
            .map(|s| s.id)
            .collect())
    }

    async fn add_to_playlist(&self, playlist_id: &str, song_ids: &[String]) -> Result<()> {
        self.update_playlist(playlist_id, song_ids, &[]).await
    }

    async fn remove_from_playlist(&self, playlist_id: &str, song_ids: &[String]) -> Result<()> {
        // Removal is by position, so map ids onto the current entry order
        let current = CatalogApi::playlist_song_ids(self, playlist_id).await?;
        let indexes: Vec<usize> = current
            .iter()
            .enumerate()
            .filter(|(_, id)| song_ids.contains(id))
            .map(|(i, _)| i)
            .collect();

        if indexes.is_empty() {
            return Ok(());
        }
        self.update_playlist(playlist_id, &[], &indexes).await
    }

    async fn set_favourite(&self, song_id: &str, favourite: bool) -> Result<()> {
        self.set_starred(song_id, favourite).await
    }
}
