//! Remote media catalog as seen by the offline engine

use std::collections::BTreeSet;

use anyhow::Result;
use async_trait::async_trait;

use super::CollectionKind;

/// One song as listed by the catalog for a collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogSong {
    pub id: String,
    pub title: String,
    /// Playable URL, `None` when the catalog has nothing streamable
    pub stream_url: Option<String>,
}

/// A remote playlist found by name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistRef {
    pub id: String,
    pub name: String,
}

/// Operations the engine needs from the remote catalog
#[async_trait]
pub trait CatalogApi: Send + Sync {
    /// One page of a collection's songs, in catalog order
    async fn fetch_songs(
        &self,
        kind: CollectionKind,
        collection_id: &str,
        start: usize,
        limit: usize,
    ) -> Result<Vec<CatalogSong>>;

    /// Ids of every song carrying the user's favourite flag
    async fn favourite_song_ids(&self) -> Result<BTreeSet<String>>;

    /// Playlists matching `name`; servers may return loose matches
    async fn find_playlists(&self, name: &str) -> Result<Vec<PlaylistRef>>;

    /// Create a playlist, returning its id when the server reports one
    async fn create_playlist(&self, name: &str) -> Result<Option<String>>;

    async fn playlist_song_ids(&self, playlist_id: &str) -> Result<Vec<String>>;

    async fn add_to_playlist(&self, playlist_id: &str, song_ids: &[String]) -> Result<()>;

    /// Remove every occurrence of the given songs from a playlist
    async fn remove_from_playlist(&self, playlist_id: &str, song_ids: &[String]) -> Result<()>;

    async fn set_favourite(&self, song_id: &str, favourite: bool) -> Result<()>;
}

/// Resolve a playable URL, rejecting empty and non-absolute values
pub fn resolve_stream_url(song: &CatalogSong) -> Option<url::Url> {
    let raw = song.stream_url.as_deref()?.trim();
    if raw.is_empty() {
        return None;
    }
    url::Url::parse(raw).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn song(url: Option<&str>) -> CatalogSong {
        CatalogSong {
            id: "s1".to_string(),
            title: "One".to_string(),
            stream_url: url.map(str::to_string),
        }
    }

    #[test]
    fn test_resolve_stream_url() {
        assert!(resolve_stream_url(&song(Some("https://host/rest/stream?id=s1"))).is_some());
        assert!(resolve_stream_url(&song(Some("   "))).is_none());
        assert!(resolve_stream_url(&song(Some("rest/stream?id=s1"))).is_none());
        assert!(resolve_stream_url(&song(None)).is_none());
    }
}
