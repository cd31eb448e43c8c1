//! Subsonic API response models

use serde::{Deserialize, Serialize};

/// Wrapper for all Subsonic API responses
#[derive(Debug, Clone, Deserialize)]
pub struct SubsonicResponse<T> {
    #[serde(rename = "subsonic-response")]
    pub subsonic_response: SubsonicResponseInner<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubsonicResponseInner<T> {
    pub status: String,
    pub version: String,
    #[serde(flatten)]
    pub data: Option<T>,
    pub error: Option<SubsonicError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubsonicError {
    pub code: i32,
    pub message: String,
}

// Album with songs response (getAlbum)
#[derive(Debug, Clone, Deserialize)]
pub struct AlbumData {
    pub album: AlbumWithSongs,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlbumWithSongs {
    pub id: String,
    pub name: String,
    pub artist: Option<String>,
    #[serde(rename = "songCount")]
    pub song_count: Option<u32>,
    #[serde(default)]
    pub song: Vec<Song>,
}

/// Song/track from the library
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Song {
    pub id: String,
    pub title: String,
    pub album: Option<String>,
    #[serde(rename = "albumId")]
    pub album_id: Option<String>,
    pub artist: Option<String>,
    pub track: Option<u32>,
    pub duration: Option<u32>,
    pub size: Option<u64>,
    pub suffix: Option<String>,
    #[serde(rename = "contentType")]
    pub content_type: Option<String>,
    #[serde(rename = "isVideo", default)]
    pub is_video: bool,
    /// Set when the song carries the user's favourite flag
    pub starred: Option<String>,
}

// Playlists response (getPlaylists)
#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistsData {
    pub playlists: PlaylistsList,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistsList {
    #[serde(default)]
    pub playlist: Vec<Playlist>,
}

/// Playlist metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: String,
    pub name: String,
    #[serde(rename = "songCount")]
    pub song_count: Option<u32>,
    pub owner: Option<String>,
}

// Playlist with songs response (getPlaylist, createPlaylist)
#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistData {
    pub playlist: PlaylistWithSongs,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistWithSongs {
    pub id: String,
    pub name: String,
    #[serde(rename = "songCount")]
    pub song_count: Option<u32>,
    #[serde(default, rename = "entry")]
    pub songs: Vec<Song>,
}

/// createPlaylist only returns the playlist on API 1.14.0+, older
/// servers answer with an empty body
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedPlaylistData {
    pub playlist: Option<PlaylistRefData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistRefData {
    pub id: Option<String>,
}

// Starred response (getStarred2)
#[derive(Debug, Clone, Deserialize)]
pub struct StarredData {
    pub starred2: Starred,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Starred {
    #[serde(default)]
    pub song: Vec<Song>,
}
