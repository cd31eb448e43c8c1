//! Subsonic API HTTP client

use anyhow::{Context, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use super::auth::generate_auth_params;
use super::models::*;

/// An error reported by the server inside a Subsonic response envelope
#[derive(Debug, Clone, Error)]
#[error("Subsonic error {code}: {message}")]
pub struct ApiError {
    pub code: i32,
    pub message: String,
}

impl ApiError {
    /// Codes 40-44 are the credential and token failures
    pub fn is_auth_failure(&self) -> bool {
        (40..=44).contains(&self.code)
    }

    pub fn is_not_found(&self) -> bool {
        self.code == 70
    }
}

/// HTTP client for Subsonic REST API
#[derive(Clone)]
pub struct SubsonicClient {
    base_url: String,
    username: String,
    password: String,
    http_client: Client,
}

impl SubsonicClient {
    /// Create a new Subsonic client
    pub fn new(base_url: &str, username: &str, password: &str) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();

        let http_client = Client::builder()
            .user_agent("offtune/0.1.0")
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            base_url,
            username: username.to_string(),
            password: password.to_string(),
            http_client,
        })
    }

    /// Build URL with authentication parameters and extra query pairs
    fn build_url(&self, endpoint: &str, params: &[(&str, String)]) -> String {
        let auth = generate_auth_params(&self.username, &self.password);
        let query: String = auth
            .iter()
            .map(|(k, v)| (*k, v.as_str()))
            .chain(params.iter().map(|(k, v)| (*k, v.as_str())))
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        format!("{}/rest/{}?{}", self.base_url, endpoint, query)
    }

    /// Issue a GET and unwrap the response envelope
    async fn request<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<Option<T>> {
        let url = self.build_url(endpoint, params);
        debug!("Calling {} with {} parameter(s)", endpoint, params.len());

        let response: SubsonicResponse<T> = self
            .http_client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to call {}", endpoint))?
            .error_for_status()
            .with_context(|| format!("{} returned an HTTP error", endpoint))?
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", endpoint))?;

        Self::check_response(&response)?;
        Ok(response.subsonic_response.data)
    }

    /// Test connection to Subsonic server
    pub async fn ping(&self) -> Result<()> {
        self.request::<()>("ping", &[])
            .await
            .context("Failed to connect to Subsonic server")?;
        Ok(())
    }

    /// Get album details with songs
    pub async fn get_album(&self, id: &str) -> Result<AlbumWithSongs> {
        self.request::<AlbumData>("getAlbum", &[("id", id.to_string())])
            .await?
            .map(|d| d.album)
            .ok_or_else(|| anyhow::anyhow!("Album {} not found", id))
    }

    /// Get all playlists visible to the user
    pub async fn get_playlists(&self) -> Result<Vec<Playlist>> {
        let playlists = self
            .request::<PlaylistsData>("getPlaylists", &[])
            .await?
            .map(|d| d.playlists.playlist)
            .unwrap_or_default();

        debug!("Found {} playlists", playlists.len());
        Ok(playlists)
    }

    /// Get playlist details with songs
    pub async fn get_playlist(&self, id: &str) -> Result<PlaylistWithSongs> {
        self.request::<PlaylistData>("getPlaylist", &[("id", id.to_string())])
            .await?
            .map(|d| d.playlist)
            .ok_or_else(|| anyhow::anyhow!("Playlist {} not found", id))
    }

    /// Get the songs carrying the favourite flag
    pub async fn get_starred(&self) -> Result<Vec<Song>> {
        Ok(self
            .request::<StarredData>("getStarred2", &[])
            .await?
            .map(|d| d.starred2.song)
            .unwrap_or_default())
    }

    /// Create an empty playlist, returning its id when the server reports one
    pub async fn create_playlist(&self, name: &str) -> Result<Option<String>> {
        let created = self
            .request::<CreatedPlaylistData>("createPlaylist", &[("name", name.to_string())])
            .await
            .context("Failed to create playlist")?;

        Ok(created.and_then(|d| d.playlist).and_then(|p| p.id))
    }

    /// Apply additions and index-based removals to a playlist in one call
    pub async fn update_playlist(
        &self,
        playlist_id: &str,
        add: &[String],
        remove_indexes: &[usize],
    ) -> Result<()> {
        let mut params = vec![("playlistId", playlist_id.to_string())];
        params.extend(remove_indexes.iter().map(|i| ("songIndexToRemove", i.to_string())));
        params.extend(add.iter().map(|id| ("songIdToAdd", id.clone())));

        self.request::<()>("updatePlaylist", &params)
            .await
            .context("Failed to update playlist")?;
        Ok(())
    }

    /// Set or clear the favourite flag on a song
    pub async fn set_starred(&self, song_id: &str, starred: bool) -> Result<()> {
        let endpoint = if starred { "star" } else { "unstar" };
        self.request::<()>(endpoint, &[("id", song_id.to_string())])
            .await?;
        Ok(())
    }

    /// Get the stream URL for a song (returns URL, doesn't download)
    pub fn get_stream_url(&self, id: &str) -> String {
        self.build_url("stream", &[("id", id.to_string())])
    }

    /// Check response status and return error if failed
    fn check_response<T>(response: &SubsonicResponse<T>) -> Result<()> {
        if response.subsonic_response.status != "ok" {
            if let Some(error) = &response.subsonic_response.error {
                return Err(ApiError {
                    code: error.code,
                    message: error.message.clone(),
                }
                .into());
            }
            anyhow::bail!("Unknown Subsonic error");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_url_encodes_params() {
        let client = SubsonicClient::new("https://music.example.org/", "me", "pw").unwrap();
        let url = client.build_url("createPlaylist", &[("name", "Road & Rail".to_string())]);
        assert!(url.starts_with("https://music.example.org/rest/createPlaylist?u=me&"));
        assert!(url.ends_with("&name=Road%20%26%20Rail"));
    }

    #[test]
    fn test_stream_url_is_absolute() {
        let client = SubsonicClient::new("http://localhost:4533", "me", "pw").unwrap();
        let parsed = url::Url::parse(&client.get_stream_url("s1")).unwrap();
        assert_eq!(parsed.path(), "/rest/stream");
        assert!(parsed.query_pairs().any(|(k, v)| k == "id" && v == "s1"));
    }

    #[test]
    fn test_api_error_classification() {
        let auth = ApiError { code: 40, message: "bad".to_string() };
        let missing = ApiError { code: 70, message: "missing".to_string() };
        assert!(auth.is_auth_failure());
        assert!(!auth.is_not_found());
        assert!(missing.is_not_found());
    }
}
