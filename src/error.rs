//! Error types for the offline engine

use thiserror::Error;

use crate::subsonic::ApiError;

/// Result type alias using the crate's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by offline engine operations
#[derive(Debug, Error)]
pub enum Error {
    /// No active client or session to talk to
    #[error("Not initialized: {0}")]
    NotInitialized(String),

    /// The server rejected our credentials
    #[error("Not authenticated: {0}")]
    NotAuthenticated(String),

    /// An id that is empty, malformed or unknown to the server
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Nothing could be resolved for the requested collection
    #[error("Empty result: {0}")]
    EmptyResult(String),

    /// Network or API failure
    #[error("Remote request failed: {0:#}")]
    Remote(anyhow::Error),

    /// Persistence substrate failure
    #[error("Local storage error: {0}")]
    Storage(String),

    /// Download engine rejected or failed a request
    #[error("Download engine error: {0}")]
    Engine(String),

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Map a catalog failure into the taxonomy.
    ///
    /// Subsonic error codes are recovered from the error chain so that
    /// authentication and not-found responses keep their meaning.
    pub fn remote(err: anyhow::Error) -> Self {
        if let Some(api) = err.chain().find_map(|e| e.downcast_ref::<ApiError>()) {
            if api.is_auth_failure() {
                return Self::NotAuthenticated(api.message.clone());
            }
            if api.is_not_found() {
                return Self::InvalidIdentifier(api.message.clone());
            }
        }
        Self::Remote(err)
    }
}
