//! Song file layout inside the cache directory

use md5::{Digest, Md5};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::error::Result;
use crate::utils::sanitize_filename;

const SONGS_DIR: &str = "songs";
const PARTIAL_SUFFIX: &str = "part";
/// Hex digits of the id digest kept in each file name
const ID_DIGEST_LEN: usize = 12;

/// Manages song files under the cache root
pub struct CacheStorage {
    root: PathBuf,
}

impl CacheStorage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get path to the songs directory
    pub fn songs_dir(&self) -> PathBuf {
        self.root.join(SONGS_DIR)
    }

    /// Create the directory structure and clear leftovers from interrupted downloads
    pub async fn init(&self) -> Result<()> {
        fs::create_dir_all(self.songs_dir()).await?;

        let mut entries = fs::read_dir(self.songs_dir()).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == PARTIAL_SUFFIX) {
                debug!("Removing partial download {}", path.display());
                fs::remove_file(&path).await?;
            }
        }

        debug!("Initialized cache at {}", self.root.display());
        Ok(())
    }

    /// Cache-relative file name for a song
    ///
    /// The sanitized id keeps names readable, the digest of the raw id keeps
    /// ids that sanitize alike from sharing a file.
    pub fn song_file(&self, song_id: &str, extension: &str) -> String {
        let digest = format!("{:x}", Md5::digest(song_id.as_bytes()));
        format!(
            "{}/{}-{}.{}",
            SONGS_DIR,
            sanitize_filename(song_id),
            &digest[..ID_DIGEST_LEN],
            extension
        )
    }

    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    fn partial_path(&self, relative: &str) -> PathBuf {
        let mut path = self.resolve(relative).into_os_string();
        path.push(".");
        path.push(PARTIAL_SUFFIX);
        PathBuf::from(path)
    }

    /// Write downloaded bytes next to their final name
    pub async fn write_partial(&self, relative: &str, data: &[u8]) -> Result<()> {
        let path = self.partial_path(relative);
        fs::write(&path, data).await?;
        debug!("Wrote {} bytes to {}", data.len(), path.display());
        Ok(())
    }

    /// Move a finished partial file into place
    pub async fn promote(&self, relative: &str) -> Result<PathBuf> {
        let path = self.resolve(relative);
        fs::rename(self.partial_path(relative), &path).await?;
        Ok(path)
    }

    /// Delete a song file and any partial copy; missing files are fine
    pub async fn remove(&self, relative: &str) -> Result<()> {
        for path in [self.resolve(relative), self.partial_path(relative)] {
            match fs::remove_file(&path).await {
                Ok(()) => debug!("Removed {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
