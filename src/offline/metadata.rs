//! Persisted collection membership
//!
//! Each collection kind is stored under one key as a flat text record:
//!
//! ```text
//! album-1:s1,s2|album-2:s3
//! ```
//!
//! Ids are escaped (see [`crate::utils::escape`]) so any id, including ones
//! containing `|`, `:`, `,` or `\`, round-trips without touching its
//! neighbours. Collections with no members are never written.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tracing::{debug, warn};

use super::kv::KeyValueStore;
use super::{CollectionKind, Memberships};
use crate::error::{Error, Result};
use crate::utils::{escape, split_unescaped, unescape};

const ENTRY_SEP: char = '|';
const FIELD_SEP: char = ':';
const SONG_SEP: char = ',';
const RESERVED: &[char] = &[ENTRY_SEP, FIELD_SEP, SONG_SEP];

/// Encode a membership map, entries sorted by collection id
pub fn encode_memberships(map: &Memberships) -> String {
    map.iter()
        .filter(|(_, songs)| !songs.is_empty())
        .map(|(id, songs)| {
            let songs: Vec<String> = songs.iter().map(|s| escape(s, RESERVED)).collect();
            format!("{}{}{}", escape(id, RESERVED), FIELD_SEP, songs.join(","))
        })
        .collect::<Vec<_>>()
        .join("|")
}

/// Decode a membership record, skipping malformed entries
pub fn decode_memberships(encoded: &str) -> Memberships {
    let mut map = Memberships::new();
    if encoded.is_empty() {
        return map;
    }

    for entry in split_unescaped(encoded, ENTRY_SEP) {
        let fields = split_unescaped(entry, FIELD_SEP);
        let [id, songs] = fields.as_slice() else {
            warn!("Skipping malformed membership entry: {:?}", entry);
            continue;
        };

        let id = unescape(id);
        let songs: BTreeSet<String> = split_unescaped(songs, SONG_SEP)
            .into_iter()
            .map(unescape)
            .filter(|s| !s.is_empty())
            .collect();

        if id.is_empty() || songs.is_empty() {
            warn!("Skipping empty membership entry: {:?}", entry);
            continue;
        }
        map.entry(id).or_default().extend(songs);
    }
    map
}

struct KindSlot {
    // Serializes read-modify-write of this kind's record
    lock: Mutex<()>,
    tx: watch::Sender<Arc<Memberships>>,
}

/// Owns the durable `collectionId -> songIds` maps
pub struct MetadataStore {
    kv: Arc<dyn KeyValueStore>,
    albums: KindSlot,
    playlists: KindSlot,
}

impl MetadataStore {
    /// Load both membership maps from `kv`
    pub async fn open(kv: Arc<dyn KeyValueStore>) -> Result<Self> {
        let albums = Self::load(kv.as_ref(), CollectionKind::Album).await?;
        let playlists = Self::load(kv.as_ref(), CollectionKind::Playlist).await?;

        debug!(
            "Loaded memberships: {} albums, {} playlists",
            albums.len(),
            playlists.len()
        );

        Ok(Self {
            kv,
            albums: KindSlot {
                lock: Mutex::new(()),
                tx: watch::Sender::new(Arc::new(albums)),
            },
            playlists: KindSlot {
                lock: Mutex::new(()),
                tx: watch::Sender::new(Arc::new(playlists)),
            },
        })
    }

    async fn load(kv: &dyn KeyValueStore, kind: CollectionKind) -> Result<Memberships> {
        Ok(kv
            .get(kind.storage_key())
            .await?
            .map(|raw| decode_memberships(&raw))
            .unwrap_or_default())
    }

    fn slot(&self, kind: CollectionKind) -> &KindSlot {
        match kind {
            CollectionKind::Album => &self.albums,
            CollectionKind::Playlist => &self.playlists,
        }
    }

    /// Member songs of a collection, empty if unknown
    pub async fn get(&self, kind: CollectionKind, collection_id: &str) -> Result<BTreeSet<String>> {
        Ok(self
            .list_all(kind)
            .await?
            .remove(collection_id)
            .unwrap_or_default())
    }

    /// Every collection of `kind` with its members
    pub async fn list_all(&self, kind: CollectionKind) -> Result<Memberships> {
        Self::load(self.kv.as_ref(), kind).await
    }

    /// Overwrite a collection's members. An empty set removes the entry.
    pub async fn set<I>(&self, kind: CollectionKind, collection_id: &str, song_ids: I) -> Result<()>
    where
        I: IntoIterator<Item = String>,
    {
        validate_id(collection_id)?;
        let songs: BTreeSet<String> = song_ids.into_iter().filter(|s| !s.is_empty()).collect();

        self.update(kind, |map| {
            if songs.is_empty() {
                map.remove(collection_id);
            } else {
                map.insert(collection_id.to_string(), songs);
            }
        })
        .await
    }

    /// Drop a collection's entry; no-op if absent
    pub async fn remove(&self, kind: CollectionKind, collection_id: &str) -> Result<()> {
        self.update(kind, |map| {
            map.remove(collection_id);
        })
        .await
    }

    /// Live view of a kind's membership map
    pub fn subscribe(&self, kind: CollectionKind) -> watch::Receiver<Arc<Memberships>> {
        self.slot(kind).tx.subscribe()
    }

    async fn update<F>(&self, kind: CollectionKind, apply: F) -> Result<()>
    where
        F: FnOnce(&mut Memberships),
    {
        let slot = self.slot(kind);
        let _guard = slot.lock.lock().await;

        let mut map = Self::load(self.kv.as_ref(), kind).await?;
        let before = map.clone();
        apply(&mut map);
        if map == before {
            return Ok(());
        }

        if map.is_empty() {
            self.kv.delete(kind.storage_key()).await?;
        } else {
            self.kv
                .put(kind.storage_key(), encode_memberships(&map))
                .await?;
        }

        debug!("{} memberships now hold {} collections", kind, map.len());
        slot.tx.send_replace(Arc::new(map));
        Ok(())
    }
}

fn validate_id(collection_id: &str) -> Result<()> {
    if collection_id.trim().is_empty() {
        return Err(Error::InvalidIdentifier(
            "collection id must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Union of every member across the given maps
pub fn referenced_songs<'a>(maps: impl IntoIterator<Item = &'a Memberships>) -> BTreeSet<String> {
    maps.into_iter()
        .flat_map(|m| m.values())
        .flatten()
        .cloned()
        .collect()
}
