//! Which collections are fully on the device
//!
//! Everything here is derived from two inputs, the membership map and the set
//! of completed songs, and is recomputed wholesale whenever either changes.

use std::collections::{BTreeMap, BTreeSet};

use super::Memberships;
use super::engine::{RequestState, song_id_from_request};

/// `collectionId -> fully downloaded`
pub type CompletionMap = BTreeMap<String, bool>;

/// A collection is complete when it has members and all of them are downloaded
pub fn is_complete(members: &BTreeSet<String>, downloaded: &BTreeSet<String>) -> bool {
    !members.is_empty() && members.is_subset(downloaded)
}

pub fn completion_map(memberships: &Memberships, downloaded: &BTreeSet<String>) -> CompletionMap {
    memberships
        .iter()
        .map(|(id, members)| (id.clone(), is_complete(members, downloaded)))
        .collect()
}

/// Songs whose request reached `Completed`, from the engine's full index
pub fn downloaded_songs<'a, I>(requests: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a (String, RequestState)>,
{
    requests
        .into_iter()
        .filter(|(_, state)| *state == RequestState::Completed)
        .filter_map(|(request_id, _)| song_id_from_request(request_id))
        .map(str::to_string)
        .collect()
}

/// Ids of the complete collections only
pub fn complete_ids(map: &CompletionMap) -> BTreeSet<String> {
    map.iter()
        .filter(|(_, done)| **done)
        .map(|(id, _)| id.clone())
        .collect()
}
