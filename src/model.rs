//! Track and playlist data model shared by the store, repository and queue.

use std::collections::HashMap;

/// Playlist id of the favorites collection.
pub const FAVORITES_ID: &str = "favorites";
/// Playlist id of the recently-played history.
pub const RECENTLY_PLAYED_ID: &str = "recently_played";
/// Playlist id of the derived most-played ranking. Never stored.
pub const MOST_PLAYED_ID: &str = "most_played";
/// Playlist id of the persisted shadow of the live queue.
pub const CURRENT_QUEUE_ID: &str = "current_queue";

pub const FAVORITES_TITLE: &str = "Favorites";
pub const RECENTLY_PLAYED_TITLE: &str = "Recently Played";
pub const MOST_PLAYED_TITLE: &str = "Most Played";

/// Reserved playlists that must exist in every loaded [`PlaylistData`].
pub const MANDATORY_PLAYLISTS: [(&str, &str); 3] = [
    (FAVORITES_ID, FAVORITES_TITLE),
    (RECENTLY_PLAYED_ID, RECENTLY_PLAYED_TITLE),
    (CURRENT_QUEUE_ID, ""),
];

/// Returns true for ids that belong to a reserved playlist.
pub fn is_reserved_id(id: &str) -> bool {
    id == MOST_PLAYED_ID || MANDATORY_PLAYLISTS.iter().any(|(reserved, _)| *reserved == id)
}

/// Playable item reference. Identity is the id only; metadata may be stale.
#[derive(Debug, Clone, Default, serde::Deserialize, serde::Serialize)]
pub struct Track {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub artists: Vec<String>,
    #[serde(default)]
    pub album: Option<String>,
    /// Artwork locator (path or URI).
    #[serde(default)]
    pub artwork: Option<String>,
}

impl Track {
    /// Creates a track that carries only an id and a title.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            ..Self::default()
        }
    }
}

impl PartialEq for Track {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Track {}

/// Ordered collection of track ids.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Playlist {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub song_ids: Vec<String>,
}

impl Playlist {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            song_ids: Vec::new(),
        }
    }

    pub fn contains(&self, song_id: &str) -> bool {
        self.song_ids.iter().any(|id| id == song_id)
    }

    pub fn is_reserved(&self) -> bool {
        is_reserved_id(&self.id)
    }
}

/// Full persisted collection of playlists, reserved and user-defined.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PlaylistData {
    #[serde(default)]
    pub playlists: Vec<Playlist>,
}

impl PlaylistData {
    /// Document holding only the mandatory reserved playlists.
    pub fn with_defaults() -> Self {
        let mut data = Self::default();
        data.ensure_mandatory();
        data
    }

    /// Synthesizes any missing mandatory playlist. Returns the ids that were added.
    pub fn ensure_mandatory(&mut self) -> Vec<&'static str> {
        let mut added = Vec::new();
        for (id, title) in MANDATORY_PLAYLISTS {
            if !self.playlists.iter().any(|playlist| playlist.id == id) {
                self.playlists.push(Playlist::new(id, title));
                added.push(id);
            }
        }
        added
    }

    pub fn get(&self, id: &str) -> Option<&Playlist> {
        self.playlists.iter().find(|playlist| playlist.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Playlist> {
        self.playlists.iter_mut().find(|playlist| playlist.id == id)
    }
}

/// Track id to play count.
pub type MostPlayedMap = HashMap<String, u64>;
