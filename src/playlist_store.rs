//! Canonical persisted playlist model.
//!
//! One document holds every playlist (reserved and user-defined), a second one
//! maps track id to play count. Both are loaded once at construction, mutated
//! in memory, and written back only by [`PlaylistStore::cache_playlist_data`].
//! The most-played playlist is derived from the count map and never stored.

use std::collections::{HashMap, HashSet};

use log::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::StoreError,
    file_adapter::FileAdapter,
    model::{
        is_reserved_id, MostPlayedMap, Playlist, PlaylistData, CURRENT_QUEUE_ID, FAVORITES_ID,
        MOST_PLAYED_ID, MOST_PLAYED_TITLE, RECENTLY_PLAYED_ID,
    },
};

/// Serialized form of both documents, ready to be written off-thread.
pub struct PersistedDocuments {
    playlists_file: FileAdapter,
    playlists_bytes: Vec<u8>,
    most_played_file: FileAdapter,
    most_played_bytes: Vec<u8>,
}

impl PersistedDocuments {
    /// Overwrites both files. Any I/O failure is returned as fatal.
    pub fn write(&self) -> Result<(), StoreError> {
        for (file, bytes) in [
            (&self.playlists_file, &self.playlists_bytes),
            (&self.most_played_file, &self.most_played_bytes),
        ] {
            file.write(bytes).map_err(|source| StoreError::Write {
                path: file.path().to_path_buf(),
                source,
            })?;
        }
        Ok(())
    }
}

pub struct PlaylistStore {
    playlists_file: FileAdapter,
    most_played_file: FileAdapter,
    data: PlaylistData,
    most_played: MostPlayedMap,
    most_played_playlist: Playlist,
    // Session-local increment order, used to break count ties.
    bump_sequence: HashMap<String, u64>,
    next_bump: u64,
}

impl PlaylistStore {
    /// Loads both documents, substituting defaults for anything missing or corrupt.
    pub fn open(playlists_file: FileAdapter, most_played_file: FileAdapter) -> Self {
        let data = Self::load_playlist_data(&playlists_file);
        let most_played = Self::load_most_played(&most_played_file);
        info!(
            "PlaylistStore: loaded {} playlists and {} play counts",
            data.playlists.len(),
            most_played.len()
        );
        let mut store = Self {
            playlists_file,
            most_played_file,
            data,
            most_played,
            most_played_playlist: Playlist::new(MOST_PLAYED_ID, MOST_PLAYED_TITLE),
            bump_sequence: HashMap::new(),
            next_bump: 0,
        };
        store.recompute_most_played();
        store
    }

    fn load_playlist_data(file: &FileAdapter) -> PlaylistData {
        let parsed = file.read().and_then(|bytes| {
            match serde_json::from_slice::<PlaylistData>(&bytes) {
                Ok(data) => Some(data),
                Err(err) => {
                    warn!(
                        "PlaylistStore: playlist document {} is unreadable, using defaults: {}",
                        file.path().display(),
                        err
                    );
                    None
                }
            }
        });
        let Some(data) = parsed else {
            return PlaylistData::with_defaults();
        };

        let mut seen_ids = HashSet::new();
        let mut playlists = Vec::with_capacity(data.playlists.len());
        for mut playlist in data.playlists {
            if playlist.id == MOST_PLAYED_ID || !seen_ids.insert(playlist.id.clone()) {
                debug!("PlaylistStore: dropping stored playlist {}", playlist.id);
                continue;
            }
            let mut seen_songs = HashSet::new();
            playlist.song_ids.retain(|id| seen_songs.insert(id.clone()));
            if playlist.id == CURRENT_QUEUE_ID {
                playlist.title.clear();
            }
            playlists.push(playlist);
        }
        let mut data = PlaylistData { playlists };
        for id in data.ensure_mandatory() {
            warn!("PlaylistStore: reserved playlist {} was missing, recreated", id);
        }
        data
    }

    fn load_most_played(file: &FileAdapter) -> MostPlayedMap {
        let Some(bytes) = file.read() else {
            return MostPlayedMap::new();
        };
        serde_json::from_slice::<MostPlayedMap>(&bytes).unwrap_or_else(|err| {
            warn!(
                "PlaylistStore: play count document {} is unreadable, starting empty: {}",
                file.path().display(),
                err
            );
            MostPlayedMap::new()
        })
    }

    fn reserved(&self, id: &str) -> &Playlist {
        self.data
            .get(id)
            .unwrap_or_else(|| panic!("reserved playlist '{id}' missing after initialization"))
    }

    /// Most-played followed by every stored playlist except the current-queue shadow.
    pub fn fetch_all_playlists(&self) -> Vec<Playlist> {
        let mut playlists = Vec::with_capacity(self.data.playlists.len() + 1);
        playlists.push(self.most_played_playlist.clone());
        playlists.extend(
            self.data
                .playlists
                .iter()
                .filter(|playlist| playlist.id != CURRENT_QUEUE_ID)
                .cloned(),
        );
        playlists
    }

    pub fn fetch_favorites_playlist(&self) -> Playlist {
        self.reserved(FAVORITES_ID).clone()
    }

    pub fn fetch_recently_played_playlist(&self) -> Playlist {
        self.reserved(RECENTLY_PLAYED_ID).clone()
    }

    pub fn fetch_current_queue_playlist(&self) -> Playlist {
        self.reserved(CURRENT_QUEUE_ID).clone()
    }

    pub fn fetch_most_played_playlist(&self) -> Playlist {
        self.most_played_playlist.clone()
    }

    pub fn fetch_user_playlists(&self) -> Vec<Playlist> {
        self.data
            .playlists
            .iter()
            .filter(|playlist| !playlist.is_reserved())
            .cloned()
            .collect()
    }

    pub fn fetch_playlist(&self, playlist_id: &str) -> Option<Playlist> {
        if playlist_id == MOST_PLAYED_ID {
            return Some(self.most_played_playlist.clone());
        }
        self.data.get(playlist_id).cloned()
    }

    pub fn most_played_counts(&self) -> &MostPlayedMap {
        &self.most_played
    }

    /// Inserts `song_id` at the front of the playlist, moving it there if it is
    /// already present. Returns false if the playlist does not exist.
    pub fn add_song_id_to_playlist(&mut self, playlist_id: &str, song_id: &str) -> bool {
        let Some(playlist) = self.stored_playlist_mut(playlist_id) else {
            return false;
        };
        playlist.song_ids.retain(|id| id != song_id);
        playlist.song_ids.insert(0, song_id.to_string());
        true
    }

    /// Removes `song_id` if present.
    pub fn remove_song_id_from_playlist(&mut self, playlist_id: &str, song_id: &str) {
        if let Some(playlist) = self.stored_playlist_mut(playlist_id) {
            playlist.song_ids.retain(|id| id != song_id);
        }
    }

    /// Replaces the playlist contents with `song_ids` in the given order,
    /// dropping repeated ids.
    pub fn replace_playlist_song_ids(&mut self, playlist_id: &str, song_ids: &[String]) -> bool {
        let Some(playlist) = self.stored_playlist_mut(playlist_id) else {
            return false;
        };
        let mut seen = HashSet::new();
        playlist.song_ids = song_ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect();
        true
    }

    /// Drops entries past `limit` from the tail. A limit of 0 keeps everything.
    pub fn truncate_playlist(&mut self, playlist_id: &str, limit: usize) {
        if limit == 0 {
            return;
        }
        if let Some(playlist) = self.stored_playlist_mut(playlist_id) {
            playlist.song_ids.truncate(limit);
        }
    }

    fn stored_playlist_mut(&mut self, playlist_id: &str) -> Option<&mut Playlist> {
        if playlist_id == MOST_PLAYED_ID {
            warn!("PlaylistStore: most-played is derived from play counts and cannot be edited");
            return None;
        }
        let playlist = self.data.get_mut(playlist_id);
        if playlist.is_none() {
            debug!("PlaylistStore: unknown playlist {}", playlist_id);
        }
        playlist
    }

    /// Increments the play count for `song_id`, seeding it to 1.
    pub fn add_to_most_played(&mut self, song_id: &str) {
        *self.most_played.entry(song_id.to_string()).or_insert(0) += 1;
        self.next_bump += 1;
        self.bump_sequence.insert(song_id.to_string(), self.next_bump);
        self.recompute_most_played();
    }

    /// Deletes the play count for `song_id` outright.
    pub fn remove_from_most_played(&mut self, song_id: &str) {
        self.most_played.remove(song_id);
        self.bump_sequence.remove(song_id);
        self.recompute_most_played();
    }

    // Count descending, then most recently incremented, then id.
    fn recompute_most_played(&mut self) {
        let song_ids = {
            let mut entries: Vec<(&String, &u64)> = self.most_played.iter().collect();
            entries.sort_by(|(a_id, a_count), (b_id, b_count)| {
                b_count
                    .cmp(a_count)
                    .then_with(|| {
                        self.bump_sequence
                            .get(*b_id)
                            .cmp(&self.bump_sequence.get(*a_id))
                    })
                    .then_with(|| a_id.cmp(b_id))
            });
            entries.into_iter().map(|(id, _)| id.clone()).collect()
        };
        self.most_played_playlist.song_ids = song_ids;
    }

    /// Creates a user playlist with a generated id.
    pub fn save_user_playlist(&mut self, title: &str, song_ids: &[String]) -> Playlist {
        let mut seen = HashSet::new();
        let playlist = Playlist {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            song_ids: song_ids
                .iter()
                .filter(|id| seen.insert(id.as_str()))
                .cloned()
                .collect(),
        };
        self.data.playlists.push(playlist.clone());
        playlist
    }

    /// Deletes a user playlist. Reserved ids are refused.
    pub fn delete_user_playlist(&mut self, playlist_id: &str) -> Option<Playlist> {
        if is_reserved_id(playlist_id) {
            warn!("PlaylistStore: refusing to delete reserved playlist {}", playlist_id);
            return None;
        }
        let position = self
            .data
            .playlists
            .iter()
            .position(|playlist| playlist.id == playlist_id)?;
        Some(self.data.playlists.remove(position))
    }

    /// Renames a user playlist by deleting and recreating it under the same id.
    pub fn rename_user_playlist(&mut self, playlist_id: &str, title: &str) -> bool {
        let Some(mut playlist) = self.delete_user_playlist(playlist_id) else {
            return false;
        };
        playlist.title = title.to_string();
        self.data.playlists.push(playlist);
        true
    }

    /// Removes every song id currently in the current-queue playlist.
    pub fn clear_current_queue_playlist(&mut self) {
        for song_id in self.fetch_current_queue_playlist().song_ids {
            self.remove_song_id_from_playlist(CURRENT_QUEUE_ID, &song_id);
        }
    }

    /// Encodes both documents without touching the filesystem.
    pub fn serialize_documents(&self) -> Result<PersistedDocuments, StoreError> {
        Ok(PersistedDocuments {
            playlists_file: self.playlists_file.clone(),
            playlists_bytes: serde_json::to_vec_pretty(&self.data)?,
            most_played_file: self.most_played_file.clone(),
            most_played_bytes: serde_json::to_vec_pretty(&self.most_played)?,
        })
    }

    /// Serializes and overwrites both documents. Blocking I/O.
    pub fn cache_playlist_data(&self) -> Result<(), StoreError> {
        self.serialize_documents()?.write()
    }
}
