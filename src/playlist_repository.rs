//! Reactive façade over [`PlaylistStore`].
//!
//! Each reserved playlist, the user playlist collection and the play-count map
//! live in a `watch` slot. Every mutation runs the matching store operation and
//! then re-reads the affected slots from the store; the repository never
//! predicts the resulting state on its own.

use std::{
    sync::{
        mpsc::{self, Receiver, SyncSender, TrySendError},
        Arc, Mutex, MutexGuard,
    },
    thread::{self, JoinHandle},
};

use log::{debug, error, info};
use tokio::sync::watch;

use crate::{
    error::StoreError,
    model::{MostPlayedMap, Playlist, CURRENT_QUEUE_ID, FAVORITES_ID, RECENTLY_PLAYED_ID},
    playlist_store::PlaylistStore,
};

/// Which slots a mutation touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Favorites,
    RecentlyPlayed,
    CurrentQueue,
    MostPlayed,
    UserPlaylists,
}

pub struct PlaylistRepository {
    store: Mutex<PlaylistStore>,
    recently_played_limit: usize,
    favorites: watch::Sender<Playlist>,
    recently_played: watch::Sender<Playlist>,
    current_queue: watch::Sender<Playlist>,
    most_played: watch::Sender<Playlist>,
    most_played_counts: watch::Sender<MostPlayedMap>,
    user_playlists: watch::Sender<Vec<Playlist>>,
}

impl PlaylistRepository {
    /// Seeds every slot from the store. `recently_played_limit` of 0 means unbounded.
    pub fn new(store: PlaylistStore, recently_played_limit: usize) -> Self {
        let (favorites, _) = watch::channel(store.fetch_favorites_playlist());
        let (recently_played, _) = watch::channel(store.fetch_recently_played_playlist());
        let (current_queue, _) = watch::channel(store.fetch_current_queue_playlist());
        let (most_played, _) = watch::channel(store.fetch_most_played_playlist());
        let (most_played_counts, _) = watch::channel(store.most_played_counts().clone());
        let (user_playlists, _) = watch::channel(store.fetch_user_playlists());
        Self {
            store: Mutex::new(store),
            recently_played_limit,
            favorites,
            recently_played,
            current_queue,
            most_played,
            most_played_counts,
            user_playlists,
        }
    }

    fn lock_store(&self) -> MutexGuard<'_, PlaylistStore> {
        match self.store.lock() {
            Ok(store) => store,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn mutate<R>(&self, slots: &[Slot], apply: impl FnOnce(&mut PlaylistStore) -> R) -> R {
        let mut store = self.lock_store();
        let result = apply(&mut store);
        for slot in slots {
            self.republish(&store, *slot);
        }
        result
    }

    fn republish(&self, store: &PlaylistStore, slot: Slot) {
        match slot {
            Slot::Favorites => {
                self.favorites.send_replace(store.fetch_favorites_playlist());
            }
            Slot::RecentlyPlayed => {
                self.recently_played
                    .send_replace(store.fetch_recently_played_playlist());
            }
            Slot::CurrentQueue => {
                self.current_queue
                    .send_replace(store.fetch_current_queue_playlist());
            }
            Slot::MostPlayed => {
                self.most_played.send_replace(store.fetch_most_played_playlist());
                self.most_played_counts
                    .send_replace(store.most_played_counts().clone());
            }
            Slot::UserPlaylists => {
                self.user_playlists.send_replace(store.fetch_user_playlists());
            }
        }
    }

    fn slot_for(playlist_id: &str) -> Slot {
        match playlist_id {
            FAVORITES_ID => Slot::Favorites,
            RECENTLY_PLAYED_ID => Slot::RecentlyPlayed,
            CURRENT_QUEUE_ID => Slot::CurrentQueue,
            _ => Slot::UserPlaylists,
        }
    }

    pub fn subscribe_favorites(&self) -> watch::Receiver<Playlist> {
        self.favorites.subscribe()
    }

    pub fn subscribe_recently_played(&self) -> watch::Receiver<Playlist> {
        self.recently_played.subscribe()
    }

    pub fn subscribe_current_queue(&self) -> watch::Receiver<Playlist> {
        self.current_queue.subscribe()
    }

    pub fn subscribe_most_played(&self) -> watch::Receiver<Playlist> {
        self.most_played.subscribe()
    }

    pub fn subscribe_most_played_counts(&self) -> watch::Receiver<MostPlayedMap> {
        self.most_played_counts.subscribe()
    }

    pub fn subscribe_user_playlists(&self) -> watch::Receiver<Vec<Playlist>> {
        self.user_playlists.subscribe()
    }

    pub fn favorites(&self) -> Playlist {
        self.favorites.borrow().clone()
    }

    pub fn recently_played(&self) -> Playlist {
        self.recently_played.borrow().clone()
    }

    pub fn current_queue(&self) -> Playlist {
        self.current_queue.borrow().clone()
    }

    pub fn most_played(&self) -> Playlist {
        self.most_played.borrow().clone()
    }

    pub fn most_played_counts(&self) -> MostPlayedMap {
        self.most_played_counts.borrow().clone()
    }

    pub fn user_playlists(&self) -> Vec<Playlist> {
        self.user_playlists.borrow().clone()
    }

    pub fn fetch_all_playlists(&self) -> Vec<Playlist> {
        self.lock_store().fetch_all_playlists()
    }

    /// Pure query against the last published favorites snapshot.
    pub fn is_favorite(&self, song_id: &str) -> bool {
        self.favorites.borrow().contains(song_id)
    }

    pub fn add_to_favorites(&self, song_id: &str) {
        self.mutate(&[Slot::Favorites], |store| {
            store.add_song_id_to_playlist(FAVORITES_ID, song_id);
        });
    }

    pub fn remove_from_favorites(&self, song_id: &str) {
        self.mutate(&[Slot::Favorites], |store| {
            store.remove_song_id_from_playlist(FAVORITES_ID, song_id);
        });
    }

    /// Flips favorite membership and returns the new state.
    pub fn toggle_favorite(&self, song_id: &str) -> bool {
        self.mutate(&[Slot::Favorites], |store| {
            if store.fetch_favorites_playlist().contains(song_id) {
                store.remove_song_id_from_playlist(FAVORITES_ID, song_id);
                false
            } else {
                store.add_song_id_to_playlist(FAVORITES_ID, song_id);
                true
            }
        })
    }

    pub fn add_to_recently_played(&self, song_id: &str) {
        let limit = self.recently_played_limit;
        self.mutate(&[Slot::RecentlyPlayed], |store| {
            store.add_song_id_to_playlist(RECENTLY_PLAYED_ID, song_id);
            store.truncate_playlist(RECENTLY_PLAYED_ID, limit);
        });
    }

    pub fn remove_from_recently_played(&self, song_id: &str) {
        self.mutate(&[Slot::RecentlyPlayed], |store| {
            store.remove_song_id_from_playlist(RECENTLY_PLAYED_ID, song_id);
        });
    }

    pub fn add_to_most_played(&self, song_id: &str) {
        self.mutate(&[Slot::MostPlayed], |store| store.add_to_most_played(song_id));
    }

    pub fn remove_from_most_played(&self, song_id: &str) {
        self.mutate(&[Slot::MostPlayed], |store| {
            store.remove_from_most_played(song_id)
        });
    }

    pub fn add_to_current_queue(&self, song_id: &str) {
        self.mutate(&[Slot::CurrentQueue], |store| {
            store.add_song_id_to_playlist(CURRENT_QUEUE_ID, song_id);
        });
    }

    pub fn remove_from_current_queue(&self, song_id: &str) {
        self.mutate(&[Slot::CurrentQueue], |store| {
            store.remove_song_id_from_playlist(CURRENT_QUEUE_ID, song_id);
        });
    }

    /// Rewrites the current-queue playlist to `song_ids` in queue order.
    pub fn replace_current_queue(&self, song_ids: &[String]) {
        self.mutate(&[Slot::CurrentQueue], |store| {
            store.replace_playlist_song_ids(CURRENT_QUEUE_ID, song_ids);
        });
    }

    pub fn clear_current_queue(&self) {
        self.mutate(&[Slot::CurrentQueue], |store| {
            store.clear_current_queue_playlist()
        });
    }

    pub fn save_user_playlist(&self, title: &str, song_ids: &[String]) -> Playlist {
        self.mutate(&[Slot::UserPlaylists], |store| {
            store.save_user_playlist(title, song_ids)
        })
    }

    pub fn delete_user_playlist(&self, playlist_id: &str) -> bool {
        self.mutate(&[Slot::UserPlaylists], |store| {
            store.delete_user_playlist(playlist_id).is_some()
        })
    }

    pub fn rename_user_playlist(&self, playlist_id: &str, title: &str) -> bool {
        self.mutate(&[Slot::UserPlaylists], |store| {
            store.rename_user_playlist(playlist_id, title)
        })
    }

    pub fn add_song_to_user_playlist(&self, playlist_id: &str, song_id: &str) -> bool {
        if crate::model::is_reserved_id(playlist_id) {
            return false;
        }
        self.mutate(&[Self::slot_for(playlist_id)], |store| {
            store.add_song_id_to_playlist(playlist_id, song_id)
        })
    }

    pub fn remove_song_from_user_playlist(&self, playlist_id: &str, song_id: &str) {
        if crate::model::is_reserved_id(playlist_id) {
            return;
        }
        self.mutate(&[Self::slot_for(playlist_id)], |store| {
            store.remove_song_id_from_playlist(playlist_id, song_id)
        });
    }

    /// Serializes under the store lock, then writes with the lock released.
    /// Blocking; call from a thread that does not reconcile queue state.
    pub fn flush(&self) -> Result<(), StoreError> {
        let documents = self.lock_store().serialize_documents()?;
        documents.write()
    }
}

/// Background thread owning blocking playlist writes.
pub struct FlushWorker {
    sender: SyncSender<()>,
    join_handle: JoinHandle<Result<(), StoreError>>,
}

impl FlushWorker {
    pub fn spawn(repository: Arc<PlaylistRepository>) -> std::io::Result<Self> {
        // One pending request is enough: a flush writes the whole state.
        let (sender, receiver) = mpsc::sync_channel::<()>(1);
        let join_handle = thread::Builder::new()
            .name("playlist-flush".to_string())
            .spawn(move || Self::run(repository, receiver))?;
        Ok(Self {
            sender,
            join_handle,
        })
    }

    fn run(repository: Arc<PlaylistRepository>, receiver: Receiver<()>) -> Result<(), StoreError> {
        info!("FlushWorker: started");
        while receiver.recv().is_ok() {
            if let Err(err) = repository.flush() {
                error!("FlushWorker: failed to persist playlists: {}", err);
                return Err(err);
            }
            debug!("FlushWorker: playlists persisted");
        }
        repository.flush()
    }

    /// A cloneable trigger for enqueuing flushes from other threads.
    pub fn requester(&self) -> FlushRequester {
        FlushRequester {
            sender: self.sender.clone(),
        }
    }

    pub fn request_flush(&self) -> Result<(), StoreError> {
        self.requester().request()
    }

    /// Performs a final flush and returns the first fatal write error, if any.
    pub fn shutdown(self) -> Result<(), StoreError> {
        drop(self.sender);
        match self.join_handle.join() {
            Ok(result) => result,
            Err(_) => Err(StoreError::FlushWorkerStopped),
        }
    }
}

#[derive(Clone)]
pub struct FlushRequester {
    sender: SyncSender<()>,
}

impl FlushRequester {
    pub fn request(&self) -> Result<(), StoreError> {
        match self.sender.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => Ok(()),
            Err(TrySendError::Disconnected(())) => Err(StoreError::FlushWorkerStopped),
        }
    }
}
