//! Queue synchronizer.
//!
//! Owns the live relationship between a playback engine and the observable
//! queue. Every intent mutates the engine and the local mirror together, then
//! persists queue membership into the current-queue playlist. Engine event
//! batches refresh now-playing, playback state and current index, and genuine
//! track transitions feed the most-played and recently-played playlists.
//!
//! The connection is not thread-safe on purpose: it is owned by exactly one
//! [`crate::queue_worker::QueueWorker`], which serializes commands and engine
//! events onto a single thread.

use std::{collections::HashMap, sync::Arc};

use log::{debug, error, info, warn};
use rand::seq::{IndexedRandom, SliceRandom};
use tokio::sync::watch;

use crate::{
    engine::{
        EngineErrorCode, EngineEvent, PlaybackEngine, PlaybackParameters, PlaybackState,
        RepeatMode,
    },
    model::Track,
    playlist_repository::{FlushRequester, PlaylistRepository},
};

/// Lifecycle of a connection. There is no automatic reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Uninitialized,
    Connecting,
    Ready,
    Disconnected,
}

/// Read side of every observable slot owned by a connection.
#[derive(Debug, Clone)]
pub struct QueueObservers {
    pub queue: watch::Receiver<Vec<Track>>,
    /// `None` when the queue has no current item.
    pub current_index: watch::Receiver<Option<usize>>,
    /// `None` when nothing is playing.
    pub now_playing: watch::Receiver<Option<Track>>,
    pub is_playing: watch::Receiver<bool>,
    /// Stays true for as long as the connection is stuck in `Connecting`.
    pub is_initializing: watch::Receiver<bool>,
    pub connection_state: watch::Receiver<ConnectionState>,
}

struct QueueSlots {
    queue: watch::Sender<Vec<Track>>,
    current_index: watch::Sender<Option<usize>>,
    now_playing: watch::Sender<Option<Track>>,
    is_playing: watch::Sender<bool>,
    is_initializing: watch::Sender<bool>,
    connection_state: watch::Sender<ConnectionState>,
}

impl QueueSlots {
    fn new() -> Self {
        Self {
            queue: watch::channel(Vec::new()).0,
            current_index: watch::channel(None).0,
            now_playing: watch::channel(None).0,
            is_playing: watch::channel(false).0,
            is_initializing: watch::channel(false).0,
            connection_state: watch::channel(ConnectionState::Uninitialized).0,
        }
    }
}

fn set_if_changed<T: PartialEq>(slot: &watch::Sender<T>, value: T) {
    slot.send_if_modified(|current| {
        if *current == value {
            false
        } else {
            *current = value;
            true
        }
    });
}

fn move_within<T>(items: &mut Vec<T>, from: usize, to: usize) {
    let item = items.remove(from);
    items.insert(to, item);
}

fn song_ids(tracks: &[Track]) -> Vec<String> {
    tracks.iter().map(|track| track.id.clone()).collect()
}

pub struct QueueConnection {
    engine: Box<dyn PlaybackEngine>,
    repository: Arc<PlaylistRepository>,
    catalog_root_id: String,
    catalog: HashMap<String, Track>,
    catalog_order: Vec<Track>,
    mirror: Vec<Track>,
    state: ConnectionState,
    slots: QueueSlots,
    flush: Option<FlushRequester>,
}

impl QueueConnection {
    pub fn new(
        engine: Box<dyn PlaybackEngine>,
        repository: Arc<PlaylistRepository>,
        catalog_root_id: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            repository,
            catalog_root_id: catalog_root_id.into(),
            catalog: HashMap::new(),
            catalog_order: Vec::new(),
            mirror: Vec::new(),
            state: ConnectionState::Uninitialized,
            slots: QueueSlots::new(),
            flush: None,
        }
    }

    /// Requests a background flush after every genuine track transition.
    pub fn with_flush_requester(mut self, flush: FlushRequester) -> Self {
        self.flush = Some(flush);
        self
    }

    pub fn observers(&self) -> QueueObservers {
        QueueObservers {
            queue: self.slots.queue.subscribe(),
            current_index: self.slots.current_index.subscribe(),
            now_playing: self.slots.now_playing.subscribe(),
            is_playing: self.slots.is_playing.subscribe(),
            is_initializing: self.slots.is_initializing.subscribe(),
            connection_state: self.slots.connection_state.subscribe(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn queue(&self) -> &[Track] {
        &self.mirror
    }

    pub fn current_index(&self) -> Option<usize> {
        *self.slots.current_index.borrow()
    }

    pub fn now_playing(&self) -> Option<Track> {
        self.slots.now_playing.borrow().clone()
    }

    pub fn is_playing(&self) -> bool {
        *self.slots.is_playing.borrow()
    }

    /// Tracks fetched from the catalog root, in catalog order.
    pub fn catalog(&self) -> &[Track] {
        &self.catalog_order
    }

    pub fn catalog_track(&self, track_id: &str) -> Option<&Track> {
        self.catalog.get(track_id)
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.engine.duration_ms()
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        set_if_changed(&self.slots.connection_state, state);
    }

    /// Connects to the engine and fetches the catalog. On failure the
    /// connection stays in `Connecting` with `is_initializing` raised; callers
    /// impose their own timeout.
    pub fn connect(&mut self) {
        if self.state != ConnectionState::Uninitialized {
            warn!("QueueConnection: connect ignored in state {:?}", self.state);
            return;
        }
        self.set_state(ConnectionState::Connecting);
        set_if_changed(&self.slots.is_initializing, true);
        self.catalog.clear();
        self.catalog_order.clear();

        if let Err(err) = self.engine.connect() {
            error!("QueueConnection: {}", err);
            return;
        }
        let tracks = match self.engine.get_children(&self.catalog_root_id) {
            Ok(tracks) => tracks,
            Err(err) => {
                error!("QueueConnection: catalog fetch failed: {}", err);
                return;
            }
        };
        info!("QueueConnection: catalog loaded with {} tracks", tracks.len());
        self.catalog = tracks
            .iter()
            .map(|track| (track.id.clone(), track.clone()))
            .collect();
        self.catalog_order = tracks;

        self.set_state(ConnectionState::Ready);
        set_if_changed(&self.slots.is_initializing, false);
        self.resync_mirror_from_engine();
        self.refresh_playback_state();
    }

    /// Tears the connection down. Applied mutations are not rolled back.
    pub fn disconnect(&mut self) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        self.engine.release();
        self.set_state(ConnectionState::Disconnected);
        set_if_changed(&self.slots.is_initializing, false);
        set_if_changed(&self.slots.is_playing, false);
        info!("QueueConnection: disconnected");
    }

    fn ensure_ready(&self, operation: &str) -> bool {
        if self.state == ConnectionState::Ready {
            return true;
        }
        debug!(
            "QueueConnection: {} ignored in state {:?}",
            operation, self.state
        );
        false
    }

    /// Prefers locally known metadata over what the engine reports.
    fn resolve(&self, track: Track) -> Track {
        match self.catalog.get(&track.id) {
            Some(known) => known.clone(),
            None => track,
        }
    }

    fn publish_queue(&self) {
        self.slots.queue.send_replace(self.mirror.clone());
    }

    fn mirror_position(&self, track_id: &str) -> Option<usize> {
        self.mirror.iter().position(|track| track.id == track_id)
    }

    fn resync_mirror_from_engine(&mut self) {
        let engine_items: Vec<Track> = (0..self.engine.item_count())
            .filter_map(|index| self.engine.item_at(index))
            .map(|track| self.resolve(track))
            .collect();
        if song_ids(&engine_items) != song_ids(&self.mirror) {
            debug!(
                "QueueConnection: mirror resynced from engine ({} items)",
                engine_items.len()
            );
            self.mirror = engine_items;
            self.publish_queue();
        }
    }

    /// Re-reads now-playing, playing flag and current index from the engine.
    fn refresh_playback_state(&mut self) {
        let now_playing = self.engine.current_item().map(|track| self.resolve(track));
        self.slots.now_playing.send_replace(now_playing);

        let is_playing = matches!(
            self.engine.playback_state(),
            PlaybackState::Buffering | PlaybackState::Ready
        ) && self.engine.play_when_ready();
        set_if_changed(&self.slots.is_playing, is_playing);

        set_if_changed(&self.slots.current_index, self.engine.current_index());
    }

    /// Applies one batched engine notification.
    pub fn on_engine_events(&mut self, events: &[EngineEvent]) {
        if self.state != ConnectionState::Ready {
            debug!(
                "QueueConnection: dropping {} engine events in state {:?}",
                events.len(),
                self.state
            );
            return;
        }
        // Credit the track each transition landed on, not whatever is current
        // by the time this batch is applied.
        let mut played = Vec::new();
        for event in events {
            match event {
                EngineEvent::Error(code) => Self::log_engine_error(*code),
                EngineEvent::TimelineChanged => self.resync_mirror_from_engine(),
                EngineEvent::MediaItemTransition { track_id, reason } => {
                    debug!(
                        "QueueConnection: media item transition to {:?} ({:?})",
                        track_id, reason
                    );
                    if let Some(track_id) = track_id {
                        played.push(track_id.as_str());
                    }
                }
                EngineEvent::RepeatModeChanged(mode) => {
                    debug!("QueueConnection: repeat mode is now {:?}", mode);
                }
                EngineEvent::MetadataChanged
                | EngineEvent::PlaybackStateChanged(_)
                | EngineEvent::PlayWhenReadyChanged(_) => {}
            }
        }
        self.refresh_playback_state();

        if played.is_empty() {
            return;
        }
        for track_id in played {
            self.repository.add_to_most_played(track_id);
            self.repository.add_to_recently_played(track_id);
        }
        if let Some(flush) = &self.flush {
            if let Err(err) = flush.request() {
                error!("QueueConnection: could not schedule playlist flush: {}", err);
            }
        }
    }

    fn log_engine_error(code: EngineErrorCode) {
        match code {
            EngineErrorCode::ConnectionFailed | EngineErrorCode::ConnectionTimeout => {
                warn!("QueueConnection: engine network error: {}", code)
            }
            EngineErrorCode::BadHttpStatus
            | EngineErrorCode::InvalidContentType
            | EngineErrorCode::CleartextNotPermitted => {
                error!("QueueConnection: engine source error: {}", code)
            }
            EngineErrorCode::Other(_) => error!("QueueConnection: {}", code),
        }
    }

    /// Appends `track` unless it is already queued. An empty queue starts
    /// playing it instead.
    pub fn add_to_queue(&mut self, track: Track) {
        if !self.ensure_ready("add_to_queue") {
            return;
        }
        if self.mirror_position(&track.id).is_some() {
            debug!("QueueConnection: {} already queued", track.id);
            return;
        }
        if self.mirror.is_empty() {
            self.play_media_item(track.clone(), vec![track], false);
            return;
        }
        let track = self.resolve(track);
        let end = self.engine.item_count();
        self.engine.add_item(end, track.clone());
        self.mirror.push(track.clone());
        self.publish_queue();
        self.refresh_playback_state();
        self.repository.add_to_current_queue(&track.id);
    }

    /// Places `track` right after the playing item.
    ///
    /// A track queued after the current index moves to `current + 1`. A track
    /// at or before the current index moves to `current`, which shifts the
    /// playing item back by one and leaves `track` next. An unqueued track is
    /// inserted at `current + 1`.
    pub fn play_next(&mut self, track: Track) {
        if !self.ensure_ready("play_next") {
            return;
        }
        if self.now_playing().as_ref() == Some(&track) {
            debug!("QueueConnection: {} is already playing", track.id);
            return;
        }
        if self.mirror.is_empty() {
            self.play_media_item(track.clone(), vec![track], false);
            return;
        }
        let current = self
            .engine
            .current_index()
            .or(self.current_index())
            .unwrap_or(0);
        let track = self.resolve(track);
        match self.mirror_position(&track.id) {
            Some(position) if position > current => {
                let target = (current + 1).min(self.mirror.len() - 1);
                if position != target {
                    self.engine.move_item(position, target);
                    move_within(&mut self.mirror, position, target);
                }
            }
            Some(position) if position < current => {
                self.engine.move_item(position, current);
                move_within(&mut self.mirror, position, current);
            }
            Some(_) => {
                debug!("QueueConnection: {} is at the current index", track.id);
                return;
            }
            None => {
                let target = (current + 1).min(self.mirror.len());
                self.engine.add_item(target, track.clone());
                self.mirror.insert(target, track.clone());
            }
        }
        self.publish_queue();
        self.refresh_playback_state();
        self.repository.add_to_current_queue(&track.id);
    }

    /// Plays `tracks` shuffled, starting from a randomly chosen one.
    pub fn shuffle_and_play(&mut self, tracks: Vec<Track>) {
        let Some(anchor) = tracks.choose(&mut rand::rng()).cloned() else {
            debug!("QueueConnection: nothing to shuffle");
            return;
        };
        self.play_media_item(anchor, tracks, true);
    }

    /// Replaces the queue with `candidates` and starts playing `track`.
    ///
    /// With `shuffle`, the other candidates are shuffled behind `track`, which
    /// always lands at index 0. The persisted current-queue playlist is
    /// rewritten to the resulting order.
    pub fn play_media_item(&mut self, track: Track, candidates: Vec<Track>, shuffle: bool) {
        if !self.ensure_ready("play_media_item") {
            return;
        }
        let mut seen = std::collections::HashSet::new();
        let mut items: Vec<Track> = candidates
            .into_iter()
            .filter(|candidate| seen.insert(candidate.id.clone()))
            .map(|candidate| self.resolve(candidate))
            .collect();
        let track = self.resolve(track);

        let start_index = if shuffle {
            items.retain(|candidate| candidate != &track);
            items.shuffle(&mut rand::rng());
            items.insert(0, track);
            0
        } else {
            match items.iter().position(|candidate| candidate == &track) {
                Some(position) => position,
                None => {
                    items.insert(0, track);
                    0
                }
            }
        };

        self.engine.set_items(items.clone(), start_index);
        self.engine.prepare();
        self.engine.play();
        self.mirror = items;
        self.publish_queue();
        self.refresh_playback_state();
        self.repository.replace_current_queue(&song_ids(&self.mirror));
    }

    /// Shuffles the queue in place around the playing track, which ends up at
    /// index 0 in both the engine and the mirror.
    pub fn shuffle_songs_in_queue(&mut self) {
        if !self.ensure_ready("shuffle_songs_in_queue") || self.mirror.len() < 2 {
            return;
        }
        let mut rng = rand::rng();
        match self.engine.current_index() {
            Some(current) => {
                if current != 0 {
                    self.engine.move_item(current, 0);
                    move_within(&mut self.mirror, current, 0);
                }
                let mut rest = self.mirror.split_off(1);
                rest.shuffle(&mut rng);
                self.engine.replace_range(1, rest.len(), rest.clone());
                self.mirror.extend(rest);
            }
            None => {
                self.mirror.shuffle(&mut rng);
                self.engine
                    .replace_range(0, self.mirror.len(), self.mirror.clone());
            }
        }
        self.publish_queue();
        self.refresh_playback_state();
        self.repository.replace_current_queue(&song_ids(&self.mirror));
    }

    /// Moves one queue entry. The current index is re-read from the engine.
    pub fn move_media_item(&mut self, from: usize, to: usize) {
        if !self.ensure_ready("move_media_item") {
            return;
        }
        let len = self.mirror.len();
        if from >= len || to >= len {
            warn!(
                "QueueConnection: move {} -> {} out of bounds for {} items",
                from, to, len
            );
            return;
        }
        if from == to {
            return;
        }
        self.engine.move_item(from, to);
        move_within(&mut self.mirror, from, to);
        self.publish_queue();
        set_if_changed(&self.slots.current_index, self.engine.current_index());
        self.repository.replace_current_queue(&song_ids(&self.mirror));
    }

    /// Removes a queued track that is not currently playing.
    pub fn remove_from_queue(&mut self, track_id: &str) -> bool {
        if !self.ensure_ready("remove_from_queue") {
            return false;
        }
        let Some(position) = self.mirror_position(track_id) else {
            return false;
        };
        if self.engine.current_index() == Some(position) {
            warn!("QueueConnection: refusing to remove the playing track {}", track_id);
            return false;
        }
        self.engine.replace_range(position, 1, Vec::new());
        self.mirror.remove(position);
        self.publish_queue();
        self.refresh_playback_state();
        self.repository.remove_from_current_queue(track_id);
        true
    }

    /// Empties engine, mirror and the persisted current-queue playlist.
    pub fn clear_queue(&mut self) {
        if !self.ensure_ready("clear_queue") {
            return;
        }
        self.engine.clear_items();
        self.mirror.clear();
        self.publish_queue();
        self.slots.now_playing.send_replace(None);
        set_if_changed(&self.slots.current_index, None);
        set_if_changed(&self.slots.is_playing, false);
        self.repository.clear_current_queue();
    }

    /// Returns whether the engine actually advanced.
    pub fn play_next_song(&mut self) -> bool {
        if !self.ensure_ready("play_next_song") {
            return false;
        }
        let moved = self.engine.seek_to_next();
        self.refresh_playback_state();
        moved
    }

    /// Returns whether the engine actually went back.
    pub fn play_previous_song(&mut self) -> bool {
        if !self.ensure_ready("play_previous_song") {
            return false;
        }
        let moved = self.engine.seek_to_previous();
        self.refresh_playback_state();
        moved
    }

    pub fn play(&mut self) {
        if self.ensure_ready("play") {
            self.engine.play();
            self.refresh_playback_state();
        }
    }

    pub fn pause(&mut self) {
        if self.ensure_ready("pause") {
            self.engine.pause();
            self.refresh_playback_state();
        }
    }

    pub fn toggle_play_pause(&mut self) {
        if self.is_playing() {
            self.pause();
        } else {
            self.play();
        }
    }

    pub fn seek_to(&mut self, position_ms: u64) {
        if self.ensure_ready("seek_to") {
            self.engine.seek_to(position_ms);
        }
    }

    pub fn set_repeat_mode(&mut self, mode: RepeatMode) {
        if self.ensure_ready("set_repeat_mode") {
            self.engine.set_repeat_mode(mode);
        }
    }

    pub fn repeat_mode(&self) -> RepeatMode {
        self.engine.repeat_mode()
    }

    pub fn set_playback_parameters(&mut self, parameters: PlaybackParameters) {
        if self.ensure_ready("set_playback_parameters") {
            self.engine.set_playback_parameters(parameters);
        }
    }

    pub fn playback_parameters(&self) -> PlaybackParameters {
        self.engine.playback_parameters()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        engine::{EngineEventSink, MemoryEngine},
        file_adapter::FileAdapter,
        playlist_store::PlaylistStore,
        protocol::Message,
    };
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver};

    struct ConnectionHarness {
        _dir: TempDir,
        connection: QueueConnection,
        engine: Arc<Mutex<MemoryEngine>>,
        repository: Arc<PlaylistRepository>,
        events: UnboundedReceiver<Message>,
    }

    impl ConnectionHarness {
        fn new(catalog_ids: &[&str]) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let store = PlaylistStore::open(
                FileAdapter::new(dir.path().join("playlists.json")),
                FileAdapter::new(dir.path().join("most_played.json")),
            );
            let repository = Arc::new(PlaylistRepository::new(store, 0));
            let (sender, events) = mpsc::unbounded_channel();
            let engine = Arc::new(Mutex::new(
                MemoryEngine::new("root", tracks(catalog_ids))
                    .with_event_sink(EngineEventSink::new(sender)),
            ));
            let mut connection = QueueConnection::new(
                Box::new(Arc::clone(&engine)),
                Arc::clone(&repository),
                "root",
            );
            connection.connect();
            let mut harness = Self {
                _dir: dir,
                connection,
                engine,
                repository,
                events,
            };
            harness.pump();
            harness
        }

        /// Delivers pending engine batches the way the worker would.
        fn pump(&mut self) {
            loop {
                match self.events.try_recv() {
                    Ok(Message::EngineEvents(batch)) => self.connection.on_engine_events(&batch),
                    Ok(Message::Command(_)) => {}
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                }
            }
        }

        fn queue_ids(&self) -> Vec<String> {
            song_ids(self.connection.queue())
        }

        fn engine_ids(&self) -> Vec<String> {
            song_ids(self.engine.lock().unwrap().items())
        }

        fn now_playing_id(&self) -> Option<String> {
            self.connection.now_playing().map(|track| track.id)
        }

        fn play_ids(&mut self, ids: &[&str], start: &str) {
            self.connection
                .play_media_item(Track::new(start, start), tracks(ids), false);
            self.pump();
        }
    }

    fn tracks(ids: &[&str]) -> Vec<Track> {
        ids.iter().map(|id| Track::new(*id, format!("Title {id}"))).collect()
    }

    fn track(id: &str) -> Track {
        Track::new(id, "stale engine title")
    }

    #[test]
    fn test_connect_loads_catalog_and_becomes_ready() {
        let harness = ConnectionHarness::new(&["x", "y"]);
        assert_eq!(harness.connection.state(), ConnectionState::Ready);
        assert_eq!(harness.connection.catalog().len(), 2);
        let observers = harness.connection.observers();
        assert!(!*observers.is_initializing.borrow());
        assert_eq!(*observers.connection_state.borrow(), ConnectionState::Ready);
    }

    #[test]
    fn test_failed_connect_leaves_initializing_flag_raised() {
        let dir = tempfile::tempdir().unwrap();
        let store = PlaylistStore::open(
            FileAdapter::new(dir.path().join("p.json")),
            FileAdapter::new(dir.path().join("m.json")),
        );
        let repository = Arc::new(PlaylistRepository::new(store, 0));
        let mut connection = QueueConnection::new(
            Box::new(
                MemoryEngine::new("root", tracks(&["a"]))
                    .with_connect_failure("service unavailable"),
            ),
            repository,
            "root",
        );
        connection.connect();
        let observers = connection.observers();
        assert_eq!(connection.state(), ConnectionState::Connecting);
        assert!(*observers.is_initializing.borrow());

        connection.add_to_queue(track("a"));
        assert!(connection.queue().is_empty());
    }

    #[test]
    fn test_catalog_fetch_failure_also_stalls() {
        let dir = tempfile::tempdir().unwrap();
        let store = PlaylistStore::open(
            FileAdapter::new(dir.path().join("p.json")),
            FileAdapter::new(dir.path().join("m.json")),
        );
        let repository = Arc::new(PlaylistRepository::new(store, 0));
        let mut connection = QueueConnection::new(
            Box::new(MemoryEngine::new("root", tracks(&["a"]))),
            repository,
            "albums",
        );
        connection.connect();
        assert_eq!(connection.state(), ConnectionState::Connecting);
        assert!(*connection.observers().is_initializing.borrow());
    }

    #[test]
    fn test_play_media_item_without_shuffle_starts_at_chosen_track() {
        let mut harness = ConnectionHarness::new(&["x", "y", "z"]);
        harness.play_ids(&["x", "y", "z"], "y");
        assert_eq!(harness.queue_ids(), vec!["x", "y", "z"]);
        assert_eq!(harness.connection.current_index(), Some(1));
        assert_eq!(harness.now_playing_id().as_deref(), Some("y"));
        assert!(harness.connection.is_playing());
        assert_eq!(
            harness.repository.current_queue().song_ids,
            vec!["x", "y", "z"]
        );
    }

    #[test]
    fn test_now_playing_prefers_catalog_metadata() {
        let mut harness = ConnectionHarness::new(&["x"]);
        harness.connection.play_media_item(track("x"), vec![track("x")], false);
        harness.pump();
        let now_playing = harness.connection.now_playing().unwrap();
        assert_eq!(now_playing.title, "Title x");
    }

    #[test]
    fn test_add_to_queue_twice_keeps_single_entry() {
        let mut harness = ConnectionHarness::new(&["a", "b"]);
        harness.play_ids(&["a"], "a");
        harness.connection.add_to_queue(track("b"));
        harness.connection.add_to_queue(track("b"));
        harness.pump();
        assert_eq!(harness.queue_ids(), vec!["a", "b"]);
        assert_eq!(harness.engine_ids(), vec!["a", "b"]);
        assert!(harness.repository.current_queue().contains("b"));
    }

    #[test]
    fn test_add_to_empty_queue_starts_playback() {
        let mut harness = ConnectionHarness::new(&["a"]);
        harness.connection.add_to_queue(track("a"));
        harness.pump();
        assert_eq!(harness.queue_ids(), vec!["a"]);
        assert_eq!(harness.now_playing_id().as_deref(), Some("a"));
        assert_eq!(harness.connection.current_index(), Some(0));
    }

    #[test]
    fn test_play_next_lands_after_current_from_every_position() {
        let ids = ["a", "b", "c", "d", "e"];
        for start in ["a", "c", "e"] {
            for target in ["a", "b", "c", "d", "e", "new"] {
                let mut harness = ConnectionHarness::new(&ids);
                harness.play_ids(&ids, start);
                if target == start {
                    continue;
                }
                harness.connection.play_next(track(target));
                harness.pump();
                let current = harness.connection.current_index().unwrap();
                assert_eq!(harness.queue_ids()[current + 1], target);
                assert_eq!(harness.now_playing_id().as_deref(), Some(start));
                assert_eq!(harness.queue_ids(), harness.engine_ids());
            }
        }
    }

    #[test]
    fn test_play_next_of_playing_track_is_noop() {
        let mut harness = ConnectionHarness::new(&["a", "b"]);
        harness.play_ids(&["a", "b"], "a");
        harness.connection.play_next(track("a"));
        assert_eq!(harness.queue_ids(), vec!["a", "b"]);
    }

    #[test]
    fn test_play_next_on_empty_queue_plays_now() {
        let mut harness = ConnectionHarness::new(&["a"]);
        harness.connection.play_next(track("a"));
        harness.pump();
        assert_eq!(harness.now_playing_id().as_deref(), Some("a"));
    }

    #[test]
    fn test_shuffle_and_play_puts_now_playing_first() {
        let ids = ["a", "b", "c", "d", "e", "f"];
        let mut harness = ConnectionHarness::new(&ids);
        for _ in 0..25 {
            harness.connection.shuffle_and_play(tracks(&ids));
            harness.pump();
            let queue = harness.queue_ids();
            assert_eq!(queue.len(), ids.len());
            assert_eq!(Some(queue[0].clone()), harness.now_playing_id());
            assert_eq!(harness.connection.current_index(), Some(0));
            assert_eq!(harness.repository.current_queue().song_ids, queue);
        }
    }

    #[test]
    fn test_shuffle_and_play_with_no_tracks_is_noop() {
        let mut harness = ConnectionHarness::new(&["a"]);
        harness.connection.shuffle_and_play(Vec::new());
        assert!(harness.connection.queue().is_empty());
    }

    #[test]
    fn test_shuffle_songs_in_queue_keeps_now_playing_at_front() {
        let ids = ["a", "b", "c", "d", "e", "f"];
        for _ in 0..10 {
            let mut harness = ConnectionHarness::new(&ids);
            harness.play_ids(&ids, "d");
            harness.connection.shuffle_songs_in_queue();
            harness.pump();
            assert_eq!(harness.now_playing_id().as_deref(), Some("d"));
            assert_eq!(harness.queue_ids()[0], "d");
            assert_eq!(harness.engine_ids()[0], "d");
            assert_eq!(harness.engine.lock().unwrap().current_index(), Some(0));
            assert_eq!(harness.connection.current_index(), Some(0));
            let mut sorted = harness.queue_ids();
            sorted.sort();
            assert_eq!(sorted, ids);
        }
    }

    #[test]
    fn test_move_media_item_rereads_current_index() {
        let ids = ["a", "b", "c", "d"];
        let mut harness = ConnectionHarness::new(&ids);
        harness.play_ids(&ids, "c");
        harness.connection.move_media_item(0, 3);
        assert_eq!(harness.queue_ids(), vec!["b", "c", "d", "a"]);
        assert_eq!(harness.connection.current_index(), Some(1));
        harness.connection.move_media_item(1, 2);
        assert_eq!(harness.connection.current_index(), Some(2));
        harness.connection.move_media_item(9, 0);
        assert_eq!(harness.queue_ids(), harness.engine_ids());
        assert_eq!(
            harness.repository.current_queue().song_ids,
            vec!["b", "d", "c", "a"]
        );
    }

    #[test]
    fn test_clear_queue_resets_every_slot() {
        let mut harness = ConnectionHarness::new(&["a", "b"]);
        harness.play_ids(&["a", "b"], "b");
        harness.connection.clear_queue();
        harness.pump();
        assert!(harness.connection.queue().is_empty());
        assert_eq!(harness.connection.current_index(), None);
        assert_eq!(harness.connection.now_playing(), None);
        assert!(!harness.connection.is_playing());
        assert!(harness.repository.current_queue().song_ids.is_empty());
    }

    #[test]
    fn test_remove_from_queue_skips_playing_track() {
        let mut harness = ConnectionHarness::new(&["a", "b", "c"]);
        harness.play_ids(&["a", "b", "c"], "b");
        assert!(!harness.connection.remove_from_queue("b"));
        assert!(harness.connection.remove_from_queue("a"));
        assert!(!harness.connection.remove_from_queue("zzz"));
        harness.pump();
        assert_eq!(harness.queue_ids(), vec!["b", "c"]);
        assert_eq!(harness.connection.current_index(), Some(0));
        assert_eq!(harness.repository.current_queue().song_ids, vec!["b", "c"]);
    }

    #[test]
    fn test_next_and_previous_report_engine_refusal() {
        let mut harness = ConnectionHarness::new(&["a", "b"]);
        harness.play_ids(&["a", "b"], "a");
        assert!(!harness.connection.play_previous_song());
        assert!(harness.connection.play_next_song());
        assert!(!harness.connection.play_next_song());
        harness.pump();
        assert_eq!(harness.now_playing_id().as_deref(), Some("b"));
    }

    #[test]
    fn test_transitions_update_most_and_recently_played() {
        let mut harness = ConnectionHarness::new(&["a", "b"]);
        harness.play_ids(&["a", "b"], "a");
        harness.engine.lock().unwrap().finish_current_item();
        harness.pump();
        harness.connection.play_previous_song();
        harness.pump();

        let counts = harness.repository.most_played_counts();
        assert_eq!(counts.get("a"), Some(&2));
        assert_eq!(counts.get("b"), Some(&1));
        assert_eq!(harness.repository.recently_played().song_ids, vec!["a", "b"]);
        assert_eq!(harness.repository.most_played().song_ids, vec!["a", "b"]);
    }

    #[test]
    fn test_back_to_back_transitions_credit_each_track() {
        let mut harness = ConnectionHarness::new(&["x", "y", "z"]);
        harness
            .connection
            .play_media_item(track("y"), tracks(&["x", "y", "z"]), false);
        assert!(harness.connection.play_next_song());
        harness.pump();

        let counts = harness.repository.most_played_counts();
        assert_eq!(counts.get("y"), Some(&1));
        assert_eq!(counts.get("z"), Some(&1));
        assert_eq!(counts.get("x"), None);
        assert_eq!(harness.repository.recently_played().song_ids, vec!["z", "y"]);
        assert_eq!(harness.now_playing_id().as_deref(), Some("z"));
    }

    #[test]
    fn test_queue_edits_without_transition_do_not_count_plays() {
        let mut harness = ConnectionHarness::new(&["a", "b", "c"]);
        harness.play_ids(&["a", "b", "c"], "a");
        harness.connection.move_media_item(1, 2);
        harness.connection.add_to_queue(track("c"));
        harness.pump();
        assert_eq!(harness.repository.most_played_counts().get("a"), Some(&1));
        assert_eq!(harness.repository.most_played_counts().len(), 1);
    }

    #[test]
    fn test_engine_errors_are_logged_without_skipping() {
        let mut harness = ConnectionHarness::new(&["a", "b"]);
        harness.play_ids(&["a", "b"], "a");
        harness
            .engine
            .lock()
            .unwrap()
            .fail_with(EngineErrorCode::ConnectionTimeout);
        harness.pump();
        assert_eq!(harness.now_playing_id().as_deref(), Some("a"));
        assert!(!harness.connection.is_playing());
        assert_eq!(harness.connection.current_index(), Some(0));
    }

    #[test]
    fn test_external_timeline_change_resyncs_mirror() {
        let mut harness = ConnectionHarness::new(&["a", "b"]);
        harness.play_ids(&["a"], "a");
        harness.engine.lock().unwrap().add_item(1, track("b"));
        harness.pump();
        assert_eq!(harness.queue_ids(), vec!["a", "b"]);
        assert_eq!(harness.connection.queue()[1].title, "Title b");
    }

    #[test]
    fn test_disconnect_ignores_later_intents() {
        let mut harness = ConnectionHarness::new(&["a"]);
        harness.connection.disconnect();
        harness.connection.add_to_queue(track("a"));
        assert_eq!(harness.connection.state(), ConnectionState::Disconnected);
        assert!(harness.connection.queue().is_empty());
    }
}
