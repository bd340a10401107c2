//! Playback engine contract and the in-process engine.
//!
//! The queue connection talks to an engine through [`PlaybackEngine`] and
//! receives its change notifications as batches pushed into an
//! [`EngineEventSink`]. [`MemoryEngine`] keeps its item list in memory and is
//! used by the headless driver and the tests.

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard},
};

use log::debug;
use tokio::sync::mpsc::UnboundedSender;

use crate::{error::EngineError, model::Track, protocol::Message};

/// Engine-side playback state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Idle,
    Buffering,
    Ready,
    Ended,
}

/// Repeat behavior applied when navigating beyond the ends of the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatMode {
    #[default]
    Off,
    Playlist,
    Track,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackParameters {
    pub speed: f32,
    pub pitch: f32,
}

impl Default for PlaybackParameters {
    fn default() -> Self {
        Self {
            speed: 1.0,
            pitch: 1.0,
        }
    }
}

/// Why the engine's current item changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionReason {
    /// Previous item finished.
    Auto,
    Seek,
    Repeat,
    PlaylistChanged,
}

/// Classified engine runtime failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorCode {
    BadHttpStatus,
    InvalidContentType,
    CleartextNotPermitted,
    ConnectionFailed,
    ConnectionTimeout,
    Other(i32),
}

impl fmt::Display for EngineErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadHttpStatus => write!(f, "bad http status"),
            Self::InvalidContentType => write!(f, "invalid content type"),
            Self::CleartextNotPermitted => write!(f, "cleartext not permitted"),
            Self::ConnectionFailed => write!(f, "connection failed"),
            Self::ConnectionTimeout => write!(f, "connection timeout"),
            Self::Other(code) => write!(f, "engine error code {}", code),
        }
    }
}

/// Single change notification. Engines deliver them in batches.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// `track_id` is the item the engine landed on, captured when the
    /// transition happened.
    MediaItemTransition {
        track_id: Option<String>,
        reason: TransitionReason,
    },
    TimelineChanged,
    MetadataChanged,
    PlaybackStateChanged(PlaybackState),
    PlayWhenReadyChanged(bool),
    RepeatModeChanged(RepeatMode),
    Error(EngineErrorCode),
}

/// Where an engine pushes its event batches.
#[derive(Debug, Clone)]
pub struct EngineEventSink {
    sender: UnboundedSender<Message>,
}

impl EngineEventSink {
    pub fn new(sender: UnboundedSender<Message>) -> Self {
        Self { sender }
    }

    pub fn emit(&self, events: Vec<EngineEvent>) {
        if events.is_empty() {
            return;
        }
        if self.sender.send(Message::EngineEvents(events)).is_err() {
            debug!("EngineEventSink: queue worker gone, dropping engine events");
        }
    }
}

/// Operations the queue connection needs from a playback engine.
pub trait PlaybackEngine: Send {
    fn connect(&mut self) -> Result<(), EngineError>;
    /// Bulk catalog fetch below `parent_id`.
    fn get_children(&mut self, parent_id: &str) -> Result<Vec<Track>, EngineError>;

    fn set_items(&mut self, items: Vec<Track>, start_index: usize);
    fn add_item(&mut self, index: usize, track: Track);
    fn move_item(&mut self, from: usize, to: usize);
    fn replace_range(&mut self, from: usize, count: usize, items: Vec<Track>);
    fn clear_items(&mut self);
    fn item_count(&self) -> usize;
    fn item_at(&self, index: usize) -> Option<Track>;

    fn prepare(&mut self);
    fn play(&mut self);
    fn pause(&mut self);
    /// Returns false when the engine refuses to move past the end.
    fn seek_to_next(&mut self) -> bool;
    /// Returns false when the engine refuses to move before the start.
    fn seek_to_previous(&mut self) -> bool;
    fn seek_to(&mut self, position_ms: u64);

    fn current_index(&self) -> Option<usize>;
    fn current_item(&self) -> Option<Track>;
    fn duration_ms(&self) -> Option<u64>;
    fn playback_state(&self) -> PlaybackState;
    fn play_when_ready(&self) -> bool;
    fn repeat_mode(&self) -> RepeatMode;
    fn set_repeat_mode(&mut self, mode: RepeatMode);
    fn playback_parameters(&self) -> PlaybackParameters;
    fn set_playback_parameters(&mut self, parameters: PlaybackParameters);

    /// Releases engine resources on teardown.
    fn release(&mut self) {}
}

/// Engine that keeps its list in memory and reports changes like a real player.
pub struct MemoryEngine {
    catalog_root_id: String,
    catalog: Vec<Track>,
    items: Vec<Track>,
    current_index: Option<usize>,
    position_ms: u64,
    playback_state: PlaybackState,
    play_when_ready: bool,
    repeat_mode: RepeatMode,
    parameters: PlaybackParameters,
    connected: bool,
    connect_error: Option<String>,
    sink: Option<EngineEventSink>,
}

impl MemoryEngine {
    pub fn new(catalog_root_id: impl Into<String>, catalog: Vec<Track>) -> Self {
        Self {
            catalog_root_id: catalog_root_id.into(),
            catalog,
            items: Vec::new(),
            current_index: None,
            position_ms: 0,
            playback_state: PlaybackState::Idle,
            play_when_ready: false,
            repeat_mode: RepeatMode::Off,
            parameters: PlaybackParameters::default(),
            connected: false,
            connect_error: None,
            sink: None,
        }
    }

    pub fn with_event_sink(mut self, sink: EngineEventSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Makes every `connect` call fail with `reason`.
    pub fn with_connect_failure(mut self, reason: impl Into<String>) -> Self {
        self.connect_error = Some(reason.into());
        self
    }

    pub fn position_ms(&self) -> u64 {
        self.position_ms
    }

    pub fn items(&self) -> &[Track] {
        &self.items
    }

    /// Simulates the current item playing to its end.
    pub fn finish_current_item(&mut self) {
        let Some(current) = self.current_index else {
            return;
        };
        let next = match self.repeat_mode {
            RepeatMode::Track => Some((current, TransitionReason::Repeat)),
            _ if current + 1 < self.items.len() => Some((current + 1, TransitionReason::Auto)),
            RepeatMode::Playlist => Some((0, TransitionReason::Auto)),
            RepeatMode::Off => None,
        };
        match next {
            Some((index, reason)) => {
                self.current_index = Some(index);
                self.position_ms = 0;
                self.emit(vec![EngineEvent::MediaItemTransition {
                    track_id: self.current_id(),
                    reason,
                }]);
            }
            None => {
                self.playback_state = PlaybackState::Ended;
                self.emit(vec![EngineEvent::PlaybackStateChanged(PlaybackState::Ended)]);
            }
        }
    }

    /// Simulates a runtime failure reported by the media pipeline.
    pub fn fail_with(&mut self, code: EngineErrorCode) {
        self.playback_state = PlaybackState::Idle;
        self.emit(vec![
            EngineEvent::Error(code),
            EngineEvent::PlaybackStateChanged(PlaybackState::Idle),
        ]);
    }

    fn emit(&self, events: Vec<EngineEvent>) {
        if let Some(sink) = &self.sink {
            sink.emit(events);
        }
    }

    fn current_id(&self) -> Option<String> {
        self.current_index
            .and_then(|index| self.items.get(index))
            .map(|track| track.id.clone())
    }

    fn timeline_events(&self, previous_id: Option<String>) -> Vec<EngineEvent> {
        let mut events = vec![EngineEvent::TimelineChanged];
        if self.current_id() != previous_id {
            events.push(EngineEvent::MediaItemTransition {
                track_id: self.current_id(),
                reason: TransitionReason::PlaylistChanged,
            });
        }
        events
    }

    fn seek_to_index(&mut self, index: usize) {
        self.current_index = Some(index);
        self.position_ms = 0;
        self.emit(vec![EngineEvent::MediaItemTransition {
            track_id: self.current_id(),
            reason: TransitionReason::Seek,
        }]);
    }
}

impl PlaybackEngine for MemoryEngine {
    fn connect(&mut self) -> Result<(), EngineError> {
        if let Some(reason) = &self.connect_error {
            return Err(EngineError::ConnectionFailed(reason.clone()));
        }
        self.connected = true;
        Ok(())
    }

    fn get_children(&mut self, parent_id: &str) -> Result<Vec<Track>, EngineError> {
        if !self.connected {
            return Err(EngineError::CatalogUnavailable(
                "engine not connected".to_string(),
            ));
        }
        if parent_id != self.catalog_root_id {
            return Err(EngineError::CatalogUnavailable(format!(
                "unknown catalog node '{}'",
                parent_id
            )));
        }
        Ok(self.catalog.clone())
    }

    fn set_items(&mut self, items: Vec<Track>, start_index: usize) {
        let previous_id = self.current_id();
        self.items = items;
        self.current_index = if self.items.is_empty() {
            None
        } else {
            Some(start_index.min(self.items.len() - 1))
        };
        self.position_ms = 0;
        let events = self.timeline_events(previous_id);
        self.emit(events);
    }

    fn add_item(&mut self, index: usize, track: Track) {
        let previous_id = self.current_id();
        let index = index.min(self.items.len());
        self.items.insert(index, track);
        self.current_index = match self.current_index {
            None => Some(0),
            Some(current) if index <= current => Some(current + 1),
            Some(current) => Some(current),
        };
        let events = self.timeline_events(previous_id);
        self.emit(events);
    }

    fn move_item(&mut self, from: usize, to: usize) {
        if from >= self.items.len() || to >= self.items.len() || from == to {
            return;
        }
        let track = self.items.remove(from);
        self.items.insert(to, track);
        if let Some(current) = self.current_index {
            self.current_index = Some(if current == from {
                to
            } else if from < current && to >= current {
                current - 1
            } else if from > current && to <= current {
                current + 1
            } else {
                current
            });
        }
        self.emit(vec![EngineEvent::TimelineChanged]);
    }

    fn replace_range(&mut self, from: usize, count: usize, items: Vec<Track>) {
        let previous_id = self.current_id();
        let from = from.min(self.items.len());
        let end = from.saturating_add(count).min(self.items.len());
        let inserted = items.len();
        self.items.splice(from..end, items);
        let removed = end - from;
        self.current_index = match self.current_index {
            None if self.items.is_empty() => None,
            None => Some(0),
            Some(current) if current >= end => Some(current - removed + inserted),
            Some(current) if current < from => Some(current),
            Some(_) if self.items.is_empty() => None,
            Some(_) => Some(from.min(self.items.len() - 1)),
        };
        if self.current_id() != previous_id {
            self.position_ms = 0;
        }
        let events = self.timeline_events(previous_id);
        self.emit(events);
    }

    fn clear_items(&mut self) {
        let previous_id = self.current_id();
        self.items.clear();
        self.current_index = None;
        self.position_ms = 0;
        self.playback_state = PlaybackState::Idle;
        let mut events = self.timeline_events(previous_id);
        events.push(EngineEvent::PlaybackStateChanged(PlaybackState::Idle));
        self.emit(events);
    }

    fn item_count(&self) -> usize {
        self.items.len()
    }

    fn item_at(&self, index: usize) -> Option<Track> {
        self.items.get(index).cloned()
    }

    fn prepare(&mut self) {
        self.playback_state = if self.items.is_empty() {
            PlaybackState::Ended
        } else {
            PlaybackState::Ready
        };
        self.emit(vec![EngineEvent::PlaybackStateChanged(self.playback_state)]);
    }

    fn play(&mut self) {
        self.play_when_ready = true;
        self.emit(vec![EngineEvent::PlayWhenReadyChanged(true)]);
    }

    fn pause(&mut self) {
        self.play_when_ready = false;
        self.emit(vec![EngineEvent::PlayWhenReadyChanged(false)]);
    }

    fn seek_to_next(&mut self) -> bool {
        let Some(current) = self.current_index else {
            return false;
        };
        if current + 1 < self.items.len() {
            self.seek_to_index(current + 1);
            true
        } else if self.repeat_mode == RepeatMode::Playlist {
            self.seek_to_index(0);
            true
        } else {
            false
        }
    }

    fn seek_to_previous(&mut self) -> bool {
        let Some(current) = self.current_index else {
            return false;
        };
        if current > 0 {
            self.seek_to_index(current - 1);
            true
        } else if self.repeat_mode == RepeatMode::Playlist && !self.items.is_empty() {
            self.seek_to_index(self.items.len() - 1);
            true
        } else {
            false
        }
    }

    fn seek_to(&mut self, position_ms: u64) {
        self.position_ms = match self.duration_ms() {
            Some(duration) => position_ms.min(duration),
            None => position_ms,
        };
    }

    fn current_index(&self) -> Option<usize> {
        self.current_index
    }

    fn current_item(&self) -> Option<Track> {
        self.current_index.and_then(|index| self.item_at(index))
    }

    fn duration_ms(&self) -> Option<u64> {
        self.current_item().and_then(|track| track.duration_ms)
    }

    fn playback_state(&self) -> PlaybackState {
        self.playback_state
    }

    fn play_when_ready(&self) -> bool {
        self.play_when_ready
    }

    fn repeat_mode(&self) -> RepeatMode {
        self.repeat_mode
    }

    fn set_repeat_mode(&mut self, mode: RepeatMode) {
        self.repeat_mode = mode;
        self.emit(vec![EngineEvent::RepeatModeChanged(mode)]);
    }

    fn playback_parameters(&self) -> PlaybackParameters {
        self.parameters
    }

    fn set_playback_parameters(&mut self, parameters: PlaybackParameters) {
        self.parameters = parameters;
    }

    fn release(&mut self) {
        self.connected = false;
        self.play_when_ready = false;
        self.playback_state = PlaybackState::Idle;
    }
}

fn lock_engine<E>(engine: &Mutex<E>) -> MutexGuard<'_, E> {
    match engine.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Lets a caller keep a handle on an engine that the queue connection owns,
/// e.g. to simulate end-of-track from outside the worker.
impl<E: PlaybackEngine> PlaybackEngine for Arc<Mutex<E>> {
    fn connect(&mut self) -> Result<(), EngineError> {
        lock_engine(self).connect()
    }

    fn get_children(&mut self, parent_id: &str) -> Result<Vec<Track>, EngineError> {
        lock_engine(self).get_children(parent_id)
    }

    fn set_items(&mut self, items: Vec<Track>, start_index: usize) {
        lock_engine(self).set_items(items, start_index)
    }

    fn add_item(&mut self, index: usize, track: Track) {
        lock_engine(self).add_item(index, track)
    }

    fn move_item(&mut self, from: usize, to: usize) {
        lock_engine(self).move_item(from, to)
    }

    fn replace_range(&mut self, from: usize, count: usize, items: Vec<Track>) {
        lock_engine(self).replace_range(from, count, items)
    }

    fn clear_items(&mut self) {
        lock_engine(self).clear_items()
    }

    fn item_count(&self) -> usize {
        lock_engine(self).item_count()
    }

    fn item_at(&self, index: usize) -> Option<Track> {
        lock_engine(self).item_at(index)
    }

    fn prepare(&mut self) {
        lock_engine(self).prepare()
    }

    fn play(&mut self) {
        lock_engine(self).play()
    }

    fn pause(&mut self) {
        lock_engine(self).pause()
    }

    fn seek_to_next(&mut self) -> bool {
        lock_engine(self).seek_to_next()
    }

    fn seek_to_previous(&mut self) -> bool {
        lock_engine(self).seek_to_previous()
    }

    fn seek_to(&mut self, position_ms: u64) {
        lock_engine(self).seek_to(position_ms)
    }

    fn current_index(&self) -> Option<usize> {
        lock_engine(self).current_index()
    }

    fn current_item(&self) -> Option<Track> {
        lock_engine(self).current_item()
    }

    fn duration_ms(&self) -> Option<u64> {
        lock_engine(self).duration_ms()
    }

    fn playback_state(&self) -> PlaybackState {
        lock_engine(self).playback_state()
    }

    fn play_when_ready(&self) -> bool {
        lock_engine(self).play_when_ready()
    }

    fn repeat_mode(&self) -> RepeatMode {
        lock_engine(self).repeat_mode()
    }

    fn set_repeat_mode(&mut self, mode: RepeatMode) {
        lock_engine(self).set_repeat_mode(mode)
    }

    fn playback_parameters(&self) -> PlaybackParameters {
        lock_engine(self).playback_parameters()
    }

    fn set_playback_parameters(&mut self, parameters: PlaybackParameters) {
        lock_engine(self).set_playback_parameters(parameters)
    }

    fn release(&mut self) {
        lock_engine(self).release()
    }
}
