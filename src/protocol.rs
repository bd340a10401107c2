//! Message envelope consumed by the queue worker.
//!
//! Caller intents and engine event batches share one channel so that every
//! mutation of the observable queue happens on a single thread, in arrival order.

use tokio::sync::oneshot;

use crate::{
    engine::{EngineEvent, PlaybackParameters, RepeatMode},
    model::Track,
};

/// Top-level envelope for all queue-worker traffic.
#[derive(Debug)]
pub enum Message {
    Command(QueueCommand),
    /// One batched change notification from the engine.
    EngineEvents(Vec<EngineEvent>),
}

/// Caller intents handled by the queue connection.
#[derive(Debug)]
pub enum QueueCommand {
    Connect,
    AddToQueue(Track),
    PlayNext(Track),
    ShuffleAndPlay(Vec<Track>),
    PlayMediaItem {
        track: Track,
        candidates: Vec<Track>,
        shuffle: bool,
    },
    ShuffleSongsInQueue,
    MoveMediaItem {
        from: usize,
        to: usize,
    },
    RemoveFromQueue(String),
    ClearQueue,
    /// Replies whether the engine actually advanced.
    PlayNextSong(oneshot::Sender<bool>),
    /// Replies whether the engine actually went back.
    PlayPreviousSong(oneshot::Sender<bool>),
    Play,
    Pause,
    TogglePlayPause,
    SeekTo(u64),
    SetRepeatMode(RepeatMode),
    SetPlaybackParameters(PlaybackParameters),
    /// Tears the connection down and stops the worker.
    Disconnect,
}
