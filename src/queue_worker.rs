//! Single-threaded owner of the [`QueueConnection`].
//!
//! Commands from any thread and engine event batches arrive on one channel and
//! are applied in order, so observable queue state is only ever written from
//! the worker thread.

use std::{
    io,
    thread::{self, JoinHandle},
};

use log::{debug, info};
use tokio::sync::{
    mpsc::{self, UnboundedReceiver, UnboundedSender},
    oneshot,
};

use crate::{
    engine::{EngineEventSink, PlaybackParameters, RepeatMode},
    error::QueueError,
    model::Track,
    protocol::{Message, QueueCommand},
    queue_connection::QueueConnection,
};

/// Cloneable sender for queue intents.
#[derive(Debug, Clone)]
pub struct QueueHandle {
    sender: UnboundedSender<Message>,
}

impl QueueHandle {
    /// Creates the shared channel. Hand the receiver to [`QueueWorker::spawn`]
    /// and an [`EngineEventSink`] from [`QueueHandle::event_sink`] to the engine.
    pub fn channel() -> (Self, UnboundedReceiver<Message>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn event_sink(&self) -> EngineEventSink {
        EngineEventSink::new(self.sender.clone())
    }

    fn send(&self, command: QueueCommand) -> Result<(), QueueError> {
        self.sender
            .send(Message::Command(command))
            .map_err(|_| QueueError::WorkerStopped)
    }

    fn request(
        &self,
        command: impl FnOnce(oneshot::Sender<bool>) -> QueueCommand,
    ) -> Result<bool, QueueError> {
        let (reply, response) = oneshot::channel();
        self.send(command(reply))?;
        response.blocking_recv().map_err(|_| QueueError::WorkerStopped)
    }

    pub fn connect(&self) -> Result<(), QueueError> {
        self.send(QueueCommand::Connect)
    }

    pub fn add_to_queue(&self, track: Track) -> Result<(), QueueError> {
        self.send(QueueCommand::AddToQueue(track))
    }

    pub fn play_next(&self, track: Track) -> Result<(), QueueError> {
        self.send(QueueCommand::PlayNext(track))
    }

    pub fn shuffle_and_play(&self, tracks: Vec<Track>) -> Result<(), QueueError> {
        self.send(QueueCommand::ShuffleAndPlay(tracks))
    }

    pub fn play_media_item(
        &self,
        track: Track,
        candidates: Vec<Track>,
        shuffle: bool,
    ) -> Result<(), QueueError> {
        self.send(QueueCommand::PlayMediaItem {
            track,
            candidates,
            shuffle,
        })
    }

    pub fn shuffle_songs_in_queue(&self) -> Result<(), QueueError> {
        self.send(QueueCommand::ShuffleSongsInQueue)
    }

    pub fn move_media_item(&self, from: usize, to: usize) -> Result<(), QueueError> {
        self.send(QueueCommand::MoveMediaItem { from, to })
    }

    pub fn remove_from_queue(&self, track_id: impl Into<String>) -> Result<(), QueueError> {
        self.send(QueueCommand::RemoveFromQueue(track_id.into()))
    }

    pub fn clear_queue(&self) -> Result<(), QueueError> {
        self.send(QueueCommand::ClearQueue)
    }

    /// Blocks until the worker reports whether the engine advanced.
    /// Must not be called from inside an async runtime.
    pub fn play_next_song(&self) -> Result<bool, QueueError> {
        self.request(QueueCommand::PlayNextSong)
    }

    pub fn play_previous_song(&self) -> Result<bool, QueueError> {
        self.request(QueueCommand::PlayPreviousSong)
    }

    pub fn play(&self) -> Result<(), QueueError> {
        self.send(QueueCommand::Play)
    }

    pub fn pause(&self) -> Result<(), QueueError> {
        self.send(QueueCommand::Pause)
    }

    pub fn toggle_play_pause(&self) -> Result<(), QueueError> {
        self.send(QueueCommand::TogglePlayPause)
    }

    pub fn seek_to(&self, position_ms: u64) -> Result<(), QueueError> {
        self.send(QueueCommand::SeekTo(position_ms))
    }

    pub fn set_repeat_mode(&self, mode: RepeatMode) -> Result<(), QueueError> {
        self.send(QueueCommand::SetRepeatMode(mode))
    }

    pub fn set_playback_parameters(&self, parameters: PlaybackParameters) -> Result<(), QueueError> {
        self.send(QueueCommand::SetPlaybackParameters(parameters))
    }

    pub fn disconnect(&self) -> Result<(), QueueError> {
        self.send(QueueCommand::Disconnect)
    }
}

pub struct QueueWorker {
    join_handle: JoinHandle<()>,
}

impl QueueWorker {
    pub fn spawn(
        connection: QueueConnection,
        receiver: UnboundedReceiver<Message>,
    ) -> io::Result<Self> {
        let join_handle = thread::Builder::new()
            .name("queue-connection".to_string())
            .spawn(move || Self::run(connection, receiver))?;
        Ok(Self { join_handle })
    }

    fn run(mut connection: QueueConnection, mut receiver: UnboundedReceiver<Message>) {
        info!("QueueWorker: started");
        while let Some(message) = receiver.blocking_recv() {
            match message {
                Message::EngineEvents(events) => connection.on_engine_events(&events),
                Message::Command(QueueCommand::Disconnect) => {
                    connection.disconnect();
                    break;
                }
                Message::Command(command) => Self::dispatch(&mut connection, command),
            }
        }
        connection.disconnect();
        info!("QueueWorker: stopped");
    }

    fn dispatch(connection: &mut QueueConnection, command: QueueCommand) {
        debug!("QueueWorker: handling {:?}", command);
        match command {
            QueueCommand::Connect => connection.connect(),
            QueueCommand::AddToQueue(track) => connection.add_to_queue(track),
            QueueCommand::PlayNext(track) => connection.play_next(track),
            QueueCommand::ShuffleAndPlay(tracks) => connection.shuffle_and_play(tracks),
            QueueCommand::PlayMediaItem {
                track,
                candidates,
                shuffle,
            } => connection.play_media_item(track, candidates, shuffle),
            QueueCommand::ShuffleSongsInQueue => connection.shuffle_songs_in_queue(),
            QueueCommand::MoveMediaItem { from, to } => connection.move_media_item(from, to),
            QueueCommand::RemoveFromQueue(track_id) => {
                connection.remove_from_queue(&track_id);
            }
            QueueCommand::ClearQueue => connection.clear_queue(),
            QueueCommand::PlayNextSong(reply) => {
                let _ = reply.send(connection.play_next_song());
            }
            QueueCommand::PlayPreviousSong(reply) => {
                let _ = reply.send(connection.play_previous_song());
            }
            QueueCommand::Play => connection.play(),
            QueueCommand::Pause => connection.pause(),
            QueueCommand::TogglePlayPause => connection.toggle_play_pause(),
            QueueCommand::SeekTo(position_ms) => connection.seek_to(position_ms),
            QueueCommand::SetRepeatMode(mode) => connection.set_repeat_mode(mode),
            QueueCommand::SetPlaybackParameters(parameters) => {
                connection.set_playback_parameters(parameters)
            }
            QueueCommand::Disconnect => connection.disconnect(),
        }
    }

    /// Waits for the worker thread to exit after a disconnect.
    pub fn join(self) {
        if self.join_handle.join().is_err() {
            log::error!("QueueWorker: worker thread panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        engine::MemoryEngine,
        file_adapter::FileAdapter,
        playlist_repository::{FlushWorker, PlaylistRepository},
        playlist_store::PlaylistStore,
        queue_connection::ConnectionState,
    };
    use std::{
        sync::{Arc, Mutex},
        time::{Duration, Instant},
    };
    use tokio::sync::watch;

    fn wait_for<T, F>(receiver: &watch::Receiver<T>, timeout: Duration, mut predicate: F)
    where
        F: FnMut(&T) -> bool,
    {
        let start = Instant::now();
        loop {
            if predicate(&receiver.borrow()) {
                return;
            }
            if start.elapsed() > timeout {
                panic!("timed out waiting for expected state");
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn tracks(ids: &[&str]) -> Vec<Track> {
        ids.iter().map(|id| Track::new(*id, *id)).collect()
    }

    fn repository_in(dir: &std::path::Path) -> Arc<PlaylistRepository> {
        let store = PlaylistStore::open(
            FileAdapter::new(dir.join("playlists.json")),
            FileAdapter::new(dir.join("most_played.json")),
        );
        Arc::new(PlaylistRepository::new(store, 0))
    }

    #[test]
    fn test_worker_applies_commands_and_engine_events_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let repository = repository_in(dir.path());
        let (handle, receiver) = QueueHandle::channel();
        let engine = Arc::new(Mutex::new(
            MemoryEngine::new("root", tracks(&["a", "b", "c"])).with_event_sink(handle.event_sink()),
        ));
        let connection = QueueConnection::new(
            Box::new(Arc::clone(&engine)),
            Arc::clone(&repository),
            "root",
        );
        let observers = connection.observers();
        let worker = QueueWorker::spawn(connection, receiver).unwrap();

        handle.connect().unwrap();
        wait_for(&observers.connection_state, Duration::from_secs(2), |state| {
            *state == ConnectionState::Ready
        });
        handle.shuffle_and_play(tracks(&["a", "b", "c"])).unwrap();
        handle.add_to_queue(Track::new("a", "a")).unwrap();
        wait_for(&observers.queue, Duration::from_secs(2), |queue| queue.len() == 3);
        wait_for(&observers.is_playing, Duration::from_secs(2), |playing| *playing);
        wait_for(&observers.current_index, Duration::from_secs(2), |index| {
            *index == Some(0)
        });

        assert!(handle.play_next_song().unwrap());
        wait_for(&observers.current_index, Duration::from_secs(2), |index| {
            *index == Some(1)
        });
        wait_for(&observers.now_playing, Duration::from_secs(2), |track| {
            track.as_ref() == observers.queue.borrow().get(1)
        });

        handle.disconnect().unwrap();
        worker.join();
        assert_eq!(
            *observers.connection_state.borrow(),
            ConnectionState::Disconnected
        );
        assert_eq!(repository.most_played_counts().values().sum::<u64>(), 2);
        assert!(handle.play().is_err());
    }

    #[test]
    fn test_transition_flushes_play_history() {
        let dir = tempfile::tempdir().unwrap();
        let repository = repository_in(dir.path());
        let flush_worker = FlushWorker::spawn(Arc::clone(&repository)).unwrap();
        let (handle, receiver) = QueueHandle::channel();
        let engine = MemoryEngine::new("root", tracks(&["a"])).with_event_sink(handle.event_sink());
        let connection =
            QueueConnection::new(Box::new(engine), Arc::clone(&repository), "root")
                .with_flush_requester(flush_worker.requester());
        let worker = QueueWorker::spawn(connection, receiver).unwrap();

        handle.connect().unwrap();
        handle.add_to_queue(Track::new("a", "a")).unwrap();
        handle.disconnect().unwrap();
        worker.join();
        flush_worker.shutdown().unwrap();

        let reloaded = repository_in(dir.path());
        assert_eq!(reloaded.most_played_counts().get("a"), Some(&1));
        assert_eq!(reloaded.recently_played().song_ids, vec!["a".to_string()]);
        assert_eq!(reloaded.current_queue().song_ids, vec!["a".to_string()]);
    }

    #[test]
    fn test_reply_fails_when_worker_is_gone() {
        let (handle, receiver) = QueueHandle::channel();
        drop(receiver);
        assert_eq!(handle.play_next_song(), Err(QueueError::WorkerStopped));
        assert_eq!(handle.clear_queue(), Err(QueueError::WorkerStopped));
    }
}
