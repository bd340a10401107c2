use std::{
    io::{self, BufRead, Write},
    path::Path,
    sync::{Arc, Mutex},
};

use log::{error, info, warn};
use queuekeeper::{
    config::{self, Config},
    engine::MemoryEngine,
    file_adapter::FileAdapter,
    model::Track,
    playlist_repository::{FlushWorker, PlaylistRepository},
    playlist_store::PlaylistStore,
    queue_connection::{QueueConnection, QueueObservers},
    queue_worker::{QueueHandle, QueueWorker},
};

const HELP: &str = "commands: add <id> | next <id> | play <id> | shuffle | shuffle-queue | \
move <from> <to> | remove <id> | skip | prev | pause | resume | finish | clear | fav <id> | \
queue | playlists | flush | quit";

fn load_catalog(path: &Path) -> Vec<Track> {
    let Some(bytes) = FileAdapter::new(path).read() else {
        warn!("Catalog {} not found, starting with an empty catalog", path.display());
        return Vec::new();
    };
    match serde_json::from_slice::<Vec<Track>>(&bytes) {
        Ok(tracks) => tracks,
        Err(err) => {
            warn!("Catalog {} is invalid: {}", path.display(), err);
            Vec::new()
        }
    }
}

struct Driver {
    handle: QueueHandle,
    observers: QueueObservers,
    engine: Arc<Mutex<MemoryEngine>>,
    repository: Arc<PlaylistRepository>,
    flush_worker: FlushWorker,
    catalog: Vec<Track>,
}

impl Driver {
    fn track(&self, id: &str) -> Track {
        self.catalog
            .iter()
            .find(|track| track.id == id)
            .cloned()
            .unwrap_or_else(|| Track::new(id, id))
    }

    fn print_queue(&self) {
        let queue = self.observers.queue.borrow().clone();
        let current = *self.observers.current_index.borrow();
        let playing = *self.observers.is_playing.borrow();
        for (index, track) in queue.iter().enumerate() {
            let marker = if Some(index) == current {
                if playing {
                    ">"
                } else {
                    "="
                }
            } else {
                " "
            };
            let favorite = if self.repository.is_favorite(&track.id) {
                "*"
            } else {
                " "
            };
            println!("{}{} {:>3} {} ({})", marker, favorite, index, track.title, track.id);
        }
        if queue.is_empty() {
            println!("(queue is empty)");
        }
    }

    fn print_playlists(&self) {
        for playlist in self.repository.fetch_all_playlists() {
            println!(
                "{} [{}]: {}",
                playlist.title,
                playlist.id,
                playlist.song_ids.join(", ")
            );
        }
    }

    fn finish_current(&self) {
        match self.engine.lock() {
            Ok(mut engine) => engine.finish_current_item(),
            Err(_) => error!("Driver: engine lock poisoned"),
        }
    }

    /// Returns false once the driver should stop.
    fn execute(&self, line: &str) -> Result<bool, queuekeeper::error::QueueError> {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            return Ok(true);
        };
        let argument = words.next();
        match (command, argument) {
            ("add", Some(id)) => self.handle.add_to_queue(self.track(id))?,
            ("next", Some(id)) => self.handle.play_next(self.track(id))?,
            ("play", Some(id)) => {
                self.handle
                    .play_media_item(self.track(id), self.catalog.clone(), false)?
            }
            ("shuffle", _) => self.handle.shuffle_and_play(self.catalog.clone())?,
            ("shuffle-queue", _) => self.handle.shuffle_songs_in_queue()?,
            ("move", Some(from)) => {
                match (from.parse::<usize>(), words.next().map(str::parse::<usize>)) {
                    (Ok(from), Some(Ok(to))) => self.handle.move_media_item(from, to)?,
                    _ => println!("usage: move <from> <to>"),
                }
            }
            ("remove", Some(id)) => self.handle.remove_from_queue(id)?,
            ("skip", _) => {
                if !self.handle.play_next_song()? {
                    println!("already at the end of the queue");
                }
            }
            ("prev", _) => {
                if !self.handle.play_previous_song()? {
                    println!("already at the start of the queue");
                }
            }
            ("pause", _) => self.handle.pause()?,
            ("resume", _) => self.handle.play()?,
            ("finish", _) => self.finish_current(),
            ("clear", _) => self.handle.clear_queue()?,
            ("fav", Some(id)) => {
                let favorite = self.repository.toggle_favorite(id);
                println!("{} {}", id, if favorite { "favorited" } else { "unfavorited" });
            }
            ("queue", _) => self.print_queue(),
            ("playlists", _) => self.print_playlists(),
            ("flush", _) => {
                if let Err(err) = self.flush_worker.request_flush() {
                    error!("Driver: {}", err);
                }
            }
            ("quit", _) | ("exit", _) => return Ok(false),
            _ => println!("{}", HELP),
        }
        Ok(true)
    }
}

/// Installs colog before anything logs. The config level is applied later
/// through `log::set_max_level`, so the backend itself lets everything through.
fn init_logging() {
    let mut clog = colog::default_builder();
    clog.filter(None, log::LevelFilter::Trace);
    clog.init();
    log::set_max_level(log::LevelFilter::Info);

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));
}

fn load_config_with_logging(config_path: &Path) -> Config {
    let config = config::load_config(config_path);
    log::set_max_level(config.log.level_filter());
    config
}

fn main() {
    init_logging();
    let config_path = config::default_config_path();
    let config = load_config_with_logging(&config_path);

    info!("Using config {}", config_path.display());
    let storage = &config.storage;
    let store = PlaylistStore::open(
        FileAdapter::new(storage.playlists_path()),
        FileAdapter::new(storage.most_played_path()),
    );
    let repository = Arc::new(PlaylistRepository::new(
        store,
        config.queue.recently_played_limit,
    ));
    let flush_worker = match FlushWorker::spawn(Arc::clone(&repository)) {
        Ok(worker) => worker,
        Err(err) => {
            error!("Failed to start playlist flush thread: {}", err);
            std::process::exit(1);
        }
    };

    let catalog = load_catalog(&storage.catalog_path());
    info!("Loaded {} catalog tracks", catalog.len());

    let (handle, receiver) = QueueHandle::channel();
    let engine = Arc::new(Mutex::new(
        MemoryEngine::new(config.queue.catalog_root_id.clone(), catalog.clone())
            .with_event_sink(handle.event_sink()),
    ));
    let mut connection = QueueConnection::new(
        Box::new(Arc::clone(&engine)),
        Arc::clone(&repository),
        config.queue.catalog_root_id.clone(),
    );
    if config.queue.flush_on_transition {
        connection = connection.with_flush_requester(flush_worker.requester());
    }
    let observers = connection.observers();
    let worker = match QueueWorker::spawn(connection, receiver) {
        Ok(worker) => worker,
        Err(err) => {
            error!("Failed to start queue worker: {}", err);
            std::process::exit(1);
        }
    };

    let driver = Driver {
        handle,
        observers,
        engine,
        repository,
        flush_worker,
        catalog,
    };

    if let Err(err) = driver.handle.connect() {
        error!("{}", err);
    }
    println!("{}", HELP);

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                error!("Failed to read command: {}", err);
                break;
            }
        };
        match driver.execute(line.trim()) {
            Ok(true) => {}
            Ok(false) => break,
            Err(err) => {
                error!("{}", err);
                break;
            }
        }
        let _ = io::stdout().flush();
    }

    let Driver {
        handle,
        flush_worker,
        ..
    } = driver;
    if let Err(err) = handle.disconnect() {
        warn!("{}", err);
    }
    worker.join();
    if let Err(err) = flush_worker.shutdown() {
        error!("Failed to persist playlists: {}", err);
        std::process::exit(1);
    }
    info!("Playlists persisted, exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_level_applies_after_logging_starts() {
        init_logging();
        assert_eq!(log::max_level(), log::LevelFilter::Info);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[log]\nlevel = \"debug\"\n").unwrap();
        let config = load_config_with_logging(&path);
        assert_eq!(config.log.level, "debug");
        assert_eq!(log::max_level(), log::LevelFilter::Debug);
    }
}
