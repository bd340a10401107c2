//! Typed error enums for persistence, engine and queue-worker flows.
//!
//! Corrupt or missing playlist files are not errors: the store substitutes
//! defaults and logs. Only write failures surface as [`StoreError`].

use std::path::PathBuf;

use thiserror::Error;

use crate::engine::EngineErrorCode;

/// Errors produced while persisting playlist documents.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Whole-file overwrite failed.
    #[error("failed to write {path}: {source}")]
    Write {
        /// Destination file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Document could not be encoded.
    #[error("failed to serialize playlist document: {0}")]
    Serialize(#[from] serde_json::Error),
    /// The background flush thread is gone (it stopped after a fatal write).
    #[error("flush worker stopped")]
    FlushWorkerStopped,
}

/// Errors reported by a playback engine.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("engine connection failed: {0}")]
    ConnectionFailed(String),
    #[error("catalog unavailable: {0}")]
    CatalogUnavailable(String),
    #[error("engine runtime error: {0}")]
    Runtime(EngineErrorCode),
}

/// Errors returned by [`crate::queue_worker::QueueHandle`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("queue worker stopped")]
    WorkerStopped,
}
