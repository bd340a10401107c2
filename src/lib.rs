pub mod config;
pub mod engine;
pub mod error;
pub mod file_adapter;
pub mod model;
pub mod playlist_repository;
pub mod playlist_store;
pub mod protocol;
pub mod queue_connection;
pub mod queue_worker;
