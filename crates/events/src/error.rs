//! Errors surfaced by the routing layer.
//!
//! Delivery failures never show up here: they are isolated per handler and go
//! to the stream's fault hook instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    /// A registration was saved without a usable stream name.
    #[error("stream registration id must not be empty")]
    EmptyStreamId,

    #[error("invalid routing table: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("projection '{0}' is already started")]
    AlreadyStarted(String),

    #[error("failed to spawn projection worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}
