//! Error taxonomy for the pairing engine
//!
//! Per-line errors (`DecodeError`, `StoreWriteError`) are recovered inside a
//! worker. Startup errors (`SchemaError`, `ConnectionError`) abort the run
//! before any line is processed.

use std::path::PathBuf;
use thiserror::Error;

/// A raw line that could not be turned into a `Record`
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' must be {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },
}

/// Persisting one completed pair failed; the pair is dropped
#[derive(Debug, Error)]
#[error("failed to store pair '{id}': {source}")]
pub struct StoreWriteError {
    pub id: String,
    #[source]
    pub source: rusqlite::Error,
}

/// A store connection could not be opened
#[derive(Debug, Error)]
#[error("failed to open store connection to {}: {source}", path.display())]
pub struct ConnectionError {
    pub path: PathBuf,
    #[source]
    pub source: rusqlite::Error,
}

/// Fatal store initialization failure
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to create database directory {}: {source}", path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("failed to create events table: {0}")]
    Create(#[source] rusqlite::Error),
}

/// Errors that stop the engine from starting or completing
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("failed to spawn worker {worker}: {source}")]
    Spawn {
        worker: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("worker {worker} failed: {message}")]
    WorkerFailure { worker: usize, message: String },

    #[error("worker pool is empty; at least one worker is required")]
    NoWorkers,
}

/// Render a panic payload for logging
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
