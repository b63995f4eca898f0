//! Error types for Tempo
//!
//! Centralized error handling using thiserror. Steady-state engine failures
//! (a callback reporting `Failed`, a lifetime running out) are entry states,
//! not errors; this enum only covers what a caller can get wrong.

use thiserror::Error;

use crate::id::EntryId;

/// All error types that can be returned by the scheduler API
#[derive(Debug, Error)]
pub enum TempoError {
    /// No live entry carries this id
    #[error("Entry not found: {0}")]
    EntryNotFound(EntryId),

    /// No live entry references the given context handle
    #[error("No entry references the given context")]
    ContextNotFound,

    /// Operation not allowed in the entry's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A callback called back into the scheduler that is running it
    #[error("Reentrant call from inside a callback: {0}")]
    Reentrant(String),

    /// The worker thread could not be spawned
    #[error("Failed to spawn worker thread: {0}")]
    WorkerSpawn(#[from] std::io::Error),

    /// Invalid configuration value
    #[error("Config error: {0}")]
    Config(String),
}

/// Result type alias for Tempo operations
pub type Result<T> = std::result::Result<T, TempoError>;
