//! Error types for the Rendezvous join engine.

use rendezvous_env::EnvError;
use thiserror::Error;

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by the engine.
///
/// Only configuration and setup problems abort a run. Once processing has
/// started, malformed input is skipped, checkpoint failures are logged and
/// cancellation returns a partial result.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid run configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Checkpoint could not be written or read
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Checkpoint or config (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The worker thread pool could not be built
    #[error("Worker pool error: {0}")]
    WorkerPool(String),

    /// Error bubbled up from the environment layer
    #[error(transparent)]
    Env(#[from] EnvError),
}

impl EngineError {
    /// Creates a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a checkpoint I/O error.
    pub fn checkpoint(msg: impl Into<String>) -> Self {
        Self::Checkpoint(msg.into())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
