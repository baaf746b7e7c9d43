//! Error types for the simulation harness and CLI.

use rendezvous_core::EngineError;
use rendezvous_env::EnvError;
use thiserror::Error;

/// Errors surfaced by harness commands.
#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Env(#[from] EnvError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The blocking join task panicked or was aborted
    #[error("Join task failed: {0}")]
    Task(String),
}
