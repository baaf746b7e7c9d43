//! Error types for the Rendezvous environment abstraction.

use thiserror::Error;

/// Result alias for environment operations.
pub type Result<T> = std::result::Result<T, EnvError>;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Error)]
pub enum EnvError {
    /// A trajectory could not be parsed. Recoverable: the caller skips it.
    #[error("Malformed trajectory at position {position}: {reason}")]
    Malformed { position: usize, reason: String },

    /// Underlying storage could not be read
    #[error("I/O error: {0}")]
    Io(String),

    /// The source itself is unusable (bad configuration, closed handle, etc.)
    #[error("Source error: {0}")]
    Source(String),
}

impl EnvError {
    /// Creates a malformed-input error for the trajectory at `position`.
    pub fn malformed(position: usize, reason: impl Into<String>) -> Self {
        Self::Malformed {
            position,
            reason: reason.into(),
        }
    }

    /// Creates a source error.
    pub fn source(msg: impl Into<String>) -> Self {
        Self::Source(msg.into())
    }

    /// Returns true if this error only affects a single trajectory.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Malformed { .. })
    }
}

impl From<std::io::Error> for EnvError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}
