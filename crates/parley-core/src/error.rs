//! Error types for parley.

use thiserror::Error;

/// Result type alias using parley's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for parley operations.
///
/// Collaborators (stores, directories, narration models) return these; the
/// delivery pipeline logs and absorbs them rather than propagating.
#[derive(Error, Debug)]
pub enum Error {
    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Durable store operation failed
    #[error("Store error: {0}")]
    Store(String),

    /// Narration production failed
    #[error("Narration error: {0}")]
    Narration(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
