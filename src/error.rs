//! Engram error types

use thiserror::Error;

/// Engram error type
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A candidate memory failed schema validation and was dropped
    #[error("Validation error: {0}")]
    Validation(String),

    /// Duplicate id on insert; the caller must retry with a fresh id
    #[error("Conflict: entry {0} already exists")]
    Conflict(uuid::Uuid),

    /// The text-generation collaborator returned an error
    #[error("Collaborator error: {0}")]
    Collaborator(String),

    /// The text-generation collaborator did not answer within the deadline
    #[error("Collaborator timed out after {0}s")]
    CollaboratorTimeout(u64),

    /// A compression pass produced a degenerate result and was discarded
    #[error("Compression rejected: {0}")]
    CompressionRejected(String),

    /// Session error
    #[error("Session error: {0}")]
    Session(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for Engram operations
pub type Result<T> = std::result::Result<T, Error>;
