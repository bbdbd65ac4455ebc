//! Crate-wide error type for the memory lifecycle engine.

/// Result type alias used throughout `sqrl-core`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the Store, embedder gateway, evaluator, commit layer,
/// retrieval engine, and chunker.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("memory not found: {0}")]
    NotFound(uuid::Uuid),

    #[error("empty text")]
    EmptyText,

    #[error("embedding failed after retries: {0}")]
    EmbeddingFailed(String),

    #[error("invalid policy configuration: {0}")]
    InvalidPolicy(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl Error {
    /// Whether this error represents a transient dependency failure that a
    /// caller may legitimately retry (§7, kind 2).
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Storage(_) => true,
            Error::EmbeddingFailed(_) => true,
            Error::Io(_) => true,
            Error::NotFound(_)
            | Error::EmptyText
            | Error::InvalidPolicy(_)
            | Error::InvalidInput(_)
            | Error::Serialization(_)
            | Error::Sqlite(_) => false,
        }
    }
}
