//! Error taxonomy and JSON-RPC code mapping for the request handlers
//! (§4.H, §6, §7).
//!
//! The two IPC error-code layouts found upstream collided on `-32010`
//! (used for both "empty task" and "project not initialized" depending on
//! which server implementation you read). This implementation keeps them
//! distinct: `-32010` is "empty task" (`compose_context`), `-32011` is
//! "project not initialized" (`search_memories`). See `DESIGN.md`.

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("chunk is empty")]
    ChunkEmpty,

    #[error("invalid project: {0}")]
    InvalidProject(String),

    #[error("extractor error: {0}")]
    ExtractorError(String),

    #[error("task is empty")]
    EmptyTask,

    #[error("project not initialized: {0}")]
    ProjectNotInitialized(String),

    #[error("query is empty")]
    EmptyQuery,

    #[error("memory list is empty")]
    EvaluateListEmpty,

    #[error("invalid memory entry: {0}")]
    EvaluateEntryInvalid(String),

    #[error("text is empty")]
    EmbedEmptyText,

    #[error("embedding failed: {0}")]
    EmbedFailed(String),

    #[error(transparent)]
    Core(#[from] sqrl_core::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Maps a handler error onto the JSON-RPC application error codes from
    /// §4.H/§6. Anything not explicitly mapped becomes `-32603 Internal
    /// error` at the dispatcher (§7 "Propagation policy") rather than
    /// here — this method only covers the codes a handler can raise
    /// directly.
    pub fn json_rpc_code(&self) -> i64 {
        match self {
            Error::ChunkEmpty => -32001,
            Error::InvalidProject(_) => -32002,
            Error::ExtractorError(_) => -32003,
            Error::EmptyTask => -32010,
            Error::ProjectNotInitialized(_) => -32011,
            Error::EmptyQuery => -32012,
            Error::EvaluateListEmpty => -32020,
            Error::EvaluateEntryInvalid(_) => -32021,
            Error::EmbedEmptyText => -32040,
            Error::EmbedFailed(_) => -32041,
            Error::Core(_) => crate::jsonrpc::INTERNAL_ERROR,
            Error::Io(_) => crate::jsonrpc::INTERNAL_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_task_and_project_not_initialized_use_distinct_codes() {
        assert_eq!(Error::EmptyTask.json_rpc_code(), -32010);
        assert_eq!(Error::ProjectNotInitialized("p".into()).json_rpc_code(), -32011);
        assert_ne!(Error::EmptyTask.json_rpc_code(), Error::ProjectNotInitialized("p".into()).json_rpc_code());
    }

    #[test]
    fn embed_text_codes_match_spec_table() {
        assert_eq!(Error::EmbedEmptyText.json_rpc_code(), -32040);
        assert_eq!(Error::EmbedFailed("boom".into()).json_rpc_code(), -32041);
    }
}
