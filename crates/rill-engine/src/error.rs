#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("unknown graph: {0}")]
    UnknownGraph(String),

    #[error("run '{0}' already active")]
    DuplicateRun(String),

    #[error("no placeholder named '{0}' in this graph")]
    UnknownPlaceholder(String),

    #[error("server is shutting down")]
    ShuttingDown,
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, EngineError>;
