use hotpatch_protocol::ProtocolError;

/// Errors from watching and resolving files.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("watch error: {0}")]
    Notify(#[from] notify::Error),

    #[error("invalid watch pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("invalid resource: {0}")]
    InvalidResource(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
