use hotpatch_protocol::ProtocolError;

use crate::browser::ApplyStatus;
use crate::config::ConfigError;

/// Errors surfaced by the client.
///
/// Only [`ClientError::ConnectionExhausted`] ends a session; everything else
/// affects a single message and is reported as a diagnostic.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("could not connect after all retries: {reason}")]
    ConnectionExhausted { reason: String },

    #[error("resource with the following URL is not on the page: {url}")]
    ResourceNotFound { url: String },

    #[error("failed to apply update to {url}: {status}")]
    ApplyFailed { url: String, status: ApplyStatus },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("not connected")]
    NotConnected,

    #[error("inspected page location is unavailable")]
    LocationUnavailable,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ClientError {
    /// Returns `true` if the error ends the session.
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, Self::ConnectionExhausted { .. })
    }
}
