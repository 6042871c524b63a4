/// Errors produced while decoding, encoding or validating wire frames.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("frame has neither an action nor a reload flag")]
    MissingAction,

    #[error("unknown action `{0}`")]
    UnknownAction(String),

    #[error("{action} frame is missing `{field}`")]
    MissingField {
        action: &'static str,
        field: &'static str,
    },

    #[error("update frame for {0} carries both `contents` and `part`")]
    ConflictingBody(String),

    #[error("unsupported matcher: {0}")]
    UnsupportedMatcher(String),

    #[error("invalid pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("failed to encode frame: {0}")]
    Encode(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        Self::Malformed(e.to_string())
    }
}
