//! Error type for the upstream completion backend.

use thiserror::Error;

/// Failure talking to the completion backend.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum UpstreamError {
    /// The backend answered with a non-success status.
    #[error("upstream returned status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, as text.
        body: String,
    },
    /// The backend could not be reached or the connection failed.
    #[error("upstream transport error: {0}")]
    Transport(String),
    /// The reply body was not the expected shape.
    #[error("malformed upstream reply: {0}")]
    MalformedReply(String),
    /// Reading the streamed body failed after the stream had started.
    #[error("upstream stream interrupted: {0}")]
    Stream(String),
    /// The caller cancelled the call before it completed.
    #[error("upstream call cancelled")]
    Cancelled,
}

impl UpstreamError {
    /// HTTP status of the failed response, if there was one.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::MalformedReply(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}
