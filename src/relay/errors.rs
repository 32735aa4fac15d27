//! Error taxonomy of a relay run.

use thiserror::Error;

use crate::conversation::{ConversationId, StoreError};
use crate::llm::UpstreamError;

/// Message shown to callers when the completion backend fails.
pub const UPSTREAM_FAILURE_MESSAGE: &str = "Failed to call AI service";

/// Failure of a relay run, classified by who is at fault.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The inbound request is malformed; nothing was changed.
    #[error("invalid request: {0}")]
    Validation(String),
    /// The referenced conversation does not exist; no upstream call was made.
    #[error("conversation not found: {0}")]
    NotFound(ConversationId),
    /// The completion backend failed.
    #[error("upstream failure: {0}")]
    Upstream(#[from] UpstreamError),
    /// The conversation store failed.
    #[error("persistence failure: {0}")]
    Persistence(StoreError),
}

impl From<StoreError> for RelayError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::NotFound(id),
            other => Self::Persistence(other),
        }
    }
}

impl RelayError {
    /// HTTP status class of this error.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::NotFound(_) => 404,
            Self::Upstream(_) => 502,
            Self::Persistence(_) => 500,
        }
    }

    /// Text safe to show to the caller.
    ///
    /// Upstream and storage details stay in the logs.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Validation(reason) => reason.clone(),
            Self::NotFound(_) => "Conversation not found".to_string(),
            Self::Upstream(_) => UPSTREAM_FAILURE_MESSAGE.to_string(),
            Self::Persistence(_) => "Failed to access conversation storage".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classes() {
        let id = ConversationId::new();
        assert_eq!(RelayError::Validation("x".into()).status_code(), 400);
        assert_eq!(RelayError::NotFound(id).status_code(), 404);
        assert_eq!(
            RelayError::Upstream(UpstreamError::Transport("refused".into())).status_code(),
            502
        );
        assert_eq!(
            RelayError::Persistence(StoreError::InvalidRecord("bad".into())).status_code(),
            500
        );
    }

    #[test]
    fn test_store_not_found_maps_to_not_found() {
        let id = ConversationId::new();
        let err = RelayError::from(StoreError::NotFound(id));
        assert!(matches!(err, RelayError::NotFound(found) if found == id));
    }

    #[test]
    fn test_public_message_hides_details() {
        let err = RelayError::Upstream(UpstreamError::Status {
            status: 500,
            body: "stack trace".into(),
        });
        assert_eq!(err.public_message(), UPSTREAM_FAILURE_MESSAGE);
    }
}
