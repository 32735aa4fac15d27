//! Error types for conversation storage.

use thiserror::Error;

use super::ids::ConversationId;

/// Conversation store error type.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No conversation exists with this id.
    #[error("conversation not found: {0}")]
    NotFound(ConversationId),
    /// `SQLite` storage error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] tokio_rusqlite::Error),
    /// Message list could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// A stored row holds a value that cannot be mapped back to the model.
    #[error("invalid stored record: {0}")]
    InvalidRecord(String),
}

impl StoreError {
    /// Whether this error means the conversation does not exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Convenience result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
