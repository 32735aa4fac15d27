//! Conversation model and persistence.
//!
//! - `ids`: conversation and owner identifiers
//! - `model`: conversation, message and conversation type entities
//! - `errors`: store error type
//! - `store`: the store contract and its `SQLite` backend
//! - `memory_store`: in-process backend for development and tests

pub mod errors;
pub mod ids;
pub mod memory_store;
pub mod model;
pub mod store;

pub use errors::{StoreError, StoreResult};
pub use ids::{ConversationId, UserId};
pub use memory_store::InMemoryConversationStore;
pub use model::{
    Conversation, ConversationType, ConversationTypeParseError, Message, TITLE_MAX_CHARS,
    derive_title,
};
pub use store::{ConversationStore, SqliteConversationStore, StoreFuture};
