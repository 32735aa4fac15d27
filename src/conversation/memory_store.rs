//! In-process conversation store backed by a concurrent map.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;

use super::errors::{StoreError, StoreResult};
use super::ids::{ConversationId, UserId};
use super::model::{Conversation, ConversationType, Message};
use super::store::{ConversationStore, StoreFuture};

/// Conversation store kept in memory. Contents are lost on restart.
#[derive(Clone, Default)]
pub struct InMemoryConversationStore {
    conversations: Arc<DashMap<ConversationId, Conversation>>,
}

impl InMemoryConversationStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored conversations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    /// Whether the store holds no conversations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }
}

impl ConversationStore for InMemoryConversationStore {
    fn create(
        &self,
        owner: UserId,
        conversation_type: ConversationType,
        title: &str,
    ) -> StoreFuture<'_, StoreResult<Conversation>> {
        let conversation = Conversation::new(owner, conversation_type, title);
        Box::pin(async move {
            self.conversations
                .insert(conversation.id, conversation.clone());
            Ok(conversation)
        })
    }

    fn get_by_id(&self, id: ConversationId) -> StoreFuture<'_, StoreResult<Conversation>> {
        Box::pin(async move {
            self.conversations
                .get(&id)
                .map(|entry| entry.value().clone())
                .ok_or(StoreError::NotFound(id))
        })
    }

    fn replace_messages(
        &self,
        id: ConversationId,
        messages: Vec<Message>,
    ) -> StoreFuture<'_, StoreResult<Conversation>> {
        Box::pin(async move {
            // The entry guard holds the shard lock for the whole swap.
            let mut entry = self
                .conversations
                .get_mut(&id)
                .ok_or(StoreError::NotFound(id))?;
            let conversation = entry.value_mut();
            conversation.messages = messages;
            conversation.updated_at = conversation.updated_at.max(Utc::now());
            Ok(conversation.clone())
        })
    }

    fn list_by_owner(&self, owner: UserId) -> StoreFuture<'_, StoreResult<Vec<Conversation>>> {
        Box::pin(async move {
            let mut listed: Vec<Conversation> = self
                .conversations
                .iter()
                .filter(|entry| entry.value().user_id == owner)
                .map(|entry| entry.value().clone())
                .collect();
            listed.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.id.cmp(&b.id)));
            Ok(listed)
        })
    }

    fn delete_by_id(&self, id: ConversationId) -> StoreFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            self.conversations
                .remove(&id)
                .map(|_| ())
                .ok_or(StoreError::NotFound(id))
        })
    }
}
