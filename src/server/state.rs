//! Application state shared across all request handlers.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{AppConfig, StorageBackend, UpstreamBackend};
use crate::conversation::{ConversationStore, InMemoryConversationStore, SqliteConversationStore};
use crate::llm::{CompletionClient, HttpCompletionClient, MockCompletionClient};
use crate::relay::RelayOrchestrator;

/// Shared application state.
pub struct AppState {
    /// Relay entry point.
    pub relay: RelayOrchestrator,
    /// Conversation store, also used by the plain conversation endpoints.
    pub store: Arc<dyn ConversationStore>,
    /// Interval between SSE keep-alive comments.
    pub sse_keep_alive: Duration,
}

impl AppState {
    /// Assemble state from explicit collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn ConversationStore>,
        client: Arc<dyn CompletionClient>,
        sse_keep_alive: Duration,
    ) -> Arc<Self> {
        let relay = RelayOrchestrator::new(Arc::clone(&store), client);
        Arc::new(Self {
            relay,
            store,
            sse_keep_alive,
        })
    }

    /// Build the store and client selected by `config`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or the HTTP client
    /// cannot be built.
    pub async fn from_config(
        config: &AppConfig,
    ) -> Result<Arc<Self>, Box<dyn std::error::Error + Send + Sync>> {
        let store: Arc<dyn ConversationStore> = match config.storage.backend {
            StorageBackend::Sqlite => {
                tracing::info!(path = %config.storage.sqlite_path, "opening sqlite conversation store");
                let store = SqliteConversationStore::open(&config.storage.sqlite_path)
                    .await
                    .map_err(|e| format!("Failed to open conversation store: {e}"))?;
                Arc::new(store)
            }
            StorageBackend::Memory => {
                tracing::warn!("using in-memory conversation store, data is lost on restart");
                Arc::new(InMemoryConversationStore::new())
            }
        };

        let client: Arc<dyn CompletionClient> = match config.upstream.backend {
            UpstreamBackend::Http => {
                tracing::info!(base_url = %config.upstream.base_url, "using http completion backend");
                let client = HttpCompletionClient::new(&config.upstream)
                    .map_err(|e| format!("Failed to create completion client: {e}"))?;
                Arc::new(client)
            }
            UpstreamBackend::Mock => {
                tracing::warn!("using mock completion backend");
                Arc::new(MockCompletionClient::new().with_delay(config.upstream.mock_delay()))
            }
        };

        Ok(Self::new(store, client, config.server.sse_keep_alive()))
    }
}
