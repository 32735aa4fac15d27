//! HTTP route handlers for the relay API.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::error::ApiError;
use super::extract::AuthenticatedUser;
use super::state::AppState;
use crate::conversation::{Conversation, ConversationId, ConversationType, Message};
use crate::relay::{OwnerIdentity, RelayEvent, RelayRequest, UnaryReply};

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/ai/chat", post(chat_stream))
        .route("/api/ai/chat/unary", post(chat_unary))
        .route(
            "/api/conversations",
            get(list_conversations).post(create_conversation),
        )
        .route(
            "/api/conversations/{id}",
            get(get_conversation)
                .put(update_conversation)
                .delete(delete_conversation),
        )
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "neuroguide-relay",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Stream one relay run as Server-Sent Events.
///
/// Validation and lookup failures are answered with a JSON error before the
/// event stream starts. Closing the connection cancels the run.
async fn chat_stream(
    State(state): State<Arc<AppState>>,
    owner: OwnerIdentity,
    payload: Result<Json<RelayRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let Json(request) = payload?;
    let handle = state
        .relay
        .start_stream(request, owner, CancellationToken::new())
        .await?;

    let events = handle.into_stream().map(|event| Ok(sse_event(&event)));
    Ok(Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(state.sse_keep_alive)
            .text("keep-alive"),
    ))
}

fn sse_event(event: &RelayEvent) -> Event {
    match event.to_json() {
        Ok(data) => Event::default().event(event.name()).data(data),
        Err(err) => {
            tracing::error!("failed to encode {} event: {err}", event.name());
            Event::default()
                .event("error")
                .data(r#"{"error":"Failed to encode event"}"#)
        }
    }
}

/// Run one relay turn and answer with the whole reply.
async fn chat_unary(
    State(state): State<Arc<AppState>>,
    owner: OwnerIdentity,
    payload: Result<Json<RelayRequest>, JsonRejection>,
) -> Result<Json<UnaryReply>, ApiError> {
    let Json(request) = payload?;
    let reply = state.relay.complete(request, owner).await?;
    Ok(Json(reply))
}

/// Conversation creation request.
#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    /// One of `analysis`, `mapping` or `assistant`.
    #[serde(rename = "type")]
    pub conversation_type: String,
    /// Display title.
    pub title: String,
}

/// Message list replacement request.
#[derive(Debug, Deserialize)]
pub struct UpdateConversationRequest {
    /// New message list.
    pub messages: Vec<Message>,
}

fn parse_conversation_id(raw: &str) -> Result<ConversationId, ApiError> {
    raw.parse().map_err(|_| {
        tracing::warn!(conversation_id = raw, "invalid conversation id");
        ApiError::bad_request("Invalid conversation ID")
    })
}

async fn list_conversations(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(owner): AuthenticatedUser,
) -> Result<Json<Vec<Conversation>>, ApiError> {
    let conversations = state.store.list_by_owner(owner).await?;
    tracing::info!(
        user_id = %owner,
        conversation_count = conversations.len(),
        "listed conversations"
    );
    Ok(Json(conversations))
}

async fn create_conversation(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(owner): AuthenticatedUser,
    payload: Result<Json<CreateConversationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Conversation>), ApiError> {
    let Json(request) = payload?;
    let conversation_type = request
        .conversation_type
        .parse::<ConversationType>()
        .map_err(|err| ApiError::bad_request(err.to_string()))?;
    if request.title.trim().is_empty() {
        return Err(ApiError::bad_request("title must not be empty"));
    }

    let conversation = state
        .store
        .create(owner, conversation_type, &request.title)
        .await?;
    tracing::info!(conversation_id = %conversation.id, "conversation created");
    Ok((StatusCode::CREATED, Json(conversation)))
}

async fn get_conversation(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> Result<Json<Conversation>, ApiError> {
    let id = parse_conversation_id(&raw_id)?;
    let conversation = state.store.get_by_id(id).await?;
    Ok(Json(conversation))
}

async fn update_conversation(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
    payload: Result<Json<UpdateConversationRequest>, JsonRejection>,
) -> Result<Json<Conversation>, ApiError> {
    let id = parse_conversation_id(&raw_id)?;
    let Json(request) = payload?;
    tracing::debug!(
        conversation_id = %id,
        message_count = request.messages.len(),
        "replacing conversation messages"
    );
    let conversation = state.store.replace_messages(id, request.messages).await?;
    Ok(Json(conversation))
}

async fn delete_conversation(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_conversation_id(&raw_id)?;
    state.store.delete_by_id(id).await?;
    tracing::info!(conversation_id = %id, "conversation deleted");
    Ok(StatusCode::NO_CONTENT)
}
