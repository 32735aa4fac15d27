use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use tower::ServiceExt;

use neuroguide_relay::conversation::{
    ConversationId, ConversationStore, ConversationType, InMemoryConversationStore, UserId,
};
use neuroguide_relay::llm::{MockCompletionClient, UpstreamError};
use neuroguide_relay::server::{AppState, USER_ID_HEADER, create_router};

fn app(store: &InMemoryConversationStore, client: &MockCompletionClient) -> Router {
    let state = AppState::new(
        Arc::new(store.clone()),
        Arc::new(client.clone()),
        Duration::from_secs(15),
    );
    create_router(state)
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}

/// Split an SSE body into `(event, data)` pairs, skipping comments.
fn parse_sse(text: &str) -> Vec<(String, Value)> {
    text.split("\n\n")
        .filter_map(|block| {
            let mut name = None;
            let mut data = None;
            for line in block.lines() {
                if let Some(rest) = line.strip_prefix("event:") {
                    name = Some(rest.trim().to_string());
                } else if let Some(rest) = line.strip_prefix("data:") {
                    data = Some(rest.trim().to_string());
                }
            }
            Some((name?, serde_json::from_str(&data?).ok()?))
        })
        .collect()
}

fn chat_body(content: &str) -> Value {
    json!({
        "messages": [{"content": content, "is_user": true}],
        "conversation_type": "analysis"
    })
}

#[tokio::test]
async fn test_health_check() {
    let store = InMemoryConversationStore::new();
    let client = MockCompletionClient::new();
    let response = app(&store, &client)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");
}

#[tokio::test]
async fn test_chat_stream_relays_and_persists() {
    let store = InMemoryConversationStore::new();
    let client = MockCompletionClient::new()
        .with_fragments(["I ", "hear ", "you."])
        .with_delay(Duration::ZERO);

    let response = app(&store, &client)
        .oneshot(post_json(
            "/api/ai/chat",
            &chat_body("Hello there, I feel anxious today"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(content_type.starts_with("text/event-stream"));

    let events = parse_sse(&body_text(response).await);
    let names: Vec<&str> = events.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["message", "message", "message", "complete"]);
    assert_eq!(events[0].1["full_content"], "I ");
    assert_eq!(events[1].1["full_content"], "I hear ");
    assert_eq!(events[2].1["full_content"], "I hear you.");

    let complete = &events[3].1;
    assert_eq!(complete["content"], "I hear you.");
    assert_eq!(complete["completed"], true);
    assert!(complete.get("truncated").is_none());

    let id: ConversationId = complete["conversation_id"].as_str().unwrap().parse().unwrap();
    let saved = store.get_by_id(id).await.unwrap();
    assert_eq!(saved.title, "Hello there, I feel anxious to");
    assert_eq!(saved.messages.len(), 2);
    assert_eq!(saved.messages[1].content, "I hear you.");
}

#[tokio::test]
async fn test_chat_stream_unknown_conversation() {
    let store = InMemoryConversationStore::new();
    let client = MockCompletionClient::new();
    let mut body = chat_body("hi");
    body["conversation_id"] = json!(ConversationId::new().to_string());

    let response = app(&store, &client)
        .oneshot(post_json("/api/ai/chat", &body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"], "Conversation not found");
    assert_eq!(client.stream_calls(), 0);
}

#[tokio::test]
async fn test_chat_stream_upstream_failure_event() {
    let store = InMemoryConversationStore::new();
    let client = MockCompletionClient::new().with_error(UpstreamError::Status {
        status: 500,
        body: "boom".to_string(),
    });

    let response = app(&store, &client)
        .oneshot(post_json("/api/ai/chat", &chat_body("hi")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let events = parse_sse(&body_text(response).await);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, "error");
    assert_eq!(events[0].1, json!({"error": "Failed to call AI service"}));
}

#[tokio::test]
async fn test_chat_rejects_invalid_requests() {
    let store = InMemoryConversationStore::new();
    let client = MockCompletionClient::new();

    let unknown_type = json!({
        "messages": [{"content": "hi", "is_user": true}],
        "conversation_type": "therapy"
    });
    let response = app(&store, &client)
        .oneshot(post_json("/api/ai/chat", &unknown_type))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let no_messages = json!({"messages": [], "conversation_type": "analysis"});
    let response = app(&store, &client)
        .oneshot(post_json("/api/ai/chat/unary", &no_messages))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let malformed = Request::builder()
        .method("POST")
        .uri("/api/ai/chat")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app(&store, &client).oneshot(malformed).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(response).await["error"].is_string());

    assert!(store.is_empty());
    assert_eq!(client.stream_calls() + client.complete_calls(), 0);
}

#[tokio::test]
async fn test_chat_unary() {
    let store = InMemoryConversationStore::new();
    let client = MockCompletionClient::new().with_response("I hear you.");
    let owner = UserId::new();

    let mut request = post_json("/api/ai/chat/unary", &chat_body("hello"));
    request
        .headers_mut()
        .insert(USER_ID_HEADER, owner.to_string().parse().unwrap());
    let response = app(&store, &client).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let reply = body_json(response).await;
    assert_eq!(reply["content"], "I hear you.");
    assert_eq!(reply["messages"].as_array().map(Vec::len), Some(2));

    let listed = store.list_by_owner(owner).await.unwrap();
    assert_eq!(listed.len(), 1);
}

#[tokio::test]
async fn test_chat_unary_upstream_failure() {
    let store = InMemoryConversationStore::new();
    let client =
        MockCompletionClient::new().with_error(UpstreamError::Transport("refused".to_string()));

    let response = app(&store, &client)
        .oneshot(post_json("/api/ai/chat/unary", &chat_body("hello")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(body_json(response).await["error"], "Failed to call AI service");
}

#[tokio::test]
async fn test_conversation_endpoints() {
    let store = InMemoryConversationStore::new();
    let client = MockCompletionClient::new();
    let router = app(&store, &client);
    let owner = UserId::new().to_string();

    // Creating requires an identity.
    let response = router
        .clone()
        .oneshot(post_json(
            "/api/conversations",
            &json!({"type": "mapping", "title": "Map"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let mut create = post_json(
        "/api/conversations",
        &json!({"type": "mapping", "title": "Map"}),
    );
    create
        .headers_mut()
        .insert(USER_ID_HEADER, owner.parse().unwrap());
    let response = router.clone().oneshot(create).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    assert_eq!(created["type"], "mapping");
    let id = created["id"].as_str().unwrap().to_string();

    let list = Request::builder()
        .uri("/api/conversations")
        .header(USER_ID_HEADER, &owner)
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(list).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await.as_array().map(Vec::len), Some(1));

    let update = Request::builder()
        .method("PUT")
        .uri(format!("/api/conversations/{id}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({"messages": [{"content": "hi", "is_user": true}]}).to_string(),
        ))
        .unwrap();
    let response = router.clone().oneshot(update).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["messages"][0]["content"], "hi");

    let get = Request::builder()
        .uri(format!("/api/conversations/{id}"))
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(get).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let delete = Request::builder()
        .method("DELETE")
        .uri(format!("/api/conversations/{id}"))
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(delete).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let get = Request::builder()
        .uri(format!("/api/conversations/{id}"))
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(get).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let bad = Request::builder()
        .uri("/api/conversations/not-an-id")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(bad).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_stream_continues_existing_conversation() {
    let store = InMemoryConversationStore::new();
    let existing = store
        .create(UserId::new(), ConversationType::Assistant, "Earlier")
        .await
        .unwrap();
    let client = MockCompletionClient::new()
        .with_fragments(["ok"])
        .with_delay(Duration::ZERO);

    let mut body = chat_body("again");
    body["conversation_id"] = json!(existing.id.to_string());
    let response = app(&store, &client)
        .oneshot(post_json("/api/ai/chat", &body))
        .await
        .unwrap();
    let events = parse_sse(&body_text(response).await);
    assert_eq!(events.last().map(|(name, _)| name.as_str()), Some("complete"));

    let saved = store.get_by_id(existing.id).await.unwrap();
    assert_eq!(saved.title, "Earlier");
    assert_eq!(saved.messages[0].content, "again");
    assert_eq!(saved.messages[1].content, "ok");
}
