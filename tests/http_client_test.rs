use std::convert::Infallible;
use std::time::Duration;

use axum::body::Body;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use futures::StreamExt;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use neuroguide_relay::config::UpstreamConfig;
use neuroguide_relay::conversation::ConversationType;
use neuroguide_relay::llm::{
    CompletionClient, HttpCompletionClient, UpstreamError, UpstreamMessage,
};

async fn spawn_backend(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

fn client_for(base_url: &str) -> HttpCompletionClient {
    let config = UpstreamConfig {
        base_url: base_url.to_string(),
        ..UpstreamConfig::default()
    };
    HttpCompletionClient::new(&config).unwrap()
}

fn messages() -> Vec<UpstreamMessage> {
    vec![
        UpstreamMessage {
            content: "hello".to_string(),
            is_user: true,
        },
        UpstreamMessage {
            content: "hi, how are you?".to_string(),
            is_user: false,
        },
    ]
}

async fn echo_chat(Json(body): Json<Value>) -> Json<Value> {
    let count = body["messages"].as_array().map_or(0, Vec::len);
    let kind = body["conversation_type"].as_str().unwrap_or_default();
    Json(json!({ "content": format!("{count}:{kind}") }))
}

async fn split_stream() -> Body {
    let chunks = vec![
        "{\"content\":\"I \"}\n{\"con",
        "tent\":\"hear \"}\nnot json\n\n",
        "{\"content\":\"you.\"}",
    ];
    Body::from_stream(futures::stream::iter(chunks.into_iter().map(Ok::<_, Infallible>)))
}

async fn hanging_stream() -> Body {
    let first = futures::stream::iter(vec![Ok::<_, Infallible>("{\"content\":\"first\"}\n")]);
    Body::from_stream(first.chain(futures::stream::pending()))
}

async fn broken_stream() -> Body {
    let first = futures::stream::iter(vec![Ok("{\"content\":\"first\"}\n")]);
    let crash = futures::stream::once(async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Err(std::io::Error::other("backend crashed"))
    });
    Body::from_stream(first.chain(crash))
}

async fn overloaded() -> (StatusCode, &'static str) {
    (StatusCode::SERVICE_UNAVAILABLE, "overloaded")
}

async fn not_json() -> &'static str {
    "definitely not json"
}

#[tokio::test]
async fn test_complete_posts_messages_and_type() {
    let base = spawn_backend(Router::new().route("/chat", post(echo_chat))).await;
    let client = client_for(&base);

    let text = client
        .complete(messages(), ConversationType::Mapping)
        .await
        .unwrap();
    assert_eq!(text, "2:mapping");
}

#[tokio::test]
async fn test_stream_decodes_split_records_and_skips_malformed() {
    let base = spawn_backend(Router::new().route("/stream-chat", post(split_stream))).await;
    let client = client_for(&base);

    let stream = client
        .stream_complete(messages(), ConversationType::Analysis, CancellationToken::new())
        .await
        .unwrap();
    let fragments: Vec<String> = stream.map(Result::unwrap).collect().await;
    assert_eq!(fragments, vec!["I ", "hear ", "you."]);
}

#[tokio::test]
async fn test_non_success_status() {
    let base = spawn_backend(
        Router::new()
            .route("/chat", post(overloaded))
            .route("/stream-chat", post(overloaded)),
    )
    .await;
    let client = client_for(&base);

    let err = client
        .complete(messages(), ConversationType::Analysis)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        UpstreamError::Status {
            status: 503,
            body: "overloaded".to_string()
        }
    );

    let err = client
        .stream_complete(messages(), ConversationType::Analysis, CancellationToken::new())
        .await
        .err()
        .unwrap();
    assert_eq!(err.status(), Some(503));
}

#[tokio::test]
async fn test_malformed_unary_reply() {
    let base = spawn_backend(Router::new().route("/chat", post(not_json))).await;
    let client = client_for(&base);

    let err = client
        .complete(messages(), ConversationType::Assistant)
        .await
        .unwrap_err();
    assert!(matches!(err, UpstreamError::MalformedReply(_)));
}

#[tokio::test]
async fn test_unreachable_backend() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let client = client_for(&format!("http://{addr}"));

    let err = client
        .complete(messages(), ConversationType::Analysis)
        .await
        .unwrap_err();
    assert!(matches!(err, UpstreamError::Transport(_)));
}

#[tokio::test]
async fn test_cancel_stops_hanging_stream() {
    let base = spawn_backend(Router::new().route("/stream-chat", post(hanging_stream))).await;
    let client = client_for(&base);
    let cancel = CancellationToken::new();

    let mut stream = client
        .stream_complete(messages(), ConversationType::Analysis, cancel.clone())
        .await
        .unwrap();
    assert_eq!(stream.next().await, Some(Ok("first".to_string())));

    cancel.cancel();
    let rest = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .unwrap();
    assert!(rest.is_none());
}

#[tokio::test]
async fn test_stream_broken_mid_flight() {
    let base = spawn_backend(Router::new().route("/stream-chat", post(broken_stream))).await;
    let client = client_for(&base);

    let mut stream = client
        .stream_complete(messages(), ConversationType::Analysis, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(stream.next().await, Some(Ok("first".to_string())));

    let next = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .unwrap();
    assert!(matches!(next, Some(Err(UpstreamError::Stream(_)))));
    assert!(stream.next().await.is_none());
}
