//! Deterministic completion client for development and tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::client::{
    CompletionClient, CompletionFuture, FragmentStream, UpstreamMessage, fragment_channel,
};
use super::errors::UpstreamError;
use crate::conversation::ConversationType;

/// Delay between typewriter fragments.
pub const DEFAULT_FRAGMENT_DELAY: Duration = Duration::from_millis(100);

#[derive(Clone, Debug)]
enum Script {
    /// The conversation type's greeting, one character per fragment.
    Greeting,
    /// A fixed answer, one character per fragment.
    Response(String),
    /// Explicit fragments, in order.
    Fragments(Vec<String>),
    /// Every call fails before producing anything.
    Error(UpstreamError),
}

/// Scripted [`CompletionClient`].
///
/// Without configuration it answers with the greeting of the requested
/// conversation type, streamed character by character.
#[derive(Clone, Debug)]
pub struct MockCompletionClient {
    script: Script,
    fail_after: Option<(usize, UpstreamError)>,
    delay: Duration,
    open_delay: Duration,
    complete_calls: Arc<AtomicUsize>,
    stream_calls: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<Vec<UpstreamMessage>>>>,
}

impl Default for MockCompletionClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCompletionClient {
    /// Greeting-answering client with the default fragment delay.
    #[must_use]
    pub fn new() -> Self {
        Self {
            script: Script::Greeting,
            fail_after: None,
            delay: DEFAULT_FRAGMENT_DELAY,
            open_delay: Duration::ZERO,
            complete_calls: Arc::new(AtomicUsize::new(0)),
            stream_calls: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Answer with `text`, streamed one character at a time.
    #[must_use]
    pub fn with_response(mut self, text: impl Into<String>) -> Self {
        self.script = Script::Response(text.into());
        self
    }

    /// Stream exactly these fragments.
    #[must_use]
    pub fn with_fragments<I, S>(mut self, fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.script = Script::Fragments(fragments.into_iter().map(Into::into).collect());
        self
    }

    /// Fail every call with `error`.
    #[must_use]
    pub fn with_error(mut self, error: UpstreamError) -> Self {
        self.script = Script::Error(error);
        self
    }

    /// Break the stream with `error` after `count` fragments.
    #[must_use]
    pub fn failing_after(mut self, count: usize, error: UpstreamError) -> Self {
        self.fail_after = Some((count, error));
        self
    }

    /// Pause between fragments.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Pause before a stream opens.
    #[must_use]
    pub const fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    /// Number of unary calls received.
    #[must_use]
    pub fn complete_calls(&self) -> usize {
        self.complete_calls.load(Ordering::SeqCst)
    }

    /// Number of stream calls received.
    #[must_use]
    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    /// Message lists of every call received, oldest first.
    #[must_use]
    pub fn requests(&self) -> Vec<Vec<UpstreamMessage>> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, messages: Vec<UpstreamMessage>) {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(messages);
    }

    fn fragments_for(
        &self,
        conversation_type: ConversationType,
    ) -> Result<Vec<String>, UpstreamError> {
        match &self.script {
            Script::Greeting => Ok(typewriter(conversation_type.default_greeting())),
            Script::Response(text) => Ok(typewriter(text)),
            Script::Fragments(fragments) => Ok(fragments.clone()),
            Script::Error(error) => Err(error.clone()),
        }
    }

    async fn open_stream(
        &self,
        conversation_type: ConversationType,
        cancel: CancellationToken,
    ) -> Result<FragmentStream, UpstreamError> {
        if !self.open_delay.is_zero() {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(UpstreamError::Cancelled),
                () = tokio::time::sleep(self.open_delay) => {}
            }
        }
        if cancel.is_cancelled() {
            return Err(UpstreamError::Cancelled);
        }

        let fragments = self.fragments_for(conversation_type)?;
        let fail_after = self.fail_after.clone();
        let delay = self.delay;
        let (sender, stream) = fragment_channel(&cancel);

        tokio::spawn(async move {
            let total = fragments.len();
            for (index, fragment) in fragments.into_iter().enumerate() {
                if let Some(error) = failure_at(fail_after.as_ref(), index) {
                    sender.send(Err(error)).await;
                    return;
                }
                if !sender.send(Ok(fragment)).await {
                    return;
                }
                if !delay.is_zero() {
                    tokio::select! {
                        biased;
                        () = sender.cancelled() => return,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
            if let Some(error) = failure_at(fail_after.as_ref(), total) {
                sender.send(Err(error)).await;
            }
        });

        Ok(stream)
    }
}

fn failure_at(fail_after: Option<&(usize, UpstreamError)>, index: usize) -> Option<UpstreamError> {
    fail_after
        .filter(|(count, _)| *count == index)
        .map(|(_, error)| error.clone())
}

fn typewriter(text: &str) -> Vec<String> {
    text.chars().map(String::from).collect()
}

impl CompletionClient for MockCompletionClient {
    fn complete(
        &self,
        messages: Vec<UpstreamMessage>,
        conversation_type: ConversationType,
    ) -> CompletionFuture<'_, Result<String, UpstreamError>> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        self.record(messages);
        let result = self
            .fragments_for(conversation_type)
            .map(|fragments| fragments.concat());
        Box::pin(async move { result })
    }

    fn stream_complete(
        &self,
        messages: Vec<UpstreamMessage>,
        conversation_type: ConversationType,
        cancel: CancellationToken,
    ) -> CompletionFuture<'_, Result<FragmentStream, UpstreamError>> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        self.record(messages);
        Box::pin(self.open_stream(conversation_type, cancel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    async fn collect(stream: FragmentStream) -> Vec<Result<String, UpstreamError>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn test_greeting_by_default() {
        let client = MockCompletionClient::new().with_delay(Duration::ZERO);
        let text = client
            .complete(Vec::new(), ConversationType::Mapping)
            .await
            .unwrap();
        assert_eq!(text, ConversationType::Mapping.default_greeting());
        assert_eq!(client.complete_calls(), 1);
    }

    #[tokio::test]
    async fn test_typewriter_stream() {
        let client = MockCompletionClient::new()
            .with_response("héllo")
            .with_delay(Duration::ZERO);
        let stream = client
            .stream_complete(Vec::new(), ConversationType::Assistant, CancellationToken::new())
            .await
            .unwrap();
        let fragments: Vec<String> = collect(stream)
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();
        assert_eq!(fragments, vec!["h", "é", "l", "l", "o"]);
        assert_eq!(client.stream_calls(), 1);
    }

    #[tokio::test]
    async fn test_fixed_error() {
        let client = MockCompletionClient::new().with_error(UpstreamError::Status {
            status: 503,
            body: "down".to_string(),
        });
        let err = client
            .stream_complete(Vec::new(), ConversationType::Analysis, CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert_eq!(err.status(), Some(503));
        assert!(client.complete(Vec::new(), ConversationType::Analysis).await.is_err());
    }

    #[tokio::test]
    async fn test_failing_after() {
        let client = MockCompletionClient::new()
            .with_fragments(["a", "b", "c"])
            .failing_after(2, UpstreamError::Stream("reset".to_string()))
            .with_delay(Duration::ZERO);
        let stream = client
            .stream_complete(Vec::new(), ConversationType::Analysis, CancellationToken::new())
            .await
            .unwrap();
        let items = collect(stream).await;
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_deref(), Ok("a"));
        assert_eq!(items[1].as_deref(), Ok("b"));
        assert!(matches!(items[2], Err(UpstreamError::Stream(_))));
    }

    #[tokio::test]
    async fn test_cancel_before_open() {
        let client = MockCompletionClient::new().with_open_delay(Duration::from_secs(30));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = client
            .stream_complete(Vec::new(), ConversationType::Analysis, cancel)
            .await;
        assert!(matches!(result, Err(UpstreamError::Cancelled)));
    }

    #[tokio::test]
    async fn test_records_requests() {
        let client = MockCompletionClient::new().with_response("ok");
        let messages = vec![UpstreamMessage {
            content: "hi".to_string(),
            is_user: true,
        }];
        client
            .complete(messages.clone(), ConversationType::Analysis)
            .await
            .unwrap();
        assert_eq!(client.requests(), vec![messages]);
    }
}
