//! Completion client for the HTTP chat backend.
//!
//! The backend exposes two endpoints under a common base URL:
//! - `POST {base}/chat` answers `{"content": "..."}` in one body
//! - `POST {base}/stream-chat` answers newline-delimited `{"content": "..."}`
//!   records, one fragment each

use futures::StreamExt;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::client::{
    CompletionClient, CompletionFuture, FragmentSender, FragmentStream, UpstreamMessage,
    fragment_channel,
};
use super::errors::UpstreamError;
use super::line_decoder::{LineDecoder, decode_record};
use crate::config::UpstreamConfig;
use crate::conversation::ConversationType;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    messages: &'a [UpstreamMessage],
    conversation_type: ConversationType,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: String,
}

/// Async client for the chat backend.
#[derive(Clone, Debug)]
pub struct HttpCompletionClient {
    client: Client,
    chat_url: String,
    stream_url: String,
    request_timeout: std::time::Duration,
}

impl HttpCompletionClient {
    /// Build a client from configuration.
    ///
    /// Only the connect timeout applies to streamed calls; unary calls also
    /// carry the whole-request timeout.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &UpstreamConfig) -> Result<Self, UpstreamError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()?;
        let base = config.base_url.trim_end_matches('/');
        Ok(Self {
            client,
            chat_url: format!("{base}/chat"),
            stream_url: format!("{base}/stream-chat"),
            request_timeout: config.request_timeout(),
        })
    }

    async fn post_complete(
        &self,
        messages: Vec<UpstreamMessage>,
        conversation_type: ConversationType,
    ) -> Result<String, UpstreamError> {
        let body = ChatRequest {
            messages: &messages,
            conversation_type,
        };
        let response = self
            .client
            .post(&self.chat_url)
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await?;
        let response = check_status(response).await?;

        let text = response.text().await?;
        let reply: ChatReply = serde_json::from_str(&text)
            .map_err(|err| UpstreamError::MalformedReply(format!("{err}: {text}")))?;
        Ok(reply.content)
    }

    async fn open_stream(
        &self,
        messages: Vec<UpstreamMessage>,
        conversation_type: ConversationType,
        cancel: CancellationToken,
    ) -> Result<FragmentStream, UpstreamError> {
        let body = ChatRequest {
            messages: &messages,
            conversation_type,
        };
        let request = self.client.post(&self.stream_url).json(&body).send();

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(UpstreamError::Cancelled),
            response = request => response?,
        };
        let response = check_status(response).await?;

        tracing::debug!(url = %self.stream_url, "upstream stream opened");
        let (sender, stream) = fragment_channel(&cancel);
        tokio::spawn(pump(response, sender));
        Ok(stream)
    }
}

impl CompletionClient for HttpCompletionClient {
    fn complete(
        &self,
        messages: Vec<UpstreamMessage>,
        conversation_type: ConversationType,
    ) -> CompletionFuture<'_, Result<String, UpstreamError>> {
        Box::pin(self.post_complete(messages, conversation_type))
    }

    fn stream_complete(
        &self,
        messages: Vec<UpstreamMessage>,
        conversation_type: ConversationType,
        cancel: CancellationToken,
    ) -> CompletionFuture<'_, Result<FragmentStream, UpstreamError>> {
        Box::pin(self.open_stream(messages, conversation_type, cancel))
    }
}

async fn check_status(response: Response) -> Result<Response, UpstreamError> {
    let status = response.status();
    if status == StatusCode::OK {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(UpstreamError::Status {
        status: status.as_u16(),
        body,
    })
}

/// Read the response body line by line and forward each fragment.
async fn pump(response: Response, sender: FragmentSender) {
    let mut body = response.bytes_stream();
    let mut decoder = LineDecoder::new();

    loop {
        let chunk = tokio::select! {
            biased;
            () = sender.cancelled() => {
                tracing::debug!("upstream stream cancelled by caller");
                return;
            }
            chunk = body.next() => chunk,
        };

        match chunk {
            Some(Ok(bytes)) => {
                for line in decoder.push(&bytes) {
                    if !forward_line(&sender, line).await {
                        return;
                    }
                }
            }
            Some(Err(err)) => {
                tracing::warn!("upstream stream read failed: {err}");
                sender.send(Err(UpstreamError::Stream(err.to_string()))).await;
                return;
            }
            None => break,
        }
    }

    if let Some(line) = decoder.finish() {
        forward_line(&sender, line).await;
    }
}

/// Returns `false` once the consumer no longer wants fragments.
async fn forward_line(sender: &FragmentSender, line: Result<String, UpstreamError>) -> bool {
    match line.and_then(|line| decode_record(&line)) {
        Ok(fragment) => sender.send(Ok(fragment)).await,
        Err(err) => {
            tracing::warn!("skipping stream record: {err}");
            true
        }
    }
}
