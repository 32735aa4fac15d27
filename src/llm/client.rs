//! Completion client contract shared by the HTTP backend and the mock.

use std::future::Future;
use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use super::errors::UpstreamError;
use crate::conversation::{ConversationType, Message};

/// Boxed future type for completion client operations.
pub type CompletionFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Lazy, finite sequence of text fragments.
///
/// An `Err` item means the stream broke mid-flight; it is always the last item.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, UpstreamError>> + Send>>;

/// Capacity of the hand-off queue between a stream producer and its consumer.
///
/// One slot is enough: the producer waits until the previous fragment has been
/// taken, so a slow consumer throttles the upstream read.
pub const FRAGMENT_QUEUE_CAPACITY: usize = 1;

/// Message shape sent to the completion backend.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct UpstreamMessage {
    /// Message text.
    pub content: String,
    /// `true` for the human side.
    pub is_user: bool,
}

impl From<&Message> for UpstreamMessage {
    fn from(message: &Message) -> Self {
        Self {
            content: message.content.clone(),
            is_user: message.is_user,
        }
    }
}

/// Abstraction over the text-generation backend.
pub trait CompletionClient: Send + Sync {
    /// Request a whole answer at once.
    ///
    /// # Errors
    /// Returns an error on transport failure, non-success status or a
    /// malformed reply body.
    fn complete(
        &self,
        messages: Vec<UpstreamMessage>,
        conversation_type: ConversationType,
    ) -> CompletionFuture<'_, Result<String, UpstreamError>>;

    /// Open a streamed answer.
    ///
    /// The returned stream is fed by a background producer that stops when
    /// `cancel` fires or the stream is dropped.
    ///
    /// # Errors
    /// Returns an error, before any fragment is produced, if the backend
    /// cannot be reached or answers with a non-success status.
    fn stream_complete(
        &self,
        messages: Vec<UpstreamMessage>,
        conversation_type: ConversationType,
        cancel: CancellationToken,
    ) -> CompletionFuture<'_, Result<FragmentStream, UpstreamError>>;
}

/// Producer half of a fragment hand-off queue.
#[derive(Debug)]
pub struct FragmentSender {
    tx: mpsc::Sender<Result<String, UpstreamError>>,
    cancel: CancellationToken,
}

impl FragmentSender {
    /// Hand one item to the consumer, waiting for the slot to free up.
    ///
    /// Returns `false` once the consumer is gone or the run is cancelled; the
    /// producer should stop at that point.
    pub async fn send(&self, item: Result<String, UpstreamError>) -> bool {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => false,
            sent = self.tx.send(item) => sent.is_ok(),
        }
    }

    /// Resolves when the run is cancelled.
    #[must_use]
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }
}

/// Build a bounded fragment queue tied to `cancel`.
#[must_use]
pub fn fragment_channel(cancel: &CancellationToken) -> (FragmentSender, FragmentStream) {
    let (tx, rx) = mpsc::channel(FRAGMENT_QUEUE_CAPACITY);
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    });
    let sender = FragmentSender {
        tx,
        cancel: cancel.clone(),
    };
    (sender, Box::pin(stream))
}
