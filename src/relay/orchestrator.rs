//! Relay runs: resolve the conversation, relay the upstream answer, persist
//! the transcript once, report the outcome.

use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::errors::{RelayError, UPSTREAM_FAILURE_MESSAGE};
use super::events::{CompleteEvent, ErrorEvent, MessageEvent, RelayEvent};
use super::identity::OwnerIdentity;
use super::request::{RelayRequest, ValidatedRequest};
use super::state::RelayState;
use crate::conversation::{Conversation, ConversationId, ConversationStore, Message};
use crate::llm::{CompletionClient, FragmentStream, UpstreamError};

/// Capacity of the queue between a run and its caller.
pub const EVENT_QUEUE_CAPACITY: usize = 1;

/// Events of one run, ending after the terminal event or on cancellation.
pub type RelayEventStream = Pin<Box<dyn Stream<Item = RelayEvent> + Send>>;

/// How a streaming run ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Completion {
    /// The upstream stream ended normally.
    Finished,
    /// The upstream stream broke after at least one fragment.
    Truncated,
    /// The caller cancelled the run.
    Cancelled,
    /// The upstream call failed before any fragment.
    UpstreamFailed,
}

/// Summary of a finished streaming run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RelayOutcome {
    /// Conversation that was answered.
    pub conversation_id: ConversationId,
    /// Answer text relayed to the caller.
    pub content: String,
    /// How the run ended.
    pub completion: Completion,
    /// Whether the transcript was written.
    pub persisted: bool,
}

/// Reply of a unary run.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct UnaryReply {
    /// Full answer text.
    pub content: String,
    /// Conversation that was answered.
    pub conversation_id: ConversationId,
    /// Persisted transcript.
    pub messages: Vec<Message>,
}

/// Entry point of relay runs, holding the injected store and client.
#[derive(Clone)]
pub struct RelayOrchestrator {
    store: Arc<dyn ConversationStore>,
    client: Arc<dyn CompletionClient>,
}

impl RelayOrchestrator {
    /// Build an orchestrator over explicit collaborators.
    #[must_use]
    pub fn new(store: Arc<dyn ConversationStore>, client: Arc<dyn CompletionClient>) -> Self {
        Self { store, client }
    }

    /// Validate the request, resolve its conversation and start streaming.
    ///
    /// The run continues in a background task. It stops when `cancel` fires
    /// or when the returned handle cancels it.
    ///
    /// # Errors
    /// Returns [`RelayError::Validation`] for a malformed request,
    /// [`RelayError::NotFound`] for an unknown conversation id and
    /// [`RelayError::Persistence`] if the conversation cannot be created or
    /// read. No upstream call is made in any of these cases.
    pub async fn start_stream(
        &self,
        request: RelayRequest,
        owner: OwnerIdentity,
        cancel: CancellationToken,
    ) -> Result<RelayHandle, RelayError> {
        let request = request.validate()?;
        let mut state = RelayState::ResolvingConversation;
        let conversation = match self.resolve(&request, owner).await {
            Ok(conversation) => conversation,
            Err(err) => {
                state.advance(RelayState::Aborted);
                return Err(err);
            }
        };

        let conversation_id = conversation.id;
        tracing::info!(
            conversation_id = %conversation_id,
            conversation_type = %request.conversation_type,
            message_count = request.messages.len(),
            "relay stream started"
        );

        let cancel = cancel.child_token();
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let (delivered_tx, delivered_rx) = watch::channel(0);
        let run = StreamRun {
            store: Arc::clone(&self.store),
            client: Arc::clone(&self.client),
            conversation_id,
            request,
            state,
            cancel: cancel.clone(),
            events: events_tx,
            delivered: delivered_rx,
        };
        let task = tokio::spawn(run.execute());

        Ok(RelayHandle {
            conversation_id,
            events: events_rx,
            delivered: delivered_tx,
            cancel,
            task,
        })
    }

    /// Run one turn without streaming.
    ///
    /// # Errors
    /// Returns the same resolution errors as [`Self::start_stream`],
    /// [`RelayError::Upstream`] if the backend fails (nothing is written) and
    /// [`RelayError::Persistence`] if the answer cannot be saved.
    pub async fn complete(
        &self,
        request: RelayRequest,
        owner: OwnerIdentity,
    ) -> Result<UnaryReply, RelayError> {
        let request = request.validate()?;
        let mut state = RelayState::ResolvingConversation;
        let conversation = match self.resolve(&request, owner).await {
            Ok(conversation) => conversation,
            Err(err) => {
                state.advance(RelayState::Aborted);
                return Err(err);
            }
        };
        let conversation_id = conversation.id;

        state.advance(RelayState::Streaming);
        let mut messages = request.transcript();
        let content = match self
            .client
            .complete(request.upstream_messages(), request.conversation_type)
            .await
        {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!(conversation_id = %conversation_id, "unary upstream call failed: {err}");
                state.advance(RelayState::Aborted);
                return Err(err.into());
            }
        };
        fill_placeholder(&mut messages, &content);

        state.advance(RelayState::Persisting);
        let saved = match self.store.replace_messages(conversation_id, messages).await {
            Ok(saved) => saved,
            Err(err) => {
                tracing::error!(conversation_id = %conversation_id, "failed to persist conversation: {err}");
                state.advance(RelayState::Aborted);
                return Err(err.into());
            }
        };

        state.advance(RelayState::Done);
        tracing::info!(conversation_id = %conversation_id, "unary relay completed");
        Ok(UnaryReply {
            content,
            conversation_id,
            messages: saved.messages,
        })
    }

    async fn resolve(
        &self,
        request: &ValidatedRequest,
        owner: OwnerIdentity,
    ) -> Result<Conversation, RelayError> {
        match request.conversation_id {
            None => {
                if !owner.is_authenticated() {
                    tracing::warn!("creating conversation for unauthenticated caller");
                }
                let conversation = self
                    .store
                    .create(owner.owner_id(), request.conversation_type, &request.title())
                    .await
                    .map_err(|err| {
                        tracing::error!("failed to create conversation: {err}");
                        RelayError::from(err)
                    })?;
                tracing::info!(conversation_id = %conversation.id, "conversation created");
                Ok(conversation)
            }
            Some(id) => self.store.get_by_id(id).await.map_err(|err| {
                tracing::warn!(conversation_id = %id, "failed to load conversation: {err}");
                RelayError::from(err)
            }),
        }
    }
}

fn fill_placeholder(messages: &mut [Message], content: &str) {
    if let Some(placeholder) = messages.last_mut() {
        placeholder.content.clear();
        placeholder.content.push_str(content);
    }
}

/// Caller side of a running stream.
#[derive(Debug)]
pub struct RelayHandle {
    conversation_id: ConversationId,
    events: mpsc::Receiver<RelayEvent>,
    /// Number of `message` events handed to the caller.
    delivered: watch::Sender<usize>,
    cancel: CancellationToken,
    task: JoinHandle<RelayOutcome>,
}

impl RelayHandle {
    /// Conversation this run answers.
    #[must_use]
    pub const fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    /// Next event, or `None` once the run has ended or was cancelled.
    pub async fn next_event(&mut self) -> Option<RelayEvent> {
        recv_event(&mut self.events, &self.delivered, &self.cancel).await
    }

    /// Stop the run. No event is delivered afterwards.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Turn the handle into an event stream that cancels the run when
    /// dropped.
    #[must_use]
    pub fn into_stream(self) -> RelayEventStream {
        let Self {
            events,
            delivered,
            cancel,
            task,
            ..
        } = self;
        drop(task);

        let guard = cancel.clone().drop_guard();
        Box::pin(futures::stream::unfold(
            (events, delivered, cancel, guard),
            |(mut events, delivered, cancel, guard)| async move {
                let event = recv_event(&mut events, &delivered, &cancel).await?;
                Some((event, (events, delivered, cancel, guard)))
            },
        ))
    }

    /// Discard unread events and wait for the run to end.
    pub async fn join(mut self) -> RelayOutcome {
        while self.next_event().await.is_some() {}

        match self.task.await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(conversation_id = %self.conversation_id, "relay task failed: {err}");
                RelayOutcome {
                    conversation_id: self.conversation_id,
                    content: String::new(),
                    completion: Completion::Cancelled,
                    persisted: false,
                }
            }
        }
    }
}

async fn recv_event(
    events: &mut mpsc::Receiver<RelayEvent>,
    delivered: &watch::Sender<usize>,
    cancel: &CancellationToken,
) -> Option<RelayEvent> {
    if cancel.is_cancelled() {
        return None;
    }
    let event = tokio::select! {
        biased;
        () = cancel.cancelled() => None,
        event = events.recv() => event,
    }?;
    if matches!(event, RelayEvent::Message(_)) {
        delivered.send_modify(|count| *count += 1);
    }
    Some(event)
}

enum Step {
    Fragment(String),
    Failed(UpstreamError),
    Ended,
    Cancelled,
}

/// State of one streaming run after its conversation was resolved.
struct StreamRun {
    store: Arc<dyn ConversationStore>,
    client: Arc<dyn CompletionClient>,
    conversation_id: ConversationId,
    request: ValidatedRequest,
    state: RelayState,
    cancel: CancellationToken,
    events: mpsc::Sender<RelayEvent>,
    delivered: watch::Receiver<usize>,
}

impl StreamRun {
    async fn execute(mut self) -> RelayOutcome {
        self.state.advance(RelayState::Streaming);
        let mut messages = self.request.transcript();

        let opened = tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(UpstreamError::Cancelled),
            opened = self.client.stream_complete(
                self.request.upstream_messages(),
                self.request.conversation_type,
                self.cancel.clone(),
            ) => opened,
        };
        let mut fragments = match opened {
            Ok(fragments) => fragments,
            Err(err) => return self.abort_before_stream(err).await,
        };

        let mut content = String::new();
        // Length of `content` after each relayed fragment, starting at 0.
        let mut boundaries = vec![0_usize];
        let mut relayed = 0_usize;
        let mut truncated = false;
        let mut cancelled = false;

        loop {
            match self.next_step(&mut fragments).await {
                Step::Fragment(fragment) => {
                    content.push_str(&fragment);
                    boundaries.push(content.len());
                    fill_placeholder(&mut messages, &content);
                    let event = RelayEvent::Message(MessageEvent {
                        content: fragment,
                        full_content: content.clone(),
                        conversation_id: self.conversation_id,
                        messages: messages.clone(),
                    });
                    if !self.emit(event).await {
                        cancelled = true;
                        break;
                    }
                    relayed += 1;
                }
                Step::Failed(err) if relayed == 0 => {
                    drop(fragments);
                    return self.abort_before_stream(err).await;
                }
                Step::Failed(err) => {
                    tracing::warn!(
                        conversation_id = %self.conversation_id,
                        fragments = relayed,
                        "upstream stream broke, keeping partial answer: {err}"
                    );
                    truncated = true;
                    break;
                }
                Step::Ended => break,
                Step::Cancelled => {
                    cancelled = true;
                    break;
                }
            }
        }
        drop(fragments);

        if cancelled {
            let shown = *self.delivered.borrow();
            let keep = boundaries.get(shown).copied().unwrap_or(content.len());
            content.truncate(keep);
            fill_placeholder(&mut messages, &content);
            tracing::info!(
                conversation_id = %self.conversation_id,
                fragments = relayed,
                shown,
                "relay cancelled, keeping the text the caller received"
            );
        }

        self.state.advance(RelayState::Persisting);
        let persisted = match self
            .store
            .replace_messages(self.conversation_id, messages.clone())
            .await
        {
            Ok(_) => true,
            Err(err) => {
                tracing::error!(
                    conversation_id = %self.conversation_id,
                    "failed to persist conversation: {err}"
                );
                false
            }
        };

        let completion = if cancelled {
            self.state.advance(RelayState::Aborted);
            Completion::Cancelled
        } else {
            self.emit(RelayEvent::Complete(CompleteEvent {
                content: content.clone(),
                conversation_id: self.conversation_id,
                messages,
                completed: true,
                truncated,
            }))
            .await;
            self.state.advance(RelayState::Done);
            if truncated {
                Completion::Truncated
            } else {
                Completion::Finished
            }
        };

        tracing::info!(
            conversation_id = %self.conversation_id,
            fragments = relayed,
            persisted,
            completion = ?completion,
            "relay stream finished"
        );
        RelayOutcome {
            conversation_id: self.conversation_id,
            content,
            completion,
            persisted,
        }
    }

    async fn next_step(&self, fragments: &mut FragmentStream) -> Step {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Step::Cancelled,
            next = fragments.next() => match next {
                Some(Ok(fragment)) => Step::Fragment(fragment),
                Some(Err(err)) => Step::Failed(err),
                None => Step::Ended,
            },
        }
    }

    /// Queue one event; `false` once the caller is gone or cancelled.
    async fn emit(&self, event: RelayEvent) -> bool {
        let queued = tokio::select! {
            biased;
            () = self.cancel.cancelled() => false,
            sent = self.events.send(event) => sent.is_ok(),
        };
        if !queued {
            self.cancel.cancel();
        }
        queued
    }

    async fn abort_before_stream(mut self, err: UpstreamError) -> RelayOutcome {
        self.state.advance(RelayState::Aborted);
        let completion = if matches!(err, UpstreamError::Cancelled) || self.cancel.is_cancelled() {
            tracing::info!(conversation_id = %self.conversation_id, "relay cancelled before streaming");
            Completion::Cancelled
        } else {
            tracing::error!(
                conversation_id = %self.conversation_id,
                status = ?err.status(),
                "upstream stream failed before any fragment: {err}"
            );
            self.emit(RelayEvent::Error(ErrorEvent {
                error: UPSTREAM_FAILURE_MESSAGE.to_string(),
            }))
            .await;
            Completion::UpstreamFailed
        };
        RelayOutcome {
            conversation_id: self.conversation_id,
            content: String::new(),
            completion,
            persisted: false,
        }
    }
}
