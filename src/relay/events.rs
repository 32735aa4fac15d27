//! Outbound events of a streaming relay run.

use serde::Serialize;

use crate::conversation::{ConversationId, Message};

/// One relayed fragment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MessageEvent {
    /// The fragment alone.
    pub content: String,
    /// Everything relayed so far, this fragment included.
    pub full_content: String,
    /// Conversation being answered.
    pub conversation_id: ConversationId,
    /// Transcript snapshot with the assistant message filled so far.
    pub messages: Vec<Message>,
}

/// Terminal event of a run that reached the upstream stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CompleteEvent {
    /// Full answer text.
    pub content: String,
    /// Conversation being answered.
    pub conversation_id: ConversationId,
    /// Final transcript.
    pub messages: Vec<Message>,
    /// Always `true`.
    pub completed: bool,
    /// Set when the upstream stream broke and the answer is partial.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

/// Terminal event of a run that failed before streaming.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ErrorEvent {
    /// Caller-facing description.
    pub error: String,
}

/// Event emitted to the caller of a streaming run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelayEvent {
    /// A fragment arrived.
    Message(MessageEvent),
    /// The run finished; nothing follows.
    Complete(CompleteEvent),
    /// The run failed before streaming; nothing follows.
    Error(ErrorEvent),
}

impl RelayEvent {
    /// Event name on the wire.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::Complete(_) => "complete",
            Self::Error(_) => "error",
        }
    }

    /// Whether no event can follow this one.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Message(_))
    }

    /// Payload as JSON text.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::Message(payload) => serde_json::to_string(payload),
            Self::Complete(payload) => serde_json::to_string(payload),
            Self::Error(payload) => serde_json::to_string(payload),
        }
    }
}
