//! Conversation and message entities.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{ConversationId, UserId};

/// Maximum number of characters kept when deriving a title.
pub const TITLE_MAX_CHARS: usize = 30;

/// Kind of conversation.
///
/// The type selects a default greeting and is forwarded to the completion
/// backend; it does not change how a conversation is stored or relayed.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationType {
    /// Neuroscience analysis of a described thought or behaviour.
    Analysis,
    /// Mapping of practice concepts onto brain mechanisms.
    Mapping,
    /// General practice assistant.
    Assistant,
}

impl ConversationType {
    /// All accepted values, in declaration order.
    pub const ALL: [Self; 3] = [Self::Analysis, Self::Mapping, Self::Assistant];

    /// Stable string form used on the wire and in storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Analysis => "analysis",
            Self::Mapping => "mapping",
            Self::Assistant => "assistant",
        }
    }

    /// Fallback text shown when no backend answer is configured.
    #[must_use]
    pub const fn default_greeting(self) -> &'static str {
        match self {
            Self::Analysis => {
                "## Neuroscience analysis\n\nWelcome to the neuroscience analysis. Describe a thought process or behaviour and I will analyse it from a neuroscience perspective."
            }
            Self::Mapping => {
                "## Practice mapping\n\nWelcome to practice mapping. Enter a practice saying or concept and I will map it onto brain mechanisms and neural pathways."
            }
            Self::Assistant => {
                "## Practice assistant\n\nWelcome to the practice assistant. Describe what you need and I will build a personalised brain-science practice tool for you."
            }
        }
    }
}

impl fmt::Display for ConversationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown conversation type.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("unknown conversation type: {0:?} (expected analysis, mapping or assistant)")]
pub struct ConversationTypeParseError(pub String);

impl FromStr for ConversationType {
    type Err = ConversationTypeParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "analysis" => Ok(Self::Analysis),
            "mapping" => Ok(Self::Mapping),
            "assistant" => Ok(Self::Assistant),
            other => Err(ConversationTypeParseError(other.to_string())),
        }
    }
}

/// One utterance in a conversation.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Text of the message.
    pub content: String,
    /// `true` for the human side, `false` for the assistant.
    pub is_user: bool,
    /// When the message was recorded; defaults to now when absent on input.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Build a message timestamped now.
    #[must_use]
    pub fn new(content: impl Into<String>, is_user: bool) -> Self {
        Self {
            content: content.into(),
            is_user,
            created_at: Utc::now(),
        }
    }

    /// Build a user message timestamped now.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(content, true)
    }

    /// Build an assistant message timestamped now.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(content, false)
    }

    /// Empty assistant message, filled in while a relay run streams.
    #[must_use]
    pub fn placeholder() -> Self {
        Self::assistant(String::new())
    }
}

/// A titled, typed, ordered transcript.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Server-generated identifier.
    pub id: ConversationId,
    /// Owner of the conversation.
    pub user_id: UserId,
    /// Conversation kind.
    #[serde(rename = "type")]
    pub conversation_type: ConversationType,
    /// Display title.
    pub title: String,
    /// Messages in conversation order.
    pub messages: Vec<Message>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time of the last message-replacing write.
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Create an empty conversation with both timestamps set to now.
    #[must_use]
    pub fn new(owner: UserId, conversation_type: ConversationType, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId::new(),
            user_id: owner,
            conversation_type,
            title: title.into(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append one empty, non-user message at the end of the transcript.
    #[must_use]
    pub fn append_assistant_placeholder(mut self) -> Self {
        self.messages.push(Message::placeholder());
        self
    }
}

/// Title for a new conversation: the first [`TITLE_MAX_CHARS`] characters of
/// `content`, or all of it when shorter.
#[must_use]
pub fn derive_title(content: &str) -> String {
    content.chars().take(TITLE_MAX_CHARS).collect()
}
