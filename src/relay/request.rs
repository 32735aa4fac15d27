//! Inbound relay request and its validation.

use serde::{Deserialize, Serialize};

use super::errors::RelayError;
use crate::conversation::{ConversationId, ConversationType, Message, derive_title};
use crate::llm::UpstreamMessage;

/// One message of an inbound request.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Message text.
    pub content: String,
    /// `true` for the human side.
    pub is_user: bool,
}

/// Body of a chat request, as received.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RelayRequest {
    /// Existing conversation to continue; absent or blank starts a new one.
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Messages of this turn, in order.
    #[serde(default)]
    pub messages: Vec<InboundMessage>,
    /// One of `analysis`, `mapping` or `assistant`.
    #[serde(default)]
    pub conversation_type: String,
}

/// A request that passed validation.
#[derive(Clone, Debug)]
pub struct ValidatedRequest {
    /// Conversation to continue, if any.
    pub conversation_id: Option<ConversationId>,
    /// Non-empty list of non-empty messages.
    pub messages: Vec<InboundMessage>,
    /// Conversation kind.
    pub conversation_type: ConversationType,
}

impl RelayRequest {
    /// Check the request shape before any state is touched.
    ///
    /// # Errors
    /// Returns [`RelayError::Validation`] if there are no messages, a message
    /// is blank, the conversation type is unknown or the id is malformed.
    pub fn validate(self) -> Result<ValidatedRequest, RelayError> {
        if self.messages.is_empty() {
            return Err(RelayError::Validation("messages must not be empty".to_string()));
        }
        if let Some(index) = self
            .messages
            .iter()
            .position(|message| message.content.trim().is_empty())
        {
            return Err(RelayError::Validation(format!(
                "message {index} has empty content"
            )));
        }

        let conversation_type = self
            .conversation_type
            .parse::<ConversationType>()
            .map_err(|err| RelayError::Validation(err.to_string()))?;

        let conversation_id = match self.conversation_id.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(raw.parse::<ConversationId>().map_err(|_| {
                RelayError::Validation(format!("invalid conversation id: {raw}"))
            })?),
        };

        Ok(ValidatedRequest {
            conversation_id,
            messages: self.messages,
            conversation_type,
        })
    }
}

impl ValidatedRequest {
    /// Title for a conversation started by this request.
    #[must_use]
    pub fn title(&self) -> String {
        self.messages
            .first()
            .map(|message| derive_title(&message.content))
            .unwrap_or_default()
    }

    /// Messages in the shape the completion backend expects.
    #[must_use]
    pub fn upstream_messages(&self) -> Vec<UpstreamMessage> {
        self.messages
            .iter()
            .map(|message| UpstreamMessage {
                content: message.content.clone(),
                is_user: message.is_user,
            })
            .collect()
    }

    /// Transcript to persist: every inbound message stamped now, followed by
    /// an empty assistant placeholder.
    #[must_use]
    pub fn transcript(&self) -> Vec<Message> {
        let mut messages: Vec<Message> = self
            .messages
            .iter()
            .map(|message| Message::new(message.content.clone(), message.is_user))
            .collect();
        messages.push(Message::placeholder());
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(contents: &[&str], kind: &str) -> RelayRequest {
        RelayRequest {
            conversation_id: None,
            messages: contents
                .iter()
                .map(|content| InboundMessage {
                    content: (*content).to_string(),
                    is_user: true,
                })
                .collect(),
            conversation_type: kind.to_string(),
        }
    }

    #[test]
    fn test_valid_request() {
        let validated = request(&["Hello there, I feel anxious today"], "analysis")
            .validate()
            .unwrap();
        assert_eq!(validated.conversation_type, ConversationType::Analysis);
        assert!(validated.conversation_id.is_none());
        assert_eq!(validated.title(), "Hello there, I feel anxious to");
    }

    #[test]
    fn test_rejects_empty_messages() {
        assert!(matches!(
            request(&[], "analysis").validate(),
            Err(RelayError::Validation(_))
        ));
    }

    #[test]
    fn test_rejects_blank_content() {
        assert!(matches!(
            request(&["hi", "   "], "analysis").validate(),
            Err(RelayError::Validation(_))
        ));
    }

    #[test]
    fn test_rejects_unknown_type() {
        assert!(matches!(
            request(&["hi"], "therapy").validate(),
            Err(RelayError::Validation(_))
        ));
    }

    #[test]
    fn test_blank_id_is_absent() {
        let mut req = request(&["hi"], "mapping");
        req.conversation_id = Some("  ".to_string());
        assert!(req.validate().unwrap().conversation_id.is_none());
    }

    #[test]
    fn test_malformed_id_rejected() {
        let mut req = request(&["hi"], "mapping");
        req.conversation_id = Some("64f0c0ffee".to_string());
        assert!(matches!(req.validate(), Err(RelayError::Validation(_))));
    }

    #[test]
    fn test_transcript_ends_with_placeholder() {
        let validated = request(&["a", "b"], "assistant").validate().unwrap();
        let transcript = validated.transcript();
        assert_eq!(transcript.len(), 3);
        assert_eq!(transcript[0].content, "a");
        assert_eq!(transcript[1].content, "b");
        assert!(!transcript[2].is_user);
        assert!(transcript[2].content.is_empty());
    }

    #[test]
    fn test_deserialize_body() {
        let body = r#"{"messages":[{"content":"hi","is_user":true}],"conversation_type":"analysis"}"#;
        let req: RelayRequest = serde_json::from_str(body).unwrap();
        assert!(req.conversation_id.is_none());
        assert_eq!(req.messages.len(), 1);
    }
}
