//! Lifecycle states of a relay run.

use core::fmt;

/// Stage of a relay run.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum RelayState {
    /// Looking up or creating the conversation.
    ResolvingConversation,
    /// Relaying upstream fragments.
    Streaming,
    /// Writing the transcript.
    Persisting,
    /// Finished; the terminal event was emitted.
    Done,
    /// Stopped early by a failure or a cancellation.
    Aborted,
}

impl RelayState {
    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ResolvingConversation => "resolving_conversation",
            Self::Streaming => "streaming",
            Self::Persisting => "persisting",
            Self::Done => "done",
            Self::Aborted => "aborted",
        }
    }

    /// Whether no transition leaves this state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }

    /// Whether `next` may follow `self`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::ResolvingConversation, Self::Streaming)
            | (Self::Streaming, Self::Persisting)
            | (Self::Persisting, Self::Done) => true,
            (from, Self::Aborted) => !from.is_terminal(),
            _ => false,
        }
    }

    /// Move to `next` if allowed; returns whether the move happened.
    pub fn advance(&mut self, next: Self) -> bool {
        let from = *self;
        if from.can_transition_to(next) {
            tracing::debug!(from = %from, to = %next, "relay state transition");
            *self = next;
            true
        } else {
            tracing::warn!(from = %from, to = %next, "rejected relay state transition");
            false
        }
    }
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
