//! Streaming chat-completion relay.
//!
//! A relay run resolves the conversation a request refers to, forwards the
//! messages to the completion backend, relays each fragment to the caller as
//! it arrives and writes the resulting transcript exactly once.
//!
//! - `request`: inbound request shape and validation
//! - `identity`: owner identity handed in by the authentication layer
//! - `events`: outbound `message` / `complete` / `error` events
//! - `state`: run lifecycle
//! - `orchestrator`: the run itself, streaming and unary
//! - `errors`: relay error taxonomy

pub mod errors;
pub mod events;
pub mod identity;
pub mod orchestrator;
pub mod request;
pub mod state;

pub use errors::{RelayError, UPSTREAM_FAILURE_MESSAGE};
pub use events::{CompleteEvent, ErrorEvent, MessageEvent, RelayEvent};
pub use identity::OwnerIdentity;
pub use orchestrator::{
    Completion, EVENT_QUEUE_CAPACITY, RelayEventStream, RelayHandle, RelayOrchestrator,
    RelayOutcome, UnaryReply,
};
pub use request::{InboundMessage, RelayRequest, ValidatedRequest};
pub use state::RelayState;
