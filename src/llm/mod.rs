//! Completion backend clients.
//!
//! - `client`: the client contract and the fragment hand-off queue
//! - `http_client`: network client for the chat backend
//! - `mock_client`: scripted client for development and tests
//! - `line_decoder`: newline-delimited record decoding

pub mod client;
pub mod errors;
pub mod http_client;
pub mod line_decoder;
pub mod mock_client;

pub use client::{
    CompletionClient, CompletionFuture, FRAGMENT_QUEUE_CAPACITY, FragmentSender, FragmentStream,
    UpstreamMessage, fragment_channel,
};
pub use errors::UpstreamError;
pub use http_client::HttpCompletionClient;
pub use line_decoder::{LineDecoder, MAX_LINE_BYTES, decode_record};
pub use mock_client::{DEFAULT_FRAGMENT_DELAY, MockCompletionClient};
