//! Stream Client
//!
//! Submits prompts over HTTP, opens the relay's event stream for each one and
//! reassembles the token batches into a single conversational turn.

mod http;
mod sse;
mod turn;
mod view;

pub use http::{EventConnection, StreamClient};
pub use sse::SseDecoder;
pub use turn::{ClientStreamState, TurnOutcome, TurnTimings, run_turn};
pub use view::{ConversationView, Message, Role, Transcript};

/// Shown when the event connection fails before the turn completed.
pub const CONNECTION_ERROR_MESSAGE: &str = "Error connecting to AI service. Please try again.";
/// Shown when the turn ceiling elapses with nothing received.
pub const TIMEOUT_MESSAGE: &str = "Response timed out. Please try again.";

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Message is required")]
    Validation,
    #[error("Authentication required")]
    AuthenticationRequired,
    #[error("AI service unavailable")]
    ServiceUnavailable,
    #[error("Server error: {0}")]
    Server(String),
    #[error("No response from server. Please check your connection.")]
    NoResponse,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("event stream closed before the turn completed")]
    StreamClosed,
    /// The relay delivered an error event before any content.
    #[error("{0}")]
    Relay(String),
}
