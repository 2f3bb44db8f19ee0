//! Defines the event payload the relay pushes to the client over the event
//! stream, and the vocabulary of terminal relay errors.

use serde::{Deserialize, Serialize};

/// One event on the relay → client stream.
///
/// Three shapes travel over the wire:
/// - token batch: `tokens` non-empty, `partial == !record.complete`, `totalTokens` set
/// - completion: `tokens: []`, `partial: false`, `complete: true`, `totalTokens` set
/// - error: one human-readable token, `partial: false`, `error: true`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEvent {
    #[serde(default)]
    pub tokens: Vec<String>,
    #[serde(default)]
    pub partial: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complete: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<bool>,
}

impl StreamEvent {
    /// A batch of newly available tokens.
    pub fn batch(tokens: Vec<String>, record_complete: bool, total_tokens: usize) -> Self {
        Self {
            tokens,
            partial: !record_complete,
            total_tokens: Some(total_tokens),
            complete: None,
            error: None,
        }
    }

    /// The terminal success event.
    pub fn completed(total_tokens: usize) -> Self {
        Self {
            tokens: Vec::new(),
            partial: false,
            total_tokens: Some(total_tokens),
            complete: Some(true),
            error: None,
        }
    }

    /// The terminal error event carrying a single readable message.
    pub fn failure(error: &RelayError) -> Self {
        Self {
            tokens: vec![format!("Error: {error}.")],
            partial: false,
            total_tokens: None,
            complete: None,
            error: Some(true),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.unwrap_or(false)
    }

    pub fn is_complete(&self) -> bool {
        self.complete.unwrap_or(false)
    }

    /// Completion and error events both end the stream.
    pub fn is_terminal(&self) -> bool {
        self.is_error() || self.is_complete()
    }

    /// Concatenated token text.
    pub fn text(&self) -> String {
        self.tokens.concat()
    }
}

/// Reasons a relay session ends without completing.
///
/// The `Display` text is what the client renders, so each variant keeps a
/// distinct message to tell the timeout clocks apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("Prompt not found after multiple attempts")]
    PromptNotFound,
    #[error("No response generated within time limit")]
    NoResponseLinked,
    #[error("Invalid response ID format")]
    MalformedReference,
    #[error("Response not found after waiting")]
    ResponseNotFound,
    #[error("Stream timed out due to inactivity")]
    Inactivity,
    #[error("Stream encountered a server error")]
    Server,
    #[error("Failed to set up stream")]
    Setup,
}
