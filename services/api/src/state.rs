//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the stores and
//! configuration shared by every handler and relay session.

use crate::config::Config;
use spokify_core::store::{PromptStore, ResponseStore};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub prompts: Arc<dyn PromptStore>,
    pub responses: Arc<dyn ResponseStore>,
    pub config: Arc<Config>,
}
