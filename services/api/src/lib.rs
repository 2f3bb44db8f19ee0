//! Spokify API Library Crate
//!
//! This library contains the web service side of the relay: configuration,
//! PostgreSQL stores, HTTP handlers, the SSE relay and routing. The `api`
//! binary is a thin wrapper around this library.

pub mod config;
pub mod db;
pub mod handlers;
pub mod models;
pub mod router;
pub mod sse;
pub mod state;
