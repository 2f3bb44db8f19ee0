//! Server-Sent Event Relay
//!
//! One spawned relay task per `GET /ai/stream/{prompt_id}` connection. The
//! task owns its `StreamSession`, polls the stores on the configured cadence
//! and writes each event into the response body channel.

pub mod session;

pub use session::{run_relay, stream_handler};
