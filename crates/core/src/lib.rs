//! Core of the streaming relay: prompt/response records and their stores, the
//! relay session state machine, the Stream Client and the Speech Bridge.

pub mod client;
pub mod conversation;
pub mod protocol;
pub mod records;
pub mod relay;
pub mod speech;
pub mod store;

pub use protocol::{RelayError, StreamEvent};
pub use records::{PromptRecord, ResponseRecord};
pub use relay::{Phase, RelayTimings, StreamSession};
