//! Speech bridge: turns streamed text into ordered speech and captures the
//! user's spoken replies, never both at the same time.

pub mod capture;
pub mod dispatch;
pub mod mode;
pub mod queue;

pub use capture::{CaptureError, Fragment, Recognizer, Severity, TranscriptBuffer, capture_utterance};
pub use dispatch::SpeechBuffer;
pub use mode::{Activity, ConversationMode, VoiceCoordinator, VoiceState};
pub use queue::{SpeechError, SpeechQueue, Synthesizer};
