//! Speech-to-text capture for continuous conversation mode.

use super::mode::{ConversationMode, VoiceCoordinator};
use crate::client::ConversationView;
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::{Instant, sleep_until};
use tracing::debug;

/// One transcript fragment from a recognizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub text: String,
    pub is_final: bool,
}

impl Fragment {
    pub fn interim(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }

    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Continuous mode is switched off and the user is told why.
    Fatal,
    /// Capture restarts silently after a short delay.
    Recoverable,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("permission denied")]
    PermissionDenied,
    #[error("service not allowed")]
    ServiceNotAllowed,
    #[error("unsupported configuration: {0}")]
    Unsupported(String),
    #[error("no speech detected")]
    NoSpeech,
    #[error("capture aborted")]
    Aborted,
    #[error("{0}")]
    Other(String),
}

impl CaptureError {
    pub fn severity(&self) -> Severity {
        match self {
            CaptureError::PermissionDenied
            | CaptureError::ServiceNotAllowed
            | CaptureError::Unsupported(_) => Severity::Fatal,
            CaptureError::NoSpeech | CaptureError::Aborted | CaptureError::Other(_) => {
                Severity::Recoverable
            }
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            CaptureError::PermissionDenied => {
                "Microphone access denied. Please check your permissions.".to_string()
            }
            other => format!("Speech recognition error: {other}"),
        }
    }
}

/// A speech-to-text engine.
#[async_trait]
pub trait Recognizer: Send {
    async fn start(&mut self) -> Result<(), CaptureError>;

    /// Waits for the next fragment. Must be cancel safe.
    async fn next_fragment(&mut self) -> Result<Fragment, CaptureError>;

    async fn stop(&mut self);
}

/// Final and interim transcript text for the utterance being captured.
#[derive(Debug, Default)]
pub struct TranscriptBuffer {
    final_text: String,
    interim: String,
    last_fragment_at: Option<Instant>,
}

impl TranscriptBuffer {
    pub fn push(&mut self, fragment: Fragment, now: Instant) {
        self.last_fragment_at = Some(now);
        if fragment.is_final {
            let text = fragment.text.trim();
            if !text.is_empty() {
                if !self.final_text.is_empty() {
                    self.final_text.push(' ');
                }
                self.final_text.push_str(text);
            }
            self.interim.clear();
        } else {
            self.interim = fragment.text;
        }
    }

    /// What the user should currently see as "being heard".
    pub fn visible(&self) -> String {
        match (self.final_text.is_empty(), self.interim.trim().is_empty()) {
            (_, true) => self.final_text.clone(),
            (true, false) => self.interim.trim().to_string(),
            (false, false) => format!("{} {}", self.final_text, self.interim.trim()),
        }
    }

    /// When the utterance should be sent, if any final text has been heard.
    pub fn silence_deadline(&self, silence: Duration) -> Option<Instant> {
        if self.final_text.is_empty() {
            return None;
        }
        self.last_fragment_at.map(|at| at + silence)
    }

    /// Takes the accumulated final transcript, clearing the buffer.
    pub fn take_utterance(&mut self) -> Option<String> {
        self.interim.clear();
        self.last_fragment_at = None;
        let text = std::mem::take(&mut self.final_text);
        (!text.is_empty()).then_some(text)
    }
}

/// Runs one capture session until `silence` passes with no new fragments
/// after some final text was heard.
///
/// Every fragment updates the live transcript on `view`, which is cleared
/// again when capture ends. Returns `Ok(None)` if the mode leaves continuous
/// before anything was captured. The recognizer is always stopped before
/// returning.
pub async fn capture_utterance(
    recognizer: &mut dyn Recognizer,
    voice: &VoiceCoordinator,
    view: &mut dyn ConversationView,
    silence: Duration,
) -> Result<Option<String>, CaptureError> {
    recognizer.start().await?;
    debug!("Capture started");

    let mut transcript = TranscriptBuffer::default();
    let mut state = voice.subscribe();
    let result = loop {
        let deadline = transcript.silence_deadline(silence);
        let wake = deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));
        tokio::select! {
            fragment = recognizer.next_fragment() => match fragment {
                Ok(fragment) => {
                    transcript.push(fragment, Instant::now());
                    view.show_transcript(&transcript.visible());
                }
                Err(e) => break Err(e),
            },
            _ = sleep_until(wake), if deadline.is_some() => {
                break Ok(transcript.take_utterance());
            }
            changed = state.changed() => {
                if changed.is_err() || state.borrow_and_update().mode != ConversationMode::Continuous {
                    break Ok(None);
                }
            }
        }
    };

    recognizer.stop().await;
    view.show_transcript("");
    debug!(captured = matches!(result, Ok(Some(_))), "Capture stopped");
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Transcript;
    use std::collections::VecDeque;

    /// Keeps every live transcript update in order.
    #[derive(Default)]
    struct HeardLog(Vec<String>);

    impl ConversationView for HeardLog {
        fn push_user_message(&mut self, _text: &str) {}
        fn open_assistant_message(&mut self) {}
        fn update_assistant_message(&mut self, _text: &str) {}
        fn push_assistant_message(&mut self, _text: &str) {}
        fn show_transcript(&mut self, text: &str) {
            self.0.push(text.to_string());
        }
    }

    /// Replays scripted fragments at given offsets from capture start.
    struct Scripted {
        script: VecDeque<(Duration, Result<Fragment, CaptureError>)>,
        started_at: Option<Instant>,
        stopped: bool,
    }

    impl Scripted {
        fn new(script: Vec<(u64, Result<Fragment, CaptureError>)>) -> Self {
            Self {
                script: script
                    .into_iter()
                    .map(|(ms, f)| (Duration::from_millis(ms), f))
                    .collect(),
                started_at: None,
                stopped: false,
            }
        }
    }

    #[async_trait]
    impl Recognizer for Scripted {
        async fn start(&mut self) -> Result<(), CaptureError> {
            self.started_at = Some(Instant::now());
            self.stopped = false;
            Ok(())
        }

        async fn next_fragment(&mut self) -> Result<Fragment, CaptureError> {
            let Some((offset, _)) = self.script.front() else {
                return std::future::pending().await;
            };
            let start = self.started_at.unwrap_or_else(Instant::now);
            sleep_until(start + *offset).await;
            self.script.pop_front().map(|(_, f)| f).unwrap_or(Err(CaptureError::Aborted))
        }

        async fn stop(&mut self) {
            self.stopped = true;
        }
    }

    #[test]
    fn test_severity_classes() {
        assert_eq!(CaptureError::PermissionDenied.severity(), Severity::Fatal);
        assert_eq!(CaptureError::ServiceNotAllowed.severity(), Severity::Fatal);
        assert_eq!(CaptureError::Unsupported("en-XX".into()).severity(), Severity::Fatal);
        assert_eq!(CaptureError::NoSpeech.severity(), Severity::Recoverable);
        assert_eq!(CaptureError::Aborted.severity(), Severity::Recoverable);
        assert!(CaptureError::PermissionDenied.user_message().contains("Microphone"));
    }

    #[test]
    fn test_transcript_keeps_finals_and_latest_interim() {
        let now = Instant::now();
        let mut transcript = TranscriptBuffer::default();
        transcript.push(Fragment::interim("I go"), now);
        assert_eq!(transcript.visible(), "I go");
        assert!(transcript.silence_deadline(Duration::from_secs(2)).is_none());

        transcript.push(Fragment::final_text("I go to park"), now);
        transcript.push(Fragment::interim("yester"), now);
        assert_eq!(transcript.visible(), "I go to park yester");
        transcript.push(Fragment::final_text("yesterday"), now);
        assert_eq!(
            transcript.take_utterance(),
            Some("I go to park yesterday".to_string())
        );
        assert_eq!(transcript.take_utterance(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_sends_accumulated_transcript() {
        let voice = VoiceCoordinator::new(ConversationMode::Continuous);
        let mut recognizer = Scripted::new(vec![
            (100, Ok(Fragment::interim("Yesterday I"))),
            (400, Ok(Fragment::final_text("Yesterday I go to park"))),
            (1500, Ok(Fragment::final_text("with my dog"))),
        ]);
        let started = Instant::now();
        let mut view = Transcript::default();

        let utterance =
            capture_utterance(&mut recognizer, &voice, &mut view, Duration::from_millis(2000))
                .await
                .unwrap();
        assert_eq!(utterance.as_deref(), Some("Yesterday I go to park with my dog"));
        assert!(Instant::now() - started >= Duration::from_millis(3500));
        assert!(recognizer.stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recognizer_error_is_returned_and_capture_stopped() {
        let voice = VoiceCoordinator::new(ConversationMode::Continuous);
        let mut recognizer = Scripted::new(vec![(50, Err(CaptureError::PermissionDenied))]);
        let mut view = Transcript::default();
        let err = capture_utterance(&mut recognizer, &voice, &mut view, Duration::from_millis(2000))
            .await
            .unwrap_err();
        assert_eq!(err, CaptureError::PermissionDenied);
        assert!(recognizer.stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leaving_continuous_mode_ends_capture() {
        let voice = VoiceCoordinator::new(ConversationMode::Continuous);
        let mut recognizer = Scripted::new(vec![]);
        let switcher = voice.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            switcher.set_mode(ConversationMode::Typed);
        });
        let mut view = Transcript::default();
        let captured =
            capture_utterance(&mut recognizer, &voice, &mut view, Duration::from_millis(2000))
                .await
                .unwrap();
        assert!(captured.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interim_and_final_text_is_shown_while_capturing() {
        let voice = VoiceCoordinator::new(ConversationMode::Continuous);
        let mut recognizer = Scripted::new(vec![
            (100, Ok(Fragment::interim("Yesterday I"))),
            (400, Ok(Fragment::final_text("Yesterday I go to park"))),
            (700, Ok(Fragment::interim("with"))),
            (900, Ok(Fragment::final_text("with my dog"))),
        ]);
        let mut view = HeardLog::default();

        let utterance =
            capture_utterance(&mut recognizer, &voice, &mut view, Duration::from_millis(2000))
                .await
                .unwrap();
        assert_eq!(utterance.as_deref(), Some("Yesterday I go to park with my dog"));
        assert_eq!(
            view.0,
            vec![
                "Yesterday I",
                "Yesterday I go to park",
                "Yesterday I go to park with",
                "Yesterday I go to park with my dog",
                "",
            ]
        );
    }
}
