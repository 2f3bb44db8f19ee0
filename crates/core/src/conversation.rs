//! Conversation driver
//!
//! The single owner of conversation-mode state. Typed turns go straight to
//! the Stream Client; continuous mode loops capture → submit → stream → speak
//! until the mode is switched off or capture fails fatally.

use crate::client::{
    CONNECTION_ERROR_MESSAGE, ClientError, ConversationView, EventConnection, StreamClient,
    TurnOutcome, TurnTimings, run_turn,
};
use crate::speech::{
    CaptureError, ConversationMode, Recognizer, Severity, SpeechQueue, Synthesizer,
    VoiceCoordinator, capture_utterance,
};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Where turns are submitted and streamed from.
#[async_trait]
pub trait TurnBackend: Send + Sync {
    async fn submit_prompt(&self, message: &str) -> Result<Uuid, ClientError>;
    async fn open_stream(&self, prompt_id: Uuid) -> Result<EventConnection, ClientError>;
}

#[async_trait]
impl TurnBackend for StreamClient {
    async fn submit_prompt(&self, message: &str) -> Result<Uuid, ClientError> {
        StreamClient::submit_prompt(self, message).await
    }

    async fn open_stream(&self, prompt_id: Uuid) -> Result<EventConnection, ClientError> {
        StreamClient::open_stream(self, prompt_id).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversationTimings {
    pub turn: TurnTimings,
    /// Silence after the last fragment that ends an utterance.
    pub silence: Duration,
    /// Pause before capture restarts after a recoverable error.
    pub restart_delay: Duration,
}

impl Default for ConversationTimings {
    fn default() -> Self {
        Self {
            turn: TurnTimings::default(),
            silence: Duration::from_millis(2000),
            restart_delay: Duration::from_millis(500),
        }
    }
}

pub struct Conversation<B> {
    backend: B,
    voice: VoiceCoordinator,
    speech: Option<SpeechQueue>,
    timings: ConversationTimings,
}

impl<B: TurnBackend> Conversation<B> {
    pub fn new(backend: B, mode: ConversationMode) -> Self {
        Self {
            backend,
            voice: VoiceCoordinator::new(mode),
            speech: None,
            timings: ConversationTimings::default(),
        }
    }

    /// Attaches speech output. Must be called inside a Tokio runtime.
    pub fn with_synthesizer<S: Synthesizer>(mut self, synthesizer: S) -> Self {
        self.speech = Some(SpeechQueue::new(synthesizer, self.voice.clone()));
        self
    }

    pub fn with_timings(mut self, timings: ConversationTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn voice(&self) -> &VoiceCoordinator {
        &self.voice
    }

    pub fn mode(&self) -> ConversationMode {
        self.voice.mode()
    }

    /// Switching to typed mode also silences speech: queued units are dropped
    /// and the playing one is cancelled by the queue worker.
    pub fn set_mode(&self, mode: ConversationMode) {
        self.voice.set_mode(mode);
        if mode == ConversationMode::Typed {
            if let Some(queue) = &self.speech {
                queue.clear();
            }
        }
    }

    /// Runs one turn for `text`. Speech is produced only in continuous mode.
    pub async fn send(
        &self,
        text: &str,
        view: &mut dyn ConversationView,
    ) -> Result<TurnOutcome, ClientError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ClientError::Validation);
        }
        view.push_user_message(text);

        let prompt_id = match self.backend.submit_prompt(text).await {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "Prompt submission failed");
                view.push_assistant_message(&e.to_string());
                return Err(e);
            }
        };
        let mut connection = match self.backend.open_stream(prompt_id).await {
            Ok(connection) => connection,
            Err(e) => {
                warn!(error = %e, %prompt_id, "Could not open event stream");
                view.push_assistant_message(CONNECTION_ERROR_MESSAGE);
                return Err(e);
            }
        };

        let speech = self
            .speech
            .as_ref()
            .filter(|_| self.voice.mode() == ConversationMode::Continuous);
        run_turn(&mut connection, view, speech, self.timings.turn).await
    }

    /// Alternates capture and spoken turns until the mode leaves continuous
    /// (`Ok`) or capture fails fatally, which also switches to typed mode.
    pub async fn run_continuous(
        &self,
        recognizer: &mut dyn Recognizer,
        view: &mut dyn ConversationView,
    ) -> Result<(), CaptureError> {
        info!("Continuous conversation started");
        loop {
            if !self.voice.wait_until_can_capture().await {
                info!("Continuous conversation stopped");
                return Ok(());
            }
            if !self.voice.try_begin_capture() {
                continue;
            }
            let captured =
                capture_utterance(recognizer, &self.voice, view, self.timings.silence).await;
            self.voice.end_capture();

            match captured {
                Ok(Some(utterance)) => {
                    if let Err(e) = self.send(&utterance, view).await {
                        warn!(error = %e, "Voice turn failed");
                    }
                }
                Ok(None) => {}
                Err(e) if e.severity() == Severity::Fatal => {
                    error!(error = %e, "Speech capture failed, leaving continuous mode");
                    self.set_mode(ConversationMode::Typed);
                    view.push_assistant_message(&e.user_message());
                    return Err(e);
                }
                Err(e) => {
                    debug!(error = %e, "Recoverable capture error, restarting");
                    tokio::time::sleep(self.timings.restart_delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Role, Transcript};
    use crate::protocol::StreamEvent;
    use crate::speech::{Fragment, SpeechError};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;

    type Script = Vec<Result<StreamEvent, ClientError>>;

    #[derive(Default)]
    struct FakeBackend {
        prompts: Mutex<Vec<String>>,
        turns: Mutex<VecDeque<Script>>,
        unavailable: bool,
    }

    impl FakeBackend {
        fn with_turns(turns: Vec<Script>) -> Self {
            Self {
                turns: Mutex::new(turns.into()),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl TurnBackend for Arc<FakeBackend> {
        async fn submit_prompt(&self, message: &str) -> Result<Uuid, ClientError> {
            if self.unavailable {
                return Err(ClientError::ServiceUnavailable);
            }
            self.prompts.lock().unwrap().push(message.to_string());
            Ok(Uuid::new_v4())
        }

        async fn open_stream(&self, _prompt_id: Uuid) -> Result<EventConnection, ClientError> {
            let script = self.turns.lock().unwrap().pop_front().unwrap_or_default();
            let (tx, rx) = mpsc::channel(script.len().max(1));
            for event in script {
                tx.send(event).await.unwrap();
            }
            Ok(EventConnection::from_receiver(rx))
        }
    }

    fn reply(text: &str) -> Script {
        vec![
            Ok(StreamEvent::batch(vec![text.to_string()], false, 1)),
            Ok(StreamEvent::completed(1)),
        ]
    }

    struct Speaker(Arc<Mutex<Vec<String>>>);

    #[async_trait]
    impl Synthesizer for Speaker {
        async fn speak(&mut self, text: &str) -> Result<(), SpeechError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            self.0.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    /// Emits scripted results, each after a delay measured from the call.
    struct ScriptedRecognizer {
        script: VecDeque<(u64, Result<Fragment, CaptureError>)>,
        starts: usize,
    }

    #[async_trait]
    impl Recognizer for ScriptedRecognizer {
        async fn start(&mut self) -> Result<(), CaptureError> {
            self.starts += 1;
            Ok(())
        }

        async fn next_fragment(&mut self) -> Result<Fragment, CaptureError> {
            let Some((delay, _)) = self.script.front() else {
                return std::future::pending().await;
            };
            tokio::time::sleep(Duration::from_millis(*delay)).await;
            self.script
                .pop_front()
                .map(|(_, result)| result)
                .unwrap_or(Err(CaptureError::Aborted))
        }

        async fn stop(&mut self) {}
    }

    #[tokio::test(start_paused = true)]
    async fn test_typed_turn_renders_without_speaking() {
        let backend = Arc::new(FakeBackend::with_turns(vec![reply("Nice work.")]));
        let spoken = Arc::new(Mutex::new(Vec::new()));
        let conversation = Conversation::new(backend.clone(), ConversationMode::Typed)
            .with_synthesizer(Speaker(spoken.clone()));

        let mut view = Transcript::default();
        let outcome = conversation.send("  I go park  ", &mut view).await.unwrap();
        assert_eq!(outcome.text(), "Nice work.");
        assert_eq!(*backend.prompts.lock().unwrap(), vec!["I go park"]);
        assert_eq!(view.messages()[0].role, Role::User);
        assert_eq!(view.messages()[0].text, "I go park");
        assert_eq!(view.messages()[1].text, "Nice work.");
        assert!(spoken.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blank_message_is_not_submitted() {
        let backend = Arc::new(FakeBackend::default());
        let conversation = Conversation::new(backend.clone(), ConversationMode::Typed);
        let mut view = Transcript::default();
        let err = conversation.send("   ", &mut view).await.unwrap_err();
        assert!(matches!(err, ClientError::Validation));
        assert!(backend.prompts.lock().unwrap().is_empty());
        assert!(view.messages().is_empty());
    }

    #[tokio::test]
    async fn test_submission_failure_is_shown() {
        let backend = Arc::new(FakeBackend {
            unavailable: true,
            ..FakeBackend::default()
        });
        let conversation = Conversation::new(backend, ConversationMode::Typed);
        let mut view = Transcript::default();
        let err = conversation.send("hello", &mut view).await.unwrap_err();
        assert!(matches!(err, ClientError::ServiceUnavailable));
        assert_eq!(
            view.last().map(|m| m.text.as_str()),
            Some("AI service unavailable")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_continuous_loop_speaks_then_stops_on_fatal_capture_error() {
        let backend = Arc::new(FakeBackend::with_turns(vec![reply("Say 'I went'.")]));
        let spoken = Arc::new(Mutex::new(Vec::new()));
        let conversation = Conversation::new(backend.clone(), ConversationMode::Continuous)
            .with_synthesizer(Speaker(spoken.clone()));
        let mut recognizer = ScriptedRecognizer {
            script: VecDeque::from(vec![
                (50, Err(CaptureError::NoSpeech)),
                (100, Ok(Fragment::interim("I go"))),
                (100, Ok(Fragment::final_text("I go park"))),
                (2500, Err(CaptureError::PermissionDenied)),
            ]),
            starts: 0,
        };

        let mut view = Transcript::default();
        let err = conversation
            .run_continuous(&mut recognizer, &mut view)
            .await
            .unwrap_err();

        assert_eq!(err, CaptureError::PermissionDenied);
        assert_eq!(recognizer.starts, 3);
        assert_eq!(*backend.prompts.lock().unwrap(), vec!["I go park"]);
        assert_eq!(*spoken.lock().unwrap(), vec!["Say 'I went'."]);
        assert_eq!(conversation.mode(), ConversationMode::Typed);
        assert_eq!(view.heard(), "");
        assert_eq!(
            view.last().map(|m| m.text.as_str()),
            Some("Microphone access denied. Please check your permissions.")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_switching_to_typed_ends_continuous_loop() {
        let backend = Arc::new(FakeBackend::default());
        let conversation = Conversation::new(backend, ConversationMode::Continuous);
        let voice = conversation.voice().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            voice.set_mode(ConversationMode::Typed);
        });

        let mut recognizer = ScriptedRecognizer {
            script: VecDeque::new(),
            starts: 0,
        };
        let mut view = Transcript::default();
        conversation
            .run_continuous(&mut recognizer, &mut view)
            .await
            .unwrap();
        assert_eq!(recognizer.starts, 1);
        assert!(view.messages().is_empty());
    }
}
