//! Turn runner: consumes one event connection and resolves once the assistant
//! turn has been fully delivered, both as text and, when a speech queue is
//! attached, as speech.

use super::{
    CONNECTION_ERROR_MESSAGE, ClientError, ConversationView, EventConnection, TIMEOUT_MESSAGE,
};
use crate::protocol::StreamEvent;
use crate::speech::{SpeechBuffer, SpeechQueue, VoiceState};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior, interval, sleep_until};
use tracing::{debug, info, warn};

const PROGRESS_LOG_EVERY: usize = 50;
const SPEECH_MAX_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnTimings {
    /// Safety-net cadence for re-checking completion and stale speech text.
    pub check_interval: Duration,
    /// Buffered speech text is flushed after this long without a flush.
    pub idle_flush: Duration,
    /// Absolute ceiling on one turn.
    pub turn_ceiling: Duration,
}

impl Default for TurnTimings {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_millis(300),
            idle_flush: Duration::from_millis(800),
            turn_ceiling: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Terminal signal received and all speech played.
    Completed { text: String },
    /// The relay reported an error after some content was rendered.
    Errored { message: String },
    /// The turn ceiling elapsed; `text` is whatever had arrived.
    TimedOut { text: String },
}

impl TurnOutcome {
    pub fn text(&self) -> &str {
        match self {
            TurnOutcome::Completed { text } | TurnOutcome::TimedOut { text } => text,
            TurnOutcome::Errored { message } => message,
        }
    }
}

/// Client-side state for one assistant turn.
#[derive(Debug)]
pub struct ClientStreamState {
    assistant_text: String,
    speech_buffer: SpeechBuffer,
    complete_received: bool,
    tokens_received: usize,
    expected_tokens: usize,
    slot_open: bool,
}

impl ClientStreamState {
    pub fn new(now: Instant, idle_flush: Duration) -> Self {
        Self {
            assistant_text: String::new(),
            speech_buffer: SpeechBuffer::with_limits(now, SPEECH_MAX_CHARS, idle_flush),
            complete_received: false,
            tokens_received: 0,
            expected_tokens: 0,
            slot_open: false,
        }
    }

    pub fn assistant_text(&self) -> &str {
        &self.assistant_text
    }

    pub fn is_complete_response_received(&self) -> bool {
        self.complete_received
    }

    pub fn has_content(&self) -> bool {
        self.slot_open
    }

    pub fn tokens_received(&self) -> usize {
        self.tokens_received
    }

    /// Applies a content-bearing event: renders it, feeds speech, and latches
    /// completion if the token count corroborates a missing terminal event.
    pub fn on_content(
        &mut self,
        event: &StreamEvent,
        view: &mut dyn ConversationView,
        speech: Option<&SpeechQueue>,
        now: Instant,
    ) {
        if event.tokens.is_empty() {
            return;
        }
        if !self.slot_open {
            view.open_assistant_message();
            self.slot_open = true;
        }

        let increment = event.text();
        self.assistant_text.push_str(&increment);
        view.update_assistant_message(&self.assistant_text);
        if let Some(queue) = speech {
            for unit in self.speech_buffer.push(&increment, now) {
                queue.enqueue(unit);
            }
        }

        let before = self.tokens_received;
        self.tokens_received += event.tokens.len();
        if let Some(total) = event.total_tokens {
            self.expected_tokens = self.expected_tokens.max(total);
        }
        if self.tokens_received / PROGRESS_LOG_EVERY > before / PROGRESS_LOG_EVERY {
            info!(
                received = self.tokens_received,
                expected = self.expected_tokens,
                "Streaming progress"
            );
        }

        if !event.partial && self.expected_tokens > 0 && self.tokens_received >= self.expected_tokens
        {
            debug!(
                received = self.tokens_received,
                "Received the hinted token total, treating as terminal"
            );
            self.latch(speech, now);
        }
    }

    /// Latches the terminal signal and force-flushes buffered speech text.
    pub fn latch(&mut self, speech: Option<&SpeechQueue>, now: Instant) {
        if self.complete_received {
            return;
        }
        self.complete_received = true;
        if let Some(queue) = speech {
            queue.latch_terminal();
            if let Some(unit) = self.speech_buffer.force_flush(now) {
                queue.enqueue(unit);
            }
        }
    }

    fn flush_stale_speech(&mut self, speech: Option<&SpeechQueue>, now: Instant) {
        if let Some(queue) = speech {
            if let Some(unit) = self.speech_buffer.flush_if_stale(now) {
                queue.enqueue(unit);
            }
        }
    }
}

/// Drives one turn to its outcome.
///
/// Resolves once the terminal signal is latched and the attached speech queue
/// (if any) is idle, or unconditionally when the ceiling elapses. An error
/// event before any content, or a transport failure before the terminal
/// signal, rejects. The connection is always closed on return.
pub async fn run_turn(
    connection: &mut EventConnection,
    view: &mut dyn ConversationView,
    speech: Option<&SpeechQueue>,
    timings: TurnTimings,
) -> Result<TurnOutcome, ClientError> {
    let started = Instant::now();
    let deadline = started + timings.turn_ceiling;
    let mut state = ClientStreamState::new(started, timings.idle_flush);
    if let Some(queue) = speech {
        queue.reset_turn();
    }

    let mut voice = speech.map(SpeechQueue::subscribe);
    let mut check = interval(timings.check_interval);
    check.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut stream_done = false;

    loop {
        if let Some(notice) = speech.and_then(SpeechQueue::take_notice) {
            view.push_assistant_message(&notice);
        }
        if state.is_complete_response_received() && speech.map_or(true, SpeechQueue::is_idle) {
            connection.close();
            info!(tokens = state.tokens_received, "Turn complete");
            return Ok(TurnOutcome::Completed {
                text: state.assistant_text,
            });
        }

        tokio::select! {
            event = connection.next_event(), if !stream_done => match event {
                Some(Ok(event)) if event.is_error() => {
                    let message = event.text();
                    warn!(%message, "Relay reported an error");
                    view.push_assistant_message(&message);
                    connection.close();
                    if !state.has_content() {
                        return Err(ClientError::Relay(message));
                    }
                    state.latch(speech, Instant::now());
                    return Ok(TurnOutcome::Errored { message });
                }
                Some(Ok(event)) if event.is_complete() => {
                    debug!(total = ?event.total_tokens, "Completion event received");
                    state.latch(speech, Instant::now());
                    stream_done = true;
                    connection.close();
                }
                Some(Ok(event)) => state.on_content(&event, view, speech, Instant::now()),
                Some(Err(e)) if state.is_complete_response_received() => {
                    debug!(error = %e, "Ignoring transport error after completion");
                    stream_done = true;
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Event stream failed");
                    view.push_assistant_message(CONNECTION_ERROR_MESSAGE);
                    connection.close();
                    return Err(e);
                }
                None => {
                    stream_done = true;
                    if !state.is_complete_response_received() {
                        warn!("Event stream ended without a terminal event");
                        view.push_assistant_message(CONNECTION_ERROR_MESSAGE);
                        return Err(ClientError::StreamClosed);
                    }
                }
            },
            _ = check.tick() => state.flush_stale_speech(speech, Instant::now()),
            _ = voice_changed(&mut voice) => {}
            _ = sleep_until(deadline) => {
                connection.close();
                warn!(ceiling = ?timings.turn_ceiling, "Turn ceiling reached, resolving");
                if let Some(queue) = speech {
                    if let Some(unit) = state.speech_buffer.force_flush(Instant::now()) {
                        queue.enqueue(unit);
                    }
                }
                if state.assistant_text.is_empty() {
                    view.push_assistant_message(TIMEOUT_MESSAGE);
                }
                return Ok(TurnOutcome::TimedOut {
                    text: state.assistant_text,
                });
            }
        }
    }
}

async fn voice_changed(voice: &mut Option<watch::Receiver<VoiceState>>) {
    let Some(rx) = voice else {
        return std::future::pending().await;
    };
    if rx.changed().await.is_err() {
        std::future::pending::<()>().await;
    }
}
