//! Ordered, single-voice playback of speakable units.

use super::mode::{ConversationMode, VoiceCoordinator, VoiceState};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpeechError {
    #[error("speech was interrupted")]
    Interrupted,
    #[error("speech output is not allowed")]
    NotAllowed,
    #[error("speech failed: {0}")]
    Failed(String),
}

/// A text-to-speech engine. `speak` resolves when the unit has finished
/// playing; dropping the future must stop playback.
#[async_trait]
pub trait Synthesizer: Send + 'static {
    async fn speak(&mut self, text: &str) -> Result<(), SpeechError>;
}

struct Shared {
    units: Mutex<VecDeque<String>>,
    wake: Notify,
    terminal_latched: AtomicBool,
    notice: Mutex<Option<String>>,
}

impl Shared {
    fn units(&self) -> MutexGuard<'_, VecDeque<String>> {
        self.units.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_notice(&self, text: String) {
        *self.notice.lock().unwrap_or_else(|e| e.into_inner()) = Some(text);
    }
}

/// Drains queued units strictly in order through one `Synthesizer`, one unit
/// at a time. Playback state is published through the shared
/// [`VoiceCoordinator`].
pub struct SpeechQueue {
    shared: Arc<Shared>,
    voice: VoiceCoordinator,
    worker: JoinHandle<()>,
}

impl SpeechQueue {
    /// Spawns the playback worker on the current Tokio runtime.
    pub fn new<S: Synthesizer>(synthesizer: S, voice: VoiceCoordinator) -> Self {
        let shared = Arc::new(Shared {
            units: Mutex::new(VecDeque::new()),
            wake: Notify::new(),
            terminal_latched: AtomicBool::new(false),
            notice: Mutex::new(None),
        });
        let worker = tokio::spawn(run_worker(
            shared.clone(),
            voice.clone(),
            Box::new(synthesizer),
        ));
        Self {
            shared,
            voice,
            worker,
        }
    }

    pub fn enqueue(&self, unit: String) {
        if unit.trim().is_empty() {
            return;
        }
        debug!(unit = %unit, "Queueing speech");
        self.shared.units().push_back(unit);
        self.voice.speech_enqueued();
        self.shared.wake.notify_one();
    }

    /// Drops every unit that has not started playing.
    pub fn clear(&self) {
        let dropped = {
            let mut units = self.shared.units();
            let n = units.len();
            units.clear();
            n
        };
        self.voice.speech_dropped(dropped);
    }

    /// Starts a new turn: failures are fatal-free again until the next latch.
    pub fn reset_turn(&self) {
        self.shared.terminal_latched.store(false, Ordering::SeqCst);
    }

    /// Records that the current turn's terminal signal has arrived.
    pub fn latch_terminal(&self) {
        self.shared.terminal_latched.store(true, Ordering::SeqCst);
    }

    pub fn is_idle(&self) -> bool {
        self.voice.state().speech_idle()
    }

    pub fn subscribe(&self) -> watch::Receiver<VoiceState> {
        self.voice.subscribe()
    }

    /// A user-facing message left behind by a playback failure, if any.
    pub fn take_notice(&self) -> Option<String> {
        self.shared
            .notice
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }
}

impl Drop for SpeechQueue {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

async fn run_worker(
    shared: Arc<Shared>,
    voice: VoiceCoordinator,
    mut synthesizer: Box<dyn Synthesizer>,
) {
    loop {
        let next = shared.units().pop_front();
        let Some(unit) = next else {
            shared.wake.notified().await;
            continue;
        };

        voice.begin_unit().await;
        let result = tokio::select! {
            result = synthesizer.speak(&unit) => Some(result),
            _ = left_continuous(voice.subscribe()) => None,
        };
        voice.end_unit();

        let Some(result) = result else {
            debug!("Left continuous mode, speech cancelled");
            let dropped = std::mem::take(&mut *shared.units()).len();
            voice.speech_dropped(dropped);
            continue;
        };
        match result {
            Ok(()) => {}
            Err(SpeechError::Interrupted) if shared.terminal_latched.load(Ordering::SeqCst) => {
                debug!("Speech interrupted after completion, advancing");
            }
            Err(SpeechError::NotAllowed) => {
                error!("Speech output not allowed, dropping queued speech");
                let dropped = {
                    let mut units = shared.units();
                    let n = units.len();
                    units.clear();
                    n
                };
                voice.speech_dropped(dropped);
                shared.set_notice(
                    "Speech output was blocked. Please check your audio permissions.".to_string(),
                );
            }
            Err(e) => warn!(error = %e, "Speech unit failed, advancing"),
        }
    }
}

async fn left_continuous(mut state: watch::Receiver<VoiceState>) {
    let _ = state
        .wait_for(|s| s.mode != ConversationMode::Continuous)
        .await;
}
