//! Voice activity state machine.
//!
//! A single `VoiceCoordinator` owns whether the client is capturing speech,
//! speaking, or idle, together with the conversation-mode flag and the count
//! of queued speech units. Because activity is one enum, capturing and
//! speaking can never both be true; every transition is a guarded
//! compare-and-set on the shared value.

use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Idle,
    Capturing,
    Speaking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationMode {
    /// Text in, text out. Nothing is spoken or captured.
    Typed,
    /// Capture and speech output alternate automatically.
    Continuous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceState {
    pub activity: Activity,
    pub mode: ConversationMode,
    pub pending_speech: usize,
}

impl VoiceState {
    /// Nothing queued and nothing playing.
    pub fn speech_idle(&self) -> bool {
        self.pending_speech == 0 && self.activity != Activity::Speaking
    }

    pub fn can_capture(&self) -> bool {
        self.mode == ConversationMode::Continuous
            && self.activity == Activity::Idle
            && self.pending_speech == 0
    }
}

#[derive(Clone)]
pub struct VoiceCoordinator {
    state: Arc<watch::Sender<VoiceState>>,
}

impl VoiceCoordinator {
    pub fn new(mode: ConversationMode) -> Self {
        let (state, _) = watch::channel(VoiceState {
            activity: Activity::Idle,
            mode,
            pending_speech: 0,
        });
        Self {
            state: Arc::new(state),
        }
    }

    pub fn state(&self) -> VoiceState {
        *self.state.borrow()
    }

    pub fn mode(&self) -> ConversationMode {
        self.state.borrow().mode
    }

    pub fn subscribe(&self) -> watch::Receiver<VoiceState> {
        self.state.subscribe()
    }

    pub fn set_mode(&self, mode: ConversationMode) {
        self.state.send_if_modified(|s| {
            let changed = s.mode != mode;
            s.mode = mode;
            changed
        });
        tracing::info!(?mode, "Conversation mode set");
    }

    /// Idle → Capturing, only in continuous mode with no speech outstanding.
    pub fn try_begin_capture(&self) -> bool {
        self.state.send_if_modified(|s| {
            if s.can_capture() {
                s.activity = Activity::Capturing;
                true
            } else {
                false
            }
        })
    }

    /// Capturing → Idle.
    pub fn end_capture(&self) {
        self.state.send_if_modified(|s| {
            if s.activity == Activity::Capturing {
                s.activity = Activity::Idle;
                true
            } else {
                false
            }
        });
    }

    /// Resolves once capture may start, or returns `false` as soon as the
    /// mode is no longer continuous.
    pub async fn wait_until_can_capture(&self) -> bool {
        let mut rx = self.state.subscribe();
        match rx
            .wait_for(|s| s.can_capture() || s.mode != ConversationMode::Continuous)
            .await
        {
            Ok(state) => state.mode == ConversationMode::Continuous,
            Err(_) => false,
        }
    }

    /// Resolves once nothing is queued or playing.
    pub async fn wait_speech_idle(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(VoiceState::speech_idle).await;
    }

    pub(crate) fn speech_enqueued(&self) {
        self.state.send_modify(|s| s.pending_speech += 1);
    }

    pub(crate) fn speech_dropped(&self, count: usize) {
        if count == 0 {
            return;
        }
        self.state
            .send_modify(|s| s.pending_speech = s.pending_speech.saturating_sub(count));
    }

    /// Moves one queued unit into playback: pending -1 and Idle → Speaking in
    /// a single transition, waiting out any capture in progress.
    pub(crate) async fn begin_unit(&self) {
        let mut rx = self.state.subscribe();
        loop {
            let started = self.state.send_if_modified(|s| {
                if s.activity == Activity::Capturing {
                    return false;
                }
                s.activity = Activity::Speaking;
                s.pending_speech = s.pending_speech.saturating_sub(1);
                true
            });
            if started {
                return;
            }
            if rx
                .wait_for(|s| s.activity != Activity::Capturing)
                .await
                .is_err()
            {
                return;
            }
        }
    }

    /// Speaking → Idle.
    pub(crate) fn end_unit(&self) {
        self.state.send_if_modified(|s| {
            if s.activity == Activity::Speaking {
                s.activity = Activity::Idle;
                true
            } else {
                false
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_capture_only_in_continuous_mode() {
        let voice = VoiceCoordinator::new(ConversationMode::Typed);
        assert!(!voice.try_begin_capture());
        voice.set_mode(ConversationMode::Continuous);
        assert!(voice.try_begin_capture());
        assert_eq!(voice.state().activity, Activity::Capturing);
        // Already capturing.
        assert!(!voice.try_begin_capture());
        voice.end_capture();
        assert_eq!(voice.state().activity, Activity::Idle);
    }

    #[test]
    fn test_capture_blocked_by_pending_speech() {
        let voice = VoiceCoordinator::new(ConversationMode::Continuous);
        voice.speech_enqueued();
        assert!(!voice.try_begin_capture());
        voice.speech_dropped(1);
        assert!(voice.try_begin_capture());
    }

    #[tokio::test]
    async fn test_speaking_waits_for_capture_to_end() {
        let voice = VoiceCoordinator::new(ConversationMode::Continuous);
        assert!(voice.try_begin_capture());
        voice.speech_enqueued();

        let speaker = voice.clone();
        let handle = tokio::spawn(async move { speaker.begin_unit().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(voice.state().activity, Activity::Capturing);

        voice.end_capture();
        handle.await.unwrap();
        let state = voice.state();
        assert_eq!(state.activity, Activity::Speaking);
        assert_eq!(state.pending_speech, 0);
        assert!(!state.speech_idle());

        voice.end_unit();
        assert!(voice.state().speech_idle());
        assert!(voice.state().can_capture());
    }

    #[tokio::test]
    async fn test_wait_until_can_capture_returns_false_when_mode_leaves() {
        let voice = VoiceCoordinator::new(ConversationMode::Continuous);
        voice.speech_enqueued();
        let waiter = voice.clone();
        let handle = tokio::spawn(async move { waiter.wait_until_can_capture().await });
        tokio::task::yield_now().await;
        voice.set_mode(ConversationMode::Typed);
        assert!(!handle.await.unwrap());
    }

    #[tokio::test]
    async fn test_wait_until_can_capture_after_speech_drains() {
        let voice = VoiceCoordinator::new(ConversationMode::Continuous);
        voice.speech_enqueued();
        let waiter = voice.clone();
        let handle = tokio::spawn(async move { waiter.wait_until_can_capture().await });
        voice.begin_unit().await;
        voice.end_unit();
        assert!(handle.await.unwrap());
    }
}
