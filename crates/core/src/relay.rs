//! Stream Relay State Machine
//!
//! A `StreamSession` turns a polled, asynchronously populated response record
//! into an ordered event stream. It owns all per-connection relay state; the
//! transport layer only calls [`StreamSession::tick`] on a fixed cadence and
//! forwards whatever event comes back.
//!
//! Guarantees upheld here:
//! - tokens are forwarded in record order, each exactly once;
//! - at most one event per tick;
//! - completion is only signalled on a tick that observes `complete` with
//!   every known token already forwarded;
//! - exactly one terminal event per session, after which the session is
//!   `Closed` and silent.

use crate::protocol::{RelayError, StreamEvent};
use crate::records::{PromptRecord, ResponseRecord};
use crate::store::{PromptStore, ResponseStore};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Polling cadence and the three independent timeout clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayTimings {
    pub poll_interval: Duration,
    /// Failed prompt lookups tolerated before giving up (20 × 500 ms ≈ 10 s).
    pub max_link_attempts: u32,
    /// How long the linked response may stay continuously absent.
    pub response_wait: Duration,
    /// Maximum silence since the last forwarded token.
    pub inactivity_timeout: Duration,
}

impl Default for RelayTimings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            max_link_attempts: 20,
            response_wait: Duration::from_secs(5),
            inactivity_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingPromptLink,
    AwaitingResponseRecord,
    Streaming,
    /// The record is complete and every token has been forwarded; the
    /// completion event goes out on the next tick.
    Draining,
    Closed,
}

/// Relay-side state for one open client connection.
#[derive(Debug)]
pub struct StreamSession {
    prompt_id: Uuid,
    response_id: Option<Uuid>,
    sent_token_count: usize,
    last_activity_at: Instant,
    phase: Phase,
    link_attempts: u32,
    response_absent_since: Option<Instant>,
    timings: RelayTimings,
}

impl StreamSession {
    pub fn new(prompt_id: Uuid, timings: RelayTimings, now: Instant) -> Self {
        Self {
            prompt_id,
            response_id: None,
            sent_token_count: 0,
            last_activity_at: now,
            phase: Phase::AwaitingPromptLink,
            link_attempts: 0,
            response_absent_since: None,
            timings,
        }
    }

    pub fn prompt_id(&self) -> Uuid {
        self.prompt_id
    }

    pub fn response_id(&self) -> Option<Uuid> {
        self.response_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn sent_token_count(&self) -> usize {
        self.sent_token_count
    }

    pub fn timings(&self) -> RelayTimings {
        self.timings
    }

    pub fn is_closed(&self) -> bool {
        self.phase == Phase::Closed
    }

    /// Runs one poll against the stores and returns the event to emit, if any.
    ///
    /// A store failure is fatal for the session: it yields the server-error
    /// terminal event instead of being retried.
    pub async fn tick(
        &mut self,
        prompts: &dyn PromptStore,
        responses: &dyn ResponseStore,
        now: Instant,
    ) -> Option<StreamEvent> {
        match self.phase {
            Phase::Closed => None,
            Phase::AwaitingPromptLink => match prompts.find_prompt(self.prompt_id).await {
                Ok(prompt) => self.observe_prompt(prompt.as_ref(), now),
                Err(e) => {
                    error!(error = %e, "Prompt lookup failed");
                    self.fail(RelayError::Server)
                }
            },
            Phase::AwaitingResponseRecord | Phase::Streaming | Phase::Draining => {
                let Some(response_id) = self.response_id else {
                    return self.fail(RelayError::Server);
                };
                match responses.find_response(response_id).await {
                    Ok(response) => self.observe_response(response.as_ref(), now),
                    Err(e) => {
                        error!(error = %e, %response_id, "Response lookup failed");
                        self.fail(RelayError::Server)
                    }
                }
            }
        }
    }

    /// Applies one prompt lookup result while waiting for the response link.
    pub fn observe_prompt(
        &mut self,
        prompt: Option<&PromptRecord>,
        now: Instant,
    ) -> Option<StreamEvent> {
        if self.phase != Phase::AwaitingPromptLink {
            return None;
        }
        let Some(prompt) = prompt else {
            return self.count_link_attempt(RelayError::PromptNotFound);
        };
        match prompt.response_ref() {
            None => self.count_link_attempt(RelayError::NoResponseLinked),
            Some(Err(_)) => {
                warn!(raw = ?prompt.response_id, "Prompt carries a malformed response reference");
                self.fail(RelayError::MalformedReference)
            }
            Some(Ok(response_id)) => {
                info!(%response_id, attempts = self.link_attempts, "Prompt linked to response");
                self.response_id = Some(response_id);
                self.phase = Phase::AwaitingResponseRecord;
                self.last_activity_at = now;
                None
            }
        }
    }

    fn count_link_attempt(&mut self, reason: RelayError) -> Option<StreamEvent> {
        self.link_attempts += 1;
        if self.link_attempts >= self.timings.max_link_attempts {
            self.fail(reason)
        } else {
            None
        }
    }

    /// Applies one response lookup result once the link is known.
    pub fn observe_response(
        &mut self,
        response: Option<&ResponseRecord>,
        now: Instant,
    ) -> Option<StreamEvent> {
        if !matches!(
            self.phase,
            Phase::AwaitingResponseRecord | Phase::Streaming | Phase::Draining
        ) {
            return None;
        }

        let event = match response {
            None => {
                let since = *self.response_absent_since.get_or_insert(now);
                if now.duration_since(since) > self.timings.response_wait {
                    return self.fail(RelayError::ResponseNotFound);
                }
                None
            }
            Some(record) => {
                self.response_absent_since = None;
                self.forward(record, now)
            }
        };
        if event.is_some() {
            return event;
        }

        if now.duration_since(self.last_activity_at) > self.timings.inactivity_timeout {
            return self.fail(RelayError::Inactivity);
        }
        None
    }

    fn forward(&mut self, record: &ResponseRecord, now: Instant) -> Option<StreamEvent> {
        let total = record.tokens.len();

        if total > self.sent_token_count {
            let fresh = record.tokens[self.sent_token_count..].to_vec();
            debug!(
                new = fresh.len(),
                total,
                complete = record.complete,
                "Forwarding tokens"
            );
            self.sent_token_count = total;
            self.last_activity_at = now;
            self.phase = if record.complete {
                Phase::Draining
            } else {
                Phase::Streaming
            };
            return Some(StreamEvent::batch(fresh, record.complete, total));
        }

        if total < self.sent_token_count {
            warn!(
                total,
                sent = self.sent_token_count,
                "Response record shrank below the forwarded count"
            );
        }

        if record.complete {
            info!(total, "Stream complete, all tokens sent");
            self.phase = Phase::Closed;
            return Some(StreamEvent::completed(total));
        }

        if self.phase == Phase::AwaitingResponseRecord {
            self.phase = Phase::Streaming;
        }
        None
    }

    /// Ends the session with a terminal error event. Returns `None` if a
    /// terminal event was already produced.
    pub fn fail(&mut self, reason: RelayError) -> Option<StreamEvent> {
        if self.phase == Phase::Closed {
            return None;
        }
        warn!(prompt_id = %self.prompt_id, phase = ?self.phase, %reason, "Relay session failed");
        self.phase = Phase::Closed;
        Some(StreamEvent::failure(&reason))
    }

    /// Marks the session closed without emitting anything (client went away).
    pub fn close(&mut self) {
        self.phase = Phase::Closed;
    }
}
