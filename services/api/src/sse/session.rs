use axum::{
    extract::{Path, State},
    http::{HeaderValue, header},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use spokify_core::store::{PromptStore, ResponseStore};
use spokify_core::{RelayError, StreamEvent, StreamSession};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{Instrument, debug, error, info};
use uuid::Uuid;

use crate::handlers::ApiError;
use crate::state::AppState;

pub type EventSender = mpsc::Sender<Result<Event, Infallible>>;

const EVENT_BUFFER: usize = 16;

/// Open the event stream for a submitted prompt.
#[utoipa::path(
    get,
    path = "/ai/stream/{prompt_id}",
    params(
        ("prompt_id" = String, Path, description = "Id returned by POST /ai/prompt")
    ),
    responses(
        (status = 200, description = "Server-sent events, one StreamEvent JSON object per data line",
            content_type = "text/event-stream", body = crate::models::StreamEventSchema),
        (status = 400, description = "Prompt id is not a UUID", body = crate::models::ErrorEnvelope)
    )
)]
pub async fn stream_handler(
    State(state): State<Arc<AppState>>,
    Path(prompt_id): Path<String>,
) -> Result<Response, ApiError> {
    let prompt_id = Uuid::parse_str(prompt_id.trim())
        .map_err(|_| ApiError::BadRequest("Invalid prompt ID format".to_string()))?;

    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let session = StreamSession::new(prompt_id, state.config.relay, Instant::now());
    let span = tracing::info_span!("relay_session", %prompt_id);

    let relay = tokio::spawn(
        run_relay(session, state.prompts.clone(), state.responses.clone(), tx.clone())
            .instrument(span.clone()),
    );
    tokio::spawn(
        async move {
            if let Err(e) = relay.await {
                if e.is_panic() {
                    error!(error = ?e, "Relay task failed");
                    let _ = tx.send(Ok(encode(&StreamEvent::failure(&RelayError::Setup)))).await;
                }
            }
        }
        .instrument(span),
    );

    let mut response = Sse::new(ReceiverStream::new(rx))
        .keep_alive(KeepAlive::default())
        .into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    Ok(response)
}

/// Polls on the session's cadence and forwards events until a terminal event
/// is sent or the client goes away. Dropping the sender ends the response.
pub async fn run_relay(
    mut session: StreamSession,
    prompts: Arc<dyn PromptStore>,
    responses: Arc<dyn ResponseStore>,
    tx: EventSender,
) {
    let mut ticker = interval(session.timings().poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!("Relay session started");

    loop {
        tokio::select! {
            _ = tx.closed() => {
                info!(
                    phase = ?session.phase(),
                    sent = session.sent_token_count(),
                    "Client disconnected, stopping relay"
                );
                session.close();
                return;
            }
            _ = ticker.tick() => {
                let Some(event) = session
                    .tick(prompts.as_ref(), responses.as_ref(), Instant::now())
                    .await
                else {
                    continue;
                };
                let terminal = event.is_terminal();
                if tx.send(Ok(encode(&event))).await.is_err() {
                    debug!("Client gone before event could be delivered");
                    session.close();
                    return;
                }
                if terminal {
                    info!(
                        error = event.is_error(),
                        sent = session.sent_token_count(),
                        "Relay session finished"
                    );
                    return;
                }
            }
        }
    }
}

fn encode(event: &StreamEvent) -> Event {
    match serde_json::to_string(event) {
        Ok(json) => Event::default().data(json),
        Err(e) => {
            error!(error = %e, "Could not encode stream event");
            Event::default().data(
                r#"{"tokens":["Error: Stream encountered a server error."],"partial":false,"error":true}"#,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spokify_core::RelayTimings;
    use spokify_core::store::MemoryStore;
    use std::time::Duration;

    /// Drains the relay's raw channel.
    struct Capture {
        rx: mpsc::Receiver<Result<Event, Infallible>>,
    }

    impl Capture {
        async fn count(mut self) -> usize {
            let mut n = 0;
            while self.rx.recv().await.is_some() {
                n += 1;
            }
            n
        }
    }

    fn start(store: &MemoryStore, prompt_id: Uuid) -> (tokio::task::JoinHandle<()>, Capture) {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let session = StreamSession::new(prompt_id, RelayTimings::default(), Instant::now());
        let handle = tokio::spawn(run_relay(
            session,
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            tx,
        ));
        (handle, Capture { rx })
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_ends_after_terminal_event() {
        let store = MemoryStore::new();
        let prompt = store.create_prompt("anonymous", "Hi").await.unwrap();
        let response_id = Uuid::new_v4();
        store.link_response(prompt.id, &response_id.to_string());
        store.append_tokens(response_id, &["Hi", " there"]);
        store.mark_complete(response_id);

        let (handle, capture) = start(&store, prompt.id);
        // batch, then completion on the following tick; the sender is dropped after.
        assert_eq!(capture.count().await, 2);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_stops_polling() {
        let store = MemoryStore::new();
        let prompt = store.create_prompt("anonymous", "Hi").await.unwrap();

        let (handle, capture) = start(&store, prompt.id);
        tokio::time::sleep(Duration::from_millis(1200)).await;
        drop(capture);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("relay should stop promptly after disconnect")
            .unwrap();
    }
}
