use super::{ClientError, SseDecoder};
use crate::protocol::StreamEvent;
use futures::StreamExt;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

const EVENT_BUFFER: usize = 64;

/// The `{ success, promptId?, error? }` envelope returned by the relay.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    #[serde(default)]
    success: bool,
    prompt_id: Option<String>,
    error: Option<String>,
}

/// HTTP client for the relay's prompt and stream endpoints.
#[derive(Debug, Clone)]
pub struct StreamClient {
    http: reqwest::Client,
    base_url: String,
    user_id: Option<String>,
}

impl StreamClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user_id: None,
        })
    }

    /// Sends `x-user-id` with every request.
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.user_id {
            Some(id) => builder.header("x-user-id", id),
            None => builder,
        }
    }

    /// Creates a prompt record and returns its id.
    pub async fn submit_prompt(&self, message: &str) -> Result<Uuid, ClientError> {
        if message.trim().is_empty() {
            return Err(ClientError::Validation);
        }

        let url = format!("{}/ai/prompt", self.base_url);
        let response = self
            .request(self.http.post(&url))
            .json(&serde_json::json!({ "message": message }))
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        let envelope: Option<Envelope> = response.json().await.ok();
        match status {
            s if s.is_success() => {
                let envelope = envelope
                    .ok_or_else(|| ClientError::Malformed("prompt response body".to_string()))?;
                if !envelope.success {
                    return Err(ClientError::Server(envelope.error.unwrap_or_default()));
                }
                let id = envelope
                    .prompt_id
                    .ok_or_else(|| ClientError::Malformed("missing promptId".to_string()))?;
                let id = Uuid::parse_str(&id).map_err(|e| ClientError::Malformed(e.to_string()))?;
                debug!(prompt_id = %id, "Prompt submitted");
                Ok(id)
            }
            StatusCode::UNAUTHORIZED => Err(ClientError::AuthenticationRequired),
            StatusCode::SERVICE_UNAVAILABLE => Err(ClientError::ServiceUnavailable),
            other => Err(ClientError::Server(
                envelope
                    .and_then(|e| e.error)
                    .unwrap_or_else(|| other.to_string()),
            )),
        }
    }

    /// Opens the event stream for a prompt. Events are decoded on a background
    /// task and handed out through the returned connection.
    pub async fn open_stream(&self, prompt_id: Uuid) -> Result<EventConnection, ClientError> {
        let url = format!("{}/ai/stream/{prompt_id}", self.base_url);
        let response = self
            .request(self.http.get(&url))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<Envelope>()
                .await
                .ok()
                .and_then(|e| e.error)
                .unwrap_or_else(|| status.to_string());
            return Err(ClientError::Server(message));
        }

        info!(%prompt_id, "Event stream opened");
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let mut body = response.bytes_stream();
        let reader = tokio::spawn(async move {
            let mut decoder = SseDecoder::new();
            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx.send(Err(ClientError::Transport(e.to_string()))).await;
                        return;
                    }
                };
                for data in decoder.push(&chunk) {
                    let event = serde_json::from_str::<StreamEvent>(&data)
                        .map_err(|e| ClientError::Malformed(e.to_string()));
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
            }
            debug!("Event stream body ended");
        });

        let mut connection = EventConnection::from_receiver(rx);
        connection.reader = Some(reader);
        Ok(connection)
    }
}

fn map_send_error(e: reqwest::Error) -> ClientError {
    if e.is_connect() || e.is_timeout() {
        warn!(error = %e, "No response from relay");
        ClientError::NoResponse
    } else {
        ClientError::Transport(e.to_string())
    }
}

/// One open event stream. Closing is idempotent and also happens on drop.
pub struct EventConnection {
    events: mpsc::Receiver<Result<StreamEvent, ClientError>>,
    reader: Option<JoinHandle<()>>,
    closed: bool,
}

impl EventConnection {
    /// Wraps an existing event channel, e.g. one fed by a test.
    pub fn from_receiver(events: mpsc::Receiver<Result<StreamEvent, ClientError>>) -> Self {
        Self {
            events,
            reader: None,
            closed: false,
        }
    }

    /// The next decoded event, or `None` once the stream ended or was closed.
    pub async fn next_event(&mut self) -> Option<Result<StreamEvent, ClientError>> {
        if self.closed {
            return None;
        }
        self.events.recv().await
    }

    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.events.close();
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        debug!("Event connection closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for EventConnection {
    fn drop(&mut self) {
        self.close();
    }
}
