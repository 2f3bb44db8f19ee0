use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user's submitted text awaiting an AI-generated reply.
///
/// `response_id` is attached exactly once by the external generator. It is
/// kept as the raw stored text so a malformed reference can be detected by
/// the relay instead of being silently dropped at load time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptRecord {
    pub id: Uuid,
    pub user_id: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub response_id: Option<String>,
}

impl PromptRecord {
    /// Parses the linked response reference, if one has been attached.
    ///
    /// Returns `None` when no link exists yet and `Some(Err(..))` when the
    /// generator wrote something that is not a valid response id.
    pub fn response_ref(&self) -> Option<Result<Uuid, uuid::Error>> {
        self.response_id
            .as_deref()
            .map(|raw| Uuid::parse_str(raw.trim()))
    }
}

/// The evolving, token-accumulating reply written by the external generator.
///
/// `tokens` is append-only while `complete` is false; `complete` flips to
/// true exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub id: Uuid,
    pub tokens: Vec<String>,
    pub complete: bool,
}

impl ResponseRecord {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            tokens: Vec::new(),
            complete: false,
        }
    }
}
