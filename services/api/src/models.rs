//! API and Database Models
//!
//! Request/response bodies for the HTTP surface (documented with `utoipa`)
//! and the `sqlx` row types the stores map into core records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use spokify_core::{PromptRecord, ResponseRecord};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Deserialize, ToSchema, Debug)]
pub struct SubmitPromptPayload {
    /// Missing and blank messages are both rejected.
    #[schema(example = "Yesterday I go to the park.")]
    pub message: Option<String>,
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PromptAccepted {
    pub success: bool,
    #[schema(value_type = String, format = Uuid)]
    pub prompt_id: Uuid,
}

/// The uniform `{ success: false, error }` failure body.
#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct ErrorEnvelope {
    pub success: bool,
    #[schema(example = "Message is required")]
    pub error: String,
}

impl ErrorEnvelope {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}

/// Payload of one `data:` line on the event stream.
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[allow(dead_code)]
pub struct StreamEventSchema {
    #[schema(example = json!(["Hi", " there"]))]
    pub tokens: Vec<String>,
    pub partial: bool,
    pub total_tokens: Option<usize>,
    pub complete: Option<bool>,
    pub error: Option<bool>,
}

#[derive(FromRow, Debug, Clone)]
pub struct PromptRow {
    pub id: Uuid,
    pub user_id: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub response_id: Option<String>,
}

impl From<PromptRow> for PromptRecord {
    fn from(row: PromptRow) -> Self {
        PromptRecord {
            id: row.id,
            user_id: row.user_id,
            message: row.message,
            created_at: row.created_at,
            response_id: row.response_id,
        }
    }
}

#[derive(FromRow, Debug, Clone)]
pub struct ResponseRow {
    pub id: Uuid,
    pub tokens: Vec<String>,
    pub complete: bool,
}

impl From<ResponseRow> for ResponseRecord {
    fn from(row: ResponseRow) -> Self {
        ResponseRecord {
            id: row.id,
            tokens: row.tokens,
            complete: row.complete,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_accepted_uses_camel_case() {
        let id = Uuid::new_v4();
        let json = serde_json::to_value(PromptAccepted {
            success: true,
            prompt_id: id,
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "success": true, "promptId": id.to_string() })
        );
    }

    #[test]
    fn test_error_envelope_shape() {
        let json = serde_json::to_value(ErrorEnvelope::new("Message is required")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "success": false, "error": "Message is required" })
        );
    }

    #[test]
    fn test_submit_payload_tolerates_missing_message() {
        let payload: SubmitPromptPayload = serde_json::from_str("{}").unwrap();
        assert!(payload.message.is_none());
        let payload: SubmitPromptPayload =
            serde_json::from_str(r#"{"message": "I go park"}"#).unwrap();
        assert_eq!(payload.message.as_deref(), Some("I go park"));
    }

    #[test]
    fn test_prompt_row_keeps_raw_response_reference() {
        let row = PromptRow {
            id: Uuid::new_v4(),
            user_id: "anonymous".to_string(),
            message: "hello".to_string(),
            created_at: Utc::now(),
            response_id: Some("not-a-uuid".to_string()),
        };
        let record = PromptRecord::from(row);
        assert!(matches!(record.response_ref(), Some(Err(_))));
    }
}
