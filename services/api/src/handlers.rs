//! Axum Handlers for the REST API
//!
//! Prompt submission plus the shared `ApiError` type. Every failure is
//! rendered as the `{ success: false, error }` envelope.

use axum::{
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use spokify_core::store::{StoreError, create_prompt_with_reconnect};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::{
    models::{ErrorEnvelope, PromptAccepted, SubmitPromptPayload},
    state::AppState,
};

const ANONYMOUS_USER: &str = "anonymous";

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    ServiceUnavailable,
    InternalServerError(anyhow::Error),
}

impl ApiError {
    /// Unreachable stores become 503; anything else is a 500.
    pub fn from_store(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(reason) => {
                warn!(%reason, "Store unavailable");
                ApiError::ServiceUnavailable
            }
            other => ApiError::InternalServerError(other.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::ServiceUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "AI service unavailable".to_string(),
            ),
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "Server error".to_string())
            }
        };
        (status, Json(ErrorEnvelope::new(message))).into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

/// The caller's identity, or `anonymous` when none was sent.
pub fn user_id_from(headers: &HeaderMap) -> &str {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .unwrap_or(ANONYMOUS_USER)
}

/// Submit a prompt for the generator to answer.
#[utoipa::path(
    post,
    path = "/ai/prompt",
    request_body = SubmitPromptPayload,
    responses(
        (status = 201, description = "Prompt stored", body = PromptAccepted),
        (status = 400, description = "Message is missing or blank", body = ErrorEnvelope),
        (status = 503, description = "Prompt store unreachable", body = ErrorEnvelope),
        (status = 500, description = "Internal server error", body = ErrorEnvelope)
    ),
    params(
        ("x-user-id" = Option<String>, Header, description = "The submitting user; defaults to anonymous")
    )
)]
pub async fn submit_prompt(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<SubmitPromptPayload>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let message = payload
        .ok()
        .and_then(|Json(p)| p.message)
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Message is required".to_string()))?;
    let user_id = user_id_from(&headers);

    let prompt = create_prompt_with_reconnect(state.prompts.as_ref(), user_id, &message)
        .await
        .map_err(ApiError::from_store)?;
    info!(prompt_id = %prompt.id, %user_id, "Prompt created");

    Ok((
        StatusCode::CREATED,
        Json(PromptAccepted {
            success: true,
            prompt_id: prompt.id,
        }),
    ))
}
