//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the prompt API, the event stream and OpenAPI documentation.

use crate::{
    handlers,
    models::{ErrorEnvelope, PromptAccepted, StreamEventSchema, SubmitPromptPayload},
    sse,
    state::AppState,
};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::submit_prompt,
        sse::session::stream_handler,
    ),
    components(
        schemas(SubmitPromptPayload, PromptAccepted, ErrorEnvelope, StreamEventSchema)
    ),
    tags(
        (name = "Spokify API", description = "Prompt submission and streamed AI responses")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route("/ai/prompt", post(handlers::submit_prompt))
        .route("/ai/stream/{prompt_id}", get(sse::stream_handler))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
