//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the REST API, the conversation WebSocket endpoint, and the
//! OpenAPI documentation.

use crate::{
    handlers,
    models::{ErrorResponse, HealthResponse, TextChatRequest, TextChatResponse},
    state::AppState,
    ws::ws_handler,
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
    paths(handlers::text_chat, handlers::health),
    components(
        schemas(TextChatRequest, TextChatResponse, HealthResponse, ErrorResponse)
    ),
    tags(
        (name = "Colloquy API", description = "Voice and text conversation orchestrator")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route("/v1/chat", post(handlers::text_chat))
        .route("/v1/conversation", get(ws_handler))
        .route("/health", get(handlers::health))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
