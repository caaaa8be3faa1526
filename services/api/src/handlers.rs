//! Axum Handlers for the REST API
//!
//! This module contains the text chat and health endpoints. It uses `utoipa`
//! doc comments to generate OpenAPI documentation.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use colloquy_core::run_tool_loop;
use std::sync::Arc;
use tracing::{info, warn};

use crate::{
    auth,
    models::{ErrorResponse, HealthResponse, TextChatRequest, TextChatResponse},
    state::AppState,
};

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::Unauthorized => {
                let message = "Invalid API key".to_string();
                (StatusCode::UNAUTHORIZED, Json(ErrorResponse { message })).into_response()
            }
        }
    }
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    if auth::is_authorized(state.config.api_key.as_deref(), auth::bearer_token(headers)) {
        Ok(())
    } else {
        warn!("Rejected REST request with an invalid API key");
        Err(ApiError::Unauthorized)
    }
}

/// Send one text message through the tool-calling agent loop.
#[utoipa::path(
    post,
    path = "/v1/chat",
    request_body = TextChatRequest,
    responses(
        (status = 200, description = "Final assistant reply", body = TextChatResponse),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 401, description = "Missing or invalid API key", body = ErrorResponse)
    ),
    params(
        ("Authorization" = Option<String>, Header, description = "Bearer API key, required when one is configured")
    )
)]
pub async fn text_chat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<TextChatRequest>,
) -> Result<Json<TextChatResponse>, ApiError> {
    authorize(&state, &headers)?;

    let message = payload.message.trim();
    if message.is_empty() {
        return Err(ApiError::BadRequest("message must not be empty".to_string()));
    }

    let outcome = run_tool_loop(
        state.gateway.as_ref(),
        &state.tools,
        message,
        payload.conversation_id,
        payload.provider,
        state.config.max_tool_iterations,
    )
    .await;
    info!(conversation_id = ?outcome.conversation_id, "Text chat completed");

    Ok(Json(TextChatResponse {
        message: outcome.message,
        conversation_id: outcome.conversation_id.unwrap_or_default(),
    }))
}

/// Report service liveness and the health of every backend.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse)
    )
)]
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let services = state.gateway.check_all_services().await;
    Json(HealthResponse::new(
        state.started_at.elapsed().as_secs_f64(),
        services,
    ))
}
