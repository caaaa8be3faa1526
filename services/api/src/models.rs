//! API Models
//!
//! Request and response bodies of the REST surface. They double as the
//! schemas of the generated OpenAPI document.

use colloquy_core::types::{BackendHealth, HealthStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

#[derive(Deserialize, ToSchema, Debug)]
pub struct TextChatRequest {
    #[schema(example = "What time is it in Tokyo?")]
    pub message: String,
    /// Continue an existing conversation.
    pub conversation_id: Option<String>,
    /// Language-model provider hint forwarded to the chat backend.
    #[schema(example = "ollama")]
    pub provider: Option<String>,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, PartialEq)]
pub struct TextChatResponse {
    pub message: String,
    pub conversation_id: String,
}

#[derive(Serialize, ToSchema, Debug)]
pub struct HealthResponse {
    #[schema(example = "ok")]
    pub status: String,
    pub service: String,
    pub version: String,
    pub uptime_seconds: f64,
    /// Status of each backend, `healthy` or `unhealthy`.
    #[schema(example = json!({"stt": "healthy", "tts": "healthy", "chat": "unhealthy"}))]
    pub services: BTreeMap<String, String>,
}

impl HealthResponse {
    pub fn new(uptime_seconds: f64, services: BTreeMap<String, BackendHealth>) -> Self {
        let services = services
            .into_iter()
            .map(|(name, health)| {
                let status = match health.status {
                    HealthStatus::Healthy => "healthy",
                    HealthStatus::Unhealthy => "unhealthy",
                };
                (name, status.to_string())
            })
            .collect();
        Self {
            status: "ok".to_string(),
            service: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: (uptime_seconds * 10.0).round() / 10.0,
            services,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}
