//! Backend Gateway
//!
//! A single outbound client for the three backends the orchestrator depends
//! on: speech recognition (STT), the chat engine, and speech synthesis (TTS).
//!
//! Every operation converts backend failures (network errors, timeouts,
//! non-success statuses, undecodable bodies) into a sentinel value and a log
//! line. Nothing here retries.
//!
//! The STT and TTS backends share one accelerator, so each is guarded by a
//! capacity-one gate: at most one transcription and, independently, at most
//! one synthesis is in flight per gateway. The application builds exactly one
//! gateway per process and shares it between sessions. Chat calls are not
//! gated.

use crate::types::{
    BackendHealth, ChatRequest, ChatResponse, HealthStatus, StreamEvent, Transcription,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::{
    RequestBuilder,
    header::{AUTHORIZATION, HeaderMap, HeaderValue, InvalidHeaderValue},
    multipart::{Form, Part},
};
use serde_json::json;
use std::{collections::BTreeMap, pin::Pin, time::Duration};
use tokio::sync::{Semaphore, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, warn};

/// Timeout applied to every liveness probe.
pub const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Events buffered between the stream producer task and its consumer.
const STREAM_BUFFER: usize = 64;

/// Longest stream line kept in memory. Longer lines are dropped as malformed.
const MAX_LINE_BYTES: usize = 64 * 1024;

/// An ordered stream of chat events that always ends with `Done` or `Error`.
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// The contract the session and tool loop use to reach the backends.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ServiceGateway: Send + Sync {
    /// Transcribes recorded audio. `None` if the STT backend failed.
    async fn transcribe(&self, audio: Bytes) -> Option<Transcription>;

    /// Sends one chat message and waits for the complete response.
    async fn chat(&self, request: ChatRequest) -> Option<ChatResponse>;

    /// Opens a streamed chat response.
    ///
    /// Events are produced by a background task. Dropping the stream stops
    /// the consumer side only; the outbound request finishes or times out on
    /// its own.
    fn chat_stream(&self, request: ChatRequest) -> EventStream;

    /// Synthesizes speech for `text`. `None` if the TTS backend failed.
    async fn synthesize(&self, text: &str, voice_id: &str) -> Option<Bytes>;

    /// Probes all backends concurrently, keyed by backend name.
    async fn check_all_services(&self) -> BTreeMap<String, BackendHealth>;
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Invalid service pre-shared key: {0}")]
    InvalidPsk(#[from] InvalidHeaderValue),
    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Locations, timeouts and credentials for the three backends.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub stt_url: String,
    pub tts_url: String,
    pub chat_url: String,
    pub stt_timeout: Duration,
    pub tts_timeout: Duration,
    pub chat_timeout: Duration,
    /// Provider sent to the chat backend when a request names none.
    pub default_provider: String,
    /// Bearer token attached to every outbound call when set.
    pub service_psk: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            stt_url: "http://localhost:8001".to_string(),
            tts_url: "http://localhost:8002".to_string(),
            chat_url: "http://localhost:8003".to_string(),
            stt_timeout: Duration::from_secs(30),
            tts_timeout: Duration::from_secs(30),
            chat_timeout: Duration::from_secs(60),
            default_provider: "ollama".to_string(),
            service_psk: None,
        }
    }
}

/// The HTTP implementation of [`ServiceGateway`].
pub struct HttpGateway {
    client: reqwest::Client,
    config: GatewayConfig,
    stt_gate: Semaphore,
    tts_gate: Semaphore,
}

impl HttpGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let mut headers = HeaderMap::new();
        if let Some(psk) = &config.service_psk {
            let mut value = HeaderValue::from_str(&format!("Bearer {psk}"))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            config,
            stt_gate: Semaphore::new(1),
            tts_gate: Semaphore::new(1),
        })
    }

    fn chat_request(&self, path: &str, request: ChatRequest) -> RequestBuilder {
        let request = ChatRequest {
            provider: request
                .provider
                .or_else(|| Some(self.config.default_provider.clone())),
            ..request
        };
        self.client
            .post(endpoint(&self.config.chat_url, path))
            .json(&request)
            .timeout(self.config.chat_timeout)
    }

    async fn post_transcription(&self, audio: Bytes) -> reqwest::Result<Transcription> {
        let part = Part::bytes(audio.to_vec())
            .file_name("audio.webm")
            .mime_str("audio/webm")?;
        self.client
            .post(endpoint(&self.config.stt_url, "/v1/transcribe"))
            .multipart(Form::new().part("file", part))
            .timeout(self.config.stt_timeout)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    async fn post_synthesis(&self, text: &str, voice_id: &str) -> reqwest::Result<Bytes> {
        self.client
            .post(endpoint(&self.config.tts_url, "/v1/synthesize"))
            .json(&json!({ "text": text, "voice_id": voice_id }))
            .timeout(self.config.tts_timeout)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await
    }

    async fn probe(&self, name: &str, base_url: &str) -> BackendHealth {
        let status = match self
            .client
            .get(endpoint(base_url, "/health"))
            .timeout(HEALTH_PROBE_TIMEOUT)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => HealthStatus::Healthy,
            Ok(response) => {
                debug!(backend = name, status = %response.status(), "Health probe returned failure");
                HealthStatus::Unhealthy
            }
            Err(e) => {
                debug!(backend = name, error = %e, "Health probe failed");
                HealthStatus::Unhealthy
            }
        };
        BackendHealth {
            name: name.to_string(),
            status,
        }
    }
}

#[async_trait]
impl ServiceGateway for HttpGateway {
    async fn transcribe(&self, audio: Bytes) -> Option<Transcription> {
        let _permit = self.stt_gate.acquire().await.ok()?;
        match self.post_transcription(audio).await {
            Ok(transcription) => Some(transcription),
            Err(e) => {
                error!(backend = "stt", error = %e, "Transcription call failed");
                None
            }
        }
    }

    async fn chat(&self, request: ChatRequest) -> Option<ChatResponse> {
        let result: reqwest::Result<ChatResponse> = async {
            self.chat_request("/v1/chat", request)
                .send()
                .await?
                .error_for_status()?
                .json::<ChatResponse>()
                .await
        }
        .await;
        match result {
            Ok(response) => Some(response),
            Err(e) => {
                error!(backend = "chat", error = %e, "Chat call failed");
                None
            }
        }
    }

    fn chat_stream(&self, request: ChatRequest) -> EventStream {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let request = self.chat_request("/v1/chat/stream", request);
        tokio::spawn(pump_chat_stream(request, tx));
        Box::pin(ReceiverStream::new(rx))
    }

    async fn synthesize(&self, text: &str, voice_id: &str) -> Option<Bytes> {
        let _permit = self.tts_gate.acquire().await.ok()?;
        match self.post_synthesis(text, voice_id).await {
            Ok(audio) if audio.is_empty() => {
                warn!(backend = "tts", "Synthesis returned no audio");
                None
            }
            Ok(audio) => Some(audio),
            Err(e) => {
                error!(backend = "tts", error = %e, "Synthesis call failed");
                None
            }
        }
    }

    async fn check_all_services(&self) -> BTreeMap<String, BackendHealth> {
        let (stt, tts, chat) = tokio::join!(
            self.probe("stt", &self.config.stt_url),
            self.probe("tts", &self.config.tts_url),
            self.probe("chat", &self.config.chat_url),
        );
        [stt, tts, chat]
            .into_iter()
            .map(|health| (health.name.clone(), health))
            .collect()
    }
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

/// How the relay from the HTTP body to the channel ended.
enum Relay {
    /// A terminal event was forwarded.
    Finished,
    /// The body ended without a terminal event.
    Truncated,
    /// The consumer dropped its end of the channel.
    Abandoned,
}

/// Runs the streamed chat request and guarantees a terminal event.
async fn pump_chat_stream(request: RequestBuilder, tx: mpsc::Sender<StreamEvent>) {
    let failure = match relay_events(request, &tx).await {
        Ok(Relay::Finished) | Ok(Relay::Abandoned) => return,
        Ok(Relay::Truncated) => {
            warn!(backend = "chat", "Chat stream ended without a terminal event");
            "chat stream ended before completion".to_string()
        }
        Err(e) => {
            error!(backend = "chat", error = %e, "Chat stream failed");
            e.to_string()
        }
    };
    let _ = tx.send(StreamEvent::error(failure)).await;
}

async fn relay_events(
    request: RequestBuilder,
    tx: &mpsc::Sender<StreamEvent>,
) -> reqwest::Result<Relay> {
    let response = request.send().await?.error_for_status()?;
    let mut body = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();
    // Set while skipping the rest of a line that outgrew MAX_LINE_BYTES.
    let mut discarding = false;

    while let Some(chunk) = body.next().await {
        buffer.extend_from_slice(&chunk?);
        while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=newline).collect();
            if std::mem::take(&mut discarding) || line.len() > MAX_LINE_BYTES {
                warn!(backend = "chat", limit = MAX_LINE_BYTES, "Dropping oversized stream line");
                continue;
            }
            if let Some(relay) = forward_line(&line, tx).await {
                return Ok(relay);
            }
        }
        if buffer.len() > MAX_LINE_BYTES {
            buffer.clear();
            discarding = true;
        }
    }
    if !discarding {
        if let Some(relay) = forward_line(&buffer, tx).await {
            return Ok(relay);
        }
    }
    Ok(Relay::Truncated)
}

/// Forwards the event on `line`, if any. Returns `Some` once the relay is over.
async fn forward_line(line: &[u8], tx: &mpsc::Sender<StreamEvent>) -> Option<Relay> {
    let event = decode_line(line)?;
    let terminal = event.is_terminal();
    if tx.send(event).await.is_err() {
        return Some(Relay::Abandoned);
    }
    terminal.then_some(Relay::Finished)
}

/// Decodes one `data: {json}` line. Blank and malformed lines yield `None`.
fn decode_line(line: &[u8]) -> Option<StreamEvent> {
    let line = std::str::from_utf8(line).ok()?.trim();
    if line.is_empty() {
        return None;
    }
    let payload = line.strip_prefix("data:").map(str::trim_start).unwrap_or(line);
    match serde_json::from_str(payload) {
        Ok(event) => Some(event),
        Err(e) => {
            debug!(error = %e, line = payload, "Skipping malformed stream line");
            None
        }
    }
}
