//! Manages the WebSocket connection lifecycle for a conversation session.

use super::{
    protocol::{ClientMessage, ErrorCode, Mode, ServerMessage},
    turn,
};
use crate::{auth, state::AppState};
use anyhow::{Context, anyhow};
use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use bytes::{Bytes, BytesMut};
use futures_util::{
    FutureExt, SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use serde::Deserialize;
use std::{any::Any, panic::AssertUnwindSafe, sync::Arc};
use thiserror::Error;
use tokio::time::{Instant, sleep_until, timeout_at};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

pub(crate) type SocketSink = SplitSink<WebSocket, Message>;

#[derive(Debug, Error)]
pub enum SessionError {
    /// The peer went away. This ends the session normally.
    #[error("client disconnected")]
    Disconnected,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingStart,
    Active,
    Closing,
    Closed,
}

/// Per-connection conversation state. Owned by the connection task.
#[derive(Debug)]
pub struct Session {
    pub session_id: Uuid,
    pub conversation_id: Option<String>,
    pub voice_id: String,
    pub provider: String,
    pub mode: Mode,
    audio: BytesMut,
    state: SessionState,
}

impl Session {
    pub fn new(voice_id: String, provider: String, mode: Mode) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            conversation_id: None,
            voice_id,
            provider,
            mode,
            audio: BytesMut::new(),
            state: SessionState::AwaitingStart,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn transition(&mut self, next: SessionState) {
        debug!(from = ?self.state, to = ?next, "Session state change");
        self.state = next;
    }

    pub fn append_audio(&mut self, chunk: &[u8]) {
        self.audio.extend_from_slice(chunk);
    }

    pub fn reset_audio(&mut self) {
        self.audio.clear();
    }

    pub fn buffered_audio(&self) -> usize {
        self.audio.len()
    }

    /// Consumes the buffered utterance, leaving the buffer empty.
    /// Returns `None` when nothing was buffered.
    pub fn take_audio(&mut self) -> Option<Bytes> {
        if self.audio.is_empty() {
            None
        } else {
            Some(self.audio.split().freeze())
        }
    }

    /// Records the conversation id reported by the chat backend. The first
    /// non-empty id wins and is kept for the rest of the connection.
    pub fn adopt_conversation_id(&mut self, conversation_id: Option<String>) {
        if self.conversation_id.is_some() {
            return;
        }
        if let Some(id) = conversation_id.filter(|id| !id.is_empty()) {
            info!(conversation_id = %id, "Conversation id assigned");
            self.conversation_id = Some(id);
        }
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct ConnectParams {
    pub token: Option<String>,
}

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params.token))
}

enum Handshake {
    Accepted(Session),
    Rejected(ErrorCode, String),
    Disconnected,
}

/// Drives one connection from handshake to close.
///
/// Every failure that escapes the active loop is reported to the client as
/// `internal_error` before the socket is closed. A peer disconnect is not
/// treated as a failure.
#[instrument(name = "ws_session", skip_all, fields(session_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, query_token: Option<String>) {
    let deadline = Instant::now() + state.config.max_session_duration;
    let (mut sink, mut stream) = socket.split();

    let handshake = match timeout_at(deadline, handshake(&mut stream, &state, query_token)).await
    {
        Ok(handshake) => handshake,
        Err(_) => Handshake::Rejected(
            ErrorCode::SessionTimeout,
            "Session timed out before session.start".to_string(),
        ),
    };

    let mut session = match handshake {
        Handshake::Accepted(session) => session,
        Handshake::Rejected(code, message) => {
            warn!(?code, %message, "Rejected session handshake");
            let _ = send_msg(&mut sink, ServerMessage::error(code, message)).await;
            let _ = sink.close().await;
            return;
        }
        Handshake::Disconnected => {
            info!("Client disconnected before session.start");
            return;
        }
    };

    tracing::Span::current().record("session_id", tracing::field::display(session.session_id));
    let created = ServerMessage::SessionCreated {
        session_id: session.session_id,
        conversation_id: session.conversation_id.clone().unwrap_or_default(),
    };
    if send_msg(&mut sink, created).await.is_err() {
        info!("Client disconnected before session.created");
        return;
    }
    session.transition(SessionState::Active);
    info!(mode = ?session.mode, provider = %session.provider, voice_id = %session.voice_id, "Session started");

    // A panicking gateway or tool must still leave the client an error frame.
    let outcome = AssertUnwindSafe(run_session(
        &state,
        &mut session,
        &mut sink,
        &mut stream,
        deadline,
    ))
    .catch_unwind()
    .await
    .unwrap_or_else(|panic| {
        Err(SessionError::Internal(anyhow!(
            "session aborted: {}",
            panic_message(panic.as_ref())
        )))
    });

    match outcome {
        Ok(()) => {}
        Err(SessionError::Disconnected) => info!("Client disconnected"),
        Err(SessionError::Internal(e)) => {
            error!(error = ?e, "Session terminated with error");
            let _ = send_msg(
                &mut sink,
                ServerMessage::error(ErrorCode::InternalError, e.to_string()),
            )
            .await;
        }
    }

    session.transition(SessionState::Closing);
    let _ = sink.close().await;
    session.transition(SessionState::Closed);
    info!("Session closed");
}

/// Waits for the opening `session.start` and validates it.
async fn handshake(
    stream: &mut SplitStream<WebSocket>,
    state: &AppState,
    query_token: Option<String>,
) -> Handshake {
    let text = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => break text,
            Some(Ok(Message::Binary(_))) => {
                return Handshake::Rejected(
                    ErrorCode::ProtocolError,
                    "Expected session.start".to_string(),
                );
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return Handshake::Disconnected,
        }
    };

    let Ok(ClientMessage::SessionStart {
        voice_id,
        provider,
        mode,
        token,
        conversation_id,
    }) = serde_json::from_str::<ClientMessage>(&text)
    else {
        return Handshake::Rejected(
            ErrorCode::ProtocolError,
            "Expected session.start".to_string(),
        );
    };

    if state.is_shutting_down() {
        return Handshake::Rejected(
            ErrorCode::ServiceUnavailable,
            "Service is shutting down".to_string(),
        );
    }

    let token = token.or(query_token);
    if !auth::is_authorized(state.config.api_key.as_deref(), token.as_deref()) {
        return Handshake::Rejected(ErrorCode::Unauthorized, "Invalid API key".to_string());
    }

    let mut session = Session::new(
        voice_id.unwrap_or_else(|| state.config.default_voice_id.clone()),
        provider.unwrap_or_else(|| state.config.default_provider.clone()),
        mode,
    );
    session.conversation_id = conversation_id.filter(|id| !id.is_empty());
    Handshake::Accepted(session)
}

/// The receive loop of an active session.
async fn run_session(
    state: &AppState,
    session: &mut Session,
    sink: &mut SocketSink,
    stream: &mut SplitStream<WebSocket>,
    deadline: Instant,
) -> Result<(), SessionError> {
    let mut shutdown = state.shutdown.clone();

    loop {
        let frame = tokio::select! {
            frame = stream.next() => frame,
            _ = sleep_until(deadline) => {
                info!("Session exceeded its maximum duration");
                return send_msg(
                    sink,
                    ServerMessage::error(ErrorCode::SessionTimeout, "Maximum session duration reached"),
                )
                .await;
            }
            Ok(()) = shutdown.changed() => {
                info!("Closing session for shutdown");
                return send_msg(
                    sink,
                    ServerMessage::error(ErrorCode::ServiceUnavailable, "Service is shutting down"),
                )
                .await;
            }
        };

        let message = match frame {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                debug!(error = %e, "WebSocket receive failed");
                return Err(SessionError::Disconnected);
            }
            None => return Err(SessionError::Disconnected),
        };

        match message {
            Message::Binary(chunk) => session.append_audio(&chunk),
            Message::Text(text) => {
                let msg = match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(error = %e, "Malformed control message");
                        send_msg(
                            sink,
                            ServerMessage::error(
                                ErrorCode::ProtocolError,
                                format!("Malformed message: {e}"),
                            ),
                        )
                        .await?;
                        continue;
                    }
                };
                match msg {
                    ClientMessage::AudioStart => session.reset_audio(),
                    ClientMessage::AudioEnd => turn::handle_audio_end(state, session, sink).await?,
                    ClientMessage::TextSend { text } => {
                        let text = text.trim();
                        if !text.is_empty() {
                            turn::run_turn(state, session, sink, text).await?;
                        }
                    }
                    ClientMessage::SessionEnd => {
                        info!("Client ended the session");
                        return Ok(());
                    }
                    ClientMessage::SessionStart { .. } => {
                        warn!("Ignoring repeated session.start");
                    }
                    ClientMessage::Unknown => debug!("Ignoring unknown message type"),
                }
            }
            Message::Close(_) => return Err(SessionError::Disconnected),
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

/// Serializes and sends a `ServerMessage` to the client.
pub(crate) async fn send_msg(sink: &mut SocketSink, msg: ServerMessage) -> Result<(), SessionError> {
    let serialized = serde_json::to_string(&msg).context("failed to encode server message")?;
    sink.send(Message::Text(serialized.into()))
        .await
        .map_err(|_| SessionError::Disconnected)
}
