//! Defines the WebSocket message protocol between the client and the API server.
//!
//! Control messages are JSON objects tagged by `type`. Audio travels as raw
//! binary frames in both directions.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which outputs a session wants for each assistant reply.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Text deltas plus synthesized audio.
    Voice,
    /// Text deltas only.
    Text,
    #[default]
    Both,
}

impl Mode {
    /// Whether replies in this mode are synthesized to audio.
    pub fn speaks(self) -> bool {
        self != Mode::Text
    }
}

/// Messages sent from the client to the server.
#[derive(Deserialize, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Opens the session. This must be the first message.
    #[serde(rename = "session.start")]
    SessionStart {
        #[serde(default)]
        voice_id: Option<String>,
        #[serde(default)]
        provider: Option<String>,
        #[serde(default)]
        mode: Mode,
        #[serde(default)]
        token: Option<String>,
        #[serde(default)]
        conversation_id: Option<String>,
    },
    /// Discards any buffered audio and starts a new utterance.
    #[serde(rename = "audio.start")]
    AudioStart,
    /// Marks the end of the buffered utterance.
    #[serde(rename = "audio.end")]
    AudioEnd,
    /// A typed user message.
    #[serde(rename = "text.send")]
    TextSend {
        #[serde(default)]
        text: String,
    },
    /// Ends the session.
    #[serde(rename = "session.end")]
    SessionEnd,
    /// Any message type this server does not know about.
    #[serde(other)]
    Unknown,
}

/// Error codes carried by [`ServerMessage::Error`].
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    ProtocolError,
    Unauthorized,
    ServiceUnavailable,
    NoAudio,
    SttUnavailable,
    BrainError,
    SessionTimeout,
    InternalError,
}

/// Messages sent from the server to the client.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Acknowledges `session.start`.
    #[serde(rename = "session.created")]
    SessionCreated {
        session_id: Uuid,
        conversation_id: String,
    },
    /// The transcript of the last utterance.
    #[serde(rename = "transcription.final")]
    TranscriptionFinal { text: String },
    /// One incremental piece of the assistant reply.
    #[serde(rename = "response.text")]
    ResponseText { content: String },
    /// Completes a turn with the full reply text.
    #[serde(rename = "response.end")]
    ResponseEnd { full_text: String },
    #[serde(rename = "error")]
    Error { code: ErrorCode, message: String },
}

impl ServerMessage {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }
}
