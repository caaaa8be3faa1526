//! One conversational turn: user input in, streamed reply and audio out.

use super::{
    protocol::{ErrorCode, ServerMessage},
    session::{Session, SessionError, SocketSink, send_msg},
};
use crate::state::AppState;
use axum::extract::ws::Message;
use colloquy_core::{
    run_tool_loop, split_sentences,
    types::{ChatRequest, StreamEvent},
};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, instrument, warn};

/// Consumes the buffered utterance, transcribes it and, when the transcript
/// carries words, answers it.
pub(super) async fn handle_audio_end(
    state: &AppState,
    session: &mut Session,
    sink: &mut SocketSink,
) -> Result<(), SessionError> {
    let Some(audio) = session.take_audio() else {
        return send_msg(
            sink,
            ServerMessage::error(ErrorCode::NoAudio, "No audio data received"),
        )
        .await;
    };

    debug!(bytes = audio.len(), "Transcribing utterance");
    let Some(transcription) = state.gateway.transcribe(audio).await else {
        return send_msg(
            sink,
            ServerMessage::error(
                ErrorCode::SttUnavailable,
                "Speech recognition failed, please type instead",
            ),
        )
        .await;
    };

    let text = transcription.text;
    send_msg(
        sink,
        ServerMessage::TranscriptionFinal { text: text.clone() },
    )
    .await?;

    let text = text.trim();
    if text.is_empty() {
        return Ok(());
    }
    run_turn(state, session, sink, text).await
}

/// Answers `text`, forwarding the reply as it arrives and, unless the
/// session is text-only, speaking it sentence by sentence.
///
/// A turn ends with either `response.end` or an `error` frame.
#[instrument(skip_all, fields(mode = ?session.mode))]
pub(super) async fn run_turn(
    state: &AppState,
    session: &mut Session,
    sink: &mut SocketSink,
    text: &str,
) -> Result<(), SessionError> {
    let full_text = if state.config.session_tools && !state.tools.is_empty() {
        let outcome = run_tool_loop(
            state.gateway.as_ref(),
            &state.tools,
            text,
            session.conversation_id.clone(),
            Some(session.provider.clone()),
            state.config.max_tool_iterations,
        )
        .await;
        session.adopt_conversation_id(outcome.conversation_id);
        if !outcome.message.is_empty() {
            send_msg(
                sink,
                ServerMessage::ResponseText {
                    content: outcome.message.clone(),
                },
            )
            .await?;
        }
        outcome.message
    } else {
        match stream_reply(state, session, sink, text).await? {
            Some(full_text) => full_text,
            None => return Ok(()),
        }
    };

    if session.mode.speaks() && !full_text.trim().is_empty() {
        speak(state, session, sink, &full_text).await?;
    }

    info!(chars = full_text.len(), "Turn complete");
    send_msg(sink, ServerMessage::ResponseEnd { full_text }).await
}

/// Relays the streamed chat reply token by token. Returns the accumulated
/// text, or `None` if the stream ended in an error, which has already been
/// reported to the client.
async fn stream_reply(
    state: &AppState,
    session: &mut Session,
    sink: &mut SocketSink,
    text: &str,
) -> Result<Option<String>, SessionError> {
    let request = ChatRequest::new(text)
        .conversation_id(session.conversation_id.clone())
        .provider(Some(session.provider.clone()));
    let mut events = state.gateway.chat_stream(request);

    let mut full_text = String::new();
    while let Some(event) = events.next().await {
        match event {
            StreamEvent::Token {
                content,
                conversation_id,
            } => {
                session.adopt_conversation_id(conversation_id);
                if content.is_empty() {
                    continue;
                }
                full_text.push_str(&content);
                send_msg(sink, ServerMessage::ResponseText { content }).await?;
            }
            StreamEvent::Done {
                content,
                conversation_id,
            } => {
                session.adopt_conversation_id(conversation_id);
                // Backends that do not stream send the whole reply here.
                if full_text.is_empty() && !content.is_empty() {
                    full_text = content.clone();
                    send_msg(sink, ServerMessage::ResponseText { content }).await?;
                }
                break;
            }
            StreamEvent::Error { error } => {
                warn!(%error, "Chat stream failed");
                send_msg(sink, ServerMessage::error(ErrorCode::BrainError, error)).await?;
                return Ok(None);
            }
        }
    }
    Ok(Some(full_text))
}

/// Synthesizes each sentence in order and forwards the audio as binary
/// frames. A sentence whose synthesis fails is skipped.
async fn speak(
    state: &AppState,
    session: &Session,
    sink: &mut SocketSink,
    text: &str,
) -> Result<(), SessionError> {
    for sentence in split_sentences(text) {
        match state.gateway.synthesize(&sentence, &session.voice_id).await {
            Some(audio) => sink
                .send(Message::Binary(audio))
                .await
                .map_err(|_| SessionError::Disconnected)?,
            None => warn!(%sentence, "Skipping sentence after synthesis failure"),
        }
    }
    Ok(())
}
