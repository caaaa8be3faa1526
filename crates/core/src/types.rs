//! Data types exchanged between the orchestrator and its backends.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// The role of one entry in a conversation history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One entry of the chat backend's conversation history.
///
/// The history itself lives in the chat backend; the orchestrator only sees
/// the turns it sends and receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
}

/// A request body for the chat backend, shared by the single-shot and
/// streaming endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChatRequest {
    pub message: String,
    pub conversation_id: Option<String>,
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn conversation_id(mut self, conversation_id: Option<String>) -> Self {
        self.conversation_id = conversation_id;
        self
    }

    pub fn provider(mut self, provider: Option<String>) -> Self {
        self.provider = provider;
        self
    }

    pub fn tools(mut self, tools: Option<Vec<Value>>) -> Self {
        self.tools = tools;
        self
    }
}

/// A single-shot response from the chat backend.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub conversation_id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, deserialize_with = "deserialize_tool_calls")]
    pub tool_calls: Vec<ToolCallRequest>,
}

/// A tool invocation requested by the language model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireToolCall")]
pub struct ToolCallRequest {
    pub id: String,
    pub tool_name: String,
    pub arguments: Value,
}

// Backends emit either the function-calling shape
// `{id, function: {name, arguments}}` or a flat `{id, name, arguments}`.
// `arguments` may arrive as a JSON-encoded string or as an object.
#[derive(Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: String,
    #[serde(default, alias = "tool_name")]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<Value>,
    #[serde(default)]
    function: Option<WireFunction>,
}

#[derive(Deserialize)]
struct WireFunction {
    #[serde(default)]
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

impl From<WireToolCall> for ToolCallRequest {
    fn from(wire: WireToolCall) -> Self {
        let (name, arguments) = match wire.function {
            Some(function) => (function.name, function.arguments),
            None => (wire.name.unwrap_or_default(), wire.arguments),
        };
        let arguments = match arguments {
            None | Some(Value::Null) => Value::Object(Default::default()),
            Some(Value::String(raw)) if raw.trim().is_empty() => Value::Object(Default::default()),
            // Undecodable strings are passed through so the tool reports them.
            Some(Value::String(raw)) => serde_json::from_str(&raw).unwrap_or(Value::String(raw)),
            Some(other) => other,
        };
        Self {
            id: wire.id,
            tool_name: name,
            arguments,
        }
    }
}

fn deserialize_tool_calls<'de, D>(deserializer: D) -> Result<Vec<ToolCallRequest>, D::Error>
where
    D: Deserializer<'de>,
{
    let wire: Option<Vec<WireToolCall>> = Option::deserialize(deserializer)?;
    Ok(wire
        .unwrap_or_default()
        .into_iter()
        .map(ToolCallRequest::from)
        .collect())
}

/// One event of a streamed chat response, in emission order.
///
/// Exactly one terminal event (`Done` or `Error`) ends every stream produced
/// by the gateway.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Token {
        #[serde(default)]
        content: String,
        #[serde(default)]
        conversation_id: Option<String>,
    },
    Done {
        #[serde(default)]
        content: String,
        #[serde(default)]
        conversation_id: Option<String>,
    },
    Error {
        #[serde(alias = "message")]
        error: String,
    },
}

impl StreamEvent {
    pub fn token(content: impl Into<String>) -> Self {
        Self::Token {
            content: content.into(),
            conversation_id: None,
        }
    }

    pub fn done(content: impl Into<String>) -> Self {
        Self::Done {
            content: content.into(),
            conversation_id: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}

/// A timed segment of a transcription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// The result of a speech-recognition call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcription {
    pub text: String,
    #[serde(default)]
    pub segments: Vec<TranscriptionSegment>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub duration_seconds: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// The liveness of a single backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendHealth {
    pub name: String,
    pub status: HealthStatus,
}

impl BackendHealth {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chat_response_function_calling_shape() {
        let response: ChatResponse = serde_json::from_value(json!({
            "conversation_id": "c-1",
            "message": "",
            "tool_calls": [{
                "id": "call_1",
                "type": "function",
                "function": {"name": "calculate", "arguments": "{\"a\": 1}"}
            }]
        }))
        .unwrap();

        assert_eq!(response.conversation_id, "c-1");
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].id, "call_1");
        assert_eq!(response.tool_calls[0].tool_name, "calculate");
        assert_eq!(response.tool_calls[0].arguments, json!({"a": 1}));
    }

    #[test]
    fn test_chat_response_flat_tool_call_and_defaults() {
        let response: ChatResponse = serde_json::from_value(json!({
            "conversation_id": "c-2",
            "message": "hi",
            "tool_calls": [{"id": "x", "name": "current_time", "arguments": {}}]
        }))
        .unwrap();
        assert_eq!(response.tool_calls[0].tool_name, "current_time");
        assert_eq!(response.tool_calls[0].arguments, json!({}));

        let bare: ChatResponse = serde_json::from_value(json!({"message": "ok"})).unwrap();
        assert!(bare.tool_calls.is_empty());
        assert_eq!(bare.conversation_id, "");

        let null_calls: ChatResponse =
            serde_json::from_value(json!({"message": "ok", "tool_calls": null})).unwrap();
        assert!(null_calls.tool_calls.is_empty());
    }

    #[test]
    fn test_undecodable_arguments_are_preserved() {
        let response: ChatResponse = serde_json::from_value(json!({
            "tool_calls": [{"id": "x", "function": {"name": "t", "arguments": "{not json"}}]
        }))
        .unwrap();
        assert_eq!(
            response.tool_calls[0].arguments,
            Value::String("{not json".to_string())
        );
    }

    #[test]
    fn test_stream_event_decoding() {
        let token: StreamEvent =
            serde_json::from_str(r#"{"type":"token","content":"Hi","conversation_id":"c"}"#)
                .unwrap();
        assert_eq!(
            token,
            StreamEvent::Token {
                content: "Hi".into(),
                conversation_id: Some("c".into())
            }
        );
        assert!(!token.is_terminal());

        let done: StreamEvent = serde_json::from_str(r#"{"type":"done","content":"Hi"}"#).unwrap();
        assert!(done.is_terminal());

        let error: StreamEvent =
            serde_json::from_str(r#"{"type":"error","error":"boom"}"#).unwrap();
        assert_eq!(error, StreamEvent::error("boom"));

        assert!(serde_json::from_str::<StreamEvent>(r#"{"type":"usage"}"#).is_err());
    }

    #[test]
    fn test_chat_request_omits_empty_tools() {
        let body = serde_json::to_value(ChatRequest::new("hello").provider(Some("ollama".into())))
            .unwrap();
        assert_eq!(
            body,
            json!({"message": "hello", "conversation_id": null, "provider": "ollama"})
        );
    }

    #[test]
    fn test_chat_turn_with_tool_calls() {
        let turn: ChatTurn = serde_json::from_value(json!({
            "role": "assistant",
            "content": "",
            "tool_calls": [
                {"id": "call-1", "function": {"name": "calculate", "arguments": "{\"a\": 1}"}}
            ]
        }))
        .unwrap();
        assert_eq!(turn.role, Role::Assistant);
        assert_eq!(turn.tool_call_id, None);
        assert_eq!(turn.tool_calls[0].tool_name, "calculate");
        assert_eq!(turn.tool_calls[0].arguments, json!({"a": 1}));

        let encoded = serde_json::to_value(&turn).unwrap();
        assert_eq!(encoded["tool_calls"][0]["tool_name"], "calculate");
        let decoded: ChatTurn = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, turn);

        let reply = ChatTurn {
            role: Role::Tool,
            content: "3".into(),
            tool_call_id: Some("call-1".into()),
            tool_calls: vec![],
        };
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({"role": "tool", "content": "3", "tool_call_id": "call-1"})
        );
    }
}
