//! Bounded agent loop: chat, run requested tools, feed results back, repeat.

use crate::{
    gateway::ServiceGateway,
    tools::ToolRegistry,
    types::{ChatRequest, ToolCallRequest},
};
use tracing::{info, instrument, warn};

pub const DEFAULT_MAX_ITERATIONS: usize = 5;

/// Returned when the chat backend cannot be reached at all.
pub const CHAT_UNAVAILABLE_MESSAGE: &str =
    "I'm having trouble reaching my language model right now. Please try again.";

/// The final text of a tool loop and the conversation it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolLoopOutcome {
    pub message: String,
    pub conversation_id: Option<String>,
}

/// Runs the tool-calling loop for one user message.
///
/// Each iteration sends the pending message with every registered tool
/// definition. A response without tool calls ends the loop with its text.
/// Otherwise each requested tool is executed and the labeled results become
/// the next message.
///
/// After `max_iterations` chat calls the text of the last response is
/// returned as is, even when that response only carried tool calls and its
/// text is empty. A failed chat call ends the loop with
/// [`CHAT_UNAVAILABLE_MESSAGE`].
#[instrument(name = "tool_loop", skip_all, fields(max_iterations = max_iterations))]
pub async fn run_tool_loop(
    gateway: &dyn ServiceGateway,
    tools: &ToolRegistry,
    message: &str,
    conversation_id: Option<String>,
    provider: Option<String>,
    max_iterations: usize,
) -> ToolLoopOutcome {
    let definitions = (!tools.is_empty()).then(|| tools.definitions());
    let mut conversation_id = conversation_id;
    let mut pending = message.to_string();
    let mut last_text = String::new();

    for iteration in 1..=max_iterations {
        let request = ChatRequest::new(pending.clone())
            .conversation_id(conversation_id.clone())
            .provider(provider.clone())
            .tools(definitions.clone());

        let Some(response) = gateway.chat(request).await else {
            warn!(iteration, "Chat backend unavailable, ending tool loop");
            return ToolLoopOutcome {
                message: CHAT_UNAVAILABLE_MESSAGE.to_string(),
                conversation_id,
            };
        };

        if !response.conversation_id.is_empty() {
            conversation_id = Some(response.conversation_id);
        }

        if response.tool_calls.is_empty() {
            return ToolLoopOutcome {
                message: response.message,
                conversation_id,
            };
        }

        info!(iteration, calls = response.tool_calls.len(), "Executing tool calls");
        let mut results = Vec::with_capacity(response.tool_calls.len());
        for call in &response.tool_calls {
            let result = execute_tool_call(tools, call).await;
            results.push(format!("[{}]: {}", call.tool_name, result));
        }
        pending = results.join("\n");
        last_text = response.message;
    }

    warn!(max_iterations, "Tool loop hit its iteration bound");
    ToolLoopOutcome {
        message: last_text,
        conversation_id,
    }
}

/// Executes one tool call. Every failure is reported as text.
async fn execute_tool_call(tools: &ToolRegistry, call: &ToolCallRequest) -> String {
    let Some(tool) = tools.get(&call.tool_name) else {
        warn!(tool = %call.tool_name, "Model requested an unknown tool");
        return format!("Unknown tool: {}", call.tool_name);
    };
    match tool.execute(call.arguments.clone()).await {
        Ok(output) => output,
        Err(e) => {
            warn!(tool = %call.tool_name, error = %e, "Tool execution failed");
            format!("Error executing {}: {}", call.tool_name, e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        gateway::MockServiceGateway,
        tools::{Tool, ToolDefinition, ToolError},
        types::ChatResponse,
    };
    use async_trait::async_trait;
    use mockall::Sequence;
    use serde_json::{Value, json};

    fn tool_call(name: &str, arguments: Value) -> ToolCallRequest {
        ToolCallRequest {
            id: format!("call_{name}"),
            tool_name: name.to_string(),
            arguments,
        }
    }

    fn text_response(message: &str) -> ChatResponse {
        ChatResponse {
            conversation_id: "conv-1".to_string(),
            message: message.to_string(),
            tool_calls: vec![],
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "flaky"
        }

        fn describe(&self) -> ToolDefinition {
            ToolDefinition {
                name: "flaky".into(),
                description: "Always fails".into(),
                parameters: json!({"type": "object"}),
            }
        }

        async fn execute(&self, _args: Value) -> Result<String, ToolError> {
            Err(ToolError::Failed("disk on fire".into()))
        }
    }

    #[tokio::test]
    async fn test_plain_text_response_returns_immediately() {
        let mut gateway = MockServiceGateway::new();
        gateway
            .expect_chat()
            .withf(|request| {
                request.message == "hello"
                    && request.tools.as_ref().is_some_and(|tools| tools.len() == 2)
            })
            .times(1)
            .returning(|_| Some(text_response("Hi there.")));

        let outcome = run_tool_loop(
            &gateway,
            &ToolRegistry::with_builtin_tools(),
            "hello",
            None,
            Some("ollama".into()),
            DEFAULT_MAX_ITERATIONS,
        )
        .await;

        assert_eq!(outcome.message, "Hi there.");
        assert_eq!(outcome.conversation_id.as_deref(), Some("conv-1"));
    }

    #[tokio::test]
    async fn test_empty_registry_sends_no_tools() {
        let mut gateway = MockServiceGateway::new();
        gateway
            .expect_chat()
            .withf(|request| request.tools.is_none())
            .times(1)
            .returning(|_| Some(text_response("ok")));

        let outcome =
            run_tool_loop(&gateway, &ToolRegistry::new(), "hi", None, None, 3).await;
        assert_eq!(outcome.message, "ok");
    }

    #[tokio::test]
    async fn test_tool_results_are_fed_back() {
        let mut gateway = MockServiceGateway::new();
        let mut seq = Sequence::new();
        gateway
            .expect_chat()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Some(ChatResponse {
                    conversation_id: "conv-42".into(),
                    message: String::new(),
                    tool_calls: vec![
                        tool_call("calculate", json!({"a": 6, "b": 7, "operation": "multiply"})),
                        tool_call("teleport", json!({})),
                        tool_call("flaky", json!({})),
                    ],
                })
            });
        gateway
            .expect_chat()
            .withf(|request| {
                request.conversation_id.as_deref() == Some("conv-42")
                    && request.message
                        == "[calculate]: 42\n[teleport]: Unknown tool: teleport\n[flaky]: Error executing flaky: disk on fire"
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Some(text_response("The answer is 42.")));

        let mut tools = ToolRegistry::with_builtin_tools();
        tools.register(FailingTool);

        let outcome = run_tool_loop(&gateway, &tools, "what is 6*7", None, None, 5).await;
        assert_eq!(outcome.message, "The answer is 42.");
    }

    #[tokio::test]
    async fn test_iteration_bound_returns_last_text_even_if_empty() {
        let mut gateway = MockServiceGateway::new();
        gateway.expect_chat().times(5).returning(|_| {
            Some(ChatResponse {
                conversation_id: "conv-loop".into(),
                message: String::new(),
                tool_calls: vec![tool_call("current_time", json!({}))],
            })
        });

        let outcome = run_tool_loop(
            &gateway,
            &ToolRegistry::with_builtin_tools(),
            "what time is it",
            None,
            None,
            DEFAULT_MAX_ITERATIONS,
        )
        .await;

        assert_eq!(outcome.message, "");
        assert_eq!(outcome.conversation_id.as_deref(), Some("conv-loop"));
    }

    #[tokio::test]
    async fn test_iteration_bound_keeps_text_of_last_response() {
        let mut gateway = MockServiceGateway::new();
        gateway.expect_chat().times(2).returning(|_| {
            Some(ChatResponse {
                conversation_id: String::new(),
                message: "Let me check.".into(),
                tool_calls: vec![tool_call("current_time", json!({}))],
            })
        });

        let outcome = run_tool_loop(
            &gateway,
            &ToolRegistry::with_builtin_tools(),
            "time?",
            Some("existing".into()),
            None,
            2,
        )
        .await;

        assert_eq!(outcome.message, "Let me check.");
        assert_eq!(outcome.conversation_id.as_deref(), Some("existing"));
    }

    #[tokio::test]
    async fn test_chat_failure_returns_fallback() {
        let mut gateway = MockServiceGateway::new();
        let mut seq = Sequence::new();
        gateway
            .expect_chat()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Some(ChatResponse {
                    conversation_id: "conv-5".into(),
                    message: String::new(),
                    tool_calls: vec![tool_call("current_time", json!({}))],
                })
            });
        gateway
            .expect_chat()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| None);

        let outcome = run_tool_loop(
            &gateway,
            &ToolRegistry::with_builtin_tools(),
            "time?",
            None,
            None,
            5,
        )
        .await;

        assert_eq!(outcome.message, CHAT_UNAVAILABLE_MESSAGE);
        assert_eq!(outcome.conversation_id.as_deref(), Some("conv-5"));
    }

    #[tokio::test]
    async fn test_zero_iterations_makes_no_calls() {
        let gateway = MockServiceGateway::new();
        let outcome = run_tool_loop(&gateway, &ToolRegistry::new(), "hi", None, None, 0).await;
        assert_eq!(outcome.message, "");
        assert_eq!(outcome.conversation_id, None);
    }
}
