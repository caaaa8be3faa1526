//! Tool Registry
//!
//! Tools are capabilities the language model can invoke during a tool loop.
//! Each one describes its own argument schema and turns structured arguments
//! into a text result. The registry is populated once at startup and is
//! read-only afterwards.

use async_trait::async_trait;
use chrono::{FixedOffset, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use std::{collections::BTreeMap, sync::Arc};
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(#[from] serde_json::Error),
    #[error("{0}")]
    Failed(String),
}

/// The description of a tool advertised to the chat backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object.
    pub parameters: Value,
}

impl ToolDefinition {
    /// Builds a definition whose parameters are the JSON Schema of `T`.
    pub fn for_args<T: JsonSchema>(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters: serde_json::to_value(schemars::schema_for!(T)).unwrap_or_default(),
        }
    }

    /// The function-calling wire shape expected by the chat backend.
    pub fn to_function(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// A capability the language model can call by name.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn describe(&self) -> ToolDefinition;

    /// Runs the tool. Failures are reported to the model as text by the caller.
    async fn execute(&self, args: Value) -> Result<String, ToolError>;
}

/// Name-indexed lookup table of the available tools.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in tool.
    pub fn with_builtin_tools() -> Self {
        let mut registry = Self::new();
        registry.register(CurrentTimeTool);
        registry.register(CalculateTool);
        registry
    }

    /// Adds a tool, replacing any previous tool with the same name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), Arc::new(tool)).is_some() {
            warn!(tool = %name, "Replaced an already registered tool");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Function-calling definitions for every registered tool, ordered by name.
    pub fn definitions(&self) -> Vec<Value> {
        self.tools
            .values()
            .map(|tool| tool.describe().to_function())
            .collect()
    }
}

fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, ToolError> {
    Ok(serde_json::from_value(args)?)
}

// --- Built-in tools ---

#[derive(Deserialize, JsonSchema, Debug)]
pub struct CurrentTimeArgs {
    /// Offset from UTC in whole hours. Defaults to UTC.
    #[serde(default)]
    #[schemars(description = "Offset from UTC in whole hours, e.g. -5 or 2. Omit for UTC.")]
    pub utc_offset_hours: Option<i32>,
}

/// Reports the current date and time.
pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "current_time"
    }

    fn describe(&self) -> ToolDefinition {
        ToolDefinition::for_args::<CurrentTimeArgs>(
            self.name(),
            "Get the current date and time, optionally at a fixed UTC offset.",
        )
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let args: CurrentTimeArgs = parse_args(args)?;
        let hours = args.utc_offset_hours.unwrap_or(0);
        let offset = hours
            .checked_mul(3600)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| ToolError::Failed(format!("UTC offset out of range: {hours}")))?;
        info!(utc_offset_hours = hours, "Executing tool 'current_time'");
        Ok(Utc::now().with_timezone(&offset).to_rfc3339())
    }
}

#[derive(Deserialize, JsonSchema, Debug, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Add,
    Subtract,
    Multiply,
    Divide,
}

#[derive(Deserialize, JsonSchema, Debug)]
pub struct CalculateArgs {
    pub a: f64,
    pub b: f64,
    #[schemars(description = "One of 'add', 'subtract', 'multiply' or 'divide'")]
    pub operation: Operation,
}

/// Evaluates one binary arithmetic operation.
pub struct CalculateTool;

#[async_trait]
impl Tool for CalculateTool {
    fn name(&self) -> &str {
        "calculate"
    }

    fn describe(&self) -> ToolDefinition {
        ToolDefinition::for_args::<CalculateArgs>(
            self.name(),
            "Apply an arithmetic operation to two numbers and return the result.",
        )
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let CalculateArgs { a, b, operation } = parse_args(args)?;
        info!(a, b, ?operation, "Executing tool 'calculate'");
        let result = match operation {
            Operation::Add => a + b,
            Operation::Subtract => a - b,
            Operation::Multiply => a * b,
            Operation::Divide if b == 0.0 => {
                return Err(ToolError::Failed("division by zero".to_string()));
            }
            Operation::Divide => a / b,
        };
        Ok(result.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    #[test]
    fn test_registry_lookup_and_definitions() {
        let registry = ToolRegistry::with_builtin_tools();
        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.names().collect::<Vec<_>>(),
            vec!["calculate", "current_time"]
        );
        assert!(registry.get("calculate").is_some());
        assert!(registry.get("web_search").is_none());

        let definitions = registry.definitions();
        assert_eq!(definitions[0]["type"], "function");
        assert_eq!(definitions[0]["function"]["name"], "calculate");
        assert_eq!(
            definitions[0]["function"]["parameters"]["type"],
            "object",
            "parameters should be an object schema"
        );
        assert!(definitions[0]["function"]["parameters"]["properties"]["operation"].is_object());
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut registry = ToolRegistry::new();
        assert!(registry.is_empty());
        registry.register(CalculateTool);
        registry.register(CalculateTool);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_calculate() {
        let tool = CalculateTool;
        let sum = tool
            .execute(json!({"a": 2, "b": 3.5, "operation": "add"}))
            .await
            .unwrap();
        assert_eq!(sum, "5.5");

        let quotient = tool
            .execute(json!({"a": 9, "b": 3, "operation": "divide"}))
            .await
            .unwrap();
        assert_eq!(quotient, "3");
    }

    #[tokio::test]
    async fn test_calculate_failures() {
        let tool = CalculateTool;
        let err = tool
            .execute(json!({"a": 1, "b": 0, "operation": "divide"}))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "division by zero");

        let err = tool
            .execute(json!({"a": 1, "operation": "modulo"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));

        let err = tool
            .execute(Value::String("{broken".into()))
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("invalid arguments"));
    }

    #[tokio::test]
    async fn test_current_time() {
        let tool = CurrentTimeTool;
        let utc = tool.execute(json!({})).await.unwrap();
        let parsed = DateTime::parse_from_rfc3339(&utc).unwrap();
        assert_eq!(parsed.offset().local_minus_utc(), 0);

        let shifted = tool.execute(json!({"utc_offset_hours": -5})).await.unwrap();
        let parsed = DateTime::parse_from_rfc3339(&shifted).unwrap();
        assert_eq!(parsed.offset().local_minus_utc(), -5 * 3600);

        let err = tool
            .execute(json!({"utc_offset_hours": 48}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Failed(_)));
    }
}
