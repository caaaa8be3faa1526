//! Colloquy Core
//!
//! The transport-independent pieces of the conversation orchestrator: the
//! backend gateway, the tool registry and bounded tool loop, and sentence
//! segmentation for progressive speech synthesis.

pub mod gateway;
pub mod sentence;
pub mod tool_loop;
pub mod tools;
pub mod types;

pub use gateway::{EventStream, GatewayConfig, GatewayError, HttpGateway, ServiceGateway};
pub use sentence::split_sentences;
pub use tool_loop::{DEFAULT_MAX_ITERATIONS, ToolLoopOutcome, run_tool_loop};
pub use tools::{Tool, ToolDefinition, ToolError, ToolRegistry};
