//! MCP tool implementations.
//!
//! Tools are synchronous: they touch the task registry (brief lock), the
//! executor queue, or the upload directory, and return JSON. Anything
//! long-running happens on the worker pool, never inside a tool call.

mod reconciliation;
mod registry;
mod upload;

pub use reconciliation::{CancelTool, ListTasksTool, ResultTool, StartTool, StatusTool};
pub use registry::ToolRegistry;
pub use upload::FileUploadTool;

use crate::config::ServerConfig;
use crate::protocol::ToolDefinition;
use crate::tasks::{TaskExecutorHandle, TaskRegistry};
use anyhow::Result;
use serde_json::Value;
use std::sync::Arc;

/// Shared state handed to every tool call.
#[derive(Clone)]
pub struct ToolContext {
    pub registry: Arc<TaskRegistry>,
    pub executor: TaskExecutorHandle,
    pub config: Arc<ServerConfig>,
}

/// Trait implemented by every MCP tool.
pub trait McpTool: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// JSON Schema for the tool's arguments.
    fn input_schema(&self) -> Value;

    fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}
