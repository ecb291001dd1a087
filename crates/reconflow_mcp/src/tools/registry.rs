//! Tool discovery and dispatch by name.

use super::{
    CancelTool, FileUploadTool, ListTasksTool, McpTool, ResultTool, StartTool, StatusTool,
    ToolContext,
};
use crate::protocol::ToolDefinition;
use anyhow::{anyhow, Result};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn McpTool>>,
}

impl ToolRegistry {
    /// Registry with the full reconciliation tool surface.
    pub fn new() -> Self {
        let mut registry = Self {
            tools: HashMap::new(),
        };
        registry.register(Box::new(StartTool));
        registry.register(Box::new(StatusTool));
        registry.register(Box::new(ResultTool));
        registry.register(Box::new(ListTasksTool));
        registry.register(Box::new(CancelTool));
        registry.register(Box::new(FileUploadTool));
        debug!("registered {} tools", registry.tools.len());
        registry
    }

    fn register(&mut self, tool: Box<dyn McpTool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn list_tools(&self) -> Vec<ToolDefinition> {
        let mut tools: Vec<ToolDefinition> = self.tools.values().map(|t| t.definition()).collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    pub fn call_tool(&self, name: &str, args: Value, ctx: &ToolContext) -> Result<Value> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| anyhow!("unknown tool: {name}"))?;
        tool.execute(args, ctx)
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_has_the_documented_surface() {
        let registry = ToolRegistry::new();
        for tool in [
            "reconciliation_start",
            "reconciliation_status",
            "reconciliation_result",
            "reconciliation_list_tasks",
            "reconciliation_cancel",
            "file_upload",
        ] {
            assert!(registry.has_tool(tool), "missing tool {tool}");
        }
        assert!(!registry.has_tool("unknown"));
    }

    #[test]
    fn every_tool_has_an_object_schema() {
        let registry = ToolRegistry::new();
        for definition in registry.list_tools() {
            assert_eq!(definition.input_schema["type"], "object", "{}", definition.name);
            assert!(!definition.description.is_empty());
        }
    }
}
