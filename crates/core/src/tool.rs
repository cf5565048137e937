//! Tool trait — the abstraction over agent capabilities.
//!
//! Concrete tools (web search, code execution, ...) live with the embedding
//! application. The engine only knows them by name and calls them through
//! this trait when an agent's output asks for one.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::ToolError;

/// A request to execute a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON object
    #[serde(default, alias = "params")]
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

/// The output of a tool execution, rendered back into the agent's output.
pub type ToolResult = serde_json::Value;

/// The core Tool trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "google_search").
    fn name(&self) -> &str;

    /// A description of what this tool does (listed in the agent's prompt).
    fn description(&self) -> &str;

    /// Execute the tool with the given arguments.
    async fn call(&self, arguments: serde_json::Value) -> std::result::Result<ToolResult, ToolError>;
}

/// A registry of available tools.
///
/// Shared by every agent; an agent may only call the tools listed in its
/// descriptor.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// `- name: description` lines for the given capability names, skipping
    /// names that are not registered.
    pub fn describe(&self, names: &[String]) -> Vec<String> {
        names
            .iter()
            .filter_map(|n| self.tools.get(n))
            .map(|t| format!("- {}: {}", t.name(), t.description()))
            .collect()
    }

    /// Execute a tool call.
    pub async fn execute(&self, call: &ToolCall) -> std::result::Result<ToolResult, ToolError> {
        let tool = self
            .get(&call.name)
            .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;
        tool.call(call.arguments.clone()).await
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}
