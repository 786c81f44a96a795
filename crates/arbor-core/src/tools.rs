//! Tool contracts and the tool registry.
//!
//! The runtime treats the tool surface as an opaque capability provider: it
//! asks for [`FunctionDeclaration`]s to hand to the model and dispatches
//! [`FunctionCall`]s back through [`SessionTool::execute`]. The
//! [`ToolRegistry`] maps tool names to their implementations.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Name of the built-in delegation tool. Sessions whose config does not
/// allow nested tasks have it filtered from their declaration list.
pub const DELEGATION_TOOL_NAME: &str = "spawn_subagent";

/// Schema of a callable tool, handed to the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDeclaration {
    /// Tool name, unique within a registry.
    pub name: String,
    /// Human-readable description for the model.
    pub description: String,
    /// JSON-schema parameter object.
    pub parameters: Value,
}

/// A function invocation requested by the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCall {
    /// Call id, when the model supplies one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Tool name.
    pub name: String,
    /// Parsed arguments.
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

/// Output of a successful tool execution.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutput {
    /// Text content returned to the model/user.
    pub content: String,
    /// Optional structured metadata for listeners.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ToolOutput {
    /// Build a plain-text output.
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: None,
        }
    }
}

/// Errors produced by tool execution.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// The arguments did not match the declared schema.
    #[error("Invalid arguments for {tool}: {message}")]
    InvalidArguments {
        /// Tool name.
        tool: String,
        /// What was wrong.
        message: String,
    },

    /// No tool with the requested name is registered.
    #[error("Unknown tool: {0}")]
    Unknown(String),

    /// The invocation was cancelled.
    #[error("Tool execution cancelled")]
    Cancelled,

    /// The tool itself failed.
    #[error("Tool {tool} failed: {message}")]
    Execution {
        /// Tool name.
        tool: String,
        /// Failure description.
        message: String,
    },
}

/// Per-invocation context passed to [`SessionTool::execute`].
#[derive(Clone, Debug)]
pub struct ToolInvocation {
    /// Session on whose behalf the tool runs.
    pub session_id: String,
    /// Prompt correlation id of the requesting round.
    pub prompt_id: String,
    /// Cancellation token; long-running tools should observe it.
    pub cancel: CancellationToken,
}

/// One callable tool.
#[async_trait]
pub trait SessionTool: Send + Sync {
    /// Tool name, unique within a registry.
    fn name(&self) -> &str;

    /// Schema handed to the model.
    fn declaration(&self) -> FunctionDeclaration;

    /// Whether the host must approve each invocation before it runs.
    fn requires_approval(&self) -> bool {
        false
    }

    /// Execute one invocation.
    async fn execute(
        &self,
        arguments: Map<String, Value>,
        ctx: ToolInvocation,
    ) -> Result<ToolOutput, ToolError>;
}

/// Central registry mapping tool names to their implementations.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn SessionTool>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Overwrites any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn SessionTool>) {
        debug!(tool_name = tool.name(), "tool registered");
        let _ = self.tools.insert(tool.name().to_owned(), tool);
    }

    /// Look up a tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn SessionTool>> {
        self.tools.get(name).cloned()
    }

    /// Remove a tool by name, returning it if it existed.
    pub fn remove(&mut self, name: &str) -> Option<Arc<dyn SessionTool>> {
        self.tools.remove(name)
    }

    /// Whether a tool with the given name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// All declarations, sorted by tool name for a stable model prompt.
    #[must_use]
    pub fn declarations(&self) -> Vec<FunctionDeclaration> {
        let mut decls: Vec<FunctionDeclaration> =
            self.tools.values().map(|t| t.declaration()).collect();
        decls.sort_by(|a, b| a.name.cmp(&b.name));
        decls
    }

    /// Declarations restricted to the given names, preserving registry
    /// sort order. Unknown names are ignored.
    #[must_use]
    pub fn declarations_filtered(&self, names: &[String]) -> Vec<FunctionDeclaration> {
        self.declarations()
            .into_iter()
            .filter(|d| names.iter().any(|n| n == &d.name))
            .collect()
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
