//! Session data model: status, config, and tree nodes.

use serde::{Deserialize, Serialize};

use crate::ids::SessionId;

/// Lifecycle status of a session.
///
/// `Completed` and `Aborted` are terminal: a node never transitions out of
/// them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Session is live and may process messages.
    Active,
    /// Session is suspended; `resume` returns it to `Active`.
    Paused,
    /// Session finished normally (terminal).
    Completed,
    /// Session was terminated early (terminal).
    Aborted,
}

impl SessionStatus {
    /// Whether this status is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => f.write_str("active"),
            Self::Paused => f.write_str("paused"),
            Self::Completed => f.write_str("completed"),
            Self::Aborted => f.write_str("aborted"),
        }
    }
}

/// Immutable per-session configuration, fixed at creation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubagentSessionConfig {
    /// Enables bidirectional messaging and a live message queue.
    pub interactive: bool,
    /// Maximum allowed depth for this subtree (root = 0). Must be ≥ 1.
    pub max_depth: u32,
    /// When true, creation pushes the new session onto the active stack.
    pub auto_switch: bool,
    /// When true, the child context copies every parent key at creation.
    /// One-shot copy; later parent mutations do not propagate.
    pub inherit_context: bool,
    /// Advisory flag routed to listeners; the core does not enforce it.
    pub allow_user_interaction: bool,
}

impl Default for SubagentSessionConfig {
    fn default() -> Self {
        Self {
            interactive: false,
            max_depth: 1,
            auto_switch: false,
            inherit_context: false,
            allow_user_interaction: false,
        }
    }
}

/// A node in the session tree.
///
/// Nodes are owned by the session store and mutated only by the session
/// manager (status, `updated_at`, `children`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionNode {
    /// Opaque unique id.
    pub id: SessionId,
    /// Human label; duplicates allowed.
    pub name: String,
    /// Name of the subagent definition driving this session, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subagent_name: Option<String>,
    /// Distance from the root (root = 0). Equals the parent's depth + 1.
    pub depth: u32,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Parent id; `None` iff `depth == 0`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<SessionId>,
    /// Child ids in insertion order.
    pub children: Vec<SessionId>,
    /// Creation time, unix millis.
    pub created_at: i64,
    /// Last mutation time, unix millis.
    pub updated_at: i64,
    /// Copy of the config supplied at creation.
    pub config: SubagentSessionConfig,
}

impl SessionNode {
    /// Build a fresh `Active` node. Tree linkage is the store's job.
    #[must_use]
    pub fn new(
        id: SessionId,
        name: impl Into<String>,
        subagent_name: Option<String>,
        depth: u32,
        parent_id: Option<SessionId>,
        config: SubagentSessionConfig,
    ) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id,
            name: name.into(),
            subagent_name,
            depth,
            status: SessionStatus::Active,
            parent_id,
            children: Vec::new(),
            created_at: now,
            updated_at: now,
            config,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
