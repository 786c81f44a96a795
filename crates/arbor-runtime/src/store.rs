//! In-memory authoritative store of session nodes and the active-path stack.
//!
//! The store is a plain single-threaded structure; the session manager
//! serializes access behind one coarse lock. Invariants maintained here:
//!
//! - node ids are unique; every id in any `children` list exists in the map
//! - `depth == 0` iff `parent_id` is `None`; a child's depth is its
//!   parent's depth + 1 (checked at link time)
//! - terminal statuses are never left
//! - only known ids can be pushed onto the stack

use std::collections::HashMap;

use arbor_core::ids::SessionId;
use arbor_core::session::{SessionNode, SessionStatus};

use crate::errors::SessionError;

/// Session node map plus the active-path stack.
#[derive(Debug, Default)]
pub struct SessionStore {
    nodes: HashMap<SessionId, SessionNode>,
    stack: Vec<SessionId>,
}

impl SessionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ── Nodes ────────────────────────────────────────────────────────

    /// Insert a node. Fails on duplicate id.
    pub fn add_node(&mut self, node: SessionNode) -> Result<(), SessionError> {
        if self.nodes.contains_key(&node.id) {
            return Err(SessionError::DuplicateSession(node.id));
        }
        let _ = self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Look up a node.
    #[must_use]
    pub fn get_node(&self, id: &SessionId) -> Option<&SessionNode> {
        self.nodes.get(id)
    }

    /// Record `child` under `parent`'s children. A `None` parent is a no-op
    /// (root). Idempotent for an already-linked pair.
    pub fn link_child(
        &mut self,
        parent: Option<&SessionId>,
        child: &SessionId,
    ) -> Result<(), SessionError> {
        let Some(parent) = parent else {
            return Ok(());
        };
        if !self.nodes.contains_key(child) {
            return Err(SessionError::SessionNotFound(child.clone()));
        }
        let parent_node = self
            .nodes
            .get_mut(parent)
            .ok_or_else(|| SessionError::ParentNotFound(parent.clone()))?;
        if !parent_node.children.contains(child) {
            parent_node.children.push(child.clone());
        }
        Ok(())
    }

    /// Set a node's status, stamping `updated_at`. A terminal node never
    /// changes status again.
    pub fn set_status(
        &mut self,
        id: &SessionId,
        status: SessionStatus,
    ) -> Result<(), SessionError> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| SessionError::SessionNotFound(id.clone()))?;
        if node.status.is_terminal() && node.status != status {
            return Err(SessionError::InvalidStatus {
                id: id.clone(),
                from: node.status,
                to: status,
            });
        }
        node.status = status;
        node.updated_at = chrono::Utc::now().timestamp_millis();
        Ok(())
    }

    // ── Stack ────────────────────────────────────────────────────────

    /// Push a session onto the active stack. Fails for unknown ids.
    pub fn push(&mut self, id: &SessionId) -> Result<(), SessionError> {
        if !self.nodes.contains_key(id) {
            return Err(SessionError::SessionNotFound(id.clone()));
        }
        self.stack.push(id.clone());
        Ok(())
    }

    /// Pop the active session. Popping an empty stack is a no-op.
    pub fn pop(&mut self) -> Option<SessionId> {
        self.stack.pop()
    }

    /// The active session (top of the stack).
    #[must_use]
    pub fn active(&self) -> Option<&SessionId> {
        self.stack.last()
    }

    /// Copy of the stack, bottom first.
    #[must_use]
    pub fn stack(&self) -> Vec<SessionId> {
        self.stack.clone()
    }

    /// Stack height.
    #[must_use]
    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// All nodes, ordered by creation time.
    #[must_use]
    pub fn tree(&self) -> Vec<SessionNode> {
        let mut nodes: Vec<SessionNode> = self.nodes.values().cloned().collect();
        nodes.sort_by_key(|n| (n.created_at, n.id.as_str().to_owned()));
        nodes
    }

    /// Names from the root down to `id`. For a node whose parent chain is
    /// broken, returns the names discoverable from the node upward.
    #[must_use]
    pub fn breadcrumb(&self, id: &SessionId) -> Vec<String> {
        let mut names = Vec::new();
        let mut cursor = self.nodes.get(id);
        while let Some(node) = cursor {
            names.push(node.name.clone());
            cursor = node.parent_id.as_ref().and_then(|p| self.nodes.get(p));
        }
        names.reverse();
        names
    }

    /// The id of the root above `id` (or `id` itself for roots).
    #[must_use]
    pub fn root_of(&self, id: &SessionId) -> Option<SessionId> {
        let mut cursor = self.nodes.get(id)?;
        while let Some(parent_id) = &cursor.parent_id {
            cursor = self.nodes.get(parent_id)?;
        }
        Some(cursor.id.clone())
    }

    /// Child ids of `id`, insertion order.
    #[must_use]
    pub fn children(&self, id: &SessionId) -> Vec<SessionId> {
        self.nodes
            .get(id)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    /// Parent id of `id`.
    #[must_use]
    pub fn parent(&self, id: &SessionId) -> Option<SessionId> {
        self.nodes.get(id).and_then(|n| n.parent_id.clone())
    }

    /// Depth of `id`.
    pub fn depth(&self, id: &SessionId) -> Result<u32, SessionError> {
        self.nodes
            .get(id)
            .map(|n| n.depth)
            .ok_or_else(|| SessionError::SessionNotFound(id.clone()))
    }

    /// Whether `id` exists.
    #[must_use]
    pub fn contains(&self, id: &SessionId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the store holds no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Wipe everything. Test hook; not used in production flows.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.stack.clear();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
