//! Runtime error types.

use arbor_core::errors::{ErrorClass, Severity};
use arbor_core::ids::SessionId;
use arbor_core::session::SessionStatus;

/// Structural misuse of the session API. Always critical: the retry engine
/// never re-attempts these.
#[derive(Clone, Debug, thiserror::Error)]
pub enum SessionError {
    /// A node with this id already exists.
    #[error("Duplicate session: {0}")]
    DuplicateSession(SessionId),

    /// No node with this id exists.
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    /// The requested parent does not exist.
    #[error("Parent session not found: {0}")]
    ParentNotFound(SessionId),

    /// No context registered for this session.
    #[error("Context not found for session: {0}")]
    ContextNotFound(SessionId),

    /// Creating the session would exceed its configured depth limit.
    #[error("Max depth exceeded: depth {depth} is not below maxDepth {max_depth}")]
    MaxDepthExceeded {
        /// Depth the new session would occupy.
        depth: u32,
        /// Configured limit for the subtree.
        max_depth: u32,
    },

    /// The requested status transition is not allowed.
    #[error("Invalid status transition for {id}: {from} -> {to}")]
    InvalidStatus {
        /// Session whose transition was rejected.
        id: SessionId,
        /// Current status.
        from: SessionStatus,
        /// Requested status.
        to: SessionStatus,
    },
}

impl SessionError {
    /// Stable machine-readable code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateSession(_) => "DUPLICATE_SESSION",
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Self::ParentNotFound(_) => "PARENT_NOT_FOUND",
            Self::ContextNotFound(_) => "CONTEXT_NOT_FOUND",
            Self::MaxDepthExceeded { .. } => "MAX_DEPTH_EXCEEDED",
            Self::InvalidStatus { .. } => "INVALID_STATUS",
        }
    }
}

impl ErrorClass for SessionError {
    fn kind(&self) -> &str {
        "session"
    }

    fn severity(&self) -> Severity {
        Severity::Critical
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
