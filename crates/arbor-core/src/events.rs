//! Event types broadcast by the session runtime.
//!
//! One tagged union, [`ArborEvent`], covers two families:
//!
//! - **Session lifecycle** events emitted by the session manager
//!   (started/switched/paused/resumed/completed/aborted, user and subagent
//!   messages).
//! - **Subagent** events emitted by the interactive scope while it drives
//!   rounds (round boundaries, streamed text, tool calls/results, finish).
//!
//! Every variant carries a [`BaseEvent`] with the owning `session_id` and an
//! RFC-3339 timestamp. Listeners observing multiple sessions use the
//! `session_id` to reassemble per-session narratives; no cross-session
//! ordering is guaranteed.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::SessionNode;
use crate::tools::FunctionCall;

// ─────────────────────────────────────────────────────────────────────────────
// BaseEvent and supporting types
// ─────────────────────────────────────────────────────────────────────────────

/// Common fields for all events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseEvent {
    /// Session this event belongs to.
    pub session_id: String,
    /// ISO 8601 timestamp.
    pub timestamp: String,
}

impl BaseEvent {
    /// Create a new base event with the current UTC timestamp.
    #[must_use]
    pub fn now(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Accumulated token usage for one session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenStats {
    /// Rounds completed.
    pub rounds: u32,
    /// Input tokens across all rounds.
    pub input_tokens: u64,
    /// Output tokens across all rounds.
    pub output_tokens: u64,
    /// Total tokens reported by the client (may exceed input + output).
    pub total_tokens: u64,
}

/// Why an interactive scope stopped running.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminateMode {
    /// Session ended through the normal lifecycle.
    Normal,
    /// Chat construction or an unrecoverable error ended the scope.
    Error,
    /// External cancellation ended the scope.
    Cancelled,
    /// The round limit was reached.
    MaxTurns,
    /// The wall-clock limit was reached.
    MaxTime,
}

impl std::fmt::Display for TerminateMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => f.write_str("normal"),
            Self::Error => f.write_str("error"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::MaxTurns => f.write_str("max_turns"),
            Self::MaxTime => f.write_str("max_time"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ArborEvent
// ─────────────────────────────────────────────────────────────────────────────

/// Event broadcast to bus listeners.
///
/// Emission is synchronous and ordered per session; hosts rely on the exact
/// type strings and field names.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ArborEvent {
    // -- Session lifecycle --
    /// A session was created.
    #[serde(rename = "session_started")]
    SessionStarted {
        /// Base fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Full node snapshot at creation.
        node: SessionNode,
    },

    /// The active session changed; `base.session_id` is the new active id.
    #[serde(rename = "session_switched")]
    SessionSwitched {
        /// Base fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Previously active session, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        from: Option<String>,
    },

    /// A session was paused.
    #[serde(rename = "session_paused")]
    SessionPaused {
        /// Base fields.
        #[serde(flatten)]
        base: BaseEvent,
    },

    /// A paused session was resumed.
    #[serde(rename = "session_resumed")]
    SessionResumed {
        /// Base fields.
        #[serde(flatten)]
        base: BaseEvent,
    },

    /// A session reached the `completed` terminal state.
    #[serde(rename = "session_completed")]
    SessionCompleted {
        /// Base fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Result value supplied by the caller.
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        /// Why the session terminated.
        #[serde(rename = "terminateReason", skip_serializing_if = "Option::is_none")]
        terminate_reason: Option<String>,
    },

    /// A session reached the `aborted` terminal state.
    #[serde(rename = "session_aborted")]
    SessionAborted {
        /// Base fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Abort reason supplied by the caller.
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// A user message was routed to a session.
    #[serde(rename = "user_message_to_session")]
    UserMessageToSession {
        /// Base fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Message text.
        text: String,
    },

    /// Subagent output surfaced to the user. Carries either one streamed
    /// chunk or the round's final text, never both.
    #[serde(rename = "subagent_message_to_user")]
    SubagentMessageToUser {
        /// Base fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// One streamed chunk.
        #[serde(rename = "textChunk", skip_serializing_if = "Option::is_none")]
        text_chunk: Option<String>,
        /// Trimmed full text of the round.
        #[serde(rename = "finalText", skip_serializing_if = "Option::is_none")]
        final_text: Option<String>,
    },

    // -- Subagent scope --
    /// The interactive scope started for a session.
    #[serde(rename = "subagent_start")]
    SubagentStart {
        /// Base fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Subagent definition name, if any.
        #[serde(rename = "subagentName", skip_serializing_if = "Option::is_none")]
        subagent_name: Option<String>,
    },

    /// A round (one user message → one model response) began.
    #[serde(rename = "round_start")]
    RoundStart {
        /// Base fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// 1-based round number within the session.
        round: u32,
        /// Prompt correlation id (`<root>#<session>#<round>`).
        #[serde(rename = "promptId")]
        prompt_id: String,
    },

    /// Streamed model text, in arrival order within a round.
    #[serde(rename = "stream_text")]
    StreamText {
        /// Base fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Text fragment.
        text: String,
    },

    /// The model requested a tool invocation.
    #[serde(rename = "tool_call")]
    ToolCall {
        /// Base fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// The requested call.
        call: FunctionCall,
    },

    /// A tool invocation is waiting for host approval.
    #[serde(rename = "tool_waiting_approval")]
    ToolWaitingApproval {
        /// Base fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Tool call id, when the model supplied one.
        #[serde(rename = "callId", skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
        /// Tool name.
        name: String,
    },

    /// A tool invocation finished (successfully or not).
    #[serde(rename = "tool_result")]
    ToolResult {
        /// Base fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Tool call id, when the model supplied one.
        #[serde(rename = "callId", skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
        /// Tool name.
        name: String,
        /// Whether dispatch succeeded.
        success: bool,
        /// Tool output on success.
        #[serde(skip_serializing_if = "Option::is_none")]
        output: Option<String>,
        /// Error description on failure.
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// A round finished; all of the round's events precede this.
    #[serde(rename = "round_end")]
    RoundEnd {
        /// Base fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// 1-based round number.
        round: u32,
    },

    /// The interactive scope stopped; always emitted, success or not.
    #[serde(rename = "subagent_finish")]
    SubagentFinish {
        /// Base fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Accumulated token usage.
        stats: TokenStats,
        /// How the scope ended.
        #[serde(rename = "terminateMode")]
        terminate_mode: TerminateMode,
    },

    /// The scope hit a chat or dispatch error; the session stays alive.
    #[serde(rename = "subagent_error")]
    SubagentError {
        /// Base fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Error description.
        message: String,
    },
}

impl ArborEvent {
    /// Get the base fields.
    #[must_use]
    pub fn base(&self) -> &BaseEvent {
        match self {
            Self::SessionStarted { base, .. }
            | Self::SessionSwitched { base, .. }
            | Self::SessionPaused { base, .. }
            | Self::SessionResumed { base, .. }
            | Self::SessionCompleted { base, .. }
            | Self::SessionAborted { base, .. }
            | Self::UserMessageToSession { base, .. }
            | Self::SubagentMessageToUser { base, .. }
            | Self::SubagentStart { base, .. }
            | Self::RoundStart { base, .. }
            | Self::StreamText { base, .. }
            | Self::ToolCall { base, .. }
            | Self::ToolWaitingApproval { base, .. }
            | Self::ToolResult { base, .. }
            | Self::RoundEnd { base, .. }
            | Self::SubagentFinish { base, .. }
            | Self::SubagentError { base, .. } => base,
        }
    }

    /// Get the session ID.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.base().session_id
    }

    /// Get the timestamp.
    #[must_use]
    pub fn timestamp(&self) -> &str {
        &self.base().timestamp
    }

    /// Get the event type string (for type discrimination).
    #[must_use]
    pub fn event_type(&self) -> &str {
        match self {
            Self::SessionStarted { .. } => "session_started",
            Self::SessionSwitched { .. } => "session_switched",
            Self::SessionPaused { .. } => "session_paused",
            Self::SessionResumed { .. } => "session_resumed",
            Self::SessionCompleted { .. } => "session_completed",
            Self::SessionAborted { .. } => "session_aborted",
            Self::UserMessageToSession { .. } => "user_message_to_session",
            Self::SubagentMessageToUser { .. } => "subagent_message_to_user",
            Self::SubagentStart { .. } => "subagent_start",
            Self::RoundStart { .. } => "round_start",
            Self::StreamText { .. } => "stream_text",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolWaitingApproval { .. } => "tool_waiting_approval",
            Self::ToolResult { .. } => "tool_result",
            Self::RoundEnd { .. } => "round_end",
            Self::SubagentFinish { .. } => "subagent_finish",
            Self::SubagentError { .. } => "subagent_error",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::SessionId;
    use crate::session::{SessionNode, SubagentSessionConfig};

    #[test]
    fn base_event_now_has_timestamp() {
        let base = BaseEvent::now("s1");
        assert_eq!(base.session_id, "s1");
        assert!(base.timestamp.contains('T'));
    }

    #[test]
    fn event_type_strings() {
        let e = ArborEvent::SessionPaused {
            base: BaseEvent::now("s1"),
        };
        assert_eq!(e.event_type(), "session_paused");
        assert_eq!(e.session_id(), "s1");
    }

    #[test]
    fn serde_tag_and_flatten() {
        let e = ArborEvent::StreamText {
            base: BaseEvent::now("s1"),
            text: "hello".into(),
        };
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["type"], "stream_text");
        assert_eq!(json["sessionId"], "s1");
        assert_eq!(json["text"], "hello");
    }

    #[test]
    fn subagent_message_chunk_omits_final() {
        let e = ArborEvent::SubagentMessageToUser {
            base: BaseEvent::now("s1"),
            text_chunk: Some("chunk".into()),
            final_text: None,
        };
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["textChunk"], "chunk");
        assert!(json.get("finalText").is_none());
    }

    #[test]
    fn session_started_carries_node() {
        let node = SessionNode::new(
            SessionId::from("root-abc123"),
            "root",
            None,
            0,
            None,
            SubagentSessionConfig::default(),
        );
        let e = ArborEvent::SessionStarted {
            base: BaseEvent::now("root-abc123"),
            node,
        };
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["node"]["name"], "root");
        assert_eq!(json["node"]["status"], "active");
    }

    #[test]
    fn event_serde_roundtrip() {
        let e = ArborEvent::SubagentFinish {
            base: BaseEvent::now("s1"),
            stats: TokenStats {
                rounds: 2,
                input_tokens: 100,
                output_tokens: 40,
                total_tokens: 140,
            },
            terminate_mode: TerminateMode::Normal,
        };
        let json = serde_json::to_string(&e).unwrap();
        let back: ArborEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
    }

    #[test]
    fn terminate_mode_display() {
        assert_eq!(TerminateMode::MaxTurns.to_string(), "max_turns");
        assert_eq!(TerminateMode::Cancelled.to_string(), "cancelled");
    }
}
