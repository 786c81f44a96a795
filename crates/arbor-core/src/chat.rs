//! # Chat client contract
//!
//! The runtime treats the LLM as an opaque chat client with a streaming
//! message interface. Hosts implement [`ChatClient`] (one conversation) and
//! [`ChatClientFactory`] (constructs a client from a session's initial
//! context). The scope consumes the returned stream incrementally and
//! cancels by dropping it or via the token in [`ChatStreamOptions`].

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::{FunctionCall, FunctionDeclaration};

/// Result type alias for chat operations.
pub type ChatResult<T> = Result<T, ChatError>;

/// Boxed stream of [`ChatEvent`]s returned by [`ChatClient::send_message_stream`].
pub type ChatEventStream = Pin<Box<dyn Stream<Item = Result<ChatEvent, ChatError>> + Send>>;

/// Errors that can occur during chat operations.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// The chat object could not be constructed from the initial context.
    #[error("Chat construction failed: {message}")]
    Construction {
        /// Error description.
        message: String,
    },

    /// Authentication failed (expired token, invalid key, etc.).
    #[error("Auth error: {message}")]
    Auth {
        /// Error description.
        message: String,
    },

    /// Rate limited by the backend.
    #[error("Rate limited: retry after {retry_after_ms}ms")]
    RateLimited {
        /// Suggested retry delay in milliseconds.
        retry_after_ms: u64,
        /// Error description.
        message: String,
    },

    /// The backend returned an API error.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error description.
        message: String,
        /// Whether this error can be retried.
        retryable: bool,
    },

    /// Token/context budget exceeded; the host may prune and retry.
    #[error("Context overflow: {message}")]
    ContextOverflow {
        /// Error description.
        message: String,
    },

    /// Stream was cancelled.
    #[error("Stream cancelled")]
    Cancelled,

    /// Client-specific error.
    #[error("{message}")]
    Other {
        /// Error description.
        message: String,
    },
}

impl ChatError {
    /// Whether this error is retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::ContextOverflow { .. } => true,
            Self::Api { retryable, .. } => *retryable,
            Self::Construction { .. }
            | Self::Auth { .. }
            | Self::Cancelled
            | Self::Other { .. } => false,
        }
    }

    /// Error category string for event emission.
    #[must_use]
    pub fn category(&self) -> &str {
        match self {
            Self::Construction { .. } => "construction",
            Self::Auth { .. } => "auth",
            Self::RateLimited { .. } => "rate_limit",
            Self::Api { .. } => "api",
            Self::ContextOverflow { .. } => "context_overflow",
            Self::Cancelled => "cancelled",
            Self::Other { .. } => "unknown",
        }
    }
}

impl crate::errors::ErrorClass for ChatError {
    fn kind(&self) -> &str {
        match self {
            Self::Construction { .. } => "agent_construction",
            Self::ContextOverflow { .. } => "context_overflow",
            _ => "agent",
        }
    }

    fn severity(&self) -> crate::errors::Severity {
        use crate::errors::Severity;
        match self {
            // A chat object that cannot be built is unrecoverable.
            Self::Construction { .. } => Severity::Critical,
            Self::Auth { .. } | Self::Cancelled => Severity::Warning,
            Self::RateLimited { .. } | Self::ContextOverflow { .. } | Self::Other { .. } => {
                Severity::Recoverable
            }
            Self::Api { retryable, .. } => {
                if *retryable {
                    Severity::Recoverable
                } else {
                    Severity::Warning
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stream payloads
// ─────────────────────────────────────────────────────────────────────────────

/// One part of a user message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePart {
    /// Text content.
    pub text: String,
}

impl MessagePart {
    /// Build a text part.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Token usage reported by the client, last chunk wins.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    /// Prompt tokens consumed.
    pub prompt_token_count: u64,
    /// Tokens generated for the response.
    pub candidates_token_count: u64,
    /// Total tokens billed.
    pub total_token_count: u64,
}

/// A chunk of model output.
///
/// Mirrors the wire shape the runtime consumes: optional function calls,
/// candidate content parts that may carry text, and trailing usage metadata.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateChunk {
    /// Function calls requested in this chunk.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub function_calls: Vec<FunctionCall>,
    /// Response candidates; the runtime reads `candidates[0]`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<Candidate>,
    /// Usage metadata, usually present on the final chunk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_metadata: Option<UsageMetadata>,
}

/// One response candidate.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Candidate content.
    pub content: Content,
}

/// Content of a candidate.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Content {
    /// Ordered content parts.
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// One content part; only text parts are interpreted by the runtime.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Part {
    /// Text payload, if this part carries text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl GenerateChunk {
    /// Build a chunk carrying a single text part.
    #[must_use]
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            candidates: vec![Candidate {
                content: Content {
                    parts: vec![Part {
                        text: Some(text.into()),
                    }],
                },
            }],
            ..Self::default()
        }
    }

    /// Iterate the text parts of the first candidate, in order.
    pub fn text_parts(&self) -> impl Iterator<Item = &str> {
        self.candidates
            .first()
            .map(|c| c.content.parts.as_slice())
            .unwrap_or_default()
            .iter()
            .filter_map(|p| p.text.as_deref())
    }
}

/// Events emitted while streaming a chat response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChatEvent {
    /// A transient failure; the client is about to retry internally.
    #[serde(rename = "retry")]
    Retry {
        /// Current attempt (1-based).
        attempt: u32,
        /// Delay before the next internal attempt in ms.
        #[serde(rename = "delayMs")]
        delay_ms: u64,
    },

    /// A chunk of model output.
    #[serde(rename = "chunk")]
    Chunk(GenerateChunk),
}

// ─────────────────────────────────────────────────────────────────────────────
// Traits
// ─────────────────────────────────────────────────────────────────────────────

/// Options for one streaming request.
#[derive(Clone, Debug, Default)]
pub struct ChatStreamOptions {
    /// Tool declarations the model may call this round.
    pub tools: Vec<FunctionDeclaration>,
    /// Cancellation token for the in-flight request. The consumer also
    /// selects against its own token at every stream event boundary.
    pub cancel: Option<tokio_util::sync::CancellationToken>,
}

/// One live conversation with the model.
///
/// Implementors must be `Send + Sync` for use across async tasks.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Current model ID.
    fn model(&self) -> &str;

    /// Stream a response to one user message.
    ///
    /// `prompt_id` correlates the request with the emitting round; clients
    /// should propagate it to their own telemetry.
    async fn send_message_stream(
        &self,
        parts: Vec<MessagePart>,
        options: &ChatStreamOptions,
        prompt_id: &str,
    ) -> ChatResult<ChatEventStream>;
}

/// Factory for constructing chat clients on demand.
///
/// Called once per `run_interactive` with the session's initial context so
/// credentials and model selection are always current.
#[async_trait]
pub trait ChatClientFactory: Send + Sync {
    /// Construct a client from the session's initial context.
    ///
    /// Returns [`ChatError::Construction`] when the context cannot produce a
    /// usable client; the scope treats that as critical.
    async fn create(&self, initial_context: &Value) -> ChatResult<Arc<dyn ChatClient>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_text_parts_in_order() {
        let chunk = GenerateChunk {
            candidates: vec![Candidate {
                content: Content {
                    parts: vec![
                        Part {
                            text: Some("a".into()),
                        },
                        Part { text: None },
                        Part {
                            text: Some("b".into()),
                        },
                    ],
                },
            }],
            ..GenerateChunk::default()
        };
        let texts: Vec<&str> = chunk.text_parts().collect();
        assert_eq!(texts, vec!["a", "b"]);
    }

    #[test]
    fn chunk_without_candidates_has_no_text() {
        let chunk = GenerateChunk::default();
        assert_eq!(chunk.text_parts().count(), 0);
    }

    #[test]
    fn from_text_builds_single_part() {
        let chunk = GenerateChunk::from_text("hello");
        let texts: Vec<&str> = chunk.text_parts().collect();
        assert_eq!(texts, vec!["hello"]);
    }

    #[test]
    fn retryability() {
        assert!(ChatError::RateLimited {
            retry_after_ms: 100,
            message: "slow down".into()
        }
        .is_retryable());
        assert!(ChatError::ContextOverflow {
            message: "too big".into()
        }
        .is_retryable());
        assert!(!ChatError::Auth {
            message: "expired".into()
        }
        .is_retryable());
        assert!(!ChatError::Construction {
            message: "no model".into()
        }
        .is_retryable());
        assert!(ChatError::Api {
            status: 500,
            message: "oops".into(),
            retryable: true
        }
        .is_retryable());
    }

    #[test]
    fn categories() {
        assert_eq!(
            ChatError::Construction {
                message: "x".into()
            }
            .category(),
            "construction"
        );
        assert_eq!(ChatError::Cancelled.category(), "cancelled");
        assert_eq!(
            ChatError::ContextOverflow {
                message: "x".into()
            }
            .category(),
            "context_overflow"
        );
    }

    #[test]
    fn error_class_severities() {
        use crate::errors::{ErrorClass, Severity};
        assert_eq!(
            ChatError::Construction {
                message: "x".into()
            }
            .severity(),
            Severity::Critical
        );
        assert_eq!(
            ChatError::Construction {
                message: "x".into()
            }
            .kind(),
            "agent_construction"
        );
        assert_eq!(
            ChatError::RateLimited {
                retry_after_ms: 1,
                message: "x".into()
            }
            .severity(),
            Severity::Recoverable
        );
        assert_eq!(ChatError::Cancelled.kind(), "agent");
    }

    #[test]
    fn chat_event_serde() {
        let e = ChatEvent::Retry {
            attempt: 2,
            delay_ms: 500,
        };
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["type"], "retry");
        assert_eq!(json["delayMs"], 500);

        let e = ChatEvent::Chunk(GenerateChunk::from_text("hi"));
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["type"], "chunk");
    }
}
