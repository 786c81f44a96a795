//! Cross-crate error classification.
//!
//! The retry engine decides whether to keep attempting an operation from
//! three signals: the error's stable `kind` string (matched against caller
//! skip-sets), its [`Severity`], and its retryability. Error enums across
//! the workspace implement [`ErrorClass`] to expose those signals without
//! the engine knowing concrete types.

/// Severity of a classified error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    /// The operation may be attempted again.
    Recoverable,
    /// Surface to the user; do not retry.
    Warning,
    /// Stop immediately; never retry.
    Critical,
}

/// Classification surface consumed by the retry engine.
pub trait ErrorClass {
    /// Stable kind string (e.g. `"file_operation"`, `"session"`,
    /// `"validation"`), usable in skip-retry sets.
    fn kind(&self) -> &str;

    /// Severity of this error.
    fn severity(&self) -> Severity;

    /// Whether the retry engine may attempt the operation again.
    fn is_retryable(&self) -> bool {
        self.severity() == Severity::Recoverable
    }

    /// Whether retries must stop immediately.
    fn is_critical(&self) -> bool {
        self.severity() == Severity::Critical
    }
}

/// Malformed input to a public operation. Warning severity: surfaced, never
/// retried.
#[derive(Debug, thiserror::Error)]
#[error("Validation error: {message}")]
pub struct ValidationError {
    /// What was malformed.
    pub message: String,
}

impl ValidationError {
    /// Build a validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl ErrorClass for ValidationError {
    fn kind(&self) -> &str {
        "validation"
    }

    fn severity(&self) -> Severity {
        Severity::Warning
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    struct FlakyError;

    impl ErrorClass for FlakyError {
        fn kind(&self) -> &str {
            "flaky"
        }
        fn severity(&self) -> Severity {
            Severity::Recoverable
        }
    }

    #[test]
    fn recoverable_defaults() {
        let e = FlakyError;
        assert!(e.is_retryable());
        assert!(!e.is_critical());
    }

    #[test]
    fn validation_is_warning() {
        let e = ValidationError::new("empty name");
        assert_eq!(e.kind(), "validation");
        assert_eq!(e.severity(), Severity::Warning);
        assert!(!e.is_retryable());
        assert!(!e.is_critical());
        assert_eq!(e.to_string(), "Validation error: empty name");
    }
}
