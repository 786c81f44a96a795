//! Logging types shared across the crate.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Environment variable consulted for the default log level.
pub const LOG_LEVEL_ENV: &str = "ARBOR_LOG_LEVEL";

/// Default log file location relative to the working directory.
pub const DEFAULT_LOG_DIR: &str = ".arbor/logs";
/// Default log file name.
pub const DEFAULT_LOG_FILE: &str = "arbor.log";

/// Log level with numeric mapping for threshold comparison.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Intermediate values, decisions.
    Debug = 20,
    /// Outcomes, summaries (default).
    Info = 30,
    /// Non-fatal issues.
    Warn = 40,
    /// Errors.
    Error = 50,
}

impl LogLevel {
    /// Numeric value (higher = more severe).
    #[must_use]
    pub const fn as_num(self) -> i32 {
        self as i32
    }

    /// Strict parse; unrecognized strings are ignored (return `None`).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Read the level from `ARBOR_LOG_LEVEL`, if set and recognized.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        std::env::var(LOG_LEVEL_ENV).ok().and_then(|v| Self::parse(&v))
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Debug => f.write_str("debug"),
            Self::Info => f.write_str("info"),
            Self::Warn => f.write_str("warn"),
            Self::Error => f.write_str("error"),
        }
    }
}

/// Error details attached to an `error`-level record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogErrorInfo {
    /// Error type name.
    pub name: String,
    /// Error message.
    pub message: String,
    /// Stack/backtrace text, when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl LogErrorInfo {
    /// Build from any `std::error::Error`, chaining sources into the stack.
    #[must_use]
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut stack = Vec::new();
        let mut source = err.source();
        while let Some(s) = source {
            stack.push(format!("caused by: {s}"));
            source = s.source();
        }
        Self {
            name: "Error".to_owned(),
            message: err.to_string(),
            stack: if stack.is_empty() {
                None
            } else {
                Some(stack.join("\n"))
            },
        }
    }
}

/// One structured record, serialized as a single JSON line.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    /// ISO 8601 timestamp.
    pub timestamp: String,
    /// Record level.
    pub level: LogLevel,
    /// Correlation id tying together one logical flow.
    pub correlation_id: String,
    /// Log message.
    pub message: String,
    /// Structured context fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
    /// Error details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<LogErrorInfo>,
    /// Additional metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Options for constructing a [`crate::Logger`].
#[derive(Clone, Debug)]
pub struct LoggerOptions {
    /// Minimum level; resolution order is this option, then
    /// `ARBOR_LOG_LEVEL`, then `info`.
    pub level: Option<LogLevel>,
    /// Directory holding the log file.
    pub log_dir: PathBuf,
    /// Mirror records to stderr as pretty one-liners.
    pub console: bool,
    /// Rewrite secret-like substrings to `[REDACTED]` before serialization.
    pub redact_secrets: bool,
    /// Flush interval for the background flusher.
    pub flush_interval: std::time::Duration,
}

impl Default for LoggerOptions {
    fn default() -> Self {
        Self {
            level: None,
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            console: false,
            redact_secrets: true,
            flush_interval: std::time::Duration::from_secs(5),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_ordering() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Error);
    }

    #[test]
    fn level_numeric() {
        assert_eq!(LogLevel::Debug.as_num(), 20);
        assert_eq!(LogLevel::Error.as_num(), 50);
    }

    #[test]
    fn level_parse_strict() {
        assert_eq!(LogLevel::parse("WARN"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("debug"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse("verbose"), None);
        assert_eq!(LogLevel::parse(""), None);
    }

    #[test]
    fn level_serde_lowercase() {
        assert_eq!(serde_json::to_string(&LogLevel::Warn).unwrap(), "\"warn\"");
        let back: LogLevel = serde_json::from_str("\"error\"").unwrap();
        assert_eq!(back, LogLevel::Error);
    }

    #[test]
    fn error_info_chains_sources() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let info = LogErrorInfo::from_error(&io);
        assert_eq!(info.message, "denied");
        assert!(info.stack.is_none());
    }

    #[test]
    fn record_omits_none_fields() {
        let record = LogRecord {
            timestamp: "2026-01-15T12:00:00Z".into(),
            level: LogLevel::Info,
            correlation_id: "corr-1".into(),
            message: "hello".into(),
            context: None,
            error: None,
            metadata: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("context").is_none());
        assert!(json.get("error").is_none());
        assert_eq!(json["correlationId"], "corr-1");
    }

    #[test]
    fn default_options() {
        let opts = LoggerOptions::default();
        assert!(opts.level.is_none());
        assert!(opts.redact_secrets);
        assert!(!opts.console);
        assert_eq!(opts.flush_interval.as_secs(), 5);
    }
}
