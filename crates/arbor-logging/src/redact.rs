//! Secret redaction.
//!
//! Before serialization, log messages and structured values are scanned for
//! secret-like content. Two rules apply:
//!
//! 1. **In-text**: substrings of the form `<key><sep><value>` where `<key>`
//!    matches a secret key name (case-insensitive) and `<sep>` is `=`, `:`,
//!    or whitespace have their value replaced with `[REDACTED]`.
//! 2. **By key**: object fields whose key matches a secret key name have
//!    their entire value replaced with `[REDACTED]`, regardless of type.
//!
//! Both rules are idempotent: redacting already-redacted input is a no-op.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

/// Replacement literal.
pub const REDACTED: &str = "[REDACTED]";

static TEXT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(api[_-]?key|token|password|secret)\b(\s*[=:]\s*|\s+)([^\s,;"']+)"#)
        .expect("redaction pattern is valid")
});

static KEY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(api[_-]?key|token|password|secret)").expect("key pattern is valid")
});

/// Redact secret values inside free-form text.
#[must_use]
pub fn redact_text(text: &str) -> String {
    TEXT_PATTERN
        .replace_all(text, |caps: &regex::Captures<'_>| {
            format!("{}{}{REDACTED}", &caps[1], &caps[2])
        })
        .into_owned()
}

/// Whether an object key names a secret.
#[must_use]
pub fn is_secret_key(key: &str) -> bool {
    KEY_PATTERN.is_match(key)
}

/// Recursively redact a JSON value: secret-named keys lose their whole
/// value, and every string is scanned with the in-text rule.
#[must_use]
pub fn redact_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    if is_secret_key(k) {
                        (k.clone(), Value::String(REDACTED.to_owned()))
                    } else {
                        (k.clone(), redact_value(v))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_value).collect()),
        Value::String(s) => Value::String(redact_text(s)),
        other => other.clone(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
