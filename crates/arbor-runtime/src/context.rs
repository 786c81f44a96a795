//! Per-session keyed state.
//!
//! A [`SessionContext`] is an opaque string→value bag. The core never
//! interprets values beyond presence; the well-known keys below are read by
//! the subagent scope and written by the session manager or the host.
//! Inheritance is a one-shot copy at construction: after that, parent and
//! child are fully independent.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde_json::Value;

/// Initial prompt auto-enqueued when the scope starts.
pub const TASK_PROMPT_KEY: &str = "task_prompt";
/// Hard round limit for the scope (integer).
pub const MAX_TURNS_KEY: &str = "max_turns";
/// Hard wall-clock limit for the scope, in minutes (number).
pub const MAX_TIME_MINUTES_KEY: &str = "max_time_minutes";
/// Latest user-guidance text recorded by the retry engine.
pub const USER_INPUT_KEY: &str = "user_input";

/// Keyed, opaque per-session state.
#[derive(Debug, Default)]
pub struct SessionContext {
    values: RwLock<HashMap<String, Value>>,
}

impl SessionContext {
    /// Create an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context holding a copy of every key/value the parent holds
    /// right now. Later mutations on either side do not propagate.
    #[must_use]
    pub fn inherit_from(parent: &SessionContext) -> Self {
        Self {
            values: RwLock::new(parent.values.read().clone()),
        }
    }

    /// Read one value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }

    /// Write one value, replacing any previous one.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        let _ = self.values.write().insert(key.into(), value);
    }

    /// All keys, unordered.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.values.read().keys().cloned().collect()
    }

    /// Copy of the full map.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.values.read().clone()
    }

    /// Snapshot as a JSON object (the shape chat-client factories consume).
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(self.values.read().clone().into_iter().collect())
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    /// Whether the context holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
