//! Branded ID newtypes for type safety.
//!
//! Session and transaction identifiers are distinct newtype wrappers around
//! `String`, so a transaction id can never be passed where a session id is
//! expected. Session ids carry a human-readable name prefix for debugging;
//! callers must treat the whole id as opaque.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create from an existing string value.
            #[must_use]
            pub fn from_string(s: String) -> Self {
                Self(s)
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Unique identifier for a session.
    ///
    /// Form: `<sanitized-name>-<6-char-suffix>`. The suffix is random; the
    /// store rejects the (negligible) duplicate on insertion.
    SessionId
}

branded_id! {
    /// Unique identifier for a file transaction (UUID v7, time-ordered).
    TransactionId
}

impl SessionId {
    /// Generate a fresh id for a session with the given human label.
    #[must_use]
    pub fn for_name(name: &str) -> Self {
        let prefix: String = name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    '-'
                }
            })
            .collect();
        let prefix = prefix.trim_matches('-');
        let prefix = if prefix.is_empty() { "session" } else { prefix };
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("{prefix}-{}", &suffix[..6]))
    }
}

impl TransactionId {
    /// Generate a fresh transaction id (UUID v7, sorts by creation time).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_carries_name_prefix() {
        let id = SessionId::for_name("planner");
        assert!(id.as_str().starts_with("planner-"));
        assert_eq!(id.as_str().len(), "planner-".len() + 6);
    }

    #[test]
    fn session_id_sanitizes_label() {
        let id = SessionId::for_name("Deep Research!");
        assert!(id.as_str().starts_with("deep-research-"));
    }

    #[test]
    fn session_id_empty_label_falls_back() {
        let id = SessionId::for_name("***");
        assert!(id.as_str().starts_with("session-"));
    }

    #[test]
    fn session_ids_are_unique() {
        let a = SessionId::for_name("worker");
        let b = SessionId::for_name("worker");
        assert_ne!(a, b);
    }

    #[test]
    fn transaction_id_is_uuid_v7() {
        let id = TransactionId::new();
        let parsed = Uuid::parse_str(id.as_str()).expect("should be valid UUID");
        assert_eq!(parsed.get_version(), Some(uuid::Version::SortRand));
    }

    #[test]
    fn transaction_ids_are_unique() {
        let a = TransactionId::new();
        let b = TransactionId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn serde_is_transparent() {
        let id = SessionId::from("root-abc123");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"root-abc123\"");
        let back: SessionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn deref_and_display() {
        let id = SessionId::from("root-abc123");
        let s: &str = &id;
        assert_eq!(s, "root-abc123");
        assert_eq!(format!("{id}"), "root-abc123");
    }

    #[test]
    fn into_string_roundtrip() {
        let id = TransactionId::from("tx-1");
        let s: String = id.into();
        assert_eq!(s, "tx-1");
    }
}
