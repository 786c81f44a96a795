//! Retry configuration and backoff calculation.
//!
//! Sync-only building blocks for retry logic. The async execution engine
//! (escalation ladder, callbacks, batches) lives in `arbor-runtime`, which
//! has access to tokio; this module holds the portable pieces:
//!
//! - [`RetryConfig`]: attempt limits, delays, escalation toggles
//! - [`RecoveryAction`]: how a retried operation was ultimately attempted
//! - [`backoff_delay_ms`]: the exponential backoff formula

use serde::{Deserialize, Serialize};

/// Default maximum attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default initial delay in milliseconds.
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 1000;
/// Default maximum delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
/// Default backoff multiplier.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Configuration for the retry engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first (≥ 1).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay for exponential backoff in ms.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Cap on the between-attempt delay in ms.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Backoff multiplier applied per attempt.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Whether attempt 2 may invoke the context-refresh callback.
    #[serde(default)]
    pub enable_context_refresh: bool,
    /// Whether attempts ≥ 3 may invoke the user-guidance callback.
    #[serde(default)]
    pub enable_user_guidance: bool,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
fn default_initial_delay_ms() -> u64 {
    DEFAULT_INITIAL_DELAY_MS
}
fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}
fn default_backoff_multiplier() -> f64 {
    DEFAULT_BACKOFF_MULTIPLIER
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            enable_context_refresh: false,
            enable_user_guidance: false,
        }
    }
}

/// How the final attempt of a retried operation was reached.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecoveryAction {
    /// The operation never got past attempt 1.
    None,
    /// Plain re-invocation.
    Direct,
    /// The context-refresh callback ran before the attempt.
    ContextRefresh,
    /// The user-guidance callback ran before the attempt.
    UserGuidance,
}

impl std::fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::Direct => f.write_str("direct"),
            Self::ContextRefresh => f.write_str("context-refresh"),
            Self::UserGuidance => f.write_str("user-guidance"),
        }
    }
}

/// Backoff delay before the given attempt (1-based).
///
/// Formula: `min(initial * multiplier^(attempt - 1), max)`. Attempt 1 runs
/// immediately and gets 0. Saturates instead of overflowing for large
/// attempt numbers.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn backoff_delay_ms(attempt: u32, config: &RetryConfig) -> u64 {
    if attempt <= 1 {
        return 0;
    }
    let exponent = attempt - 1;
    let factor = config.backoff_multiplier.max(1.0).powi(exponent.min(64) as i32);
    let raw = (config.initial_delay_ms as f64) * factor;
    if raw >= config.max_delay_ms as f64 {
        config.max_delay_ms
    } else {
        raw.round() as u64
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.initial_delay_ms, 1000);
        assert_eq!(config.max_delay_ms, 30_000);
        assert!((config.backoff_multiplier - 2.0).abs() < f64::EPSILON);
        assert!(!config.enable_context_refresh);
        assert!(!config.enable_user_guidance);
    }

    #[test]
    fn config_serde_defaults() {
        let config: RetryConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.initial_delay_ms, 1000);
    }

    #[test]
    fn config_serde_roundtrip() {
        let config = RetryConfig {
            max_attempts: 5,
            initial_delay_ms: 250,
            max_delay_ms: 10_000,
            backoff_multiplier: 1.5,
            enable_context_refresh: true,
            enable_user_guidance: true,
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: RetryConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.max_attempts, 5);
        assert!(back.enable_user_guidance);
    }

    #[test]
    fn first_attempt_has_no_delay() {
        let config = RetryConfig::default();
        assert_eq!(backoff_delay_ms(1, &config), 0);
        assert_eq!(backoff_delay_ms(0, &config), 0);
    }

    #[test]
    fn exponential_growth() {
        let config = RetryConfig {
            initial_delay_ms: 1000,
            max_delay_ms: 60_000,
            backoff_multiplier: 2.0,
            ..RetryConfig::default()
        };
        assert_eq!(backoff_delay_ms(2, &config), 2000);
        assert_eq!(backoff_delay_ms(3, &config), 4000);
        assert_eq!(backoff_delay_ms(4, &config), 8000);
    }

    #[test]
    fn caps_at_max() {
        let config = RetryConfig {
            initial_delay_ms: 1000,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
            ..RetryConfig::default()
        };
        assert_eq!(backoff_delay_ms(10, &config), 5000);
    }

    #[test]
    fn high_attempt_no_overflow() {
        let config = RetryConfig::default();
        assert_eq!(backoff_delay_ms(1000, &config), config.max_delay_ms);
    }

    #[test]
    fn sub_one_multiplier_clamped() {
        let config = RetryConfig {
            initial_delay_ms: 1000,
            backoff_multiplier: 0.5,
            ..RetryConfig::default()
        };
        // Multiplier below 1.0 would shrink delays; clamp keeps them flat.
        assert_eq!(backoff_delay_ms(2, &config), 1000);
        assert_eq!(backoff_delay_ms(3, &config), 1000);
    }

    #[test]
    fn recovery_action_serde() {
        assert_eq!(
            serde_json::to_string(&RecoveryAction::ContextRefresh).unwrap(),
            "\"context-refresh\""
        );
        assert_eq!(
            serde_json::to_string(&RecoveryAction::UserGuidance).unwrap(),
            "\"user-guidance\""
        );
        assert_eq!(RecoveryAction::None.to_string(), "none");
    }
}
