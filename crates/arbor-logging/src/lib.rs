//! # arbor-logging
//!
//! Structured logging for the arbor runtime.
//!
//! Two layers:
//!
//! - [`Logger`] — the structured file log: level-gated, correlation-scoped,
//!   secret-redacting records buffered in memory and flushed as JSON lines
//!   to `<workdir>/.arbor/logs/arbor.log` (periodically, on demand, and
//!   immediately for errors). Never fails the caller.
//! - [`init_subscriber`] — the `tracing` stderr subscriber every crate's
//!   diagnostic macros feed into.
//!
//! Components accept an injected [`Logger`]; the [`init_logger`]/[`logger`]
//! pair exists for hosts that want one process-wide instance.

#![deny(unsafe_code)]

pub mod logger;
pub mod redact;
pub mod types;

pub use logger::{init_logger, logger, Logger};
pub use redact::{redact_text, redact_value, REDACTED};
pub use types::{LogErrorInfo, LogLevel, LogRecord, LoggerOptions, LOG_LEVEL_ENV};

/// Initialize the global tracing subscriber with stderr output.
///
/// Call once at application startup. Subsequent calls are no-ops.
///
/// # Arguments
///
/// * `level` - Minimum level directive when `RUST_LOG` is unset, e.g. `"warn"`.
pub fn init_subscriber(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    // set_global_default is a no-op if already set
    let _ = subscriber.try_init();
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
