//! Buffered, correlation-scoped structured logger.
//!
//! Records below the threshold are dropped before any serialization work.
//! Accepted records are redacted, buffered in memory, and written as JSON
//! lines to `<log_dir>/arbor.log` by an explicit [`Logger::flush`], by the
//! lazily-started periodic flusher, or immediately for `error` records.
//!
//! On a write failure the drained records are restored to the head of the
//! buffer so the next flush retries them; the failure itself is reported at
//! most once to stderr. Logger operations never fail and never panic.

use std::collections::VecDeque;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use uuid::Uuid;

use crate::redact::{redact_text, redact_value};
use crate::types::{LogErrorInfo, LogLevel, LogRecord, LoggerOptions, DEFAULT_LOG_FILE};

/// Shared sink state behind every logger in one family (root + children).
struct Sink {
    buffer: Mutex<VecDeque<LogRecord>>,
    file_path: PathBuf,
    level: LogLevel,
    console: bool,
    redact: bool,
    flush_interval: std::time::Duration,
    flusher: Mutex<Option<tokio::task::JoinHandle<()>>>,
    write_failure_reported: AtomicBool,
}

impl Sink {
    fn append(sink: &Arc<Self>, record: LogRecord) {
        let immediate = record.level >= LogLevel::Error;
        {
            let mut buffer = sink.buffer.lock();
            buffer.push_back(record);
        }
        Self::ensure_flusher(sink);
        if immediate {
            sink.flush();
        }
    }

    /// Start the periodic flusher if a tokio runtime is available. The task
    /// holds only a weak reference and exits when the sink is dropped.
    fn ensure_flusher(sink: &Arc<Self>) {
        let mut guard = sink.flusher.lock();
        if guard.is_some() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let weak: Weak<Self> = Arc::downgrade(sink);
        let interval = sink.flush_interval;
        *guard = Some(handle.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                let _ = ticker.tick().await;
                let Some(sink) = weak.upgrade() else {
                    break;
                };
                if !sink.buffer.lock().is_empty() {
                    sink.flush();
                }
            }
        }));
    }

    fn flush(&self) {
        let mut buffer = self.buffer.lock();
        if buffer.is_empty() {
            return;
        }
        let drained: Vec<LogRecord> = buffer.drain(..).collect();
        if let Err(e) = write_lines(&self.file_path, &drained) {
            // Restore to the head so the next flush retries in order.
            for record in drained.into_iter().rev() {
                buffer.push_front(record);
            }
            if !self.write_failure_reported.swap(true, Ordering::Relaxed) {
                eprintln!(
                    "arbor-logging: failed to write {}: {e}",
                    self.file_path.display()
                );
            }
        }
    }

    fn shutdown(&self) {
        if let Some(task) = self.flusher.lock().take() {
            task.abort();
        }
        self.flush();
    }
}

fn write_lines(path: &PathBuf, records: &[LogRecord]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    let mut out = String::new();
    for record in records {
        if let Ok(line) = serde_json::to_string(record) {
            out.push_str(&line);
            out.push('\n');
        }
    }
    file.write_all(out.as_bytes())?;
    file.flush()
}

/// Structured logger with level gating, redaction, and buffered file output.
///
/// Cloning via [`Logger::child`] shares the sink (buffer, file, flusher)
/// while adding bound context; the child copies the parent's correlation id
/// at creation and may override it independently.
pub struct Logger {
    sink: Arc<Sink>,
    bound_context: Option<Value>,
    correlation_id: RwLock<String>,
}

impl Logger {
    /// Create a logger. Threshold resolution: `options.level`, then
    /// `ARBOR_LOG_LEVEL`, then `info`.
    #[must_use]
    pub fn new(options: LoggerOptions) -> Self {
        let level = options
            .level
            .or_else(LogLevel::from_env)
            .unwrap_or(LogLevel::Info);
        Self {
            sink: Arc::new(Sink {
                buffer: Mutex::new(VecDeque::new()),
                file_path: options.log_dir.join(DEFAULT_LOG_FILE),
                level,
                console: options.console,
                redact: options.redact_secrets,
                flush_interval: options.flush_interval,
                flusher: Mutex::new(None),
                write_failure_reported: AtomicBool::new(false),
            }),
            bound_context: None,
            correlation_id: RwLock::new(Uuid::new_v4().to_string()),
        }
    }

    /// New logger sharing this sink, with `context` merged into every record.
    #[must_use]
    pub fn child(&self, context: Value) -> Self {
        let merged = match (&self.bound_context, &context) {
            (Some(Value::Object(base)), Value::Object(extra)) => {
                let mut map = base.clone();
                map.extend(extra.clone());
                Some(Value::Object(map))
            }
            (None, v) => Some(v.clone()),
            (Some(_), v) => Some(v.clone()),
        };
        Self {
            sink: self.sink.clone(),
            bound_context: merged,
            correlation_id: RwLock::new(self.correlation_id.read().clone()),
        }
    }

    /// Scope subsequent records to a correlation id.
    pub fn set_correlation_id(&self, id: impl Into<String>) {
        *self.correlation_id.write() = id.into();
    }

    /// Current correlation id.
    #[must_use]
    pub fn correlation_id(&self) -> String {
        self.correlation_id.read().clone()
    }

    /// Log at `debug`.
    pub fn debug(&self, message: &str, context: Option<Value>, metadata: Option<Value>) {
        self.log(LogLevel::Debug, message, context, metadata, None);
    }

    /// Log at `info`.
    pub fn info(&self, message: &str, context: Option<Value>, metadata: Option<Value>) {
        self.log(LogLevel::Info, message, context, metadata, None);
    }

    /// Log at `warn`.
    pub fn warn(&self, message: &str, context: Option<Value>, metadata: Option<Value>) {
        self.log(LogLevel::Warn, message, context, metadata, None);
    }

    /// Log at `error`, optionally attaching an error value.
    pub fn error(
        &self,
        message: &str,
        error: Option<&(dyn std::error::Error + 'static)>,
        context: Option<Value>,
        metadata: Option<Value>,
    ) {
        self.log(
            LogLevel::Error,
            message,
            context,
            metadata,
            error.map(LogErrorInfo::from_error),
        );
    }

    fn log(
        &self,
        level: LogLevel,
        message: &str,
        context: Option<Value>,
        metadata: Option<Value>,
        error: Option<LogErrorInfo>,
    ) {
        // Level gate before any serialization work.
        if level < self.sink.level {
            return;
        }

        let context = merge_context(self.bound_context.as_ref(), context);
        let (message, context, metadata) = if self.sink.redact {
            (
                redact_text(message),
                context.map(|c| redact_value(&c)),
                metadata.map(|m| redact_value(&m)),
            )
        } else {
            (message.to_owned(), context, metadata)
        };

        let record = LogRecord {
            timestamp: chrono::Utc::now().to_rfc3339(),
            level,
            correlation_id: self.correlation_id.read().clone(),
            message,
            context,
            error,
            metadata,
        };

        if self.sink.console {
            eprintln!(
                "{} [{}] ({}) {}",
                record.timestamp, record.level, record.correlation_id, record.message
            );
        }

        Sink::append(&self.sink, record);
    }

    /// Force the buffered records to disk.
    pub fn flush(&self) {
        self.sink.flush();
    }

    /// Stop the periodic flusher and flush once more.
    pub fn shutdown(&self) {
        self.sink.shutdown();
    }

    /// Number of buffered, unflushed records.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.sink.buffer.lock().len()
    }

    /// Path of the log file this logger writes to.
    #[must_use]
    pub fn file_path(&self) -> &std::path::Path {
        &self.sink.file_path
    }
}

fn merge_context(bound: Option<&Value>, call: Option<Value>) -> Option<Value> {
    match (bound, call) {
        (Some(Value::Object(base)), Some(Value::Object(extra))) => {
            let mut map = base.clone();
            map.extend(extra);
            Some(Value::Object(map))
        }
        (Some(base), None) => Some(base.clone()),
        (_, call) => call,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Process-wide logger
// ─────────────────────────────────────────────────────────────────────────────

static GLOBAL: OnceLock<Logger> = OnceLock::new();

/// Install the process-wide logger. The first call wins; later calls return
/// the already-installed instance.
pub fn init_logger(options: LoggerOptions) -> &'static Logger {
    GLOBAL.get_or_init(|| Logger::new(options))
}

/// The process-wide logger, installing defaults if `init_logger` was never
/// called. Components should still prefer an injected `Logger` for
/// testability.
pub fn logger() -> &'static Logger {
    GLOBAL.get_or_init(|| Logger::new(LoggerOptions::default()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
