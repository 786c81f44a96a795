//! Retry engine with an escalating recovery ladder.
//!
//! [`execute_with_retry`] drives a fallible async operation through up to
//! `max_attempts` tries:
//!
//! - attempt 1 runs immediately ([`RecoveryAction::None`]/`Direct`)
//! - attempt 2 is preceded by the `context_refresh` callback when enabled
//! - attempts ≥ 3 are preceded by the `user_guidance` callback when enabled;
//!   its answer becomes `user_input` for the attempt, and a `None` answer
//!   cancels the whole run
//!
//! Every attempt past the first waits out the exponential backoff from
//! `arbor-core`. The engine never returns `Err`: outcomes carry the value
//! or the last error.
//!
//! [`execute_batch_with_retry`] runs a list of named operations through the
//! same ladder, sequentially (honoring `stop_on_first_failure`) or
//! concurrently.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;

use arbor_core::errors::ErrorClass;
use arbor_core::retry::{backoff_delay_ms, RecoveryAction, RetryConfig};
use serde_json::Value;
use tracing::{debug, warn};

/// Boxed future used by the host callbacks and batch operations.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Context-refresh callback: re-derive whatever state the operation reads.
/// Must fail loudly; a refresh failure counts as the attempt's outcome.
pub type ContextRefreshFn<E> = Box<dyn Fn() -> BoxFuture<Result<(), E>> + Send + Sync>;

/// User-guidance callback. Receives the last error and the retry context;
/// returns the guidance text, or `None` to cancel remaining retries.
pub type UserGuidanceFn<E> =
    Box<dyn Fn(&E, &RetryContext) -> BoxFuture<Option<String>> + Send + Sync>;

/// Mutable context threaded through the attempts of one operation.
#[derive(Clone, Debug, Default)]
pub struct RetryContext {
    /// Name of the operation being retried.
    pub operation_name: String,
    /// Current attempt, 1-based.
    pub attempt: u32,
    /// Guidance text recorded by the user-guidance callback.
    pub user_input: Option<String>,
    /// Opaque host-supplied values.
    pub values: HashMap<String, Value>,
}

/// Options for one retried operation.
pub struct RetryOptions<E> {
    /// Attempt limits, delays, and escalation toggles.
    pub config: RetryConfig,
    /// Name used in logs and the retry context.
    pub operation_name: String,
    /// Error kinds that stop retrying immediately.
    pub skip_retry_for: HashSet<String>,
    /// Callback for the context-refresh rung.
    pub context_refresh: Option<ContextRefreshFn<E>>,
    /// Callback for the user-guidance rung.
    pub user_guidance: Option<UserGuidanceFn<E>>,
}

impl<E> RetryOptions<E> {
    /// Options with the given config and no callbacks.
    #[must_use]
    pub fn new(operation_name: impl Into<String>, config: RetryConfig) -> Self {
        Self {
            config,
            operation_name: operation_name.into(),
            skip_retry_for: HashSet::new(),
            context_refresh: None,
            user_guidance: None,
        }
    }
}

/// Outcome of a retried operation. Never an `Err`.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    /// Whether an attempt succeeded.
    pub success: bool,
    /// The value of the successful attempt.
    pub value: Option<T>,
    /// The last error when every attempt failed.
    pub error: Option<E>,
    /// Attempts actually made (1-based count).
    pub attempts: u32,
    /// How the final attempt (successful or not) was reached.
    pub recovery_action: RecoveryAction,
}

/// Outcome of one operation within a batch.
#[derive(Debug)]
pub struct NamedRetryOutcome<T, E> {
    /// Operation name.
    pub name: String,
    /// The outcome. Skipped operations (sequential mode after a failure)
    /// report `success = false` with zero attempts and no error.
    pub outcome: RetryOutcome<T, E>,
}

/// One named operation in a batch.
pub struct BatchOperation<T, E> {
    /// Operation name, reported in the result list.
    pub name: String,
    /// The operation itself.
    pub operation: Box<dyn FnMut(RetryContext) -> BoxFuture<Result<T, E>> + Send>,
}

/// Batch execution options.
#[derive(Clone, Copy, Debug, Default)]
pub struct BatchOptions {
    /// Run operations concurrently instead of one after another.
    pub parallel: bool,
    /// In sequential mode, stop after the first failed operation.
    /// Ignored in parallel mode.
    pub stop_on_first_failure: bool,
}

/// Label for the given attempt under the escalation ladder.
fn action_for_attempt<E>(attempt: u32, options: &RetryOptions<E>) -> RecoveryAction {
    match attempt {
        0 | 1 => RecoveryAction::None,
        2 if options.config.enable_context_refresh && options.context_refresh.is_some() => {
            RecoveryAction::ContextRefresh
        }
        _ if attempt >= 3
            && options.config.enable_user_guidance
            && options.user_guidance.is_some() =>
        {
            RecoveryAction::UserGuidance
        }
        _ => RecoveryAction::Direct,
    }
}

/// Drive `operation` through the escalation ladder.
pub async fn execute_with_retry<T, E, F, Fut>(
    mut operation: F,
    options: &RetryOptions<E>,
) -> RetryOutcome<T, E>
where
    E: ErrorClass + std::fmt::Display,
    F: FnMut(RetryContext) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut context = RetryContext {
        operation_name: options.operation_name.clone(),
        ..RetryContext::default()
    };
    let mut last_error: Option<E> = None;
    let mut last_action = RecoveryAction::None;

    for attempt in 1..=options.config.max_attempts.max(1) {
        let action = action_for_attempt(attempt, options);

        let delay = backoff_delay_ms(attempt, &options.config);
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        }

        if action == RecoveryAction::ContextRefresh {
            let refresh = options
                .context_refresh
                .as_ref()
                .expect("checked by action_for_attempt");
            if let Err(e) = refresh().await {
                warn!(
                    operation = %options.operation_name,
                    attempt,
                    error = %e,
                    "context refresh failed"
                );
                if should_stop(&e, attempt, options) {
                    return failure(e, attempt, action);
                }
                last_error = Some(e);
                last_action = action;
                continue;
            }
        }

        if action == RecoveryAction::UserGuidance {
            let guidance = options
                .user_guidance
                .as_ref()
                .expect("checked by action_for_attempt");
            let error_for_prompt = last_error
                .as_ref()
                .expect("attempts >= 3 always follow a failure");
            context.attempt = attempt;
            match guidance(error_for_prompt, &context).await {
                Some(input) => context.user_input = Some(input),
                None => {
                    debug!(
                        operation = %options.operation_name,
                        attempt,
                        "user cancelled retries"
                    );
                    return RetryOutcome {
                        success: false,
                        value: None,
                        error: last_error,
                        attempts: attempt - 1,
                        recovery_action: last_action,
                    };
                }
            }
        }

        context.attempt = attempt;
        match operation(context.clone()).await {
            Ok(value) => {
                debug!(
                    operation = %options.operation_name,
                    attempt,
                    action = %action,
                    "operation succeeded"
                );
                return RetryOutcome {
                    success: true,
                    value: Some(value),
                    error: None,
                    attempts: attempt,
                    recovery_action: action,
                };
            }
            Err(e) => {
                warn!(
                    operation = %options.operation_name,
                    attempt,
                    kind = e.kind(),
                    error = %e,
                    "attempt failed"
                );
                if should_stop(&e, attempt, options) {
                    return failure(e, attempt, action);
                }
                last_error = Some(e);
                last_action = action;
            }
        }
    }

    RetryOutcome {
        success: false,
        value: None,
        error: last_error,
        attempts: options.config.max_attempts.max(1),
        recovery_action: last_action,
    }
}

/// Early-termination rules, evaluated before counting an attempt as retried.
fn should_stop<E: ErrorClass>(error: &E, attempt: u32, options: &RetryOptions<E>) -> bool {
    if error.is_critical() {
        return true;
    }
    if !error.is_retryable() && attempt == 1 {
        return true;
    }
    if options.skip_retry_for.contains(error.kind()) {
        return true;
    }
    attempt >= options.config.max_attempts.max(1)
}

fn failure<T, E>(error: E, attempts: u32, action: RecoveryAction) -> RetryOutcome<T, E> {
    RetryOutcome {
        success: false,
        value: None,
        error: Some(error),
        attempts,
        recovery_action: action,
    }
}

/// Run a batch of named operations through the retry ladder.
pub async fn execute_batch_with_retry<T, E>(
    operations: Vec<BatchOperation<T, E>>,
    options: &RetryOptions<E>,
    batch: BatchOptions,
) -> Vec<NamedRetryOutcome<T, E>>
where
    E: ErrorClass + std::fmt::Display,
{
    if batch.parallel {
        let futures = operations.into_iter().map(|mut op| async move {
            let outcome = execute_with_retry(|ctx| (op.operation)(ctx), options).await;
            NamedRetryOutcome {
                name: op.name,
                outcome,
            }
        });
        return futures::future::join_all(futures).await;
    }

    let mut results = Vec::with_capacity(operations.len());
    let mut stopped = false;
    for mut op in operations {
        if stopped {
            results.push(NamedRetryOutcome {
                name: op.name,
                outcome: RetryOutcome {
                    success: false,
                    value: None,
                    error: None,
                    attempts: 0,
                    recovery_action: RecoveryAction::None,
                },
            });
            continue;
        }
        let outcome = execute_with_retry(|ctx| (op.operation)(ctx), options).await;
        if !outcome.success && batch.stop_on_first_failure {
            stopped = true;
        }
        results.push(NamedRetryOutcome {
            name: op.name,
            outcome,
        });
    }
    results
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
