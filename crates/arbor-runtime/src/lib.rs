//! # arbor-runtime
//!
//! Session tree, event fan-out, retry engine, and interactive subagent
//! execution.
//!
//! - **Event bus**: synchronous typed fan-out with deterministic
//!   subscription handles
//! - **Session store**: node map + active-path stack, invariants enforced
//! - **Session context**: opaque per-session key/value state with
//!   copy-at-creation inheritance
//! - **Session manager**: the public façade — create/switch/pause/resume/
//!   complete/abort, message routing, scope binding
//! - **Retry engine**: direct → context-refresh → user-guidance escalation
//!   with exponential backoff, single and batch modes
//! - **Subagent scope**: per-session FIFO message queue, single-flight
//!   round processing, streaming, tool dispatch, two-level cancellation

#![deny(unsafe_code)]

pub mod bus;
pub mod context;
pub mod errors;
pub mod manager;
pub mod retry;
pub mod scope;
pub mod store;

pub use bus::{EventBus, Subscription};
pub use context::SessionContext;
pub use errors::SessionError;
pub use manager::{CreateSessionOptions, SessionManager, SessionScopeHandle};
pub use retry::{
    execute_batch_with_retry, execute_with_retry, BatchOperation, BatchOptions,
    NamedRetryOutcome, RetryContext, RetryOptions, RetryOutcome,
};
pub use scope::{RunOptions, ScopeConfig, SubagentScope};
pub use store::SessionStore;
