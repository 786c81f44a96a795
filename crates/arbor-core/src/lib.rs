//! # arbor-core
//!
//! Shared contracts for the arbor session runtime.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `ids` | Branded ID newtypes (`SessionId`, `TransactionId`) |
//! | `session` | Session tree data model (status, config, nodes) |
//! | `events` | `ArborEvent` tagged union broadcast by the runtime |
//! | `chat` | `ChatClient` streaming trait the runtime consumes |
//! | `tools` | Tool declarations, calls, and the `ToolRegistry` |
//! | `retry` | Retry configuration and backoff math (sync-only) |
//! | `errors` | Cross-crate error classification (`ErrorClass`) |
//!
//! This crate holds no runtime state: the actual session machinery lives in
//! `arbor-runtime`, file transactions in `arbor-fs`, and the structured
//! logger in `arbor-logging`.

#![deny(unsafe_code)]

pub mod chat;
pub mod errors;
pub mod events;
pub mod ids;
pub mod retry;
pub mod session;
pub mod tools;
