//! # arbor-fs
//!
//! Atomic multi-file transactions for the arbor runtime.
//!
//! Workflow steps that produce artifacts stage every write, backup, and
//! pre-image into a per-transaction temp directory first, then apply the
//! operations in order; any failure rolls back the applied prefix so the
//! user's tree is never left half-written.

#![deny(unsafe_code)]

pub mod errors;
pub mod transaction;

pub use errors::{FileOperationError, TransactionError};
pub use transaction::{
    create_transaction, CommitResult, Transaction, TransactionOperation, TRANSACTIONS_DIR,
};
