//! Transaction error types.

use std::path::{Path, PathBuf};

use arbor_core::errors::{ErrorClass, Severity};

/// A single file operation failed.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{operation} failed for {}: {cause}", path.display())]
pub struct FileOperationError {
    /// Which operation failed (`create`, `update`, `delete`, `move`,
    /// `stage`, `rollback`).
    pub operation: String,
    /// Path the operation targeted.
    pub path: PathBuf,
    /// Underlying cause, stringified.
    pub cause: String,
}

impl FileOperationError {
    /// Build from an I/O error.
    #[must_use]
    pub fn io(operation: &str, path: &Path, cause: &std::io::Error) -> Self {
        Self {
            operation: operation.to_owned(),
            path: path.to_path_buf(),
            cause: cause.to_string(),
        }
    }
}

impl ErrorClass for FileOperationError {
    fn kind(&self) -> &str {
        "file_operation"
    }

    fn severity(&self) -> Severity {
        Severity::Recoverable
    }
}

/// Errors surfaced by the transaction API.
///
/// `commit` never propagates these as `Err`; they travel inside the
/// [`crate::transaction::CommitResult`].
#[derive(Clone, Debug, thiserror::Error)]
pub enum TransactionError {
    /// The transaction was already committed; no further mutation allowed.
    #[error("Transaction already committed")]
    AlreadyCommitted,

    /// `restore_checkpoint` was called with an unknown id.
    #[error("Unknown checkpoint: {0}")]
    UnknownCheckpoint(String),

    /// A file operation failed during staging, commit, or rollback.
    #[error(transparent)]
    FileOperation(#[from] FileOperationError),
}

impl ErrorClass for TransactionError {
    fn kind(&self) -> &str {
        "transaction"
    }

    fn severity(&self) -> Severity {
        match self {
            Self::FileOperation(_) => Severity::Recoverable,
            Self::AlreadyCommitted | Self::UnknownCheckpoint(_) => Severity::Warning,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
