//! Stage-then-commit multi-file transactions.
//!
//! A [`Transaction`] collects pending file operations, stages everything it
//! needs for recovery into a per-transaction temp directory, then applies the
//! operations in order. Any application failure rolls back the
//! already-applied prefix from the staged backups. User files are never
//! touched before staging completes.
//!
//! Staging layout under `<base>/.arbor/transactions/<txid>/`:
//! `<index>.stage` holds create/update content, `<index>.backup` holds the
//! pre-image of files the operation will overwrite, delete, or move.

use std::path::{Path, PathBuf};

use arbor_core::ids::TransactionId;
use tracing::{debug, warn};

use crate::errors::{FileOperationError, TransactionError};

/// Subdirectory (relative to the base) holding transaction temp areas.
pub const TRANSACTIONS_DIR: &str = ".arbor/transactions";

/// One pending file operation. Staging paths are populated during staging,
/// not when the operation is added.
#[derive(Clone, Debug)]
pub enum TransactionOperation {
    /// Create a new file with the given content.
    Create {
        /// Target path (absolute, or relative to the transaction base).
        target: PathBuf,
        /// File content, written byte-for-byte.
        content: String,
        /// Staged content file.
        staged: Option<PathBuf>,
    },
    /// Overwrite an existing file.
    Update {
        /// Target path.
        target: PathBuf,
        /// New content.
        content: String,
        /// Staged content file.
        staged: Option<PathBuf>,
        /// Backup of the current target, if it existed at staging time.
        backup: Option<PathBuf>,
    },
    /// Remove a file.
    Delete {
        /// Target path.
        target: PathBuf,
        /// Backup of the current target, if it existed at staging time.
        backup: Option<PathBuf>,
    },
    /// Relocate a file.
    Move {
        /// Source path.
        source: PathBuf,
        /// Destination path.
        target: PathBuf,
        /// Backup of the source.
        backup: Option<PathBuf>,
    },
}

impl TransactionOperation {
    /// The path this operation mutates (the destination for moves).
    #[must_use]
    pub fn target(&self) -> &Path {
        match self {
            Self::Create { target, .. }
            | Self::Update { target, .. }
            | Self::Delete { target, .. }
            | Self::Move { target, .. } => target,
        }
    }

    fn op_name(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
            Self::Move { .. } => "move",
        }
    }
}

/// Snapshot of the pending operation list, restorable before commit.
#[derive(Clone, Debug)]
struct Checkpoint {
    id: String,
    operations: Vec<TransactionOperation>,
}

/// Outcome of [`Transaction::commit`].
#[derive(Debug)]
pub struct CommitResult {
    /// Whether every operation was applied.
    pub success: bool,
    /// Paths applied to the real filesystem. Empty when nothing is left
    /// committed (staging failure or rollback).
    pub committed_files: Vec<PathBuf>,
    /// The failure, when `success` is false.
    pub error: Option<TransactionError>,
    /// Whether already-applied operations were reverted.
    pub rolled_back: bool,
}

/// An atomic unit of filesystem changes.
pub struct Transaction {
    id: TransactionId,
    base_dir: PathBuf,
    temp_dir: PathBuf,
    operations: Vec<TransactionOperation>,
    checkpoints: Vec<Checkpoint>,
    committed: bool,
}

/// Create a transaction rooted at `base_dir` (the `createTransaction`
/// factory).
#[must_use]
pub fn create_transaction(base_dir: impl Into<PathBuf>) -> Transaction {
    Transaction::new(base_dir)
}

impl Transaction {
    /// Create an empty transaction rooted at `base_dir`. Relative operation
    /// paths resolve against it.
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let id = TransactionId::new();
        let temp_dir = base_dir.join(TRANSACTIONS_DIR).join(id.as_str());
        Self {
            id,
            base_dir,
            temp_dir,
            operations: Vec::new(),
            checkpoints: Vec::new(),
            committed: false,
        }
    }

    /// Transaction id.
    #[must_use]
    pub fn id(&self) -> &TransactionId {
        &self.id
    }

    /// Temp directory holding staged content and backups.
    #[must_use]
    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Number of pending operations.
    #[must_use]
    pub fn operation_count(&self) -> usize {
        self.operations.len()
    }

    /// Whether `commit` already ran to completion.
    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.committed
    }

    fn ensure_open(&self) -> Result<(), TransactionError> {
        if self.committed {
            Err(TransactionError::AlreadyCommitted)
        } else {
            Ok(())
        }
    }

    /// Queue a file creation.
    pub fn add_create(
        &mut self,
        path: impl Into<PathBuf>,
        content: impl Into<String>,
    ) -> Result<(), TransactionError> {
        self.ensure_open()?;
        self.operations.push(TransactionOperation::Create {
            target: path.into(),
            content: content.into(),
            staged: None,
        });
        Ok(())
    }

    /// Queue an overwrite of an existing file.
    pub fn add_update(
        &mut self,
        path: impl Into<PathBuf>,
        content: impl Into<String>,
    ) -> Result<(), TransactionError> {
        self.ensure_open()?;
        self.operations.push(TransactionOperation::Update {
            target: path.into(),
            content: content.into(),
            staged: None,
            backup: None,
        });
        Ok(())
    }

    /// Queue a file removal.
    pub fn add_delete(&mut self, path: impl Into<PathBuf>) -> Result<(), TransactionError> {
        self.ensure_open()?;
        self.operations.push(TransactionOperation::Delete {
            target: path.into(),
            backup: None,
        });
        Ok(())
    }

    /// Queue a file relocation.
    pub fn add_move(
        &mut self,
        source: impl Into<PathBuf>,
        target: impl Into<PathBuf>,
    ) -> Result<(), TransactionError> {
        self.ensure_open()?;
        self.operations.push(TransactionOperation::Move {
            source: source.into(),
            target: target.into(),
            backup: None,
        });
        Ok(())
    }

    /// Snapshot the pending operation list. Returns the checkpoint id.
    pub fn create_checkpoint(&mut self) -> Result<String, TransactionError> {
        self.ensure_open()?;
        let id = format!("cp-{}", self.checkpoints.len() + 1);
        self.checkpoints.push(Checkpoint {
            id: id.clone(),
            operations: self.operations.clone(),
        });
        Ok(id)
    }

    /// Reset the pending operations to a checkpoint's snapshot.
    pub fn restore_checkpoint(&mut self, id: &str) -> Result<(), TransactionError> {
        self.ensure_open()?;
        let checkpoint = self
            .checkpoints
            .iter()
            .find(|c| c.id == id)
            .ok_or_else(|| TransactionError::UnknownCheckpoint(id.to_owned()))?;
        self.operations = checkpoint.operations.clone();
        Ok(())
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    // ── Staging ──────────────────────────────────────────────────────

    /// Stage content and backups into the temp directory. Must succeed in
    /// full before any user file is touched.
    async fn stage(&mut self) -> Result<(), FileOperationError> {
        tokio::fs::create_dir_all(&self.temp_dir)
            .await
            .map_err(|e| FileOperationError::io("stage", &self.temp_dir, &e))?;

        let temp_dir = self.temp_dir.clone();
        let base_dir = self.base_dir.clone();
        let resolve = |p: &Path| {
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                base_dir.join(p)
            }
        };

        for (index, op) in self.operations.iter_mut().enumerate() {
            match op {
                TransactionOperation::Create { content, staged, .. } => {
                    let stage_path = temp_dir.join(format!("{index}.stage"));
                    tokio::fs::write(&stage_path, content.as_bytes())
                        .await
                        .map_err(|e| FileOperationError::io("stage", &stage_path, &e))?;
                    *staged = Some(stage_path);
                }
                TransactionOperation::Update {
                    target,
                    content,
                    staged,
                    backup,
                } => {
                    let stage_path = temp_dir.join(format!("{index}.stage"));
                    tokio::fs::write(&stage_path, content.as_bytes())
                        .await
                        .map_err(|e| FileOperationError::io("stage", &stage_path, &e))?;
                    *staged = Some(stage_path);

                    let resolved = resolve(target);
                    if tokio::fs::try_exists(&resolved).await.unwrap_or(false) {
                        let backup_path = temp_dir.join(format!("{index}.backup"));
                        let _ = tokio::fs::copy(&resolved, &backup_path)
                            .await
                            .map_err(|e| FileOperationError::io("stage", &resolved, &e))?;
                        *backup = Some(backup_path);
                    }
                }
                TransactionOperation::Delete { target, backup } => {
                    let resolved = resolve(target);
                    if tokio::fs::try_exists(&resolved).await.unwrap_or(false) {
                        let backup_path = temp_dir.join(format!("{index}.backup"));
                        let _ = tokio::fs::copy(&resolved, &backup_path)
                            .await
                            .map_err(|e| FileOperationError::io("stage", &resolved, &e))?;
                        *backup = Some(backup_path);
                    }
                }
                TransactionOperation::Move { source, backup, .. } => {
                    let resolved = resolve(source);
                    let backup_path = temp_dir.join(format!("{index}.backup"));
                    let _ = tokio::fs::copy(&resolved, &backup_path)
                        .await
                        .map_err(|e| FileOperationError::io("stage", &resolved, &e))?;
                    *backup = Some(backup_path);
                }
            }
        }
        Ok(())
    }

    // ── Commit ───────────────────────────────────────────────────────

    /// Apply all pending operations as one unit.
    ///
    /// One-shot: a second call reports `AlreadyCommitted`. A staging failure
    /// returns with `rolled_back = false` and nothing applied; an
    /// application failure rolls back the applied prefix and returns
    /// `rolled_back = true`. Never returns `Err`.
    pub async fn commit(&mut self) -> CommitResult {
        if self.committed {
            return CommitResult {
                success: false,
                committed_files: Vec::new(),
                error: Some(TransactionError::AlreadyCommitted),
                rolled_back: false,
            };
        }

        debug!(
            tx = %self.id,
            operations = self.operations.len(),
            "staging transaction"
        );
        if let Err(e) = self.stage().await {
            self.cleanup().await;
            return CommitResult {
                success: false,
                committed_files: Vec::new(),
                error: Some(e.into()),
                rolled_back: false,
            };
        }

        let mut applied: Vec<usize> = Vec::with_capacity(self.operations.len());
        for index in 0..self.operations.len() {
            if let Err(e) = self.apply(index).await {
                warn!(tx = %self.id, op = index, error = %e, "commit failed, rolling back");
                self.rollback(&applied).await;
                self.cleanup().await;
                return CommitResult {
                    success: false,
                    committed_files: Vec::new(),
                    error: Some(e.into()),
                    rolled_back: true,
                };
            }
            applied.push(index);
        }

        let committed_files: Vec<PathBuf> = applied
            .iter()
            .map(|&i| self.resolve(self.operations[i].target()))
            .collect();

        self.committed = true;
        self.cleanup().await;
        debug!(tx = %self.id, files = committed_files.len(), "transaction committed");
        CommitResult {
            success: true,
            committed_files,
            error: None,
            rolled_back: false,
        }
    }

    /// Apply one operation to the real filesystem.
    async fn apply(&self, index: usize) -> Result<(), FileOperationError> {
        let op = &self.operations[index];
        let op_name = op.op_name();
        match op {
            TransactionOperation::Create { target, staged, .. }
            | TransactionOperation::Update { target, staged, .. } => {
                let resolved = self.resolve(target);
                ensure_parent(&resolved, op_name).await?;
                let staged = staged
                    .as_ref()
                    .ok_or_else(|| FileOperationError {
                        operation: op_name.to_owned(),
                        path: resolved.clone(),
                        cause: "operation was not staged".into(),
                    })?;
                let _ = tokio::fs::copy(staged, &resolved)
                    .await
                    .map_err(|e| FileOperationError::io(op_name, &resolved, &e))?;
                Ok(())
            }
            TransactionOperation::Delete { target, .. } => {
                let resolved = self.resolve(target);
                match tokio::fs::remove_file(&resolved).await {
                    Ok(()) => Ok(()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    Err(e) => Err(FileOperationError::io(op_name, &resolved, &e)),
                }
            }
            TransactionOperation::Move { source, target, .. } => {
                let from = self.resolve(source);
                let to = self.resolve(target);
                ensure_parent(&to, op_name).await?;
                match tokio::fs::rename(&from, &to).await {
                    Ok(()) => Ok(()),
                    // Cross-device rename: fall back to copy + remove.
                    Err(_) => {
                        let _ = tokio::fs::copy(&from, &to)
                            .await
                            .map_err(|e| FileOperationError::io(op_name, &to, &e))?;
                        tokio::fs::remove_file(&from)
                            .await
                            .map_err(|e| FileOperationError::io(op_name, &from, &e))
                    }
                }
            }
        }
    }

    // ── Rollback ─────────────────────────────────────────────────────

    /// Revert applied operations in reverse order. Best-effort: individual
    /// failures are logged and skipped.
    async fn rollback(&self, applied: &[usize]) {
        for &index in applied.iter().rev() {
            let op = &self.operations[index];
            let result = match op {
                TransactionOperation::Create { target, .. } => {
                    tokio::fs::remove_file(self.resolve(target)).await
                }
                TransactionOperation::Update { target, backup, .. } => match backup {
                    Some(backup) => tokio::fs::copy(backup, self.resolve(target))
                        .await
                        .map(|_| ()),
                    None => tokio::fs::remove_file(self.resolve(target)).await,
                },
                TransactionOperation::Delete { target, backup } => match backup {
                    Some(backup) => tokio::fs::copy(backup, self.resolve(target))
                        .await
                        .map(|_| ()),
                    None => Ok(()),
                },
                TransactionOperation::Move {
                    source,
                    target,
                    backup,
                } => {
                    let restore = match backup {
                        Some(backup) => tokio::fs::copy(backup, self.resolve(source))
                            .await
                            .map(|_| ()),
                        None => Ok(()),
                    };
                    let _ = tokio::fs::remove_file(self.resolve(target)).await;
                    restore
                }
            };
            if let Err(e) = result {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(tx = %self.id, op = index, error = %e, "rollback step failed");
                }
            }
        }
    }

    /// Remove the temp directory. Idempotent.
    pub async fn cleanup(&self) {
        match tokio::fs::remove_dir_all(&self.temp_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(tx = %self.id, error = %e, "temp dir cleanup failed"),
        }
    }
}

async fn ensure_parent(path: &Path, op_name: &str) -> Result<(), FileOperationError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| FileOperationError::io(op_name, parent, &e))?;
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
