//! Error types for ckpt_core operations.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for checkpoint operations.
#[derive(Error, Debug)]
pub enum CkptError {
    /// The checkpoint lock could not be acquired within the configured wait.
    #[error("timed out after {waited_ms}ms waiting for the checkpoint lock")]
    LockTimeout {
        /// How long the caller waited
        waited_ms: u64,
    },

    /// A version-control step failed. Completed steps were reversed.
    #[error("version-control operation failed during {step}: {reason}")]
    VcsOperationFailed {
        /// The step that failed (e.g. "stash", "create-ref")
        step: String,
        /// Underlying failure description
        reason: String,
    },

    /// The ref was created but its metadata record could not be written.
    #[error("metadata write failed for checkpoint {id}: {reason}")]
    MetadataWriteFailed {
        /// Checkpoint id whose record is missing
        id: String,
        /// Underlying failure description
        reason: String,
    },

    /// No checkpoint record or ref resolves for the given id.
    #[error("checkpoint not found: {0}")]
    CheckpointNotFound(String),

    /// Destructive rollback refused because uncommitted work would be lost.
    #[error("working tree has uncommitted changes in {} path(s); use force to discard them", paths.len())]
    DirtyWorkingTree {
        /// Paths with uncommitted tracked changes
        paths: Vec<String>,
    },

    /// Attempt to delete a checkpoint that retention must preserve.
    #[error("checkpoint {id} is protected: {reason}")]
    RetentionPolicyViolation {
        /// The protected checkpoint id
        id: String,
        /// Why it is protected
        reason: String,
    },

    /// Session record not found.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Session was already closed by a Stop event.
    #[error("session already closed: {0}")]
    SessionClosed(String),

    /// Hook payload failed validation.
    #[error("invalid {event} payload: {reason}")]
    InvalidPayload {
        /// Event type that was rejected
        event: String,
        /// What was wrong with it
        reason: String,
    },

    /// A metadata record exists but cannot be parsed.
    #[error("corrupt record at {}: {}", path.display(), reason)]
    CorruptRecord {
        /// Path to the record
        path: PathBuf,
        /// Parse failure description
        reason: String,
    },

    /// The path is not inside a git repository with a working tree.
    #[error("not a git working tree: {}", .0.display())]
    NotARepository(PathBuf),

    /// Configuration error (loading, parsing, invalid values).
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Serialization error while writing a record.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Raw libgit2 error outside a transactional step.
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Formatting a rendered report failed.
    #[error("format error: {0}")]
    Format(#[from] std::fmt::Error),
}

impl CkptError {
    /// Builds a `VcsOperationFailed` for the given step.
    pub(crate) fn vcs(step: &str, reason: impl ToString) -> Self {
        Self::VcsOperationFailed {
            step: step.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Returns true for failures the hook caller should treat as transient.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }

    /// Process exit code for the CLI contract.
    ///
    /// `2` for anything that did not resolve, `3` for refused destructive
    /// actions, `1` otherwise.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::CheckpointNotFound(_) | Self::SessionNotFound(_) => 2,
            Self::DirtyWorkingTree { .. } | Self::RetentionPolicyViolation { .. } => 3,
            _ => 1,
        }
    }

    /// Returns a user-friendly recovery suggestion for the error, if available.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            Self::LockTimeout { .. } => Some(
                "Another checkpoint operation is running. Retry, or run 'ckpt recover' if its process died.",
            ),
            Self::DirtyWorkingTree { .. } => Some(
                "Commit or stash your changes, use 'ckpt rollback <id> --branch', or pass --force.",
            ),
            Self::CheckpointNotFound(_) => Some("Run 'ckpt list' to see available checkpoints."),
            Self::MetadataWriteFailed { .. } => {
                Some("The snapshot ref exists. Run 'ckpt verify' to inspect degraded entries.")
            }
            Self::RetentionPolicyViolation { .. } => {
                Some("Close the owning session first; open sessions keep all their checkpoints.")
            }
            Self::CorruptRecord { .. } => Some("Run 'ckpt verify' to list inconsistent records."),
            Self::NotARepository(_) => Some("Run inside a git working tree."),
            _ => None,
        }
    }
}

/// Convenience Result type for ckpt_core operations.
pub type Result<T> = std::result::Result<T, CkptError>;
