//! ckpt Core Library
//!
//! A checkpoint and rollback engine for agent-driven editing sessions:
//! - Snapshots of the git working tree at lifecycle boundaries
//! - Crash-safe recording through a journal and undo log
//! - Query, diff and rollback over recorded checkpoints
//! - Retention and session summaries
//!
//! # Quick Start
//!
//! ```no_run
//! use ckpt_core::{CheckpointEngine, HookEvent, RollbackMode, SessionContext};
//!
//! let engine = CheckpointEngine::open(".").unwrap();
//! let ctx = SessionContext::new("session-1");
//!
//! // Snapshot before an edit
//! let pre = engine
//!     .dispatch(&ctx, HookEvent::PreEdit { files: vec!["src/main.rs".into()] })
//!     .checkpoint_id
//!     .unwrap();
//!
//! // ... the agent edits src/main.rs ...
//!
//! // Go back
//! engine.rollback(pre.as_str(), RollbackMode::Branch, false).unwrap();
//! ```
//!
//! # Storage
//!
//! Checkpoints are plain git refs: branches `refs/heads/ckpt/<kind>/<id>` for
//! the kinds taken before a change, tags `refs/tags/ckpt/<kind>/<id>` for the
//! rest. Metadata is stored as JSON under `<git-dir>/ckpt/`.
//!
//! ```
//! use ckpt_core::{CheckpointId, CheckpointKind, CheckpointRef};
//!
//! let id: CheckpointId = "20260101T120000123Z-0a1b2c3d".parse().unwrap();
//! let r = CheckpointRef::new(CheckpointKind::PostEdit, id);
//! assert_eq!(r.full_name(), "refs/tags/ckpt/post-edit/20260101T120000123Z-0a1b2c3d");
//! ```

mod checkpoint_id;
mod clock;
mod config;
mod dispatcher;
mod engine;
mod error;
mod lock;
mod query;
mod recorder;
mod refs;
mod retention;
mod store;
mod summary;
mod types;
mod vcs;
mod verify;

pub use checkpoint_id::CheckpointId;
pub use clock::Clock;
pub use config::{Config, HookConfig, LockConfig, RetentionConfig};
pub use dispatcher::{HookDispatcher, HookEvent, HookOutcome, HookPayload};
pub use engine::CheckpointEngine;
pub use error::{CkptError, Result};
pub use lock::{LockCoordinator, LockGuard, LockInfo};
pub use query::{QueryEngine, ResolvedCheckpoint};
pub use recorder::{SnapshotRecorder, SnapshotRequest};
pub use refs::{restore_branch_name, CheckpointRef, REF_NAMESPACE, RESTORE_NAMESPACE};
pub use retention::{
    parse_duration, CleanProgressCallback, CleanReport, RetentionManager, RetentionPolicy,
};
pub use store::{fingerprint, MetadataStore, RecordRead};
pub use summary::SessionSummarizer;
pub use types::*;
pub use vcs::GitBackend;
pub use verify::{recover, verify, RecoveryReport, VerifyReport};

/// Time provider trait for testing.
///
/// Allows injecting controlled time into the engine for testing ids, ages
/// and session spans. This is always available but only used when explicitly
/// set via `with_time_provider()`.
pub trait TimeProvider: Send + Sync {
    /// Returns the current Unix timestamp in milliseconds.
    fn now(&self) -> i64;
}

impl<F> TimeProvider for F
where
    F: Fn() -> i64 + Send + Sync,
{
    fn now(&self) -> i64 {
        self()
    }
}
