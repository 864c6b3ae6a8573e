//! Core data types for checkpoints and sessions.

use crate::CheckpointId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

/// Lifecycle boundary a checkpoint was taken at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CheckpointKind {
    /// Before a tracked file is edited.
    PreEdit,
    /// After an edit completed.
    PostEdit,
    /// Before a new file is created.
    PreCreate,
    /// At the start of a task.
    TaskStart,
    /// When a session stops.
    SessionEnd,
}

impl CheckpointKind {
    /// All kinds, in lifecycle order.
    pub const ALL: [CheckpointKind; 5] = [
        CheckpointKind::PreEdit,
        CheckpointKind::PostEdit,
        CheckpointKind::PreCreate,
        CheckpointKind::TaskStart,
        CheckpointKind::SessionEnd,
    ];

    /// Kebab-case name used inside ref names.
    pub fn slug(&self) -> &'static str {
        match self {
            Self::PreEdit => "pre-edit",
            Self::PostEdit => "post-edit",
            Self::PreCreate => "pre-create",
            Self::TaskStart => "task-start",
            Self::SessionEnd => "session-end",
        }
    }

    /// Inverse of [`slug`](Self::slug).
    pub fn from_slug(slug: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.slug() == slug)
    }

    /// Pre* kinds are recorded as branches, everything else as tags.
    pub fn is_branch(&self) -> bool {
        matches!(self, Self::PreEdit | Self::PreCreate)
    }
}

impl fmt::Display for CheckpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

/// Line and file counts between two trees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffStat {
    /// Inserted lines.
    pub added: usize,
    /// Deleted lines.
    pub removed: usize,
    /// Files with any change.
    pub files_changed: usize,
}

/// An immutable recorded snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    /// Unique, chronologically sortable id.
    pub id: CheckpointId,
    /// Lifecycle boundary.
    pub kind: CheckpointKind,
    /// Short ref name, e.g. `ckpt/pre-edit/<id>`.
    pub vcs_ref: String,
    /// Ref this checkpoint was taken relative to.
    pub parent_ref: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Paths named by the triggering event.
    pub file_list: BTreeSet<String>,
    /// Change size relative to `parent_ref`.
    pub diff_stat: DiffStat,
    /// Free text, e.g. the task description.
    #[serde(default)]
    pub note: Option<String>,
    /// Owning session.
    pub session_id: String,
    /// Hex commit id `vcs_ref` pointed to when recorded.
    pub commit: String,
}

/// A bounded sequence of checkpoints between a start and a stop event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Session id supplied by the runtime.
    pub id: String,
    /// When the first event for this session arrived.
    pub started_at: DateTime<Utc>,
    /// Set once, by the first Stop.
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    /// Checkpoints in creation order.
    #[serde(default)]
    pub checkpoint_ids: Vec<CheckpointId>,
    /// Rendered report, set when closed.
    #[serde(default)]
    pub summary_path: Option<PathBuf>,
}

impl Session {
    /// Creates an open session.
    pub fn new(id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            started_at,
            ended_at: None,
            checkpoint_ids: Vec::new(),
            summary_path: None,
        }
    }

    /// True until the session has been stopped.
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// Explicit per-call session context.
///
/// Every dispatcher call carries the session it belongs to instead of
/// relying on ambient "current session" state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionContext {
    session_id: String,
}

impl SessionContext {
    /// Creates a context for the given session id.
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
        }
    }

    /// The session id.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

/// How `rollback` moves the workspace to a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackMode {
    /// Move the current branch; later changes stay staged.
    Soft,
    /// Move the current branch and discard later changes.
    Hard,
    /// Create and switch to a new branch at the checkpoint.
    Branch,
}

/// Result of a rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackReport {
    /// Checkpoint rolled back to.
    pub id: CheckpointId,
    /// Mode used.
    pub mode: RollbackMode,
    /// Commit HEAD now points at.
    pub commit: String,
    /// Branch HEAD is attached to afterwards, if any.
    pub branch: Option<String>,
}

/// An entry in the pending PreEdit map, keyed by file-set fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingEdit {
    /// Session that registered the edit.
    pub session_id: String,
    /// Files the edit covers.
    pub files: BTreeSet<String>,
    /// PreEdit/PreCreate checkpoint id.
    pub checkpoint_id: CheckpointId,
    /// Its ref.
    pub vcs_ref: String,
    /// Registration time.
    pub created_at: DateTime<Utc>,
}

/// Intent record written before the first version-control mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    /// Checkpoint being recorded.
    pub checkpoint_id: CheckpointId,
    /// Its kind.
    pub kind: CheckpointKind,
    /// Ref about to be created.
    pub vcs_ref: String,
    /// Message of the stash taken for this snapshot, if any.
    #[serde(default)]
    pub stash_message: Option<String>,
}

/// A checkpoint ref whose metadata is missing or unreadable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DegradedCheckpoint {
    /// Id parsed from the ref name.
    pub id: CheckpointId,
    /// Kind parsed from the ref name.
    pub kind: CheckpointKind,
    /// Short ref name.
    pub vcs_ref: String,
    /// Commit the ref resolves to.
    pub commit: String,
    /// Why the metadata could not be used.
    pub reason: String,
}

/// A listed checkpoint: fully recorded or degraded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointEntry {
    /// Ref and metadata both present.
    Recorded(Checkpoint),
    /// Ref present, metadata missing or corrupt.
    Degraded(DegradedCheckpoint),
}

impl CheckpointEntry {
    /// Entry id.
    pub fn id(&self) -> &CheckpointId {
        match self {
            Self::Recorded(c) => &c.id,
            Self::Degraded(d) => &d.id,
        }
    }

    /// Entry kind.
    pub fn kind(&self) -> CheckpointKind {
        match self {
            Self::Recorded(c) => c.kind,
            Self::Degraded(d) => d.kind,
        }
    }

    /// Short ref name.
    pub fn vcs_ref(&self) -> &str {
        match self {
            Self::Recorded(c) => &c.vcs_ref,
            Self::Degraded(d) => &d.vcs_ref,
        }
    }

    /// Owning session, when metadata is available.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::Recorded(c) => Some(&c.session_id),
            Self::Degraded(_) => None,
        }
    }

    /// Creation time (from the id for degraded entries).
    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            Self::Recorded(c) => c.created_at,
            Self::Degraded(d) => d.id.created_at(),
        }
    }

    /// True when metadata is missing or corrupt.
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded(_))
    }

    /// The full record, if present.
    pub fn checkpoint(&self) -> Option<&Checkpoint> {
        match self {
            Self::Recorded(c) => Some(c),
            Self::Degraded(_) => None,
        }
    }
}

/// Output of `show`.
#[derive(Debug, Clone)]
pub struct CheckpointDetail {
    /// The entry.
    pub entry: CheckpointEntry,
    /// Diff against the checkpoint's parent.
    pub diff: DiffReport,
}

/// A rendered diff with its stat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffReport {
    /// Counts.
    pub stat: DiffStat,
    /// Paths touched.
    pub files: Vec<String>,
    /// Unified patch text.
    pub patch: String,
}
