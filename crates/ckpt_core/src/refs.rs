//! Checkpoint ref naming.
//!
//! Refs are named deterministically from kind and id so that tooling can
//! parse and sort them without reading metadata:
//!
//! - `refs/heads/ckpt/pre-edit/<id>`, `refs/heads/ckpt/pre-create/<id>`
//! - `refs/tags/ckpt/post-edit/<id>`, `refs/tags/ckpt/task-start/<id>`,
//!   `refs/tags/ckpt/session-end/<id>`

use crate::types::CheckpointKind;
use crate::CheckpointId;

/// Namespace shared by every checkpoint ref.
pub const REF_NAMESPACE: &str = "ckpt";

/// Prefix of branches created by `rollback --branch`.
pub const RESTORE_NAMESPACE: &str = "ckpt-restore";

/// Message prefix of stashes taken by the recorder.
pub const STASH_PREFIX: &str = "ckpt:";

/// A parsed checkpoint ref.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CheckpointRef {
    kind: CheckpointKind,
    id: CheckpointId,
}

impl CheckpointRef {
    /// Creates the ref for a checkpoint.
    pub fn new(kind: CheckpointKind, id: CheckpointId) -> Self {
        Self { kind, id }
    }

    /// The checkpoint kind.
    pub fn kind(&self) -> CheckpointKind {
        self.kind
    }

    /// The checkpoint id.
    pub fn id(&self) -> &CheckpointId {
        &self.id
    }

    /// Name without the `refs/heads/` or `refs/tags/` prefix.
    pub fn short_name(&self) -> String {
        format!("{}/{}/{}", REF_NAMESPACE, self.kind.slug(), self.id)
    }

    /// Fully qualified ref name.
    pub fn full_name(&self) -> String {
        let base = if self.kind.is_branch() {
            "refs/heads"
        } else {
            "refs/tags"
        };
        format!("{}/{}", base, self.short_name())
    }

    /// Parses a fully qualified or short checkpoint ref name.
    ///
    /// Returns `None` for anything outside the checkpoint namespace, and for
    /// names stored under the wrong `heads`/`tags` root for their kind.
    pub fn parse(name: &str) -> Option<Self> {
        let (root, short) = if let Some(rest) = name.strip_prefix("refs/heads/") {
            (Some(true), rest)
        } else if let Some(rest) = name.strip_prefix("refs/tags/") {
            (Some(false), rest)
        } else {
            (None, name)
        };

        let mut parts = short.splitn(3, '/');
        if parts.next()? != REF_NAMESPACE {
            return None;
        }
        let kind = CheckpointKind::from_slug(parts.next()?)?;
        let id: CheckpointId = parts.next()?.parse().ok()?;

        if let Some(is_branch) = root {
            if is_branch != kind.is_branch() {
                return None;
            }
        }

        Some(Self { kind, id })
    }
}

/// Short name of the branch `rollback --branch` creates for a checkpoint.
pub fn restore_branch_name(id: &CheckpointId) -> String {
    format!("{}/{}", RESTORE_NAMESPACE, id)
}

/// Message used for the stash taken while recording `id`.
pub fn stash_message(id: &CheckpointId) -> String {
    format!("{} pre-edit {}", STASH_PREFIX, id)
}

/// True for a stash message written by [`stash_message`].
///
/// git prefixes stash messages with `On <branch>: `, so this matches anywhere.
pub fn is_checkpoint_stash(message: &str) -> bool {
    message.contains(&format!("{} pre-edit ", STASH_PREFIX))
}
