//! Read and rollback operations over recorded checkpoints.
//!
//! Reads take no lock. Refs are resolved once at the start of a call, so a
//! concurrent snapshot either shows up completely or not at all.

use crate::error::{CkptError, Result};
use crate::lock::LockCoordinator;
use crate::refs::{restore_branch_name, CheckpointRef};
use crate::store::{MetadataStore, RecordRead};
use crate::types::{
    CheckpointDetail, CheckpointEntry, CheckpointKind, DegradedCheckpoint, DiffReport,
    RollbackMode, RollbackReport,
};
use crate::vcs::GitBackend;
use crate::CheckpointId;
use git2::{ErrorCode, Oid};
use std::sync::Arc;
use tracing::{info, warn};

/// A checkpoint resolved to its commit.
#[derive(Debug, Clone)]
pub struct ResolvedCheckpoint {
    /// Listing entry.
    pub entry: CheckpointEntry,
    /// Fully qualified ref name.
    pub ref_name: String,
    /// Commit the ref points at.
    pub commit: Oid,
}

/// Query and rollback engine.
pub struct QueryEngine {
    vcs: GitBackend,
    store: MetadataStore,
    lock: Arc<LockCoordinator>,
}

impl QueryEngine {
    /// Creates a query engine over shared components.
    pub fn new(vcs: GitBackend, store: MetadataStore, lock: Arc<LockCoordinator>) -> Self {
        Self { vcs, store, lock }
    }

    /// All checkpoints, newest first.
    ///
    /// Refs without a readable record are included as degraded entries.
    /// Records whose ref is gone are skipped.
    pub fn list(&self) -> Result<Vec<CheckpointEntry>> {
        let refs = self.checkpoint_refs()?;
        let mut entries = Vec::with_capacity(refs.len());
        for (parsed, commit) in refs {
            entries.push(self.entry_for(&parsed, commit)?);
        }
        entries.sort_by(|a, b| b.id().cmp(a.id()));
        Ok(entries)
    }

    /// Every checkpoint ref with the commit it points at.
    pub(crate) fn checkpoint_refs(&self) -> Result<Vec<(CheckpointRef, Oid)>> {
        Ok(self
            .vcs
            .list_refs(|name| CheckpointRef::parse(name).is_some())?
            .into_iter()
            .filter_map(|(name, oid)| CheckpointRef::parse(&name).map(|r| (r, oid)))
            .collect())
    }

    fn entry_for(&self, parsed: &CheckpointRef, commit: Oid) -> Result<CheckpointEntry> {
        let degraded = |reason: String| {
            warn!(id = %parsed.id(), reason = %reason, "degraded checkpoint");
            CheckpointEntry::Degraded(DegradedCheckpoint {
                id: parsed.id().clone(),
                kind: parsed.kind(),
                vcs_ref: parsed.short_name(),
                commit: commit.to_string(),
                reason,
            })
        };
        Ok(match self.store.read_checkpoint(parsed.id())? {
            RecordRead::Found(checkpoint) => CheckpointEntry::Recorded(checkpoint),
            RecordRead::Missing => degraded("metadata missing".to_string()),
            RecordRead::Corrupt(reason) => degraded(format!("metadata corrupt: {}", reason)),
        })
    }

    /// Resolves an id (or a checkpoint ref name) to its entry and commit.
    ///
    /// # Errors
    ///
    /// Returns `CheckpointNotFound` if nothing resolves.
    pub fn resolve(&self, id_or_ref: &str) -> Result<ResolvedCheckpoint> {
        let not_found = || CkptError::CheckpointNotFound(id_or_ref.to_string());
        let id: CheckpointId = match CheckpointRef::parse(id_or_ref) {
            Some(parsed) => parsed.id().clone(),
            None => id_or_ref.trim().parse().map_err(|_| not_found())?,
        };

        // The recorded kind decides the ref; without a record, try every kind.
        let kinds: Vec<CheckpointKind> = match self.store.read_checkpoint(&id)? {
            RecordRead::Found(checkpoint) => vec![checkpoint.kind],
            _ => CheckpointKind::ALL.to_vec(),
        };
        for kind in kinds {
            let parsed = CheckpointRef::new(kind, id.clone());
            let ref_name = parsed.full_name();
            if let Some(commit) = self.vcs.resolve(&ref_name)? {
                return Ok(ResolvedCheckpoint {
                    entry: self.entry_for(&parsed, commit)?,
                    ref_name,
                    commit,
                });
            }
        }
        Err(not_found())
    }

    /// A checkpoint with its diff against its parent.
    ///
    /// The parent is the recorded `parentRef` when that is itself a
    /// checkpoint, otherwise the commit's first parent.
    pub fn show(&self, id: &str) -> Result<CheckpointDetail> {
        let resolved = self.resolve(id)?;
        let parent = match resolved.entry.checkpoint() {
            Some(checkpoint) if CheckpointRef::parse(&checkpoint.parent_ref).is_some() => {
                self.vcs.resolve(&checkpoint.parent_ref)?
            }
            _ => None,
        };
        let parent = match parent {
            Some(oid) => Some(oid),
            None => self.vcs.first_parent(resolved.commit)?,
        };
        let diff = self.vcs.diff_commits(parent, resolved.commit)?;
        Ok(CheckpointDetail {
            entry: resolved.entry,
            diff,
        })
    }

    /// Diff from the checkpoint to the current index and working tree.
    pub fn diff(&self, id: &str) -> Result<DiffReport> {
        let resolved = self.resolve(id)?;
        self.vcs.diff_to_workdir(resolved.commit)
    }

    /// Moves the workspace to a checkpoint.
    ///
    /// # Errors
    ///
    /// - `CheckpointNotFound` if the id does not resolve
    /// - `DirtyWorkingTree` for a hard rollback over tracked changes without
    ///   `force`, or a branch rollback whose checkout would overwrite them
    /// - `LockTimeout` if the lock is busy
    pub fn rollback(&self, id: &str, mode: RollbackMode, force: bool) -> Result<RollbackReport> {
        let _guard = self.lock.acquire()?;
        let resolved = self.resolve(id)?;
        let target = resolved.commit;

        match mode {
            RollbackMode::Soft => self.vcs.reset_soft(target)?,
            RollbackMode::Hard => {
                let dirty = self.vcs.dirty_paths(false)?;
                if !dirty.is_empty() && !force {
                    return Err(CkptError::DirtyWorkingTree { paths: dirty });
                }
                if !dirty.is_empty() {
                    warn!(paths = dirty.len(), "discarding uncommitted changes (forced)");
                }
                self.vcs.reset_hard(target)?;
            }
            RollbackMode::Branch => {
                let name = restore_branch_name(resolved.entry.id());
                match self.vcs.switch_to_new_branch(&name, target) {
                    Ok(()) => {}
                    Err(CkptError::Git(e)) if e.code() == ErrorCode::Conflict => {
                        return Err(CkptError::DirtyWorkingTree {
                            paths: self.vcs.dirty_paths(false)?,
                        });
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        let report = RollbackReport {
            id: resolved.entry.id().clone(),
            mode,
            commit: target.to_string(),
            branch: self.vcs.current_branch()?,
        };
        info!(id = %report.id, mode = ?mode, commit = %report.commit, "rolled back");
        Ok(report)
    }
}
