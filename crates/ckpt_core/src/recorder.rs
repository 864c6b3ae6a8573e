//! Snapshot recorder.
//!
//! Turns one lifecycle boundary into a git ref plus a metadata record. Every
//! snapshot follows the same shape:
//!
//! 1. take the lock and allocate a monotonic id,
//! 2. write a journal entry describing the intended mutation,
//! 3. run the git steps, pushing an undo action after each one,
//! 4. persist the checkpoint and session records,
//! 5. remove the journal entry.
//!
//! A failing step replays the undo log in reverse before the error surfaces.
//! A crash leaves the journal behind for startup recovery to reconcile.

use crate::clock::Clock;
use crate::error::{CkptError, Result};
use crate::lock::LockCoordinator;
use crate::refs::{stash_message, CheckpointRef};
use crate::store::{fingerprint, MetadataStore};
use crate::types::{
    Checkpoint, CheckpointKind, DiffStat, JournalEntry, PendingEdit, Session, SessionContext,
};
use crate::vcs::GitBackend;
use crate::CheckpointId;
use git2::Oid;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Changed paths listed in a commit message before eliding the rest.
const MESSAGE_PATH_LIMIT: usize = 10;

/// What to snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRequest {
    /// Checkpoint kind.
    pub kind: CheckpointKind,
    /// Paths named by the triggering event.
    pub files: BTreeSet<String>,
    /// Free text stored on the record.
    pub note: Option<String>,
}

impl SnapshotRequest {
    /// A request without a note.
    pub fn new(kind: CheckpointKind, files: impl IntoIterator<Item = String>) -> Self {
        Self {
            kind,
            files: files.into_iter().collect(),
            note: None,
        }
    }

    /// Attaches a note.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Git-level result of a snapshot.
struct Snapshot {
    commit: Oid,
    parent_ref: String,
    diff_stat: DiffStat,
    /// Pending entry consumed by a PostEdit.
    consumed: Option<String>,
}

/// Reversal of one completed git step.
#[derive(Debug)]
enum Undo {
    PopStash(String),
    DeleteRef(String),
    ResetSoft(Oid),
}

/// Records checkpoints.
pub struct SnapshotRecorder {
    vcs: GitBackend,
    store: MetadataStore,
    lock: Arc<LockCoordinator>,
    clock: Clock,
    #[cfg(test)]
    fault: std::sync::Mutex<Option<&'static str>>,
}

impl SnapshotRecorder {
    /// Creates a recorder over shared components.
    pub fn new(
        vcs: GitBackend,
        store: MetadataStore,
        lock: Arc<LockCoordinator>,
        clock: Clock,
    ) -> Self {
        Self {
            vcs,
            store,
            lock,
            clock,
            #[cfg(test)]
            fault: std::sync::Mutex::new(None),
        }
    }

    /// Records one checkpoint for `ctx`.
    ///
    /// # Errors
    ///
    /// - `LockTimeout` if the lock is not acquired in time
    /// - `SessionClosed` if the session was already stopped
    /// - `VcsOperationFailed` if a git step failed; completed steps are undone
    /// - `MetadataWriteFailed` if the ref exists but its record could not be
    ///   written
    pub fn record(&self, ctx: &SessionContext, request: SnapshotRequest) -> Result<Checkpoint> {
        let _guard = self.lock.acquire()?;
        let mut session = self.open_session(ctx, request.kind)?;

        self.vcs
            .ensure_initial_commit()
            .map_err(|e| CkptError::vcs("bootstrap", e))?;

        let last = self.store.read_last_id()?;
        let id = CheckpointId::generate(self.clock.now_ms(), last.as_ref());
        self.store.write_last_id(&id)?;

        let vcs_ref = CheckpointRef::new(request.kind, id.clone());
        let mut journal = JournalEntry {
            checkpoint_id: id.clone(),
            kind: request.kind,
            vcs_ref: vcs_ref.short_name(),
            stash_message: None,
        };
        self.store.put_journal(&journal)?;

        let mut undo = Vec::new();
        let snapshot = match self.apply(ctx, &request, &vcs_ref, &mut journal, &mut undo) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(id = %id, kind = %request.kind, error = %e, "snapshot failed, reverting");
                if self.revert(undo) {
                    self.store.delete_journal(&id)?;
                }
                return Err(e);
            }
        };

        let checkpoint = Checkpoint {
            id: id.clone(),
            kind: request.kind,
            vcs_ref: vcs_ref.short_name(),
            parent_ref: snapshot.parent_ref,
            created_at: id.created_at(),
            file_list: request.files,
            diff_stat: snapshot.diff_stat,
            note: request.note,
            session_id: ctx.session_id().to_string(),
            commit: snapshot.commit.to_string(),
        };

        if let Err(e) = self.persist(&checkpoint, &mut session, snapshot.consumed.as_deref()) {
            // The ref is now the recoverable snapshot; dropping the journal
            // keeps recovery from deleting it.
            warn!(id = %id, error = %e, "checkpoint ref created but metadata write failed");
            if let Err(journal_err) = self.store.delete_journal(&id) {
                warn!(id = %id, error = %journal_err, "failed to remove journal entry");
            }
            return Err(CkptError::MetadataWriteFailed {
                id: id.to_string(),
                reason: e.to_string(),
            });
        }
        self.store.delete_journal(&id)?;

        info!(
            id = %id,
            kind = %checkpoint.kind,
            session = ctx.session_id(),
            files = checkpoint.file_list.len(),
            "recorded checkpoint"
        );
        Ok(checkpoint)
    }

    /// Loads the session for an event, creating it on first sight.
    fn open_session(&self, ctx: &SessionContext, kind: CheckpointKind) -> Result<Session> {
        match self.store.load_session(ctx.session_id()) {
            Ok(session) if !session.is_open() => {
                debug!(session = ctx.session_id(), kind = %kind, "event for closed session");
                Err(CkptError::SessionClosed(session.id))
            }
            Ok(session) if self.store.ends_with_session_end(&session)? => {
                warn!(session = ctx.session_id(), kind = %kind, "event after session end checkpoint");
                Err(CkptError::SessionClosed(session.id))
            }
            Ok(session) => Ok(session),
            Err(CkptError::SessionNotFound(_)) => {
                Ok(Session::new(ctx.session_id(), self.clock.now()))
            }
            Err(e) => Err(e),
        }
    }

    fn apply(
        &self,
        ctx: &SessionContext,
        request: &SnapshotRequest,
        vcs_ref: &CheckpointRef,
        journal: &mut JournalEntry,
        undo: &mut Vec<Undo>,
    ) -> Result<Snapshot> {
        let head = self
            .vcs
            .head_commit()?
            .ok_or_else(|| CkptError::vcs("resolve-head", "HEAD does not point at a commit"))?;
        let label = self.vcs.parent_label()?;

        match request.kind {
            CheckpointKind::PreEdit => {
                self.pre_edit(vcs_ref, head, label, journal, undo)
            }
            CheckpointKind::PreCreate => {
                self.create_ref(vcs_ref, head, undo)?;
                Ok(Snapshot {
                    commit: head,
                    parent_ref: label,
                    diff_stat: DiffStat::default(),
                    consumed: None,
                })
            }
            CheckpointKind::PostEdit => self.post_edit(ctx, request, vcs_ref, head, label, undo),
            CheckpointKind::TaskStart => {
                let mut commit = head;
                if !self.vcs.dirty_paths(true)?.is_empty() {
                    let message = request.note.as_deref().unwrap_or("task start");
                    commit = self.commit(message, head, undo)?;
                }
                self.create_ref(vcs_ref, commit, undo)?;
                Ok(Snapshot {
                    commit,
                    parent_ref: label,
                    diff_stat: self.diff_stat(head, commit)?,
                    consumed: None,
                })
            }
            CheckpointKind::SessionEnd => {
                self.create_ref(vcs_ref, head, undo)?;
                Ok(Snapshot {
                    commit: head,
                    parent_ref: label,
                    diff_stat: DiffStat::default(),
                    consumed: None,
                })
            }
        }
    }

    fn pre_edit(
        &self,
        vcs_ref: &CheckpointRef,
        head: Oid,
        label: String,
        journal: &mut JournalEntry,
        undo: &mut Vec<Undo>,
    ) -> Result<Snapshot> {
        let dirty = self.vcs.dirty_paths(false)?;
        let mut stashed = None;
        if !dirty.is_empty() {
            let message = stash_message(vcs_ref.id());
            // The journal must name the stash before it exists.
            journal.stash_message = Some(message.clone());
            self.store.put_journal(journal)?;

            self.fault("stash")?;
            self.vcs
                .stash_save(&message)
                .map_err(|e| CkptError::vcs("stash", e))?;
            undo.push(Undo::PopStash(message.clone()));
            stashed = Some(message);
        }

        self.create_ref(vcs_ref, head, undo)?;

        if let Some(message) = stashed {
            self.fault("restore-stash")?;
            match self.vcs.stash_pop_by_message(&message) {
                Ok(true) => {
                    undo.retain(|u| !matches!(u, Undo::PopStash(_)));
                }
                Ok(false) => {
                    return Err(CkptError::vcs("restore-stash", "stash disappeared"));
                }
                Err(e) => return Err(CkptError::vcs("restore-stash", e)),
            }
        }

        Ok(Snapshot {
            commit: head,
            parent_ref: label,
            diff_stat: DiffStat::default(),
            consumed: None,
        })
    }

    fn post_edit(
        &self,
        ctx: &SessionContext,
        request: &SnapshotRequest,
        vcs_ref: &CheckpointRef,
        head: Oid,
        label: String,
        undo: &mut Vec<Undo>,
    ) -> Result<Snapshot> {
        let pending = self.find_pending(ctx.session_id(), &request.files)?;
        let (parent_ref, parent_commit, consumed) = match pending {
            Some((key, edit)) => match self.vcs.resolve(&edit.vcs_ref)? {
                Some(oid) => (edit.vcs_ref, oid, Some(key)),
                None => {
                    warn!(
                        pending = %edit.vcs_ref,
                        "paired pre-edit ref no longer resolves; using current branch"
                    );
                    (label, head, Some(key))
                }
            },
            None => {
                warn!(
                    session = ctx.session_id(),
                    files = ?request.files,
                    "no pending pre-edit for this file set; using current branch"
                );
                (label, head, None)
            }
        };

        let changed = self.vcs.dirty_paths(true)?;
        let commit = if changed.is_empty() {
            head
        } else {
            self.commit(&commit_message(&changed), head, undo)?
        };
        self.create_ref(vcs_ref, commit, undo)?;

        Ok(Snapshot {
            commit,
            parent_ref,
            diff_stat: self.diff_stat(parent_commit, commit)?,
            consumed,
        })
    }

    /// Pending entry for a PostEdit: exact fingerprint first, then the newest
    /// entry of the session covering every file.
    fn find_pending(
        &self,
        session_id: &str,
        files: &BTreeSet<String>,
    ) -> Result<Option<(String, PendingEdit)>> {
        let key = fingerprint(session_id, files);
        if let Some(edit) = self.store.read_pending(&key)? {
            if edit.session_id == session_id {
                return Ok(Some((key, edit)));
            }
        }
        Ok(self
            .store
            .list_pending(session_id)?
            .into_iter()
            .filter(|(_, edit)| edit.files.is_superset(files))
            .max_by(|a, b| a.1.checkpoint_id.cmp(&b.1.checkpoint_id)))
    }

    fn create_ref(&self, vcs_ref: &CheckpointRef, oid: Oid, undo: &mut Vec<Undo>) -> Result<()> {
        self.fault("create-ref")?;
        let name = vcs_ref.full_name();
        self.vcs
            .create_ref(&name, oid)
            .map_err(|e| CkptError::vcs("create-ref", e))?;
        undo.push(Undo::DeleteRef(name));
        Ok(())
    }

    fn commit(&self, message: &str, head: Oid, undo: &mut Vec<Undo>) -> Result<Oid> {
        self.fault("commit")?;
        let (commit, created) = self
            .vcs
            .commit_all(message, head)
            .map_err(|e| CkptError::vcs("commit", e))?;
        if created {
            undo.push(Undo::ResetSoft(head));
        }
        Ok(commit)
    }

    fn diff_stat(&self, old: Oid, new: Oid) -> Result<DiffStat> {
        if old == new {
            return Ok(DiffStat::default());
        }
        self.fault("diff")?;
        self.vcs
            .diff_commits(Some(old), new)
            .map(|report| report.stat)
            .map_err(|e| CkptError::vcs("diff", e))
    }

    /// Replays the undo log newest first. Returns true if every step succeeded.
    fn revert(&self, undo: Vec<Undo>) -> bool {
        let mut clean = true;
        for step in undo.into_iter().rev() {
            let result = match &step {
                Undo::PopStash(message) => self.vcs.stash_pop_by_message(message).map(|_| ()),
                Undo::DeleteRef(name) => self.vcs.delete_ref(name).map(|_| ()),
                Undo::ResetSoft(oid) => self.vcs.reset_soft(*oid),
            };
            if let Err(e) = result {
                warn!(step = ?step, error = %e, "failed to undo snapshot step; leaving journal for recovery");
                clean = false;
            }
        }
        clean
    }

    /// Writes the checkpoint record, appends it to its session and updates
    /// the pending map.
    fn persist(
        &self,
        checkpoint: &Checkpoint,
        session: &mut Session,
        consumed: Option<&str>,
    ) -> Result<()> {
        self.fault("metadata")?;
        self.store.put_checkpoint(checkpoint)?;

        session.checkpoint_ids.push(checkpoint.id.clone());
        self.store.put_session(session)?;

        match checkpoint.kind {
            CheckpointKind::PreEdit | CheckpointKind::PreCreate => {
                let key = fingerprint(&checkpoint.session_id, &checkpoint.file_list);
                self.store.put_pending(
                    &key,
                    &PendingEdit {
                        session_id: checkpoint.session_id.clone(),
                        files: checkpoint.file_list.clone(),
                        checkpoint_id: checkpoint.id.clone(),
                        vcs_ref: checkpoint.vcs_ref.clone(),
                        created_at: checkpoint.created_at,
                    },
                )?;
            }
            CheckpointKind::PostEdit => {
                if let Some(key) = consumed {
                    self.store.delete_pending(key)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Fails the named step when a test armed it.
    fn fault(&self, step: &str) -> Result<()> {
        #[cfg(test)]
        {
            let armed = self.fault.lock().map(|f| *f == Some(step)).unwrap_or(false);
            if armed {
                if step == "metadata" {
                    return Err(CkptError::Io(std::io::Error::other("injected failure")));
                }
                return Err(CkptError::vcs(step, "injected failure"));
            }
        }
        let _ = step;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn fail_at(&self, step: Option<&'static str>) {
        *self.fault.lock().unwrap() = step;
    }
}

/// Commit message summarizing the changed paths.
fn commit_message(changed: &[String]) -> String {
    let mut message = String::from("ckpt: post-edit");
    let shown: Vec<&str> = changed
        .iter()
        .take(MESSAGE_PATH_LIMIT)
        .map(String::as_str)
        .collect();
    message.push(' ');
    message.push_str(&shown.join(", "));
    if changed.len() > MESSAGE_PATH_LIMIT {
        message.push_str(&format!(" and {} more", changed.len() - MESSAGE_PATH_LIMIT));
    }
    message
}
