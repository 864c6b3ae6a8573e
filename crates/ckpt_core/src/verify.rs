//! Consistency checks and startup recovery.
//!
//! `verify` only reports. `recover` reconciles what an interrupted snapshot
//! or Stop left behind.

use crate::error::{CkptError, Result};
use crate::lock::LockCoordinator;
use crate::refs::{is_checkpoint_stash, CheckpointRef};
use crate::store::{MetadataStore, RecordRead};
use crate::summary::SessionSummarizer;
use crate::types::{JournalEntry, Session};
use crate::vcs::GitBackend;
use std::collections::HashSet;
use tracing::{info, warn};

/// Report from a consistency check.
#[derive(Debug, Default)]
pub struct VerifyReport {
    /// Checkpoint refs examined.
    pub refs_checked: usize,

    /// Checkpoint records examined.
    pub records_checked: usize,

    /// Refs without readable metadata.
    pub degraded: Vec<String>,

    /// Records whose ref no longer resolves.
    pub dangling_records: Vec<String>,

    /// Records whose ref now points at a different commit.
    pub moved_refs: Vec<String>,

    /// `(session, checkpoint)` pairs where the session names a checkpoint
    /// that has neither record nor ref.
    pub missing_from_sessions: Vec<(String, String)>,

    /// Stashes taken by the recorder that were never restored.
    pub leftover_stashes: Vec<String>,

    /// Journal entries of snapshots that never completed.
    pub unfinished: Vec<String>,
}

impl VerifyReport {
    /// Returns true if any issues were found.
    pub fn has_issues(&self) -> bool {
        !self.degraded.is_empty()
            || !self.dangling_records.is_empty()
            || !self.moved_refs.is_empty()
            || !self.missing_from_sessions.is_empty()
            || !self.leftover_stashes.is_empty()
            || !self.unfinished.is_empty()
    }

    /// Returns a summary message.
    pub fn summary(&self) -> String {
        if !self.has_issues() {
            return "Checkpoint store is healthy. No issues found.".to_string();
        }
        let mut issues = Vec::new();
        if !self.degraded.is_empty() {
            issues.push(format!("{} degraded checkpoints", self.degraded.len()));
        }
        if !self.dangling_records.is_empty() {
            issues.push(format!("{} records without refs", self.dangling_records.len()));
        }
        if !self.moved_refs.is_empty() {
            issues.push(format!("{} moved refs", self.moved_refs.len()));
        }
        if !self.missing_from_sessions.is_empty() {
            issues.push(format!(
                "{} missing session entries",
                self.missing_from_sessions.len()
            ));
        }
        if !self.leftover_stashes.is_empty() {
            issues.push(format!("{} leftover stashes", self.leftover_stashes.len()));
        }
        if !self.unfinished.is_empty() {
            issues.push(format!("{} unfinished snapshots", self.unfinished.len()));
        }
        format!("Checkpoint store has issues: {}", issues.join(", "))
    }
}

/// Checks refs, records, sessions and stashes against each other.
pub fn verify(vcs: &GitBackend, store: &MetadataStore) -> Result<VerifyReport> {
    let mut report = VerifyReport::default();

    let refs: Vec<(CheckpointRef, git2::Oid)> = vcs
        .list_refs(|name| CheckpointRef::parse(name).is_some())?
        .into_iter()
        .filter_map(|(name, oid)| CheckpointRef::parse(&name).map(|r| (r, oid)))
        .collect();
    let ref_ids: HashSet<_> = refs.iter().map(|(r, _)| r.id().clone()).collect();

    for (parsed, oid) in &refs {
        report.refs_checked += 1;
        match store.read_checkpoint(parsed.id())? {
            RecordRead::Found(checkpoint) => {
                if checkpoint.commit != oid.to_string() {
                    report.moved_refs.push(parsed.short_name());
                }
            }
            RecordRead::Missing | RecordRead::Corrupt(_) => {
                report.degraded.push(parsed.short_name());
            }
        }
    }

    let record_ids: HashSet<_> = store.list_checkpoint_ids()?.into_iter().collect();
    for id in &record_ids {
        report.records_checked += 1;
        if !ref_ids.contains(id) {
            report.dangling_records.push(id.to_string());
        }
    }
    report.dangling_records.sort();

    for session in store.list_sessions()? {
        for id in &session.checkpoint_ids {
            if !record_ids.contains(id) && !ref_ids.contains(id) {
                report
                    .missing_from_sessions
                    .push((session.id.clone(), id.to_string()));
            }
        }
    }

    report.leftover_stashes = vcs
        .list_stashes()?
        .into_iter()
        .filter(|(_, message)| is_checkpoint_stash(message))
        .map(|(_, message)| message)
        .collect();

    report.unfinished = store
        .list_journal()?
        .into_iter()
        .map(|entry| entry.checkpoint_id.to_string())
        .collect();

    Ok(report)
}

/// What startup recovery did.
#[derive(Debug, Default)]
pub struct RecoveryReport {
    /// A stale lock file was removed.
    pub stale_lock_cleared: bool,

    /// Another live holder had the lock; nothing else was attempted.
    pub skipped: bool,

    /// Journal entries reconciled.
    pub journal_entries: usize,

    /// Stashes re-applied to the working tree.
    pub stashes_restored: Vec<String>,

    /// Half-created refs deleted.
    pub refs_removed: Vec<String>,

    /// Sessions that were missing a recorded checkpoint id.
    pub sessions_repaired: Vec<String>,

    /// Open sessions closed because their last checkpoint is a SessionEnd.
    pub sessions_closed: Vec<String>,
}

impl RecoveryReport {
    /// True if recovery had nothing to do.
    pub fn is_clean(&self) -> bool {
        !self.stale_lock_cleared
            && self.journal_entries == 0
            && self.stashes_restored.is_empty()
            && self.refs_removed.is_empty()
            && self.sessions_repaired.is_empty()
            && self.sessions_closed.is_empty()
    }
}

/// Reconciles state left by interrupted snapshots.
///
/// For each journal entry: re-apply its stash if still present, drop the ref
/// if its metadata was never written, make sure a completed record is listed
/// in its session, then remove the entry. Checkpoint stashes without a journal
/// entry are re-applied too. An open session whose last checkpoint is a
/// SessionEnd was stopped by a process that died before closing it; it is
/// closed now. Runs under the lock; if another live process holds it,
/// recovery is skipped since its journal entries are in flight.
pub fn recover(
    vcs: &GitBackend,
    store: &MetadataStore,
    lock: &LockCoordinator,
    summarizer: &SessionSummarizer,
) -> Result<RecoveryReport> {
    let mut report = RecoveryReport {
        stale_lock_cleared: lock.clear_stale()?,
        ..RecoveryReport::default()
    };

    let _guard = match lock.acquire() {
        Ok(guard) => guard,
        Err(CkptError::LockTimeout { .. }) => {
            warn!("checkpoint lock is held by a live process; skipping recovery");
            report.skipped = true;
            return Ok(report);
        }
        Err(e) => return Err(e),
    };

    for entry in store.list_journal()? {
        report.journal_entries += 1;
        if let Err(e) = reconcile(vcs, store, &entry, &mut report) {
            warn!(id = %entry.checkpoint_id, error = %e, "could not reconcile journal entry; keeping it");
            continue;
        }
        store.delete_journal(&entry.checkpoint_id)?;
    }

    for (_, message) in vcs.list_stashes()? {
        if !is_checkpoint_stash(&message) {
            continue;
        }
        match vcs.stash_pop_by_message(&message) {
            Ok(true) => {
                info!(stash = %message, "re-applied orphaned checkpoint stash");
                report.stashes_restored.push(message);
            }
            Ok(false) => {}
            Err(e) => warn!(stash = %message, error = %e, "could not re-apply orphaned stash"),
        }
    }

    for session in store.list_sessions()? {
        if session.is_open() && store.ends_with_session_end(&session)? {
            summarizer.finalize(&session.id)?;
            info!(session = %session.id, "closed session interrupted during stop");
            report.sessions_closed.push(session.id);
        }
    }

    if !report.is_clean() {
        info!(
            journal = report.journal_entries,
            stashes = report.stashes_restored.len(),
            refs = report.refs_removed.len(),
            "recovered from interrupted checkpoint operations"
        );
    }
    Ok(report)
}

fn reconcile(
    vcs: &GitBackend,
    store: &MetadataStore,
    entry: &JournalEntry,
    report: &mut RecoveryReport,
) -> Result<()> {
    if let Some(message) = &entry.stash_message {
        if vcs.stash_pop_by_message(message)? {
            info!(id = %entry.checkpoint_id, "re-applied stash of interrupted snapshot");
            report.stashes_restored.push(message.clone());
        }
    }

    let full_name = CheckpointRef::new(entry.kind, entry.checkpoint_id.clone()).full_name();
    match store.read_checkpoint(&entry.checkpoint_id)? {
        RecordRead::Found(checkpoint) => {
            let mut session = store
                .read_session(&checkpoint.session_id)?
                .found()
                .unwrap_or_else(|| Session::new(&checkpoint.session_id, checkpoint.created_at));
            if !session.checkpoint_ids.contains(&checkpoint.id) {
                session.checkpoint_ids.push(checkpoint.id.clone());
                session.checkpoint_ids.sort();
                store.put_session(&session)?;
                report.sessions_repaired.push(session.id);
            }
        }
        RecordRead::Missing | RecordRead::Corrupt(_) => {
            if vcs.delete_ref(&full_name)? {
                info!(reference = %full_name, "removed ref of unfinished snapshot");
                report.refs_removed.push(full_name);
            }
        }
    }
    Ok(())
}
