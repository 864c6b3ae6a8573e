//! Retention: pruning old checkpoints.
//!
//! A clean pass works in three phases:
//! 1. **Scan**: list every checkpoint and mark those of open sessions as
//!    protected.
//! 2. **Select**: among the rest, keep the newest `max_count` per kind and
//!    drop anything older than `max_age`.
//! 3. **Remove**: delete metadata, then the ref, then prune the session
//!    record. If any removal fails, everything already removed in this call
//!    is put back.

use crate::clock::Clock;
use crate::config::RetentionConfig;
use crate::error::{CkptError, Result};
use crate::lock::LockCoordinator;
use crate::query::{QueryEngine, ResolvedCheckpoint};
use crate::store::{MetadataStore, RecordRead};
use crate::types::{Checkpoint, CheckpointKind, Session};
use crate::vcs::GitBackend;
use crate::CheckpointId;
use git2::Oid;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Progress callback for clean operations.
/// Called with (current, total, phase) where phase is "scan", "remove" or "done".
pub type CleanProgressCallback<'a> = dyn Fn(usize, usize, &str) + 'a;

/// What to prune.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Remove checkpoints older than this.
    pub max_age: Option<Duration>,

    /// Keep at most this many checkpoints per kind.
    pub max_count: Option<usize>,

    /// Report what would be removed without removing anything.
    pub dry_run: bool,
}

impl RetentionPolicy {
    /// Policy from the `[retention]` config section.
    pub fn from_config(config: &RetentionConfig) -> Self {
        Self {
            max_age: config.max_age(),
            max_count: config.max_count,
            dry_run: false,
        }
    }

    /// True if the policy would never select anything.
    pub fn is_empty(&self) -> bool {
        self.max_age.is_none() && self.max_count.is_none()
    }
}

/// Report from a clean pass.
#[derive(Debug, Default)]
pub struct CleanReport {
    /// Checkpoints examined.
    pub scanned: usize,

    /// Checkpoints skipped because their session is open.
    pub protected: usize,

    /// Checkpoints removed (or, on a dry run, that would be).
    pub removed: Vec<CheckpointId>,

    /// Whether this was a dry run.
    pub dry_run: bool,
}

impl CleanReport {
    /// Checkpoints left in place.
    pub fn kept(&self) -> usize {
        self.scanned - self.removed.len()
    }
}

/// Everything needed to put one removed checkpoint back.
struct Removal {
    id: CheckpointId,
    record: Option<Checkpoint>,
    ref_name: String,
    commit: Oid,
    ref_deleted: bool,
    session_before: Option<Session>,
}

/// Applies retention policies.
pub struct RetentionManager {
    vcs: GitBackend,
    store: MetadataStore,
    lock: Arc<LockCoordinator>,
    query: Arc<QueryEngine>,
    clock: Clock,
    #[cfg(test)]
    fail_on: std::sync::Mutex<Option<usize>>,
}

impl RetentionManager {
    /// Creates a retention manager over shared components.
    pub fn new(
        vcs: GitBackend,
        store: MetadataStore,
        lock: Arc<LockCoordinator>,
        query: Arc<QueryEngine>,
        clock: Clock,
    ) -> Self {
        Self {
            vcs,
            store,
            lock,
            query,
            clock,
            #[cfg(test)]
            fail_on: std::sync::Mutex::new(None),
        }
    }

    /// Prunes checkpoints according to `policy`.
    ///
    /// All-or-nothing: on failure every checkpoint already removed by this
    /// call is restored before the error is returned.
    pub fn clean(
        &self,
        policy: &RetentionPolicy,
        progress: Option<&CleanProgressCallback<'_>>,
    ) -> Result<CleanReport> {
        let _guard = self.lock.acquire()?;
        let mut report = CleanReport {
            dry_run: policy.dry_run,
            ..CleanReport::default()
        };

        let entries = self.query.list()?;
        report.scanned = entries.len();
        if let Some(cb) = progress {
            cb(0, entries.len(), "scan");
        }

        let protected = self.protected_ids()?;
        let now_ms = self.clock.now_ms();
        let mut seen_per_kind: BTreeMap<CheckpointKind, usize> = BTreeMap::new();
        let mut selected = Vec::new();

        // Entries are newest first, so the per-kind counter is a rank.
        for entry in entries {
            if protected.contains(entry.id()) {
                report.protected += 1;
                continue;
            }
            let rank = seen_per_kind.entry(entry.kind()).or_default();
            *rank += 1;
            let over_count = policy.max_count.is_some_and(|max| *rank > max);
            let too_old = policy.max_age.is_some_and(|max_age| {
                now_ms - entry.id().timestamp_ms() > max_age.as_millis() as i64
            });
            if over_count || too_old {
                selected.push(entry);
            }
        }

        report.removed = selected.iter().map(|e| e.id().clone()).collect();
        if policy.dry_run || selected.is_empty() {
            if let Some(cb) = progress {
                cb(selected.len(), selected.len(), "done");
            }
            return Ok(report);
        }

        let total = selected.len();
        let mut removals = Vec::with_capacity(total);
        for (i, entry) in selected.into_iter().enumerate() {
            if let Some(cb) = progress {
                cb(i, total, "remove");
            }
            let result = self
                .query
                .resolve(entry.id().as_str())
                .and_then(|resolved| self.remove(&resolved, i, &mut removals));
            if let Err(e) = result {
                warn!(id = %entry.id(), error = %e, "clean failed; restoring removed checkpoints");
                self.restore(removals);
                return Err(e);
            }
        }
        self.forget_pending(&removals);
        if let Some(cb) = progress {
            cb(total, total, "done");
        }

        info!(removed = report.removed.len(), protected = report.protected, "retention pass complete");
        Ok(report)
    }

    /// Removes a single checkpoint.
    ///
    /// # Errors
    ///
    /// - `CheckpointNotFound` if the id does not resolve
    /// - `RetentionPolicyViolation` if it belongs to an open session
    pub fn delete(&self, id: &str) -> Result<CheckpointId> {
        let _guard = self.lock.acquire()?;
        let resolved = self.query.resolve(id)?;
        let id = resolved.entry.id().clone();

        if self.protected_ids()?.contains(&id) {
            let session = resolved.entry.session_id().unwrap_or("unknown").to_string();
            return Err(CkptError::RetentionPolicyViolation {
                id: id.to_string(),
                reason: format!("session {} is still open", session),
            });
        }

        let mut removals = Vec::new();
        if let Err(e) = self.remove(&resolved, 0, &mut removals) {
            self.restore(removals);
            return Err(e);
        }
        self.forget_pending(&removals);
        info!(id = %id, "deleted checkpoint");
        Ok(id)
    }

    /// Ids of checkpoints belonging to open sessions.
    fn protected_ids(&self) -> Result<HashSet<CheckpointId>> {
        let sessions = self.store.list_sessions()?;
        let open: HashSet<&str> = sessions
            .iter()
            .filter(|s| s.is_open())
            .map(|s| s.id.as_str())
            .collect();

        let mut protected: HashSet<CheckpointId> = sessions
            .iter()
            .filter(|s| s.is_open())
            .flat_map(|s| s.checkpoint_ids.iter().cloned())
            .collect();
        // Records can name an open session that never got the id appended.
        for id in self.store.list_checkpoint_ids()? {
            if let RecordRead::Found(checkpoint) = self.store.read_checkpoint(&id)? {
                if open.contains(checkpoint.session_id.as_str()) {
                    protected.insert(id);
                }
            }
        }
        Ok(protected)
    }

    fn remove(
        &self,
        resolved: &ResolvedCheckpoint,
        index: usize,
        removals: &mut Vec<Removal>,
    ) -> Result<()> {
        let id = resolved.entry.id().clone();
        let record = resolved.entry.checkpoint().cloned();
        let session_before = match &record {
            Some(checkpoint) => self.store.read_session(&checkpoint.session_id)?.found(),
            None => None,
        };

        // Pushed before mutating so a partial removal is still restored.
        removals.push(Removal {
            id: id.clone(),
            record,
            ref_name: resolved.ref_name.clone(),
            commit: resolved.commit,
            ref_deleted: false,
            session_before: session_before.clone(),
        });

        self.store.delete_checkpoint(&id)?;
        self.inject(index)?;

        self.vcs.delete_ref(&resolved.ref_name)?;
        if let Some(removal) = removals.last_mut() {
            removal.ref_deleted = true;
        }

        if let Some(mut session) = session_before {
            session.checkpoint_ids.retain(|c| c != &id);
            self.store.put_session(&session)?;
        }
        Ok(())
    }

    /// Puts back everything in `removals`, newest first.
    fn restore(&self, removals: Vec<Removal>) {
        for removal in removals.into_iter().rev() {
            if removal.ref_deleted {
                if let Err(e) = self.vcs.create_ref(&removal.ref_name, removal.commit) {
                    warn!(id = %removal.id, error = %e, "failed to restore checkpoint ref");
                }
            }
            if let Some(record) = &removal.record {
                if let Err(e) = self.store.put_checkpoint(record) {
                    warn!(id = %removal.id, error = %e, "failed to restore checkpoint record");
                }
            }
            if let Some(session) = &removal.session_before {
                if let Err(e) = self.store.put_session(session) {
                    warn!(id = %removal.id, error = %e, "failed to restore session record");
                }
            }
        }
    }

    /// Drops pending-edit entries that point at removed checkpoints.
    fn forget_pending(&self, removals: &[Removal]) {
        for removal in removals {
            let Some(record) = &removal.record else {
                continue;
            };
            let pending = match self.store.list_pending(&record.session_id) {
                Ok(pending) => pending,
                Err(e) => {
                    warn!(error = %e, "failed to list pending edits");
                    continue;
                }
            };
            for (key, edit) in pending {
                if edit.checkpoint_id == removal.id {
                    let _ = self.store.delete_pending(&key);
                }
            }
        }
    }

    fn inject(&self, index: usize) -> Result<()> {
        #[cfg(test)]
        {
            let armed = self.fail_on.lock().map(|f| *f == Some(index)).unwrap_or(false);
            if armed {
                return Err(CkptError::vcs("delete-ref", "injected failure"));
            }
        }
        let _ = index;
        Ok(())
    }

    #[cfg(test)]
    fn fail_on(&self, index: Option<usize>) {
        *self.fail_on.lock().unwrap() = index;
    }
}

/// Parses a duration such as `30d`, `12h`, `45m`, `90s` or `2w`.
///
/// A bare number is read as days.
pub fn parse_duration(text: &str) -> Result<Duration> {
    let text = text.trim();
    let invalid = || CkptError::ConfigError(format!("invalid duration: {:?}", text));
    let split = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);
    let value: u64 = number.parse().map_err(|_| invalid())?;
    let seconds = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3_600,
        "d" | "" => 86_400,
        "w" => 7 * 86_400,
        _ => return Err(invalid()),
    };
    let total = value
        .checked_mul(seconds)
        .ok_or_else(|| CkptError::ConfigError(format!("duration out of range: {:?}", text)))?;
    Ok(Duration::from_secs(total))
}
