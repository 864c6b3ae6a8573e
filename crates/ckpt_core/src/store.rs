//! Metadata store for checkpoint and session records.
//!
//! Layout under the store root (`<git-dir>/ckpt/`):
//!
//! ```text
//! checkpoints/<id>.json       one record per checkpoint
//! sessions/<session>.json     one record per session
//! pending/<fingerprint>.json  pending PreEdit map
//! journal/<id>.json           in-flight snapshot intents
//! summaries/<session>.md      rendered session reports
//! LAST_ID                     most recently issued checkpoint id
//! LOCK                        lock coordinator file
//! ```

use crate::error::{CkptError, Result};
use crate::types::{Checkpoint, CheckpointKind, JournalEntry, PendingEdit, Session};
use crate::CheckpointId;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Outcome of reading a single record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordRead<T> {
    /// The record parsed successfully.
    Found(T),
    /// No record exists for the key.
    Missing,
    /// A record exists but cannot be parsed.
    Corrupt(String),
}

impl<T> RecordRead<T> {
    /// Returns the record if it was found.
    pub fn found(self) -> Option<T> {
        match self {
            Self::Found(value) => Some(value),
            _ => None,
        }
    }
}

/// Durable keyed storage of checkpoint and session records.
///
/// Every write goes to a temp file that is fsynced and renamed over the
/// target, so readers never observe a partially written record.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    root: PathBuf,
}

impl MetadataStore {
    /// Creates a store rooted at `root`. Does not touch the filesystem.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Store root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the directory layout if missing.
    pub fn ensure_layout(&self) -> Result<()> {
        for dir in ["checkpoints", "sessions", "pending", "journal", "summaries"] {
            fs::create_dir_all(self.root.join(dir))?;
        }
        Ok(())
    }

    // ===== Checkpoints =====

    fn checkpoint_path(&self, id: &CheckpointId) -> PathBuf {
        self.root.join("checkpoints").join(format!("{}.json", id))
    }

    /// Persists a checkpoint record.
    pub fn put_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        write_json(&self.checkpoint_path(&checkpoint.id), checkpoint)
    }

    /// Reads a checkpoint record, distinguishing missing from corrupt.
    pub fn read_checkpoint(&self, id: &CheckpointId) -> Result<RecordRead<Checkpoint>> {
        read_json(&self.checkpoint_path(id))
    }

    /// Loads a checkpoint record, failing if missing or corrupt.
    pub fn load_checkpoint(&self, id: &CheckpointId) -> Result<Checkpoint> {
        let path = self.checkpoint_path(id);
        match read_json(&path)? {
            RecordRead::Found(checkpoint) => Ok(checkpoint),
            RecordRead::Missing => Err(CkptError::CheckpointNotFound(id.to_string())),
            RecordRead::Corrupt(reason) => Err(CkptError::CorruptRecord { path, reason }),
        }
    }

    /// Deletes a checkpoint record. Returns false if it did not exist.
    pub fn delete_checkpoint(&self, id: &CheckpointId) -> Result<bool> {
        remove_if_exists(&self.checkpoint_path(id))
    }

    /// Lists ids of all checkpoint records, ascending.
    pub fn list_checkpoint_ids(&self) -> Result<Vec<CheckpointId>> {
        let mut ids: Vec<CheckpointId> = list_json_stems(&self.root.join("checkpoints"))?
            .into_iter()
            .filter_map(|stem| stem.parse().ok())
            .collect();
        ids.sort();
        Ok(ids)
    }

    // ===== Sessions =====

    fn session_path(&self, session_id: &str) -> PathBuf {
        self.root
            .join("sessions")
            .join(format!("{}.json", file_stem_for(session_id)))
    }

    /// Persists a session record.
    pub fn put_session(&self, session: &Session) -> Result<()> {
        write_json(&self.session_path(&session.id), session)
    }

    /// Reads a session record, distinguishing missing from corrupt.
    pub fn read_session(&self, session_id: &str) -> Result<RecordRead<Session>> {
        read_json(&self.session_path(session_id))
    }

    /// Loads a session record, failing if missing or corrupt.
    pub fn load_session(&self, session_id: &str) -> Result<Session> {
        let path = self.session_path(session_id);
        match read_json(&path)? {
            RecordRead::Found(session) => Ok(session),
            RecordRead::Missing => Err(CkptError::SessionNotFound(session_id.to_string())),
            RecordRead::Corrupt(reason) => Err(CkptError::CorruptRecord { path, reason }),
        }
    }

    /// Lists all readable session records, oldest first.
    ///
    /// Corrupt session files are skipped with a warning.
    pub fn list_sessions(&self) -> Result<Vec<Session>> {
        let dir = self.root.join("sessions");
        let mut sessions = Vec::new();
        for stem in list_json_stems(&dir)? {
            let path = dir.join(format!("{}.json", stem));
            match read_json::<Session>(&path)? {
                RecordRead::Found(session) => sessions.push(session),
                RecordRead::Corrupt(reason) => {
                    tracing::warn!(path = %path.display(), reason = %reason, "skipping corrupt session record");
                }
                RecordRead::Missing => {}
            }
        }
        sessions.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));
        Ok(sessions)
    }

    /// True if the newest checkpoint listed in `session` is a SessionEnd.
    ///
    /// Nothing may be recorded after it, even if the session record was
    /// never marked closed.
    pub fn ends_with_session_end(&self, session: &Session) -> Result<bool> {
        let Some(last) = session.checkpoint_ids.last() else {
            return Ok(false);
        };
        Ok(matches!(
            self.read_checkpoint(last)?,
            RecordRead::Found(checkpoint) if checkpoint.kind == CheckpointKind::SessionEnd
        ))
    }

    // ===== Pending PreEdit map =====

    fn pending_path(&self, fingerprint: &str) -> PathBuf {
        self.root.join("pending").join(format!("{}.json", fingerprint))
    }

    /// Registers a pending PreEdit under its file-set fingerprint.
    pub fn put_pending(&self, fingerprint: &str, pending: &PendingEdit) -> Result<()> {
        write_json(&self.pending_path(fingerprint), pending)
    }

    /// Reads a pending entry by fingerprint.
    pub fn read_pending(&self, fingerprint: &str) -> Result<Option<PendingEdit>> {
        Ok(read_json(&self.pending_path(fingerprint))?.found())
    }

    /// Removes a pending entry.
    pub fn delete_pending(&self, fingerprint: &str) -> Result<bool> {
        remove_if_exists(&self.pending_path(fingerprint))
    }

    /// Lists pending entries for a session as `(fingerprint, entry)`, oldest first.
    pub fn list_pending(&self, session_id: &str) -> Result<Vec<(String, PendingEdit)>> {
        let dir = self.root.join("pending");
        let mut entries = Vec::new();
        for stem in list_json_stems(&dir)? {
            if let Some(pending) = read_json::<PendingEdit>(&dir.join(format!("{}.json", stem)))?.found()
            {
                if pending.session_id == session_id {
                    entries.push((stem, pending));
                }
            }
        }
        entries.sort_by(|a, b| a.1.checkpoint_id.cmp(&b.1.checkpoint_id));
        Ok(entries)
    }

    /// Drops every pending entry of a session. Returns how many were removed.
    pub fn clear_pending(&self, session_id: &str) -> Result<usize> {
        let mut removed = 0;
        for (fingerprint, _) in self.list_pending(session_id)? {
            if self.delete_pending(&fingerprint)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    // ===== Journal =====

    fn journal_path(&self, id: &CheckpointId) -> PathBuf {
        self.root.join("journal").join(format!("{}.json", id))
    }

    /// Writes an intent record before mutating the repository.
    pub fn put_journal(&self, entry: &JournalEntry) -> Result<()> {
        write_json(&self.journal_path(&entry.checkpoint_id), entry)
    }

    /// Removes an intent record.
    pub fn delete_journal(&self, id: &CheckpointId) -> Result<bool> {
        remove_if_exists(&self.journal_path(id))
    }

    /// Lists journal entries, oldest first. Unreadable entries are skipped.
    pub fn list_journal(&self) -> Result<Vec<JournalEntry>> {
        let dir = self.root.join("journal");
        let mut entries: Vec<JournalEntry> = Vec::new();
        for stem in list_json_stems(&dir)? {
            match read_json(&dir.join(format!("{}.json", stem)))? {
                RecordRead::Found(entry) => entries.push(entry),
                RecordRead::Corrupt(reason) => {
                    tracing::warn!(entry = %stem, reason = %reason, "unreadable journal entry");
                }
                RecordRead::Missing => {}
            }
        }
        entries.sort_by(|a, b| a.checkpoint_id.cmp(&b.checkpoint_id));
        Ok(entries)
    }

    // ===== Id sequence =====

    /// The most recently issued checkpoint id, if any.
    pub fn read_last_id(&self) -> Result<Option<CheckpointId>> {
        let path = self.root.join("LAST_ID");
        if !path.exists() {
            return Ok(None);
        }
        Ok(fs::read_to_string(&path)?.trim().parse().ok())
    }

    /// Records the most recently issued checkpoint id.
    pub fn write_last_id(&self, id: &CheckpointId) -> Result<()> {
        write_atomic(&self.root.join("LAST_ID"), format!("{}\n", id).as_bytes())
    }

    // ===== Summaries =====

    /// Path of the rendered report for a session.
    pub fn summary_path(&self, session_id: &str) -> PathBuf {
        self.root
            .join("summaries")
            .join(format!("{}.md", file_stem_for(session_id)))
    }

    /// Writes (or overwrites) a session report.
    pub fn write_summary(&self, session_id: &str, content: &str) -> Result<PathBuf> {
        let path = self.summary_path(session_id);
        write_atomic(&path, content.as_bytes())?;
        Ok(path)
    }
}

/// Fingerprint of an edit batch: BLAKE3 over the session id and the sorted,
/// de-duplicated file list.
pub fn fingerprint<'a>(session_id: &str, files: impl IntoIterator<Item = &'a String>) -> String {
    let files: BTreeSet<&String> = files.into_iter().collect();
    let mut hasher = blake3::Hasher::new();
    hasher.update(session_id.as_bytes());
    for file in files {
        hasher.update(&[0]);
        hasher.update(file.as_bytes());
    }
    hex::encode(&hasher.finalize().as_bytes()[..16])
}

/// Maps an arbitrary session id to a safe file stem.
fn file_stem_for(id: &str) -> String {
    let safe = !id.is_empty()
        && !id.starts_with('.')
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if safe {
        id.to_string()
    } else {
        format!("h-{}", hex::encode(&blake3::hash(id.as_bytes()).as_bytes()[..16]))
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes =
        serde_json::to_vec_pretty(value).map_err(|e| CkptError::Serialization(e.to_string()))?;
    write_atomic(path, &bytes)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<RecordRead<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(RecordRead::Missing),
        Err(e) => return Err(CkptError::Io(e)),
    };
    Ok(match serde_json::from_slice(&bytes) {
        Ok(value) => RecordRead::Found(value),
        Err(e) => RecordRead::Corrupt(e.to_string()),
    })
}

/// Writes bytes to `path` atomically.
///
/// Uses temp file + fsync + rename for crash safety.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("tmp");

    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    fs::rename(&tmp_path, path)?;

    // fsync parent directory (Unix-specific for crash safety)
    #[cfg(unix)]
    {
        if let Some(parent) = path.parent() {
            if let Ok(dir_file) = File::open(parent) {
                let _ = dir_file.sync_all();
            }
        }
    }

    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(CkptError::Io(e)),
    }
}

/// File stems of `*.json` entries in `dir`, sorted. Missing dir yields nothing.
fn list_json_stems(dir: &Path) -> Result<Vec<String>> {
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut stems = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            stems.push(stem.to_string());
        }
    }
    stems.sort();
    Ok(stems)
}
