//! Session summaries.
//!
//! Renders a Markdown report of one session from the stored records. The
//! output depends only on the records, so rendering twice yields the same
//! text.

use crate::clock::Clock;
use crate::error::{CkptError, Result};
use crate::store::{MetadataStore, RecordRead};
use crate::types::{Checkpoint, CheckpointKind, Session};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Write};
use tracing::{debug, info};

/// Closes sessions and renders their reports.
#[derive(Debug, Clone)]
pub struct SessionSummarizer {
    store: MetadataStore,
    clock: Clock,
}

impl SessionSummarizer {
    /// Creates a summarizer.
    pub fn new(store: MetadataStore, clock: Clock) -> Self {
        Self { store, clock }
    }

    /// True if the session exists and has been stopped.
    pub fn is_closed(&self, session_id: &str) -> Result<bool> {
        match self.store.load_session(session_id) {
            Ok(session) => Ok(!session.is_open()),
            Err(CkptError::SessionNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// True if the session's newest checkpoint is a SessionEnd, whether or
    /// not the session record was closed.
    pub fn has_session_end(&self, session_id: &str) -> Result<bool> {
        match self.store.read_session(session_id)? {
            RecordRead::Found(session) => self.store.ends_with_session_end(&session),
            RecordRead::Missing | RecordRead::Corrupt(_) => Ok(false),
        }
    }

    /// Closes the session (once) and writes its report.
    ///
    /// Pending PreEdit entries of the session are dropped. On a session that
    /// is already closed the report is regenerated in place and `endedAt` is
    /// left untouched. A session never seen before is created and closed
    /// immediately.
    pub fn finalize(&self, session_id: &str) -> Result<Session> {
        let now = self.clock.now();
        let mut session = match self.store.load_session(session_id) {
            Ok(session) => session,
            Err(CkptError::SessionNotFound(_)) => Session::new(session_id, now),
            Err(e) => return Err(e),
        };
        if session.ended_at.is_none() {
            session.ended_at = Some(now);
        }

        let dropped = self.store.clear_pending(&session.id)?;
        if dropped > 0 {
            debug!(session = %session.id, dropped, "dropped unpaired pre-edit entries");
        }

        let report = self.render(&session)?;
        let path = self.store.write_summary(&session.id, &report)?;
        session.summary_path = Some(path);
        self.store.put_session(&session)?;

        info!(
            session = %session.id,
            checkpoints = session.checkpoint_ids.len(),
            "session summary written"
        );
        Ok(session)
    }

    /// Renders the report for a session, open or closed.
    pub fn render(&self, session: &Session) -> Result<String> {
        let mut checkpoints = Vec::new();
        let mut missing = Vec::new();
        for id in &session.checkpoint_ids {
            match self.store.read_checkpoint(id)? {
                RecordRead::Found(checkpoint) => checkpoints.push(checkpoint),
                RecordRead::Missing | RecordRead::Corrupt(_) => missing.push(id.to_string()),
            }
        }
        let mut out = String::new();
        render_markdown(&mut out, session, &checkpoints, &missing)?;
        Ok(out)
    }
}

fn render_markdown(
    out: &mut String,
    session: &Session,
    checkpoints: &[Checkpoint],
    missing: &[String],
) -> fmt::Result {
    writeln!(out, "# Session {}", session.id)?;
    writeln!(out)?;
    writeln!(out, "- Started: {}", timestamp(session.started_at))?;
    match session.ended_at {
        Some(ended) => {
            writeln!(out, "- Ended: {}", timestamp(ended))?;
            writeln!(out, "- Duration: {}", format_span(ended - session.started_at))?;
        }
        None => writeln!(out, "- Ended: (open)")?,
    }
    writeln!(out, "- Checkpoints: {}", session.checkpoint_ids.len())?;

    let mut per_kind: BTreeMap<CheckpointKind, usize> = BTreeMap::new();
    let mut files: BTreeSet<&str> = BTreeSet::new();
    for checkpoint in checkpoints {
        *per_kind.entry(checkpoint.kind).or_default() += 1;
        files.extend(checkpoint.file_list.iter().map(String::as_str));
    }

    writeln!(out, "\n## Checkpoints by kind\n")?;
    writeln!(out, "| Kind | Count |")?;
    writeln!(out, "|------|-------|")?;
    for kind in CheckpointKind::ALL {
        let count = per_kind.get(&kind).copied().unwrap_or(0);
        writeln!(out, "| {} | {} |", kind, count)?;
    }

    writeln!(out, "\n## Files touched\n")?;
    if files.is_empty() {
        writeln!(out, "_none_")?;
    }
    for file in &files {
        writeln!(out, "- `{}`", file)?;
    }

    writeln!(out, "\n## Timeline\n")?;
    writeln!(out, "| Id | Kind | Ref | Files | +/- |")?;
    writeln!(out, "|----|------|-----|-------|-----|")?;
    for checkpoint in checkpoints {
        writeln!(
            out,
            "| {} | {} | `{}` | {} | +{}/-{} |",
            checkpoint.id,
            checkpoint.kind,
            checkpoint.vcs_ref,
            checkpoint.file_list.len(),
            checkpoint.diff_stat.added,
            checkpoint.diff_stat.removed
        )?;
    }
    for id in missing {
        writeln!(out, "| {} | ? | (metadata unavailable) | - | - |", id)?;
    }
    Ok(())
}

fn timestamp(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn format_span(span: chrono::Duration) -> String {
    let total = span.num_seconds().max(0);
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
