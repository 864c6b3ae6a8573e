//! List and sessions commands.

use super::{entry_line, local_time, open};
use anyhow::Result;
use ckpt_core::CheckpointKind;
use console::style;
use std::path::Path;

/// List checkpoints, newest first.
pub fn run(
    repo: &Path,
    session: Option<&str>,
    kind: Option<&str>,
    limit: Option<usize>,
) -> Result<()> {
    let engine = open(repo)?;

    let kind = match kind {
        Some(slug) => Some(CheckpointKind::from_slug(slug).ok_or_else(|| {
            anyhow::anyhow!(
                "Unknown kind: {}. Use one of: {}",
                slug,
                CheckpointKind::ALL.map(|k| k.slug()).join(", ")
            )
        })?),
        None => None,
    };

    let entries: Vec<_> = engine
        .list()?
        .into_iter()
        .filter(|e| kind.map_or(true, |k| e.kind() == k))
        .filter(|e| session.map_or(true, |s| e.session_id() == Some(s)))
        .take(limit.unwrap_or(usize::MAX))
        .collect();

    if entries.is_empty() {
        println!("{} No checkpoints.", style("→").cyan());
        return Ok(());
    }

    for entry in &entries {
        println!("{}", entry_line(entry));
    }

    let degraded = entries.iter().filter(|e| e.is_degraded()).count();
    if degraded > 0 {
        println!();
        println!(
            "{} {} checkpoint(s) without readable metadata. Run {} for details.",
            style("⚠").yellow(),
            degraded,
            style("ckpt verify").cyan()
        );
    }

    Ok(())
}

/// List sessions, oldest first.
pub fn sessions(repo: &Path) -> Result<()> {
    let engine = open(repo)?;
    let sessions = engine.sessions()?;

    if sessions.is_empty() {
        println!("{} No sessions.", style("→").cyan());
        return Ok(());
    }

    for session in &sessions {
        let state = match session.ended_at {
            Some(ended) => format!("ended {}", local_time(ended)),
            None => style("open").green().to_string(),
        };
        println!(
            "{}  started {}  {}  {} checkpoint(s)",
            style(&session.id).bold(),
            local_time(session.started_at),
            state,
            session.checkpoint_ids.len()
        );
    }

    Ok(())
}
