//! CLI commands.

pub mod clean;
pub mod hook;
pub mod list;
pub mod rollback;
pub mod show;
pub mod summary;
pub mod verify;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use ckpt_core::{CheckpointEngine, CheckpointEntry, DiffStat};
use console::style;
use std::path::Path;

/// Opens the engine for the repository containing `repo`.
pub fn open(repo: &Path) -> Result<CheckpointEngine> {
    CheckpointEngine::open(repo)
        .with_context(|| format!("Failed to open checkpoint store in {}", repo.display()))
}

/// Formats a timestamp in local time.
pub fn local_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

/// `+12 -3 (2 files)`, colored.
pub fn stat_line(stat: &DiffStat) -> String {
    format!(
        "{} {} ({} file{})",
        style(format!("+{}", stat.added)).green(),
        style(format!("-{}", stat.removed)).red(),
        stat.files_changed,
        if stat.files_changed == 1 { "" } else { "s" }
    )
}

/// One-line rendering of a list entry.
pub fn entry_line(entry: &CheckpointEntry) -> String {
    let head = format!(
        "{} {:<12} {}",
        style(entry.id()).yellow(),
        entry.kind().slug(),
        local_time(entry.created_at())
    );

    match entry {
        CheckpointEntry::Recorded(cp) => {
            let files = match cp.file_list.len() {
                0 => String::new(),
                1 => cp.file_list.iter().cloned().collect(),
                n => format!("{} files", n),
            };
            format!("{}  {}  {}", head, stat_line(&cp.diff_stat), style(files).dim())
        }
        CheckpointEntry::Degraded(d) => {
            format!("{}  {} {}", head, style("⚠").yellow(), style(&d.reason).yellow())
        }
    }
}
