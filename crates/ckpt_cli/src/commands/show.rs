//! Show and diff commands.

use super::{local_time, open, stat_line};
use anyhow::Result;
use ckpt_core::{CheckpointEntry, DiffReport};
use console::style;
use std::path::Path;

/// Show one checkpoint and what it changed.
pub fn show(repo: &Path, id: &str, patch: bool) -> Result<()> {
    let engine = open(repo)?;
    let detail = engine.show(id)?;
    let entry = &detail.entry;

    println!("{} {}", style("Checkpoint").bold(), style(entry.id()).yellow());
    println!("  Kind:    {}", entry.kind());
    println!("  Ref:     {}", entry.vcs_ref());
    println!("  Created: {}", local_time(entry.created_at()));

    match entry {
        CheckpointEntry::Recorded(cp) => {
            println!("  Session: {}", cp.session_id);
            println!("  Parent:  {}", cp.parent_ref);
            println!("  Commit:  {}", cp.commit);
            if let Some(note) = &cp.note {
                println!("  Note:    {}", note);
            }
            if !cp.file_list.is_empty() {
                println!("  Files:");
                for file in &cp.file_list {
                    println!("    {}", file);
                }
            }
        }
        CheckpointEntry::Degraded(d) => {
            println!("  Commit:  {}", d.commit);
            println!("  {} {}", style("⚠").yellow(), style(&d.reason).yellow());
        }
    }

    println!();
    print_diff(&detail.diff, !patch);
    Ok(())
}

/// Diff from a checkpoint to the current working tree.
pub fn diff(repo: &Path, id: &str, stat_only: bool) -> Result<()> {
    let engine = open(repo)?;
    let report = engine.diff(id)?;
    print_diff(&report, stat_only);
    Ok(())
}

fn print_diff(report: &DiffReport, stat_only: bool) {
    if report.files.is_empty() {
        println!("{} No changes.", style("✓").green());
        return;
    }

    println!("{}", stat_line(&report.stat));
    for file in &report.files {
        println!("  {} {}", style("→").cyan(), file);
    }

    if !stat_only {
        println!();
        print!("{}", report.patch);
    }
}
