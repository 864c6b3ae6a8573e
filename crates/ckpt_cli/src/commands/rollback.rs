//! Rollback command.

use super::open;
use anyhow::Result;
use ckpt_core::RollbackMode;
use console::style;
use std::path::Path;

/// Move the workspace back to a checkpoint.
pub fn run(repo: &Path, id: &str, hard: bool, branch: bool, force: bool) -> Result<()> {
    let engine = open(repo)?;

    let mode = if branch {
        RollbackMode::Branch
    } else if hard {
        RollbackMode::Hard
    } else {
        RollbackMode::Soft
    };

    let report = engine.rollback(id, mode, force)?;
    let short = &report.commit[..report.commit.len().min(12)];

    match report.mode {
        RollbackMode::Branch => println!(
            "{} Switched to {} at {}",
            style("✓").green(),
            style(report.branch.as_deref().unwrap_or("restore branch")).cyan(),
            short
        ),
        RollbackMode::Hard => println!(
            "{} Reset to {} ({}), later changes discarded",
            style("✓").green(),
            style(&report.id).yellow(),
            short
        ),
        RollbackMode::Soft => {
            println!(
                "{} Reset to {} ({})",
                style("✓").green(),
                style(&report.id).yellow(),
                short
            );
            println!("  Later changes are kept in the index.");
        }
    }

    Ok(())
}
