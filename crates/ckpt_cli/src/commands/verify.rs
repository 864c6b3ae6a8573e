//! Verify and recover commands.

use super::open;
use anyhow::Result;
use ckpt_core::RecoveryReport;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::process::ExitCode;

/// Check refs, records, sessions and stashes against each other.
///
/// Exits non-zero when issues are found so scripts can act on it.
pub fn verify(repo: &Path) -> Result<ExitCode> {
    let engine = open(repo)?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    spinner.set_message("Verifying checkpoint store...");
    spinner.enable_steady_tick(std::time::Duration::from_millis(100));

    let report = engine.verify();
    spinner.finish_and_clear();
    let report = report?;

    println!();
    println!("{}", style("Verification Report:").bold());
    println!("  Refs checked:       {}", style(report.refs_checked).cyan());
    println!("  Records checked:    {}", style(report.records_checked).cyan());

    print_group("Degraded checkpoints", &report.degraded);
    print_group("Records without refs", &report.dangling_records);
    print_group("Moved refs", &report.moved_refs);
    let missing: Vec<String> = report
        .missing_from_sessions
        .iter()
        .map(|(session, id)| format!("{} (session {})", id, session))
        .collect();
    print_group("Missing from sessions", &missing);
    print_group("Leftover stashes", &report.leftover_stashes);
    print_group("Unfinished snapshots", &report.unfinished);

    println!();
    if !report.has_issues() {
        println!("{} {}", style("✓").green(), style(&report.summary()).green());
        return Ok(ExitCode::SUCCESS);
    }

    println!("{}", style(&report.summary()).yellow().bold());
    println!();
    println!("{}", style("Recommendations:").bold());
    if !report.unfinished.is_empty() || !report.leftover_stashes.is_empty() {
        println!(
            "  {} Run {} to finish interrupted snapshots",
            style("→").cyan(),
            style("ckpt recover").cyan()
        );
    }
    if !report.degraded.is_empty() || !report.dangling_records.is_empty() {
        println!(
            "  {} Use {} to remove entries that can't be restored",
            style("→").cyan(),
            style("ckpt delete <id>").cyan()
        );
    }
    if !report.moved_refs.is_empty() {
        println!(
            "  {} Moved refs were changed outside ckpt; check them with {}",
            style("→").cyan(),
            style("ckpt show <id>").cyan()
        );
    }

    Ok(ExitCode::FAILURE)
}

/// Finish or undo interrupted recordings.
pub fn recover(repo: &Path) -> Result<()> {
    // Opening the engine already runs a recovery pass.
    let engine = open(repo)?;
    let startup = engine.last_recovery();
    let again = engine.recover()?;

    if startup.skipped || again.skipped {
        println!(
            "{} Another checkpoint operation holds the lock; recovery skipped.",
            style("⚠").yellow()
        );
        return Ok(());
    }

    if startup.is_clean() && again.is_clean() {
        println!("{} Nothing to recover.", style("✓").green());
        return Ok(());
    }

    println!("{}", style("Recovery Report:").bold());
    for report in [startup, &again] {
        print_recovery(report);
    }
    println!();
    println!("{} Recovery complete.", style("✓").green());
    Ok(())
}

fn print_recovery(report: &RecoveryReport) {
    if report.is_clean() {
        return;
    }
    if report.stale_lock_cleared {
        println!("  {} Removed stale lock", style("✓").green());
    }
    if report.journal_entries > 0 {
        println!(
            "  Journal entries:    {}",
            style(report.journal_entries).cyan()
        );
    }
    for stash in &report.stashes_restored {
        println!("  {} Restored stash {}", style("✓").green(), stash);
    }
    for name in &report.refs_removed {
        println!("  {} Removed half-created ref {}", style("×").red(), name);
    }
    for session in &report.sessions_repaired {
        println!("  {} Repaired session {}", style("✓").green(), session);
    }
    for session in &report.sessions_closed {
        println!("  {} Closed stopped session {}", style("✓").green(), session);
    }
}

fn print_group(label: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    println!(
        "  {:<20}{}",
        format!("{}:", label),
        style(items.len()).yellow()
    );
    for item in items {
        println!("    {} {}", style("⚠").yellow(), item);
    }
}
