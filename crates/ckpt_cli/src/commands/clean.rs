//! Clean and delete commands.

use super::open;
use anyhow::{Context, Result};
use ckpt_core::{parse_duration, CleanProgressCallback, RetentionPolicy};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::Path;

/// Prune checkpoints by age or count.
///
/// Without `--max-age` or `--max-count` the `[retention]` config section is
/// used.
pub fn run(
    repo: &Path,
    max_age: Option<&str>,
    max_count: Option<usize>,
    dry_run: bool,
    yes: bool,
) -> Result<()> {
    let engine = open(repo)?;

    let mut policy = if max_age.is_none() && max_count.is_none() {
        RetentionPolicy::from_config(&engine.config().retention)
    } else {
        RetentionPolicy {
            max_age: max_age
                .map(parse_duration)
                .transpose()
                .context("Invalid --max-age")?,
            max_count,
            dry_run: false,
        }
    };
    policy.dry_run = dry_run;

    if policy.is_empty() {
        println!(
            "{} No retention policy. Pass {} or {}, or set them under [retention] in the config.",
            style("→").cyan(),
            style("--max-age").cyan(),
            style("--max-count").cyan()
        );
        return Ok(());
    }

    if dry_run {
        println!(
            "{} Running clean in dry-run mode (nothing will be removed)...",
            style("→").cyan()
        );
    } else if !yes {
        if !console::user_attended() {
            anyhow::bail!("Refusing to remove checkpoints without a terminal; pass --yes");
        }
        println!();
        println!(
            "{} {}",
            style("⚠").yellow().bold(),
            style("WARNING:").yellow().bold()
        );
        println!("  Clean permanently deletes checkpoint refs and their metadata.");
        println!("  Checkpoints of open sessions are always kept.");
        println!(
            "  {} Run with {} first to see what would be removed.",
            style("Tip:").cyan(),
            style("--dry-run").cyan()
        );
        println!();

        print!("Continue with clean? [y/N]: ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("{} Clean cancelled.", style("✓").green());
            return Ok(());
        }
    }

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} {msg:20} [{bar:40.cyan/blue}] {pos}/{len}")?
            .progress_chars("█▓▒░  "),
    );

    // Clone pb for the closure
    let pb_clone = pb.clone();
    let progress: &CleanProgressCallback<'_> = &move |current, total, phase| {
        pb_clone.set_length(total as u64);
        pb_clone.set_position(current as u64);
        pb_clone.set_message(format!("Phase: {}", phase));
    };
    let report = engine.clean(&policy, Some(progress));
    pb.finish_and_clear();
    let report = report?;

    println!();
    println!("{}", style("Clean Report:").bold());
    println!("  Checkpoints scanned:   {}", style(report.scanned).cyan());
    println!("  Protected (open):      {}", style(report.protected).green());
    println!(
        "  {}             {}",
        if report.dry_run { "Would remove:" } else { "Removed:     " },
        if report.removed.is_empty() {
            style(report.removed.len()).green()
        } else {
            style(report.removed.len()).yellow()
        }
    );
    println!("  Kept:                  {}", style(report.kept()).cyan());

    for id in &report.removed {
        println!("    {} {}", style("×").red(), id);
    }

    if report.dry_run && !report.removed.is_empty() {
        println!();
        println!("This was a dry run. To actually remove these checkpoints, run:");
        println!("  {}", style("ckpt clean").cyan());
    } else if !report.dry_run && !report.removed.is_empty() {
        println!();
        println!(
            "{} Removed {} checkpoint(s)",
            style("✓").green(),
            report.removed.len()
        );
    }

    Ok(())
}

/// Delete a single checkpoint.
pub fn delete(repo: &Path, id: &str) -> Result<()> {
    let engine = open(repo)?;
    let removed = engine.delete(id)?;
    println!("{} Deleted checkpoint {}", style("✓").green(), style(&removed).yellow());
    Ok(())
}
