//! ckpt CLI - Checkpoint and rollback for agent editing sessions.

use anyhow::Result;
use ckpt_core::CkptError;
use clap::{Parser, Subcommand};
use console::style;
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;

#[derive(Parser)]
#[command(name = "ckpt")]
#[command(about = "Checkpoint and rollback for coding agents", long_about = None)]
#[command(version)]
struct Cli {
    /// Run as if started in this directory
    #[arg(short = 'C', long = "repo", global = true, default_value = ".")]
    repo: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List checkpoints, newest first
    List {
        /// Only checkpoints of this session
        #[arg(short, long)]
        session: Option<String>,
        /// Only checkpoints of this kind (pre-edit, post-edit, ...)
        #[arg(short, long)]
        kind: Option<String>,
        /// Maximum number of entries to show
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Show one checkpoint and its changes
    Show {
        /// Checkpoint id or ref name
        id: String,
        /// Print the full patch
        #[arg(short, long)]
        patch: bool,
    },
    /// Diff from a checkpoint to the working tree
    Diff {
        /// Checkpoint id or ref name
        id: String,
        /// Only print the stat
        #[arg(long)]
        stat: bool,
    },
    /// Move the workspace back to a checkpoint
    Rollback {
        /// Checkpoint id or ref name
        id: String,
        /// Discard later changes
        #[arg(long, conflicts_with = "branch")]
        hard: bool,
        /// Switch to a new restore branch instead of moving the current one
        #[arg(long)]
        branch: bool,
        /// Allow --hard with uncommitted changes
        #[arg(long, requires = "hard")]
        force: bool,
    },
    /// List sessions
    Sessions,
    /// Print a session report
    Summary {
        /// Session id (defaults to the most recent session)
        session: Option<String>,
    },
    /// Prune checkpoints by age or count
    Clean {
        /// Remove checkpoints older than this (e.g. 30m, 12h, 7d, 2w)
        #[arg(long)]
        max_age: Option<String>,
        /// Keep at most this many checkpoints per kind
        #[arg(long)]
        max_count: Option<usize>,
        /// Show what would be removed without removing
        #[arg(long)]
        dry_run: bool,
        /// Don't ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Delete a single checkpoint
    Delete {
        /// Checkpoint id or ref name
        id: String,
    },
    /// Check refs and metadata for inconsistencies
    Verify,
    /// Finish or undo interrupted recordings
    Recover,
    /// Handle a lifecycle event from the agent runtime
    Hook {
        /// Event name (pre-edit, post-edit, pre-create, task-start, stop)
        event: String,
        /// Session the event belongs to
        #[arg(short, long, env = "CKPT_SESSION_ID")]
        session: String,
        /// Affected file (repeatable)
        #[arg(short, long = "file")]
        files: Vec<String>,
        /// Task description for task-start
        #[arg(short, long)]
        description: Option<String>,
        /// Editing tool output for post-edit
        #[arg(long)]
        tool_output: Option<String>,
        /// Read a JSON payload from stdin instead of flags
        #[arg(long, conflicts_with_all = ["files", "description", "tool_output"])]
        stdin: bool,
    },
}

fn main() -> ExitCode {
    // Initialize tracing subscriber
    // Respects RUST_LOG environment variable (e.g., RUST_LOG=debug)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => code,
        Err(err) => report(&err),
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let repo = cli.repo.as_path();

    match cli.command {
        Commands::List {
            session,
            kind,
            limit,
        } => commands::list::run(repo, session.as_deref(), kind.as_deref(), limit)?,
        Commands::Show { id, patch } => commands::show::show(repo, &id, patch)?,
        Commands::Diff { id, stat } => commands::show::diff(repo, &id, stat)?,
        Commands::Rollback {
            id,
            hard,
            branch,
            force,
        } => commands::rollback::run(repo, &id, hard, branch, force)?,
        Commands::Sessions => commands::list::sessions(repo)?,
        Commands::Summary { session } => commands::summary::run(repo, session.as_deref())?,
        Commands::Clean {
            max_age,
            max_count,
            dry_run,
            yes,
        } => commands::clean::run(repo, max_age.as_deref(), max_count, dry_run, yes)?,
        Commands::Delete { id } => commands::clean::delete(repo, &id)?,
        Commands::Verify => return commands::verify::verify(repo),
        Commands::Recover => commands::verify::recover(repo)?,
        Commands::Hook {
            event,
            session,
            files,
            description,
            tool_output,
            stdin,
        } => {
            let input = commands::hook::HookInput {
                files,
                description,
                tool_output,
                stdin,
            };
            return commands::hook::run(repo, &event, &session, input);
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Prints an error with its suggestion and maps it to an exit code.
fn report(err: &anyhow::Error) -> ExitCode {
    eprintln!("{} {:#}", style("error:").red().bold(), err);

    match err.downcast_ref::<CkptError>() {
        Some(ckpt) => {
            if let Some(hint) = ckpt.recovery_suggestion() {
                eprintln!("  {} {}", style("hint:").cyan(), hint);
            }
            ExitCode::from(ckpt.exit_code())
        }
        None => ExitCode::FAILURE,
    }
}
