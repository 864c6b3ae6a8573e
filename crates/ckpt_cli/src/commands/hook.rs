//! Hook command - entry point for the agent runtime.

use super::open;
use anyhow::{Context, Result};
use ckpt_core::{HookEvent, HookPayload, SessionContext};
use console::style;
use std::io::{self, Read};
use std::path::Path;
use std::process::ExitCode;

/// Event fields given on the command line.
pub struct HookInput {
    pub files: Vec<String>,
    pub description: Option<String>,
    pub tool_output: Option<String>,
    /// Take the payload as JSON from stdin instead.
    pub stdin: bool,
}

/// Dispatch one lifecycle event.
///
/// Prints the recorded checkpoint id, if any. Failures are reported on stderr
/// but only fail the process when the outcome says the triggering operation
/// must be blocked. A payload that can't be read or a store that can't be
/// opened never blocks.
pub fn run(repo: &Path, event: &str, session: &str, input: HookInput) -> Result<ExitCode> {
    let prepared = parse_event(event, input).and_then(|event| Ok((open(repo)?, event)));
    let (engine, event) = match prepared {
        Ok(ready) => ready,
        Err(err) => {
            eprintln!("{} checkpoint skipped: {:#}", style("⚠").yellow(), err);
            return Ok(ExitCode::SUCCESS);
        }
    };

    let outcome = engine.dispatch(&SessionContext::new(session), event);

    if let Some(id) = &outcome.checkpoint_id {
        println!("{}", id);
    }

    match &outcome.error {
        Some(err) if outcome.should_block() => {
            eprintln!("{} {}", style("error:").red().bold(), err);
            if let Some(hint) = err.recovery_suggestion() {
                eprintln!("  {} {}", style("hint:").cyan(), hint);
            }
            Ok(ExitCode::from(err.exit_code()))
        }
        Some(err) => {
            eprintln!("{} checkpoint skipped: {}", style("⚠").yellow(), err);
            Ok(ExitCode::SUCCESS)
        }
        None => Ok(ExitCode::SUCCESS),
    }
}

fn parse_event(event: &str, input: HookInput) -> Result<HookEvent> {
    if input.stdin {
        let mut payload = String::new();
        io::stdin()
            .read_to_string(&mut payload)
            .context("Failed to read hook payload from stdin")?;
        return Ok(HookEvent::from_payload(event, &payload)?);
    }

    Ok(HookEvent::from_parts(
        event,
        HookPayload {
            files: input.files,
            tool_output: input.tool_output,
            description: input.description,
        },
    )?)
}
