//! Summary command.

use super::open;
use anyhow::Result;
use std::path::Path;

/// Print the markdown report of a session.
pub fn run(repo: &Path, session: Option<&str>) -> Result<()> {
    let engine = open(repo)?;
    let report = engine.summary(session)?;
    print!("{}", report);
    if !report.ends_with('\n') {
        println!();
    }
    Ok(())
}
