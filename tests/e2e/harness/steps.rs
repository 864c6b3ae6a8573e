use std::time::Duration;

use super::assertions::{Assertion, ErrorMatch};
use ckpt_core::RollbackMode;

/// All possible actions in a test scenario
#[derive(Debug)]
pub enum ScenarioStep {
    // Session control
    UseSession {
        session: String,
    },

    // Lifecycle events (label names the recorded checkpoint for later steps)
    TaskStart {
        label: Option<String>,
        description: String,
    },
    PreEdit {
        label: Option<String>,
        files: Vec<String>,
    },
    PostEdit {
        label: Option<String>,
        files: Vec<String>,
        tool_output: Option<String>,
    },
    PreCreate {
        label: Option<String>,
        files: Vec<String>,
    },
    Stop {
        label: Option<String>,
    },
    RawEvent {
        event: String,
        payload: String,
    },

    // Agent file actions (no events)
    WriteFile {
        path: String,
        content: Vec<u8>,
    },
    RemoveFile {
        path: String,
    },
    UserCommits {
        message: String,
    },

    // Queries and maintenance
    Rollback {
        label: String,
        mode: RollbackMode,
        force: bool,
        expect: Option<ErrorMatch>,
    },
    Clean {
        max_age: Option<Duration>,
        max_count: Option<usize>,
    },
    Delete {
        label: String,
        expect: Option<ErrorMatch>,
    },
    DropMetadata {
        label: String,
    },

    // Time control
    Wait {
        duration: Duration,
    },

    // Failure simulation
    Crash,
    CrashDuringPreEdit,
    CrashAfterMetadata {
        label: String,
    },
    Restart,

    // Assertions (can be interspersed)
    Assert {
        assertion: Assertion,
    },
}
