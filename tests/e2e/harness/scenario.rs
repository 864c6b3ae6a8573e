use super::assertions::{Assertion, ErrorMatch};
use super::runner::ScenarioRunner;
use super::steps::ScenarioStep;
use ckpt_core::{CheckpointEngine, CheckpointKind, Config, RollbackMode};
use std::collections::BTreeMap;
use std::time::Duration;

/// Fluent DSL for building test scenarios
pub struct Scenario {
    name: String,
    initial_files: BTreeMap<String, Vec<u8>>,
    config: Config,
    steps: Vec<ScenarioStep>,
}

fn owned(files: &[&str]) -> Vec<String> {
    files.iter().map(|f| f.to_string()).collect()
}

impl Scenario {
    /// Create a new scenario with the given name
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            initial_files: BTreeMap::new(),
            config: Config::default(),
            steps: Vec::new(),
        }
    }

    // ===== Initial setup =====

    /// Add a single file to the initial commit
    pub fn with_file(mut self, path: &str, content: &[u8]) -> Self {
        self.initial_files
            .insert(path.to_string(), content.to_vec());
        self
    }

    /// Seed a small project: `src/main.rs`, `src/lib.rs` and `README.md`
    pub fn with_project(self) -> Self {
        self.with_file("src/main.rs", b"fn main() {}\n")
            .with_file("src/lib.rs", b"pub fn answer() -> u32 {\n    42\n}\n")
            .with_file("README.md", b"# demo\n")
    }

    /// Replace the engine config
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    // ===== Sessions =====

    /// Send later events on behalf of `session`
    pub fn in_session(mut self, session: &str) -> Self {
        self.steps.push(ScenarioStep::UseSession {
            session: session.to_string(),
        });
        self
    }

    // ===== Lifecycle events =====

    /// Task starts
    pub fn task_start(mut self, description: &str) -> Self {
        self.steps.push(ScenarioStep::TaskStart {
            label: None,
            description: description.to_string(),
        });
        self
    }

    /// Agent is about to edit `files`
    pub fn pre_edit(mut self, files: &[&str]) -> Self {
        self.steps.push(ScenarioStep::PreEdit {
            label: None,
            files: owned(files),
        });
        self
    }

    /// Agent finished editing `files`
    pub fn post_edit(mut self, files: &[&str]) -> Self {
        self.steps.push(ScenarioStep::PostEdit {
            label: None,
            files: owned(files),
            tool_output: None,
        });
        self
    }

    /// Agent finished editing `files`, with tool output
    pub fn post_edit_with_output(mut self, files: &[&str], output: &str) -> Self {
        self.steps.push(ScenarioStep::PostEdit {
            label: None,
            files: owned(files),
            tool_output: Some(output.to_string()),
        });
        self
    }

    /// Agent is about to create `files`
    pub fn pre_create(mut self, files: &[&str]) -> Self {
        self.steps.push(ScenarioStep::PreCreate {
            label: None,
            files: owned(files),
        });
        self
    }

    /// Session stops
    pub fn stop(mut self) -> Self {
        self.steps.push(ScenarioStep::Stop { label: None });
        self
    }

    /// Event by name with a JSON payload, as the CLI hook receives it
    pub fn raw_event(mut self, event: &str, payload: &str) -> Self {
        self.steps.push(ScenarioStep::RawEvent {
            event: event.to_string(),
            payload: payload.to_string(),
        });
        self
    }

    /// Name the checkpoint recorded by the previous event
    ///
    /// The step fails if that event recorded nothing.
    pub fn label(mut self, name: &str) -> Self {
        let slot = match self.steps.last_mut() {
            Some(ScenarioStep::TaskStart { label, .. })
            | Some(ScenarioStep::PreEdit { label, .. })
            | Some(ScenarioStep::PostEdit { label, .. })
            | Some(ScenarioStep::PreCreate { label, .. })
            | Some(ScenarioStep::Stop { label }) => label,
            other => panic!("label({:?}) must follow a lifecycle event, got {:?}", name, other),
        };
        *slot = Some(name.to_string());
        self
    }

    // ===== File actions =====

    /// Agent writes a file (no event)
    pub fn agent_writes(mut self, path: &str, content: &[u8]) -> Self {
        self.steps.push(ScenarioStep::WriteFile {
            path: path.to_string(),
            content: content.to_vec(),
        });
        self
    }

    /// Agent deletes a file (no event)
    pub fn agent_removes(mut self, path: &str) -> Self {
        self.steps.push(ScenarioStep::RemoveFile {
            path: path.to_string(),
        });
        self
    }

    /// User commits everything on the current branch
    pub fn user_commits(mut self, message: &str) -> Self {
        self.steps.push(ScenarioStep::UserCommits {
            message: message.to_string(),
        });
        self
    }

    // ===== Rollback =====

    /// Roll back to a labeled checkpoint; must succeed
    pub fn rollback(mut self, label: &str, mode: RollbackMode) -> Self {
        self.steps.push(ScenarioStep::Rollback {
            label: label.to_string(),
            mode,
            force: false,
            expect: None,
        });
        self
    }

    /// Hard rollback discarding uncommitted changes
    pub fn rollback_forced(mut self, label: &str) -> Self {
        self.steps.push(ScenarioStep::Rollback {
            label: label.to_string(),
            mode: RollbackMode::Hard,
            force: true,
            expect: None,
        });
        self
    }

    /// Roll back and expect a specific failure
    pub fn rollback_fails(mut self, label: &str, mode: RollbackMode, error: ErrorMatch) -> Self {
        self.steps.push(ScenarioStep::Rollback {
            label: label.to_string(),
            mode,
            force: false,
            expect: Some(error),
        });
        self
    }

    // ===== Retention =====

    /// Run clean with a count limit
    pub fn clean_max_count(mut self, max_count: usize) -> Self {
        self.steps.push(ScenarioStep::Clean {
            max_age: None,
            max_count: Some(max_count),
        });
        self
    }

    /// Run clean with an age limit
    pub fn clean_max_age(mut self, max_age: Duration) -> Self {
        self.steps.push(ScenarioStep::Clean {
            max_age: Some(max_age),
            max_count: None,
        });
        self
    }

    /// Delete a labeled checkpoint; must succeed
    pub fn delete(mut self, label: &str) -> Self {
        self.steps.push(ScenarioStep::Delete {
            label: label.to_string(),
            expect: None,
        });
        self
    }

    /// Delete a labeled checkpoint and expect a specific failure
    pub fn delete_fails(mut self, label: &str, error: ErrorMatch) -> Self {
        self.steps.push(ScenarioStep::Delete {
            label: label.to_string(),
            expect: Some(error),
        });
        self
    }

    /// Remove the metadata record of a labeled checkpoint behind the engine's back
    pub fn drop_metadata(mut self, label: &str) -> Self {
        self.steps.push(ScenarioStep::DropMetadata {
            label: label.to_string(),
        });
        self
    }

    // ===== Time control =====

    /// Wait for a duration
    pub fn wait(mut self, duration: Duration) -> Self {
        self.steps.push(ScenarioStep::Wait { duration });
        self
    }

    /// Wait for N hours
    pub fn wait_hours(self, hours: u64) -> Self {
        self.wait(Duration::from_secs(hours * 3600))
    }

    /// Wait for N days
    pub fn wait_days(self, days: u64) -> Self {
        self.wait(Duration::from_secs(days * 86400))
    }

    // ===== Failure simulation =====

    /// Simulate a crash between operations
    pub fn crash(mut self) -> Self {
        self.steps.push(ScenarioStep::Crash);
        self
    }

    /// Simulate a crash inside a PreEdit snapshot, after the stash was taken
    /// and the ref created but before any metadata was written
    pub fn crash_during_pre_edit(mut self) -> Self {
        self.steps.push(ScenarioStep::CrashDuringPreEdit);
        self
    }

    /// Simulate a crash after the labeled checkpoint's record was written but
    /// before it was added to its session
    pub fn crash_after_metadata(mut self, label: &str) -> Self {
        self.steps.push(ScenarioStep::CrashAfterMetadata {
            label: label.to_string(),
        });
        self
    }

    /// Restart after crash
    pub fn restart(mut self) -> Self {
        self.steps.push(ScenarioStep::Restart);
        self
    }

    // ===== Assertions =====

    /// Add a general assertion
    pub fn assert(mut self, assertion: Assertion) -> Self {
        self.steps.push(ScenarioStep::Assert { assertion });
        self
    }

    /// Run a custom check against the engine
    pub fn check<F>(self, f: F) -> Self
    where
        F: Fn(&CheckpointEngine) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.assert(Assertion::Custom(Box::new(f)))
    }

    /// Assert the previous event recorded a checkpoint
    pub fn assert_recorded(self) -> Self {
        self.assert(Assertion::LastEventRecorded)
    }

    /// Assert the previous event failed
    pub fn assert_event_failed(self, error: ErrorMatch) -> Self {
        self.assert(Assertion::LastEventFailed(error))
    }

    /// Assert total number of listed checkpoints
    pub fn assert_checkpoint_count(self, count: usize) -> Self {
        self.assert(Assertion::CheckpointCount(count))
    }

    /// Assert number of checkpoints of one kind
    pub fn assert_kind_count(self, kind: CheckpointKind, count: usize) -> Self {
        self.assert(Assertion::KindCount { kind, count })
    }

    /// Assert a labeled checkpoint is listed
    pub fn assert_exists(self, label: &str) -> Self {
        self.assert(Assertion::CheckpointExists {
            label: label.to_string(),
        })
    }

    /// Assert a labeled checkpoint is gone
    pub fn assert_gone(self, label: &str) -> Self {
        self.assert(Assertion::CheckpointGone {
            label: label.to_string(),
        })
    }

    /// Assert a working tree file has exactly this content
    pub fn assert_file(self, path: &str, content: &[u8]) -> Self {
        self.assert(Assertion::FileContent {
            path: path.to_string(),
            content: content.to_vec(),
        })
    }

    /// Assert a working tree file doesn't exist
    pub fn assert_file_missing(self, path: &str) -> Self {
        self.assert(Assertion::FileMissing {
            path: path.to_string(),
        })
    }

    /// Assert the session is open
    pub fn assert_session_open(self, session: &str) -> Self {
        self.assert(Assertion::SessionOpen(session.to_string()))
    }

    /// Assert the session is closed
    pub fn assert_session_closed(self, session: &str) -> Self {
        self.assert(Assertion::SessionClosed(session.to_string()))
    }

    /// Assert verify finds no issues
    pub fn assert_store_healthy(self) -> Self {
        self.assert(Assertion::StoreHealthy)
    }

    // ===== Execution =====

    /// Execute the scenario and return results
    pub fn run(self) -> ScenarioResult {
        let mut runner = match ScenarioRunner::new(&self.initial_files, self.config.clone()) {
            Ok(r) => r,
            Err(e) => {
                return ScenarioResult {
                    name: self.name.clone(),
                    success: false,
                    steps_executed: 0,
                    failure_step: Some(0),
                    error: Some(format!("Failed to create runner: {}", e)),
                }
            }
        };

        match runner.execute(&self.steps) {
            Ok(()) => ScenarioResult {
                name: self.name,
                success: true,
                steps_executed: self.steps.len(),
                failure_step: None,
                error: None,
            },
            Err(e) => {
                let failure_step = runner.current_step();
                ScenarioResult {
                    name: self.name,
                    success: false,
                    steps_executed: failure_step,
                    failure_step: Some(failure_step),
                    error: Some(format!("{:?}", e)),
                }
            }
        }
    }
}

/// Result of running a scenario
#[derive(Debug)]
pub struct ScenarioResult {
    pub name: String,
    pub success: bool,
    pub steps_executed: usize,
    pub failure_step: Option<usize>,
    pub error: Option<String>,
}

impl ScenarioResult {
    /// Unwrap the result, panicking if it failed
    pub fn unwrap(self) {
        if !self.success {
            panic!(
                "Scenario '{}' failed at step {}: {}",
                self.name,
                self.failure_step.unwrap_or(0),
                self.error.unwrap_or_else(|| "unknown error".to_string())
            );
        }
    }

    /// Expect the result to be successful
    pub fn expect(self, msg: &str) {
        if !self.success {
            panic!(
                "{}: Scenario '{}' failed at step {}: {}",
                msg,
                self.name,
                self.failure_step.unwrap_or(0),
                self.error.unwrap_or_else(|| "unknown error".to_string())
            );
        }
    }
}
