//! Hook dispatcher.
//!
//! Entry point for lifecycle events coming from the agent runtime. Events are
//! validated, mapped to a checkpoint kind and recorded synchronously. A
//! failure is reported in the [`HookOutcome`] and never blocks the caller's
//! file operation unless `hooks.fatal` is set.

use crate::error::{CkptError, Result};
use crate::lock::LockCoordinator;
use crate::recorder::{SnapshotRecorder, SnapshotRequest};
use crate::summary::SessionSummarizer;
use crate::types::{CheckpointKind, SessionContext};
use crate::CheckpointId;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Longest tool output kept as a PostEdit note.
const NOTE_LIMIT: usize = 500;

/// A lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookEvent {
    /// A tracked file is about to be edited.
    PreEdit {
        /// Paths about to change.
        files: Vec<String>,
    },
    /// An edit finished.
    PostEdit {
        /// Paths that changed.
        files: Vec<String>,
        /// Output of the editing tool, if any.
        tool_output: Option<String>,
    },
    /// A new file is about to be created.
    PreCreate {
        /// Paths about to be created.
        files: Vec<String>,
    },
    /// A task is starting.
    TaskStart {
        /// What the task is about.
        description: String,
    },
    /// The session is stopping.
    Stop,
}

/// Raw event payload, as sent by the runtime.
///
/// Deserializes from `{"files": [...], "toolOutput": "...", "description": "..."}`
/// with every field optional; which fields are required depends on the event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookPayload {
    /// Paths for edit-family events.
    #[serde(default)]
    pub files: Vec<String>,
    /// Editing tool output for PostEdit.
    #[serde(default)]
    pub tool_output: Option<String>,
    /// Task description for TaskStart.
    #[serde(default)]
    pub description: Option<String>,
}

impl HookEvent {
    /// Builds an event from its name and a JSON payload.
    ///
    /// An empty payload is treated as `{}`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPayload` for an unknown event name or a payload that is
    /// not a JSON object of the expected shape.
    pub fn from_payload(event: &str, payload: &str) -> Result<Self> {
        let payload: HookPayload = if payload.trim().is_empty() {
            HookPayload::default()
        } else {
            serde_json::from_str(payload).map_err(|e| CkptError::InvalidPayload {
                event: event.to_string(),
                reason: e.to_string(),
            })?
        };
        Self::from_parts(event, payload)
    }

    /// Builds an event from its name and an already parsed payload.
    ///
    /// Names are matched case-insensitively with `-` and `_` ignored, so
    /// `pre-edit`, `pre_edit` and `PreEdit` are equivalent.
    pub fn from_parts(event: &str, payload: HookPayload) -> Result<Self> {
        let normalized: String = event
            .chars()
            .filter(|c| !matches!(c, '-' | '_'))
            .collect::<String>()
            .to_ascii_lowercase();

        let event = match normalized.as_str() {
            "preedit" => Self::PreEdit {
                files: payload.files,
            },
            "postedit" => Self::PostEdit {
                files: payload.files,
                tool_output: payload.tool_output,
            },
            "precreate" => Self::PreCreate {
                files: payload.files,
            },
            "taskstart" => Self::TaskStart {
                description: payload.description.unwrap_or_default(),
            },
            "stop" => Self::Stop,
            _ => {
                return Err(CkptError::InvalidPayload {
                    event: event.to_string(),
                    reason: "unknown event type".to_string(),
                })
            }
        };
        Ok(event)
    }

    /// Event name as used in logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PreEdit { .. } => "PreEdit",
            Self::PostEdit { .. } => "PostEdit",
            Self::PreCreate { .. } => "PreCreate",
            Self::TaskStart { .. } => "TaskStart",
            Self::Stop => "Stop",
        }
    }

    /// Checkpoint kind recorded for this event.
    pub fn kind(&self) -> CheckpointKind {
        match self {
            Self::PreEdit { .. } => CheckpointKind::PreEdit,
            Self::PostEdit { .. } => CheckpointKind::PostEdit,
            Self::PreCreate { .. } => CheckpointKind::PreCreate,
            Self::TaskStart { .. } => CheckpointKind::TaskStart,
            Self::Stop => CheckpointKind::SessionEnd,
        }
    }

    /// Checks payload shape and builds the snapshot request.
    fn into_request(self) -> Result<SnapshotRequest> {
        let name = self.name();
        let kind = self.kind();
        let invalid = |reason: &str| CkptError::InvalidPayload {
            event: name.to_string(),
            reason: reason.to_string(),
        };

        match self {
            Self::PreEdit { files } | Self::PreCreate { files } => {
                let files = normalize_files(files).ok_or_else(|| invalid("file list is empty"))?;
                Ok(SnapshotRequest::new(kind, files))
            }
            Self::PostEdit { files, tool_output } => {
                let files = normalize_files(files).ok_or_else(|| invalid("file list is empty"))?;
                let mut request = SnapshotRequest::new(kind, files);
                if let Some(output) = tool_output.as_deref().map(str::trim).filter(|o| !o.is_empty()) {
                    request = request.with_note(truncate(output, NOTE_LIMIT));
                }
                Ok(request)
            }
            Self::TaskStart { description } => {
                let description = description.trim();
                if description.is_empty() {
                    return Err(invalid("description is empty"));
                }
                Ok(SnapshotRequest::new(kind, []).with_note(description))
            }
            Self::Stop => Ok(SnapshotRequest::new(kind, [])),
        }
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of dispatching one event.
#[derive(Debug)]
pub struct HookOutcome {
    /// Recorded checkpoint, if any.
    pub checkpoint_id: Option<CheckpointId>,
    /// Failure, if any. Already logged.
    pub error: Option<CkptError>,
    fatal: bool,
}

impl HookOutcome {
    /// True when the runtime should stop the triggering operation.
    ///
    /// Only with `hooks.fatal` enabled, and never for a lock timeout.
    pub fn should_block(&self) -> bool {
        self.fatal && self.error.as_ref().is_some_and(|e| !e.is_transient())
    }

    /// True if no error occurred.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Routes lifecycle events to the recorder and summarizer.
pub struct HookDispatcher {
    recorder: Arc<SnapshotRecorder>,
    summarizer: Arc<SessionSummarizer>,
    lock: Arc<LockCoordinator>,
    fatal: bool,
    tag_session_end: bool,
}

impl HookDispatcher {
    /// Creates a dispatcher.
    pub fn new(
        recorder: Arc<SnapshotRecorder>,
        summarizer: Arc<SessionSummarizer>,
        lock: Arc<LockCoordinator>,
        fatal: bool,
        tag_session_end: bool,
    ) -> Self {
        Self {
            recorder,
            summarizer,
            lock,
            fatal,
            tag_session_end,
        }
    }

    /// Handles one event. Never panics and never returns `Err`: failures are
    /// logged and carried in the outcome.
    pub fn dispatch(&self, ctx: &SessionContext, event: HookEvent) -> HookOutcome {
        let name = event.name();
        debug!(event = name, session = ctx.session_id(), "dispatching hook event");
        match self.try_dispatch(ctx, event) {
            Ok(checkpoint_id) => HookOutcome {
                checkpoint_id,
                error: None,
                fatal: self.fatal,
            },
            Err(e) => {
                warn!(
                    event = name,
                    session = ctx.session_id(),
                    error = %e,
                    "checkpoint hook failed; continuing without a checkpoint"
                );
                HookOutcome {
                    checkpoint_id: None,
                    error: Some(e),
                    fatal: self.fatal,
                }
            }
        }
    }

    /// Parses a raw event and handles it. A payload that doesn't parse is
    /// reported like any other failure.
    pub fn dispatch_payload(&self, ctx: &SessionContext, event: &str, payload: &str) -> HookOutcome {
        match HookEvent::from_payload(event, payload) {
            Ok(event) => self.dispatch(ctx, event),
            Err(e) => {
                warn!(event, session = ctx.session_id(), error = %e, "rejected hook payload");
                HookOutcome {
                    checkpoint_id: None,
                    error: Some(e),
                    fatal: self.fatal,
                }
            }
        }
    }

    fn try_dispatch(&self, ctx: &SessionContext, event: HookEvent) -> Result<Option<CheckpointId>> {
        if ctx.session_id().trim().is_empty() {
            return Err(CkptError::InvalidPayload {
                event: event.name().to_string(),
                reason: "session id is empty".to_string(),
            });
        }

        let is_stop = matches!(event, HookEvent::Stop);
        let request = event.into_request()?;
        if !is_stop {
            return Ok(Some(self.recorder.record(ctx, request)?.id));
        }

        // The SessionEnd checkpoint and closing the session happen under one
        // lock so no other event of the session can slip in between.
        let _guard = self.lock.acquire()?;
        if self.summarizer.is_closed(ctx.session_id())? {
            debug!(session = ctx.session_id(), "repeated stop; regenerating summary");
            self.summarizer.finalize(ctx.session_id())?;
            return Ok(None);
        }

        if self.summarizer.has_session_end(ctx.session_id())? {
            info!(session = ctx.session_id(), "session end already tagged; closing session");
            self.summarizer.finalize(ctx.session_id())?;
            return Ok(None);
        }

        // The tag is optional; the session closes even when it fails.
        let tagged = if self.tag_session_end {
            self.recorder.record(ctx, request).map(|checkpoint| Some(checkpoint.id))
        } else {
            Ok(None)
        };
        if let Err(e) = &tagged {
            warn!(session = ctx.session_id(), error = %e, "session end checkpoint failed");
        }
        self.summarizer.finalize(ctx.session_id())?;
        tagged
    }
}

/// Trims entries, drops empty ones and strips a leading `./`.
/// `None` if nothing is left.
fn normalize_files(files: Vec<String>) -> Option<BTreeSet<String>> {
    let files: BTreeSet<String> = files
        .into_iter()
        .map(|f| {
            let trimmed = f.trim();
            trimmed.strip_prefix("./").unwrap_or(trimmed).to_string()
        })
        .filter(|f| !f.is_empty())
        .collect();
    (!files.is_empty()).then_some(files)
}

fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}
