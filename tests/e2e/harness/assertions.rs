use anyhow::Result;
use ckpt_core::{CheckpointEngine, CheckpointKind, CkptError};

/// Declarative assertions on checkpoint state
pub enum Assertion {
    // Checkpoints
    CheckpointCount(usize),
    KindCount {
        kind: CheckpointKind,
        count: usize,
    },
    CheckpointExists {
        label: String,
    },
    CheckpointGone {
        label: String,
    },
    CheckpointDegraded {
        label: String,
    },
    LabelsDistinct {
        first: String,
        second: String,
    },
    CheckpointHasFile {
        label: String,
        path: String,
    },

    // Last event
    LastEventRecorded,
    LastEventSkipped,
    LastEventFailed(ErrorMatch),

    // Working tree
    FileContent {
        path: String,
        content: Vec<u8>,
    },
    FileMissing {
        path: String,
    },
    OnBranch(String),
    OnRestoreBranch {
        label: String,
    },
    NoCheckpointStashes,

    // Sessions
    SessionOpen(String),
    SessionClosed(String),
    SessionCheckpointCount {
        session: String,
        count: usize,
    },
    SummaryContains {
        session: String,
        text: String,
    },

    // Store health
    StoreHealthy,
    RecoveryRan,

    // Custom
    Custom(Box<dyn Fn(&CheckpointEngine) -> Result<()> + Send + Sync>),
}

impl std::fmt::Debug for Assertion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CheckpointCount(n) => write!(f, "CheckpointCount({})", n),
            Self::KindCount { kind, count } => {
                write!(f, "KindCount {{ kind: {}, count: {} }}", kind, count)
            }
            Self::CheckpointExists { label } => write!(f, "CheckpointExists({:?})", label),
            Self::CheckpointGone { label } => write!(f, "CheckpointGone({:?})", label),
            Self::CheckpointDegraded { label } => write!(f, "CheckpointDegraded({:?})", label),
            Self::LabelsDistinct { first, second } => {
                write!(f, "LabelsDistinct({:?}, {:?})", first, second)
            }
            Self::CheckpointHasFile { label, path } => {
                write!(f, "CheckpointHasFile {{ label: {:?}, path: {:?} }}", label, path)
            }
            Self::LastEventRecorded => write!(f, "LastEventRecorded"),
            Self::LastEventSkipped => write!(f, "LastEventSkipped"),
            Self::LastEventFailed(m) => write!(f, "LastEventFailed({:?})", m),
            Self::FileContent { path, content } => write!(
                f,
                "FileContent {{ path: {:?}, content: {:?} }}",
                path,
                String::from_utf8_lossy(content)
            ),
            Self::FileMissing { path } => write!(f, "FileMissing({:?})", path),
            Self::OnBranch(name) => write!(f, "OnBranch({:?})", name),
            Self::OnRestoreBranch { label } => write!(f, "OnRestoreBranch({:?})", label),
            Self::NoCheckpointStashes => write!(f, "NoCheckpointStashes"),
            Self::SessionOpen(s) => write!(f, "SessionOpen({:?})", s),
            Self::SessionClosed(s) => write!(f, "SessionClosed({:?})", s),
            Self::SessionCheckpointCount { session, count } => write!(
                f,
                "SessionCheckpointCount {{ session: {:?}, count: {} }}",
                session, count
            ),
            Self::SummaryContains { session, text } => {
                write!(f, "SummaryContains {{ session: {:?}, text: {:?} }}", session, text)
            }
            Self::StoreHealthy => write!(f, "StoreHealthy"),
            Self::RecoveryRan => write!(f, "RecoveryRan"),
            Self::Custom(_) => write!(f, "Custom(<fn>)"),
        }
    }
}

/// Match against error variants
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorMatch {
    LockTimeout,
    CheckpointNotFound,
    DirtyWorkingTree,
    RetentionPolicyViolation,
    SessionClosed,
    InvalidPayload,
    MetadataWriteFailed,
}

impl ErrorMatch {
    /// Returns true if `err` is of this variant
    pub fn matches(&self, err: &CkptError) -> bool {
        matches!(
            (self, err),
            (Self::LockTimeout, CkptError::LockTimeout { .. })
                | (Self::CheckpointNotFound, CkptError::CheckpointNotFound(_))
                | (Self::DirtyWorkingTree, CkptError::DirtyWorkingTree { .. })
                | (
                    Self::RetentionPolicyViolation,
                    CkptError::RetentionPolicyViolation { .. }
                )
                | (Self::SessionClosed, CkptError::SessionClosed(_))
                | (Self::InvalidPayload, CkptError::InvalidPayload { .. })
                | (Self::MetadataWriteFailed, CkptError::MetadataWriteFailed { .. })
        )
    }
}
