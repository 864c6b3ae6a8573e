//! Engine handle tying the components together for one repository.

use crate::clock::Clock;
use crate::config::Config;
use crate::dispatcher::{HookDispatcher, HookEvent, HookOutcome};
use crate::error::{CkptError, Result};
use crate::lock::LockCoordinator;
use crate::query::QueryEngine;
use crate::recorder::SnapshotRecorder;
use crate::retention::{CleanProgressCallback, CleanReport, RetentionManager, RetentionPolicy};
use crate::store::MetadataStore;
use crate::summary::SessionSummarizer;
use crate::types::{
    CheckpointDetail, CheckpointEntry, DiffReport, RollbackMode, RollbackReport, Session,
    SessionContext,
};
use crate::vcs::GitBackend;
use crate::verify::{self, RecoveryReport, VerifyReport};
use crate::{CheckpointId, TimeProvider};
use std::path::Path;
use std::sync::Arc;

/// Name of the store directory inside `.git`.
const STORE_DIR: &str = "ckpt";

/// Checkpoint engine for one git working tree.
///
/// Metadata lives under `<git-dir>/ckpt/`, outside the working tree, so
/// recording a checkpoint never makes the tree dirty.
pub struct CheckpointEngine {
    vcs: GitBackend,
    store: MetadataStore,
    config: Config,
    lock: Arc<LockCoordinator>,
    dispatcher: HookDispatcher,
    query: Arc<QueryEngine>,
    retention: RetentionManager,
    summarizer: Arc<SessionSummarizer>,
    recovery: RecoveryReport,
}

impl CheckpointEngine {
    /// Opens the engine for the repository containing `path`.
    ///
    /// Loads `config.toml` from the store (defaults when absent) and runs
    /// startup recovery.
    ///
    /// # Errors
    ///
    /// Returns `NotARepository` if `path` is not inside a git working tree.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use ckpt_core::{CheckpointEngine, HookEvent, SessionContext};
    ///
    /// let engine = CheckpointEngine::open(".").unwrap();
    /// let ctx = SessionContext::new("session-1");
    /// let outcome = engine.dispatch(&ctx, HookEvent::PreEdit { files: vec!["src/lib.rs".into()] });
    /// assert!(outcome.is_ok());
    /// ```
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let vcs = GitBackend::discover(path)?;
        let store = MetadataStore::new(vcs.git_dir().join(STORE_DIR));
        let config = Config::load(store.root())?;
        Self::open_with_config(vcs, store, config)
    }

    /// Opens the engine with an explicit configuration.
    pub fn open_with(path: impl AsRef<Path>, config: Config) -> Result<Self> {
        let vcs = GitBackend::discover(path)?;
        let store = MetadataStore::new(vcs.git_dir().join(STORE_DIR));
        Self::open_with_config(vcs, store, config)
    }

    fn open_with_config(vcs: GitBackend, store: MetadataStore, config: Config) -> Result<Self> {
        store.ensure_layout()?;
        let mut engine = Self::assemble(vcs, store, config, Clock::system());
        engine.recovery = verify::recover(
            &engine.vcs,
            &engine.store,
            &engine.lock,
            &engine.summarizer,
        )?;
        Ok(engine)
    }

    fn assemble(vcs: GitBackend, store: MetadataStore, config: Config, clock: Clock) -> Self {
        let lock = Arc::new(LockCoordinator::new(
            store.root().join("LOCK"),
            config.lock.timeout(),
            config.lock.stale_after(),
        ));
        let recorder = Arc::new(SnapshotRecorder::new(
            vcs.clone(),
            store.clone(),
            lock.clone(),
            clock.clone(),
        ));
        let summarizer = Arc::new(SessionSummarizer::new(store.clone(), clock.clone()));
        let dispatcher = HookDispatcher::new(
            recorder,
            summarizer.clone(),
            lock.clone(),
            config.hooks.fatal,
            config.hooks.tag_session_end,
        );
        let query = Arc::new(QueryEngine::new(vcs.clone(), store.clone(), lock.clone()));
        let retention = RetentionManager::new(
            vcs.clone(),
            store.clone(),
            lock.clone(),
            query.clone(),
            clock,
        );
        Self {
            vcs,
            store,
            config,
            lock,
            dispatcher,
            query,
            retention,
            summarizer,
            recovery: RecoveryReport::default(),
        }
    }

    /// Sets a custom time provider (Unix milliseconds) for testing.
    ///
    /// In production, just use `open()` to get normal system time.
    pub fn with_time_provider(self, provider: impl TimeProvider + 'static) -> Self {
        let recovery = self.recovery;
        let mut engine = Self::assemble(
            self.vcs,
            self.store,
            self.config,
            Clock::from_provider(provider),
        );
        engine.recovery = recovery;
        engine
    }

    /// Working tree root.
    pub fn workdir(&self) -> &Path {
        self.vcs.workdir()
    }

    /// Metadata store directory.
    pub fn store_root(&self) -> &Path {
        self.store.root()
    }

    /// Active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// What recovery did when the engine was opened.
    pub fn last_recovery(&self) -> &RecoveryReport {
        &self.recovery
    }

    // ===== Hooks =====

    /// Handles one lifecycle event.
    pub fn dispatch(&self, ctx: &SessionContext, event: HookEvent) -> HookOutcome {
        self.dispatcher.dispatch(ctx, event)
    }

    /// Handles one lifecycle event given by name and JSON payload.
    pub fn dispatch_payload(&self, ctx: &SessionContext, event: &str, payload: &str) -> HookOutcome {
        self.dispatcher.dispatch_payload(ctx, event, payload)
    }

    /// Runs `f` while holding the lock, so several events recorded inside it
    /// are not interleaved with other writers.
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` if the lock could not be taken.
    pub fn batch<T>(&self, f: impl FnOnce(&Self) -> T) -> Result<T> {
        let _guard = self.lock.acquire()?;
        Ok(f(self))
    }

    // ===== Queries =====

    /// All checkpoints, newest first, including degraded ones.
    pub fn list(&self) -> Result<Vec<CheckpointEntry>> {
        self.query.list()
    }

    /// One checkpoint with its diff against its parent.
    pub fn show(&self, id: &str) -> Result<CheckpointDetail> {
        self.query.show(id)
    }

    /// Diff from a checkpoint to the current working state.
    pub fn diff(&self, id: &str) -> Result<DiffReport> {
        self.query.diff(id)
    }

    /// Moves the workspace to a checkpoint.
    pub fn rollback(&self, id: &str, mode: RollbackMode, force: bool) -> Result<RollbackReport> {
        self.query.rollback(id, mode, force)
    }

    // ===== Sessions =====

    /// All readable sessions, oldest first.
    pub fn sessions(&self) -> Result<Vec<Session>> {
        self.store.list_sessions()
    }

    /// Markdown report for a session; the most recently started one when
    /// `session_id` is `None`.
    pub fn summary(&self, session_id: Option<&str>) -> Result<String> {
        let session = match session_id {
            Some(id) => self.store.load_session(id)?,
            None => self
                .store
                .list_sessions()?
                .into_iter()
                .last()
                .ok_or_else(|| CkptError::SessionNotFound("no sessions recorded".to_string()))?,
        };
        self.summarizer.render(&session)
    }

    // ===== Retention =====

    /// Prunes checkpoints by policy.
    pub fn clean(
        &self,
        policy: &RetentionPolicy,
        progress: Option<&CleanProgressCallback<'_>>,
    ) -> Result<CleanReport> {
        self.retention.clean(policy, progress)
    }

    /// Deletes one checkpoint unless it is protected.
    pub fn delete(&self, id: &str) -> Result<CheckpointId> {
        self.retention.delete(id)
    }

    // ===== Maintenance =====

    /// Consistency report.
    pub fn verify(&self) -> Result<VerifyReport> {
        verify::verify(&self.vcs, &self.store)
    }

    /// Runs recovery again.
    pub fn recover(&self) -> Result<RecoveryReport> {
        verify::recover(&self.vcs, &self.store, &self.lock, &self.summarizer)
    }
}
