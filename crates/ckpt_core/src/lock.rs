//! Lock coordination for mutating version-control operations.
//!
//! Two layers:
//! - an in-process FIFO ticket queue, so waiters inside one engine are served
//!   in arrival order and a thread already holding the lock re-enters it;
//! - an on-disk `LOCK` file created with `create_new`, carrying the holder's
//!   PID, acquisition time and holder id, and held with an `fs2` exclusive
//!   lock while open.

use crate::error::{CkptError, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Interval between attempts to create the lock file while another process holds it.
const FILE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Identity and acquisition time of the current holder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockInfo {
    /// Holder identifier (`<pid>:<thread>` for this process).
    pub holder_id: String,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
}

struct Holder {
    thread: ThreadId,
    depth: usize,
    info: LockInfo,
    file: Option<File>,
}

#[derive(Default)]
struct LockState {
    next_ticket: u64,
    queue: VecDeque<u64>,
    holder: Option<Holder>,
}

/// Serializes mutating operations on one repository.
#[derive(Clone)]
pub struct LockCoordinator {
    path: PathBuf,
    timeout: Duration,
    stale_after: Duration,
    state: Arc<(Mutex<LockState>, Condvar)>,
}

impl LockCoordinator {
    /// Creates a coordinator for the lock file at `path`.
    pub fn new(path: impl AsRef<Path>, timeout: Duration, stale_after: Duration) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            timeout,
            stale_after,
            state: Arc::new((Mutex::new(LockState::default()), Condvar::new())),
        }
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquires the lock, waiting at most the configured timeout.
    ///
    /// A thread that already holds the lock gets a nested guard immediately.
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` if the lock could not be taken in time.
    pub fn acquire(&self) -> Result<LockGuard> {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let me = thread::current().id();
        let (mutex, condvar) = &*self.state;

        let mut state = lock_state(mutex);
        if let Some(holder) = state.holder.as_mut() {
            if holder.thread == me {
                holder.depth += 1;
                return Ok(LockGuard {
                    coordinator: self.clone(),
                    info: holder.info.clone(),
                });
            }
        }

        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.queue.push_back(ticket);

        // Wait for our turn in the in-process queue.
        while state.holder.is_some() || state.queue.front() != Some(&ticket) {
            let now = Instant::now();
            if now >= deadline {
                return Err(self.abandon(state, ticket, started));
            }
            state = match condvar.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }

        // First in line: take the on-disk lock. The mutex is released while
        // polling so re-entrant checks and late arrivals are not blocked.
        drop(state);
        let info = LockInfo {
            holder_id: format!("{}:{:?}", std::process::id(), me),
            acquired_at: Utc::now(),
        };
        let file = loop {
            match self.try_create_file(&info) {
                Ok(Some(file)) => break file,
                Ok(None) => {}
                Err(e) => {
                    let state = lock_state(mutex);
                    self.abandon(state, ticket, started);
                    return Err(e);
                }
            }
            if Instant::now() >= deadline {
                let state = lock_state(mutex);
                return Err(self.abandon(state, ticket, started));
            }
            thread::sleep(FILE_POLL_INTERVAL);
        };

        let mut state = lock_state(mutex);
        state.queue.pop_front();
        state.holder = Some(Holder {
            thread: me,
            depth: 1,
            info: info.clone(),
            file: Some(file),
        });
        debug!(holder = %info.holder_id, "checkpoint lock acquired");

        Ok(LockGuard {
            coordinator: self.clone(),
            info,
        })
    }

    /// Removes the lock file if it was left by a dead process or has expired.
    ///
    /// Called on startup. Returns true if a stale lock was removed.
    pub fn clear_stale(&self) -> Result<bool> {
        if self.held_in_process() {
            return Ok(false);
        }
        if let Some(contents) = self.read_lock_file()? {
            if self.is_stale(&contents) {
                warn!(path = %self.path.display(), "removing stale checkpoint lock");
                remove_lock_file(&self.path)?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Current holder in this process, if any.
    pub fn holder(&self) -> Option<LockInfo> {
        let (mutex, _) = &*self.state;
        lock_state(mutex).holder.as_ref().map(|h| h.info.clone())
    }

    fn held_in_process(&self) -> bool {
        let (mutex, _) = &*self.state;
        lock_state(mutex).holder.is_some()
    }

    /// Leaves the queue after a failed wait and wakes the next waiter.
    fn abandon(&self, mut state: MutexGuard<'_, LockState>, ticket: u64, started: Instant) -> CkptError {
        state.queue.retain(|t| *t != ticket);
        drop(state);
        self.state.1.notify_all();
        let waited_ms = started.elapsed().as_millis() as u64;
        warn!(waited_ms, "timed out waiting for checkpoint lock");
        CkptError::LockTimeout { waited_ms }
    }

    /// One attempt at creating the lock file. `Ok(None)` means it is held.
    fn try_create_file(&self, info: &LockInfo) -> Result<Option<File>> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(mut file) => {
                writeln!(
                    file,
                    "{}\n{}\n{}",
                    std::process::id(),
                    info.acquired_at.timestamp_millis(),
                    info.holder_id
                )?;
                file.flush()?;
                if file.try_lock_exclusive().is_err() {
                    drop(file);
                    let _ = fs::remove_file(&self.path);
                    return Ok(None);
                }
                Ok(Some(file))
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if let Ok(Some(contents)) = self.read_lock_file() {
                    if self.is_stale(&contents) {
                        warn!(path = %self.path.display(), "detected stale checkpoint lock, cleaning up");
                        remove_lock_file(&self.path)?;
                    }
                }
                Ok(None)
            }
            Err(e) => Err(CkptError::Io(e)),
        }
    }

    fn read_lock_file(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CkptError::Io(e)),
        }
    }

    fn is_stale(&self, contents: &str) -> bool {
        let mut lines = contents.lines();
        let pid = lines.next().and_then(|l| l.trim().parse::<u32>().ok());
        let acquired_ms = lines.next().and_then(|l| l.trim().parse::<i64>().ok());

        let (Some(pid), Some(acquired_ms)) = (pid, acquired_ms) else {
            // Partially written by a holder that is still starting up, or
            // garbage. Only the file age can tell.
            return self.file_age().map_or(false, |age| age > self.stale_after);
        };

        if !is_process_alive(pid) {
            warn!(pid, "lock holder process is gone");
            return true;
        }
        let age_ms = Utc::now().timestamp_millis() - acquired_ms;
        age_ms > self.stale_after.as_millis() as i64
    }

    /// Holder id recorded in the lock file, if it is readable.
    fn file_holder(&self) -> Option<String> {
        let contents = self.read_lock_file().ok()??;
        contents.lines().nth(2).map(|line| line.trim().to_string())
    }

    fn file_age(&self) -> Option<Duration> {
        fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.elapsed().ok())
    }

    fn release(&self) {
        let (mutex, condvar) = &*self.state;
        let mut state = lock_state(mutex);
        let done = match state.holder.as_mut() {
            Some(holder) => {
                holder.depth -= 1;
                holder.depth == 0
            }
            None => false,
        };
        if done {
            if let Some(mut holder) = state.holder.take() {
                // Close the handle first (releases the fs2 lock), then remove
                // the file if it still names this holder.
                drop(holder.file.take());
                if self.file_holder().as_deref() == Some(holder.info.holder_id.as_str()) {
                    let _ = fs::remove_file(&self.path);
                } else {
                    warn!(holder = %holder.info.holder_id, "lock file was taken over; leaving it in place");
                }
                debug!(holder = %holder.info.holder_id, "checkpoint lock released");
            }
            drop(state);
            condvar.notify_all();
        }
    }
}

/// RAII guard for the checkpoint lock.
///
/// Dropping the outermost guard closes and removes the lock file.
pub struct LockGuard {
    coordinator: LockCoordinator,
    info: LockInfo,
}

impl LockGuard {
    /// Holder id.
    pub fn holder_id(&self) -> &str {
        &self.info.holder_id
    }

    /// Acquisition time of the outermost guard.
    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.info.acquired_at
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.coordinator.release();
    }
}

fn lock_state(mutex: &Mutex<LockState>) -> MutexGuard<'_, LockState> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn remove_lock_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CkptError::Io(e)),
    }
}

/// Check if a process with the given PID is still alive.
///
/// On Linux, uses /proc/{pid}/stat to check process existence.
/// On other Unix systems, uses `kill -0`.
/// On non-Unix systems, conservatively assumes the process is alive.
#[cfg(target_os = "linux")]
fn is_process_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{}/stat", pid)).exists()
}

#[cfg(all(unix, not(target_os = "linux")))]
fn is_process_alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(true)
}

#[cfg(not(unix))]
fn is_process_alive(_pid: u32) -> bool {
    // Stale locks on Windows expire by age only.
    true
}
