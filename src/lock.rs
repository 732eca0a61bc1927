//! # Lock Coordinator
//!
//! Advisory `flock(2)` lock shared with the external file-sync process. Both
//! sides lock the same well-known file; whoever holds it owns the data
//! directory. Nothing here ever fails hard: contention is a signal to try
//! again later.

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use nix::fcntl::{Flock, FlockArg};
use tracing::{debug, info, warn};

/// Default lock file path
pub const DEFAULT_LOCK_PATH: &str = "/tmp/waspi.lock";

/// Mutual exclusion with the external sync process
#[cfg_attr(test, mockall::automock)]
pub trait SyncLock: Send {
    /// Probe whether another process currently holds the lock
    fn is_sync_in_progress(&self) -> bool;

    /// Try to take the lock without blocking
    fn acquire_lock(&mut self) -> bool;

    /// Release the lock; no-op if not held
    fn release_lock(&mut self);
}

/// `flock`-based [`SyncLock`]
pub struct LockCoordinator {
    path: PathBuf,
    held: Option<Flock<File>>,
}

impl std::fmt::Debug for LockCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockCoordinator")
            .field("path", &self.path)
            .field("held", &self.held.is_some())
            .finish()
    }
}

impl LockCoordinator {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            held: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_held(&self) -> bool {
        self.held.is_some()
    }

    fn write_identity(lock: &mut Flock<File>) -> io::Result<()> {
        lock.set_len(0)?;
        lock.seek(SeekFrom::Start(0))?;
        writeln!(lock, "PID: {}", std::process::id())?;
        lock.flush()
    }
}

impl Default for LockCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_PATH)
    }
}

impl SyncLock for LockCoordinator {
    fn is_sync_in_progress(&self) -> bool {
        if self.held.is_some() {
            return false;
        }

        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return false,
            Err(e) => {
                warn!("Cannot probe lock file {}: {}", self.path.display(), e);
                return true;
            }
        };

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            // Dropping the probe lock releases it
            Ok(_probe) => false,
            Err((_, errno)) => {
                debug!("Lock {} held elsewhere: {}", self.path.display(), errno);
                true
            }
        }
    }

    fn acquire_lock(&mut self) -> bool {
        if self.held.is_some() {
            return true;
        }

        let file = match OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
        {
            Ok(file) => file,
            Err(e) => {
                warn!("Cannot open lock file {}: {}", self.path.display(), e);
                return false;
            }
        };

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(mut lock) => {
                if let Err(e) = Self::write_identity(&mut lock) {
                    warn!("Locked {} but could not record PID: {}", self.path.display(), e);
                }
                info!("Acquired lock {}", self.path.display());
                self.held = Some(lock);
                true
            }
            Err((_, errno)) => {
                debug!("Lock {} busy: {}", self.path.display(), errno);
                false
            }
        }
    }

    fn release_lock(&mut self) {
        let Some(lock) = self.held.take() else {
            return;
        };

        match lock.unlock() {
            Ok(_) => info!("Released lock {}", self.path.display()),
            Err((_, errno)) => warn!("Failed to unlock {}: {}", self.path.display(), errno),
        }
    }
}

impl Drop for LockCoordinator {
    fn drop(&mut self) {
        self.release_lock();
    }
}
