//! Lock-aware wrapper around [`ProgramOrchestrator`].
//!
//! Before each cycle the wrapper waits (bounded) for the external sync process
//! to finish, then takes the advisory lock for the duration of the cycle. A
//! cycle that cannot get the lock is skipped, never run unlocked.

use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use super::{CycleReport, ProgramOrchestrator};
use crate::lock::SyncLock;

/// Polling bounds for the sync wait
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub poll_interval: Duration,
    pub max_wait: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_wait: Duration::from_secs(300),
        }
    }
}

/// Releases the lock when dropped, including on panic or cancellation
struct LockGuard<'a, L: SyncLock> {
    lock: &'a mut L,
}

impl<L: SyncLock> Drop for LockGuard<'_, L> {
    fn drop(&mut self) {
        self.lock.release_lock();
    }
}

/// [`ProgramOrchestrator`] gated by a [`SyncLock`]
pub struct SyncAwareOrchestrator<L: SyncLock> {
    inner: ProgramOrchestrator,
    lock: L,
    settings: SyncSettings,
}

impl<L: SyncLock> SyncAwareOrchestrator<L> {
    pub fn new(inner: ProgramOrchestrator, lock: L, settings: SyncSettings) -> Self {
        Self {
            inner,
            lock,
            settings,
        }
    }

    pub fn inner(&self) -> &ProgramOrchestrator {
        &self.inner
    }

    /// Poll until the sync process is idle or `max_wait` has passed
    ///
    /// # Returns
    ///
    /// * `bool` - `true` if the sync finished (or was never running)
    pub async fn wait_for_sync_completion(&self) -> bool {
        let deadline = Instant::now() + self.settings.max_wait;

        loop {
            if !self.lock.is_sync_in_progress() {
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                return false;
            }

            info!("Sync in progress, checking again in {:?}", self.settings.poll_interval);
            sleep(self.settings.poll_interval.min(deadline - now)).await;
        }
    }

    /// Run one cycle under the lock, or skip it
    pub async fn run_cycle(&mut self) -> CycleReport {
        let started = Instant::now();

        if !self.wait_for_sync_completion().await {
            warn!(
                "Sync still in progress after {:?}, skipping cycle",
                self.settings.max_wait
            );
            return CycleReport::skipped("sync in progress", started.elapsed());
        }

        if !self.lock.acquire_lock() {
            warn!("Could not acquire sync lock, skipping cycle");
            return CycleReport::skipped("lock held by another process", started.elapsed());
        }

        let _guard = LockGuard {
            lock: &mut self.lock,
        };
        self.inner.run_cycle().await
    }

    /// Run cycles until the task is cancelled
    pub async fn run_forever(&mut self) {
        loop {
            self.run_cycle().await;
            sleep(self.inner.timing().cycle_pause).await;
        }
    }
}
