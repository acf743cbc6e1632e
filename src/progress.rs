//! Progress & stats, tracker half (C8): a CAS-updated last-progress
//! timestamp and a background ticker that emits a periodic human-readable
//! log line and raises the stall-timeout fatal error. Grounded on the
//! teacher's `core/progress.rs` publish/subscribe design, generalized from
//! per-transfer granular events to this coarser periodic-line model, and on
//! the background-thread style of `core/directory.rs`'s producer thread.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::info;

use crate::cancel::CancelToken;
use crate::stats::{format_bytes, SyncStats};

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Tracks the last time any worker reported progress. Updated via
/// compare-and-swap at most every 500ms to avoid cache-line contention
/// under heavy concurrent completion traffic.
pub struct ProgressTracker {
    last_progress_ms: AtomicU64,
}

const MIN_UPDATE_INTERVAL_MS: u64 = 500;

impl ProgressTracker {
    pub fn new() -> Self {
        ProgressTracker {
            last_progress_ms: AtomicU64::new(now_millis()),
        }
    }

    /// Record that progress occurred. A no-op if the last update was less
    /// than 500ms ago.
    pub fn mark_progress(&self) {
        let now = now_millis();
        let mut prev = self.last_progress_ms.load(Ordering::Relaxed);
        loop {
            if now.saturating_sub(prev) < MIN_UPDATE_INTERVAL_MS {
                return;
            }
            match self.last_progress_ms.compare_exchange_weak(
                prev,
                now,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => prev = actual,
            }
        }
    }

    pub fn millis_since_progress(&self) -> u64 {
        now_millis().saturating_sub(self.last_progress_ms.load(Ordering::Relaxed))
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawns the background ticker thread: every `interval`, samples
/// throughput and emits a progress line; if `stall_timeout` elapses with no
/// progress, sets `cancel` and records the stall in `stalled` so the caller
/// can surface `CopycatError::Stall` after the scheduler returns. `done` is
/// a separate cooperative-shutdown flag the caller sets once the sync
/// itself has finished normally, so a clean run can join this thread
/// without borrowing `cancel`'s cancellation semantics.
pub fn spawn_ticker(
    stats: Arc<SyncStats>,
    tracker: Arc<ProgressTracker>,
    cancel: CancelToken,
    interval: Duration,
    stall_timeout: Option<Duration>,
    stalled: Arc<AtomicBool>,
    done: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::spawn(move || loop {
        std::thread::sleep(interval);
        if cancel.is_set() || done.load(Ordering::SeqCst) {
            return;
        }
        stats.sample_throughput(interval);
        let snap = stats.snapshot();
        info!(
            files_copied = snap.files_copied,
            bytes_copied = %format_bytes(snap.bytes_copied),
            files_deleted = snap.files_deleted,
            skipped = snap.skipped,
            errors = snap.errors,
            throughput = %format!("{}/s", format_bytes(snap.throughput_bytes_per_sec as u64)),
            "sync in progress"
        );

        if let Some(timeout) = stall_timeout {
            if tracker.millis_since_progress() >= timeout.as_millis() as u64 {
                stalled.store(true, Ordering::SeqCst);
                cancel.set();
                return;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool as StdAtomicBool;

    #[test]
    fn mark_progress_resets_elapsed_counter() {
        let tracker = ProgressTracker::new();
        std::thread::sleep(Duration::from_millis(10));
        assert!(tracker.millis_since_progress() >= 10);
    }

    #[test]
    fn ticker_sets_cancel_and_stalled_flag_on_timeout() {
        let stats = Arc::new(SyncStats::new());
        let tracker = Arc::new(ProgressTracker::new());
        let cancel = CancelToken::new();
        let stalled = Arc::new(StdAtomicBool::new(false));

        let handle = spawn_ticker(
            stats,
            tracker,
            cancel.clone(),
            Duration::from_millis(10),
            Some(Duration::from_millis(5)),
            stalled.clone(),
            Arc::new(StdAtomicBool::new(false)),
        );
        handle.join().unwrap();

        assert!(cancel.is_set());
        assert!(stalled.load(Ordering::SeqCst));
    }

    #[test]
    fn ticker_stops_cleanly_when_done_is_set_without_touching_cancel() {
        let stats = Arc::new(SyncStats::new());
        let tracker = Arc::new(ProgressTracker::new());
        let cancel = CancelToken::new();
        let stalled = Arc::new(StdAtomicBool::new(false));
        let done = Arc::new(StdAtomicBool::new(true));

        let handle = spawn_ticker(
            stats,
            tracker,
            cancel.clone(),
            Duration::from_millis(5),
            None,
            stalled.clone(),
            done,
        );
        handle.join().unwrap();

        assert!(!cancel.is_set());
        assert!(!stalled.load(Ordering::SeqCst));
    }
}
