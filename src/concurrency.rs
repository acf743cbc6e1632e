//! Worker pool & scheduler (C7): a fixed pool of worker threads draining two
//! bounded queues (directory tasks, file tasks) with backpressure and
//! cooperative cancellation. The counting-semaphore permit type is reused
//! almost verbatim from the teacher's `core/concurrency.rs`; the two-queue
//! scheduler itself is new, generalizing that file's single-channel
//! producer/consumer plumbing to the directory/file split spec.md §4.7
//! requires.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::cancel::CancelToken;

/// A counting semaphore for bounding concurrent operations outside the
/// scheduler's own queue depth (kept for reuse by future callers; the
/// scheduler itself bounds concurrency via its fixed thread count).
#[derive(Clone)]
pub struct ConcurrencyLimiter {
    state: Arc<SemaphoreState>,
}

struct SemaphoreState {
    available: Mutex<usize>,
    condvar: Condvar,
    max: usize,
}

impl ConcurrencyLimiter {
    /// `max_concurrent == 0` auto-detects via `available_parallelism()`,
    /// falling back to 1 and warning on stderr if detection fails.
    pub fn new(max_concurrent: usize) -> Self {
        let max = if max_concurrent == 0 {
            detect_parallelism()
        } else {
            max_concurrent
        };
        Self {
            state: Arc::new(SemaphoreState {
                available: Mutex::new(max),
                condvar: Condvar::new(),
                max,
            }),
        }
    }

    pub fn acquire(&self) -> ConcurrencyPermit {
        let mut available = self.state.available.lock().unwrap();
        while *available == 0 {
            available = self.state.condvar.wait(available).unwrap();
        }
        *available -= 1;
        ConcurrencyPermit {
            state: self.state.clone(),
        }
    }

    pub fn try_acquire(&self) -> Option<ConcurrencyPermit> {
        let mut available = self.state.available.lock().unwrap();
        if *available > 0 {
            *available -= 1;
            Some(ConcurrencyPermit {
                state: self.state.clone(),
            })
        } else {
            None
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.state.max
    }

    pub fn available(&self) -> usize {
        *self.state.available.lock().unwrap()
    }
}

pub struct ConcurrencyPermit {
    state: Arc<SemaphoreState>,
}

impl Drop for ConcurrencyPermit {
    fn drop(&mut self) {
        let mut available = self.state.available.lock().unwrap();
        *available += 1;
        self.state.condvar.notify_one();
    }
}

fn detect_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or_else(|e| {
            eprintln!(
                "WARN: copycat failed to detect available parallelism: {e}. \
                 Defaulting to 1 concurrent operation."
            );
            1
        })
}

/// Behavior a `Scheduler` dispatches to. Implemented once, by the
/// reconciliation walker, over its own directory/file task types — the
/// "single `Reconciler` type parameterized over behaviors" called for in
/// spec.md §9's dynamic-dispatch design note.
pub trait Reconciler<D, F>: Send + Sync {
    /// Handle one directory task, enqueueing further work via `sched`.
    fn handle_dir(&self, task: D, sched: &Scheduler<D, F>);
    /// Handle one file (copy/delete) task. File tasks never enqueue.
    fn handle_file(&self, task: F);
}

/// Two bounded FIFO queues plus the in-flight task counter used to detect
/// quiescence (both queues empty, no worker active).
pub struct Scheduler<D, F> {
    dir_tx: Sender<D>,
    dir_rx: Receiver<D>,
    file_tx: Sender<F>,
    file_rx: Receiver<F>,
    in_flight: AtomicI64,
    active_workers: AtomicUsize,
}

impl<D: Send + 'static, F: Send + 'static> Scheduler<D, F> {
    /// Bound is `8 * thread_count` per queue, per spec.md §4.7.
    pub fn new(thread_count: u32) -> Self {
        let bound = (8 * thread_count.max(1)) as usize;
        let (dir_tx, dir_rx) = bounded(bound);
        let (file_tx, file_rx) = bounded(bound);
        Scheduler {
            dir_tx,
            dir_rx,
            file_tx,
            file_rx,
            in_flight: AtomicI64::new(0),
            active_workers: AtomicUsize::new(0),
        }
    }

    /// Enqueue a directory task. Blocks if the queue is full, providing
    /// backpressure on the producer (another worker thread).
    pub fn enqueue_dir(&self, task: D) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if self.dir_tx.send(task).is_err() {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Enqueue a file task. File tasks never enqueue further work.
    pub fn enqueue_file(&self, task: F) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if self.file_tx.send(task).is_err() {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Run `thread_count` workers to completion against `reconciler`,
    /// starting from `root`. Returns once both queues are empty and no
    /// worker is active (or cancellation drains the queues early).
    pub fn run<R>(&self, thread_count: u32, cancel: &CancelToken, reconciler: &R, root: D)
    where
        R: Reconciler<D, F>,
    {
        self.enqueue_dir(root);
        std::thread::scope(|scope| {
            for _ in 0..thread_count.max(1) {
                scope.spawn(|| worker_loop(self, cancel, reconciler));
            }
        });
    }
}

fn worker_loop<D, F, R>(sched: &Scheduler<D, F>, cancel: &CancelToken, reconciler: &R)
where
    R: Reconciler<D, F>,
{
    loop {
        if cancel.is_set() {
            // Drain without executing: pop whatever is queued and discard.
            if sched.dir_rx.try_recv().is_ok() || sched.file_rx.try_recv().is_ok() {
                sched.in_flight.fetch_sub(1, Ordering::SeqCst);
                continue;
            }
            if sched.in_flight.load(Ordering::SeqCst) <= 0 {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
            continue;
        }

        // Directory tasks are preferred (breadth-first at the directory
        // level enables work stealing across siblings).
        if let Ok(task) = sched.dir_rx.try_recv() {
            sched.active_workers.fetch_add(1, Ordering::SeqCst);
            reconciler.handle_dir(task, sched);
            sched.active_workers.fetch_sub(1, Ordering::SeqCst);
            sched.in_flight.fetch_sub(1, Ordering::SeqCst);
            continue;
        }

        match sched.file_rx.recv_timeout(Duration::from_millis(50)) {
            Ok(task) => {
                sched.active_workers.fetch_add(1, Ordering::SeqCst);
                reconciler.handle_file(task);
                sched.active_workers.fetch_sub(1, Ordering::SeqCst);
                sched.in_flight.fetch_sub(1, Ordering::SeqCst);
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                if sched.in_flight.load(Ordering::SeqCst) <= 0
                    && sched.active_workers.load(Ordering::SeqCst) == 0
                {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize as StdAtomicUsize, Ordering as StdOrdering};
    use std::thread;
    use std::time::Duration as StdDuration;

    #[test]
    fn limiter_bounds_concurrent_access() {
        let limiter = ConcurrencyLimiter::new(2);
        let _a = limiter.acquire();
        let _b = limiter.acquire();
        assert_eq!(limiter.available(), 0);
        assert!(limiter.try_acquire().is_none());
        drop(_a);
        assert_eq!(limiter.available(), 1);
    }

    struct CountingReconciler {
        dirs_seen: StdAtomicUsize,
        files_seen: StdAtomicUsize,
    }

    impl Reconciler<u32, u32> for CountingReconciler {
        fn handle_dir(&self, task: u32, sched: &Scheduler<u32, u32>) {
            self.dirs_seen.fetch_add(1, StdOrdering::SeqCst);
            if task > 0 {
                sched.enqueue_dir(task - 1);
            } else {
                sched.enqueue_file(task);
            }
        }

        fn handle_file(&self, _task: u32) {
            self.files_seen.fetch_add(1, StdOrdering::SeqCst);
        }
    }

    #[test]
    fn scheduler_drains_self_feeding_queue() {
        let sched = Scheduler::new(4);
        let cancel = CancelToken::new();
        let reconciler = CountingReconciler {
            dirs_seen: StdAtomicUsize::new(0),
            files_seen: StdAtomicUsize::new(0),
        };
        sched.run(4, &cancel, &reconciler, 5);
        assert_eq!(reconciler.dirs_seen.load(StdOrdering::SeqCst), 6);
        assert_eq!(reconciler.files_seen.load(StdOrdering::SeqCst), 1);
    }

    #[test]
    fn scheduler_stops_early_when_cancelled() {
        let sched: Scheduler<u32, u32> = Scheduler::new(2);
        let cancel = CancelToken::new();
        cancel.set();
        let reconciler = CountingReconciler {
            dirs_seen: StdAtomicUsize::new(0),
            files_seen: StdAtomicUsize::new(0),
        };
        sched.run(2, &cancel, &reconciler, 5);
        thread::sleep(StdDuration::from_millis(10));
        assert_eq!(reconciler.dirs_seen.load(StdOrdering::SeqCst), 0);
    }
}
