//! Progress & stats, counter half (C8): lock-free atomic counters plus an
//! EWMA throughput estimate sampled by the progress ticker. Grounded on the
//! teacher's `stats.rs` formatting helpers (byte/duration formatting) and
//! its atomics-under-contention style elsewhere in `core/`; the teacher's
//! `TransferStats` is audit-log-derived and historical, so the live counter
//! shape here is new relative to it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Monotonic counters updated atomically from worker threads, plus an EWMA
/// throughput estimate over the last ~30 seconds.
pub struct SyncStats {
    files_copied: AtomicU64,
    bytes_copied: AtomicU64,
    files_deleted: AtomicU64,
    dirs_created: AtomicU64,
    dirs_deleted: AtomicU64,
    skipped: AtomicU64,
    errors: AtomicU64,
    throughput: Mutex<Throughput>,
}

struct Throughput {
    last_bytes: u64,
    ewma_bytes_per_sec: f64,
}

/// EWMA decay constant: roughly a 30-second window.
const TAU_SECS: f64 = 30.0;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatsSnapshot {
    pub files_copied: u64,
    pub bytes_copied: u64,
    pub files_deleted: u64,
    pub dirs_created: u64,
    pub dirs_deleted: u64,
    pub skipped: u64,
    pub errors: u64,
    pub throughput_bytes_per_sec: f64,
}

impl SyncStats {
    pub fn new() -> Self {
        SyncStats {
            files_copied: AtomicU64::new(0),
            bytes_copied: AtomicU64::new(0),
            files_deleted: AtomicU64::new(0),
            dirs_created: AtomicU64::new(0),
            dirs_deleted: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            throughput: Mutex::new(Throughput {
                last_bytes: 0,
                ewma_bytes_per_sec: 0.0,
            }),
        }
    }

    pub fn record_file_copied(&self, bytes: u64) {
        self.files_copied.fetch_add(1, Ordering::Relaxed);
        self.bytes_copied.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_file_deleted(&self) {
        self.files_deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dir_created(&self) {
        self.dirs_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dir_deleted(&self) {
        self.dirs_deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Called periodically (by the progress ticker) to fold the bytes
    /// transferred since the last sample into the EWMA.
    pub fn sample_throughput(&self, elapsed: Duration) {
        let elapsed_secs = elapsed.as_secs_f64();
        if elapsed_secs <= 0.0 {
            return;
        }
        let total = self.bytes_copied.load(Ordering::Relaxed);
        let mut state = self.throughput.lock().unwrap();
        let delta = total.saturating_sub(state.last_bytes) as f64;
        let instantaneous = delta / elapsed_secs;
        let alpha = 1.0 - (-elapsed_secs / TAU_SECS).exp();
        state.ewma_bytes_per_sec =
            alpha * instantaneous + (1.0 - alpha) * state.ewma_bytes_per_sec;
        state.last_bytes = total;
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let throughput = self.throughput.lock().unwrap().ewma_bytes_per_sec;
        StatsSnapshot {
            files_copied: self.files_copied.load(Ordering::Relaxed),
            bytes_copied: self.bytes_copied.load(Ordering::Relaxed),
            files_deleted: self.files_deleted.load(Ordering::Relaxed),
            dirs_created: self.dirs_created.load(Ordering::Relaxed),
            dirs_deleted: self.dirs_deleted.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            throughput_bytes_per_sec: throughput,
        }
    }
}

impl Default for SyncStats {
    fn default() -> Self {
        Self::new()
    }
}

/// `0 B`, `1.5 KiB`, `3.2 MiB`, ... matching the teacher's `stats.rs`
/// `format_bytes` helper.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} {}", UNITS[0])
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m{}s", secs / 60, secs % 60)
    } else {
        format!("{}h{}m", secs / 3600, (secs % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = SyncStats::new();
        stats.record_file_copied(100);
        stats.record_file_copied(200);
        stats.record_skipped();
        stats.record_error();

        let snap = stats.snapshot();
        assert_eq!(snap.files_copied, 2);
        assert_eq!(snap.bytes_copied, 300);
        assert_eq!(snap.skipped, 1);
        assert_eq!(snap.errors, 1);
    }

    #[test]
    fn throughput_converges_toward_instantaneous_rate() {
        let stats = SyncStats::new();
        stats.record_file_copied(1_000_000);
        stats.sample_throughput(Duration::from_secs(1));
        let rate_after_one = stats.snapshot().throughput_bytes_per_sec;
        assert!(rate_after_one > 0.0);

        for _ in 0..60 {
            stats.sample_throughput(Duration::from_secs(1));
        }
        let rate_after_sixty = stats.snapshot().throughput_bytes_per_sec;
        assert!(rate_after_sixty < rate_after_one);
    }

    #[test]
    fn format_bytes_uses_binary_units() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KiB");
    }
}
