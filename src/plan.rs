//! The `Plan`: the validated configuration plus the shared, interior-
//! mutable run state (stats, cancel token, progress tracker) workers hold a
//! reference to for the duration of one sync task. Grounded on spec.md §3's
//! data model and §9's "no back-pointers" cyclic-ownership note — the
//! teacher has no equivalent type, since its copy pipeline threads config
//! and stats through function arguments rather than one shared struct.

use std::sync::Arc;

use crate::cancel::CancelToken;
use crate::config::SyncConfig;
use crate::progress::ProgressTracker;
use crate::stats::SyncStats;

/// Shared read-only (except for its interior-mutable fields) for the
/// duration of one sync task. Created when the task begins, dropped on
/// completion. `stats` and `progress_tracker` are independently `Arc`'d so
/// the progress ticker thread can hold its own clone without cloning the
/// whole `Plan` (and its `SyncConfig`).
pub struct Plan {
    pub config: SyncConfig,
    pub stats: Arc<SyncStats>,
    pub cancel_token: CancelToken,
    pub progress_tracker: Arc<ProgressTracker>,
}

impl Plan {
    pub fn new(config: SyncConfig) -> Arc<Plan> {
        Arc::new(Plan {
            config,
            stats: Arc::new(SyncStats::new()),
            cancel_token: CancelToken::new(),
            progress_tracker: Arc::new(ProgressTracker::new()),
        })
    }
}
