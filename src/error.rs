//! Error taxonomy for the sync engine: validation, per-entry, filesystem,
//! symlink, cancellation, stall and invariant errors, with the propagation
//! policy the worker loop and scheduler rely on (`is_fatal`, `is_transient`).

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CopycatError {
    /// Config/CLI validation failure. Surfaces before any work begins.
    #[error("validation error: {0}")]
    Validation(String),

    /// Per-entry IO failure (permission denied, not found, too many open
    /// files). Counted and logged, never fatal unless `--fail-fast`.
    #[error("{path}: {source}")]
    Entry { path: PathBuf, source: io::Error },

    /// Disk full, read-only filesystem, or similar: always fatal.
    #[error("filesystem error: {message}")]
    Filesystem {
        message: String,
        #[source]
        source: Option<io::Error>,
    },

    /// Symlink creation/read failure. Demoted to a warning by the caller
    /// when `ignore_symlink_errors` is set; otherwise treated as an entry
    /// error.
    #[error("symlink error at {path}: {source}")]
    Symlink { path: PathBuf, source: io::Error },

    /// Cooperative shutdown requested via the cancel token. Not a failure
    /// in the usual sense; the exit code is chosen by the caller based on
    /// which signal (if any) triggered it.
    #[error("operation cancelled")]
    Cancelled,

    /// No progress observed for longer than the configured stall timeout.
    #[error("operation appears stuck: no progress for {0:?}")]
    Stall(Duration),

    /// Internal bug: a state the decision tables say cannot occur.
    #[error("invariant violation: {0}")]
    Invariant(String),

    /// Raised by the scheduler when `--fail-fast` is not set but one or
    /// more entry errors were counted during the run.
    #[error("{count} error(s) encountered during sync")]
    ErrorsEncountered { count: u64 },
}

impl CopycatError {
    /// Filesystem, Stall and Invariant errors always set the cancel token.
    /// Entry/Symlink errors are fatal only in the caller's `--fail-fast`
    /// context, which this type does not know about.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CopycatError::Filesystem { .. } | CopycatError::Stall(_) | CopycatError::Invariant(_)
        )
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, CopycatError::Entry { .. } | CopycatError::Symlink { .. })
    }

    /// Exit code per spec.md §7, excluding the cancellation codes (130/143)
    /// which depend on which signal fired and are computed by `main.rs`.
    pub fn exit_code(&self) -> i32 {
        match self {
            CopycatError::Validation(_) => 1,
            CopycatError::Stall(_) => 3,
            CopycatError::Invariant(_) => 70,
            CopycatError::Cancelled => 130,
            CopycatError::ErrorsEncountered { .. } => 2,
            CopycatError::Entry { .. }
            | CopycatError::Filesystem { .. }
            | CopycatError::Symlink { .. } => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        let fs_err = CopycatError::Filesystem {
            message: "disk full".into(),
            source: None,
        };
        assert!(fs_err.is_fatal());

        let entry_err = CopycatError::Entry {
            path: PathBuf::from("/tmp/x"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(!entry_err.is_fatal());
        assert!(entry_err.is_transient());
    }

    #[test]
    fn exit_codes_match_spec() {
        assert_eq!(CopycatError::Validation("bad".into()).exit_code(), 1);
        assert_eq!(CopycatError::Stall(Duration::from_secs(60)).exit_code(), 3);
        assert_eq!(CopycatError::Invariant("oops".into()).exit_code(), 70);
    }
}
