//! Copycat: a cross-platform directory synchronization engine.
//!
//! This crate is the sync **core** — traversal, comparison, reconciliation
//! and filtering. CLI parsing, log rendering, and the YAML config tokenizer
//! are external collaborators; `copycat`'s own binary (`src/main.rs`) is one
//! such thin collaborator built on `clap`.

pub mod attrs;
pub mod cancel;
pub mod concurrency;
pub mod config;
pub mod copyfile;
pub mod error;
pub mod filter;
pub mod logging;
pub mod mirror;
pub mod plan;
pub mod progress;
pub mod stats;
pub mod walker;

pub use config::{ConfigFile, PartialConfig, SyncConfig, SyncTask};
pub use error::CopycatError;
pub use plan::Plan;
pub use stats::{StatsSnapshot, SyncStats};

/// Library version, matching the binary's `--version` output.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Runs one sync task to completion against an already-validated `Plan`.
/// Does not install signal handlers of its own — the binary wires those up
/// before calling in, via [`cancel::install_signal_handlers`].
pub fn sync(plan: std::sync::Arc<Plan>) -> Result<(), CopycatError> {
    walker::run(plan)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_populated() {
        assert!(!VERSION.is_empty());
    }
}
