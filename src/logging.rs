//! Logging and tracing initialization. Grounded on the teacher's
//! `logging.rs` stdout path (`init_stdout_logging`); the file/JSON-output
//! variant is dropped since nothing in `SyncConfig` names a log file — the
//! core always logs to stdout and leaves redirection to the caller's shell.

use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::CopycatError;

/// Initialize structured logging. `verbose` raises the default level from
/// `info` to `debug`; `RUST_LOG` always takes precedence when set.
pub fn init_logging(verbose: bool) -> Result<(), CopycatError> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("copycat={level}")))
        .map_err(|e| CopycatError::Validation(format!("failed to build log filter: {e}")))?;

    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    Ok(())
}

/// Initialize logging for test binaries: idempotent, writes to the test
/// harness's captured output rather than real stdout.
#[cfg(test)]
pub fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("copycat=debug"));
        let fmt_layer = fmt::layer().with_test_writer().with_target(false).compact();
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .ok();
    });
}
