//! Copycat CLI binary: thin `clap`-derived wrapper over the `copycat`
//! library. All parsing, usage rendering, and exit-code selection lives
//! here, outside the library's public surface, the same separation the
//! teacher keeps between `main.rs` and `core/*`.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};

use copycat::cancel::install_signal_handlers;
use copycat::config::{ConfigFile, PartialConfig, SyncConfig};
use copycat::error::CopycatError;
use copycat::plan::Plan;

#[derive(Parser)]
#[command(name = "copycat", version, about = "Mirror a source directory tree onto a target tree")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Raise the log level to debug.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror `source` onto `target` once.
    Sync(SyncArgs),
    /// Continuously mirror `source` onto `target` on filesystem events.
    Watch(SyncArgs),
}

#[derive(Args)]
struct SyncArgs {
    source: PathBuf,
    target: PathBuf,

    /// Preserve ACL / ownership where supported.
    #[arg(long)]
    copy_acl: bool,

    /// Delete target entries not present (or filtered out) in the source.
    #[arg(long)]
    delete_excluded: bool,

    #[arg(long)]
    exclude_hidden_files: bool,

    #[arg(long)]
    exclude_system_files: bool,

    #[arg(long)]
    exclude_hidden_system_files: bool,

    /// Include/exclude rule: `in:<glob>` or `ex:<glob>`. Repeatable.
    #[arg(long = "filter", value_name = "SPEC")]
    filters: Vec<String>,

    /// Only entries modified at/after this timestamp.
    #[arg(long)]
    since: Option<String>,

    /// Only entries modified strictly before this timestamp.
    #[arg(long)]
    until: Option<String>,

    /// Log planned actions but do not modify the target.
    #[arg(long)]
    dry_run: bool,

    /// Worker thread count. Defaults to `min(8, cpu_count)`.
    #[arg(long)]
    threads: Option<u32>,

    /// Abort if no progress is observed for this many minutes. 0 disables.
    #[arg(long)]
    stall_timeout: Option<u64>,

    /// Abort on the first entry error rather than counting and continuing.
    #[arg(long)]
    fail_fast: bool,

    /// Demote symlink creation/read errors to warnings.
    #[arg(long)]
    ignore_symlink_errors: bool,

    /// A YAML config file with a `defaults:`/`sync:` task tree.
    #[arg(long)]
    config: Option<PathBuf>,
}

impl SyncArgs {
    fn into_partial(self) -> PartialConfig {
        let mut filters = Vec::new();
        for spec in &self.filters {
            match copycat::filter::FilterRuleSpec::parse(spec) {
                Ok(rule) => filters.push(rule),
                Err(e) => {
                    eprintln!("copycat: invalid --filter '{spec}': {e}");
                    std::process::exit(1);
                }
            }
        }

        PartialConfig {
            source_root: Some(self.source),
            target_root: Some(self.target),
            copy_acl: Some(self.copy_acl),
            delete_excluded: Some(self.delete_excluded),
            filters: if filters.is_empty() { None } else { Some(filters) },
            exclude_hidden: Some(self.exclude_hidden_files),
            exclude_system: Some(self.exclude_system_files),
            exclude_hidden_system: Some(self.exclude_hidden_system_files),
            modified_from: self.since.as_deref().map(copycat::config::parse_timestamp).transpose().unwrap_or_else(|e| {
                eprintln!("copycat: {e}");
                std::process::exit(1);
            }),
            modified_to: self.until.as_deref().map(copycat::config::parse_timestamp).transpose().unwrap_or_else(|e| {
                eprintln!("copycat: {e}");
                std::process::exit(1);
            }),
            dry_run: Some(self.dry_run),
            ignore_symlink_errors: Some(self.ignore_symlink_errors),
            thread_count: self.threads,
            stall_timeout_ms: self.stall_timeout.map(|m| m * 60_000),
            fail_fast: Some(self.fail_fast),
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = copycat::logging::init_logging(cli.verbose) {
        eprintln!("copycat: failed to initialize logging: {e}");
        return ExitCode::from(1);
    }

    match cli.command {
        Commands::Sync(args) => run_sync(args),
        Commands::Watch(_) => {
            eprintln!("copycat: 'watch' is not implemented in this core; it is left to an external wrapper that reuses the sync primitives");
            ExitCode::from(1)
        }
    }
}

fn run_sync(args: SyncArgs) -> ExitCode {
    let config_layer = match args.config.as_ref() {
        Some(path) => match load_config_layer(path) {
            Ok(layer) => Some(layer),
            Err(e) => {
                eprintln!("copycat: {e}");
                return ExitCode::from(1);
            }
        },
        None => None,
    };

    let cli_layer = args.into_partial();

    let config = match SyncConfig::compute(config_layer, cli_layer) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("copycat: {e}");
            return exit_code_for(&e);
        }
    };

    let plan = Plan::new(config);

    if let Err(e) = install_signal_handlers(plan.cancel_token.clone()) {
        tracing::warn!(error = %e, "failed to install signal handlers");
    }

    match copycat::sync(plan.clone()) {
        Ok(()) => {
            let snap = plan.stats.snapshot();
            tracing::info!(
                files_copied = snap.files_copied,
                files_deleted = snap.files_deleted,
                skipped = snap.skipped,
                errors = snap.errors,
                "sync complete"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("copycat: {e}");
            if matches!(e, CopycatError::Cancelled) {
                if let Some(code) = plan.cancel_token.exit_code() {
                    return ExitCode::from(code as u8);
                }
            }
            exit_code_for(&e)
        }
    }
}

fn load_config_layer(path: &std::path::Path) -> Result<PartialConfig, CopycatError> {
    let text = std::fs::read_to_string(path).map_err(|source| CopycatError::Entry {
        path: path.to_path_buf(),
        source,
    })?;
    let tree: serde_yaml::Value = serde_yaml::from_str(&text)
        .map_err(|e| CopycatError::Validation(format!("invalid config YAML: {e}")))?;
    let file = ConfigFile::from_value(&tree)?;
    if file.tasks.is_empty() {
        Ok(file.defaults)
    } else {
        Ok(file.layer_for_task(0))
    }
}

fn exit_code_for(err: &CopycatError) -> ExitCode {
    ExitCode::from(err.exit_code() as u8)
}
