//! Configuration model (C3): three merge layers (defaults, config-file,
//! CLI), source/target validation, and filter compilation for both roots.
//! Grounded on the teacher's `config.rs` `ConfigFile`/`apply_to` layered
//! override pattern, generalized from TOML to the pre-parsed `serde_yaml`
//! tree the core is handed, and from one override layer to three.

use std::path::{Path, PathBuf};

use chrono::{Local, TimeZone};
use filetime::FileTime;
use tracing::warn;

use crate::attrs::Timestamp;
use crate::error::CopycatError;
use crate::filter::{FilterAction, FilterEngine, FilterList, FilterRuleSpec};

/// Fully validated, immutable configuration for one sync task.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub source_root: PathBuf,
    pub target_root: PathBuf,
    pub copy_acl: bool,
    pub delete_excluded: bool,
    pub filters: Vec<FilterRuleSpec>,
    pub exclude_hidden: bool,
    pub exclude_system: bool,
    pub exclude_hidden_system: bool,
    pub modified_from: Option<Timestamp>,
    pub modified_to: Option<Timestamp>,
    pub dry_run: bool,
    pub ignore_symlink_errors: bool,
    pub thread_count: u32,
    pub stall_timeout_ms: u64,
    /// Not enumerated in the entity's field list alongside the others, but
    /// required by §4.7/§7's fail-fast cancellation behavior and exposed as
    /// a `sync` flag in §6; treated as a first-class `SyncConfig` field.
    pub fail_fast: bool,
    pub source_filters: FilterEngine,
    pub target_filters: FilterEngine,
}

/// One entry in a multi-task config file's `sync:` list, or the single
/// implicit task built from CLI flags when no `--config` is given.
#[derive(Debug, Clone, Default)]
pub struct SyncTask {
    pub config: PartialConfig,
}

/// Every `SyncConfig` field, `Option`-wrapped so three layers can be merged
/// with a simple "last non-`None` wins" fold (teacher's `apply_to` pattern).
#[derive(Debug, Clone, Default)]
pub struct PartialConfig {
    pub source_root: Option<PathBuf>,
    pub target_root: Option<PathBuf>,
    pub copy_acl: Option<bool>,
    pub delete_excluded: Option<bool>,
    pub filters: Option<Vec<FilterRuleSpec>>,
    pub exclude_hidden: Option<bool>,
    pub exclude_system: Option<bool>,
    pub exclude_hidden_system: Option<bool>,
    pub modified_from: Option<Timestamp>,
    pub modified_to: Option<Timestamp>,
    pub dry_run: Option<bool>,
    pub ignore_symlink_errors: Option<bool>,
    pub thread_count: Option<u32>,
    pub stall_timeout_ms: Option<u64>,
    pub fail_fast: Option<bool>,
}

macro_rules! overlay_field {
    ($base:expr, $overlay:expr, $field:ident) => {
        if $overlay.$field.is_some() {
            $overlay.$field
        } else {
            $base.$field
        }
    };
}

impl PartialConfig {
    /// Built-in defaults: all booleans false, filters empty, everything
    /// else unset. `source_root`/`target_root` are never defaulted.
    pub fn defaults() -> Self {
        PartialConfig {
            source_root: None,
            target_root: None,
            copy_acl: Some(false),
            delete_excluded: Some(false),
            filters: Some(Vec::new()),
            exclude_hidden: Some(false),
            exclude_system: Some(false),
            exclude_hidden_system: Some(false),
            modified_from: None,
            modified_to: None,
            dry_run: Some(false),
            ignore_symlink_errors: Some(false),
            thread_count: Some(default_thread_count()),
            stall_timeout_ms: Some(0),
            fail_fast: Some(false),
        }
    }

    /// Merge `overlay` over `self`: a field present in `overlay` always
    /// wins, whether or not `self` had a value. List fields replace rather
    /// than concatenate.
    pub fn merge_over(self, overlay: PartialConfig) -> PartialConfig {
        PartialConfig {
            source_root: overlay_field!(self, overlay, source_root),
            target_root: overlay_field!(self, overlay, target_root),
            copy_acl: overlay_field!(self, overlay, copy_acl),
            delete_excluded: overlay_field!(self, overlay, delete_excluded),
            filters: overlay_field!(self, overlay, filters),
            exclude_hidden: overlay_field!(self, overlay, exclude_hidden),
            exclude_system: overlay_field!(self, overlay, exclude_system),
            exclude_hidden_system: overlay_field!(self, overlay, exclude_hidden_system),
            modified_from: overlay_field!(self, overlay, modified_from),
            modified_to: overlay_field!(self, overlay, modified_to),
            dry_run: overlay_field!(self, overlay, dry_run),
            ignore_symlink_errors: overlay_field!(self, overlay, ignore_symlink_errors),
            thread_count: overlay_field!(self, overlay, thread_count),
            stall_timeout_ms: overlay_field!(self, overlay, stall_timeout_ms),
            fail_fast: overlay_field!(self, overlay, fail_fast),
        }
    }
}

fn default_thread_count() -> u32 {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1);
    cpus.min(8)
}

/// A parsed `defaults:` + `sync:` config-file tree (the tree itself is
/// handed in as a `serde_yaml::Value` — tokenizing the YAML is the external
/// caller's job per spec.md §1).
#[derive(Debug, Clone, Default)]
pub struct ConfigFile {
    pub defaults: PartialConfig,
    pub tasks: Vec<SyncTask>,
}

const KNOWN_TASK_KEYS: &[&str] = &[
    "source",
    "target",
    "copy-acl",
    "delete-excluded",
    "filters",
    "exclude",
    "exclude-hidden-files",
    "exclude-system-files",
    "exclude-hidden-system-files",
    "since",
    "until",
    "dry-run",
    "threads",
    "stall-timeout",
    "fail-fast",
    "ignore-symlink-errors",
];

const KNOWN_TOP_LEVEL_KEYS: &[&str] = &["defaults", "sync"];

impl ConfigFile {
    /// Build a `ConfigFile` from an already-parsed key/value tree. Unknown
    /// top-level keys are a validation error; unknown keys inside a task
    /// are only a warning, per spec.md §6.
    pub fn from_value(tree: &serde_yaml::Value) -> Result<ConfigFile, CopycatError> {
        let mapping = tree.as_mapping().ok_or_else(|| {
            CopycatError::Validation("config file root must be a mapping".into())
        })?;

        for key in mapping.keys() {
            let key = key.as_str().unwrap_or_default();
            if !KNOWN_TOP_LEVEL_KEYS.contains(&key) {
                return Err(CopycatError::Validation(format!(
                    "unknown top-level config key '{key}'"
                )));
            }
        }

        let defaults = match tree.get("defaults") {
            Some(v) => parse_task(v)?,
            None => PartialConfig::default(),
        };

        let tasks = match tree.get("sync") {
            Some(serde_yaml::Value::Sequence(seq)) => seq
                .iter()
                .map(|v| parse_task(v).map(|config| SyncTask { config }))
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => {
                return Err(CopycatError::Validation(
                    "'sync' must be a list of task maps".into(),
                ))
            }
            None => Vec::new(),
        };

        Ok(ConfigFile { defaults, tasks })
    }

    /// Effective config-file layer for task `idx`: this file's own
    /// `defaults:` merged with that task's overrides.
    pub fn layer_for_task(&self, idx: usize) -> PartialConfig {
        self.defaults.clone().merge_over(self.tasks[idx].config.clone())
    }
}

fn parse_task(value: &serde_yaml::Value) -> Result<PartialConfig, CopycatError> {
    let mapping = value
        .as_mapping()
        .ok_or_else(|| CopycatError::Validation("config task entry must be a mapping".into()))?;

    for key in mapping.keys() {
        let key = key.as_str().unwrap_or_default();
        if !KNOWN_TASK_KEYS.contains(&key) {
            warn!("unknown config key '{key}' ignored");
        }
    }

    let mut partial = PartialConfig::default();

    partial.source_root = string_field(value, "source")?.map(PathBuf::from);
    partial.target_root = string_field(value, "target")?.map(PathBuf::from);
    partial.copy_acl = bool_field(value, "copy-acl")?;
    partial.delete_excluded = bool_field(value, "delete-excluded")?;
    partial.exclude_hidden = bool_field(value, "exclude-hidden-files")?;
    partial.exclude_system = bool_field(value, "exclude-system-files")?;
    partial.exclude_hidden_system = bool_field(value, "exclude-hidden-system-files")?;
    partial.dry_run = bool_field(value, "dry-run")?;
    partial.fail_fast = bool_field(value, "fail-fast")?;
    partial.ignore_symlink_errors = bool_field(value, "ignore-symlink-errors")?;
    partial.thread_count = value
        .get("threads")
        .map(|v| {
            v.as_u64()
                .ok_or_else(|| CopycatError::Validation("'threads' must be an integer".into()))
                .map(|n| n as u32)
        })
        .transpose()?;
    partial.stall_timeout_ms = value
        .get("stall-timeout")
        .map(|v| {
            v.as_u64()
                .ok_or_else(|| {
                    CopycatError::Validation("'stall-timeout' must be an integer (minutes)".into())
                })
                .map(|minutes| minutes * 60_000)
        })
        .transpose()?;

    if let Some(s) = string_field(value, "since")? {
        partial.modified_from = Some(parse_timestamp(&s)?);
    }
    if let Some(s) = string_field(value, "until")? {
        partial.modified_to = Some(parse_timestamp(&s)?);
    }

    let mut filters = Vec::new();
    if let Some(serde_yaml::Value::Sequence(seq)) = value.get("filters") {
        for item in seq {
            let s = item.as_str().ok_or_else(|| {
                CopycatError::Validation("'filters' entries must be strings".into())
            })?;
            filters.push(FilterRuleSpec::parse(s).map_err(|e| CopycatError::Validation(e.to_string()))?);
        }
    }

    // Deprecated `exclude:` key: rewritten to `ex:`-prefixed filters with a
    // warning, preserved intentionally per spec.md §9's open question.
    if let Some(serde_yaml::Value::Sequence(seq)) = value.get("exclude") {
        warn!("'exclude:' is deprecated; rewriting to 'filters:' with 'ex:' prefixes");
        for item in seq {
            let glob = item.as_str().ok_or_else(|| {
                CopycatError::Validation("'exclude' entries must be strings".into())
            })?;
            filters.push(FilterRuleSpec {
                action: FilterAction::Exclude,
                glob: glob.to_string(),
            });
        }
    }

    if value.get("filters").is_some() || value.get("exclude").is_some() {
        partial.filters = Some(filters);
    }

    Ok(partial)
}

fn string_field(value: &serde_yaml::Value, key: &str) -> Result<Option<String>, CopycatError> {
    match value.get(key) {
        Some(serde_yaml::Value::String(s)) => Ok(Some(s.clone())),
        Some(serde_yaml::Value::Null) | None => Ok(None),
        Some(_) => Err(CopycatError::Validation(format!("'{key}' must be a string"))),
    }
}

fn bool_field(value: &serde_yaml::Value, key: &str) -> Result<Option<bool>, CopycatError> {
    match value.get(key) {
        Some(serde_yaml::Value::Bool(b)) => Ok(Some(*b)),
        Some(serde_yaml::Value::Null) | None => Ok(None),
        Some(_) => Err(CopycatError::Validation(format!("'{key}' must be a boolean"))),
    }
}

/// Parses RFC3339 or a bare `YYYY-MM-DD` / `YYYY-MM-DDTHH:MM:SS` local-time
/// string, per §4.3's "normalize the modification-time window to the local
/// timezone".
pub fn parse_timestamp(s: &str) -> Result<Timestamp, CopycatError> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Ok(FileTime::from_unix_time(dt.timestamp(), 0));
    }
    let naive = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| {
            chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map(|d| d.and_hms_opt(0, 0, 0).expect("valid midnight"))
        })
        .map_err(|_| CopycatError::Validation(format!("invalid timestamp '{s}'")))?;
    let local = Local
        .from_local_datetime(&naive)
        .single()
        .ok_or_else(|| CopycatError::Validation(format!("ambiguous local time '{s}'")))?;
    Ok(FileTime::from_unix_time(local.timestamp(), 0))
}

impl SyncConfig {
    /// Merge the three layers, validate, canonicalize, and compile filters.
    /// `config_layer` and `cli_layer` are both optional: a bare CLI
    /// invocation with no `--config` supplies only `cli_layer`.
    pub fn compute(
        config_layer: Option<PartialConfig>,
        cli_layer: PartialConfig,
    ) -> Result<SyncConfig, CopycatError> {
        let mut merged = PartialConfig::defaults();
        if let Some(layer) = config_layer {
            merged = merged.merge_over(layer);
        }
        merged = merged.merge_over(cli_layer);

        let source_root = merged
            .source_root
            .ok_or_else(|| CopycatError::Validation("source path is required".into()))?;
        let target_root = merged
            .target_root
            .ok_or_else(|| CopycatError::Validation("target path is required".into()))?;

        let source_root = canonicalize_existing(&source_root)?;
        let target_root = canonicalize_target(&target_root)?;

        validate_roots(&source_root, &target_root)?;

        let filters = merged.filters.unwrap_or_default();
        let source_filters = FilterList::compile(&filters)
            .map_err(|e| CopycatError::Validation(e.to_string()))?;
        let target_filters = FilterList::compile(&filters)
            .map_err(|e| CopycatError::Validation(e.to_string()))?;

        let exclude_hidden = merged.exclude_hidden.unwrap_or(false);
        let exclude_system = merged.exclude_system.unwrap_or(false);
        let exclude_hidden_system = merged.exclude_hidden_system.unwrap_or(false);

        Ok(SyncConfig {
            source_root,
            target_root,
            copy_acl: merged.copy_acl.unwrap_or(false),
            delete_excluded: merged.delete_excluded.unwrap_or(false),
            filters,
            exclude_hidden,
            exclude_system,
            exclude_hidden_system,
            modified_from: merged.modified_from,
            modified_to: merged.modified_to,
            dry_run: merged.dry_run.unwrap_or(false),
            ignore_symlink_errors: merged.ignore_symlink_errors.unwrap_or(false),
            thread_count: merged.thread_count.unwrap_or_else(default_thread_count).max(1),
            stall_timeout_ms: merged.stall_timeout_ms.unwrap_or(0),
            fail_fast: merged.fail_fast.unwrap_or(false),
            source_filters: FilterEngine {
                exclude_hidden,
                exclude_system,
                exclude_hidden_system,
                modified_from: merged.modified_from,
                modified_to: merged.modified_to,
                rules: source_filters,
            },
            target_filters: FilterEngine {
                exclude_hidden,
                exclude_system,
                exclude_hidden_system,
                modified_from: merged.modified_from,
                modified_to: merged.modified_to,
                rules: target_filters,
            },
        })
    }
}

fn canonicalize_existing(path: &Path) -> Result<PathBuf, CopycatError> {
    let meta = std::fs::metadata(path).map_err(|source| CopycatError::Entry {
        path: path.to_path_buf(),
        source,
    })?;
    if !meta.is_dir() {
        return Err(CopycatError::Validation(format!(
            "source path '{}' is not a directory",
            path.display()
        )));
    }
    std::fs::canonicalize(path).map_err(|source| CopycatError::Entry {
        path: path.to_path_buf(),
        source,
    })
}

fn canonicalize_target(path: &Path) -> Result<PathBuf, CopycatError> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => std::fs::canonicalize(path).map_err(|source| CopycatError::Entry {
            path: path.to_path_buf(),
            source,
        }),
        Ok(_) => Err(CopycatError::Validation(format!(
            "target path '{}' exists and is not a directory",
            path.display()
        ))),
        Err(_) => {
            let parent = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let parent_meta = std::fs::metadata(parent).map_err(|source| CopycatError::Entry {
                path: parent.to_path_buf(),
                source,
            })?;
            if !parent_meta.is_dir() {
                return Err(CopycatError::Validation(format!(
                    "target parent '{}' is not a directory",
                    parent.display()
                )));
            }
            let canon_parent = std::fs::canonicalize(parent).map_err(|source| CopycatError::Entry {
                path: parent.to_path_buf(),
                source,
            })?;
            let name = path.file_name().ok_or_else(|| {
                CopycatError::Validation(format!("target path '{}' has no file name", path.display()))
            })?;
            Ok(canon_parent.join(name))
        }
    }
}

fn validate_roots(source_root: &Path, target_root: &Path) -> Result<(), CopycatError> {
    if source_root == target_root {
        return Err(CopycatError::Validation(
            "source and target must not be the same path".into(),
        ));
    }
    if target_root.starts_with(source_root) {
        return Err(CopycatError::Validation(
            "target path must not equal or descend from source path".into(),
        ));
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        if let (Ok(s), Ok(t)) = (std::fs::metadata(source_root), std::fs::metadata(target_root)) {
            if s.dev() == t.dev() && s.ino() == t.ino() {
                return Err(CopycatError::Validation(
                    "source and target resolve to the same inode".into(),
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn merge_last_non_none_wins() {
        let defaults = PartialConfig::defaults();
        let file_layer = PartialConfig {
            dry_run: Some(true),
            ..Default::default()
        };
        let cli_layer = PartialConfig {
            dry_run: Some(false),
            ..Default::default()
        };
        let merged = defaults.merge_over(file_layer).merge_over(cli_layer);
        assert_eq!(merged.dry_run, Some(false));
    }

    #[test]
    fn compute_rejects_missing_source() {
        let cli = PartialConfig::default();
        let err = SyncConfig::compute(None, cli).unwrap_err();
        assert!(matches!(err, CopycatError::Validation(_)));
    }

    #[test]
    fn compute_rejects_target_descending_from_source() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("src");
        std::fs::create_dir(&source).unwrap();
        let target = source.join("nested");

        let cli = PartialConfig {
            source_root: Some(source),
            target_root: Some(target),
            ..Default::default()
        };
        let err = SyncConfig::compute(None, cli).unwrap_err();
        assert!(matches!(err, CopycatError::Validation(_)));
    }

    #[test]
    fn compute_accepts_fresh_target_with_existing_parent() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("src");
        std::fs::create_dir(&source).unwrap();
        let target = dir.path().join("tgt");

        let cli = PartialConfig {
            source_root: Some(source),
            target_root: Some(target),
            ..Default::default()
        };
        let cfg = SyncConfig::compute(None, cli).unwrap();
        assert!(!cfg.target_root.exists());
    }

    #[test]
    fn deprecated_exclude_key_rewritten_to_ex_filters() {
        let tree: serde_yaml::Value = serde_yaml::from_str(
            "defaults:\n  exclude:\n    - \"*.tmp\"\nsync:\n  - source: /a\n    target: /b\n",
        )
        .unwrap();
        let file = ConfigFile::from_value(&tree).unwrap();
        let layer = file.layer_for_task(0);
        let filters = layer.filters.unwrap();
        assert_eq!(filters.len(), 1);
        assert_eq!(filters[0].action, FilterAction::Exclude);
        assert_eq!(filters[0].glob, "*.tmp");
    }

    #[test]
    fn unknown_top_level_key_is_an_error() {
        let tree: serde_yaml::Value = serde_yaml::from_str("bogus: 1\n").unwrap();
        assert!(ConfigFile::from_value(&tree).is_err());
    }
}
