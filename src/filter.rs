//! Filter engine: ordered include/exclude glob rules plus the hidden/
//! DOS-system and modification-time-window predicates evaluated ahead of
//! them. Grounded on the teacher's `core/filter.rs` first-match-wins
//! `FilterRule`/`FilterList` design, narrowed to a single glob matcher and
//! the `in:`/`ex:` string grammar this crate's config layer expects.

use glob::Pattern as GlobPattern;
use thiserror::Error;

use crate::attrs::Timestamp;

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("invalid filter spec '{0}': expected 'in:<glob>' or 'ex:<glob>'")]
    UnknownPrefix(String),
    #[error("invalid glob pattern '{pattern}': {source}")]
    InvalidGlob {
        pattern: String,
        source: glob::PatternError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterAction {
    Include,
    Exclude,
}

/// An uncompiled `in:<glob>` / `ex:<glob>` rule, as parsed from CLI `--filter`
/// flags or a config file's `filters:` list.
#[derive(Debug, Clone)]
pub struct FilterRuleSpec {
    pub action: FilterAction,
    pub glob: String,
}

impl FilterRuleSpec {
    pub fn parse(spec: &str) -> Result<Self, FilterError> {
        let lower = spec.to_ascii_lowercase();
        if let Some(rest) = lower.strip_prefix("in:") {
            let glob = &spec[spec.len() - rest.len()..];
            Ok(FilterRuleSpec {
                action: FilterAction::Include,
                glob: glob.to_string(),
            })
        } else if let Some(rest) = lower.strip_prefix("ex:") {
            let glob = &spec[spec.len() - rest.len()..];
            Ok(FilterRuleSpec {
                action: FilterAction::Exclude,
                glob: glob.to_string(),
            })
        } else {
            Err(FilterError::UnknownPrefix(spec.to_string()))
        }
    }
}

/// A compiled filter rule. `descendant` is the pattern that matches
/// everything under `pattern` when `pattern` has no terminating `/**` of
/// its own, so that excluding `build` also excludes `build/**`.
#[derive(Debug, Clone)]
struct CompiledRule {
    action: FilterAction,
    pattern: GlobPattern,
    descendant: Option<GlobPattern>,
}

impl CompiledRule {
    fn matches(&self, rel: &str) -> bool {
        self.pattern.matches(rel)
            || self
                .descendant
                .as_ref()
                .map(|d| d.matches(rel))
                .unwrap_or(false)
    }
}

/// A compiled, ordered rule list. One is built per root (source, target)
/// because the matcher binds to that root's relative-path namespace.
#[derive(Debug, Clone, Default)]
pub struct FilterList {
    rules: Vec<CompiledRule>,
}

impl FilterList {
    pub fn compile(specs: &[FilterRuleSpec]) -> Result<Self, FilterError> {
        let mut rules = Vec::with_capacity(specs.len());
        for spec in specs {
            let pattern =
                GlobPattern::new(&spec.glob).map_err(|source| FilterError::InvalidGlob {
                    pattern: spec.glob.clone(),
                    source,
                })?;
            let descendant = if spec.glob.ends_with("/**") {
                None
            } else {
                let d = format!("{}/**", spec.glob.trim_end_matches('/'));
                Some(GlobPattern::new(&d).map_err(|source| FilterError::InvalidGlob {
                    pattern: d.clone(),
                    source,
                })?)
            };
            rules.push(CompiledRule {
                action: spec.action,
                pattern,
                descendant,
            });
        }
        Ok(FilterList { rules })
    }

    /// First matching rule's action, or `None` if nothing matched.
    pub fn evaluate(&self, rel_path: &str) -> Option<FilterAction> {
        self.rules.iter().find(|r| r.matches(rel_path)).map(|r| r.action)
    }
}

/// The attribute predicates evaluated ahead of the glob rule list, plus the
/// compiled rule list itself. One instance exists per root.
#[derive(Debug, Clone)]
pub struct FilterEngine {
    pub exclude_hidden: bool,
    pub exclude_system: bool,
    pub exclude_hidden_system: bool,
    pub modified_from: Option<Timestamp>,
    pub modified_to: Option<Timestamp>,
    pub rules: FilterList,
}

impl FilterEngine {
    /// Normalize a platform path to `/`-separated form before matching, per
    /// spec.md §4.2.
    pub fn normalize_rel_path(rel: &std::path::Path) -> String {
        rel.components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Step 1-6 of the evaluation order in spec.md §4.2. `is_regular_file`
    /// gates the modification-time window (directories/symlinks are never
    /// excluded by it).
    #[allow(clippy::too_many_arguments)]
    pub fn is_excluded(
        &self,
        rel_path: &str,
        hidden: bool,
        dos_system: bool,
        is_regular_file: bool,
        mtime: Option<Timestamp>,
    ) -> bool {
        if self.exclude_hidden_system && hidden && dos_system {
            return true;
        }
        if self.exclude_system && dos_system {
            return true;
        }
        if self.exclude_hidden && hidden {
            return true;
        }
        if is_regular_file {
            if let Some(mtime) = mtime {
                let secs = mtime.seconds();
                if let Some(from) = self.modified_from {
                    if secs < from.seconds() {
                        return true;
                    }
                }
                if let Some(to) = self.modified_to {
                    if secs >= to.seconds() {
                        return true;
                    }
                }
            }
        }
        matches!(self.rules.evaluate(rel_path), Some(FilterAction::Exclude))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(action: FilterAction, glob: &str) -> FilterRuleSpec {
        FilterRuleSpec {
            action,
            glob: glob.to_string(),
        }
    }

    #[test]
    fn parses_in_and_ex_prefixes_case_insensitively() {
        let a = FilterRuleSpec::parse("IN:*.txt").unwrap();
        assert_eq!(a.action, FilterAction::Include);
        assert_eq!(a.glob, "*.txt");

        let b = FilterRuleSpec::parse("ex:tmp/**").unwrap();
        assert_eq!(b.action, FilterAction::Exclude);
    }

    #[test]
    fn rejects_unknown_prefix() {
        assert!(FilterRuleSpec::parse("no:thing").is_err());
    }

    #[test]
    fn excluding_a_directory_implicitly_excludes_descendants() {
        let list = FilterList::compile(&[rule(FilterAction::Exclude, "build")]).unwrap();
        assert_eq!(list.evaluate("build"), Some(FilterAction::Exclude));
        assert_eq!(list.evaluate("build/output.o"), Some(FilterAction::Exclude));
        assert_eq!(list.evaluate("other"), None);
    }

    #[test]
    fn first_matching_rule_wins() {
        let list = FilterList::compile(&[
            rule(FilterAction::Include, "**/*.keep"),
            rule(FilterAction::Exclude, "tmp/**"),
        ])
        .unwrap();
        // scenario 6 from the seed end-to-end tests
        assert_eq!(list.evaluate("tmp/file.keep"), Some(FilterAction::Include));
    }

    #[test]
    fn no_match_means_not_excluded() {
        let engine = FilterEngine {
            exclude_hidden: false,
            exclude_system: false,
            exclude_hidden_system: false,
            modified_from: None,
            modified_to: None,
            rules: FilterList::default(),
        };
        assert!(!engine.is_excluded("a.txt", false, false, true, None));
    }

    #[test]
    fn hidden_system_predicate_short_circuits_before_rules() {
        let engine = FilterEngine {
            exclude_hidden: false,
            exclude_system: false,
            exclude_hidden_system: true,
            modified_from: None,
            modified_to: None,
            rules: FilterList::compile(&[rule(FilterAction::Include, "**")]).unwrap(),
        };
        assert!(engine.is_excluded(".secret", true, true, true, None));
    }
}
