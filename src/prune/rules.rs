//! Declarative prune rules and the rule set evaluated by the engine.

use anyhow::{Context, Result};
use glob::Pattern;
use std::path::Path;

/// What to do with a matched path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PruneAction {
    /// Delete a matching file.
    DeleteFile,
    /// Delete a matching directory and everything under it.
    DeleteDirRecursive,
    /// Inside a matching directory, delete every file except the named one.
    RetainOnlyFile(String),
}

/// One rule: a file-name matcher plus an action.
#[derive(Debug, Clone)]
pub struct PruneRule {
    pub matcher: Pattern,
    pub action: PruneAction,
}

impl PruneRule {
    pub fn delete_file(pattern: &str) -> Self {
        Self {
            matcher: Pattern::new(pattern).expect("invalid builtin pattern"),
            action: PruneAction::DeleteFile,
        }
    }

    pub fn delete_dir(pattern: &str) -> Self {
        Self {
            matcher: Pattern::new(pattern).expect("invalid builtin pattern"),
            action: PruneAction::DeleteDirRecursive,
        }
    }

    pub fn retain_only(dir_pattern: &str, keep: &str) -> Self {
        Self {
            matcher: Pattern::new(dir_pattern).expect("invalid builtin pattern"),
            action: PruneAction::RetainOnlyFile(keep.to_string()),
        }
    }
}

/// Ordered rules plus exception globs. Exceptions always win: a path whose
/// tree-relative path (or any ancestor's) matches an exception glob survives
/// every rule.
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub rules: Vec<PruneRule>,
    exceptions: Vec<Pattern>,
}

impl RuleSet {
    pub fn new(rules: Vec<PruneRule>) -> Self {
        Self {
            rules,
            exceptions: Vec::new(),
        }
    }

    /// The default policy applied to installed trees, in declaration order:
    /// test directories and bytecode caches, compiled bytecode, bundled
    /// docs, and all `*.dist-info` contents except `METADATA`.
    pub fn default_rules() -> Self {
        Self::new(vec![
            PruneRule::delete_dir("tests"),
            PruneRule::delete_dir("__pycache__"),
            PruneRule::delete_file("*.pyc"),
            PruneRule::delete_file("*.pyo"),
            PruneRule::delete_file("*.md"),
            PruneRule::delete_file("*.txt"),
            PruneRule::retain_only("*.dist-info", "METADATA"),
        ])
    }

    /// Add caller-supplied exception globs (tree-relative paths). This is the
    /// safety valve for a dependency that needs pruned paths at runtime, e.g.
    /// `criticalpkg/tests`.
    pub fn with_exceptions(mut self, globs: &[String]) -> Result<Self> {
        for g in globs {
            let pattern =
                Pattern::new(g).with_context(|| format!("Invalid exception glob {:?}", g))?;
            self.exceptions.push(pattern);
        }
        Ok(self)
    }

    pub fn has_exceptions(&self) -> bool {
        !self.exceptions.is_empty()
    }

    /// True if a tree-relative path, or any of its ancestors, matches an
    /// exception glob.
    pub fn is_exempt(&self, rel_path: &Path) -> bool {
        self.exceptions.iter().any(|pattern| {
            rel_path
                .ancestors()
                .filter(|a| !a.as_os_str().is_empty())
                .any(|a| pattern.matches_path(a))
        })
    }
}
