//! The pruning policy engine.
//!
//! Walks an installed tree and applies an ordered rule set, removing files
//! and directories that are not needed at runtime. Evaluation is:
//!
//! - **ordered**: rules run in declaration order, each against the live tree;
//! - **idempotent**: pruning an already-pruned tree deletes nothing;
//! - **fail-soft per path**: one failed deletion becomes a warning in the
//!   report, never an abort. Size reduction is best effort.
//!
//! Exceptions always take precedence over deletions, including for paths
//! buried inside a directory matched by a recursive-delete rule.

mod rules;

pub use rules::{PruneAction, PruneRule, RuleSet};

use anyhow::Result;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};

use crate::runtime::{Runtime, walk_tree};

/// A non-fatal per-path deletion failure.
#[derive(Debug, Clone)]
pub struct PruneWarning {
    pub path: PathBuf,
    pub message: String,
}

impl std::fmt::Display for PruneWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.message)
    }
}

/// Outcome of one prune pass.
#[derive(Debug, Default)]
pub struct PruneReport {
    pub removed_files: usize,
    pub removed_dirs: usize,
    pub warnings: Vec<PruneWarning>,
}

impl PruneReport {
    pub fn removed_total(&self) -> usize {
        self.removed_files + self.removed_dirs
    }
}

/// Apply a rule set to a tree, in place.
#[tracing::instrument(skip(runtime, rules))]
pub fn prune<R: Runtime>(runtime: &R, tree_root: &Path, rules: &RuleSet) -> Result<PruneReport> {
    let mut report = PruneReport::default();

    for rule in &rules.rules {
        apply_rule(runtime, tree_root, rules, rule, &mut report)?;
    }

    info!(
        "Pruned {} file(s) and {} directorie(s), {} warning(s)",
        report.removed_files,
        report.removed_dirs,
        report.warnings.len()
    );
    Ok(report)
}

fn apply_rule<R: Runtime>(
    runtime: &R,
    tree_root: &Path,
    rules: &RuleSet,
    rule: &PruneRule,
    report: &mut PruneReport,
) -> Result<()> {
    // Fresh enumeration per rule: earlier rules may have emptied whole
    // subtrees, and deletions must not race the scan of their own directory.
    let paths = walk_tree(runtime, tree_root)?;

    for path in paths {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !rule.matcher.matches(name) {
            continue;
        }

        let Ok(rel) = path.strip_prefix(tree_root) else {
            continue;
        };
        let rel = rel.to_path_buf();

        match &rule.action {
            PruneAction::DeleteFile => {
                if runtime.is_file(&path) {
                    delete(runtime, rules, &path, &rel, false, report);
                }
            }
            PruneAction::DeleteDirRecursive => {
                if runtime.is_dir(&path) {
                    delete(runtime, rules, &path, &rel, true, report);
                }
            }
            PruneAction::RetainOnlyFile(keep) => {
                if !runtime.is_dir(&path) {
                    continue;
                }
                for child in runtime.read_dir(&path)? {
                    let Some(child_name) = child.file_name() else {
                        continue;
                    };
                    if child_name == std::ffi::OsStr::new(keep) || !runtime.is_file(&child) {
                        continue;
                    }
                    let child_rel = rel.join(child_name);
                    delete(runtime, rules, &child, &child_rel, false, report);
                }
            }
        }
    }

    Ok(())
}

fn delete<R: Runtime>(
    runtime: &R,
    rules: &RuleSet,
    path: &Path,
    rel: &Path,
    recursive: bool,
    report: &mut PruneReport,
) {
    if rules.is_exempt(rel) {
        debug!("Keeping {:?}: matched by exception", rel);
        return;
    }
    // A parent may already have been removed under an earlier match
    if !runtime.exists(path) {
        return;
    }

    // An exception naming a path inside this directory must survive, so the
    // subtree cannot be taken in one go. Descend and keep the exempted paths
    // and their enclosing directories.
    if recursive && subtree_has_exemption(runtime, rules, path, rel) {
        debug!("Descending into {:?}: exception matches inside it", rel);
        delete_dir_contents(runtime, rules, path, rel, report);
        return;
    }

    let result = if recursive {
        runtime.remove_dir_all(path)
    } else {
        runtime.remove_file(path)
    };

    match result {
        Ok(()) => {
            debug!("Pruned {:?}", rel);
            if recursive {
                report.removed_dirs += 1;
            } else {
                report.removed_files += 1;
            }
        }
        Err(e) => {
            warn!("Failed to prune {:?}: {}", rel, e);
            report.warnings.push(PruneWarning {
                path: path.to_path_buf(),
                message: e.to_string(),
            });
        }
    }
}

/// True if an exception glob matches any path under `path`. Errs on the side
/// of descending when the subtree cannot be enumerated.
fn subtree_has_exemption<R: Runtime>(
    runtime: &R,
    rules: &RuleSet,
    path: &Path,
    rel: &Path,
) -> bool {
    if !rules.has_exceptions() {
        return false;
    }
    let Ok(descendants) = walk_tree(runtime, path) else {
        return true;
    };
    descendants.iter().any(|d| {
        d.strip_prefix(path)
            .is_ok_and(|suffix| rules.is_exempt(&rel.join(suffix)))
    })
}

/// Delete a directory's children one by one, skipping exempted paths.
fn delete_dir_contents<R: Runtime>(
    runtime: &R,
    rules: &RuleSet,
    dir: &Path,
    rel: &Path,
    report: &mut PruneReport,
) {
    let children = match runtime.read_dir(dir) {
        Ok(children) => children,
        Err(e) => {
            warn!("Failed to prune {:?}: {}", rel, e);
            report.warnings.push(PruneWarning {
                path: dir.to_path_buf(),
                message: e.to_string(),
            });
            return;
        }
    };

    for child in children {
        let Some(name) = child.file_name() else {
            continue;
        };
        let child_rel = rel.join(name);
        let recursive = runtime.is_dir(&child);
        delete(runtime, rules, &child, &child_rel, recursive, report);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{MockRuntime, RealRuntime};
    use std::fs;
    use tempfile::tempdir;

    fn build_sample_tree(root: &Path) {
        fs::create_dir_all(root.join("pkga/tests")).unwrap();
        fs::create_dir_all(root.join("pkga/__pycache__")).unwrap();
        fs::create_dir_all(root.join("pkga-1.0.dist-info")).unwrap();
        fs::write(root.join("pkga/__init__.py"), "VERSION = '1.0'").unwrap();
        fs::write(root.join("pkga/tests/test_api.py"), "def test(): pass").unwrap();
        fs::write(root.join("pkga/__pycache__/api.cpython-311.pyc"), "junk").unwrap();
        fs::write(root.join("pkga/module.pyc"), "junk").unwrap();
        fs::write(root.join("pkga/README.md"), "# pkga").unwrap();
        fs::write(root.join("pkga/notes.txt"), "notes").unwrap();
        fs::write(root.join("pkga-1.0.dist-info/METADATA"), "Name: pkga").unwrap();
        fs::write(root.join("pkga-1.0.dist-info/WHEEL"), "Wheel-Version: 1.0").unwrap();
        fs::write(root.join("pkga-1.0.dist-info/RECORD"), "...").unwrap();
    }

    #[test]
    fn test_prune_applies_default_rules() {
        let dir = tempdir().unwrap();
        build_sample_tree(dir.path());

        let report = prune(&RealRuntime, dir.path(), &RuleSet::default_rules()).unwrap();

        assert!(!dir.path().join("pkga/tests").exists());
        assert!(!dir.path().join("pkga/__pycache__").exists());
        assert!(!dir.path().join("pkga/module.pyc").exists());
        assert!(!dir.path().join("pkga/README.md").exists());
        assert!(!dir.path().join("pkga/notes.txt").exists());
        assert!(dir.path().join("pkga/__init__.py").exists());
        assert!(report.warnings.is_empty());
        assert!(report.removed_total() > 0);
    }

    #[test]
    fn test_dist_info_retains_only_metadata() {
        let dir = tempdir().unwrap();
        build_sample_tree(dir.path());

        prune(&RealRuntime, dir.path(), &RuleSet::default_rules()).unwrap();

        let remaining: Vec<_> = fs::read_dir(dir.path().join("pkga-1.0.dist-info"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(remaining, vec!["METADATA"]);
    }

    #[test]
    fn test_prune_is_idempotent() {
        let dir = tempdir().unwrap();
        build_sample_tree(dir.path());
        let rules = RuleSet::default_rules();

        let first = prune(&RealRuntime, dir.path(), &rules).unwrap();
        assert!(first.removed_total() > 0);

        let second = prune(&RealRuntime, dir.path(), &rules).unwrap();
        assert_eq!(second.removed_total(), 0);
        assert!(second.warnings.is_empty());
    }

    #[test]
    fn test_exception_overrides_delete_rule() {
        let dir = tempdir().unwrap();
        build_sample_tree(dir.path());

        let rules = RuleSet::default_rules()
            .with_exceptions(&["pkga/tests".to_string()])
            .unwrap();
        prune(&RealRuntime, dir.path(), &rules).unwrap();

        assert!(dir.path().join("pkga/tests/test_api.py").exists());
        // Non-exempted matches still go
        assert!(!dir.path().join("pkga/__pycache__").exists());
    }

    #[test]
    fn test_exception_inside_recursively_deleted_dir_survives() {
        let dir = tempdir().unwrap();
        build_sample_tree(dir.path());
        fs::write(dir.path().join("pkga/tests/fixture.py"), "FIXTURE = {}").unwrap();

        let rules = RuleSet::default_rules()
            .with_exceptions(&["pkga/tests/fixture.py".to_string()])
            .unwrap();
        prune(&RealRuntime, dir.path(), &rules).unwrap();

        // The exempted file and its enclosing directory stay, the rest of
        // the tests directory goes
        assert!(dir.path().join("pkga/tests/fixture.py").exists());
        assert!(!dir.path().join("pkga/tests/test_api.py").exists());
        assert!(!dir.path().join("pkga/__pycache__").exists());
    }

    #[test]
    fn test_exception_deep_inside_dir_keeps_ancestor_chain() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("pkga/tests/data")).unwrap();
        fs::create_dir_all(dir.path().join("pkga/tests/unit")).unwrap();
        fs::write(dir.path().join("pkga/tests/data/schema.json"), "{}").unwrap();
        fs::write(dir.path().join("pkga/tests/unit/test_x.py"), "").unwrap();

        let rules = RuleSet::default_rules()
            .with_exceptions(&["pkga/tests/data/schema.json".to_string()])
            .unwrap();
        let report = prune(&RealRuntime, dir.path(), &rules).unwrap();

        assert!(dir.path().join("pkga/tests/data/schema.json").exists());
        assert!(!dir.path().join("pkga/tests/unit").exists());
        // The unexempted sibling subtree was removed whole
        assert_eq!(report.removed_dirs, 1);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_exception_protects_dist_info_file() {
        let dir = tempdir().unwrap();
        build_sample_tree(dir.path());

        let rules = RuleSet::default_rules()
            .with_exceptions(&["pkga-1.0.dist-info/WHEEL".to_string()])
            .unwrap();
        prune(&RealRuntime, dir.path(), &rules).unwrap();

        assert!(dir.path().join("pkga-1.0.dist-info/WHEEL").exists());
        assert!(!dir.path().join("pkga-1.0.dist-info/RECORD").exists());
    }

    #[test]
    fn test_prune_empty_tree_is_a_noop() {
        let dir = tempdir().unwrap();
        let report = prune(&RealRuntime, dir.path(), &RuleSet::default_rules()).unwrap();
        assert_eq!(report.removed_total(), 0);
    }

    #[test]
    fn test_nested_pycache_inside_tests_counts_once() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("pkga/tests/__pycache__")).unwrap();
        fs::write(dir.path().join("pkga/tests/__pycache__/t.pyc"), "junk").unwrap();

        let report = prune(&RealRuntime, dir.path(), &RuleSet::default_rules()).unwrap();

        // The tests rule removes the whole subtree; later rules find nothing
        assert_eq!(report.removed_dirs, 1);
        assert_eq!(report.removed_files, 0);
        assert!(!dir.path().join("pkga/tests").exists());
    }

    #[test]
    fn test_deletion_failure_is_a_warning_not_an_error() {
        let mut runtime = MockRuntime::new();
        let root = PathBuf::from("/tree");
        let bad = root.join("stuck.pyc");
        let bad_for_mock = bad.clone();

        runtime
            .expect_read_dir()
            .returning(move |_| Ok(vec![bad_for_mock.clone()]));
        runtime.expect_is_dir().returning(|_| false);
        runtime.expect_is_file().returning(|_| true);
        runtime.expect_exists().returning(|_| true);
        runtime
            .expect_remove_file()
            .returning(|_| Err(anyhow::anyhow!("permission denied")));

        let report = prune(&runtime, &root, &RuleSet::default_rules()).unwrap();

        assert_eq!(report.removed_total(), 0);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].message.contains("permission denied"));
        assert_eq!(report.warnings[0].path, bad);
    }
}
