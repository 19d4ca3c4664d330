//! Pipeline orchestration: install -> prune -> assemble.
//!
//! Stages run strictly in sequence; each stage's committed output is the next
//! stage's sole input. Any fatal stage error moves the pipeline to `Failed`
//! and discards uncommitted outputs. There are no automatic retries: a
//! failed run is re-run from `Start` by the caller and relies on the cache to
//! make the re-run cheap.

use log::{info, warn};
use std::path::PathBuf;
use thiserror::Error;

use crate::assemble::{Artifact, Identity, assemble};
use crate::cache::CacheStore;
use crate::cleanup::{self, DiscardGuard, SharedDiscardContext};
use crate::descriptor::RuntimeDescriptor;
use crate::fetch::FetchPackages;
use crate::install::install;
use crate::manifest::Manifest;
use crate::prune::{PruneReport, RuleSet, prune};
use crate::runtime::Runtime;

/// Fatal stage failures. Non-fatal conditions (cache corruption, per-path
/// prune failures) never surface here; they are downgraded inside their
/// stages.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Manifest resolution or package fetch failure; aborts the install stage.
    #[error("install stage failed: {0:#}")]
    Fetch(anyhow::Error),
    /// Tree enumeration failure while pruning (per-path deletion failures are
    /// warnings, not errors).
    #[error("prune stage failed: {0:#}")]
    Prune(anyhow::Error),
    /// Copy or ownership failure; no partial artifact is published.
    #[error("assembly stage failed: {0:#}")]
    Assembly(anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Start,
    Installing,
    Installed,
    Pruning,
    Pruned,
    Assembling,
    Assembled,
    Failed,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PipelineState::Start => "start",
            PipelineState::Installing => "installing",
            PipelineState::Installed => "installed",
            PipelineState::Pruning => "pruning",
            PipelineState::Pruned => "pruned",
            PipelineState::Assembling => "assembling",
            PipelineState::Assembled => "assembled",
            PipelineState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Everything one build invocation needs besides the fetcher.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub manifest_path: PathBuf,
    pub source_tree: PathBuf,
    pub cache_dir: PathBuf,
    pub work_dir: PathBuf,
    pub output: PathBuf,
    pub identity: Identity,
    /// Exception globs forwarded to the prune rule set.
    pub keep: Vec<String>,
    pub descriptor: RuntimeDescriptor,
}

/// Result of a successful run: the published artifact plus the aggregated
/// prune warnings for operator visibility.
#[derive(Debug)]
pub struct BuildOutcome {
    pub artifact: Artifact,
    pub prune_report: PruneReport,
}

pub struct BuildPipeline<'a, R: Runtime> {
    runtime: &'a R,
    state: PipelineState,
    discard: SharedDiscardContext,
}

impl<'a, R: Runtime> BuildPipeline<'a, R> {
    pub fn new(runtime: &'a R) -> Self {
        Self {
            runtime,
            state: PipelineState::Start,
            discard: cleanup::new_shared(),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Run the full pipeline. On error the terminal state is `Failed` and
    /// every uncommitted stage output has been discarded.
    #[tracing::instrument(skip(self, fetcher, request))]
    pub async fn run<F: FetchPackages + ?Sized>(
        &mut self,
        fetcher: &F,
        request: &BuildRequest,
    ) -> Result<BuildOutcome, PipelineError> {
        match self.run_stages(fetcher, request).await {
            Ok(outcome) => {
                self.state = PipelineState::Assembled;
                report_warnings(&outcome.prune_report);
                Ok(outcome)
            }
            Err(e) => {
                self.state = PipelineState::Failed;
                self.discard.lock().unwrap().discard_all();
                Err(e)
            }
        }
    }

    async fn run_stages<F: FetchPackages + ?Sized>(
        &mut self,
        fetcher: &F,
        request: &BuildRequest,
    ) -> Result<BuildOutcome, PipelineError> {
        let manifest = Manifest::load(self.runtime, &request.manifest_path)
            .map_err(PipelineError::Fetch)?;
        let cache = CacheStore::new(self.runtime, request.cache_dir.clone());

        self.state = PipelineState::Installing;
        info!("Installing {} package(s)...", manifest.pins().len());
        let tree = install(
            self.runtime,
            &manifest,
            &cache,
            fetcher,
            &request.work_dir,
            self.discard.clone(),
        )
        .await
        .map_err(PipelineError::Fetch)?;
        self.state = PipelineState::Installed;

        // The tree is an intermediate from the pipeline's point of view:
        // discard it on any later stage failure, not just install failure
        let tree_guard = DiscardGuard::new(self.discard.clone(), tree.root().to_path_buf());

        self.state = PipelineState::Pruning;
        let rules = RuleSet::default_rules()
            .with_exceptions(&request.keep)
            .map_err(PipelineError::Prune)?;
        let prune_report =
            prune(self.runtime, tree.root(), &rules).map_err(PipelineError::Prune)?;
        self.state = PipelineState::Pruned;

        self.state = PipelineState::Assembling;
        let artifact = assemble(
            self.runtime,
            &tree,
            &request.source_tree,
            request.identity,
            &request.descriptor,
            &request.output,
            self.discard.clone(),
        )
        .map_err(PipelineError::Assembly)?;

        // The artifact owns the copy now; the tree has served its purpose
        tree_guard.commit();
        if let Err(e) = self.runtime.remove_dir_all(tree.root()) {
            warn!("Failed to discard installed tree {:?}: {}", tree.root(), e);
        }

        Ok(BuildOutcome {
            artifact,
            prune_report,
        })
    }
}

fn report_warnings(report: &PruneReport) {
    if report.warnings.is_empty() {
        return;
    }
    warn!(
        "{} path(s) could not be pruned (artifact is usable, larger than ideal):",
        report.warnings.len()
    );
    for warning in &report.warnings {
        warn!("  {}", warning);
    }
}
