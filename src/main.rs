use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use slimbuild::assemble::Identity;
use slimbuild::descriptor::RuntimeDescriptor;
use slimbuild::fetch::IndexFetcher;
use slimbuild::http::HttpClient;
use slimbuild::pipeline::{BuildPipeline, BuildRequest};
use slimbuild::prune::{RuleSet, prune};
use slimbuild::runtime::RealRuntime;

/// slimbuild - staged build-and-prune pipeline
///
/// Installs pinned dependencies, strips non-essential files, and assembles a
/// minimal runtime artifact owned by a non-privileged identity.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the full pipeline: install, prune, assemble
    Build(BuildArgs),

    /// Apply the prune rule set to an existing installed tree
    Prune(PruneArgs),
}

#[derive(clap::Args, Debug)]
struct BuildArgs {
    /// Dependency manifest (exact pins, one "name==version" per line)
    #[arg(long, value_name = "PATH")]
    manifest: PathBuf,

    /// Application source tree copied into the artifact
    #[arg(long, value_name = "PATH")]
    source: PathBuf,

    /// Where to publish the assembled artifact (must not exist)
    #[arg(long, value_name = "PATH")]
    output: PathBuf,

    /// Package index base URL (also via SLIMBUILD_INDEX_URL)
    #[arg(long = "index-url", env = "SLIMBUILD_INDEX_URL", value_name = "URL")]
    index_url: String,

    /// Cache directory, persists across runs (also via SLIMBUILD_CACHE)
    #[arg(
        long,
        env = "SLIMBUILD_CACHE",
        value_name = "PATH",
        default_value = ".slimbuild/cache"
    )]
    cache: PathBuf,

    /// Working directory for intermediate trees
    #[arg(long, value_name = "PATH", default_value = ".slimbuild/work")]
    work: PathBuf,

    /// Runtime identity uid (defaults to the current user)
    #[arg(long, value_name = "UID")]
    uid: Option<u32>,

    /// Runtime identity gid (defaults to the current group)
    #[arg(long, value_name = "GID")]
    gid: Option<u32>,

    /// Exception glob: paths matching it survive pruning even when a delete
    /// rule matches (e.g. --keep criticalpkg/tests). May be repeated.
    #[arg(long = "keep", value_name = "GLOB")]
    keep: Vec<String>,

    /// Runtime descriptor JSON attached verbatim to the artifact
    #[arg(long, value_name = "PATH")]
    descriptor: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
struct PruneArgs {
    /// Root of the installed tree to prune in place
    #[arg(value_name = "TREE")]
    tree: PathBuf,

    /// Exception glob, may be repeated
    #[arg(long = "keep", value_name = "GLOB")]
    keep: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let runtime = RealRuntime;

    match cli.command {
        Commands::Build(args) => build(&runtime, args).await,
        Commands::Prune(args) => {
            let rules = RuleSet::default_rules().with_exceptions(&args.keep)?;
            let report = prune(&runtime, &args.tree, &rules)?;
            println!(
                "Pruned {} file(s) and {} directorie(s), {} warning(s)",
                report.removed_files,
                report.removed_dirs,
                report.warnings.len()
            );
            Ok(())
        }
    }
}

async fn build(runtime: &RealRuntime, args: BuildArgs) -> Result<()> {
    let default_identity = Identity::current();
    let identity = Identity {
        uid: args.uid.unwrap_or(default_identity.uid),
        gid: args.gid.unwrap_or(default_identity.gid),
    };

    let descriptor = match &args.descriptor {
        Some(path) => RuntimeDescriptor::load(runtime, path)?,
        None => RuntimeDescriptor::default(),
    };

    let client = reqwest::Client::builder().user_agent("slimbuild").build()?;
    let fetcher = IndexFetcher::new(HttpClient::new(client), args.index_url);

    let request = BuildRequest {
        manifest_path: args.manifest,
        source_tree: args.source,
        cache_dir: args.cache,
        work_dir: args.work,
        output: args.output,
        identity,
        keep: args.keep,
        descriptor,
    };

    let mut pipeline = BuildPipeline::new(runtime);
    let outcome = pipeline.run(&fetcher, &request).await?;

    println!("Artifact assembled at {}", outcome.artifact.root().display());
    if !outcome.prune_report.warnings.is_empty() {
        println!(
            "{} path(s) could not be pruned, see log for details",
            outcome.prune_report.warnings.len()
        );
    }
    Ok(())
}
