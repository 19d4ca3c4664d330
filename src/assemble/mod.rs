//! The artifact assembler: pruned tree + source -> final artifact.
//!
//! Assembly copies into a staging directory next to the requested output and
//! renames it into place at the very end, so a partially assembled artifact
//! is never visible. Build-only tooling directories are skipped during the
//! copy, and every path ends up owned by the configured runtime identity; the
//! result is verified before publication.

use anyhow::{Context, Result, bail};
use log::{debug, info, warn};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::cleanup::{DiscardGuard, SharedDiscardContext};
use crate::descriptor::RuntimeDescriptor;
use crate::install::InstalledTree;
use crate::runtime::{Runtime, walk_tree};

/// Directory the application source is copied under, and the artifact's
/// working directory.
pub const APP_DIR: &str = "app";

/// Directory the pruned dependency tree is copied under.
pub const PACKAGES_DIR: &str = "site-packages";

/// Build-only tooling that must never reach the artifact.
const BUILD_TOOLING_DIRS: &[&str] = &[
    "pip",
    "setuptools",
    "wheel",
    "pkg_resources",
    "_distutils_hack",
    "__pycache__",
    ".git",
    ".cache",
];

/// The runtime identity that owns every path in the artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub uid: u32,
    pub gid: u32,
}

impl Identity {
    /// The identity of the current process.
    pub fn current() -> Self {
        #[cfg(unix)]
        {
            Identity {
                uid: nix::unistd::geteuid().as_raw(),
                gid: nix::unistd::getegid().as_raw(),
            }
        }
        #[cfg(not(unix))]
        {
            Identity { uid: 0, gid: 0 }
        }
    }
}

/// The assembled, published artifact.
#[derive(Debug)]
pub struct Artifact {
    root: PathBuf,
}

impl Artifact {
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[derive(Serialize)]
struct ArtifactManifest<'a> {
    entrypoint: &'a [String],
    workdir: &'a str,
    descriptor: &'a RuntimeDescriptor,
}

fn is_build_tooling(name: &str) -> bool {
    if BUILD_TOOLING_DIRS.contains(&name) {
        return true;
    }
    // Tooling dist-info, e.g. pip-24.0.dist-info
    name.ends_with(".dist-info")
        && BUILD_TOOLING_DIRS
            .iter()
            .any(|tool| name.starts_with(&format!("{}-", tool)))
}

/// Run the assembly stage.
#[tracing::instrument(skip(runtime, pruned, descriptor, discard))]
pub fn assemble<R: Runtime>(
    runtime: &R,
    pruned: &InstalledTree,
    source_tree: &Path,
    identity: Identity,
    descriptor: &RuntimeDescriptor,
    output: &Path,
    discard: SharedDiscardContext,
) -> Result<Artifact> {
    if runtime.exists(output) {
        bail!(
            "Artifact output {:?} already exists; artifacts are immutable once assembled",
            output
        );
    }
    if !runtime.is_dir(source_tree) {
        bail!("Source tree {:?} is not a directory", source_tree);
    }
    if ownership_needs_privilege(runtime, identity) {
        warn!(
            "Not running privileged; re-owning the artifact to {}:{} may fail",
            identity.uid, identity.gid
        );
    }

    let staging = staging_path(output)?;
    if runtime.exists(&staging) {
        runtime.remove_dir_all(&staging)?;
    }
    let guard = DiscardGuard::new(discard, staging.clone());

    match build_staging(runtime, pruned, source_tree, identity, descriptor, &staging) {
        Ok(()) => {}
        Err(e) => {
            let _ = runtime.remove_dir_all(&staging);
            return Err(e);
        }
    }

    runtime
        .rename(&staging, output)
        .context("Failed to publish assembled artifact")?;
    guard.commit();

    info!("Assembled artifact at {:?}", output);
    Ok(Artifact {
        root: output.to_path_buf(),
    })
}

fn staging_path(output: &Path) -> Result<PathBuf> {
    let name = output
        .file_name()
        .and_then(|n| n.to_str())
        .context("Artifact output path has no file name")?;
    let parent = output.parent().unwrap_or(Path::new("."));
    Ok(parent.join(format!(".{}-staging", name)))
}

fn build_staging<R: Runtime>(
    runtime: &R,
    pruned: &InstalledTree,
    source_tree: &Path,
    identity: Identity,
    descriptor: &RuntimeDescriptor,
    staging: &Path,
) -> Result<()> {
    runtime
        .create_dir_all(staging)
        .context("Failed to create artifact staging directory")?;

    copy_tree(runtime, pruned.root(), &staging.join(PACKAGES_DIR))
        .context("Failed to copy pruned dependency tree")?;
    copy_tree(runtime, source_tree, &staging.join(APP_DIR))
        .context("Failed to copy application source")?;

    let manifest = ArtifactManifest {
        entrypoint: &descriptor.entrypoint,
        workdir: APP_DIR,
        descriptor,
    };
    let json = serde_json::to_string_pretty(&manifest)?;
    runtime.write(&staging.join("artifact.json"), json.as_bytes())?;

    apply_identity(runtime, staging, identity)?;
    verify_ownership(runtime, staging, identity)?;

    Ok(())
}

/// Recursively copy `src` into `dst`, skipping build tooling directories.
fn copy_tree<R: Runtime>(runtime: &R, src: &Path, dst: &Path) -> Result<()> {
    runtime.create_dir_all(dst)?;
    runtime.set_permissions(dst, 0o755)?;

    for entry in runtime.read_dir(src)? {
        let Some(name) = entry.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if runtime.is_dir(&entry) {
            if is_build_tooling(name) {
                debug!("Skipping build tooling directory {:?}", entry);
                continue;
            }
            copy_tree(runtime, &entry, &dst.join(name))?;
        } else {
            runtime
                .copy(&entry, &dst.join(name))
                .with_context(|| format!("Failed to copy {:?}", entry))?;
        }
    }
    Ok(())
}

/// Handing the artifact to an identity other than the build process's own
/// requires privilege; detect the mismatch before chown fails mid-staging.
fn ownership_needs_privilege<R: Runtime>(runtime: &R, identity: Identity) -> bool {
    identity != Identity::current() && !runtime.is_privileged()
}

fn apply_identity<R: Runtime>(runtime: &R, root: &Path, identity: Identity) -> Result<()> {
    runtime.set_owner(root, identity.uid, identity.gid)?;
    for path in walk_tree(runtime, root)? {
        runtime.set_owner(&path, identity.uid, identity.gid)?;
    }
    Ok(())
}

/// The artifact must contain zero paths owned by the build identity.
fn verify_ownership<R: Runtime>(runtime: &R, root: &Path, identity: Identity) -> Result<()> {
    #[cfg(unix)]
    {
        for path in walk_tree(runtime, root)? {
            let (uid, gid) = runtime.owner(&path)?;
            if (uid, gid) != (identity.uid, identity.gid) {
                bail!(
                    "Artifact path {:?} is owned by {}:{}, expected {}:{}",
                    path,
                    uid,
                    gid,
                    identity.uid,
                    identity.gid
                );
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = (runtime, root, identity);
    }
    Ok(())
}
