//! The install stage: manifest + cache -> isolated installed tree.
//!
//! Installation is all-or-nothing. A cache hit reuses the stored blob set and
//! performs no network fetches; a miss fetches every pin (bounded
//! concurrency), publishes the blob set to the cache, then extracts. Any
//! package failure aborts the stage and removes the partial tree, so nothing
//! incomplete is ever handed downstream.

use anyhow::{Context, Result};
use futures_util::stream::{self, StreamExt, TryStreamExt};
use log::{debug, info};
use std::path::{Path, PathBuf};

use crate::archive::extract_blob;
use crate::cache::{CacheStore, CachedBlob};
use crate::cleanup::{DiscardGuard, SharedDiscardContext};
use crate::fetch::FetchPackages;
use crate::manifest::Manifest;
use crate::runtime::Runtime;

/// Bound on concurrent index fetches within one install.
const MAX_CONCURRENT_FETCHES: usize = 4;

/// A fully populated installed tree, owned by the pipeline until the
/// assembler has copied from it.
#[derive(Debug)]
pub struct InstalledTree {
    root: PathBuf,
}

impl InstalledTree {
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Build a tree handle around a directory assembled by hand.
    #[cfg(test)]
    pub(crate) fn for_tests(root: PathBuf) -> Self {
        Self { root }
    }
}

/// Run the install stage.
///
/// The tree is created under `work_dir`, named after the manifest
/// fingerprint. A stale tree from an earlier aborted run is removed first.
#[tracing::instrument(skip(runtime, manifest, cache, fetcher, discard))]
pub async fn install<R: Runtime, F: FetchPackages + ?Sized>(
    runtime: &R,
    manifest: &Manifest,
    cache: &CacheStore<'_, R>,
    fetcher: &F,
    work_dir: &Path,
    discard: SharedDiscardContext,
) -> Result<InstalledTree> {
    let fingerprint = manifest.fingerprint();
    let tree_root = work_dir.join(format!("installed-{}", &fingerprint[..12]));

    if runtime.exists(&tree_root) {
        debug!("Removing stale installed tree at {:?}", tree_root);
        runtime.remove_dir_all(&tree_root)?;
    }
    runtime
        .create_dir_all(&tree_root)
        .context("Failed to create installed tree root")?;

    let guard = DiscardGuard::new(discard, tree_root.clone());

    match populate(runtime, manifest, cache, fetcher, &tree_root).await {
        Ok(()) => {
            guard.commit();
            info!(
                "Installed {} package(s) into {:?}",
                manifest.pins().len(),
                tree_root
            );
            Ok(InstalledTree { root: tree_root })
        }
        Err(e) => {
            // All-or-nothing: no partial tree survives a failed install
            let _ = runtime.remove_dir_all(&tree_root);
            Err(e)
        }
    }
}

async fn populate<R: Runtime, F: FetchPackages + ?Sized>(
    runtime: &R,
    manifest: &Manifest,
    cache: &CacheStore<'_, R>,
    fetcher: &F,
    tree_root: &Path,
) -> Result<()> {
    let fingerprint = manifest.fingerprint();

    let blobs = match cache.fetch(fingerprint)? {
        Some(blobs) => {
            info!("Reusing cached dependencies for fingerprint {}", fingerprint);
            blobs
        }
        None => {
            info!(
                "Cache miss for {}, fetching {} package(s)",
                fingerprint,
                manifest.pins().len()
            );

            let mut fetched: Vec<CachedBlob> = stream::iter(manifest.pins().iter().map(|pin| {
                async move {
                    let bytes = fetcher.fetch(pin).await?;
                    Ok::<_, anyhow::Error>(CachedBlob {
                        name: pin.blob_name(),
                        bytes,
                    })
                }
            }))
            .buffer_unordered(MAX_CONCURRENT_FETCHES)
            .try_collect()
            .await?;

            fetched.sort_by(|a, b| a.name.cmp(&b.name));
            cache.store(fingerprint, &fetched)?;
            fetched
        }
    };

    for blob in &blobs {
        debug!("Extracting {} into {:?}", blob.name, tree_root);
        extract_blob(runtime, &blob.bytes, tree_root)
            .with_context(|| format!("Failed to extract {}", blob.name))?;
    }

    Ok(())
}
