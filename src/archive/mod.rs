//! Extraction of package archive blobs into the installed tree.
//!
//! Blobs are gzip'd tarballs whose entries are rooted at the package's own
//! subpaths (module directory plus `*.dist-info`). Entry paths are validated
//! before unpacking so a hostile archive can never write outside the tree
//! root.

use anyhow::{Context, Result, bail};
use flate2::read::GzDecoder;
use std::path::{Component, Path};
use tar::Archive;

use crate::runtime::Runtime;

/// Extract a tar.gz blob into `tree_root`.
#[tracing::instrument(skip(runtime, bytes))]
pub fn extract_blob<R: Runtime>(runtime: &R, bytes: &[u8], tree_root: &Path) -> Result<()> {
    runtime
        .create_dir_all(tree_root)
        .context("Failed to create tree root")?;

    let mut archive = Archive::new(GzDecoder::new(bytes));
    for entry in archive.entries().context("Failed to read archive")? {
        let mut entry = entry.context("Failed to read archive entry")?;
        let path = entry
            .path()
            .context("Archive entry has invalid path")?
            .into_owned();

        for component in path.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => bail!(
                    "Archive entry {:?} escapes the tree root",
                    path.display()
                ),
            }
        }

        entry
            .unpack_in(tree_root)
            .with_context(|| format!("Failed to unpack archive entry {:?}", path))?;
    }

    Ok(())
}
