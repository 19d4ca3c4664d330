//! Persistent, fingerprint-keyed dependency cache.
//!
//! Layout on disk:
//!
//! ```text
//! <cache root>/
//!   <fingerprint>/
//!     pkga-1.0.tar.gz
//!     pkga-1.0.tar.gz.sha256
//! ```
//!
//! Every blob carries a SHA-256 sidecar. A mismatching or missing sidecar
//! marks the whole entry corrupt; corrupt entries are downgraded to a cache
//! miss and never served. Entries are published by writing to a temp directory
//! and renaming it into place, so readers never observe a half-written entry.

use anyhow::{Context, Result};
use log::{debug, warn};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::runtime::Runtime;

/// One cached package archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedBlob {
    /// Blob file name, e.g. `pkga-1.0.tar.gz`.
    pub name: String,
    pub bytes: Vec<u8>,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub struct CacheStore<'a, R: Runtime> {
    runtime: &'a R,
    root: PathBuf,
}

impl<'a, R: Runtime> CacheStore<'a, R> {
    pub fn new(runtime: &'a R, root: PathBuf) -> Self {
        Self { runtime, root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_dir(&self, fingerprint: &str) -> PathBuf {
        self.root.join(fingerprint)
    }

    /// Look up the blob set for a manifest fingerprint.
    ///
    /// Returns `Ok(None)` on a miss. A corrupt entry (checksum mismatch,
    /// missing sidecar, unreadable blob) is logged and reported as a miss,
    /// never as an error and never served.
    #[tracing::instrument(skip(self))]
    pub fn fetch(&self, fingerprint: &str) -> Result<Option<Vec<CachedBlob>>> {
        let entry = self.entry_dir(fingerprint);
        if !self.runtime.is_dir(&entry) {
            debug!("Cache miss for {}", fingerprint);
            return Ok(None);
        }

        let mut blobs = Vec::new();
        let mut paths = self.runtime.read_dir(&entry)?;
        paths.sort();

        for path in paths {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.ends_with(".sha256") {
                continue;
            }

            let sidecar = entry.join(format!("{}.sha256", name));
            let expected = match self.runtime.read_to_string(&sidecar) {
                Ok(s) => s.trim().to_string(),
                Err(_) => {
                    warn!(
                        "Cache entry {} is missing checksum for {}, treating as miss",
                        fingerprint, name
                    );
                    return Ok(None);
                }
            };

            let bytes = match self.runtime.read(&path) {
                Ok(b) => b,
                Err(e) => {
                    warn!(
                        "Cache entry {} has unreadable blob {} ({}), treating as miss",
                        fingerprint, name, e
                    );
                    return Ok(None);
                }
            };

            if sha256_hex(&bytes) != expected {
                warn!(
                    "Cache entry {} failed checksum for {}, treating as miss",
                    fingerprint, name
                );
                return Ok(None);
            }

            blobs.push(CachedBlob {
                name: name.to_string(),
                bytes,
            });
        }

        if blobs.is_empty() {
            debug!("Cache entry {} is empty, treating as miss", fingerprint);
            return Ok(None);
        }

        debug!("Cache hit for {} ({} blobs)", fingerprint, blobs.len());
        Ok(Some(blobs))
    }

    /// Publish a blob set under a fingerprint.
    ///
    /// Writes to a temp directory and renames it into place. If a concurrent
    /// writer published the entry first, the temp copy is discarded; the
    /// existing entry wins.
    #[tracing::instrument(skip(self, blobs))]
    pub fn store(&self, fingerprint: &str, blobs: &[CachedBlob]) -> Result<()> {
        let entry = self.entry_dir(fingerprint);
        let staging = self.root.join(format!(
            ".tmp-{}-{}",
            fingerprint,
            std::process::id()
        ));

        self.runtime
            .create_dir_all(&staging)
            .context("Failed to create cache staging directory")?;

        let write_all = (|| -> Result<()> {
            for blob in blobs {
                self.runtime.write(&staging.join(&blob.name), &blob.bytes)?;
                self.runtime.write(
                    &staging.join(format!("{}.sha256", blob.name)),
                    sha256_hex(&blob.bytes).as_bytes(),
                )?;
            }
            Ok(())
        })();

        if let Err(e) = write_all {
            let _ = self.runtime.remove_dir_all(&staging);
            return Err(e);
        }

        match self.runtime.rename(&staging, &entry) {
            Ok(()) => {
                debug!("Stored cache entry {} ({} blobs)", fingerprint, blobs.len());
                Ok(())
            }
            Err(e) if self.runtime.exists(&entry) => {
                // Lost the race against another writer
                debug!("Cache entry {} already published, discarding: {}", fingerprint, e);
                let _ = self.runtime.remove_dir_all(&staging);
                Ok(())
            }
            Err(e) => {
                let _ = self.runtime.remove_dir_all(&staging);
                Err(e)
            }
        }
    }
}
