//! Dependency manifest parsing and fingerprinting.
//!
//! A manifest is a requirements-style text file of exact pins, one per line:
//!
//! ```text
//! # comment
//! pkga==1.0
//! pkgb==2.3.1
//! ```
//!
//! The manifest is immutable after parsing and its identity is the SHA-256 of
//! the raw file contents, so any edit (including comments) produces a new
//! fingerprint and therefore a new cache entry.

use anyhow::{Result, bail};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::str::FromStr;

use crate::runtime::Runtime;

/// One exact dependency pin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pin {
    pub name: String,
    pub version: String,
}

impl Pin {
    /// Canonical blob file name for this pin.
    pub fn blob_name(&self) -> String {
        format!("{}-{}.tar.gz", self.name, self.version)
    }
}

impl FromStr for Pin {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let Some((name, version)) = s.split_once("==") else {
            bail!(
                "Invalid manifest line {:?}: expected an exact pin like \"name==version\"",
                s
            );
        };
        let name = name.trim();
        let version = version.trim();
        if name.is_empty() || version.is_empty() {
            bail!("Invalid manifest line {:?}: empty package name or version", s);
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            bail!("Invalid package name {:?}", name);
        }
        Ok(Pin {
            name: name.to_string(),
            version: version.to_string(),
        })
    }
}

/// Parsed, ordered dependency manifest. Entry order is preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pins: Vec<Pin>,
    fingerprint: String,
}

impl Manifest {
    /// Parse manifest text. The fingerprint is computed over the raw bytes,
    /// before any normalization.
    pub fn parse(contents: &str) -> Result<Self> {
        let mut pins = Vec::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            pins.push(line.parse::<Pin>()?);
        }
        if pins.is_empty() {
            bail!("Manifest contains no dependency pins");
        }

        let mut hasher = Sha256::new();
        hasher.update(contents.as_bytes());
        let fingerprint = format!("{:x}", hasher.finalize());

        Ok(Manifest { pins, fingerprint })
    }

    /// Load and parse a manifest file.
    #[tracing::instrument(skip(runtime))]
    pub fn load<R: Runtime>(runtime: &R, path: &Path) -> Result<Self> {
        let contents = runtime.read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn pins(&self) -> &[Pin] {
        &self.pins
    }

    /// Content hash of the manifest, used as the cache key.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}
