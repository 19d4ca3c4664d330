//! Privilege detection and file ownership.
//!
//! Ownership is the boundary between the build identity and the runtime
//! identity: the install stage may run privileged, but every path in the final
//! artifact must end up owned by the configured non-privileged user.

use anyhow::Result;
use std::path::Path;

use super::RealRuntime;

impl RealRuntime {
    #[tracing::instrument(skip(self))]
    pub(crate) fn is_privileged_impl(&self) -> bool {
        #[cfg(unix)]
        return nix::unistd::geteuid().as_raw() == 0;

        #[cfg(not(unix))]
        return false;
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn set_owner_impl(&self, path: &Path, uid: u32, gid: u32) -> Result<()> {
        #[cfg(unix)]
        {
            use anyhow::Context;
            use nix::unistd::{Gid, Uid, chown};
            chown(path, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid)))
                .with_context(|| format!("Failed to chown {:?} to {}:{}", path, uid, gid))?;
        }
        #[cfg(not(unix))]
        {
            let _ = (path, uid, gid); // Suppress unused warnings on non-Unix
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn owner_impl(&self, path: &Path) -> Result<(u32, u32)> {
        #[cfg(unix)]
        {
            use anyhow::Context;
            use std::os::unix::fs::MetadataExt;
            let meta = std::fs::metadata(path)
                .with_context(|| format!("Failed to stat {:?}", path))?;
            Ok((meta.uid(), meta.gid()))
        }
        #[cfg(not(unix))]
        {
            let _ = path;
            Ok((0, 0))
        }
    }
}
