//! Discard tracking for uncommitted stage outputs.
//!
//! Every stage writes into a working directory that only becomes visible to
//! the next stage once the whole stage has succeeded. Directories registered
//! here are removed when a stage fails or the run is interrupted, so a partial
//! installed tree or artifact is never left behind.

use log::debug;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Tracks stage working directories that must not outlive a failed run.
#[derive(Default)]
pub struct DiscardContext {
    #[cfg(test)]
    pub paths: Vec<PathBuf>,
    #[cfg(not(test))]
    paths: Vec<PathBuf>,
}

impl DiscardContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an uncommitted path.
    pub fn add(&mut self, path: PathBuf) {
        self.paths.push(path);
    }

    /// Deregister a path once its stage has committed.
    pub fn remove(&mut self, path: &Path) {
        self.paths.retain(|p| p != path);
    }

    /// Remove every registered path, best effort.
    pub fn discard_all(&self) {
        for path in &self.paths {
            debug!("Discarding uncommitted output: {:?}", path);
            if path.is_dir() {
                let _ = std::fs::remove_dir_all(path);
            } else {
                let _ = std::fs::remove_file(path);
            }
        }
    }
}

/// Type alias for a discard context shared across stages
pub type SharedDiscardContext = Arc<Mutex<DiscardContext>>;

pub fn new_shared() -> SharedDiscardContext {
    Arc::new(Mutex::new(DiscardContext::new()))
}

/// RAII guard over one stage output. Dropping the guard without calling
/// [`DiscardGuard::commit`] leaves the path registered for discard.
pub struct DiscardGuard {
    ctx: SharedDiscardContext,
    path: PathBuf,
}

impl DiscardGuard {
    pub fn new(ctx: SharedDiscardContext, path: PathBuf) -> Self {
        {
            let mut guard = ctx.lock().unwrap();
            guard.add(path.clone());
        }
        Self { ctx, path }
    }

    /// Mark the stage output as committed; it will survive the run.
    pub fn commit(self) {
        {
            let mut guard = self.ctx.lock().unwrap();
            guard.remove(&self.path);
        }
        // Skip Drop, the path has already been deregistered
        std::mem::forget(self);
    }
}

impl Drop for DiscardGuard {
    fn drop(&mut self) {
        // Path stays registered unless commit() was called
    }
}
