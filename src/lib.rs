//! slimbuild - staged build-and-prune pipeline.
//!
//! Installs pinned dependencies into an isolated tree (backed by a
//! fingerprint-keyed cache), strips the tree down with a declarative rule
//! set, and assembles a minimal artifact from the pruned tree plus the
//! application source, owned by a non-privileged runtime identity.

pub mod archive;
pub mod assemble;
pub mod cache;
pub mod cleanup;
pub mod descriptor;
pub mod fetch;
pub mod http;
pub mod install;
pub mod manifest;
pub mod pipeline;
pub mod prune;
pub mod runtime;
