//! Runtime descriptor metadata attached to the final artifact.
//!
//! The pipeline never interprets any of this; it is external configuration
//! (exposed port, liveness probe, entry command, runtime env toggles) carried
//! verbatim into `artifact.json` for whatever wraps the artifact.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::runtime::Runtime;

/// HTTP liveness probe polled by the artifact's supervisor.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct HealthProbe {
    pub path: String,
    pub interval_secs: u64,
    pub timeout_secs: u64,
    pub retries: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RuntimeDescriptor {
    pub port: u16,
    pub health: HealthProbe,
    /// Process entry command, argv style.
    pub entrypoint: Vec<String>,
    /// Environment toggles passed through to the runtime.
    pub env: BTreeMap<String, String>,
}

impl Default for RuntimeDescriptor {
    fn default() -> Self {
        let mut env = BTreeMap::new();
        env.insert("PYTHONUNBUFFERED".to_string(), "1".to_string());
        env.insert("MALLOC_TRIM_THRESHOLD_".to_string(), "100000".to_string());

        RuntimeDescriptor {
            port: 8000,
            health: HealthProbe {
                path: "/health".to_string(),
                interval_secs: 30,
                timeout_secs: 10,
                retries: 3,
            },
            entrypoint: vec![
                "python".to_string(),
                "-m".to_string(),
                "uvicorn".to_string(),
                "main:app".to_string(),
            ],
            env,
        }
    }
}

impl RuntimeDescriptor {
    /// Load a descriptor from a JSON file.
    #[tracing::instrument(skip(runtime))]
    pub fn load<R: Runtime>(runtime: &R, path: &Path) -> Result<Self> {
        let contents = runtime.read_to_string(path)?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Invalid runtime descriptor at {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MockRuntime;
    use mockall::predicate::eq;
    use std::path::PathBuf;

    #[test]
    fn test_default_descriptor_values() {
        let d = RuntimeDescriptor::default();
        assert_eq!(d.port, 8000);
        assert_eq!(d.health.path, "/health");
        assert_eq!(d.env.get("PYTHONUNBUFFERED").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_descriptor_json_round_trip() {
        let d = RuntimeDescriptor::default();
        let json = serde_json::to_string(&d).unwrap();
        let back: RuntimeDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(d, back);
    }

    #[test]
    fn test_load_via_runtime() {
        let mut runtime = MockRuntime::new();
        let path = PathBuf::from("/build/descriptor.json");
        runtime
            .expect_read_to_string()
            .with(eq(path.clone()))
            .returning(|_| {
                Ok(serde_json::to_string(&RuntimeDescriptor::default()).unwrap())
            });

        let d = RuntimeDescriptor::load(&runtime, &path).unwrap();
        assert_eq!(d.health.retries, 3);
    }

    #[test]
    fn test_load_invalid_json_is_an_error() {
        let mut runtime = MockRuntime::new();
        runtime
            .expect_read_to_string()
            .returning(|_| Ok("{not json".to_string()));

        let result = RuntimeDescriptor::load(&runtime, &PathBuf::from("/d.json"));
        assert!(result.is_err());
    }
}
