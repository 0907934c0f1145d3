//! Repository-local configuration.
//!
//! Loaded from `.huskycat.toml` at the repo root; every section is optional
//! and `HUSKYCAT_*` environment variables win over the file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::OrchestratorError;

pub const ENV_MODE: &str = "HUSKYCAT_MODE";
pub const ENV_NONBLOCKING: &str = "HUSKYCAT_NONBLOCKING";
pub const ENV_TIMEOUT_SECONDS: &str = "HUSKYCAT_TIMEOUT_SECONDS";
pub const ENV_WORKERS: &str = "HUSKYCAT_WORKERS";
pub const ENV_SANDBOXED: &str = "HUSKYCAT_SANDBOXED";
pub const ENV_LOG: &str = "HUSKYCAT_LOG";

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct HuskycatConfig {
    /// Tool selection knobs.
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Scheduling limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Run store retention.
    #[serde(default)]
    pub store: StoreConfig,

    /// Sandbox runtime used for copyleft sidecars and delegation.
    #[serde(default)]
    pub sandbox: SandboxConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ValidationConfig {
    /// Explicit allow-list; empty means every registered tool.
    #[serde(default)]
    pub enabled: Vec<String>,
    /// Tools never run regardless of matchers.
    #[serde(default)]
    pub disabled: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsConfig {
    /// Per-tool deadline in seconds.
    pub timeout_seconds: u64,
    /// Worker pool size; 0 means the hardware thread count.
    pub workers: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 60,
            workers: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    /// Runs older than this are garbage-collected.
    pub retention_days: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { retention_days: 7 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SandboxConfig {
    /// Container runtime binary probed on PATH.
    pub runtime: String,
    /// Image used for sidecar and delegated executions.
    pub image: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            runtime: "docker".to_string(),
            image: "huskycat/toolbox:latest".to_string(),
        }
    }
}

impl HuskycatConfig {
    /// Load `.huskycat.toml` if present, then apply environment overrides.
    pub fn load(config_file: &Path) -> Result<Self> {
        let mut config = if config_file.exists() {
            let raw = std::fs::read_to_string(config_file)
                .with_context(|| format!("failed to read {}", config_file.display()))?;
            toml::from_str(&raw).map_err(|err| {
                OrchestratorError::configuration(format!(
                    "malformed config {}: {err}",
                    config_file.display()
                ))
            })?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(seconds) = read_env_parse::<u64>(ENV_TIMEOUT_SECONDS) {
            self.limits.timeout_seconds = seconds;
        }
        if let Some(workers) = read_env_parse::<usize>(ENV_WORKERS) {
            self.limits.workers = workers;
        }
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.limits.timeout_seconds.max(1))
    }

    pub fn worker_count(&self) -> usize {
        if self.limits.workers == 0 {
            num_cpus::get()
        } else {
            self.limits.workers
        }
    }

    pub fn tool_enabled(&self, name: &str) -> bool {
        if self.validation.disabled.iter().any(|t| t == name) {
            return false;
        }
        self.validation.enabled.is_empty() || self.validation.enabled.iter().any(|t| t == name)
    }
}

fn read_env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.trim().parse().ok()
}

/// Truthiness used for `huskycat.nonblocking` and `HUSKYCAT_NONBLOCKING`.
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_are_sane() {
        let config = HuskycatConfig::default();
        assert_eq!(config.limits.timeout_seconds, 60);
        assert_eq!(config.store.retention_days, 7);
        assert_eq!(config.sandbox.runtime, "docker");
        assert!(config.tool_enabled("ruff-check"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = HuskycatConfig::load(&dir.path().join(".huskycat.toml")).unwrap();
        assert_eq!(config.limits.timeout_seconds, 60);
    }

    #[test]
    fn file_sections_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".huskycat.toml");
        std::fs::write(
            &path,
            "[limits]\ntimeout_seconds = 5\nworkers = 2\n\n[validation]\ndisabled = [\"mypy\"]\n",
        )
        .unwrap();
        let config = HuskycatConfig::load(&path).unwrap();
        assert_eq!(config.limits.timeout_seconds, 5);
        assert_eq!(config.worker_count(), 2);
        assert!(!config.tool_enabled("mypy"));
        assert!(config.tool_enabled("ruff-check"));
    }

    #[test]
    fn malformed_file_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".huskycat.toml");
        std::fs::write(&path, "[limits\n").unwrap();
        let err = HuskycatConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("malformed config"));
    }

    #[test]
    fn truthiness() {
        for v in ["1", "true", "YES", " on "] {
            assert!(is_truthy(v), "{v}");
        }
        for v in ["0", "false", "", "off"] {
            assert!(!is_truthy(v), "{v}");
        }
    }
}
