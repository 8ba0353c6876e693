//! Configuration for the coordinator.
//!
//! Every field has a default, so an empty file is a valid configuration.
//!
//! ```toml
//! state_root = "/var/lib/conclave"
//! request_timeout_ms = 10000
//!
//! [[patterns]]
//! name = "review"
//! steps = [
//!     { agent = "scanner", task = "scan", output_key = "findings" },
//!     { agent = "reporter", task = "report", input_key = "findings" },
//! ]
//! ```

use crate::pattern::CollaborationPattern;
use conclave_common::{ConclaveError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main coordinator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Root directory for persisted agent state
    #[serde(default = "default_state_root")]
    pub state_root: PathBuf,

    /// How long a communicator waits for a reply
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// How long terminal workflows are kept before the sweep removes them
    #[serde(default = "default_retention")]
    pub workflow_retention_secs: u64,

    /// Interval of the background retention sweep
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Buffer size of the registry and orchestrator event channels
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Collaboration patterns loaded into the orchestrator at startup
    #[serde(default)]
    pub patterns: Vec<CollaborationPattern>,
}

fn default_state_root() -> PathBuf {
    PathBuf::from("./.conclave")
}

fn default_request_timeout() -> u64 {
    30000
}

fn default_retention() -> u64 {
    3600
}

fn default_sweep_interval() -> u64 {
    300
}

fn default_event_capacity() -> usize {
    256
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            state_root: default_state_root(),
            request_timeout_ms: default_request_timeout(),
            workflow_retention_secs: default_retention(),
            sweep_interval_secs: default_sweep_interval(),
            event_capacity: default_event_capacity(),
            patterns: Vec::new(),
        }
    }
}

impl CoordinatorConfig {
    /// Load configuration from a TOML file.
    ///
    /// On Unix the path must be a regular file that is not world-writable.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();

        #[cfg(unix)]
        validate_config_file_permissions(path)?;

        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate().map_err(|e| {
            anyhow::anyhow!("Invalid config file '{}': {}", path.display(), e)
        })?;
        Ok(config)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConclaveError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the coordinator cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.event_capacity == 0 {
            return Err(ConclaveError::Config(
                "event_capacity must be greater than zero".into(),
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConclaveError::Config(
                "sweep_interval_secs must be greater than zero".into(),
            ));
        }

        let mut seen = HashSet::new();
        for pattern in &self.patterns {
            if !seen.insert(pattern.name.as_str()) {
                return Err(ConclaveError::Config(format!(
                    "Duplicate pattern name: {}",
                    pattern.name
                )));
            }
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn workflow_retention(&self) -> Duration {
        Duration::from_secs(self.workflow_retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[cfg(unix)]
fn validate_config_file_permissions(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = std::fs::metadata(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;

    if !metadata.is_file() {
        anyhow::bail!("Config path '{}' is not a regular file", path.display());
    }

    let permission_bits = metadata.permissions().mode() & 0o777;
    if permission_bits & 0o002 != 0 {
        anyhow::bail!(
            "Config file '{}' is world-writable (mode {:04o}). Fix with: chmod o-w {}",
            path.display(),
            permission_bits,
            path.display()
        );
    }

    Ok(())
}
