//! renderhub.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::RenderingEnvironment;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub autoscale: AutoscaleConfig,
    #[serde(default)]
    pub scale_up: ScaleUpConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    /// Environments seeded into the directory at startup.
    #[serde(default)]
    pub environments: Vec<RenderingEnvironment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8443,
            data_dir: PathBuf::from("/var/lib/renderhub"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoscaleConfig {
    pub interval_secs: u64,
    /// Upper bound on nodes removed from one pool in one cycle.
    pub max_removals_per_cycle: usize,
}

impl Default for AutoscaleConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            max_removals_per_cycle: 100,
        }
    }
}

impl AutoscaleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaleUpConfig {
    pub poll_delay_secs: u64,
    /// Attempts at a conflicting request upsert before giving up.
    pub add_retries: u32,
}

impl Default for ScaleUpConfig {
    fn default() -> Self {
        Self {
            poll_delay_secs: 120,
            add_retries: 5,
        }
    }
}

impl ScaleUpConfig {
    pub fn poll_delay(&self) -> Duration {
        Duration::from_secs(self.poll_delay_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub endpoint: String,
    pub lookback_minutes: u32,
    pub timeout_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.applicationinsights.io".to_string(),
            lookback_minutes: 120,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub api_version: String,
    /// Environment variable holding the bearer token for the batch API.
    pub access_token_env: String,
    pub timeout_secs: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            api_version: "2023-05-01.17.0".to_string(),
            access_token_env: "RENDERHUB_BATCH_TOKEN".to_string(),
            timeout_secs: 30,
        }
    }
}

impl HubConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: HubConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
