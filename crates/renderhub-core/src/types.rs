//! Domain types shared across RenderHub crates.
//!
//! Environments are owned by the provisioning side and are read-only to
//! the autoscaling loops. Pools and nodes mirror what the compute-batch
//! API reports; the per-pool autoscale parameters are decoded once from
//! the pool's metadata into [`PoolAutoScaleSettings`].

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name of a rendering environment (unique).
pub type EnvironmentName = String;

/// Identifier of a compute pool within an environment's batch account.
pub type PoolId = String;

/// Identifier of a compute node within a pool.
pub type NodeId = String;

// ── Environment ───────────────────────────────────────────────────

/// A render farm as seen by the autoscaling subsystem.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RenderingEnvironment {
    pub name: EnvironmentName,
    #[serde(default)]
    pub subscription_id: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Set while the environment is still being provisioned.
    #[serde(default)]
    pub in_progress: bool,
    #[serde(default)]
    pub batch_account: Option<BatchAccount>,
    #[serde(default)]
    pub application_insights: Option<ApplicationInsightsAccount>,
    #[serde(default)]
    pub autoscale: AutoScaleConfiguration,
}

/// The compute-batch account backing an environment's pools.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchAccount {
    pub name: String,
    #[serde(default)]
    pub resource_group: String,
    /// Data-plane endpoint, e.g. `https://acct.region.batch.azure.com`.
    pub url: String,
}

/// Telemetry account the compute nodes report their activity to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApplicationInsightsAccount {
    pub application_id: String,
    pub api_key: String,
}

/// Environment-wide autoscale configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AutoScaleConfiguration {
    #[serde(default)]
    pub policy: AutoScalePolicy,
    /// Max average CPU percent at which a node still counts as idle.
    #[serde(default = "default_idle_percent")]
    pub max_idle_cpu_percent: u32,
    #[serde(default)]
    pub max_idle_gpu_percent: u32,
    /// Processes whose presence marks a node busy.
    #[serde(default)]
    pub specific_processes: Vec<String>,
    /// Exposes the scale-up endpoint for this environment.
    #[serde(default)]
    pub scale_endpoint_enabled: bool,
    #[serde(default)]
    pub primary_api_key: Option<String>,
    #[serde(default)]
    pub secondary_api_key: Option<String>,
}

impl Default for AutoScaleConfiguration {
    fn default() -> Self {
        Self {
            policy: AutoScalePolicy::Disabled,
            max_idle_cpu_percent: default_idle_percent(),
            max_idle_gpu_percent: 0,
            specific_processes: Vec::new(),
            scale_endpoint_enabled: false,
            primary_api_key: None,
            secondary_api_key: None,
        }
    }
}

impl AutoScaleConfiguration {
    /// Idle CPU threshold used for eviction decisions. Never zero.
    pub fn effective_idle_cpu_percent(&self) -> u32 {
        self.max_idle_cpu_percent.max(1)
    }

    /// Idle GPU threshold used for eviction decisions. Never zero.
    pub fn effective_idle_gpu_percent(&self) -> u32 {
        self.max_idle_gpu_percent.max(1)
    }
}

fn default_true() -> bool {
    true
}

fn default_idle_percent() -> u32 {
    5
}

/// Which activity signals count as "busy" when scaling a pool down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AutoScalePolicy {
    #[default]
    Disabled,
    /// CPU and GPU usage.
    Resources,
    /// Presence of a whitelisted process.
    SpecificProcesses,
    ResourcesAndSpecificProcesses,
}

impl AutoScalePolicy {
    pub fn is_enabled(self) -> bool {
        self != AutoScalePolicy::Disabled
    }

    /// CPU/GPU readings mark a node active under this policy.
    pub fn considers_resources(self) -> bool {
        matches!(
            self,
            AutoScalePolicy::Resources | AutoScalePolicy::ResourcesAndSpecificProcesses
        )
    }

    /// Tracked-process readings mark a node active under this policy.
    pub fn considers_processes(self) -> bool {
        matches!(
            self,
            AutoScalePolicy::SpecificProcesses | AutoScalePolicy::ResourcesAndSpecificProcesses
        )
    }

    fn as_str(self) -> &'static str {
        match self {
            AutoScalePolicy::Disabled => "Disabled",
            AutoScalePolicy::Resources => "Resources",
            AutoScalePolicy::SpecificProcesses => "SpecificProcesses",
            AutoScalePolicy::ResourcesAndSpecificProcesses => "ResourcesAndSpecificProcesses",
        }
    }
}

impl fmt::Display for AutoScalePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AutoScalePolicy {
    type Err = String;

    /// Case-insensitive; also accepts the numeric discriminant.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let policy = match s.to_ascii_lowercase().as_str() {
            "disabled" | "0" => AutoScalePolicy::Disabled,
            "resources" | "1" => AutoScalePolicy::Resources,
            "specificprocesses" | "2" => AutoScalePolicy::SpecificProcesses,
            "resourcesandspecificprocesses" | "3" => {
                AutoScalePolicy::ResourcesAndSpecificProcesses
            }
            _ => return Err(format!("unknown autoscale policy: {s}")),
        };
        Ok(policy)
    }
}

// ── Pool autoscale settings ───────────────────────────────────────

/// Metadata keys carrying per-pool autoscale parameters.
pub mod metadata_keys {
    pub const POLICY: &str = "AutoScaleDownPolicy";
    pub const TIMEOUT: &str = "AutoScaleDownTimeout";
    pub const MIN_DEDICATED: &str = "MinimumDedicatedNodes";
    pub const MIN_LOW_PRIORITY: &str = "MinimumLowPriorityNodes";
    pub const MAX_DEDICATED: &str = "MaximumDedicatedNodes";
    pub const MAX_LOW_PRIORITY: &str = "MaximumLowPriorityNodes";
}

const DEFAULT_TIMEOUT_MINUTES: u32 = 30;
const DEFAULT_NODE_LIMIT: u32 = 30;

/// Per-pool autoscale parameters, decoded from pool metadata.
///
/// Missing or unparsable entries fall back to their defaults; a pool
/// without a policy entry has autoscaling disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolAutoScaleSettings {
    pub policy: AutoScalePolicy,
    pub timeout_minutes: u32,
    pub min_dedicated: u32,
    pub min_low_priority: u32,
    pub max_dedicated: u32,
    pub max_low_priority: u32,
}

impl Default for PoolAutoScaleSettings {
    fn default() -> Self {
        Self {
            policy: AutoScalePolicy::Disabled,
            timeout_minutes: DEFAULT_TIMEOUT_MINUTES,
            min_dedicated: DEFAULT_NODE_LIMIT,
            min_low_priority: DEFAULT_NODE_LIMIT,
            max_dedicated: DEFAULT_NODE_LIMIT,
            max_low_priority: DEFAULT_NODE_LIMIT,
        }
    }
}

impl PoolAutoScaleSettings {
    pub fn from_metadata(metadata: &HashMap<String, String>) -> Self {
        let defaults = Self::default();
        Self {
            policy: metadata
                .get(metadata_keys::POLICY)
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.policy),
            timeout_minutes: read_count(metadata, metadata_keys::TIMEOUT, defaults.timeout_minutes),
            min_dedicated: read_count(metadata, metadata_keys::MIN_DEDICATED, defaults.min_dedicated),
            min_low_priority: read_count(
                metadata,
                metadata_keys::MIN_LOW_PRIORITY,
                defaults.min_low_priority,
            ),
            max_dedicated: read_count(metadata, metadata_keys::MAX_DEDICATED, defaults.max_dedicated),
            max_low_priority: read_count(
                metadata,
                metadata_keys::MAX_LOW_PRIORITY,
                defaults.max_low_priority,
            ),
        }
    }

    pub fn to_metadata(&self) -> HashMap<String, String> {
        HashMap::from([
            (metadata_keys::POLICY.to_string(), self.policy.to_string()),
            (metadata_keys::TIMEOUT.to_string(), self.timeout_minutes.to_string()),
            (metadata_keys::MIN_DEDICATED.to_string(), self.min_dedicated.to_string()),
            (metadata_keys::MIN_LOW_PRIORITY.to_string(), self.min_low_priority.to_string()),
            (metadata_keys::MAX_DEDICATED.to_string(), self.max_dedicated.to_string()),
            (metadata_keys::MAX_LOW_PRIORITY.to_string(), self.max_low_priority.to_string()),
        ])
    }
}

fn read_count(metadata: &HashMap<String, String>, key: &str, default: u32) -> u32 {
    match metadata.get(key).map(|v| v.trim().parse::<i64>()) {
        Some(Ok(n)) => n.clamp(0, u32::MAX as i64) as u32,
        _ => default,
    }
}

// ── Pools and nodes ───────────────────────────────────────────────

/// Lifecycle state of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolState {
    Active,
    Deleting,
    Upgrading,
    #[serde(other)]
    Unknown,
}

/// Whether the provider is currently changing the pool's node count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocationState {
    Steady,
    Resizing,
    Stopping,
    #[serde(other)]
    Unknown,
}

/// A compute pool with its node counts and decoded autoscale settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputePool {
    pub id: PoolId,
    pub state: PoolState,
    pub allocation_state: AllocationState,
    pub current_dedicated: u32,
    pub current_low_priority: u32,
    /// Target counts; while resizing these are the in-flight targets.
    pub target_dedicated: u32,
    pub target_low_priority: u32,
    pub autoscale: PoolAutoScaleSettings,
}

impl ComputePool {
    pub fn target_total(&self) -> u32 {
        self.target_dedicated.saturating_add(self.target_low_priority)
    }
}

/// State of a compute node as reported by the batch API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    Idle,
    Rebooting,
    Reimaging,
    Running,
    Unusable,
    Creating,
    Starting,
    WaitingForStartTask,
    StartTaskFailed,
    LeavingPool,
    Offline,
    Preempted,
    #[serde(other)]
    Unknown,
}

impl NodeState {
    /// The node has booted at least once. Provisioning states are excluded.
    pub fn has_started(self) -> bool {
        matches!(
            self,
            NodeState::Idle
                | NodeState::Offline
                | NodeState::Preempted
                | NodeState::Running
                | NodeState::StartTaskFailed
                | NodeState::Unusable
                | NodeState::Unknown
        )
    }
}

/// A compute node within a pool.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputeNode {
    pub id: NodeId,
    pub state: NodeState,
    /// `None` when the API did not report the node's priority.
    pub is_dedicated: Option<bool>,
    pub last_boot_time: Option<DateTime<Utc>>,
    pub state_transition_time: Option<DateTime<Utc>>,
}

impl ComputeNode {
    /// The later of boot time and last state transition, if both are known.
    pub fn last_change(&self) -> Option<DateTime<Utc>> {
        match (self.last_boot_time, self.state_transition_time) {
            (Some(boot), Some(transition)) => Some(boot.max(transition)),
            _ => None,
        }
    }
}

/// Target node counts for a pool resize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleTargets {
    pub dedicated: u32,
    pub low_priority: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn policy_parses_case_insensitively() {
        assert_eq!("resources".parse(), Ok(AutoScalePolicy::Resources));
        assert_eq!(
            "ResourcesAndSpecificProcesses".parse(),
            Ok(AutoScalePolicy::ResourcesAndSpecificProcesses)
        );
        assert_eq!("2".parse(), Ok(AutoScalePolicy::SpecificProcesses));
        assert!("sometimes".parse::<AutoScalePolicy>().is_err());
    }

    #[test]
    fn policy_signal_classes() {
        assert!(AutoScalePolicy::Resources.considers_resources());
        assert!(!AutoScalePolicy::Resources.considers_processes());
        assert!(AutoScalePolicy::SpecificProcesses.considers_processes());
        assert!(!AutoScalePolicy::SpecificProcesses.considers_resources());
        assert!(AutoScalePolicy::ResourcesAndSpecificProcesses.considers_resources());
        assert!(AutoScalePolicy::ResourcesAndSpecificProcesses.considers_processes());
        assert!(!AutoScalePolicy::Disabled.is_enabled());
    }

    #[test]
    fn settings_default_when_metadata_empty() {
        let settings = PoolAutoScaleSettings::from_metadata(&HashMap::new());
        assert_eq!(settings, PoolAutoScaleSettings::default());
        assert_eq!(settings.policy, AutoScalePolicy::Disabled);
        assert_eq!(settings.timeout_minutes, 30);
    }

    #[test]
    fn settings_decode_and_fall_back_per_key() {
        let metadata = HashMap::from([
            (metadata_keys::POLICY.to_string(), "specificprocesses".to_string()),
            (metadata_keys::TIMEOUT.to_string(), "15".to_string()),
            (metadata_keys::MIN_DEDICATED.to_string(), "2".to_string()),
            (metadata_keys::MIN_LOW_PRIORITY.to_string(), "not-a-number".to_string()),
            (metadata_keys::MAX_DEDICATED.to_string(), "-4".to_string()),
        ]);
        let settings = PoolAutoScaleSettings::from_metadata(&metadata);
        assert_eq!(settings.policy, AutoScalePolicy::SpecificProcesses);
        assert_eq!(settings.timeout_minutes, 15);
        assert_eq!(settings.min_dedicated, 2);
        assert_eq!(settings.min_low_priority, 30);
        assert_eq!(settings.max_dedicated, 0);
        assert_eq!(settings.max_low_priority, 30);
    }

    #[test]
    fn settings_survive_metadata_rendering() {
        let settings = PoolAutoScaleSettings {
            policy: AutoScalePolicy::Resources,
            timeout_minutes: 10,
            min_dedicated: 1,
            min_low_priority: 0,
            max_dedicated: 8,
            max_low_priority: 64,
        };
        assert_eq!(PoolAutoScaleSettings::from_metadata(&settings.to_metadata()), settings);
    }

    #[test]
    fn idle_thresholds_never_zero() {
        let config = AutoScaleConfiguration {
            max_idle_cpu_percent: 0,
            max_idle_gpu_percent: 0,
            ..Default::default()
        };
        assert_eq!(config.effective_idle_cpu_percent(), 1);
        assert_eq!(config.effective_idle_gpu_percent(), 1);

        let config = AutoScaleConfiguration {
            max_idle_cpu_percent: 20,
            ..Default::default()
        };
        assert_eq!(config.effective_idle_cpu_percent(), 20);
    }

    #[test]
    fn node_last_change_requires_both_timestamps() {
        let boot = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let transition = Utc.with_ymd_and_hms(2024, 1, 1, 11, 0, 0).unwrap();
        let mut node = ComputeNode {
            id: "tvm-1".to_string(),
            state: NodeState::Idle,
            is_dedicated: Some(true),
            last_boot_time: Some(boot),
            state_transition_time: Some(transition),
        };
        assert_eq!(node.last_change(), Some(transition));

        node.state_transition_time = None;
        assert_eq!(node.last_change(), None);
    }

    #[test]
    fn node_states_that_count_as_started() {
        assert!(NodeState::Idle.has_started());
        assert!(NodeState::StartTaskFailed.has_started());
        assert!(NodeState::Unknown.has_started());
        assert!(!NodeState::Creating.has_started());
        assert!(!NodeState::WaitingForStartTask.has_started());
        assert!(!NodeState::LeavingPool.has_started());
    }

    #[test]
    fn node_state_wire_names() {
        let state: NodeState = serde_json::from_str("\"starttaskfailed\"").unwrap();
        assert_eq!(state, NodeState::StartTaskFailed);
        let state: NodeState = serde_json::from_str("\"somethingnew\"").unwrap();
        assert_eq!(state, NodeState::Unknown);
    }

    #[test]
    fn environment_defaults_from_minimal_json() {
        let env: RenderingEnvironment = serde_json::from_str(r#"{"name":"farm"}"#).unwrap();
        assert!(env.enabled);
        assert!(!env.in_progress);
        assert!(env.batch_account.is_none());
        assert_eq!(env.autoscale.max_idle_cpu_percent, 5);
        assert_eq!(env.autoscale.policy, AutoScalePolicy::Disabled);
    }
}
