//! Active compute node feed.
//!
//! One query per environment returns, per pool/node/metric/process and
//! 5-minute bin, the average usage over the lookback window. Each row
//! becomes one [`ActiveComputeNode`]; the autoscaler groups them itself.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use renderhub_core::RenderingEnvironment;

use crate::query::{QueryTable, TelemetryQueryService};

/// Default lookback window for activity queries.
pub const DEFAULT_LOOKBACK_MINUTES: u32 = 120;

const CPU_METRIC: &str = "Cpu usage";
const GPU_METRIC: &str = "Gpu usage";

/// One activity sample for a compute node.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveComputeNode {
    pub pool_name: String,
    pub node_name: String,
    pub last_active: DateTime<Utc>,
    /// The sample came from a whitelisted process metric rather than
    /// whole-node CPU/GPU usage.
    pub tracked_process: bool,
    pub cpu_percent: f64,
    pub gpu_percent: f64,
}

/// Build the activity query for the given lookback window.
pub fn active_nodes_query(lookback_minutes: u32) -> String {
    format!(
        "customMetrics
| where timestamp > ago({lookback_minutes}m)
| where cloud_RoleName != '' and cloud_RoleInstance != ''
| where name == 'Process CPU' or name == '{CPU_METRIC}' or name == '{GPU_METRIC}'
| extend ProcessName = tostring(customDimensions['Process Name'])
| extend PoolName = cloud_RoleName, ComputeNodeName = cloud_RoleInstance
| extend SampleAvg = value / iff(isnull(valueCount), 1, valueCount)
| summarize CpuAvg = avg(SampleAvg) by PoolName, ComputeNodeName, name, ProcessName, bin(timestamp, 5m)
"
    )
}

/// Produces the activity feed for an environment.
#[derive(Clone)]
pub struct ActiveNodeProvider {
    service: Arc<dyn TelemetryQueryService>,
    lookback_minutes: u32,
}

impl ActiveNodeProvider {
    pub fn new(service: Arc<dyn TelemetryQueryService>) -> Self {
        Self {
            service,
            lookback_minutes: DEFAULT_LOOKBACK_MINUTES,
        }
    }

    pub fn with_lookback_minutes(mut self, minutes: u32) -> Self {
        self.lookback_minutes = minutes;
        self
    }

    /// All activity samples for the environment's nodes.
    ///
    /// Returns an empty list when the environment has no telemetry account
    /// or the query fails; no activity observed is never fatal.
    pub async fn active_compute_nodes(&self, env: &RenderingEnvironment) -> Vec<ActiveComputeNode> {
        let Some(account) = &env.application_insights else {
            debug!(environment = %env.name, "no telemetry account, no activity");
            return Vec::new();
        };

        let query = active_nodes_query(self.lookback_minutes);
        let response = match self
            .service
            .execute_query(&account.application_id, &account.api_key, &query)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(environment = %env.name, error = %e, "telemetry query failed");
                return Vec::new();
            }
        };

        match response.primary_table() {
            Some(table) => parse_activity_table(table),
            None => {
                debug!(environment = %env.name, "telemetry query returned no tables");
                Vec::new()
            }
        }
    }
}

/// Parse activity rows by fixed column position:
/// pool, node, metric, process, timestamp, value.
pub fn parse_activity_table(table: &QueryTable) -> Vec<ActiveComputeNode> {
    table
        .rows
        .iter()
        .filter_map(|row| {
            let parsed = parse_activity_row(row);
            if parsed.is_none() {
                warn!(?row, "skipping malformed telemetry row");
            }
            parsed
        })
        .collect()
}

fn parse_activity_row(row: &[Value]) -> Option<ActiveComputeNode> {
    let pool_name = row.first()?.as_str()?.to_string();
    let node_name = row.get(1)?.as_str()?.to_string();
    let metric = row.get(2).and_then(Value::as_str).unwrap_or_default();
    let process = row.get(3).and_then(Value::as_str).unwrap_or_default();
    let last_active = DateTime::parse_from_rfc3339(row.get(4)?.as_str()?)
        .ok()?
        .with_timezone(&Utc);
    let value = row.get(5).and_then(Value::as_f64).unwrap_or(0.0);

    let mut node = ActiveComputeNode {
        pool_name,
        node_name,
        last_active,
        tracked_process: !process.is_empty(),
        cpu_percent: 0.0,
        gpu_percent: 0.0,
    };
    match metric {
        CPU_METRIC => node.cpu_percent = value,
        GPU_METRIC => node.gpu_percent = value,
        _ => {}
    }
    Some(node)
}
