//! In-memory collaborators for driving the loops in tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;

use renderhub_batch::{ComputePoolClient, ComputePoolClientFactory, PoolError, PoolResult};
use renderhub_core::{
    AllocationState, AutoScalePolicy, BatchAccount, ComputeNode, ComputePool, EnvironmentDirectory,
    NodeState, PoolAutoScaleSettings, PoolState, RenderingEnvironment, ScaleTargets,
};
use renderhub_telemetry::{QueryResponse, TelemetryQueryService, TelemetryResult};

// ── Directory ─────────────────────────────────────────────────────

/// Listed names map to `None` when the record has vanished.
#[derive(Default)]
pub struct FakeDirectory {
    pub environments: Mutex<Vec<(String, Option<RenderingEnvironment>)>>,
    pub fail_list: bool,
}

impl FakeDirectory {
    pub fn with(envs: Vec<RenderingEnvironment>) -> Self {
        Self {
            environments: Mutex::new(envs.into_iter().map(|e| (e.name.clone(), Some(e))).collect()),
            fail_list: false,
        }
    }

    pub fn add_missing(&self, name: &str) {
        self.environments.lock().unwrap().push((name.to_string(), None));
    }
}

#[async_trait]
impl EnvironmentDirectory for FakeDirectory {
    async fn list_environment_names(&self) -> anyhow::Result<Vec<String>> {
        if self.fail_list {
            anyhow::bail!("directory unavailable");
        }
        Ok(self.environments.lock().unwrap().iter().map(|(n, _)| n.clone()).collect())
    }

    async fn get_environment(&self, name: &str) -> anyhow::Result<Option<RenderingEnvironment>> {
        Ok(self
            .environments
            .lock()
            .unwrap()
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, env)| env.clone()))
    }
}

pub fn environment(name: &str) -> RenderingEnvironment {
    let mut env: RenderingEnvironment = serde_json::from_value(json!({ "name": name })).unwrap();
    env.batch_account = Some(BatchAccount {
        name: format!("{name}batch"),
        resource_group: format!("{name}-rg"),
        url: format!("https://{name}batch.westus2.batch.azure.com"),
    });
    env.application_insights = Some(renderhub_core::ApplicationInsightsAccount {
        application_id: format!("{name}-app"),
        api_key: "key".to_string(),
    });
    env
}

// ── Compute pools ─────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeAccount {
    pub pools: HashMap<String, ComputePool>,
    pub nodes: HashMap<String, Vec<ComputeNode>>,
    pub removals: Vec<(String, Vec<String>)>,
    pub resizes: Vec<(String, ScaleTargets)>,
    pub fail_removals: bool,
    pub fail_list_pools: bool,
    /// `update_pool` reports the pool as gone.
    pub resize_not_found: bool,
}

pub type SharedAccount = Arc<Mutex<FakeAccount>>;

pub struct FakePoolClient {
    account: SharedAccount,
}

#[async_trait]
impl ComputePoolClient for FakePoolClient {
    async fn list_pools(&self) -> PoolResult<Vec<ComputePool>> {
        let account = self.account.lock().unwrap();
        if account.fail_list_pools {
            return Err(PoolError::Status {
                status: 500,
                message: "list pools failed".to_string(),
            });
        }
        let mut pools: Vec<ComputePool> = account.pools.values().cloned().collect();
        pools.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(pools)
    }

    async fn list_nodes(&self, pool_id: &str) -> PoolResult<Vec<ComputeNode>> {
        let account = self.account.lock().unwrap();
        Ok(account.nodes.get(pool_id).cloned().unwrap_or_default())
    }

    async fn remove_nodes(&self, pool_id: &str, node_ids: &[String]) -> PoolResult<()> {
        let mut account = self.account.lock().unwrap();
        if account.fail_removals {
            return Err(PoolError::Status {
                status: 409,
                message: "pool busy".to_string(),
            });
        }
        account.removals.push((pool_id.to_string(), node_ids.to_vec()));
        Ok(())
    }

    async fn get_pool(&self, pool_id: &str) -> PoolResult<Option<ComputePool>> {
        Ok(self.account.lock().unwrap().pools.get(pool_id).cloned())
    }

    async fn update_pool(&self, pool_id: &str, targets: ScaleTargets) -> PoolResult<()> {
        let mut account = self.account.lock().unwrap();
        if account.resize_not_found {
            return Err(PoolError::NotFound(pool_id.to_string()));
        }
        account.resizes.push((pool_id.to_string(), targets));
        Ok(())
    }
}

/// Hands out clients over per-environment fake accounts.
#[derive(Default)]
pub struct FakeFactory {
    accounts: Mutex<HashMap<String, SharedAccount>>,
}

impl FakeFactory {
    pub fn account(&self, env: &str) -> SharedAccount {
        self.accounts
            .lock()
            .unwrap()
            .entry(env.to_string())
            .or_default()
            .clone()
    }
}

impl ComputePoolClientFactory for FakeFactory {
    fn connect(&self, env: &RenderingEnvironment) -> PoolResult<Box<dyn ComputePoolClient>> {
        if env.batch_account.is_none() {
            return Err(PoolError::InvalidRequest(format!("{} has no batch account", env.name)));
        }
        Ok(Box::new(FakePoolClient {
            account: self.account(&env.name),
        }))
    }
}

pub fn pool(id: &str, policy: AutoScalePolicy) -> ComputePool {
    ComputePool {
        id: id.to_string(),
        state: PoolState::Active,
        allocation_state: AllocationState::Steady,
        current_dedicated: 0,
        current_low_priority: 0,
        target_dedicated: 0,
        target_low_priority: 0,
        autoscale: PoolAutoScaleSettings {
            policy,
            timeout_minutes: 30,
            min_dedicated: 0,
            min_low_priority: 0,
            ..PoolAutoScaleSettings::default()
        },
    }
}

/// A node that has been idle in its current state for `idle_minutes`.
pub fn node(id: &str, dedicated: bool, idle_minutes: i64) -> ComputeNode {
    let changed = Utc::now() - Duration::minutes(idle_minutes);
    ComputeNode {
        id: id.to_string(),
        state: NodeState::Idle,
        is_dedicated: Some(dedicated),
        last_boot_time: Some(changed),
        state_transition_time: Some(changed),
    }
}

// ── Telemetry ─────────────────────────────────────────────────────

/// Returns the same activity table for every query and counts queries.
#[derive(Default)]
pub struct FakeTelemetry {
    pub rows: Mutex<Vec<serde_json::Value>>,
    pub queries: Mutex<usize>,
}

impl FakeTelemetry {
    pub fn usage(&self, pool: &str, node: &str, cpu: f64) {
        self.push(pool, node, "Cpu usage", "", Utc::now(), cpu);
    }

    pub fn process(&self, pool: &str, node: &str, process: &str) {
        self.push(pool, node, "Process CPU", process, Utc::now(), 0.0);
    }

    fn push(&self, pool: &str, node: &str, metric: &str, process: &str, at: DateTime<Utc>, value: f64) {
        self.rows
            .lock()
            .unwrap()
            .push(json!([pool, node, metric, process, at.to_rfc3339(), value]));
    }

    pub fn query_count(&self) -> usize {
        *self.queries.lock().unwrap()
    }
}

#[async_trait]
impl TelemetryQueryService for FakeTelemetry {
    async fn execute_query(&self, _app_id: &str, _api_key: &str, _query: &str) -> TelemetryResult<QueryResponse> {
        *self.queries.lock().unwrap() += 1;
        let rows = self.rows.lock().unwrap().clone();
        Ok(serde_json::from_value(json!({
            "tables": [{"name": "PrimaryResult", "columns": [], "rows": rows}]
        }))
        .unwrap())
    }
}
