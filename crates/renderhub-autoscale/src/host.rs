//! Autoscale control loop.
//!
//! Every interval, each environment is evaluated concurrently: its
//! autoscale-enabled pools are listed, activity is fetched once, and each
//! pool's idle nodes are removed within its minimums. One environment or
//! pool failing never stops the others.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, error, info, warn};

use renderhub_batch::{ComputePoolClient, ComputePoolClientFactory, MAX_NODES_PER_REMOVAL};
use renderhub_core::{
    AllocationState, ComputePool, EnvironmentDirectory, PoolState, RenderingEnvironment,
};
use renderhub_telemetry::{ActiveComputeNode, ActiveNodeProvider};

use crate::error::{AutoscaleError, AutoscaleResult};
use crate::eviction::{EvictionInput, EvictionPlan, EvictionSummary, plan_evictions};

/// Why an environment was not evaluated this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Listed by the directory but the record could not be found.
    Missing,
    InProgress,
    NoBatchAccount,
    NoAutoscalePools,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::Missing => "environment not found",
            SkipReason::InProgress => "environment is being provisioned",
            SkipReason::NoBatchAccount => "no batch account",
            SkipReason::NoAutoscalePools => "no autoscale-enabled pools",
        };
        f.write_str(s)
    }
}

/// Result of evaluating one environment.
#[derive(Debug, Clone, PartialEq)]
pub enum EnvironmentReport {
    Skipped(SkipReason),
    Evaluated { pools: Vec<PoolReport> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PoolReport {
    pub pool_id: String,
    pub outcome: PoolOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PoolOutcome {
    Skipped {
        state: PoolState,
        allocation_state: AllocationState,
    },
    Evaluated {
        summary: EvictionSummary,
        removed: Vec<String>,
    },
    /// Listing nodes or submitting the removal failed.
    Failed(String),
}

/// Periodically scales idle compute nodes out of autoscale-enabled pools.
pub struct AutoscaleHost {
    directory: Arc<dyn EnvironmentDirectory>,
    pools: Arc<dyn ComputePoolClientFactory>,
    active_nodes: ActiveNodeProvider,
    interval: Duration,
    max_removals: usize,
}

impl AutoscaleHost {
    pub fn new(
        directory: Arc<dyn EnvironmentDirectory>,
        pools: Arc<dyn ComputePoolClientFactory>,
        active_nodes: ActiveNodeProvider,
    ) -> Self {
        Self {
            directory,
            pools,
            active_nodes,
            interval: Duration::from_secs(60),
            max_removals: MAX_NODES_PER_REMOVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Cap on nodes removed from one pool per cycle. Never above the
    /// removal API's batch limit.
    pub fn with_max_removals(mut self, max: usize) -> Self {
        self.max_removals = max.min(MAX_NODES_PER_REMOVAL);
        self
    }

    /// Run cycles until `shutdown` flips. A cycle in progress is finished
    /// before the loop exits.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "autoscaler started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            self.run_cycle().await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => {
                    break;
                }
            }
        }
        info!("autoscaler shutting down");
    }

    /// Evaluate every environment once, concurrently.
    pub async fn run_cycle(&self) -> Vec<(String, AutoscaleResult<EnvironmentReport>)> {
        let names = match self.directory.list_environment_names().await {
            Ok(names) => names,
            Err(e) => {
                error!(error = %e, "failed to list environments");
                return Vec::new();
            }
        };

        let results = join_all(names.into_iter().map(|name| async move {
            let result = self.evaluate_environment(&name).await;
            (name, result)
        }))
        .await;

        for (name, result) in &results {
            match result {
                Ok(EnvironmentReport::Skipped(reason)) => {
                    debug!(environment = %name, %reason, "environment skipped");
                }
                Ok(EnvironmentReport::Evaluated { pools }) => {
                    debug!(environment = %name, pools = pools.len(), "environment evaluated");
                }
                Err(e) => {
                    error!(environment = %name, error = %e, "autoscale failed for environment");
                }
            }
        }
        results
    }

    async fn evaluate_environment(&self, name: &str) -> AutoscaleResult<EnvironmentReport> {
        let env = self
            .directory
            .get_environment(name)
            .await
            .map_err(AutoscaleError::Directory)?;
        let Some(env) = env else {
            return Ok(EnvironmentReport::Skipped(SkipReason::Missing));
        };
        if env.in_progress {
            return Ok(EnvironmentReport::Skipped(SkipReason::InProgress));
        }
        if env.batch_account.is_none() {
            return Ok(EnvironmentReport::Skipped(SkipReason::NoBatchAccount));
        }

        // Released when this evaluation returns, whatever the outcome.
        let client = self.pools.connect(&env)?;

        let pools: Vec<ComputePool> = client
            .list_pools()
            .await?
            .into_iter()
            .filter(|p| p.autoscale.policy.is_enabled())
            .collect();
        if pools.is_empty() {
            // Checked before querying telemetry to spare the query.
            return Ok(EnvironmentReport::Skipped(SkipReason::NoAutoscalePools));
        }

        let activity = self.active_nodes.active_compute_nodes(&env).await;

        let mut reports = Vec::with_capacity(pools.len());
        for pool in &pools {
            let outcome = self.evaluate_pool(&env, client.as_ref(), pool, &activity).await;
            reports.push(PoolReport {
                pool_id: pool.id.clone(),
                outcome,
            });
        }
        Ok(EnvironmentReport::Evaluated { pools: reports })
    }

    async fn evaluate_pool(
        &self,
        env: &RenderingEnvironment,
        client: &dyn ComputePoolClient,
        pool: &ComputePool,
        activity: &[ActiveComputeNode],
    ) -> PoolOutcome {
        if pool.state != PoolState::Active || pool.allocation_state != AllocationState::Steady {
            info!(
                environment = %env.name,
                pool = %pool.id,
                state = ?pool.state,
                allocation_state = ?pool.allocation_state,
                "skipping pool"
            );
            return PoolOutcome::Skipped {
                state: pool.state,
                allocation_state: pool.allocation_state,
            };
        }

        let nodes = match client.list_nodes(&pool.id).await {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!(environment = %env.name, pool = %pool.id, error = %e, "failed to list nodes");
                return PoolOutcome::Failed(e.to_string());
            }
        };

        let plan = plan_evictions(&EvictionInput {
            pool,
            nodes: &nodes,
            activity,
            max_idle_cpu_percent: env.autoscale.effective_idle_cpu_percent(),
            max_idle_gpu_percent: env.autoscale.effective_idle_gpu_percent(),
            max_removals: self.max_removals,
            now: Utc::now(),
        });

        let (node_ids, summary) = match plan {
            EvictionPlan::Skipped {
                state,
                allocation_state,
            } => return PoolOutcome::Skipped { state, allocation_state },
            EvictionPlan::Evict { node_ids, summary } => (node_ids, summary),
        };
        log_summary(env, pool, &summary, node_ids.len());

        if !node_ids.is_empty()
            && let Err(e) = client.remove_nodes(&pool.id, &node_ids).await
        {
            error!(
                environment = %env.name,
                pool = %pool.id,
                count = node_ids.len(),
                error = %e,
                "error removing nodes from pool"
            );
            return PoolOutcome::Failed(e.to_string());
        }

        PoolOutcome::Evaluated {
            summary,
            removed: node_ids,
        }
    }
}

fn log_summary(env: &RenderingEnvironment, pool: &ComputePool, s: &EvictionSummary, removing: usize) {
    info!(
        environment = %env.name,
        pool = %pool.id,
        policy = %s.policy,
        timeout_minutes = s.timeout_minutes,
        current_dedicated = pool.current_dedicated,
        current_low_priority = pool.current_low_priority,
        min_dedicated = pool.autoscale.min_dedicated,
        min_low_priority = pool.autoscale.min_low_priority,
        max_idle_cpu_percent = s.max_idle_cpu_percent,
        max_idle_gpu_percent = s.max_idle_gpu_percent,
        "autoscale evaluation"
    );
    info!(
        environment = %env.name,
        pool = %pool.id,
        nodes_with_process_events = s.nodes_with_process_events,
        nodes_with_cpu_events = s.nodes_with_resource_events,
        eligible = s.eligible,
        active_by_process = s.active_by_process.len(),
        active_by_process_sample = %sample(&s.active_by_process),
        active_by_cpu = s.active_by_cpu.len(),
        active_by_cpu_sample = %sample(&s.active_by_cpu),
        active_by_gpu = s.active_by_gpu.len(),
        active_by_gpu_sample = %sample(&s.active_by_gpu),
        idle = s.idle,
        max_dedicated_to_remove = s.max_dedicated_to_remove,
        max_low_priority_to_remove = s.max_low_priority_to_remove,
        removing,
        "autoscale selection"
    );
}

/// First five names, comma separated.
fn sample<'a>(names: impl IntoIterator<Item = &'a String>) -> String {
    names
        .into_iter()
        .take(5)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use renderhub_core::AutoScalePolicy;

    struct Harness {
        directory: Arc<FakeDirectory>,
        factory: Arc<FakeFactory>,
        telemetry: Arc<FakeTelemetry>,
    }

    impl Harness {
        fn new(envs: Vec<RenderingEnvironment>) -> Self {
            Self {
                directory: Arc::new(FakeDirectory::with(envs)),
                factory: Arc::new(FakeFactory::default()),
                telemetry: Arc::new(FakeTelemetry::default()),
            }
        }

        fn host(&self) -> AutoscaleHost {
            AutoscaleHost::new(
                self.directory.clone(),
                self.factory.clone(),
                ActiveNodeProvider::new(self.telemetry.clone()),
            )
        }

        fn add_pool(&self, env: &str, pool: ComputePool, nodes: Vec<renderhub_core::ComputeNode>) {
            let account = self.factory.account(env);
            let mut account = account.lock().unwrap();
            account.nodes.insert(pool.id.clone(), nodes);
            account.pools.insert(pool.id.clone(), pool);
        }
    }

    fn report<'a>(
        results: &'a [(String, AutoscaleResult<EnvironmentReport>)],
        env: &str,
    ) -> &'a AutoscaleResult<EnvironmentReport> {
        &results.iter().find(|(n, _)| n == env).unwrap().1
    }

    #[tokio::test]
    async fn removes_idle_nodes_and_keeps_busy_ones() {
        let h = Harness::new(vec![environment("farm-a")]);
        let mut p = pool("pool-1", AutoScalePolicy::Resources);
        p.current_dedicated = 3;
        h.add_pool(
            "farm-a",
            p,
            vec![node("n1", true, 60), node("n2", true, 60), node("n3", true, 60)],
        );
        h.telemetry.usage("pool-1", "n1", 0.5);
        h.telemetry.usage("pool-1", "n2", 80.0);
        h.telemetry.usage("pool-1", "n3", 1.0);

        let results = h.host().run_cycle().await;
        assert_eq!(results.len(), 1);

        let removals = h.factory.account("farm-a").lock().unwrap().removals.clone();
        assert_eq!(removals, vec![("pool-1".to_string(), vec!["n1".to_string(), "n3".to_string()])]);
    }

    #[tokio::test]
    async fn skips_in_progress_and_accountless_environments() {
        let mut provisioning = environment("farm-a");
        provisioning.in_progress = true;
        let mut no_account = environment("farm-b");
        no_account.batch_account = None;
        let h = Harness::new(vec![provisioning, no_account]);
        h.directory.add_missing("farm-c");

        let results = h.host().run_cycle().await;
        assert!(matches!(
            report(&results, "farm-a"),
            Ok(EnvironmentReport::Skipped(SkipReason::InProgress))
        ));
        assert!(matches!(
            report(&results, "farm-b"),
            Ok(EnvironmentReport::Skipped(SkipReason::NoBatchAccount))
        ));
        assert!(matches!(
            report(&results, "farm-c"),
            Ok(EnvironmentReport::Skipped(SkipReason::Missing))
        ));
        assert_eq!(h.telemetry.query_count(), 0);
    }

    #[tokio::test]
    async fn disabled_pools_spare_the_telemetry_query() {
        let h = Harness::new(vec![environment("farm-a")]);
        h.add_pool("farm-a", pool("pool-1", AutoScalePolicy::Disabled), vec![node("n1", true, 60)]);
        h.telemetry.usage("pool-1", "n1", 0.0);

        let results = h.host().run_cycle().await;
        assert!(matches!(
            report(&results, "farm-a"),
            Ok(EnvironmentReport::Skipped(SkipReason::NoAutoscalePools))
        ));
        assert_eq!(h.telemetry.query_count(), 0);
        assert!(h.factory.account("farm-a").lock().unwrap().removals.is_empty());
    }

    #[tokio::test]
    async fn telemetry_is_fetched_once_per_environment() {
        let h = Harness::new(vec![environment("farm-a")]);
        for id in ["pool-1", "pool-2", "pool-3"] {
            h.add_pool("farm-a", pool(id, AutoScalePolicy::Resources), vec![]);
        }

        let results = h.host().run_cycle().await;
        let Ok(EnvironmentReport::Evaluated { pools }) = report(&results, "farm-a") else {
            panic!("expected evaluated environment");
        };
        assert_eq!(pools.len(), 3);
        assert_eq!(h.telemetry.query_count(), 1);
    }

    #[tokio::test]
    async fn resizing_pool_is_left_alone() {
        let h = Harness::new(vec![environment("farm-a")]);
        let mut p = pool("pool-1", AutoScalePolicy::Resources);
        p.allocation_state = AllocationState::Resizing;
        p.current_dedicated = 1;
        h.add_pool("farm-a", p, vec![node("n1", true, 60)]);
        h.telemetry.usage("pool-1", "n1", 0.0);

        let results = h.host().run_cycle().await;
        let Ok(EnvironmentReport::Evaluated { pools }) = report(&results, "farm-a") else {
            panic!("expected evaluated environment");
        };
        assert!(matches!(pools[0].outcome, PoolOutcome::Skipped { .. }));
        assert!(h.factory.account("farm-a").lock().unwrap().removals.is_empty());
    }

    #[tokio::test]
    async fn removal_failure_does_not_stop_other_environments() {
        let h = Harness::new(vec![environment("farm-a"), environment("farm-b")]);
        for env in ["farm-a", "farm-b"] {
            let mut p = pool("pool-1", AutoScalePolicy::Resources);
            p.current_low_priority = 1;
            h.add_pool(env, p, vec![node("n1", false, 60)]);
        }
        h.telemetry.usage("pool-1", "n1", 0.0);
        h.factory.account("farm-a").lock().unwrap().fail_removals = true;

        let results = h.host().run_cycle().await;

        let Ok(EnvironmentReport::Evaluated { pools }) = report(&results, "farm-a") else {
            panic!("expected evaluated environment");
        };
        assert!(matches!(pools[0].outcome, PoolOutcome::Failed(_)));
        assert_eq!(h.factory.account("farm-b").lock().unwrap().removals.len(), 1);
    }

    #[tokio::test]
    async fn pool_listing_failure_is_reported_per_environment() {
        let h = Harness::new(vec![environment("farm-a"), environment("farm-b")]);
        h.factory.account("farm-a").lock().unwrap().fail_list_pools = true;
        h.add_pool("farm-b", pool("pool-1", AutoScalePolicy::Resources), vec![]);

        let results = h.host().run_cycle().await;
        assert!(matches!(report(&results, "farm-a"), Err(AutoscaleError::Pool(_))));
        assert!(report(&results, "farm-b").is_ok());
    }

    #[tokio::test]
    async fn directory_failure_yields_empty_cycle() {
        let h = Harness {
            directory: Arc::new(FakeDirectory {
                fail_list: true,
                ..FakeDirectory::default()
            }),
            factory: Arc::new(FakeFactory::default()),
            telemetry: Arc::new(FakeTelemetry::default()),
        };
        assert!(h.host().run_cycle().await.is_empty());
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let h = Harness::new(vec![]);
        let host = h.host().with_interval(Duration::from_secs(3600));
        let (tx, rx) = tokio::sync::watch::channel(false);

        let handle = tokio::spawn(async move { host.run(rx).await });
        tokio::task::yield_now().await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn removal_cap_never_exceeds_api_limit() {
        let h = Harness::new(vec![]);
        assert_eq!(h.host().with_max_removals(500).max_removals, MAX_NODES_PER_REMOVAL);
        assert_eq!(h.host().with_max_removals(10).max_removals, 10);
    }

    #[test]
    fn sample_takes_five_names() {
        let names: Vec<String> = (1..=7).map(|i| format!("n{i}")).collect();
        assert_eq!(sample(&names), "n1,n2,n3,n4,n5");
    }
}
