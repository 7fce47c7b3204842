//! Idle node selection.
//!
//! [`plan_evictions`] is a pure function of the pool, its nodes, the
//! environment's activity feed and the clock. It never performs I/O; the
//! host submits the returned node list.
//!
//! # Algorithm
//!
//! ```text
//! pool not Active+Steady                    → Skipped
//! cutoff   = now - timeout
//! recent   = activity rows for this pool with last_active > cutoff
//! eligible = nodes that have started, with last_change < cutoff,
//!            and that appear in `recent`
//! busy     = cpu  rows ≥ idle cpu%  (resource policies, untracked rows)
//!          ∪ gpu  rows ≥ idle gpu%  (resource policies, untracked rows)
//!          ∪ tracked-process rows   (process policies)
//! idle     = eligible \ busy
//! evict    = first (current - min) idle nodes per priority class,
//!            at most `max_removals` in total
//! ```

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};

use renderhub_core::{AllocationState, AutoScalePolicy, ComputeNode, ComputePool, PoolState};
use renderhub_telemetry::ActiveComputeNode;

/// Everything needed to decide which nodes of one pool to remove.
#[derive(Debug, Clone, Copy)]
pub struct EvictionInput<'a> {
    pub pool: &'a ComputePool,
    pub nodes: &'a [ComputeNode],
    /// Activity for the whole environment; rows of other pools are ignored.
    pub activity: &'a [ActiveComputeNode],
    pub max_idle_cpu_percent: u32,
    pub max_idle_gpu_percent: u32,
    pub max_removals: usize,
    pub now: DateTime<Utc>,
}

/// Outcome of one pool evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum EvictionPlan {
    /// The pool is not in a state that allows removing nodes.
    Skipped {
        state: PoolState,
        allocation_state: AllocationState,
    },
    Evict {
        node_ids: Vec<String>,
        summary: EvictionSummary,
    },
}

impl EvictionPlan {
    pub fn node_ids(&self) -> &[String] {
        match self {
            EvictionPlan::Skipped { .. } => &[],
            EvictionPlan::Evict { node_ids, .. } => node_ids,
        }
    }
}

/// Intermediate counts of an evaluation, for logging and inspection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvictionSummary {
    pub policy: AutoScalePolicy,
    pub timeout_minutes: u32,
    pub max_idle_cpu_percent: u32,
    pub max_idle_gpu_percent: u32,
    /// Distinct nodes with recent tracked-process rows.
    pub nodes_with_process_events: usize,
    /// Distinct nodes with recent CPU/GPU rows.
    pub nodes_with_resource_events: usize,
    pub eligible: usize,
    pub active_by_process: BTreeSet<String>,
    pub active_by_cpu: BTreeSet<String>,
    pub active_by_gpu: BTreeSet<String>,
    pub idle: usize,
    pub max_dedicated_to_remove: u32,
    pub max_low_priority_to_remove: u32,
}

/// Decide which nodes of `input.pool` are safe to remove.
pub fn plan_evictions(input: &EvictionInput<'_>) -> EvictionPlan {
    let pool = input.pool;
    if pool.state != PoolState::Active || pool.allocation_state != AllocationState::Steady {
        return EvictionPlan::Skipped {
            state: pool.state,
            allocation_state: pool.allocation_state,
        };
    }

    let settings = &pool.autoscale;
    let policy = settings.policy;
    let max_idle_cpu = f64::from(input.max_idle_cpu_percent.max(1));
    let max_idle_gpu = f64::from(input.max_idle_gpu_percent.max(1));
    let cutoff = input.now - Duration::minutes(i64::from(settings.timeout_minutes));

    let recent: Vec<&ActiveComputeNode> = input
        .activity
        .iter()
        .filter(|row| row.pool_name == pool.id && row.last_active > cutoff)
        .collect();

    let mut summary = EvictionSummary {
        policy,
        timeout_minutes: settings.timeout_minutes,
        max_idle_cpu_percent: input.max_idle_cpu_percent.max(1),
        max_idle_gpu_percent: input.max_idle_gpu_percent.max(1),
        nodes_with_process_events: node_names(&recent, |r| r.tracked_process).len(),
        nodes_with_resource_events: node_names(&recent, |r| !r.tracked_process).len(),
        ..EvictionSummary::default()
    };

    let reporting: BTreeSet<&str> = recent.iter().map(|r| r.node_name.as_str()).collect();
    let eligible: Vec<&ComputeNode> = input
        .nodes
        .iter()
        .filter(|node| is_eligible(node, cutoff))
        .filter(|node| reporting.contains(node.id.as_str()))
        .collect();
    summary.eligible = eligible.len();

    if policy.considers_resources() {
        summary.active_by_cpu = node_names(&recent, |r| {
            !r.tracked_process && r.cpu_percent >= max_idle_cpu
        });
        summary.active_by_gpu = node_names(&recent, |r| {
            !r.tracked_process && r.gpu_percent >= max_idle_gpu
        });
    }
    if policy.considers_processes() {
        summary.active_by_process = node_names(&recent, |r| r.tracked_process);
    }

    let idle: Vec<&ComputeNode> = eligible
        .into_iter()
        .filter(|node| {
            !summary.active_by_process.contains(&node.id)
                && !summary.active_by_cpu.contains(&node.id)
                && !summary.active_by_gpu.contains(&node.id)
        })
        .collect();
    summary.idle = idle.len();

    summary.max_dedicated_to_remove = pool.current_dedicated.saturating_sub(settings.min_dedicated);
    summary.max_low_priority_to_remove = pool
        .current_low_priority
        .saturating_sub(settings.min_low_priority);

    // Nodes of unknown priority belong to neither class and are kept.
    let dedicated = idle
        .iter()
        .filter(|n| n.is_dedicated == Some(true))
        .take(summary.max_dedicated_to_remove as usize);
    let low_priority = idle
        .iter()
        .filter(|n| n.is_dedicated == Some(false))
        .take(summary.max_low_priority_to_remove as usize);

    let node_ids = dedicated
        .chain(low_priority)
        .take(input.max_removals)
        .map(|n| n.id.clone())
        .collect();

    EvictionPlan::Evict { node_ids, summary }
}

/// The node has booted and has not changed state since before `cutoff`.
pub fn is_eligible(node: &ComputeNode, cutoff: DateTime<Utc>) -> bool {
    if !node.state.has_started() {
        return false;
    }
    match node.last_change() {
        Some(changed) => changed < cutoff,
        None => false,
    }
}

fn node_names(
    rows: &[&ActiveComputeNode],
    keep: impl Fn(&ActiveComputeNode) -> bool,
) -> BTreeSet<String> {
    rows.iter()
        .copied()
        .filter(|r| keep(r))
        .map(|r| r.node_name.clone())
        .collect()
}
