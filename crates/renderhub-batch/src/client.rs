//! Compute pool client traits.

use async_trait::async_trait;

use renderhub_core::{ComputeNode, ComputePool, RenderingEnvironment, ScaleTargets};

use crate::error::PoolResult;

/// Largest node list accepted by one removal call.
pub const MAX_NODES_PER_REMOVAL: usize = 100;

/// Pool operations within one environment's batch account.
#[async_trait]
pub trait ComputePoolClient: Send + Sync {
    async fn list_pools(&self) -> PoolResult<Vec<ComputePool>>;

    async fn list_nodes(&self, pool_id: &str) -> PoolResult<Vec<ComputeNode>>;

    /// Remove up to [`MAX_NODES_PER_REMOVAL`] nodes from a pool.
    async fn remove_nodes(&self, pool_id: &str, node_ids: &[String]) -> PoolResult<()>;

    /// `Ok(None)` if the pool does not exist.
    async fn get_pool(&self, pool_id: &str) -> PoolResult<Option<ComputePool>>;

    /// Resize a pool to fixed dedicated and low-priority targets.
    async fn update_pool(&self, pool_id: &str, targets: ScaleTargets) -> PoolResult<()>;
}

/// Opens pool clients scoped to an environment.
pub trait ComputePoolClientFactory: Send + Sync {
    fn connect(&self, env: &RenderingEnvironment) -> PoolResult<Box<dyn ComputePoolClient>>;
}
