//! Persisted record types owned by the state store.

use serde::{Deserialize, Serialize};

/// Optimistic-concurrency token of a stored row.
pub type ETag = u64;

/// A pending request to grow a pool to at least `target_nodes` nodes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScaleUpRequest {
    /// Partition: the environment the pool belongs to.
    pub environment: String,
    /// Row: the pool within the environment.
    pub pool: String,
    /// Requested total (dedicated + low-priority) node count.
    pub target_nodes: u32,
    pub etag: ETag,
}

impl ScaleUpRequest {
    /// Composite `(environment, pool)` key of the scale-up request table.
    pub fn table_key(&self) -> (&str, &str) {
        (&self.environment, &self.pool)
    }
}
