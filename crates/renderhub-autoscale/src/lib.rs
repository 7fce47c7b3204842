//! renderhub-autoscale — elastic sizing of render farm compute pools.
//!
//! Two independent background loops share this crate:
//!
//! ```text
//! AutoscaleHost (every 60s)                 ScaleUpProcessor (every 120s or on wake)
//!   ├── EnvironmentDirectory                  ├── StateStore::list_scale_requests
//!   ├── ComputePoolClient::list_pools         ├── EnvironmentDirectory
//!   ├── ActiveNodeProvider (once per env)     ├── ComputePoolClient::get_pool
//!   ├── plan_evictions  (pure)                ├── calculate_targets (pure)
//!   └── ComputePoolClient::remove_nodes       ├── ComputePoolClient::update_pool
//!                                             └── StateStore::delete_scale_request
//! ```
//!
//! The autoscaler only removes nodes and only from `Steady` pools; the
//! processor only grows pools and never interrupts a resize. Neither
//! needs to coordinate with the other.

pub mod error;
pub mod eviction;
pub mod host;
pub mod processor;
pub mod signal;
pub mod targets;

#[cfg(test)]
mod testing;

pub use error::{AutoscaleError, AutoscaleResult};
pub use eviction::{EvictionInput, EvictionPlan, EvictionSummary, plan_evictions};
pub use host::{AutoscaleHost, EnvironmentReport, PoolOutcome, PoolReport, SkipReason};
pub use processor::{RequestStatus, ScaleUpProcessor};
pub use signal::WakeSignal;
pub use targets::{NodeBounds, calculate_targets, targets_for_pool};
