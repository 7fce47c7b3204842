//! renderhub-telemetry — compute node activity from the metrics backend.
//!
//! Compute nodes report CPU, GPU and per-process usage as custom metrics
//! to an analytics service. This crate queries that service and turns the
//! tabular result into [`ActiveComputeNode`] records the autoscaler uses
//! to tell busy nodes from idle ones.
//!
//! # Architecture
//!
//! ```text
//! ActiveNodeProvider
//!   ├── active_nodes_query(lookback)      → query text
//!   ├── TelemetryQueryService::execute_query
//!   │     └── AppInsightsClient (REST)    → QueryResponse
//!   └── parse first table by column position → Vec<ActiveComputeNode>
//! ```
//!
//! Telemetry is advisory: any query failure yields an empty activity list,
//! never an error.

pub mod active_nodes;
pub mod error;
pub mod query;

pub use active_nodes::{ActiveComputeNode, ActiveNodeProvider};
pub use error::{TelemetryError, TelemetryResult};
pub use query::{AppInsightsClient, QueryResponse, QueryTable, TelemetryQueryService};
