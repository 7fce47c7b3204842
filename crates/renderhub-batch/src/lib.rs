//! renderhub-batch — compute pool access for RenderHub.
//!
//! The autoscaler and the scale-up processor talk to pools only through
//! the [`ComputePoolClient`] trait. A client is scoped to one environment's
//! batch account and is obtained from a [`ComputePoolClientFactory`];
//! dropping it releases the connection.
//!
//! [`BatchRestClient`] implements the trait against the batch data-plane
//! REST API. Pool metadata is decoded into typed
//! [`PoolAutoScaleSettings`](renderhub_core::PoolAutoScaleSettings) here,
//! at the client boundary.

pub mod client;
pub mod error;
pub mod rest;

pub use client::{ComputePoolClient, ComputePoolClientFactory, MAX_NODES_PER_REMOVAL};
pub use error::{PoolError, PoolResult};
pub use rest::{BatchClientFactory, BatchRestClient};
