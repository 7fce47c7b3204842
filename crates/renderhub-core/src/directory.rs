//! Lookup of rendering environments.

use async_trait::async_trait;

use crate::types::RenderingEnvironment;

/// Read access to the set of rendering environments.
///
/// Implemented by the state store; the autoscaling loops only read.
#[async_trait]
pub trait EnvironmentDirectory: Send + Sync {
    /// Names of all known environments.
    async fn list_environment_names(&self) -> anyhow::Result<Vec<String>>;

    /// Fetch one environment. `Ok(None)` if it no longer exists.
    async fn get_environment(&self, name: &str) -> anyhow::Result<Option<RenderingEnvironment>>;
}
