//! Autoscaling error types.

use thiserror::Error;

use renderhub_batch::PoolError;
use renderhub_state::StateError;

/// Errors raised while evaluating one environment or one scale-up request.
#[derive(Debug, Error)]
pub enum AutoscaleError {
    #[error("environment directory error: {0}")]
    Directory(#[source] anyhow::Error),

    #[error("compute pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("state error: {0}")]
    State(#[from] StateError),
}

impl AutoscaleError {
    /// The targeted pool or account no longer exists.
    pub fn is_not_found(&self) -> bool {
        matches!(self, AutoscaleError::Pool(e) if e.is_not_found())
    }
}

pub type AutoscaleResult<T> = Result<T, AutoscaleError>;
