//! Compute pool client error types.

use thiserror::Error;

/// Errors returned by compute pool operations.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool (or its account) no longer exists.
    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("missing credentials: {0}")]
    Credentials(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("batch api returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("malformed batch api response: {0}")]
    Decode(String),
}

impl PoolError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, PoolError::NotFound(_))
    }
}

pub type PoolResult<T> = Result<T, PoolError>;
