//! Telemetry error types.

use thiserror::Error;

/// Errors raised while querying the metrics backend.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("query rejected with status {status}: {reason}")]
    Status { status: u16, reason: String },

    #[error("malformed query response: {0}")]
    Decode(String),
}

pub type TelemetryResult<T> = Result<T, TelemetryError>;
