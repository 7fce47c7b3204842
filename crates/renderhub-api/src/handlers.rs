//! REST API handlers.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::ApiState;

/// Error body for consistent API format.
#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ErrorResponse {
            success: false,
            error: msg.to_string(),
        }),
    )
}

// ── Scale-up requests ──────────────────────────────────────────

/// Scale-up request body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleUpBody {
    /// Signed so that negative values reach validation.
    pub requested_nodes: i64,
}

/// A request waiting to be applied.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PendingScaleRequest {
    pub environment: String,
    pub pool: String,
    pub target_nodes: u32,
}

/// POST /api/environments/{environment}/pools/{pool}
pub async fn scale_up_pool(
    State(state): State<ApiState>,
    Path((environment, pool)): Path<(String, String)>,
    Json(body): Json<ScaleUpBody>,
) -> impl IntoResponse {
    let requested = match u32::try_from(body.requested_nodes) {
        Ok(n) => n,
        Err(_) if body.requested_nodes < 0 => {
            return error_response(
                "requestedNodes must be a non-negative number",
                StatusCode::BAD_REQUEST,
            )
            .into_response();
        }
        Err(_) => {
            return error_response("requestedNodes is too large", StatusCode::BAD_REQUEST)
                .into_response();
        }
    };

    match state.store.add_scale_request(&environment, &pool, requested) {
        Ok(stored) => {
            info!(
                %environment,
                %pool,
                requested,
                pending_target = stored.target_nodes,
                "scale request queued"
            );
            // Start the processor now rather than at its next poll.
            state.wake.signal();
            StatusCode::OK.into_response()
        }
        Err(e) => {
            error!(%environment, %pool, error = %e, "failed to store scale request");
            error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response()
        }
    }
}

/// GET /api/environments/{environment}/pools/{pool}
pub async fn get_scale_request(
    State(state): State<ApiState>,
    Path((environment, pool)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.store.get_scale_request(&environment, &pool) {
        Ok(Some(request)) => Json(PendingScaleRequest {
            environment: request.environment,
            pool: request.pool,
            target_nodes: request.target_nodes,
        })
        .into_response(),
        Ok(None) => error_response("no pending scale request", StatusCode::NOT_FOUND).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

// ── Health ─────────────────────────────────────────────────────

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    "ok"
}
