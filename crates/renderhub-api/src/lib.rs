//! renderhub-api — REST API for RenderHub.
//!
//! Lets render managers ask for more compute nodes. Requests are queued in
//! the state store and the scale-up processor is woken to apply them.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/environments/{env}/pools/{pool}` | Request a pool scale-up |
//! | GET | `/api/environments/{env}/pools/{pool}` | Show the pending request |
//! | GET | `/healthz` | Liveness probe |
//!
//! Environment routes require `Authorization: Basic {key}` with one of the
//! environment's endpoint API keys.

pub mod auth;
pub mod handlers;

use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use renderhub_autoscale::WakeSignal;
use renderhub_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    /// Wakes the scale-up processor after a request is queued.
    pub wake: WakeSignal,
}

/// Build the complete API router.
pub fn build_router(store: StateStore, wake: WakeSignal) -> Router {
    let api_state = ApiState { store, wake };

    let environment_routes = Router::new()
        .route(
            "/environments/{environment}/pools/{pool}",
            post(handlers::scale_up_pool).get(handlers::get_scale_request),
        )
        .route_layer(middleware::from_fn_with_state(
            api_state.clone(),
            auth::authorize_environment,
        ))
        .with_state(api_state);

    Router::new()
        .nest("/api", environment_routes)
        .route("/healthz", get(handlers::healthz))
}
