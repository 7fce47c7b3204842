//! Endpoint authorization for environment routes.
//!
//! A caller is allowed when the environment exists, is enabled, has its
//! scale endpoint switched on with both API keys set, and the request
//! carries `Authorization: Basic {key}` for one of those keys. Every other
//! case, including an unknown environment, is answered with 403.

use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{debug, error};

use renderhub_core::RenderingEnvironment;

use crate::ApiState;

/// Middleware guarding `/api/environments/{environment}/...`.
pub async fn authorize_environment(
    State(state): State<ApiState>,
    Path((environment, _pool)): Path<(String, String)>,
    request: Request,
    next: Next,
) -> Response {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let env = match state.store.get_environment(&environment) {
        Ok(env) => env,
        Err(e) => {
            error!(%environment, error = %e, "failed to load environment for authorization");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if !is_authorized(env.as_ref(), header) {
        debug!(%environment, "scale endpoint request rejected");
        return StatusCode::FORBIDDEN.into_response();
    }
    next.run(request).await
}

/// Check an `Authorization` header value against an environment's keys.
pub fn is_authorized(env: Option<&RenderingEnvironment>, header: Option<&str>) -> bool {
    let (Some(env), Some(header)) = (env, header) else {
        return false;
    };
    let config = &env.autoscale;
    if !env.enabled || !config.scale_endpoint_enabled {
        return false;
    }
    let (Some(primary), Some(secondary)) = (
        non_blank(config.primary_api_key.as_deref()),
        non_blank(config.secondary_api_key.as_deref()),
    ) else {
        return false;
    };
    let Some(key) = header.strip_prefix("Basic ") else {
        return false;
    };
    key == primary || key == secondary
}

fn non_blank(key: Option<&str>) -> Option<&str> {
    key.filter(|k| !k.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> RenderingEnvironment {
        let mut env: RenderingEnvironment =
            serde_json::from_value(serde_json::json!({"name": "farm-a"})).unwrap();
        env.autoscale.scale_endpoint_enabled = true;
        env.autoscale.primary_api_key = Some("primary".to_string());
        env.autoscale.secondary_api_key = Some("secondary".to_string());
        env
    }

    #[test]
    fn either_key_is_accepted() {
        let env = env();
        assert!(is_authorized(Some(&env), Some("Basic primary")));
        assert!(is_authorized(Some(&env), Some("Basic secondary")));
    }

    #[test]
    fn wrong_or_malformed_header_is_rejected() {
        let env = env();
        assert!(!is_authorized(Some(&env), Some("Basic other")));
        assert!(!is_authorized(Some(&env), Some("Bearer primary")));
        assert!(!is_authorized(Some(&env), Some("primary")));
        assert!(!is_authorized(Some(&env), None));
    }

    #[test]
    fn unknown_environment_is_rejected() {
        assert!(!is_authorized(None, Some("Basic primary")));
    }

    #[test]
    fn disabled_endpoint_or_environment_is_rejected() {
        let mut endpoint_off = env();
        endpoint_off.autoscale.scale_endpoint_enabled = false;
        assert!(!is_authorized(Some(&endpoint_off), Some("Basic primary")));

        let mut env_off = env();
        env_off.enabled = false;
        assert!(!is_authorized(Some(&env_off), Some("Basic primary")));
    }

    #[test]
    fn both_keys_must_be_set() {
        let mut env = env();
        env.autoscale.secondary_api_key = Some("  ".to_string());
        assert!(!is_authorized(Some(&env), Some("Basic primary")));

        env.autoscale.secondary_api_key = None;
        assert!(!is_authorized(Some(&env), Some("Basic primary")));
    }
}
