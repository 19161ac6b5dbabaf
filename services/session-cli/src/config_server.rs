//! Configuration endpoint
//!
//! `GET /v1/config` publishes the identity provider coordinates the session
//! core initializes from. `/health` is a liveness probe.

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use oidc_session::RemoteAuthConfig;
use std::sync::Arc;
use tracing::debug;

use crate::config::Config;

/// Build the router serving `config`.
pub fn build_router(config: RemoteAuthConfig) -> Router {
    Router::new()
        .route(&format!("/{}", oidc_session::CONFIG_PATH), get(config_handler))
        .route("/health", get(health_handler))
        .with_state(Arc::new(config))
}

/// Identity provider coordinates from the loaded configuration. Both values
/// must be set (in the file or through `APP_OIDC_*`) for `serve` to start.
pub fn remote_config(config: &Config) -> anyhow::Result<RemoteAuthConfig> {
    let issuer_url = config
        .oidc
        .authority
        .clone()
        .ok_or_else(|| anyhow::anyhow!("oidc.authority (or APP_OIDC_AUTHORITY) is required"))?;
    let client_id = config
        .oidc
        .client_id
        .clone()
        .ok_or_else(|| anyhow::anyhow!("oidc.client_id (or APP_OIDC_CLIENT_ID) is required"))?;
    Ok(RemoteAuthConfig {
        issuer_url,
        client_id,
    })
}

async fn config_handler(State(config): State<Arc<RemoteAuthConfig>>) -> impl IntoResponse {
    debug!("serving auth configuration");
    Json(config.as_ref().clone())
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "healthy" }))
}
