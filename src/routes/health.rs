//! Liveness endpoint.

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::AppState;

/// `GET /api/health` — liveness probe.
///
/// Returns service status, uptime, version, the supervised server's state,
/// and whether its directory exists. Suitable for load-balancer checks.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let uptime = state.start_time.elapsed().as_secs();
    let view = state.supervisor.status().await;

    Json(json!({
        "status": "ok",
        "uptime_secs": uptime,
        "version": env!("CARGO_PKG_VERSION"),
        "server_state": view.state.as_str(),
        "server_exists": state.provisioner.exists(),
    }))
}
