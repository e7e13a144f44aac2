//! Game-server lifecycle and console endpoints.
//!
//! - `GET    /api/status`         — status snapshot for pollers
//! - `GET    /api/server`         — exists flag + available RAM
//! - `POST   /api/server/create`  — provision a new server
//! - `POST   /api/server/start`   — launch the server process
//! - `POST   /api/server/stop`    — graceful stop with bounded grace
//! - `DELETE /api/server`         — remove server data
//! - `POST   /api/server/command` — inject a console command
//!
//! ## Error codes
//!
//! | HTTP | Code                | Meaning                                 |
//! |------|---------------------|-----------------------------------------|
//! | 409  | `ALREADY_RUNNING`   | start while a process is live           |
//! | 409  | `NOT_RUNNING`       | stop while offline, command while not online |
//! | 409  | `STILL_RUNNING`     | delete while a process is live          |
//! | 500  | `SPAWN_FAILED`      | child process could not be launched     |
//! | 500  | `CONSOLE_ERROR`     | stdin write failed or timed out         |
//! | 400  | `INVALID_REQUEST`   | empty command, bad create parameters    |
//! | 400  | `RAM_UNAVAILABLE`   | requested RAM exceeds `MemAvailable`    |
//! | 409  | `ALREADY_EXISTS`    | create when the directory exists        |
//! | 404  | `NO_BUILDS`         | unknown game version                    |
//! | 502  | `UPSTREAM_ERROR`    | PaperMC / plugin download failed        |
//! | 502  | `CHECKSUM_MISMATCH` | downloaded jar failed verification      |
//! | 500  | `IO_ERROR`          | filesystem failure                      |

use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::provision::{self, ProvisionError};
use crate::server::supervisor::SupervisorError;
use crate::{status, AppState};

/// Map a supervisor error to its HTTP response.
fn supervisor_error(e: &SupervisorError) -> (StatusCode, Json<Value>) {
    let (status, code) = match e {
        SupervisorError::AlreadyRunning => (StatusCode::CONFLICT, "ALREADY_RUNNING"),
        SupervisorError::NotRunning => (StatusCode::CONFLICT, "NOT_RUNNING"),
        SupervisorError::StillRunning => (StatusCode::CONFLICT, "STILL_RUNNING"),
        SupervisorError::Spawn(_) => (StatusCode::INTERNAL_SERVER_ERROR, "SPAWN_FAILED"),
        SupervisorError::Stdin(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONSOLE_ERROR"),
        SupervisorError::Delete(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
    };
    (status, Json(json!({"error": e.to_string(), "code": code})))
}

/// `GET /api/status` — one aggregated snapshot per poll.
///
/// Reference clients call this every 2 seconds from multiple tabs; the
/// handler only reads already-computed state and never blocks on the
/// child's I/O.
pub async fn get_status(State(state): State<AppState>) -> Json<status::StatusSnapshot> {
    Json(status::poll(&state.supervisor).await)
}

/// `GET /api/server` — provisioning info for the create form.
pub async fn server_info(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "exists": state.provisioner.exists(),
        "available_ram_gb": provision::available_ram_gb(),
    }))
}

/// Request body for `POST /api/server/create`.
#[derive(Deserialize)]
pub struct CreateRequest {
    /// Game version, e.g. `"1.21.5"`.
    pub version: String,
    /// JVM heap allocation in GB.
    pub ram_gb: u64,
}

/// `POST /api/server/create` — provision a new server directory.
pub async fn create(
    State(state): State<AppState>,
    Json(payload): Json<CreateRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let version = payload.version.trim();
    if version.is_empty() || !version.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Enter a valid version like '1.21.5'", "code": "INVALID_REQUEST"})),
        ));
    }
    if payload.ram_gb < 1 {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "RAM must be at least 1 GB", "code": "INVALID_REQUEST"})),
        ));
    }
    if state.provisioner.exists() {
        return Err((
            StatusCode::CONFLICT,
            Json(json!({"error": "Server already exists", "code": "ALREADY_EXISTS"})),
        ));
    }

    // Don't allocate more heap than the host can actually provide.
    let free = provision::available_ram_gb();
    if free > 0 && payload.ram_gb > free {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": format!("Cannot allocate {} GB; only {free} GB is available", payload.ram_gb),
                "code": "RAM_UNAVAILABLE"
            })),
        ));
    }

    state
        .provisioner
        .create(version, payload.ram_gb)
        .await
        .map_err(|e| {
            let (status, code) = match &e {
                ProvisionError::NoBuilds(_) => (StatusCode::NOT_FOUND, "NO_BUILDS"),
                ProvisionError::Upstream(_) => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR"),
                ProvisionError::Checksum { .. } => (StatusCode::BAD_GATEWAY, "CHECKSUM_MISMATCH"),
                ProvisionError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
            };
            (status, Json(json!({"error": e.to_string(), "code": code})))
        })?;

    Ok(Json(json!({"created": true, "version": version, "ram_gb": payload.ram_gb})))
}

/// `POST /api/server/start` — launch the server process.
pub async fn start(
    State(state): State<AppState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let pid = state
        .supervisor
        .start()
        .await
        .map_err(|e| supervisor_error(&e))?;
    Ok(Json(json!({"started": true, "pid": pid})))
}

/// `POST /api/server/stop` — graceful stop, force kill after the grace
/// period.
pub async fn stop(State(state): State<AppState>) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    state
        .supervisor
        .stop()
        .await
        .map_err(|e| supervisor_error(&e))?;
    Ok(Json(json!({"stopped": true})))
}

/// `DELETE /api/server` — remove the server's on-disk data.
///
/// Only valid while offline; returns `{"deleted": true}` on success.
pub async fn delete(
    State(state): State<AppState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    state
        .supervisor
        .delete()
        .await
        .map_err(|e| supervisor_error(&e))?;
    Ok(Json(json!({"deleted": true})))
}

/// Request body for `POST /api/server/command`.
#[derive(Deserialize)]
pub struct CommandRequest {
    pub command: String,
}

/// `POST /api/server/command` — write one console command to the server's
/// stdin. Rejected unless the server is fully online.
pub async fn command(
    State(state): State<AppState>,
    Json(payload): Json<CommandRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let command = payload.command.trim();
    if command.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Command cannot be empty", "code": "INVALID_REQUEST"})),
        ));
    }

    state
        .supervisor
        .send_command(command)
        .await
        .map_err(|e| {
            if matches!(e, SupervisorError::Stdin(_)) {
                warn!("Console write failed: {e}");
            }
            supervisor_error(&e)
        })?;
    Ok(Json(json!({"sent": true})))
}
