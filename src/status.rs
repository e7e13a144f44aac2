//! Status aggregation for pollers.
//!
//! Browser tabs poll `/api/status` every couple of seconds; [`poll`] must
//! therefore stay cheap and read-only. It composes three snapshots —
//! supervisor state, console log buffer, tunnel scan — each taken under a
//! brief lock, into one immutable [`StatusSnapshot`]. Nothing here mutates
//! supervisor or tunnel state.

use serde::Serialize;

use crate::server::supervisor::ServerSupervisor;
use crate::tunnel;

/// Immutable composite returned per poll. Field order is fixed so the
/// serialized document is stable across polls.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    /// `"offline"`, `"booting"`, or `"online"`.
    pub state: &'static str,
    /// Whether a live process handle exists (state is booting or online).
    pub server_running: bool,
    /// Buffered console output, oldest line first.
    pub logs: String,
    /// Whether the playit tunnel is established.
    pub tunnel_up: bool,
    /// Claim URL when the tunnel is down but claimable.
    pub claim_link: Option<String>,
    /// Bare public domain when the tunnel is up.
    pub joinmc_link: Option<String>,
}

/// Compose one status snapshot from the supervisor's current state.
pub async fn poll(supervisor: &ServerSupervisor) -> StatusSnapshot {
    let view = supervisor.status().await;
    let lines = supervisor.log_lines().await;
    let tunnel = tunnel::scan(&lines);

    StatusSnapshot {
        state: view.state.as_str(),
        server_running: view.pid.is_some(),
        logs: lines.join("\n"),
        tunnel_up: tunnel.up,
        claim_link: tunnel.claim_link,
        joinmc_link: tunnel.public_link,
    }
}
