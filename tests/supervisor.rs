//! Integration tests for the game-server lifecycle supervisor.
//!
//! A small shell script stands in for the real `java` binary: it prints a
//! readiness line, echoes console input back, and exits on the `stop`
//! command — enough to drive every state transition end to end without a
//! real game server.

use std::os::unix::fs::PermissionsExt;
use std::time::Duration;

use craftctl::config::GameConfig;
use craftctl::server::supervisor::{ServerState, ServerSupervisor, SupervisorError};
use craftctl::status;

/// Well-behaved server: boots, echoes commands, exits cleanly on `stop`.
const ECHO_SERVER: &str = r#"#!/bin/sh
echo "[12:00:00] [Server thread/INFO]: Starting minecraft server"
echo "[12:00:01] [Server thread/INFO]: Done (1.234s)! For help, type \"help\""
while read line; do
  case "$line" in
    stop) echo "Stopping server"; exit 0 ;;
    *) echo "> $line" ;;
  esac
done
"#;

/// Boots slowly: two seconds of "booting" before the readiness line.
const SLOW_BOOT_SERVER: &str = r#"#!/bin/sh
echo "Starting minecraft server"
sleep 2
echo "Done (2.000s)! For help, type \"help\""
while read line; do
  case "$line" in
    stop) exit 0 ;;
    *) echo "> $line" ;;
  esac
done
"#;

/// Prints its lines and exits immediately — simulates a crash.
const CRASHING_SERVER: &str = r#"#!/bin/sh
echo "Starting minecraft server"
echo "Done (0.100s)!"
exit 3
"#;

/// Ignores the stop command entirely; only dies when killed.
const STUBBORN_SERVER: &str = r#"#!/bin/sh
echo "Done (0.100s)!"
while read line; do :; done
"#;

/// Reports a tunnel after boot.
const TUNNELED_SERVER: &str = r#"#!/bin/sh
echo "Done (0.500s)!"
echo "[playit] found minecraft java tunnel: test-host.joinmc.link"
while read line; do :; done
"#;

fn setup(script: &str) -> (tempfile::TempDir, ServerSupervisor) {
    let dir = tempfile::tempdir().unwrap();
    let bin = dir.path().join("fake-server.sh");
    std::fs::write(&bin, script).unwrap();
    let mut perms = std::fs::metadata(&bin).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&bin, perms).unwrap();

    let game = GameConfig {
        dir: dir.path().to_string_lossy().into_owned(),
        java_bin: bin.to_string_lossy().into_owned(),
        default_ram_gb: 2,
        ready_marker: "Done (".to_string(),
        stop_command: "stop".to_string(),
        stop_grace_secs: 2,
        log_buffer_lines: 100,
    };
    (dir, ServerSupervisor::new(game))
}

async fn wait_for_state(sup: &ServerSupervisor, want: ServerState, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let state = sup.status().await.state;
        if state == want {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {want:?}, still {state:?}"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

async fn wait_for_log(sup: &ServerSupervisor, needle: &str, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if sup.logs_snapshot().await.contains(needle) {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for log line containing {needle:?}"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn test_start_boots_to_online() {
    let (_dir, sup) = setup(ECHO_SERVER);

    let pid = sup.start().await.unwrap();
    assert!(pid > 0);

    // Immediately after start the handle exists and the state is not offline.
    let view = sup.status().await;
    assert_ne!(view.state, ServerState::Offline);
    assert!(view.pid.is_some());

    wait_for_state(&sup, ServerState::Online, Duration::from_secs(5)).await;

    sup.stop().await.unwrap();
}

#[tokio::test]
async fn test_double_start_rejected() {
    let (_dir, sup) = setup(ECHO_SERVER);

    let pid = sup.start().await.unwrap();
    assert_eq!(sup.start().await.unwrap_err(), SupervisorError::AlreadyRunning);

    // Exactly one live process, unchanged by the failed second start.
    assert_eq!(sup.status().await.pid, Some(pid));

    sup.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_while_offline_rejected() {
    let (_dir, sup) = setup(ECHO_SERVER);

    assert_eq!(sup.stop().await.unwrap_err(), SupervisorError::NotRunning);
    assert_eq!(sup.status().await.state, ServerState::Offline);
}

#[tokio::test]
async fn test_command_rejected_unless_online() {
    let (_dir, sup) = setup(SLOW_BOOT_SERVER);

    // Offline: rejected.
    assert_eq!(
        sup.send_command("say hi").await.unwrap_err(),
        SupervisorError::NotRunning
    );

    // Booting: still rejected — commands mid-boot can corrupt startup.
    sup.start().await.unwrap();
    assert_eq!(sup.status().await.state, ServerState::Booting);
    assert_eq!(
        sup.send_command("say hi").await.unwrap_err(),
        SupervisorError::NotRunning
    );

    // Online: accepted and delivered with one line terminator.
    wait_for_state(&sup, ServerState::Online, Duration::from_secs(10)).await;
    sup.send_command("say hello world").await.unwrap();
    wait_for_log(&sup, "> say hello world", Duration::from_secs(5)).await;

    sup.stop().await.unwrap();
}

#[tokio::test]
async fn test_graceful_stop() {
    let (_dir, sup) = setup(ECHO_SERVER);

    sup.start().await.unwrap();
    wait_for_state(&sup, ServerState::Online, Duration::from_secs(5)).await;

    sup.stop().await.unwrap();

    let view = sup.status().await;
    assert_eq!(view.state, ServerState::Offline);
    assert!(view.pid.is_none());
    assert_eq!(view.last_exit_code, Some(0));
    wait_for_log(&sup, "Stopping server", Duration::from_secs(5)).await;
}

#[tokio::test]
async fn test_stop_force_kills_after_grace() {
    let (_dir, sup) = setup(STUBBORN_SERVER);

    sup.start().await.unwrap();
    wait_for_state(&sup, ServerState::Online, Duration::from_secs(5)).await;

    // The script ignores `stop`; the 2 s grace elapses and SIGKILL lands.
    let started = tokio::time::Instant::now();
    sup.stop().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));

    let view = sup.status().await;
    assert_eq!(view.state, ServerState::Offline);
    assert!(view.pid.is_none());
}

#[tokio::test]
async fn test_crash_watcher_converges_to_offline() {
    let (_dir, sup) = setup(CRASHING_SERVER);
    let watcher = sup.spawn_exit_watcher();

    sup.start().await.unwrap();

    // No stop call: the watcher alone must observe the exit.
    wait_for_state(&sup, ServerState::Offline, Duration::from_secs(5)).await;

    let view = sup.status().await;
    assert!(view.pid.is_none());
    assert_eq!(view.last_exit_code, Some(3));

    watcher.abort();
}

#[tokio::test]
async fn test_delete_gated_on_offline() {
    let (dir, sup) = setup(ECHO_SERVER);

    sup.start().await.unwrap();
    assert_eq!(sup.delete().await.unwrap_err(), SupervisorError::StillRunning);

    sup.stop().await.unwrap();
    sup.delete().await.unwrap();
    assert!(!dir.path().exists());

    // Deleting again still succeeds — the data is already gone.
    sup.delete().await.unwrap();
}

#[tokio::test]
async fn test_restart_clears_previous_logs() {
    let (_dir, sup) = setup(ECHO_SERVER);

    sup.start().await.unwrap();
    wait_for_state(&sup, ServerState::Online, Duration::from_secs(5)).await;
    sup.stop().await.unwrap();
    wait_for_log(&sup, "Stopping server", Duration::from_secs(5)).await;

    sup.start().await.unwrap();
    wait_for_state(&sup, ServerState::Online, Duration::from_secs(5)).await;
    assert!(!sup.logs_snapshot().await.contains("Stopping server"));

    sup.stop().await.unwrap();
}

#[tokio::test]
async fn test_status_poll_aggregates_tunnel() {
    let (_dir, sup) = setup(TUNNELED_SERVER);

    // Offline: everything degrades cleanly.
    let snap = status::poll(&sup).await;
    assert_eq!(snap.state, "offline");
    assert!(!snap.server_running);
    assert!(!snap.tunnel_up);

    sup.start().await.unwrap();
    wait_for_state(&sup, ServerState::Online, Duration::from_secs(5)).await;
    wait_for_log(&sup, "joinmc.link", Duration::from_secs(5)).await;

    let snap = status::poll(&sup).await;
    assert_eq!(snap.state, "online");
    assert!(snap.server_running);
    assert!(snap.tunnel_up);
    assert_eq!(snap.joinmc_link.as_deref(), Some("test-host.joinmc.link"));
    assert_eq!(snap.claim_link, None);

    sup.stop().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_polls_never_see_torn_state() {
    let (_dir, sup) = setup(ECHO_SERVER);
    let sup = std::sync::Arc::new(sup);

    let mut pollers = Vec::new();
    for _ in 0..8 {
        let sup = std::sync::Arc::clone(&sup);
        pollers.push(tokio::spawn(async move {
            for _ in 0..100 {
                let view = sup.status().await;
                // Handle exists iff state is booting or online.
                match view.state {
                    ServerState::Offline => assert!(view.pid.is_none()),
                    ServerState::Booting | ServerState::Online => assert!(view.pid.is_some()),
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }));
    }

    sup.start().await.unwrap();
    wait_for_state(&sup, ServerState::Online, Duration::from_secs(5)).await;
    sup.stop().await.unwrap();
    sup.start().await.unwrap();
    sup.stop().await.unwrap();

    for p in pollers {
        p.await.unwrap();
    }
}
