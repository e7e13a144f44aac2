//! Game-server lifecycle supervisor.
//!
//! [`ServerSupervisor`] is the single owner of the child-process handle. All
//! state transitions — start, stop, delete, command injection, and the crash
//! watcher — serialize through one `Mutex<Inner>`, so concurrent starts can
//! never produce two live processes and a stop racing the watcher clears the
//! handle exactly once.
//!
//! ## State machine
//!
//! ```text
//! Offline --start--> Booting --ready marker--> Online
//! {Booting, Online} --stop / process exit--> Offline
//! ```
//!
//! The handle is present iff the state is Booting or Online. The stdout
//! reader flips Booting → Online when it sees the readiness marker; the
//! transition happens under the supervisor lock and is generation-guarded,
//! so a reader left over from a previous run can never touch a newer run's
//! state.
//!
//! ## Convergence to Offline
//!
//! Three paths clear the handle: a graceful or forced [`stop`], the exit
//! watcher observing termination (crash, external kill), and the reader
//! tasks simply ending when the pipes close. The first two are idempotent
//! against each other; the readers hold no state at all.
//!
//! [`stop`]: ServerSupervisor::stop

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::config::GameConfig;
use crate::console::buffer::LogBuffer;

use super::process;

/// Upper bound on a single stdin write so a wedged pipe cannot block the
/// supervisor lock (and with it every status poll) indefinitely.
const STDIN_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait for the child to be reaped after SIGKILL.
const KILL_REAP_TIMEOUT: Duration = Duration::from_secs(3);

/// How often the exit watcher polls for child termination.
const EXIT_WATCH_INTERVAL: Duration = Duration::from_millis(500);

/// Lifecycle state of the supervised server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Offline,
    Booting,
    Online,
}

impl ServerState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Booting => "booting",
            Self::Online => "online",
        }
    }
}

/// Errors returned by supervisor operations.
#[derive(Debug, PartialEq, Eq)]
pub enum SupervisorError {
    /// `start` while a process is already live.
    AlreadyRunning,
    /// `stop` while Offline, or `send_command` while not Online.
    NotRunning,
    /// `delete` while a process is live.
    StillRunning,
    /// The child process could not be launched.
    Spawn(String),
    /// Writing to the child's stdin failed or timed out.
    Stdin(String),
    /// Removing the server directory failed.
    Delete(String),
}

impl std::fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyRunning => write!(f, "Server is already running"),
            Self::NotRunning => write!(f, "Server is not running"),
            Self::StillRunning => write!(f, "Server is still running"),
            Self::Spawn(e) => write!(f, "Failed to launch server: {e}"),
            Self::Stdin(e) => write!(f, "Failed to write to server console: {e}"),
            Self::Delete(e) => write!(f, "Failed to delete server directory: {e}"),
        }
    }
}

/// Point-in-time view of the supervisor, safe to serialize.
#[derive(Debug, Clone, Copy)]
pub struct StatusView {
    pub state: ServerState,
    /// OS pid of the live process, if any.
    pub pid: Option<u32>,
    /// Seconds since the live process was started.
    pub uptime_secs: Option<u64>,
    /// Exit code of the most recently ended process.
    pub last_exit_code: Option<i32>,
}

/// The live child process and its console input.
struct RunningServer {
    child: Child,
    stdin: ChildStdin,
    pid: u32,
    started_at: Instant,
    /// Run counter at spawn time; guards reader tasks and stop paths from a
    /// process started after theirs ended.
    generation: u64,
}

/// Mutable supervisor state. The invariant `running.is_some()` iff
/// `state != Offline` holds whenever the mutex is released.
struct Inner {
    state: ServerState,
    running: Option<RunningServer>,
    last_exit_code: Option<i32>,
    generation: u64,
}

/// Owns the game-server process lifecycle and its console log buffer.
///
/// Cloneable handles are not needed — the supervisor itself lives in an
/// `Arc` inside the application state.
pub struct ServerSupervisor {
    game: GameConfig,
    inner: Arc<Mutex<Inner>>,
    logs: Arc<Mutex<LogBuffer>>,
    /// Generation of the run currently allowed to write to the log buffer.
    /// Readers from an older run stop pushing once this moves on, so a
    /// restart's `clear` can never be followed by stale lines.
    live_generation: Arc<AtomicU64>,
}

impl ServerSupervisor {
    pub fn new(game: GameConfig) -> Self {
        let logs = Arc::new(Mutex::new(LogBuffer::new(game.log_buffer_lines)));
        Self {
            game,
            inner: Arc::new(Mutex::new(Inner {
                state: ServerState::Offline,
                running: None,
                last_exit_code: None,
                generation: 0,
            })),
            logs,
            live_generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The configured server directory (also the file-manager sandbox root).
    pub fn server_dir(&self) -> &str {
        &self.game.dir
    }

    /// Launch the server process.
    ///
    /// Fails with [`SupervisorError::AlreadyRunning`] unless Offline. On
    /// success the state is Booting and the returned value is the child pid;
    /// the stdout reader promotes to Online when the readiness marker
    /// appears in the console output.
    pub async fn start(&self) -> Result<u32, SupervisorError> {
        let mut inner = self.inner.lock().await;
        if inner.running.is_some() {
            return Err(SupervisorError::AlreadyRunning);
        }

        let dir = Path::new(&self.game.dir).to_path_buf();
        let ram = process::read_ram_allocation(&dir, self.game.default_ram_gb);

        inner.generation += 1;
        let generation = inner.generation;
        self.live_generation.store(generation, Ordering::Relaxed);

        // Previous run's output (and its tunnel markers) must not leak into
        // the new run's status. The generation bump above fences out any
        // still-draining reader from the old run.
        self.logs.lock().await.clear();

        let mut child = process::spawn_server(&self.game.java_bin, &dir, ram)
            .map_err(|e| SupervisorError::Spawn(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SupervisorError::Spawn("Failed to take stdin pipe".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SupervisorError::Spawn("Failed to take stdout pipe".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SupervisorError::Spawn("Failed to take stderr pipe".to_string()))?;

        let pid = child.id().unwrap_or(0);

        self.spawn_reader(stdout, generation, true);
        self.spawn_reader(stderr, generation, false);

        inner.running = Some(RunningServer {
            child,
            stdin,
            pid,
            started_at: Instant::now(),
            generation,
        });
        inner.state = ServerState::Booting;

        info!("Launched game server (pid {pid}, {ram} GB heap)");
        Ok(pid)
    }

    /// Stop the server process.
    ///
    /// Sends the configured stop command over stdin, waits up to the grace
    /// period for a clean exit, then SIGKILLs. Whichever path is taken, the
    /// handle is cleared and the state is Offline when this returns. Fails
    /// with [`SupervisorError::NotRunning`] if Offline.
    pub async fn stop(&self) -> Result<(), SupervisorError> {
        let generation;
        {
            let mut inner = self.inner.lock().await;
            let Some(rs) = inner.running.as_mut() else {
                return Err(SupervisorError::NotRunning);
            };
            generation = rs.generation;

            let line = format!("{}\n", self.game.stop_command);
            let write = async {
                rs.stdin.write_all(line.as_bytes()).await?;
                rs.stdin.flush().await
            };
            match tokio::time::timeout(STDIN_WRITE_TIMEOUT, write).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!("Graceful stop write failed ({e}); sending SIGTERM");
                    signal_pid(rs.pid, libc::SIGTERM);
                }
                Err(_) => {
                    warn!("Graceful stop write timed out; sending SIGTERM");
                    signal_pid(rs.pid, libc::SIGTERM);
                }
            }
        }

        let grace = Duration::from_secs(self.game.stop_grace_secs);
        if self.wait_for_exit(generation, grace).await {
            return Ok(());
        }

        {
            let mut inner = self.inner.lock().await;
            match inner.running.as_mut() {
                Some(rs) if rs.generation == generation => {
                    warn!("Grace period elapsed, killing game server (pid {})", rs.pid);
                    let _ = rs.child.start_kill();
                }
                // Exited while we waited — the watcher or wait loop cleared it.
                _ => return Ok(()),
            }
        }

        if self.wait_for_exit(generation, KILL_REAP_TIMEOUT).await {
            return Ok(());
        }

        // Unreapable even after SIGKILL. Drop the handle — kill_on_drop
        // re-delivers SIGKILL and tokio reaps in the background.
        let mut inner = self.inner.lock().await;
        if let Some(rs) = inner.running.take() {
            if rs.generation != generation {
                inner.running = Some(rs);
                return Ok(());
            }
            error!(
                "Game server (pid {}) did not exit after SIGKILL; abandoning handle",
                rs.pid
            );
            inner.state = ServerState::Offline;
            inner.last_exit_code = Some(-1);
        }
        Ok(())
    }

    /// Send a console command to the server, followed by one newline.
    ///
    /// Requires Online: commands injected during boot can corrupt startup,
    /// so Booting is rejected the same as Offline.
    pub async fn send_command(&self, command: &str) -> Result<(), SupervisorError> {
        let mut inner = self.inner.lock().await;
        if inner.state != ServerState::Online {
            return Err(SupervisorError::NotRunning);
        }
        let rs = inner.running.as_mut().ok_or(SupervisorError::NotRunning)?;

        let line = format!("{command}\n");
        let write = async {
            rs.stdin.write_all(line.as_bytes()).await?;
            rs.stdin.flush().await
        };
        match tokio::time::timeout(STDIN_WRITE_TIMEOUT, write).await {
            Ok(Ok(())) => {
                info!("Sent command to server: {command}");
                Ok(())
            }
            Ok(Err(e)) => Err(SupervisorError::Stdin(e.to_string())),
            Err(_) => Err(SupervisorError::Stdin("stdin write timed out".to_string())),
        }
    }

    /// Recursively delete the server directory.
    ///
    /// Fails with [`SupervisorError::StillRunning`] while a process is live.
    /// Deleting an absent directory succeeds — the postcondition already
    /// holds. The lock is held across the removal so no start can race a
    /// half-deleted directory.
    pub async fn delete(&self) -> Result<(), SupervisorError> {
        let inner = self.inner.lock().await;
        if inner.running.is_some() {
            return Err(SupervisorError::StillRunning);
        }
        match tokio::fs::remove_dir_all(&self.game.dir).await {
            Ok(()) => {
                info!("Deleted server directory: {}", self.game.dir);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SupervisorError::Delete(e.to_string())),
        }
    }

    /// Non-blocking status snapshot. Only copies already-computed state —
    /// never touches the child's I/O.
    pub async fn status(&self) -> StatusView {
        let inner = self.inner.lock().await;
        StatusView {
            state: inner.state,
            pid: inner.running.as_ref().map(|r| r.pid),
            uptime_secs: inner
                .running
                .as_ref()
                .map(|r| r.started_at.elapsed().as_secs()),
            last_exit_code: inner.last_exit_code,
        }
    }

    /// The buffered console output as one string.
    pub async fn logs_snapshot(&self) -> String {
        self.logs.lock().await.snapshot()
    }

    /// A point-in-time copy of the buffered console lines, oldest first.
    pub async fn log_lines(&self) -> Vec<String> {
        self.logs.lock().await.lines()
    }

    /// Spawn the crash watcher: polls for child termination and converges
    /// the state to Offline even when no stop was issued (crash, external
    /// kill). Runs for the supervisor's lifetime; abort on shutdown.
    pub fn spawn_exit_watcher(&self) -> tokio::task::JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        let logs = Arc::clone(&self.logs);
        let live_generation = Arc::clone(&self.live_generation);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(EXIT_WATCH_INTERVAL);
            loop {
                interval.tick().await;
                let mut guard = inner.lock().await;
                let exited = match guard.running.as_mut() {
                    Some(rs) => match rs.child.try_wait() {
                        Ok(Some(status)) => Some((status.code().unwrap_or(-1), rs.generation)),
                        Ok(None) => None,
                        Err(e) => {
                            warn!("Exit watcher wait error: {e}");
                            Some((-1, rs.generation))
                        }
                    },
                    None => None,
                };
                if let Some((code, generation)) = exited {
                    guard.running = None;
                    guard.state = ServerState::Offline;
                    guard.last_exit_code = Some(code);
                    drop(guard);
                    info!("Game server exited with code {code}");
                    push_exit_notice(&logs, &live_generation, generation, code).await;
                }
            }
        })
    }

    /// Poll for the current generation's process to be gone, clearing the
    /// handle ourselves if we observe the exit before the watcher does.
    /// Returns `true` once the handle is cleared (or belongs to a newer run).
    async fn wait_for_exit(&self, generation: u64, timeout: Duration) -> bool {
        #[derive(Clone, Copy)]
        enum Waited {
            Cleared,
            Exited(i32),
            StillRunning,
        }

        let deadline = Instant::now() + timeout;
        loop {
            let waited = {
                let mut inner = self.inner.lock().await;
                let waited = match inner.running.as_mut() {
                    None => Waited::Cleared,
                    Some(rs) if rs.generation != generation => Waited::Cleared,
                    Some(rs) => match rs.child.try_wait() {
                        Ok(Some(status)) => Waited::Exited(status.code().unwrap_or(-1)),
                        _ => Waited::StillRunning,
                    },
                };
                if let Waited::Exited(code) = waited {
                    inner.running = None;
                    inner.state = ServerState::Offline;
                    inner.last_exit_code = Some(code);
                }
                waited
            };

            match waited {
                Waited::Cleared => return true,
                Waited::Exited(code) => {
                    info!("Game server stopped (exit code {code})");
                    push_exit_notice(&self.logs, &self.live_generation, generation, code).await;
                    return true;
                }
                Waited::StillRunning => {}
            }

            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Spawn a reader task that feeds one output stream into the log buffer
    /// line by line. The stdout reader (`watch_ready`) also performs the
    /// readiness-marker check. The task ends when the pipe closes; nothing
    /// needs to cancel it.
    fn spawn_reader(
        &self,
        stream: impl tokio::io::AsyncRead + Unpin + Send + 'static,
        generation: u64,
        watch_ready: bool,
    ) {
        let inner = Arc::clone(&self.inner);
        let logs = Arc::clone(&self.logs);
        let live_generation = Arc::clone(&self.live_generation);
        let marker = self.game.ready_marker.to_lowercase();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stream).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim_end().to_string();
                if watch_ready && line.to_lowercase().contains(&marker) {
                    let mut inner = inner.lock().await;
                    if inner.generation == generation && inner.state == ServerState::Booting {
                        inner.state = ServerState::Online;
                        info!("Readiness marker observed, server online");
                    }
                }
                let mut logs = logs.lock().await;
                if live_generation.load(Ordering::Relaxed) != generation {
                    // A newer run owns the buffer now; stop draining.
                    break;
                }
                logs.push(line);
            }
        });
    }
}

/// Append the exit notice to the log buffer, unless a newer run has taken
/// the buffer over in the meantime.
async fn push_exit_notice(
    logs: &Mutex<LogBuffer>,
    live_generation: &AtomicU64,
    generation: u64,
    code: i32,
) {
    let mut logs = logs.lock().await;
    if live_generation.load(Ordering::Relaxed) == generation {
        logs.push(format!("Process exited with code {code}"));
    }
}

/// Best-effort signal delivery to a pid. Used only when the graceful stdin
/// path is unavailable.
fn signal_pid(pid: u32, signal: i32) {
    #[allow(clippy::cast_possible_wrap)]
    let pid = pid as i32;
    if pid > 0 {
        unsafe {
            libc::kill(pid, signal);
        }
    }
}
