#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # craftctl
//!
//! Operator console for a single Minecraft game server.
//!
//! craftctl exposes an HTTP API that lets a web front-end (or any client)
//! provision, start, stop, and delete one supervised game-server process,
//! stream its console output, inject commands, read the playit tunnel
//! status, and manage files inside the server directory — and nothing
//! outside it.
//!
//! ## API surface
//!
//! | Method | Path                  | Description                         |
//! |--------|-----------------------|-------------------------------------|
//! | GET    | `/api/health`         | Liveness probe                      |
//! | GET    | `/api/status`         | State + logs + tunnel snapshot      |
//! | GET    | `/api/server`         | Exists flag + available RAM         |
//! | POST   | `/api/server/create`  | Provision a new server              |
//! | POST   | `/api/server/start`   | Launch the server process           |
//! | POST   | `/api/server/stop`    | Graceful stop (bounded grace)       |
//! | DELETE | `/api/server`         | Delete server data                  |
//! | POST   | `/api/server/command` | Inject a console command            |
//! | GET    | `/api/files`          | Read file or list directory         |
//! | PUT    | `/api/files`          | Write file (atomic)                 |
//! | DELETE | `/api/files`          | Delete file or empty directory      |
//!
//! ## Architecture
//!
//! ```text
//! main.rs          — entry point, clap subcommands, router setup, graceful shutdown
//! config.rs        — TOML + env-var configuration
//! state.rs         — shared AppState
//! console/
//!   buffer.rs      — LogBuffer ring buffer (bounded console capture)
//! server/
//!   process.rs     — spawn_server(), ram.txt parsing
//!   supervisor.rs  — lifecycle state machine, readers, crash watcher
//! tunnel.rs        — playit marker extraction from console lines
//! status.rs        — StatusSnapshot aggregation for pollers
//! files.rs         — sandbox-rooted file manager
//! provision.rs     — PaperMC download, EULA, plugin install
//! routes/
//!   health.rs      — GET /api/health
//!   server.rs      — lifecycle + console + status endpoints
//!   files.rs       — file manager endpoints
//! ```

use axum::{
    routing::{get, post},
    Router,
};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use craftctl::{AppState, Config};
use craftctl::routes;

/// Operator console for a single Minecraft game server.
#[derive(Parser)]
#[command(name = "craftctl", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server (default when no subcommand given).
    Serve {
        /// Path to TOML config file.
        #[arg(long)]
        config: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Serve { config }) => run_server(config.as_deref()).await,
        None => run_server(None).await,
    }
}

async fn run_server(config_path: Option<&str>) {
    let config = Config::load(config_path);

    // Initialize tracing
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    info!("craftctl v{} starting", env!("CARGO_PKG_VERSION"));
    info!("Server directory: {}", config.game.dir);
    info!("Listening on {}", config.server.listen);

    let state = AppState::new(config);

    // Crash watcher: converges supervisor state to Offline when the child
    // terminates without an explicit stop.
    let watcher_task = state.supervisor.spawn_exit_watcher();

    let app = Router::new()
        .route("/api/health", get(routes::health::health))
        .route("/api/status", get(routes::server::get_status))
        .route(
            "/api/server",
            get(routes::server::server_info).delete(routes::server::delete),
        )
        .route("/api/server/create", post(routes::server::create))
        .route("/api/server/start", post(routes::server::start))
        .route("/api/server/stop", post(routes::server::stop))
        .route("/api/server/command", post(routes::server::command))
        .route(
            "/api/files",
            get(routes::files::get_file)
                .put(routes::files::put_file)
                .delete(routes::files::delete_file),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let listener = TcpListener::bind(&state.config.server.listen)
        .await
        .expect("Failed to bind");

    info!("Server ready");

    // Graceful shutdown on SIGINT/SIGTERM
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("Failed to register SIGTERM");
            tokio::select! {
                _ = ctrl_c => info!("Received SIGINT"),
                _ = sigterm.recv() => info!("Received SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            info!("Received SIGINT");
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .expect("Server error");

    // Cleanup: stop the game server before exiting so world data is saved.
    info!("Shutting down...");
    watcher_task.abort();
    match state.supervisor.stop().await {
        Ok(()) => info!("Game server stopped"),
        Err(craftctl::SupervisorError::NotRunning) => {}
        Err(e) => warn!("Failed to stop game server during shutdown: {e}"),
    }
    info!("Goodbye");
}
