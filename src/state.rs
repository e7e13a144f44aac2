//! Shared application state passed to every handler via Axum's `State` extractor.

use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::files::FileManager;
use crate::provision::Provisioner;
use crate::server::supervisor::ServerSupervisor;

/// Shared application state for the craftctl service.
#[derive(Clone)]
pub struct AppState {
    /// Immutable configuration loaded at startup.
    pub config: Arc<Config>,
    /// Monotonic instant when the service started (for uptime calculation).
    pub start_time: Instant,
    /// Owns the game-server process lifecycle and console buffer.
    pub supervisor: Arc<ServerSupervisor>,
    /// Sandboxed file operations rooted at the server directory.
    pub files: Arc<FileManager>,
    /// PaperMC download / server creation.
    pub provisioner: Arc<Provisioner>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let supervisor = Arc::new(ServerSupervisor::new(config.game.clone()));
        let files = Arc::new(FileManager::new(
            config.game.dir.clone(),
            config.server.max_file_size,
        ));
        let provisioner = Arc::new(Provisioner::new(
            config.provision.clone(),
            config.game.dir.clone(),
        ));
        Self {
            config: Arc::new(config),
            start_time: Instant::now(),
            supervisor,
            files,
            provisioner,
        }
    }
}
