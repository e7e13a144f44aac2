//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables** — `CRAFTCTL_LISTEN`, `CRAFTCTL_SERVER_DIR`,
//!    `CRAFTCTL_PLUGIN_URL`
//! 2. **Config file** — path via `--config <path>`, or `craftctl.toml` in CWD
//! 3. **Compiled defaults** — see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:5000"
//! max_file_size = 2097152  # 2 MB
//!
//! [game]
//! dir = "minecraft_server"
//! java_bin = "java"
//! default_ram_gb = 2
//! ready_marker = "Done ("
//! stop_command = "stop"
//! stop_grace_secs = 30
//! log_buffer_lines = 300
//!
//! [provision]
//! paper_api = "https://api.papermc.io/v2"
//! plugin_url = "https://github.com/playit-cloud/playit-minecraft-plugin/releases/latest/download/playit-minecraft-plugin.jar"
//! download_timeout_secs = 30
//!
//! [logging]
//! level = "info"
//! ```

use serde::Deserialize;
use std::path::Path;

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub game: GameConfig,
    #[serde(default)]
    pub provision: ProvisionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server and resource-limit settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind (default `0.0.0.0:5000`).
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Maximum file size in bytes for `/api/files` read/write (default 2 MB).
    #[serde(default = "default_max_file_size")]
    pub max_file_size: usize,
}

/// Supervised game-server settings.
#[derive(Debug, Clone, Deserialize)]
pub struct GameConfig {
    /// Server working directory, also the file-manager sandbox root
    /// (default `minecraft_server`). Override with `CRAFTCTL_SERVER_DIR`.
    #[serde(default = "default_server_dir")]
    pub dir: String,
    /// Java binary used to launch the server jar (default `java`).
    #[serde(default = "default_java_bin")]
    pub java_bin: String,
    /// RAM allocation in GB when `ram.txt` is missing or invalid (default 2).
    #[serde(default = "default_ram_gb")]
    pub default_ram_gb: u64,
    /// Case-insensitive substring of a console line that marks the server
    /// fully online (default `"Done ("`).
    #[serde(default = "default_ready_marker")]
    pub ready_marker: String,
    /// Console command sent to request a graceful shutdown (default `stop`).
    #[serde(default = "default_stop_command")]
    pub stop_command: String,
    /// Seconds to wait for a graceful exit before SIGKILL (default 30).
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,
    /// Maximum console lines retained in memory (default 300).
    #[serde(default = "default_log_buffer_lines")]
    pub log_buffer_lines: usize,
}

/// PaperMC download settings for server creation.
#[derive(Debug, Clone, Deserialize)]
pub struct ProvisionConfig {
    /// PaperMC v2 API base URL.
    #[serde(default = "default_paper_api")]
    pub paper_api: String,
    /// Playit tunnel plugin download URL. Override with `CRAFTCTL_PLUGIN_URL`.
    #[serde(default = "default_plugin_url")]
    pub plugin_url: String,
    /// Per-request timeout for downloads in seconds (default 30).
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_listen() -> String {
    "0.0.0.0:5000".to_string()
}
fn default_max_file_size() -> usize {
    2 * 1024 * 1024 // 2 MB
}
fn default_server_dir() -> String {
    "minecraft_server".to_string()
}
fn default_java_bin() -> String {
    "java".to_string()
}
fn default_ram_gb() -> u64 {
    2
}
fn default_ready_marker() -> String {
    "Done (".to_string()
}
fn default_stop_command() -> String {
    "stop".to_string()
}
fn default_stop_grace_secs() -> u64 {
    30
}
fn default_log_buffer_lines() -> usize {
    300
}
fn default_paper_api() -> String {
    "https://api.papermc.io/v2".to_string()
}
fn default_plugin_url() -> String {
    "https://github.com/playit-cloud/playit-minecraft-plugin/releases/latest/download/playit-minecraft-plugin.jar"
        .to_string()
}
fn default_download_timeout_secs() -> u64 {
    30
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_file_size: default_max_file_size(),
        }
    }
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            dir: default_server_dir(),
            java_bin: default_java_bin(),
            default_ram_gb: default_ram_gb(),
            ready_marker: default_ready_marker(),
            stop_command: default_stop_command(),
            stop_grace_secs: default_stop_grace_secs(),
            log_buffer_lines: default_log_buffer_lines(),
        }
    }
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            paper_api: default_paper_api(),
            plugin_url: default_plugin_url(),
            download_timeout_secs: default_download_timeout_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, reads that file (panics on failure). Otherwise looks
    /// for `craftctl.toml` in the current directory, falling back to compiled
    /// defaults.
    pub fn load(path: Option<&str>) -> Self {
        let mut config = if let Some(p) = path {
            let content = std::fs::read_to_string(p)
                .unwrap_or_else(|e| panic!("Failed to read config file {p}: {e}"));
            toml::from_str(&content)
                .unwrap_or_else(|e| panic!("Failed to parse config file {p}: {e}"))
        } else if Path::new("craftctl.toml").exists() {
            let content =
                std::fs::read_to_string("craftctl.toml").expect("Failed to read craftctl.toml");
            toml::from_str(&content).expect("Failed to parse craftctl.toml")
        } else {
            Config {
                server: ServerConfig::default(),
                game: GameConfig::default(),
                provision: ProvisionConfig::default(),
                logging: LoggingConfig::default(),
            }
        };

        // Env var overrides
        if let Ok(listen) = std::env::var("CRAFTCTL_LISTEN") {
            config.server.listen = listen;
        }
        if let Ok(dir) = std::env::var("CRAFTCTL_SERVER_DIR") {
            config.game.dir = dir;
        }
        if let Ok(url) = std::env::var("CRAFTCTL_PLUGIN_URL") {
            config.provision.plugin_url = url;
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:5000");
        assert_eq!(config.game.dir, "minecraft_server");
        assert_eq!(config.game.default_ram_gb, 2);
        assert_eq!(config.game.ready_marker, "Done (");
        assert_eq!(config.game.log_buffer_lines, 300);
        assert_eq!(config.game.stop_grace_secs, 30);
    }

    #[test]
    fn test_partial_file_keeps_section_defaults() {
        let config: Config = toml::from_str(
            r#"
            [game]
            dir = "/srv/mc"
            ready_marker = "Server started"
            "#,
        )
        .unwrap();
        assert_eq!(config.game.dir, "/srv/mc");
        assert_eq!(config.game.ready_marker, "Server started");
        assert_eq!(config.game.stop_command, "stop");
        assert_eq!(config.server.max_file_size, 2 * 1024 * 1024);
    }
}
