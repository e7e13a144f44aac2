//! Server provisioning — PaperMC download, EULA, tunnel plugin, RAM record.
//!
//! Creating a server means materializing its working directory:
//!
//! 1. resolve the latest PaperMC build for the requested game version via
//!    the v2 API;
//! 2. download the server jar, verify it against the build's published
//!    SHA-256, and install it atomically as `server.jar`;
//! 3. accept the EULA (`eula.txt`);
//! 4. install the playit tunnel plugin into `plugins/`;
//! 5. record the RAM allocation in `ram.txt` (re-read at every start).
//!
//! Nothing here retries: a failed step surfaces a typed error and the
//! caller decides. The jar install is temp-then-rename, so an aborted
//! download never leaves a truncated `server.jar` behind.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::config::ProvisionConfig;

/// Errors returned by provisioning operations.
#[derive(Debug)]
pub enum ProvisionError {
    /// Upstream request failed (network, TLS, non-2xx, bad JSON).
    Upstream(String),
    /// The PaperMC API knows no builds for this version.
    NoBuilds(String),
    /// Downloaded jar does not match the published SHA-256.
    Checksum { expected: String, actual: String },
    /// Filesystem failure while materializing the directory.
    Io(std::io::Error),
}

impl std::fmt::Display for ProvisionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Upstream(e) => write!(f, "Upstream request failed: {e}"),
            Self::NoBuilds(v) => write!(f, "No builds found for version '{v}'"),
            Self::Checksum { expected, actual } => {
                write!(f, "Checksum mismatch: expected {expected}, got {actual}")
            }
            Self::Io(e) => write!(f, "Filesystem error: {e}"),
        }
    }
}

/// `GET /projects/paper/versions/{version}` — the build list.
#[derive(Deserialize)]
struct VersionInfo {
    #[serde(default)]
    builds: Vec<u64>,
}

/// `GET /projects/paper/versions/{version}/builds/{build}` — one build.
#[derive(Deserialize)]
struct BuildInfo {
    downloads: BuildDownloads,
}

#[derive(Deserialize)]
struct BuildDownloads {
    application: BuildDownload,
}

#[derive(Deserialize)]
struct BuildDownload {
    name: String,
    sha256: String,
}

/// Downloads and materializes the server directory.
pub struct Provisioner {
    http: reqwest::Client,
    config: ProvisionConfig,
    server_dir: PathBuf,
}

impl Provisioner {
    pub fn new(config: ProvisionConfig, server_dir: impl Into<PathBuf>) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(std::time::Duration::from_secs(config.download_timeout_secs))
            .build()
            .expect("Failed to build HTTP client");
        Self {
            http,
            config,
            server_dir: server_dir.into(),
        }
    }

    /// Whether the server directory already exists.
    pub fn exists(&self) -> bool {
        self.server_dir.is_dir()
    }

    /// Create the server directory and install everything needed to start.
    pub async fn create(&self, version: &str, ram_gb: u64) -> Result<(), ProvisionError> {
        tokio::fs::create_dir_all(&self.server_dir)
            .await
            .map_err(ProvisionError::Io)?;
        info!("Created/verified server directory: {}", self.server_dir.display());

        let (build, download) = self.latest_build(version).await?;
        let jar_url = format!(
            "{}/projects/paper/versions/{version}/builds/{build}/downloads/{}",
            self.config.paper_api, download.name
        );

        let jar = self.fetch_bytes(&jar_url).await?;
        let actual = hex::encode(Sha256::digest(&jar));
        if !actual.eq_ignore_ascii_case(&download.sha256) {
            return Err(ProvisionError::Checksum {
                expected: download.sha256,
                actual,
            });
        }
        write_atomic(&self.server_dir.join("server.jar"), &jar)
            .await
            .map_err(ProvisionError::Io)?;
        info!("Downloaded PaperMC {version} build {build} ({} bytes)", jar.len());

        tokio::fs::write(self.server_dir.join("eula.txt"), b"eula=true\n")
            .await
            .map_err(ProvisionError::Io)?;
        info!("Wrote eula.txt (accepted)");

        let plugins_dir = self.server_dir.join("plugins");
        tokio::fs::create_dir_all(&plugins_dir)
            .await
            .map_err(ProvisionError::Io)?;
        let plugin = self.fetch_bytes(&self.config.plugin_url).await?;
        write_atomic(&plugins_dir.join("playit-minecraft-plugin.jar"), &plugin)
            .await
            .map_err(ProvisionError::Io)?;
        info!("Downloaded playit plugin ({} bytes)", plugin.len());

        tokio::fs::write(self.server_dir.join("ram.txt"), format!("{ram_gb}\n"))
            .await
            .map_err(ProvisionError::Io)?;
        info!("Recorded RAM allocation ({ram_gb} GB)");

        Ok(())
    }

    /// Resolve the newest build (and its jar metadata) for a game version.
    async fn latest_build(&self, version: &str) -> Result<(u64, BuildDownload), ProvisionError> {
        let url = format!("{}/projects/paper/versions/{version}", self.config.paper_api);
        let info: VersionInfo = self.fetch_json(&url).await?;
        let Some(&build) = info.builds.last() else {
            return Err(ProvisionError::NoBuilds(version.to_string()));
        };

        let url = format!(
            "{}/projects/paper/versions/{version}/builds/{build}",
            self.config.paper_api
        );
        let build_info: BuildInfo = self.fetch_json(&url).await?;
        Ok((build, build_info.downloads.application))
    }

    async fn fetch_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<T, ProvisionError> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ProvisionError::Upstream(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(ProvisionError::Upstream(format!(
                "{url} returned {}",
                resp.status()
            )));
        }
        resp.json::<T>()
            .await
            .map_err(|e| ProvisionError::Upstream(e.to_string()))
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, ProvisionError> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ProvisionError::Upstream(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(ProvisionError::Upstream(format!(
                "{url} returned {}",
                resp.status()
            )));
        }
        Ok(resp
            .bytes()
            .await
            .map_err(|e| ProvisionError::Upstream(e.to_string()))?
            .to_vec())
    }
}

/// Write via a temp file in the same directory, then rename into place.
async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    let temp = parent.join(format!(".craftctl_dl_{}", std::process::id()));
    tokio::fs::write(&temp, bytes).await?;
    match tokio::fs::rename(&temp, path).await {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = tokio::fs::remove_file(&temp).await;
            Err(e)
        }
    }
}

/// Available system memory in whole gigabytes, from `/proc/meminfo`.
///
/// Returns 0 when the file is missing or unparseable (non-Linux dev hosts);
/// callers treat 0 as "unknown" and skip the guard.
pub fn available_ram_gb() -> u64 {
    let meminfo = std::fs::read_to_string("/proc/meminfo").unwrap_or_default();
    parse_mem_available_kb(&meminfo) / (1024 * 1024)
}

/// Parse the `MemAvailable` line (kB) from `/proc/meminfo` content.
fn parse_mem_available_kb(meminfo: &str) -> u64 {
    for line in meminfo.lines() {
        if let Some(rest) = line.strip_prefix("MemAvailable:") {
            return rest
                .split_whitespace()
                .next()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
        }
    }
    0
}

/// Lowercase hex encoding (replacement for the `hex` crate, to avoid extra deps).
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().fold(
            String::with_capacity(bytes.as_ref().len() * 2),
            |mut s, b| {
                use std::fmt::Write;
                let _ = write!(s, "{b:02x}");
                s
            },
        )
    }
}
