//! Low-level game-server process launch.
//!
//! [`spawn_server`] builds and spawns the `java -jar server.jar` child with
//! piped stdin/stdout/stderr. The child has `kill_on_drop(true)` so an
//! orphaned process is cleaned up if the supervisor drops its handle on any
//! path.

use std::path::Path;
use std::process::Stdio;

use tokio::process::{Child, Command};

/// Launch the game server in `dir` with `ram_gb` gigabytes for the JVM heap.
///
/// The working directory is the server root, so `server.jar` and all world
/// data resolve relative to it. Stdout and stderr are piped separately;
/// callers take ownership of the stdio handles via `child.stdin.take()` etc.
pub fn spawn_server(java_bin: &str, dir: &Path, ram_gb: u64) -> std::io::Result<Child> {
    Command::new(java_bin)
        .arg(format!("-Xmx{ram_gb}G"))
        .arg(format!("-Xms{ram_gb}G"))
        .arg("-jar")
        .arg("server.jar")
        .arg("nogui")
        .current_dir(dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
}

/// Read the RAM allocation from `ram.txt` in the server directory.
///
/// Falls back to `default_gb` when the file is missing, unparseable, or
/// below 1 GB — a malformed allocation must never prevent a start.
pub fn read_ram_allocation(dir: &Path, default_gb: u64) -> u64 {
    match std::fs::read_to_string(dir.join("ram.txt")) {
        Ok(content) => match content.trim().parse::<u64>() {
            Ok(gb) if gb >= 1 => gb,
            _ => {
                tracing::warn!(
                    "Invalid RAM value in ram.txt; defaulting to {default_gb} GB"
                );
                default_gb
            }
        },
        Err(_) => default_gb,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_ram_allocation_valid() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ram.txt"), "8\n").unwrap();
        assert_eq!(read_ram_allocation(dir.path(), 2), 8);
    }

    #[test]
    fn test_read_ram_allocation_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_ram_allocation(dir.path(), 2), 2);
    }

    #[test]
    fn test_read_ram_allocation_garbage() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ram.txt"), "lots\n").unwrap();
        assert_eq!(read_ram_allocation(dir.path(), 2), 2);
    }

    #[test]
    fn test_read_ram_allocation_zero_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ram.txt"), "0").unwrap();
        assert_eq!(read_ram_allocation(dir.path(), 4), 4);
    }
}
