//! Sandboxed file manager rooted at the server directory.
//!
//! All paths arriving from clients are relative; [`FileManager`] resolves
//! them against the sandbox root and refuses anything that would land
//! outside it. String inspection alone is not enough — a symlink inside the
//! root can point anywhere — so resolution canonicalizes against the real
//! filesystem and re-checks descent from the canonical root:
//!
//! 1. reject NUL bytes, absolute paths, and any `..` component outright;
//! 2. canonicalize the deepest existing ancestor of the joined path;
//! 3. the canonical ancestor must still be a descendant of the canonical
//!    root, else the operation fails with [`FileError::PathEscape`].
//!
//! Symlinks whose real target stays inside the root keep working; a link
//! that leaves the root is treated the same as `..` traversal. `delete`
//! never follows the final symlink — it removes the link itself.
//!
//! ## Atomicity
//!
//! Writes go to a temp file in the destination directory and are renamed
//! into place, so concurrent readers never observe a partially-written
//! file. There is no cross-request locking beyond that: concurrent writes
//! to the same path are last-writer-wins.

use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Monotonic counter to uniquify temp file names across concurrent writes.
static WRITE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Errors returned by file-manager operations.
#[derive(Debug)]
pub enum FileError {
    /// The path would resolve outside the sandbox root. Treated as a
    /// potential attack by callers, never retried.
    PathEscape,
    /// The path does not exist (or, for `list`, is not a directory).
    NotFound,
    /// A file operation was attempted on a directory.
    IsDirectory,
    /// `delete` on a directory that still has entries.
    DirectoryNotEmpty,
    /// Content exceeds the configured size cap.
    TooLarge { size: u64, max: usize },
    /// Other I/O failure.
    Io(std::io::Error),
}

impl std::fmt::Display for FileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PathEscape => write!(f, "Path escapes the server directory"),
            Self::NotFound => write!(f, "File not found"),
            Self::IsDirectory => write!(f, "Path is a directory"),
            Self::DirectoryNotEmpty => write!(f, "Directory not empty"),
            Self::TooLarge { size, max } => {
                write!(f, "Content too large ({size} bytes, max {max})")
            }
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

/// A single entry in a directory listing.
#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    /// Basename only, no path.
    pub name: String,
    /// Sandbox-relative path, `/`-separated.
    pub rel_path: String,
    pub is_dir: bool,
}

/// Sandbox-rooted file operations for the server directory.
pub struct FileManager {
    root: PathBuf,
    max_file_size: usize,
}

impl FileManager {
    /// Create a manager rooted at `root`. The root is canonicalized lazily
    /// per operation — it may not exist yet (server not provisioned) and
    /// can be deleted and recreated while the service runs.
    pub fn new(root: impl Into<PathBuf>, max_file_size: usize) -> Self {
        Self {
            root: root.into(),
            max_file_size,
        }
    }

    /// Resolve a client-supplied relative path to an absolute path that is
    /// provably inside the sandbox root.
    pub async fn resolve(&self, rel: &str) -> Result<PathBuf, FileError> {
        let rel = normalize(rel)?;
        let root = self.canonical_root().await?;
        resolve_in(&root, &rel).await
    }

    /// List a directory, sorted directories-first then by name.
    ///
    /// Fails with [`FileError::NotFound`] when the resolved path does not
    /// exist or is not a directory.
    pub async fn list(&self, rel: &str) -> Result<Vec<FileEntry>, FileError> {
        let rel_norm = normalize(rel)?;
        let resolved = self.resolve(rel).await?;

        let meta = tokio::fs::metadata(&resolved).await.map_err(io_not_found)?;
        if !meta.is_dir() {
            return Err(FileError::NotFound);
        }

        let mut read_dir = tokio::fs::read_dir(&resolved).await.map_err(io_not_found)?;
        let mut entries = Vec::new();
        while let Ok(Some(entry)) = read_dir.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            // file_type() uses lstat, so a symlink is reported as the link
            // itself, not its target.
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            let rel_path = join_rel(&rel_norm, &name);
            entries.push(FileEntry {
                name,
                rel_path,
                is_dir,
            });
        }

        entries.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));
        Ok(entries)
    }

    /// Read a file's contents.
    pub async fn read(&self, rel: &str) -> Result<Vec<u8>, FileError> {
        let resolved = self.resolve(rel).await?;

        let meta = tokio::fs::metadata(&resolved).await.map_err(io_not_found)?;
        if meta.is_dir() {
            return Err(FileError::IsDirectory);
        }
        if meta.len() > self.max_file_size as u64 {
            return Err(FileError::TooLarge {
                size: meta.len(),
                max: self.max_file_size,
            });
        }

        tokio::fs::read(&resolved).await.map_err(io_not_found)
    }

    /// Write a file atomically, creating intermediate directories as needed.
    ///
    /// The content is written to a temp file in the destination directory
    /// and renamed over the target.
    pub async fn write(&self, rel: &str, bytes: &[u8]) -> Result<(), FileError> {
        if bytes.len() > self.max_file_size {
            return Err(FileError::TooLarge {
                size: bytes.len() as u64,
                max: self.max_file_size,
            });
        }

        let resolved = self.resolve(rel).await?;
        if resolved == self.canonical_root().await? {
            return Err(FileError::IsDirectory);
        }
        if let Ok(meta) = tokio::fs::metadata(&resolved).await {
            if meta.is_dir() {
                return Err(FileError::IsDirectory);
            }
        }

        let parent = resolved.parent().ok_or(FileError::PathEscape)?;
        tokio::fs::create_dir_all(parent).await.map_err(FileError::Io)?;

        let seq = WRITE_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_path = parent.join(format!(".craftctl_tmp_{}_{}", std::process::id(), seq));

        if let Err(e) = tokio::fs::write(&temp_path, bytes).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(FileError::Io(e));
        }
        if let Err(e) = tokio::fs::rename(&temp_path, &resolved).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(FileError::Io(e));
        }
        Ok(())
    }

    /// Delete a file, a symlink (the link itself, never its target), or an
    /// **empty** directory.
    ///
    /// Non-empty directories fail with [`FileError::DirectoryNotEmpty`] —
    /// bulk deletion through the file manager is deliberately impossible.
    /// The sandbox root itself is not deletable here.
    pub async fn delete(&self, rel: &str) -> Result<(), FileError> {
        let rel_norm = normalize(rel)?;
        let Some(name) = rel_norm.file_name().map(std::ffi::OsStr::to_os_string) else {
            // Empty path: the root itself.
            return Err(FileError::PathEscape);
        };

        let root = self.canonical_root().await?;
        let parent_rel = rel_norm.parent().unwrap_or(Path::new(""));
        let parent = resolve_in(&root, parent_rel).await?;
        let target = parent.join(&name);

        let meta = tokio::fs::symlink_metadata(&target)
            .await
            .map_err(io_not_found)?;

        if meta.is_dir() {
            let mut read_dir = tokio::fs::read_dir(&target).await.map_err(io_not_found)?;
            if read_dir.next_entry().await.map_err(FileError::Io)?.is_some() {
                return Err(FileError::DirectoryNotEmpty);
            }
            tokio::fs::remove_dir(&target).await.map_err(FileError::Io)
        } else {
            tokio::fs::remove_file(&target).await.map_err(FileError::Io)
        }
    }

    async fn canonical_root(&self) -> Result<PathBuf, FileError> {
        tokio::fs::canonicalize(&self.root).await.map_err(io_not_found)
    }
}

/// Map NotFound to the typed variant, everything else to `Io`.
fn io_not_found(e: std::io::Error) -> FileError {
    if e.kind() == std::io::ErrorKind::NotFound {
        FileError::NotFound
    } else {
        FileError::Io(e)
    }
}

/// Normalize a client-supplied path: `\` becomes `/`, leading slashes and
/// NULs and `..` are rejected, `.` components are dropped.
fn normalize(rel: &str) -> Result<PathBuf, FileError> {
    if rel.contains('\0') {
        return Err(FileError::PathEscape);
    }
    let cleaned = rel.replace('\\', "/");
    let path = Path::new(&cleaned);
    if path.is_absolute() {
        return Err(FileError::PathEscape);
    }

    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(c) => out.push(c),
            Component::CurDir => {}
            // ParentDir, RootDir, Prefix
            _ => return Err(FileError::PathEscape),
        }
    }
    Ok(out)
}

/// Join `root` and a normalized relative path, canonicalize the deepest
/// existing ancestor, and verify it is still inside `root`.
///
/// `root` must already be canonical. The returned path is the canonical
/// ancestor plus any not-yet-existing suffix (relevant for writes).
async fn resolve_in(root: &Path, rel: &Path) -> Result<PathBuf, FileError> {
    let candidate = root.join(rel);

    let mut existing = candidate;
    let mut remainder: Vec<std::ffi::OsString> = Vec::new();
    loop {
        match tokio::fs::canonicalize(&existing).await {
            Ok(canon) => {
                if !canon.starts_with(root) {
                    return Err(FileError::PathEscape);
                }
                let mut resolved = canon;
                for part in remainder.iter().rev() {
                    resolved.push(part);
                }
                return Ok(resolved);
            }
            // Ancestor missing (or a file where a directory was expected):
            // strip one component and retry. Terminates at `root`, which is
            // canonical and exists.
            Err(_) if existing != *root => match (existing.parent(), existing.file_name()) {
                (Some(parent), Some(name)) => {
                    remainder.push(name.to_os_string());
                    existing = parent.to_path_buf();
                }
                _ => return Err(FileError::PathEscape),
            },
            Err(e) => return Err(io_not_found(e)),
        }
    }
}

/// Join a normalized relative dir and an entry name into a `/`-separated
/// relative path for client display.
fn join_rel(dir: &Path, name: &str) -> String {
    let dir = dir.to_string_lossy();
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(root: &Path) -> FileManager {
        FileManager::new(root, 1024 * 1024)
    }

    async fn setup() -> (tempfile::TempDir, FileManager) {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir(dir.path().join("subdir")).await.unwrap();
        tokio::fs::write(dir.path().join("subdir/file.txt"), b"hello")
            .await
            .unwrap();
        let mgr = manager(dir.path());
        (dir, mgr)
    }

    #[tokio::test]
    async fn test_resolve_traversal_rejected() {
        let (_dir, mgr) = setup().await;
        for attempt in ["../../etc/passwd", "/etc/passwd", "subdir/../../outside"] {
            assert!(
                matches!(mgr.resolve(attempt).await, Err(FileError::PathEscape)),
                "{attempt} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_resolve_nul_rejected() {
        let (_dir, mgr) = setup().await;
        assert!(matches!(
            mgr.resolve("sub\0dir").await,
            Err(FileError::PathEscape)
        ));
    }

    #[tokio::test]
    async fn test_resolve_valid_path_is_descendant() {
        let (dir, mgr) = setup().await;
        let resolved = mgr.resolve("subdir/file.txt").await.unwrap();
        let root = tokio::fs::canonicalize(dir.path()).await.unwrap();
        assert!(resolved.starts_with(&root));
    }

    #[tokio::test]
    async fn test_resolve_symlink_escape_rejected() {
        let (dir, mgr) = setup().await;
        let outside = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("sneaky")).unwrap();

        assert!(matches!(
            mgr.resolve("sneaky").await,
            Err(FileError::PathEscape)
        ));
        assert!(matches!(
            mgr.resolve("sneaky/anything.txt").await,
            Err(FileError::PathEscape)
        ));
    }

    #[tokio::test]
    async fn test_resolve_symlink_inside_sandbox_ok() {
        let (dir, mgr) = setup().await;
        std::os::unix::fs::symlink(
            dir.path().join("subdir/file.txt"),
            dir.path().join("alias.txt"),
        )
        .unwrap();

        let content = mgr.read("alias.txt").await.unwrap();
        assert_eq!(content, b"hello");
    }

    #[tokio::test]
    async fn test_list_sorted_dirs_first() {
        let (dir, mgr) = setup().await;
        tokio::fs::write(dir.path().join("a.txt"), b"").await.unwrap();
        tokio::fs::create_dir(dir.path().join("zdir")).await.unwrap();

        let entries = mgr.list("").await.unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["subdir", "zdir", "a.txt"]);
        assert!(entries[0].is_dir && entries[1].is_dir && !entries[2].is_dir);
    }

    #[tokio::test]
    async fn test_list_rel_paths() {
        let (_dir, mgr) = setup().await;
        let entries = mgr.list("subdir").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].rel_path, "subdir/file.txt");
    }

    #[tokio::test]
    async fn test_list_on_file_is_not_found() {
        let (_dir, mgr) = setup().await;
        assert!(matches!(
            mgr.list("subdir/file.txt").await,
            Err(FileError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_read_missing_and_dir() {
        let (_dir, mgr) = setup().await;
        assert!(matches!(mgr.read("nope.txt").await, Err(FileError::NotFound)));
        assert!(matches!(mgr.read("subdir").await, Err(FileError::IsDirectory)));
    }

    #[tokio::test]
    async fn test_write_creates_parents_and_reads_back() {
        let (_dir, mgr) = setup().await;
        mgr.write("plugins/config/settings.yml", b"a: 1")
            .await
            .unwrap();
        assert_eq!(mgr.read("plugins/config/settings.yml").await.unwrap(), b"a: 1");
    }

    #[tokio::test]
    async fn test_write_overwrites() {
        let (_dir, mgr) = setup().await;
        mgr.write("subdir/file.txt", b"new content").await.unwrap();
        assert_eq!(mgr.read("subdir/file.txt").await.unwrap(), b"new content");
    }

    #[tokio::test]
    async fn test_write_onto_directory_rejected() {
        let (_dir, mgr) = setup().await;
        assert!(matches!(
            mgr.write("subdir", b"x").await,
            Err(FileError::IsDirectory)
        ));
    }

    #[tokio::test]
    async fn test_write_too_large() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = FileManager::new(dir.path(), 4);
        assert!(matches!(
            mgr.write("big.bin", b"12345").await,
            Err(FileError::TooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_write_leaves_no_temp_files() {
        let (dir, mgr) = setup().await;
        mgr.write("out.txt", b"data").await.unwrap();
        let entries = mgr.list("").await.unwrap();
        assert!(
            entries.iter().all(|e| !e.name.starts_with(".craftctl_tmp_")),
            "temp file leaked: {entries:?}"
        );
        drop(dir);
    }

    #[tokio::test]
    async fn test_delete_file() {
        let (_dir, mgr) = setup().await;
        mgr.delete("subdir/file.txt").await.unwrap();
        assert!(matches!(
            mgr.read("subdir/file.txt").await,
            Err(FileError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_delete_nonempty_dir_rejected_then_empty_ok() {
        let (_dir, mgr) = setup().await;
        assert!(matches!(
            mgr.delete("subdir").await,
            Err(FileError::DirectoryNotEmpty)
        ));
        mgr.delete("subdir/file.txt").await.unwrap();
        mgr.delete("subdir").await.unwrap();
        assert!(matches!(mgr.list("subdir").await, Err(FileError::NotFound)));
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let (_dir, mgr) = setup().await;
        assert!(matches!(mgr.delete("ghost").await, Err(FileError::NotFound)));
    }

    #[tokio::test]
    async fn test_delete_symlink_removes_link_not_target() {
        let (dir, mgr) = setup().await;
        std::os::unix::fs::symlink(
            dir.path().join("subdir/file.txt"),
            dir.path().join("alias.txt"),
        )
        .unwrap();

        mgr.delete("alias.txt").await.unwrap();
        // The link is gone, the target survives.
        assert!(matches!(mgr.read("alias.txt").await, Err(FileError::NotFound)));
        assert_eq!(mgr.read("subdir/file.txt").await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_delete_root_refused() {
        let (_dir, mgr) = setup().await;
        assert!(matches!(mgr.delete("").await, Err(FileError::PathEscape)));
    }

    #[tokio::test]
    async fn test_missing_root_is_not_found() {
        let mgr = FileManager::new("/nonexistent/craftctl-test-root", 1024);
        assert!(matches!(mgr.list("").await, Err(FileError::NotFound)));
    }
}
