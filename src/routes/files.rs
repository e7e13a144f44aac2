//! Sandboxed file-manager endpoints.
//!
//! - `GET    /api/files?path=...`            — read a file
//! - `GET    /api/files?path=...&list=true`  — list a directory
//! - `PUT    /api/files`                     — write a file (atomic)
//! - `DELETE /api/files?path=...`            — delete a file or empty dir
//!
//! All paths are relative to the server directory; the
//! [`FileManager`](crate::files::FileManager) guarantees nothing resolves
//! outside it. Binary file content travels
//! base64-encoded (an `encoding` field marks it), UTF-8 text as-is.
//!
//! ## Error codes
//!
//! | HTTP | Code                | Meaning                                  |
//! |------|---------------------|------------------------------------------|
//! | 400  | `INVALID_PATH`      | path escapes the sandbox (logged)        |
//! | 404  | `FILE_NOT_FOUND`    | file or directory does not exist         |
//! | 400  | `IS_DIRECTORY`      | file operation on a directory            |
//! | 409  | `DIR_NOT_EMPTY`     | delete on a non-empty directory          |
//! | 400  | `FILE_TOO_LARGE`    | content exceeds `server.max_file_size`   |
//! | 400  | `INVALID_CONTENT`   | base64 decoding failed                   |
//! | 403  | `PERMISSION_DENIED` | OS permission error                      |
//! | 500  | `IO_ERROR`          | other I/O failure                        |

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::files::FileError;
use crate::AppState;

/// Query parameters for `GET` and `DELETE /api/files`.
#[derive(Deserialize)]
pub struct FilesQuery {
    /// Path relative to the server directory. Empty means the root.
    #[serde(default)]
    pub path: String,
    /// When `true` (or when `path` ends with `/`), list directory contents
    /// instead of reading a file.
    #[serde(default)]
    pub list: bool,
}

/// Request body for `PUT /api/files`.
#[derive(Deserialize)]
pub struct FileWriteRequest {
    /// Destination path relative to the server directory.
    pub path: String,
    /// File contents — UTF-8 text, or base64 if `encoding` is `"base64"`.
    pub content: String,
    /// Set to `"base64"` if `content` is base64-encoded binary.
    pub encoding: Option<String>,
}

/// Map a file-manager error to its HTTP response. Escapes are logged as
/// potential attacks.
fn file_error(e: &FileError, path: &str) -> (StatusCode, Json<Value>) {
    let (status, code) = match e {
        FileError::PathEscape => {
            warn!("Rejected path escape attempt: {path:?}");
            (StatusCode::BAD_REQUEST, "INVALID_PATH")
        }
        FileError::NotFound => (StatusCode::NOT_FOUND, "FILE_NOT_FOUND"),
        FileError::IsDirectory => (StatusCode::BAD_REQUEST, "IS_DIRECTORY"),
        FileError::DirectoryNotEmpty => (StatusCode::CONFLICT, "DIR_NOT_EMPTY"),
        FileError::TooLarge { .. } => (StatusCode::BAD_REQUEST, "FILE_TOO_LARGE"),
        FileError::Io(io) if io.kind() == std::io::ErrorKind::PermissionDenied => {
            (StatusCode::FORBIDDEN, "PERMISSION_DENIED")
        }
        FileError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
    };
    (status, Json(json!({"error": e.to_string(), "code": code})))
}

/// `GET /api/files` — read a file or list a directory.
pub async fn get_file(
    State(state): State<AppState>,
    Query(query): Query<FilesQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if query.list || query.path.is_empty() || query.path.ends_with('/') {
        let entries = state
            .files
            .list(&query.path)
            .await
            .map_err(|e| file_error(&e, &query.path))?;
        return Ok(Json(json!({
            "path": query.path.trim_end_matches('/'),
            "entries": entries,
        })));
    }

    let bytes = state
        .files
        .read(&query.path)
        .await
        .map_err(|e| file_error(&e, &query.path))?;

    // UTF-8 text goes out as-is; anything else is base64-tagged.
    let size = bytes.len();
    match String::from_utf8(bytes) {
        Ok(text) => Ok(Json(json!({
            "path": query.path,
            "content": text,
            "size": size,
        }))),
        Err(e) => {
            use base64::Engine;
            let encoded =
                base64::engine::general_purpose::STANDARD.encode(e.as_bytes());
            Ok(Json(json!({
                "path": query.path,
                "content": encoded,
                "size": size,
                "encoding": "base64",
            })))
        }
    }
}

/// `PUT /api/files` — write a file atomically, creating parent directories
/// as needed (uploads into not-yet-existing folders).
pub async fn put_file(
    State(state): State<AppState>,
    Json(payload): Json<FileWriteRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let bytes = if payload.encoding.as_deref() == Some("base64") {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD
            .decode(&payload.content)
            .map_err(|e| {
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": format!("Invalid base64: {e}"), "code": "INVALID_CONTENT"})),
                )
            })?
    } else {
        payload.content.into_bytes()
    };

    state
        .files
        .write(&payload.path, &bytes)
        .await
        .map_err(|e| file_error(&e, &payload.path))?;

    Ok(Json(json!({
        "path": payload.path,
        "size": bytes.len(),
        "ok": true,
    })))
}

/// `DELETE /api/files` — delete a file or an empty directory.
pub async fn delete_file(
    State(state): State<AppState>,
    Query(query): Query<FilesQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if query.path.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "No path specified", "code": "INVALID_PATH"})),
        ));
    }

    state
        .files
        .delete(&query.path)
        .await
        .map_err(|e| file_error(&e, &query.path))?;

    Ok(Json(json!({"path": query.path, "deleted": true})))
}
