//! Control address derivation and stale socket cleanup.
//!
//! Every session owns `<control_dir>/<session_id>.sock`. The mapping is a
//! plain concatenation, so any process that knows the session id and the
//! control directory computes the same address without coordination.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use interprocess::local_socket::tokio::prelude::*;
use interprocess::local_socket::GenericFilePath;
use tracing::info;

use crate::{AppError, Result};

/// Suffix appended to the session id to form the socket file name.
pub const SOCKET_SUFFIX: &str = ".sock";

/// Whether `session_id` can safely become a file name inside the control dir.
#[must_use]
pub fn is_safe_session_id(session_id: &str) -> bool {
    !session_id.is_empty()
        && !session_id.contains('/')
        && !session_id.contains('\\')
        && !session_id.contains("..")
        && !session_id.contains('\0')
}

/// Compute the socket path for `session_id`.
///
/// # Errors
///
/// Returns `AppError::InvalidSessionId` when the id contains separators,
/// traversal sequences, or NUL, or is empty.
pub fn socket_path(control_dir: &Path, session_id: &str) -> Result<PathBuf> {
    if !is_safe_session_id(session_id) {
        return Err(AppError::InvalidSessionId(format!("{session_id:?}")));
    }
    Ok(control_dir.join(format!("{session_id}{SOCKET_SUFFIX}")))
}

/// Create the control directory if it does not exist yet.
///
/// # Errors
///
/// Returns `AppError::Io` if the directory cannot be created.
pub async fn ensure_control_dir(control_dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(control_dir)
        .await
        .map_err(|err| AppError::Io(format!("cannot create {}: {err}", control_dir.display())))
}

/// Remove a socket file, treating a missing file as success.
///
/// # Errors
///
/// Returns `AppError::Io` for any failure other than `NotFound`.
pub async fn remove_socket(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(AppError::Io(format!(
            "cannot remove {}: {err}",
            path.display()
        ))),
    }
}

/// Whether something currently accepts connections at `path`.
pub async fn is_live(path: &Path) -> bool {
    let Ok(name) = path.to_fs_name::<GenericFilePath>() else {
        return false;
    };
    LocalSocketStream::connect(name).await.is_ok()
}

/// Remove `path` if it is a leftover from a process that no longer listens.
///
/// # Errors
///
/// - `AppError::Ipc` when a live listener still owns the address.
/// - `AppError::Io` when the stale file cannot be removed.
pub async fn remove_stale(path: &Path) -> Result<()> {
    if tokio::fs::symlink_metadata(path).await.is_err() {
        return Ok(());
    }
    if is_live(path).await {
        return Err(AppError::Ipc(format!(
            "control socket {} is owned by a live endpoint",
            path.display()
        )));
    }
    info!(path = %path.display(), "removing stale control socket");
    remove_socket(path).await
}

/// Session ids that have a socket file in `control_dir`.
///
/// # Errors
///
/// Returns `AppError::Io` if the directory exists but cannot be read.
pub async fn list_session_ids(control_dir: &Path) -> Result<Vec<String>> {
    let mut dir = match tokio::fs::read_dir(control_dir).await {
        Ok(dir) => dir,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(AppError::Io(format!(
                "cannot read {}: {err}",
                control_dir.display()
            )))
        }
    };

    let mut ids = Vec::new();
    while let Some(entry) = dir.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(id) = name.strip_suffix(SOCKET_SUFFIX) {
            if is_safe_session_id(id) {
                ids.push(id.to_owned());
            }
        }
    }
    ids.sort();
    Ok(ids)
}
