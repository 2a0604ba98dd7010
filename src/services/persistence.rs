//! Persistence service — debounced flush of the workspace to a JSON file.
//!
//! DESIGN
//! ======
//! A background task wakes on a fixed interval, compares the workspace
//! revision with the last flushed one, snapshots under a read lock, releases
//! the lock, and writes the blob to disk via temp file + rename so a crash
//! mid-write never truncates the previous copy.
//!
//! ERROR HANDLING
//! ==============
//! The flushed revision only advances after a successful write. A failed
//! write leaves the workspace dirty and the next tick retries. Edits made
//! while a write is in flight bump the revision past the snapshot and are
//! picked up by the following tick.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::services::store::{Snapshot, Workspace};
use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("snapshot encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

impl crate::error::ErrorCode for PersistenceError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Io { .. } => "E_PERSIST_IO",
            Self::Encode(_) => "E_PERSIST_ENCODE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Io { .. })
    }
}

/// Load the workspace from `path`. A missing file yields an empty workspace;
/// an unreadable or corrupt file is logged and also yields an empty one.
#[must_use]
pub fn load_workspace(path: &Path) -> Workspace {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "no saved workspace; starting fresh");
            return Workspace::new();
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "error reading saved workspace");
            return Workspace::new();
        }
    };

    match serde_json::from_str::<Snapshot>(&raw) {
        Ok(snapshot) => {
            let workspace = Workspace::from_snapshot(snapshot);
            info!(
                path = %path.display(),
                projects = workspace.projects.len(),
                references = workspace.references.len(),
                images = workspace.generated_images.len(),
                "workspace loaded"
            );
            workspace
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "error parsing saved workspace");
            Workspace::new()
        }
    }
}

/// Write a snapshot to `path` atomically.
///
/// # Errors
///
/// Returns an error if encoding, writing the temp file, or the rename fails.
pub async fn save_snapshot(path: &Path, snapshot: &Snapshot) -> Result<(), PersistenceError> {
    let bytes = serde_json::to_vec_pretty(snapshot)?;
    let tmp = temp_path(path);

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| PersistenceError::Io { path: parent.to_path_buf(), source })?;
    }
    tokio::fs::write(&tmp, &bytes)
        .await
        .map_err(|source| PersistenceError::Io { path: tmp.clone(), source })?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|source| PersistenceError::Io { path: path.to_path_buf(), source })?;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(std::ffi::OsStr::to_os_string).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Tracks the last revision that reached disk.
#[derive(Debug, Default)]
pub struct FlushTracker {
    flushed: AtomicU64,
}

impl FlushTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn flushed_revision(&self) -> u64 {
        self.flushed.load(Ordering::Acquire)
    }
}

/// Flush once if the workspace changed since the last flush.
/// Returns `true` when a write happened.
///
/// # Errors
///
/// Returns the write error; the tracker is left unchanged so the caller retries.
pub async fn flush_if_dirty(state: &AppState, tracker: &FlushTracker) -> Result<bool, PersistenceError> {
    let (revision, snapshot) = {
        let workspace = state.workspace.read().await;
        if workspace.revision() == tracker.flushed_revision() {
            return Ok(false);
        }
        (workspace.revision(), workspace.snapshot())
    };

    save_snapshot(&state.config.data_path, &snapshot).await?;
    tracker.flushed.store(revision, Ordering::Release);
    debug!(revision, path = %state.config.data_path.display(), "workspace flushed");
    Ok(true)
}

/// Spawn the background persistence task. Returns a handle for shutdown.
pub fn spawn_persistence_task(state: AppState, tracker: Arc<FlushTracker>) -> JoinHandle<()> {
    let flush_interval_ms = state.config.flush_interval_ms.max(1);
    info!(flush_interval_ms, path = %state.config.data_path.display(), "workspace persistence configured");

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(flush_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(e) = flush_if_dirty(&state, &tracker).await {
                warn!(error = %e, "workspace flush failed; will retry");
            }
        }
    })
}

/// Stop the background task, then write whatever it had not flushed yet.
/// Returns `true` when the final write happened.
///
/// # Errors
///
/// Returns the final write error.
pub async fn shutdown(state: &AppState, tracker: &FlushTracker, task: JoinHandle<()>) -> Result<bool, PersistenceError> {
    task.abort();
    if let Err(e) = task.await {
        if e.is_panic() {
            error!(error = %e, "persistence task panicked");
        }
    }
    flush_if_dirty(state, tracker).await
}

#[cfg(test)]
#[path = "persistence_test.rs"]
mod tests;
