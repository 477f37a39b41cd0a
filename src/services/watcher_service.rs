use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebouncedEvent, Debouncer, RecommendedCache};
use tokio::sync::mpsc::UnboundedSender;
use walkdir::WalkDir;

use crate::error::AppError;
use crate::models::suggestion::FileEvent;

/// Waits for file writes to settle before emitting an event.
const DEBOUNCE_MS: u64 = 500;

/// Names with these suffixes are in-progress downloads or scratch files.
const SKIP_SUFFIXES: &[&str] = &[".tmp", ".crdownload", ".part", ".download"];

/// Keeps the underlying watcher alive; dropping it stops the watch.
pub struct WatchHandle {
    _debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
    path: PathBuf,
}

impl WatchHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Watches one directory (non-recursive) and sends a `FileEvent` for
/// every new file that survives the transient-name filters.
pub fn watch_dir(dir: &Path, sink: UnboundedSender<FileEvent>) -> Result<WatchHandle, AppError> {
    if !dir.is_dir() {
        return Err(AppError::Watcher(format!(
            "watch target is not a directory: {}",
            dir.display()
        )));
    }

    let mut debouncer = new_debouncer(
        Duration::from_millis(DEBOUNCE_MS),
        None,
        move |result: Result<Vec<DebouncedEvent>, Vec<notify::Error>>| match result {
            Ok(events) => {
                for event in events {
                    if !matches!(event.kind, EventKind::Create(_)) {
                        continue;
                    }
                    for path in &event.paths {
                        if let Some(file_event) = event_for_path(path) {
                            if sink.send(file_event).is_err() {
                                return;
                            }
                        }
                    }
                }
            }
            Err(errors) => {
                for error in errors {
                    tracing::warn!("watcher error: {}", error);
                }
            }
        },
    )
    .map_err(|e| AppError::Watcher(format!("failed to create watcher: {e}")))?;

    debouncer
        .watch(dir, RecursiveMode::NonRecursive)
        .map_err(|e| AppError::Watcher(format!("failed to watch {}: {e}", dir.display())))?;

    tracing::info!("watching {}", dir.display());
    Ok(WatchHandle {
        _debouncer: debouncer,
        path: dir.to_path_buf(),
    })
}

/// Builds a triage event for a settled file. Returns `None` for
/// directories, hidden names, transient downloads, and empty files.
pub fn event_for_path(path: &Path) -> Option<FileEvent> {
    let file_name = path.file_name()?.to_string_lossy().to_string();
    if is_transient_name(&file_name) {
        return None;
    }

    let metadata = fs::metadata(path).ok()?;
    if !metadata.is_file() || metadata.len() == 0 {
        return None;
    }

    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase());

    Some(FileEvent {
        event_id: uuid::Uuid::new_v4().to_string(),
        file_name,
        file_path: path.to_string_lossy().to_string(),
        extension,
    })
}

/// One-shot enumeration of files already sitting in the directory,
/// filtered the same way the live watcher filters.
pub fn scan_existing(dir: &Path) -> Result<Vec<FileEvent>, AppError> {
    if !dir.is_dir() {
        return Err(AppError::Watcher(format!(
            "sweep target is not a directory: {}",
            dir.display()
        )));
    }

    let mut events = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| AppError::Watcher(e.to_string()))?;
        if let Some(event) = event_for_path(entry.path()) {
            events.push(event);
        }
    }
    Ok(events)
}

fn is_transient_name(name: &str) -> bool {
    name.starts_with('.')
        || name.starts_with("~$")
        || SKIP_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}
