//! Directory watching over `notify`, bridged to a tokio channel.
//!
//! The notify callback runs on the watcher's own thread; events are
//! translated to [`FileEvent`]s and handed over with `blocking_send`.

use std::path::{Path, PathBuf};

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use thingrules_app::ports::FileEvent;

use crate::error::WatchError;

/// Capacity of the event channel.
pub const CHANNEL_CAPACITY: usize = 64;

/// Watches one directory (non-recursively) until dropped.
pub struct DirectoryWatcher {
    dir: PathBuf,
    _watcher: RecommendedWatcher,
}

impl DirectoryWatcher {
    /// Start watching `dir`. Events arrive on the returned receiver.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError`] if the platform watcher cannot be created or
    /// the directory cannot be watched.
    pub fn spawn(dir: impl AsRef<Path>) -> Result<(Self, mpsc::Receiver<FileEvent>), WatchError> {
        let dir = dir.as_ref().to_path_buf();
        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            match result {
                Ok(event) => {
                    for file_event in translate(event) {
                        if sender.blocking_send(file_event).is_err() {
                            debug!("file event receiver dropped");
                            return;
                        }
                    }
                }
                Err(error) => warn!(%error, "directory watch error"),
            }
        })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        info!(dir = %dir.display(), "watching directory");
        Ok((
            Self {
                dir,
                _watcher: watcher,
            },
            receiver,
        ))
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Map a notify event to zero or more [`FileEvent`]s.
///
/// Renames reported as a single event become [`FileEvent::Moved`]; the
/// halves of a split rename become a deletion and a creation. Access and
/// metadata-only events are dropped.
#[must_use]
pub fn translate(event: Event) -> Vec<FileEvent> {
    let Event { kind, paths, .. } = event;
    match kind {
        EventKind::Create(_) => paths.into_iter().map(FileEvent::Created).collect(),
        EventKind::Remove(_) => paths.into_iter().map(FileEvent::Deleted).collect(),
        EventKind::Modify(ModifyKind::Name(mode)) => translate_rename(mode, paths),
        EventKind::Modify(ModifyKind::Metadata(_)) | EventKind::Access(_) | EventKind::Other => {
            Vec::new()
        }
        EventKind::Modify(_) | EventKind::Any => {
            paths.into_iter().map(FileEvent::Modified).collect()
        }
    }
}

fn translate_rename(mode: RenameMode, paths: Vec<PathBuf>) -> Vec<FileEvent> {
    match mode {
        RenameMode::Both => {
            let mut paths = paths.into_iter();
            match (paths.next(), paths.next()) {
                (Some(from), Some(to)) => vec![FileEvent::Moved { from, to }],
                (Some(path), None) => vec![FileEvent::Modified(path)],
                _ => Vec::new(),
            }
        }
        RenameMode::From => paths.into_iter().map(FileEvent::Deleted).collect(),
        RenameMode::To => paths.into_iter().map(FileEvent::Created).collect(),
        RenameMode::Any | RenameMode::Other => paths
            .into_iter()
            .map(|path| {
                if path.exists() {
                    FileEvent::Created(path)
                } else {
                    FileEvent::Deleted(path)
                }
            })
            .collect(),
    }
}
