//! Filesystem events delivered by a directory watcher.

use std::path::{Path, PathBuf};

/// A change observed in a watched directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Deleted(PathBuf),
    Moved { from: PathBuf, to: PathBuf },
}

impl FileEvent {
    /// Whether the event concerns a file called `file_name`.
    #[must_use]
    pub fn touches(&self, file_name: &str) -> bool {
        match self {
            Self::Created(path) | Self::Modified(path) | Self::Deleted(path) => {
                self::file_name(path) == Some(file_name)
            }
            Self::Moved { from, to } => {
                self::file_name(from) == Some(file_name) || self::file_name(to) == Some(file_name)
            }
        }
    }
}

/// Last path component as UTF-8.
#[must_use]
pub fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|name| name.to_str())
}
