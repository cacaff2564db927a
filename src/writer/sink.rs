//! Destinations for published snapshot values.
//!
//! A sink is a key/value store with overwrite semantics. `FileSink` keeps
//! one plain-text file per key so that external tools (overlays, scripts)
//! can read the latest value directly.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Failed to prepare output directory {path}: {source}")]
    Prepare {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Sink unavailable: {0}")]
    Unavailable(String),
}

/// Receives every published value.
pub trait SnapshotSink: Send + Sync {
    /// Overwrites the value stored under `name`.
    fn write_value(&self, name: &str, value: &str) -> Result<(), SinkError>;
}

impl<S: SnapshotSink + ?Sized> SnapshotSink for Arc<S> {
    fn write_value(&self, name: &str, value: &str) -> Result<(), SinkError> {
        (**self).write_value(name, value)
    }
}

/// Writes each value to `<directory>/<name>`.
#[derive(Debug, Clone)]
pub struct FileSink {
    directory: PathBuf,
}

impl FileSink {
    /// Creates the output directory and removes the files left in it by a
    /// previous run. Subdirectories are kept.
    pub fn prepare(directory: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let directory = directory.into();
        let prepare_err = |source| SinkError::Prepare {
            path: directory.clone(),
            source,
        };

        fs::create_dir_all(&directory).map_err(prepare_err)?;

        let mut removed = 0usize;
        for entry in fs::read_dir(&directory).map_err(prepare_err)? {
            let entry = entry.map_err(prepare_err)?;
            if entry.file_type().map_err(prepare_err)?.is_file() {
                fs::remove_file(entry.path()).map_err(prepare_err)?;
                removed += 1;
            }
        }

        info!(
            "Output directory ready: {} ({} stale file(s) removed)",
            directory.display(),
            removed
        );

        Ok(Self { directory })
    }

    /// Returns the output directory.
    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

impl SnapshotSink for FileSink {
    /// Writes through a temporary file and renames it over the target, so
    /// a failed write leaves the previous value intact.
    fn write_value(&self, name: &str, value: &str) -> Result<(), SinkError> {
        let path = self.directory.join(name);
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let write_err = |source| SinkError::Write {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        fs::write(&tmp, value).map_err(write_err)?;
        if let Err(source) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(write_err(source));
        }

        debug!("{} <- {}", path.display(), value);
        Ok(())
    }
}
