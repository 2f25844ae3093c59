use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::session::Dialect;
use crate::settings::{default_config_dir, SettingsError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionLogEntry {
    pub timestamp_unix_ms: u128,
    pub dialect: Dialect,
    pub host: Option<String>,
    pub database: Option<String>,
}

#[must_use]
pub fn unix_timestamp_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

#[derive(Debug, Error)]
pub enum ConnectionLogError {
    #[error("failed to resolve default config path: {0}")]
    Config(#[from] SettingsError),
    #[error("invalid connection log path `{0}`")]
    InvalidPath(PathBuf),
    #[error("failed to create connection log directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize connection log entry: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to append connection log entry at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Newline-delimited JSON file of successful connections.
#[derive(Debug, Clone)]
pub struct FileConnectionLog {
    path: PathBuf,
}

impl FileConnectionLog {
    pub fn load_default() -> Result<Self, ConnectionLogError> {
        Ok(Self {
            path: default_config_dir()?.join("connections.ndjson"),
        })
    }

    #[must_use]
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, entry: &ConnectionLogEntry) -> Result<(), ConnectionLogError> {
        let parent_dir = self
            .path
            .parent()
            .ok_or_else(|| ConnectionLogError::InvalidPath(self.path.clone()))?;
        fs::create_dir_all(parent_dir).map_err(|source| ConnectionLogError::CreateDir {
            path: parent_dir.to_path_buf(),
            source,
        })?;

        let rendered = serde_json::to_string(entry)
            .map_err(|source| ConnectionLogError::Serialize { source })?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| ConnectionLogError::Write {
                path: self.path.clone(),
                source,
            })?;
        writeln!(file, "{rendered}").map_err(|source| ConnectionLogError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

/// Entries recorded during this process, optionally mirrored to a file.
#[derive(Debug, Default)]
pub struct ConnectionLog {
    entries: Mutex<Vec<ConnectionLogEntry>>,
    sink: Option<FileConnectionLog>,
}

impl ConnectionLog {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_file(sink: FileConnectionLog) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            sink: Some(sink),
        }
    }

    pub fn record(&self, entry: ConnectionLogEntry) {
        if let Some(sink) = &self.sink {
            if let Err(error) = sink.append(&entry) {
                warn!(%error, "connection log entry was not persisted");
            }
        }
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    #[must_use]
    pub fn entries(&self) -> Vec<ConnectionLogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
