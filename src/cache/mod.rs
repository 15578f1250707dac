//! Local file-backed cache of the last known state set.
//!
//! The cache is a single JSON document `{ "timestamp": .., "states": [..] }`
//! that is always rewritten as a whole. It mirrors the freshest data seen and
//! is the fallback when the remote store cannot be reached.

use crate::state::StateRecord;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;


/// Snapshot of the state set at the time of the last successful write
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    /// Epoch millis of the write (independent of per-state refresh times)
    pub timestamp: i64,

    pub states: Vec<StateRecord>,
}

impl CacheSnapshot {
    pub fn new(timestamp: i64, states: Vec<StateRecord>) -> Self {
        Self { timestamp, states }
    }

    /// Get state count (for logging)
    pub fn state_count(&self) -> usize {
        self.states.len()
    }
}

/// Local cache failures. Callers treat all of them as "no cache available".
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to read cache file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache file {} is corrupt: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize cache snapshot: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("failed to write cache file {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// JSON snapshot file at a fixed path
#[derive(Clone, Debug)]
pub struct LocalCache {
    path: PathBuf,
}

impl LocalCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot. A missing file is `Ok(None)`, not an error.
    pub async fn read_snapshot(&self) -> Result<Option<CacheSnapshot>, CacheError> {
        let json = match fs::read_to_string(&self.path).await {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Cache file not found");
                return Ok(None);
            }
            Err(source) => {
                return Err(CacheError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let snapshot = serde_json::from_str(&json).map_err(|source| CacheError::Corrupt {
            path: self.path.clone(),
            source,
        })?;

        Ok(Some(snapshot))
    }

    /// Overwrite the snapshot, creating the parent directory if needed.
    ///
    /// Uses atomic write: writes to a temp file, fsyncs, then renames, so a
    /// reader never observes a half-written cache.
    pub async fn write_snapshot(&self, snapshot: &CacheSnapshot) -> Result<(), CacheError> {
        let json = serde_json::to_string_pretty(snapshot).map_err(CacheError::Serialize)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| self.write_error(source))?;
        }

        let tmp_path = self.path.with_extension("tmp");

        {
            let mut file = fs::File::create(&tmp_path)
                .await
                .map_err(|source| self.write_error(source))?;
            file.write_all(json.as_bytes())
                .await
                .map_err(|source| self.write_error(source))?;
            file.sync_all()
                .await
                .map_err(|source| self.write_error(source))?;
        }

        fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|source| self.write_error(source))?;

        debug!(
            path = %self.path.display(),
            states = snapshot.state_count(),
            "Cache snapshot written"
        );

        Ok(())
    }

    fn write_error(&self, source: std::io::Error) -> CacheError {
        CacheError::Write {
            path: self.path.clone(),
            source,
        }
    }
}
