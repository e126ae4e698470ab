//! JSON state file backend.
//!
//! Layout: `{"version": 1, "processed": {"<id>": "<rfc3339>"}}`. Files written
//! by older releases (`{"processed_ids": [...]}`) are read and upgraded on
//! the next write.
//!
//! Every write goes to a temp file in the same directory, is fsynced, and
//! then renamed over the old file, so a crash leaves either the old or the
//! new state on disk and never a torn file.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::StateError;
use crate::store::traits::{ProcessedSet, StateStore};

const STATE_VERSION: u32 = 1;

#[derive(Serialize)]
struct StateFile<'a> {
    version: u32,
    processed: BTreeMap<&'a str, DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StateFileRepr {
    Current {
        version: u32,
        processed: BTreeMap<String, DateTime<Utc>>,
    },
    Legacy {
        processed_ids: Vec<String>,
    },
}

/// State store backed by a single JSON file.
pub struct JsonStateStore {
    path: PathBuf,
    processed: ProcessedSet,
}

impl JsonStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            processed: ProcessedSet::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn corrupt(&self, reason: impl Into<String>) -> StateError {
        StateError::Corrupt {
            location: self.location(),
            reason: reason.into(),
        }
    }

    fn parse(&self, bytes: &[u8]) -> Result<ProcessedSet, StateError> {
        let repr: StateFileRepr =
            serde_json::from_slice(bytes).map_err(|e| self.corrupt(e.to_string()))?;
        match repr {
            StateFileRepr::Current { version, processed } => {
                if version != STATE_VERSION {
                    return Err(self.corrupt(format!("unsupported state version {version}")));
                }
                Ok(processed.into_iter().collect())
            }
            StateFileRepr::Legacy { processed_ids } => {
                info!(
                    path = %self.path.display(),
                    count = processed_ids.len(),
                    "Read legacy state file; it will be upgraded on next write"
                );
                // Legacy files carry no timestamps.
                Ok(processed_ids
                    .into_iter()
                    .map(|id| (id, DateTime::UNIX_EPOCH))
                    .collect())
            }
        }
    }

    fn serialize(&self) -> Result<Vec<u8>, StateError> {
        let file = StateFile {
            version: STATE_VERSION,
            processed: self.processed.iter().collect(),
        };
        serde_json::to_vec_pretty(&file).map_err(|e| self.corrupt(e.to_string()))
    }
}

#[async_trait]
impl StateStore for JsonStateStore {
    fn location(&self) -> String {
        self.path.display().to_string()
    }

    async fn load(&mut self) -> Result<ProcessedSet, StateError> {
        let processed = match tokio::fs::read(&self.path).await {
            Ok(bytes) => self.parse(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No state file yet, starting empty");
                ProcessedSet::new()
            }
            Err(e) => {
                return Err(StateError::Io {
                    location: self.location(),
                    source: e,
                });
            }
        };
        debug!(path = %self.path.display(), count = processed.len(), "State loaded");
        self.processed = processed.clone();
        Ok(processed)
    }

    fn contains(&self, id: &str) -> bool {
        self.processed.contains(id)
    }

    async fn record(&mut self, id: &str) -> Result<(), StateError> {
        if self.processed.insert(id, Utc::now()) {
            self.flush().await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), StateError> {
        let bytes = self.serialize()?;
        let path = self.path.clone();
        let location = self.location();
        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(|e| StateError::Io {
                location: location.clone(),
                source: std::io::Error::other(e),
            })?
            .map_err(|e| StateError::Io { location, source: e })?;
        debug!(path = %self.path.display(), count = self.processed.len(), "State flushed");
        Ok(())
    }

    fn len(&self) -> usize {
        self.processed.len()
    }
}

/// Replace `path` with `bytes` via temp file + fsync + rename.
///
/// The temp file is removed on every early return by its `Drop`.
fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let mut tmp = NamedTempFile::new_in(&dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;

    #[cfg(unix)]
    std::fs::File::open(&dir)?.sync_all()?;

    Ok(())
}
