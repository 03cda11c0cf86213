//! Watch-progress persistence
//!
//! One JSON file maps `title_id -> ProgressRecord`. Only the latest episode
//! and position per title is kept. Every update rewrites the whole file
//! through a temp file and rename, so a crash mid-write never leaves a
//! truncated store behind.
//!
//! Store failures never reach the caller: they are logged and the in-memory
//! map stays authoritative.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::{Episode, ProgressRecord};

/// Errors from reading or writing the progress file
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to read {path}: {source}")]
    Read {
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
    #[error("Corrupt progress file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to serialize progress: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Progress store shared between the coordinator, tracker, and finalizer
pub type SharedStore = Arc<Mutex<ProgressStore>>;

/// Lock a shared store, recovering the data if a holder panicked
pub fn lock_store(store: &SharedStore) -> MutexGuard<'_, ProgressStore> {
    store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// File-backed map of watch progress keyed by title id
#[derive(Debug)]
pub struct ProgressStore {
    path: PathBuf,
    records: BTreeMap<String, ProgressRecord>,
}

impl ProgressStore {
    /// Default location (`<data_dir>/kitsunari/progress.json`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|p| p.join("kitsunari").join("progress.json"))
    }

    /// Load the store at `path`; a missing, unreadable, or corrupt file yields an empty store
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = match Self::read(&path) {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "starting with empty watch history");
                BTreeMap::new()
            }
        };
        debug!(path = %path.display(), records = records.len(), "opened progress store");
        Self { path, records }
    }

    /// Open and wrap for sharing
    pub fn open_shared(path: impl Into<PathBuf>) -> SharedStore {
        Arc::new(Mutex::new(Self::open(path)))
    }

    fn read(path: &Path) -> Result<BTreeMap<String, ProgressRecord>, StoreError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(source) => {
                return Err(StoreError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        if text.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&text).map_err(|source| StoreError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record progress for a title, replacing any previous record
    pub fn update(
        &mut self,
        title_id: &str,
        title_name: &str,
        episode: Episode,
        position_seconds: u64,
        duration_seconds: u64,
    ) -> ProgressRecord {
        self.update_at(
            title_id,
            title_name,
            episode,
            position_seconds,
            duration_seconds,
            Utc::now(),
        )
    }

    pub(crate) fn update_at(
        &mut self,
        title_id: &str,
        title_name: &str,
        episode: Episode,
        position_seconds: u64,
        duration_seconds: u64,
        now: DateTime<Utc>,
    ) -> ProgressRecord {
        let record = ProgressRecord::new(
            title_id,
            title_name,
            episode,
            position_seconds,
            duration_seconds,
            now,
        );
        debug!(
            title = %title_id,
            episode = %episode,
            position = position_seconds,
            duration = duration_seconds,
            percent = record.percent_complete,
            "recording progress"
        );
        self.records.insert(title_id.to_string(), record.clone());

        if let Err(e) = self.save() {
            warn!(error = %e, "progress kept in memory only");
        }
        record
    }

    pub fn get(&self, title_id: &str) -> Option<&ProgressRecord> {
        self.records.get(title_id)
    }

    /// Drop a title's progress; returns whether anything was removed
    pub fn remove(&mut self, title_id: &str) -> bool {
        if self.records.remove(title_id).is_none() {
            return false;
        }
        info!(title = %title_id, "forgot watch progress");
        if let Err(e) = self.save() {
            warn!(error = %e, "removal kept in memory only");
        }
        true
    }

    /// Every record, ordered by title id
    pub fn records(&self) -> impl Iterator<Item = &ProgressRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Started-but-unfinished titles, most recently watched first
    pub fn continue_watching(&self, limit: usize) -> Vec<ProgressRecord> {
        let mut resumable: Vec<ProgressRecord> = self
            .records
            .values()
            .filter(|r| r.is_resumable())
            .cloned()
            .collect();
        resumable.sort_by(|a, b| {
            b.last_watched
                .cmp(&a.last_watched)
                .then_with(|| a.title_id.cmp(&b.title_id))
        });
        resumable.truncate(limit);
        resumable
    }

    /// Write the full map to disk
    pub fn save(&self) -> Result<(), StoreError> {
        let write_err = |source| StoreError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }

        let json = serde_json::to_string_pretty(&self.records).map_err(StoreError::Serialize)?;

        let tmp = self.path.with_extension("json.tmp");
        let result = (|| {
            let mut file = File::create(&tmp)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp, &self.path)
        })();

        if let Err(e) = result {
            let _ = fs::remove_file(&tmp);
            return Err(write_err(e));
        }
        Ok(())
    }
}
