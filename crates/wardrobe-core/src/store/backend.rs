//! Storage backends behind a [`MetadataStore`](super::MetadataStore).
//!
//! A backend only knows how to load and replace a whole collection of raw
//! JSON records; all querying happens in the store on top of it.

use super::atomic::{atomic_read_json, atomic_write_json, sibling_with_suffix};
use crate::config::StoreConfig;
use crate::{Result, WardrobeError};
use fs2::FileExt;
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Whole-collection persistence.
///
/// `save_raw` replaces the collection. There is no optimistic concurrency:
/// two processes that load, modify and save the same collection lose one
/// update (last writer wins). Writers must be serialized.
pub trait CollectionBackend: Send + Sync {
    /// Load all records in insertion order.
    ///
    /// A missing collection is empty, not an error.
    fn load_raw(&self) -> Result<Vec<Value>>;

    /// Replace the whole collection.
    fn save_raw(&self, records: &[Value]) -> Result<()>;

    /// Human-readable location, used in logs.
    fn describe(&self) -> String;
}

/// One pretty-printed JSON array per collection file.
pub struct JsonFileBackend {
    path: PathBuf,
    keep_backup: bool,
    /// Serializes writers inside this process
    write_lock: Mutex<()>,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            keep_backup: true,
            write_lock: Mutex::new(()),
        }
    }

    pub fn with_backup(mut self, keep_backup: bool) -> Self {
        self.keep_backup = keep_backup;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        sibling_with_suffix(&self.path, StoreConfig::LOCK_SUFFIX)
    }
}

impl CollectionBackend for JsonFileBackend {
    fn load_raw(&self) -> Result<Vec<Value>> {
        match atomic_read_json::<Value>(&self.path) {
            Ok(None) => {
                debug!("Collection file {} does not exist yet", self.path.display());
                Ok(Vec::new())
            }
            Ok(Some(Value::Array(records))) => Ok(records),
            Ok(Some(_)) => {
                warn!(
                    "Collection file {} is not a JSON array, treating as empty",
                    self.path.display()
                );
                Ok(Vec::new())
            }
            Err(e) => {
                warn!(
                    "Collection file {} is unreadable, treating as empty: {}",
                    self.path.display(),
                    e
                );
                Ok(Vec::new())
            }
        }
    }

    fn save_raw(&self, records: &[Value]) -> Result<()> {
        let _guard = self.write_lock.lock().map_err(|_| {
            WardrobeError::Other(format!(
                "Failed to acquire write lock for {}",
                self.path.display()
            ))
        })?;
        let _file_lock = FileLock::acquire(&self.lock_path())?;

        debug!(
            "Saving {} records to {}",
            records.len(),
            self.path.display()
        );
        atomic_write_json(&self.path, records, self.keep_backup)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Advisory exclusive lock on a sidecar file, released on drop.
struct FileLock {
    file: File,
}

impl FileLock {
    fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| WardrobeError::io_with_path(e, parent))?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| WardrobeError::io_with_path(e, path))?;
        file.lock_exclusive()
            .map_err(|e| WardrobeError::io_with_path(e, path))?;
        Ok(Self { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
