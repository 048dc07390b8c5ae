//! Pre-migration snapshots of the local store.
//!
//! A snapshot copies both collection files and the whole asset tree into a
//! fresh timestamped directory under `<root>/migration_backup/`. Snapshots are
//! never overwritten and never pruned.

use crate::store::LocalLayout;
use crate::{Result, WardrobeError};
use chrono::{DateTime, Utc};
use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// An artifact that could not be copied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupFailure {
    pub path: PathBuf,
    pub reason: String,
}

/// Result of one snapshot: where it went and what it captured.
#[derive(Debug, Clone)]
pub struct BackupHandle {
    pub location: PathBuf,
    pub created_at: DateTime<Utc>,
    /// Source paths copied, collections first.
    pub captured: Vec<PathBuf>,
    pub failures: Vec<BackupFailure>,
    pub bytes_copied: u64,
}

impl BackupHandle {
    /// True when every artifact was copied.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct BackupManager {
    layout: LocalLayout,
}

impl BackupManager {
    pub fn new(layout: LocalLayout) -> Self {
        Self { layout }
    }

    /// Copy the local store into a new backup directory.
    ///
    /// Only failure to create the backup directory itself is an error.
    /// Per-artifact copy failures are logged and listed in the handle.
    pub fn snapshot(&self) -> Result<BackupHandle> {
        let created_at = Utc::now();
        let location = self.create_backup_dir(&created_at)?;
        info!("Creating backup at {}", location.display());

        let mut handle = BackupHandle {
            location,
            created_at,
            captured: Vec::new(),
            failures: Vec::new(),
            bytes_copied: 0,
        };

        let collections = [self.layout.items_path(), self.layout.outfits_path()];
        for collection in &collections {
            if collection.exists() {
                self.copy_artifact(collection, &mut handle);
            } else {
                debug!("Collection {} does not exist, nothing to back up", collection.display());
            }
        }

        let images_dir = self.layout.images_dir();
        if images_dir.is_dir() {
            let backup_root = self.layout.backup_root();
            let walker = WalkDir::new(&images_dir)
                .follow_links(false)
                .into_iter()
                .filter_entry(|entry| !entry.path().starts_with(&backup_root));

            for entry in walker {
                match entry {
                    Ok(entry) if entry.file_type().is_file() => {
                        let path = entry.path();
                        if collections.iter().any(|c| c == path) || is_transient(path) {
                            continue;
                        }
                        self.copy_artifact(path, &mut handle);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let path = e.path().map(Path::to_path_buf).unwrap_or_default();
                        warn!("Backup could not read {}: {}", path.display(), e);
                        handle.failures.push(BackupFailure {
                            path,
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }

        if handle.is_complete() {
            info!(
                "Backup complete: {} files, {} bytes",
                handle.captured.len(),
                handle.bytes_copied
            );
        } else {
            warn!(
                "Backup incomplete: {} files copied, {} failed",
                handle.captured.len(),
                handle.failures.len()
            );
        }
        Ok(handle)
    }

    /// `backup-<timestamp>`, with a `-N` suffix when that name is taken.
    fn create_backup_dir(&self, created_at: &DateTime<Utc>) -> Result<PathBuf> {
        let backup_root = self.layout.backup_root();
        fs::create_dir_all(&backup_root)
            .map_err(|e| WardrobeError::io_with_path(e, &backup_root))?;

        let base = format!("backup-{}", created_at.format("%Y%m%dT%H%M%S%.3fZ"));
        for attempt in 0..1000 {
            let name = if attempt == 0 {
                base.clone()
            } else {
                format!("{}-{}", base, attempt)
            };
            let candidate = backup_root.join(name);
            match fs::create_dir(&candidate) {
                Ok(()) => return Ok(candidate),
                Err(e) if e.kind() == IoErrorKind::AlreadyExists => continue,
                Err(e) => return Err(WardrobeError::io_with_path(e, candidate)),
            }
        }

        Err(WardrobeError::Other(format!(
            "No free backup directory name under {}",
            backup_root.display()
        )))
    }

    fn copy_artifact(&self, source: &Path, handle: &mut BackupHandle) {
        let relative = source.strip_prefix(self.layout.root()).unwrap_or(source);
        let destination = handle.location.join(relative);

        let copied = destination
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|()| fs::copy(source, &destination));

        match copied {
            Ok(bytes) => {
                handle.bytes_copied += bytes;
                handle.captured.push(source.to_path_buf());
            }
            Err(e) => {
                warn!("Failed to back up {}: {}", source.display(), e);
                handle.failures.push(BackupFailure {
                    path: source.to_path_buf(),
                    reason: e.to_string(),
                });
            }
        }
    }
}

/// Lock and temp files left by collection writers.
fn is_transient(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("lock") | Some("tmp")
    )
}
