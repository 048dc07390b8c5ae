//! Where the local flat-file store keeps its files.

use crate::config::StoreConfig;
use crate::{Result, WardrobeError};
use std::path::{Component, Path, PathBuf};

/// Local store layout rooted at a data directory:
///
/// ```text
/// <root>/images/metadata.json          items
/// <root>/images/outfit_metadata.json   outfits
/// <root>/images/<category>/<id>.<ext>  item assets
/// <root>/migration_backup/             backup snapshots
/// <root>/migration_report.txt          default report location
/// ```
#[derive(Debug, Clone)]
pub struct LocalLayout {
    root: PathBuf,
}

impl LocalLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn images_dir(&self) -> PathBuf {
        self.root.join(StoreConfig::IMAGES_DIR_NAME)
    }

    pub fn items_path(&self) -> PathBuf {
        self.images_dir().join(StoreConfig::ITEMS_FILE_NAME)
    }

    pub fn outfits_path(&self) -> PathBuf {
        self.images_dir().join(StoreConfig::OUTFITS_FILE_NAME)
    }

    pub fn backup_root(&self) -> PathBuf {
        self.root.join(StoreConfig::BACKUP_DIR_NAME)
    }

    pub fn default_report_path(&self) -> PathBuf {
        self.root.join(StoreConfig::REPORT_FILE_NAME)
    }

    /// Resolve an item's asset reference inside the images directory.
    ///
    /// Absolute references and references escaping the images directory are
    /// rejected so a record can never point the migration at arbitrary files.
    pub fn resolve_asset(&self, asset_ref: &str) -> Result<PathBuf> {
        let trimmed = asset_ref.trim();
        if trimmed.is_empty() {
            return Err(WardrobeError::validation("image", "asset reference is empty"));
        }

        let relative = Path::new(trimmed);
        let escapes = relative.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if escapes {
            return Err(WardrobeError::validation(
                "image",
                format!("asset reference {} leaves the images directory", trimmed),
            ));
        }

        Ok(self.images_dir().join(relative))
    }
}
