//! Centralized configuration for the wardrobe library.
//!
//! Constants for the local file layout, migration defaults, the remote
//! service and compatibility scoring, plus the handful of settings read from
//! the environment at process start.

use crate::{Result, WardrobeError};
use std::path::PathBuf;
use std::time::Duration;

/// Local flat-file layout.
pub struct StoreConfig;

impl StoreConfig {
    pub const IMAGES_DIR_NAME: &'static str = "images";
    pub const ITEMS_FILE_NAME: &'static str = "metadata.json";
    pub const OUTFITS_FILE_NAME: &'static str = "outfit_metadata.json";
    pub const BACKUP_DIR_NAME: &'static str = "migration_backup";
    pub const REPORT_FILE_NAME: &'static str = "migration_report.txt";
    pub const LOCK_SUFFIX: &'static str = "lock";
    pub const BACKUP_SUFFIX: &'static str = "bak";
}

/// Migration run defaults.
pub struct MigrationConfig;

impl MigrationConfig {
    pub const DEFAULT_CONCURRENCY: usize = 4;
    pub const MAX_CONCURRENCY: usize = 32;
    pub const FALLBACK_OUTFIT_NAME_PREFIX: &'static str = "Migrated Outfit";
    pub const FALLBACK_NAME_ID_CHARS: usize = 8;
}

/// Remote service configuration.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    pub const PING_TIMEOUT: Duration = Duration::from_secs(5);
    pub const MAX_RETRIES: u32 = 3;
    pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);
    pub const ASSET_BUCKET: &'static str = "clothing-images";
    pub const USER_AGENT: &'static str = "wardrobe-core/0.3";
    pub const ITEMS_TABLE: &'static str = "clothing_items";
    pub const OUTFITS_TABLE: &'static str = "outfits";
    pub const OUTFIT_ITEMS_TABLE: &'static str = "outfit_items";
}

/// Compatibility scoring configuration.
pub struct CompatibilityConfig;

impl CompatibilityConfig {
    /// Expected length of each embedding a model returns.
    pub const EMBEDDING_LEN: usize = 128;
}

/// Connection settings for the hosted remote backend.
#[derive(Debug, Clone)]
pub struct RemoteSettings {
    pub base_url: String,
    pub api_key: String,
}

impl RemoteSettings {
    pub const URL_ENV: &'static str = "WARDROBE_REMOTE_URL";
    pub const KEY_ENV: &'static str = "WARDROBE_REMOTE_KEY";

    /// Read settings from `WARDROBE_REMOTE_URL` and `WARDROBE_REMOTE_KEY`.
    pub fn from_env() -> Result<Self> {
        let base_url = read_env(Self::URL_ENV)?;
        let api_key = read_env(Self::KEY_ENV)?;
        Ok(Self { base_url, api_key })
    }
}

fn read_env(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(WardrobeError::Config {
            message: format!("Missing environment variable {}", name),
        }),
    }
}

/// Options for one migration run.
#[derive(Debug, Clone)]
pub struct MigrationOptions {
    /// Owner recorded on every remote entity.
    pub owner_id: String,
    /// Maximum number of items migrated at the same time.
    pub concurrency: usize,
    pub create_backup: bool,
    /// Abort the run when the pre-migration backup fails.
    pub require_backup: bool,
    pub report_path: PathBuf,
}

impl MigrationOptions {
    pub fn new(owner_id: impl Into<String>, report_path: impl Into<PathBuf>) -> Self {
        Self {
            owner_id: owner_id.into(),
            concurrency: MigrationConfig::DEFAULT_CONCURRENCY,
            create_backup: true,
            require_backup: false,
            report_path: report_path.into(),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.clamp(1, MigrationConfig::MAX_CONCURRENCY);
        self
    }

    pub fn with_backup(mut self, create_backup: bool) -> Self {
        self.create_backup = create_backup;
        self
    }

    pub fn with_required_backup(mut self, require_backup: bool) -> Self {
        self.require_backup = require_backup;
        self
    }

    /// Reject options that cannot produce a meaningful run.
    pub fn validate(&self) -> Result<()> {
        if self.owner_id.trim().is_empty() {
            return Err(WardrobeError::validation("owner_id", "must not be empty"));
        }
        if self.require_backup && !self.create_backup {
            return Err(WardrobeError::Config {
                message: "require_backup is set but backups are disabled".to_string(),
            });
        }
        Ok(())
    }
}
