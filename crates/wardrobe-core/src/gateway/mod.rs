//! Remote persistence capability used by the migration and scoring paths.
//!
//! Two implementations ship with the library:
//! - `SqliteGateway`: relational tables plus an asset directory
//! - `HttpGateway`: REST row/object service over HTTP

mod http;
mod retry;
mod sqlite;
mod upload;

pub use http::HttpGateway;
pub use retry::{retry_remote, RetryConfig};
pub use sqlite::SqliteGateway;
pub use upload::{content_type_for, FileUpload, MemoryUpload, UploadSource};

use crate::config::NetworkConfig;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Field map of a remote entity. Returned maps always carry `id`.
pub type EntityFields = serde_json::Map<String, serde_json::Value>;

/// Entity kinds the remote store persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Item,
    Outfit,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Item => "item",
            EntityKind::Outfit => "outfit",
        }
    }

    /// Remote table name.
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Item => NetworkConfig::ITEMS_TABLE,
            EntityKind::Outfit => NetworkConfig::OUTFITS_TABLE,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Location of an uploaded asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredAsset {
    /// Object path inside the remote store, used for downloads and deletes.
    pub path: String,
    pub public_url: String,
}

/// Persists entities and binary assets remotely.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Cheap reachability check. An error here means the backend cannot be
    /// used at all.
    async fn ping(&self) -> Result<()>;

    /// Store an asset at `<destination_hint>/<upload name>`, both made
    /// path-safe. An object already at that path is replaced, so uploading
    /// the same name twice leaves one object.
    async fn upload_asset(
        &self,
        upload: &dyn UploadSource,
        destination_hint: &str,
    ) -> Result<StoredAsset>;

    async fn download_asset(&self, path: &str) -> Result<Vec<u8>>;

    /// Insert a new entity and return it with its assigned `id`.
    ///
    /// Outfit fields carry `item_ids`, which become ordered join rows.
    async fn insert_entity(&self, kind: EntityKind, fields: EntityFields) -> Result<EntityFields>;

    async fn get_entity(&self, kind: EntityKind, id: &str) -> Result<Option<EntityFields>>;

    /// Delete an entity and the join rows that depend on it.
    async fn delete_entity(&self, kind: EntityKind, id: &str) -> Result<bool>;

    /// Items owned by `owner_id`, newest first, optionally of one category.
    async fn query_by_owner_and_category(
        &self,
        owner_id: &str,
        category: Option<&str>,
    ) -> Result<Vec<EntityFields>>;
}

/// `<hint>/<name>.<ext>` with every segment made path-safe. The extension
/// is lowercased (default `jpg`); a name with no usable stem gets a UUID.
pub(crate) fn asset_object_path(destination_hint: &str, file_name: &str) -> String {
    let name = std::path::Path::new(file_name);
    let ext = name
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_else(|| "jpg".to_string());
    let stem = name
        .file_stem()
        .and_then(|s| s.to_str())
        .map(|s| sanitize_segment(&s.replace('/', "-")))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let mut segments: Vec<String> = destination_hint
        .split('/')
        .map(sanitize_segment)
        .filter(|s| !s.is_empty())
        .collect();
    segments.push(format!("{}.{}", stem, ext));
    segments.join("/")
}

fn sanitize_segment(segment: &str) -> String {
    let cleaned: String = segment
        .trim()
        .chars()
        .map(|c| match c {
            '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '-',
            c if c.is_control() => '-',
            c => c,
        })
        .collect();
    if cleaned == "." || cleaned == ".." {
        String::new()
    } else {
        cleaned
    }
}

/// Required string field of an entity map.
pub(crate) fn required_str<'a>(fields: &'a EntityFields, key: &str) -> Result<&'a str> {
    fields
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| crate::WardrobeError::validation(key, "required field is missing"))
}
