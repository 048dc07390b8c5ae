//! Relational remote store on SQLite, with assets kept in a directory.

use super::{asset_object_path, required_str, EntityFields, EntityKind, RemoteGateway, StoredAsset, UploadSource};
use crate::db;
use crate::store::atomic_write_bytes;
use crate::{Result, WardrobeError};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use url::Url;

/// Remote store with the hosted service's table shape:
/// `clothing_items`, `outfits` and the ordered `outfit_items` join table.
///
/// Inserts carrying an `idempotency_key` that was already seen return the
/// existing row instead of creating a duplicate.
pub struct SqliteGateway {
    conn: Arc<Mutex<Connection>>,
    asset_root: PathBuf,
}

impl SqliteGateway {
    /// Open the database at `db_path`, storing assets under `asset_root`.
    pub fn open(db_path: impl AsRef<Path>, asset_root: impl AsRef<Path>) -> Result<Self> {
        let conn = db::open_connection(db_path.as_ref())?;
        Self::with_connection(conn, asset_root.as_ref())
    }

    pub fn in_memory(asset_root: impl AsRef<Path>) -> Result<Self> {
        Self::with_connection(db::open_in_memory()?, asset_root.as_ref())
    }

    fn with_connection(conn: Connection, asset_root: &Path) -> Result<Self> {
        std::fs::create_dir_all(asset_root)
            .map_err(|e| WardrobeError::io_with_path(e, asset_root))?;
        let asset_root = asset_root
            .canonicalize()
            .map_err(|e| WardrobeError::io_with_path(e, asset_root))?;

        Self::ensure_schema(&conn)?;
        info!("Opened SQLite gateway, assets in {}", asset_root.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            asset_root,
        })
    }

    fn ensure_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS clothing_items (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                category TEXT NOT NULL,
                image_path TEXT,
                image_url TEXT,
                idempotency_key TEXT UNIQUE,
                fields_json TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_items_owner_category
                ON clothing_items(user_id, category);

            CREATE TABLE IF NOT EXISTS outfits (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                idempotency_key TEXT UNIQUE,
                fields_json TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS outfit_items (
                outfit_id TEXT NOT NULL REFERENCES outfits(id) ON DELETE CASCADE,
                clothing_item_id TEXT NOT NULL REFERENCES clothing_items(id) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                PRIMARY KEY (outfit_id, position)
            );

            CREATE INDEX IF NOT EXISTS idx_outfit_items_item
                ON outfit_items(clothing_item_id);
            "#,
        )?;
        Ok(())
    }

    pub fn asset_root(&self) -> &Path {
        &self.asset_root
    }

    /// Number of stored entities of `kind`.
    pub fn count(&self, kind: EntityKind) -> Result<usize> {
        let conn = db::lock(&self.conn)?;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", kind.table()),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn asset_path(&self, object_path: &str) -> Result<PathBuf> {
        let relative = Path::new(object_path);
        let safe = !object_path.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(WardrobeError::validation(
                "path",
                format!("invalid asset path {}", object_path),
            ));
        }
        Ok(self.asset_root.join(relative))
    }

    fn existing_by_key(conn: &Connection, kind: EntityKind, key: &str) -> Result<Option<String>> {
        let id = conn
            .query_row(
                &format!("SELECT id FROM {} WHERE idempotency_key = ?1", kind.table()),
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(id)
    }

    fn insert_item(conn: &Connection, mut fields: EntityFields) -> Result<EntityFields> {
        let owner = required_str(&fields, "user_id")?.to_string();
        let category = required_str(&fields, "category")?.to_string();
        let key = optional_str(&fields, "idempotency_key");

        if let Some(key) = key.as_deref() {
            if let Some(existing) = Self::existing_by_key(conn, EntityKind::Item, key)? {
                debug!("Item with idempotency key {} already stored as {}", key, existing);
                return Self::load_item(conn, &existing)?
                    .ok_or_else(|| WardrobeError::not_found("item", existing));
            }
        }

        fields.remove("id");
        fields.remove("created_at");
        let id = uuid::Uuid::new_v4().to_string();
        let created_at = Utc::now().to_rfc3339();

        conn.execute(
            r#"
            INSERT INTO clothing_items
            (id, user_id, category, image_path, image_url, idempotency_key, fields_json, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                id,
                owner,
                category,
                optional_str(&fields, "image_path"),
                optional_str(&fields, "image_url"),
                key,
                serde_json::to_string(&fields)?,
                created_at
            ],
        )?;

        Self::load_item(conn, &id)?.ok_or_else(|| WardrobeError::not_found("item", id))
    }

    fn insert_outfit(conn: &mut Connection, mut fields: EntityFields) -> Result<EntityFields> {
        let owner = required_str(&fields, "user_id")?.to_string();
        let name = optional_str(&fields, "name").unwrap_or_default();
        let key = optional_str(&fields, "idempotency_key");
        let item_ids = match fields.remove("item_ids") {
            None => Vec::new(),
            Some(Value::Array(values)) => values
                .into_iter()
                .map(|v| match v {
                    Value::String(s) => Ok(s),
                    _ => Err(WardrobeError::validation("item_ids", "item IDs must be strings")),
                })
                .collect::<Result<Vec<_>>>()?,
            Some(_) => {
                return Err(WardrobeError::validation("item_ids", "must be a sequence"));
            }
        };

        if let Some(key) = key.as_deref() {
            if let Some(existing) = Self::existing_by_key(conn, EntityKind::Outfit, key)? {
                debug!("Outfit with idempotency key {} already stored as {}", key, existing);
                return Self::load_outfit(conn, &existing)?
                    .ok_or_else(|| WardrobeError::not_found("outfit", existing));
            }
        }

        fields.remove("id");
        fields.remove("created_at");
        let id = uuid::Uuid::new_v4().to_string();
        let created_at = Utc::now().to_rfc3339();

        let tx = conn.transaction()?;
        for item_id in &item_ids {
            let item_owner: Option<String> = tx
                .query_row(
                    "SELECT user_id FROM clothing_items WHERE id = ?1",
                    params![item_id],
                    |row| row.get(0),
                )
                .optional()?;
            if item_owner.as_deref() != Some(owner.as_str()) {
                return Err(WardrobeError::upstream(
                    "insert outfit",
                    format!("item {} not found or not owned by {}", item_id, owner),
                ));
            }
        }

        tx.execute(
            r#"
            INSERT INTO outfits (id, user_id, name, idempotency_key, fields_json, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                id,
                owner,
                name,
                key,
                serde_json::to_string(&fields)?,
                created_at
            ],
        )?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO outfit_items (outfit_id, clothing_item_id, position) VALUES (?1, ?2, ?3)",
            )?;
            for (position, item_id) in item_ids.iter().enumerate() {
                insert.execute(params![id, item_id, position as i64])?;
            }
        }
        tx.commit()?;

        Self::load_outfit(conn, &id)?.ok_or_else(|| WardrobeError::not_found("outfit", id))
    }

    fn load_item(conn: &Connection, id: &str) -> Result<Option<EntityFields>> {
        let row = conn
            .query_row(
                "SELECT fields_json, created_at FROM clothing_items WHERE id = ?1",
                params![id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        row.map(|(fields_json, created_at)| row_to_fields(id, &fields_json, created_at))
            .transpose()
    }

    fn load_outfit(conn: &Connection, id: &str) -> Result<Option<EntityFields>> {
        let row = conn
            .query_row(
                "SELECT fields_json, created_at FROM outfits WHERE id = ?1",
                params![id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        let Some((fields_json, created_at)) = row else {
            return Ok(None);
        };

        let mut fields = row_to_fields(id, &fields_json, created_at)?;
        let mut stmt = conn.prepare(
            "SELECT clothing_item_id FROM outfit_items WHERE outfit_id = ?1 ORDER BY position",
        )?;
        let item_ids = stmt
            .query_map(params![id], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        fields.insert(
            "item_ids".to_string(),
            Value::Array(item_ids.into_iter().map(Value::String).collect()),
        );
        Ok(Some(fields))
    }
}

#[async_trait]
impl RemoteGateway for SqliteGateway {
    async fn ping(&self) -> Result<()> {
        let conn = db::lock(&self.conn)?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(|e| WardrobeError::RemoteUnreachable {
                message: e.to_string(),
            })?;
        Ok(())
    }

    async fn upload_asset(
        &self,
        upload: &dyn UploadSource,
        destination_hint: &str,
    ) -> Result<StoredAsset> {
        let bytes = upload.read()?;
        let object_path = asset_object_path(destination_hint, upload.name());
        let full_path = self.asset_path(&object_path)?;

        atomic_write_bytes(&full_path, &bytes, false)
            .map_err(|e| WardrobeError::upstream("upload_asset", e.to_string()))?;

        let public_url = Url::from_file_path(&full_path)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| full_path.display().to_string());
        debug!("Stored asset {} ({} bytes)", object_path, bytes.len());

        Ok(StoredAsset {
            path: object_path,
            public_url,
        })
    }

    async fn download_asset(&self, path: &str) -> Result<Vec<u8>> {
        let full_path = self.asset_path(path)?;
        match std::fs::read(&full_path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(WardrobeError::not_found("asset", path))
            }
            Err(e) => Err(WardrobeError::upstream("download_asset", e.to_string())),
        }
    }

    async fn insert_entity(&self, kind: EntityKind, fields: EntityFields) -> Result<EntityFields> {
        let mut conn = db::lock(&self.conn)?;
        match kind {
            EntityKind::Item => Self::insert_item(&conn, fields),
            EntityKind::Outfit => Self::insert_outfit(&mut conn, fields),
        }
    }

    async fn get_entity(&self, kind: EntityKind, id: &str) -> Result<Option<EntityFields>> {
        let conn = db::lock(&self.conn)?;
        match kind {
            EntityKind::Item => Self::load_item(&conn, id),
            EntityKind::Outfit => Self::load_outfit(&conn, id),
        }
    }

    async fn delete_entity(&self, kind: EntityKind, id: &str) -> Result<bool> {
        let image_path = {
            let mut conn = db::lock(&self.conn)?;
            match kind {
                EntityKind::Outfit => {
                    let tx = conn.transaction()?;
                    tx.execute("DELETE FROM outfit_items WHERE outfit_id = ?1", params![id])?;
                    let deleted = tx.execute("DELETE FROM outfits WHERE id = ?1", params![id])?;
                    tx.commit()?;
                    return Ok(deleted > 0);
                }
                EntityKind::Item => {
                    let image_path: Option<Option<String>> = conn
                        .query_row(
                            "SELECT image_path FROM clothing_items WHERE id = ?1",
                            params![id],
                            |row| row.get(0),
                        )
                        .optional()?;
                    let Some(image_path) = image_path else {
                        return Ok(false);
                    };

                    let tx = conn.transaction()?;
                    tx.execute(
                        "DELETE FROM outfit_items WHERE clothing_item_id = ?1",
                        params![id],
                    )?;
                    tx.execute("DELETE FROM clothing_items WHERE id = ?1", params![id])?;
                    tx.commit()?;
                    image_path
                }
            }
        };

        if let Some(path) = image_path {
            match self.asset_path(&path).and_then(|p| {
                std::fs::remove_file(&p).map_err(|e| WardrobeError::io_with_path(e, p))
            }) {
                Ok(()) => debug!("Removed asset {}", path),
                Err(e) => warn!("Failed to delete asset {} for item {}: {}", path, id, e),
            }
        }
        Ok(true)
    }

    async fn query_by_owner_and_category(
        &self,
        owner_id: &str,
        category: Option<&str>,
    ) -> Result<Vec<EntityFields>> {
        let conn = db::lock(&self.conn)?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, fields_json, created_at FROM clothing_items
            WHERE user_id = ?1 AND (?2 IS NULL OR category = ?2)
            ORDER BY created_at DESC, rowid DESC
            "#,
        )?;
        let rows = stmt
            .query_map(params![owner_id, category], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(id, fields_json, created_at)| row_to_fields(&id, &fields_json, created_at))
            .collect()
    }
}

fn optional_str(fields: &EntityFields, key: &str) -> Option<String> {
    fields
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn row_to_fields(id: &str, fields_json: &str, created_at: String) -> Result<EntityFields> {
    let mut fields: EntityFields = serde_json::from_str(fields_json)?;
    fields.insert("id".to_string(), Value::String(id.to_string()));
    fields.insert("created_at".to_string(), Value::String(created_at));
    Ok(fields)
}
