//! Relational collection backend.

use super::backend::CollectionBackend;
use crate::db;
use crate::Result;
use rusqlite::{params, Connection};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Stores each collection as ordered rows of `collection_records`.
///
/// Several backends (one per collection) may share one connection.
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
    collection: String,
}

impl SqliteBackend {
    /// Open the database at `db_path` and bind to `collection`.
    pub fn open(db_path: impl AsRef<Path>, collection: impl Into<String>) -> Result<Self> {
        let conn = db::open_connection(db_path.as_ref())?;
        Self::with_connection(Arc::new(Mutex::new(conn)), collection)
    }

    pub fn in_memory(collection: impl Into<String>) -> Result<Self> {
        Self::with_connection(Arc::new(Mutex::new(db::open_in_memory()?)), collection)
    }

    /// Bind to `collection` on an existing shared connection.
    pub fn with_connection(
        conn: Arc<Mutex<Connection>>,
        collection: impl Into<String>,
    ) -> Result<Self> {
        {
            let guard = db::lock(&conn)?;
            Self::ensure_schema(&guard)?;
        }
        Ok(Self {
            conn,
            collection: collection.into(),
        })
    }

    fn ensure_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS collection_records (
                collection TEXT NOT NULL,
                position INTEGER NOT NULL,
                id TEXT,
                body TEXT NOT NULL,
                PRIMARY KEY (collection, position)
            );

            CREATE INDEX IF NOT EXISTS idx_collection_records_id
                ON collection_records(collection, id);
            "#,
        )?;
        Ok(())
    }
}

impl CollectionBackend for SqliteBackend {
    fn load_raw(&self) -> Result<Vec<Value>> {
        let conn = db::lock(&self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT position, body FROM collection_records WHERE collection = ?1 ORDER BY position",
        )?;
        let rows = stmt.query_map(params![self.collection], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (position, body) = row?;
            match serde_json::from_str(&body) {
                Ok(value) => records.push(value),
                Err(e) => warn!(
                    "Skipping unparsable row {} in collection {}: {}",
                    position, self.collection, e
                ),
            }
        }
        Ok(records)
    }

    fn save_raw(&self, records: &[Value]) -> Result<()> {
        let mut conn = db::lock(&self.conn)?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM collection_records WHERE collection = ?1",
            params![self.collection],
        )?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO collection_records (collection, position, id, body) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (position, record) in records.iter().enumerate() {
                let id = record.get("id").and_then(Value::as_str);
                let body = serde_json::to_string(record)?;
                insert.execute(params![self.collection, position as i64, id, body])?;
            }
        }
        tx.commit()?;

        debug!(
            "Saved {} records to collection {}",
            records.len(),
            self.collection
        );
        Ok(())
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.collection)
    }
}
