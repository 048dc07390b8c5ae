//! SQLite cache of compatibility results keyed by an unordered item pair.

use crate::db;
use crate::models::{CompatibilityResult, PairKey};
use crate::{Result, WardrobeError};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Compatibility result cache.
///
/// Rows are stored once per unordered pair, with `item_a <= item_b` enforced
/// by the table itself. A repeated `put` for the same pair replaces the row,
/// which is how results from an older model version get refreshed.
pub struct CompatibilityCache {
    conn: Arc<Mutex<Connection>>,
}

impl CompatibilityCache {
    /// Open (or create) the cache database at `db_path`.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = db::open_connection(db_path.as_ref())?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(db::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS compatibility_results (
                item_a TEXT NOT NULL,
                item_b TEXT NOT NULL,
                score REAL NOT NULL,
                embedding_a BLOB NOT NULL,
                embedding_b BLOB NOT NULL,
                model_version TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (item_a, item_b),
                CHECK (item_a <= item_b)
            );

            CREATE INDEX IF NOT EXISTS idx_compat_item_b
                ON compatibility_results(item_b);
            "#,
        )
        .map_err(|e| WardrobeError::Database {
            message: format!("Failed to initialize compatibility schema: {}", e),
            source: Some(e),
        })?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Store `result` for the pair `{a, b}`, replacing any earlier result.
    ///
    /// The result's own IDs must name the same pair. Embeddings are swapped
    /// together with the IDs when the pair is canonicalized.
    pub fn put(&self, a: &str, b: &str, result: CompatibilityResult) -> Result<()> {
        let key = PairKey::new(a, b);
        if result.pair_key() != key {
            return Err(WardrobeError::validation(
                "item_a",
                format!("result is for pair {}, not {}", result.pair_key(), key),
            ));
        }
        if !result.score.is_finite() {
            return Err(WardrobeError::validation("score", "score must be finite"));
        }

        let result = result.canonical();
        let conn = db::lock(&self.conn)?;
        conn.execute(
            r#"
            INSERT INTO compatibility_results
            (item_a, item_b, score, embedding_a, embedding_b, model_version, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(item_a, item_b) DO UPDATE SET
                score = excluded.score,
                embedding_a = excluded.embedding_a,
                embedding_b = excluded.embedding_b,
                model_version = excluded.model_version,
                updated_at = excluded.updated_at
            "#,
            params![
                result.item_a,
                result.item_b,
                result.score,
                encode_embedding(&result.embedding_a),
                encode_embedding(&result.embedding_b),
                result.model_version,
                Utc::now().to_rfc3339(),
            ],
        )?;

        debug!("Cached compatibility for {} ({})", key, result.model_version);
        Ok(())
    }

    /// Result for `{a, b}` in canonical orientation, whichever order is asked.
    pub fn get(&self, a: &str, b: &str) -> Result<Option<CompatibilityResult>> {
        let key = PairKey::new(a, b);
        let conn = db::lock(&self.conn)?;
        let result = conn
            .query_row(
                r#"
                SELECT item_a, item_b, score, embedding_a, embedding_b, model_version
                FROM compatibility_results
                WHERE item_a = ?1 AND item_b = ?2
                "#,
                params![key.low(), key.high()],
                row_to_result,
            )
            .optional()?;
        Ok(result)
    }

    /// Like [`get`](Self::get), but only a result scored by `model_version`.
    pub fn get_current(
        &self,
        a: &str,
        b: &str,
        model_version: &str,
    ) -> Result<Option<CompatibilityResult>> {
        Ok(self
            .get(a, b)?
            .filter(|result| result.model_version == model_version))
    }

    /// Drop every cached pair that involves `item_id`. Returns the row count.
    pub fn remove_item(&self, item_id: &str) -> Result<usize> {
        let conn = db::lock(&self.conn)?;
        let removed = conn.execute(
            "DELETE FROM compatibility_results WHERE item_a = ?1 OR item_b = ?1",
            params![item_id],
        )?;
        Ok(removed)
    }

    pub fn len(&self) -> Result<usize> {
        let conn = db::lock(&self.conn)?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM compatibility_results", [], |row| {
                row.get(0)
            })?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

fn row_to_result(row: &Row<'_>) -> rusqlite::Result<CompatibilityResult> {
    Ok(CompatibilityResult {
        item_a: row.get(0)?,
        item_b: row.get(1)?,
        score: row.get(2)?,
        embedding_a: decode_embedding(&row.get::<_, Vec<u8>>(3)?),
        embedding_b: decode_embedding(&row.get::<_, Vec<u8>>(4)?),
        model_version: row.get(5)?,
    })
}

/// Little-endian f32 sequence.
fn encode_embedding(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
