//! Shared SQLite connection helpers.

use crate::{Result, WardrobeError};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Open (or create) a database file with the pragmas every store uses.
pub(crate) fn open_connection(db_path: &Path) -> Result<Connection> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| WardrobeError::Io {
                message: format!("Failed to create directory {}", parent.display()),
                path: Some(parent.to_path_buf()),
                source: Some(e),
            })?;
        }
    }

    let conn = Connection::open(db_path).map_err(|e| WardrobeError::Database {
        message: format!("Failed to open database {}: {}", db_path.display(), e),
        source: Some(e),
    })?;
    configure_connection(&conn)?;
    Ok(conn)
}

/// In-memory database, used by tests and throwaway runs.
pub(crate) fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode=WAL;
        PRAGMA busy_timeout=30000;
        PRAGMA synchronous=NORMAL;
        PRAGMA foreign_keys=ON;
        ",
    )
    .map_err(|e| WardrobeError::Database {
        message: format!("Failed to set pragmas: {}", e),
        source: Some(e),
    })
}

pub(crate) fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    conn.lock().map_err(|e| WardrobeError::Database {
        message: format!("Failed to lock database: {}", e),
        source: None,
    })
}
