//! Record persistence.
//!
//! This module provides:
//! - Atomic JSON file operations
//! - Interchangeable collection backends (JSON file, SQLite)
//! - The generic `MetadataStore` with its query helpers
//! - The local flat-file layout

mod atomic;
mod backend;
mod collection;
mod layout;
mod sqlite;

pub use atomic::{atomic_read_json, atomic_write_bytes, atomic_write_json};
pub use backend::{CollectionBackend, JsonFileBackend};
pub use collection::{LoadedRecord, MetadataStore};
pub use layout::LocalLayout;
pub use sqlite::SqliteBackend;
