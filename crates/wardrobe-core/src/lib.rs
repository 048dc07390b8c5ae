//! Wardrobe Core - persistence and migration library for wardrobe items,
//! outfits and pairwise compatibility results.
//!
//! The crate covers:
//! - A generic record store over JSON-file or SQLite backends
//! - Remote gateways (SQLite tables or a hosted REST service)
//! - The migration orchestrator that moves a local store to a remote one
//! - A SQLite cache of compatibility scores keyed by unordered item pairs
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use wardrobe_core::{LocalLayout, MigrationOptions, MigrationOrchestrator, SqliteGateway};
//!
//! #[tokio::main]
//! async fn main() -> wardrobe_core::Result<()> {
//!     let layout = LocalLayout::new("/path/to/backend");
//!     let gateway = Arc::new(SqliteGateway::open("remote.db", "remote-assets")?);
//!     let options = MigrationOptions::new("user-1", layout.default_report_path());
//!
//!     let report = MigrationOrchestrator::new(gateway, layout, options).run().await?;
//!     println!("{}", report.outcome);
//!     Ok(())
//! }
//! ```

pub mod backup;
pub mod cache;
pub mod cancel;
pub mod config;
pub mod error;
pub mod gateway;
pub mod migration;
pub mod models;
pub mod resolver;
pub mod store;
pub mod wardrobe;

mod db;

// Re-export commonly used types
pub use backup::{BackupHandle, BackupManager};
pub use cache::{CompatibilityCache, CompatibilityModel, CompatibilityScorer, PairPrediction};
pub use cancel::CancellationToken;
pub use config::{MigrationOptions, RemoteSettings};
pub use error::{ErrorKind, Result, WardrobeError};
pub use gateway::{
    EntityFields, EntityKind, FileUpload, HttpGateway, MemoryUpload, RemoteGateway, SqliteGateway,
    StoredAsset, UploadSource,
};
pub use migration::{MigrationOrchestrator, MigrationReport, MigrationState, RunOutcome};
pub use models::{CompatibilityResult, Item, Outfit, PairKey, Record};
pub use resolver::{IdMap, ReferenceResolver, Resolution, ResolutionVerdict};
pub use store::{LocalLayout, MetadataStore};
pub use wardrobe::{LocalWardrobe, OutfitView};
