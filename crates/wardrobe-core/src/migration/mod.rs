//! Local-to-remote migration.
//!
//! The orchestrator walks `Backup -> MigrateItems -> MigrateOutfits ->
//! Report -> Done`, records every decision in a [`MigrationLog`] and renders
//! the audit report from that log.

mod log;
mod orchestrator;
mod report;
mod state;

pub use log::{LogEntry, LogEvent, LogLevel, MigrationLog};
pub use orchestrator::MigrationOrchestrator;
pub use report::{BackupSummary, EntityCounts, MigrationReport};
pub use state::{MigrationState, RunOutcome};
