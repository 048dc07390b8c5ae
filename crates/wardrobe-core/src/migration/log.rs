//! Ordered decision log of a migration run.
//!
//! Every decision the orchestrator makes is one typed event. The report is
//! rebuilt from these entries alone, so the log is the audit trail.

use super::state::MigrationState;
use crate::error::ErrorKind;
use crate::gateway::EntityKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LogEvent {
    RunStarted {
        owner_id: String,
        item_count: usize,
        outfit_count: usize,
        concurrency: usize,
    },
    StateEntered {
        state: MigrationState,
    },
    BackupCreated {
        location: PathBuf,
        files: usize,
        bytes: u64,
    },
    BackupIssue {
        path: PathBuf,
        reason: String,
    },
    BackupFailed {
        reason: String,
    },
    BackupDisabled,
    ItemMigrated {
        old_id: String,
        new_id: String,
        asset_path: String,
    },
    ItemSkipped {
        old_id: String,
        kind: ErrorKind,
        reason: String,
    },
    ItemFailed {
        old_id: String,
        kind: ErrorKind,
        reason: String,
    },
    OutfitMigrated {
        old_id: String,
        new_id: String,
        name: String,
        item_count: usize,
    },
    ReferentialGap {
        outfit_id: String,
        missing_item_id: String,
    },
    OutfitSkipped {
        old_id: String,
        kind: ErrorKind,
        reason: String,
    },
    OutfitFailed {
        old_id: String,
        kind: ErrorKind,
        reason: String,
    },
    /// Entity never started because the run was stopped.
    NotAttempted {
        entity: EntityKind,
        old_id: String,
    },
    RunFailed {
        state: MigrationState,
        reason: String,
    },
}

impl LogEvent {
    pub fn level(&self) -> LogLevel {
        match self {
            LogEvent::RunStarted { .. }
            | LogEvent::StateEntered { .. }
            | LogEvent::BackupCreated { .. }
            | LogEvent::ItemMigrated { .. }
            | LogEvent::OutfitMigrated { .. } => LogLevel::Info,
            LogEvent::BackupIssue { .. }
            | LogEvent::BackupFailed { .. }
            | LogEvent::BackupDisabled
            | LogEvent::ItemSkipped { .. }
            | LogEvent::OutfitSkipped { .. }
            | LogEvent::ReferentialGap { .. }
            | LogEvent::NotAttempted { .. } => LogLevel::Warning,
            LogEvent::ItemFailed { .. }
            | LogEvent::OutfitFailed { .. }
            | LogEvent::RunFailed { .. } => LogLevel::Error,
        }
    }
}

impl fmt::Display for LogEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogEvent::RunStarted {
                owner_id,
                item_count,
                outfit_count,
                concurrency,
            } => write!(
                f,
                "Starting migration for owner {}: {} items, {} outfits, concurrency {}",
                owner_id, item_count, outfit_count, concurrency
            ),
            LogEvent::StateEntered { state } => write!(f, "Entering state {}", state),
            LogEvent::BackupCreated {
                location,
                files,
                bytes,
            } => write!(
                f,
                "Backup created at {} ({} files, {} bytes)",
                location.display(),
                files,
                bytes
            ),
            LogEvent::BackupIssue { path, reason } => {
                write!(f, "Backup missed {}: {}", path.display(), reason)
            }
            LogEvent::BackupFailed { reason } => write!(f, "Backup failed: {}", reason),
            LogEvent::BackupDisabled => f.write_str("Backup disabled for this run"),
            LogEvent::ItemMigrated {
                old_id,
                new_id,
                asset_path,
            } => write!(f, "Migrated item {} -> {} ({})", old_id, new_id, asset_path),
            LogEvent::ItemSkipped {
                old_id,
                kind,
                reason,
            } => write!(f, "Skipped item {} [{}]: {}", old_id, kind, reason),
            LogEvent::ItemFailed {
                old_id,
                kind,
                reason,
            } => write!(f, "Failed to migrate item {} [{}]: {}", old_id, kind, reason),
            LogEvent::OutfitMigrated {
                old_id,
                new_id,
                name,
                item_count,
            } => write!(
                f,
                "Migrated outfit {} -> {} ({}, {} items)",
                old_id, new_id, name, item_count
            ),
            LogEvent::ReferentialGap {
                outfit_id,
                missing_item_id,
            } => write!(
                f,
                "Outfit {} references item {} which has no migrated counterpart",
                outfit_id, missing_item_id
            ),
            LogEvent::OutfitSkipped {
                old_id,
                kind,
                reason,
            } => write!(f, "Skipped outfit {} [{}]: {}", old_id, kind, reason),
            LogEvent::OutfitFailed {
                old_id,
                kind,
                reason,
            } => write!(f, "Failed to migrate outfit {} [{}]: {}", old_id, kind, reason),
            LogEvent::NotAttempted { entity, old_id } => {
                write!(f, "Did not attempt {} {}: run stopped", entity, old_id)
            }
            LogEvent::RunFailed { state, reason } => {
                write!(f, "Migration failed in {}: {}", state, reason)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub level: LogLevel,
    #[serde(flatten)]
    pub event: LogEvent,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{:04} {} {:<5} {}",
            self.seq,
            self.at.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            self.level.as_str(),
            self.event
        )
    }
}

/// Append-only event log. Every record is also emitted through `tracing`.
#[derive(Debug, Clone, Default)]
pub struct MigrationLog {
    entries: Vec<LogEntry>,
}

impl MigrationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<LogEntry>) -> Self {
        Self { entries }
    }

    pub fn record(&mut self, event: LogEvent) {
        let level = event.level();
        match level {
            LogLevel::Info => info!("{}", event),
            LogLevel::Warning => warn!("{}", event),
            LogLevel::Error => error!("{}", event),
        }
        self.entries.push(LogEntry {
            seq: self.entries.len() as u64 + 1,
            at: Utc::now(),
            level,
            event,
        });
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
