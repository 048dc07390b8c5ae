//! Audit report rebuilt from a run's log entries.

use super::log::{LogEntry, LogEvent, MigrationLog};
use super::state::{MigrationState, RunOutcome};
use crate::gateway::EntityKind;
use crate::resolver::IdMap;
use crate::store::atomic_write_bytes;
use crate::Result;
use chrono::{DateTime, Utc};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::info;

/// Per-kind tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntityCounts {
    pub total: usize,
    pub migrated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub not_attempted: usize,
}

/// What the backup step did, as recorded in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupSummary {
    NotReached,
    Disabled,
    Created { location: PathBuf, issues: usize },
    Failed { reason: String },
}

/// Everything a reader needs to know about a run.
///
/// Built only from log entries: running [`MigrationReport::from_entries`] over
/// a saved copy of the log reproduces the same report.
#[derive(Debug, Clone)]
pub struct MigrationReport {
    pub owner_id: String,
    pub concurrency: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub backup: BackupSummary,
    pub items: EntityCounts,
    pub outfits: EntityCounts,
    pub item_mapping: IdMap,
    pub outfit_mapping: IdMap,
    pub referential_gaps: usize,
    pub outcome: RunOutcome,
    pub entries: Vec<LogEntry>,
}

impl MigrationReport {
    pub fn from_log(log: &MigrationLog) -> Self {
        Self::from_entries(log.entries())
    }

    pub fn from_entries(entries: &[LogEntry]) -> Self {
        let mut report = MigrationReport {
            owner_id: String::new(),
            concurrency: 0,
            started_at: entries.first().map(|e| e.at),
            finished_at: entries.last().map(|e| e.at),
            backup: BackupSummary::NotReached,
            items: EntityCounts::default(),
            outfits: EntityCounts::default(),
            item_mapping: IdMap::new(),
            outfit_mapping: IdMap::new(),
            referential_gaps: 0,
            outcome: RunOutcome::Completed,
            entries: entries.to_vec(),
        };
        let mut issues = Vec::new();
        let mut failure = None;

        for entry in entries {
            match &entry.event {
                LogEvent::RunStarted {
                    owner_id,
                    item_count,
                    outfit_count,
                    concurrency,
                } => {
                    report.owner_id = owner_id.clone();
                    report.items.total = *item_count;
                    report.outfits.total = *outfit_count;
                    report.concurrency = *concurrency;
                }
                LogEvent::StateEntered { .. } => {}
                LogEvent::BackupCreated { location, .. } => {
                    report.backup = BackupSummary::Created {
                        location: location.clone(),
                        issues: 0,
                    };
                }
                LogEvent::BackupIssue { .. } => {
                    if let BackupSummary::Created { issues: count, .. } = &mut report.backup {
                        *count += 1;
                    }
                    issues.push(entry.event.to_string());
                }
                LogEvent::BackupFailed { reason } => {
                    report.backup = BackupSummary::Failed {
                        reason: reason.clone(),
                    };
                    issues.push(entry.event.to_string());
                }
                LogEvent::BackupDisabled => report.backup = BackupSummary::Disabled,
                LogEvent::ItemMigrated { old_id, new_id, .. } => {
                    report.items.migrated += 1;
                    report.item_mapping.insert(old_id.clone(), new_id.clone());
                }
                LogEvent::ItemSkipped { .. } => {
                    report.items.skipped += 1;
                    issues.push(entry.event.to_string());
                }
                LogEvent::ItemFailed { .. } => {
                    report.items.failed += 1;
                    issues.push(entry.event.to_string());
                }
                LogEvent::OutfitMigrated { old_id, new_id, .. } => {
                    report.outfits.migrated += 1;
                    report.outfit_mapping.insert(old_id.clone(), new_id.clone());
                }
                LogEvent::ReferentialGap { .. } => {
                    report.referential_gaps += 1;
                    issues.push(entry.event.to_string());
                }
                LogEvent::OutfitSkipped { .. } => {
                    report.outfits.skipped += 1;
                    issues.push(entry.event.to_string());
                }
                LogEvent::OutfitFailed { .. } => {
                    report.outfits.failed += 1;
                    issues.push(entry.event.to_string());
                }
                LogEvent::NotAttempted { entity, .. } => match entity {
                    EntityKind::Item => report.items.not_attempted += 1,
                    EntityKind::Outfit => report.outfits.not_attempted += 1,
                },
                LogEvent::RunFailed { state, reason } => {
                    failure = Some(RunOutcome::Failed {
                        state: *state,
                        reason: reason.clone(),
                    });
                }
            }
        }

        report.outcome = match failure {
            Some(failed) => failed,
            None if issues.is_empty() => RunOutcome::Completed,
            None => RunOutcome::Partial { issues },
        };
        report
    }

    /// State the run ended in.
    pub fn final_state(&self) -> MigrationState {
        self.outcome.final_state()
    }

    /// Plain-text report: header, ID mapping, then the chronological log.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let timestamp = |at: Option<DateTime<Utc>>| {
            at.map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "-".to_string())
        };

        let _ = writeln!(out, "=== WARDROBE MIGRATION REPORT ===");
        let _ = writeln!(out, "Owner ID: {}", self.owner_id);
        let _ = writeln!(out, "Started: {}", timestamp(self.started_at));
        let _ = writeln!(out, "Finished: {}", timestamp(self.finished_at));
        let _ = writeln!(out, "Concurrency: {}", self.concurrency);
        let backup = match &self.backup {
            BackupSummary::NotReached => "not reached".to_string(),
            BackupSummary::Disabled => "disabled".to_string(),
            BackupSummary::Created { location, issues: 0 } => location.display().to_string(),
            BackupSummary::Created { location, issues } => {
                format!("{} ({} artifacts missed)", location.display(), issues)
            }
            BackupSummary::Failed { reason } => format!("failed: {}", reason),
        };
        let _ = writeln!(out, "Backup: {}", backup);
        let _ = writeln!(out, "Outcome: {}", self.outcome);
        let _ = writeln!(out);
        write_counts(&mut out, "Items", &self.items);
        write_counts(&mut out, "Outfits", &self.outfits);
        let _ = writeln!(out, "Referential gaps: {}", self.referential_gaps);
        let _ = writeln!(out);

        let _ = writeln!(out, "=== ID MAPPING ===");
        let _ = writeln!(out, "[items]");
        for (old_id, new_id) in self.item_mapping.iter() {
            let _ = writeln!(out, "{} -> {}", old_id, new_id);
        }
        let _ = writeln!(out, "[outfits]");
        for (old_id, new_id) in self.outfit_mapping.iter() {
            let _ = writeln!(out, "{} -> {}", old_id, new_id);
        }
        let _ = writeln!(out);

        let _ = writeln!(out, "=== MIGRATION LOG ===");
        for entry in &self.entries {
            let _ = writeln!(out, "{}", entry);
        }
        out
    }

    /// Atomically write the rendered report to `path`.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        atomic_write_bytes(path, self.render().as_bytes(), false)?;
        info!("Migration report saved to {}", path.display());
        Ok(())
    }
}

fn write_counts(out: &mut String, label: &str, counts: &EntityCounts) {
    let _ = writeln!(
        out,
        "{}: {} migrated, {} skipped, {} failed, {} not attempted (of {})",
        label, counts.migrated, counts.skipped, counts.failed, counts.not_attempted, counts.total
    );
}
