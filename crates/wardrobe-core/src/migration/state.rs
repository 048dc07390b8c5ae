use serde::{Deserialize, Serialize};
use std::fmt;

/// Migration state machine:
/// `Backup -> MigrateItems -> MigrateOutfits -> Report -> Done`, with
/// `Failed` reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MigrationState {
    Backup,
    MigrateItems,
    MigrateOutfits,
    Report,
    Done,
    Failed,
}

impl MigrationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationState::Backup => "Backup",
            MigrationState::MigrateItems => "MigrateItems",
            MigrationState::MigrateOutfits => "MigrateOutfits",
            MigrationState::Report => "Report",
            MigrationState::Done => "Done",
            MigrationState::Failed => "Failed",
        }
    }

    /// Next state on the success path.
    pub fn next(&self) -> Option<MigrationState> {
        match self {
            MigrationState::Backup => Some(MigrationState::MigrateItems),
            MigrationState::MigrateItems => Some(MigrationState::MigrateOutfits),
            MigrationState::MigrateOutfits => Some(MigrationState::Report),
            MigrationState::Report => Some(MigrationState::Done),
            MigrationState::Done | MigrationState::Failed => None,
        }
    }
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overall outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every entity migrated with no warnings.
    Completed,
    /// The run finished, with the listed skips, failures and warnings.
    Partial { issues: Vec<String> },
    /// The run stopped early in `state`.
    Failed {
        state: MigrationState,
        reason: String,
    },
}

impl RunOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::Completed => "fully succeeded",
            RunOutcome::Partial { .. } => "partially succeeded",
            RunOutcome::Failed { .. } => "failed",
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, RunOutcome::Failed { .. })
    }

    /// Terminal state the run ended in.
    pub fn final_state(&self) -> MigrationState {
        match self {
            RunOutcome::Failed { .. } => MigrationState::Failed,
            _ => MigrationState::Done,
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Completed => f.write_str(self.label()),
            RunOutcome::Partial { issues } => {
                write!(f, "{} ({} issues)", self.label(), issues.len())
            }
            RunOutcome::Failed { state, reason } => {
                write!(f, "{} in {}: {}", self.label(), state, reason)
            }
        }
    }
}
