//! Restore requests, per-component outcomes and background restore jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn yes() -> bool {
    true
}

/// Which sections of an archive to re-apply. Every flag defaults to true.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreFlags {
    #[serde(default = "yes")]
    pub restore_files: bool,
    #[serde(default = "yes")]
    pub restore_databases: bool,
    #[serde(default = "yes")]
    pub restore_emails: bool,
}

impl Default for RestoreFlags {
    fn default() -> Self {
        Self {
            restore_files: true,
            restore_databases: true,
            restore_emails: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RestoreRequest {
    pub path: String,
    pub account_id: Uuid,
    #[serde(flatten)]
    pub flags: RestoreFlags,
}

/// Outcome of one restore component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "message", rename_all = "snake_case")]
pub enum StepOutcome {
    /// The flag for this component was off.
    Skipped,
    /// The archive has no section for this component.
    NotPresent,
    Restored,
    Failed(String),
}

impl StepOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, StepOutcome::Failed(_))
    }
}

/// A database dump that could not be applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseFailure {
    pub database: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    pub files: StepOutcome,
    pub databases: StepOutcome,
    pub emails: StepOutcome,
    /// Databases restored successfully.
    pub restored_databases: Vec<String>,
    pub database_failures: Vec<DatabaseFailure>,
}

impl RestoreReport {
    pub fn has_failures(&self) -> bool {
        self.files.is_failed() || self.databases.is_failed() || self.emails.is_failed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreJobState {
    Pending,
    Running,
    Finished,
    Failed,
}

/// A restore running in the background, polled by the admin UI.
#[derive(Debug, Clone, Serialize)]
pub struct RestoreJob {
    pub id: Uuid,
    pub archive_path: String,
    pub account_id: Uuid,
    pub flags: RestoreFlags,
    pub state: RestoreJobState,
    pub report: Option<RestoreReport>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}
