//! Execution history and aggregate statistics.

use crate::models::archive::ArchiveRecord;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum RunStatus {
    /// Archive created and every unit of work succeeded.
    Success,
    /// Archive created, but something was skipped or failed along the way.
    Warning,
    /// No archive was produced.
    Failed,
}

impl RunStatus {
    /// Render the `last_status` text stored on the schedule.
    pub fn status_line(&self, message: &str) -> String {
        match self {
            RunStatus::Success => "success".to_string(),
            RunStatus::Warning => format!("warning: {message}"),
            RunStatus::Failed => format!("failed: {message}"),
        }
    }
}

/// One execution attempt of a schedule.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct BackupRun {
    pub id: Uuid,
    pub schedule_id: Uuid,
    pub owner: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    pub message: Option<String>,
    pub archive_id: Option<Uuid>,
}

/// Result of one execution that produced an archive.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub schedule_id: Uuid,
    pub status: RunStatus,
    /// The `last_status` text written to the schedule.
    pub last_status: String,
    pub archive: ArchiveRecord,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupStats {
    pub archive_count: i64,
    pub archive_total_bytes: i64,
    pub enabled_schedules: i64,
    pub disabled_schedules: i64,
    pub system_schedules: i64,
    pub recent_successes: Vec<BackupRun>,
    pub recent_failures: Vec<BackupRun>,
}
