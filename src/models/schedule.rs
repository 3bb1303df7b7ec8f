//! Recurring backup job definitions.

use crate::errors::{BackupError, BackupResult};
use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Owner label used for system-wide schedules and their archives.
pub const SYSTEM_OWNER: &str = "system";

/// What content a backup run collects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum JobType {
    Full,
    FilesOnly,
    DatabasesOnly,
    EmailsOnly,
}

impl JobType {
    pub const ALL: [JobType; 4] = [
        JobType::Full,
        JobType::FilesOnly,
        JobType::DatabasesOnly,
        JobType::EmailsOnly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Full => "full",
            JobType::FilesOnly => "files_only",
            JobType::DatabasesOnly => "databases_only",
            JobType::EmailsOnly => "emails_only",
        }
    }

    pub fn includes_files(&self) -> bool {
        matches!(self, JobType::Full | JobType::FilesOnly)
    }

    pub fn includes_databases(&self) -> bool {
        matches!(self, JobType::Full | JobType::DatabasesOnly)
    }

    pub fn includes_emails(&self) -> bool {
        matches!(self, JobType::Full | JobType::EmailsOnly)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
}

/// Where a finished archive is copied after packaging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Destination {
    Local,
    Remote {
        host: String,
        user: String,
        path: String,
        #[serde(default = "default_ssh_port")]
        port: u16,
    },
    S3 {
        bucket: String,
        region: String,
    },
}

fn default_ssh_port() -> u16 {
    22
}

impl Destination {
    /// Check the sub-fields each destination kind requires.
    pub fn validate(&self) -> BackupResult<()> {
        match self {
            Destination::Local => Ok(()),
            Destination::Remote {
                host,
                user,
                path,
                port,
            } => {
                require_field("remote host", host)?;
                require_field("remote user", user)?;
                require_field("remote path", path)?;
                if *port == 0 {
                    return Err(BackupError::InvalidSchedule(
                        "remote port must be between 1 and 65535".into(),
                    ));
                }
                if host.starts_with('-') || user.starts_with('-') {
                    return Err(BackupError::InvalidSchedule(
                        "remote host and user cannot start with `-`".into(),
                    ));
                }
                Ok(())
            }
            Destination::S3 { bucket, region } => {
                require_field("s3 bucket", bucket)?;
                require_field("s3 region", region)
            }
        }
    }
}

fn require_field(label: &str, value: &str) -> BackupResult<()> {
    if value.trim().is_empty() {
        Err(BackupError::InvalidSchedule(format!("{label} is required")))
    } else {
        Ok(())
    }
}

/// A persisted backup schedule.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BackupSchedule {
    pub id: Uuid,
    pub name: String,

    /// Account the schedule backs up. `None` iff `is_system`.
    pub account_id: Option<Uuid>,
    pub is_system: bool,

    pub job_type: JobType,
    pub frequency: Frequency,

    /// 0 = Sunday .. 6 = Saturday. Set iff `frequency` is weekly.
    pub day_of_week: Option<u32>,

    /// 1..=28. Set iff `frequency` is monthly.
    pub day_of_month: Option<u32>,

    /// Wall-clock time in server-local time.
    pub time_of_day: NaiveTime,

    pub retention_days: u32,

    #[sqlx(json)]
    pub destination: Destination,

    pub enabled: bool,

    /// Written only by the execution pipeline.
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_status: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Create/update payload accepted from the admin API.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleRequest {
    pub name: String,
    #[serde(default)]
    pub account_id: Option<Uuid>,
    #[serde(default)]
    pub is_system: bool,
    pub job_type: JobType,
    pub frequency: Frequency,
    #[serde(default)]
    pub day_of_week: Option<u32>,
    #[serde(default)]
    pub day_of_month: Option<u32>,
    /// `HH:MM`
    pub time_of_day: String,
    pub retention_days: u32,
    #[serde(default = "default_destination")]
    pub destination: Destination,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_destination() -> Destination {
    Destination::Local
}

fn default_enabled() -> bool {
    true
}

impl ScheduleRequest {
    /// Validate the payload and return the parsed time of day.
    pub fn validate(&self) -> BackupResult<NaiveTime> {
        if self.name.trim().is_empty() {
            return Err(BackupError::InvalidSchedule("name is required".into()));
        }

        match (self.account_id, self.is_system) {
            (Some(_), false) | (None, true) => {}
            (Some(_), true) => {
                return Err(BackupError::InvalidSchedule(
                    "a system schedule cannot be bound to an account".into(),
                ));
            }
            (None, false) => {
                return Err(BackupError::InvalidSchedule(
                    "either account_id or is_system is required".into(),
                ));
            }
        }

        match (self.frequency, self.day_of_week) {
            (Frequency::Weekly, Some(day)) if day <= 6 => {}
            (Frequency::Weekly, Some(day)) => {
                return Err(BackupError::InvalidSchedule(format!(
                    "day_of_week must be between 0 and 6, got {day}"
                )));
            }
            (Frequency::Weekly, None) => {
                return Err(BackupError::InvalidSchedule(
                    "day_of_week is required for weekly schedules".into(),
                ));
            }
            (_, Some(_)) => {
                return Err(BackupError::InvalidSchedule(
                    "day_of_week is only valid for weekly schedules".into(),
                ));
            }
            (_, None) => {}
        }

        match (self.frequency, self.day_of_month) {
            (Frequency::Monthly, Some(day)) if (1..=28).contains(&day) => {}
            (Frequency::Monthly, Some(day)) => {
                return Err(BackupError::InvalidSchedule(format!(
                    "day_of_month must be between 1 and 28, got {day}"
                )));
            }
            (Frequency::Monthly, None) => {
                return Err(BackupError::InvalidSchedule(
                    "day_of_month is required for monthly schedules".into(),
                ));
            }
            (_, Some(_)) => {
                return Err(BackupError::InvalidSchedule(
                    "day_of_month is only valid for monthly schedules".into(),
                ));
            }
            (_, None) => {}
        }

        if self.retention_days == 0 {
            return Err(BackupError::InvalidSchedule(
                "retention_days must be at least 1".into(),
            ));
        }

        self.destination.validate()?;

        NaiveTime::parse_from_str(self.time_of_day.trim(), "%H:%M").map_err(|_| {
            BackupError::InvalidSchedule(format!(
                "time_of_day must be HH:MM, got `{}`",
                self.time_of_day
            ))
        })
    }
}

/// Filters for listing schedules.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScheduleFilter {
    pub is_system: Option<bool>,
    pub is_enabled: Option<bool>,
}
