//! Persistence for schedules and their run history.

use crate::errors::{BackupError, BackupResult};
use crate::models::{
    run::{BackupRun, RunStatus},
    schedule::{BackupSchedule, ScheduleFilter, ScheduleRequest},
};
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite, types::Json};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

const SCHEDULE_COLUMNS: &str = "id, name, account_id, is_system, job_type, frequency, \
     day_of_week, day_of_month, time_of_day, retention_days, destination, enabled, \
     last_run_at, last_status, created_at, updated_at";

const RUN_COLUMNS: &str =
    "id, schedule_id, owner, started_at, finished_at, status, message, archive_id";

/// Schedule counts for the stats endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleCounts {
    pub enabled: i64,
    pub disabled: i64,
    pub system: i64,
}

#[derive(Clone)]
pub struct ScheduleStore {
    db: Arc<SqlitePool>,
}

impl ScheduleStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    pub async fn list(&self, filter: &ScheduleFilter) -> BackupResult<Vec<BackupSchedule>> {
        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {SCHEDULE_COLUMNS} FROM backup_schedules WHERE 1 = 1"
        ));
        if let Some(is_system) = filter.is_system {
            builder.push(" AND is_system = ");
            builder.push_bind(is_system);
        }
        if let Some(enabled) = filter.is_enabled {
            builder.push(" AND enabled = ");
            builder.push_bind(enabled);
        }
        builder.push(" ORDER BY created_at ASC");

        let rows = builder
            .build_query_as::<BackupSchedule>()
            .fetch_all(&*self.db)
            .await?;
        Ok(rows)
    }

    /// Enabled schedules, the scheduler's working set.
    pub async fn list_enabled(&self) -> BackupResult<Vec<BackupSchedule>> {
        self.list(&ScheduleFilter {
            is_system: None,
            is_enabled: Some(true),
        })
        .await
    }

    pub async fn get(&self, id: Uuid) -> BackupResult<BackupSchedule> {
        sqlx::query_as::<_, BackupSchedule>(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM backup_schedules WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&*self.db)
        .await?
        .ok_or(BackupError::ScheduleNotFound(id))
    }

    pub async fn create(&self, req: &ScheduleRequest) -> BackupResult<BackupSchedule> {
        let time_of_day = req.validate()?;
        let now = Utc::now();
        let schedule = BackupSchedule {
            id: Uuid::new_v4(),
            name: req.name.trim().to_string(),
            account_id: req.account_id,
            is_system: req.is_system,
            job_type: req.job_type,
            frequency: req.frequency,
            day_of_week: req.day_of_week,
            day_of_month: req.day_of_month,
            time_of_day,
            retention_days: req.retention_days,
            destination: req.destination.clone(),
            enabled: req.enabled,
            last_run_at: None,
            last_status: None,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            "INSERT INTO backup_schedules (
                id, name, account_id, is_system, job_type, frequency, day_of_week,
                day_of_month, time_of_day, retention_days, destination, enabled,
                last_run_at, last_status, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, NULL, ?, ?)",
        )
        .bind(schedule.id)
        .bind(&schedule.name)
        .bind(schedule.account_id)
        .bind(schedule.is_system)
        .bind(schedule.job_type)
        .bind(schedule.frequency)
        .bind(schedule.day_of_week)
        .bind(schedule.day_of_month)
        .bind(schedule.time_of_day)
        .bind(schedule.retention_days)
        .bind(Json(&schedule.destination))
        .bind(schedule.enabled)
        .bind(schedule.created_at)
        .bind(schedule.updated_at)
        .execute(&*self.db)
        .await?;

        info!("created schedule {} ({})", schedule.name, schedule.id);
        Ok(schedule)
    }

    /// Replace the editable fields of a schedule. Run state is kept.
    pub async fn update(&self, id: Uuid, req: &ScheduleRequest) -> BackupResult<BackupSchedule> {
        let time_of_day = req.validate()?;
        let result = sqlx::query(
            "UPDATE backup_schedules SET
                name = ?, account_id = ?, is_system = ?, job_type = ?, frequency = ?,
                day_of_week = ?, day_of_month = ?, time_of_day = ?, retention_days = ?,
                destination = ?, enabled = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(req.name.trim())
        .bind(req.account_id)
        .bind(req.is_system)
        .bind(req.job_type)
        .bind(req.frequency)
        .bind(req.day_of_week)
        .bind(req.day_of_month)
        .bind(time_of_day)
        .bind(req.retention_days)
        .bind(Json(&req.destination))
        .bind(req.enabled)
        .bind(Utc::now())
        .bind(id)
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BackupError::ScheduleNotFound(id));
        }
        self.get(id).await
    }

    pub async fn delete(&self, id: Uuid) -> BackupResult<()> {
        let result = sqlx::query("DELETE FROM backup_schedules WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(BackupError::ScheduleNotFound(id));
        }
        info!("deleted schedule {}", id);
        Ok(())
    }

    /// Flip `enabled` and return the updated schedule.
    pub async fn toggle(&self, id: Uuid) -> BackupResult<BackupSchedule> {
        let result = sqlx::query(
            "UPDATE backup_schedules SET enabled = NOT enabled, updated_at = ? WHERE id = ?",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&*self.db)
        .await?;
        if result.rows_affected() == 0 {
            return Err(BackupError::ScheduleNotFound(id));
        }
        self.get(id).await
    }

    /// Store the outcome of a run on the schedule row.
    ///
    /// A schedule deleted while its run was in flight is not an error.
    pub async fn record_result(
        &self,
        id: Uuid,
        finished_at: DateTime<Utc>,
        status_line: &str,
    ) -> BackupResult<()> {
        sqlx::query("UPDATE backup_schedules SET last_run_at = ?, last_status = ? WHERE id = ?")
            .bind(finished_at)
            .bind(status_line)
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    pub async fn insert_run(&self, run: &BackupRun) -> BackupResult<()> {
        sqlx::query(
            "INSERT INTO backup_runs (
                id, schedule_id, owner, started_at, finished_at, status, message, archive_id
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(run.id)
        .bind(run.schedule_id)
        .bind(&run.owner)
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(run.status)
        .bind(&run.message)
        .bind(run.archive_id)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    /// Latest runs whose status is one of `statuses`, newest first.
    pub async fn recent_runs(
        &self,
        statuses: &[RunStatus],
        limit: i64,
    ) -> BackupResult<Vec<BackupRun>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {RUN_COLUMNS} FROM backup_runs WHERE status IN ("
        ));
        let mut separated = builder.separated(", ");
        for status in statuses {
            separated.push_bind(*status);
        }
        builder.push(") ORDER BY finished_at DESC LIMIT ");
        builder.push_bind(limit);

        let runs = builder
            .build_query_as::<BackupRun>()
            .fetch_all(&*self.db)
            .await?;
        Ok(runs)
    }

    pub async fn counts(&self) -> BackupResult<ScheduleCounts> {
        let (enabled, disabled, system) = sqlx::query_as::<_, (i64, i64, i64)>(
            "SELECT
                COALESCE(SUM(CASE WHEN enabled THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN enabled THEN 0 ELSE 1 END), 0),
                COALESCE(SUM(CASE WHEN is_system THEN 1 ELSE 0 END), 0)
             FROM backup_schedules",
        )
        .fetch_one(&*self.db)
        .await?;
        Ok(ScheduleCounts {
            enabled,
            disabled,
            system,
        })
    }
}
