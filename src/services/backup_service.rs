//! BackupService: the execution pipeline (build, pack, transport, retain),
//! restore jobs and archive management behind the HTTP API and scheduler.

use crate::errors::{BackupError, BackupResult};
use crate::models::{
    account::Account,
    archive::{ArchiveName, ArchiveRecord, TRANSPORT_NOT_REQUIRED},
    restore::{RestoreFlags, RestoreJob, RestoreJobState, RestoreReport, RestoreRequest},
    run::{BackupRun, BackupStats, RunOutcome, RunStatus},
    schedule::{BackupSchedule, SYSTEM_OWNER, ScheduleRequest},
};
use crate::services::{
    accounts::AccountDirectory,
    archive_builder::ArchiveBuilder,
    catalog::ArchiveCatalog,
    database_engine::DatabaseEngine,
    locks::{ClaimSet, KeyedLocks},
    packager::Packager,
    restore_engine::RestoreEngine,
    restore_jobs::RestoreJobs,
    retention::RetentionPolicy,
    schedule_engine,
    schedule_store::ScheduleStore,
    transporter::Transporter,
};
use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveDateTime, TimeZone, Timelike, Utc};
use sqlx::SqlitePool;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, SystemTime},
};
use tokio::fs;
use tracing::{error, info, warn};
use uuid::Uuid;

const RECENT_RUNS: i64 = 5;

/// Paths and limits the service is built from.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub backups_root: PathBuf,
    pub staging_dir: PathBuf,
    pub system_files_root: PathBuf,
    pub system_mail_dir: Option<PathBuf>,
    pub command_timeout: Duration,
}

#[derive(Clone)]
pub struct BackupService {
    db: Arc<SqlitePool>,
    store: ScheduleStore,
    catalog: ArchiveCatalog,
    accounts: Arc<dyn AccountDirectory>,
    builder: ArchiveBuilder,
    packager: Packager,
    transporter: Transporter,
    retention: RetentionPolicy,
    restorer: RestoreEngine,
    owner_locks: Arc<KeyedLocks<String>>,
    running: Arc<ClaimSet<Uuid>>,
    restore_jobs: Arc<RestoreJobs>,
    staging_dir: PathBuf,
}

impl BackupService {
    pub async fn new(
        db: Arc<SqlitePool>,
        engine: Arc<dyn DatabaseEngine>,
        accounts: Arc<dyn AccountDirectory>,
        settings: ServiceSettings,
    ) -> BackupResult<Self> {
        fs::create_dir_all(&settings.staging_dir).await?;
        let catalog = ArchiveCatalog::open(db.clone(), &settings.backups_root).await?;

        Ok(Self {
            store: ScheduleStore::new(db.clone()),
            catalog,
            accounts,
            builder: ArchiveBuilder::new(
                engine.clone(),
                settings.system_files_root,
                settings.system_mail_dir,
            ),
            packager: Packager::new(settings.command_timeout),
            transporter: Transporter::new(settings.command_timeout),
            retention: RetentionPolicy,
            restorer: RestoreEngine::new(
                engine,
                settings.staging_dir.clone(),
                settings.command_timeout,
            ),
            owner_locks: Arc::new(KeyedLocks::new()),
            running: Arc::new(ClaimSet::new()),
            restore_jobs: Arc::new(RestoreJobs::new()),
            staging_dir: settings.staging_dir,
            db,
        })
    }

    pub fn db(&self) -> &SqlitePool {
        &self.db
    }

    pub fn schedules(&self) -> &ScheduleStore {
        &self.store
    }

    pub fn catalog(&self) -> &ArchiveCatalog {
        &self.catalog
    }

    // ---------------------------------------------------------------------
    // Schedules
    // ---------------------------------------------------------------------

    pub async fn create_schedule(&self, req: &ScheduleRequest) -> BackupResult<BackupSchedule> {
        self.check_account(req).await?;
        self.store.create(req).await
    }

    pub async fn update_schedule(
        &self,
        id: Uuid,
        req: &ScheduleRequest,
    ) -> BackupResult<BackupSchedule> {
        self.check_account(req).await?;
        self.store.update(id, req).await
    }

    async fn check_account(&self, req: &ScheduleRequest) -> BackupResult<()> {
        if let Some(account_id) = req.account_id {
            req.validate()?;
            self.accounts.account(account_id).await?;
        }
        Ok(())
    }

    /// Next run of a schedule in server-local time, `None` when disabled.
    pub async fn next_run(&self, id: Uuid) -> BackupResult<Option<DateTime<Local>>> {
        let schedule = self.store.get(id).await?;
        let next = schedule_engine::next_run(&schedule, Local::now().naive_local());
        Ok(next.and_then(|at| {
            schedule_engine::resolve_local(at, |t| Local.from_local_datetime(t))
        }))
    }

    /// Enabled schedules whose current window has not been served yet.
    ///
    /// Schedules with an execution in flight are left out.
    pub async fn due_schedules(&self, now: NaiveDateTime) -> BackupResult<Vec<BackupSchedule>> {
        let due = self
            .store
            .list_enabled()
            .await?
            .into_iter()
            .filter(|schedule| {
                let Some(occurrence) = schedule_engine::due_occurrence(schedule, now) else {
                    return false;
                };
                let last_run = schedule
                    .last_run_at
                    .map(|at| at.with_timezone(&Local).naive_local());
                !schedule_engine::already_ran(occurrence, last_run)
                    && !self.running.is_claimed(&schedule.id)
            })
            .collect();
        Ok(due)
    }

    // ---------------------------------------------------------------------
    // Execution
    // ---------------------------------------------------------------------

    /// Run a schedule now.
    ///
    /// Returns [`BackupError::AlreadyRunning`] when the schedule has an
    /// execution in flight. The result is recorded on the schedule and in the
    /// run history whether or not an archive was produced.
    pub async fn run_schedule(&self, id: Uuid) -> BackupResult<RunOutcome> {
        let schedule = self.store.get(id).await?;
        let Some(_claim) = self.running.try_claim(id) else {
            return Err(BackupError::AlreadyRunning(id));
        };
        self.execute(&schedule).await
    }

    async fn execute(&self, schedule: &BackupSchedule) -> BackupResult<RunOutcome> {
        let started_at = Utc::now();
        let (owner, produced) = match self.resolve_owner(schedule).await {
            Ok((owner, account)) => {
                info!(schedule_id = %schedule.id, owner = %owner, "backup started");
                let produced = self.produce(schedule, &owner, account.as_ref()).await;
                (owner, produced)
            }
            Err(err) => (fallback_owner(schedule), Err(err)),
        };
        let finished_at = Utc::now();

        let (status, message, outcome) = match produced {
            Ok((archive, warnings)) => {
                let status = if warnings.is_empty() {
                    RunStatus::Success
                } else {
                    RunStatus::Warning
                };
                let message = warnings.join("; ");
                (status, message, Ok((archive, warnings)))
            }
            Err(err) => (RunStatus::Failed, err.to_string(), Err(err)),
        };
        let last_status = status.status_line(&message);

        self.store
            .record_result(schedule.id, finished_at, &last_status)
            .await?;
        self.store
            .insert_run(&BackupRun {
                id: Uuid::new_v4(),
                schedule_id: schedule.id,
                owner: owner.clone(),
                started_at,
                finished_at,
                status,
                message: (!message.is_empty()).then(|| message.clone()),
                archive_id: outcome.as_ref().ok().map(|(archive, _)| archive.id),
            })
            .await?;

        match outcome {
            Ok((archive, warnings)) => {
                info!(
                    schedule_id = %schedule.id,
                    owner = %owner,
                    status = %last_status,
                    "backup finished: {}",
                    archive.path
                );
                Ok(RunOutcome {
                    schedule_id: schedule.id,
                    status,
                    last_status,
                    archive,
                    warnings,
                })
            }
            Err(err) => {
                error!(schedule_id = %schedule.id, owner = %owner, "backup failed: {}", err);
                Err(err)
            }
        }
    }

    async fn resolve_owner(
        &self,
        schedule: &BackupSchedule,
    ) -> BackupResult<(String, Option<Account>)> {
        match schedule.account_id {
            Some(account_id) if !schedule.is_system => {
                let account = self.accounts.account(account_id).await?;
                Ok((account.username.clone(), Some(account)))
            }
            _ => Ok((SYSTEM_OWNER.to_string(), None)),
        }
    }

    /// Build, pack, index, transport and sweep. Only a failure that leaves
    /// no archive behind is an `Err`; everything else is a warning.
    async fn produce(
        &self,
        schedule: &BackupSchedule,
        owner: &str,
        account: Option<&Account>,
    ) -> BackupResult<(ArchiveRecord, Vec<String>)> {
        let owner_dir = self.catalog.owner_dir(owner)?;
        let _guard = self.owner_locks.lock(&owner.to_string()).await;

        let staging = tempfile::Builder::new()
            .prefix("backupd-stage-")
            .tempdir_in(&self.staging_dir)?;
        let build = self.builder.build(schedule, account, staging.path()).await?;
        let mut warnings: Vec<String> = build.warnings.iter().map(ToString::to_string).collect();
        for warning in &warnings {
            warn!(schedule_id = %schedule.id, owner = %owner, "{}", warning);
        }

        let (name, output) = free_archive_name(&owner_dir, owner, schedule).await?;
        let packed = self.packager.pack(staging, &output).await?;

        let mut archive = ArchiveRecord {
            id: Uuid::new_v4(),
            owner: owner.to_string(),
            schedule_id: Some(schedule.id),
            job_type: schedule.job_type,
            created_at: Local
                .from_local_datetime(&name.created_local)
                .earliest()
                .map(|at| at.with_timezone(&Utc))
                .unwrap_or_else(Utc::now),
            path: packed.path.to_string_lossy().into_owned(),
            size_bytes: packed.size_bytes,
            checksum: Some(packed.checksum),
            transport_status: TRANSPORT_NOT_REQUIRED.to_string(),
        };
        self.catalog.insert(&archive).await?;

        archive.transport_status = match self
            .transporter
            .send(&packed.path, owner, &schedule.destination)
            .await
        {
            Ok(outcome) => outcome.as_str().to_string(),
            Err(err) => {
                warn!(schedule_id = %schedule.id, owner = %owner, "{}", err);
                warnings.push(err.to_string());
                format!("failed: {err}")
            }
        };
        if archive.transport_status != TRANSPORT_NOT_REQUIRED {
            self.catalog
                .set_transport_status(archive.id, &archive.transport_status)
                .await?;
        }

        let swept = self
            .retention
            .cleanup(&owner_dir, schedule.retention_days, SystemTime::now())
            .await;
        self.catalog.forget(&swept.deleted).await?;
        warnings.extend(swept.errors.iter().map(ToString::to_string));

        Ok((archive, warnings))
    }

    // ---------------------------------------------------------------------
    // Archives
    // ---------------------------------------------------------------------

    pub async fn list_archives(&self, owner: Option<&str>) -> BackupResult<Vec<ArchiveRecord>> {
        self.catalog.list(owner).await
    }

    /// Delete one archive. The path guard runs before anything is touched.
    pub async fn delete_archive(&self, path: &Path) -> BackupResult<()> {
        let resolved = self.catalog.ensure_inside_root(path).await?;
        let owner = self.catalog.owner_of(&resolved).await?;
        let _guard = self.owner_locks.lock(&owner).await;
        self.catalog.delete(&resolved).await?;
        info!(owner = %owner, "deleted archive {}", resolved.display());
        Ok(())
    }

    /// Resolve an archive for download, applying the same guard as delete.
    pub async fn archive_file(&self, path: &Path) -> BackupResult<PathBuf> {
        self.catalog.ensure_inside_root(path).await
    }

    pub async fn stats(&self) -> BackupResult<BackupStats> {
        let (archive_count, archive_total_bytes) = self.catalog.totals().await?;
        let counts = self.store.counts().await?;
        Ok(BackupStats {
            archive_count,
            archive_total_bytes,
            enabled_schedules: counts.enabled,
            disabled_schedules: counts.disabled,
            system_schedules: counts.system,
            recent_successes: self
                .store
                .recent_runs(&[RunStatus::Success, RunStatus::Warning], RECENT_RUNS)
                .await?,
            recent_failures: self
                .store
                .recent_runs(&[RunStatus::Failed], RECENT_RUNS)
                .await?,
        })
    }

    // ---------------------------------------------------------------------
    // Restore
    // ---------------------------------------------------------------------

    /// Restore an archive and wait for the report.
    pub async fn restore_archive(
        &self,
        path: &Path,
        account_id: Uuid,
        flags: RestoreFlags,
    ) -> BackupResult<RestoreReport> {
        let resolved = self.catalog.ensure_inside_root(path).await?;
        let account = self.accounts.account(account_id).await?;
        self.restore_resolved(&resolved, &account, flags).await
    }

    async fn restore_resolved(
        &self,
        resolved: &Path,
        account: &Account,
        flags: RestoreFlags,
    ) -> BackupResult<RestoreReport> {
        let owner = self.catalog.owner_of(resolved).await?;
        let _guard = self.owner_locks.lock(&owner).await;
        self.restorer.restore(resolved, account, flags).await
    }

    /// Validate a restore request and run it in the background.
    ///
    /// Path and account problems are reported immediately; everything after
    /// that lands in the job polled through [`BackupService::restore_job`].
    pub async fn start_restore(&self, req: RestoreRequest) -> BackupResult<RestoreJob> {
        let resolved = self.catalog.ensure_inside_root(Path::new(&req.path)).await?;
        let account = self.accounts.account(req.account_id).await?;

        let job = RestoreJob {
            id: Uuid::new_v4(),
            archive_path: resolved.to_string_lossy().into_owned(),
            account_id: account.id,
            flags: req.flags,
            state: RestoreJobState::Pending,
            report: None,
            error: None,
            created_at: Utc::now(),
            finished_at: None,
        };
        self.restore_jobs.prune(job.created_at);
        self.restore_jobs.insert(job.clone());
        info!(
            "restore job {} queued for {} onto {}",
            job.id, job.archive_path, account.username
        );

        let service = self.clone();
        let job_id = job.id;
        let flags = req.flags;
        tokio::spawn(async move {
            service
                .restore_jobs
                .update(&job_id, |job| job.state = RestoreJobState::Running);
            let result = service.restore_resolved(&resolved, &account, flags).await;
            service.restore_jobs.update(&job_id, |job| {
                job.finished_at = Some(Utc::now());
                match result {
                    Ok(report) => {
                        job.state = RestoreJobState::Finished;
                        job.report = Some(report);
                    }
                    Err(err) => {
                        warn!("restore job {} failed: {}", job_id, err);
                        job.state = RestoreJobState::Failed;
                        job.error = Some(err.to_string());
                    }
                }
            });
        });

        Ok(job)
    }

    /// Current state of a restore job. Finished jobs stay pollable for a
    /// while, then are dropped.
    pub async fn restore_job(&self, id: Uuid) -> BackupResult<RestoreJob> {
        self.restore_jobs
            .get(&id)
            .ok_or(BackupError::RestoreJobNotFound(id))
    }
}

/// Owner recorded for a run that failed before its account was resolved.
fn fallback_owner(schedule: &BackupSchedule) -> String {
    match schedule.account_id {
        Some(id) if !schedule.is_system => id.to_string(),
        _ => SYSTEM_OWNER.to_string(),
    }
}

/// Pick an archive name for now that does not exist yet. Two runs within
/// the same second get consecutive timestamps.
async fn free_archive_name(
    owner_dir: &Path,
    owner: &str,
    schedule: &BackupSchedule,
) -> BackupResult<(ArchiveName, PathBuf)> {
    let now = Local::now().naive_local();
    let mut created = now.with_nanosecond(0).unwrap_or(now);
    loop {
        let name = ArchiveName::new(owner, created, schedule.job_type);
        let path = owner_dir.join(name.file_name());
        if !fs::try_exists(&path).await? {
            return Ok((name, path));
        }
        created += ChronoDuration::seconds(1);
    }
}
