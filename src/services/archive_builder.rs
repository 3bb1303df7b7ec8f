//! Collects the content of a backup (files, database dumps, mail) into a
//! staging directory laid out as `files/`, `databases/<name>.sql`, `emails/`.

use crate::errors::{BackupError, BackupResult};
use crate::models::{account::Account, schedule::BackupSchedule};
use crate::services::{
    database_engine::{DatabaseEngine, is_system_schema},
    fs_utils,
};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::fs;
use tracing::{debug, warn};

pub const FILES_DIR: &str = "files";
pub const DATABASES_DIR: &str = "databases";
pub const EMAILS_DIR: &str = "emails";

/// Non-fatal problems met while building. Each entry is a
/// [`BackupError::SourceUnavailable`], [`BackupError::DumpFailed`] or
/// [`BackupError::DatabaseEngine`].
#[derive(Debug, Default)]
pub struct BuildReport {
    pub warnings: Vec<BackupError>,
    pub files_copied: u64,
    pub databases_dumped: Vec<String>,
}

#[derive(Clone)]
pub struct ArchiveBuilder {
    engine: Arc<dyn DatabaseEngine>,
    system_files_root: PathBuf,
    system_mail_dir: Option<PathBuf>,
}

impl ArchiveBuilder {
    pub fn new(
        engine: Arc<dyn DatabaseEngine>,
        system_files_root: PathBuf,
        system_mail_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            engine,
            system_files_root,
            system_mail_dir,
        }
    }

    /// Populate `staging` for `schedule`.
    ///
    /// Missing content roots are skipped and a failed database dump does not
    /// stop the remaining dumps; both end up in the report's warnings. Only
    /// staging I/O errors and copy errors of an existing source are returned
    /// as `Err`.
    pub async fn build(
        &self,
        schedule: &BackupSchedule,
        account: Option<&Account>,
        staging: &Path,
    ) -> BackupResult<BuildReport> {
        if !schedule.is_system && account.is_none() {
            return Err(BackupError::AccountNotFound(
                schedule.account_id.unwrap_or_default(),
            ));
        }

        let mut report = BuildReport::default();
        let job_type = schedule.job_type;

        if job_type.includes_files() {
            let source = match account {
                Some(account) => account.web_root.clone(),
                None => self.system_files_root.clone(),
            };
            self.copy_section(&source, &staging.join(FILES_DIR), &mut report)
                .await?;
        }

        if job_type.includes_databases() {
            let databases = match account {
                Some(account) => account.databases.clone(),
                None => match self.engine.list_databases().await {
                    Ok(names) => names,
                    Err(err) => {
                        warn!("could not enumerate databases: {}", err);
                        report.warnings.push(err);
                        Vec::new()
                    }
                },
            };
            self.dump_databases(&databases, &staging.join(DATABASES_DIR), &mut report)
                .await?;
        }

        if job_type.includes_emails() {
            let source = match account {
                Some(account) => Some(account.mail_dir.clone()),
                None => self.system_mail_dir.clone(),
            };
            if let Some(source) = source {
                self.copy_section(&source, &staging.join(EMAILS_DIR), &mut report)
                    .await?;
            }
        }

        Ok(report)
    }

    async fn copy_section(
        &self,
        source: &Path,
        target: &Path,
        report: &mut BuildReport,
    ) -> BackupResult<()> {
        if !fs_utils::dir_exists(source).await {
            warn!("skipping missing source {}", source.display());
            report
                .warnings
                .push(BackupError::SourceUnavailable(source.to_path_buf()));
            return Ok(());
        }
        let copied = fs_utils::copy_dir(source, target).await?;
        debug!("copied {} files from {}", copied.copied, source.display());
        report.files_copied += copied.copied;
        report.warnings.extend(
            copied
                .skipped
                .into_iter()
                .map(BackupError::SourceUnavailable),
        );
        Ok(())
    }

    /// Dump each database on its own; one failure is recorded, not raised.
    async fn dump_databases(
        &self,
        databases: &[String],
        target: &Path,
        report: &mut BuildReport,
    ) -> BackupResult<()> {
        fs::create_dir_all(target).await?;
        for name in databases.iter().filter(|name| !is_system_schema(name)) {
            let dest = target.join(format!("{name}.sql"));
            match self.engine.dump(name, &dest).await {
                Ok(()) => report.databases_dumped.push(name.clone()),
                Err(err) => {
                    warn!("dump of {} failed: {}", name, err);
                    report.warnings.push(match err {
                        BackupError::DumpFailed { .. } => err,
                        other => BackupError::DumpFailed {
                            database: name.clone(),
                            reason: other.to_string(),
                        },
                    });
                }
            }
        }
        Ok(())
    }
}
