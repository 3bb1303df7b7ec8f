//! Extracts an archive and re-applies its sections to an account.

use crate::errors::{BackupError, BackupResult};
use crate::models::{
    account::Account,
    restore::{DatabaseFailure, RestoreFlags, RestoreReport, StepOutcome},
};
use crate::services::{
    archive_builder::{DATABASES_DIR, EMAILS_DIR, FILES_DIR},
    command,
    database_engine::DatabaseEngine,
    fs_utils,
};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tempfile::TempDir;
use tokio::{fs, process::Command};
use tracing::{info, warn};

#[derive(Clone)]
pub struct RestoreEngine {
    engine: Arc<dyn DatabaseEngine>,
    scratch_dir: PathBuf,
    timeout: Duration,
}

impl RestoreEngine {
    pub fn new(engine: Arc<dyn DatabaseEngine>, scratch_dir: PathBuf, timeout: Duration) -> Self {
        Self {
            engine,
            scratch_dir,
            timeout,
        }
    }

    /// Restore `archive` onto `account`.
    ///
    /// Only a missing archive or a failed extraction is an `Err`; each of the
    /// three components reports its own outcome in the returned report. The
    /// extraction directory is removed on every path.
    pub async fn restore(
        &self,
        archive: &Path,
        account: &Account,
        flags: RestoreFlags,
    ) -> BackupResult<RestoreReport> {
        if !fs::try_exists(archive).await.unwrap_or(false) {
            return Err(BackupError::ArchiveNotFound(archive.to_path_buf()));
        }

        fs::create_dir_all(&self.scratch_dir).await?;
        let extract_dir = tempfile::Builder::new()
            .prefix("backupd-restore-")
            .tempdir_in(&self.scratch_dir)?;
        self.extract(archive, &extract_dir).await?;
        let root = content_root(extract_dir.path()).await?;

        let files = if flags.restore_files {
            self.restore_files(&root, account).await
        } else {
            StepOutcome::Skipped
        };

        let (databases, restored_databases, database_failures) = if flags.restore_databases {
            self.restore_databases(&root).await
        } else {
            (StepOutcome::Skipped, Vec::new(), Vec::new())
        };

        let emails = if flags.restore_emails {
            self.restore_section(&root.join(EMAILS_DIR), &account.mail_dir, "emails")
                .await
        } else {
            StepOutcome::Skipped
        };

        info!(
            "restore of {} onto {} finished: files={:?} databases={:?} emails={:?}",
            archive.display(),
            account.username,
            files,
            databases,
            emails
        );

        Ok(RestoreReport {
            files,
            databases,
            emails,
            restored_databases,
            database_failures,
        })
    }

    async fn extract(&self, archive: &Path, into: &TempDir) -> BackupResult<()> {
        let mut cmd = Command::new("tar");
        cmd.arg("-xzf").arg(archive).arg("-C").arg(into.path());
        command::run(cmd, self.timeout)
            .await
            .map(|_| ())
            .map_err(|err| BackupError::ExtractionFailed(err.detail()))
    }

    async fn restore_files(&self, root: &Path, account: &Account) -> StepOutcome {
        let outcome = self
            .restore_section(&root.join(FILES_DIR), &account.web_root, "files")
            .await;
        if outcome != StepOutcome::Restored {
            return outcome;
        }
        match fs_utils::chown_recursive(&account.web_root, account.uid, account.gid).await {
            Ok(()) => StepOutcome::Restored,
            Err(err) => step_failed("files", err.to_string()),
        }
    }

    async fn restore_section(
        &self,
        source: &Path,
        target: &Path,
        step: &'static str,
    ) -> StepOutcome {
        if !fs_utils::dir_exists(source).await {
            return StepOutcome::NotPresent;
        }
        match fs_utils::replace_dir_contents(target, source).await {
            Ok(copied) => {
                info!("restored {} {} files into {}", copied.copied, step, target.display());
                StepOutcome::Restored
            }
            Err(err) => step_failed(step, err.to_string()),
        }
    }

    /// Apply every `<name>.sql` dump to the database `<name>`, one at a time.
    async fn restore_databases(
        &self,
        root: &Path,
    ) -> (StepOutcome, Vec<String>, Vec<DatabaseFailure>) {
        let dir = root.join(DATABASES_DIR);
        if !fs_utils::dir_exists(&dir).await {
            return (StepOutcome::NotPresent, Vec::new(), Vec::new());
        }

        let dumps = match sql_dumps(&dir).await {
            Ok(dumps) => dumps,
            Err(err) => {
                return (
                    step_failed("databases", err.to_string()),
                    Vec::new(),
                    Vec::new(),
                );
            }
        };

        let mut restored = Vec::new();
        let mut failures = Vec::new();
        for (name, path) in dumps {
            match self.engine.restore(&name, &path).await {
                Ok(()) => restored.push(name),
                Err(err) => {
                    warn!("restoring database {} failed: {}", name, err);
                    failures.push(DatabaseFailure {
                        database: name,
                        reason: err.to_string(),
                    });
                }
            }
        }

        let outcome = if failures.is_empty() {
            StepOutcome::Restored
        } else {
            let names: Vec<&str> = failures.iter().map(|f| f.database.as_str()).collect();
            let total = failures.len() + restored.len();
            step_failed(
                "databases",
                format!(
                    "{} of {} dumps failed: {}",
                    failures.len(),
                    total,
                    names.join(", ")
                ),
            )
        };
        (outcome, restored, failures)
    }
}

fn step_failed(step: &'static str, reason: String) -> StepOutcome {
    StepOutcome::Failed(BackupError::RestoreStepFailed { step, reason }.to_string())
}

/// The directory holding `files/`, `databases/`, `emails/`.
///
/// Archives may wrap their content in a single top-level directory; in that
/// case the wrapper is the root, otherwise the extraction directory is.
async fn content_root(extracted: &Path) -> BackupResult<PathBuf> {
    let mut entries = fs::read_dir(extracted).await?;
    let mut only: Option<PathBuf> = None;
    let mut count = 0;
    while let Some(entry) = entries.next_entry().await? {
        count += 1;
        if entry.file_type().await?.is_dir() {
            only = Some(entry.path());
        }
    }

    match only {
        Some(dir) if count == 1 && !is_section_dir(&dir) => Ok(dir),
        _ => Ok(extracted.to_path_buf()),
    }
}

fn is_section_dir(dir: &Path) -> bool {
    dir.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| [FILES_DIR, DATABASES_DIR, EMAILS_DIR].contains(&name))
}

/// `(database name, dump path)` for every `*.sql` file, sorted by name.
async fn sql_dumps(dir: &Path) -> std::io::Result<Vec<(String, PathBuf)>> {
    let mut dumps = Vec::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("sql") {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
            dumps.push((stem.to_string(), path.clone()));
        }
    }
    dumps.sort();
    Ok(dumps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn content_root_unwraps_single_directory() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("alice_2024-03-06_02-00-00_full/files")).unwrap();
        let root = content_root(tmp.path()).await.unwrap();
        assert_eq!(root, tmp.path().join("alice_2024-03-06_02-00-00_full"));
    }

    #[tokio::test]
    async fn content_root_keeps_bare_sections() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("files")).unwrap();
        assert_eq!(content_root(tmp.path()).await.unwrap(), tmp.path());

        std::fs::create_dir_all(tmp.path().join("databases")).unwrap();
        assert_eq!(content_root(tmp.path()).await.unwrap(), tmp.path());
    }

    #[tokio::test]
    async fn sql_dumps_are_named_by_stem() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("b_shop.sql"), b"").unwrap();
        std::fs::write(tmp.path().join("a_wp.sql"), b"").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), b"").unwrap();
        let dumps = sql_dumps(tmp.path()).await.unwrap();
        let names: Vec<&str> = dumps.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["a_wp", "b_shop"]);
    }
}
