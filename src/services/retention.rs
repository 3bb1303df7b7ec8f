//! Age-based cleanup of one owner's backup directory.

use crate::errors::BackupError;
use crate::models::archive::ARCHIVE_EXTENSION;
use std::{
    io,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};
use tokio::fs;
use tracing::{info, warn};

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

#[derive(Debug, Default)]
pub struct RetentionReport {
    pub deleted: Vec<PathBuf>,
    /// [`BackupError::RetentionError`] per file that could not be removed.
    pub errors: Vec<BackupError>,
}

#[derive(Debug, Clone, Default)]
pub struct RetentionPolicy;

impl RetentionPolicy {
    /// Delete every archive in `owner_dir` whose mtime is older than
    /// `now - retention_days`.
    ///
    /// There is no minimum number of archives kept. A failed deletion is
    /// recorded and the sweep continues.
    pub async fn cleanup(
        &self,
        owner_dir: &Path,
        retention_days: u32,
        now: SystemTime,
    ) -> RetentionReport {
        let mut report = RetentionReport::default();
        let cutoff = now
            .checked_sub(Duration::from_secs(u64::from(retention_days) * SECONDS_PER_DAY))
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let candidates = match expired_archives(owner_dir, cutoff).await {
            Ok(candidates) => candidates,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return report,
            Err(err) => {
                report.errors.push(BackupError::RetentionError {
                    path: owner_dir.to_path_buf(),
                    reason: err.to_string(),
                });
                return report;
            }
        };

        for path in candidates {
            match fs::remove_file(&path).await {
                Ok(()) => {
                    info!("retention removed {}", path.display());
                    report.deleted.push(path);
                }
                Err(err) => {
                    warn!("retention could not remove {}: {}", path.display(), err);
                    report.errors.push(BackupError::RetentionError {
                        path,
                        reason: err.to_string(),
                    });
                }
            }
        }

        report
    }
}

async fn expired_archives(owner_dir: &Path, cutoff: SystemTime) -> io::Result<Vec<PathBuf>> {
    let mut expired = Vec::new();
    let mut entries = fs::read_dir(owner_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let is_archive = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.ends_with(ARCHIVE_EXTENSION));
        if !is_archive {
            continue;
        }
        let meta = entry.metadata().await?;
        if meta.is_file() && meta.modified()? < cutoff {
            expired.push(entry.path());
        }
    }
    expired.sort();
    Ok(expired)
}
