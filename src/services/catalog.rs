//! Archive index: one `backup_archives` row per archive file under
//! `<backups_root>/<owner>/`.

use crate::errors::{BackupError, BackupResult};
use crate::models::archive::{ArchiveName, ArchiveRecord, TRANSPORT_NOT_REQUIRED};
use chrono::{Local, TimeZone, Utc};
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::{
    io::{self, ErrorKind},
    path::{Component, Path, PathBuf},
    sync::Arc,
};
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

const MAX_OWNER_LEN: usize = 64;
const ARCHIVE_COLUMNS: &str =
    "id, owner, schedule_id, job_type, created_at, path, size_bytes, checksum, transport_status";

#[derive(Clone)]
pub struct ArchiveCatalog {
    db: Arc<SqlitePool>,
    /// Canonical, absolute backups root.
    root: PathBuf,
}

impl ArchiveCatalog {
    /// Open the catalog, creating and canonicalising `backups_root`.
    pub async fn open(db: Arc<SqlitePool>, backups_root: &Path) -> BackupResult<Self> {
        fs::create_dir_all(backups_root).await?;
        let root = fs::canonicalize(backups_root).await?;
        Ok(Self { db, root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding `owner`'s archives.
    ///
    /// Owner names become a path component, so anything that could escape
    /// the root is rejected.
    pub fn owner_dir(&self, owner: &str) -> BackupResult<PathBuf> {
        check_owner(owner)?;
        Ok(self.root.join(owner))
    }

    /// Resolve `path` and make sure it points inside the backups root.
    ///
    /// Relative paths are taken relative to the root. Runs before any
    /// filesystem change. Paths that do not exist are checked lexically so a
    /// missing file outside the root is still reported as outside rather
    /// than as not found.
    pub async fn ensure_inside_root(&self, path: &Path) -> BackupResult<PathBuf> {
        let candidate = self.root.join(path);
        let resolved = match fs::canonicalize(&candidate).await {
            Ok(resolved) => resolved,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                let lexical = normalize_lexically(&candidate);
                if lexical.starts_with(&self.root) && lexical != self.root {
                    return Err(BackupError::ArchiveNotFound(path.to_path_buf()));
                }
                return Err(BackupError::PathOutsideBackupsRoot(path.to_path_buf()));
            }
            Err(err) => return Err(BackupError::Io(err)),
        };

        if !resolved.starts_with(&self.root) || resolved == self.root {
            return Err(BackupError::PathOutsideBackupsRoot(path.to_path_buf()));
        }
        if !fs::metadata(&resolved).await?.is_file() {
            return Err(BackupError::ArchiveNotFound(path.to_path_buf()));
        }
        Ok(resolved)
    }

    /// The owner an archive belongs to: its index row, else its directory.
    pub async fn owner_of(&self, resolved: &Path) -> BackupResult<String> {
        if let Some(record) = self.find_by_path(resolved).await? {
            return Ok(record.owner);
        }
        resolved
            .strip_prefix(&self.root)
            .ok()
            .and_then(|rel| rel.components().next())
            .and_then(|first| first.as_os_str().to_str())
            .map(str::to_string)
            .ok_or_else(|| BackupError::PathOutsideBackupsRoot(resolved.to_path_buf()))
    }

    pub async fn insert(&self, record: &ArchiveRecord) -> BackupResult<()> {
        sqlx::query(
            "INSERT INTO backup_archives (
                id, owner, schedule_id, job_type, created_at, path,
                size_bytes, checksum, transport_status
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id)
        .bind(&record.owner)
        .bind(record.schedule_id)
        .bind(record.job_type)
        .bind(record.created_at)
        .bind(&record.path)
        .bind(record.size_bytes)
        .bind(&record.checksum)
        .bind(&record.transport_status)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    pub async fn set_transport_status(&self, id: Uuid, status: &str) -> BackupResult<()> {
        sqlx::query("UPDATE backup_archives SET transport_status = ? WHERE id = ?")
            .bind(status)
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    pub async fn find_by_path(&self, path: &Path) -> BackupResult<Option<ArchiveRecord>> {
        let record = sqlx::query_as::<_, ArchiveRecord>(&format!(
            "SELECT {ARCHIVE_COLUMNS} FROM backup_archives WHERE path = ?"
        ))
        .bind(path.to_string_lossy().as_ref())
        .fetch_optional(&*self.db)
        .await?;
        Ok(record)
    }

    /// Archives newest first, optionally for one owner.
    pub async fn list(&self, owner: Option<&str>) -> BackupResult<Vec<ArchiveRecord>> {
        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {ARCHIVE_COLUMNS} FROM backup_archives"
        ));
        if let Some(owner) = owner {
            builder.push(" WHERE owner = ");
            builder.push_bind(owner.to_string());
        }
        builder.push(" ORDER BY created_at DESC");

        let rows = builder
            .build_query_as::<ArchiveRecord>()
            .fetch_all(&*self.db)
            .await?;
        Ok(rows)
    }

    /// Delete an archive file and its index row. The caller has already
    /// resolved `resolved` through [`ArchiveCatalog::ensure_inside_root`].
    pub async fn delete(&self, resolved: &Path) -> BackupResult<()> {
        match fs::remove_file(resolved).await {
            Ok(()) => debug!("removed archive {}", resolved.display()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!("archive {} already missing", resolved.display());
            }
            Err(err) => return Err(BackupError::Io(err)),
        }
        self.forget(&[resolved.to_path_buf()]).await
    }

    /// Drop the index rows of archives that are gone from disk.
    pub async fn forget(&self, paths: &[PathBuf]) -> BackupResult<()> {
        for path in paths {
            sqlx::query("DELETE FROM backup_archives WHERE path = ?")
                .bind(path.to_string_lossy().as_ref())
                .execute(&*self.db)
                .await?;
        }
        Ok(())
    }

    /// `(count, total bytes)` over all indexed archives.
    pub async fn totals(&self) -> BackupResult<(i64, i64)> {
        let totals = sqlx::query_as::<_, (i64, i64)>(
            "SELECT COUNT(*), COALESCE(SUM(size_bytes), 0) FROM backup_archives",
        )
        .fetch_one(&*self.db)
        .await?;
        Ok(totals)
    }

    /// Index archives found on disk that have no row yet.
    ///
    /// Owner, timestamp and job type come from the file name, so archives
    /// written before the index existed stay listable and restorable.
    pub async fn import_from_disk(&self) -> BackupResult<usize> {
        let mut imported = 0;
        let mut owners = fs::read_dir(&self.root).await?;
        while let Some(owner_entry) = owners.next_entry().await? {
            if !owner_entry.file_type().await?.is_dir() {
                continue;
            }
            let mut files = fs::read_dir(owner_entry.path()).await?;
            while let Some(entry) = files.next_entry().await? {
                let Some(name) = entry.file_name().to_str().and_then(ArchiveName::parse) else {
                    continue;
                };
                let path = entry.path();
                if self.find_by_path(&path).await?.is_some() {
                    continue;
                }
                let meta = entry.metadata().await?;
                if !meta.is_file() {
                    continue;
                }
                let created_at = Local
                    .from_local_datetime(&name.created_local)
                    .earliest()
                    .map(|at| at.with_timezone(&Utc))
                    .unwrap_or_else(|| Utc.from_utc_datetime(&name.created_local));

                self.insert(&ArchiveRecord {
                    id: Uuid::new_v4(),
                    owner: name.owner,
                    schedule_id: None,
                    job_type: name.job_type,
                    created_at,
                    path: path.to_string_lossy().into_owned(),
                    size_bytes: meta.len() as i64,
                    checksum: None,
                    transport_status: TRANSPORT_NOT_REQUIRED.to_string(),
                })
                .await?;
                imported += 1;
            }
        }
        if imported > 0 {
            info!("indexed {} archives found on disk", imported);
        }
        Ok(imported)
    }
}

fn check_owner(owner: &str) -> BackupResult<()> {
    let unsafe_byte = |b: u8| b == b'/' || b == b'\\' || b.is_ascii_control();
    if owner.is_empty()
        || owner.len() > MAX_OWNER_LEN
        || owner.starts_with('.')
        || owner.bytes().any(unsafe_byte)
    {
        return Err(BackupError::InvalidOwner(owner.to_string()));
    }
    Ok(())
}

/// Fold `.` and `..` out of an absolute path without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}
