//! Indexed backup archives and the on-disk naming convention.

use crate::models::schedule::JobType;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

pub const ARCHIVE_EXTENSION: &str = ".tar.gz";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";
const TIMESTAMP_LEN: usize = 19;

/// Transport state recorded when no copy is required.
pub const TRANSPORT_NOT_REQUIRED: &str = "not_required";
pub const TRANSPORT_COMPLETE: &str = "complete";

/// One packaged archive.
///
/// The archive file itself lives under `<backups_root>/<owner>/`; this row
/// carries the metadata that the file name only encodes partially.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ArchiveRecord {
    pub id: Uuid,

    /// Account username, or `system`.
    pub owner: String,

    /// Schedule that produced the archive. `None` for imported archives.
    pub schedule_id: Option<Uuid>,

    pub job_type: JobType,
    pub created_at: DateTime<Utc>,

    /// Absolute path of the archive file.
    pub path: String,

    pub size_bytes: i64,

    /// MD5 of the archive, hex encoded.
    pub checksum: Option<String>,

    /// `not_required`, `complete` or `failed: <message>`.
    pub transport_status: String,
}

/// The `<owner>_<YYYY-MM-DD_HH-MM-SS>_<job_type>.tar.gz` file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveName {
    pub owner: String,
    /// Server-local wall clock time of creation.
    pub created_local: NaiveDateTime,
    pub job_type: JobType,
}

impl ArchiveName {
    pub fn new(owner: impl Into<String>, created_local: NaiveDateTime, job_type: JobType) -> Self {
        Self {
            owner: owner.into(),
            created_local,
            job_type,
        }
    }

    pub fn file_name(&self) -> String {
        format!(
            "{}_{}_{}{}",
            self.owner,
            self.created_local.format(TIMESTAMP_FORMAT),
            self.job_type.as_str(),
            ARCHIVE_EXTENSION
        )
    }

    /// Parse a file name produced by [`ArchiveName::file_name`].
    ///
    /// Owners may contain underscores, so the name is taken apart from the
    /// right: job type suffix first, then the fixed-width timestamp.
    pub fn parse(file_name: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(ARCHIVE_EXTENSION)?;

        let (rest, job_type) = JobType::ALL.iter().find_map(|job_type| {
            stem.strip_suffix(job_type.as_str())
                .and_then(|rest| rest.strip_suffix('_'))
                .map(|rest| (rest, *job_type))
        })?;

        if rest.len() < TIMESTAMP_LEN + 2 || !rest.is_char_boundary(rest.len() - TIMESTAMP_LEN) {
            return None;
        }
        let (owner_part, timestamp) = rest.split_at(rest.len() - TIMESTAMP_LEN);
        let owner = owner_part.strip_suffix('_')?;
        if owner.is_empty() {
            return None;
        }
        let created_local = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).ok()?;

        Some(Self::new(owner, created_local, job_type))
    }
}

/// Query parameters for listing archives.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArchiveFilter {
    pub owner: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::schedule::SYSTEM_OWNER;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 6)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn formats_file_name() {
        let name = ArchiveName::new("alice", at(2, 0, 7), JobType::Full);
        assert_eq!(name.file_name(), "alice_2024-03-06_02-00-07_full.tar.gz");
    }

    #[test]
    fn parses_owner_with_underscores() {
        let parsed = ArchiveName::parse("shop_owner_2024-03-06_23-59-59_databases_only.tar.gz")
            .unwrap();
        assert_eq!(parsed.owner, "shop_owner");
        assert_eq!(parsed.job_type, JobType::DatabasesOnly);
        assert_eq!(parsed.created_local, at(23, 59, 59));
    }

    #[test]
    fn parses_what_it_formats() {
        for job_type in JobType::ALL {
            let name = ArchiveName::new(SYSTEM_OWNER, at(4, 5, 6), job_type);
            assert_eq!(ArchiveName::parse(&name.file_name()), Some(name));
        }
    }

    #[test]
    fn rejects_foreign_names() {
        assert!(ArchiveName::parse("notes.txt").is_none());
        assert!(ArchiveName::parse("alice_full.tar.gz").is_none());
        assert!(ArchiveName::parse("_2024-03-06_02-00-07_full.tar.gz").is_none());
        assert!(ArchiveName::parse("alice_2024-13-06_02-00-07_full.tar.gz").is_none());
        assert!(ArchiveName::parse("alice_2024-03-06_02-00-07_weekly.tar.gz").is_none());
    }
}
