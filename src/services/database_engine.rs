//! Database engine client used to dump and re-apply account databases.

use crate::errors::{BackupError, BackupResult};
use crate::services::command;
use async_trait::async_trait;
use std::{fs::File, path::Path, process::Stdio, time::Duration};
use tokio::process::Command;

/// Schemas that ship with the server and are never backed up.
pub const SYSTEM_SCHEMAS: [&str; 4] = ["information_schema", "performance_schema", "mysql", "sys"];

pub fn is_system_schema(name: &str) -> bool {
    SYSTEM_SCHEMAS
        .iter()
        .any(|schema| schema.eq_ignore_ascii_case(name))
}

#[async_trait]
pub trait DatabaseEngine: Send + Sync {
    /// All databases on the server except the system schemas.
    async fn list_databases(&self) -> BackupResult<Vec<String>>;

    /// Write a SQL dump of `name` to `dest`.
    async fn dump(&self, name: &str, dest: &Path) -> BackupResult<()>;

    /// Pipe the SQL file at `source` into the existing database `name`.
    async fn restore(&self, name: &str, source: &Path) -> BackupResult<()>;
}

/// MySQL/MariaDB through the `mysql` and `mysqldump` command line clients.
///
/// Credentials come from the invoking user's option files (`~/.my.cnf`).
#[derive(Debug, Clone)]
pub struct MysqlCli {
    timeout: Duration,
}

impl MysqlCli {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

fn ensure_db_name_safe(name: &str) -> BackupResult<()> {
    if name.is_empty()
        || name.starts_with('-')
        || name.contains('/')
        || name.bytes().any(|b| b.is_ascii_control())
    {
        return Err(BackupError::DatabaseEngine(format!(
            "refusing unsafe database name `{name}`"
        )));
    }
    Ok(())
}

#[async_trait]
impl DatabaseEngine for MysqlCli {
    async fn list_databases(&self) -> BackupResult<Vec<String>> {
        let mut cmd = Command::new("mysql");
        cmd.args(["-N", "-B", "-e", "SHOW DATABASES"])
            .stdout(Stdio::piped());
        let stdout = command::run(cmd, self.timeout)
            .await
            .map_err(|err| BackupError::DatabaseEngine(err.detail()))?;

        Ok(String::from_utf8_lossy(&stdout)
            .lines()
            .map(str::trim)
            .filter(|name| !name.is_empty() && !is_system_schema(name))
            .map(str::to_string)
            .collect())
    }

    async fn dump(&self, name: &str, dest: &Path) -> BackupResult<()> {
        ensure_db_name_safe(name)?;
        let out = File::create(dest)?;
        let mut cmd = Command::new("mysqldump");
        cmd.arg("--single-transaction").arg(name).stdout(out);

        if let Err(err) = command::run(cmd, self.timeout).await {
            let _ = tokio::fs::remove_file(dest).await;
            return Err(BackupError::DumpFailed {
                database: name.to_string(),
                reason: err.detail(),
            });
        }
        Ok(())
    }

    async fn restore(&self, name: &str, source: &Path) -> BackupResult<()> {
        ensure_db_name_safe(name)?;
        let input = File::open(source)?;
        let mut cmd = Command::new("mysql");
        cmd.arg(name).stdin(input);

        command::run(cmd, self.timeout)
            .await
            .map(|_| ())
            .map_err(|err| BackupError::RestoreStepFailed {
                step: "databases",
                reason: format!("{name}: {}", err.detail()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_schemas_are_excluded_case_insensitively() {
        assert!(is_system_schema("mysql"));
        assert!(is_system_schema("INFORMATION_SCHEMA"));
        assert!(!is_system_schema("alice_wp"));
    }

    #[test]
    fn rejects_option_like_names() {
        assert!(ensure_db_name_safe("--all-databases").is_err());
        assert!(ensure_db_name_safe("../etc").is_err());
        assert!(ensure_db_name_safe("").is_err());
        assert!(ensure_db_name_safe("alice_shop").is_ok());
    }
}
