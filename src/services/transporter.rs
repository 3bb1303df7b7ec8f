//! Copies a finished archive to its configured destination.

use crate::errors::{BackupError, BackupResult};
use crate::models::{
    archive::{TRANSPORT_COMPLETE, TRANSPORT_NOT_REQUIRED},
    schedule::Destination,
};
use crate::services::command;
use std::{ffi::OsString, path::Path, time::Duration};
use tokio::process::Command;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportOutcome {
    NotRequired,
    Complete,
}

impl TransportOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportOutcome::NotRequired => TRANSPORT_NOT_REQUIRED,
            TransportOutcome::Complete => TRANSPORT_COMPLETE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Transporter {
    timeout: Duration,
}

impl Transporter {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Send `archive` to `destination`. The local archive is never touched.
    pub async fn send(
        &self,
        archive: &Path,
        owner: &str,
        destination: &Destination,
    ) -> BackupResult<TransportOutcome> {
        let Some(cmd) = transport_command(archive, owner, destination)? else {
            return Ok(TransportOutcome::NotRequired);
        };

        command::run(cmd, self.timeout)
            .await
            .map_err(|err| BackupError::TransportFailed(err.detail()))?;

        info!("archive {} copied to {:?}", archive.display(), destination);
        Ok(TransportOutcome::Complete)
    }
}

/// Build the copy command for `destination`, or `None` for local storage.
fn transport_command(
    archive: &Path,
    owner: &str,
    destination: &Destination,
) -> BackupResult<Option<Command>> {
    let file_name = archive
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| {
            BackupError::TransportFailed(format!("`{}` has no file name", archive.display()))
        })?;

    match destination {
        Destination::Local => Ok(None),
        Destination::S3 { bucket, region } => {
            let mut cmd = Command::new("aws");
            cmd.args(["s3", "cp"])
                .arg(archive)
                .arg(format!("s3://{bucket}/{owner}/{file_name}"))
                .arg("--region")
                .arg(region)
                .arg("--only-show-errors");
            Ok(Some(cmd))
        }
        Destination::Remote {
            host,
            user,
            path,
            port,
        } => {
            let target: OsString =
                format!("{user}@{host}:{}/", path.trim_end_matches('/')).into();
            let mut cmd = Command::new("scp");
            cmd.arg("-P")
                .arg(port.to_string())
                .args(["-o", "BatchMode=yes", "-o", "StrictHostKeyChecking=accept-new"])
                .arg(archive)
                .arg(target);
            Ok(Some(cmd))
        }
    }
}
