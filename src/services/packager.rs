//! Compresses a staging directory into a single `.tar.gz` archive.

use crate::errors::{BackupError, BackupResult};
use crate::services::command;
use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};
use tempfile::TempDir;
use tokio::{
    fs::{self, File},
    io::AsyncReadExt,
    process::Command,
};
use tracing::{debug, warn};

/// A finished archive file.
#[derive(Debug, Clone)]
pub struct PackedArchive {
    pub path: PathBuf,
    pub size_bytes: i64,
    pub checksum: String,
}

#[derive(Debug, Clone)]
pub struct Packager {
    timeout: Duration,
}

impl Packager {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Compress `staging` into `output`.
    ///
    /// The staging directory is consumed and removed on every exit path. A
    /// partial output file is removed when `tar` fails.
    pub async fn pack(&self, staging: TempDir, output: &Path) -> BackupResult<PackedArchive> {
        let result = self.compress(staging.path(), output).await;

        let staging_path = staging.path().to_path_buf();
        if let Err(err) = staging.close() {
            warn!(
                "failed to remove staging directory {}: {}",
                staging_path.display(),
                err
            );
        }

        if let Err(err) = result {
            match fs::remove_file(output).await {
                Ok(()) => debug!("removed partial archive {}", output.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("failed to remove partial archive {}: {}", output.display(), e),
            }
            return Err(err);
        }

        let size_bytes = fs::metadata(output).await?.len() as i64;
        let checksum = md5_file(output).await?;

        Ok(PackedArchive {
            path: output.to_path_buf(),
            size_bytes,
            checksum,
        })
    }

    async fn compress(&self, staging: &Path, output: &Path) -> BackupResult<()> {
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut cmd = Command::new("tar");
        cmd.arg("-czf").arg(output).arg("-C").arg(staging).arg(".");
        command::run(cmd, self.timeout)
            .await
            .map(|_| ())
            .map_err(|err| BackupError::PackagingFailed(err.detail()))
    }
}

/// Hex MD5 of a file, computed while streaming it.
pub async fn md5_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path).await?;
    let mut digest = md5::Context::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        digest.consume(&buf[..read]);
    }
    Ok(format!("{:x}", digest.compute()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn packs_and_removes_staging() {
        let tmp = TempDir::new().unwrap();
        let staging = TempDir::new_in(tmp.path()).unwrap();
        std::fs::create_dir_all(staging.path().join("files")).unwrap();
        std::fs::write(staging.path().join("files/index.php"), b"<?php echo 1;").unwrap();
        let staging_path = staging.path().to_path_buf();

        let output = tmp.path().join("alice/alice_2024-03-06_02-00-00_full.tar.gz");
        let packed = Packager::new(Duration::from_secs(30))
            .pack(staging, &output)
            .await
            .unwrap();

        assert!(output.exists());
        assert!(!staging_path.exists());
        assert_eq!(packed.size_bytes as u64, std::fs::metadata(&output).unwrap().len());
        assert_eq!(packed.checksum.len(), 32);
    }

    #[tokio::test]
    async fn tar_failure_is_packaging_failed() {
        let tmp = TempDir::new().unwrap();
        let staging = TempDir::new_in(tmp.path()).unwrap();
        let staging_path = staging.path().to_path_buf();
        // tar cannot change into a directory that is gone.
        std::fs::remove_dir(&staging_path).unwrap();
        let output = tmp.path().join("out.tar.gz");

        let err = Packager::new(Duration::from_secs(30))
            .pack(staging, &output)
            .await
            .unwrap_err();

        match err {
            BackupError::PackagingFailed(detail) => assert!(!detail.is_empty()),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn md5_matches_known_digest() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("abc");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(
            md5_file(&path).await.unwrap(),
            "900150983cd24fb0d6963f7d28e17f72"
        );
    }
}
