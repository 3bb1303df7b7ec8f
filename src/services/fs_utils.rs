//! Directory copy/replace helpers shared by the archive builder and restore.

use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::fs;
use tracing::warn;
use walkdir::WalkDir;

/// Whether `path` exists and is a directory.
pub async fn dir_exists(path: &Path) -> bool {
    fs::metadata(path)
        .await
        .map(|meta| meta.is_dir())
        .unwrap_or(false)
}

/// What [`copy_dir`] did.
#[derive(Debug, Default)]
pub struct CopyReport {
    /// Regular files copied.
    pub copied: u64,
    /// Entries left out: FIFOs, sockets, devices and entries that could not
    /// be read.
    pub skipped: Vec<PathBuf>,
}

/// Recursively copy the contents of `src` into `dst`, creating `dst`.
///
/// Symlinks are recreated as symlinks, not followed. Only regular files are
/// copied; anything else is listed in [`CopyReport::skipped`].
pub async fn copy_dir(src: &Path, dst: &Path) -> io::Result<CopyReport> {
    let (src, dst) = (src.to_path_buf(), dst.to_path_buf());
    tokio::task::spawn_blocking(move || copy_tree(&src, &dst))
        .await
        .map_err(io::Error::other)?
}

fn copy_tree(src: &Path, dst: &Path) -> io::Result<CopyReport> {
    std::fs::metadata(src)?;
    std::fs::create_dir_all(dst)?;
    let mut report = CopyReport::default();

    for entry in WalkDir::new(src).follow_links(false).min_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("walk entry error (skipped): {}", err);
                if let Some(path) = err.path() {
                    report.skipped.push(path.to_path_buf());
                }
                continue;
            }
        };
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(io::Error::other)?;
        let target = dst.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            let link = std::fs::read_link(entry.path())?;
            remove_if_exists(&target)?;
            std::os::unix::fs::symlink(link, &target)?;
        } else if file_type.is_file() {
            std::fs::copy(entry.path(), &target)?;
            report.copied += 1;
        } else {
            warn!("skipping special file {}", entry.path().display());
            report.skipped.push(entry.path().to_path_buf());
        }
    }

    Ok(report)
}

/// Destructively replace the contents of `target` with those of `source`.
///
/// `target` itself is kept (or created), so its own ownership and mode
/// are left as they were.
pub async fn replace_dir_contents(target: &Path, source: &Path) -> io::Result<CopyReport> {
    fs::create_dir_all(target).await?;
    let mut entries = fs::read_dir(target).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            fs::remove_dir_all(entry.path()).await?;
        } else {
            fs::remove_file(entry.path()).await?;
        }
    }
    copy_dir(source, target).await
}

/// `chown -R uid:gid path`, without following symlinks.
pub async fn chown_recursive(path: &Path, uid: Option<u32>, gid: Option<u32>) -> io::Result<()> {
    if uid.is_none() && gid.is_none() {
        return Ok(());
    }
    let root = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        for entry in WalkDir::new(&root).follow_links(false) {
            let entry = entry?;
            std::os::unix::fs::lchown(entry.path(), uid, gid)?;
        }
        Ok::<(), io::Error>(())
    })
    .await
    .map_err(io::Error::other)?
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}
