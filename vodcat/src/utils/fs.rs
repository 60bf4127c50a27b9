//! Filesystem helpers shared across modules.
//!
//! Besides error context these cover the path bookkeeping of a run:
//! absolute paths, mapping a path under a work root, pruning empty
//! directories, and moving files aside as backups.

use std::path::{Component, Path, PathBuf, Prefix};

use chrono::Local;
use tracing::{debug, info};

use crate::{Error, Result};

/// Convert an IO error into an application error with operation + path context.
pub fn io_error(op: &'static str, path: &Path, source: std::io::Error) -> Error {
    Error::io_path(op, path, source)
}

/// Absolute form of `path`, resolving symlinks in its parent when it exists.
pub fn absolutize(path: &Path) -> PathBuf {
    if let (Some(parent), Some(name)) = (path.parent(), path.file_name()) {
        let parent = if parent.as_os_str().is_empty() {
            Path::new(".")
        } else {
            parent
        };
        if let Ok(parent) = std::fs::canonicalize(parent) {
            return parent.join(name);
        }
    } else if let Ok(resolved) = std::fs::canonicalize(path) {
        return resolved;
    }
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Map `path` to the equivalent subpath of `root`, creating missing ancestors.
///
/// `/home/user/video.mp4` under `/tmp/root` becomes
/// `/tmp/root/home/user/video.mp4`. Windows drives map to a child named after
/// the letter (`C:\a` becomes `root\C\a`), UNC shares to `root\host\share`.
pub fn map_path(path: &Path, root: &Path) -> Result<PathBuf> {
    let path = absolutize(path);
    let name = path
        .file_name()
        .ok_or_else(|| Error::validation(format!("cannot map {} under a work root", path.display())))?;

    let mut mapped = root.to_path_buf();
    if let Some(parent) = path.parent() {
        for component in parent.components() {
            match component {
                Component::Prefix(prefix) => match prefix.kind() {
                    Prefix::Disk(letter) | Prefix::VerbatimDisk(letter) => {
                        mapped.push(char::from(letter).to_string());
                    }
                    Prefix::UNC(host, share) | Prefix::VerbatimUNC(host, share) => {
                        mapped.push(host);
                        mapped.push(share);
                    }
                    _ => {
                        return Err(Error::validation(format!(
                            "unrecognized path prefix in {}",
                            path.display()
                        )));
                    }
                },
                Component::Normal(part) => mapped.push(part),
                Component::RootDir | Component::CurDir | Component::ParentDir => {}
            }
        }
    }

    std::fs::create_dir_all(&mapped).map_err(|e| io_error("creating directory", &mapped, e))?;
    Ok(mapped.join(name))
}

/// Remove `path` and then its ancestors while they are empty, stopping at
/// `root` (never removed) or the first directory that cannot be removed.
pub fn rmdir_p(path: &Path, root: Option<&Path>) {
    let root = root.map(absolutize);
    let mut current = absolutize(path);
    while current.file_name().is_some() && Some(&current) != root.as_ref() {
        if std::fs::remove_dir(&current).is_err() {
            break;
        }
        debug!(path = %current.display(), "Removed empty directory");
        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

/// Rename `path` to a free backup name and return it.
///
/// Tries `<name>.bak`, then `<name>.<YYYYmmddHHMMSS>.bak`, then
/// `<name>.<YYYYmmddHHMMSS>.bak.<n>`.
pub fn move_to_backup(path: &Path) -> Result<PathBuf> {
    let mut backup = sibling(path, ".bak");
    if backup.exists() {
        let stamp = Local::now().format("%Y%m%d%H%M%S").to_string();
        backup = sibling(path, &format!(".{stamp}.bak"));
        let mut index = 1;
        while backup.exists() {
            backup = sibling(path, &format!(".{stamp}.bak.{index}"));
            index += 1;
        }
    }
    info!(from = %path.display(), to = %backup.display(), "Moving existing file to backup");
    std::fs::rename(path, &backup).map_err(|e| io_error("backing up", path, e))?;
    Ok(backup)
}

/// Move a file, falling back to copy + delete across filesystems.
pub async fn move_file(from: &Path, to: &Path) -> Result<()> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to)
        .await
        .map_err(|e| io_error("copying", from, e))?;
    tokio::fs::remove_file(from)
        .await
        .map_err(|e| io_error("removing", from, e))
}

/// Check that a file can be created at `path`, leaving nothing behind.
pub async fn probe_writable(path: &Path) -> Result<()> {
    tokio::fs::File::create(path)
        .await
        .map_err(|e| io_error("creating", path, e))?;
    tokio::fs::remove_file(path)
        .await
        .map_err(|e| io_error("removing", path, e))
}
