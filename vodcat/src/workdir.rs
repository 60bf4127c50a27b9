//! Working directory selection and preparation.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::database::WorkdirCache;
use crate::utils::fs::{absolutize, io_error, map_path};
use crate::Result;

/// Where the working directory for `url` should live, before any cache or
/// filesystem changes.
///
/// An explicit `user_workdir` wins; otherwise it is `output` without its
/// extension. Either is mapped under `workroot` when one is set.
pub fn default_working_directory(
    output: &Path,
    workroot: Option<&Path>,
    user_workdir: Option<&Path>,
) -> Result<PathBuf> {
    let base = match user_workdir {
        Some(dir) => dir.to_path_buf(),
        None => output.with_extension(""),
    };
    match workroot {
        Some(root) => map_path(&base, root),
        None => Ok(base),
    }
}

/// Choose, create and record the working directory for `url`.
///
/// Without an explicit `user_workdir` a directory remembered in `cache` is
/// reused as long as it still exists; a remembered directory that is gone
/// is forgotten. `wipe` deletes whatever is at the chosen path first.
pub async fn prepare_working_directory(
    url: &str,
    output: &Path,
    workroot: Option<&Path>,
    user_workdir: Option<&Path>,
    wipe: bool,
    cache: &WorkdirCache,
) -> Result<PathBuf> {
    let session = cache.session().await;

    let mut workdir = default_working_directory(output, workroot, user_workdir)?;
    if user_workdir.is_none()
        && let Some(cached) = session.lookup(url).await
    {
        if cached.is_dir() {
            if absolutize(&cached) != absolutize(&workdir) {
                warn!(
                    "using \"{}\" as working directory for segments and other intermediate files; \
                     use --workdir to specify a different working directory",
                    cached.display()
                );
            }
            workdir = cached;
        } else {
            session.remove(url).await;
        }
    }

    if wipe {
        match tokio::fs::symlink_metadata(&workdir).await {
            Ok(meta) => {
                info!(path = %workdir.display(), "Wiping working directory");
                let removed = if meta.is_dir() {
                    tokio::fs::remove_dir_all(&workdir).await
                } else {
                    tokio::fs::remove_file(&workdir).await
                };
                removed.map_err(|e| io_error("wiping", &workdir, e))?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_error("inspecting", &workdir, e)),
        }
    }

    // Parents are only created under a work root.
    let created = if workroot.is_some() {
        tokio::fs::create_dir_all(&workdir).await
    } else {
        match tokio::fs::create_dir(&workdir).await {
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && workdir.is_dir() => Ok(()),
            other => other,
        }
    };
    created.map_err(|e| io_error("creating directory", &workdir, e))?;

    let workdir = absolutize(&workdir);
    session.upsert(url, &workdir).await;
    Ok(workdir)
}
