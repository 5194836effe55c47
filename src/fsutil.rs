//! Filesystem helpers for staging and caching directory trees

use crate::error::{ShipcheckError, ShipcheckResult};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Copy `src` to `dst` recursively, replacing anything already at `dst`.
///
/// Symlinks are recreated rather than followed. Top-level entries named in
/// `skip` are left out. Runs on the blocking pool.
pub async fn copy_dir_clean(src: &Path, dst: &Path, skip: &[String]) -> ShipcheckResult<()> {
    let src = src.to_path_buf();
    let dst = dst.to_path_buf();
    let skip = skip.to_vec();
    tokio::task::spawn_blocking(move || copy_dir_clean_blocking(&src, &dst, &skip))
        .await
        .map_err(|e| ShipcheckError::Internal(format!("copy task failed: {e}")))?
}

/// Remove a file, symlink or directory tree if present
pub async fn remove_path(path: &Path) -> ShipcheckResult<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || remove_path_blocking(&path))
        .await
        .map_err(|e| ShipcheckError::Internal(format!("remove task failed: {e}")))?
}

/// Total size in bytes of regular files under `path`
pub fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// Format bytes as human-readable size (e.g., "1.5 GB")
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

fn copy_dir_clean_blocking(src: &Path, dst: &Path, skip: &[String]) -> ShipcheckResult<()> {
    if !src.is_dir() {
        return Err(ShipcheckError::io(
            format!("copying {}", src.display()),
            std::io::Error::new(std::io::ErrorKind::NotFound, "source is not a directory"),
        ));
    }

    remove_path_blocking(dst)?;
    fs::create_dir_all(dst)
        .map_err(|e| ShipcheckError::io(format!("creating {}", dst.display()), e))?;

    let walker = WalkDir::new(src)
        .follow_links(false)
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| {
            !(entry.depth() == 1
                && skip
                    .iter()
                    .any(|name| entry.file_name().to_string_lossy() == name.as_str()))
        });

    for entry in walker {
        let entry = entry.map_err(|e| {
            let context = format!("walking {}", src.display());
            match e.into_io_error() {
                Some(io) => ShipcheckError::io(context, io),
                None => ShipcheckError::Internal(context),
            }
        })?;

        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| ShipcheckError::Internal(e.to_string()))?;
        let target = dst.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)
                .map_err(|e| ShipcheckError::io(format!("creating {}", target.display()), e))?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path()).map_err(|e| {
                ShipcheckError::io(format!("reading link {}", entry.path().display()), e)
            })?;
            symlink(&link, &target)?;
        } else {
            fs::copy(entry.path(), &target).map_err(|e| {
                ShipcheckError::io(
                    format!("copying {} to {}", entry.path().display(), target.display()),
                    e,
                )
            })?;
        }
    }

    Ok(())
}

fn remove_path_blocking(path: &Path) -> ShipcheckResult<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(ShipcheckError::io(format!("inspecting {}", path.display()), e)),
    };

    let result = if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    result.map_err(|e| ShipcheckError::io(format!("removing {}", path.display()), e))
}

#[cfg(unix)]
fn symlink(link: &Path, target: &Path) -> ShipcheckResult<()> {
    std::os::unix::fs::symlink(link, target)
        .map_err(|e| ShipcheckError::io(format!("creating symlink {}", target.display()), e))
}

#[cfg(not(unix))]
fn symlink(link: &Path, target: &Path) -> ShipcheckResult<()> {
    let resolved: PathBuf = target
        .parent()
        .map(|p| p.join(link))
        .unwrap_or_else(|| link.to_path_buf());
    let result = if resolved.is_dir() {
        std::os::windows::fs::symlink_dir(link, target)
    } else {
        std::os::windows::fs::symlink_file(link, target)
    };
    result.map_err(|e| ShipcheckError::io(format!("creating symlink {}", target.display()), e))
}

/// `<path>.partial` sibling used while a tree is being written
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}
