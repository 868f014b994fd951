//! Purge: deletes a rolled-back transaction's directory tree, tolerating
//! the two shapes a crash can leave behind -- a partially-finalized
//! commit directory still locked to mode 0, and a root that somehow ended
//! up a regular file rather than a directory.

use crate::error::CResult;
use crate::paths::Layout;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use uuid::Uuid;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

#[cfg(unix)]
const DIR_MODE: u32 = 0o700;

/// Removes the purge-area directory for `uuid`. A no-op if it's already
/// gone -- purge, like commit, must be safe to re-run during recovery.
pub(crate) fn purge(layout: &Layout, uuid: Uuid) -> CResult<()> {
    let root = layout.purge_dir_for(uuid);
    match fs::symlink_metadata(&root) {
        Ok(meta) if meta.is_dir() => purge_directory(&root),
        Ok(_) => remove_file_tolerant(&root),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn purge_directory(root: &Path) -> CResult<()> {
    restore_mode(root)?;
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            restore_mode(&path)?;
            for inner in fs::read_dir(&path)? {
                remove_file_tolerant(&inner?.path())?;
            }
            remove_dir_tolerant(&path)?;
        } else {
            remove_file_tolerant(&path)?;
        }
    }
    remove_dir_tolerant(root)
}

#[cfg(unix)]
fn restore_mode(path: &Path) -> CResult<()> {
    match fs::set_permissions(path, fs::Permissions::from_mode(DIR_MODE)) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(not(unix))]
fn restore_mode(_path: &Path) -> CResult<()> {
    Ok(())
}

fn remove_file_tolerant(path: &Path) -> CResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn remove_dir_tolerant(path: &Path) -> CResult<()> {
    match fs::remove_dir(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}
