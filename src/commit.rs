//! The commit pipeline: the crash-tolerant sequence of hard-link and
//! rename operations that migrates a staged transaction's objects and
//! namespace entries into the shared store.
//!
//! Every stage below is individually idempotent, and [`run_commit_pipeline`]
//! itself is safe to call more than once for the same UUID -- both the
//! first call (from [`crate::transaction::Transaction::commit`]) and any
//! later call (from [`crate::store::Store`]'s crash recovery) run exactly
//! the same code.
//!
//! Resuming after a crash requires one thing a literal reading of the
//! staged-commit description doesn't make obvious: a transaction's commit
//! directory may have been left with mode 0 (see stage 3) by a process
//! that died between stages 3 and 4. Recovery can't even list the private
//! namespace to figure out what's left to do until that mode is restored,
//! so every run of this pipeline restores the commit directory to its
//! normal mode *before* inspecting anything -- stage 3 then reapplies
//! mode 0 for its own duration exactly as it would on a first run.

use crate::error::CResult;
use crate::hash::{ContentHash, KeyHash};
use crate::paths::{private_namespace_dir, private_objects_dir, Layout, PROCESSED_SUFFIX};
use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use uuid::Uuid;

#[cfg(unix)]
use std::os::unix::fs::{symlink, PermissionsExt};

#[cfg(unix)]
const DIR_MODE: u32 = 0o700;
#[cfg(unix)]
const LOCKOUT_MODE: u32 = 0o000;

/// Runs the full commit pipeline for the transaction `uuid`, which must
/// already have been renamed into the commit area. A no-op if the commit
/// directory no longer exists (a previous run already finished it).
pub(crate) fn run_commit_pipeline(layout: &Layout, uuid: Uuid) -> CResult<()> {
    let commit_dir = layout.commit_dir(uuid);
    if !commit_dir.exists() {
        return Ok(());
    }

    log::debug!("commit {}: pipeline starting", uuid);
    set_dir_mode(&commit_dir, DIR_MODE)?;

    let private_objects = private_objects_dir(&commit_dir);
    let private_namespace = private_namespace_dir(&commit_dir);

    if read_dir_names(&private_namespace)?.is_empty() {
        log::debug!("commit {}: fast path, nothing staged", uuid);
        finalize(layout, uuid)?;
        return Ok(());
    }

    stage1_integrate_objects(layout, &private_objects, &private_namespace)?;
    stage2_promote_namespace(layout, &private_objects, &private_namespace)?;

    // Re-scan once after stages 1-2 have converted every live entry into a
    // `<key-hash>-` regular file; stages 3 and 4 both operate over this
    // same set of entries.
    let entries = read_dir_names(&private_namespace)?;
    stage3_publish_pending(layout, &commit_dir, &private_namespace, &entries)?;
    stage4_swap_live_namespace(layout, &commit_dir, &private_namespace, &entries)?;

    finalize(layout, uuid)?;
    log::debug!("commit {}: pipeline finished", uuid);
    Ok(())
}

/// Stage 1: moves private-pool objects into the shared object store,
/// dropping orphans the transaction's own deduplication never referenced.
fn stage1_integrate_objects(
    layout: &Layout,
    private_objects: &Path,
    private_namespace: &Path,
) -> CResult<()> {
    let live_targets: HashSet<String> = read_dir_names(private_namespace)?
        .into_iter()
        .filter(|name| !name.ends_with(PROCESSED_SUFFIX))
        .map(|name| read_link_name(&private_namespace.join(&name)))
        .collect::<CResult<_>>()?;

    for name in read_dir_names(private_objects)? {
        let entry_path = private_objects.join(&name);

        if !live_targets.contains(&name) {
            log::trace!("commit: unlinking orphan object {}", name);
            remove_file_tolerant(&entry_path)?;
            continue;
        }

        if name.ends_with(PROCESSED_SUFFIX) {
            continue;
        }
        let sentinel_path = suffixed(private_objects, &name);
        if sentinel_path.exists() {
            continue;
        }

        let content_hash = ContentHash::from_hex(name.clone());
        let shared_path = layout.object_path(&content_hash);
        link_with_bounded_retry(&shared_path, &sentinel_path, &entry_path)?;
        remove_file_tolerant(&entry_path)?;
    }
    Ok(())
}

/// Stage 2: promotes each live private-namespace symlink into a regular
/// file holding the final committed value, and drops its now-redundant
/// sentinel in the private object pool.
fn stage2_promote_namespace(
    layout: &Layout,
    private_objects: &Path,
    private_namespace: &Path,
) -> CResult<()> {
    for name in read_dir_names(private_namespace)? {
        if name.ends_with(PROCESSED_SUFFIX) {
            continue;
        }
        let suffixed_path = suffixed(private_namespace, &name);
        let entry_path = private_namespace.join(&name);

        if suffixed_path.exists() {
            // A previous run already hard-linked the promoted value file
            // (line below) but crashed before removing the original
            // symlink and its pool sentinel. Finish that cleanup without
            // re-linking; leaving the symlink in place would make it show
            // up alongside `<name>-` in the `entries` list stages 3 and 4
            // build next, and stage 3 could publish the `:committed`
            // side-link against the stale symlink instead of the value.
            if let Ok(target) = read_link_name(&entry_path) {
                remove_file_tolerant(&suffixed(private_objects, &target))?;
            }
            remove_file_tolerant(&entry_path)?;
            continue;
        }

        let target = read_link_name(&entry_path)?;
        let content_hash = ContentHash::from_hex(target.clone());
        let shared_object = layout.object_path(&content_hash);

        fs::hard_link(&shared_object, &suffixed_path)?;
        fs::remove_file(&entry_path)?;
        remove_file_tolerant(&suffixed(private_objects, &target))?;
    }
    Ok(())
}

/// Stage 3: publishes a `:committed` side-link for each pending entry
/// while the commit directory is locked out (mode 0), so a concurrent
/// reader that loses the race on the live namespace file still finds a
/// value through the side-link.
fn stage3_publish_pending(
    layout: &Layout,
    commit_dir: &Path,
    private_namespace: &Path,
    entries: &[String],
) -> CResult<()> {
    set_dir_mode(commit_dir, LOCKOUT_MODE)?;
    for name in entries {
        let key_hash = KeyHash::from_hex(strip_suffix(name));
        let entry_path = private_namespace.join(name);
        let committed_path = layout.namespace_committed_path(&key_hash);
        match symlink(&entry_path, &committed_path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

/// Stage 4: the atomic publication. Each rename is the single operation
/// that makes a new value visible to committed reads.
fn stage4_swap_live_namespace(
    layout: &Layout,
    commit_dir: &Path,
    private_namespace: &Path,
    entries: &[String],
) -> CResult<()> {
    set_dir_mode(commit_dir, DIR_MODE)?;
    for name in entries {
        let key_hash = KeyHash::from_hex(strip_suffix(name));
        let entry_path = private_namespace.join(name);
        if !entry_path.exists() {
            // Already renamed out by a previous, interrupted run.
            continue;
        }
        let live_path = layout.namespace_path(&key_hash);
        remove_file_tolerant(&live_path)?;
        fs::rename(&entry_path, &live_path)?;
        remove_file_tolerant(&layout.namespace_committed_path(&key_hash))?;
    }
    Ok(())
}

/// Removes the now-empty staging directories and the commit directory
/// itself. Tolerates any of them already being gone.
fn finalize(layout: &Layout, uuid: Uuid) -> CResult<()> {
    let commit_dir = layout.commit_dir(uuid);
    remove_dir_tolerant(&private_objects_dir(&commit_dir))?;
    remove_dir_tolerant(&private_namespace_dir(&commit_dir))?;
    remove_dir_tolerant(&commit_dir)?;
    Ok(())
}

/// Hard-links `shared` to `sentinel`, creating `shared` from `private`
/// first if it doesn't exist yet. Bounded to one extra attempt, per the
/// error-handling design: the only race this tolerates is a concurrent
/// committer inserting the same content between our two attempts.
fn link_with_bounded_retry(shared: &Path, sentinel: &Path, private: &Path) -> CResult<()> {
    match fs::hard_link(shared, sentinel) {
        Ok(()) => return Ok(()),
        Err(err) if err.kind() == ErrorKind::AlreadyExists => return Ok(()),
        Err(err) if err.kind() != ErrorKind::NotFound => return Err(err.into()),
        Err(_) => {}
    }

    match fs::hard_link(private, shared) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::AlreadyExists => {}
        Err(err) => return Err(err.into()),
    }

    fs::hard_link(shared, sentinel).map_err(Into::into)
}

fn suffixed(dir: &Path, name: &str) -> std::path::PathBuf {
    dir.join(format!("{}{}", name, PROCESSED_SUFFIX))
}

fn strip_suffix(name: &str) -> &str {
    name.strip_suffix(PROCESSED_SUFFIX).unwrap_or(name)
}

fn read_link_name(path: &Path) -> CResult<String> {
    let target = fs::read_link(path)?;
    target
        .to_str()
        .map(str::to_owned)
        .ok_or_else(|| crate::error::Error::Internal(format!("non-utf8 symlink target at {:?}", path)))
}

/// Lists entry names in `dir`, treating a missing directory as empty
/// rather than an error -- needed so recovery can resume after a crash
/// that already removed a staging directory.
fn read_dir_names(dir: &Path) -> CResult<Vec<String>> {
    match fs::read_dir(dir) {
        Ok(entries) => entries
            .map(|entry| {
                let entry = entry?;
                entry
                    .file_name()
                    .into_string()
                    .map_err(|_| crate::error::Error::Internal(format!("non-utf8 entry in {:?}", dir)))
            })
            .collect(),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(err.into()),
    }
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

#[cfg(unix)]
fn set_dir_mode(path: &Path, mode: u32) -> CResult<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_dir_mode(_path: &Path, _mode: u32) -> CResult<()> {
    Ok(())
}
