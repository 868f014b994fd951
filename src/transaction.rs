//! Transactions: a private staging area (its own object pool and namespace)
//! that becomes visible to the rest of the store only at `commit()`, via the
//! commit pipeline in [`crate::commit`].

use crate::error::{CResult, Error};
use crate::paths::{private_namespace_dir, private_objects_dir};
use crate::hash::{ContentHash, KeyHash};
use crate::store::Store;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use uuid::Uuid;

#[cfg(unix)]
use std::os::unix::fs::{symlink, PermissionsExt};

#[cfg(unix)]
const DIR_MODE: u32 = 0o700;

/// A staged set of writes against a [`Store`]. Nothing written through a
/// `Transaction` is visible to `Store::get` until [`Transaction::commit`]
/// runs; dropping a `Transaction` without committing rolls it back.
pub struct Transaction<'s> {
    store: &'s Store,
    uuid: Uuid,
    staging_dir: PathBuf,
    private_objects: PathBuf,
    private_namespace: PathBuf,
    done: bool,
}

impl<'s> Transaction<'s> {
    pub(crate) fn begin(store: &'s Store) -> CResult<Self> {
        let layout = store.layout();
        loop {
            let uuid = Uuid::new_v4();
            let staging_dir = layout.transaction_dir(uuid);
            match fs::create_dir(&staging_dir) {
                Ok(()) => {
                    let private_objects = private_objects_dir(&staging_dir);
                    let private_namespace = private_namespace_dir(&staging_dir);
                    create_dir_mode(&private_objects)?;
                    create_dir_mode(&private_namespace)?;
                    log::debug!("transaction {}: started", uuid);
                    return Ok(Self {
                        store,
                        uuid,
                        staging_dir,
                        private_objects,
                        private_namespace,
                        done: false,
                    });
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// This transaction's identifier, also the name of its staging
    /// directory and (after commit or rollback) its commit- or
    /// purge-area directory.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub(crate) fn staging_dir(&self) -> &std::path::Path {
        &self.staging_dir
    }

    /// Stages `data` under `key`. A later `put` for the same key within
    /// this transaction replaces the earlier one; nothing is visible
    /// outside the transaction until `commit`.
    pub fn put(&mut self, key: &[u8], data: Vec<u8>) -> CResult<()> {
        let content_hash = ContentHash::of(&data);
        let key_hash = KeyHash::of(key);

        let object_path = self.private_objects.join(content_hash.as_str());
        if !object_path.exists() {
            let tmp_path = self
                .private_objects
                .join(format!(".{}.tmp", content_hash.as_str()));
            fs::write(&tmp_path, &data)?;
            fs::rename(&tmp_path, &object_path)?;
        }

        let link_path = self.private_namespace.join(key_hash.as_str());
        match fs::read_link(&link_path) {
            Ok(target) if target.to_str() == Some(content_hash.as_str()) => {}
            Ok(_) => {
                fs::remove_file(&link_path)?;
                symlink(content_hash.as_str(), &link_path)?;
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                symlink(content_hash.as_str(), &link_path)?;
            }
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }

    /// Reads back a value staged by this transaction, falling through to
    /// the store's committed state for a key this transaction hasn't
    /// touched.
    pub fn get(&self, key: &[u8]) -> CResult<Option<Vec<u8>>> {
        let key_hash = KeyHash::of(key);
        let link_path = self.private_namespace.join(key_hash.as_str());
        match fs::read_link(&link_path) {
            Ok(target) => {
                let content_hash = target.to_str().ok_or_else(|| {
                    Error::Internal(format!("non-utf8 symlink target at {:?}", link_path))
                })?;
                let object_path = self.private_objects.join(content_hash);
                return Ok(Some(fs::read(&object_path)?));
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        self.store.get(key)
    }

    /// Publishes every staged write, running the commit pipeline to
    /// completion before returning. Calling this (or `rollback`) a second
    /// time on the same transaction returns `Error::AlreadyFinalized`.
    pub fn commit(&mut self) -> CResult<()> {
        if self.done {
            return Err(Error::AlreadyFinalized);
        }
        self.done = true;
        let commit_dir = self.store.layout().commit_dir(self.uuid);
        fs::rename(&self.staging_dir, &commit_dir)?;
        log::debug!("transaction {}: committing", self.uuid);
        self.store.commit(self.uuid)
    }

    /// Discards every staged write.
    pub fn rollback(&mut self) -> CResult<()> {
        if self.done {
            return Err(Error::AlreadyFinalized);
        }
        self.done = true;
        let purge_dir = self.store.layout().purge_dir_for(self.uuid);
        fs::rename(&self.staging_dir, &purge_dir)?;
        log::debug!("transaction {}: rolling back", self.uuid);
        self.store.purge(self.uuid)
    }
}

/// Rolls back a transaction that goes out of scope without an explicit
/// `commit` or `rollback` call. This is the one place in the crate that
/// logs an error instead of propagating it -- `drop` has no `Result` to
/// return it through.
impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        let purge_dir = self.store.layout().purge_dir_for(self.uuid);
        if let Err(err) = fs::rename(&self.staging_dir, &purge_dir) {
            log::error!(
                "transaction {}: drop rollback rename failed: {}",
                self.uuid,
                err
            );
            return;
        }
        if let Err(err) = self.store.purge(self.uuid) {
            log::error!("transaction {}: drop rollback purge failed: {}", self.uuid, err);
        }
    }
}

#[cfg(unix)]
fn create_dir_mode(path: &std::path::Path) -> CResult<()> {
    fs::create_dir(path)?;
    fs::set_permissions(path, fs::Permissions::from_mode(DIR_MODE))?;
    Ok(())
}

#[cfg(not(unix))]
fn create_dir_mode(path: &std::path::Path) -> CResult<()> {
    fs::create_dir(path)?;
    Ok(())
}
