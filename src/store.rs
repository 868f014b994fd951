//! The store: owns the five on-disk areas rooted at one directory, answers
//! committed reads, mints transactions, and runs the commit/purge pipelines
//! on their behalf.

use crate::commit;
use crate::error::{CResult, Error};
use crate::hash::KeyHash;
use crate::paths::Layout;
use crate::purge;
use crate::transaction::Transaction;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Directory mode used for every engine-created directory.
#[cfg(unix)]
const DIR_MODE: u32 = 0o700;

/// A handle to a content-addressed, transactional store rooted at one
/// directory. Cheap to clone in spirit (it's a path plus nothing else) but
/// deliberately not `Clone`: a `Transaction` borrows a `Store`, so callers
/// keep one `Store` alive for as long as they have transactions open
/// against it.
pub struct Store {
    layout: Layout,
    recovered_commits: u64,
    recovered_purges: u64,
}

/// A cheap summary of store state, returned by [`Store::status`].
#[derive(Clone, Debug, PartialEq, Eq, serde_derive::Serialize, serde_derive::Deserialize)]
pub struct StoreStatus {
    /// The store's root directory.
    pub root: String,
    /// Number of leftover commit-area transactions drained by the most
    /// recent `open()`'s recovery pass.
    pub recovered_commits: u64,
    /// Number of leftover purge-area transactions drained by the most
    /// recent `open()`'s recovery pass.
    pub recovered_purges: u64,
}

impl Store {
    /// Opens a store rooted at `root`, initializing it on first use and
    /// draining any in-flight commits or purges left behind by a process
    /// that crashed mid-operation.
    pub fn open(root: impl Into<PathBuf>) -> CResult<Self> {
        let layout = Layout::new(root.into());
        let mut store = Self { layout, recovered_commits: 0, recovered_purges: 0 };
        if !store.layout.sentinel_path().exists() {
            store.initialize()?;
        }
        let (commits, purges) = store.recover()?;
        store.recovered_commits = commits;
        store.recovered_purges = purges;
        Ok(store)
    }

    fn initialize(&mut self) -> CResult<()> {
        create_dir_all_mode(self.layout.root())?;
        for area in self.layout.areas() {
            for bucket in 0x00u16..=0xff {
                let dir = area.join(format!("{:02x}", bucket));
                create_dir_all_mode(&dir)?;
            }
        }
        fs::File::create(self.layout.sentinel_path())?;
        Ok(())
    }

    /// Re-runs the commit pipeline over every transaction left in the
    /// commit area, and purge over every transaction left in the purge
    /// area. Safe to call repeatedly; every stage it drives is idempotent.
    fn recover(&mut self) -> CResult<(u64, u64)> {
        let commits = drain_area(&self.layout.commits_dir(), |uuid| {
            log::debug!("recovery: draining leftover commit {}", uuid);
            commit::run_commit_pipeline(&self.layout, uuid)
        })?;
        let purges = drain_area(&self.layout.purge_dir(), |uuid| {
            log::debug!("recovery: draining leftover purge {}", uuid);
            purge::purge(&self.layout, uuid)
        })?;
        Ok((commits, purges))
    }

    /// Starts a new transaction staged against this store.
    pub fn transaction(&self) -> CResult<Transaction<'_>> {
        Transaction::begin(self)
    }

    /// Returns the committed value for `key`, or `None` if no committed
    /// put exists for it.
    pub fn get(&self, key: &[u8]) -> CResult<Option<Vec<u8>>> {
        let hash = KeyHash::of(key);
        if let Some(value) =
            read_tolerating(&self.layout.namespace_committed_path(&hash), true)?
        {
            return Ok(Some(value));
        }
        read_tolerating(&self.layout.namespace_path(&hash), false)
    }

    /// A cheap summary of the store's current state.
    pub fn status(&self) -> CResult<StoreStatus> {
        Ok(StoreStatus {
            root: self.layout.root().display().to_string(),
            recovered_commits: self.recovered_commits,
            recovered_purges: self.recovered_purges,
        })
    }

    pub(crate) fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Invoked by a committing [`Transaction`] once its directory has been
    /// renamed into the commit area.
    pub(crate) fn commit(&self, uuid: Uuid) -> CResult<()> {
        commit::run_commit_pipeline(&self.layout, uuid)
    }

    /// Invoked by a rolling-back [`Transaction`] once its directory has
    /// been renamed into the purge area.
    pub(crate) fn purge(&self, uuid: Uuid) -> CResult<()> {
        purge::purge(&self.layout, uuid)
    }
}

/// Reads a file's full contents, translating the tolerated error kinds into
/// `Ok(None)` instead of propagating them.
///
/// When `tolerate_permission_denied` is set (the `:committed` side-link
/// read), a `PermissionDenied` is treated the same as `NotFound` -- the
/// entry is being replaced by a concurrent committer. The fallback read of
/// the bare namespace file only tolerates `NotFound`.
fn read_tolerating(path: &Path, tolerate_permission_denied: bool) -> CResult<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) if tolerate_permission_denied && err.kind() == ErrorKind::PermissionDenied => {
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}

/// Walks every bucket of `area`, running `f` on each UUID directory found,
/// and returns how many were processed.
fn drain_area(
    area: &Path,
    mut f: impl FnMut(Uuid) -> CResult<()>,
) -> CResult<u64> {
    let mut count = 0;
    let buckets = match fs::read_dir(area) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err.into()),
    };
    for bucket in buckets {
        let bucket = bucket?;
        if !bucket.file_type()?.is_dir() {
            continue;
        }
        for entry in fs::read_dir(bucket.path())? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_str().ok_or_else(|| {
                Error::Internal(format!("non-utf8 transaction name under {:?}", bucket.path()))
            })?;
            let uuid = Uuid::parse_str(name).map_err(|e| {
                Error::Internal(format!("invalid transaction uuid {:?}: {}", name, e))
            })?;
            f(uuid)?;
            count += 1;
        }
    }
    Ok(count)
}

#[cfg(unix)]
fn create_dir_all_mode(path: &Path) -> CResult<()> {
    fs::create_dir_all(path)?;
    fs::set_permissions(path, fs::Permissions::from_mode(DIR_MODE))?;
    Ok(())
}

#[cfg(not(unix))]
fn create_dir_all_mode(path: &Path) -> CResult<()> {
    fs::create_dir_all(path)?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_initializes_all_areas_with_256_buckets() -> CResult<()> {
        let dir = tempdir()?;
        let store = Store::open(dir.path())?;
        assert!(store.layout.sentinel_path().exists());
        for area in store.layout.areas() {
            let count = fs::read_dir(&area)?.count();
            assert_eq!(count, 256, "{:?} should have 256 buckets", area);
        }
        Ok(())
    }

    #[test]
    fn open_is_idempotent() -> CResult<()> {
        let dir = tempdir()?;
        Store::open(dir.path())?;
        Store::open(dir.path())?;
        Ok(())
    }

    #[test]
    fn open_creates_the_root_directory_itself() -> CResult<()> {
        let dir = tempdir()?;
        let nested = dir.path().join("does/not/exist/yet");
        let store = Store::open(&nested)?;
        assert!(store.layout.sentinel_path().exists());
        Ok(())
    }

    #[test]
    fn get_on_unknown_key_is_absent() -> CResult<()> {
        let dir = tempdir()?;
        let store = Store::open(dir.path())?;
        assert_eq!(store.get(b"nope")?, None);
        Ok(())
    }

    #[test]
    fn put_commit_get_round_trips() -> CResult<()> {
        let dir = tempdir()?;
        let store = Store::open(dir.path())?;
        let mut txn = store.transaction()?;
        txn.put(b"alpha", b"one".to_vec())?;
        txn.commit()?;
        assert_eq!(store.get(b"alpha")?, Some(b"one".to_vec()));
        Ok(())
    }

    /// Runs random put/commit/rollback operations against the store and a
    /// known-good `BTreeMap`, comparing each committed read as it goes and
    /// the final state at the end.
    #[test]
    fn random_ops_match_a_btreemap_oracle() -> CResult<()> {
        use pretty_assertions::assert_eq as pretty_assert_eq;
        use rand::{seq::SliceRandom, Rng, RngCore};
        use std::collections::BTreeMap;

        const NUM_OPS: u64 = 200;

        let seed: u64 = rand::thread_rng().gen();
        let mut rng: rand::rngs::StdRng = rand::SeedableRng::seed_from_u64(seed);
        println!("seed = {}", seed);

        #[derive(Debug)]
        enum Op {
            CommitPut,
            RollbackPut,
            Get,
        }

        impl rand::distributions::Distribution<Op> for rand::distributions::Standard {
            fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Op {
                match rng.gen_range(0..=2) {
                    0 => Op::CommitPut,
                    1 => Op::RollbackPut,
                    2 => Op::Get,
                    _ => unreachable!(),
                }
            }
        }

        let dir = tempdir()?;
        let store = Store::open(dir.path())?;
        let mut keys: Vec<Vec<u8>> = Vec::new();
        let mut model: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();

        let mut random_key = |rng: &mut rand::rngs::StdRng| -> Vec<u8> {
            if rng.gen::<f64>() < 0.8 && !keys.is_empty() {
                keys.choose(rng).unwrap().clone()
            } else {
                let mut key = vec![0u8; rng.gen_range(1..=16)];
                rng.fill_bytes(&mut key);
                keys.push(key.clone());
                key
            }
        };

        let random_value = |rng: &mut rand::rngs::StdRng| -> Vec<u8> {
            let mut value = vec![0u8; rng.gen_range(0..=16)];
            rng.fill_bytes(&mut value);
            value
        };

        for _ in 0..NUM_OPS {
            match rng.gen::<Op>() {
                Op::CommitPut => {
                    let key = random_key(&mut rng);
                    let value = random_value(&mut rng);
                    let mut txn = store.transaction()?;
                    txn.put(&key, value.clone())?;
                    txn.commit()?;
                    model.insert(key, value);
                }
                Op::RollbackPut => {
                    let key = random_key(&mut rng);
                    let value = random_value(&mut rng);
                    let mut txn = store.transaction()?;
                    txn.put(&key, value)?;
                    txn.rollback()?;
                    // model is untouched: the write never committed.
                }
                Op::Get => {
                    let key = random_key(&mut rng);
                    let got = store.get(&key)?;
                    let want = model.get(&key).cloned();
                    pretty_assert_eq!(got, want, "seed = {}", seed);
                }
            }
        }

        for key in &keys {
            let got = store.get(key)?;
            let want = model.get(key).cloned();
            pretty_assert_eq!(got, want, "seed = {}", seed);
        }
        Ok(())
    }
}
