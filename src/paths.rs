//! Path routing: translates the store root plus a hash/UUID into the exact
//! file or directory the commit pipeline, store, and transaction code need
//! to touch. Every hex-named file this crate creates lives inside a
//! two-character bucket directory equal to its own first two characters;
//! this module is the single place that invariant is encoded.

use crate::hash::{bucket_of, ContentHash, KeyHash};
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const DIR_OBJECTS: &str = "__objects__";
pub const DIR_NAMESPACE: &str = "__namespace__";
pub const DIR_TRANSACTIONS: &str = "__transactions__";
pub const DIR_COMMITS: &str = "__commits__";
pub const DIR_PURGE: &str = "__purge__";
pub const SENTINEL: &str = ".inited";

/// Suffix appended to a name to mark it already processed by an earlier
/// commit stage, so a re-run of the pipeline can skip it.
pub const PROCESSED_SUFFIX: &str = "-";

/// Suffix appended to a key hash for the transient side-link published
/// during commit stages 3-4.
pub const COMMITTED_SUFFIX: &str = ":committed";

/// Renders a transaction identifier the way the on-disk layout expects it:
/// 32 lowercase hex characters, no dashes.
pub fn uuid_hex(uuid: Uuid) -> String {
    uuid.simple().to_string()
}

/// Resolves every path the engine reads or writes, rooted at one store
/// directory. Cheap to construct and clone -- it is just a `PathBuf`.
#[derive(Clone, Debug)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sentinel_path(&self) -> PathBuf {
        self.root.join(SENTINEL)
    }

    pub fn objects_dir(&self) -> PathBuf {
        self.root.join(DIR_OBJECTS)
    }

    pub fn namespace_dir(&self) -> PathBuf {
        self.root.join(DIR_NAMESPACE)
    }

    pub fn transactions_dir(&self) -> PathBuf {
        self.root.join(DIR_TRANSACTIONS)
    }

    pub fn commits_dir(&self) -> PathBuf {
        self.root.join(DIR_COMMITS)
    }

    pub fn purge_dir(&self) -> PathBuf {
        self.root.join(DIR_PURGE)
    }

    /// The five top-level areas, in the order they're bucketed during
    /// initialization.
    pub fn areas(&self) -> [PathBuf; 5] {
        [
            self.commits_dir(),
            self.purge_dir(),
            self.objects_dir(),
            self.namespace_dir(),
            self.transactions_dir(),
        ]
    }

    /// The committed, immutable object for `hash`.
    pub fn object_path(&self, hash: &ContentHash) -> PathBuf {
        self.objects_dir().join(hash.bucket()).join(hash.as_str())
    }

    /// The live namespace entry for `hash` -- a committed value file once
    /// stage 4 has run.
    pub fn namespace_path(&self, hash: &KeyHash) -> PathBuf {
        self.namespace_dir().join(hash.bucket()).join(hash.as_str())
    }

    /// The transient `:committed` side-link published in stage 3.
    pub fn namespace_committed_path(&self, hash: &KeyHash) -> PathBuf {
        self.namespace_dir()
            .join(hash.bucket())
            .join(format!("{}{}", hash.as_str(), COMMITTED_SUFFIX))
    }

    /// The staging directory for a not-yet-committed transaction.
    pub fn transaction_dir(&self, uuid: Uuid) -> PathBuf {
        let hex = uuid_hex(uuid);
        self.transactions_dir().join(bucket_of(&hex)).join(hex)
    }

    /// The commit-area directory a transaction is renamed into on commit.
    pub fn commit_dir(&self, uuid: Uuid) -> PathBuf {
        let hex = uuid_hex(uuid);
        self.commits_dir().join(bucket_of(&hex)).join(hex)
    }

    /// The purge-area directory a transaction is renamed into on rollback.
    pub fn purge_dir_for(&self, uuid: Uuid) -> PathBuf {
        let hex = uuid_hex(uuid);
        self.purge_dir().join(bucket_of(&hex)).join(hex)
    }
}

/// Private staging areas inside a transaction/commit/purge directory. Kept
/// as a free function rather than a method on `Layout`, since these two
/// subdirectories exist relative to a transaction directory, not the store
/// root -- conflating the two was the source bug noted in the design
/// notes' open questions.
pub fn private_objects_dir(staging_dir: &Path) -> PathBuf {
    staging_dir.join(DIR_OBJECTS)
}

pub fn private_namespace_dir(staging_dir: &Path) -> PathBuf {
    staging_dir.join(DIR_NAMESPACE)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn uuid_hex_is_32_chars_no_dashes() {
        let hex = uuid_hex(Uuid::new_v4());
        assert_eq!(hex.len(), 32);
        assert!(!hex.contains('-'));
    }

    #[test]
    fn object_path_is_bucketed_by_first_two_chars() {
        let layout = Layout::new("/store");
        let hash = ContentHash::of(b"payload");
        let path = layout.object_path(&hash);
        let expect = PathBuf::from("/store")
            .join(DIR_OBJECTS)
            .join(hash.bucket())
            .join(hash.as_str());
        assert_eq!(path, expect);
    }

    #[test]
    fn committed_sidelink_path_has_suffix() {
        let layout = Layout::new("/store");
        let hash = KeyHash::of(b"k");
        let path = layout.namespace_committed_path(&hash);
        assert!(path.to_str().unwrap().ends_with(":committed"));
    }

    #[test]
    fn transaction_and_commit_dirs_share_the_same_uuid_leaf() {
        let layout = Layout::new("/store");
        let uuid = Uuid::new_v4();
        let txn_dir = layout.transaction_dir(uuid);
        let commit_dir = layout.commit_dir(uuid);
        assert_eq!(txn_dir.file_name(), commit_dir.file_name());
    }
}
