//! `kvfs` is a transactional, content-addressed key-value store built
//! entirely on POSIX filesystem primitives: rename, link, symlink, mkdir,
//! chmod.
//!
//! Keys and values are arbitrary byte strings. Writes are staged in a
//! [`transaction::Transaction`] and only become visible to `Store::get`
//! once `Transaction::commit` has run the commit pipeline to completion;
//! dropping a transaction without committing it rolls it back. Durability
//! comes from the filesystem, not from any in-memory structure held by
//! this crate.
//!
//! ## Getting started
//!
//! ```no_run
//! use kvfs::error::CResult;
//! use kvfs::store::Store;
//!
//! fn run() -> CResult<()> {
//!     let store = Store::open("/var/lib/myapp/kvfs")?;
//!
//!     let mut txn = store.transaction()?;
//!     txn.put(b"greeting", b"hello".to_vec())?;
//!     txn.commit()?;
//!
//!     assert_eq!(store.get(b"greeting")?, Some(b"hello".to_vec()));
//!     Ok(())
//! }
//! ```

pub mod commit;
pub mod error;
pub mod hash;
pub mod paths;
pub mod purge;
pub mod store;
pub mod transaction;
