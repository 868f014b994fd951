use std::fmt;

/// The result type returned by every fallible operation in this crate.
pub type CResult<T> = Result<T, Error>;

/// Errors surfaced by the store, transaction, and commit/purge pipelines.
///
/// Filesystem races that the commit protocol treats as expected
/// (`NotFound` on an already-processed link, `FileExists` on a concurrent
/// object insertion) are handled inline where they occur and never reach
/// this type; only a terminal condition is reported to the caller.
#[derive(Debug)]
pub enum Error {
    /// Wraps an `io::Error` that wasn't one of the tolerated races.
    Io(std::io::Error),

    /// A `get()` found no value for the key, or a lookup of an internal
    /// path that must exist came back absent.
    NotFound,

    /// `commit()` or `rollback()` was called on a transaction that was
    /// already committed or rolled back.
    AlreadyFinalized,

    /// An on-disk structure didn't have the shape the engine expects.
    /// Not produced by any current code path; reserved for future
    /// structural validation (see DESIGN.md).
    Corrupt(String),

    /// Any other unexpected condition.
    Internal(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "io error: {}", err),
            Error::NotFound => write!(f, "not found"),
            Error::AlreadyFinalized => {
                write!(f, "transaction already committed or rolled back")
            }
            Error::Corrupt(msg) => write!(f, "corrupt store state: {}", msg),
            Error::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound,
            _ => Error::Io(err),
        }
    }
}
