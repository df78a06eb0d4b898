#![forbid(unsafe_code)]
//! Shared identifiers, the crate-wide error type and checksum helpers.

use std::fmt;
use std::io;

use tracing::error;

mod checksum;

pub use checksum::frame_crc32;

/// Number of a committed (or in-preparation) revision.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct Revision(pub u64);

/// Key of an application record.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct RecordKey(pub u64);

/// Sequential number of a record bucket inside the node trie.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct BucketNo(pub u64);

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for BucketNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Revision {
    fn from(value: u64) -> Self {
        Revision(value)
    }
}

impl From<u64> for RecordKey {
    fn from(value: u64) -> Self {
        RecordKey(value)
    }
}

/// Errors surfaced by the storage kernel.
#[derive(thiserror::Error, Debug)]
pub enum TesseraError {
    /// Physical read or write failure on a file-based store.
    #[error("storage I/O: {0}")]
    Io(#[from] io::Error),
    /// Physical read or write failure inside the embedded store.
    #[error("embedded store: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A persisted page carries a kind tag no decoder is registered for.
    #[error("unknown page kind {0}")]
    UnknownPageKind(i32),
    /// A persisted page key carries an unknown kind tag.
    #[error("unknown key kind {0}")]
    UnknownKeyKind(i32),
    /// The requested revision was never committed.
    #[error("revision {requested} not found (latest committed is {latest:?})")]
    RevisionNotFound {
        /// Revision asked for.
        requested: u64,
        /// Most recent committed revision, if any.
        latest: Option<u64>,
    },
    /// An address lies outside the configured address space.
    #[error("address {number} out of bounds (limit {limit})")]
    OutOfBounds {
        /// Offending bucket or revision number.
        number: u64,
        /// Exclusive upper bound of the address space.
        limit: u64,
    },
    /// An intermediate trie page that must exist is missing.
    #[error("page not found: {0}")]
    PageNotFound(String),
    /// Failure inside a helper thread.
    #[error("threaded operation failed: {0}")]
    Threaded(String),
    /// Persisted bytes failed validation.
    #[error("corruption: {0}")]
    Corruption(String),
    /// The store was created with a different binary layout.
    #[error("incompatible store: {0}")]
    Incompatible(String),
    /// Caller misuse.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// Configuration could not be parsed or applied.
    #[error("configuration: {0}")]
    Config(String),
}

impl TesseraError {
    /// Returns true for physical read/write failures.
    pub fn is_storage_io(&self) -> bool {
        matches!(self, TesseraError::Io(_) | TesseraError::Sqlite(_))
    }

    pub(crate) fn corruption(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        error!(reason = %msg, "tessera.corruption");
        TesseraError::Corruption(msg)
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, TesseraError>;
