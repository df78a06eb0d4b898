//! Tessera: a versioned, paged storage kernel.
//!
//! Every commit produces an immutable revision. Records live in fixed-size
//! buckets addressed through an indirect-page trie; only the buckets and
//! trie paths a revision touches are written, and unchanged subtrees are
//! shared with earlier revisions. Buckets are versioned according to a
//! [`Revisioning`] policy and persisted through a pluggable backend (an
//! append-only file, an embedded SQLite database or a directory of
//! objects) with optional compression and encryption.
//!
//! ```no_run
//! use tessera::{Record, Store, StoreOptions};
//!
//! # fn main() -> tessera::Result<()> {
//! let store = Store::open_or_create(StoreOptions::new("/tmp/tessera"))?;
//! let mut trx = store.begin_write()?;
//! trx.set_record(Record::new(7, b"seven".to_vec()))?;
//! let revision = trx.commit()?;
//! trx.close()?;
//!
//! let read = store.begin_read(Some(revision.0))?;
//! assert_eq!(read.get_record(7)?.map(|r| r.payload), Some(b"seven".to_vec()));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

/// Store handle and transactions.
pub mod access;
/// Persistent storage backends and the byte pipeline.
pub mod backend;
/// Two-tier cache of bucket containers.
pub mod cache;
/// Store options and persisted settings.
pub mod config;
/// Tracing subscriber setup.
pub mod logging;
/// Page model and codec.
pub mod page;
/// Low-level byte and file helpers.
pub mod primitives;
/// Bucket versioning policies.
pub mod revisioning;
/// Indirect-page trie addressing.
pub mod trie;
/// Identifiers, errors and checksums.
pub mod types;

pub use access::{ReadTrx, Store, WriteTrx};
pub use backend::{ByteHandler, BytePipeline, Storage};
pub use config::{ByteHandling, PersistedSettings, StorageKind, StoreOptions, WriteLogKind};
pub use logging::init_logging;
pub use page::{PageKey, Record};
pub use revisioning::Revisioning;
pub use trie::TrieGeometry;
pub use types::{BucketNo, RecordKey, Result, Revision, TesseraError};
