//! Low-level primitives for building the storage kernel.
//!
//! Includes the big-endian byte sink/source the page codec writes through
//! and positioned file I/O for the file-backed store.

/// Byte-level encoding helpers.
pub mod bytes;

/// Positioned file I/O.
pub mod io;
