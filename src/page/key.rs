//! Backend-specific page addresses and their tagged encoding.

use std::fmt;

use smallvec::{smallvec, SmallVec};

use crate::primitives::bytes::{PageSink, PageSource};
use crate::types::{Result, TesseraError};

/// Kind tag of a key into the file store.
pub const FILE_KIND: i32 = 1;
/// Kind tag of a key into the embedded store.
pub const EMBEDDED_KIND: i32 = 2;
/// Kind tag written when no key is present.
pub const NULL_KIND: i32 = 3;
/// Kind tag of a key into the object store.
pub const OBJECT_KIND: i32 = 4;

/// Physical location of a stored page.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PageKey {
    /// Frame inside the append-only data file.
    File {
        /// Byte offset of the frame header.
        offset: u64,
        /// Length of the frame including its header.
        length: u64,
    },
    /// Row id inside the embedded store.
    Embedded {
        /// Row id.
        id: u64,
    },
    /// Object inside the object store.
    Object {
        /// Object number; the object name is derived from it.
        id: u64,
    },
}

impl PageKey {
    /// Kind tag written ahead of the key fields.
    pub fn kind(&self) -> i32 {
        match self {
            PageKey::File { .. } => FILE_KIND,
            PageKey::Embedded { .. } => EMBEDDED_KIND,
            PageKey::Object { .. } => OBJECT_KIND,
        }
    }

    /// The long-valued fields persisted after the kind tag.
    pub fn fields(&self) -> SmallVec<[u64; 2]> {
        match self {
            PageKey::File { offset, length } => smallvec![*offset, *length],
            PageKey::Embedded { id } | PageKey::Object { id } => smallvec![*id],
        }
    }

    fn field_count(kind: i32) -> Result<usize> {
        match kind {
            FILE_KIND => Ok(2),
            EMBEDDED_KIND | OBJECT_KIND => Ok(1),
            NULL_KIND => Ok(0),
            other => Err(TesseraError::UnknownKeyKind(other)),
        }
    }
}

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageKey::File { offset, length } => write!(f, "file@{offset}+{length}"),
            PageKey::Embedded { id } => write!(f, "embedded#{id}"),
            PageKey::Object { id } => write!(f, "object#{id}"),
        }
    }
}

/// Writes `key` as kind tag plus fields; `None` is written as [`NULL_KIND`].
pub fn serialize_key(sink: &mut PageSink, key: Option<&PageKey>) {
    match key {
        None => sink.put_i32(NULL_KIND),
        Some(key) => {
            sink.put_i32(key.kind());
            for field in key.fields() {
                sink.put_u64(field);
            }
        }
    }
}

/// Reads a key written by [`serialize_key`], dispatching on its kind tag.
pub fn deserialize_key(source: &mut PageSource<'_>) -> Result<Option<PageKey>> {
    let kind = source.get_i32()?;
    let count = PageKey::field_count(kind)?;
    let mut fields: SmallVec<[u64; 2]> = SmallVec::with_capacity(count);
    for _ in 0..count {
        fields.push(source.get_u64()?);
    }
    Ok(match kind {
        FILE_KIND => Some(PageKey::File {
            offset: fields[0],
            length: fields[1],
        }),
        EMBEDDED_KIND => Some(PageKey::Embedded { id: fields[0] }),
        OBJECT_KIND => Some(PageKey::Object { id: fields[0] }),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(key: Option<PageKey>) -> Option<PageKey> {
        let mut sink = PageSink::new();
        serialize_key(&mut sink, key.as_ref());
        let bytes = sink.into_vec();
        let mut src = PageSource::new(&bytes);
        let decoded = deserialize_key(&mut src).unwrap();
        src.finish().unwrap();
        decoded
    }

    #[test]
    fn every_key_kind_survives_encoding() {
        for key in [
            None,
            Some(PageKey::File {
                offset: 4096,
                length: 77,
            }),
            Some(PageKey::Embedded { id: 12 }),
            Some(PageKey::Object { id: u64::MAX >> 1 }),
        ] {
            assert_eq!(roundtrip(key.clone()), key);
        }
    }

    #[test]
    fn file_key_layout_is_tag_then_two_longs() {
        let mut sink = PageSink::new();
        serialize_key(
            &mut sink,
            Some(&PageKey::File {
                offset: 1,
                length: 2,
            }),
        );
        let bytes = sink.into_vec();
        assert_eq!(bytes.len(), 4 + 16);
        assert_eq!(&bytes[..4], &FILE_KIND.to_be_bytes());
        assert_eq!(&bytes[4..12], &1i64.to_be_bytes());
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let bytes = 42i32.to_be_bytes();
        let mut src = PageSource::new(&bytes);
        match deserialize_key(&mut src) {
            Err(TesseraError::UnknownKeyKind(42)) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
