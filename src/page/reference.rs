use crate::primitives::bytes::{PageSink, PageSource};
use crate::types::Result;

use super::key::{deserialize_key, serialize_key, PageKey};

/// Index of an uncommitted page inside a write transaction's arena.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PageSlot(pub(crate) usize);

/// Edge of the page trie.
///
/// A reference holds the backend key of a committed page, the arena slot of
/// a page prepared by the current write transaction, or both while a
/// committed page is being rewritten. Only the key is ever persisted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PageReference {
    key: Option<PageKey>,
    slot: Option<PageSlot>,
}

impl PageReference {
    /// Reference to an already persisted page.
    pub fn from_key(key: PageKey) -> Self {
        Self {
            key: Some(key),
            slot: None,
        }
    }

    /// Backend key, if the target was ever written.
    pub fn key(&self) -> Option<&PageKey> {
        self.key.as_ref()
    }

    /// True if neither a key nor an in-memory page is attached.
    pub fn is_empty(&self) -> bool {
        self.key.is_none() && self.slot.is_none()
    }

    pub(crate) fn slot(&self) -> Option<PageSlot> {
        self.slot
    }

    pub(crate) fn attach(&mut self, slot: PageSlot) {
        self.slot = Some(slot);
    }

    /// Records the key the attached page was persisted under.
    pub(crate) fn committed(&mut self, key: PageKey) {
        self.key = Some(key);
        self.slot = None;
    }

    /// Writes a presence flag followed, if present, by the tagged key.
    pub fn serialize(&self, sink: &mut PageSink) {
        if self.is_empty() {
            sink.put_bool(false);
        } else {
            sink.put_bool(true);
            serialize_key(sink, self.key.as_ref());
        }
    }

    /// Reads a reference written by [`PageReference::serialize`].
    pub fn deserialize(source: &mut PageSource<'_>) -> Result<Self> {
        if !source.get_bool()? {
            return Ok(Self::default());
        }
        Ok(Self {
            key: deserialize_key(source)?,
            slot: None,
        })
    }
}
