use crate::primitives::bytes::{PageSink, PageSource};
use crate::types::{Result, Revision};

use super::reference::PageReference;

/// Root of one committed state of the store.
///
/// Holds the number of committed revisions and the root of the revision
/// trie. A new uber page is written on every commit; older ones stay
/// reachable from the read transactions pinned to them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UberPage {
    revision_count: u64,
    revision_trie: PageReference,
}

impl UberPage {
    /// Uber page of a store without any committed revision.
    pub fn bootstrap() -> Self {
        Self::default()
    }

    /// Number of committed revisions.
    pub fn revision_count(&self) -> u64 {
        self.revision_count
    }

    /// Most recent committed revision.
    pub fn latest_revision(&self) -> Option<Revision> {
        self.revision_count.checked_sub(1).map(Revision)
    }

    /// Revision a write transaction starting from this page prepares.
    pub fn next_revision(&self) -> Revision {
        Revision(self.revision_count)
    }

    /// Root of the revision trie.
    pub fn revision_trie(&self) -> &PageReference {
        &self.revision_trie
    }

    pub(crate) fn revision_trie_mut(&mut self) -> &mut PageReference {
        &mut self.revision_trie
    }

    pub(crate) fn bump_revision_count(&mut self) {
        self.revision_count += 1;
    }

    pub(crate) fn serialize_body(&self, sink: &mut PageSink) {
        sink.put_u64(self.revision_count);
        self.revision_trie.serialize(sink);
    }

    pub(crate) fn deserialize_body(source: &mut PageSource<'_>) -> Result<Self> {
        Ok(Self {
            revision_count: source.get_u64()?,
            revision_trie: PageReference::deserialize(source)?,
        })
    }
}
