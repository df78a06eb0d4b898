use std::time::{SystemTime, UNIX_EPOCH};

use crate::primitives::bytes::{PageSink, PageSource};
use crate::types::{RecordKey, Result, Revision};

use super::reference::PageReference;

/// Offset of the name page reference.
pub const NAME_REFERENCE_OFFSET: usize = 0;
/// Offset of the node trie reference.
pub const NODE_TRIE_REFERENCE_OFFSET: usize = 1;
/// Offset of the meta page reference.
pub const META_REFERENCE_OFFSET: usize = 2;

const REFERENCE_COUNT: usize = 3;

/// Per-revision root: record counters, commit time and the roots of the
/// node trie, name page and meta page.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RevisionRootPage {
    revision: Revision,
    references: [PageReference; REFERENCE_COUNT],
    revision_size: u64,
    max_record_key: Option<u64>,
    timestamp_ms: u64,
}

impl RevisionRootPage {
    /// Root of the very first revision.
    pub fn new(revision: Revision) -> Self {
        Self {
            revision,
            ..Self::default()
        }
    }

    /// Copy of a committed root, re-targeted at `revision`.
    ///
    /// References keep their keys, so untouched subtrees stay shared with
    /// the committed revision. The timestamp is reset and assigned again at
    /// commit.
    pub fn successor(committed: &RevisionRootPage, revision: Revision) -> Self {
        Self {
            revision,
            references: committed.references.clone(),
            revision_size: committed.revision_size,
            max_record_key: committed.max_record_key,
            timestamp_ms: 0,
        }
    }

    /// Revision this root belongs to.
    pub fn revision(&self) -> Revision {
        self.revision
    }

    /// Number of live records visible in this revision.
    pub fn revision_size(&self) -> u64 {
        self.revision_size
    }

    /// Largest record key allocated so far.
    pub fn max_record_key(&self) -> Option<RecordKey> {
        self.max_record_key.map(RecordKey)
    }

    /// Commit time in milliseconds since the Unix epoch; `0` until committed.
    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    /// Reference at one of the `*_REFERENCE_OFFSET` positions.
    pub fn reference(&self, offset: usize) -> Option<&PageReference> {
        self.references.get(offset)
    }

    pub(crate) fn references(&self) -> &[PageReference] {
        &self.references
    }

    pub(crate) fn references_mut(&mut self) -> &mut [PageReference] {
        &mut self.references
    }

    pub(crate) fn increment_size(&mut self) {
        self.revision_size += 1;
    }

    pub(crate) fn decrement_size(&mut self) {
        self.revision_size = self.revision_size.saturating_sub(1);
    }

    pub(crate) fn allocate_record_key(&mut self) -> RecordKey {
        let next = self.max_record_key.map_or(0, |k| k + 1);
        self.max_record_key = Some(next);
        RecordKey(next)
    }

    pub(crate) fn observe_record_key(&mut self, key: RecordKey) {
        if self.max_record_key.map_or(true, |max| key.0 > max) {
            self.max_record_key = Some(key.0);
        }
    }

    /// Assigns the commit timestamp right before the page is serialized.
    pub(crate) fn stamp(&mut self) {
        self.timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
    }

    pub(crate) fn serialize_body(&self, sink: &mut PageSink) {
        sink.put_u64(self.revision.0);
        for reference in &self.references {
            reference.serialize(sink);
        }
        sink.put_u64(self.revision_size);
        sink.put_i64(self.max_record_key.map_or(-1, |k| k as i64));
        sink.put_u64(self.timestamp_ms);
    }

    pub(crate) fn deserialize_body(source: &mut PageSource<'_>) -> Result<Self> {
        let revision = Revision(source.get_u64()?);
        let references = [
            PageReference::deserialize(source)?,
            PageReference::deserialize(source)?,
            PageReference::deserialize(source)?,
        ];
        let revision_size = source.get_u64()?;
        let max_record_key = match source.get_i64()? {
            k if k < 0 => None,
            k => Some(k as u64),
        };
        let timestamp_ms = source.get_u64()?;
        Ok(Self {
            revision,
            references,
            revision_size,
            max_record_key,
            timestamp_ms,
        })
    }
}
