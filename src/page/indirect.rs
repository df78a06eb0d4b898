use crate::primitives::bytes::{PageSink, PageSource};
use crate::types::{Result, TesseraError};

use super::reference::PageReference;
use super::PageLayout;

/// One level of the radix trie: a fixed fan-out array of references.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndirectPage {
    references: Vec<PageReference>,
}

impl IndirectPage {
    /// Empty page with `fanout` unset references.
    pub fn new(fanout: usize) -> Self {
        Self {
            references: vec![PageReference::default(); fanout],
        }
    }

    /// Reference at `offset`.
    pub fn reference(&self, offset: usize) -> Option<&PageReference> {
        self.references.get(offset)
    }

    /// All references in offset order.
    pub fn references(&self) -> &[PageReference] {
        &self.references
    }

    pub(crate) fn references_mut(&mut self) -> &mut [PageReference] {
        &mut self.references
    }

    pub(crate) fn serialize_body(&self, sink: &mut PageSink) {
        sink.put_i32(self.references.len() as i32);
        for reference in &self.references {
            reference.serialize(sink);
        }
    }

    pub(crate) fn deserialize_body(layout: &PageLayout, source: &mut PageSource<'_>) -> Result<Self> {
        let count = source.get_len()?;
        if count != layout.fanout {
            return Err(TesseraError::Incompatible(format!(
                "indirect page has fan-out {count}, store uses {}",
                layout.fanout
            )));
        }
        let mut references = Vec::with_capacity(count);
        for _ in 0..count {
            references.push(PageReference::deserialize(source)?);
        }
        Ok(Self { references })
    }
}
