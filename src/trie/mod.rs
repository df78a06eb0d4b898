//! Radix addressing over indirect pages.
//!
//! Revision numbers and bucket numbers are both mapped onto leaf references
//! by decomposing the number into `levels` digits in base `fanout`, most
//! significant first. Each digit selects a reference in one indirect page.

use smallvec::SmallVec;
use tracing::trace;

use crate::page::{Page, PageKey, PageReference};
use crate::types::{Result, TesseraError};

/// Per-level offsets of one number.
pub type Offsets = SmallVec<[usize; 8]>;

/// Fixed shape of a trie: references per level and number of levels.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TrieGeometry {
    fanout: usize,
    levels: usize,
}

impl Default for TrieGeometry {
    fn default() -> Self {
        Self {
            fanout: 128,
            levels: 4,
        }
    }
}

impl TrieGeometry {
    /// Builds a geometry; fan-out must be at least two and levels at least one.
    pub fn new(fanout: usize, levels: usize) -> Result<Self> {
        if fanout < 2 {
            return Err(TesseraError::Config(format!(
                "trie fan-out must be at least 2, got {fanout}"
            )));
        }
        if levels == 0 {
            return Err(TesseraError::Config("trie needs at least one level".into()));
        }
        Ok(Self { fanout, levels })
    }

    /// References per indirect page.
    pub fn fanout(&self) -> usize {
        self.fanout
    }

    /// Number of indirect levels between a trie root and its leaves.
    pub fn levels(&self) -> usize {
        self.levels
    }

    /// Number of addressable leaves, saturating at `u64::MAX`.
    pub fn capacity(&self) -> u64 {
        (self.fanout as u64)
            .checked_pow(self.levels as u32)
            .unwrap_or(u64::MAX)
    }

    /// Decomposes `number` into per-level offsets, most significant first.
    pub fn offsets_for(&self, number: u64) -> Result<Offsets> {
        let limit = self.capacity();
        if number >= limit {
            return Err(TesseraError::OutOfBounds { number, limit });
        }
        let base = self.fanout as u64;
        let mut offsets: Offsets = SmallVec::from_elem(0, self.levels);
        let mut rest = number;
        for slot in offsets.iter_mut().rev() {
            *slot = (rest % base) as usize;
            rest /= base;
        }
        Ok(offsets)
    }

    /// Inverse of [`TrieGeometry::offsets_for`].
    pub fn reconstruct_number(&self, offsets: &[usize]) -> u64 {
        offsets
            .iter()
            .fold(0u64, |acc, &digit| acc * self.fanout as u64 + digit as u64)
    }
}

/// Walks the committed trie below `root` and returns the leaf key for
/// `number`, or `None` if some level on the way was never written.
///
/// `load` materializes committed pages; no page is cloned or modified.
pub fn dereference_leaf<F>(
    geometry: &TrieGeometry,
    root: &PageReference,
    number: u64,
    mut load: F,
) -> Result<Option<PageKey>>
where
    F: FnMut(&PageKey) -> Result<Page>,
{
    let offsets = geometry.offsets_for(number)?;
    let mut key = match root.key() {
        Some(key) => key.clone(),
        None => return Ok(None),
    };
    for (level, &offset) in offsets.iter().enumerate() {
        let indirect = match load(&key)? {
            Page::Indirect(indirect) => indirect,
            other => {
                return Err(TesseraError::corruption(format!(
                    "expected indirect page at level {level} for {number}, found {}",
                    other.kind()
                )))
            }
        };
        match indirect.reference(offset).and_then(PageReference::key) {
            Some(next) => key = next.clone(),
            None => {
                trace!(number, level, offset, "trie.dereference.gap");
                return Ok(None);
            }
        }
    }
    Ok(Some(key))
}
