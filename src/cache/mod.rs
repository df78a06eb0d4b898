//! Page containers and the two-tier cache that holds them.
//!
//! A [`PageContainer`] pairs the bucket version visible to reads with the
//! version pending for the next write. Caches never fail: a miss or an
//! internal problem in a second tier is reported as absence.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::page::{NodePage, SlotEntry};
use crate::types::BucketNo;

mod tiered;
mod spill;

pub use tiered::{EvictionHook, LruPageCache, DEFAULT_LOG_CAPACITY};
pub use spill::SpillCache;

/// Read view and pending write of one bucket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageContainer {
    complete: Arc<NodePage>,
    modified: Arc<NodePage>,
}

impl PageContainer {
    /// Pairs a fully materialized page with the page to persist.
    pub fn new(complete: NodePage, modified: NodePage) -> Self {
        Self {
            complete: Arc::new(complete),
            modified: Arc::new(modified),
        }
    }

    /// Container for a read transaction: both halves share one page.
    pub fn read_only(page: NodePage) -> Self {
        let page = Arc::new(page);
        Self {
            complete: Arc::clone(&page),
            modified: page,
        }
    }

    /// Container for a bucket that was never written.
    pub fn fresh(number: BucketNo, capacity: usize) -> Self {
        Self::new(NodePage::new(number, capacity), NodePage::new(number, capacity))
    }

    /// Every live slot as of this transaction.
    pub fn complete(&self) -> &NodePage {
        &self.complete
    }

    /// Slots that will be persisted on commit.
    pub fn modified(&self) -> &NodePage {
        &self.modified
    }

    pub(crate) fn modified_arc(&self) -> Arc<NodePage> {
        Arc::clone(&self.modified)
    }

    /// Writes `entry` into both halves.
    pub fn set_entry(&mut self, slot: usize, entry: Option<SlotEntry>) {
        Arc::make_mut(&mut self.complete).set_entry(slot, entry.clone());
        Arc::make_mut(&mut self.modified).set_entry(slot, entry);
    }
}

/// A cache tier keyed by bucket number.
pub trait PageCache: Send + Sync {
    /// Looks up a container.
    fn get(&self, key: u64) -> Option<PageContainer>;
    /// Stores a container, replacing any previous one.
    fn put(&self, key: u64, container: PageContainer);
    /// Removes and returns a container.
    fn remove(&self, key: u64) -> Option<PageContainer>;
    /// Drops every container, including those of lower tiers.
    fn clear(&self);
}

/// Second tier that discards everything handed to it.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullCache;

impl PageCache for NullCache {
    fn get(&self, _key: u64) -> Option<PageContainer> {
        None
    }

    fn put(&self, _key: u64, _container: PageContainer) {}

    fn remove(&self, _key: u64) -> Option<PageContainer> {
        None
    }

    fn clear(&self) {}
}

/// Unbounded in-memory second tier.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<FxHashMap<u64, PageContainer>>,
}

impl MemoryCache {
    /// Creates an empty tier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of held containers.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True if nothing is held.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl PageCache for MemoryCache {
    fn get(&self, key: u64) -> Option<PageContainer> {
        self.entries.lock().get(&key).cloned()
    }

    fn put(&self, key: u64, container: PageContainer) {
        self.entries.lock().insert(key, container);
    }

    fn remove(&self, key: u64) -> Option<PageContainer> {
        self.entries.lock().remove(&key)
    }

    fn clear(&self) {
        self.entries.lock().clear();
    }
}
