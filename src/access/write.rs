use std::borrow::Cow;
use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::thread;

use tracing::{debug, info, trace, warn};
use xxhash_rust::xxh64::xxh64;

use crate::backend::{BackendReader, BackendWriter};
use crate::cache::{LruPageCache, MemoryCache, PageCache, PageContainer, SpillCache};
use crate::config::WriteLogKind;
use crate::page::{
    IndirectPage, MetaPage, NamePage, NodePage, Page, PageKey, PageSlot, Record, RevisionRootPage,
    SlotEntry, UberPage, META_REFERENCE_OFFSET, NAME_REFERENCE_OFFSET, NODE_TRIE_REFERENCE_OFFSET,
};
use crate::types::{BucketNo, RecordKey, Result, Revision, TesseraError};

use super::arena::PageArena;
use super::StoreInner;

/// Offset of the revision trie inside the uber page.
const REVISION_TRIE_OFFSET: usize = 0;

/// The single write transaction of a store.
///
/// Builds revision `N + 1` on top of the published revision `N`. Trie pages
/// on the way to modified leaves are copied into a private arena; modified
/// buckets live in a two-tier log until commit. After a commit the
/// transaction continues with the following revision.
pub struct WriteTrx {
    store: Arc<StoreInner>,
    reader: BackendReader,
    writer: BackendWriter,
    base: Arc<UberPage>,
    base_root: Option<RevisionRootPage>,
    arena: PageArena,
    uber_slot: PageSlot,
    root_slot: PageSlot,
    log: LruPageCache,
    dirty: BTreeSet<u64>,
    closed: bool,
}

impl WriteTrx {
    pub(crate) fn begin(store: Arc<StoreInner>) -> Result<Self> {
        let reader = store.backend.reader();
        let writer = store.backend.writer();
        let base = store.current_uber();
        let base_root = match base.latest_revision() {
            Some(latest) => Some(store.revision_root(&reader, &base, latest)?),
            None => None,
        };
        let second: Arc<dyn PageCache> = match store.options.write_log {
            WriteLogKind::Memory => Arc::new(MemoryCache::new()),
            WriteLogKind::Spill => Arc::new(SpillCache::open(store.backend.codec().clone())?),
        };
        let log = LruPageCache::new(store.options.log_capacity, second);
        let mut trx = Self {
            store,
            reader,
            writer,
            base,
            base_root,
            arena: PageArena::default(),
            uber_slot: PageSlot(0),
            root_slot: PageSlot(0),
            log,
            dirty: BTreeSet::new(),
            closed: false,
        };
        trx.prepare_revision()?;
        debug!(revision = trx.revision().0, "write_trx.begin");
        Ok(trx)
    }

    /// Copies the committed uber page into a fresh arena and hangs a new
    /// revision root below it.
    fn prepare_revision(&mut self) -> Result<()> {
        self.arena.clear();
        self.log.clear();
        self.dirty.clear();
        self.uber_slot = self.arena.alloc(Page::Uber((*self.base).clone()));
        let revision = self.base.next_revision();
        let root = match &self.base_root {
            Some(committed) => RevisionRootPage::successor(committed, revision),
            None => RevisionRootPage::new(revision),
        };
        let (parent, index) = self.prepare_leaf(self.uber_slot, REVISION_TRIE_OFFSET, revision.0)?;
        self.root_slot = self.arena.alloc(Page::RevisionRoot(root));
        self.arena.reference_mut(parent, index)?.attach(self.root_slot);
        trace!(revision = revision.0, "write_trx.prepare_revision");
        Ok(())
    }

    /// Makes the indirect page behind `(parent, index)` writable: reuses the
    /// arena copy, copies the committed page, or creates an empty one.
    fn prepare_indirect(&mut self, parent: PageSlot, index: usize) -> Result<PageSlot> {
        let reference = self.arena.reference(parent, index)?;
        if let Some(slot) = reference.slot() {
            return Ok(slot);
        }
        let page = match reference.key().cloned() {
            Some(key) => match self.reader.read(&key)? {
                Page::Indirect(page) => page,
                other => {
                    return Err(TesseraError::corruption(format!(
                        "expected indirect page at {key}, found {}",
                        other.kind()
                    )))
                }
            },
            None => IndirectPage::new(self.store.layout.fanout),
        };
        let slot = self.arena.alloc(Page::Indirect(page));
        self.arena.reference_mut(parent, index)?.attach(slot);
        Ok(slot)
    }

    /// Walks the trie rooted at `(parent, index)` down to the leaf
    /// reference for `number`, preparing every level on the way.
    fn prepare_leaf(&mut self, parent: PageSlot, index: usize, number: u64) -> Result<(PageSlot, usize)> {
        let offsets = self.store.geometry.offsets_for(number)?;
        let (mut parent, mut index) = (parent, index);
        for offset in offsets {
            parent = self.prepare_indirect(parent, index)?;
            index = offset;
        }
        Ok((parent, index))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(TesseraError::Invalid("write transaction is closed"));
        }
        Ok(())
    }

    fn root(&self) -> Result<&RevisionRootPage> {
        match self.arena.get(self.root_slot)? {
            Page::RevisionRoot(root) => Ok(root),
            _ => Err(TesseraError::corruption("revision root slot holds another page")),
        }
    }

    fn root_mut(&mut self) -> Result<&mut RevisionRootPage> {
        match self.arena.get_mut(self.root_slot)? {
            Page::RevisionRoot(root) => Ok(root),
            _ => Err(TesseraError::corruption("revision root slot holds another page")),
        }
    }

    /// Bucket container from the log, or reconstructed from the committed
    /// revision. The container is removed from the log; callers put it back.
    /// A modified bucket must still be in the log.
    fn take_container(&mut self, number: BucketNo) -> Result<PageContainer> {
        if let Some(container) = self.log.remove(number.0) {
            return Ok(container);
        }
        if self.dirty.contains(&number.0) {
            return Err(TesseraError::PageNotFound(format!(
                "modified bucket {number} dropped from the write log"
            )));
        }
        let (newest_key, pages) = match &self.base_root {
            Some(root) => self.store.snapshots(&self.reader, root, number)?,
            None => (None, Vec::new()),
        };
        let policy = self.store.revisioning;
        let force = policy.must_full_dump(pages.first(), self.store.options.restore_window);
        policy.combine_for_write(
            &pages,
            number,
            self.store.layout.bucket_capacity,
            newest_key.as_ref(),
            force,
        )
    }

    /// Revision being prepared.
    pub fn revision(&self) -> Revision {
        self.root().map(RevisionRootPage::revision).unwrap_or_default()
    }

    /// Live records in the revision being prepared.
    pub fn revision_size(&self) -> Result<u64> {
        Ok(self.root()?.revision_size())
    }

    /// Largest record key allocated so far.
    pub fn max_record_key(&self) -> Result<Option<RecordKey>> {
        Ok(self.root()?.max_record_key())
    }

    /// Record under `key` as this transaction sees it.
    pub fn get_record(&mut self, key: u64) -> Result<Option<Record>> {
        self.ensure_open()?;
        let (number, slot) = self.store.locate(RecordKey(key))?;
        let container = self.take_container(number)?;
        let record = container.complete().record(slot).cloned();
        self.log.put(number.0, container);
        Ok(record)
    }

    /// Stores `record` under its key, replacing any previous version.
    pub fn set_record(&mut self, record: Record) -> Result<()> {
        self.ensure_open()?;
        let key = record.key;
        let (number, slot) = self.store.locate(key)?;
        let mut container = self.take_container(number)?;
        let was_live = container.complete().record(slot).is_some();
        container.set_entry(slot, Some(SlotEntry::Record(record)));
        self.log.put(number.0, container);
        self.dirty.insert(number.0);
        let root = self.root_mut()?;
        if !was_live {
            root.increment_size();
        }
        root.observe_record_key(key);
        trace!(key = key.0, bucket = number.0, slot, "write_trx.set_record");
        Ok(())
    }

    /// Removes the record under `key`; returns whether it was live.
    pub fn remove_record(&mut self, key: u64) -> Result<bool> {
        self.ensure_open()?;
        let key = RecordKey(key);
        let (number, slot) = self.store.locate(key)?;
        let mut container = self.take_container(number)?;
        let was_live = container.complete().record(slot).is_some();
        if was_live {
            container.set_entry(slot, Some(SlotEntry::Tombstone(key)));
            self.dirty.insert(number.0);
        }
        self.log.put(number.0, container);
        if was_live {
            self.root_mut()?.decrement_size();
        }
        Ok(was_live)
    }

    /// Allocates the next record key.
    pub fn increment_key_counter(&mut self) -> Result<RecordKey> {
        self.ensure_open()?;
        let next = self
            .root()?
            .max_record_key()
            .map_or(0, |k| k.0 + 1);
        self.store.locate(RecordKey(next))?;
        Ok(self.root_mut()?.allocate_record_key())
    }

    fn prepare_auxiliary(&mut self, offset: usize) -> Result<PageSlot> {
        let reference = self.arena.reference(self.root_slot, offset)?;
        if let Some(slot) = reference.slot() {
            return Ok(slot);
        }
        let page = match reference.key().cloned() {
            Some(key) => self.reader.read(&key)?,
            None if offset == NAME_REFERENCE_OFFSET => Page::Name(NamePage::default()),
            None => Page::Meta(MetaPage::default()),
        };
        let slot = self.arena.alloc(page);
        self.arena.reference_mut(self.root_slot, offset)?.attach(slot);
        Ok(slot)
    }

    /// Name or meta page as this transaction sees it, without copying a
    /// committed page into the write set.
    fn auxiliary(&self, offset: usize) -> Result<Option<Cow<'_, Page>>> {
        let reference = self.arena.reference(self.root_slot, offset)?;
        if let Some(slot) = reference.slot() {
            return Ok(Some(Cow::Borrowed(self.arena.get(slot)?)));
        }
        match reference.key() {
            Some(key) => Ok(Some(Cow::Owned(self.reader.read(key)?))),
            None => Ok(None),
        }
    }

    /// Interns `name` and returns its stable key.
    pub fn create_name(&mut self, name: &str) -> Result<i32> {
        self.ensure_open()?;
        let slot = self.prepare_auxiliary(NAME_REFERENCE_OFFSET)?;
        match self.arena.get_mut(slot)? {
            Page::Name(page) => Ok(page.intern(xxh64(name.as_bytes(), 0) as i32, name)),
            other => Err(TesseraError::corruption(format!(
                "name reference holds a {} page",
                other.kind()
            ))),
        }
    }

    /// Name interned under `key`.
    pub fn name(&self, key: i32) -> Result<Option<String>> {
        self.ensure_open()?;
        match self.auxiliary(NAME_REFERENCE_OFFSET)?.as_deref() {
            Some(Page::Name(page)) => Ok(page.name(key).map(str::to_owned)),
            _ => Ok(None),
        }
    }

    /// Sets a metadata entry of the revision being prepared.
    pub fn set_meta(&mut self, key: &str, value: &str) -> Result<()> {
        self.ensure_open()?;
        let slot = self.prepare_auxiliary(META_REFERENCE_OFFSET)?;
        match self.arena.get_mut(slot)? {
            Page::Meta(page) => {
                page.set(key, value);
                Ok(())
            }
            other => Err(TesseraError::corruption(format!(
                "meta reference holds a {} page",
                other.kind()
            ))),
        }
    }

    /// Metadata entry as this transaction sees it.
    pub fn meta(&self, key: &str) -> Result<Option<String>> {
        self.ensure_open()?;
        match self.auxiliary(META_REFERENCE_OFFSET)?.as_deref() {
            Some(Page::Meta(page)) => Ok(page.get(key).map(str::to_owned)),
            _ => Ok(None),
        }
    }

    /// Persists the prepared revision, publishes it and starts preparing
    /// the next one. On failure the transaction is closed.
    pub fn commit(&mut self) -> Result<Revision> {
        self.ensure_open()?;
        let revision = self.revision();
        debug!(revision = revision.0, dirty = self.dirty.len(), "write_trx.commit.start");
        match self.commit_inner() {
            Ok(()) => {
                info!(revision = revision.0, "write_trx.commit.done");
                Ok(revision)
            }
            Err(err) => {
                warn!(revision = revision.0, error = %err, "write_trx.commit.failed");
                self.shutdown();
                Err(err)
            }
        }
    }

    fn commit_inner(&mut self) -> Result<()> {
        let mut buckets = Vec::with_capacity(self.dirty.len());
        for &number in &self.dirty {
            let container = self.log.get(number).ok_or_else(|| {
                TesseraError::corruption(format!("dirty bucket {number} missing from log"))
            })?;
            buckets.push((number, container.modified_arc()));
        }

        let frames = prepare_frames(&self.writer, &buckets)?;
        for ((number, _), frame) in buckets.iter().zip(frames) {
            let key = self.writer.write_prepared(&frame)?;
            let (parent, index) =
                self.prepare_leaf(self.root_slot, NODE_TRIE_REFERENCE_OFFSET, *number)?;
            self.arena.reference_mut(parent, index)?.committed(key);
        }

        let mut uber = match self.arena.take(self.uber_slot)? {
            Page::Uber(uber) => uber,
            _ => return Err(TesseraError::corruption("uber slot holds another page")),
        };
        let mut committed_root = None;
        if let Some(child) = uber.revision_trie().slot() {
            let key = self.flush(child, &mut committed_root)?;
            uber.revision_trie_mut().committed(key);
        }
        uber.bump_revision_count();
        self.writer.write_uber_page(&uber)?;

        let uber = Arc::new(uber);
        self.store.publish(Arc::clone(&uber));
        self.base = uber;
        self.base_root = committed_root;
        self.prepare_revision()
    }

    /// Writes the arena page in `slot` after its children, post-order, and
    /// returns its key. The stamped revision root is handed back through
    /// `root_out`.
    fn flush(&mut self, slot: PageSlot, root_out: &mut Option<RevisionRootPage>) -> Result<PageKey> {
        let mut page = self.arena.take(slot)?;
        for index in 0..page.reference_count() {
            let child = page.reference(index).and_then(|r| r.slot());
            if let Some(child) = child {
                let key = self.flush(child, root_out)?;
                if let Some(reference) = page.reference_mut(index) {
                    reference.committed(key);
                }
            }
        }
        if let Page::RevisionRoot(root) = &mut page {
            root.stamp();
            *root_out = Some(root.clone());
        }
        let key = self.writer.write(&page)?;
        trace!(kind = %page.kind(), %key, "write_trx.flush");
        Ok(key)
    }

    /// Discards everything prepared since the last commit.
    pub fn abort(&mut self) -> Result<()> {
        self.ensure_open()?;
        debug!(revision = self.revision().0, dirty = self.dirty.len(), "write_trx.abort");
        self.prepare_revision()
    }

    /// Aborts uncommitted work and releases the store's writer slot.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if !self.dirty.is_empty() {
            debug!(dirty = self.dirty.len(), "write_trx.close.discard");
        }
        self.shutdown();
        Ok(())
    }

    fn shutdown(&mut self) {
        self.arena.clear();
        self.log.clear();
        self.dirty.clear();
        self.closed = true;
        self.store.release_writer();
    }

    #[cfg(test)]
    pub(crate) fn arena_len(&self) -> usize {
        self.arena.len()
    }
}

impl Drop for WriteTrx {
    fn drop(&mut self) {
        if !self.closed {
            self.shutdown();
        }
    }
}

/// Encodes the modified half of every dirty bucket on scoped worker
/// threads; frames come back in input order.
fn prepare_frames(writer: &BackendWriter, buckets: &[(u64, Arc<NodePage>)]) -> Result<Vec<Vec<u8>>> {
    if buckets.is_empty() {
        return Ok(Vec::new());
    }
    let workers = thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
        .min(buckets.len());
    let chunk = buckets.len().div_ceil(workers);
    thread::scope(|scope| {
        let handles: Vec<_> = buckets
            .chunks(chunk)
            .map(|part| {
                scope.spawn(move || {
                    part.iter()
                        .map(|(_, page)| writer.prepare(&Page::Node(NodePage::clone(page))))
                        .collect::<Result<Vec<_>>>()
                })
            })
            .collect();
        let mut frames = Vec::with_capacity(buckets.len());
        for handle in handles {
            let part = handle
                .join()
                .map_err(|_| TesseraError::Threaded("page preparation worker panicked".into()))??;
            frames.extend(part);
        }
        Ok(frames)
    })
}
