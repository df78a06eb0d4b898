use std::sync::Arc;

use tracing::{debug, trace};

use crate::backend::BackendReader;
use crate::cache::{LruPageCache, NullCache, PageCache, PageContainer, DEFAULT_LOG_CAPACITY};
use crate::page::{
    MetaPage, NamePage, NodePage, Page, Record, RevisionRootPage, UberPage, META_REFERENCE_OFFSET,
    NAME_REFERENCE_OFFSET,
};
use crate::types::{BucketNo, RecordKey, Result, Revision, TesseraError};

use super::StoreInner;

/// Read-side view of one committed revision.
pub(crate) struct PageReadState {
    store: Arc<StoreInner>,
    reader: BackendReader,
    root: RevisionRootPage,
    cache: LruPageCache,
}

impl PageReadState {
    pub(crate) fn new(
        store: Arc<StoreInner>,
        uber: &UberPage,
        revision: Revision,
    ) -> Result<Self> {
        let reader = store.backend.reader();
        let root = store.revision_root(&reader, uber, revision)?;
        Ok(Self {
            store,
            reader,
            root,
            cache: LruPageCache::new(DEFAULT_LOG_CAPACITY, Arc::new(NullCache)),
        })
    }

    pub(crate) fn root(&self) -> &RevisionRootPage {
        &self.root
    }

    /// Reconstructed bucket, cached per transaction.
    pub(crate) fn bucket(&self, number: BucketNo) -> Result<PageContainer> {
        if let Some(hit) = self.cache.get(number.0) {
            return Ok(hit);
        }
        let (_, pages) = self.store.snapshots(&self.reader, &self.root, number)?;
        let page = if pages.is_empty() {
            NodePage::new(number, self.store.layout.bucket_capacity)
        } else {
            self.store.revisioning.combine_for_read(&pages)?
        };
        trace!(bucket = number.0, versions = pages.len(), "read.bucket.load");
        let container = PageContainer::read_only(page);
        self.cache.put(number.0, container.clone());
        Ok(container)
    }

    pub(crate) fn record(&self, key: RecordKey) -> Result<Option<Record>> {
        let (number, slot) = self.store.locate(key)?;
        Ok(self.bucket(number)?.complete().record(slot).cloned())
    }

    pub(crate) fn name_page(&self) -> Result<NamePage> {
        let Some(key) = self.root.reference(NAME_REFERENCE_OFFSET).and_then(|r| r.key()) else {
            return Ok(NamePage::default());
        };
        match self.reader.read(key)? {
            Page::Name(page) => Ok(page),
            other => Err(TesseraError::corruption(format!(
                "name reference holds a {} page",
                other.kind()
            ))),
        }
    }

    pub(crate) fn meta_page(&self) -> Result<MetaPage> {
        let Some(key) = self.root.reference(META_REFERENCE_OFFSET).and_then(|r| r.key()) else {
            return Ok(MetaPage::default());
        };
        match self.reader.read(key)? {
            Page::Meta(page) => Ok(page),
            other => Err(TesseraError::corruption(format!(
                "meta reference holds a {} page",
                other.kind()
            ))),
        }
    }
}

/// Read transaction pinned to one committed revision.
pub struct ReadTrx {
    state: Option<PageReadState>,
    revision: Revision,
}

impl ReadTrx {
    pub(crate) fn begin(
        store: Arc<StoreInner>,
        uber: Arc<UberPage>,
        revision: Revision,
    ) -> Result<Self> {
        let state = PageReadState::new(store, &uber, revision)?;
        debug!(revision = revision.0, "read_trx.begin");
        Ok(Self {
            state: Some(state),
            revision,
        })
    }

    fn state(&self) -> Result<&PageReadState> {
        self.state
            .as_ref()
            .ok_or(TesseraError::Invalid("read transaction is closed"))
    }

    /// Revision this transaction reads.
    pub fn revision(&self) -> Revision {
        self.revision
    }

    /// Record stored under `key`, `None` if it was never written or was
    /// removed.
    pub fn get_record(&self, key: u64) -> Result<Option<Record>> {
        self.state()?.record(RecordKey(key))
    }

    /// Number of live records in the revision.
    pub fn revision_size(&self) -> Result<u64> {
        Ok(self.state()?.root().revision_size())
    }

    /// Largest record key allocated up to this revision.
    pub fn max_record_key(&self) -> Result<Option<RecordKey>> {
        Ok(self.state()?.root().max_record_key())
    }

    /// Commit time of the revision in milliseconds since the Unix epoch.
    pub fn timestamp_ms(&self) -> Result<u64> {
        Ok(self.state()?.root().timestamp_ms())
    }

    /// Name interned under `key`.
    pub fn name(&self, key: i32) -> Result<Option<String>> {
        Ok(self.state()?.name_page()?.name(key).map(str::to_owned))
    }

    /// Metadata value stored under `key`.
    pub fn meta(&self, key: &str) -> Result<Option<String>> {
        Ok(self.state()?.meta_page()?.get(key).map(str::to_owned))
    }

    /// Releases the pinned revision; later calls fail with `Invalid`.
    pub fn close(&mut self) {
        if self.state.take().is_some() {
            debug!(revision = self.revision.0, "read_trx.close");
        }
    }
}
