//! Store handle and the read/write transaction contract.
//!
//! A [`Store`] owns the backend and the currently published uber page.
//! Read transactions pin the uber page they started from; the single write
//! transaction builds the next revision in a private arena and publishes it
//! by swapping the root pointer on commit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::backend::{
    open_storage, storage_exists, Backend, BackendReader, BytePipeline, ControlRecord,
};
use crate::config::{PersistedSettings, StoreOptions};
use crate::page::{
    NodePage, Page, PageCodec, PageKey, PageLayout, PageReference, RevisionRootPage, UberPage,
    NODE_TRIE_REFERENCE_OFFSET,
};
use crate::revisioning::Revisioning;
use crate::trie::{dereference_leaf, TrieGeometry};
use crate::types::{BucketNo, RecordKey, Result, Revision, TesseraError};

mod arena;
mod read;
mod write;

pub use read::ReadTrx;
pub use write::WriteTrx;

pub(crate) struct StoreInner {
    options: StoreOptions,
    backend: Backend,
    geometry: TrieGeometry,
    layout: PageLayout,
    revisioning: Revisioning,
    uber: RwLock<Arc<UberPage>>,
    writer_active: AtomicBool,
}

impl StoreInner {
    pub(crate) fn current_uber(&self) -> Arc<UberPage> {
        Arc::clone(&self.uber.read())
    }

    pub(crate) fn publish(&self, uber: Arc<UberPage>) {
        *self.uber.write() = uber;
    }

    pub(crate) fn release_writer(&self) {
        self.writer_active.store(false, Ordering::Release);
    }

    /// Bucket and slot of a record key; fails past the node trie capacity.
    pub(crate) fn locate(&self, key: RecordKey) -> Result<(BucketNo, usize)> {
        let capacity = self.layout.bucket_capacity as u64;
        let number = key.0 / capacity;
        self.geometry.offsets_for(number)?;
        Ok((BucketNo(number), (key.0 % capacity) as usize))
    }

    /// Loads the revision root of `revision` as seen from `uber`.
    pub(crate) fn revision_root(
        &self,
        reader: &BackendReader,
        uber: &UberPage,
        revision: Revision,
    ) -> Result<RevisionRootPage> {
        let key = dereference_leaf(&self.geometry, uber.revision_trie(), revision.0, |k| {
            reader.read(k)
        })?
        .ok_or_else(|| TesseraError::PageNotFound(format!("revision {revision}")))?;
        match reader.read(&key)? {
            Page::RevisionRoot(root) => Ok(root),
            other => Err(TesseraError::corruption(format!(
                "revision trie leaf {key} holds a {} page",
                other.kind()
            ))),
        }
    }

    /// Persisted versions of a bucket needed to reconstruct it under
    /// `root`, newest first, plus the key of the newest one. A bucket never
    /// written yields no snapshots.
    pub(crate) fn snapshots(
        &self,
        reader: &BackendReader,
        root: &RevisionRootPage,
        number: BucketNo,
    ) -> Result<(Option<PageKey>, Vec<NodePage>)> {
        let node_trie = root
            .reference(NODE_TRIE_REFERENCE_OFFSET)
            .cloned()
            .unwrap_or_default();
        let Some(key) = self.node_leaf(reader, &node_trie, number)? else {
            return Ok((None, Vec::new()));
        };
        let newest = read_node(reader, &key)?;
        let pages = self
            .revisioning
            .collect_snapshots(newest, |k| read_node(reader, k))?;
        Ok((Some(key), pages))
    }

    fn node_leaf(
        &self,
        reader: &BackendReader,
        node_trie: &PageReference,
        number: BucketNo,
    ) -> Result<Option<PageKey>> {
        dereference_leaf(&self.geometry, node_trie, number.0, |k| reader.read(k))
    }
}

pub(crate) fn read_node(reader: &BackendReader, key: &PageKey) -> Result<NodePage> {
    match reader.read(key)? {
        Page::Node(page) => Ok(page),
        other => Err(TesseraError::corruption(format!(
            "node trie leaf {key} holds a {} page",
            other.kind()
        ))),
    }
}

/// Handle to an open store.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// Creates a store at `options.path` and commits the empty revision 0.
    ///
    /// Fails if a store already exists there.
    pub fn create(options: StoreOptions) -> Result<Self> {
        options.validate()?;
        let storage = open_storage(&options)?;
        if storage.read_control(ControlRecord::Settings)?.is_some() {
            return Err(TesseraError::Invalid("a store already exists at this path"));
        }
        storage.write_control(
            ControlRecord::Settings,
            options.persisted().to_toml()?.as_bytes(),
        )?;
        let store = Self::assemble(options, storage)?;
        store.bootstrap()?;
        info!(path = %store.inner.options.path.display(), "store.create");
        Ok(store)
    }

    /// Opens an existing store, checking its persisted layout against
    /// `options`.
    pub fn open(options: StoreOptions) -> Result<Self> {
        options.validate()?;
        if !storage_exists(&options)? {
            return Err(TesseraError::Invalid("no store exists at this path"));
        }
        let storage = open_storage(&options)?;
        let stored = storage
            .read_control(ControlRecord::Settings)?
            .ok_or(TesseraError::Invalid("no store exists at this path"))?;
        PersistedSettings::from_toml(&stored)?.check_compatible(&options.persisted())?;
        let store = Self::assemble(options, storage)?;
        if store.inner.current_uber().revision_count() == 0 {
            store.bootstrap()?;
        }
        info!(
            path = %store.inner.options.path.display(),
            latest = store.latest_revision().0,
            "store.open"
        );
        Ok(store)
    }

    /// Opens the store at `options.path`, creating it if absent.
    pub fn open_or_create(options: StoreOptions) -> Result<Self> {
        let exists = storage_exists(&options)?
            && open_storage(&options)?
                .read_control(ControlRecord::Settings)?
                .is_some();
        if exists {
            Self::open(options)
        } else {
            Self::create(options)
        }
    }

    fn assemble(options: StoreOptions, storage: Arc<dyn crate::backend::Storage>) -> Result<Self> {
        let geometry = options.geometry()?;
        let layout = options.layout();
        let key = if options.byte_handling.needs_key() {
            Some(options.key_bytes()?)
        } else {
            None
        };
        let pipeline = BytePipeline::from_handling(options.byte_handling, key)?;
        let backend = Backend::new(storage, pipeline, PageCodec::new(layout));
        let uber = backend.reader().read_uber()?.unwrap_or_else(UberPage::bootstrap);
        debug!(revisions = uber.revision_count(), ?geometry, "store.assemble");
        Ok(Self {
            inner: Arc::new(StoreInner {
                revisioning: options.revisioning,
                options,
                backend,
                geometry,
                layout,
                uber: RwLock::new(Arc::new(uber)),
                writer_active: AtomicBool::new(false),
            }),
        })
    }

    fn bootstrap(&self) -> Result<()> {
        let mut trx = self.begin_write()?;
        trx.commit()?;
        trx.close()
    }

    /// Options the store was opened with.
    pub fn options(&self) -> &StoreOptions {
        &self.inner.options
    }

    /// Most recently committed revision.
    pub fn latest_revision(&self) -> Revision {
        self.inner
            .current_uber()
            .latest_revision()
            .unwrap_or_default()
    }

    /// Starts a read transaction on `revision`, or on the latest committed
    /// revision if `None`.
    pub fn begin_read(&self, revision: Option<u64>) -> Result<ReadTrx> {
        let uber = self.inner.current_uber();
        let latest = uber.latest_revision().map(|r| r.0);
        let revision = match (revision, latest) {
            (Some(requested), Some(latest)) if requested <= latest => Revision(requested),
            (None, Some(latest)) => Revision(latest),
            (requested, latest) => {
                return Err(TesseraError::RevisionNotFound {
                    requested: requested.unwrap_or_default(),
                    latest,
                })
            }
        };
        ReadTrx::begin(Arc::clone(&self.inner), uber, revision)
    }

    /// Starts the single write transaction; fails if one is active.
    pub fn begin_write(&self) -> Result<WriteTrx> {
        if self
            .inner
            .writer_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(TesseraError::Invalid("a write transaction is already active"));
        }
        WriteTrx::begin(Arc::clone(&self.inner)).map_err(|err| {
            self.inner.release_writer();
            err
        })
    }

    /// Flushes and releases the backend.
    pub fn close(self) -> Result<()> {
        if self.inner.writer_active.load(Ordering::Acquire) {
            return Err(TesseraError::Invalid("close the write transaction first"));
        }
        self.inner.backend.close()?;
        info!(path = %self.inner.options.path.display(), "store.close");
        Ok(())
    }
}
