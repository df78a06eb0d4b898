//! Persistence of encoded pages.
//!
//! A [`Storage`] moves opaque frames to and from a physical store. A
//! [`Backend`] layers the page codec and the byte pipeline on top and hands
//! out [`BackendReader`]s and [`BackendWriter`]s.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::{StorageKind, StoreOptions};
use crate::page::{deserialize_key, serialize_key, Page, PageCodec, PageKey, UberPage};
use crate::primitives::bytes::{PageSink, PageSource};
use crate::types::{Result, TesseraError};

mod embedded;
mod file;
mod object;
pub mod pipeline;

pub use embedded::EmbeddedStorage;
pub use file::FileStorage;
pub use object::ObjectStorage;
pub use pipeline::{ByteHandler, BytePipeline, SnappyCompression, StreamEncryption};

/// Small named records kept beside the page frames and replaced atomically.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ControlRecord {
    /// Serialized key of the current uber page.
    UberPointer,
    /// Layout settings written on create.
    Settings,
}

impl ControlRecord {
    /// Stable name of the record inside a store.
    pub fn name(self) -> &'static str {
        match self {
            ControlRecord::UberPointer => "uber",
            ControlRecord::Settings => "settings",
        }
    }
}

/// Physical store of page frames.
pub trait Storage: Send + Sync {
    /// Kind of this store.
    fn kind(&self) -> StorageKind;
    /// Creates whatever files or tables the store needs; idempotent.
    fn initialize(&self) -> Result<()>;
    /// Reads the frame stored under `key`.
    fn read_frame(&self, key: &PageKey) -> Result<Vec<u8>>;
    /// Appends a frame and returns its key.
    fn append_frame(&self, bytes: &[u8]) -> Result<PageKey>;
    /// Reads a control record, `None` if it was never written.
    fn read_control(&self, record: ControlRecord) -> Result<Option<Vec<u8>>>;
    /// Replaces a control record atomically.
    fn write_control(&self, record: ControlRecord, bytes: &[u8]) -> Result<()>;
    /// Makes appended frames durable.
    fn sync(&self) -> Result<()>;
    /// Removes all frames and control records; returns whether anything
    /// existed.
    fn truncate(&self) -> Result<bool>;
    /// Flushes and releases resources.
    fn close(&self) -> Result<()>;
}

/// Opens the store kind selected by `options`.
pub fn open_storage(options: &StoreOptions) -> Result<Arc<dyn Storage>> {
    let storage: Arc<dyn Storage> = match options.storage {
        StorageKind::File => Arc::new(FileStorage::open(&options.path)?),
        StorageKind::Embedded => Arc::new(EmbeddedStorage::open(&options.path)?),
        StorageKind::Object => Arc::new(ObjectStorage::open(&options.path)?),
    };
    storage.initialize()?;
    debug!(kind = ?options.storage, path = %options.path.display(), "backend.storage.open");
    Ok(storage)
}

/// True if a store of the kind selected by `options` was created at its
/// path. Touches nothing on disk.
pub fn storage_exists(options: &StoreOptions) -> Result<bool> {
    let exists = match options.storage {
        StorageKind::File | StorageKind::Object => {
            file::control_path(&options.path, ControlRecord::Settings).try_exists()?
        }
        StorageKind::Embedded => options.path.try_exists()?,
    };
    Ok(exists)
}

/// Codec, pipeline and store bundled together.
#[derive(Clone)]
pub struct Backend {
    storage: Arc<dyn Storage>,
    pipeline: Arc<BytePipeline>,
    codec: Arc<PageCodec>,
}

impl Backend {
    /// Bundles the three layers.
    pub fn new(storage: Arc<dyn Storage>, pipeline: BytePipeline, codec: PageCodec) -> Self {
        Self {
            storage,
            pipeline: Arc::new(pipeline),
            codec: Arc::new(codec),
        }
    }

    /// Underlying store.
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Page codec shared by readers and writers.
    pub fn codec(&self) -> &PageCodec {
        &self.codec
    }

    /// New reader.
    pub fn reader(&self) -> BackendReader {
        BackendReader {
            backend: self.clone(),
        }
    }

    /// New writer.
    pub fn writer(&self) -> BackendWriter {
        BackendWriter {
            backend: self.clone(),
        }
    }

    /// Flushes and releases the store.
    pub fn close(&self) -> Result<()> {
        self.storage.close()?;
        info!(kind = ?self.storage.kind(), "backend.close");
        Ok(())
    }
}

/// Reads and decodes pages.
#[derive(Clone)]
pub struct BackendReader {
    backend: Backend,
}

impl BackendReader {
    /// Reads, inverts and decodes the page under `key`.
    pub fn read(&self, key: &PageKey) -> Result<Page> {
        let frame = self.backend.storage.read_frame(key)?;
        let bytes = self.backend.pipeline.invert(frame)?;
        self.backend.codec.decode(&bytes)
    }

    /// Current uber page, `None` for a store that never committed.
    pub fn read_uber(&self) -> Result<Option<UberPage>> {
        let Some(pointer) = self.backend.storage.read_control(ControlRecord::UberPointer)? else {
            return Ok(None);
        };
        let mut source = PageSource::new(&pointer);
        let key = deserialize_key(&mut source)?
            .ok_or_else(|| TesseraError::corruption("uber pointer holds a null key"))?;
        source.finish()?;
        match self.read(&key)? {
            Page::Uber(uber) => Ok(Some(uber)),
            other => Err(TesseraError::corruption(format!(
                "uber pointer {key} leads to a {} page",
                other.kind()
            ))),
        }
    }
}

/// Encodes and persists pages.
#[derive(Clone)]
pub struct BackendWriter {
    backend: Backend,
}

impl BackendWriter {
    /// Encodes a page and runs it through the pipeline without touching
    /// the store; safe to call from several threads at once.
    pub fn prepare(&self, page: &Page) -> Result<Vec<u8>> {
        let bytes = self.backend.codec.encode(page)?;
        self.backend.pipeline.transform(bytes)
    }

    /// Appends a frame produced by [`BackendWriter::prepare`].
    pub fn write_prepared(&self, frame: &[u8]) -> Result<PageKey> {
        self.backend.storage.append_frame(frame)
    }

    /// Prepares and appends `page`.
    pub fn write(&self, page: &Page) -> Result<PageKey> {
        let frame = self.prepare(page)?;
        self.write_prepared(&frame)
    }

    /// Persists `uber`, makes every frame durable and then swaps the root
    /// pointer to the new page.
    pub fn write_uber_page(&self, uber: &UberPage) -> Result<PageKey> {
        let key = self.write(&Page::Uber(uber.clone()))?;
        self.backend.storage.sync()?;
        let mut sink = PageSink::new();
        serialize_key(&mut sink, Some(&key));
        self.backend
            .storage
            .write_control(ControlRecord::UberPointer, &sink.into_vec())?;
        debug!(%key, revisions = uber.revision_count(), "backend.write_uber_page");
        Ok(key)
    }
}
