//! Construction-time options of a store.
//!
//! [`StoreOptions`] is built with chained setters or loaded from TOML. The
//! part of it that fixes the on-disk layout is captured in
//! [`PersistedSettings`] and written next to the data on create.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cache::DEFAULT_LOG_CAPACITY;
use crate::page::PageLayout;
use crate::revisioning::{Revisioning, DEFAULT_RESTORE_WINDOW};
use crate::trie::TrieGeometry;
use crate::types::{Result, TesseraError};

/// Binary-compatibility version written by this build.
pub const CURRENT_VERSION: [u32; 3] = [5, 0, 0];

const MAX_EXPONENT: u32 = 16;
const MAX_LEVELS: u32 = 16;

/// Physical store kind.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    /// Append-only data file plus control files in a directory.
    #[default]
    File,
    /// SQLite database file.
    Embedded,
    /// One object per page inside a directory.
    Object,
}

/// Byte pipeline applied between the page codec and the store.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteHandling {
    /// Bytes are stored as encoded.
    #[default]
    None,
    /// Snappy compression.
    Compress,
    /// Stream encryption with the configured key.
    Encrypt,
    /// Compression followed by encryption.
    Both,
}

impl ByteHandling {
    /// True if the pipeline needs an encryption key.
    pub fn needs_key(self) -> bool {
        matches!(self, ByteHandling::Encrypt | ByteHandling::Both)
    }
}

/// Second tier of a write transaction's log.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteLogKind {
    /// Evicted buckets stay in memory.
    #[default]
    Memory,
    /// Evicted buckets are spilled to a temporary SQLite file.
    Spill,
}

/// Options supplied when creating or opening a store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreOptions {
    /// Location of the store: a directory, or the database file for the
    /// embedded kind.
    pub path: PathBuf,
    /// Physical store kind.
    pub storage: StorageKind,
    /// Bucket versioning policy.
    pub revisioning: Revisioning,
    /// Deltas written before a bucket is dumped in full.
    pub restore_window: u32,
    /// Byte pipeline composition.
    pub byte_handling: ByteHandling,
    /// Hex-encoded 32-byte key for the encrypting pipelines.
    pub encryption_key: Option<String>,
    /// Binary-compatibility version triple.
    pub version: [u32; 3],
    /// Indirect pages hold `2^fanout_exponent` references.
    pub fanout_exponent: u32,
    /// Indirect levels per trie.
    pub trie_levels: u32,
    /// Buckets hold `2^bucket_exponent` records.
    pub bucket_exponent: u32,
    /// Buckets held by the primary tier of a write transaction's log.
    pub log_capacity: usize,
    /// Second tier of a write transaction's log.
    pub write_log: WriteLogKind,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            storage: StorageKind::default(),
            revisioning: Revisioning::default(),
            restore_window: DEFAULT_RESTORE_WINDOW,
            byte_handling: ByteHandling::default(),
            encryption_key: None,
            version: CURRENT_VERSION,
            fanout_exponent: 7,
            trie_levels: 4,
            bucket_exponent: 7,
            log_capacity: DEFAULT_LOG_CAPACITY,
            write_log: WriteLogKind::default(),
        }
    }
}

impl StoreOptions {
    /// Options with defaults for a store at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Parses options from TOML.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let options: Self =
            toml::from_str(text).map_err(|e| TesseraError::Config(format!("invalid options: {e}")))?;
        options.validate()?;
        Ok(options)
    }

    /// Reads and parses a TOML options file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            TesseraError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// Selects the physical store kind.
    pub fn storage(mut self, kind: StorageKind) -> Self {
        self.storage = kind;
        self
    }

    /// Selects the versioning policy.
    pub fn revisioning(mut self, policy: Revisioning) -> Self {
        self.revisioning = policy;
        self
    }

    /// Sets the number of deltas between forced full dumps.
    pub fn restore_window(mut self, window: u32) -> Self {
        self.restore_window = window;
        self
    }

    /// Selects the byte pipeline.
    pub fn byte_handling(mut self, handling: ByteHandling) -> Self {
        self.byte_handling = handling;
        self
    }

    /// Sets the encryption key.
    pub fn encryption_key(mut self, key: [u8; 32]) -> Self {
        self.encryption_key = Some(hex::encode(key));
        self
    }

    /// Sets the fan-out exponent of indirect pages.
    pub fn fanout_exponent(mut self, exponent: u32) -> Self {
        self.fanout_exponent = exponent;
        self
    }

    /// Sets the number of trie levels.
    pub fn trie_levels(mut self, levels: u32) -> Self {
        self.trie_levels = levels;
        self
    }

    /// Sets the bucket size exponent.
    pub fn bucket_exponent(mut self, exponent: u32) -> Self {
        self.bucket_exponent = exponent;
        self
    }

    /// Sets the primary tier capacity of write logs.
    pub fn log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity;
        self
    }

    /// Selects the second tier of write logs.
    pub fn write_log(mut self, kind: WriteLogKind) -> Self {
        self.write_log = kind;
        self
    }

    /// Rejects option combinations no store can be built from.
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_EXPONENT).contains(&self.fanout_exponent) {
            return Err(TesseraError::Config(format!(
                "fanout_exponent must be in 1..={MAX_EXPONENT}, got {}",
                self.fanout_exponent
            )));
        }
        if !(1..=MAX_EXPONENT).contains(&self.bucket_exponent) {
            return Err(TesseraError::Config(format!(
                "bucket_exponent must be in 1..={MAX_EXPONENT}, got {}",
                self.bucket_exponent
            )));
        }
        if !(1..=MAX_LEVELS).contains(&self.trie_levels) {
            return Err(TesseraError::Config(format!(
                "trie_levels must be in 1..={MAX_LEVELS}, got {}",
                self.trie_levels
            )));
        }
        if self.log_capacity == 0 {
            return Err(TesseraError::Config("log_capacity must be positive".into()));
        }
        if self.byte_handling.needs_key() {
            self.key_bytes()?;
        }
        Ok(())
    }

    /// Decoded encryption key, required by the encrypting pipelines.
    pub fn key_bytes(&self) -> Result<[u8; 32]> {
        let text = self
            .encryption_key
            .as_deref()
            .ok_or_else(|| TesseraError::Config("encryption requires encryption_key".into()))?;
        let raw = hex::decode(text)
            .map_err(|e| TesseraError::Config(format!("encryption_key is not hex: {e}")))?;
        raw.try_into().map_err(|raw: Vec<u8>| {
            TesseraError::Config(format!("encryption_key must be 32 bytes, got {}", raw.len()))
        })
    }

    /// References per indirect page.
    pub fn fanout(&self) -> usize {
        1usize << self.fanout_exponent
    }

    /// Records per bucket.
    pub fn bucket_capacity(&self) -> usize {
        1usize << self.bucket_exponent
    }

    /// Trie shape derived from the options.
    pub fn geometry(&self) -> Result<TrieGeometry> {
        TrieGeometry::new(self.fanout(), self.trie_levels as usize)
    }

    /// Page layout derived from the options.
    pub fn layout(&self) -> PageLayout {
        PageLayout {
            fanout: self.fanout(),
            bucket_capacity: self.bucket_capacity(),
        }
    }

    /// Settings persisted with the store.
    pub fn persisted(&self) -> PersistedSettings {
        PersistedSettings {
            version: self.version,
            storage: self.storage,
            fanout_exponent: self.fanout_exponent,
            trie_levels: self.trie_levels,
            bucket_exponent: self.bucket_exponent,
            revisioning: self.revisioning,
            restore_window: self.restore_window,
            byte_handling: self.byte_handling,
        }
    }
}

/// The layout-defining settings written when a store is created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSettings {
    /// Version triple of the build that created the store.
    pub version: [u32; 3],
    /// Physical store kind.
    pub storage: StorageKind,
    /// Fan-out exponent.
    pub fanout_exponent: u32,
    /// Trie levels.
    pub trie_levels: u32,
    /// Bucket size exponent.
    pub bucket_exponent: u32,
    /// Versioning policy the buckets were written with.
    pub revisioning: Revisioning,
    /// Restore window at creation; informational.
    pub restore_window: u32,
    /// Byte pipeline composition.
    pub byte_handling: ByteHandling,
}

impl PersistedSettings {
    /// Serializes to TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| TesseraError::Config(format!("cannot serialize settings: {e}")))
    }

    /// Parses settings written by [`PersistedSettings::to_toml`].
    pub fn from_toml(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| TesseraError::corruption("settings record is not UTF-8"))?;
        toml::from_str(text)
            .map_err(|e| TesseraError::corruption(format!("settings record unreadable: {e}")))
    }

    /// Fails with `Incompatible` if a store written with `self` cannot be
    /// read with `requested`.
    pub fn check_compatible(&self, requested: &PersistedSettings) -> Result<()> {
        let mismatch = |what: &str, stored: String, asked: String| {
            Err(TesseraError::Incompatible(format!(
                "{what}: store has {stored}, options ask for {asked}"
            )))
        };
        if self.version[0] != requested.version[0] {
            return mismatch(
                "major version",
                self.version[0].to_string(),
                requested.version[0].to_string(),
            );
        }
        if self.storage != requested.storage {
            return mismatch(
                "storage",
                format!("{:?}", self.storage),
                format!("{:?}", requested.storage),
            );
        }
        if self.fanout_exponent != requested.fanout_exponent {
            return mismatch(
                "fanout_exponent",
                self.fanout_exponent.to_string(),
                requested.fanout_exponent.to_string(),
            );
        }
        if self.trie_levels != requested.trie_levels {
            return mismatch(
                "trie_levels",
                self.trie_levels.to_string(),
                requested.trie_levels.to_string(),
            );
        }
        if self.bucket_exponent != requested.bucket_exponent {
            return mismatch(
                "bucket_exponent",
                self.bucket_exponent.to_string(),
                requested.bucket_exponent.to_string(),
            );
        }
        if self.revisioning != requested.revisioning {
            return mismatch(
                "revisioning",
                format!("{:?}", self.revisioning),
                format!("{:?}", requested.revisioning),
            );
        }
        if self.byte_handling != requested.byte_handling {
            return mismatch(
                "byte_handling",
                format!("{:?}", self.byte_handling),
                format!("{:?}", requested.byte_handling),
            );
        }
        Ok(())
    }
}
