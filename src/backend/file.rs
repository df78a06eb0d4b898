use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::config::StorageKind;
use crate::page::PageKey;
use crate::primitives::io::{FileIo, StdFileIo};
use crate::types::{frame_crc32, Result, TesseraError};

use super::{ControlRecord, Storage};

const DATA_FILE: &str = "pages.dat";
const FRAME_HEADER_LEN: u64 = 8;

/// Append-only data file of checksummed frames inside a directory.
///
/// Frame layout: `[len u32 BE][crc32 u32 BE][payload]`. The key of a frame
/// is its offset and total length.
pub struct FileStorage {
    dir: PathBuf,
    data: StdFileIo,
    tail: Mutex<u64>,
}

impl FileStorage {
    /// Opens (creating if needed) the store directory.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let data = StdFileIo::open(dir.join(DATA_FILE))?;
        let tail = data.len()?;
        debug!(dir = %dir.display(), tail, "file_store.open");
        Ok(Self {
            dir,
            data,
            tail: Mutex::new(tail),
        })
    }

    fn control_path(&self, record: ControlRecord) -> PathBuf {
        control_path(&self.dir, record)
    }
}

pub(super) fn control_path(dir: &Path, record: ControlRecord) -> PathBuf {
    dir.join(format!("{}.ctl", record.name()))
}

/// Writes `bytes` to a sibling temp file, syncs it and renames it over
/// `path`.
pub(super) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    File::open(&tmp)?.sync_all()?;
    fs::rename(&tmp, path)?;
    if let Some(parent) = path.parent() {
        sync_dir(parent);
    }
    Ok(())
}

#[cfg(unix)]
pub(super) fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}

#[cfg(not(unix))]
pub(super) fn sync_dir(_dir: &Path) {}

/// Contents of `path`, `None` if it does not exist.
pub(super) fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Removes `path`; returns whether it existed.
pub(super) fn remove_optional(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err.into()),
    }
}

impl Storage for FileStorage {
    fn kind(&self) -> StorageKind {
        StorageKind::File
    }

    fn initialize(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    fn read_frame(&self, key: &PageKey) -> Result<Vec<u8>> {
        let PageKey::File { offset, length } = *key else {
            return Err(TesseraError::Incompatible(format!(
                "file store cannot resolve {key}"
            )));
        };
        let end = offset.checked_add(length);
        if length < FRAME_HEADER_LEN || end.map_or(true, |end| end > *self.tail.lock()) {
            return Err(TesseraError::PageNotFound(key.to_string()));
        }
        let mut header = [0u8; FRAME_HEADER_LEN as usize];
        self.data.read_at(offset, &mut header)?;
        let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as u64;
        let crc = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
        if len + FRAME_HEADER_LEN != length {
            return Err(TesseraError::corruption(format!(
                "frame at {offset} has length {len}, key says {}",
                length - FRAME_HEADER_LEN
            )));
        }
        let mut payload = vec![0u8; len as usize];
        self.data.read_at(offset + FRAME_HEADER_LEN, &mut payload)?;
        if frame_crc32(offset, &payload) != crc {
            return Err(TesseraError::corruption(format!(
                "checksum mismatch in frame at {offset}"
            )));
        }
        trace!(offset, len, "file_store.read_frame");
        Ok(payload)
    }

    fn append_frame(&self, bytes: &[u8]) -> Result<PageKey> {
        let len = u32::try_from(bytes.len())
            .map_err(|_| TesseraError::Invalid("frame larger than 4 GiB"))?;
        let mut tail = self.tail.lock();
        let offset = *tail;
        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN as usize + bytes.len());
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(&frame_crc32(offset, bytes).to_be_bytes());
        frame.extend_from_slice(bytes);
        self.data.write_at(offset, &frame)?;
        *tail += frame.len() as u64;
        trace!(offset, len, "file_store.append_frame");
        Ok(PageKey::File {
            offset,
            length: frame.len() as u64,
        })
    }

    fn read_control(&self, record: ControlRecord) -> Result<Option<Vec<u8>>> {
        read_optional(&self.control_path(record))
    }

    fn write_control(&self, record: ControlRecord, bytes: &[u8]) -> Result<()> {
        write_atomic(&self.control_path(record), bytes)
    }

    fn sync(&self) -> Result<()> {
        self.data.sync_all()
    }

    fn truncate(&self) -> Result<bool> {
        let mut tail = self.tail.lock();
        let mut existed = *tail > 0;
        for record in [ControlRecord::UberPointer, ControlRecord::Settings] {
            existed |= remove_optional(&self.control_path(record))?;
        }
        self.data.truncate(0)?;
        self.data.sync_all()?;
        *tail = 0;
        debug!(dir = %self.dir.display(), existed, "file_store.truncate");
        Ok(existed)
    }

    fn close(&self) -> Result<()> {
        self.data.sync_all()
    }
}
