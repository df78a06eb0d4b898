use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::config::StorageKind;
use crate::page::PageKey;
use crate::types::{frame_crc32, Result, TesseraError};

use super::file::{control_path, read_optional, remove_optional, sync_dir, write_atomic};
use super::{ControlRecord, Storage};

const OBJECTS_DIR: &str = "objects";
const CRC_LEN: usize = 4;

struct ObjectState {
    next_id: u64,
    unsynced: Vec<PathBuf>,
}

/// One immutable object per page, named after its sequential id.
///
/// Each object holds a CRC32 of its payload followed by the payload.
pub struct ObjectStorage {
    dir: PathBuf,
    state: Mutex<ObjectState>,
}

impl ObjectStorage {
    /// Opens (creating if needed) the object directory and resumes the id
    /// counter after the highest stored object.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(dir.join(OBJECTS_DIR))?;
        let next_id = scan_next_id(&dir.join(OBJECTS_DIR))?;
        debug!(dir = %dir.display(), next_id, "object_store.open");
        Ok(Self {
            dir,
            state: Mutex::new(ObjectState {
                next_id,
                unsynced: Vec::new(),
            }),
        })
    }

    fn objects(&self) -> PathBuf {
        self.dir.join(OBJECTS_DIR)
    }

    fn object_path(&self, id: u64) -> PathBuf {
        self.objects().join(format!("{id:016x}"))
    }
}

fn scan_next_id(objects: &Path) -> Result<u64> {
    let mut next = 0u64;
    for entry in fs::read_dir(objects)? {
        let name = entry?.file_name();
        if let Some(id) = name.to_str().and_then(|n| u64::from_str_radix(n, 16).ok()) {
            let after = id.checked_add(1).ok_or_else(|| {
                TesseraError::corruption(format!("object id {id:016x} exhausts the id space"))
            })?;
            next = next.max(after);
        }
    }
    Ok(next)
}

impl Storage for ObjectStorage {
    fn kind(&self) -> StorageKind {
        StorageKind::Object
    }

    fn initialize(&self) -> Result<()> {
        fs::create_dir_all(self.objects())?;
        Ok(())
    }

    fn read_frame(&self, key: &PageKey) -> Result<Vec<u8>> {
        let PageKey::Object { id } = *key else {
            return Err(TesseraError::Incompatible(format!(
                "object store cannot resolve {key}"
            )));
        };
        let bytes = read_optional(&self.object_path(id))?
            .ok_or_else(|| TesseraError::PageNotFound(key.to_string()))?;
        if bytes.len() < CRC_LEN {
            return Err(TesseraError::corruption(format!("object {id} is truncated")));
        }
        let crc = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let payload = &bytes[CRC_LEN..];
        if frame_crc32(id, payload) != crc {
            return Err(TesseraError::corruption(format!("checksum mismatch in object {id}")));
        }
        trace!(id, len = payload.len(), "object_store.read_frame");
        Ok(payload.to_vec())
    }

    fn append_frame(&self, bytes: &[u8]) -> Result<PageKey> {
        let mut state = self.state.lock();
        let id = state.next_id;
        let next_id = id
            .checked_add(1)
            .ok_or(TesseraError::Invalid("object id space exhausted"))?;
        let mut object = Vec::with_capacity(CRC_LEN + bytes.len());
        object.extend_from_slice(&frame_crc32(id, bytes).to_be_bytes());
        object.extend_from_slice(bytes);
        let path = self.object_path(id);
        fs::write(&path, &object)?;
        state.unsynced.push(path);
        state.next_id = next_id;
        trace!(id, len = bytes.len(), "object_store.append_frame");
        Ok(PageKey::Object { id })
    }

    fn read_control(&self, record: ControlRecord) -> Result<Option<Vec<u8>>> {
        read_optional(&control_path(&self.dir, record))
    }

    fn write_control(&self, record: ControlRecord, bytes: &[u8]) -> Result<()> {
        write_atomic(&control_path(&self.dir, record), bytes)
    }

    fn sync(&self) -> Result<()> {
        let pending = std::mem::take(&mut self.state.lock().unsynced);
        for path in &pending {
            fs::File::open(path)?.sync_all()?;
        }
        if !pending.is_empty() {
            sync_dir(&self.objects());
        }
        Ok(())
    }

    fn truncate(&self) -> Result<bool> {
        let mut state = self.state.lock();
        let mut existed = false;
        for entry in fs::read_dir(self.objects())? {
            fs::remove_file(entry?.path())?;
            existed = true;
        }
        for record in [ControlRecord::UberPointer, ControlRecord::Settings] {
            existed |= remove_optional(&control_path(&self.dir, record))?;
        }
        state.next_id = 0;
        state.unsynced.clear();
        debug!(dir = %self.dir.display(), existed, "object_store.truncate");
        Ok(existed)
    }

    fn close(&self) -> Result<()> {
        self.sync()
    }
}
