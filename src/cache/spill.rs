use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::page::{NodePage, Page, PageCodec};
use crate::types::{Result, TesseraError};

use super::{PageCache, PageContainer};

/// Persistent second tier backed by a private SQLite file.
///
/// Containers are stored through the page codec. Failures are logged and
/// reported as misses so the cache contract stays infallible.
pub struct SpillCache {
    conn: Mutex<Connection>,
    codec: PageCodec,
    _dir: TempDir,
}

impl SpillCache {
    /// Opens a fresh spill file in a temporary directory.
    pub fn open(codec: PageCodec) -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("spill.db");
        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "synchronous", "OFF")?;
        conn.pragma_update(None, "journal_mode", "MEMORY")?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS spill (
                bucket INTEGER PRIMARY KEY,
                complete BLOB NOT NULL,
                modified BLOB NOT NULL
            )",
            [],
        )?;
        debug!(path = %path.display(), "cache.spill.open");
        Ok(Self {
            conn: Mutex::new(conn),
            codec,
            _dir: dir,
        })
    }

    fn encode(&self, container: &PageContainer) -> Result<(Vec<u8>, Vec<u8>)> {
        let complete = self.codec.encode(&Page::Node(container.complete().clone()))?;
        let modified = self.codec.encode(&Page::Node(container.modified().clone()))?;
        Ok((complete, modified))
    }

    fn decode_node(&self, bytes: &[u8]) -> Result<NodePage> {
        match self.codec.decode(bytes)? {
            Page::Node(page) => Ok(page),
            other => Err(TesseraError::corruption(format!(
                "spill tier holds a {} page",
                other.kind()
            ))),
        }
    }

    fn try_get(&self, key: u64) -> Result<Option<PageContainer>> {
        let row: Option<(Vec<u8>, Vec<u8>)> = self
            .conn
            .lock()
            .query_row(
                "SELECT complete, modified FROM spill WHERE bucket = ?1",
                params![key as i64],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        match row {
            Some((complete, modified)) => Ok(Some(PageContainer::new(
                self.decode_node(&complete)?,
                self.decode_node(&modified)?,
            ))),
            None => Ok(None),
        }
    }

    fn try_put(&self, key: u64, container: &PageContainer) -> Result<()> {
        let (complete, modified) = self.encode(container)?;
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO spill (bucket, complete, modified) VALUES (?1, ?2, ?3)",
            params![key as i64, complete, modified],
        )?;
        Ok(())
    }

    fn try_remove(&self, key: u64) -> Result<Option<PageContainer>> {
        let found = self.try_get(key)?;
        if found.is_some() {
            self.conn
                .lock()
                .execute("DELETE FROM spill WHERE bucket = ?1", params![key as i64])?;
        }
        Ok(found)
    }

    /// Number of spilled containers; `0` if the count cannot be read.
    pub fn len(&self) -> usize {
        self.conn
            .lock()
            .query_row("SELECT COUNT(*) FROM spill", [], |row| row.get::<_, i64>(0))
            .map(|n| n as usize)
            .unwrap_or_default()
    }

    /// True if nothing was spilled.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PageCache for SpillCache {
    fn get(&self, key: u64) -> Option<PageContainer> {
        self.try_get(key).unwrap_or_else(|err| {
            warn!(key, error = %err, "cache.spill.get_failed");
            None
        })
    }

    fn put(&self, key: u64, container: PageContainer) {
        if let Err(err) = self.try_put(key, &container) {
            warn!(key, error = %err, "cache.spill.put_failed");
        }
    }

    fn remove(&self, key: u64) -> Option<PageContainer> {
        self.try_remove(key).unwrap_or_else(|err| {
            warn!(key, error = %err, "cache.spill.remove_failed");
            None
        })
    }

    fn clear(&self) {
        if let Err(err) = self.conn.lock().execute("DELETE FROM spill", []) {
            warn!(error = %err, "cache.spill.clear_failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cache::LruPageCache;
    use crate::page::{PageLayout, Record, SlotEntry};
    use crate::types::BucketNo;

    fn codec() -> PageCodec {
        PageCodec::new(PageLayout {
            fanout: 4,
            bucket_capacity: 4,
        })
    }

    #[test]
    fn spilled_container_comes_back_intact() {
        let spill = SpillCache::open(codec()).unwrap();
        let mut container = PageContainer::fresh(BucketNo(2), 4);
        container.set_entry(3, Some(SlotEntry::Record(Record::new(11, b"eleven".to_vec()))));
        spill.put(2, container.clone());
        assert_eq!(spill.len(), 1);
        assert_eq!(spill.get(2), Some(container.clone()));
        assert_eq!(spill.remove(2), Some(container));
        assert!(spill.is_empty());
    }

    #[test]
    fn lru_overflow_lands_on_disk() {
        let spill = Arc::new(SpillCache::open(codec()).unwrap());
        let cache = LruPageCache::new(2, spill.clone());
        for key in 0..5u64 {
            cache.put(key, PageContainer::fresh(BucketNo(key), 4));
        }
        assert_eq!(spill.len(), 3);
        assert_eq!(cache.get(0), Some(PageContainer::fresh(BucketNo(0), 4)));
        cache.clear();
        assert!(spill.is_empty());
    }
}
