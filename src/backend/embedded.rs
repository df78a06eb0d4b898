use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, trace};

use crate::config::StorageKind;
use crate::page::PageKey;
use crate::types::{Result, TesseraError};

use super::{ControlRecord, Storage};

/// Pages and control records inside a SQLite database file.
pub struct EmbeddedStorage {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl EmbeddedStorage {
    /// Opens (creating if needed) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        debug!(path = %path.display(), "embedded_store.open");
        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }
}

impl Storage for EmbeddedStorage {
    fn kind(&self) -> StorageKind {
        StorageKind::Embedded
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS pages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                bytes BLOB NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS control (
                name TEXT PRIMARY KEY,
                bytes BLOB NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    fn read_frame(&self, key: &PageKey) -> Result<Vec<u8>> {
        let PageKey::Embedded { id } = *key else {
            return Err(TesseraError::Incompatible(format!(
                "embedded store cannot resolve {key}"
            )));
        };
        let bytes: Option<Vec<u8>> = self
            .conn
            .lock()
            .query_row(
                "SELECT bytes FROM pages WHERE id = ?1",
                params![id as i64],
                |row| row.get(0),
            )
            .optional()?;
        trace!(id, found = bytes.is_some(), "embedded_store.read_frame");
        bytes.ok_or_else(|| TesseraError::PageNotFound(key.to_string()))
    }

    fn append_frame(&self, bytes: &[u8]) -> Result<PageKey> {
        let conn = self.conn.lock();
        conn.execute("INSERT INTO pages (bytes) VALUES (?1)", params![bytes])?;
        let id = conn.last_insert_rowid() as u64;
        trace!(id, len = bytes.len(), "embedded_store.append_frame");
        Ok(PageKey::Embedded { id })
    }

    fn read_control(&self, record: ControlRecord) -> Result<Option<Vec<u8>>> {
        let bytes = self
            .conn
            .lock()
            .query_row(
                "SELECT bytes FROM control WHERE name = ?1",
                params![record.name()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(bytes)
    }

    fn write_control(&self, record: ControlRecord, bytes: &[u8]) -> Result<()> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO control (name, bytes) VALUES (?1, ?2)",
            params![record.name(), bytes],
        )?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        // Every statement commits with synchronous=FULL.
        Ok(())
    }

    fn truncate(&self) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let pages = tx.execute("DELETE FROM pages", [])?;
        let control = tx.execute("DELETE FROM control", [])?;
        tx.execute("DELETE FROM sqlite_sequence WHERE name = 'pages'", [])?;
        tx.commit()?;
        let existed = pages + control > 0;
        debug!(path = %self.path.display(), existed, "embedded_store.truncate");
        Ok(existed)
    }

    fn close(&self) -> Result<()> {
        self.conn
            .lock()
            .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
        Ok(())
    }
}
