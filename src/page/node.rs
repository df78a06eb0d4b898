use crate::primitives::bytes::{PageSink, PageSource};
use crate::types::{BucketNo, RecordKey, Result, TesseraError};

use super::key::{deserialize_key, serialize_key, PageKey};
use super::PageLayout;

const RECORD_ENTRY: u8 = 0;
const TOMBSTONE_ENTRY: u8 = 1;

/// An application record stored in a node page slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    /// Key of the record; decides bucket and slot.
    pub key: RecordKey,
    /// Opaque record bytes.
    pub payload: Vec<u8>,
}

impl Record {
    /// Builds a record.
    pub fn new(key: u64, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            key: RecordKey(key),
            payload: payload.into(),
        }
    }
}

/// Content of an occupied slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlotEntry {
    /// Live record.
    Record(Record),
    /// Removal marker; hides older versions of the slot.
    Tombstone(RecordKey),
}

impl SlotEntry {
    /// Key of the record this entry describes.
    pub fn key(&self) -> RecordKey {
        match self {
            SlotEntry::Record(record) => record.key,
            SlotEntry::Tombstone(key) => *key,
        }
    }

    /// The live record, or `None` for a tombstone.
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            SlotEntry::Record(record) => Some(record),
            SlotEntry::Tombstone(_) => None,
        }
    }
}

/// Where a bucket version sits in its version chain.
///
/// `window` counts the deltas written since the last full dump of this
/// bucket; `0` means the page itself is a full dump.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VersionLinks {
    /// Key of the immediately preceding version of the bucket.
    pub previous: Option<PageKey>,
    /// Key of the full dump this delta is relative to.
    pub full_dump: Option<PageKey>,
    /// Versions since the last full dump.
    pub window: u32,
}

impl VersionLinks {
    /// True if the page carries every live slot of its bucket.
    pub fn is_full_dump(&self) -> bool {
        self.window == 0
    }
}

/// One version of a bucket of records.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodePage {
    number: BucketNo,
    links: VersionLinks,
    slots: Vec<Option<SlotEntry>>,
}

impl NodePage {
    /// Empty bucket version with `capacity` slots.
    pub fn new(number: BucketNo, capacity: usize) -> Self {
        Self {
            number,
            links: VersionLinks::default(),
            slots: vec![None; capacity],
        }
    }

    /// Bucket number.
    pub fn number(&self) -> BucketNo {
        self.number
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Version chain position.
    pub fn links(&self) -> &VersionLinks {
        &self.links
    }

    pub(crate) fn set_links(&mut self, links: VersionLinks) {
        self.links = links;
    }

    /// Entry at `slot`, tombstones included.
    pub fn entry(&self, slot: usize) -> Option<&SlotEntry> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    /// Live record at `slot`.
    pub fn record(&self, slot: usize) -> Option<&Record> {
        self.entry(slot).and_then(SlotEntry::as_record)
    }

    /// Stores `entry` at `slot`; out-of-range slots are ignored.
    pub fn set_entry(&mut self, slot: usize, entry: Option<SlotEntry>) {
        if let Some(target) = self.slots.get_mut(slot) {
            *target = entry;
        }
    }

    /// Iterates over occupied slots as `(slot, entry)`.
    pub fn occupied(&self) -> impl Iterator<Item = (usize, &SlotEntry)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|e| (i, e)))
    }

    /// Number of occupied slots.
    pub fn occupied_count(&self) -> usize {
        self.slots.iter().filter(|e| e.is_some()).count()
    }

    pub(crate) fn serialize_body(&self, sink: &mut PageSink) -> Result<()> {
        sink.put_i64(self.number.0 as i64);
        sink.put_i32(self.links.window as i32);
        serialize_key(sink, self.links.previous.as_ref());
        serialize_key(sink, self.links.full_dump.as_ref());
        sink.put_i32(self.occupied_count() as i32);
        for (slot, entry) in self.occupied() {
            sink.put_i32(slot as i32);
            match entry {
                SlotEntry::Record(record) => {
                    sink.put_u8(RECORD_ENTRY);
                    sink.put_i64(record.key.0 as i64);
                    sink.put_bytes(&record.payload)?;
                }
                SlotEntry::Tombstone(key) => {
                    sink.put_u8(TOMBSTONE_ENTRY);
                    sink.put_i64(key.0 as i64);
                }
            }
        }
        Ok(())
    }

    pub(crate) fn deserialize_body(layout: &PageLayout, source: &mut PageSource<'_>) -> Result<Self> {
        let number = BucketNo(source.get_i64()? as u64);
        let window = source.get_i32()?;
        if window < 0 {
            return Err(TesseraError::corruption(format!(
                "bucket {number} has negative version window {window}"
            )));
        }
        let links = VersionLinks {
            window: window as u32,
            previous: deserialize_key(source)?,
            full_dump: deserialize_key(source)?,
        };
        let mut page = NodePage::new(number, layout.bucket_capacity);
        page.links = links;
        let count = source.get_len()?;
        for _ in 0..count {
            let slot = source.get_len()?;
            if slot >= page.capacity() {
                return Err(TesseraError::corruption(format!(
                    "bucket {number} slot {slot} beyond capacity {}",
                    page.capacity()
                )));
            }
            let kind = source.get_u8()?;
            let key = RecordKey(source.get_i64()? as u64);
            let entry = match kind {
                RECORD_ENTRY => SlotEntry::Record(Record {
                    key,
                    payload: source.get_bytes()?,
                }),
                TOMBSTONE_ENTRY => SlotEntry::Tombstone(key),
                other => {
                    return Err(TesseraError::corruption(format!(
                        "bucket {number} slot {slot} has entry kind {other}"
                    )))
                }
            };
            page.slots[slot] = Some(entry);
        }
        Ok(page)
    }
}
