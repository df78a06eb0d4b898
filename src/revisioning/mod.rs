//! Bucket versioning policies.
//!
//! Every persisted bucket version carries [`VersionLinks`]: the key of its
//! predecessor, the key of the full dump it is relative to and its distance
//! from that full dump. A policy decides which of those versions a read
//! folds together and what a write persists.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::cache::PageContainer;
use crate::page::{NodePage, PageKey, SlotEntry, VersionLinks};
use crate::types::{BucketNo, Result, TesseraError};

/// Default number of deltas written before a bucket is dumped in full.
pub const DEFAULT_RESTORE_WINDOW: u32 = 4;

/// How bucket versions are persisted and reconstructed.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Revisioning {
    /// Every write persists the whole bucket; reads consult one version.
    FullDump,
    /// Writes persist only the slots touched by the transaction; reads fold
    /// the chain back to the nearest full dump.
    Incremental,
    /// Writes persist every slot changed since the last full dump; reads
    /// consult the newest version and that full dump.
    #[default]
    Differential,
}

impl Revisioning {
    fn read_depth(self, available: usize) -> usize {
        match self {
            Revisioning::FullDump => 1,
            Revisioning::Differential => available.min(2),
            Revisioning::Incremental => available,
        }
    }

    /// Reconstructs a bucket from snapshots ordered newest first.
    ///
    /// For every slot the newest snapshot holding an entry wins. Tombstones
    /// are kept so a combined page can be combined again without change.
    pub fn combine_for_read(self, pages: &[NodePage]) -> Result<NodePage> {
        let newest = pages
            .first()
            .ok_or(TesseraError::Invalid("at least one bucket snapshot is required"))?;
        let consulted = &pages[..self.read_depth(pages.len())];
        let mut combined = NodePage::new(newest.number(), newest.capacity());
        combined.set_links(newest.links().clone());
        for slot in 0..newest.capacity() {
            if let Some(entry) = consulted.iter().find_map(|page| page.entry(slot)) {
                combined.set_entry(slot, Some(entry.clone()));
            }
        }
        Ok(combined)
    }

    /// True if the next version written after `newest` must be a full dump.
    pub fn must_full_dump(self, newest: Option<&NodePage>, restore_window: u32) -> bool {
        match (self, newest) {
            (Revisioning::FullDump, _) | (_, None) => true,
            (_, Some(page)) => page.links().window >= restore_window,
        }
    }

    /// Prepares the container a write transaction mutates.
    ///
    /// `pages` are the snapshots a read of the bucket would consult, newest
    /// first, and `newest_key` is the key `pages[0]` was persisted under.
    /// The complete half is the read reconstruction; the modified half holds
    /// what has to be persisted before this transaction touches anything.
    pub fn combine_for_write(
        self,
        pages: &[NodePage],
        number: BucketNo,
        capacity: usize,
        newest_key: Option<&PageKey>,
        force_full_dump: bool,
    ) -> Result<PageContainer> {
        let Some(newest) = pages.first() else {
            return Ok(PageContainer::fresh(number, capacity));
        };
        let mut complete = self.combine_for_read(pages)?;
        let full_dump = force_full_dump || self == Revisioning::FullDump;

        let links = if full_dump {
            VersionLinks {
                previous: newest_key.cloned(),
                full_dump: None,
                window: 0,
            }
        } else {
            VersionLinks {
                previous: newest_key.cloned(),
                full_dump: if newest.links().is_full_dump() {
                    newest_key.cloned()
                } else {
                    newest.links().full_dump.clone()
                },
                window: newest.links().window + 1,
            }
        };

        let mut modified = NodePage::new(number, capacity);
        if full_dump {
            for (slot, entry) in complete.occupied() {
                if let SlotEntry::Record(_) = entry {
                    modified.set_entry(slot, Some(entry.clone()));
                }
            }
        } else if self == Revisioning::Differential && !newest.links().is_full_dump() {
            for (slot, entry) in newest.occupied() {
                modified.set_entry(slot, Some(entry.clone()));
            }
        }
        modified.set_links(links.clone());

        complete.set_links(links);
        trace!(
            bucket = number.0,
            full_dump,
            carried = modified.occupied_count(),
            "revisioning.combine_for_write"
        );
        Ok(PageContainer::new(complete, modified))
    }

    /// Collects the snapshots a read of the bucket needs, newest first,
    /// following the version links of `newest` through `fetch`.
    pub fn collect_snapshots<F>(self, newest: NodePage, mut fetch: F) -> Result<Vec<NodePage>>
    where
        F: FnMut(&PageKey) -> Result<NodePage>,
    {
        if newest.links().is_full_dump() || self == Revisioning::FullDump {
            return Ok(vec![newest]);
        }
        match self {
            Revisioning::Differential => {
                let key = newest.links().full_dump.clone().ok_or_else(|| {
                    TesseraError::corruption(format!(
                        "delta of bucket {} has no full dump link",
                        newest.number()
                    ))
                })?;
                let dump = fetch(&key)?;
                Ok(vec![newest, dump])
            }
            Revisioning::Incremental => {
                let mut chain = vec![newest];
                loop {
                    let last = &chain[chain.len() - 1];
                    if last.links().is_full_dump() {
                        break;
                    }
                    let key = last.links().previous.clone().ok_or_else(|| {
                        TesseraError::corruption(format!(
                            "delta of bucket {} has no previous link",
                            last.number()
                        ))
                    })?;
                    chain.push(fetch(&key)?);
                }
                Ok(chain)
            }
            Revisioning::FullDump => Ok(vec![newest]),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::page::Record;
    use crate::types::RecordKey;

    const CAP: usize = 4;

    fn record(key: u64, payload: &str) -> Option<SlotEntry> {
        Some(SlotEntry::Record(Record::new(key, payload.as_bytes().to_vec())))
    }

    fn page(window: u32, slots: &[(usize, Option<SlotEntry>)]) -> NodePage {
        let mut page = NodePage::new(BucketNo(0), CAP);
        page.set_links(VersionLinks {
            window,
            ..VersionLinks::default()
        });
        for (slot, entry) in slots {
            page.set_entry(*slot, entry.clone());
        }
        page
    }

    fn payload(page: &NodePage, slot: usize) -> Option<&[u8]> {
        page.record(slot).map(|r| r.payload.as_slice())
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(Revisioning::Differential.combine_for_read(&[]).is_err());
    }

    #[test]
    fn differential_reads_newest_then_full_dump_only() {
        let newest = page(2, &[(0, record(0, "new"))]);
        let dump = page(0, &[(0, record(0, "old")), (1, record(1, "dump"))]);
        let stale = page(0, &[(2, record(2, "ignored"))]);
        let combined = Revisioning::Differential
            .combine_for_read(&[newest, dump, stale])
            .unwrap();
        assert_eq!(payload(&combined, 0), Some(&b"new"[..]));
        assert_eq!(payload(&combined, 1), Some(&b"dump"[..]));
        assert_eq!(payload(&combined, 2), None);
    }

    #[test]
    fn incremental_folds_the_whole_chain() {
        let pages = [
            page(2, &[(0, record(0, "c"))]),
            page(1, &[(1, record(1, "b"))]),
            page(0, &[(0, record(0, "a")), (2, record(2, "a"))]),
        ];
        let combined = Revisioning::Incremental.combine_for_read(&pages).unwrap();
        assert_eq!(payload(&combined, 0), Some(&b"c"[..]));
        assert_eq!(payload(&combined, 1), Some(&b"b"[..]));
        assert_eq!(payload(&combined, 2), Some(&b"a"[..]));
    }

    #[test]
    fn tombstone_hides_older_record() {
        let pages = [
            page(1, &[(0, Some(SlotEntry::Tombstone(RecordKey(0))))]),
            page(0, &[(0, record(0, "gone"))]),
        ];
        let combined = Revisioning::Differential.combine_for_read(&pages).unwrap();
        assert!(combined.record(0).is_none());
    }

    #[test]
    fn combining_a_combined_page_is_idempotent() {
        let pages = [
            page(1, &[(0, record(0, "x")), (3, Some(SlotEntry::Tombstone(RecordKey(3))))]),
            page(0, &[(1, record(1, "y")), (3, record(3, "z"))]),
        ];
        for policy in [Revisioning::Differential, Revisioning::Incremental, Revisioning::FullDump] {
            let once = policy.combine_for_read(&pages).unwrap();
            let twice = policy.combine_for_read(std::slice::from_ref(&once)).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn unwritten_bucket_yields_fresh_container() {
        let container = Revisioning::Differential
            .combine_for_write(&[], BucketNo(7), CAP, None, false)
            .unwrap();
        assert_eq!(container.complete().occupied_count(), 0);
        assert!(container.modified().links().is_full_dump());
        assert_eq!(container.complete().number(), BucketNo(7));
    }

    #[test]
    fn differential_delta_carries_changes_since_full_dump() {
        let dump_key = PageKey::Embedded { id: 1 };
        let delta_key = PageKey::Embedded { id: 2 };
        let mut delta = page(1, &[(0, record(0, "delta"))]);
        delta.set_links(VersionLinks {
            previous: Some(dump_key.clone()),
            full_dump: Some(dump_key.clone()),
            window: 1,
        });
        let dump = page(0, &[(1, record(1, "dump"))]);

        let container = Revisioning::Differential
            .combine_for_write(&[delta, dump], BucketNo(0), CAP, Some(&delta_key), false)
            .unwrap();
        let modified = container.modified();
        assert_eq!(payload(modified, 0), Some(&b"delta"[..]));
        assert!(modified.entry(1).is_none());
        assert_eq!(modified.links().window, 2);
        assert_eq!(modified.links().full_dump, Some(dump_key));
        assert_eq!(modified.links().previous, Some(delta_key));
        assert_eq!(payload(container.complete(), 1), Some(&b"dump"[..]));
    }

    #[test]
    fn delta_after_full_dump_starts_empty_and_links_to_it() {
        let dump_key = PageKey::Object { id: 4 };
        let dump = page(0, &[(1, record(1, "dump"))]);
        for policy in [Revisioning::Differential, Revisioning::Incremental] {
            let container = policy
                .combine_for_write(std::slice::from_ref(&dump), BucketNo(0), CAP, Some(&dump_key), false)
                .unwrap();
            assert_eq!(container.modified().occupied_count(), 0);
            assert_eq!(container.modified().links().full_dump, Some(dump_key.clone()));
            assert_eq!(container.modified().links().window, 1);
        }
    }

    #[test]
    fn forced_full_dump_materializes_every_live_slot() {
        let pages = [
            page(4, &[(0, record(0, "new")), (2, Some(SlotEntry::Tombstone(RecordKey(2))))]),
            page(0, &[(1, record(1, "dump")), (2, record(2, "dead"))]),
        ];
        assert!(Revisioning::Differential.must_full_dump(Some(&pages[0]), DEFAULT_RESTORE_WINDOW));
        let container = Revisioning::Differential
            .combine_for_write(&pages, BucketNo(0), CAP, Some(&PageKey::Embedded { id: 9 }), true)
            .unwrap();
        let modified = container.modified();
        assert!(modified.links().is_full_dump());
        assert_eq!(modified.links().full_dump, None);
        assert_eq!(payload(modified, 0), Some(&b"new"[..]));
        assert_eq!(payload(modified, 1), Some(&b"dump"[..]));
        assert!(modified.entry(2).is_none());
    }

    #[test]
    fn restore_window_bounds_delta_chain() {
        let policy = Revisioning::Incremental;
        assert!(policy.must_full_dump(None, 4));
        assert!(!policy.must_full_dump(Some(&page(3, &[])), 4));
        assert!(policy.must_full_dump(Some(&page(4, &[])), 4));
        assert!(Revisioning::FullDump.must_full_dump(Some(&page(0, &[])), 4));
    }

    #[test]
    fn snapshot_collection_follows_links() {
        let key = |id| PageKey::Embedded { id };
        let mut store: HashMap<PageKey, NodePage> = HashMap::new();
        store.insert(key(0), page(0, &[(0, record(0, "a"))]));
        let mut second = page(1, &[(1, record(1, "b"))]);
        second.set_links(VersionLinks {
            previous: Some(key(0)),
            full_dump: Some(key(0)),
            window: 1,
        });
        store.insert(key(1), second);
        let mut third = page(2, &[(2, record(2, "c"))]);
        third.set_links(VersionLinks {
            previous: Some(key(1)),
            full_dump: Some(key(0)),
            window: 2,
        });

        let fetch = |k: &PageKey| {
            store
                .get(k)
                .cloned()
                .ok_or_else(|| TesseraError::PageNotFound(k.to_string()))
        };
        let chain = Revisioning::Incremental
            .collect_snapshots(third.clone(), fetch)
            .unwrap();
        assert_eq!(chain.len(), 3);
        let pair = Revisioning::Differential
            .collect_snapshots(third.clone(), fetch)
            .unwrap();
        assert_eq!(pair.len(), 2);
        assert_eq!(pair[1].links().window, 0);
        let single = Revisioning::FullDump.collect_snapshots(third, fetch).unwrap();
        assert_eq!(single.len(), 1);
    }
}
