#![allow(missing_docs)]

use std::collections::BTreeMap;

use proptest::prelude::*;
use tessera::page::{NodePage, SlotEntry};
use tessera::{BucketNo, Record, Revisioning, Store, StoreOptions, TrieGeometry};

#[derive(Debug, Clone)]
enum Operation {
    Set { key: u64, value: u8 },
    Remove { key: u64 },
    Commit,
    Abort,
}

fn arb_operation() -> impl Strategy<Value = Operation> {
    prop_oneof![
        6 => (0u64..48, any::<u8>()).prop_map(|(key, value)| Operation::Set { key, value }),
        2 => (0u64..48).prop_map(|key| Operation::Remove { key }),
        2 => Just(Operation::Commit),
        1 => Just(Operation::Abort),
    ]
}

fn arb_policy() -> impl Strategy<Value = Revisioning> {
    prop_oneof![
        Just(Revisioning::FullDump),
        Just(Revisioning::Incremental),
        Just(Revisioning::Differential),
    ]
}

proptest! {
    #[test]
    fn prop_trie_offsets_are_a_bijection(
        exponent in 1u32..8,
        levels in 1usize..6,
        seed in any::<u64>(),
    ) {
        let geometry = TrieGeometry::new(1 << exponent, levels).unwrap();
        let number = seed % geometry.capacity();
        let offsets = geometry.offsets_for(number).unwrap();
        prop_assert_eq!(offsets.len(), levels);
        prop_assert!(offsets.iter().all(|&o| o < geometry.fanout()));
        prop_assert_eq!(geometry.reconstruct_number(&offsets), number);
        prop_assert!(geometry.offsets_for(geometry.capacity()).is_err());
    }

    #[test]
    fn prop_combining_a_combined_bucket_is_idempotent(
        policy in arb_policy(),
        snapshots in prop::collection::vec(
            prop::collection::vec(prop::option::of(any::<u8>()), 8),
            1..5,
        ),
    ) {
        let pages: Vec<NodePage> = snapshots
            .iter()
            .map(|slots| {
                let mut page = NodePage::new(BucketNo(3), 8);
                for (slot, value) in slots.iter().enumerate() {
                    let key = 3 * 8 + slot as u64;
                    page.set_entry(slot, value.map(|v| SlotEntry::Record(Record::new(key, vec![v]))));
                }
                page
            })
            .collect();
        let combined = policy.combine_for_read(&pages).unwrap();
        let again = policy.combine_for_read(std::slice::from_ref(&combined)).unwrap();
        prop_assert_eq!(again, combined);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_every_revision_matches_a_model(
        policy in arb_policy(),
        window in 1u32..5,
        ops in prop::collection::vec(arb_operation(), 1..80),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::create(
            StoreOptions::new(dir.path().join("store"))
                .revisioning(policy)
                .restore_window(window)
                .fanout_exponent(2)
                .trie_levels(4)
                .bucket_exponent(2)
                .log_capacity(2),
        )
        .unwrap();

        let mut trx = store.begin_write().unwrap();
        let mut pending: BTreeMap<u64, u8> = BTreeMap::new();
        let mut committed = vec![BTreeMap::new()];
        for op in ops {
            match op {
                Operation::Set { key, value } => {
                    trx.set_record(Record::new(key, vec![value])).unwrap();
                    pending.insert(key, value);
                }
                Operation::Remove { key } => {
                    let live = trx.remove_record(key).unwrap();
                    prop_assert_eq!(live, pending.remove(&key).is_some());
                }
                Operation::Commit => {
                    let revision = trx.commit().unwrap();
                    prop_assert_eq!(revision.0 as usize, committed.len());
                    committed.push(pending.clone());
                }
                Operation::Abort => {
                    trx.abort().unwrap();
                    pending = committed.last().cloned().unwrap_or_default();
                }
            }
        }
        trx.close().unwrap();

        for (revision, model) in committed.iter().enumerate() {
            let read = store.begin_read(Some(revision as u64)).unwrap();
            prop_assert_eq!(read.revision_size().unwrap(), model.len() as u64);
            for key in 0..48u64 {
                let expected = model.get(&key).map(|v| vec![*v]);
                prop_assert_eq!(read.get_record(key).unwrap().map(|r| r.payload), expected);
            }
        }
    }
}
