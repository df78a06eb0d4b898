#![allow(missing_docs)]

use std::path::Path;

use tempfile::tempdir;
use tessera::{Record, RecordKey, Revision, Revisioning, Store, StoreOptions, TesseraError};

const POLICIES: [Revisioning; 3] = [
    Revisioning::FullDump,
    Revisioning::Incremental,
    Revisioning::Differential,
];

fn options(dir: &Path, policy: Revisioning) -> StoreOptions {
    StoreOptions::new(dir.join(format!("{policy:?}")))
        .revisioning(policy)
        .restore_window(3)
        .fanout_exponent(2)
        .trie_levels(4)
        .bucket_exponent(2)
        .log_capacity(3)
}

#[test]
fn readers_keep_their_revision_while_the_writer_moves_on() -> tessera::Result<()> {
    let dir = tempdir()?;
    for policy in POLICIES {
        let store = Store::create(options(dir.path(), policy))?;
        let mut trx = store.begin_write()?;
        trx.set_record(Record::new(0, b"v1".to_vec()))?;
        trx.commit()?;

        let pinned = store.begin_read(None)?;
        trx.set_record(Record::new(0, b"v2".to_vec()))?;
        trx.set_record(Record::new(1, b"new".to_vec()))?;
        assert_eq!(pinned.get_record(0)?.map(|r| r.payload), Some(b"v1".to_vec()));
        trx.commit()?;
        trx.close()?;

        assert_eq!(pinned.revision(), Revision(1));
        assert_eq!(pinned.get_record(0)?.map(|r| r.payload), Some(b"v1".to_vec()));
        assert!(pinned.get_record(1)?.is_none());
        let latest = store.begin_read(None)?;
        assert_eq!(latest.get_record(0)?.map(|r| r.payload), Some(b"v2".to_vec()));
        assert_eq!(latest.revision_size()?, 2);
    }
    Ok(())
}

#[test]
fn long_histories_reconstruct_every_revision() -> tessera::Result<()> {
    let dir = tempdir()?;
    for policy in POLICIES {
        let store = Store::create(options(dir.path(), policy))?;
        let mut trx = store.begin_write()?;
        // Keys 0..4 share one bucket; each revision rewrites one of them so
        // the bucket crosses several restore windows.
        for round in 0..12u64 {
            trx.set_record(Record::new(round % 4, round.to_be_bytes().to_vec()))?;
            if round == 7 {
                trx.remove_record(3)?;
            }
            trx.commit()?;
        }
        trx.close()?;

        for revision in 1..=12u64 {
            let read = store.begin_read(Some(revision))?;
            for key in 0..4u64 {
                let last_write = (0..revision).filter(|r| r % 4 == key).last();
                // removed in revision 8, rewritten in revision 12
                let removed = key == 3 && (8..12).contains(&revision);
                let expected = if removed {
                    None
                } else {
                    last_write.map(|r| r.to_be_bytes().to_vec())
                };
                assert_eq!(
                    read.get_record(key)?.map(|r| r.payload),
                    expected,
                    "{policy:?} revision {revision} key {key}"
                );
            }
        }
    }
    Ok(())
}

#[test]
fn abort_and_reopen_leave_no_trace_of_uncommitted_work() -> tessera::Result<()> {
    let dir = tempdir()?;
    for policy in POLICIES {
        let opts = options(dir.path(), policy);
        {
            let store = Store::create(opts.clone())?;
            let mut trx = store.begin_write()?;
            trx.set_record(Record::new(5, b"kept".to_vec()))?;
            trx.commit()?;
            trx.set_record(Record::new(5, b"aborted".to_vec()))?;
            trx.abort()?;
            assert_eq!(trx.get_record(5)?.map(|r| r.payload), Some(b"kept".to_vec()));
            trx.set_record(Record::new(6, b"dropped".to_vec()))?;
            drop(trx);
            store.close()?;
        }
        let store = Store::open(opts)?;
        assert_eq!(store.latest_revision(), Revision(1));
        let read = store.begin_read(None)?;
        assert_eq!(read.get_record(5)?.map(|r| r.payload), Some(b"kept".to_vec()));
        assert!(read.get_record(6)?.is_none());
    }
    Ok(())
}

#[test]
fn names_are_stable_across_revisions() -> tessera::Result<()> {
    let dir = tempdir()?;
    let store = Store::create(options(dir.path(), Revisioning::Differential))?;
    let mut trx = store.begin_write()?;
    let names: Vec<i32> = ["alpha", "beta", "gamma"]
        .iter()
        .map(|n| trx.create_name(n))
        .collect::<tessera::Result<_>>()?;
    trx.commit()?;
    assert_eq!(trx.create_name("beta")?, names[1]);
    let delta = trx.create_name("delta")?;
    trx.commit()?;
    trx.close()?;

    let first = store.begin_read(Some(1))?;
    assert_eq!(first.name(names[2])?.as_deref(), Some("gamma"));
    assert_eq!(first.name(delta)?, None);
    let second = store.begin_read(Some(2))?;
    assert_eq!(second.name(delta)?.as_deref(), Some("delta"));
    assert_eq!(second.name(names[0])?.as_deref(), Some("alpha"));
    Ok(())
}

#[test]
fn key_counter_and_bounds_follow_the_geometry() -> tessera::Result<()> {
    let dir = tempdir()?;
    let store = Store::create(options(dir.path(), Revisioning::Differential))?;
    let limit = 4u64.pow(4) * 4;
    let mut trx = store.begin_write()?;
    trx.set_record(Record::new(limit - 2, b"edge".to_vec()))?;
    assert_eq!(trx.increment_key_counter()?, RecordKey(limit - 1));
    assert!(matches!(
        trx.increment_key_counter(),
        Err(TesseraError::OutOfBounds { .. })
    ));
    assert!(matches!(
        trx.set_record(Record::new(limit, b"past".to_vec())),
        Err(TesseraError::OutOfBounds { .. })
    ));
    trx.commit()?;
    trx.close()?;
    let read = store.begin_read(None)?;
    assert_eq!(read.max_record_key()?, Some(RecordKey(limit - 1)));
    assert_eq!(read.revision_size()?, 1);
    Ok(())
}
