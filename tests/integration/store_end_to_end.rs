#![allow(missing_docs)]

use tempfile::tempdir;
use tessera::{Record, Revision, Revisioning, Store, StoreOptions, TesseraError};

fn payload(key: u64, generation: u32) -> Vec<u8> {
    format!("record-{key}-gen-{generation}").into_bytes()
}

#[test]
fn committed_revisions_survive_reopen() -> tessera::Result<()> {
    let dir = tempdir()?;
    let options = StoreOptions::new(dir.path().join("store"));

    let store = Store::create(options.clone())?;
    let mut trx = store.begin_write()?;
    for key in 0..300 {
        trx.set_record(Record::new(key, payload(key, 1)))?;
    }
    assert_eq!(trx.commit()?, Revision(1));
    for key in (0..300).step_by(6) {
        trx.set_record(Record::new(key, payload(key, 2)))?;
    }
    assert_eq!(trx.commit()?, Revision(2));
    trx.close()?;

    let check = |store: &Store| -> tessera::Result<()> {
        assert_eq!(store.latest_revision(), Revision(2));
        let first = store.begin_read(Some(1))?;
        let second = store.begin_read(Some(2))?;
        for key in 0..300 {
            let old = first.get_record(key)?.expect("written in revision 1");
            assert_eq!(old.payload, payload(key, 1));
            let generation = if key % 6 == 0 { 2 } else { 1 };
            let new = second.get_record(key)?.expect("still live in revision 2");
            assert_eq!(new.payload, payload(key, generation), "key {key}");
        }
        assert!(second.get_record(300)?.is_none());
        assert_eq!(first.revision_size()?, 300);
        assert_eq!(second.revision_size()?, 300);
        assert_eq!(second.max_record_key()?.map(|k| k.0), Some(299));
        assert!(second.timestamp_ms()? >= first.timestamp_ms()?);
        Ok(())
    };

    check(&store)?;
    store.close()?;

    let reopened = Store::open(options)?;
    check(&reopened)?;
    assert!(matches!(
        reopened.begin_read(Some(3)),
        Err(TesseraError::RevisionNotFound {
            requested: 3,
            latest: Some(2)
        })
    ));
    Ok(())
}

#[test]
fn writer_continues_after_reopen() -> tessera::Result<()> {
    let dir = tempdir()?;
    let options = StoreOptions::new(dir.path().join("store"))
        .revisioning(Revisioning::Incremental)
        .restore_window(2);

    {
        let store = Store::create(options.clone())?;
        let mut trx = store.begin_write()?;
        trx.set_record(Record::new(1, b"one".to_vec()))?;
        trx.commit()?;
        trx.close()?;
        store.close()?;
    }

    let store = Store::open(options)?;
    let mut trx = store.begin_write()?;
    assert_eq!(trx.revision(), Revision(2));
    assert_eq!(trx.get_record(1)?.map(|r| r.payload), Some(b"one".to_vec()));
    for generation in 0..5u8 {
        trx.set_record(Record::new(2, vec![generation]))?;
        trx.commit()?;
    }
    trx.close()?;

    let latest = store.begin_read(None)?;
    assert_eq!(latest.revision(), Revision(6));
    assert_eq!(latest.get_record(1)?.map(|r| r.payload), Some(b"one".to_vec()));
    assert_eq!(latest.get_record(2)?.map(|r| r.payload), Some(vec![4]));
    for revision in 2..=6u64 {
        let read = store.begin_read(Some(revision))?;
        let expected = (revision - 2) as u8;
        assert_eq!(
            read.get_record(2)?.map(|r| r.payload),
            Some(vec![expected])
        );
    }
    Ok(())
}

#[test]
fn closed_read_transaction_rejects_calls() -> tessera::Result<()> {
    let dir = tempdir()?;
    let store = Store::create(StoreOptions::new(dir.path().join("store")))?;
    let mut read = store.begin_read(None)?;
    read.close();
    assert!(matches!(read.get_record(0), Err(TesseraError::Invalid(_))));
    assert!(matches!(read.revision_size(), Err(TesseraError::Invalid(_))));
    Ok(())
}

#[test]
fn store_refuses_close_while_writing() -> tessera::Result<()> {
    let dir = tempdir()?;
    let store = Store::create(StoreOptions::new(dir.path().join("store")))?;
    let mut trx = store.begin_write()?;
    assert!(matches!(
        store.clone().close(),
        Err(TesseraError::Invalid(_))
    ));
    trx.close()?;
    store.close()
}
