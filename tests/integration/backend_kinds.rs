#![allow(missing_docs)]

use tempfile::tempdir;
use tessera::{
    ByteHandling, Record, Revision, StorageKind, Store, StoreOptions, TesseraError,
};

const KEY: [u8; 32] = [0x42; 32];

fn options(path: std::path::PathBuf, kind: StorageKind, handling: ByteHandling) -> StoreOptions {
    let options = StoreOptions::new(path)
        .storage(kind)
        .byte_handling(handling)
        .fanout_exponent(3)
        .trie_levels(3)
        .bucket_exponent(3);
    if handling.needs_key() {
        options.encryption_key(KEY)
    } else {
        options
    }
}

#[test]
fn every_store_kind_and_pipeline_round_trips_revisions() -> tessera::Result<()> {
    let dir = tempdir()?;
    for kind in [StorageKind::File, StorageKind::Embedded, StorageKind::Object] {
        for handling in [
            ByteHandling::None,
            ByteHandling::Compress,
            ByteHandling::Encrypt,
            ByteHandling::Both,
        ] {
            let path = dir.path().join(format!("{kind:?}-{handling:?}"));
            {
                let store = Store::create(options(path.clone(), kind, handling))?;
                let mut trx = store.begin_write()?;
                for key in 0..100 {
                    trx.set_record(Record::new(key, vec![key as u8; 64]))?;
                }
                trx.set_meta("kind", &format!("{kind:?}"))?;
                trx.commit()?;
                assert!(trx.remove_record(10)?);
                trx.commit()?;
                trx.close()?;
                store.close()?;
            }

            let store = Store::open(options(path, kind, handling))?;
            assert_eq!(store.latest_revision(), Revision(2), "{kind:?}/{handling:?}");
            let first = store.begin_read(Some(1))?;
            let second = store.begin_read(Some(2))?;
            for key in 0..100u64 {
                assert_eq!(
                    first.get_record(key)?.map(|r| r.payload),
                    Some(vec![key as u8; 64])
                );
            }
            assert!(second.get_record(10)?.is_none());
            assert_eq!(second.revision_size()?, 99);
            assert_eq!(second.meta("kind")?, Some(format!("{kind:?}")));
        }
    }
    Ok(())
}

#[test]
fn reopening_with_a_different_layout_is_incompatible() -> tessera::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("store");
    Store::create(options(path.clone(), StorageKind::File, ByteHandling::None))?.close()?;

    let compressed = options(path.clone(), StorageKind::File, ByteHandling::Compress);
    assert!(matches!(
        Store::open(compressed),
        Err(TesseraError::Incompatible(_))
    ));
    let wider = options(path.clone(), StorageKind::File, ByteHandling::None).fanout_exponent(4);
    assert!(matches!(Store::open(wider), Err(TesseraError::Incompatible(_))));

    let same = options(path, StorageKind::File, ByteHandling::None).restore_window(9);
    assert!(Store::open(same).is_ok());
    Ok(())
}

#[test]
fn wrong_encryption_key_cannot_read_pages() -> tessera::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("store");
    {
        let store = Store::create(options(path.clone(), StorageKind::Object, ByteHandling::Both))?;
        let mut trx = store.begin_write()?;
        trx.set_record(Record::new(0, b"secret".to_vec()))?;
        trx.commit()?;
        trx.close()?;
        store.close()?;
    }
    let wrong = options(path, StorageKind::Object, ByteHandling::Both).encryption_key([7; 32]);
    let result = Store::open(wrong).and_then(|store| store.begin_read(None)?.get_record(0));
    assert!(result.is_err());
    Ok(())
}

#[test]
fn encryption_without_key_is_a_config_error() {
    let dir = tempdir().unwrap();
    let options = StoreOptions::new(dir.path().join("store")).byte_handling(ByteHandling::Encrypt);
    assert!(matches!(Store::create(options), Err(TesseraError::Config(_))));
}
