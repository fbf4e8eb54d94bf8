use std::sync::Arc;
use std::thread;

use anyhow::Result;
use tempfile::tempdir;

use super::helpers::{open_disk, pair, scan};
use crate::*;

// Every contract check runs against both implementations.
fn with_each_store(check: impl Fn(Arc<dyn Store>) -> Result<()>) -> Result<()> {
    check(Arc::new(MapStore::new()))?;
    let dir = tempdir()?;
    check(Arc::new(open_disk(dir.path())?))?;
    Ok(())
}

// --------------------- Point operations ---------------------

#[test]
fn put_then_get_returns_value() -> Result<()> {
    with_each_store(|store| {
        store.put(b"k", b"v")?;
        assert_eq!(store.get(b"k")?, b"v".to_vec());
        store.put(b"k", b"v2")?;
        assert_eq!(store.get(b"k")?, b"v2".to_vec());
        Ok(())
    })
}

#[test]
fn empty_value_round_trips_as_empty() -> Result<()> {
    with_each_store(|store| {
        store.put(b"k", b"")?;
        assert_eq!(store.get(b"k")?, Vec::<u8>::new());
        Ok(())
    })
}

#[test]
fn get_missing_is_not_found() -> Result<()> {
    with_each_store(|store| {
        let err = store.get(b"nope").unwrap_err();
        assert!(err.is_not_found());
        assert!(matches!(err, Error::NotFound));
        Ok(())
    })
}

#[test]
fn delete_absent_key_is_ok() -> Result<()> {
    with_each_store(|store| {
        store.delete(b"ghost")?;
        store.put(b"k", b"v")?;
        store.delete(b"k")?;
        assert!(store.get(b"k").unwrap_err().is_not_found());
        Ok(())
    })
}

#[test]
fn returned_value_is_an_owned_copy() -> Result<()> {
    with_each_store(|store| {
        store.put(b"k", b"abc")?;
        let mut v = store.get(b"k")?;
        v[0] = b'z';
        assert_eq!(store.get(b"k")?, b"abc".to_vec());
        Ok(())
    })
}

// --------------------- Batches ---------------------

#[test]
fn write_batch_pairs_keys_and_values() -> Result<()> {
    with_each_store(|store| {
        let keys = vec![b"a".to_vec(), b"b".to_vec()];
        let values = vec![b"1".to_vec(), b"2".to_vec()];
        store.write_batch(&keys, &values)?;
        assert_eq!(scan(store.as_ref(), b"")?, vec![pair("a", "1"), pair("b", "2")]);

        store.delete_batch(&keys)?;
        assert!(scan(store.as_ref(), b"")?.is_empty());
        Ok(())
    })
}

#[test]
fn write_batch_length_mismatch_is_rejected() -> Result<()> {
    with_each_store(|store| {
        let err = store
            .write_batch(&[b"a".to_vec()], &[])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(store.get(b"a").unwrap_err().is_not_found());
        Ok(())
    })
}

#[test]
fn store_batch_applies_in_order() -> Result<()> {
    with_each_store(|store| {
        let mut batch = store.new_batch();
        batch.put(b"a", b"1");
        batch.put(b"b", b"2");
        batch.delete(b"a");
        batch.put(b"c", b"3");
        assert_eq!(batch.size(), 4);
        batch.apply()?;
        assert_eq!(scan(store.as_ref(), b"")?, vec![pair("b", "2"), pair("c", "3")]);
        Ok(())
    })
}

#[test]
fn readers_never_see_a_partial_batch() -> Result<()> {
    with_each_store(|store| {
        store.write_batch(&[b"x".to_vec(), b"y".to_vec()], &[b"0".to_vec(), b"0".to_vec()])?;

        let writer = {
            let store = Arc::clone(&store);
            thread::spawn(move || -> Result<()> {
                for i in 1..300u32 {
                    let v = i.to_string().into_bytes();
                    let mut batch = store.new_batch();
                    batch.put(b"x", &v);
                    batch.put(b"y", &v);
                    batch.apply()?;
                }
                Ok(())
            })
        };

        for _ in 0..300 {
            let entries = scan(store.as_ref(), b"")?;
            assert_eq!(entries.len(), 2);
            assert_eq!(entries[0].1, entries[1].1, "observed a torn batch");
        }
        writer.join().expect("writer thread panicked")?;
        Ok(())
    })
}

// --------------------- Iteration ---------------------

#[test]
fn iterator_is_bounded_by_prefix() -> Result<()> {
    with_each_store(|store| {
        for k in ["a", "ab", "abc", "b", "aa"] {
            store.put(k.as_bytes(), b"v")?;
        }
        let keys: Vec<_> = scan(store.as_ref(), b"ab")?.into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"ab".to_vec(), b"abc".to_vec()]);
        Ok(())
    })
}

#[test]
fn iterator_sees_snapshot_at_creation() -> Result<()> {
    with_each_store(|store| {
        store.put(b"a", b"1")?;
        let mut it = store.new_iterator(b"")?;
        store.put(b"b", b"2")?;
        store.delete(b"a")?;

        assert!(it.next());
        assert_eq!(it.key(), Some(&b"a"[..]));
        assert!(!it.next());
        Ok(())
    })
}

// --------------------- Lifecycle ---------------------

#[test]
fn closed_store_rejects_every_call() -> Result<()> {
    with_each_store(|store| {
        store.put(b"k", b"v")?;
        store.shutdown()?;
        assert!(matches!(store.get(b"k"), Err(Error::Closed)));
        assert!(matches!(store.put(b"k", b"v"), Err(Error::Closed)));
        assert!(matches!(store.delete(b"k"), Err(Error::Closed)));
        assert!(matches!(store.new_iterator(b""), Err(Error::Closed)));
        // a second shutdown is harmless
        store.shutdown()?;
        Ok(())
    })
}

#[test]
fn destroy_erases_data() -> Result<()> {
    let store = MapStore::new();
    store.put(b"k", b"v")?;
    store.destroy()?;
    assert!(store.is_empty());
    assert!(matches!(store.get(b"k"), Err(Error::Closed)));
    Ok(())
}

#[test]
fn metrics_count_operations_per_instance() -> Result<()> {
    let first = Arc::new(StoreMetrics::new());
    let second = Arc::new(StoreMetrics::new());
    let a = MapStore::with_metrics(Arc::clone(&first));
    let b = MapStore::with_metrics(Arc::clone(&second));

    a.put(b"k", b"vv")?;
    a.delete(b"k")?;
    let _ = a.get(b"k");
    let _ = a.new_iterator(b"")?;

    let snap = first.snapshot();
    assert_eq!(snap.puts, 1);
    assert_eq!(snap.deletes, 1);
    assert_eq!(snap.batches, 2);
    assert_eq!(snap.gets, 1);
    assert_eq!(snap.iterators, 1);
    assert_eq!(snap.bytes_written, 3);
    assert_eq!(second.snapshot(), StoreMetricsSnapshot::default());
    drop(b);
    Ok(())
}
