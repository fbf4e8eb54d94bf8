use std::sync::Arc;
use std::thread;

use anyhow::Result;
use kvstore::Batch;

use super::helpers::{open_map, pair, scan};

#[test]
fn cross_table_batch_applies_all_writes() -> Result<()> {
    let (_base, store) = open_map(&["a", "b"])?;
    let a = store.get_key_builder("a")?;
    let b = store.get_key_builder("b")?;
    store.put(&b.key(b"gone"), b"x")?;

    let mut batch = store.new_batch();
    batch.put(&a.key(b"k"), b"1");
    batch.put(&b.key(b"k"), b"2");
    batch.delete(&b.key(b"gone"));
    assert_eq!(batch.size(), 3);
    batch.apply()?;

    assert_eq!(store.get(&a.key(b"k"))?, b"1".to_vec());
    assert_eq!(store.get(&b.key(b"k"))?, b"2".to_vec());
    assert!(store.get(&b.key(b"gone")).unwrap_err().is_not_found());
    Ok(())
}

#[test]
fn batch_touching_dropped_table_writes_nothing() -> Result<()> {
    let (_base, mut store) = open_map(&["a", "b"])?;
    let a = store.get_key_builder("a")?;
    let b = store.get_key_builder("b")?;

    let mut batch = store.new_batch();
    batch.put(&a.key(b"k"), b"1");
    batch.put(&b.key(b"k"), b"2");
    store.drop_table("a")?;

    assert!(batch.apply().unwrap_err().is_table_not_found());
    assert!(store.get(&b.key(b"k")).unwrap_err().is_not_found());
    Ok(())
}

#[test]
fn table_batch_is_scoped_to_its_table() -> Result<()> {
    let (_base, store) = open_map(&["a", "b"])?;
    let a = store.get_table("a")?;
    let b = store.get_table("b")?;

    let mut batch = a.new_batch();
    batch.put(b"x", b"1");
    batch.put(b"y", b"2");
    batch.delete(b"x");
    batch.apply()?;

    assert_eq!(scan(&a, b"")?, vec![pair("y", "2")]);
    assert!(scan(&b, b"")?.is_empty());
    Ok(())
}

#[test]
fn table_batch_of_dropped_table_fails() -> Result<()> {
    let (_base, mut store) = open_map(&["a"])?;
    let mut batch = store.get_table("a")?.new_batch();
    batch.put(b"k", b"v");
    store.drop_table("a")?;
    assert!(batch.apply().unwrap_err().is_table_not_found());
    Ok(())
}

#[test]
fn concurrent_batches_are_all_or_nothing() -> Result<()> {
    let (_base, store) = open_map(&["a", "b"])?;
    let a = store.get_table("a")?;
    let b = store.get_table("b")?;
    let store = Arc::new(store);

    let writers: Vec<_> = (0..4u8)
        .map(|w| {
            let store = Arc::clone(&store);
            thread::spawn(move || -> kvstore::Result<()> {
                let a = store.get_key_builder("a")?;
                let b = store.get_key_builder("b")?;
                for i in 0..50u8 {
                    let mut batch = store.new_batch();
                    batch.put(&a.key(&[w, i]), &[i]);
                    batch.put(&b.key(&[w, i]), &[i]);
                    batch.apply()?;
                }
                Ok(())
            })
        })
        .collect();

    // Every snapshot of `b` is at most as far along as the later one of `a`.
    for _ in 0..20 {
        let seen_b = scan(&b, b"")?.len();
        let seen_a = scan(&a, b"")?.len();
        assert!(seen_b <= seen_a);
    }
    for w in writers {
        w.join().expect("writer panicked")?;
    }
    assert_eq!(scan(&a, b"")?.len(), 200);
    assert_eq!(scan(&b, b"")?, scan(&a, b"")?);
    Ok(())
}
