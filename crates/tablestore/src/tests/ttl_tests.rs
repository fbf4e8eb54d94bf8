use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use anyhow::Result;
use config::Config;
use kvstore::{Batch, MapStore, Store};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::helpers::{expiry_prefix, open_map, pair, scan};
use crate::expiry::{deadline, expiry_key, from_unix_nanos, parse_expiry_key, unix_nanos};
use crate::*;

fn t0() -> SystemTime {
    from_unix_nanos(1_700_000_000_000_000_000)
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

// --------------------- Marker encoding ---------------------

#[test]
fn markers_sort_by_deadline() {
    let times = [0u64, 1, 255, 256, 1 << 40, u64::MAX - 1, u64::MAX];
    let mut markers: Vec<Vec<u8>> = times
        .iter()
        .rev()
        .map(|&n| expiry_key(b"e", from_unix_nanos(n), b"key"))
        .collect();
    markers.sort();
    let decoded: Vec<u64> = markers
        .iter()
        .map(|m| unix_nanos(parse_expiry_key(b"e", m).unwrap().0))
        .collect();
    assert_eq!(decoded, times.to_vec());
}

#[test]
fn marker_round_trips_target_key() -> Result<()> {
    let when = t0() + Duration::from_nanos(42);
    let marker = expiry_key(b"pre/", when, b"\x00\x00\x00\x01k");
    let (parsed, target) = parse_expiry_key(b"pre/", &marker)?;
    assert_eq!(parsed, when);
    assert_eq!(target, b"\x00\x00\x00\x01k");
    Ok(())
}

#[test]
fn malformed_marker_is_corruption() {
    assert!(parse_expiry_key(b"e", b"e\x00\x01").is_err());
    assert!(parse_expiry_key(b"e", b"x\x00\x00\x00\x00\x00\x00\x00\x00k").is_err());
}

#[test]
fn deadline_saturates_at_largest_time() {
    assert_eq!(unix_nanos(deadline(t0(), Duration::MAX)), u64::MAX);
    assert_eq!(deadline(t0(), Duration::from_secs(1)), t0() + Duration::from_secs(1));
    assert_eq!(unix_nanos(SystemTime::UNIX_EPOCH - Duration::from_secs(1)), 0);
}

// --------------------- Table store TTL ---------------------

#[test]
fn expired_key_disappears_after_sweep() -> Result<()> {
    let (_base, store) = open_map(&["t"])?;
    let t = store.get_table("t")?;

    t.put_with_expiration(b"k", b"v", t0() + Duration::from_secs(1))?;
    assert_eq!(t.get(b"k")?, b"v".to_vec());

    assert_eq!(store.expire_keys(t0() + Duration::from_secs(2), 16)?, 1);
    assert!(t.get(b"k").unwrap_err().is_not_found());
    Ok(())
}

#[test]
fn sweep_leaves_future_keys_and_their_markers() -> Result<()> {
    let (base, store) = open_map(&["t"])?;
    let t = store.get_table("t")?;
    t.put_with_expiration(b"soon", b"1", t0() + Duration::from_secs(1))?;
    t.put_with_expiration(b"late", b"2", t0() + Duration::from_secs(10))?;

    assert_eq!(store.expire_keys(t0() + Duration::from_secs(5), 16)?, 1);
    assert!(t.get(b"soon").unwrap_err().is_not_found());
    assert_eq!(t.get(b"late")?, b"2".to_vec());
    assert_eq!(scan(base.as_ref(), &expiry_prefix())?.len(), 1);

    // A second sweep at the same instant finds nothing.
    assert_eq!(store.expire_keys(t0() + Duration::from_secs(5), 16)?, 0);
    Ok(())
}

#[test]
fn deadline_equal_to_now_is_expired() -> Result<()> {
    let (_base, store) = open_map(&["t"])?;
    let t = store.get_table("t")?;
    t.put_with_expiration(b"k", b"v", t0())?;
    assert_eq!(store.expire_keys(t0(), 16)?, 1);
    Ok(())
}

#[test]
fn random_deadlines_expire_exactly_the_due_keys() -> Result<()> {
    let (base, store) = open_map(&["t"])?;
    let t = store.get_table("t")?;
    let mut rng = StdRng::seed_from_u64(7);

    let mut deadlines = Vec::new();
    for i in 0..1000u32 {
        let when = t0() + Duration::from_millis(rng.gen_range(0..1_000_000));
        t.put_with_expiration(&i.to_be_bytes(), format!("value-{i}").as_bytes(), when)?;
        deadlines.push(when);
    }

    let now = t0() + Duration::from_secs(500);
    let due = deadlines.iter().filter(|&&w| w <= now).count();
    // A small batch size forces many intermediate flushes.
    assert_eq!(store.expire_keys(now, 7)?, due);

    for (i, when) in deadlines.iter().enumerate() {
        let got = t.get(&(i as u32).to_be_bytes());
        if *when <= now {
            assert!(got.unwrap_err().is_not_found(), "key {i} should be gone");
        } else {
            assert_eq!(got?, format!("value-{i}").into_bytes(), "key {i} should remain");
        }
    }
    assert_eq!(scan(base.as_ref(), &expiry_prefix())?.len(), 1000 - due);
    Ok(())
}

#[test]
fn overwrite_keeps_the_old_marker() -> Result<()> {
    let (_base, store) = open_map(&["t"])?;
    let t = store.get_table("t")?;
    t.put_with_expiration(b"k", b"old", t0())?;
    t.put(b"k", b"new")?;

    store.expire_keys(t0() + Duration::from_secs(1), 16)?;
    assert!(t.get(b"k").unwrap_err().is_not_found());
    Ok(())
}

#[test]
fn ttl_batch_spans_tables_atomically() -> Result<()> {
    let (_base, store) = open_map(&["a", "b", "c"])?;
    let a = store.get_key_builder("a")?;
    let b = store.get_key_builder("b")?;
    let c = store.get_key_builder("c")?;

    let mut batch = store.new_ttl_batch();
    batch.put_with_expiration(&a.key(b"x"), b"1", t0());
    batch.put_with_expiration(&b.key(b"y"), b"2", t0() + Duration::from_secs(60));
    batch.put(&c.key(b"z"), b"3");
    assert_eq!(batch.size(), 5);
    batch.apply()?;

    assert_eq!(store.expire_keys(t0() + Duration::from_secs(1), 16)?, 1);
    assert!(store.get(&a.key(b"x")).unwrap_err().is_not_found());
    assert_eq!(store.get(&b.key(b"y"))?, b"2".to_vec());
    assert_eq!(store.get(&c.key(b"z"))?, b"3".to_vec());
    Ok(())
}

#[test]
fn store_level_ttl_put_uses_key_table() -> Result<()> {
    let (_base, store) = open_map(&["a"])?;
    let key = store.get_key_builder("a")?.string_key("session");
    store.put_with_expiration(&key, b"token", t0())?;
    store.put_with_ttl(&store.get_key_builder("a")?.string_key("keep"), b"v", Duration::from_secs(3600))?;

    assert_eq!(store.get_table("a")?.get(b"session")?, b"token".to_vec());
    assert_eq!(store.expire_keys(t0(), 16)?, 1);
    assert!(store.get(&key).unwrap_err().is_not_found());
    assert_eq!(store.get_table("a")?.get(b"keep")?, b"v".to_vec());
    Ok(())
}

#[test]
fn table_ttl_batch_commits_value_and_marker_together() -> Result<()> {
    let (base, store) = open_map(&["t"])?;
    let t = store.get_table("t")?;

    let mut batch = t.new_ttl_batch();
    batch.put_with_expiration(b"k1", b"v1", t0());
    batch.put_with_ttl(b"k2", b"v2", Duration::from_secs(3600));
    batch.delete(b"missing");
    batch.apply()?;

    assert_eq!(scan(&t, b"")?, vec![pair("k1", "v1"), pair("k2", "v2")]);
    assert_eq!(scan(base.as_ref(), &expiry_prefix())?.len(), 2);
    Ok(())
}

#[test]
fn table_store_background_sweep_expires_keys() -> Result<()> {
    let config = Config {
        gc_period: Duration::from_millis(10),
        ..Config::default_map()
    };
    let store = TableStore::start(&config, &["t"])?;
    assert!(store.is_sweeping());
    let t = store.get_table("t")?;
    t.put_with_expiration(b"k", b"v", SystemTime::now())?;

    assert!(wait_until(Duration::from_secs(5), || t.get(b"k").is_err()));
    assert!(t.get(b"k").unwrap_err().is_not_found());
    store.shutdown()?;
    Ok(())
}

// --------------------- TtlStore ---------------------

#[test]
fn ttl_store_hides_markers_from_reads() -> Result<()> {
    let base: Arc<dyn Store> = Arc::new(MapStore::new());
    let ttl = TtlStore::new(Arc::clone(&base), Duration::ZERO, 8)?;
    assert!(!ttl.is_sweeping());

    ttl.put(b"plain", b"1")?;
    ttl.put_with_expiration(b"temp", b"2", t0())?;
    assert_eq!(scan(&ttl, b"")?, vec![pair("plain", "1"), pair("temp", "2")]);
    assert_eq!(scan(base.as_ref(), TTL_EXPIRY_PREFIX)?.len(), 1);

    assert_eq!(ttl.expire_keys(t0(), ttl.gc_batch_size())?, 1);
    assert_eq!(scan(&ttl, b"")?, vec![pair("plain", "1")]);
    assert!(scan(base.as_ref(), TTL_EXPIRY_PREFIX)?.is_empty());
    Ok(())
}

#[test]
fn ttl_store_batches_mix_plain_and_ttl_writes() -> Result<()> {
    let ttl = TtlStore::new(Arc::new(MapStore::new()), Duration::ZERO, 8)?;
    let mut batch = ttl.new_ttl_batch();
    batch.put(b"a", b"1");
    batch.put_with_expiration(b"b", b"2", t0());
    batch.apply()?;

    let mut plain = ttl.new_batch();
    plain.delete(b"a");
    plain.apply()?;

    assert_eq!(ttl.expire_keys(t0(), 8)?, 1);
    assert!(scan(&ttl, b"")?.is_empty());
    Ok(())
}

#[test]
fn ttl_store_over_table_stays_inside_the_table() -> Result<()> {
    let (base, mut store) = open_map(&["cache", "other"])?;
    let cache = store.get_table("cache")?;
    let ttl = TtlStore::new(Arc::new(cache.clone()), Duration::ZERO, 8)?;

    ttl.put_with_expiration(b"k", b"v", t0())?;
    assert_eq!(ttl.get(b"k")?, b"v".to_vec());
    assert!(scan(base.as_ref(), &table_prefix(store.get_table("other")?.id()))?.is_empty());
    assert!(scan(base.as_ref(), &expiry_prefix())?.is_empty());
    assert_eq!(scan(&cache, b"")?.len(), 2);

    assert_eq!(ttl.expire_keys(t0(), 8)?, 1);
    assert!(scan(&cache, b"")?.is_empty());

    ttl.put(b"again", b"v")?;
    store.drop_table("cache")?;
    assert!(ttl.get(b"again").unwrap_err().is_table_not_found());
    Ok(())
}

#[test]
fn ttl_store_sweeper_runs_until_shutdown() -> Result<()> {
    let base: Arc<dyn Store> = Arc::new(MapStore::new());
    let ttl = TtlStore::new(Arc::clone(&base), Duration::from_millis(10), 8)?;
    assert!(ttl.is_sweeping());

    ttl.put_with_expiration(b"k", b"v", SystemTime::now())?;
    assert!(wait_until(Duration::from_secs(5), || ttl.get(b"k").is_err()));

    ttl.shutdown()?;
    assert!(!ttl.is_sweeping());
    assert!(base.get(b"anything").is_err());
    Ok(())
}
