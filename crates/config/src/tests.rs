use super::*;
use std::collections::HashMap;

fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn defaults_are_disk_backed() {
    let c = Config::default();
    assert_eq!(c.store_type, StoreType::Disk);
    assert_eq!(c.path, PathBuf::from(DEFAULT_PATH));
    assert!(c.wal_sync);
    assert_eq!(c.compaction_threshold, 4 * 1024 * 1024);
    assert_eq!(c.gc_period, Duration::from_secs(5));
    assert_eq!(c.gc_batch_size, 1024);
    assert_eq!(c.max_tables, u32::MAX - 2);
}

#[test]
fn default_map_keeps_other_defaults() {
    let c = Config::default_map();
    assert_eq!(c.store_type, StoreType::Map);
    assert_eq!(c.gc_batch_size, DEFAULT_GC_BATCH_SIZE);
    assert_eq!(c.max_tables, MAX_TABLE_COUNT);
}

#[test]
fn empty_environment_gives_defaults() {
    assert_eq!(Config::from_lookup(|_| None), Config::default());
}

#[test]
fn environment_overrides() {
    let c = Config::from_lookup(lookup_from(&[
        ("TABLESTORE_TYPE", "MAP"),
        ("TABLESTORE_PATH", "/tmp/ts"),
        ("TABLESTORE_WAL_SYNC", "false"),
        ("TABLESTORE_COMPACT_KB", "8"),
        ("TABLESTORE_GC_PERIOD_MS", "0"),
        ("TABLESTORE_GC_BATCH", "10"),
    ]));
    assert_eq!(c.store_type, StoreType::Map);
    assert_eq!(c.path, PathBuf::from("/tmp/ts"));
    assert!(!c.wal_sync);
    assert_eq!(c.compaction_threshold, 8 * 1024);
    assert_eq!(c.gc_period, Duration::ZERO);
    assert_eq!(c.gc_batch_size, 10);
}

#[test]
fn unparseable_values_fall_back() {
    let c = Config::from_lookup(lookup_from(&[
        ("TABLESTORE_TYPE", "rocks"),
        ("TABLESTORE_WAL_SYNC", "maybe"),
        ("TABLESTORE_GC_PERIOD_MS", "soon"),
        ("TABLESTORE_GC_BATCH", "0"),
    ]));
    assert_eq!(c.store_type, StoreType::Disk);
    assert!(c.wal_sync);
    assert_eq!(c.gc_period, DEFAULT_GC_PERIOD);
    assert_eq!(c.gc_batch_size, DEFAULT_GC_BATCH_SIZE);
}

#[test]
fn store_type_parsing() {
    assert_eq!("disk".parse::<StoreType>(), Ok(StoreType::Disk));
    assert_eq!(" Memory ".parse::<StoreType>(), Ok(StoreType::Map));
    assert!("".parse::<StoreType>().is_err());
}

#[test]
fn without_gc_zeroes_period() {
    assert_eq!(Config::default_map().without_gc().gc_period, Duration::ZERO);
}
