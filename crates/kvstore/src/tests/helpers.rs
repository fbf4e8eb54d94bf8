use std::path::Path;
use std::sync::Arc;

use crate::*;

pub fn open_disk(dir: &Path) -> Result<DiskStore> {
    DiskStore::open(dir, DiskStoreOptions::default(), Arc::new(StoreMetrics::new()))
}

pub fn open_disk_with(dir: &Path, compaction_threshold: u64) -> Result<DiskStore> {
    let options = DiskStoreOptions {
        wal_sync: false,
        compaction_threshold,
    };
    DiskStore::open(dir, options, Arc::new(StoreMetrics::new()))
}

pub fn scan(store: &dyn Store, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    collect_entries(store.new_iterator(prefix)?)
}

pub fn pair(k: &str, v: &str) -> (Vec<u8>, Vec<u8>) {
    (k.as_bytes().to_vec(), v.as_bytes().to_vec())
}
