use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use kvstore::{collect_entries, Error, KvIterator, MapStore, Result, Store, WriteBatch};

use crate::*;

const UNARMED: usize = usize::MAX;

/// Passes everything through to `inner` until armed, then lets a fixed
/// number of writes succeed and fails every write after that.
pub struct FaultyStore {
    inner: Arc<dyn Store>,
    writes_left: AtomicUsize,
}

impl FaultyStore {
    pub fn new(inner: Arc<dyn Store>) -> Self {
        Self {
            inner,
            writes_left: AtomicUsize::new(UNARMED),
        }
    }

    pub fn fail_after(&self, writes: usize) {
        self.writes_left.store(writes, Ordering::SeqCst);
    }
}

impl Store for FaultyStore {
    fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.inner.get(key)
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        let left = self.writes_left.load(Ordering::SeqCst);
        if left == 0 {
            return Err(Error::Io(io::Error::new(io::ErrorKind::Other, "injected write failure")));
        }
        if left != UNARMED {
            self.writes_left.store(left - 1, Ordering::SeqCst);
        }
        self.inner.write(batch)
    }

    fn new_iterator(&self, prefix: &[u8]) -> Result<Box<dyn KvIterator>> {
        self.inner.new_iterator(prefix)
    }

    fn shutdown(&self) -> Result<()> {
        self.inner.shutdown()
    }

    fn destroy(&self) -> Result<()> {
        self.inner.destroy()
    }
}

/// Options with the background sweep off, so tests drive expiry by hand.
pub fn manual_options(gc_batch_size: u32) -> Options {
    Options {
        gc_period: Duration::ZERO,
        gc_batch_size,
        max_tables: MAX_USER_TABLE_COUNT,
    }
}

pub fn open_map(tables: &[&str]) -> Result<(Arc<dyn Store>, TableStore)> {
    let base: Arc<dyn Store> = Arc::new(MapStore::new());
    let store = TableStore::open_with(Arc::clone(&base), manual_options(1024), Some(tables))?;
    Ok((base, store))
}

pub fn scan(store: &dyn Store, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    collect_entries(store.new_iterator(prefix)?)
}

/// Physical prefix of every expiry marker in a table store.
pub fn expiry_prefix() -> Vec<u8> {
    [&table_prefix(METADATA_TABLE_ID)[..], EXPIRY_LOCAL_PREFIX].concat()
}

pub fn pair(k: &str, v: &str) -> (Vec<u8>, Vec<u8>) {
    (k.as_bytes().to_vec(), v.as_bytes().to_vec())
}
