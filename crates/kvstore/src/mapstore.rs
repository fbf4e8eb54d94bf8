//! In-memory store for tests and ephemeral use.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::{BatchOp, Error, KvIterator, Result, SnapshotIterator, Store, StoreMetrics, WriteBatch};

/// A [`Store`] backed by a `BTreeMap`.
///
/// Iterators copy the whole matching range when they are created, which is
/// fine at test scale. Each batch is applied under a single write lock.
#[derive(Debug)]
pub struct MapStore {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    closed: AtomicBool,
    metrics: Arc<StoreMetrics>,
}

impl Default for MapStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MapStore {
    pub fn new() -> Self {
        Self::with_metrics(Arc::new(StoreMetrics::new()))
    }

    /// Creates an empty store that reports into `metrics`.
    pub fn with_metrics(metrics: Arc<StoreMetrics>) -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
            closed: AtomicBool::new(false),
            metrics,
        }
    }

    pub fn metrics(&self) -> &Arc<StoreMetrics> {
        &self.metrics
    }

    /// Number of keys currently stored, markers and metadata included.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }
}

impl Store for MapStore {
    fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.check_open()?;
        self.metrics.record_get();
        self.data.read().get(key).cloned().ok_or(Error::NotFound)
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        self.check_open()?;
        let (mut puts, mut deletes, mut bytes) = (0u64, 0u64, 0u64);
        let mut data = self.data.write();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { key, value } => {
                    puts += 1;
                    bytes += (key.len() + value.len()) as u64;
                    data.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    deletes += 1;
                    data.remove(&key);
                }
            }
        }
        drop(data);
        self.metrics.record_batch(puts, deletes, bytes);
        Ok(())
    }

    fn new_iterator(&self, prefix: &[u8]) -> Result<Box<dyn KvIterator>> {
        self.check_open()?;
        self.metrics.record_iterator();
        let snapshot = SnapshotIterator::from_prefix(&self.data.read(), prefix);
        Ok(Box::new(snapshot))
    }

    fn shutdown(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn destroy(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        self.data.write().clear();
        Ok(())
    }
}
