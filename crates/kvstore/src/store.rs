//! The base store contract and its batch types.

use std::fmt;
use std::sync::Arc;

use crate::{KvIterator, Result};

/// An ordered, byte-keyed store.
///
/// Keys sort lexicographically by their raw bytes. Values may be empty; an
/// empty slice is the only "nil" a caller can express, and it round-trips as
/// an empty `Vec`.
///
/// `shutdown` and `destroy` must not race with other calls or with open
/// iterators; every other method is safe to call from many threads.
pub trait Store: Send + Sync {
    /// Stores `value` under `key`, replacing any previous value.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put(key, value);
        self.write(batch)
    }

    /// Returns a copy of the value under `key`, or [`Error::NotFound`].
    ///
    /// [`Error::NotFound`]: crate::Error::NotFound
    fn get(&self, key: &[u8]) -> Result<Vec<u8>>;

    /// Removes `key`. Removing an absent key is not an error.
    fn delete(&self, key: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete(key);
        self.write(batch)
    }

    /// Removes every key in `keys` in one atomic write.
    fn delete_batch(&self, keys: &[Vec<u8>]) -> Result<()> {
        let mut batch = WriteBatch::new();
        for key in keys {
            batch.delete(key);
        }
        self.write(batch)
    }

    /// Stores `values[i]` under `keys[i]` for every `i`, atomically.
    fn write_batch(&self, keys: &[Vec<u8>], values: &[Vec<u8>]) -> Result<()> {
        if keys.len() != values.len() {
            return Err(crate::Error::InvalidArgument(format!(
                "write_batch got {} keys and {} values",
                keys.len(),
                values.len()
            )));
        }
        let mut batch = WriteBatch::new();
        for (key, value) in keys.iter().zip(values) {
            batch.put(key, value);
        }
        self.write(batch)
    }

    /// Applies every operation in `batch` as one atomic unit.
    ///
    /// A concurrent reader sees either none of the batch or all of it.
    fn write(&self, batch: WriteBatch) -> Result<()>;

    /// Opens an iterator over every key starting with `prefix`.
    ///
    /// The iterator observes a snapshot taken when it is created. It is
    /// released when dropped.
    fn new_iterator(&self, prefix: &[u8]) -> Result<Box<dyn KvIterator>>;

    /// Stops the store, keeping its data. Later calls fail with `Closed`.
    fn shutdown(&self) -> Result<()>;

    /// Stops the store and permanently erases its data.
    fn destroy(&self) -> Result<()>;
}

/// Batch constructor for shared store handles.
pub trait StoreExt {
    /// Returns an empty batch that applies to this store.
    fn new_batch(&self) -> StoreBatch;
}

impl StoreExt for Arc<dyn Store> {
    fn new_batch(&self) -> StoreBatch {
        StoreBatch::new(Arc::clone(self))
    }
}

/// A buffered set of operations that is applied as a unit.
///
/// A batch is filled, applied once, and gone: [`Batch::apply`] consumes it.
/// One batch is not meant to be filled from several threads at once, but
/// distinct batches may be built and applied concurrently.
pub trait Batch {
    /// How callers address keys in this batch.
    type Key: ?Sized;

    /// Buffers a write of `value` under `key`.
    fn put(&mut self, key: &Self::Key, value: &[u8]);

    /// Buffers a delete of `key`.
    fn delete(&mut self, key: &Self::Key);

    /// Commits every buffered operation in one atomic write.
    fn apply(self) -> Result<()>;

    /// Number of buffered operations.
    fn size(&self) -> u32;
}

/// A single buffered mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Store `value` under `key`.
    Put { key: Vec<u8>, value: Vec<u8> },
    /// Remove `key`.
    Delete { key: Vec<u8> },
}

impl BatchOp {
    /// The key this operation touches.
    pub fn key(&self) -> &[u8] {
        match self {
            BatchOp::Put { key, .. } | BatchOp::Delete { key } => key,
        }
    }
}

/// The plain list of operations handed to [`Store::write`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.ops.push(BatchOp::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        });
    }

    pub fn delete(&mut self, key: &[u8]) {
        self.ops.push(BatchOp::Delete { key: key.to_vec() });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }

    /// Rewrites every key with `f`, keeping operation order.
    pub fn map_keys<F: FnMut(&[u8]) -> Vec<u8>>(self, mut f: F) -> WriteBatch {
        let ops = self
            .ops
            .into_iter()
            .map(|op| match op {
                BatchOp::Put { key, value } => BatchOp::Put { key: f(&key), value },
                BatchOp::Delete { key } => BatchOp::Delete { key: f(&key) },
            })
            .collect();
        WriteBatch { ops }
    }
}

/// A [`WriteBatch`] bound to the store it will be applied to.
pub struct StoreBatch {
    store: Arc<dyn Store>,
    ops: WriteBatch,
}

impl StoreBatch {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            ops: WriteBatch::new(),
        }
    }

    /// The store this batch targets.
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }
}

impl fmt::Debug for StoreBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreBatch")
            .field("size", &self.ops.len())
            .finish()
    }
}

impl Batch for StoreBatch {
    type Key = [u8];

    fn put(&mut self, key: &[u8], value: &[u8]) {
        self.ops.put(key, value);
    }

    fn delete(&mut self, key: &[u8]) {
        self.ops.delete(key);
    }

    fn apply(self) -> Result<()> {
        self.store.write(self.ops)
    }

    fn size(&self) -> u32 {
        self.ops.len() as u32
    }
}
