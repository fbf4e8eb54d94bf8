//! A [`Store`] projected onto one key prefix of another store.
//!
//! Writes prepend the prefix, iterators strip it. The prefix bounds every
//! scan, so a view never surfaces keys that belong to a sibling view.

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use config::DEFAULT_GC_BATCH_SIZE;
use kvstore::{Batch, Error, KvIterator, Result, Store, WriteBatch};

use crate::catalog::TableGuard;
use crate::expiry::{expiry_key, purge_prefix};
use crate::ttl::PhysicalBatch;

/// A prefixed window onto a base store.
#[derive(Clone)]
pub struct PrefixView {
    base: Arc<dyn Store>,
    prefix: Arc<[u8]>,
    /// Where TTL markers for this view's keys go, in the base keyspace.
    expiry_prefix: Arc<[u8]>,
    guard: Option<TableGuard>,
    /// Deletes per batch in `destroy`.
    batch_size: u32,
}

impl PrefixView {
    /// A view of `base` under `prefix` whose TTL markers live under
    /// `expiry_prefix` in the same base store.
    pub fn new(base: Arc<dyn Store>, prefix: &[u8], expiry_prefix: &[u8]) -> Self {
        Self {
            base,
            prefix: prefix.into(),
            expiry_prefix: expiry_prefix.into(),
            guard: None,
            batch_size: DEFAULT_GC_BATCH_SIZE,
        }
    }

    pub(crate) fn guarded(mut self, guard: TableGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    pub(crate) fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    pub fn expiry_prefix(&self) -> &[u8] {
        &self.expiry_prefix
    }

    pub fn base(&self) -> &Arc<dyn Store> {
        &self.base
    }

    /// The base-store key for the local key `key`.
    pub fn physical_key(&self, key: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.prefix.len() + key.len());
        out.extend_from_slice(&self.prefix);
        out.extend_from_slice(key);
        out
    }

    pub(crate) fn check(&self) -> Result<()> {
        match &self.guard {
            Some(g) => g.check(),
            None => Ok(()),
        }
    }

    /// Writes `value` and its expiry marker in one atomic batch.
    pub fn put_with_expiration(&self, key: &[u8], value: &[u8], when: SystemTime) -> Result<()> {
        self.check()?;
        let physical = self.physical_key(key);
        let mut batch = WriteBatch::new();
        batch.put(&expiry_key(&self.expiry_prefix, when, &physical), &[]);
        batch.put(&physical, value);
        self.base.write(batch)
    }

    /// An empty batch over this view.
    pub fn new_batch(&self) -> PrefixBatch {
        PrefixBatch {
            view: self.clone(),
            ops: WriteBatch::new(),
        }
    }
}

impl fmt::Debug for PrefixView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrefixView")
            .field("prefix", &self.prefix)
            .field("expiry_prefix", &self.expiry_prefix)
            .finish()
    }
}

impl Store for PrefixView {
    fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.check()?;
        self.base.get(&self.physical_key(key))
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        self.check()?;
        self.base.write(batch.map_keys(|k| self.physical_key(k)))
    }

    fn new_iterator(&self, prefix: &[u8]) -> Result<Box<dyn KvIterator>> {
        self.check()?;
        let inner = self.base.new_iterator(&self.physical_key(prefix))?;
        Ok(Box::new(PrefixIterator {
            inner,
            prefix: Arc::clone(&self.prefix),
        }))
    }

    /// A view owns nothing, so there is nothing to stop.
    fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    /// Erases every key of the view and every expiry marker pointing at one.
    /// The base store stays open.
    fn destroy(&self) -> Result<()> {
        self.check()?;
        purge_prefix(self.base.as_ref(), &self.prefix, &self.expiry_prefix, self.batch_size)?;
        Ok(())
    }
}

/// Strips the view prefix from keys of a base iterator.
pub struct PrefixIterator {
    inner: Box<dyn KvIterator>,
    prefix: Arc<[u8]>,
}

impl KvIterator for PrefixIterator {
    fn first(&mut self) -> bool {
        self.inner.first()
    }

    fn last(&mut self) -> bool {
        self.inner.last()
    }

    fn seek(&mut self, key: &[u8]) -> bool {
        let mut target = Vec::with_capacity(self.prefix.len() + key.len());
        target.extend_from_slice(&self.prefix);
        target.extend_from_slice(key);
        self.inner.seek(&target)
    }

    fn next(&mut self) -> bool {
        self.inner.next()
    }

    fn prev(&mut self) -> bool {
        self.inner.prev()
    }

    fn valid(&self) -> bool {
        self.inner.valid()
    }

    fn key(&self) -> Option<&[u8]> {
        self.inner
            .key()
            .and_then(|k| k.strip_prefix(&self.prefix[..]))
    }

    fn value(&self) -> Option<&[u8]> {
        self.inner.value()
    }

    fn error(&self) -> Option<&Error> {
        self.inner.error()
    }
}

/// A batch over a [`PrefixView`], addressed by local keys.
pub struct PrefixBatch {
    view: PrefixView,
    ops: WriteBatch,
}

impl fmt::Debug for PrefixBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrefixBatch")
            .field("prefix", &self.view.prefix)
            .field("size", &self.ops.len())
            .finish()
    }
}

impl Batch for PrefixBatch {
    type Key = [u8];

    fn put(&mut self, key: &[u8], value: &[u8]) {
        let physical = self.view.physical_key(key);
        self.ops.put(&physical, value);
    }

    fn delete(&mut self, key: &[u8]) {
        let physical = self.view.physical_key(key);
        self.ops.delete(&physical);
    }

    /// # Errors
    ///
    /// `TableNotFound` if the view's table was dropped after the batch was
    /// made; nothing is written in that case.
    fn apply(self) -> Result<()> {
        self.view.check()?;
        self.view.base.write(self.ops)
    }

    fn size(&self) -> u32 {
        self.ops.len() as u32
    }
}

impl PhysicalBatch for PrefixBatch {
    fn physical_key(&self, key: &[u8]) -> Vec<u8> {
        self.view.physical_key(key)
    }

    fn expiry_prefix(&self) -> &[u8] {
        &self.view.expiry_prefix
    }

    fn put_physical(&mut self, key: &[u8], value: &[u8]) {
        self.ops.put(key, value);
    }
}
