//! Time-to-live writes.
//!
//! A TTL write is the value plus an empty expiry marker, committed in one
//! batch. The marker is what the sweeper later finds; readers never see it.
//!
//! Overwriting a key that still has a pending marker does not move or cancel
//! that marker. When it comes due it deletes whatever value the key holds at
//! that moment.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use kvstore::{Batch, KvIterator, Result, Store, WriteBatch};
use parking_lot::Mutex;
use tracing::info;

use crate::expiry::{deadline, expire_keys, expiry_key};
use crate::sweeper::Sweeper;
use crate::view::{PrefixBatch, PrefixView};

/// Local prefix of user data inside a [`TtlStore`].
pub const TTL_DATA_PREFIX: &[u8] = b"k";
/// Local prefix of expiry markers inside a [`TtlStore`].
pub const TTL_EXPIRY_PREFIX: &[u8] = b"e";

/// A batch that can name the physical key behind each of its keys.
///
/// [`TtlBatch`] needs this to write a marker that points at the value the
/// batch is about to store.
pub trait PhysicalBatch: Batch {
    /// The key the sweeper must delete when `key` expires.
    fn physical_key(&self, key: &Self::Key) -> Vec<u8>;

    /// Prefix of the marker keyspace, in the same store as the physical keys.
    fn expiry_prefix(&self) -> &[u8];

    /// Buffers a write addressed by physical key.
    fn put_physical(&mut self, key: &[u8], value: &[u8]);
}

/// Adds `put_with_ttl` and `put_with_expiration` to any [`PhysicalBatch`].
#[derive(Debug)]
pub struct TtlBatch<B> {
    inner: B,
}

impl<B: PhysicalBatch> TtlBatch<B> {
    pub fn new(inner: B) -> Self {
        Self { inner }
    }

    /// Buffers `value` under `key`, expiring `ttl` from now.
    pub fn put_with_ttl(&mut self, key: &B::Key, value: &[u8], ttl: Duration) {
        self.put_with_expiration(key, value, deadline(SystemTime::now(), ttl));
    }

    /// Buffers `value` under `key` and its marker for `when`.
    pub fn put_with_expiration(&mut self, key: &B::Key, value: &[u8], when: SystemTime) {
        let physical = self.inner.physical_key(key);
        let marker = expiry_key(self.inner.expiry_prefix(), when, &physical);
        self.inner.put(key, value);
        self.inner.put_physical(&marker, &[]);
    }

    pub fn into_inner(self) -> B {
        self.inner
    }
}

impl<B: PhysicalBatch> Batch for TtlBatch<B> {
    type Key = B::Key;

    fn put(&mut self, key: &B::Key, value: &[u8]) {
        self.inner.put(key, value);
    }

    fn delete(&mut self, key: &B::Key) {
        self.inner.delete(key);
    }

    fn apply(self) -> Result<()> {
        self.inner.apply()
    }

    /// Counts markers as well as plain operations.
    fn size(&self) -> u32 {
        self.inner.size()
    }
}

/// TTL support over any [`Store`], with its own background sweeper.
///
/// Wraps either a base store or a single [`Table`](crate::Table). User keys
/// live under [`TTL_DATA_PREFIX`] and markers under [`TTL_EXPIRY_PREFIX`] of
/// the wrapped store, so ordinary reads and scans never see markers.
pub struct TtlStore {
    inner: Arc<dyn Store>,
    view: PrefixView,
    gc_batch_size: u32,
    sweeper: Mutex<Option<Sweeper>>,
}

impl TtlStore {
    /// Wraps `inner`. A zero `gc_period` disables the background sweep; call
    /// [`TtlStore::expire_keys`] to sweep by hand.
    ///
    /// # Errors
    ///
    /// Fails if the sweeper thread cannot be spawned.
    pub fn new(inner: Arc<dyn Store>, gc_period: Duration, gc_batch_size: u32) -> Result<Self> {
        let view = PrefixView::new(Arc::clone(&inner), TTL_DATA_PREFIX, TTL_EXPIRY_PREFIX);
        let sweeper = if gc_period.is_zero() {
            None
        } else {
            let store = Arc::clone(&inner);
            Some(Sweeper::start("ttl-sweeper", gc_period, move || {
                expire_keys(store.as_ref(), TTL_EXPIRY_PREFIX, SystemTime::now(), gc_batch_size)
            })?)
        };
        info!(gc_period_ms = gc_period.as_millis() as u64, "ttl store opened");
        Ok(Self {
            inner,
            view,
            gc_batch_size,
            sweeper: Mutex::new(sweeper),
        })
    }

    /// Stores `value` under `key`, expiring `ttl` from now.
    pub fn put_with_ttl(&self, key: &[u8], value: &[u8], ttl: Duration) -> Result<()> {
        self.put_with_expiration(key, value, deadline(SystemTime::now(), ttl))
    }

    /// Stores `value` under `key`, expiring at `when`.
    pub fn put_with_expiration(&self, key: &[u8], value: &[u8], when: SystemTime) -> Result<()> {
        self.view.put_with_expiration(key, value, when)
    }

    pub fn new_batch(&self) -> PrefixBatch {
        self.view.new_batch()
    }

    pub fn new_ttl_batch(&self) -> TtlBatch<PrefixBatch> {
        TtlBatch::new(self.view.new_batch())
    }

    /// Runs one sweep as of `now`. Returns the number of expired keys.
    pub fn expire_keys(&self, now: SystemTime, max_batch: u32) -> Result<usize> {
        expire_keys(self.inner.as_ref(), TTL_EXPIRY_PREFIX, now, max_batch)
    }

    pub fn gc_batch_size(&self) -> u32 {
        self.gc_batch_size
    }

    pub fn is_sweeping(&self) -> bool {
        self.sweeper.lock().as_ref().is_some_and(Sweeper::is_running)
    }

    fn stop_sweeper(&self) {
        if let Some(mut sweeper) = self.sweeper.lock().take() {
            sweeper.stop();
        }
    }
}

impl Store for TtlStore {
    fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.view.get(key)
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        self.view.write(batch)
    }

    fn new_iterator(&self, prefix: &[u8]) -> Result<Box<dyn KvIterator>> {
        self.view.new_iterator(prefix)
    }

    /// Stops the sweeper, then shuts down the wrapped store.
    fn shutdown(&self) -> Result<()> {
        self.stop_sweeper();
        self.inner.shutdown()
    }

    fn destroy(&self) -> Result<()> {
        self.stop_sweeper();
        self.inner.destroy()
    }
}

impl Drop for TtlStore {
    fn drop(&mut self) {
        self.stop_sweeper();
    }
}

impl std::fmt::Debug for TtlStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlStore")
            .field("gc_batch_size", &self.gc_batch_size)
            .field("sweeping", &self.is_sweeping())
            .finish()
    }
}
