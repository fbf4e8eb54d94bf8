use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use kvstore::{KvIterator, Result, Store, WriteBatch};

use crate::catalog::{Catalog, TableGuard};
use crate::expiry::deadline;
use crate::key::{table_prefix, KeyBuilder};
use crate::ttl::TtlBatch;
use crate::view::{PrefixBatch, PrefixView};

/// A batch of writes to one table, addressed by local keys.
pub type TableBatch = PrefixBatch;

/// A named table: a complete [`Store`] over one table-ID prefix.
///
/// Handles are cheap to clone and safe to share between threads. Once the
/// table is dropped from its store, every call on an old handle fails with
/// `TableNotFound`.
#[derive(Clone)]
pub struct Table {
    builder: KeyBuilder,
    view: PrefixView,
}

impl Table {
    pub(crate) fn new(
        base: Arc<dyn Store>,
        catalog: Arc<Catalog>,
        name: Arc<str>,
        id: u32,
        expiry_prefix: &[u8],
    ) -> Self {
        let guard = TableGuard::new(catalog, Arc::clone(&name), id);
        let view = PrefixView::new(base, &table_prefix(id), expiry_prefix).guarded(guard);
        Self {
            builder: KeyBuilder::new(name, id),
            view,
        }
    }

    /// Deletes per batch when the table's data is destroyed.
    pub(crate) fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.view = self.view.with_batch_size(batch_size);
        self
    }

    pub fn name(&self) -> &str {
        self.builder.table_name()
    }

    pub fn id(&self) -> u32 {
        self.builder.table_id()
    }

    /// A key builder for this table.
    pub fn key_builder(&self) -> &KeyBuilder {
        &self.builder
    }

    /// The physical key for local key `key`, for use in cross-table batches.
    pub fn table_key(&self, key: &[u8]) -> Vec<u8> {
        self.view.physical_key(key)
    }

    /// Stores `value` under `key`, expiring `ttl` from now.
    pub fn put_with_ttl(&self, key: &[u8], value: &[u8], ttl: Duration) -> Result<()> {
        self.put_with_expiration(key, value, deadline(SystemTime::now(), ttl))
    }

    /// Stores `value` under `key` together with its expiry marker.
    pub fn put_with_expiration(&self, key: &[u8], value: &[u8], when: SystemTime) -> Result<()> {
        self.view.put_with_expiration(key, value, when)
    }

    pub fn new_batch(&self) -> TableBatch {
        self.view.new_batch()
    }

    pub fn new_ttl_batch(&self) -> TtlBatch<TableBatch> {
        TtlBatch::new(self.view.new_batch())
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.name())
            .field("id", &self.id())
            .finish()
    }
}

impl Store for Table {
    fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.view.get(key)
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        self.view.write(batch)
    }

    fn new_iterator(&self, prefix: &[u8]) -> Result<Box<dyn KvIterator>> {
        self.view.new_iterator(prefix)
    }

    /// Tables share their store's lifetime; shut down the table store instead.
    fn shutdown(&self) -> Result<()> {
        self.view.shutdown()
    }

    /// Erases the table's data. The table itself stays registered.
    fn destroy(&self) -> Result<()> {
        self.view.destroy()
    }
}
