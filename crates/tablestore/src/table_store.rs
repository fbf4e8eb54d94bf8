//! Table lifecycle: schema version, namespace, ID allocation, and the
//! crash-safe drop protocol.
//!
//! ## Reserved tables
//!
//! ```text
//! ID u32::MAX      metadata   "schema_version" -> u64 BE
//!                             "deletion"       -> table_id (u32 BE) ++ name
//!                             "expiry/" ++ ts ++ physical_key -> ""
//! ID u32::MAX - 1  namespace  table_id (u32 BE) -> name
//! ```
//!
//! ## Dropping a table
//!
//! 1. Write the deletion marker. Once it is on disk the drop will finish,
//!    even across a crash.
//! 2. Delete every key under the table prefix, plus every expiry marker that
//!    points into the table, in bounded batches.
//! 3. Delete the namespace entry.
//! 4. Delete the marker.
//!
//! Each step is idempotent, so on open a leftover marker simply re-runs
//! steps 2 to 4 before anything else touches the store.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use config::{Config, StoreType};
use kvstore::{
    Batch, DiskStore, DiskStoreOptions, Error, MapStore, Result, ResultExt, Store,
    StoreMetrics,
};
use tracing::{debug, info, warn};

use crate::batch::TableStoreBatch;
use crate::catalog::Catalog;
use crate::expiry::{deadline, expire_keys, purge_prefix};
use crate::key::{table_prefix, Key, KeyBuilder, PREFIX_LEN};
use crate::sweeper::Sweeper;
use crate::table::Table;
use crate::ttl::TtlBatch;
use crate::view::PrefixView;

/// Table ID of the metadata table.
pub const METADATA_TABLE_ID: u32 = u32::MAX;
/// Table ID of the namespace table.
pub const NAMESPACE_TABLE_ID: u32 = u32::MAX - 1;
/// Number of table IDs that user tables can never take.
pub const RESERVED_TABLE_COUNT: u32 = 2;
/// Largest number of user tables a store can hold.
pub const MAX_USER_TABLE_COUNT: u32 = u32::MAX - RESERVED_TABLE_COUNT;
/// Schema version this build reads and writes.
pub const CURRENT_SCHEMA_VERSION: u64 = 0;
/// Local prefix of expiry markers inside the metadata table.
pub const EXPIRY_LOCAL_PREFIX: &[u8] = b"expiry/";

const SCHEMA_VERSION_KEY: &[u8] = b"schema_version";
const DELETION_KEY: &[u8] = b"deletion";

/// Runtime settings of a [`TableStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// Period of the background expiry sweep. Zero disables it.
    pub gc_period: Duration,
    /// Deletes per batch, for both expiry sweeps and table drops.
    pub gc_batch_size: u32,
    /// Upper bound on live user tables.
    pub max_tables: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self::from(&Config::default_map())
    }
}

impl From<&Config> for Options {
    fn from(config: &Config) -> Self {
        Self {
            gc_period: config.gc_period,
            gc_batch_size: config.gc_batch_size,
            max_tables: config.max_tables,
        }
    }
}

/// Named, disjoint tables over one base store, with TTL support.
///
/// Data operations (through [`Table`] handles, [`Key`]s, or batches) are
/// safe from many threads. Schema changes take `&mut self`, so they can
/// never overlap with each other or with other calls on the store itself.
pub struct TableStore {
    base: Arc<dyn Store>,
    catalog: Arc<Catalog>,
    metadata: PrefixView,
    namespace: PrefixView,
    /// Physical prefix of all expiry markers.
    expiry_prefix: Arc<[u8]>,
    options: Options,
    sweeper: Option<Sweeper>,
    metrics: Option<Arc<StoreMetrics>>,
}

impl TableStore {
    /// Opens the store described by `config` and makes its table set equal
    /// to `tables`.
    ///
    /// Live tables missing from `tables` are dropped along with all their
    /// data. Pass the complete schema every time.
    ///
    /// # Errors
    ///
    /// `IncompatibleSchema` if the data was written by another schema
    /// version, `Corruption` if the namespace is inconsistent, or any error
    /// from the base store.
    pub fn start(config: &Config, tables: &[&str]) -> Result<Self> {
        let (base, metrics) = open_base(config)?;
        let mut store = Self::open_with(base, Options::from(config), Some(tables))?;
        store.metrics = Some(metrics);
        Ok(store)
    }

    /// Opens the store described by `config` with whatever tables it holds.
    pub fn load(config: &Config) -> Result<Self> {
        let (base, metrics) = open_base(config)?;
        let mut store = Self::open_with(base, Options::from(config), None)?;
        store.metrics = Some(metrics);
        Ok(store)
    }

    /// Opens a table store over an existing base store.
    ///
    /// With `Some(tables)` this behaves like [`TableStore::start`], with
    /// `None` like [`TableStore::load`].
    pub fn open_with(base: Arc<dyn Store>, options: Options, tables: Option<&[&str]>) -> Result<Self> {
        let metadata_prefix = table_prefix(METADATA_TABLE_ID);
        let expiry_prefix: Arc<[u8]> = [&metadata_prefix[..], EXPIRY_LOCAL_PREFIX].concat().into();

        let mut store = Self {
            metadata: PrefixView::new(Arc::clone(&base), &metadata_prefix, &expiry_prefix),
            namespace: PrefixView::new(
                Arc::clone(&base),
                &table_prefix(NAMESPACE_TABLE_ID),
                &expiry_prefix,
            ),
            base,
            catalog: Arc::new(Catalog::new()),
            expiry_prefix,
            options,
            sweeper: None,
            metrics: None,
        };

        store.check_schema_version()?;
        store.resume_deletion()?;
        store.load_namespace()?;
        if let Some(tables) = tables {
            store.sync_schema(tables)?;
        }
        store.start_sweeper()?;

        info!(
            tables = store.catalog.len(),
            gc_period_ms = store.options.gc_period.as_millis() as u64,
            "table store started"
        );
        Ok(store)
    }

    // --------------------- Startup ---------------------

    fn check_schema_version(&self) -> Result<()> {
        match self.metadata.get(SCHEMA_VERSION_KEY) {
            Ok(bytes) => {
                let disk = <[u8; 8]>::try_from(bytes.as_slice())
                    .map(u64::from_be_bytes)
                    .map_err(|_| {
                        Error::Corruption(format!("schema version is {} bytes, want 8", bytes.len()))
                    })?;
                if disk != CURRENT_SCHEMA_VERSION {
                    return Err(Error::IncompatibleSchema {
                        code: CURRENT_SCHEMA_VERSION,
                        disk,
                    });
                }
                Ok(())
            }
            Err(e) if e.is_not_found() => self
                .metadata
                .put(SCHEMA_VERSION_KEY, &CURRENT_SCHEMA_VERSION.to_be_bytes())
                .context("failed to write schema version"),
            Err(e) => Err(e.context("failed to read schema version")),
        }
    }

    fn resume_deletion(&self) -> Result<()> {
        let marker = match self.metadata.get(DELETION_KEY) {
            Ok(marker) => marker,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e.context("failed to read deletion marker")),
        };
        let (id, name) = decode_deletion_marker(&marker)?;
        warn!(table = %name, id, "found interrupted table deletion, completing it");
        self.finish_deletion(id, &name)
            .with_context(|| format!("failed to complete deletion of table {}", name))
    }

    fn load_namespace(&self) -> Result<()> {
        let mut it = self
            .namespace
            .new_iterator(&[])
            .context("failed to scan namespace table")?;
        while it.next() {
            let (key, value) = match (it.key(), it.value()) {
                (Some(k), Some(v)) => (k, v),
                _ => break,
            };
            let id = decode_table_id(key)?;
            let name = std::str::from_utf8(value).map_err(|_| {
                Error::Corruption(format!("namespace entry for table {} is not UTF-8", id))
            })?;
            if self.catalog.get(name).is_some() {
                return Err(Error::Corruption(format!(
                    "table {} appears twice in the namespace",
                    name
                )));
            }
            self.catalog.insert(Arc::from(name), id);
        }
        if let Some(e) = it.error() {
            return Err(Error::Corruption(format!("namespace scan failed: {}", e)));
        }
        Ok(())
    }

    fn sync_schema(&mut self, tables: &[&str]) -> Result<()> {
        let wanted: BTreeSet<&str> = tables.iter().copied().collect();

        let stale: Vec<Arc<str>> = self
            .catalog
            .entries()
            .into_iter()
            .map(|(name, _)| name)
            .filter(|name| !wanted.contains(&**name))
            .collect();
        for name in stale {
            self.drop_table(&name)?;
        }

        // Sorted order makes ID assignment depend only on the set of names.
        for name in &wanted {
            self.get_or_create_table(name)?;
        }

        let persisted = self.count_namespace_entries()?;
        if persisted != wanted.len() || self.catalog.len() != wanted.len() {
            return Err(Error::Corruption(format!(
                "namespace holds {} entries and {} live tables after sync, expected {}",
                persisted,
                self.catalog.len(),
                wanted.len()
            )));
        }
        Ok(())
    }

    fn count_namespace_entries(&self) -> Result<usize> {
        let mut it = self.namespace.new_iterator(&[])?;
        let mut count = 0;
        while it.next() {
            count += 1;
        }
        Ok(count)
    }

    fn start_sweeper(&mut self) -> Result<()> {
        if self.options.gc_period.is_zero() {
            return Ok(());
        }
        let base = Arc::clone(&self.base);
        let prefix = Arc::clone(&self.expiry_prefix);
        let batch_size = self.options.gc_batch_size;
        let sweeper = Sweeper::start("tablestore-gc", self.options.gc_period, move || {
            expire_keys(base.as_ref(), &prefix, SystemTime::now(), batch_size)
        })
        .context("failed to start expiry sweeper")?;
        self.sweeper = Some(sweeper);
        Ok(())
    }

    // --------------------- Schema ---------------------

    /// Returns the table called `name`, creating it if needed.
    ///
    /// A new table takes the smallest free ID.
    ///
    /// # Errors
    ///
    /// `TableLimitExceeded` when the store already holds
    /// [`max_table_count`](Self::max_table_count) tables.
    pub fn get_or_create_table(&mut self, name: &str) -> Result<Table> {
        if let Some((name, id)) = self.catalog.get(name) {
            return Ok(self.table(name, id));
        }

        let max = self.max_table_count();
        if self.table_count() >= max {
            return Err(Error::TableLimitExceeded(max));
        }
        let id = self.next_table_id()?;

        self.namespace
            .put(&table_prefix(id), name.as_bytes())
            .with_context(|| format!("failed to register table {}", name))?;
        let name: Arc<str> = Arc::from(name);
        self.catalog.insert(Arc::clone(&name), id);

        info!(table = %name, id, "created table");
        Ok(self.table(name, id))
    }

    /// Drops the table called `name` and erases all of its data, including
    /// pending expiry markers. Dropping a missing table is a no-op.
    pub fn drop_table(&mut self, name: &str) -> Result<()> {
        let Some((name, id)) = self.catalog.get(name) else {
            return Ok(());
        };

        self.metadata
            .put(DELETION_KEY, &encode_deletion_marker(id, &name))
            .with_context(|| format!("failed to mark table {} for deletion", name))?;
        self.finish_deletion(id, &name)
            .with_context(|| format!("failed to drop table {}", name))?;

        info!(table = %name, id, "dropped table");
        Ok(())
    }

    /// Steps 2 to 4 of the drop protocol. Safe to run any number of times.
    fn finish_deletion(&self, id: u32, name: &str) -> Result<()> {
        let prefix = table_prefix(id);
        let (keys, markers) = purge_prefix(
            self.base.as_ref(),
            &prefix,
            &self.expiry_prefix,
            self.options.gc_batch_size,
        )
        .context("failed to delete table data")?;

        self.namespace
            .delete(&prefix)
            .context("failed to delete namespace entry")?;
        if self.catalog.is_live(name, id) {
            self.catalog.remove(name);
        }
        self.metadata
            .delete(DELETION_KEY)
            .context("failed to clear deletion marker")?;

        debug!(table = %name, id, keys, markers, "table data erased");
        Ok(())
    }

    fn next_table_id(&self) -> Result<u32> {
        let mut next = 0u32;
        for id in self.catalog.sorted_ids() {
            if id != next {
                break;
            }
            next += 1;
        }
        if next >= NAMESPACE_TABLE_ID {
            return Err(Error::TableLimitExceeded(self.max_table_count()));
        }
        Ok(next)
    }

    // --------------------- Lookup ---------------------

    fn table(&self, name: Arc<str>, id: u32) -> Table {
        Table::new(
            Arc::clone(&self.base),
            Arc::clone(&self.catalog),
            name,
            id,
            &self.expiry_prefix,
        )
        .with_batch_size(self.options.gc_batch_size)
    }

    /// The live table called `name`.
    ///
    /// # Errors
    ///
    /// `TableNotFound` if there is none.
    pub fn get_table(&self, name: &str) -> Result<Table> {
        self.catalog
            .get(name)
            .map(|(name, id)| self.table(name, id))
            .ok_or_else(|| Error::TableNotFound(name.to_string()))
    }

    /// Every live table, sorted by name.
    pub fn get_tables(&self) -> Vec<Table> {
        self.catalog
            .entries()
            .into_iter()
            .map(|(name, id)| self.table(name, id))
            .collect()
    }

    /// Names of every live table, sorted.
    pub fn table_names(&self) -> Vec<String> {
        self.catalog
            .entries()
            .into_iter()
            .map(|(name, _)| name.to_string())
            .collect()
    }

    pub fn get_key_builder(&self, name: &str) -> Result<KeyBuilder> {
        self.get_table(name).map(|t| t.key_builder().clone())
    }

    /// Key builders for every live table, sorted by table name.
    pub fn get_key_builders(&self) -> Vec<KeyBuilder> {
        self.catalog
            .entries()
            .into_iter()
            .map(|(name, id)| KeyBuilder::new(name, id))
            .collect()
    }

    pub fn table_count(&self) -> u32 {
        self.catalog.len() as u32
    }

    pub fn max_table_count(&self) -> u32 {
        self.options.max_tables.min(MAX_USER_TABLE_COUNT)
    }

    /// Changes the table limit for this session. The limit is not persisted.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `max` is below the number of live tables.
    pub fn set_max_table_count(&mut self, max: u32) -> Result<()> {
        if max < self.table_count() {
            return Err(Error::InvalidArgument(format!(
                "table limit {} is below the {} live tables",
                max,
                self.table_count()
            )));
        }
        self.options.max_tables = max;
        Ok(())
    }

    // --------------------- Data ---------------------

    fn check_key(&self, key: &Key) -> Result<()> {
        let builder = key.builder();
        if self.catalog.is_live(builder.table_name(), builder.table_id()) {
            Ok(())
        } else {
            Err(Error::TableNotFound(builder.table_name().to_string()))
        }
    }

    pub fn put(&self, key: &Key, value: &[u8]) -> Result<()> {
        self.check_key(key)?;
        self.base.put(key.raw(), value)
    }

    pub fn get(&self, key: &Key) -> Result<Vec<u8>> {
        self.check_key(key)?;
        self.base.get(key.raw())
    }

    pub fn delete(&self, key: &Key) -> Result<()> {
        self.check_key(key)?;
        self.base.delete(key.raw())
    }

    pub fn put_with_ttl(&self, key: &Key, value: &[u8], ttl: Duration) -> Result<()> {
        self.put_with_expiration(key, value, deadline(SystemTime::now(), ttl))
    }

    /// Stores `value` under `key` and its expiry marker in one atomic write.
    pub fn put_with_expiration(&self, key: &Key, value: &[u8], when: SystemTime) -> Result<()> {
        let mut batch = self.new_ttl_batch();
        batch.put_with_expiration(key, value, when);
        batch.apply()
    }

    /// An empty batch that may touch any live table.
    pub fn new_batch(&self) -> TableStoreBatch {
        TableStoreBatch::new(
            Arc::clone(&self.base),
            Arc::clone(&self.catalog),
            Arc::clone(&self.expiry_prefix),
        )
    }

    pub fn new_ttl_batch(&self) -> TtlBatch<TableStoreBatch> {
        TtlBatch::new(self.new_batch())
    }

    /// Runs one expiry sweep as of `now`, independent of the background
    /// sweeper. Returns the number of expired keys.
    pub fn expire_keys(&self, now: SystemTime, max_batch: u32) -> Result<usize> {
        expire_keys(self.base.as_ref(), &self.expiry_prefix, now, max_batch)
    }

    // --------------------- Lifecycle ---------------------

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Counters of the base store, when this store opened it.
    pub fn metrics(&self) -> Option<&Arc<StoreMetrics>> {
        self.metrics.as_ref()
    }

    pub fn is_sweeping(&self) -> bool {
        self.sweeper.as_ref().is_some_and(Sweeper::is_running)
    }

    fn stop_sweeper(&mut self) {
        if let Some(mut sweeper) = self.sweeper.take() {
            sweeper.stop();
        }
    }

    /// Stops the sweeper, then shuts down the base store. Data is kept.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop_sweeper();
        info!(tables = self.catalog.len(), "table store shutting down");
        self.base.shutdown()
    }

    /// Stops the sweeper, then erases the base store.
    pub fn destroy(mut self) -> Result<()> {
        self.stop_sweeper();
        info!("table store destroying all data");
        self.base.destroy()
    }
}

impl Drop for TableStore {
    fn drop(&mut self) {
        self.stop_sweeper();
    }
}

impl fmt::Debug for TableStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableStore")
            .field("tables", &self.table_names())
            .field("options", &self.options)
            .field("sweeping", &self.is_sweeping())
            .finish()
    }
}

fn open_base(config: &Config) -> Result<(Arc<dyn Store>, Arc<StoreMetrics>)> {
    let metrics = Arc::new(StoreMetrics::new());
    let base: Arc<dyn Store> = match config.store_type {
        StoreType::Map => Arc::new(MapStore::with_metrics(Arc::clone(&metrics))),
        StoreType::Disk => {
            let options = DiskStoreOptions {
                wal_sync: config.wal_sync,
                compaction_threshold: config.compaction_threshold,
            };
            let store = DiskStore::open(&config.path, options, Arc::clone(&metrics))
                .with_context(|| format!("failed to open store at {}", config.path.display()))?;
            Arc::new(store)
        }
    };
    Ok((base, metrics))
}

fn decode_table_id(bytes: &[u8]) -> Result<u32> {
    let id = <[u8; PREFIX_LEN]>::try_from(bytes)
        .map(u32::from_be_bytes)
        .map_err(|_| Error::Corruption(format!("table id is {} bytes, want 4", bytes.len())))?;
    if id >= NAMESPACE_TABLE_ID {
        return Err(Error::Corruption(format!("reserved table id {} in namespace", id)));
    }
    Ok(id)
}

/// `table_id (u32 BE) ++ table_name`
pub(crate) fn encode_deletion_marker(id: u32, name: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(PREFIX_LEN + name.len());
    out.extend_from_slice(&id.to_be_bytes());
    out.extend_from_slice(name.as_bytes());
    out
}

pub(crate) fn decode_deletion_marker(marker: &[u8]) -> Result<(u32, String)> {
    if marker.len() < PREFIX_LEN {
        return Err(Error::Corruption(format!(
            "deletion marker is {} bytes, want at least 4",
            marker.len()
        )));
    }
    let (id, name) = marker.split_at(PREFIX_LEN);
    let id = decode_table_id(id)?;
    let name = String::from_utf8(name.to_vec())
        .map_err(|_| Error::Corruption("deletion marker name is not UTF-8".to_string()))?;
    Ok((id, name))
}
