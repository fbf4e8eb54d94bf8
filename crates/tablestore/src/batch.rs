use std::fmt;
use std::sync::Arc;

use kvstore::{Batch, Error, Result, Store, WriteBatch};

use crate::catalog::Catalog;
use crate::key::{Key, KeyBuilder};
use crate::ttl::PhysicalBatch;

/// A batch spanning any number of tables, addressed by [`Key`].
///
/// Applying it checks that every table it touches is still live; if one was
/// dropped in the meantime nothing is written.
pub struct TableStoreBatch {
    base: Arc<dyn Store>,
    catalog: Arc<Catalog>,
    expiry_prefix: Arc<[u8]>,
    touched: Vec<KeyBuilder>,
    ops: WriteBatch,
}

impl TableStoreBatch {
    pub(crate) fn new(base: Arc<dyn Store>, catalog: Arc<Catalog>, expiry_prefix: Arc<[u8]>) -> Self {
        Self {
            base,
            catalog,
            expiry_prefix,
            touched: Vec::new(),
            ops: WriteBatch::new(),
        }
    }

    fn touch(&mut self, key: &Key) {
        if !self.touched.iter().any(|b| b == key.builder()) {
            self.touched.push(key.builder().clone());
        }
    }
}

impl fmt::Debug for TableStoreBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableStoreBatch")
            .field("tables", &self.touched)
            .field("size", &self.ops.len())
            .finish()
    }
}

impl Batch for TableStoreBatch {
    type Key = Key;

    fn put(&mut self, key: &Key, value: &[u8]) {
        self.touch(key);
        self.ops.put(key.raw(), value);
    }

    fn delete(&mut self, key: &Key) {
        self.touch(key);
        self.ops.delete(key.raw());
    }

    fn apply(self) -> Result<()> {
        for builder in &self.touched {
            if !self.catalog.is_live(builder.table_name(), builder.table_id()) {
                return Err(Error::TableNotFound(builder.table_name().to_string()));
            }
        }
        self.base.write(self.ops)
    }

    fn size(&self) -> u32 {
        self.ops.len() as u32
    }
}

impl PhysicalBatch for TableStoreBatch {
    fn physical_key(&self, key: &Key) -> Vec<u8> {
        key.raw().to_vec()
    }

    fn expiry_prefix(&self) -> &[u8] {
        &self.expiry_prefix
    }

    fn put_physical(&mut self, key: &[u8], value: &[u8]) {
        self.ops.put(key, value);
    }
}
