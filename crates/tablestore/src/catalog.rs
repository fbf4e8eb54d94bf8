//! In-memory map of live tables, shared by the store and its handles.

use std::collections::BTreeMap;
use std::sync::Arc;

use kvstore::{Error, Result};
use parking_lot::RwLock;

/// Live table names and their IDs.
///
/// Only the table store mutates it, and only from `&mut self` methods.
/// Handles read it to notice that their table was dropped.
#[derive(Debug, Default)]
pub(crate) struct Catalog {
    tables: RwLock<BTreeMap<Arc<str>, u32>>,
}

impl Catalog {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, name: &str) -> Option<(Arc<str>, u32)> {
        self.tables
            .read()
            .get_key_value(name)
            .map(|(n, id)| (Arc::clone(n), *id))
    }

    pub(crate) fn is_live(&self, name: &str, id: u32) -> bool {
        self.tables.read().get(name) == Some(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.tables.read().len()
    }

    /// Every live table, sorted by name.
    pub(crate) fn entries(&self) -> Vec<(Arc<str>, u32)> {
        self.tables
            .read()
            .iter()
            .map(|(n, id)| (Arc::clone(n), *id))
            .collect()
    }

    /// Every live table ID, ascending.
    pub(crate) fn sorted_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.tables.read().values().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub(crate) fn insert(&self, name: Arc<str>, id: u32) {
        self.tables.write().insert(name, id);
    }

    pub(crate) fn remove(&self, name: &str) {
        self.tables.write().remove(name);
    }
}

/// Proof-of-life check carried by table handles and batches.
#[derive(Debug, Clone)]
pub(crate) struct TableGuard {
    catalog: Arc<Catalog>,
    name: Arc<str>,
    id: u32,
}

impl TableGuard {
    pub(crate) fn new(catalog: Arc<Catalog>, name: Arc<str>, id: u32) -> Self {
        Self { catalog, name, id }
    }

    /// Fails with `TableNotFound` once the table is dropped.
    pub(crate) fn check(&self) -> Result<()> {
        if self.catalog.is_live(&self.name, self.id) {
            Ok(())
        } else {
            Err(Error::TableNotFound(self.name.to_string()))
        }
    }
}
