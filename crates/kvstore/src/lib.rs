//! # kvstore - ordered byte stores
//!
//! The base layer every table and TTL view sits on: one [`Store`] contract
//! and two implementations of it.
//!
//! ```text
//!            ┌──────────────────────────────┐
//!            │        trait Store           │
//!            │ get / write / new_iterator   │
//!            │ shutdown / destroy           │
//!            └──────────────┬───────────────┘
//!                 ┌─────────┴──────────┐
//!                 v                    v
//!           ┌──────────┐        ┌─────────────┐
//!           │ MapStore │        │  DiskStore  │
//!           │ BTreeMap │        │ index + WAL │
//!           └──────────┘        │ + snapshot  │
//!                               └─────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module        | Purpose                                             |
//! |---------------|-----------------------------------------------------|
//! | [`store`]     | `Store`, `Batch`, `WriteBatch`, `StoreBatch`        |
//! | [`iterator`]  | `KvIterator` cursor and the owned `SnapshotIterator` |
//! | [`mapstore`]  | In-memory store for tests                           |
//! | [`diskstore`] | Durable store with batch-atomic crash recovery      |
//! | [`metrics`]   | Per-instance counters                               |
//! | [`error`]     | Shared error taxonomy                               |
//!
//! Every write goes through [`Store::write`] with a whole [`WriteBatch`], so
//! single puts and multi-key batches share one atomicity guarantee.

pub mod diskstore;
pub mod error;
pub mod iterator;
pub mod mapstore;
pub mod metrics;
pub mod store;

pub use diskstore::{DiskStore, DiskStoreOptions, DEFAULT_COMPACTION_THRESHOLD};
pub use error::{Error, Result, ResultExt};
pub use iterator::{KvIterator, SnapshotIterator};
pub use mapstore::MapStore;
pub use metrics::{StoreMetrics, StoreMetricsSnapshot};
pub use store::{Batch, BatchOp, Store, StoreBatch, StoreExt, WriteBatch};

/// Drains an iterator into owned `(key, value)` pairs.
///
/// # Errors
///
/// Returns the iterator's error, if it reports one.
pub fn collect_entries(mut it: Box<dyn KvIterator>) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let mut out = Vec::new();
    while it.next() {
        if let (Some(k), Some(v)) = (it.key(), it.value()) {
            out.push((k.to_vec(), v.to_vec()));
        }
    }
    if let Some(e) = it.error() {
        return Err(Error::Corruption(format!("iterator failed: {e}")));
    }
    Ok(out)
}

#[cfg(test)]
mod tests;
