//! # tablestore - named tables and TTL over one ordered store
//!
//! Splits a single [`kvstore::Store`] into disjoint tables, each addressed
//! by a 4-byte big-endian table ID prefix, and adds per-key expiration.
//!
//! ```text
//!   TableStore ── get_or_create_table / drop_table / batches / expire_keys
//!       │
//!       ├── Table "users"  (id 0)  ──┐
//!       ├── Table "orders" (id 1)  ──┤  PrefixView: prefix ++ local key
//!       │                            v
//!       │            ┌───────────────────────────────────┐
//!       └──────────> │    base Store (DiskStore/MapStore) │
//!                    │ 00000000.. | 00000001.. | fffffffe | ffffffff │
//!                    └───────────────────────────────────┘
//!                       users       orders      namespace   metadata
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module          | Purpose                                                 |
//! |-----------------|---------------------------------------------------------|
//! | [`table_store`] | Schema version, namespace, ID allocation, crash-safe drop |
//! | [`table`]       | `Table`: a full `Store` over one table prefix           |
//! | [`batch`]       | Atomic batches spanning several tables                  |
//! | [`key`]         | `KeyBuilder` and `Key`: table-bound physical keys       |
//! | [`ttl`]         | `TtlBatch`, `TtlStore`, and the `PhysicalBatch` seam    |
//! | [`expiry`]      | Marker encoding and the sweep                           |
//! | [`sweeper`]     | Background sweep thread with prompt shutdown            |
//! | [`view`]        | `PrefixView`: a `Store` over one key prefix             |
//!
//! ## Expiry markers
//!
//! A TTL write stores the value and an empty marker
//! `expiry_prefix ++ unix_nanos (u64 BE) ++ physical_key` in one batch.
//! Markers sort by deadline, so a sweep stops at the first one still in
//! the future.

pub mod batch;
mod catalog;
pub mod expiry;
pub mod key;
pub mod sweeper;
pub mod table;
pub mod table_store;
pub mod ttl;
pub mod view;

pub use batch::TableStoreBatch;
pub use key::{table_prefix, Key, KeyBuilder, PREFIX_LEN};
pub use sweeper::{ShutdownSignal, Sweeper};
pub use table::{Table, TableBatch};
pub use table_store::{
    Options, TableStore, CURRENT_SCHEMA_VERSION, EXPIRY_LOCAL_PREFIX, MAX_USER_TABLE_COUNT,
    METADATA_TABLE_ID, NAMESPACE_TABLE_ID, RESERVED_TABLE_COUNT,
};
pub use ttl::{PhysicalBatch, TtlBatch, TtlStore, TTL_DATA_PREFIX, TTL_EXPIRY_PREFIX};
pub use view::{PrefixBatch, PrefixIterator, PrefixView};

#[cfg(test)]
mod tests;
