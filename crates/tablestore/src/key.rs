//! Table-scoped keys.
//!
//! A physical key is the table's 4-byte big-endian ID followed by the local
//! key. The prefix has a fixed width, so sorting physical keys of one table
//! sorts their local keys.

use std::fmt;
use std::sync::Arc;

/// Width of the table-ID prefix on every physical key.
pub const PREFIX_LEN: usize = 4;

/// The physical prefix of table `id`.
pub fn table_prefix(id: u32) -> [u8; PREFIX_LEN] {
    id.to_be_bytes()
}

/// Builds [`Key`]s for one table.
///
/// Cheap to clone. Two builders are equal when they name the same table with
/// the same ID, which lets the table store reject keys minted for a table
/// that has since been dropped and recreated.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct KeyBuilder {
    table: Arc<str>,
    id: u32,
}

impl KeyBuilder {
    pub(crate) fn new(table: Arc<str>, id: u32) -> Self {
        Self { table, id }
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn table_id(&self) -> u32 {
        self.id
    }

    /// A key from raw bytes.
    pub fn key(&self, key: &[u8]) -> Key {
        let mut raw = Vec::with_capacity(PREFIX_LEN + key.len());
        raw.extend_from_slice(&table_prefix(self.id));
        raw.extend_from_slice(key);
        Key {
            builder: self.clone(),
            raw,
        }
    }

    /// A key from the UTF-8 bytes of `key`.
    pub fn string_key(&self, key: &str) -> Key {
        self.key(key.as_bytes())
    }

    /// A key from the big-endian bytes of `key`, so numeric order is key order.
    pub fn uint64_key(&self, key: u64) -> Key {
        self.key(&key.to_be_bytes())
    }

    /// A key from the big-endian bytes of `key`.
    pub fn uint32_key(&self, key: u32) -> Key {
        self.key(&key.to_be_bytes())
    }
}

impl fmt::Debug for KeyBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyBuilder")
            .field("table", &self.table)
            .field("id", &self.id)
            .finish()
    }
}

/// A key bound to one table.
#[derive(Clone, PartialEq, Eq)]
pub struct Key {
    builder: KeyBuilder,
    raw: Vec<u8>,
}

impl Key {
    /// The caller-supplied local key.
    pub fn bytes(&self) -> &[u8] {
        &self.raw[PREFIX_LEN..]
    }

    /// The physical key, table prefix included.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// The builder that produced this key.
    pub fn builder(&self) -> &KeyBuilder {
        &self.builder
    }

    /// The local key as text, replacing invalid UTF-8.
    pub fn as_string(&self) -> String {
        String::from_utf8_lossy(self.bytes()).into_owned()
    }

    /// The local key read as a big-endian `u64`.
    ///
    /// Keys shorter than 8 bytes are zero-padded on the left and longer keys
    /// are cut to their first 8 bytes. Reading a key built some other way is
    /// a caller mistake, not a storage error, so this never fails.
    pub fn as_u64(&self) -> u64 {
        u64::from_be_bytes(fit::<8>(self.bytes()))
    }

    /// The local key read as a big-endian `u32`, with the same best-effort
    /// rules as [`Key::as_u64`].
    pub fn as_u32(&self) -> u32 {
        u32::from_be_bytes(fit::<4>(self.bytes()))
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("table", &self.builder.table_name())
            .field("key", &String::from_utf8_lossy(self.bytes()))
            .finish()
    }
}

fn fit<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    if bytes.len() >= N {
        out.copy_from_slice(&bytes[..N]);
    } else {
        out[N - bytes.len()..].copy_from_slice(bytes);
    }
    out
}
