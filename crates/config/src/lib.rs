//! # Config - table store settings
//!
//! Everything needed to open a table store: which base store to use, where it
//! lives on disk, and how the background expiry sweep behaves.
//!
//! ## Environment
//!
//! [`Config::from_env`] reads these variables, falling back to the defaults
//! for anything missing or unparseable:
//!
//! ```text
//! TABLESTORE_TYPE          "disk" or "map"             (default: disk)
//! TABLESTORE_PATH          store directory             (default: data/tablestore)
//! TABLESTORE_WAL_SYNC      fsync every WAL append      (default: true)
//! TABLESTORE_COMPACT_KB    WAL compaction threshold    (default: 4096 = 4 MiB)
//! TABLESTORE_GC_PERIOD_MS  expiry sweep period, 0=off  (default: 5000)
//! TABLESTORE_GC_BATCH      deletes per sweep batch     (default: 1024)
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Default directory for a disk-backed store.
pub const DEFAULT_PATH: &str = "data/tablestore";
/// Default WAL size that triggers compaction (4 MiB).
pub const DEFAULT_COMPACTION_THRESHOLD: u64 = 4 * 1024 * 1024;
/// Default period between expiry sweeps.
pub const DEFAULT_GC_PERIOD: Duration = Duration::from_secs(5);
/// Default number of deletes applied per sweep batch.
pub const DEFAULT_GC_BATCH_SIZE: u32 = 1024;
/// Largest number of user tables; two table IDs are reserved.
pub const MAX_TABLE_COUNT: u32 = u32::MAX - 2;

/// Which base store backs the table store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreType {
    /// Durable snapshot + WAL store.
    Disk,
    /// In-memory map, lost on shutdown.
    Map,
}

impl FromStr for StoreType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disk" | "leveldb" => Ok(StoreType::Disk),
            "map" | "memory" | "mem" => Ok(StoreType::Map),
            other => Err(format!("unknown store type '{}'", other)),
        }
    }
}

/// Settings for opening a table store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub store_type: StoreType,
    /// Store directory. Ignored by [`StoreType::Map`].
    pub path: PathBuf,
    pub wal_sync: bool,
    /// WAL size in bytes that triggers compaction. Zero disables it.
    pub compaction_threshold: u64,
    /// Period of the background expiry sweep. Zero disables the sweeper.
    pub gc_period: Duration,
    /// Maximum deletes per sweep batch before it is flushed.
    pub gc_batch_size: u32,
    /// Upper bound on live user tables.
    pub max_tables: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self::default_disk(DEFAULT_PATH)
    }
}

impl Config {
    /// A disk-backed configuration rooted at `path`.
    pub fn default_disk<P: AsRef<Path>>(path: P) -> Self {
        Self {
            store_type: StoreType::Disk,
            path: path.as_ref().to_path_buf(),
            wal_sync: true,
            compaction_threshold: DEFAULT_COMPACTION_THRESHOLD,
            gc_period: DEFAULT_GC_PERIOD,
            gc_batch_size: DEFAULT_GC_BATCH_SIZE,
            max_tables: MAX_TABLE_COUNT,
        }
    }

    /// An in-memory configuration, for tests and scratch use.
    pub fn default_map() -> Self {
        Self {
            store_type: StoreType::Map,
            path: PathBuf::new(),
            ..Self::default_disk(DEFAULT_PATH)
        }
    }

    /// Reads the configuration from `TABLESTORE_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary variable source.
    ///
    /// Values that are missing or fail to parse keep their default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let store_type = env_or("TABLESTORE_TYPE", "disk")
            .parse()
            .unwrap_or(StoreType::Disk);
        let path = env_or("TABLESTORE_PATH", DEFAULT_PATH);
        let wal_sync = env_or("TABLESTORE_WAL_SYNC", "true").parse().unwrap_or(true);
        let compact_kb: u64 = env_or("TABLESTORE_COMPACT_KB", "4096")
            .parse()
            .unwrap_or(DEFAULT_COMPACTION_THRESHOLD / 1024);
        let gc_ms: u64 = env_or("TABLESTORE_GC_PERIOD_MS", "5000")
            .parse()
            .unwrap_or(5000);
        let gc_batch_size = env_or("TABLESTORE_GC_BATCH", "1024")
            .parse::<u32>()
            .ok()
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_GC_BATCH_SIZE);

        Self {
            store_type,
            path: PathBuf::from(path),
            wal_sync,
            compaction_threshold: compact_kb.saturating_mul(1024),
            gc_period: Duration::from_millis(gc_ms),
            gc_batch_size,
            max_tables: MAX_TABLE_COUNT,
        }
    }

    /// Returns a copy with the sweeper disabled.
    pub fn without_gc(mut self) -> Self {
        self.gc_period = Duration::ZERO;
        self
    }
}

#[cfg(test)]
mod tests;
