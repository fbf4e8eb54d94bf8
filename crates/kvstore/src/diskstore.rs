//! Durable store: an ordered in-memory index backed by a snapshot and a WAL.
//!
//! ```text
//! write(batch)
//!   |
//!   |  log lock held
//!   v
//! seq += 1 -> WAL frame append (fsync?) -> index apply
//!   |
//!   |  wal bytes >= threshold ?
//!   v
//! compact(): index -> snapshot.log.tmp -> fsync -> rename snapshot.log
//!            -> truncate wal.log
//! ```
//!
//! ## Recovery
//!
//! 1. Remove a leftover `snapshot.log.tmp` from an interrupted compaction.
//! 2. Replay `snapshot.log`. Every frame in it carries the snapshot's seq.
//! 3. Replay `wal.log`, skipping frames with `seq <= snapshot_seq` (they are
//!    already in the snapshot when a crash hit between rename and truncate).
//! 4. Truncate `wal.log` to its last complete frame so later appends do not
//!    land behind a torn tail.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info};
use wal::{WalBatch, WalReader, WalRecord, WalWriter};

use crate::{
    BatchOp, Error, KvIterator, Result, ResultExt, SnapshotIterator, Store, StoreMetrics,
    WriteBatch,
};

/// WAL file name inside the store directory.
pub const WAL_FILENAME: &str = "wal.log";
/// Snapshot file name inside the store directory.
pub const SNAPSHOT_FILENAME: &str = "snapshot.log";
const SNAPSHOT_TMP_FILENAME: &str = "snapshot.log.tmp";

pub use config::DEFAULT_COMPACTION_THRESHOLD;

const SNAPSHOT_CHUNK_RECORDS: usize = 4096;
const SNAPSHOT_CHUNK_BYTES: usize = 16 * 1024 * 1024;

/// Tuning knobs for [`DiskStore::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskStoreOptions {
    /// Fsync the WAL after every batch.
    pub wal_sync: bool,
    /// WAL size in bytes that triggers a compaction. Zero disables it.
    pub compaction_threshold: u64,
}

impl Default for DiskStoreOptions {
    fn default() -> Self {
        Self {
            wal_sync: true,
            compaction_threshold: DEFAULT_COMPACTION_THRESHOLD,
        }
    }
}

struct LogState {
    /// `None` once the store is shut down.
    writer: Option<WalWriter>,
    seq: u64,
    wal_bytes: u64,
}

/// A crash-safe [`Store`] persisted under one directory.
///
/// The whole key set lives in memory. Durability comes from the WAL, and a
/// batch is one WAL frame, so a crash mid-write loses the whole batch or
/// none of it.
pub struct DiskStore {
    dir: PathBuf,
    index: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    log: Mutex<LogState>,
    closed: AtomicBool,
    options: DiskStoreOptions,
    metrics: Arc<StoreMetrics>,
}

impl std::fmt::Debug for DiskStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let log = self.log.lock();
        f.debug_struct("DiskStore")
            .field("dir", &self.dir)
            .field("seq", &log.seq)
            .field("wal_bytes", &log.wal_bytes)
            .field("entries", &self.index.read().len())
            .field("options", &self.options)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl DiskStore {
    /// Opens the store in `dir`, creating it if needed, and recovers its
    /// contents from the snapshot and WAL.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be created, or if either file is
    /// corrupt beyond a torn WAL tail.
    pub fn open<P: AsRef<Path>>(
        dir: P,
        options: DiskStoreOptions,
        metrics: Arc<StoreMetrics>,
    ) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create store dir {}", dir.display()))?;

        match fs::remove_file(dir.join(SNAPSHOT_TMP_FILENAME)) {
            Ok(()) => debug!(dir = %dir.display(), "removed leftover snapshot tmp file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::Io(e).context("failed to remove snapshot tmp file")),
        }

        let mut index = BTreeMap::new();
        let snapshot_seq = load_snapshot(&dir.join(SNAPSHOT_FILENAME), &mut index)?;
        let wal_path = dir.join(WAL_FILENAME);
        let (seq, wal_bytes) = replay_wal(&wal_path, snapshot_seq, &mut index)?;

        let writer = WalWriter::create(&wal_path, options.wal_sync)
            .context("failed to open WAL writer")?;

        info!(
            dir = %dir.display(),
            entries = index.len(),
            seq,
            wal_bytes,
            "disk store opened"
        );

        Ok(Self {
            dir,
            index: RwLock::new(index),
            log: Mutex::new(LogState {
                writer: Some(writer),
                seq,
                wal_bytes,
            }),
            closed: AtomicBool::new(false),
            options,
            metrics,
        })
    }

    /// Directory holding the store's files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Sequence number of the last committed batch.
    pub fn seq(&self) -> u64 {
        self.log.lock().seq
    }

    /// Current WAL size in bytes.
    pub fn wal_bytes(&self) -> u64 {
        self.log.lock().wal_bytes
    }

    pub fn metrics(&self) -> &Arc<StoreMetrics> {
        &self.metrics
    }

    /// Writes a snapshot of the index and truncates the WAL, regardless of
    /// the compaction threshold.
    pub fn compact(&self) -> Result<()> {
        self.check_open()?;
        let mut log = self.log.lock();
        if log.writer.is_none() {
            return Err(Error::Closed);
        }
        self.compact_locked(&mut log)
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn compact_locked(&self, log: &mut LogState) -> Result<()> {
        let tmp_path = self.dir.join(SNAPSHOT_TMP_FILENAME);
        let snapshot_path = self.dir.join(SNAPSHOT_FILENAME);
        let wal_path = self.dir.join(WAL_FILENAME);
        let seq = log.seq;

        let entries = {
            // Holding the log lock keeps writers out; readers may proceed.
            let index = self.index.read();
            write_snapshot(&tmp_path, seq, &index)?
        };
        fs::rename(&tmp_path, &snapshot_path).context("failed to install snapshot")?;

        // Frames in the WAL are all <= seq now, so dropping them is safe. The
        // writer is in append mode and keeps writing at the new end.
        OpenOptions::new()
            .write(true)
            .open(&wal_path)
            .and_then(|f| f.set_len(0))
            .context("failed to truncate WAL")?;
        log.wal_bytes = 0;

        self.metrics.record_compaction();
        info!(seq, entries, dir = %self.dir.display(), "compacted WAL into snapshot");
        Ok(())
    }
}

impl DiskStore {
    /// Cuts the WAL back to the end of the last committed frame after a failed
    /// append. If the cut fails the store closes, since later frames would
    /// land behind the partial one and be lost on replay.
    fn discard_partial_frame(&self, log: &mut LogState) {
        let wal_path = self.dir.join(WAL_FILENAME);
        let cut = OpenOptions::new()
            .write(true)
            .open(&wal_path)
            .and_then(|f| f.set_len(log.wal_bytes));
        match cut {
            Ok(()) => debug!(wal_bytes = log.wal_bytes, "discarded partial WAL frame"),
            Err(e) => {
                error!(error = %e, dir = %self.dir.display(), "failed to discard partial WAL frame, closing store");
                log.writer = None;
                self.closed.store(true, Ordering::Release);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn recover_failed_append(&self) {
        let mut log = self.log.lock();
        self.discard_partial_frame(&mut log);
    }
}

impl Store for DiskStore {
    fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.check_open()?;
        self.metrics.record_get();
        self.index.read().get(key).cloned().ok_or(Error::NotFound)
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        self.check_open()?;
        if batch.is_empty() {
            return Ok(());
        }

        let mut log = self.log.lock();
        let seq = log.seq + 1;

        let (mut puts, mut deletes, mut bytes) = (0u64, 0u64, 0u64);
        let records: Vec<WalRecord> = batch
            .into_ops()
            .into_iter()
            .map(|op| match op {
                BatchOp::Put { key, value } => {
                    puts += 1;
                    bytes += (key.len() + value.len()) as u64;
                    WalRecord::Put { key, value }
                }
                BatchOp::Delete { key } => {
                    deletes += 1;
                    WalRecord::Del { key }
                }
            })
            .collect();
        let frame = WalBatch { seq, records };

        let appended = match log.writer.as_mut() {
            Some(writer) => writer.append(&frame),
            None => return Err(Error::Closed),
        };
        let written = match appended {
            Ok(n) => n,
            Err(e) => {
                self.discard_partial_frame(&mut log);
                return Err(Error::from(e).context("failed to append WAL frame"));
            }
        };
        log.seq = seq;
        log.wal_bytes += written as u64;
        self.metrics.record_wal_frame();

        {
            let mut index = self.index.write();
            apply_records(&mut index, frame.records);
        }
        self.metrics.record_batch(puts, deletes, bytes);

        let threshold = self.options.compaction_threshold;
        if threshold > 0 && log.wal_bytes >= threshold {
            // The batch is already durable in the WAL; a failed compaction is
            // retried on the next write.
            if let Err(e) = self.compact_locked(&mut log) {
                error!(error = %e, dir = %self.dir.display(), "compaction failed");
            }
        }
        Ok(())
    }

    fn new_iterator(&self, prefix: &[u8]) -> Result<Box<dyn KvIterator>> {
        self.check_open()?;
        self.metrics.record_iterator();
        Ok(Box::new(SnapshotIterator::from_prefix(
            &self.index.read(),
            prefix,
        )))
    }

    fn shutdown(&self) -> Result<()> {
        let mut log = self.log.lock();
        self.closed.store(true, Ordering::Release);
        if let Some(mut writer) = log.writer.take() {
            writer.sync_to_disk()?;
            info!(dir = %self.dir.display(), seq = log.seq, "disk store shut down");
        }
        Ok(())
    }

    fn destroy(&self) -> Result<()> {
        self.shutdown()?;
        self.index.write().clear();
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(Error::Io(e))
                    .with_context(|| format!("failed to remove {}", self.dir.display()))
            }
        }
        info!(dir = %self.dir.display(), "disk store destroyed");
        Ok(())
    }
}

impl Drop for DiskStore {
    fn drop(&mut self) {
        if let Some(writer) = self.log.get_mut().writer.as_mut() {
            let _ = writer.sync_to_disk();
        }
    }
}

fn apply_records(index: &mut BTreeMap<Vec<u8>, Vec<u8>>, records: Vec<WalRecord>) {
    for record in records {
        match record {
            WalRecord::Put { key, value } => {
                index.insert(key, value);
            }
            WalRecord::Del { key } => {
                index.remove(&key);
            }
        }
    }
}

/// Replays `path` into `index`, returning the snapshot's seq (0 if absent).
fn load_snapshot(path: &Path, index: &mut BTreeMap<Vec<u8>, Vec<u8>>) -> Result<u64> {
    let mut reader = match WalReader::open(path) {
        Ok(r) => r,
        Err(wal::WalError::Io(e)) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(Error::from(e).context("failed to open snapshot")),
    };
    let mut snapshot_seq = 0u64;
    reader
        .replay(|batch| {
            snapshot_seq = snapshot_seq.max(batch.seq);
            apply_records(index, batch.records);
        })
        .context("failed to replay snapshot")?;
    Ok(snapshot_seq)
}

/// Replays WAL frames newer than `snapshot_seq`, then cuts any torn tail.
///
/// Returns the last committed seq and the WAL length after truncation.
fn replay_wal(
    path: &Path,
    snapshot_seq: u64,
    index: &mut BTreeMap<Vec<u8>, Vec<u8>>,
) -> Result<(u64, u64)> {
    let mut reader = match WalReader::open(path) {
        Ok(r) => r,
        Err(wal::WalError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
            return Ok((snapshot_seq, 0))
        }
        Err(e) => return Err(Error::from(e).context("failed to open WAL")),
    };

    let mut seq = snapshot_seq;
    let mut skipped = 0usize;
    reader
        .replay(|batch| {
            if batch.seq <= snapshot_seq {
                skipped += 1;
                return;
            }
            seq = seq.max(batch.seq);
            apply_records(index, batch.records);
        })
        .context("failed to replay WAL")?;

    let valid_len = reader.valid_len();
    drop(reader);
    let file_len = fs::metadata(path)?.len();
    if file_len > valid_len {
        debug!(
            path = %path.display(),
            dropped_bytes = file_len - valid_len,
            "truncating torn WAL tail"
        );
        OpenOptions::new()
            .write(true)
            .open(path)?
            .set_len(valid_len)?;
    }
    if skipped > 0 {
        debug!(skipped, snapshot_seq, "skipped WAL frames already in snapshot");
    }
    Ok((seq, valid_len))
}

/// Writes the index to `path` as WAL frames, fsynced. Returns the entry count.
fn write_snapshot(path: &Path, seq: u64, index: &BTreeMap<Vec<u8>, Vec<u8>>) -> Result<usize> {
    let _ = fs::remove_file(path);
    let mut writer = WalWriter::create(path, false).context("failed to create snapshot tmp")?;

    // Leading empty frame records the seq even when the index is empty.
    writer.append(&WalBatch {
        seq,
        records: Vec::new(),
    })?;

    let mut chunk = Vec::with_capacity(SNAPSHOT_CHUNK_RECORDS.min(index.len()));
    let mut chunk_bytes = 0usize;
    for (key, value) in index {
        chunk_bytes += key.len() + value.len();
        chunk.push(WalRecord::Put {
            key: key.clone(),
            value: value.clone(),
        });
        if chunk.len() >= SNAPSHOT_CHUNK_RECORDS || chunk_bytes >= SNAPSHOT_CHUNK_BYTES {
            writer.append(&WalBatch {
                seq,
                records: std::mem::take(&mut chunk),
            })?;
            chunk_bytes = 0;
        }
    }
    if !chunk.is_empty() {
        writer.append(&WalBatch {
            seq,
            records: chunk,
        })?;
    }
    writer.sync_to_disk()?;
    Ok(index.len())
}
