//! # wal - batch-framed write-ahead log
//!
//! Provides crash-safe durability for the disk-backed base store.
//!
//! Every write batch is serialized into a single binary **frame** and appended
//! to the log **before** it is applied to the in-memory index. A frame carries
//! all of the batch's operations, so a batch is either replayed completely or
//! not at all: a frame torn by a crash is discarded as a whole on replay.
//!
//! ## Binary Frame Format
//!
//! ```text
//! [frame_len: u32 LE][crc32: u32 LE][body ...]
//! ```
//!
//! Body: `[seq: u64][count: u32][op_0]...[op_{count-1}]`
//!
//! Op (Put): `[op=0: u8][key_len: u32][key][val_len: u32][value]`
//! Op (Del): `[op=1: u8][key_len: u32][key]`
//!
//! `frame_len` includes the 4-byte CRC but **not** itself.
//!
//! ## Example
//!
//! ```rust,no_run
//! use wal::{WalBatch, WalReader, WalRecord, WalWriter};
//!
//! let mut w = WalWriter::create("wal.log", true).unwrap();
//! w.append(&WalBatch {
//!     seq: 1,
//!     records: vec![
//!         WalRecord::Put { key: b"hello".to_vec(), value: b"world".to_vec() },
//!         WalRecord::Del { key: b"stale".to_vec() },
//!     ],
//! }).unwrap();
//! drop(w);
//!
//! let mut r = WalReader::open("wal.log").unwrap();
//! r.replay(|batch| println!("{:?}", batch)).unwrap();
//! ```

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::Path;

use thiserror::Error;

/// Upper bound on a single frame. Anything larger is treated as corruption.
pub const MAX_FRAME_SIZE: u32 = 256 * 1024 * 1024;

/// A single mutation inside a [`WalBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
    /// A key-value insertion.
    Put {
        /// The lookup key.
        key: Vec<u8>,
        /// The payload value.
        value: Vec<u8>,
    },
    /// A key deletion.
    Del {
        /// The key to delete.
        key: Vec<u8>,
    },
}

/// An atomic group of records sharing one sequence number.
///
/// The store assigns a monotonically increasing `seq` to every batch it
/// commits. Recovery uses it to skip frames already folded into a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalBatch {
    /// Sequence number assigned by the store.
    pub seq: u64,
    /// The mutations, applied in order.
    pub records: Vec<WalRecord>,
}

/// Errors that can occur during WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A frame failed CRC validation or contained an unknown op code.
    #[error("corrupt record")]
    Corrupt,
}

/// Append-only WAL writer.
///
/// Frames are serialized into an in-memory buffer, CRC-checksummed, and then
/// written to the underlying file in a single `write_all` call. When `sync` is
/// `true`, every append is followed by `sync_all()` (fsync) so the batch is
/// durable on disk before the call returns.
pub struct WalWriter {
    file: File,
    sync: bool,
    /// Reusable scratch buffer to avoid allocation on every append.
    buf: Vec<u8>,
}

impl WalWriter {
    /// Opens (or creates) a WAL file in append mode.
    ///
    /// # Arguments
    ///
    /// * `path` - file system path for the WAL (created if it does not exist).
    /// * `sync` - if true, every `append` call is followed by `fsync`.
    pub fn create<P: AsRef<Path>>(path: P, sync: bool) -> Result<Self, WalError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(path)?;
        Ok(Self {
            file,
            sync,
            buf: Vec::with_capacity(256),
        })
    }

    /// Serializes `batch` as one frame and appends it to the WAL file.
    ///
    /// Returns the number of bytes written, header included.
    pub fn append(&mut self, batch: &WalBatch) -> Result<usize, WalError> {
        self.buf.clear();

        // Reserve 8 bytes for the frame header (frame_len + crc), filled later
        self.buf.extend_from_slice(&[0u8; 8]);

        let count = u32::try_from(batch.records.len()).map_err(|_| {
            WalError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "WAL batch has too many records",
            ))
        })?;
        self.buf.write_u64::<LittleEndian>(batch.seq)?;
        self.buf.write_u32::<LittleEndian>(count)?;

        for record in &batch.records {
            match record {
                WalRecord::Put { key, value } => {
                    self.buf.write_u8(0)?; // op = put
                    self.buf.write_u32::<LittleEndian>(key.len() as u32)?;
                    self.buf.extend_from_slice(key);
                    self.buf.write_u32::<LittleEndian>(value.len() as u32)?;
                    self.buf.extend_from_slice(value);
                }
                WalRecord::Del { key } => {
                    self.buf.write_u8(1)?; // op = del
                    self.buf.write_u32::<LittleEndian>(key.len() as u32)?;
                    self.buf.extend_from_slice(key);
                }
            }
        }

        let body = &self.buf[8..];

        let mut hasher = Crc32::new();
        hasher.update(body);
        let crc = hasher.finalize();

        // frame_len = body.len() + 4 (CRC)
        let frame_len = (body.len() as u64) + 4;
        if frame_len > u64::from(MAX_FRAME_SIZE) {
            return Err(WalError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "WAL frame too large",
            )));
        }

        self.buf[0..4].copy_from_slice(&(frame_len as u32).to_le_bytes());
        self.buf[4..8].copy_from_slice(&crc.to_le_bytes());

        // Single write call for the entire frame
        self.file.write_all(&self.buf)?;
        self.file.flush()?;

        if self.sync {
            self.file.sync_all()?;
        }

        Ok(self.buf.len())
    }

    /// Forces all buffered data to be written to disk via `sync_all()`.
    ///
    /// Useful when `sync` is `false` and the caller wants durability at a
    /// specific point, e.g. before renaming a freshly written snapshot.
    pub fn sync_to_disk(&mut self) -> Result<(), WalError> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

/// Sequential WAL reader that yields valid batches.
///
/// The reader is generic over any `Read` implementor, allowing it to be used
/// with real files (`WalReader<File>`) or in-memory buffers for testing.
///
/// During replay, each frame's CRC32 is verified. A truncated tail frame
/// (e.g., from a crash mid-write) is treated as a clean EOF: every complete
/// batch before it is returned and the torn batch is dropped entirely.
pub struct WalReader<R: Read> {
    rdr: BufReader<R>,
    /// Bytes covered by complete, checksummed frames so far.
    valid_len: u64,
}

impl WalReader<File> {
    /// Opens an existing WAL file for sequential replay.
    ///
    /// Returns `WalError::Io` if the file cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<WalReader<File>, WalError> {
        let f = File::open(path)?;
        Ok(WalReader {
            rdr: BufReader::new(f),
            valid_len: 0,
        })
    }
}

impl<R: Read> WalReader<R> {
    /// Constructs a reader from any `Read` implementor.
    pub fn from_reader(reader: R) -> Self {
        WalReader {
            rdr: BufReader::new(reader),
            valid_len: 0,
        }
    }

    /// Length of the prefix made of complete frames.
    ///
    /// After [`replay`](Self::replay) returns `Ok`, anything past this offset
    /// is a torn tail. A writer must truncate the file here before appending,
    /// or new frames would land behind the garbage.
    pub fn valid_len(&self) -> u64 {
        self.valid_len
    }

    /// Replays every valid batch in the WAL, calling `apply` for each one.
    ///
    /// # Termination
    ///
    /// - **Clean EOF** -> returns `Ok(())`.
    /// - **Truncated tail** -> returns `Ok(())` after yielding all complete
    ///   batches before it.
    /// - **CRC mismatch** or **unknown op code** -> `Err(WalError::Corrupt)`.
    /// - **I/O error** -> `Err(WalError::Io(...))`.
    pub fn replay<F>(&mut self, mut apply: F) -> Result<(), WalError>
    where
        F: FnMut(WalBatch),
    {
        let mut body = Vec::with_capacity(256);

        loop {
            let frame_len = match self.rdr.read_u32::<LittleEndian>() {
                Ok(v) => v,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(WalError::Io(e)),
            };

            // frame_len includes the CRC and at least seq + count
            if frame_len < 4 + 12 || frame_len > MAX_FRAME_SIZE {
                return Err(WalError::Corrupt);
            }

            let crc = match self.rdr.read_u32::<LittleEndian>() {
                Ok(v) => v,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(WalError::Io(e)),
            };

            let body_len = (frame_len - 4) as usize;
            body.clear();
            body.resize(body_len, 0);
            match self.rdr.read_exact(&mut body) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    // torn tail: the whole batch is dropped
                    return Ok(());
                }
                Err(e) => return Err(WalError::Io(e)),
            }

            let mut hasher = Crc32::new();
            hasher.update(&body);
            if hasher.finalize() != crc {
                return Err(WalError::Corrupt);
            }

            apply(decode_body(&body)?);
            self.valid_len += 4 + u64::from(frame_len);
        }
    }
}

fn decode_body(body: &[u8]) -> Result<WalBatch, WalError> {
    let body_len = body.len();
    let mut br = body;
    let seq = br.read_u64::<LittleEndian>()?;
    let count = br.read_u32::<LittleEndian>()? as usize;

    // Each op takes at least 5 bytes, so a larger count cannot be honest.
    if count > body_len / 5 + 1 {
        return Err(WalError::Corrupt);
    }

    let mut records = Vec::with_capacity(count);
    for _ in 0..count {
        let op = br.read_u8().map_err(|_| WalError::Corrupt)?;
        let key = read_chunk(&mut br, body_len)?;
        match op {
            0 => {
                let value = read_chunk(&mut br, body_len)?;
                records.push(WalRecord::Put { key, value });
            }
            1 => records.push(WalRecord::Del { key }),
            _ => return Err(WalError::Corrupt),
        }
    }

    if !br.is_empty() {
        return Err(WalError::Corrupt);
    }

    Ok(WalBatch { seq, records })
}

/// Reads a `[len: u32][bytes]` chunk, rejecting lengths past the frame end.
fn read_chunk(br: &mut &[u8], body_len: usize) -> Result<Vec<u8>, WalError> {
    let len = br
        .read_u32::<LittleEndian>()
        .map_err(|_| WalError::Corrupt)? as usize;
    if len > body_len || len > br.len() {
        return Err(WalError::Corrupt);
    }
    let mut out = vec![0u8; len];
    br.read_exact(&mut out)?;
    Ok(out)
}
