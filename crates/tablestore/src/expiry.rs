//! Expiry markers and the sweep that consumes them.
//!
//! ```text
//! marker = expiry_prefix ++ expiry_nanos (u64 BE) ++ target_key    value = ""
//! ```
//!
//! The timestamp sits right after a constant prefix, so byte order of the
//! markers is chronological order. A sweep walks them from the front and stops
//! at the first one that is not yet due.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use kvstore::{Error, Result, Store, WriteBatch};
use tracing::{debug, warn};

const TIMESTAMP_LEN: usize = 8;

/// Nanoseconds since the Unix epoch. Times before it clamp to zero and times
/// past `u64::MAX` nanoseconds clamp to the maximum.
pub fn unix_nanos(time: SystemTime) -> u64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => u64::try_from(d.as_nanos()).unwrap_or(u64::MAX),
        Err(_) => 0,
    }
}

/// The inverse of [`unix_nanos`].
pub fn from_unix_nanos(nanos: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_nanos(nanos)
}

/// `now + ttl`, saturating at the largest encodable time.
pub fn deadline(now: SystemTime, ttl: Duration) -> SystemTime {
    now.checked_add(ttl)
        .filter(|t| unix_nanos(*t) < u64::MAX)
        .unwrap_or_else(|| from_unix_nanos(u64::MAX))
}

/// Encodes the marker for `key` expiring at `time`.
pub fn expiry_key(prefix: &[u8], time: SystemTime, key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(prefix.len() + TIMESTAMP_LEN + key.len());
    out.extend_from_slice(prefix);
    out.extend_from_slice(&unix_nanos(time).to_be_bytes());
    out.extend_from_slice(key);
    out
}

/// Splits a marker into its expiry time and target key.
///
/// # Errors
///
/// `Corruption` when the marker does not start with `prefix` or is too short
/// to hold a timestamp.
pub fn parse_expiry_key<'a>(prefix: &[u8], marker: &'a [u8]) -> Result<(SystemTime, &'a [u8])> {
    let rest = marker
        .strip_prefix(prefix)
        .filter(|rest| rest.len() >= TIMESTAMP_LEN)
        .ok_or_else(|| Error::Corruption(format!("malformed expiry marker {:?}", marker)))?;
    let (ts, key) = rest.split_at(TIMESTAMP_LEN);
    let mut nanos = [0u8; TIMESTAMP_LEN];
    nanos.copy_from_slice(ts);
    Ok((from_unix_nanos(u64::from_be_bytes(nanos)), key))
}

/// Deletes every entry whose marker under `prefix` is due at `now`, along
/// with the marker itself. Returns how many entries expired.
///
/// Deletes are flushed whenever the pending batch reaches `max_batch`
/// operations, so a large backlog never becomes one huge write. Running the
/// sweep again over the same range is a no-op.
///
/// # Errors
///
/// Propagates any store failure. Deletes flushed before the failure stay
/// applied; the rest are picked up by the next sweep.
pub fn expire_keys(store: &dyn Store, prefix: &[u8], now: SystemTime, max_batch: u32) -> Result<usize> {
    let max_batch = max_batch.max(1) as usize;
    let cutoff = unix_nanos(now);

    let mut it = store.new_iterator(prefix)?;
    let mut batch = WriteBatch::new();
    let mut expired = 0usize;
    let mut malformed = 0usize;

    while it.next() {
        let marker = match it.key() {
            Some(k) => k,
            None => break,
        };
        match parse_expiry_key(prefix, marker) {
            Ok((when, target)) => {
                if unix_nanos(when) > cutoff {
                    break;
                }
                batch.delete(target);
                batch.delete(marker);
                expired += 1;
            }
            Err(e) => {
                warn!(error = %e, "removing malformed expiry marker");
                batch.delete(marker);
                malformed += 1;
            }
        }
        if batch.len() >= max_batch {
            store.write(std::mem::take(&mut batch))?;
        }
    }
    if let Some(e) = it.error() {
        return Err(Error::Corruption(format!("expiry scan failed: {e}")));
    }
    drop(it);

    if !batch.is_empty() {
        store.write(batch)?;
    }
    if expired > 0 || malformed > 0 {
        debug!(expired, malformed, "expiry sweep finished");
    }
    Ok(expired)
}

/// Deletes every key under `prefix` and every marker under `expiry_prefix`
/// that targets one of them, flushing every `batch_size` deletes. Returns
/// the number of keys and markers deleted.
pub(crate) fn purge_prefix(
    store: &dyn Store,
    prefix: &[u8],
    expiry_prefix: &[u8],
    batch_size: u32,
) -> Result<(usize, usize)> {
    let batch_size = batch_size.max(1) as usize;
    let keys = delete_matching(store, prefix, batch_size, |_| true)?;
    let markers = delete_matching(store, expiry_prefix, batch_size, |marker| {
        parse_expiry_key(expiry_prefix, marker)
            .map(|(_, target)| target.starts_with(prefix))
            .unwrap_or(false)
    })?;
    Ok((keys, markers))
}

fn delete_matching<F>(store: &dyn Store, prefix: &[u8], batch_size: usize, matches: F) -> Result<usize>
where
    F: Fn(&[u8]) -> bool,
{
    let mut it = store.new_iterator(prefix)?;
    let mut batch = WriteBatch::new();
    let mut deleted = 0;
    while it.next() {
        if let Some(key) = it.key().filter(|k| matches(k)) {
            batch.delete(key);
            deleted += 1;
            if batch.len() >= batch_size {
                store.write(std::mem::take(&mut batch))?;
            }
        }
    }
    if let Some(e) = it.error() {
        return Err(Error::Corruption(format!("purge scan failed: {e}")));
    }
    drop(it);
    if !batch.is_empty() {
        store.write(batch)?;
    }
    Ok(deleted)
}
