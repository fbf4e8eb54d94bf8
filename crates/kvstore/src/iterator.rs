//! Cursor-style iteration over a key range.

use std::collections::BTreeMap;

use crate::Error;

/// A bidirectional cursor over a snapshot of key-value pairs.
///
/// A new iterator sits *before* the first entry, so the usual loop is
/// `while it.next() { ... }`. Dropping the iterator releases it.
pub trait KvIterator: Send {
    /// Moves to the first entry. Returns false when there is none.
    fn first(&mut self) -> bool;

    /// Moves to the last entry. Returns false when there is none.
    fn last(&mut self) -> bool;

    /// Moves to the first entry whose key is `>= key`.
    fn seek(&mut self, key: &[u8]) -> bool;

    /// Advances one entry. From the initial position this is `first`.
    fn next(&mut self) -> bool;

    /// Steps back one entry. Past the end this is `last`.
    fn prev(&mut self) -> bool;

    /// True when positioned on an entry.
    fn valid(&self) -> bool;

    /// The current key, if positioned on an entry.
    fn key(&self) -> Option<&[u8]>;

    /// The current value, if positioned on an entry.
    fn value(&self) -> Option<&[u8]>;

    /// Any error the iterator hit while reading. Snapshots never fail.
    fn error(&self) -> Option<&Error> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    BeforeFirst,
    At(usize),
    AfterLast,
}

/// An iterator over an owned copy of its entries.
///
/// Building one copies the matching range, which makes it a consistent
/// snapshot at the cost of memory proportional to the range.
#[derive(Debug, Clone)]
pub struct SnapshotIterator {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    pos: Position,
}

impl SnapshotIterator {
    /// Wraps entries that are already sorted by key.
    pub fn new(entries: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        debug_assert!(entries.windows(2).all(|w| w[0].0 < w[1].0));
        Self {
            entries,
            pos: Position::BeforeFirst,
        }
    }

    /// Copies every entry of `map` whose key starts with `prefix`.
    pub fn from_prefix(map: &BTreeMap<Vec<u8>, Vec<u8>>, prefix: &[u8]) -> Self {
        let entries = map
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Self::new(entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn current(&self) -> Option<&(Vec<u8>, Vec<u8>)> {
        match self.pos {
            Position::At(i) => self.entries.get(i),
            _ => None,
        }
    }

    fn land(&mut self, index: usize) -> bool {
        if index < self.entries.len() {
            self.pos = Position::At(index);
            true
        } else {
            self.pos = Position::AfterLast;
            false
        }
    }
}

impl KvIterator for SnapshotIterator {
    fn first(&mut self) -> bool {
        self.land(0)
    }

    fn last(&mut self) -> bool {
        match self.entries.len() {
            0 => {
                self.pos = Position::BeforeFirst;
                false
            }
            n => self.land(n - 1),
        }
    }

    fn seek(&mut self, key: &[u8]) -> bool {
        let index = self.entries.partition_point(|(k, _)| k.as_slice() < key);
        self.land(index)
    }

    fn next(&mut self) -> bool {
        match self.pos {
            Position::BeforeFirst => self.land(0),
            Position::At(i) => self.land(i + 1),
            Position::AfterLast => false,
        }
    }

    fn prev(&mut self) -> bool {
        match self.pos {
            Position::BeforeFirst => false,
            Position::At(0) => {
                self.pos = Position::BeforeFirst;
                false
            }
            Position::At(i) => self.land(i - 1),
            Position::AfterLast => self.last(),
        }
    }

    fn valid(&self) -> bool {
        self.current().is_some()
    }

    fn key(&self) -> Option<&[u8]> {
        self.current().map(|(k, _)| k.as_slice())
    }

    fn value(&self) -> Option<&[u8]> {
        self.current().map(|(_, v)| v.as_slice())
    }
}
