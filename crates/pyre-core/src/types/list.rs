//! List value: a thin adaptor over the quicklist.
//!
//! Converts between the command layer's `Bytes` world and the
//! quicklist's byte slices. Integer-encoded entries are reified into
//! byte strings only when they leave the core.

use bytes::Bytes;

use crate::config::CoreConfig;
use crate::packed::PackedSeq;
use crate::quicklist::{Dir, End, Iter, QlEntry, QuickList};

/// A list value stored in the keyspace.
#[derive(Debug)]
pub struct ListValue {
    ql: QuickList,
}

impl ListValue {
    /// Creates an empty list using the configured node policy.
    pub fn new(config: &CoreConfig) -> Self {
        Self {
            ql: QuickList::new(config.list_fill, config.list_compress_depth),
        }
    }

    /// Wraps an existing packed sequence, splitting across nodes as the
    /// node policy requires.
    pub fn from_packed(config: &CoreConfig, seq: PackedSeq) -> Self {
        Self {
            ql: QuickList::from_packed(config.list_fill, config.list_compress_depth, seq),
        }
    }

    pub fn len(&self) -> usize {
        self.ql.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ql.is_empty()
    }

    /// Free-effort estimate: the number of backbone nodes.
    pub fn node_count(&self) -> usize {
        self.ql.node_count()
    }

    pub fn push(&mut self, end: End, value: &[u8]) {
        self.ql.push(end, value);
    }

    pub fn pop(&mut self, end: End) -> Option<Bytes> {
        self.ql.pop(end)
    }

    /// Element at `idx`; negative indices count from the tail.
    pub fn get(&mut self, idx: i64) -> Option<Bytes> {
        self.ql.get(idx)
    }

    /// Replaces the element at `idx`; false when out of range.
    pub fn replace_at(&mut self, idx: i64, value: &[u8]) -> bool {
        self.ql.replace_at(idx, value)
    }

    /// Removes `count` elements starting at `start` (negative counts
    /// from the tail). Returns the number removed.
    pub fn del_range(&mut self, start: i64, count: usize) -> usize {
        self.ql.del_range(start, count)
    }

    /// Iterator starting at one end.
    pub fn iter(&mut self, dir: Dir) -> Iter {
        self.ql.iter(dir)
    }

    /// Iterator starting at list index `idx`; `None` when out of range.
    pub fn iter_from(&mut self, idx: i64, dir: Dir) -> Option<Iter> {
        self.ql.iter_from(idx, dir)
    }

    pub fn next(&mut self, it: &mut Iter) -> Option<QlEntry> {
        self.ql.next(it)
    }

    /// Removes the entry just yielded and re-anchors the iterator.
    pub fn delete_entry(&mut self, it: &mut Iter, entry: &QlEntry) {
        self.ql.delete_entry(it, entry)
    }

    pub fn insert_before(&mut self, entry: &QlEntry, value: &[u8]) {
        self.ql.insert_before(entry, value)
    }

    pub fn insert_after(&mut self, entry: &QlEntry, value: &[u8]) {
        self.ql.insert_after(entry, value)
    }

    /// Compares an iterator entry against external bytes.
    pub fn entry_eq(entry: &QlEntry, other: &[u8]) -> bool {
        entry.value == other
    }
}
