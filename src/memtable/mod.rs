//! # Memtable Module
//!
//! ## Design Invariants
//!
//! - Keys are unique and ordered lexicographically as unsigned bytes.
//! - Deletes are represented via tombstones (`None` values), not
//!   physical removal.
//! - The byte counter is atomic so the overflow check can run without
//!   holding the coordinator's writer lock; it approximates the total
//!   occupied bytes (key + value + fixed per-entry overhead).
//! - A memtable with no configured threshold (the sentinel used for the
//!   flushing slot and on close) never signals overflow and never
//!   rejects writes.
//!
//! ## Overflow Semantics
//!
//! Two policies coexist deliberately:
//!
//! - `upsert` **rejects** with [`MemTableError::OutOfMemory`] when the
//!   pre-insert size is already at or above the threshold — the caller
//!   must wait for the in-flight flush to drain.
//! - Otherwise it inserts and **reports** whether the post-insert size
//!   reached the threshold, signalling the coordinator to swap
//!   memtables and schedule a flush.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_skiplist::SkipMap;
use thiserror::Error;

use crate::entry::{entry_size, Entry};
use crate::merge::PointerIterator;
use crate::sstable::SsTableError;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Represents possible errors returned by [`MemTable`] operations.
#[derive(Debug, Error)]
pub enum MemTableError {
    /// The memtable is at its flush threshold; the write was rejected
    /// without being applied.
    #[error("memtable is at its flush threshold")]
    OutOfMemory,
}

// ------------------------------------------------------------------------------------------------
// MemTable Core
// ------------------------------------------------------------------------------------------------

/// The in-memory ordered write buffer of the store.
///
/// # Concurrency
/// - The underlying skip map supports concurrent readers and writers;
///   the coordinator serializes structural transitions (memtable swaps)
///   with its own read-write lock.
/// - The byte counter is an atomic integer observable without locks.
pub struct MemTable {
    /// Ordered map from key to value; `None` values are tombstones.
    map: SkipMap<Vec<u8>, Option<Vec<u8>>>,

    /// Approximate occupied bytes (keys + values + per-entry overhead).
    byte_size: AtomicU64,

    /// Flush threshold in bytes; `None` disables overflow signalling.
    flush_threshold: Option<u64>,
}

impl MemTable {
    /// Creates an empty memtable with the given flush threshold.
    pub fn new(flush_threshold: Option<u64>) -> Self {
        Self {
            map: SkipMap::new(),
            byte_size: AtomicU64::new(0),
            flush_threshold,
        }
    }

    /// Creates the threshold-less sentinel used for the flushing slot.
    pub fn unbounded() -> Self {
        Self::new(None)
    }

    /// Inserts or replaces an entry.
    ///
    /// Returns `Ok(true)` when the post-insert size reached the flush
    /// threshold (the caller should arrange a flush), `Ok(false)`
    /// otherwise. Fails with [`MemTableError::OutOfMemory`] — without
    /// inserting — when the pre-insert size is already at the threshold.
    pub fn upsert(&self, entry: Entry) -> Result<bool, MemTableError> {
        let new_entry_size = entry.size_bytes();
        let size_before = self.byte_size.fetch_add(new_entry_size, Ordering::SeqCst);
        if let Some(threshold) = self.flush_threshold {
            if size_before >= threshold {
                self.byte_size.fetch_sub(new_entry_size, Ordering::SeqCst);
                return Err(MemTableError::OutOfMemory);
            }
        }

        let displaced = self
            .map
            .get(&entry.key)
            .map(|previous| entry_size(previous.key(), previous.value().as_deref()));
        self.map.insert(entry.key, entry.value);
        if let Some(previous_size) = displaced {
            // The key was already present; its old version no longer
            // occupies memory.
            self.byte_size.fetch_sub(previous_size, Ordering::SeqCst);
        }

        match self.flush_threshold {
            Some(threshold) => Ok(self.byte_size.load(Ordering::SeqCst) >= threshold),
            None => Ok(false),
        }
    }

    /// Exact key lookup. Tombstone entries are returned as entries with
    /// an absent value — filtering is the caller's job.
    pub fn get(&self, key: &[u8]) -> Option<Entry> {
        self.map.get(key).map(|found| Entry {
            key: found.key().clone(),
            value: found.value().clone(),
        })
    }

    /// Half-open range cursor over `[from, to)`; absent bounds are
    /// unbounded. The cursor's priority is `u32::MAX - priority_reduction`
    /// (active memtable: 0, flushing memtable: 1).
    ///
    /// The cursor owns a snapshot of the selected range, so it stays
    /// valid while concurrent upserts proceed.
    pub fn iterator(
        &self,
        from: Option<&[u8]>,
        to: Option<&[u8]>,
        priority_reduction: u32,
    ) -> MemTableIterator {
        let lower = from.map_or(Bound::Unbounded, Bound::Included);
        let upper = to.map_or(Bound::Unbounded, Bound::Excluded);
        let entries: Vec<Entry> = self
            .map
            .range::<[u8], _>((lower, upper))
            .map(|found| Entry {
                key: found.key().clone(),
                value: found.value().clone(),
            })
            .collect();
        MemTableIterator::new(entries, u32::MAX - priority_reduction)
    }

    /// Snapshot of every entry — including tombstones — in key order,
    /// consumed by the SSTable writer during a flush.
    pub fn flush_entries(&self) -> Vec<Entry> {
        self.map
            .iter()
            .map(|found| Entry {
                key: found.key().clone(),
                value: found.value().clone(),
            })
            .collect()
    }

    /// Whether the memtable holds no entries.
    pub fn is_empty(&self) -> bool {
        self.byte_size.load(Ordering::SeqCst) == 0
    }

    /// Current approximate byte size.
    pub fn byte_size(&self) -> u64 {
        self.byte_size.load(Ordering::SeqCst)
    }
}

// ------------------------------------------------------------------------------------------------
// MemTable Iterator
// ------------------------------------------------------------------------------------------------

/// Pointer cursor over a memtable range snapshot.
pub struct MemTableIterator {
    entries: std::vec::IntoIter<Entry>,
    current: Option<Entry>,
    priority: u32,
}

impl MemTableIterator {
    fn new(entries: Vec<Entry>, priority: u32) -> Self {
        let mut entries = entries.into_iter();
        let current = entries.next();
        Self {
            entries,
            current,
            priority,
        }
    }
}

impl PointerIterator for MemTableIterator {
    fn priority(&self) -> u32 {
        self.priority
    }

    fn has_next(&self) -> bool {
        self.current.is_some()
    }

    fn peek_key(&self) -> &[u8] {
        &self
            .current
            .as_ref()
            .expect("peek_key on exhausted iterator")
            .key
    }

    fn on_tombstone(&self) -> bool {
        self.current
            .as_ref()
            .expect("on_tombstone on exhausted iterator")
            .is_tombstone()
    }

    fn shift(&mut self) -> Result<(), SsTableError> {
        self.current
            .take()
            .expect("shift on exhausted iterator");
        self.current = self.entries.next();
        Ok(())
    }

    fn next_entry(&mut self) -> Result<Entry, SsTableError> {
        let entry = self
            .current
            .take()
            .expect("next on exhausted iterator");
        self.current = self.entries.next();
        Ok(entry)
    }
}
