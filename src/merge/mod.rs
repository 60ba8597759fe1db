//! N-way merge over heterogeneous entry sources.
//!
//! ## Design Invariants
//!
//! - Every source ([`PointerIterator`]) yields keys in strictly ascending
//!   order and carries an integer priority; larger priority wins on key
//!   ties. The active memtable has the highest priority, the flushing
//!   memtable the next, then SSTables in ascending list position.
//! - [`MergeIterator`] produces a deduplicated ascending stream: for each
//!   key, the entry of the highest-priority source holding that key.
//!   Lower-priority duplicates are shifted past without materializing
//!   their values.
//! - [`TombstoneFilteringIterator`] additionally suppresses tombstones.
//!   It serves user-facing range scans and compaction output — compaction
//!   subsumes all tables, so no older layer survives to be shadowed.
//!
//! ## Failure Semantics
//!
//! Calling `next_entry`/`shift`/`on_tombstone` on an exhausted iterator is
//! a precondition violation and panics. I/O errors surfaced by a leaf
//! iterator (block decompression, corrupted entry stream) propagate as
//! `Err` from `shift`/`next_entry`.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------


// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::entry::Entry;
use crate::sstable::SsTableError;

// ------------------------------------------------------------------------------------------------
// PointerIterator
// ------------------------------------------------------------------------------------------------

/// A stateful cursor positioned on an entry, or exhausted.
///
/// The cursor exposes its current key and tombstone flag without
/// materializing the value, so the merge can discard losing candidates
/// cheaply. `shift` advances past the current entry without reading its
/// value; `next_entry` materializes the value and advances.
pub trait PointerIterator: Send {
    /// Tie-break priority; larger wins when two sources share a key.
    fn priority(&self) -> u32;

    /// Whether the cursor is positioned on an entry.
    fn has_next(&self) -> bool;

    /// The current entry's key.
    ///
    /// # Panics
    /// Panics if the iterator is exhausted.
    fn peek_key(&self) -> &[u8];

    /// Whether the current entry is a deletion marker.
    ///
    /// # Panics
    /// Panics if the iterator is exhausted.
    fn on_tombstone(&self) -> bool;

    /// Advances past the current entry without materializing its value.
    ///
    /// # Panics
    /// Panics if the iterator is exhausted.
    fn shift(&mut self) -> Result<(), SsTableError>;

    /// Materializes the current entry and advances.
    ///
    /// # Panics
    /// Panics if the iterator is exhausted.
    fn next_entry(&mut self) -> Result<Entry, SsTableError>;

    /// Compares the current keys of two cursors.
    fn compare_by_key(&self, other: &dyn PointerIterator) -> Ordering {
        self.peek_key().cmp(other.peek_key())
    }
}

// ------------------------------------------------------------------------------------------------
// MergeIterator
// ------------------------------------------------------------------------------------------------

/// Heap wrapper ordering sources by (key ASC, priority DESC).
///
/// `BinaryHeap` is a max-heap, so the key comparison is inverted: the
/// "greatest" element is the one with the smallest current key, and on
/// ties the one with the larger priority. The authoritative version of
/// every key therefore sits at the heap head.
struct HeapSource(Box<dyn PointerIterator>);

impl PartialEq for HeapSource {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapSource {}

impl PartialOrd for HeapSource {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapSource {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .0
            .peek_key()
            .cmp(self.0.peek_key())
            .then_with(|| self.0.priority().cmp(&other.0.priority()))
    }
}

/// Priority-queue merge of [`PointerIterator`]s into a deduplicated
/// ascending entry stream.
pub struct MergeIterator {
    heap: BinaryHeap<HeapSource>,
}

impl MergeIterator {
    /// Builds a merge over the given sources. Exhausted sources are
    /// dropped up front.
    pub fn new(sources: Vec<Box<dyn PointerIterator>>) -> Self {
        let heap = sources
            .into_iter()
            .filter(|source| source.has_next())
            .map(HeapSource)
            .collect();
        Self { heap }
    }

    /// Whether another entry can be produced.
    pub fn has_next(&self) -> bool {
        !self.heap.is_empty()
    }

    /// Whether the next entry to be produced is a deletion marker.
    ///
    /// # Panics
    /// Panics if the merge is exhausted.
    pub fn on_tombstone(&self) -> bool {
        self.heap
            .peek()
            .expect("on_tombstone on exhausted merge iterator")
            .0
            .on_tombstone()
    }

    /// Pops the head source and shifts every lower-priority source
    /// sharing its key past that key, reinserting the survivors.
    fn pop_head(&mut self) -> Result<HeapSource, SsTableError> {
        let head = self
            .heap
            .pop()
            .expect("next on exhausted merge iterator");
        loop {
            let duplicate = match self.heap.peek() {
                Some(top) => top.0.peek_key() == head.0.peek_key(),
                None => false,
            };
            if !duplicate {
                break;
            }
            let Some(mut next) = self.heap.pop() else {
                break;
            };
            next.0.shift()?;
            if next.0.has_next() {
                self.heap.push(next);
            }
        }
        Ok(head)
    }

    /// Advances past the next entry without materializing its value.
    ///
    /// # Panics
    /// Panics if the merge is exhausted.
    pub fn shift(&mut self) -> Result<(), SsTableError> {
        let mut head = self.pop_head()?;
        head.0.shift()?;
        if head.0.has_next() {
            self.heap.push(head);
        }
        Ok(())
    }

    /// Materializes and returns the next entry.
    ///
    /// # Panics
    /// Panics if the merge is exhausted.
    pub fn next_entry(&mut self) -> Result<Entry, SsTableError> {
        let mut head = self.pop_head()?;
        let entry = head.0.next_entry()?;
        if head.0.has_next() {
            self.heap.push(head);
        }
        Ok(entry)
    }
}

// ------------------------------------------------------------------------------------------------
// Tombstone filter
// ------------------------------------------------------------------------------------------------

/// Wraps a [`MergeIterator`], skipping keys whose authoritative version
/// is a tombstone.
pub struct TombstoneFilteringIterator {
    inner: MergeIterator,
    have_next: bool,
}

impl TombstoneFilteringIterator {
    pub fn new(inner: MergeIterator) -> Self {
        Self {
            inner,
            have_next: false,
        }
    }

    /// Advances the underlying merge past tombstones until a live entry
    /// is at the head, or the merge is exhausted.
    pub fn has_next(&mut self) -> Result<bool, SsTableError> {
        if self.have_next {
            return Ok(true);
        }
        while self.inner.has_next() {
            if !self.inner.on_tombstone() {
                self.have_next = true;
                return Ok(true);
            }
            self.inner.shift()?;
        }
        Ok(false)
    }

    /// Returns the next live entry.
    ///
    /// # Panics
    /// Panics if the iterator is exhausted.
    pub fn next_entry(&mut self) -> Result<Entry, SsTableError> {
        if !self.has_next()? {
            panic!("next on exhausted iterator");
        }
        self.have_next = false;
        self.inner.next_entry()
    }
}

impl Iterator for TombstoneFilteringIterator {
    type Item = Result<Entry, SsTableError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.has_next() {
            Ok(true) => {
                self.have_next = false;
                Some(self.inner.next_entry())
            }
            Ok(false) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
