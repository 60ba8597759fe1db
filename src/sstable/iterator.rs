//! SSTable range cursor.
//!
//! [`SsTableIterator`] walks one table's index slots in order, exposing
//! the [`PointerIterator`](crate::merge::PointerIterator) contract: the
//! current key and tombstone flag are available without touching the
//! value, so the merge can discard losing candidates without paying for
//! value decompression. `shift` skips the value entirely; `next_entry`
//! reads it from the recorded position.
//!
//! The iterator owns an `Arc` of its table (the mapping stays valid even
//! if compaction deletes the files mid-scan) and caches the most
//! recently decompressed block, so sequential scans decompress each
//! block once.

use std::sync::Arc;

use crate::entry::Entry;
use crate::merge::PointerIterator;

use super::{BlockCache, Position, SsTable, SsTableError};

/// Decoded header of the cursor's current entry; the value is read
/// lazily from `value_position`.
struct CurrentEntry {
    key: Vec<u8>,
    value_size: i64,
    value_position: Position,
}

/// Forward cursor over the entries of one table within `[from, to)`.
pub struct SsTableIterator {
    table: Arc<SsTable>,
    priority: u32,
    /// Index slot the cursor will decode next.
    next_slot: u64,
    to: Option<Vec<u8>>,
    current: Option<CurrentEntry>,
    cache: BlockCache,
}

impl SsTableIterator {
    /// Positions a cursor at the first slot with key ≥ `from` (slot 0
    /// when absent). The cursor is exhausted once the current key is
    /// ≥ `to` (end of table when absent).
    pub(crate) fn new(
        table: Arc<SsTable>,
        from: Option<&[u8]>,
        to: Option<&[u8]>,
        priority: u32,
    ) -> Result<Self, SsTableError> {
        let start = match from {
            Some(key) => table.lower_bound(key)?,
            None => 0,
        };
        let mut iterator = Self {
            table,
            priority,
            next_slot: start,
            to: to.map(|bound| bound.to_vec()),
            current: None,
            cache: BlockCache::new(),
        };
        iterator.advance()?;
        Ok(iterator)
    }

    /// Decodes the header of the next slot, honoring the upper bound.
    fn advance(&mut self) -> Result<(), SsTableError> {
        if self.next_slot >= self.table.entry_count() {
            self.current = None;
            return Ok(());
        }

        let mut position = self.table.entry_position(self.next_slot);
        let key_size = self
            .table
            .read_u64_field(&mut position, &mut self.cache)? as usize;
        let key = self
            .table
            .read_field(&mut position, key_size, &mut self.cache)?;
        if let Some(to) = &self.to {
            if key.as_slice() >= to.as_slice() {
                self.current = None;
                return Ok(());
            }
        }
        let value_size = self.table.read_i64_field(&mut position, &mut self.cache)?;

        self.current = Some(CurrentEntry {
            key,
            value_size,
            value_position: position,
        });
        self.next_slot += 1;
        Ok(())
    }
}

impl PointerIterator for SsTableIterator {
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
            .value_size
            < 0
    }

    fn shift(&mut self) -> Result<(), SsTableError> {
        self.current
            .take()
            .expect("shift on exhausted iterator");
        self.advance()
    }

    fn next_entry(&mut self) -> Result<Entry, SsTableError> {
        let current = self
            .current
            .take()
            .expect("next on exhausted iterator");
        let value = if current.value_size < 0 {
            None
        } else {
            let mut position = current.value_position;
            Some(self.table.read_field(
                &mut position,
                current.value_size as usize,
                &mut self.cache,
            )?)
        };
        let entry = Entry {
            key: current.key,
            value,
        };
        self.advance()?;
        Ok(entry)
    }
}
