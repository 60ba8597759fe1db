//! # Store — the LSM coordinator
//!
//! Owns the active and flushing memtables and the list of loaded
//! SSTables, and schedules at most one background flush and one
//! background compaction at a time through a single worker thread.
//!
//! ## Write path
//!
//! `upsert` takes the writer-shared lock and inserts into the active
//! memtable. When the insert reports overflow, the exclusive lock is
//! taken briefly to promote the active memtable into the (empty)
//! flushing slot and install a fresh one; a flush task is then
//! dispatched. While a flush is still running, further overflow is
//! tolerated on the upsert path (back-pressure eventually surfaces as
//! `OutOfMemory` from the refilled memtable), but an explicit `flush()`
//! fails with `TooManyFlushes`.
//!
//! ## Flush state machine
//!
//! - **IDLE** — the flushing slot holds an empty sentinel memtable.
//! - **PREPARED** — the previously-active memtable sits in the slot; a
//!   fresh one accepts writes.
//! - **WRITING** — the background task serializes the slot to a new
//!   SSTable and reloads the table list.
//! - back to **IDLE** — the slot is reset to an empty sentinel.
//!
//! The sentinel removes a null check on the read path at the cost of
//! one extra (empty) iterator in the merge.
//!
//! ## Read path
//!
//! `get` consults active → flushing → tables newest-first; the first
//! layer holding the key wins, and a tombstone there reports absence.
//! `scan` builds a tombstone-filtered merge over all layers with the
//! priorities active > flushing > tables (newest first). Readers
//! observe a consistent table list through an atomically-replaced
//! snapshot (`Arc` swap under a short lock).
//!
//! ## Close
//!
//! `close` is idempotent: it shuts the executor down (draining queued
//! tasks), awaits the in-flight flush/compaction handles — re-throwing
//! their stored failures — and synchronously persists the active
//! memtable as one final SSTable when non-empty.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Submodules
// ------------------------------------------------------------------------------------------------

mod executor;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::fs;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::entry::Entry;
use crate::memtable::{MemTable, MemTableError};
use crate::merge::{MergeIterator, PointerIterator, TombstoneFilteringIterator};
use crate::sstable::{self, SsTable, SsTableError};

use executor::{Executor, Job, TaskHandle};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Priority reduction of the active memtable's iterator.
const ACTIVE_PRIORITY_REDUCTION: u32 = 0;

/// Priority reduction of the flushing memtable's iterator.
const FLUSHING_PRIORITY_REDUCTION: u32 = 1;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The active memtable is at its threshold and no flush slot is
    /// available; retry after the in-flight flush completes.
    #[error("memtable is full and the flush slot is busy")]
    OutOfMemory,

    /// Explicit `flush()` while a previous flush is still in progress.
    #[error("a flush is already in progress")]
    TooManyFlushes,

    /// Underlying filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Error originating from the SSTable subsystem.
    #[error("SSTable error: {0}")]
    SsTable(#[from] SsTableError),

    /// A background flush failed; surfaced when the handle is awaited.
    #[error("background flush failed: {0}")]
    Flush(String),

    /// A background compaction failed; surfaced when the handle is awaited.
    #[error("background compaction failed: {0}")]
    Compaction(String),

    /// The store could not be opened.
    #[error("store could not be opened: {0}")]
    Creation(String),

    /// Operation on a closed store.
    #[error("store is closed")]
    Closed,

    /// Internal invariant violation (poisoned lock, unexpected state).
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<MemTableError> for StoreError {
    fn from(e: MemTableError) -> Self {
        match e {
            MemTableError::OutOfMemory => StoreError::OutOfMemory,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Store state
// ------------------------------------------------------------------------------------------------

/// The two memtable slots, swapped under the writer-exclusive lock.
struct MemTableSlots {
    active: Arc<MemTable>,
    flushing: Arc<MemTable>,
}

struct StoreInner {
    config: Config,

    /// Writer discipline: upserts hold the shared side, the memtable
    /// swap holds the exclusive side.
    memtables: RwLock<MemTableSlots>,

    /// Loaded tables, ascending by generation. The whole list is
    /// replaced atomically so readers never see a partial install.
    tables: RwLock<Arc<Vec<Arc<SsTable>>>>,

    executor: Executor,

    /// Handle of the in-flight (or most recent) background flush.
    flush_task: Mutex<Option<Arc<TaskHandle>>>,

    /// Handle of the in-flight (or most recent) background compaction.
    compaction_task: Mutex<Option<Arc<TaskHandle>>>,

    closed: AtomicBool,
}

/// Snapshot of store statistics returned by [`Store::stats`].
pub struct StoreStats {
    /// Number of SSTables on disk.
    pub table_count: usize,
    /// Sum of all SSTable data + index sizes in bytes.
    pub total_table_bytes: u64,
    /// Approximate byte size of the active memtable.
    pub active_memtable_bytes: u64,
    /// Approximate byte size of the flushing memtable.
    pub flushing_memtable_bytes: u64,
}

/// The embedded LSM key-value store.
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// Opens (or creates) a store rooted at `config.storage_dir`.
    ///
    /// Existing complete SSTable triples are loaded; `.tmp` leftovers
    /// from an interrupted write are ignored.
    pub fn open(config: Config) -> Result<Self, StoreError> {
        config.validate().map_err(StoreError::Creation)?;
        fs::create_dir_all(&config.storage_dir).map_err(|e| {
            StoreError::Creation(format!(
                "cannot create {}: {e}",
                config.storage_dir.display()
            ))
        })?;

        let tables = sstable::load(&config.storage_dir)
            .map_err(|e| StoreError::Creation(format!("cannot load SSTables: {e}")))?;
        info!(
            dir = %config.storage_dir.display(),
            tables = tables.len(),
            "opening store"
        );

        let executor = Executor::start()?;
        let active = Arc::new(MemTable::new(Some(config.flush_threshold_bytes)));

        Ok(Self {
            inner: Arc::new(StoreInner {
                memtables: RwLock::new(MemTableSlots {
                    active,
                    flushing: Arc::new(MemTable::unbounded()),
                }),
                tables: RwLock::new(Arc::new(tables)),
                executor,
                flush_task: Mutex::new(None),
                compaction_task: Mutex::new(None),
                closed: AtomicBool::new(false),
                config,
            }),
        })
    }

    /// Inserts, replaces, or deletes a key (`Entry::tombstone`).
    ///
    /// When the insert fills the active memtable, the memtables are
    /// swapped and a background flush is scheduled before returning.
    pub fn upsert(&self, entry: Entry) -> Result<(), StoreError> {
        self.ensure_open()?;
        let overflowed = {
            let slots = self
                .inner
                .memtables
                .read()
                .map_err(|_| StoreError::Internal("memtable lock poisoned".into()))?;
            slots.active.upsert(entry)?
        };
        if !overflowed {
            return Ok(());
        }
        self.try_flush(true)
    }

    /// Looks up a single key.
    ///
    /// Returns `Ok(Some(value))` when the key exists, `Ok(None)` when it
    /// was never written or its latest version is a tombstone. Lookup
    /// order: active memtable → flushing memtable → SSTables newest
    /// first; the first layer holding the key is authoritative.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.ensure_open()?;
        let (active, flushing) = self.memtable_snapshot()?;

        if let Some(entry) = active.get(key) {
            return Ok(entry.value);
        }
        if let Some(entry) = flushing.get(key) {
            return Ok(entry.value);
        }

        let tables = self.table_snapshot()?;
        for table in tables.iter().rev() {
            if let Some(entry) = table.get(key)? {
                return Ok(entry.value);
            }
        }
        Ok(None)
    }

    /// Ascending scan of live entries in `[from, to)`; absent bounds
    /// are unbounded. Tombstones are filtered out.
    pub fn scan(&self, from: Option<&[u8]>, to: Option<&[u8]>) -> Result<Scan, StoreError> {
        self.ensure_open()?;
        let (active, flushing) = self.memtable_snapshot()?;
        let tables = self.table_snapshot()?;

        let mut sources: Vec<Box<dyn PointerIterator>> = Vec::with_capacity(tables.len() + 2);
        for iterator in sstable::table_iterators(&tables, from, to)? {
            sources.push(Box::new(iterator));
        }
        sources.push(Box::new(flushing.iterator(
            from,
            to,
            FLUSHING_PRIORITY_REDUCTION,
        )));
        sources.push(Box::new(active.iterator(
            from,
            to,
            ACTIVE_PRIORITY_REDUCTION,
        )));

        Ok(Scan {
            inner: TombstoneFilteringIterator::new(MergeIterator::new(sources)),
        })
    }

    /// Schedules a flush of the active memtable.
    ///
    /// Fails with [`StoreError::TooManyFlushes`] when a previous flush
    /// is still in progress.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.try_flush(false)
    }

    /// Schedules a compaction merging all SSTables into one, dropping
    /// tombstones and superseded versions. A no-op when the table set
    /// is already compacted.
    pub fn compact(&self) -> Result<(), StoreError> {
        self.ensure_open()?;
        let tables = self.table_snapshot()?;
        if sstable::is_compacted(&tables) {
            debug!("table set already compacted");
            return Ok(());
        }

        let handle = TaskHandle::new();
        let inner = Arc::clone(&self.inner);
        let job = Job {
            name: "compaction",
            handle: Arc::clone(&handle),
            run: Box::new(move || run_compaction(&inner)),
        };
        *self
            .inner
            .compaction_task
            .lock()
            .map_err(|_| StoreError::Internal("compaction handle lock poisoned".into()))? =
            Some(handle);
        self.inner.executor.submit(job)
    }

    /// Returns a snapshot of store statistics.
    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        self.ensure_open()?;
        let (active, flushing) = self.memtable_snapshot()?;
        let tables = self.table_snapshot()?;
        Ok(StoreStats {
            table_count: tables.len(),
            total_table_bytes: tables.iter().map(|t| t.disk_size()).sum(),
            active_memtable_bytes: active.byte_size(),
            flushing_memtable_bytes: flushing.byte_size(),
        })
    }

    /// Gracefully shuts the store down. Idempotent.
    ///
    /// Queued background tasks drain, in-flight failures resurface as
    /// [`StoreError::Flush`] / [`StoreError::Compaction`], and the
    /// active memtable is persisted as one final SSTable when
    /// non-empty.
    pub fn close(&self) -> Result<(), StoreError> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(()); // already closed
        }
        info!("closing store");

        // 1. Stop the worker; queued flush/compaction jobs still run.
        self.inner.executor.shutdown();

        // 2. Collect background failures, but persist before reporting.
        let flush_result = take_handle(&self.inner.flush_task)
            .map_or(Ok(()), |handle| handle.wait())
            .map_err(|e| StoreError::Flush(e.to_string()));
        let compaction_result = take_handle(&self.inner.compaction_task)
            .map_or(Ok(()), |handle| handle.wait())
            .map_err(|e| StoreError::Compaction(e.to_string()));

        // 3. Persist the remaining in-memory state.
        let active = {
            let slots = self
                .inner
                .memtables
                .read()
                .map_err(|_| StoreError::Internal("memtable lock poisoned".into()))?;
            Arc::clone(&slots.active)
        };
        if !active.is_empty() {
            let generation = next_generation(&self.table_snapshot()?);
            debug!(generation, bytes = active.byte_size(), "persisting active memtable on close");
            sstable::write_table(
                &self.inner.config.storage_dir,
                generation,
                &self.inner.config.compression,
                active.flush_entries().into_iter().map(Ok),
            )?;
        }

        flush_result?;
        compaction_result?;
        info!("store closed");
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Internals
    // --------------------------------------------------------------------------------------------

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn memtable_snapshot(&self) -> Result<(Arc<MemTable>, Arc<MemTable>), StoreError> {
        let slots = self
            .inner
            .memtables
            .read()
            .map_err(|_| StoreError::Internal("memtable lock poisoned".into()))?;
        Ok((Arc::clone(&slots.active), Arc::clone(&slots.flushing)))
    }

    fn table_snapshot(&self) -> Result<Arc<Vec<Arc<SsTable>>>, StoreError> {
        let tables = self
            .inner
            .tables
            .read()
            .map_err(|_| StoreError::Internal("table list lock poisoned".into()))?;
        Ok(Arc::clone(&tables))
    }

    /// Promotes the active memtable into the flushing slot and submits
    /// the flush task. When the slot is busy, the overflow path returns
    /// quietly and the explicit path fails with `TooManyFlushes`.
    fn try_flush(&self, tolerate_busy_slot: bool) -> Result<(), StoreError> {
        {
            let mut slots = self
                .inner
                .memtables
                .write()
                .map_err(|_| StoreError::Internal("memtable lock poisoned".into()))?;
            if slots.flushing.is_empty() {
                let fresh = Arc::new(MemTable::new(Some(
                    self.inner.config.flush_threshold_bytes,
                )));
                slots.flushing = std::mem::replace(&mut slots.active, fresh);
            } else if tolerate_busy_slot {
                return Ok(());
            } else {
                return Err(StoreError::TooManyFlushes);
            }
        }

        let handle = TaskHandle::new();
        let inner = Arc::clone(&self.inner);
        let job = Job {
            name: "flush",
            handle: Arc::clone(&handle),
            run: Box::new(move || run_flush(&inner)),
        };
        *self
            .inner
            .flush_task
            .lock()
            .map_err(|_| StoreError::Internal("flush handle lock poisoned".into()))? = Some(handle);
        self.inner.executor.submit(job)
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if !self.inner.closed.load(Ordering::SeqCst) {
            if let Err(e) = self.close() {
                warn!(error = %e, "error while closing store on drop");
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Background tasks
// ------------------------------------------------------------------------------------------------

/// Serializes the flushing memtable to the next generation, installs
/// the reloaded table list, and resets the flushing slot to the empty
/// sentinel.
fn run_flush(inner: &StoreInner) -> Result<(), StoreError> {
    let flushing = {
        let slots = inner
            .memtables
            .read()
            .map_err(|_| StoreError::Internal("memtable lock poisoned".into()))?;
        Arc::clone(&slots.flushing)
    };

    if !flushing.is_empty() {
        let generation = {
            let tables = inner
                .tables
                .read()
                .map_err(|_| StoreError::Internal("table list lock poisoned".into()))?;
            next_generation(&tables)
        };
        debug!(generation, bytes = flushing.byte_size(), "flushing memtable");
        sstable::write_table(
            &inner.config.storage_dir,
            generation,
            &inner.config.compression,
            flushing.flush_entries().into_iter().map(Ok),
        )?;

        let reloaded = sstable::load(&inner.config.storage_dir)?;
        *inner
            .tables
            .write()
            .map_err(|_| StoreError::Internal("table list lock poisoned".into()))? =
            Arc::new(reloaded);
        info!(generation, "flush complete");
    }

    let mut slots = inner
        .memtables
        .write()
        .map_err(|_| StoreError::Internal("memtable lock poisoned".into()))?;
    slots.flushing = Arc::new(MemTable::unbounded());
    Ok(())
}

/// Merges all current tables — dropping tombstones — into the next
/// generation, deletes the superseded triples, and installs the
/// reloaded table list.
fn run_compaction(inner: &StoreInner) -> Result<(), StoreError> {
    let tables = {
        let guard = inner
            .tables
            .read()
            .map_err(|_| StoreError::Internal("table list lock poisoned".into()))?;
        Arc::clone(&guard)
    };
    if sstable::is_compacted(&tables) {
        return Ok(());
    }

    let generation = next_generation(&tables);
    info!(generation, input_tables = tables.len(), "compacting SSTables");

    let mut sources: Vec<Box<dyn PointerIterator>> = Vec::with_capacity(tables.len());
    for iterator in sstable::table_iterators(&tables, None, None)? {
        sources.push(Box::new(iterator));
    }
    let merged = TombstoneFilteringIterator::new(MergeIterator::new(sources));
    sstable::write_table(
        &inner.config.storage_dir,
        generation,
        &inner.config.compression,
        merged,
    )?;

    for table in tables.iter() {
        sstable::remove_table_files(&inner.config.storage_dir, table.generation());
    }
    let reloaded = sstable::load(&inner.config.storage_dir)?;
    *inner
        .tables
        .write()
        .map_err(|_| StoreError::Internal("table list lock poisoned".into()))? = Arc::new(reloaded);
    info!(generation, "compaction complete");
    Ok(())
}

fn next_generation(tables: &[Arc<SsTable>]) -> u64 {
    tables.last().map_or(0, |table| table.generation() + 1)
}

fn take_handle(slot: &Mutex<Option<Arc<TaskHandle>>>) -> Option<Arc<TaskHandle>> {
    slot.lock().ok().and_then(|mut guard| guard.take())
}

// ------------------------------------------------------------------------------------------------
// Scan iterator
// ------------------------------------------------------------------------------------------------

/// Ascending iterator of live entries returned by [`Store::scan`].
pub struct Scan {
    inner: TombstoneFilteringIterator,
}

impl Iterator for Scan {
    type Item = Result<Entry, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|item| item.map_err(StoreError::from))
    }
}
