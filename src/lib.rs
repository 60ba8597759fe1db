//! # StrataDB
//!
//! An embeddable, persistent key-value store built on a
//! **Log-Structured Merge Tree (LSM-tree)** architecture with
//! block-compressed on-disk tables.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                       Store                            │
//! │  ┌────────────┐  ┌──────────────┐  ┌───────────────┐   │
//! │  │  Active    │  │  Flushing    │  │   SSTables    │   │
//! │  │  Memtable  │  │  Memtable    │  │  (on disk)    │   │
//! │  └─────┬──────┘  └──────┬───────┘  └──────┬────────┘   │
//! │        │  swap on       │  background     │            │
//! │        │  overflow      │  flush          │            │
//! │        └────────►       └────────►        │            │
//! │                                           │            │
//! │  ┌────────────────────────────────────────┘            │
//! │  │  Compaction (all tables → one, tombstones dropped)  │
//! │  └─────────────────────────────────────────────────────┤
//! │                                                        │
//! │  single background worker serves both flush/compaction │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`store`] | Coordinator — open, read, write, flush, compact, close |
//! | [`memtable`] | In-memory ordered write buffer with overflow signalling |
//! | [`sstable`] | Immutable, sorted, on-disk tables (plain and block-compressed) |
//! | [`merge`] | N-way merge with priority deduplication and tombstone filtering |
//! | [`compress`] | Pluggable block compression (LZ4, identity) |
//!
//! ## Key Features
//!
//! - **Dual-memtable writes** — upserts land in the active memtable; on
//!   overflow it is swapped into the flushing slot and written to an
//!   SSTable in the background while a fresh memtable accepts writes.
//! - **Block-compressed tables** — the on-disk format supports an LZ4
//!   block layout in which entries may straddle block boundaries; random
//!   access decompresses at most the blocks an entry touches.
//! - **Tombstone deletes** — deletions are markers that shadow older
//!   layers; compaction merges every table into one and drops them.
//! - **Consistent reads during flushes** — readers merge the active
//!   memtable, the flushing memtable, and all tables newest-first, so a
//!   flush in progress never hides or duplicates data.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stratadb::{Compression, Config, Entry, Store};
//!
//! let config = Config {
//!     storage_dir: "/tmp/my_db".into(),
//!     flush_threshold_bytes: 4 * 1024 * 1024,
//!     compression: Compression::Lz4 { block_size: 64 * 1024 },
//! };
//!
//! let store = Store::open(config).unwrap();
//!
//! // Write
//! store.upsert(Entry::new(b"hello".to_vec(), b"world".to_vec())).unwrap();
//!
//! // Read
//! assert_eq!(store.get(b"hello").unwrap(), Some(b"world".to_vec()));
//!
//! // Delete
//! store.upsert(Entry::tombstone(b"hello".to_vec())).unwrap();
//! assert_eq!(store.get(b"hello").unwrap(), None);
//!
//! // Scan
//! for entry in store.scan(None, None).unwrap() {
//!     let entry = entry.unwrap();
//!     println!("{:?}", entry.key);
//! }
//!
//! // Graceful shutdown
//! store.close().unwrap();
//! ```

#![allow(dead_code)]

pub mod compress;
pub mod config;
pub mod entry;
pub mod memtable;
pub mod merge;
pub mod sstable;
pub mod store;

pub use config::{Compression, Config};
pub use entry::Entry;
pub use store::{Store, StoreError, StoreStats};
