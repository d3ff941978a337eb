//! Oxbase - the storage core of a single-node relational engine
//!
//! Fixed-size pages live on disk, a bounded buffer pool caches them in
//! memory, and the record and index layers address data exclusively through
//! `(file, page_no, slot_no)` coordinates.
//!
//! # Architecture
//!
//! - **Storage** (`storage`): raw page I/O
//!   - `DiskManager`: multi-file page I/O, per-file page allocation, and
//!     the append-only log
//!   - `DiskScheduler`: background I/O worker with a synchronous facade
//!
//! - **Buffer pool** (`buffer`): memory management for pages
//!   - `BufferPoolManager`: caches pages in frames, hands out pinned guards
//!   - `Replacer`: eviction policy, with `LruReplacer` and `ClockReplacer`
//!   - `ReadPageGuard`/`WritePageGuard`: RAII pin + page-byte access
//!
//! - **Records** (`record`): fixed-size records in bitmap-tracked slots,
//!   non-full pages threaded on a per-file free list
//!
//! - **Index** (`index`): a clustered-order B+tree over fixed-length
//!   bytewise-compared keys, with a doubly linked leaf layer for range scans
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use oxbase::buffer::{BufferPoolManager, ReplacerKind};
//! use oxbase::record::RecordManager;
//! use oxbase::storage::DiskManager;
//!
//! fn main() -> oxbase::Result<()> {
//!     let disk = Arc::new(DiskManager::new());
//!     let bpm = Arc::new(BufferPoolManager::new(64, ReplacerKind::Lru, disk.clone()));
//!     let rm = RecordManager::new(disk, bpm);
//!
//!     rm.create_file("table.db", 16)?;
//!     let fh = rm.open_file("table.db")?;
//!     let rid = fh.insert_record(&[7u8; 16])?;
//!     assert_eq!(fh.get_record(rid)?, vec![7u8; 16]);
//!     rm.close_file(fh)?;
//!     Ok(())
//! }
//! ```

pub mod buffer;
pub mod common;
pub mod index;
pub mod record;
pub mod storage;

// Re-export commonly used types at the crate root
pub use common::{FileId, Iid, OxbaseError, PageId, PageNo, Result, Rid};
