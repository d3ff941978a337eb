use std::path::PathBuf;

use thiserror::Error;

use super::types::{FileId, FrameId, Iid, PageId, Rid};

/// Crate-wide error type
#[derive(Error, Debug)]
pub enum OxbaseError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file already exists: {0}")]
    FileExists(PathBuf),

    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("file is in use: {0}")]
    FileInUse(PathBuf),

    #[error("no open file with handle {0}")]
    FileNotOpen(FileId),

    #[error("page {0} does not exist")]
    PageNotExist(PageId),

    #[error("record {0} does not exist")]
    RecordNotFound(Rid),

    #[error("record size mismatch: expected {expected} bytes, got {actual}")]
    RecordSizeMismatch { expected: usize, actual: usize },

    #[error("record size {0} does not fit in a page")]
    InvalidRecordSize(usize),

    #[error("key size mismatch: expected {expected} bytes, got {actual}")]
    KeySizeMismatch { expected: usize, actual: usize },

    #[error("index order {0} is out of range for the page size")]
    InvalidIndexOrder(usize),

    #[error("buffer pool has no evictable frame")]
    NoFreeFrame,

    #[error("page {0} is still pinned")]
    PageStillPinned(PageId),

    #[error("index entry not found at {0}")]
    IndexEntryNotFound(Iid),

    #[error("frame {frame} is outside replacer capacity {capacity}")]
    ReplacerOverflow { frame: FrameId, capacity: usize },

    #[error("disk scheduler unavailable: {0}")]
    Scheduler(String),

    #[error("corrupted file state: {0}")]
    Corrupted(String),
}

pub type Result<T> = std::result::Result<T, OxbaseError>;
