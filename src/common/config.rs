use super::types::PageNo;

/// Size of a page in bytes (4 KB)
pub const PAGE_SIZE: usize = 4096;

/// Invalid page number constant. Stored on disk it is bit-identical to a
/// two's-complement -1, which is how header fields mark "no page".
pub const INVALID_PAGE_NO: PageNo = PageNo::MAX;

/// Invalid slot number, used where a `Rid` carries a child pointer and the
/// slot field is meaningless.
pub const INVALID_SLOT_NO: u32 = u32::MAX;

/// Default buffer pool size (number of frames)
pub const DEFAULT_BUFFER_POOL_SIZE: usize = 64;

/// Default name of the append-only log file
pub const LOG_FILE_NAME: &str = "oxbase.log";

/// First data page of a record file (page 0 is the file header)
pub const RECORD_FIRST_PAGE: PageNo = 1;
