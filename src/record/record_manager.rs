use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::buffer::BufferPoolManager;
use crate::common::{OxbaseError, Result, INVALID_PAGE_NO, PAGE_SIZE};
use crate::storage::DiskManager;

use super::record_page::{RecordFileHeader, RECORD_PAGE_HDR_SIZE};
use super::RecordFileHandle;

/// Creates, opens, closes, and destroys record files.
pub struct RecordManager {
    disk: Arc<DiskManager>,
    bpm: Arc<BufferPoolManager>,
}

impl RecordManager {
    pub fn new(disk: Arc<DiskManager>, bpm: Arc<BufferPoolManager>) -> Self {
        Self { disk, bpm }
    }

    /// Creates a record file for fixed-size records of `record_size` bytes
    /// and writes its header to page 0.
    pub fn create_file<P: AsRef<Path>>(&self, path: P, record_size: usize) -> Result<()> {
        let num_records_per_page = slots_per_page(record_size)
            .ok_or(OxbaseError::InvalidRecordSize(record_size))?;

        self.disk.create_file(&path)?;
        let fd = self.disk.open_file(&path)?;

        let hdr = RecordFileHeader {
            record_size: record_size as u32,
            num_records_per_page: num_records_per_page as u32,
            num_pages: 1,
            first_free_page_no: INVALID_PAGE_NO,
            bitmap_size: bitmap_size(num_records_per_page) as u32,
        };
        let mut buf = [0u8; RecordFileHeader::SIZE];
        hdr.encode(&mut buf);
        self.disk.write_page(fd, 0, &buf)?;
        self.disk.close_file(fd)?;

        debug!(path = %path.as_ref().display(), record_size, num_records_per_page, "created record file");
        Ok(())
    }

    /// Opens a record file and restores the page allocation counter from
    /// its header.
    pub fn open_file<P: AsRef<Path>>(&self, path: P) -> Result<RecordFileHandle> {
        let fd = self.disk.open_file(&path)?;
        let mut buf = [0u8; RecordFileHeader::SIZE];
        self.disk.read_page(fd, 0, &mut buf)?;
        let hdr = RecordFileHeader::decode(&buf);
        self.disk.set_page_counter(fd, hdr.num_pages)?;
        Ok(RecordFileHandle::new(fd, Arc::clone(&self.bpm), hdr))
    }

    /// Flushes the file's pages, writes the header back to page 0, and
    /// closes the file. The handle is consumed; stale handles cannot touch
    /// a closed file.
    pub fn close_file(&self, fh: RecordFileHandle) -> Result<()> {
        self.bpm.flush_all_pages(fh.fd())?;
        fh.write_header_page(&self.disk)?;
        self.disk.close_file(fh.fd())
    }

    /// Removes a record file from disk. Fails while the file is open.
    pub fn destroy_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.disk.destroy_file(path)
    }
}

/// Largest slot count n such that header + bitmap + slots fit in one page:
/// `PAGE_HDR + ceil(n/8) + n*record_size <= PAGE_SIZE`.
fn slots_per_page(record_size: usize) -> Option<usize> {
    if record_size == 0 {
        return None;
    }
    let usable_bits = (PAGE_SIZE - RECORD_PAGE_HDR_SIZE) * 8;
    let mut n = usable_bits / (record_size * 8 + 1);
    while n > 0 && RECORD_PAGE_HDR_SIZE + bitmap_size(n) + n * record_size > PAGE_SIZE {
        n -= 1;
    }
    (n > 0).then_some(n)
}

fn bitmap_size(slots: usize) -> usize {
    (slots + 7) / 8
}
