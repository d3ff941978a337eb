use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::buffer::BufferPoolManager;
use crate::common::{OxbaseError, Result, INVALID_PAGE_NO, PAGE_SIZE};
use crate::storage::DiskManager;

use super::btree_node::IndexFileHeader;
use super::BTreeIndex;

/// Creates, opens, closes, and destroys B+tree index files.
pub struct IndexManager {
    disk: Arc<DiskManager>,
    bpm: Arc<BufferPoolManager>,
}

impl IndexManager {
    pub fn new(disk: Arc<DiskManager>, bpm: Arc<BufferPoolManager>) -> Self {
        Self { disk, bpm }
    }

    /// Creates an index over keys of `col_len` bytes, sized to the largest
    /// order that fits in a page.
    pub fn create_index<P: AsRef<Path>>(&self, path: P, col_len: usize) -> Result<()> {
        self.create_index_with_order(path, col_len, IndexFileHeader::max_order(col_len))
    }

    /// Creates an index with an explicit node order. Small orders exercise
    /// split and merge paths with few keys.
    pub fn create_index_with_order<P: AsRef<Path>>(
        &self,
        path: P,
        col_len: usize,
        order: usize,
    ) -> Result<()> {
        if col_len == 0 || order < 3 || order > IndexFileHeader::max_order(col_len) {
            return Err(OxbaseError::InvalidIndexOrder(order));
        }

        self.disk.create_file(&path)?;
        let fd = self.disk.open_file(&path)?;

        let hdr = IndexFileHeader {
            col_len: col_len as u32,
            btree_order: order as u32,
            num_pages: 1,
            root_page: INVALID_PAGE_NO,
            first_leaf: INVALID_PAGE_NO,
            last_leaf: INVALID_PAGE_NO,
        };
        let mut buf = [0u8; IndexFileHeader::SIZE];
        hdr.encode(&mut buf);
        self.disk.write_page(fd, 0, &buf)?;
        self.disk.close_file(fd)?;

        debug!(path = %path.as_ref().display(), col_len, order, "created index file");
        Ok(())
    }

    /// Opens an index and restores the page allocation counter from its
    /// header.
    pub fn open_index<P: AsRef<Path>>(&self, path: P) -> Result<BTreeIndex> {
        let fd = self.disk.open_file(&path)?;
        let mut buf = [0u8; IndexFileHeader::SIZE];
        self.disk.read_page(fd, 0, &mut buf)?;
        let hdr = IndexFileHeader::decode(&buf);
        // Deallocated node pages shrink num_pages without shrinking the
        // file, so the allocation high-water mark is the file size.
        let high_water = (self.disk.file_size(&path)? / PAGE_SIZE as u64) as u32;
        self.disk.set_page_counter(fd, hdr.num_pages.max(high_water))?;
        Ok(BTreeIndex::new(fd, Arc::clone(&self.bpm), hdr))
    }

    /// Flushes the index's pages, writes the header back to page 0, and
    /// closes the file.
    pub fn close_index(&self, index: BTreeIndex) -> Result<()> {
        self.bpm.flush_all_pages(index.fd())?;
        index.write_header_page(&self.disk)?;
        self.disk.close_file(index.fd())
    }

    /// Removes an index file from disk. Fails while the file is open.
    pub fn destroy_index<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.disk.destroy_file(path)
    }
}
