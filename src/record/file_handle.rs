use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffer::{BufferPoolManager, ReadPageGuard, WritePageGuard};
use crate::common::{
    FileId, OxbaseError, PageId, PageNo, Result, Rid, INVALID_PAGE_NO, RECORD_FIRST_PAGE,
};

use super::bitmap;
use super::record_page::{RecordFileHeader, RecordPage, RecordPageRef};
use super::scan::RecordScan;

/// Handle to an open record file: fixed-size records in bitmap-tracked
/// slots, with non-full pages threaded on a free list through their page
/// headers.
///
/// The in-memory copy of the file header is the authority while the file is
/// open; [`RecordManager::close_file`] writes it back to page 0.
///
/// Operations serialize on the header mutex. Concurrent readers of distinct
/// pages still overlap inside the buffer pool; write serialization across
/// handles is the caller's business, as is transactional isolation.
///
/// [`RecordManager::close_file`]: super::RecordManager::close_file
pub struct RecordFileHandle {
    fd: FileId,
    bpm: Arc<BufferPoolManager>,
    hdr: Mutex<RecordFileHeader>,
}

impl RecordFileHandle {
    pub(crate) fn new(fd: FileId, bpm: Arc<BufferPoolManager>, hdr: RecordFileHeader) -> Self {
        Self {
            fd,
            bpm,
            hdr: Mutex::new(hdr),
        }
    }

    pub fn fd(&self) -> FileId {
        self.fd
    }

    /// Snapshot of the in-memory file header.
    pub fn header(&self) -> RecordFileHeader {
        *self.hdr.lock()
    }

    /// Copies out the record at `rid`.
    pub fn get_record(&self, rid: Rid) -> Result<Vec<u8>> {
        let hdr = self.hdr.lock();
        let guard = self.fetch_page_read(&hdr, rid.page_no)?;
        let page = RecordPageRef::new(guard.data(), &hdr);
        if !bitmap::test(page.bitmap(), rid.slot_no as usize) {
            return Err(OxbaseError::RecordNotFound(rid));
        }
        Ok(page.slot(rid.slot_no as usize).to_vec())
    }

    /// Inserts a record into the first free slot of the free-list head page
    /// and returns its new identity. `buf` must be exactly `record_size`
    /// bytes.
    pub fn insert_record(&self, buf: &[u8]) -> Result<Rid> {
        let mut hdr = self.hdr.lock();
        self.check_record_size(&hdr, buf)?;

        let (page_no, mut guard) = self.create_page_handle(&mut hdr)?;
        let mut page = RecordPage::new(guard.data_mut(), &hdr);

        let slot_no = bitmap::first_zero(page.bitmap(), hdr.num_records_per_page as usize)
            .ok_or_else(|| {
                OxbaseError::Corrupted(format!("free-list page {} has no free slot", page_no))
            })?;
        bitmap::set(page.bitmap_mut(), slot_no);
        page.slot_mut(slot_no).copy_from_slice(buf);

        let num_records = page.num_records() + 1;
        page.set_num_records(num_records);

        // A page that just filled up leaves the free list.
        if num_records == hdr.num_records_per_page {
            hdr.first_free_page_no = page.next_free_page_no_raw();
        }

        Ok(Rid::new(page_no, slot_no as u32))
    }

    /// Places a record at a caller-chosen position, materializing any
    /// missing pages first. Used by log replay, which re-applies inserts at
    /// their original rids.
    pub fn insert_record_at(&self, rid: Rid, buf: &[u8]) -> Result<()> {
        let mut hdr = self.hdr.lock();
        self.check_record_size(&hdr, buf)?;

        while rid.page_no >= hdr.num_pages {
            let (_, guard) = self.create_new_page(&mut hdr)?;
            drop(guard);
        }

        let mut guard = self.fetch_page_write(&hdr, rid.page_no)?;
        let mut page = RecordPage::new(guard.data_mut(), &hdr);

        if bitmap::test(page.bitmap(), rid.slot_no as usize) {
            // Replaying over an existing record: refresh the payload only.
            page.slot_mut(rid.slot_no as usize).copy_from_slice(buf);
            return Ok(());
        }

        bitmap::set(page.bitmap_mut(), rid.slot_no as usize);
        page.slot_mut(rid.slot_no as usize).copy_from_slice(buf);
        let num_records = page.num_records() + 1;
        page.set_num_records(num_records);

        if num_records == hdr.num_records_per_page {
            drop(page);
            drop(guard);
            self.unlink_free_page(&mut hdr, rid.page_no)?;
        }
        Ok(())
    }

    /// Deletes the record at `rid`, returning its page to the free list if
    /// the page was full.
    pub fn delete_record(&self, rid: Rid) -> Result<()> {
        let mut hdr = self.hdr.lock();
        let mut guard = self.fetch_page_write(&hdr, rid.page_no)?;
        let mut page = RecordPage::new(guard.data_mut(), &hdr);

        if !bitmap::test(page.bitmap(), rid.slot_no as usize) {
            return Err(OxbaseError::RecordNotFound(rid));
        }

        let was_full = page.is_full();
        bitmap::reset(page.bitmap_mut(), rid.slot_no as usize);
        page.set_num_records(page.num_records() - 1);

        if was_full {
            // Full -> not-full transition: push the page onto the free
            // list head by swapping the two links.
            let old_head = hdr.first_free_page_no;
            page.set_next_free_page_no_raw(old_head);
            hdr.first_free_page_no = rid.page_no;
        }
        Ok(())
    }

    /// Overwrites the record at `rid`. No header changes.
    pub fn update_record(&self, rid: Rid, buf: &[u8]) -> Result<()> {
        let hdr = self.hdr.lock();
        self.check_record_size(&hdr, buf)?;

        let mut guard = self.fetch_page_write(&hdr, rid.page_no)?;
        let mut page = RecordPage::new(guard.data_mut(), &hdr);
        if !bitmap::test(page.bitmap(), rid.slot_no as usize) {
            return Err(OxbaseError::RecordNotFound(rid));
        }
        page.slot_mut(rid.slot_no as usize).copy_from_slice(buf);
        Ok(())
    }

    /// Iterates every record in the file in `(page_no, slot_no)` order.
    pub fn scan(&self) -> Result<RecordScan<'_>> {
        RecordScan::new(self)
    }

    /// Fetches the free-list head, creating a fresh page when the list is
    /// empty. The returned page stays at the list head; the caller unlinks
    /// it if an insert fills it up.
    fn create_page_handle(
        &self,
        hdr: &mut RecordFileHeader,
    ) -> Result<(PageNo, WritePageGuard)> {
        if hdr.first_free_page_no == INVALID_PAGE_NO {
            self.create_new_page(hdr)
        } else {
            let page_no = hdr.first_free_page_no;
            Ok((page_no, self.fetch_page_write(hdr, page_no)?))
        }
    }

    /// Allocates and initializes a new record page and pushes it onto the
    /// free list.
    fn create_new_page(&self, hdr: &mut RecordFileHeader) -> Result<(PageNo, WritePageGuard)> {
        let mut guard = self.bpm.new_page(self.fd)?;
        let page_no = guard.page_id().page_no;
        let mut page = RecordPage::new(guard.data_mut(), hdr);
        page.init();
        page.set_next_free_page_no_raw(hdr.first_free_page_no);
        // Anchor to the allocated number: a failed allocation may have left
        // a gap, and page-number validity checks compare against num_pages.
        hdr.num_pages = page_no + 1;
        hdr.first_free_page_no = page_no;
        Ok((page_no, guard))
    }

    /// Removes `page_no` from the free list wherever it sits. Only the
    /// replay path needs the walk; regular inserts only ever fill the head.
    fn unlink_free_page(&self, hdr: &mut RecordFileHeader, page_no: PageNo) -> Result<()> {
        if hdr.first_free_page_no == page_no {
            let guard = self.fetch_page_read(hdr, page_no)?;
            hdr.first_free_page_no = RecordPageRef::new(guard.data(), hdr).next_free_page_no_raw();
            return Ok(());
        }
        let mut prev_no = hdr.first_free_page_no;
        while prev_no != INVALID_PAGE_NO {
            let next_no = {
                let guard = self.fetch_page_read(hdr, prev_no)?;
                RecordPageRef::new(guard.data(), hdr).next_free_page_no_raw()
            };
            if next_no == page_no {
                let target_next = {
                    let guard = self.fetch_page_read(hdr, page_no)?;
                    RecordPageRef::new(guard.data(), hdr).next_free_page_no_raw()
                };
                let mut guard = self.fetch_page_write(hdr, prev_no)?;
                let mut prev = RecordPage::new(guard.data_mut(), hdr);
                prev.set_next_free_page_no_raw(target_next);
                return Ok(());
            }
            prev_no = next_no;
        }
        Ok(())
    }

    /// Fetches a record page for shared read access against a header
    /// snapshot. Scans and integrity checks read pages through this.
    pub fn fetch_page_read(
        &self,
        hdr: &RecordFileHeader,
        page_no: PageNo,
    ) -> Result<ReadPageGuard> {
        self.check_page_no(hdr, page_no)?;
        self.bpm.fetch_page_read(PageId::new(self.fd, page_no))
    }

    fn fetch_page_write(&self, hdr: &RecordFileHeader, page_no: PageNo) -> Result<WritePageGuard> {
        self.check_page_no(hdr, page_no)?;
        self.bpm.fetch_page_write(PageId::new(self.fd, page_no))
    }

    fn check_page_no(&self, hdr: &RecordFileHeader, page_no: PageNo) -> Result<()> {
        if page_no < RECORD_FIRST_PAGE || page_no >= hdr.num_pages {
            return Err(OxbaseError::PageNotExist(PageId::new(self.fd, page_no)));
        }
        Ok(())
    }

    fn check_record_size(&self, hdr: &RecordFileHeader, buf: &[u8]) -> Result<()> {
        if buf.len() != hdr.record_size as usize {
            return Err(OxbaseError::RecordSizeMismatch {
                expected: hdr.record_size as usize,
                actual: buf.len(),
            });
        }
        Ok(())
    }

    pub(crate) fn write_header_page(
        &self,
        disk: &crate::storage::DiskManager,
    ) -> Result<()> {
        let hdr = self.hdr.lock();
        let mut buf = [0u8; RecordFileHeader::SIZE];
        hdr.encode(&mut buf);
        disk.write_page(self.fd, 0, &buf)
    }
}
