use crate::common::{PageNo, Result, Rid, RECORD_FIRST_PAGE};

use super::bitmap;
use super::record_page::{RecordFileHeader, RecordPageRef};
use super::RecordFileHandle;

/// Forward-only scan over every record of a file, in `(page_no, slot_no)`
/// order. Each step fetches and releases its page; no pin is held between
/// calls. The header is snapshotted at construction, so records inserted
/// mid-scan may or may not be visited.
pub struct RecordScan<'a> {
    fh: &'a RecordFileHandle,
    hdr: RecordFileHeader,
    /// Current position; `None` once the scan is exhausted
    rid: Option<Rid>,
}

impl<'a> RecordScan<'a> {
    pub(crate) fn new(fh: &'a RecordFileHandle) -> Result<Self> {
        let hdr = fh.header();
        let rid = Self::seek(fh, &hdr, RECORD_FIRST_PAGE, 0)?;
        Ok(Self { fh, hdr, rid })
    }

    /// Current position of the scan, if not exhausted.
    pub fn rid(&self) -> Option<Rid> {
        self.rid
    }

    pub fn is_end(&self) -> bool {
        self.rid.is_none()
    }

    /// Returns the record at the current position and steps past it, or
    /// `None` once every record has been visited.
    pub fn next(&mut self) -> Result<Option<Rid>> {
        let current = match self.rid {
            Some(rid) => rid,
            None => return Ok(None),
        };
        match Self::seek(
            self.fh,
            &self.hdr,
            current.page_no,
            current.slot_no as usize + 1,
        ) {
            Ok(next) => {
                self.rid = next;
                Ok(Some(current))
            }
            Err(e) => {
                self.rid = None;
                Err(e)
            }
        }
    }

    /// Finds the first occupied slot at or after `(page_no, slot_no)`.
    fn seek(
        fh: &RecordFileHandle,
        hdr: &RecordFileHeader,
        mut page_no: PageNo,
        mut slot_no: usize,
    ) -> Result<Option<Rid>> {
        while page_no < hdr.num_pages {
            let guard = fh.fetch_page_read(hdr, page_no)?;
            let page = RecordPageRef::new(guard.data(), hdr);
            if let Some(found) =
                bitmap::next_set(page.bitmap(), hdr.num_records_per_page as usize, slot_no)
            {
                return Ok(Some(Rid::new(page_no, found as u32)));
            }
            page_no += 1;
            slot_no = 0;
        }
        Ok(None)
    }
}

impl Iterator for RecordScan<'_> {
    type Item = Result<Rid>;

    fn next(&mut self) -> Option<Self::Item> {
        match RecordScan::next(self) {
            Ok(Some(rid)) => Some(Ok(rid)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
