use crate::common::{PageNo, INVALID_PAGE_NO, PAGE_SIZE};

/// Record page layout:
///
/// ```text
/// +--------------------+
/// | page header        |  next_free_page_no (u32) | num_records (u32)
/// +--------------------+
/// | bitmap             |  bitmap_size bytes, one bit per slot
/// +--------------------+
/// | slots              |  num_records_per_page fixed-size slots
/// +--------------------+
/// ```
///
/// Slot `i` holds a record iff bit `i` of the bitmap is set; the page keeps
/// `num_records == popcount(bitmap)` at all times.
pub const RECORD_PAGE_HDR_SIZE: usize = 8;

const NEXT_FREE_PAGE_NO_OFFSET: usize = 0;
const NUM_RECORDS_OFFSET: usize = 4;

/// Header stored in page 0 of a record file, serialized field by field in
/// little-endian order. Page 0 never travels through the buffer pool; the
/// header is read once on open and written back on close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordFileHeader {
    /// Fixed size of every record in the file
    pub record_size: u32,
    /// Slot count of every record page
    pub num_records_per_page: u32,
    /// Total pages in the file, header page included
    pub num_pages: u32,
    /// Head of the free list of non-full pages, or `INVALID_PAGE_NO`
    pub first_free_page_no: PageNo,
    /// Bitmap bytes per record page
    pub bitmap_size: u32,
}

impl RecordFileHeader {
    pub const SIZE: usize = 20;

    pub fn encode(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.record_size.to_le_bytes());
        buf[4..8].copy_from_slice(&self.num_records_per_page.to_le_bytes());
        buf[8..12].copy_from_slice(&self.num_pages.to_le_bytes());
        buf[12..16].copy_from_slice(&self.first_free_page_no.to_le_bytes());
        buf[16..20].copy_from_slice(&self.bitmap_size.to_le_bytes());
    }

    pub fn decode(buf: &[u8]) -> Self {
        let word = |i: usize| {
            let bytes: [u8; 4] = buf[i..i + 4].try_into().expect("header field is 4 bytes");
            u32::from_le_bytes(bytes)
        };
        Self {
            record_size: word(0),
            num_records_per_page: word(4),
            num_pages: word(8),
            first_free_page_no: word(12),
            bitmap_size: word(16),
        }
    }
}

/// Mutable view over one record page's bytes. Geometry is copied out of the
/// file header so the view does not borrow it.
pub struct RecordPage<'a> {
    data: &'a mut [u8],
    record_size: usize,
    slots_per_page: usize,
    bitmap_size: usize,
}

impl<'a> RecordPage<'a> {
    pub fn new(data: &'a mut [u8], hdr: &RecordFileHeader) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self {
            data,
            record_size: hdr.record_size as usize,
            slots_per_page: hdr.num_records_per_page as usize,
            bitmap_size: hdr.bitmap_size as usize,
        }
    }

    /// Initializes a fresh record page: empty bitmap, no records, not on
    /// the free list.
    pub fn init(&mut self) {
        self.data.fill(0);
        self.set_next_free_page_no_raw(INVALID_PAGE_NO);
    }

    pub fn next_free_page_no(&self) -> Option<PageNo> {
        self.as_ref().next_free_page_no()
    }

    pub fn next_free_page_no_raw(&self) -> PageNo {
        self.as_ref().next_free_page_no_raw()
    }

    pub fn set_next_free_page_no_raw(&mut self, page_no: PageNo) {
        self.data[NEXT_FREE_PAGE_NO_OFFSET..NEXT_FREE_PAGE_NO_OFFSET + 4]
            .copy_from_slice(&page_no.to_le_bytes());
    }

    pub fn num_records(&self) -> u32 {
        self.as_ref().num_records()
    }

    pub fn set_num_records(&mut self, num: u32) {
        self.data[NUM_RECORDS_OFFSET..NUM_RECORDS_OFFSET + 4].copy_from_slice(&num.to_le_bytes());
    }

    pub fn is_full(&self) -> bool {
        self.num_records() as usize == self.slots_per_page
    }

    pub fn bitmap(&self) -> &[u8] {
        &self.data[RECORD_PAGE_HDR_SIZE..RECORD_PAGE_HDR_SIZE + self.bitmap_size]
    }

    pub fn bitmap_mut(&mut self) -> &mut [u8] {
        &mut self.data[RECORD_PAGE_HDR_SIZE..RECORD_PAGE_HDR_SIZE + self.bitmap_size]
    }

    pub fn slot(&self, slot_no: usize) -> &[u8] {
        let offset = self.slot_offset(slot_no);
        &self.data[offset..offset + self.record_size]
    }

    pub fn slot_mut(&mut self, slot_no: usize) -> &mut [u8] {
        let offset = self.slot_offset(slot_no);
        &mut self.data[offset..offset + self.record_size]
    }

    fn slot_offset(&self, slot_no: usize) -> usize {
        assert!(slot_no < self.slots_per_page);
        RECORD_PAGE_HDR_SIZE + self.bitmap_size + slot_no * self.record_size
    }

    fn as_ref(&self) -> RecordPageRef<'_> {
        RecordPageRef {
            data: self.data,
            record_size: self.record_size,
            slots_per_page: self.slots_per_page,
            bitmap_size: self.bitmap_size,
        }
    }
}

/// Read-only view over one record page's bytes.
pub struct RecordPageRef<'a> {
    data: &'a [u8],
    record_size: usize,
    slots_per_page: usize,
    bitmap_size: usize,
}

impl<'a> RecordPageRef<'a> {
    pub fn new(data: &'a [u8], hdr: &RecordFileHeader) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self {
            data,
            record_size: hdr.record_size as usize,
            slots_per_page: hdr.num_records_per_page as usize,
            bitmap_size: hdr.bitmap_size as usize,
        }
    }

    pub fn next_free_page_no(&self) -> Option<PageNo> {
        let raw = self.next_free_page_no_raw();
        (raw != INVALID_PAGE_NO).then_some(raw)
    }

    pub fn next_free_page_no_raw(&self) -> PageNo {
        let bytes: [u8; 4] = self.data[NEXT_FREE_PAGE_NO_OFFSET..NEXT_FREE_PAGE_NO_OFFSET + 4]
            .try_into()
            .expect("header field is 4 bytes");
        u32::from_le_bytes(bytes)
    }

    pub fn num_records(&self) -> u32 {
        let bytes: [u8; 4] = self.data[NUM_RECORDS_OFFSET..NUM_RECORDS_OFFSET + 4]
            .try_into()
            .expect("header field is 4 bytes");
        u32::from_le_bytes(bytes)
    }

    pub fn is_full(&self) -> bool {
        self.num_records() as usize == self.slots_per_page
    }

    pub fn bitmap(&self) -> &[u8] {
        &self.data[RECORD_PAGE_HDR_SIZE..RECORD_PAGE_HDR_SIZE + self.bitmap_size]
    }

    pub fn slot(&self, slot_no: usize) -> &[u8] {
        assert!(slot_no < self.slots_per_page);
        let offset = RECORD_PAGE_HDR_SIZE + self.bitmap_size + slot_no * self.record_size;
        &self.data[offset..offset + self.record_size]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::bitmap;

    fn header() -> RecordFileHeader {
        RecordFileHeader {
            record_size: 16,
            num_records_per_page: 100,
            num_pages: 1,
            first_free_page_no: INVALID_PAGE_NO,
            bitmap_size: 13,
        }
    }

    #[test]
    fn test_header_round_trip() {
        let hdr = RecordFileHeader {
            record_size: 32,
            num_records_per_page: 120,
            num_pages: 7,
            first_free_page_no: 3,
            bitmap_size: 15,
        };
        let mut buf = [0u8; RecordFileHeader::SIZE];
        hdr.encode(&mut buf);
        assert_eq!(RecordFileHeader::decode(&buf), hdr);
    }

    #[test]
    fn test_page_init_and_slots() {
        let hdr = header();
        let mut data = [0xAAu8; PAGE_SIZE];
        let mut page = RecordPage::new(&mut data, &hdr);
        page.init();

        assert_eq!(page.num_records(), 0);
        assert_eq!(page.next_free_page_no(), None);
        assert!(!page.is_full());

        page.slot_mut(3).copy_from_slice(&[7u8; 16]);
        bitmap::set(page.bitmap_mut(), 3);
        page.set_num_records(1);

        assert_eq!(page.slot(3), &[7u8; 16]);
        assert!(bitmap::test(page.bitmap(), 3));
        assert_eq!(page.num_records(), 1);
    }

    #[test]
    fn test_free_list_field() {
        let hdr = header();
        let mut data = [0u8; PAGE_SIZE];
        let mut page = RecordPage::new(&mut data, &hdr);
        page.init();

        page.set_next_free_page_no_raw(5);
        assert_eq!(page.next_free_page_no(), Some(5));
        assert_eq!(page.next_free_page_no_raw(), 5);
    }
}
