use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock};

use crate::common::{FrameId, PageId, PAGE_SIZE};

/// Owned read lock on a frame's page bytes.
pub(crate) type FrameDataReadGuard = ArcRwLockReadGuard<RawRwLock, Box<[u8; PAGE_SIZE]>>;
/// Owned write lock on a frame's page bytes.
pub(crate) type FrameDataWriteGuard = ArcRwLockWriteGuard<RawRwLock, Box<[u8; PAGE_SIZE]>>;

/// FrameHeader manages a single buffer frame: the resident page's identity,
/// its pin count and dirty flag, and the page bytes themselves.
///
/// A frame with `pin_count > 0` is never chosen as an eviction victim.
pub struct FrameHeader {
    frame_id: FrameId,
    /// Identity of the resident page; meaningless while the frame is free.
    page_id: RwLock<Option<PageId>>,
    /// Number of outstanding page guards on this frame
    pin_count: AtomicU32,
    /// Whether the page bytes diverged from the on-disk copy
    is_dirty: AtomicBool,
    /// The page bytes. Arc'd so page guards can own their lock.
    data: Arc<RwLock<Box<[u8; PAGE_SIZE]>>>,
}

impl FrameHeader {
    pub fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            page_id: RwLock::new(None),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
            data: Arc::new(RwLock::new(Box::new([0u8; PAGE_SIZE]))),
        }
    }

    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    pub fn page_id(&self) -> Option<PageId> {
        *self.page_id.read()
    }

    pub fn set_page_id(&self, page_id: Option<PageId>) {
        *self.page_id.write() = page_id;
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    /// Increments the pin count and returns the new value.
    pub fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrements the pin count and returns the new value, or `None` if the
    /// count was already zero.
    pub fn unpin(&self) -> Option<u32> {
        loop {
            let current = self.pin_count.load(Ordering::Acquire);
            if current == 0 {
                return None;
            }
            if self
                .pin_count
                .compare_exchange(current, current - 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Some(current - 1);
            }
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Acquire)
    }

    pub fn set_dirty(&self, dirty: bool) {
        self.is_dirty.store(dirty, Ordering::Release);
    }

    pub(crate) fn read_data_arc(&self) -> FrameDataReadGuard {
        self.data.read_arc()
    }

    pub(crate) fn write_data_arc(&self) -> FrameDataWriteGuard {
        self.data.write_arc()
    }

    /// Copies data from the given slice into the frame.
    pub fn copy_from(&self, data: &[u8]) {
        assert_eq!(data.len(), PAGE_SIZE);
        self.data.write().copy_from_slice(data);
    }

    /// Copies data from the frame into the given slice.
    pub fn copy_to(&self, data: &mut [u8]) {
        assert_eq!(data.len(), PAGE_SIZE);
        data.copy_from_slice(&self.data.read()[..]);
    }

    /// Resets the frame to its free state.
    pub fn reset(&self) {
        *self.page_id.write() = None;
        self.pin_count.store(0, Ordering::Release);
        self.is_dirty.store(false, Ordering::Release);
        self.data.write().fill(0);
    }
}
