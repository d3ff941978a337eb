use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::common::PageId;

use super::frame_header::{FrameDataReadGuard, FrameDataWriteGuard};
use super::FrameHeader;

/// Invoked exactly once when a guard is dropped; performs the unpin and
/// folds the guard's dirty flag into the frame.
pub(crate) type ReleaseCallback = Box<dyn FnOnce(PageId, bool) + Send + Sync>;

/// RAII guard for read-only access to a pinned page. The pin is released
/// when the guard drops, on every control-flow path.
pub struct ReadPageGuard {
    page_id: PageId,
    data: Option<FrameDataReadGuard>,
    release: Option<ReleaseCallback>,
}

impl ReadPageGuard {
    pub(crate) fn new(page_id: PageId, frame: &Arc<FrameHeader>, release: ReleaseCallback) -> Self {
        Self {
            page_id,
            data: Some(frame.read_data_arc()),
            release: Some(release),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.data.as_ref().expect("data guard lives until drop")[..]
    }
}

impl Deref for ReadPageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl Drop for ReadPageGuard {
    fn drop(&mut self) {
        // Release the data lock before unpinning.
        self.data.take();
        if let Some(release) = self.release.take() {
            release(self.page_id, false);
        }
    }
}

/// RAII guard for read-write access to a pinned page. Taking a mutable view
/// of the bytes marks the page dirty; the flag sticks for the lifetime of
/// the guard and is OR-accumulated into the frame on drop.
pub struct WritePageGuard {
    page_id: PageId,
    data: Option<FrameDataWriteGuard>,
    release: Option<ReleaseCallback>,
    is_dirty: bool,
}

impl WritePageGuard {
    pub(crate) fn new(page_id: PageId, frame: &Arc<FrameHeader>, release: ReleaseCallback) -> Self {
        Self {
            page_id,
            data: Some(frame.write_data_arc()),
            release: Some(release),
            is_dirty: false,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.data.as_ref().expect("data guard lives until drop")[..]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.is_dirty = true;
        &mut self.data.as_mut().expect("data guard lives until drop")[..]
    }
}

impl Deref for WritePageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl DerefMut for WritePageGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data_mut()
    }
}

impl Drop for WritePageGuard {
    fn drop(&mut self) {
        self.data.take();
        if let Some(release) = self.release.take() {
            release(self.page_id, self.is_dirty);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{FileId, FrameId};
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_read_guard_releases_on_drop() {
        let frame = Arc::new(FrameHeader::new(FrameId::new(0)));
        let page_id = PageId::new(FileId(0), 1);
        frame.set_page_id(Some(page_id));

        let mut data = [0u8; crate::common::PAGE_SIZE];
        data[0] = 42;
        frame.copy_from(&data);

        let released = Arc::new(AtomicBool::new(false));
        let released_clone = released.clone();

        let guard = ReadPageGuard::new(
            page_id,
            &frame,
            Box::new(move |_, _| released_clone.store(true, Ordering::SeqCst)),
        );

        assert_eq!(guard.page_id(), page_id);
        assert_eq!(guard.data()[0], 42);
        assert!(!released.load(Ordering::SeqCst));

        drop(guard);
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_write_guard_reports_dirty() {
        let frame = Arc::new(FrameHeader::new(FrameId::new(0)));
        let page_id = PageId::new(FileId(0), 1);

        let dirty = Arc::new(AtomicBool::new(false));
        let dirty_clone = dirty.clone();

        let mut guard = WritePageGuard::new(
            page_id,
            &frame,
            Box::new(move |_, is_dirty| dirty_clone.store(is_dirty, Ordering::SeqCst)),
        );

        guard.data_mut()[0] = 42;
        drop(guard);

        assert!(dirty.load(Ordering::SeqCst));

        let mut read = [0u8; crate::common::PAGE_SIZE];
        frame.copy_to(&mut read);
        assert_eq!(read[0], 42);
    }

    #[test]
    fn test_write_guard_clean_without_mut_access() {
        let frame = Arc::new(FrameHeader::new(FrameId::new(0)));
        let page_id = PageId::new(FileId(0), 1);

        let dirty = Arc::new(AtomicBool::new(true));
        let dirty_clone = dirty.clone();

        let guard = WritePageGuard::new(
            page_id,
            &frame,
            Box::new(move |_, is_dirty| dirty_clone.store(is_dirty, Ordering::SeqCst)),
        );

        let _ = guard.data();
        drop(guard);

        assert!(!dirty.load(Ordering::SeqCst));
    }
}
