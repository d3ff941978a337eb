use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::common::{FileId, FrameId, OxbaseError, PageId, Result, PAGE_SIZE};
use crate::storage::{DiskManager, DiskScheduler};

use super::page_guard::ReleaseCallback;
use super::{FrameHeader, ReadPageGuard, ReplacerKind, WritePageGuard};

/// Bookkeeping guarded by a single mutex so a page can never be loaded into
/// two frames by racing fetches.
struct PoolInner {
    /// Maps resident pages to their frames
    page_table: HashMap<PageId, FrameId>,
    /// Frames not holding any page
    free_list: VecDeque<FrameId>,
}

/// Shared state reachable from page-guard release callbacks.
struct PoolState {
    frames: Vec<Arc<FrameHeader>>,
    inner: Mutex<PoolInner>,
    replacer: Box<dyn super::Replacer>,
}

impl PoolState {
    /// The single unpin point: every guard funnels through here on drop.
    fn release(&self, page_id: PageId, is_dirty: bool) {
        let inner = self.inner.lock();
        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            let frame = &self.frames[frame_id.as_usize()];
            if is_dirty {
                frame.set_dirty(true);
            }
            if let Some(0) = frame.unpin() {
                if let Err(e) = self.replacer.unpin(frame_id) {
                    error!(%page_id, %frame_id, "failed to hand frame to replacer: {}", e);
                }
            }
        }
    }
}

/// BufferPoolManager caches disk pages in a fixed set of frames and hands
/// out pinned RAII guards over their bytes. Eviction is delegated to the
/// [`Replacer`] selected at construction time.
///
/// [`Replacer`]: super::Replacer
pub struct BufferPoolManager {
    pool_size: usize,
    state: Arc<PoolState>,
    scheduler: DiskScheduler,
}

impl BufferPoolManager {
    /// Creates a pool of `pool_size` frames over the given disk manager,
    /// using the requested replacement policy.
    pub fn new(pool_size: usize, replacer: ReplacerKind, disk_manager: Arc<DiskManager>) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);

        for i in 0..pool_size {
            let frame_id = FrameId::new(i as u32);
            frames.push(Arc::new(FrameHeader::new(frame_id)));
            free_list.push_back(frame_id);
        }

        let state = Arc::new(PoolState {
            frames,
            inner: Mutex::new(PoolInner {
                page_table: HashMap::new(),
                free_list,
            }),
            replacer: replacer.build(pool_size),
        });

        Self {
            pool_size,
            state,
            scheduler: DiskScheduler::new(disk_manager),
        }
    }

    /// Fetches a page for shared read access, loading it from disk on a
    /// miss. Fails with `NoFreeFrame` when every frame is pinned.
    pub fn fetch_page_read(&self, page_id: PageId) -> Result<ReadPageGuard> {
        let frame_id = self.fetch_frame(page_id)?;
        let frame = &self.state.frames[frame_id.as_usize()];
        Ok(ReadPageGuard::new(page_id, frame, self.release_callback()))
    }

    /// Fetches a page for exclusive write access, loading it from disk on a
    /// miss. Fails with `NoFreeFrame` when every frame is pinned.
    pub fn fetch_page_write(&self, page_id: PageId) -> Result<WritePageGuard> {
        let frame_id = self.fetch_frame(page_id)?;
        let frame = &self.state.frames[frame_id.as_usize()];
        Ok(WritePageGuard::new(page_id, frame, self.release_callback()))
    }

    /// Allocates a fresh page in the given file and returns it pinned for
    /// writing, zero-filled.
    pub fn new_page(&self, fd: FileId) -> Result<WritePageGuard> {
        let page_no = self.scheduler.disk_manager().allocate_page(fd)?;
        let page_id = PageId::new(fd, page_no);

        let mut inner = self.state.inner.lock();
        let frame_id = self.take_frame(&mut inner)?;
        let frame = &self.state.frames[frame_id.as_usize()];

        frame.reset();
        frame.set_page_id(Some(page_id));
        frame.pin();
        inner.page_table.insert(page_id, frame_id);
        self.state.replacer.pin(frame_id);
        drop(inner);

        Ok(WritePageGuard::new(page_id, frame, self.release_callback()))
    }

    /// Writes a page's bytes back to disk if it is resident; returns whether
    /// the page was found.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        let frame = {
            let inner = self.state.inner.lock();
            match inner.page_table.get(&page_id) {
                Some(&frame_id) => Arc::clone(&self.state.frames[frame_id.as_usize()]),
                None => return Ok(false),
            }
        };
        // The inner lock is released: a concurrent writer finishing up can
        // drop its guard without deadlocking against this copy.
        let mut data = [0u8; PAGE_SIZE];
        frame.copy_to(&mut data);
        self.scheduler.schedule_write_sync(page_id, &data)?;
        frame.set_dirty(false);
        Ok(true)
    }

    /// Flushes every dirty resident page of the given file.
    pub fn flush_all_pages(&self, fd: FileId) -> Result<()> {
        let targets: Vec<(PageId, Arc<FrameHeader>)> = {
            let inner = self.state.inner.lock();
            inner
                .page_table
                .iter()
                .filter(|(page_id, _)| page_id.fd == fd)
                .map(|(&page_id, &frame_id)| {
                    (page_id, Arc::clone(&self.state.frames[frame_id.as_usize()]))
                })
                .collect()
        };
        for (page_id, frame) in targets {
            if frame.is_dirty() {
                let mut data = [0u8; PAGE_SIZE];
                frame.copy_to(&mut data);
                self.scheduler.schedule_write_sync(page_id, &data)?;
                frame.set_dirty(false);
            }
        }
        Ok(())
    }

    /// Drops a page from the pool and deallocates it on disk. Fails with
    /// `PageStillPinned` while any guard is outstanding; returns whether the
    /// page was resident.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut inner = self.state.inner.lock();
        let resident = match inner.page_table.get(&page_id) {
            Some(&frame_id) => {
                let frame = &self.state.frames[frame_id.as_usize()];
                if frame.pin_count() > 0 {
                    return Err(OxbaseError::PageStillPinned(page_id));
                }
                inner.page_table.remove(&page_id);
                self.state.replacer.pin(frame_id);
                frame.reset();
                inner.free_list.push_back(frame_id);
                true
            }
            None => false,
        };
        drop(inner);
        self.scheduler
            .disk_manager()
            .deallocate_page(page_id.fd, page_id.page_no)?;
        Ok(resident)
    }

    /// Pin count of a resident page, for diagnostics and tests.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let inner = self.state.inner.lock();
        inner
            .page_table
            .get(&page_id)
            .map(|&frame_id| self.state.frames[frame_id.as_usize()].pin_count())
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn free_frame_count(&self) -> usize {
        self.state.inner.lock().free_list.len()
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        self.scheduler.disk_manager()
    }

    fn release_callback(&self) -> ReleaseCallback {
        let state = Arc::clone(&self.state);
        Box::new(move |page_id, is_dirty| state.release(page_id, is_dirty))
    }

    /// Pins the frame holding `page_id`, loading the page on a miss. The
    /// inner lock is held across the whole miss path so concurrent fetches
    /// of the same page cannot double-load it.
    fn fetch_frame(&self, page_id: PageId) -> Result<FrameId> {
        let mut inner = self.state.inner.lock();

        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            let frame = &self.state.frames[frame_id.as_usize()];
            frame.pin();
            self.state.replacer.pin(frame_id);
            return Ok(frame_id);
        }

        let frame_id = self.take_frame(&mut inner)?;
        let frame = &self.state.frames[frame_id.as_usize()];

        let mut data = [0u8; PAGE_SIZE];
        if let Err(e) = self.scheduler.schedule_read_sync(page_id, &mut data) {
            inner.free_list.push_back(frame_id);
            return Err(e);
        }

        frame.set_page_id(Some(page_id));
        frame.copy_from(&data);
        frame.set_dirty(false);
        frame.pin();
        inner.page_table.insert(page_id, frame_id);
        self.state.replacer.pin(frame_id);

        Ok(frame_id)
    }

    /// Takes a frame from the free list, or evicts a victim (writing it back
    /// first when dirty). The caller owns the returned frame.
    fn take_frame(&self, inner: &mut PoolInner) -> Result<FrameId> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = self.state.replacer.victim().ok_or(OxbaseError::NoFreeFrame)?;
        let frame = &self.state.frames[frame_id.as_usize()];
        let old_page_id = frame
            .page_id()
            .ok_or_else(|| OxbaseError::Corrupted(format!("victim frame {} is empty", frame_id)))?;

        if frame.is_dirty() {
            debug!(page_id = %old_page_id, %frame_id, "writing back dirty victim");
            let mut data = [0u8; PAGE_SIZE];
            frame.copy_to(&mut data);
            if let Err(e) = self.scheduler.schedule_write_sync(old_page_id, &data) {
                // The page stays resident; give the frame back to the
                // replacer so the pool is unchanged.
                let _ = self.state.replacer.unpin(frame_id);
                return Err(e);
            }
        }

        inner.page_table.remove(&old_page_id);
        frame.reset();
        Ok(frame_id)
    }
}
