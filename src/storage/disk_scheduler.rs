use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::common::{OxbaseError, PageId, Result, PAGE_SIZE};

use super::DiskManager;

type PageBuf = Box<[u8; PAGE_SIZE]>;

/// A disk I/O request handed to the worker thread. Buffers travel by value
/// so the worker never touches caller memory.
enum DiskRequest {
    Read {
        page_id: PageId,
        done: std::sync::mpsc::Sender<Result<PageBuf>>,
    },
    Write {
        page_id: PageId,
        data: PageBuf,
        done: std::sync::mpsc::Sender<Result<()>>,
    },
}

/// DiskScheduler funnels page I/O through a single background worker fed by
/// a bounded queue. Upper layers only see the synchronous `*_sync` calls;
/// the queue exists so the I/O path has one place to reorder or batch later.
pub struct DiskScheduler {
    disk_manager: Arc<DiskManager>,
    request_sender: Option<Sender<DiskRequest>>,
    worker_handle: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    /// Spawns the worker thread over the given disk manager.
    pub fn new(disk_manager: Arc<DiskManager>) -> Self {
        let (sender, receiver) = bounded::<DiskRequest>(128);
        let dm = Arc::clone(&disk_manager);
        let worker_handle = thread::spawn(move || Self::run_worker(dm, receiver));

        Self {
            disk_manager,
            request_sender: Some(sender),
            worker_handle: Some(worker_handle),
        }
    }

    /// Reads a full page and blocks until it completes.
    pub fn schedule_read_sync(&self, page_id: PageId, buf: &mut [u8]) -> Result<()> {
        assert_eq!(buf.len(), PAGE_SIZE, "buffer must be PAGE_SIZE bytes");

        let (tx, rx) = std::sync::mpsc::channel();
        self.schedule(DiskRequest::Read { page_id, done: tx })?;
        let data = rx
            .recv()
            .map_err(|e| OxbaseError::Scheduler(format!("read completion lost: {}", e)))??;
        buf.copy_from_slice(&data[..]);
        Ok(())
    }

    /// Writes a full page and blocks until it completes.
    pub fn schedule_write_sync(&self, page_id: PageId, buf: &[u8]) -> Result<()> {
        assert_eq!(buf.len(), PAGE_SIZE, "buffer must be PAGE_SIZE bytes");

        let mut data: PageBuf = Box::new([0u8; PAGE_SIZE]);
        data.copy_from_slice(buf);

        let (tx, rx) = std::sync::mpsc::channel();
        self.schedule(DiskRequest::Write {
            page_id,
            data,
            done: tx,
        })?;
        rx.recv()
            .map_err(|e| OxbaseError::Scheduler(format!("write completion lost: {}", e)))?
    }

    /// Returns the underlying disk manager.
    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }

    fn schedule(&self, request: DiskRequest) -> Result<()> {
        self.request_sender
            .as_ref()
            .expect("scheduler sender lives until drop")
            .send(request)
            .map_err(|e| OxbaseError::Scheduler(format!("failed to enqueue request: {}", e)))
    }

    /// Worker loop: drains requests until every sender is gone.
    fn run_worker(disk_manager: Arc<DiskManager>, receiver: Receiver<DiskRequest>) {
        for request in receiver.iter() {
            match request {
                DiskRequest::Read { page_id, done } => {
                    let mut data: PageBuf = Box::new([0u8; PAGE_SIZE]);
                    let result = disk_manager
                        .read_page(page_id.fd, page_id.page_no, &mut data[..])
                        .map(|_| data);
                    let _ = done.send(result);
                }
                DiskRequest::Write {
                    page_id,
                    data,
                    done,
                } => {
                    let result = disk_manager.write_page(page_id.fd, page_id.page_no, &data[..]);
                    let _ = done.send(result);
                }
            }
        }
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        // Disconnect the queue, then wait for the worker to drain it.
        self.request_sender.take();
        if let Some(handle) = self.worker_handle.take() {
            let _ = handle.join();
        }
    }
}
