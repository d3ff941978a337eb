use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::common::{FileId, OxbaseError, PageNo, Result, LOG_FILE_NAME, PAGE_SIZE};

/// State kept for every open file.
struct OpenFile {
    path: PathBuf,
    /// Exclusive access to the file cursor.
    file: Mutex<File>,
    /// Next page number this file hands out. Restored from the file header
    /// by the owning layer on reopen.
    next_page_no: AtomicU32,
}

/// DiskManager owns all file handles of the process and performs raw page
/// I/O against them. Files are keyed by path on open and addressed by a
/// [`FileId`] afterwards; the two maps form a bijection over the open set.
///
/// It also owns the append-only log file used by the write-ahead log layer.
pub struct DiskManager {
    /// FileId -> open file state. The outer lock only guards the map; page
    /// I/O on different files proceeds concurrently.
    files: RwLock<HashMap<FileId, Arc<OpenFile>>>,
    /// path -> FileId for every open file
    path2fd: Mutex<HashMap<PathBuf, FileId>>,
    /// Next handle to mint. Never reused.
    next_fd: AtomicU32,
    log_path: PathBuf,
    log_file: Mutex<Option<File>>,
}

impl DiskManager {
    /// Creates a disk manager with the default log file name. One instance
    /// serves the whole process; construct it once at startup.
    pub fn new() -> Self {
        Self::with_log_path(LOG_FILE_NAME)
    }

    /// Creates a disk manager whose log lives at the given path.
    pub fn with_log_path<P: AsRef<Path>>(log_path: P) -> Self {
        Self {
            files: RwLock::new(HashMap::new()),
            path2fd: Mutex::new(HashMap::new()),
            next_fd: AtomicU32::new(0),
            log_path: log_path.as_ref().to_path_buf(),
            log_file: Mutex::new(None),
        }
    }

    /// Returns whether the path names a regular file.
    pub fn is_file<P: AsRef<Path>>(&self, path: P) -> bool {
        path.as_ref().is_file()
    }

    /// Returns whether the path names a directory.
    pub fn is_dir<P: AsRef<Path>>(&self, path: P) -> bool {
        path.as_ref().is_dir()
    }

    /// Creates a subdirectory.
    pub fn create_dir<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::create_dir(path.as_ref())?;
        Ok(())
    }

    /// Removes a directory and everything under it.
    pub fn destroy_dir<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::remove_dir_all(path.as_ref())?;
        Ok(())
    }

    /// Creates an empty file. Fails with `FileExists` if the path already
    /// names a file.
    pub fn create_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if self.is_file(path) {
            return Err(OxbaseError::FileExists(path.to_path_buf()));
        }
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        debug!(path = %path.display(), "created file");
        Ok(())
    }

    /// Removes a file. Fails with `FileInUse` while the file is open and
    /// `FileNotFound` if it does not exist.
    pub fn destroy_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if self.path2fd.lock().contains_key(path) {
            return Err(OxbaseError::FileInUse(path.to_path_buf()));
        }
        if !self.is_file(path) {
            return Err(OxbaseError::FileNotFound(path.to_path_buf()));
        }
        fs::remove_file(path)?;
        debug!(path = %path.display(), "destroyed file");
        Ok(())
    }

    /// Opens a file for page I/O and returns its handle. A file may be open
    /// at most once; a second open fails with `FileInUse`.
    pub fn open_file<P: AsRef<Path>>(&self, path: P) -> Result<FileId> {
        let path = path.as_ref();
        let mut path2fd = self.path2fd.lock();
        if path2fd.contains_key(path) {
            return Err(OxbaseError::FileInUse(path.to_path_buf()));
        }
        if !self.is_file(path) {
            return Err(OxbaseError::FileNotFound(path.to_path_buf()));
        }
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let fd = FileId(self.next_fd.fetch_add(1, Ordering::SeqCst));
        path2fd.insert(path.to_path_buf(), fd);
        self.files.write().insert(
            fd,
            Arc::new(OpenFile {
                path: path.to_path_buf(),
                file: Mutex::new(file),
                next_page_no: AtomicU32::new(0),
            }),
        );
        debug!(path = %path.display(), %fd, "opened file");
        Ok(fd)
    }

    /// Closes an open file, syncing it to disk first.
    pub fn close_file(&self, fd: FileId) -> Result<()> {
        let entry = self
            .files
            .write()
            .remove(&fd)
            .ok_or(OxbaseError::FileNotOpen(fd))?;
        self.path2fd.lock().remove(&entry.path);
        entry.file.lock().sync_all()?;
        debug!(path = %entry.path.display(), %fd, "closed file");
        Ok(())
    }

    /// Reads `buf.len()` bytes from the start of the given page. The length
    /// must not exceed `PAGE_SIZE`; a short read is an error.
    pub fn read_page(&self, fd: FileId, page_no: PageNo, buf: &mut [u8]) -> Result<()> {
        if buf.len() > PAGE_SIZE {
            return Err(invalid_len(buf.len()));
        }
        let entry = self.get(fd)?;
        let mut file = entry.file.lock();
        file.seek(SeekFrom::Start(page_no as u64 * PAGE_SIZE as u64))?;
        file.read_exact(buf)?;
        Ok(())
    }

    /// Writes `buf.len()` bytes to the start of the given page. The length
    /// must not exceed `PAGE_SIZE`; a short write is an error.
    pub fn write_page(&self, fd: FileId, page_no: PageNo, buf: &[u8]) -> Result<()> {
        if buf.len() > PAGE_SIZE {
            return Err(invalid_len(buf.len()));
        }
        let entry = self.get(fd)?;
        let mut file = entry.file.lock();
        file.seek(SeekFrom::Start(page_no as u64 * PAGE_SIZE as u64))?;
        file.write_all(buf)?;
        Ok(())
    }

    /// Hands out the next page number of the file. The counter alone grows;
    /// reclamation is driven by the free-list headers of the owning layer.
    pub fn allocate_page(&self, fd: FileId) -> Result<PageNo> {
        let entry = self.get(fd)?;
        Ok(entry.next_page_no.fetch_add(1, Ordering::SeqCst))
    }

    /// Space reclamation lives in the file-level free lists, so this is a
    /// deliberate no-op.
    pub fn deallocate_page(&self, _fd: FileId, _page_no: PageNo) -> Result<()> {
        Ok(())
    }

    /// Resets the page allocation counter. Callers restore it from their
    /// file header when reopening a file.
    pub fn set_page_counter(&self, fd: FileId, next_page_no: PageNo) -> Result<()> {
        let entry = self.get(fd)?;
        entry.next_page_no.store(next_page_no, Ordering::SeqCst);
        Ok(())
    }

    /// Current value of the page allocation counter.
    pub fn page_counter(&self, fd: FileId) -> Result<PageNo> {
        let entry = self.get(fd)?;
        Ok(entry.next_page_no.load(Ordering::SeqCst))
    }

    /// Size of the file at `path` in bytes.
    pub fn file_size<P: AsRef<Path>>(&self, path: P) -> Result<u64> {
        let meta = fs::metadata(path.as_ref())
            .map_err(|_| OxbaseError::FileNotFound(path.as_ref().to_path_buf()))?;
        Ok(meta.len())
    }

    /// Path of an open file.
    pub fn fd_path(&self, fd: FileId) -> Result<PathBuf> {
        Ok(self.get(fd)?.path.clone())
    }

    /// Handle of the file at `path`, opening it if necessary.
    pub fn path_fd<P: AsRef<Path>>(&self, path: P) -> Result<FileId> {
        if let Some(&fd) = self.path2fd.lock().get(path.as_ref()) {
            return Ok(fd);
        }
        self.open_file(path)
    }

    /// Appends raw bytes at the current end of the log file, creating the
    /// file on first use.
    pub fn write_log(&self, buf: &[u8]) -> Result<()> {
        let mut log = self.log_file.lock();
        let file = self.ensure_log(&mut log)?;
        file.seek(SeekFrom::End(0))?;
        file.write_all(buf)?;
        Ok(())
    }

    /// Reads up to `buf.len()` bytes from the log starting at
    /// `prev_end + offset`. Returns the number of bytes read, or `None` once
    /// the offset is at or past the end of the log.
    pub fn read_log(&self, buf: &mut [u8], offset: u64, prev_end: u64) -> Result<Option<usize>> {
        let mut log = self.log_file.lock();
        let file = self.ensure_log(&mut log)?;
        let size = file.metadata()?.len();
        let pos = offset + prev_end;
        if pos >= size {
            return Ok(None);
        }
        let len = buf.len().min((size - pos) as usize);
        file.seek(SeekFrom::Start(pos))?;
        file.read_exact(&mut buf[..len])?;
        Ok(Some(len))
    }

    /// Flushes every open file to stable storage.
    pub fn sync_all(&self) -> Result<()> {
        let files = self.files.read();
        for entry in files.values() {
            entry.file.lock().sync_all()?;
        }
        Ok(())
    }

    fn get(&self, fd: FileId) -> Result<Arc<OpenFile>> {
        self.files
            .read()
            .get(&fd)
            .cloned()
            .ok_or(OxbaseError::FileNotOpen(fd))
    }

    fn ensure_log<'a>(&self, log: &'a mut Option<File>) -> Result<&'a mut File> {
        if log.is_none() {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&self.log_path)?;
            *log = Some(file);
        }
        Ok(log.as_mut().expect("log file just opened"))
    }
}

impl Default for DiskManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let files = self.files.get_mut();
        for entry in files.values() {
            let _ = entry.file.lock().sync_all();
        }
    }
}

fn invalid_len(len: usize) -> OxbaseError {
    OxbaseError::Io(std::io::Error::new(
        std::io::ErrorKind::InvalidInput,
        format!("page I/O of {} bytes exceeds page size {}", len, PAGE_SIZE),
    ))
}
