pub mod bitmap;
mod file_handle;
mod record_manager;
mod record_page;
mod scan;

pub use file_handle::RecordFileHandle;
pub use record_manager::RecordManager;
pub use record_page::{RecordFileHeader, RecordPage, RecordPageRef, RECORD_PAGE_HDR_SIZE};
pub use scan::RecordScan;
