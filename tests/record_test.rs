//! Integration tests for record files: slot allocation, the free list of
//! non-full pages, and the scan iterator

use std::sync::Arc;

use oxbase::buffer::{BufferPoolManager, ReplacerKind};
use oxbase::common::{OxbaseError, Rid, INVALID_PAGE_NO};
use oxbase::record::{bitmap, RecordFileHandle, RecordManager};
use oxbase::storage::DiskManager;

use tempfile::TempDir;

fn setup(record_size: usize) -> (RecordManager, RecordFileHandle, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let dm = Arc::new(DiskManager::with_log_path(dir.path().join("rm.log")));
    let bpm = Arc::new(BufferPoolManager::new(16, ReplacerKind::Lru, dm.clone()));
    let rm = RecordManager::new(dm, bpm);

    let path = dir.path().join("records.db");
    rm.create_file(&path, record_size).unwrap();
    let fh = rm.open_file(&path).unwrap();
    (rm, fh, dir)
}

fn record(fill: u8, size: usize) -> Vec<u8> {
    vec![fill; size]
}

#[test]
fn test_insert_get_update_delete() {
    let (_rm, fh, _dir) = setup(16);

    let rid = fh.insert_record(&record(1, 16)).unwrap();
    assert_eq!(fh.get_record(rid).unwrap(), record(1, 16));

    fh.update_record(rid, &record(2, 16)).unwrap();
    assert_eq!(fh.get_record(rid).unwrap(), record(2, 16));

    fh.delete_record(rid).unwrap();
    assert!(matches!(
        fh.get_record(rid),
        Err(OxbaseError::RecordNotFound(_))
    ));
    assert!(matches!(
        fh.delete_record(rid),
        Err(OxbaseError::RecordNotFound(_))
    ));
}

#[test]
fn test_record_size_is_enforced() {
    let (_rm, fh, _dir) = setup(16);

    assert!(matches!(
        fh.insert_record(&record(1, 15)),
        Err(OxbaseError::RecordSizeMismatch { .. })
    ));
}

#[test]
fn test_page_not_exist() {
    let (_rm, fh, _dir) = setup(16);

    let rid = Rid::new(99, 0);
    assert!(matches!(
        fh.get_record(rid),
        Err(OxbaseError::PageNotExist(_))
    ));
}

#[test]
fn test_deleted_slot_is_reused_first() {
    let (_rm, fh, _dir) = setup(16);

    let rids: Vec<Rid> = (0..10)
        .map(|i| fh.insert_record(&record(i, 16)).unwrap())
        .collect();

    fh.delete_record(rids[4]).unwrap();
    let rid = fh.insert_record(&record(42, 16)).unwrap();
    // First clear bitmap bit wins: the freed slot comes back.
    assert_eq!(rid, rids[4]);
    assert_eq!(fh.get_record(rid).unwrap(), record(42, 16));
}

#[test]
fn test_free_list_links_partial_pages() {
    // 2000-byte records pack two per page.
    let (_rm, fh, _dir) = setup(2000);
    assert_eq!(fh.header().num_records_per_page, 2);

    let r0 = fh.insert_record(&record(1, 2000)).unwrap();
    let r1 = fh.insert_record(&record(2, 2000)).unwrap();
    let r2 = fh.insert_record(&record(3, 2000)).unwrap();

    // Page 1 filled and left the free list; page 2 is its head.
    assert_eq!(r0, Rid::new(1, 0));
    assert_eq!(r1, Rid::new(1, 1));
    assert_eq!(r2, Rid::new(2, 0));
    assert_eq!(fh.header().first_free_page_no, 2);

    // Deleting from the full page pushes it back to the list head,
    // chained in front of page 2.
    fh.delete_record(r0).unwrap();
    assert_eq!(fh.header().first_free_page_no, 1);

    // The next insert reuses page 1, slot 0; the page fills again and the
    // head moves back to page 2.
    let r3 = fh.insert_record(&record(4, 2000)).unwrap();
    assert_eq!(r3, Rid::new(1, 0));
    assert_eq!(fh.header().first_free_page_no, 2);

    let r4 = fh.insert_record(&record(5, 2000)).unwrap();
    assert_eq!(r4, Rid::new(2, 1));
    assert_eq!(fh.header().first_free_page_no, INVALID_PAGE_NO);
}

#[test]
fn test_num_records_matches_bitmap_popcount() {
    let (_rm, fh, _dir) = setup(2000);

    let mut rids = Vec::new();
    for i in 0..7 {
        rids.push(fh.insert_record(&record(i, 2000)).unwrap());
    }
    fh.delete_record(rids[1]).unwrap();
    fh.delete_record(rids[5]).unwrap();

    let hdr = fh.header();
    for page_no in 1..hdr.num_pages {
        let guard = fh.fetch_page_read(&hdr, page_no).unwrap();
        let page = oxbase::record::RecordPageRef::new(guard.data(), &hdr);
        assert_eq!(
            page.num_records() as usize,
            bitmap::count_ones(page.bitmap(), hdr.num_records_per_page as usize),
            "page {}",
            page_no
        );
    }
}

#[test]
fn test_scan_visits_every_live_record_in_order() {
    let (_rm, fh, _dir) = setup(2000);

    let rids: Vec<Rid> = (0..9)
        .map(|i| fh.insert_record(&record(i, 2000)).unwrap())
        .collect();
    fh.delete_record(rids[0]).unwrap();
    fh.delete_record(rids[4]).unwrap();
    fh.delete_record(rids[8]).unwrap();

    let visited: Vec<Rid> = fh.scan().unwrap().map(|r| r.unwrap()).collect();

    let mut expected: Vec<Rid> = rids
        .iter()
        .enumerate()
        .filter(|(i, _)| ![0, 4, 8].contains(i))
        .map(|(_, &rid)| rid)
        .collect();
    expected.sort_by_key(|rid| (rid.page_no, rid.slot_no));

    assert_eq!(visited, expected);
}

#[test]
fn test_scan_of_empty_file() {
    let (_rm, fh, _dir) = setup(16);
    assert_eq!(fh.scan().unwrap().count(), 0);
}

#[test]
fn test_scan_cursor_stepping() {
    let (_rm, fh, _dir) = setup(16);

    let r0 = fh.insert_record(&record(1, 16)).unwrap();
    let r1 = fh.insert_record(&record(2, 16)).unwrap();

    let mut scan = fh.scan().unwrap();
    assert!(!scan.is_end());
    assert_eq!(scan.rid(), Some(r0));

    assert_eq!(scan.next().unwrap(), Some(r0));
    assert_eq!(scan.rid(), Some(r1));
    assert_eq!(scan.next().unwrap(), Some(r1));

    assert!(scan.is_end());
    assert_eq!(scan.rid(), None);
    assert_eq!(scan.next().unwrap(), None);
}

#[test]
fn test_records_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let dm = Arc::new(DiskManager::with_log_path(dir.path().join("rm.log")));
    let bpm = Arc::new(BufferPoolManager::new(16, ReplacerKind::Lru, dm.clone()));
    let rm = RecordManager::new(dm, bpm);
    let path = dir.path().join("reopen.db");

    rm.create_file(&path, 32).unwrap();
    let rids = {
        let fh = rm.open_file(&path).unwrap();
        let rids: Vec<Rid> = (0..20)
            .map(|i| fh.insert_record(&record(i, 32)).unwrap())
            .collect();
        rm.close_file(fh).unwrap();
        rids
    };

    let fh = rm.open_file(&path).unwrap();
    for (i, &rid) in rids.iter().enumerate() {
        assert_eq!(fh.get_record(rid).unwrap(), record(i as u8, 32));
    }

    // Fresh inserts must not collide with pre-existing pages.
    let rid = fh.insert_record(&record(200, 32)).unwrap();
    assert_eq!(fh.get_record(rid).unwrap(), record(200, 32));
    rm.close_file(fh).unwrap();
}

#[test]
fn test_insert_at_replays_into_place() {
    let (_rm, fh, _dir) = setup(2000);

    // Replay inserts at positions that skip over missing pages.
    fh.insert_record_at(Rid::new(2, 1), &record(9, 2000)).unwrap();
    fh.insert_record_at(Rid::new(1, 0), &record(8, 2000)).unwrap();

    assert_eq!(fh.get_record(Rid::new(2, 1)).unwrap(), record(9, 2000));
    assert_eq!(fh.get_record(Rid::new(1, 0)).unwrap(), record(8, 2000));

    // Regular inserts keep working against the replayed layout.
    let rid = fh.insert_record(&record(7, 2000)).unwrap();
    assert_eq!(fh.get_record(rid).unwrap(), record(7, 2000));
}
