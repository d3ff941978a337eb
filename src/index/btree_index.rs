use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffer::{BufferPoolManager, ReadPageGuard, WritePageGuard};
use crate::common::{
    FileId, Iid, OxbaseError, PageId, PageNo, Result, Rid, INVALID_PAGE_NO,
};

use super::btree_node::{IndexFileHeader, NodeMut, NodeRef};
use super::btree_scan::IxScan;

/// A pinned node page plus its identity. Dropping the handle releases the
/// pin; `view` marks the page dirty, `read` does not.
struct NodeHandle {
    page_no: PageNo,
    guard: WritePageGuard,
}

impl NodeHandle {
    fn view(&mut self, hdr: &IndexFileHeader) -> NodeMut<'_> {
        NodeMut::new(self.guard.data_mut(), hdr)
    }

    fn read(&self, hdr: &IndexFileHeader) -> NodeRef<'_> {
        NodeRef::new(self.guard.data(), hdr)
    }
}

/// Handle to an open B+tree index over fixed-length bytewise-compared keys.
///
/// The header mutex doubles as the per-index root latch: every public
/// operation, readers included, holds it for its whole duration, so tree
/// mutations are serialized and readers never observe a half-restructured
/// tree. Hand-over-hand latching could replace this without changing the
/// on-disk format.
pub struct BTreeIndex {
    fd: FileId,
    bpm: Arc<BufferPoolManager>,
    hdr: Mutex<IndexFileHeader>,
}

impl BTreeIndex {
    pub(crate) fn new(fd: FileId, bpm: Arc<BufferPoolManager>, hdr: IndexFileHeader) -> Self {
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
    pub fn header(&self) -> IndexFileHeader {
        *self.hdr.lock()
    }

    /// Looks up the rid stored under `key`.
    pub fn get_value(&self, key: &[u8]) -> Result<Option<Rid>> {
        let hdr = self.hdr.lock();
        self.check_key(&hdr, key)?;
        if hdr.root_page == INVALID_PAGE_NO {
            return Ok(None);
        }
        let guard = self.find_leaf(&hdr, key)?;
        let node = NodeRef::new(guard.data(), &hdr);
        Ok(node.leaf_lookup(key))
    }

    /// Inserts `(key, rid)`. Returns `false` without changing the tree when
    /// the key is already present; keys are unique.
    pub fn insert_entry(&self, key: &[u8], rid: Rid) -> Result<bool> {
        let mut hdr = self.hdr.lock();
        self.check_key(&hdr, key)?;

        // First key: bootstrap a root leaf.
        if hdr.root_page == INVALID_PAGE_NO {
            let mut root = self.create_node(&mut hdr)?;
            let mut node = root.view(&hdr);
            node.init(true);
            node.insert(key, rid);
            hdr.root_page = root.page_no;
            hdr.first_leaf = root.page_no;
            hdr.last_leaf = root.page_no;
            return Ok(true);
        }

        let leaf_page_no = self.find_leaf_page(&hdr, key)?;
        let mut leaf = self.fetch_node(leaf_page_no)?;

        if leaf.read(&hdr).leaf_lookup(key).is_some() {
            return Ok(false);
        }
        let new_size = leaf.view(&hdr).insert(key, rid);

        if new_size == hdr.btree_order as usize {
            let mut new_node = self.split(&mut hdr, &mut leaf)?;
            let split_key = new_node.read(&hdr).key(0).to_vec();
            self.insert_into_parent(&mut hdr, &mut leaf, &split_key, &mut new_node)?;
            if hdr.last_leaf == leaf.page_no {
                hdr.last_leaf = new_node.page_no;
            }
        }
        Ok(true)
    }

    /// Deletes `key`. Returns `false` when the key is absent.
    pub fn delete_entry(&self, key: &[u8]) -> Result<bool> {
        let mut hdr = self.hdr.lock();
        self.check_key(&hdr, key)?;
        if hdr.root_page == INVALID_PAGE_NO {
            return Ok(false);
        }

        let leaf_page_no = self.find_leaf_page(&hdr, key)?;
        let mut leaf = self.fetch_node(leaf_page_no)?;

        if leaf.read(&hdr).leaf_lookup(key).is_none() {
            return Ok(false);
        }
        leaf.view(&hdr).remove(key);

        self.maintain_parent(&hdr, &leaf)?;
        self.coalesce_or_redistribute(&mut hdr, leaf)?;
        Ok(true)
    }

    /// Position of the first entry with key `>= key`.
    pub fn lower_bound(&self, key: &[u8]) -> Result<Iid> {
        let hdr = self.hdr.lock();
        self.check_key(&hdr, key)?;
        self.bound(&hdr, key, false)
    }

    /// Position one past the last entry with key `<= key`.
    pub fn upper_bound(&self, key: &[u8]) -> Result<Iid> {
        let hdr = self.hdr.lock();
        self.check_key(&hdr, key)?;
        self.bound(&hdr, key, true)
    }

    /// Position of the first entry in the tree.
    pub fn leaf_begin(&self) -> Result<Iid> {
        let hdr = self.hdr.lock();
        if hdr.first_leaf == INVALID_PAGE_NO {
            return Ok(Iid::new(INVALID_PAGE_NO, 0));
        }
        Ok(Iid::new(hdr.first_leaf, 0))
    }

    /// Position one past the last entry in the tree.
    pub fn leaf_end(&self) -> Result<Iid> {
        let hdr = self.hdr.lock();
        self.leaf_end_locked(&hdr)
    }

    /// Resolves a scan position to the rid stored there.
    pub fn get_rid(&self, iid: Iid) -> Result<Rid> {
        let hdr = self.hdr.lock();
        if iid.page_no == INVALID_PAGE_NO {
            return Err(OxbaseError::IndexEntryNotFound(iid));
        }
        let guard = self.fetch_node_read(iid.page_no)?;
        let node = NodeRef::new(guard.data(), &hdr);
        if iid.slot_no >= node.num_key() {
            return Err(OxbaseError::IndexEntryNotFound(iid));
        }
        Ok(node.rid(iid.slot_no))
    }

    /// Scans `[lo, hi]` in key order.
    pub fn range_scan(&self, lo: &[u8], hi: &[u8]) -> Result<IxScan<'_>> {
        let begin = self.lower_bound(lo)?;
        let end = self.upper_bound(hi)?;
        Ok(IxScan::new(self, begin, end))
    }

    /// Scans the whole tree in key order.
    pub fn full_scan(&self) -> Result<IxScan<'_>> {
        let begin = self.leaf_begin()?;
        let end = self.leaf_end()?;
        Ok(IxScan::new(self, begin, end))
    }

    /// Advances a scan position by one entry, hopping to the next leaf when
    /// the current one is exhausted.
    pub(crate) fn next_iid(&self, iid: Iid) -> Result<Iid> {
        let hdr = self.hdr.lock();
        if iid.page_no == INVALID_PAGE_NO {
            return Ok(iid);
        }
        let guard = self.fetch_node_read(iid.page_no)?;
        let node = NodeRef::new(guard.data(), &hdr);
        let next = iid.slot_no + 1;
        if next < node.num_key() {
            return Ok(Iid::new(iid.page_no, next));
        }
        match node.next_leaf() {
            Some(next_leaf) => Ok(Iid::new(next_leaf, 0)),
            None => Ok(Iid::new(iid.page_no, node.num_key())),
        }
    }

    fn bound(&self, hdr: &IndexFileHeader, key: &[u8], upper: bool) -> Result<Iid> {
        if hdr.root_page == INVALID_PAGE_NO {
            return Ok(Iid::new(INVALID_PAGE_NO, 0));
        }
        let guard = self.find_leaf(hdr, key)?;
        let node = NodeRef::new(guard.data(), hdr);
        let slot_no = if upper {
            node.upper_bound(key)
        } else {
            node.lower_bound(key)
        };
        if slot_no == node.num_key() {
            // Past the last entry of this leaf: the position belongs to the
            // next leaf, or it is the end of the whole tree.
            return match node.next_leaf() {
                Some(next_leaf) => Ok(Iid::new(next_leaf, 0)),
                None => Ok(Iid::new(guard.page_id().page_no, slot_no)),
            };
        }
        Ok(Iid::new(guard.page_id().page_no, slot_no))
    }

    fn leaf_end_locked(&self, hdr: &IndexFileHeader) -> Result<Iid> {
        if hdr.last_leaf == INVALID_PAGE_NO {
            return Ok(Iid::new(INVALID_PAGE_NO, 0));
        }
        let guard = self.fetch_node_read(hdr.last_leaf)?;
        let node = NodeRef::new(guard.data(), hdr);
        Ok(Iid::new(hdr.last_leaf, node.num_key()))
    }

    /// Descends from the root to the leaf responsible for `key`, holding one
    /// pin at a time, and returns that leaf still pinned.
    fn find_leaf(&self, hdr: &IndexFileHeader, key: &[u8]) -> Result<ReadPageGuard> {
        let mut page_no = hdr.root_page;
        loop {
            let guard = self.fetch_node_read(page_no)?;
            let next = {
                let node = NodeRef::new(guard.data(), hdr);
                if node.is_leaf() {
                    None
                } else {
                    Some(node.internal_lookup(key))
                }
            };
            match next {
                None => return Ok(guard),
                Some(child) => page_no = child,
            }
        }
    }

    /// Leaf page number for `key`. Mutators re-fetch the page for writing;
    /// the root latch guarantees it cannot be restructured in between.
    fn find_leaf_page(&self, hdr: &IndexFileHeader, key: &[u8]) -> Result<PageNo> {
        let guard = self.find_leaf(hdr, key)?;
        Ok(guard.page_id().page_no)
    }

    /// Splits an over-capacity node, moving its upper half into a fresh
    /// right sibling. Leaves are spliced into the leaf list; an internal
    /// node re-parents the children it hands over.
    fn split(&self, hdr: &mut IndexFileHeader, node: &mut NodeHandle) -> Result<NodeHandle> {
        let order = hdr.btree_order as usize;
        let moved = order / 2;
        let keep = (order + 1) / 2;

        let mut new_node = self.create_node(hdr)?;

        let (is_leaf, moved_keys, moved_rids, old_next) = {
            let view = node.read(hdr);
            (
                view.is_leaf(),
                view.key_bytes(keep, order).to_vec(),
                view.rids(keep, order),
                view.next_leaf(),
            )
        };
        debug_assert_eq!(moved_rids.len(), moved);

        {
            let mut view = new_node.view(hdr);
            view.init(is_leaf);
            view.insert_pairs(0, &moved_keys, &moved_rids);
        }
        node.view(hdr).set_num_key(keep);

        if is_leaf {
            {
                let mut view = new_node.view(hdr);
                view.set_prev_leaf(Some(node.page_no));
                view.set_next_leaf(old_next);
            }
            node.view(hdr).set_next_leaf(Some(new_node.page_no));
            if let Some(next_page_no) = old_next {
                let mut next = self.fetch_node(next_page_no)?;
                next.view(hdr).set_prev_leaf(Some(new_node.page_no));
            }
        } else {
            for i in 0..moved {
                self.maintain_child(hdr, &mut new_node, i)?;
            }
        }

        Ok(new_node)
    }

    /// Hooks a freshly split-off right sibling into the tree, growing a new
    /// root when the split node was the root and recursing when the parent
    /// overflows in turn.
    fn insert_into_parent(
        &self,
        hdr: &mut IndexFileHeader,
        old_node: &mut NodeHandle,
        split_key: &[u8],
        new_node: &mut NodeHandle,
    ) -> Result<()> {
        let parent_link = old_node.read(hdr).parent();
        match parent_link {
            None => {
                let mut root = self.create_node(hdr)?;
                let old_first_key = old_node.read(hdr).key(0).to_vec();
                {
                    let mut view = root.view(hdr);
                    view.init(false);
                    view.insert_pairs(0, &old_first_key, &[Rid::internal(old_node.page_no)]);
                    view.insert_pairs(1, split_key, &[Rid::internal(new_node.page_no)]);
                }
                old_node.view(hdr).set_parent(Some(root.page_no));
                new_node.view(hdr).set_parent(Some(root.page_no));
                hdr.root_page = root.page_no;
            }
            Some(parent_page_no) => {
                let mut parent = self.fetch_node(parent_page_no)?;
                parent
                    .view(hdr)
                    .insert(split_key, Rid::internal(new_node.page_no));
                new_node.view(hdr).set_parent(Some(parent_page_no));

                if parent.read(hdr).num_key() == hdr.btree_order as usize {
                    let mut new_parent = self.split(hdr, &mut parent)?;
                    let key = new_parent.read(hdr).key(0).to_vec();
                    self.insert_into_parent(hdr, &mut parent, &key, &mut new_parent)?;
                }
            }
        }
        Ok(())
    }

    /// Restores the occupancy invariant after a delete. Takes ownership of
    /// the node handle; every path releases exactly one pin per node it
    /// touches, and pages are only deallocated after their pin is gone.
    fn coalesce_or_redistribute(
        &self,
        hdr: &mut IndexFileHeader,
        node: NodeHandle,
    ) -> Result<()> {
        let mut node = node;

        let parent_link = node.read(hdr).parent();
        let parent_page_no = match parent_link {
            None => return self.adjust_root(hdr, node),
            Some(page_no) => page_no,
        };
        if node.read(hdr).num_key() >= hdr.min_size() {
            return Ok(());
        }

        let mut parent = self.fetch_node(parent_page_no)?;
        let index = parent
            .read(hdr)
            .find_child(node.page_no)
            .ok_or_else(|| corrupted_child(parent_page_no, node.page_no))?;
        // The neighbor sits to the left except for the leftmost child,
        // which borrows from (or merges with) its right sibling.
        let neighbor_page_no = if index == 0 {
            parent.read(hdr).child(1)
        } else {
            parent.read(hdr).child(index - 1)
        };
        let mut neighbor = self.fetch_node(neighbor_page_no)?;

        if node.read(hdr).num_key() + neighbor.read(hdr).num_key() >= 2 * hdr.min_size() {
            self.redistribute(hdr, &mut neighbor, &mut node, &mut parent, index)
        } else {
            self.coalesce(hdr, neighbor, node, parent, index)
        }
    }

    /// Shrinks the tree at the top: an emptied leaf root ends the tree, an
    /// internal root with a single child hands the root role to that child.
    fn adjust_root(&self, hdr: &mut IndexFileHeader, root: NodeHandle) -> Result<()> {
        let (is_leaf, num_key) = {
            let view = root.read(hdr);
            (view.is_leaf(), view.num_key())
        };

        if is_leaf && num_key == 0 {
            let page_no = root.page_no;
            hdr.root_page = INVALID_PAGE_NO;
            hdr.first_leaf = INVALID_PAGE_NO;
            hdr.last_leaf = INVALID_PAGE_NO;
            drop(root);
            self.release_node(hdr, page_no)?;
        } else if !is_leaf && num_key == 1 {
            let child_page_no = root.read(hdr).child(0);
            let page_no = root.page_no;
            hdr.root_page = child_page_no;
            {
                let mut child = self.fetch_node(child_page_no)?;
                child.view(hdr).set_parent(None);
            }
            drop(root);
            self.release_node(hdr, page_no)?;
        }
        Ok(())
    }

    /// Moves one pair from `neighbor` into `node` and refreshes the parent
    /// separator covering the donor side.
    fn redistribute(
        &self,
        hdr: &mut IndexFileHeader,
        neighbor: &mut NodeHandle,
        node: &mut NodeHandle,
        parent: &mut NodeHandle,
        index: usize,
    ) -> Result<()> {
        if index == 0 {
            // node (left) takes neighbor's first pair.
            let (key, rid) = {
                let view = neighbor.read(hdr);
                (view.key(0).to_vec(), view.rid(0))
            };
            let pos = node.read(hdr).num_key();
            node.view(hdr).insert_pairs(pos, &key, &[rid]);
            neighbor.view(hdr).erase_pair(0);

            let new_first = neighbor.read(hdr).key(0).to_vec();
            let rank = parent
                .read(hdr)
                .find_child(neighbor.page_no)
                .ok_or_else(|| corrupted_child(parent.page_no, neighbor.page_no))?;
            parent.view(hdr).set_key(rank, &new_first);

            self.maintain_child(hdr, node, pos)
        } else {
            // node (right) takes neighbor's last pair at the front.
            let (key, rid) = {
                let view = neighbor.read(hdr);
                let last = view.num_key() - 1;
                (view.key(last).to_vec(), view.rid(last))
            };
            node.view(hdr).insert_pairs(0, &key, &[rid]);
            {
                let mut view = neighbor.view(hdr);
                let last = view.as_ref().num_key() - 1;
                view.erase_pair(last);
            }

            let new_first = node.read(hdr).key(0).to_vec();
            parent.view(hdr).set_key(index, &new_first);

            // The borrowed pair landed at slot 0.
            self.maintain_child(hdr, node, 0)
        }
    }

    /// Merges `node` into its left sibling, unsplices it from the leaf list,
    /// drops its parent entry, and recurses upward.
    fn coalesce(
        &self,
        hdr: &mut IndexFileHeader,
        neighbor: NodeHandle,
        node: NodeHandle,
        parent: NodeHandle,
        index: usize,
    ) -> Result<()> {
        let (mut neighbor, mut node) = (neighbor, node);
        let mut parent = parent;
        if index == 0 {
            // Keep the merge target on the left.
            std::mem::swap(&mut neighbor, &mut node);
        }

        let (node_keys, node_rids, node_is_leaf) = {
            let view = node.read(hdr);
            let num_key = view.num_key();
            (
                view.key_bytes(0, num_key).to_vec(),
                view.rids(0, num_key),
                view.is_leaf(),
            )
        };

        let pos = neighbor.read(hdr).num_key();
        let moved = node_rids.len();
        neighbor.view(hdr).insert_pairs(pos, &node_keys, &node_rids);
        if !node_is_leaf {
            for i in pos..pos + moved {
                self.maintain_child(hdr, &mut neighbor, i)?;
            }
        } else {
            self.erase_leaf(hdr, &mut node)?;
        }

        let node_page_no = node.page_no;
        let rank = parent
            .read(hdr)
            .find_child(node_page_no)
            .ok_or_else(|| corrupted_child(parent.page_no, node_page_no))?;
        parent.view(hdr).erase_pair(rank);

        drop(node);
        self.release_node(hdr, node_page_no)?;
        drop(neighbor);

        self.coalesce_or_redistribute(hdr, parent)
    }

    /// Copies a node's new first key into the parent separator, walking up
    /// until a separator is already correct.
    fn maintain_parent(&self, hdr: &IndexFileHeader, node: &NodeHandle) -> Result<()> {
        let mut current_page_no = node.page_no;
        let mut first_key = node.read(hdr).key(0).to_vec();
        let mut parent_link = node.read(hdr).parent();

        while let Some(parent_page_no) = parent_link {
            let mut parent = self.fetch_node(parent_page_no)?;
            let rank = parent
                .read(hdr)
                .find_child(current_page_no)
                .ok_or_else(|| corrupted_child(parent_page_no, current_page_no))?;
            if parent.read(hdr).key(rank) == &first_key[..] {
                break;
            }
            parent.view(hdr).set_key(rank, &first_key);

            current_page_no = parent.page_no;
            first_key = parent.read(hdr).key(0).to_vec();
            parent_link = parent.read(hdr).parent();
        }
        Ok(())
    }

    /// Points the parent field of `node`'s `child_index`-th child at `node`.
    /// A no-op on leaves.
    fn maintain_child(
        &self,
        hdr: &IndexFileHeader,
        node: &mut NodeHandle,
        child_index: usize,
    ) -> Result<()> {
        if node.read(hdr).is_leaf() {
            return Ok(());
        }
        let child_page_no = node.read(hdr).child(child_index);
        let mut child = self.fetch_node(child_page_no)?;
        child.view(hdr).set_parent(Some(node.page_no));
        Ok(())
    }

    /// Unsplices a leaf from the doubly linked leaf list, fixing up the
    /// first/last anchors in the header.
    fn erase_leaf(&self, hdr: &mut IndexFileHeader, leaf: &mut NodeHandle) -> Result<()> {
        let (prev, next) = {
            let view = leaf.read(hdr);
            (view.prev_leaf(), view.next_leaf())
        };
        match prev {
            Some(prev_page_no) => {
                let mut prev_node = self.fetch_node(prev_page_no)?;
                prev_node.view(hdr).set_next_leaf(next);
            }
            None => hdr.first_leaf = next.unwrap_or(INVALID_PAGE_NO),
        }
        match next {
            Some(next_page_no) => {
                let mut next_node = self.fetch_node(next_page_no)?;
                next_node.view(hdr).set_prev_leaf(prev);
            }
            None => hdr.last_leaf = prev.unwrap_or(INVALID_PAGE_NO),
        }
        Ok(())
    }

    /// Allocates and pins a fresh node page.
    fn create_node(&self, hdr: &mut IndexFileHeader) -> Result<NodeHandle> {
        let guard = self.bpm.new_page(self.fd)?;
        let page_no = guard.page_id().page_no;
        hdr.num_pages += 1;
        Ok(NodeHandle { page_no, guard })
    }

    /// Returns a deleted node's page to the pool.
    fn release_node(&self, hdr: &mut IndexFileHeader, page_no: PageNo) -> Result<()> {
        self.bpm.delete_page(PageId::new(self.fd, page_no))?;
        hdr.num_pages -= 1;
        Ok(())
    }

    fn fetch_node(&self, page_no: PageNo) -> Result<NodeHandle> {
        let guard = self.bpm.fetch_page_write(PageId::new(self.fd, page_no))?;
        Ok(NodeHandle { page_no, guard })
    }

    fn fetch_node_read(&self, page_no: PageNo) -> Result<ReadPageGuard> {
        self.bpm.fetch_page_read(PageId::new(self.fd, page_no))
    }

    fn check_key(&self, hdr: &IndexFileHeader, key: &[u8]) -> Result<()> {
        if key.len() != hdr.col_len as usize {
            return Err(OxbaseError::KeySizeMismatch {
                expected: hdr.col_len as usize,
                actual: key.len(),
            });
        }
        Ok(())
    }

    pub(crate) fn write_header_page(&self, disk: &crate::storage::DiskManager) -> Result<()> {
        let hdr = self.hdr.lock();
        let mut buf = [0u8; IndexFileHeader::SIZE];
        hdr.encode(&mut buf);
        disk.write_page(self.fd, 0, &buf)
    }
}

fn corrupted_child(parent: PageNo, child: PageNo) -> OxbaseError {
    OxbaseError::Corrupted(format!(
        "node {} is not a child of its parent {}",
        child, parent
    ))
}
