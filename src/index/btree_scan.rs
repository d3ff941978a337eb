use crate::common::{Iid, Result, Rid};

use super::BTreeIndex;

/// Forward-only cursor over a key range of a B+tree, walking the leaf list
/// from `begin` (inclusive) to `end` (exclusive). Each step pins and
/// releases one leaf; no pin is held between calls.
///
/// The cursor is invalidated by concurrent mutation of the index; callers
/// that interleave scans with writes serialize at a higher level.
pub struct IxScan<'a> {
    index: &'a BTreeIndex,
    iid: Iid,
    end: Iid,
}

impl<'a> IxScan<'a> {
    pub(crate) fn new(index: &'a BTreeIndex, begin: Iid, end: Iid) -> Self {
        Self {
            index,
            iid: begin,
            end,
        }
    }

    /// Current position.
    pub fn iid(&self) -> Iid {
        self.iid
    }

    pub fn is_end(&self) -> bool {
        self.iid == self.end
    }

    /// Rid stored at the current position.
    pub fn rid(&self) -> Result<Rid> {
        self.index.get_rid(self.iid)
    }

    /// Steps to the next entry.
    pub fn next(&mut self) -> Result<()> {
        self.iid = self.index.next_iid(self.iid)?;
        Ok(())
    }
}

impl Iterator for IxScan<'_> {
    type Item = Result<Rid>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.is_end() {
            return None;
        }
        let rid = match self.rid() {
            Ok(rid) => rid,
            Err(e) => {
                self.iid = self.end;
                return Some(Err(e));
            }
        };
        if let Err(e) = IxScan::next(self) {
            self.iid = self.end;
            return Some(Err(e));
        }
        Some(Ok(rid))
    }
}
