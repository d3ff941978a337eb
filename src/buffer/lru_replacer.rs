use std::collections::{HashSet, VecDeque};

use parking_lot::Mutex;

use crate::common::{FrameId, OxbaseError, Result};

use super::Replacer;

struct LruState {
    /// Eligible frames ordered by unpin recency, oldest at the front
    queue: VecDeque<FrameId>,
    /// Membership index over `queue`
    members: HashSet<FrameId>,
}

/// Least-recently-used replacement: `victim` pops the frame whose last
/// unpin is oldest, `unpin` appends at the tail.
pub struct LruReplacer {
    max_size: usize,
    state: Mutex<LruState>,
}

impl LruReplacer {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            state: Mutex::new(LruState {
                queue: VecDeque::with_capacity(max_size),
                members: HashSet::with_capacity(max_size),
            }),
        }
    }
}

impl Replacer for LruReplacer {
    fn victim(&self) -> Option<FrameId> {
        let mut state = self.state.lock();
        let frame_id = state.queue.pop_front()?;
        state.members.remove(&frame_id);
        Some(frame_id)
    }

    fn pin(&self, frame_id: FrameId) {
        let mut state = self.state.lock();
        if state.members.remove(&frame_id) {
            if let Some(pos) = state.queue.iter().position(|&f| f == frame_id) {
                let _ = state.queue.remove(pos);
            }
        }
    }

    fn unpin(&self, frame_id: FrameId) -> Result<()> {
        let mut state = self.state.lock();
        if frame_id.as_usize() >= self.max_size {
            return Err(OxbaseError::ReplacerOverflow {
                frame: frame_id,
                capacity: self.max_size,
            });
        }
        if state.members.contains(&frame_id) {
            return Ok(());
        }
        state.queue.push_back(frame_id);
        state.members.insert(frame_id);
        Ok(())
    }

    fn size(&self) -> usize {
        self.state.lock().queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_victim_order() {
        let replacer = LruReplacer::new(8);

        replacer.unpin(FrameId::new(0)).unwrap();
        replacer.unpin(FrameId::new(1)).unwrap();
        replacer.unpin(FrameId::new(2)).unwrap();
        assert_eq!(replacer.size(), 3);

        assert_eq!(replacer.victim(), Some(FrameId::new(0)));
        assert_eq!(replacer.victim(), Some(FrameId::new(1)));
        assert_eq!(replacer.victim(), Some(FrameId::new(2)));
        assert_eq!(replacer.victim(), None);
    }

    #[test]
    fn test_lru_pin_removes_frame() {
        let replacer = LruReplacer::new(8);

        replacer.unpin(FrameId::new(0)).unwrap();
        replacer.unpin(FrameId::new(1)).unwrap();
        replacer.pin(FrameId::new(0));

        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.victim(), Some(FrameId::new(1)));
        assert_eq!(replacer.victim(), None);
    }

    #[test]
    fn test_lru_unpin_is_idempotent() {
        let replacer = LruReplacer::new(8);

        replacer.unpin(FrameId::new(3)).unwrap();
        replacer.unpin(FrameId::new(3)).unwrap();

        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.victim(), Some(FrameId::new(3)));
        assert_eq!(replacer.victim(), None);
    }

    #[test]
    fn test_lru_unpin_moves_to_tail_after_reuse() {
        let replacer = LruReplacer::new(8);

        replacer.unpin(FrameId::new(0)).unwrap();
        replacer.unpin(FrameId::new(1)).unwrap();

        // Re-pin and unpin frame 0: it becomes the most recent.
        replacer.pin(FrameId::new(0));
        replacer.unpin(FrameId::new(0)).unwrap();

        assert_eq!(replacer.victim(), Some(FrameId::new(1)));
        assert_eq!(replacer.victim(), Some(FrameId::new(0)));
    }

    #[test]
    fn test_lru_overflow_is_an_error() {
        let replacer = LruReplacer::new(2);

        replacer.unpin(FrameId::new(0)).unwrap();
        replacer.unpin(FrameId::new(1)).unwrap();
        assert!(matches!(
            replacer.unpin(FrameId::new(2)),
            Err(OxbaseError::ReplacerOverflow { .. })
        ));
    }
}
