use parking_lot::Mutex;

use crate::common::{FrameId, OxbaseError, Result};

use super::Replacer;

/// Per-slot state of the clock sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    /// Frame holds no evictable page (free or pinned)
    EmptyOrPinned,
    /// Reference bit clear: evictable on the next visit
    Untouched,
    /// Reference bit set: gets a second chance
    Accessed,
}

struct ClockState {
    slots: Vec<SlotState>,
    hand: usize,
}

/// Second-chance (clock) replacement over a circular array of frame slots.
///
/// `victim` sweeps from the hand: `Accessed` slots are downgraded to
/// `Untouched` and passed over, the first `Untouched` slot is taken. The
/// sweep terminates because it only runs when at least one slot is
/// non-empty, and every `Accessed` slot it touches is downgraded.
pub struct ClockReplacer {
    capacity: usize,
    state: Mutex<ClockState>,
}

impl ClockReplacer {
    pub fn new(num_frames: usize) -> Self {
        Self {
            capacity: num_frames,
            state: Mutex::new(ClockState {
                slots: vec![SlotState::EmptyOrPinned; num_frames],
                hand: 0,
            }),
        }
    }
}

impl Replacer for ClockReplacer {
    fn victim(&self) -> Option<FrameId> {
        let mut state = self.state.lock();
        if !state
            .slots
            .iter()
            .any(|&s| s != SlotState::EmptyOrPinned)
        {
            return None;
        }
        loop {
            let hand = state.hand;
            match state.slots[hand] {
                SlotState::Accessed => {
                    state.slots[hand] = SlotState::Untouched;
                }
                SlotState::Untouched => {
                    state.slots[hand] = SlotState::EmptyOrPinned;
                    state.hand = (hand + 1) % self.capacity;
                    return Some(FrameId::new(hand as u32));
                }
                SlotState::EmptyOrPinned => {}
            }
            state.hand = (hand + 1) % self.capacity;
        }
    }

    fn pin(&self, frame_id: FrameId) {
        let mut state = self.state.lock();
        if frame_id.as_usize() < self.capacity {
            state.slots[frame_id.as_usize()] = SlotState::EmptyOrPinned;
        }
    }

    fn unpin(&self, frame_id: FrameId) -> Result<()> {
        let mut state = self.state.lock();
        if frame_id.as_usize() >= self.capacity {
            return Err(OxbaseError::ReplacerOverflow {
                frame: frame_id,
                capacity: self.capacity,
            });
        }
        // Only the first unpin after eviction sets the reference bit; an
        // already-Accessed slot keeps its recency.
        if state.slots[frame_id.as_usize()] == SlotState::EmptyOrPinned {
            state.slots[frame_id.as_usize()] = SlotState::Accessed;
        }
        Ok(())
    }

    fn size(&self) -> usize {
        self.state
            .lock()
            .slots
            .iter()
            .filter(|&&s| s != SlotState::EmptyOrPinned)
            .count()
    }
}
