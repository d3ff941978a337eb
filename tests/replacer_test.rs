//! Integration tests for the replacement policies behind the shared trait

use oxbase::buffer::{ClockReplacer, LruReplacer, Replacer};
use oxbase::common::FrameId;

fn frame(id: u32) -> FrameId {
    FrameId::new(id)
}

fn policies(capacity: usize) -> Vec<Box<dyn Replacer>> {
    vec![
        Box::new(LruReplacer::new(capacity)),
        Box::new(ClockReplacer::new(capacity)),
    ]
}

#[test]
fn test_empty_replacer_has_no_victim() {
    for replacer in policies(4) {
        assert_eq!(replacer.victim(), None);
        assert_eq!(replacer.size(), 0);
    }
}

#[test]
fn test_pinned_frames_are_never_victims() {
    for replacer in policies(4) {
        replacer.unpin(frame(0)).unwrap();
        replacer.unpin(frame(1)).unwrap();
        replacer.unpin(frame(2)).unwrap();

        replacer.pin(frame(1));
        assert_eq!(replacer.size(), 2);

        let mut victims = Vec::new();
        while let Some(victim) = replacer.victim() {
            victims.push(victim);
        }
        assert!(!victims.contains(&frame(1)));
        assert_eq!(victims.len(), 2);
    }
}

#[test]
fn test_unpin_is_idempotent() {
    for replacer in policies(4) {
        replacer.unpin(frame(2)).unwrap();
        replacer.unpin(frame(2)).unwrap();
        assert_eq!(replacer.size(), 1);

        assert_eq!(replacer.victim(), Some(frame(2)));
        assert_eq!(replacer.victim(), None);
    }
}

#[test]
fn test_victim_removes_from_eligible_set() {
    for replacer in policies(4) {
        replacer.unpin(frame(0)).unwrap();
        replacer.unpin(frame(1)).unwrap();

        let first = replacer.victim().unwrap();
        assert_eq!(replacer.size(), 1);
        let second = replacer.victim().unwrap();
        assert_ne!(first, second);
        assert_eq!(replacer.size(), 0);
    }
}

#[test]
fn test_out_of_capacity_unpin_is_rejected() {
    for replacer in policies(2) {
        assert!(replacer.unpin(frame(7)).is_err());
    }
}

#[test]
fn test_lru_evicts_oldest_unpin() {
    let replacer = LruReplacer::new(8);

    replacer.unpin(frame(3)).unwrap();
    replacer.unpin(frame(1)).unwrap();
    replacer.unpin(frame(2)).unwrap();

    // Frame 1 becomes the most recently unpinned.
    replacer.pin(frame(1));
    replacer.unpin(frame(1)).unwrap();

    assert_eq!(replacer.victim(), Some(frame(3)));
    assert_eq!(replacer.victim(), Some(frame(2)));
    assert_eq!(replacer.victim(), Some(frame(1)));
}

#[test]
fn test_clock_accessed_frame_survives_one_sweep() {
    let replacer = ClockReplacer::new(3);

    replacer.unpin(frame(0)).unwrap();
    replacer.unpin(frame(1)).unwrap();
    replacer.unpin(frame(2)).unwrap();

    // Sweep: every Accessed slot is downgraded once before any is taken,
    // so the hand wraps and frame 0 goes first, then 1, then 2.
    assert_eq!(replacer.victim(), Some(frame(0)));
    assert_eq!(replacer.victim(), Some(frame(1)));
    assert_eq!(replacer.victim(), Some(frame(2)));
    assert_eq!(replacer.victim(), None);
}
