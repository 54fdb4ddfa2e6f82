//! Fixed-capacity frame ring with overwrite-on-full semantics.
//!
//! One writer (the capture driver) and one reader (the orchestrator) share
//! the ring; every head/tail/full mutation happens under a single mutex so a
//! reader can never observe a torn update of the triple.

use std::sync::{Arc, Mutex};

use crate::types::Frame;

/// Circular store of the most recent frames. `push` always succeeds; once
/// the ring is full the oldest slot is evicted. Slot storage is allocated
/// once at construction.
pub struct FrameRing {
    inner: Mutex<RingState>,
}

struct RingState {
    slots: Vec<Option<Arc<Frame>>>,
    /// Next write position.
    head: usize,
    /// Oldest valid slot.
    tail: usize,
    /// Disambiguates `head == tail` between empty and full.
    full: bool,
    count: usize,
}

impl FrameRing {
    /// Create a ring holding at most `capacity` frames.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be at least 1");
        Self {
            inner: Mutex::new(RingState {
                slots: (0..capacity).map(|_| None).collect(),
                head: 0,
                tail: 0,
                full: false,
                count: 0,
            }),
        }
    }

    /// Publish a frame, evicting the oldest slot when full. Never blocks on
    /// capacity and never fails.
    pub fn push(&self, frame: Arc<Frame>) {
        let mut state = self.inner.lock().expect("frame ring poisoned");
        let capacity = state.slots.len();
        let head = state.head;
        state.slots[head] = Some(frame);
        if state.full {
            state.tail = (state.tail + 1) % capacity;
        } else {
            state.count += 1;
        }
        state.head = (state.head + 1) % capacity;
        state.full = state.head == state.tail;
    }

    /// The most recently pushed frame, or `None` while the ring is empty.
    /// Never blocks waiting for data.
    pub fn latest(&self) -> Option<Arc<Frame>> {
        let state = self.inner.lock().expect("frame ring poisoned");
        if state.count == 0 {
            return None;
        }
        let capacity = state.slots.len();
        let newest = (state.head + capacity - 1) % capacity;
        state.slots[newest].clone()
    }

    /// The oldest frame still held, or `None` while the ring is empty.
    pub fn oldest(&self) -> Option<Arc<Frame>> {
        let state = self.inner.lock().expect("frame ring poisoned");
        if state.count == 0 {
            return None;
        }
        state.slots[state.tail].clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("frame ring poisoned").count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().expect("frame ring poisoned").slots.len()
    }

    /// Drop every held frame and reset the indices. Used by teardown.
    pub fn clear(&self) {
        let mut state = self.inner.lock().expect("frame ring poisoned");
        for slot in state.slots.iter_mut() {
            *slot = None;
        }
        state.head = 0;
        state.tail = 0;
        state.full = false;
        state.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FrameFormat;

    fn frame(sequence: u64) -> Arc<Frame> {
        Arc::new(Frame {
            data: vec![0u8; 4],
            width: 1,
            height: 1,
            format: FrameFormat::Bgra8,
            sequence,
            timestamp_ms: sequence as i64,
        })
    }

    #[test]
    fn empty_ring_has_no_latest() {
        let ring = FrameRing::new(4);
        assert!(ring.latest().is_none());
        assert!(ring.oldest().is_none());
        assert_eq!(ring.len(), 0);
    }

    #[test]
    fn latest_tracks_most_recent_push() {
        let ring = FrameRing::new(3);
        for seq in 0..10 {
            ring.push(frame(seq));
            assert_eq!(ring.latest().unwrap().sequence, seq);
        }
    }

    #[test]
    fn count_never_exceeds_capacity() {
        for capacity in 1..6 {
            let ring = FrameRing::new(capacity);
            for seq in 0..(capacity as u64 * 3) {
                ring.push(frame(seq));
                assert!(ring.len() <= capacity);
            }
            assert_eq!(ring.len(), capacity);
        }
    }

    #[test]
    fn full_ring_evicts_exactly_the_oldest() {
        let ring = FrameRing::new(3);
        for seq in 0..3 {
            ring.push(frame(seq));
        }
        assert_eq!(ring.oldest().unwrap().sequence, 0);

        ring.push(frame(3));
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.oldest().unwrap().sequence, 1);
        assert_eq!(ring.latest().unwrap().sequence, 3);
    }

    #[test]
    fn wraparound_preserves_order() {
        let ring = FrameRing::new(2);
        for seq in 0..7 {
            ring.push(frame(seq));
        }
        assert_eq!(ring.oldest().unwrap().sequence, 5);
        assert_eq!(ring.latest().unwrap().sequence, 6);
    }

    #[test]
    fn capacity_one_always_holds_newest() {
        let ring = FrameRing::new(1);
        for seq in 0..5 {
            ring.push(frame(seq));
            assert_eq!(ring.len(), 1);
            assert_eq!(ring.latest().unwrap().sequence, seq);
            assert_eq!(ring.oldest().unwrap().sequence, seq);
        }
    }

    #[test]
    fn clear_resets_to_empty() {
        let ring = FrameRing::new(4);
        for seq in 0..6 {
            ring.push(frame(seq));
        }
        ring.clear();
        assert!(ring.is_empty());
        assert!(ring.latest().is_none());

        ring.push(frame(9));
        assert_eq!(ring.latest().unwrap().sequence, 9);
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn reader_holding_a_frame_survives_eviction() {
        let ring = FrameRing::new(2);
        ring.push(frame(0));
        let held = ring.latest().unwrap();
        for seq in 1..5 {
            ring.push(frame(seq));
        }
        // The evicted frame stays valid for the reader that cloned it.
        assert_eq!(held.sequence, 0);
    }
}
