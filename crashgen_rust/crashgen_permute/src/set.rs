//! Utility functions for drawing slots and subsets.

use bitvec::vec::BitVec;

/// Pool of still-empty output slots `[0, n)`, kept in ascending order.
#[derive(Debug, Clone)]
pub struct SlotPool {
    empty: Vec<usize>,
}

impl SlotPool {
    pub fn new(slots: usize) -> SlotPool {
        SlotPool {
            empty: (0..slots).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.empty.len()
    }

    pub fn is_empty(&self) -> bool {
        self.empty.is_empty()
    }

    /// Remove and return a uniformly chosen empty slot.
    pub fn take_random(&mut self, rng: &mut fastrand::Rng) -> Option<usize> {
        if self.empty.is_empty() {
            return None;
        }
        let idx = rng.usize(..self.empty.len());
        Some(self.empty.remove(idx))
    }

    /// Remove and return the lowest empty slot.
    pub fn take_first(&mut self) -> Option<usize> {
        if self.empty.is_empty() {
            None
        } else {
            Some(self.empty.remove(0))
        }
    }
}

/// Choose `count` of `size` positions uniformly without replacement. The
/// result is a bitmap, so iterating it yields the positions in order.
pub fn random_subset(rng: &mut fastrand::Rng, size: usize, count: usize) -> BitVec {
    assert!(
        count <= size,
        "BUG: subset of {} elements requested from {}",
        count,
        size
    );
    let mut pool = SlotPool::new(size);
    let mut chosen = BitVec::repeat(false, size);
    for _ in 0..count {
        // unwrap: count <= size, so the pool never runs dry
        let slot = pool.take_random(rng).unwrap();
        chosen.set(slot, true);
    }
    chosen
}

/// Pick the elements of `vec` at the positions of a random subset.
pub fn pick_subset<T: Clone>(rng: &mut fastrand::Rng, vec: &[T], count: usize) -> Vec<T> {
    random_subset(rng, vec.len(), count)
        .iter_ones()
        .map(|idx| vec[idx].clone())
        .collect()
}
