//! Whole-log permutation of asynchronous writes.

use crate::epoch::{Epoch, EpochOp};
use crate::permuter::CrashState;
use crate::set::SlotPool;

pub struct RandomPermuter {
    rng: fastrand::Rng,
}

impl RandomPermuter {
    pub fn new(seed: u64) -> RandomPermuter {
        RandomPermuter {
            rng: fastrand::Rng::with_seed(seed),
        }
    }

    /// Every epoch of the log, with asynchronous writes moved to random
    /// positions inside their epoch.
    pub fn generate(&mut self, epochs: &[Epoch]) -> (CrashState, bool) {
        let last = match epochs.last() {
            Some(last) => last,
            None => return (CrashState::empty(), false),
        };
        let mut ops = Vec::with_capacity(epochs.iter().map(Epoch::len).sum());
        for epoch in epochs {
            ops.extend(self.permute_epoch(epoch));
        }
        (
            CrashState {
                ops,
                last_checkpoint: last.checkpoint_epoch,
            },
            true,
        )
    }

    fn permute_epoch(&mut self, epoch: &Epoch) -> Vec<EpochOp> {
        let reorderable = epoch.reorderable_ops();

        // Split into ops that keep their relative order and async writes. Each
        // async write remembers the last ordered op submitted before it.
        let mut ordered: Vec<&EpochOp> = Vec::new();
        let mut unordered: Vec<(&EpochOp, Option<usize>)> = Vec::new();
        for op in reorderable {
            if op.record.is_async_write() {
                unordered.push((op, ordered.len().checked_sub(1)));
            } else {
                ordered.push(op);
            }
        }

        let mut slots: Vec<Option<EpochOp>> = vec![None; reorderable.len()];
        let mut pool = SlotPool::new(reorderable.len());
        let mut next_ordered = 0;

        // Ordered ops always take the lowest empty slot, so every slot still
        // empty afterwards comes later in the output.
        // unwrap: the pool holds exactly one slot per reorderable op.
        for (op, nearest_sync) in unordered {
            if let Some(nearest_sync) = nearest_sync {
                while next_ordered <= nearest_sync {
                    let slot = pool.take_first().unwrap();
                    slots[slot] = Some(ordered[next_ordered].clone());
                    next_ordered += 1;
                }
            }
            let slot = pool.take_random(&mut self.rng).unwrap();
            slots[slot] = Some(op.clone());
        }
        for op in &ordered[next_ordered..] {
            let slot = pool.take_first().unwrap();
            slots[slot] = Some((*op).clone());
        }
        debug_assert!(pool.is_empty());

        let mut result: Vec<EpochOp> = slots.into_iter().flatten().collect();
        if let Some(barrier) = epoch.barrier() {
            result.push(barrier.clone());
        }
        result
    }
}
