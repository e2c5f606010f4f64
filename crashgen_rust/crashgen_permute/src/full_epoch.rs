use crate::epoch::{Epoch, EpochOp};
use crate::permuter::CrashState;
use crate::set::SlotPool;

/// Crash after a random number of complete epochs. Epochs with overlapping
/// writes are shuffled, since their order is visible on disk.
pub struct FullEpochPermuter {
    rng: fastrand::Rng,
}

impl FullEpochPermuter {
    pub fn new(seed: u64) -> FullEpochPermuter {
        FullEpochPermuter {
            rng: fastrand::Rng::with_seed(seed),
        }
    }

    pub fn generate(&mut self, epochs: &[Epoch]) -> (CrashState, bool) {
        if epochs.is_empty() {
            return (CrashState::empty(), false);
        }
        let num_epochs = self.rng.usize(1..=epochs.len());
        let included = &epochs[..num_epochs];

        let mut ops = Vec::with_capacity(included.iter().map(Epoch::len).sum());
        for epoch in included {
            if epoch.overlaps {
                ops.extend(self.permute_epoch(epoch));
            } else {
                ops.extend_from_slice(&epoch.ops);
            }
        }
        (
            CrashState {
                ops,
                last_checkpoint: included[num_epochs - 1].checkpoint_epoch,
            },
            true,
        )
    }

    /// Shuffle all ops of the epoch but the barrier, which stays last.
    fn permute_epoch(&mut self, epoch: &Epoch) -> Vec<EpochOp> {
        let reorderable = epoch.reorderable_ops();
        let mut pool = SlotPool::new(reorderable.len());
        let mut result = Vec::with_capacity(pool.len() + 1);
        while let Some(slot) = pool.take_random(&mut self.rng) {
            result.push(reorderable[slot].clone());
        }
        if let Some(barrier) = epoch.barrier() {
            result.push(barrier.clone());
        }
        result
    }
}
