use crate::epoch::{Epoch, EpochOp};
use crate::permuter::CrashState;
use crate::sector::{coalesce_sectors, to_sectors, SectorCrashState, SectorWrite};
use crate::set::pick_subset;

/// Crash in the middle of a random epoch: all epochs before it are complete,
/// of the epoch we crash in only a random subset of the requests made it to
/// the disk.
pub struct RandomSubsetPermuter {
    rng: fastrand::Rng,
}

/// Where to crash: after `num_epochs - 1` whole epochs and `num_requests`
/// requests of the last one.
struct CrashPoint {
    num_epochs: usize,
    num_requests: usize,
    last_checkpoint: isize,
}

impl RandomSubsetPermuter {
    pub fn new(seed: u64) -> RandomSubsetPermuter {
        RandomSubsetPermuter {
            rng: fastrand::Rng::with_seed(seed),
        }
    }

    fn pick_crash_point(&mut self, epochs: &[Epoch]) -> CrashPoint {
        let num_epochs = self.rng.usize(1..=epochs.len());
        let target = &epochs[num_epochs - 1];
        let num_requests = if target.is_empty() {
            0
        } else {
            self.rng.usize(1..=target.len())
        };
        // A partially written epoch may not have completed its checkpoint.
        let last_checkpoint = if num_requests == target.len() {
            target.checkpoint_epoch
        } else if num_epochs > 1 {
            epochs[num_epochs - 2].checkpoint_epoch
        } else {
            0
        };
        CrashPoint {
            num_epochs,
            num_requests,
            last_checkpoint,
        }
    }

    pub fn generate(&mut self, epochs: &[Epoch]) -> (CrashState, bool) {
        if epochs.is_empty() {
            return (CrashState::empty(), false);
        }
        let point = self.pick_crash_point(epochs);
        let (complete, target) = epochs[..point.num_epochs].split_at(point.num_epochs - 1);

        let mut ops: Vec<EpochOp> = complete.iter().flat_map(|e| e.ops.iter().cloned()).collect();
        ops.extend(self.subset_epoch(&target[0], point.num_requests));
        (
            CrashState {
                ops,
                last_checkpoint: point.last_checkpoint,
            },
            true,
        )
    }

    /// Choose `requested` ops of the epoch, keeping their order. The barrier is
    /// only included with the complete epoch. A journal commit, i.e. everything
    /// from the first journal request to the end of a barrier epoch, is either
    /// included completely or not at all, so fewer ops than requested may be
    /// returned.
    pub fn subset_epoch(&mut self, epoch: &Epoch, requested: usize) -> Vec<EpochOp> {
        assert!(
            requested <= epoch.len(),
            "BUG: {} requests of an epoch with {} ops",
            requested,
            epoch.len()
        );
        if requested == 0 {
            return Vec::new();
        }

        if epoch.has_barrier {
            if let Some(journal_start) = epoch.ops.iter().position(|op| op.record.is_journal()) {
                if requested == epoch.len() {
                    return epoch.ops.clone();
                }
                if requested > journal_start {
                    // would tear the journal commit, drop it instead
                    return epoch.ops[..journal_start].to_vec();
                }
                return pick_subset(&mut self.rng, &epoch.ops[..journal_start], requested);
            }

            if requested == epoch.len() {
                return epoch.ops.clone();
            }
        }
        pick_subset(&mut self.rng, epoch.reorderable_ops(), requested)
    }

    /// Like `generate`, but the requests of the epoch we crash in are split
    /// into `sector_size` pieces and only a random subset of the pieces is kept.
    pub fn generate_sectors(
        &mut self,
        epochs: &[Epoch],
        sector_size: u32,
    ) -> (SectorCrashState, bool) {
        if epochs.is_empty() {
            return (SectorCrashState::empty(), false);
        }
        let point = self.pick_crash_point(epochs);
        let target = &epochs[point.num_epochs - 1];

        let mut writes: Vec<SectorWrite> = epochs[..point.num_epochs - 1]
            .iter()
            .flat_map(|e| e.ops.iter().map(SectorWrite::whole))
            .collect();

        if point.num_requests == target.len() && target.has_barrier {
            // the whole epoch completed, nothing may be torn
            writes.extend(target.ops.iter().map(SectorWrite::whole));
        } else {
            let sectors: Vec<SectorWrite> = target.ops[..point.num_requests]
                .iter()
                .flat_map(|op| to_sectors(op, sector_size))
                .collect();
            let sectors = coalesce_sectors(sectors);
            if !sectors.is_empty() {
                let num_sectors = self.rng.usize(1..=sectors.len());
                writes.extend(pick_subset(&mut self.rng, &sectors, num_sectors));
            }
        }

        (
            SectorCrashState {
                writes,
                last_checkpoint: point.last_checkpoint,
            },
            true,
        )
    }
}
