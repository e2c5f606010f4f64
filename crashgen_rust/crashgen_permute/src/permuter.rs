use serde::{Deserialize, Serialize};

use crate::epoch::{Epoch, EpochOp};
use crate::full_epoch::FullEpochPermuter;
use crate::random::RandomPermuter;
use crate::random_subset::RandomSubsetPermuter;
use crate::sector::{SectorCrashState, SectorWrite};

/// Seed used unless the caller asks for another one, so that runs are reproducible.
pub const DEFAULT_SEED: u64 = 42;

/// One hypothetical disk image: the requests that made it to the disk, in
/// the order they are applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrashState {
    pub ops: Vec<EpochOp>,
    /// most recent checkpoint guaranteed to be visible, -1 before the first one
    pub last_checkpoint: isize,
}

impl CrashState {
    pub fn empty() -> CrashState {
        CrashState {
            ops: Vec::new(),
            last_checkpoint: -1,
        }
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Log indices of all requests, in crash state order.
    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.ops.iter().map(|op| op.original_index)
    }

    /// Hash of the ordered log indices; reordering changes the hash.
    pub fn hash(&self) -> CrashStateHash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&(self.ops.len() as u64).to_le_bytes());
        for index in self.indices() {
            hasher.update(&(index as u64).to_le_bytes());
        }
        CrashStateHash(hasher.finalize())
    }

    /// The same state addressed as whole requests in the sector model.
    pub fn to_sector_state(&self) -> SectorCrashState {
        SectorCrashState {
            writes: self.ops.iter().map(SectorWrite::whole).collect(),
            last_checkpoint: self.last_checkpoint,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct CrashStateHash(pub blake3::Hash);

impl std::fmt::Display for CrashStateHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.to_hex())
    }
}

/// Available crash state generation strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermuterKind {
    /// A random prefix of whole epochs, overlapping epochs shuffled.
    FullEpoch,
    /// The whole log with asynchronous writes moved around in their epoch.
    Random,
    /// Whole epochs followed by a random subset of the epoch we crash in.
    RandomSubset,
}

impl std::str::FromStr for PermuterKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<PermuterKind> {
        match s {
            "full_epoch" => Ok(PermuterKind::FullEpoch),
            "random" => Ok(PermuterKind::Random),
            "random_subset" => Ok(PermuterKind::RandomSubset),
            other => anyhow::bail!("unknown permuter {}", other),
        }
    }
}

pub enum Permuter {
    FullEpoch(FullEpochPermuter),
    Random(RandomPermuter),
    RandomSubset(RandomSubsetPermuter),
}

impl Permuter {
    pub fn new(kind: PermuterKind, seed: u64) -> Permuter {
        match kind {
            PermuterKind::FullEpoch => Permuter::FullEpoch(FullEpochPermuter::new(seed)),
            PermuterKind::Random => Permuter::Random(RandomPermuter::new(seed)),
            PermuterKind::RandomSubset => Permuter::RandomSubset(RandomSubsetPermuter::new(seed)),
        }
    }

    pub fn kind(&self) -> PermuterKind {
        match self {
            Permuter::FullEpoch(_) => PermuterKind::FullEpoch,
            Permuter::Random(_) => PermuterKind::Random,
            Permuter::RandomSubset(_) => PermuterKind::RandomSubset,
        }
    }

    /// Generate one candidate crash state. The flag tells whether more states
    /// may exist; it is only false if there is nothing to generate from.
    pub fn generate(&mut self, epochs: &[Epoch]) -> (CrashState, bool) {
        match self {
            Permuter::FullEpoch(p) => p.generate(epochs),
            Permuter::Random(p) => p.generate(epochs),
            Permuter::RandomSubset(p) => p.generate(epochs),
        }
    }

    /// Generate one candidate crash state that may contain parts of requests.
    /// Only the random subset strategy splits requests into sectors.
    pub fn generate_sectors(
        &mut self,
        epochs: &[Epoch],
        sector_size: u32,
    ) -> (SectorCrashState, bool) {
        match self {
            Permuter::RandomSubset(p) => p.generate_sectors(epochs, sector_size),
            other => {
                let (state, more) = other.generate(epochs);
                (state.to_sector_state(), more)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epoch::segment;
    use crate::epoch::tests::{flush, write};
    use crashgen_common::record::BioFlags;

    #[test]
    fn test_hash_is_order_sensitive() {
        let epochs = segment(&[
            write(0, 512, BioFlags::empty()),
            write(512, 512, BioFlags::empty()),
            flush(),
        ]);
        let forward = CrashState {
            ops: epochs[0].ops.clone(),
            last_checkpoint: -1,
        };
        let mut reversed = forward.clone();
        reversed.ops[..2].reverse();
        assert_ne!(forward.hash(), reversed.hash());
        assert_eq!(forward.hash(), forward.clone().hash());
        assert_ne!(forward.hash(), CrashState::empty().hash());
    }

    #[test]
    fn test_empty_epochs() {
        for kind in [
            PermuterKind::FullEpoch,
            PermuterKind::Random,
            PermuterKind::RandomSubset,
        ] {
            let mut permuter = Permuter::new(kind, DEFAULT_SEED);
            assert_eq!(permuter.kind(), kind);
            let (state, more) = permuter.generate(&[]);
            assert!(!more);
            assert!(state.is_empty());
            let (state, more) = permuter.generate_sectors(&[], 512);
            assert!(!more);
            assert!(state.writes.is_empty());
        }
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!(
            "random_subset".parse::<PermuterKind>().unwrap(),
            PermuterKind::RandomSubset
        );
        assert!("bogus".parse::<PermuterKind>().is_err());
    }

    #[test]
    fn test_same_seed_same_states() {
        let log: Vec<_> = (0..8)
            .map(|i| write(i * 256, 512, BioFlags::empty()))
            .chain(std::iter::once(flush()))
            .collect();
        let epochs = segment(&log);
        for kind in [
            PermuterKind::FullEpoch,
            PermuterKind::Random,
            PermuterKind::RandomSubset,
        ] {
            let mut a = Permuter::new(kind, 7);
            let mut b = Permuter::new(kind, 7);
            for _ in 0..20 {
                assert_eq!(a.generate(&epochs), b.generate(&epochs));
            }
        }
    }
}
