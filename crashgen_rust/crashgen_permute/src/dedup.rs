//! Drawing crash states until one turns up that was not seen before.

use std::cmp::max;
use std::collections::HashSet;

use tracing::debug;

use crate::epoch::Epoch;
use crate::permuter::{CrashState, CrashStateHash, Permuter};
use crate::sector::SectorCrashState;

/// Lower bound on the number of draws before giving up.
const MIN_RETRIES: usize = 1000;

#[derive(Debug, Default)]
pub struct Deduplicator {
    history: HashSet<CrashStateHash>,
}

impl Deduplicator {
    pub fn new() -> Deduplicator {
        Deduplicator {
            history: HashSet::new(),
        }
    }

    /// Number of distinct states handed out so far.
    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Forget all states, e.g. when starting on another log.
    pub fn reset(&mut self) {
        self.history.clear();
    }

    fn max_retries(&self) -> usize {
        max(MIN_RETRIES, 2 * self.history.len())
    }

    /// Draw from `permuter` until a state with a new hash appears. Returns
    /// `None` if the permuter has nothing to offer or the retry budget is
    /// used up, which usually means the state space is exhausted.
    pub fn next_unique_state(
        &mut self,
        permuter: &mut Permuter,
        epochs: &[Epoch],
    ) -> Option<CrashState> {
        let retries = self.max_retries();
        for _ in 0..retries {
            let (state, more) = permuter.generate(epochs);
            if !more {
                return None;
            }
            if self.history.insert(state.hash()) {
                return Some(state);
            }
        }
        debug!(
            permuter = ?permuter.kind(),
            retries,
            unique = self.history.len(),
            "no new crash state found"
        );
        None
    }

    /// Like `next_unique_state`, with requests possibly torn into sectors.
    pub fn next_unique_sector_state(
        &mut self,
        permuter: &mut Permuter,
        epochs: &[Epoch],
        sector_size: u32,
    ) -> Option<SectorCrashState> {
        let retries = self.max_retries();
        for _ in 0..retries {
            let (state, more) = permuter.generate_sectors(epochs, sector_size);
            if !more {
                return None;
            }
            if self.history.insert(state.hash()) {
                return Some(state);
            }
        }
        debug!(
            permuter = ?permuter.kind(),
            retries,
            unique = self.history.len(),
            sector_size,
            "no new sector crash state found"
        );
        None
    }
}
