//! Generating crash states from a log of block layer requests.
//!
//! The log is split into epochs once with [`segment`]; a [`Permuter`] then
//! draws candidate crash states from the epochs and a [`Deduplicator`] keeps
//! drawing until a state turns up that was not seen before.

pub mod config;
pub mod dedup;
pub mod epoch;
mod full_epoch;
pub mod permuter;
mod random;
mod random_subset;
pub mod result;
pub mod sector;
mod set;

pub use dedup::Deduplicator;
pub use epoch::{segment, Epoch, EpochOp, OverlapTracker};
pub use full_epoch::FullEpochPermuter;
pub use permuter::{CrashState, CrashStateHash, Permuter, PermuterKind, DEFAULT_SEED};
pub use random::RandomPermuter;
pub use random_subset::RandomSubsetPermuter;
pub use result::{CrashStateReport, ReportEntry};
pub use sector::{SectorCrashState, SectorWrite};
