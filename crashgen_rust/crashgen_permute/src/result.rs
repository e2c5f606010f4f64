use std::fmt;

use serde::Serialize;

use crashgen_common::state::CrashStateRecord;

use crate::permuter::CrashState;
use crate::sector::SectorCrashState;

/// A request, or one sector of it, that is part of a crash state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReportEntry {
    pub bio_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sector_index: Option<u32>,
}

impl fmt::Display for ReportEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sector_index {
            Some(sector) => write!(f, "({}, {})", self.bio_index, sector),
            None => write!(f, "({})", self.bio_index),
        }
    }
}

/// What the harness needs to know about a crash state: which requests to
/// apply in which order, and which checkpoint the result must reflect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrashStateReport {
    pub last_checkpoint: isize,
    pub entries: Vec<ReportEntry>,
}

impl CrashStateReport {
    pub fn num_ops(&self) -> usize {
        self.entries.len()
    }

    /// Number of entries that are only a part of a request.
    pub fn num_sectors(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.sector_index.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_record(&self, id: u64) -> CrashStateRecord {
        CrashStateRecord {
            id,
            last_checkpoint: self.last_checkpoint as i64,
            entries: self
                .entries
                .iter()
                .map(|e| (e.bio_index as u64, e.sector_index))
                .collect(),
        }
    }
}

impl From<&CrashState> for CrashStateReport {
    fn from(state: &CrashState) -> Self {
        CrashStateReport {
            last_checkpoint: state.last_checkpoint,
            entries: state
                .indices()
                .map(|bio_index| ReportEntry {
                    bio_index,
                    sector_index: None,
                })
                .collect(),
        }
    }
}

impl From<&SectorCrashState> for CrashStateReport {
    fn from(state: &SectorCrashState) -> Self {
        CrashStateReport {
            last_checkpoint: state.last_checkpoint,
            entries: state
                .writes
                .iter()
                .map(|w| ReportEntry {
                    bio_index: w.bio_index,
                    sector_index: w.sector_index,
                })
                .collect(),
        }
    }
}

impl fmt::Display for CrashStateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&itertools::join(&self.entries, ", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epoch::segment;
    use crate::epoch::tests::{flush, write};
    use crate::sector::to_sectors;
    use crashgen_common::record::{BioFlags, WriteRecord};

    #[test]
    fn test_report_from_state() {
        let epochs = segment(&[
            WriteRecord::checkpoint(),
            write(0, 512, BioFlags::empty()),
            flush(),
        ]);
        let state = CrashState {
            ops: epochs[0].ops.clone(),
            last_checkpoint: epochs[0].checkpoint_epoch,
        };
        let report = CrashStateReport::from(&state);
        assert_eq!(report.num_ops(), 2);
        assert_eq!(report.num_sectors(), 0);
        assert_eq!(report.last_checkpoint, 0);
        assert_eq!(report.to_string(), "(1), (2)");

        let record = report.to_record(7);
        assert_eq!(record.id, 7);
        assert_eq!(record.last_checkpoint, 0);
        assert_eq!(record.entries, vec![(1, None), (2, None)]);
    }

    #[test]
    fn test_report_from_sector_state() {
        let epochs = segment(&[write(0, 1024, BioFlags::empty())]);
        let state = SectorCrashState {
            writes: to_sectors(&epochs[0].ops[0], 512),
            last_checkpoint: -1,
        };
        let report = CrashStateReport::from(&state);
        assert_eq!(report.num_ops(), 2);
        assert_eq!(report.num_sectors(), 2);
        assert_eq!(report.to_string(), "(0, 0), (0, 1)");
        assert_eq!(report.to_record(0).last_checkpoint, -1);
    }

    #[test]
    fn test_empty_report() {
        let report = CrashStateReport::from(&CrashState::empty());
        assert!(report.is_empty());
        assert_eq!(report.to_string(), "");
        assert_eq!(report.last_checkpoint, -1);
    }

    #[test]
    fn test_report_yaml() {
        let report = CrashStateReport {
            last_checkpoint: 1,
            entries: vec![
                ReportEntry {
                    bio_index: 3,
                    sector_index: None,
                },
                ReportEntry {
                    bio_index: 4,
                    sector_index: Some(2),
                },
            ],
        };
        let yaml = serde_yaml::to_string(&report).unwrap();
        assert!(yaml.contains("last_checkpoint: 1"));
        assert!(yaml.contains("sector_index: 2"));
        assert_eq!(yaml.matches("sector_index").count(), 1);
    }
}
