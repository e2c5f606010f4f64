//! Splitting a write log into epochs delimited by barrier requests.

use std::cmp::{max, min};
use std::ops::Range;

use tracing::debug;

use crashgen_common::record::WriteRecord;

/// A logged request placed into an epoch, together with its position in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpochOp {
    /// index of the request in the log, checkpoint markers included
    pub original_index: usize,
    pub record: WriteRecord,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Epoch {
    pub ops: Vec<EpochOp>,
    /// terminated by a barrier, which is then the last op
    pub has_barrier: bool,
    /// two ops of this epoch write to intersecting byte ranges
    pub overlaps: bool,
    pub num_meta: usize,
    /// -1 is before the first checkpoint
    pub checkpoint_epoch: isize,
}

impl Epoch {
    fn new(checkpoint_epoch: isize) -> Epoch {
        Epoch {
            ops: Vec::new(),
            has_barrier: false,
            overlaps: false,
            num_meta: 0,
            checkpoint_epoch,
        }
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// The terminating barrier, if any.
    pub fn barrier(&self) -> Option<&EpochOp> {
        if self.has_barrier {
            self.ops.last()
        } else {
            None
        }
    }

    /// All ops that may be reordered, i.e. everything except the barrier.
    pub fn reorderable_ops(&self) -> &[EpochOp] {
        if self.has_barrier {
            &self.ops[..self.ops.len() - 1]
        } else {
            &self.ops
        }
    }
}

fn range_overlap<T>(r1: &Range<T>, r2: &Range<T>) -> Range<T>
where
    T: std::cmp::Ord + Copy,
{
    Range {
        start: max(r1.start, r2.start),
        end: min(r1.end, r2.end),
    }
}

/// Sorted list of disjoint byte ranges written so far in one epoch.
#[derive(Debug, Default)]
pub struct OverlapTracker {
    ranges: Vec<Range<u64>>,
}

impl OverlapTracker {
    pub fn new() -> Self {
        OverlapTracker { ranges: Vec::new() }
    }

    pub fn ranges(&self) -> &[Range<u64>] {
        &self.ranges
    }

    /// Record a written range. Returns whether it intersects anything recorded
    /// before. Intersecting ranges are merged, others are inserted in order.
    pub fn find_overlaps_and_insert(&mut self, range: Range<u64>) -> bool {
        if range.is_empty() {
            return false;
        }
        for i in 0..self.ranges.len() {
            if !range_overlap(&self.ranges[i], &range).is_empty() {
                let merged = min(self.ranges[i].start, range.start)..max(self.ranges[i].end, range.end);
                // the extended range may now reach ranges after it
                let mut end = merged.end;
                let mut j = i + 1;
                while j < self.ranges.len() && self.ranges[j].start < end {
                    end = max(end, self.ranges[j].end);
                    j += 1;
                }
                self.ranges.splice(i..j, std::iter::once(merged.start..end));
                return true;
            }
            if self.ranges[i].start >= range.end {
                self.ranges.insert(i, range);
                return false;
            }
        }
        self.ranges.push(range);
        false
    }
}

/// The epoch currently being filled.
struct EpochBuilder {
    epoch: Epoch,
    tracker: OverlapTracker,
    saw_checkpoint: bool,
}

impl EpochBuilder {
    fn new(checkpoint_epoch: isize) -> Self {
        EpochBuilder {
            epoch: Epoch::new(checkpoint_epoch),
            tracker: OverlapTracker::new(),
            saw_checkpoint: false,
        }
    }

    fn push(&mut self, original_index: usize, record: WriteRecord) {
        if self.tracker.find_overlaps_and_insert(record.range()) {
            self.epoch.overlaps = true;
        }
        if record.is_meta() {
            self.epoch.num_meta += 1;
        }
        self.epoch.ops.push(EpochOp {
            original_index,
            record,
        });
    }

    fn finish(mut self, has_barrier: bool) -> Epoch {
        self.epoch.has_barrier = has_barrier;
        self.epoch
    }
}

/// Partition the log into epochs. Every barrier closes the current epoch; a
/// flush that also carries data is split so that only the flush closes the
/// epoch and the data opens the next one.
pub fn segment(log: &[WriteRecord]) -> Vec<Epoch> {
    let mut epochs = Vec::new();
    let mut checkpoint: isize = -1;
    let mut current: Option<EpochBuilder> = None;

    for (index, record) in log.iter().enumerate() {
        let mut builder = current
            .take()
            .unwrap_or_else(|| EpochBuilder::new(checkpoint));

        if record.is_checkpoint() {
            // Checkpoint markers are bookkeeping only and never become ops.
            checkpoint += 1;
            builder.epoch.checkpoint_epoch = checkpoint;
            builder.saw_checkpoint = true;
            current = Some(builder);
            continue;
        }

        if !record.is_barrier() {
            builder.push(index, record.clone());
            current = Some(builder);
            continue;
        }

        if record.is_flush_with_data() {
            let (flush_half, data_half) = record.split_flush();
            builder.push(index, flush_half);
            epochs.push(builder.finish(true));
            let mut next = EpochBuilder::new(checkpoint);
            next.push(index, data_half);
            current = Some(next);
        } else {
            builder.push(index, record.clone());
            epochs.push(builder.finish(true));
        }
    }

    if let Some(builder) = current {
        if !builder.epoch.ops.is_empty() || builder.saw_checkpoint {
            epochs.push(builder.finish(false));
        }
    }

    debug!(
        records = log.len(),
        epochs = epochs.len(),
        overlapping = epochs.iter().filter(|e| e.overlaps).count(),
        "segmented log"
    );
    epochs
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crashgen_common::record::BioFlags;

    pub fn write(sector: u64, size: u32, flags: BioFlags) -> WriteRecord {
        WriteRecord::with_payload(sector, BioFlags::WRITE | flags, vec![0xaa; size as usize])
    }

    pub fn flush() -> WriteRecord {
        WriteRecord::new(0, 0, BioFlags::WRITE | BioFlags::FLUSH)
    }

    fn indices(epoch: &Epoch) -> Vec<usize> {
        epoch.ops.iter().map(|op| op.original_index).collect()
    }

    #[test]
    fn test_flush_data_split() {
        let log = vec![
            WriteRecord::checkpoint(),
            write(0, 4096, BioFlags::SYNC),
            write(4096, 4096, BioFlags::empty()),
            write(0, 512, BioFlags::FLUSH),
        ];
        let epochs = segment(&log);
        assert_eq!(epochs.len(), 2);

        let first = &epochs[0];
        assert_eq!(indices(first), vec![1, 2, 3]);
        assert!(first.has_barrier);
        assert_eq!(first.checkpoint_epoch, 0);
        let flush_half = &first.ops[2].record;
        assert_eq!(flush_half.flags, BioFlags::FLUSH);
        assert_eq!(flush_half.size, 0);
        assert!(flush_half.payload.is_none());

        let second = &epochs[1];
        assert_eq!(indices(second), vec![3]);
        assert!(!second.has_barrier);
        assert_eq!(second.checkpoint_epoch, 0);
        let data_half = &second.ops[0].record;
        assert_eq!(data_half.sector, 0);
        assert_eq!(data_half.size, 512);
        assert!(!data_half.has_flush_flag());
        assert!(data_half.payload.is_some());
    }

    #[test]
    fn test_fua_terminated() {
        let mut log: Vec<WriteRecord> = (0..9)
            .map(|i| {
                let flags = if i % 3 == 0 {
                    BioFlags::SYNC
                } else {
                    BioFlags::empty()
                };
                write(4096 * i, 4096, flags)
            })
            .collect();
        log.insert(0, WriteRecord::checkpoint());
        log.push(write(9 * 4096, 4096, BioFlags::FUA));
        let epochs = segment(&log);
        assert_eq!(epochs.len(), 1);
        assert_eq!(epochs[0].len(), 10);
        assert!(epochs[0].has_barrier);
        assert!(!epochs[0].overlaps);
        assert_eq!(epochs[0].num_meta, 0);
        assert_eq!(indices(&epochs[0]), (1..=10).collect::<Vec<_>>());
        assert!(epochs[0].barrier().unwrap().record.has_fua_flag());
        assert_eq!(epochs[0].reorderable_ops().len(), 9);
    }

    #[test]
    fn test_overlap_scenarios() {
        let overlapping = segment(&[write(0, 4096, BioFlags::empty()), write(2048, 4096, BioFlags::empty())]);
        assert!(overlapping[0].overlaps);
        let adjacent = segment(&[write(0, 4096, BioFlags::empty()), write(4096, 4096, BioFlags::empty())]);
        assert!(!adjacent[0].overlaps);
    }

    #[test]
    fn test_overlap_only_within_epoch() {
        let log = vec![
            write(0, 4096, BioFlags::empty()),
            flush(),
            write(0, 4096, BioFlags::empty()),
        ];
        let epochs = segment(&log);
        assert_eq!(epochs.len(), 2);
        assert!(!epochs[0].overlaps);
        assert!(!epochs[1].overlaps);
    }

    #[test]
    fn test_barrier_data_counts_for_overlap() {
        let log = vec![
            write(0, 4096, BioFlags::empty()),
            write(0, 8192, BioFlags::FUA),
        ];
        let epochs = segment(&log);
        assert!(epochs[0].overlaps);
    }

    #[test]
    fn test_checkpoints_and_meta() {
        let log = vec![
            WriteRecord::checkpoint(),
            write(0, 512, BioFlags::META),
            flush(),
            WriteRecord::checkpoint(),
            write(512, 512, BioFlags::META),
            write(1024, 512, BioFlags::empty()),
            flush(),
            WriteRecord::checkpoint(),
        ];
        let epochs = segment(&log);
        assert_eq!(epochs.len(), 3);
        assert_eq!(epochs[0].checkpoint_epoch, 0);
        assert_eq!(epochs[0].num_meta, 1);
        assert_eq!(epochs[1].checkpoint_epoch, 1);
        assert_eq!(epochs[1].num_meta, 1);
        // trailing checkpoint keeps its own, empty epoch
        assert!(epochs[2].is_empty());
        assert!(!epochs[2].has_barrier);
        assert_eq!(epochs[2].checkpoint_epoch, 2);
    }

    #[test]
    fn test_no_checkpoint() {
        let epochs = segment(&[write(0, 512, BioFlags::empty())]);
        assert_eq!(epochs[0].checkpoint_epoch, -1);
    }

    #[test]
    fn test_empty_log() {
        assert!(segment(&[]).is_empty());
    }

    #[test]
    fn test_leading_and_consecutive_barriers() {
        let epochs = segment(&[flush(), flush(), write(0, 512, BioFlags::empty())]);
        assert_eq!(epochs.len(), 3);
        assert_eq!(indices(&epochs[0]), vec![0]);
        assert_eq!(indices(&epochs[1]), vec![1]);
        assert!(epochs[1].has_barrier);
        assert!(!epochs[2].has_barrier);
    }

    #[test]
    fn test_tracker_sorted_insert() {
        let mut tracker = OverlapTracker::new();
        assert!(!tracker.find_overlaps_and_insert(100..200));
        assert!(!tracker.find_overlaps_and_insert(0..50));
        // tail insert must not be skipped
        assert!(!tracker.find_overlaps_and_insert(300..400));
        assert!(!tracker.find_overlaps_and_insert(50..100));
        assert_eq!(tracker.ranges(), &[0..50, 50..100, 100..200, 300..400]);
        assert!(tracker.find_overlaps_and_insert(150..350));
        assert_eq!(tracker.ranges(), &[0..50, 50..100, 100..400]);
        assert!(!tracker.find_overlaps_and_insert(10..10));
        assert_eq!(tracker.ranges().len(), 3);
    }

    #[test]
    fn test_write_at_end_of_address_space() {
        let log = vec![
            write(u64::MAX - 10, 4096, BioFlags::empty()),
            write(u64::MAX - 5, 512, BioFlags::empty()),
            flush(),
        ];
        let epochs = segment(&log);
        assert_eq!(epochs.len(), 1);
        assert_eq!(indices(&epochs[0]), vec![0, 1, 2]);
        assert!(epochs[0].overlaps);
    }
}
