//! Model of a single logged block-layer request.

use std::fmt;
use std::rc::Rc;

bitflags::bitflags! {
    /// Request flag word (`bi_rw`) as captured by the logging block device.
    ///
    /// Bit positions follow the kernel's request flag enumeration. Checkpoint
    /// and journal markers are injected by the harness and live in the top bits.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BioFlags: u64 {
        const WRITE = 1 << 0;
        const FAILFAST_DEV = 1 << 1;
        const FAILFAST_TRANSPORT = 1 << 2;
        const FAILFAST_DRIVER = 1 << 3;
        const SYNC = 1 << 4;
        const META = 1 << 5;
        const PRIO = 1 << 6;
        const DISCARD = 1 << 7;
        const SECURE = 1 << 8;
        const WRITE_SAME = 1 << 9;
        const NOIDLE = 1 << 10;
        const FUA = 1 << 11;
        const FLUSH = 1 << 12;
        const READAHEAD = 1 << 13;
        const THROTTLED = 1 << 14;
        const SORTED = 1 << 15;
        const SOFT_BARRIER = 1 << 16;
        const NOMERGE = 1 << 17;
        const STARTED = 1 << 18;
        const DONTPREP = 1 << 19;
        const QUEUED = 1 << 20;
        const ELVPRIV = 1 << 21;
        const FAILED = 1 << 22;
        const QUIET = 1 << 23;
        const PREEMPT = 1 << 24;
        const ALLOCED = 1 << 25;
        const COPY_USER = 1 << 26;
        const FLUSH_SEQ = 1 << 27;
        const IO_STAT = 1 << 28;
        const MIXED_MERGE = 1 << 29;
        const PM = 1 << 30;
        const HASHED = 1 << 31;
        const MQ_INFLIGHT = 1 << 32;
        const NO_TIMEOUT = 1 << 33;
        const WRITE_ZEROES = 1 << 34;
        /// Marks a request belonging to a file system journal commit.
        const JOURNAL = 1 << 62;
        /// Marker inserted into the log by the test harness; not a device request.
        const CHECKPOINT = 1 << 63;
    }
}

impl BioFlags {
    /// Look up a single flag by its lowercase name, as used in text logs.
    pub fn from_lowercase_name(name: &str) -> Option<BioFlags> {
        BioFlags::from_name(&name.to_ascii_uppercase())
    }
}

/// Lowercase flag names in bit order, unknown bits as one hex word.
impl fmt::Display for BioFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self
            .iter_names()
            .map(|(name, _)| name.to_ascii_lowercase())
            .collect();
        let unknown = self.difference(BioFlags::all());
        if !unknown.is_empty() {
            names.push(format!("{:#x}", unknown.bits()));
        }
        f.write_str(&names.join(", "))
    }
}

/// Flags that turn a request into a durability barrier.
const BARRIER_FLAGS: BioFlags = BioFlags::FUA
    .union(BioFlags::FLUSH)
    .union(BioFlags::FLUSH_SEQ)
    .union(BioFlags::SOFT_BARRIER);

/// Flags that mark a write as ordered with respect to its submitter.
const ORDERED_FLAGS: BioFlags = BARRIER_FLAGS.union(BioFlags::SYNC);

const FLUSH_FLAGS: BioFlags = BioFlags::FLUSH.union(BioFlags::FLUSH_SEQ);

/// One logged write-like operation. Never mutated once logged; the payload is
/// shared between every copy placed into epochs and crash states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    /// second raw flag word, carried but not interpreted
    pub bi_flags: u64,
    pub flags: BioFlags,
    pub sector: u64,
    /// size in bytes
    pub size: u32,
    pub time_ns: u64,
    pub payload: Option<Rc<[u8]>>,
}

impl WriteRecord {
    pub fn new(sector: u64, size: u32, flags: BioFlags) -> WriteRecord {
        WriteRecord {
            bi_flags: 0,
            flags,
            sector,
            size,
            time_ns: 0,
            payload: None,
        }
    }

    /// A record with a data buffer. The record size is the buffer length, so
    /// the buffer must not exceed `u32::MAX` bytes.
    pub fn with_payload(sector: u64, flags: BioFlags, payload: Vec<u8>) -> WriteRecord {
        let size = match u32::try_from(payload.len()) {
            Ok(size) => size,
            Err(_) => panic!("BUG: payload of {} bytes exceeds request size range", payload.len()),
        };
        WriteRecord {
            payload: Some(payload.into()),
            ..WriteRecord::new(sector, size, flags)
        }
    }

    /// A checkpoint marker as inserted by the harness.
    pub fn checkpoint() -> WriteRecord {
        WriteRecord::new(0, 0, BioFlags::CHECKPOINT)
    }

    pub fn is_write(&self) -> bool {
        self.flags.contains(BioFlags::WRITE)
    }

    /// A write the submitter did not wait for: no sync, FUA, flush or barrier semantics.
    pub fn is_async_write(&self) -> bool {
        self.is_write() && !self.flags.intersects(ORDERED_FLAGS)
    }

    pub fn is_barrier(&self) -> bool {
        self.flags.intersects(BARRIER_FLAGS)
    }

    pub fn is_checkpoint(&self) -> bool {
        self.flags.contains(BioFlags::CHECKPOINT)
    }

    pub fn is_meta(&self) -> bool {
        self.flags.contains(BioFlags::META)
    }

    pub fn is_journal(&self) -> bool {
        self.flags.contains(BioFlags::JOURNAL)
    }

    pub fn has_flush_flag(&self) -> bool {
        self.flags.contains(BioFlags::FLUSH)
    }

    pub fn has_flush_seq_flag(&self) -> bool {
        self.flags.contains(BioFlags::FLUSH_SEQ)
    }

    pub fn has_fua_flag(&self) -> bool {
        self.flags.contains(BioFlags::FUA)
    }

    /// Byte range `[sector, sector + size)` used for overlap detection. The
    /// end is clamped at the top of the address space.
    pub fn range(&self) -> std::ops::Range<u64> {
        self.sector..self.sector.saturating_add(u64::from(self.size))
    }

    /// Does this record combine a preflush with data? Such a flush only covers
    /// earlier data, so the record has to be split in two.
    pub fn is_flush_with_data(&self) -> bool {
        (self.has_flush_flag() || self.has_flush_seq_flag())
            && self.is_write()
            && !self.has_fua_flag()
            && self.size > 0
    }

    /// Split a flush+data record into its flush-only half (flush bits only, no
    /// data) and its data-only half (original flags without flush bits).
    pub fn split_flush(&self) -> (WriteRecord, WriteRecord) {
        assert!(
            self.is_flush_with_data(),
            "BUG: split_flush on a record without flush+data: {}",
            self.flags
        );
        let flush_half = WriteRecord {
            bi_flags: self.bi_flags,
            flags: self.flags.intersection(FLUSH_FLAGS),
            sector: self.sector,
            size: 0,
            time_ns: self.time_ns,
            payload: None,
        };
        let data_half = WriteRecord {
            flags: self.flags.difference(FLUSH_FLAGS),
            ..self.clone()
        };
        (flush_half, data_half)
    }
}

impl fmt::Display for WriteRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:>18.9} {:#18x} {:#10x} flags {:#018x}: {}",
            self.time_ns as f64 / 1e9,
            self.sector,
            self.size,
            self.flags.bits(),
            self.flags
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicates() {
        let sync = WriteRecord::new(0, 4096, BioFlags::WRITE | BioFlags::SYNC);
        assert!(sync.is_write());
        assert!(!sync.is_async_write());
        assert!(!sync.is_barrier());

        let async_write = WriteRecord::new(8, 4096, BioFlags::WRITE);
        assert!(async_write.is_async_write());

        let fua = WriteRecord::new(0, 512, BioFlags::WRITE | BioFlags::FUA);
        assert!(fua.is_barrier());
        assert!(!fua.is_async_write());
        assert!(!fua.is_flush_with_data());

        let discard = WriteRecord::new(0, 512, BioFlags::DISCARD);
        assert!(!discard.is_write());
        assert!(!discard.is_async_write());

        assert!(WriteRecord::checkpoint().is_checkpoint());
        assert!(WriteRecord::new(0, 1, BioFlags::WRITE | BioFlags::JOURNAL).is_journal());
        assert!(WriteRecord::new(0, 1, BioFlags::WRITE | BioFlags::META).is_meta());
    }

    #[test]
    fn test_split_flush() {
        let record = WriteRecord::with_payload(
            0,
            BioFlags::WRITE | BioFlags::FLUSH | BioFlags::SYNC,
            vec![7; 512],
        );
        assert!(record.is_flush_with_data());
        let (flush, data) = record.split_flush();
        assert_eq!(flush.flags, BioFlags::FLUSH);
        assert_eq!(flush.size, 0);
        assert!(flush.payload.is_none());
        assert!(flush.is_barrier());
        assert_eq!(data.flags, BioFlags::WRITE | BioFlags::SYNC);
        assert_eq!(data.size, 512);
        assert!(!data.is_barrier());
        assert_eq!(data.payload.as_deref(), Some([7u8; 512].as_slice()));
    }

    #[test]
    fn test_flush_without_data_is_not_split() {
        let record = WriteRecord::new(0, 0, BioFlags::WRITE | BioFlags::FLUSH);
        assert!(record.is_barrier());
        assert!(!record.is_flush_with_data());
    }

    #[test]
    fn test_flags_display() {
        let flags = BioFlags::WRITE | BioFlags::SYNC | BioFlags::FUA;
        assert_eq!(flags.to_string(), "write, sync, fua");
        assert_eq!(BioFlags::from_bits_retain(1 << 40).to_string(), "0x10000000000");
        assert_eq!(
            (BioFlags::CHECKPOINT | BioFlags::from_bits_retain(1 << 40)).to_string(),
            "checkpoint, 0x10000000000"
        );
        assert_eq!(BioFlags::empty().to_string(), "");
        assert_eq!(
            BioFlags::from_lowercase_name("flush_seq"),
            Some(BioFlags::FLUSH_SEQ)
        );
        assert_eq!(BioFlags::from_lowercase_name("bogus"), None);
    }

    #[test]
    fn test_flush_seq_with_data_is_split() {
        let record = WriteRecord::with_payload(8, BioFlags::WRITE | BioFlags::FLUSH_SEQ, vec![1; 512]);
        assert!(record.has_flush_seq_flag());
        assert!(record.is_flush_with_data());
        let (flush, data) = record.split_flush();
        assert_eq!(flush.flags, BioFlags::FLUSH_SEQ);
        assert_eq!(data.flags, BioFlags::WRITE);
    }

    #[test]
    fn test_range_at_end_of_address_space() {
        let record = WriteRecord::with_payload(u64::MAX - 10, BioFlags::WRITE, vec![0; 4096]);
        assert_eq!(record.range(), (u64::MAX - 10)..u64::MAX);
        assert!(!record.range().is_empty());
    }

    #[test]
    fn test_payload_sets_size() {
        let record = WriteRecord::with_payload(0, BioFlags::WRITE, vec![0; 1536]);
        assert_eq!(record.size, 1536);
        assert_eq!(record.payload.as_deref().map(<[u8]>::len), Some(1536));
    }
}
