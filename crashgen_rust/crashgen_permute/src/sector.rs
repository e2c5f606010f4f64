//! Addressing parts of requests, for crash states that tear a request apart.

use std::collections::HashSet;
use std::rc::Rc;

use crate::epoch::EpochOp;

/// Unit of the `sector` field of logged requests.
pub const KERNEL_SECTOR_SIZE: u64 = 512;

/// Byte offset of a kernel sector, clamped at the top of the address space.
fn disk_offset(sector: u64) -> u64 {
    sector.saturating_mul(KERNEL_SECTOR_SIZE)
}

/// A request, or one sector-sized piece of it, as written to the disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectorWrite {
    /// log index of the request this piece belongs to
    pub bio_index: usize,
    /// `None` if this is the whole request
    pub sector_index: Option<u32>,
    /// byte offset on the disk
    pub disk_offset: u64,
    pub size: u32,
    /// offset of this piece within the request payload
    pub data_offset: u32,
    payload: Option<Rc<[u8]>>,
}

impl SectorWrite {
    pub fn whole(op: &EpochOp) -> SectorWrite {
        SectorWrite {
            bio_index: op.original_index,
            sector_index: None,
            disk_offset: disk_offset(op.record.sector),
            size: op.record.size,
            data_offset: 0,
            payload: op.record.payload.clone(),
        }
    }

    pub fn is_whole(&self) -> bool {
        self.sector_index.is_none()
    }

    /// The bytes this piece writes, if the request carried data.
    pub fn data(&self) -> Option<&[u8]> {
        let start = self.data_offset as usize;
        let end = start + self.size as usize;
        self.payload.as_deref().and_then(|p| p.get(start..end))
    }
}

/// Split a request into pieces of `sector_size` bytes. The last piece is
/// shorter if the request size is not a multiple of the sector size.
pub fn to_sectors(op: &EpochOp, sector_size: u32) -> Vec<SectorWrite> {
    assert!(sector_size > 0, "BUG: sector size must not be zero");
    let size = op.record.size;
    let num_sectors = size.div_ceil(sector_size);
    let base = disk_offset(op.record.sector);
    (0..num_sectors)
        .map(|i| {
            let data_offset = i * sector_size;
            SectorWrite {
                bio_index: op.original_index,
                sector_index: Some(i),
                disk_offset: base.saturating_add(u64::from(data_offset)),
                size: sector_size.min(size - data_offset),
                data_offset,
                payload: op.record.payload.clone(),
            }
        })
        .collect()
}

/// Given pieces in submission order, drop every piece that a later piece
/// overwrites at the same disk offset. Order of the survivors is kept.
pub fn coalesce_sectors(sectors: Vec<SectorWrite>) -> Vec<SectorWrite> {
    let mut seen = HashSet::new();
    let mut result: Vec<SectorWrite> = sectors
        .into_iter()
        .rev()
        .filter(|s| seen.insert(s.disk_offset))
        .collect();
    result.reverse();
    result
}

/// A crash state in which requests may be only partially written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectorCrashState {
    pub writes: Vec<SectorWrite>,
    /// -1 is before the first checkpoint
    pub last_checkpoint: isize,
}

impl SectorCrashState {
    pub fn empty() -> SectorCrashState {
        SectorCrashState {
            writes: Vec::new(),
            last_checkpoint: -1,
        }
    }

    /// Hash of the ordered `(request, sector)` pairs.
    pub fn hash(&self) -> crate::permuter::CrashStateHash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&(self.writes.len() as u64).to_le_bytes());
        for write in &self.writes {
            hasher.update(&(write.bio_index as u64).to_le_bytes());
            match write.sector_index {
                None => hasher.update(&[0]),
                Some(i) => hasher.update(&[1]).update(&i.to_le_bytes()),
            };
        }
        crate::permuter::CrashStateHash(hasher.finalize())
    }
}
