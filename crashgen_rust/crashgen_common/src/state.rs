//! Flat record of a generated crash state, for logging and later replay.

use std::io::{BufRead, Read, Write};

use anyhow::{Context, Result};
use bincode::{Decode, Encode};

const BINCODE_CONFIG: bincode::config::Configuration = bincode::config::standard();

#[derive(Debug, Default, Clone, PartialEq, Eq, Encode, Decode)]
pub struct CrashStateRecord {
    /// sequence number of the state within its run
    pub id: u64,
    /// -1 is before the first checkpoint
    pub last_checkpoint: i64,
    /// `(log index, sector index)`; no sector index means the whole request
    pub entries: Vec<(u64, Option<u32>)>,
}

impl CrashStateRecord {
    pub fn decode_from_std_read<R: std::io::Read>(
        src: &mut R,
    ) -> std::result::Result<CrashStateRecord, bincode::error::DecodeError> {
        bincode::decode_from_std_read(src, BINCODE_CONFIG)
    }

    pub fn encode_into_std_write<W: std::io::Write>(
        &self,
        dst: &mut W,
    ) -> std::result::Result<usize, bincode::error::EncodeError> {
        bincode::encode_into_std_write(self, dst, BINCODE_CONFIG)
    }
}

pub struct CrashStateIterator<R: Read> {
    file: R,
}

impl<R: Read> Iterator for CrashStateIterator<R> {
    type Item = Result<CrashStateRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        use bincode::error::DecodeError;
        match CrashStateRecord::decode_from_std_read(&mut self.file) {
            Ok(r) => Some(Ok(r)),
            Err(DecodeError::UnexpectedEnd { .. }) => None,
            Err(DecodeError::Io { inner, .. })
                if inner.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                None
            }
            Err(e) => Some(Err(e).context("could not decode crash state record")),
        }
    }
}

pub type CrashStateWriter<W> = snap::write::FrameEncoder<W>;

/// Create a crash state writer with compression.
pub fn new_state_writer_bin<W: Write>(file: W) -> CrashStateWriter<W> {
    snap::write::FrameEncoder::new(file)
}

/// Parse a binary crash state file.
pub fn parse_state_file_bin<R: BufRead>(
    file: R,
) -> CrashStateIterator<snap::read::FrameDecoder<R>> {
    CrashStateIterator {
        file: snap::read::FrameDecoder::new(file),
    }
}
