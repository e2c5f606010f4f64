use std::io::{BufRead, Read, Write};

use anyhow::{bail, Context, Result};
use bincode::{Decode, Encode};

use crate::record::{BioFlags, WriteRecord};

const BINCODE_CONFIG: bincode::config::Configuration = bincode::config::standard();

/// On-disk form of one logged request, mirroring the metadata record the
/// logging block device hands out plus its data.
#[derive(Debug, Default, Clone, PartialEq, Eq, Encode, Decode)]
pub struct LogEntry {
    pub bi_flags: u64,
    pub bi_rw: u64,
    pub sector: u64,
    pub size: u32,
    pub time_ns: u64,
    /// empty for requests without data
    pub data: Vec<u8>,
}

impl LogEntry {
    pub fn decode_from_std_read<R: std::io::Read>(
        src: &mut R,
    ) -> std::result::Result<LogEntry, bincode::error::DecodeError> {
        bincode::decode_from_std_read(src, BINCODE_CONFIG)
    }

    pub fn encode_into_std_write<W: std::io::Write>(
        &self,
        dst: &mut W,
    ) -> std::result::Result<usize, bincode::error::EncodeError> {
        bincode::encode_into_std_write(self, dst, BINCODE_CONFIG)
    }
}

impl From<&WriteRecord> for LogEntry {
    fn from(record: &WriteRecord) -> LogEntry {
        LogEntry {
            bi_flags: record.bi_flags,
            bi_rw: record.flags.bits(),
            sector: record.sector,
            size: record.size,
            time_ns: record.time_ns,
            data: record.payload.as_deref().map(Vec::from).unwrap_or_default(),
        }
    }
}

impl TryFrom<LogEntry> for WriteRecord {
    type Error = anyhow::Error;

    fn try_from(entry: LogEntry) -> Result<WriteRecord> {
        let payload = if entry.data.is_empty() {
            None
        } else {
            if entry.data.len() != entry.size as usize {
                bail!(
                    "data length {} does not match request size {}",
                    entry.data.len(),
                    entry.size
                );
            }
            Some(entry.data.into())
        };
        Ok(WriteRecord {
            bi_flags: entry.bi_flags,
            flags: BioFlags::from_bits_retain(entry.bi_rw),
            sector: entry.sector,
            size: entry.size,
            time_ns: entry.time_ns,
            payload,
        })
    }
}

/// Helper to make filter_map() work with error handling.
fn lift_option<T>(r: Result<Option<T>>) -> Option<Result<T>> {
    match r {
        Ok(None) => None,
        Ok(Some(o)) => Some(Ok(o)),
        Err(e) => Some(Err(e)),
    }
}

pub struct BinLogIterator<R: Read> {
    file: R,
}

impl<R: Read> Iterator for BinLogIterator<R> {
    type Item = Result<WriteRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        use bincode::error::DecodeError;
        match LogEntry::decode_from_std_read(&mut self.file) {
            Ok(e) => Some(WriteRecord::try_from(e)),
            Err(DecodeError::UnexpectedEnd { .. }) => None,
            Err(DecodeError::Io { inner, .. })
                if inner.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                None
            }
            Err(e) => Some(Err(e.into())),
        }
    }
}

pub type LogWriter<W> = snap::write::FrameEncoder<W>;

/// Create a log writer with compression.
pub fn new_log_writer_bin<W: Write>(file: W) -> LogWriter<W> {
    snap::write::FrameEncoder::new(file)
}

/// Write a whole log with compression.
pub fn write_log_file_bin<'a, W: Write>(
    file: W,
    records: impl IntoIterator<Item = &'a WriteRecord>,
) -> Result<()> {
    let mut writer = new_log_writer_bin(file);
    for record in records {
        LogEntry::from(record)
            .encode_into_std_write(&mut writer)
            .context("could not encode log entry")?;
    }
    writer.flush().context("could not flush log writer")?;
    Ok(())
}

/// Parse a binary log file.
pub fn parse_log_file_bin<R: BufRead>(file: R) -> BinLogIterator<snap::read::FrameDecoder<R>> {
    BinLogIterator {
        file: snap::read::FrameDecoder::new(file),
    }
}

fn parse_flags(col: &str) -> Result<BioFlags> {
    if let Some(hex) = col.strip_prefix("0x") {
        let bits = u64::from_str_radix(hex, 16).context("invalid flag word")?;
        return Ok(BioFlags::from_bits_retain(bits));
    }
    let mut flags = BioFlags::empty();
    for name in col.split('|').map(str::trim).filter(|n| !n.is_empty()) {
        match BioFlags::from_lowercase_name(name) {
            Some(flag) => flags = flags | flag,
            None => bail!("unknown flag {}", name),
        }
    }
    Ok(flags)
}

/// Parse a textual log file. Each line is `sector,size,flags,time_ns,hexdata`,
/// where flags are `|`-separated names or a `0x` flag word.
pub fn parse_log_file_text(file: impl BufRead) -> impl Iterator<Item = Result<WriteRecord>> {
    file.lines().enumerate().filter_map(move |(id, line)| {
        lift_option((move || {
            let line = line?;
            let lineno = id + 1;
            if line.trim().is_empty() {
                return Ok(None);
            }
            let cols: Vec<&str> = line.split(',').collect();
            if cols.len() != 5 {
                bail!("line {}: wrong number of columns", lineno);
            }
            let sector: u64 = cols[0]
                .trim()
                .parse()
                .with_context(|| format!("line {}: invalid sector", lineno))?;
            let size: u32 = cols[1]
                .trim()
                .parse()
                .with_context(|| format!("line {}: invalid size", lineno))?;
            let flags =
                parse_flags(cols[2].trim()).with_context(|| format!("line {}: invalid flags", lineno))?;
            let time_ns: u64 = cols[3]
                .trim()
                .parse()
                .with_context(|| format!("line {}: invalid timestamp", lineno))?;
            let data = hex::decode(cols[4].trim())
                .with_context(|| format!("line {}: invalid data", lineno))?;
            let record = WriteRecord::try_from(LogEntry {
                bi_flags: 0,
                bi_rw: flags.bits(),
                sector,
                size,
                time_ns,
                data,
            })
            .with_context(|| format!("line {}: invalid record", lineno))?;
            Ok(Some(record))
        })())
    })
}
