//! File format structures for raw record files
//!
//! A file is a header, zero or more record blocks and a footer:
//!
//! ```text
//! "COPRAW01" | u32 len | MsgPack(FileHeader)
//! u32 nwords | nwords x u32           (block 0)
//! u32 nwords | nwords x u32           (block 1)
//! ...
//! "CPEND001" | checksum | counts | event range | end time | flag   (64 bytes)
//! ```
//!
//! Record words are stored little-endian regardless of host byte order.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Seek, Write};
use xxhash_rust::xxh64::xxh64;

use crate::common::DecodeError;
use crate::format::{join_run_subrun, FormatVersion};

/// Magic bytes for raw record files
pub const FILE_MAGIC: [u8; 8] = *b"COPRAW01";

/// Current file container version
pub const FILE_FORMAT_VERSION: u32 = 1;

/// Footer magic; the reader looks for it to tell finished files from truncated ones
pub const FOOTER_MAGIC: [u8; 8] = *b"CPEND001";

/// Footer length in bytes
pub const FOOTER_SIZE: usize = 64;

/// Sanity limit for the MessagePack header body
pub const MAX_HEADER_BYTES: u32 = 1 << 20;

/// Sanity limit for one block's word count (400 MB)
pub const MAX_BLOCK_NWORDS: u32 = 100_000_000;

/// Run and node identification stored at the start of a file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileHeader {
    /// File container version
    pub version: u32,

    /// Format generation of the records in this file
    pub record_format: FormatVersion,

    /// Experiment number
    pub exp: u32,

    /// Run and subrun packed as in the raw header
    pub run_subrun: u32,

    /// Node id of the readout board that produced the records
    pub node_id: u32,

    /// Unix time the file was opened, in ns
    pub file_start_time_ns: u64,

    /// Run comment
    pub comment: String,

    /// Free-form settings of the producer (e.g. `crc_enabled`)
    pub metadata: HashMap<String, String>,
}

impl FileHeader {
    /// Header for a run, stamped with the current time
    pub fn new(exp: u32, run: u32, subrun: u32, node_id: u32) -> Self {
        Self {
            version: FILE_FORMAT_VERSION,
            record_format: FormatVersion::V1,
            exp,
            run_subrun: join_run_subrun(run, subrun),
            node_id,
            file_start_time_ns: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos() as u64,
            comment: String::new(),
            metadata: HashMap::new(),
        }
    }

    /// Magic, body length and MessagePack body
    pub fn to_bytes(&self) -> Result<Vec<u8>, FileFormatError> {
        let body = rmp_serde::to_vec_named(self)?;
        if body.len() > MAX_HEADER_BYTES as usize {
            return Err(FileFormatError::HeaderTooLarge(
                u32::try_from(body.len()).unwrap_or(u32::MAX),
            ));
        }
        let mut buf = Vec::with_capacity(FILE_MAGIC.len() + 4 + body.len());
        buf.extend_from_slice(&FILE_MAGIC);
        buf.extend_from_slice(&(body.len() as u32).to_le_bytes());
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    /// Parse the output of [`FileHeader::to_bytes`]
    pub fn from_bytes(data: &[u8]) -> Result<Self, FileFormatError> {
        if data.len() < 12 {
            return Err(FileFormatError::TooShort);
        }
        if data[0..8] != FILE_MAGIC {
            return Err(FileFormatError::InvalidMagic);
        }

        let len = u32::from_le_bytes([data[8], data[9], data[10], data[11]]) as usize;
        if data.len() < 12 + len {
            return Err(FileFormatError::TooShort);
        }

        Self::decode_body(&data[12..12 + len])
    }

    fn decode_body(body: &[u8]) -> Result<Self, FileFormatError> {
        let header: FileHeader = rmp_serde::from_slice(body)?;
        if header.version != FILE_FORMAT_VERSION {
            return Err(FileFormatError::UnsupportedFileVersion(header.version));
        }
        Ok(header)
    }

    /// Write header to a writer, returning the number of bytes written
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<usize, FileFormatError> {
        let bytes = self.to_bytes()?;
        writer.write_all(&bytes)?;
        Ok(bytes.len())
    }

    /// Read magic, length and body from the start of a stream
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, FileFormatError> {
        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic)?;
        if magic != FILE_MAGIC {
            return Err(FileFormatError::InvalidMagic);
        }

        let mut len_bytes = [0u8; 4];
        reader.read_exact(&mut len_bytes)?;
        let len = u32::from_le_bytes(len_bytes);
        if len > MAX_HEADER_BYTES {
            return Err(FileFormatError::HeaderTooLarge(len));
        }
        let mut body = vec![0u8; len as usize];
        reader.read_exact(&mut body)?;

        Self::decode_body(&body)
    }
}

/// Trailing summary of a finished file, always 64 bytes
///
/// | Bytes  | Field              |
/// |--------|--------------------|
/// | 0..8   | magic              |
/// | 8..16  | data checksum      |
/// | 16..24 | total records      |
/// | 24..32 | data bytes         |
/// | 32..36 | first event number |
/// | 36..40 | last event number  |
/// | 40..48 | file end time (ns) |
/// | 48     | write complete     |
/// | 49..64 | reserved           |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileFooter {
    /// Checksum of all record blocks (excluding header and footer)
    pub data_checksum: u64,

    /// Number of records written
    pub total_records: u64,

    /// Total bytes of record blocks, length prefixes included
    pub data_bytes: u64,

    /// Event number of the first record (0 when empty)
    pub first_event: u32,

    /// Event number of the last record (0 when empty)
    pub last_event: u32,

    /// Unix time of `finalize`, in ns
    pub file_end_time_ns: u64,

    /// 1 once `finalize` ran
    pub write_complete: u8,
}

impl Default for FileFooter {
    fn default() -> Self {
        Self::new()
    }
}

impl FileFooter {
    /// Footer of a file with no records yet
    pub fn new() -> Self {
        Self {
            data_checksum: 0,
            total_records: 0,
            data_bytes: 0,
            first_event: 0,
            last_event: 0,
            file_end_time_ns: 0,
            write_complete: 0,
        }
    }

    /// Account for one written record block
    pub fn add_record(&mut self, event_number: u32, block_bytes: u64) {
        if self.total_records == 0 {
            self.first_event = event_number;
        }
        self.last_event = event_number;
        self.total_records += 1;
        self.data_bytes += block_bytes;
    }

    /// Set the completion flag and end time
    pub fn finalize(&mut self) {
        self.write_complete = 1;
        self.file_end_time_ns = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
    }

    /// Whether the writer reached `finish`
    pub fn is_complete(&self) -> bool {
        self.write_complete == 1
    }

    /// Little-endian layout from the table above
    pub fn to_bytes(&self) -> [u8; FOOTER_SIZE] {
        let mut buf = [0u8; FOOTER_SIZE];
        buf[0..8].copy_from_slice(&FOOTER_MAGIC);
        buf[8..16].copy_from_slice(&self.data_checksum.to_le_bytes());
        buf[16..24].copy_from_slice(&self.total_records.to_le_bytes());
        buf[24..32].copy_from_slice(&self.data_bytes.to_le_bytes());
        buf[32..36].copy_from_slice(&self.first_event.to_le_bytes());
        buf[36..40].copy_from_slice(&self.last_event.to_le_bytes());
        buf[40..48].copy_from_slice(&self.file_end_time_ns.to_le_bytes());
        buf[48] = self.write_complete;
        buf
    }

    /// Parse a footer, checking its magic
    pub fn from_bytes(data: &[u8; FOOTER_SIZE]) -> Result<Self, FileFormatError> {
        if data[0..8] != FOOTER_MAGIC {
            return Err(FileFormatError::InvalidFooterMagic);
        }

        let u64_at = |pos: usize| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&data[pos..pos + 8]);
            u64::from_le_bytes(bytes)
        };
        let u32_at = |pos: usize| {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(&data[pos..pos + 4]);
            u32::from_le_bytes(bytes)
        };

        Ok(Self {
            data_checksum: u64_at(8),
            total_records: u64_at(16),
            data_bytes: u64_at(24),
            first_event: u32_at(32),
            last_event: u32_at(36),
            file_end_time_ns: u64_at(40),
            write_complete: data[48],
        })
    }

    /// Append the 64 footer bytes
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), FileFormatError> {
        writer.write_all(&self.to_bytes())?;
        Ok(())
    }

    /// Read 64 bytes and parse them
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, FileFormatError> {
        let mut buf = [0u8; FOOTER_SIZE];
        reader.read_exact(&mut buf)?;
        Self::from_bytes(&buf)
    }
}

/// Running xxHash64-based checksum over the record section
///
/// Each update hashes its slice with xxh64 and folds the result into the
/// running state, so the value depends on how data is split into updates.
/// Writer and reader both update once per length prefix and once per
/// record body.
#[derive(Debug, Clone, Default)]
pub struct ChecksumCalculator {
    state: u64,
    bytes_processed: u64,
}

impl ChecksumCalculator {
    /// Empty checksum
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one slice into the checksum
    pub fn update(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.state = self.state.rotate_left(5) ^ xxh64(data, 0);
        self.bytes_processed += data.len() as u64;
    }

    /// Fold one stored block (prefix, then body)
    pub fn update_block(&mut self, block: &RawBlock) {
        self.update(&block.prefix);
        self.update(&block.body);
    }

    /// Checksum value stored in the footer
    pub fn finalize(&self) -> u64 {
        self.state ^ self.bytes_processed
    }

    /// Bytes folded in so far
    pub fn bytes_processed(&self) -> u64 {
        self.bytes_processed
    }

    /// Start over
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// One record block as stored on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBlock {
    /// Word count prefix, little-endian
    pub prefix: [u8; 4],
    /// Record words, little-endian
    pub body: Vec<u8>,
}

impl RawBlock {
    /// Encode record words for storage
    pub fn from_words(words: &[u32]) -> Self {
        let mut body = Vec::with_capacity(words.len() * 4);
        for word in words {
            body.extend_from_slice(&word.to_le_bytes());
        }
        Self {
            prefix: (words.len() as u32).to_le_bytes(),
            body,
        }
    }

    /// Decode stored bytes back into record words
    pub fn words(&self) -> Vec<u32> {
        self.body
            .chunks_exact(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }

    /// Size on disk, prefix included
    pub fn len_bytes(&self) -> u64 {
        (self.prefix.len() + self.body.len()) as u64
    }

    /// Read the block starting at the current position
    ///
    /// Returns `Ok(None)` at `data_end`. A zero or oversized word count, or a
    /// block crossing `data_end`, is a `CorruptBlock` error.
    pub fn read_from<R: Read + Seek>(
        reader: &mut R,
        data_end: u64,
    ) -> Result<Option<Self>, FileFormatError> {
        let offset = reader.stream_position()?;
        if offset >= data_end {
            return Ok(None);
        }

        let mut prefix = [0u8; 4];
        reader.read_exact(&mut prefix)?;
        let nwords = u32::from_le_bytes(prefix);
        let end = offset + 4 + nwords as u64 * 4;
        if nwords == 0 || nwords > MAX_BLOCK_NWORDS || end > data_end {
            return Err(FileFormatError::CorruptBlock { offset, nwords });
        }

        let mut body = vec![0u8; nwords as usize * 4];
        reader.read_exact(&mut body)?;
        Ok(Some(Self { prefix, body }))
    }

    /// Write prefix and body
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), FileFormatError> {
        writer.write_all(&self.prefix)?;
        writer.write_all(&self.body)?;
        Ok(())
    }
}

/// File format errors
#[derive(Debug, thiserror::Error)]
pub enum FileFormatError {
    #[error("Data too short to contain valid structure")]
    TooShort,

    #[error("Invalid file magic bytes")]
    InvalidMagic,

    #[error("Header body of {0} bytes exceeds the sanity limit")]
    HeaderTooLarge(u32),

    #[error("Invalid footer magic bytes")]
    InvalidFooterMagic,

    #[error("Unsupported file container version {0}")]
    UnsupportedFileVersion(u32),

    #[error("Corrupt block at byte {offset}: word count {nwords}")]
    CorruptBlock { offset: u64, nwords: u32 },

    #[error("Expected one record per block, found {0}")]
    NotSingleRecord(usize),

    #[error("Record error: {0}")]
    Record(#[from] DecodeError),

    #[error("Deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Checksum mismatch: expected {expected:016x}, got {actual:016x}")]
    ChecksumMismatch { expected: u64, actual: u64 },

    #[error("Incomplete file (footer indicates crash during write)")]
    IncompleteFile,
}

/// Result of file validation
#[derive(Debug, Clone)]
pub struct FileValidationResult {
    /// Footer complete, checksum and record count match, every record decodes
    pub is_valid: bool,
    /// Header information
    pub header: FileHeader,
    /// Footer information (if present)
    pub footer: Option<FileFooter>,
    /// Blocks read before the end of data or the first framing error
    pub records_read: u64,
    /// Records failing structural or CRC checks
    pub corrupt_records: u64,
    /// Event number gaps between consecutive records
    pub event_discontinuities: u64,
    /// Validation errors encountered (capped)
    pub errors: Vec<String>,
}

impl FileValidationResult {
    /// Check if file needs recovery (has data but is not valid)
    pub fn needs_recovery(&self) -> bool {
        !self.is_valid && self.records_read > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_file_header_roundtrip() {
        let mut header = FileHeader::new(12, 345, 6, 0x0200_0001);
        header.comment = "Cosmic run".to_string();
        header
            .metadata
            .insert("shifter".to_string(), "night".to_string());

        let bytes = header.to_bytes().unwrap();
        assert_eq!(&bytes[0..8], &FILE_MAGIC);

        let restored = FileHeader::from_bytes(&bytes).unwrap();
        assert_eq!(restored, header);
        assert_eq!(restored.record_format, FormatVersion::V1);
    }

    #[test]
    fn test_file_header_invalid_magic() {
        let mut data = vec![0u8; 100];
        data[0..8].copy_from_slice(b"DELILA02");
        let result = FileHeader::from_bytes(&data);
        assert!(matches!(result, Err(FileFormatError::InvalidMagic)));
    }

    #[test]
    fn test_file_header_truncated() {
        let bytes = FileHeader::new(1, 1, 0, 1).to_bytes().unwrap();
        let result = FileHeader::from_bytes(&bytes[..bytes.len() - 1]);
        assert!(matches!(result, Err(FileFormatError::TooShort)));
    }

    #[test]
    fn test_file_header_garbage_length() {
        let mut data = FILE_MAGIC.to_vec();
        data.extend_from_slice(&u32::MAX.to_le_bytes());
        data.extend_from_slice(&[0u8; 32]);
        let result = FileHeader::read_from(&mut Cursor::new(data));
        assert!(matches!(
            result,
            Err(FileFormatError::HeaderTooLarge(u32::MAX))
        ));
    }

    #[test]
    fn test_file_header_unsupported_version() {
        let mut header = FileHeader::new(1, 1, 0, 1);
        header.version = 9;
        let bytes = header.to_bytes().unwrap();
        let result = FileHeader::read_from(&mut Cursor::new(bytes));
        assert!(matches!(
            result,
            Err(FileFormatError::UnsupportedFileVersion(9))
        ));
    }

    #[test]
    fn test_file_footer_roundtrip() {
        let mut footer = FileFooter::new();
        footer.data_checksum = 0x1234_5678_9ABC_DEF0;
        footer.add_record(100, 60);
        footer.add_record(101, 80);
        footer.add_record(102, 40);
        footer.finalize();

        let bytes = footer.to_bytes();
        assert_eq!(bytes.len(), 64);
        assert_eq!(&bytes[0..8], &FOOTER_MAGIC);

        let restored = FileFooter::from_bytes(&bytes).unwrap();
        assert_eq!(restored, footer);
        assert_eq!(restored.total_records, 3);
        assert_eq!(restored.data_bytes, 180);
        assert_eq!(restored.first_event, 100);
        assert_eq!(restored.last_event, 102);
        assert!(restored.is_complete());
    }

    #[test]
    fn test_file_footer_invalid_magic() {
        let mut data = [0u8; FOOTER_SIZE];
        data[0..8].copy_from_slice(b"BADMAGIC");
        let result = FileFooter::from_bytes(&data);
        assert!(matches!(result, Err(FileFormatError::InvalidFooterMagic)));
    }

    #[test]
    fn test_file_footer_incomplete() {
        let footer = FileFooter::new();
        assert!(!footer.is_complete());
        assert_eq!(footer.first_event, 0);
    }

    #[test]
    fn test_checksum_calculator() {
        let mut calc = ChecksumCalculator::new();
        calc.update(b"Hello, ");
        calc.update(b"World!");
        let checksum1 = calc.finalize();
        assert_ne!(checksum1, 0);
        assert_eq!(calc.bytes_processed(), 13);

        let mut calc2 = ChecksumCalculator::new();
        calc2.update(b"Different data");
        assert_ne!(checksum1, calc2.finalize());

        calc.reset();
        assert_eq!(calc.finalize(), 0);
    }

    #[test]
    fn test_raw_block_words_little_endian() {
        let block = RawBlock::from_words(&[0x0403_0201, 0xDEAD_BEEF]);
        assert_eq!(block.prefix, [2, 0, 0, 0]);
        assert_eq!(&block.body[0..4], &[1, 2, 3, 4]);
        assert_eq!(block.words(), vec![0x0403_0201, 0xDEAD_BEEF]);
        assert_eq!(block.len_bytes(), 12);
    }

    #[test]
    fn test_raw_block_read_stops_at_data_end() {
        let block = RawBlock::from_words(&[1, 2, 3]);
        let mut buf = Vec::new();
        block.write_to(&mut buf).unwrap();
        let data_end = buf.len() as u64;

        let mut cursor = Cursor::new(buf);
        let read = RawBlock::read_from(&mut cursor, data_end).unwrap();
        assert_eq!(read, Some(block));
        assert_eq!(RawBlock::read_from(&mut cursor, data_end).unwrap(), None);
    }

    #[test]
    fn test_raw_block_crossing_data_end() {
        let mut buf = Vec::new();
        RawBlock::from_words(&[1, 2, 3]).write_to(&mut buf).unwrap();
        let mut cursor = Cursor::new(buf);
        let err = RawBlock::read_from(&mut cursor, 12).unwrap_err();
        assert!(matches!(
            err,
            FileFormatError::CorruptBlock {
                offset: 0,
                nwords: 3
            }
        ));
    }

    #[test]
    fn test_raw_block_zero_length() {
        let mut cursor = Cursor::new(vec![0u8; 8]);
        let err = RawBlock::read_from(&mut cursor, 8).unwrap_err();
        assert!(matches!(err, FileFormatError::CorruptBlock { nwords: 0, .. }));
    }
}
