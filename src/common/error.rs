//! Error types for the record codec
//!
//! # Design Principles (KISS)
//! - A malformed record is never decoded further: every check returns `Result`
//! - Each variant carries the offending values so the message alone is a diagnosis
//! - Use thiserror for ergonomic error handling

use thiserror::Error;

use crate::format::FormatVersion;

/// Broad classes of record anomalies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Bad magic words, header-length mismatch, unsupported version
    Structural,
    /// Negative or implausibly large word counts, invalid channel index
    SizeRange,
    /// Checksum mismatch against the stored value
    Integrity,
    /// Event numbers out of order between consecutive records
    Sequencing,
    /// Operation not provided by the record's format version
    Unsupported,
}

/// Errors raised while reading a record
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Empty buffer: no record to decode")]
    EmptyBuffer,

    #[error("Block {block} out of range: buffer holds {num_blocks} blocks")]
    BlockOutOfRange { block: usize, num_blocks: usize },

    #[error("Corrupt block length at word {pos}: nwords={nwords}, buffer holds {buffer_nwords} words")]
    CorruptBlockLength {
        pos: usize,
        nwords: u32,
        buffer_nwords: usize,
    },

    #[error("Bad {field} magic in block {block}: expected 0x{expected:08x}, found 0x{found:08x}")]
    BadMagic {
        block: usize,
        field: &'static str,
        expected: u32,
        found: u32,
    },

    #[error("Header length mismatch in block {block}: expected {expected} words, found {found}")]
    HeaderLengthMismatch {
        block: usize,
        expected: usize,
        found: usize,
    },

    #[error("Bad offset for FINESSE {channel} in block {block}: {offset} (expected {expected})")]
    BadOffset {
        block: usize,
        channel: usize,
        offset: usize,
        expected: String,
    },

    #[error("Unsupported format version {0}")]
    UnsupportedVersion(u32),

    #[error("Invalid FINESSE index {0} (valid: 0..4)")]
    InvalidChannel(usize),

    #[error("Word count out of range in block {block} FINESSE {channel}: {nwords} (limit {limit})")]
    WordCountOutOfRange {
        block: usize,
        channel: usize,
        nwords: i64,
        limit: usize,
    },

    #[error("FINESSE {channel} of block {block} spans words {start}..{end}, block has {block_nwords}")]
    ChannelOutOfBounds {
        block: usize,
        channel: usize,
        start: usize,
        end: usize,
        block_nwords: usize,
    },

    #[error("Negative word count for CRC calculation: {0}")]
    NegativeWordCount(i64),

    #[error("CRC range overrun: {requested} words requested, {available} available")]
    CrcRangeOverrun { requested: usize, available: usize },

    #[error("CRC16 mismatch in block {block} FINESSE {channel}: stored 0x{stored:04x}, computed 0x{computed:04x}")]
    Crc16Mismatch {
        block: usize,
        channel: usize,
        stored: u16,
        computed: u16,
        /// Hex dump of the whole block
        dump: String,
    },

    #[error("Trailer checksum mismatch in block {block}: stored 0x{stored:08x}, computed 0x{computed:08x}")]
    TrailerChecksumMismatch {
        block: usize,
        stored: u32,
        computed: u32,
    },

    #[error("Event number discontinuity: expected {expected}, found {found}")]
    EventDiscontinuity { expected: u32, found: u32 },

    #[error("{operation} is not supported for format {version}")]
    Unsupported {
        operation: &'static str,
        version: FormatVersion,
    },
}

impl DecodeError {
    /// Classify the error
    pub fn category(&self) -> ErrorCategory {
        match self {
            DecodeError::EmptyBuffer
            | DecodeError::CorruptBlockLength { .. }
            | DecodeError::BadMagic { .. }
            | DecodeError::HeaderLengthMismatch { .. }
            | DecodeError::BadOffset { .. }
            | DecodeError::UnsupportedVersion(_) => ErrorCategory::Structural,
            DecodeError::BlockOutOfRange { .. }
            | DecodeError::InvalidChannel(_)
            | DecodeError::WordCountOutOfRange { .. }
            | DecodeError::ChannelOutOfBounds { .. }
            | DecodeError::NegativeWordCount(_)
            | DecodeError::CrcRangeOverrun { .. } => ErrorCategory::SizeRange,
            DecodeError::Crc16Mismatch { .. } | DecodeError::TrailerChecksumMismatch { .. } => {
                ErrorCategory::Integrity
            }
            DecodeError::EventDiscontinuity { .. } => ErrorCategory::Sequencing,
            DecodeError::Unsupported { .. } => ErrorCategory::Unsupported,
        }
    }

    /// Create an unsupported-operation error
    pub fn unsupported(operation: &'static str, version: FormatVersion) -> Self {
        Self::Unsupported { operation, version }
    }

    /// Block dump attached to the error, if any
    pub fn dump(&self) -> Option<&str> {
        match self {
            DecodeError::Crc16Mismatch { dump, .. } => Some(dump.as_str()),
            _ => None,
        }
    }
}

/// Errors raised while packing a record
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("FINESSE {channel} too large: {nwords} framed words (limit {limit})")]
    ChannelTooLarge {
        channel: usize,
        nwords: usize,
        limit: usize,
    },

    #[error("Record too large: {nwords} words does not fit the length field")]
    RecordTooLarge { nwords: usize },
}

/// Result type alias using DecodeError
pub type DecodeResult<T> = Result<T, DecodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_magic_message() {
        let err = DecodeError::BadMagic {
            block: 0,
            field: "trailer",
            expected: 0x7fff_0000,
            found: 0x1234_5678,
        };
        let msg = err.to_string();
        assert!(msg.contains("trailer"));
        assert!(msg.contains("0x7fff0000"));
        assert!(msg.contains("0x12345678"));
        assert_eq!(err.category(), ErrorCategory::Structural);
    }

    #[test]
    fn test_word_count_category() {
        let err = DecodeError::WordCountOutOfRange {
            block: 0,
            channel: 2,
            nwords: -5,
            limit: 1_000_000,
        };
        assert_eq!(err.category(), ErrorCategory::SizeRange);
        assert!(err.to_string().contains("-5"));
    }

    #[test]
    fn test_crc_mismatch_carries_dump() {
        let err = DecodeError::Crc16Mismatch {
            block: 1,
            channel: 0,
            stored: 0x1234,
            computed: 0xabcd,
            dump: "0000: deadbeef".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::Integrity);
        assert_eq!(err.dump(), Some("0000: deadbeef"));
        assert!(err.to_string().contains("0xabcd"));
    }

    #[test]
    fn test_trailer_checksum_is_integrity() {
        let err = DecodeError::TrailerChecksumMismatch {
            block: 2,
            stored: 0x0000_0001,
            computed: 0xcafe_f00d,
        };
        assert_eq!(err.category(), ErrorCategory::Integrity);
        assert!(err.to_string().contains("0xcafef00d"));
        assert!(err.dump().is_none());
    }

    #[test]
    fn test_unsupported_error() {
        let err = DecodeError::unsupported("driver_checksum", FormatVersion::V1);
        assert_eq!(err.category(), ErrorCategory::Unsupported);
        assert_eq!(err.to_string(), "driver_checksum is not supported for format v1");
        assert!(err.dump().is_none());
    }

    #[test]
    fn test_sequencing_category() {
        let err = DecodeError::EventDiscontinuity {
            expected: 11,
            found: 13,
        };
        assert_eq!(err.category(), ErrorCategory::Sequencing);
    }

    #[test]
    fn test_encode_error_message() {
        let err = EncodeError::ChannelTooLarge {
            channel: 3,
            nwords: 2_000_000,
            limit: 1_000_000,
        };
        assert!(err.to_string().contains("FINESSE 3"));
    }
}
