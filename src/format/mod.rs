//! Field layout catalog for COPPER raw records
//!
//! Record structure (one block, 32-bit words):
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  RawHeader (12 words)                   │
//! │  - nwords, version, exp/run, event no.  │
//! │  - ctime/trgtype, utime, node id        │
//! │  - offsets of the 4 FINESSE sub-buffers │
//! ├─────────────────────────────────────────┤
//! │  FINESSE 0..3 (absent slots take 0 wds) │
//! │  - B2LHSLB header (magic + eve & 0xFFFF)│
//! │  - B2LFEE header (ctime)                │
//! │  - detector payload                     │
//! │  - B2LFEE trailer (eve << 16 | CRC16)   │
//! │  - B2LHSLB trailer (empty in v1)        │
//! ├─────────────────────────────────────────┤
//! │  RawTrailer (2 words)                   │
//! │  - checksum slot, terminating magic     │
//! └─────────────────────────────────────────┘
//! ```
//!
//! The packer and the decoder both read positions from here, so a layout
//! change only has to be made once.

use crate::common::DecodeError;

/// Header word positions and masks
pub mod header {
    pub const POS_NWORDS: usize = 0;
    pub const POS_VERSION_HDRNWORDS: usize = 1;
    pub const POS_EXP_RUN_NO: usize = 2;
    pub const POS_EVE_NO: usize = 3;
    pub const POS_TTCTIME_TRGTYPE: usize = 4;
    pub const POS_TTUTIME: usize = 5;
    pub const POS_NODE_ID: usize = 6;
    pub const POS_TRUNC_MASK_DATATYPE: usize = 7;
    pub const POS_OFFSET_1ST_FINESSE: usize = 8;
    pub const POS_OFFSET_2ND_FINESSE: usize = 9;
    pub const POS_OFFSET_3RD_FINESSE: usize = 10;
    pub const POS_OFFSET_4TH_FINESSE: usize = 11;
    pub const RAWHEADER_NWORDS: usize = 12;

    /// Offset word positions indexed by FINESSE slot
    pub const POS_OFFSET_FINESSE: [usize; 4] = [
        POS_OFFSET_1ST_FINESSE,
        POS_OFFSET_2ND_FINESSE,
        POS_OFFSET_3RD_FINESSE,
        POS_OFFSET_4TH_FINESSE,
    ];

    // Version / header-length word
    pub const MAGIC_WORD: u32 = 0x7F7F_0000;
    pub const MAGIC_MASK: u32 = 0xFFFF_0000;
    pub const FORMAT_VERSION_SHIFT: u32 = 8;
    pub const FORMAT_VERSION_MASK: u32 = 0x0000_FF00;
    pub const HDR_NWORDS_MASK: u32 = 0x0000_00FF;

    // Exp / run / subrun word
    pub const EXP_SHIFT: u32 = 22;
    pub const EXP_MASK: u32 = 0xFFC0_0000;
    pub const RUNNO_SHIFT: u32 = 8;
    pub const RUNNO_MASK: u32 = 0x003F_FF00;
    pub const SUBRUNNO_MASK: u32 = 0x0000_00FF;
    pub const RUN_SUBRUN_MASK: u32 = 0x003F_FFFF;

    // Trigger ctime / type word
    pub const TTCTIME_SHIFT: u32 = 4;
    pub const TTCTIME_MASK: u32 = 0x7FF_FFFF;
    pub const TRGTYPE_MASK: u32 = 0xF;
}

/// B2LHSLB (link) header/trailer and B2LFEE header/trailer
pub mod finesse {
    pub const POS_B2LHSLB_MAGIC: usize = 0;
    pub const SIZE_B2LHSLB_HEADER: usize = 1;

    pub const POS_B2L_CTIME: usize = 0;
    pub const SIZE_B2LFEE_HEADER: usize = 1;

    pub const POS_B2LFEE_ERRCNT_CRC16: usize = 0;
    pub const SIZE_B2LFEE_TRAILER: usize = 1;

    pub const SIZE_B2LHSLB_TRAILER: usize = 0;

    pub const B2LHSLB_MAGIC: u32 = 0xFFAA_0000;
    pub const B2LHSLB_MAGIC_MASK: u32 = 0xFFFF_0000;
    pub const EVE_LOW_MASK: u32 = 0xFFFF;
    pub const B2L_CTIME_SHIFT: u32 = 4;
    pub const B2L_CTIME_MASK: u32 = 0x7FF_FFFF;
    pub const CRC16_MASK: u32 = 0xFFFF;
    pub const FEE_TRAILER_EVE_SHIFT: u32 = 16;

    /// Framing words around each detector payload
    pub const FRAMING_NWORDS: usize =
        SIZE_B2LHSLB_HEADER + SIZE_B2LFEE_HEADER + SIZE_B2LFEE_TRAILER + SIZE_B2LHSLB_TRAILER;
}

/// Trailer word positions
pub mod trailer {
    pub const POS_CHKSUM: usize = 0;
    pub const POS_TERM_WORD: usize = 1;
    pub const RAWTRAILER_NWORDS: usize = 2;

    pub const MAGIC_WORD_TERM_TRAILER: u32 = 0x7FFF_0000;
}

/// COPPER board framing. The post-format strips all of it.
pub mod copper {
    pub const SIZE_COPPER_HEADER: usize = 0;
    pub const SIZE_COPPER_TRAILER: usize = 0;
    pub const SIZE_COPPER_DRIVER_TRAILER: usize = 0;
}

/// Maximum number of FINESSE slots per node
pub const MAX_CHANNELS: usize = 4;

/// Default sanity ceiling for one FINESSE sub-buffer, in words
pub const DEFAULT_MAX_CHANNEL_WORDS: usize = 1_000_000;

/// Supported record format generations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatVersion {
    V1,
}

impl FormatVersion {
    /// Version number stored in the header version field
    pub fn number(self) -> u32 {
        match self {
            FormatVersion::V1 => 1,
        }
    }

    /// Look up a version by its numeric tag
    pub fn from_number(number: u32) -> Result<Self, DecodeError> {
        match number {
            1 => Ok(FormatVersion::V1),
            other => Err(DecodeError::UnsupportedVersion(other)),
        }
    }

    /// Parse the version from a header version/header-length word
    pub fn from_version_word(word: u32) -> Result<Self, DecodeError> {
        Self::from_number((word & header::FORMAT_VERSION_MASK) >> header::FORMAT_VERSION_SHIFT)
    }

    /// Layout table for this version
    pub fn layout(self) -> &'static Layout {
        match self {
            FormatVersion::V1 => &LAYOUT_V1,
        }
    }
}

impl std::fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.number())
    }
}

/// Version-specific sizes and capabilities
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub version: FormatVersion,
    pub header_nwords: usize,
    pub trailer_nwords: usize,
    pub size_link_header: usize,
    pub size_fee_header: usize,
    pub size_fee_trailer: usize,
    pub size_link_trailer: usize,
    pub size_copper_header: usize,
    pub size_copper_trailer: usize,
    pub size_copper_driver_trailer: usize,
    /// Trailer carries a whole-block XOR checksum
    pub has_trailer_checksum: bool,
    /// FEE header carries a full 32-bit event number
    pub has_fee_32bit_event_number: bool,
    /// COPPER driver checksum is kept in the record
    pub has_driver_checksum: bool,
}

/// Layout of PostRawCOPPERFormat v1
pub static LAYOUT_V1: Layout = Layout {
    version: FormatVersion::V1,
    header_nwords: header::RAWHEADER_NWORDS,
    trailer_nwords: trailer::RAWTRAILER_NWORDS,
    size_link_header: finesse::SIZE_B2LHSLB_HEADER,
    size_fee_header: finesse::SIZE_B2LFEE_HEADER,
    size_fee_trailer: finesse::SIZE_B2LFEE_TRAILER,
    size_link_trailer: finesse::SIZE_B2LHSLB_TRAILER,
    size_copper_header: copper::SIZE_COPPER_HEADER,
    size_copper_trailer: copper::SIZE_COPPER_TRAILER,
    size_copper_driver_trailer: copper::SIZE_COPPER_DRIVER_TRAILER,
    has_trailer_checksum: false,
    has_fee_32bit_event_number: false,
    has_driver_checksum: false,
};

impl Layout {
    /// Framing words around one channel's detector payload
    pub fn framing_nwords(&self) -> usize {
        self.size_link_header + self.size_fee_header + self.size_fee_trailer + self.size_link_trailer
    }

    /// Record length with no channel present
    pub fn empty_record_nwords(&self) -> usize {
        self.header_nwords + self.size_copper_header + self.size_copper_trailer + self.trailer_nwords
    }

    /// Word index of the first FINESSE sub-buffer within a block
    pub fn first_finesse_offset(&self) -> usize {
        self.header_nwords + self.size_copper_header
    }
}

// =============================================================================
// Packed word helpers
// =============================================================================

/// Compose the version / header-length word
pub fn version_word(version: FormatVersion, header_nwords: usize) -> u32 {
    header::MAGIC_WORD
        | ((version.number() << header::FORMAT_VERSION_SHIFT) & header::FORMAT_VERSION_MASK)
        | (header_nwords as u32 & header::HDR_NWORDS_MASK)
}

/// Compose the exp / run / subrun word
pub fn exp_run_word(exp: u32, run_subrun: u32) -> u32 {
    (exp << header::EXP_SHIFT) | (run_subrun & header::RUN_SUBRUN_MASK)
}

/// Compose the trigger ctime / type word
pub fn ttctime_trgtype_word(ctime: u32, trg_type: u32) -> u32 {
    ((ctime & header::TTCTIME_MASK) << header::TTCTIME_SHIFT) | (trg_type & header::TRGTYPE_MASK)
}

/// Compose the B2LHSLB header word
pub fn link_header_word(event_number: u32) -> u32 {
    finesse::B2LHSLB_MAGIC | (event_number & finesse::EVE_LOW_MASK)
}

/// Compose the B2LFEE header word
pub fn fee_header_word(b2l_ctime: u32) -> u32 {
    (b2l_ctime & finesse::B2L_CTIME_MASK) << finesse::B2L_CTIME_SHIFT
}

/// Compose the B2LFEE trailer word
pub fn fee_trailer_word(event_number: u32, crc16: u16) -> u32 {
    ((event_number & finesse::EVE_LOW_MASK) << finesse::FEE_TRAILER_EVE_SHIFT)
        | (crc16 as u32 & finesse::CRC16_MASK)
}

/// Split a run/subrun field into (run, subrun)
pub fn split_run_subrun(run_subrun: u32) -> (u32, u32) {
    (
        (run_subrun & header::RUNNO_MASK) >> header::RUNNO_SHIFT,
        run_subrun & header::SUBRUNNO_MASK,
    )
}

/// Build a run/subrun field from its parts
pub fn join_run_subrun(run: u32, subrun: u32) -> u32 {
    ((run << header::RUNNO_SHIFT) & header::RUNNO_MASK) | (subrun & header::SUBRUNNO_MASK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_positions_are_contiguous() {
        assert_eq!(header::POS_OFFSET_4TH_FINESSE + 1, header::RAWHEADER_NWORDS);
        assert_eq!(header::POS_OFFSET_FINESSE[0], 8);
        assert_eq!(header::POS_OFFSET_FINESSE[3], 11);
    }

    #[test]
    fn test_layout_v1_sizes() {
        let layout = FormatVersion::V1.layout();
        assert_eq!(layout.framing_nwords(), 3);
        assert_eq!(layout.framing_nwords(), finesse::FRAMING_NWORDS);
        assert_eq!(layout.empty_record_nwords(), 14);
        assert_eq!(layout.first_finesse_offset(), 12);
        assert!(!layout.has_trailer_checksum);
    }

    #[test]
    fn test_version_word_roundtrip() {
        let word = version_word(FormatVersion::V1, header::RAWHEADER_NWORDS);
        assert_eq!(word, 0x7F7F_010C);
        assert_eq!(FormatVersion::from_version_word(word).unwrap(), FormatVersion::V1);
    }

    #[test]
    fn test_unsupported_version() {
        let word = header::MAGIC_WORD | (4 << header::FORMAT_VERSION_SHIFT) | 12;
        assert!(matches!(
            FormatVersion::from_version_word(word),
            Err(DecodeError::UnsupportedVersion(4))
        ));
    }

    #[test]
    fn test_exp_run_word() {
        let word = exp_run_word(1, join_run_subrun(7, 3));
        assert_eq!(word >> header::EXP_SHIFT, 1);
        assert_eq!(split_run_subrun(word & header::RUN_SUBRUN_MASK), (7, 3));
    }

    #[test]
    fn test_ctime_words_mask_to_27_bits() {
        assert_eq!(ttctime_trgtype_word(0xFFFF_FFFF, 0), 0x7FFF_FFF0);
        assert_eq!(fee_header_word(0xFFFF_FFFF), 0x7FFF_FFF0);
        assert_eq!(ttctime_trgtype_word(1, 0x1F), 0x1F);
    }

    #[test]
    fn test_link_and_fee_trailer_words() {
        assert_eq!(link_header_word(0x0001_002A), 0xFFAA_002A);
        assert_eq!(fee_trailer_word(42, 0xBEEF), 0x002A_BEEF);
    }

    #[test]
    fn test_format_version_display() {
        assert_eq!(FormatVersion::V1.to_string(), "v1");
    }
}
