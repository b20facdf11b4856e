//! Decoder for COPPER raw records
//!
//! Reads header fields, locates FINESSE sub-buffers and verifies CRC-16 and
//! magic words of one or more concatenated blocks. The reader only borrows
//! the buffer; it never mutates or retains it beyond its own lifetime.

pub mod dump;
pub mod sequence;

pub use dump::hex_dump;
pub use sequence::EventSequenceChecker;

use std::time::Duration;

use tracing::{debug, error};

use crate::checksum::{crc16_words, crc16_words_checked, xor_checksum, CRC16_SEED};
use crate::common::{DecodeError, DecodeResult, RecordMetadata};
use crate::format::{
    finesse, header, split_run_subrun, trailer, FormatVersion, Layout, DEFAULT_MAX_CHANNEL_WORDS,
    MAX_CHANNELS,
};

/// TTD clock frequency used to convert ctime ticks to microseconds
const CTIME_TICKS_PER_US: f64 = 127.22;

/// Decoder configuration
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Upper bound (exclusive) for one FINESSE sub-buffer in words
    pub max_channel_words: usize,
    /// Log a hex dump of the block when its CRC check fails
    pub dump_on_error: bool,
    /// Include CRC-16 checks in `validate_block`
    pub verify_crc: bool,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_channel_words: DEFAULT_MAX_CHANNEL_WORDS,
            dump_on_error: true,
            verify_crc: true,
        }
    }
}

/// One block with its header already checked
#[derive(Debug, Clone, Copy)]
struct Block<'a> {
    index: usize,
    words: &'a [u32],
    layout: &'static Layout,
}

/// Reader over a buffer of concatenated raw blocks
#[derive(Debug, Clone)]
pub struct RecordReader<'a> {
    buffer: &'a [u32],
    config: DecoderConfig,
    block_positions: Vec<usize>,
}

impl<'a> RecordReader<'a> {
    /// Create a reader with given configuration
    ///
    /// Walks the length word of every block. A zero length or a block running
    /// past the end of the buffer means no later boundary can be trusted, so
    /// the whole buffer is rejected.
    pub fn new(buffer: &'a [u32], config: DecoderConfig) -> DecodeResult<Self> {
        if buffer.is_empty() {
            return Err(DecodeError::EmptyBuffer);
        }

        let mut block_positions = Vec::new();
        let mut pos = 0usize;
        while pos < buffer.len() {
            let nwords = buffer[pos + header::POS_NWORDS];
            let end = pos.checked_add(nwords as usize);
            match end {
                Some(end) if nwords > 0 && end <= buffer.len() => {
                    block_positions.push(pos);
                    pos = end;
                }
                _ => {
                    return Err(DecodeError::CorruptBlockLength {
                        pos,
                        nwords,
                        buffer_nwords: buffer.len(),
                    });
                }
            }
        }

        debug!(
            blocks = block_positions.len(),
            nwords = buffer.len(),
            "Indexed raw buffer"
        );

        Ok(Self {
            buffer,
            config,
            block_positions,
        })
    }

    /// Create a reader with default configuration
    pub fn with_defaults(buffer: &'a [u32]) -> DecodeResult<Self> {
        Self::new(buffer, DecoderConfig::default())
    }

    /// Decoder configuration
    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Number of blocks in the buffer
    pub fn num_blocks(&self) -> usize {
        self.block_positions.len()
    }

    /// Word offset of block `n` within the buffer
    pub fn buffer_pos(&self, n: usize) -> DecodeResult<usize> {
        self.block_positions
            .get(n)
            .copied()
            .ok_or(DecodeError::BlockOutOfRange {
                block: n,
                num_blocks: self.block_positions.len(),
            })
    }

    /// Words of block `n`, header not checked
    pub fn block_words(&self, n: usize) -> DecodeResult<&'a [u32]> {
        let pos = self.buffer_pos(n)?;
        let nwords = self.buffer[pos + header::POS_NWORDS] as usize;
        Ok(&self.buffer[pos..pos + nwords])
    }

    /// Look up block `n` and verify its header framing
    fn block(&self, n: usize) -> DecodeResult<Block<'a>> {
        let words = self.block_words(n)?;
        let pos = self.block_positions[n];

        if words.len() <= header::POS_VERSION_HDRNWORDS {
            return Err(DecodeError::CorruptBlockLength {
                pos,
                nwords: words.len() as u32,
                buffer_nwords: self.buffer.len(),
            });
        }

        let version_word = words[header::POS_VERSION_HDRNWORDS];
        if version_word & header::MAGIC_MASK != header::MAGIC_WORD {
            return Err(DecodeError::BadMagic {
                block: n,
                field: "header",
                expected: header::MAGIC_WORD,
                found: version_word & header::MAGIC_MASK,
            });
        }

        let layout = FormatVersion::from_version_word(version_word)?.layout();

        let hdr_nwords = (version_word & header::HDR_NWORDS_MASK) as usize;
        if hdr_nwords != layout.header_nwords {
            return Err(DecodeError::HeaderLengthMismatch {
                block: n,
                expected: layout.header_nwords,
                found: hdr_nwords,
            });
        }

        if words.len() < layout.empty_record_nwords() {
            return Err(DecodeError::CorruptBlockLength {
                pos,
                nwords: words.len() as u32,
                buffer_nwords: self.buffer.len(),
            });
        }

        Ok(Block {
            index: n,
            words,
            layout,
        })
    }

    // =========================================================================
    // Header fields
    // =========================================================================

    /// Total word count of block `n`
    pub fn block_nwords(&self, n: usize) -> DecodeResult<usize> {
        Ok(self.block(n)?.words.len())
    }

    /// Format version of block `n`
    pub fn format_version(&self, n: usize) -> DecodeResult<FormatVersion> {
        Ok(self.block(n)?.layout.version)
    }

    fn header_word(&self, n: usize, pos: usize) -> DecodeResult<u32> {
        Ok(self.block(n)?.words[pos])
    }

    /// Experiment number
    pub fn exp_no(&self, n: usize) -> DecodeResult<u32> {
        let word = self.header_word(n, header::POS_EXP_RUN_NO)?;
        Ok((word & header::EXP_MASK) >> header::EXP_SHIFT)
    }

    /// Packed run and subrun number
    pub fn run_subrun(&self, n: usize) -> DecodeResult<u32> {
        Ok(self.header_word(n, header::POS_EXP_RUN_NO)? & header::RUN_SUBRUN_MASK)
    }

    /// Run number
    pub fn run_no(&self, n: usize) -> DecodeResult<u32> {
        Ok(split_run_subrun(self.run_subrun(n)?).0)
    }

    /// Subrun number
    pub fn subrun_no(&self, n: usize) -> DecodeResult<u32> {
        Ok(split_run_subrun(self.run_subrun(n)?).1)
    }

    /// Event number
    pub fn event_number(&self, n: usize) -> DecodeResult<u32> {
        self.header_word(n, header::POS_EVE_NO)
    }

    /// Trigger ctime (27 bits)
    pub fn tt_ctime(&self, n: usize) -> DecodeResult<u32> {
        let word = self.header_word(n, header::POS_TTCTIME_TRGTYPE)?;
        Ok((word >> header::TTCTIME_SHIFT) & header::TTCTIME_MASK)
    }

    /// Trigger type (4 bits)
    pub fn trg_type(&self, n: usize) -> DecodeResult<u32> {
        Ok(self.header_word(n, header::POS_TTCTIME_TRGTYPE)? & header::TRGTYPE_MASK)
    }

    /// Trigger unix time
    pub fn tt_utime(&self, n: usize) -> DecodeResult<u32> {
        self.header_word(n, header::POS_TTUTIME)
    }

    /// Node id
    pub fn node_id(&self, n: usize) -> DecodeResult<u32> {
        self.header_word(n, header::POS_NODE_ID)
    }

    /// Trigger time since the unix epoch (utime seconds + ctime microseconds)
    pub fn trigger_time(&self, n: usize) -> DecodeResult<Duration> {
        let secs = self.tt_utime(n)? as u64;
        let usecs = (self.tt_ctime(n)? as f64 / CTIME_TICKS_PER_US) as u64;
        Ok(Duration::from_secs(secs) + Duration::from_micros(usecs))
    }

    /// Start offset of FINESSE slot `finesse` within block `n`
    pub fn offset(&self, n: usize, finesse: usize) -> DecodeResult<usize> {
        check_finesse(finesse)?;
        self.header_word(n, header::POS_OFFSET_FINESSE[finesse])
            .map(|w| w as usize)
    }

    /// Rebuild the packer metadata from the header of block `n`
    ///
    /// `b2l_ctime` comes from the first present FINESSE slot (0 if none).
    pub fn metadata(&self, n: usize) -> DecodeResult<RecordMetadata> {
        let block = self.block(n)?;
        let w = block.words;

        let mut b2l_ctime = 0;
        for f in 0..MAX_CHANNELS {
            let channel = self.channel_buffer(n, f)?;
            if channel.len() > block.layout.size_link_header {
                let fee = channel[block.layout.size_link_header + finesse::POS_B2L_CTIME];
                b2l_ctime = (fee >> finesse::B2L_CTIME_SHIFT) & finesse::B2L_CTIME_MASK;
                break;
            }
        }

        Ok(RecordMetadata {
            exp: (w[header::POS_EXP_RUN_NO] & header::EXP_MASK) >> header::EXP_SHIFT,
            run_subrun: w[header::POS_EXP_RUN_NO] & header::RUN_SUBRUN_MASK,
            event_number: w[header::POS_EVE_NO],
            tt_ctime: (w[header::POS_TTCTIME_TRGTYPE] >> header::TTCTIME_SHIFT)
                & header::TTCTIME_MASK,
            trg_type: w[header::POS_TTCTIME_TRGTYPE] & header::TRGTYPE_MASK,
            tt_utime: w[header::POS_TTUTIME],
            b2l_ctime,
            node_id: w[header::POS_NODE_ID],
        })
    }

    // =========================================================================
    // FINESSE sub-buffers
    // =========================================================================

    /// Word count of FINESSE slot `finesse`, framing included
    ///
    /// Slots 0..2 end where the next one starts; slot 3 ends at the trailer.
    /// Results outside `[0, max_channel_words)` mean the offsets are garbage.
    pub fn channel_word_count(&self, n: usize, finesse: usize) -> DecodeResult<usize> {
        check_finesse(finesse)?;
        let block = self.block(n)?;
        self.channel_word_count_in(&block, finesse)
    }

    fn channel_word_count_in(&self, block: &Block<'a>, finesse: usize) -> DecodeResult<usize> {
        let w = block.words;
        let start = w[header::POS_OFFSET_FINESSE[finesse]] as i64;
        let end = if finesse + 1 < MAX_CHANNELS {
            w[header::POS_OFFSET_FINESSE[finesse + 1]] as i64
        } else {
            (w.len() - block.layout.size_copper_driver_trailer - block.layout.trailer_nwords) as i64
        };

        let nwords = end - start;
        if nwords < 0 || nwords >= self.config.max_channel_words as i64 {
            return Err(DecodeError::WordCountOutOfRange {
                block: block.index,
                channel: finesse,
                nwords,
                limit: self.config.max_channel_words,
            });
        }
        Ok(nwords as usize)
    }

    /// Word count of the detector payload in FINESSE slot `finesse`
    ///
    /// Zero for an absent slot. A present slot smaller than its own framing
    /// is reported as out of range.
    pub fn detector_payload_word_count(&self, n: usize, finesse: usize) -> DecodeResult<usize> {
        check_finesse(finesse)?;
        let block = self.block(n)?;
        let nwords = self.channel_word_count_in(&block, finesse)?;
        if nwords == 0 {
            return Ok(0);
        }
        let framing = block.layout.framing_nwords();
        if nwords < framing {
            return Err(DecodeError::WordCountOutOfRange {
                block: n,
                channel: finesse,
                nwords: nwords as i64 - framing as i64,
                limit: self.config.max_channel_words,
            });
        }
        Ok(nwords - framing)
    }

    /// Whether FINESSE slot `finesse` carries data
    pub fn has_channel(&self, n: usize, finesse: usize) -> DecodeResult<bool> {
        Ok(self.channel_word_count(n, finesse)? > 0)
    }

    /// Framed sub-buffer of FINESSE slot `finesse` (empty if absent)
    pub fn channel_buffer(&self, n: usize, finesse: usize) -> DecodeResult<&'a [u32]> {
        check_finesse(finesse)?;
        let block = self.block(n)?;
        self.channel_buffer_in(&block, finesse)
    }

    fn channel_buffer_in(&self, block: &Block<'a>, finesse: usize) -> DecodeResult<&'a [u32]> {
        let nwords = self.channel_word_count_in(block, finesse)?;
        let start = block.words[header::POS_OFFSET_FINESSE[finesse]] as usize;
        let end = start + nwords;
        let limit = block.words.len() - block.layout.trailer_nwords;
        if nwords > 0 && (start < block.layout.first_finesse_offset() || end > limit) {
            return Err(DecodeError::ChannelOutOfBounds {
                block: block.index,
                channel: finesse,
                start,
                end,
                block_nwords: block.words.len(),
            });
        }
        if nwords == 0 {
            return Ok(&[]);
        }
        Ok(&block.words[start..end])
    }

    /// Detector payload of FINESSE slot `finesse` (empty if absent)
    pub fn detector_payload(&self, n: usize, finesse: usize) -> DecodeResult<&'a [u32]> {
        let payload_nwords = self.detector_payload_word_count(n, finesse)?;
        if payload_nwords == 0 {
            return Ok(&[]);
        }
        let block = self.block(n)?;
        let channel = self.channel_buffer_in(&block, finesse)?;
        let start = block.layout.size_link_header + block.layout.size_fee_header;
        Ok(&channel[start..start + payload_nwords])
    }

    // =========================================================================
    // Checks
    // =========================================================================

    /// Verify the CRC-16 stored in the FEE trailer of FINESSE slot `finesse`
    ///
    /// The CRC covers the ttctime, event number, ttutime and exp/run header
    /// words followed by the detector payload.
    pub fn check_crc16(&self, n: usize, finesse: usize) -> DecodeResult<()> {
        check_finesse(finesse)?;
        let block = self.block(n)?;
        let layout = block.layout;
        let w = block.words;

        let header_words = [
            w[header::POS_TTCTIME_TRGTYPE],
            w[header::POS_EVE_NO],
            w[header::POS_TTUTIME],
            w[header::POS_EXP_RUN_NO],
        ];
        let crc = crc16_words(CRC16_SEED, &header_words);

        let channel = self.channel_buffer_in(&block, finesse)?;
        let payload_nwords = channel.len() as i64 - layout.framing_nwords() as i64;
        let payload_start = (layout.size_link_header + layout.size_fee_header).min(channel.len());
        let computed = crc16_words_checked(crc, &channel[payload_start..], payload_nwords)?;

        let pos_crc = channel.len()
            - (layout.size_fee_trailer - finesse::POS_B2LFEE_ERRCNT_CRC16)
            - layout.size_link_trailer;
        let stored = (channel[pos_crc] & finesse::CRC16_MASK) as u16;

        if stored != computed {
            let dump = hex_dump(w);
            if self.config.dump_on_error {
                error!(
                    block = n,
                    finesse,
                    stored,
                    computed,
                    "CRC16 mismatch, block dump:\n{}",
                    dump
                );
            }
            return Err(DecodeError::Crc16Mismatch {
                block: n,
                channel: finesse,
                stored,
                computed,
                dump,
            });
        }
        Ok(())
    }

    /// Verify header magic, header length and format version
    pub fn check_header_magic(&self, n: usize) -> DecodeResult<()> {
        self.block(n).map(|_| ())
    }

    /// Verify the terminating trailer word
    pub fn check_trailer_magic(&self, n: usize) -> DecodeResult<()> {
        let block = self.block(n)?;
        let w = block.words;
        let term = w[w.len() - block.layout.trailer_nwords + trailer::POS_TERM_WORD];
        if term != trailer::MAGIC_WORD_TERM_TRAILER {
            return Err(DecodeError::BadMagic {
                block: n,
                field: "trailer",
                expected: trailer::MAGIC_WORD_TERM_TRAILER,
                found: term,
            });
        }
        Ok(())
    }

    /// Verify the B2LHSLB magic of FINESSE slot `finesse` (absent slots pass)
    pub fn check_link_magic(&self, n: usize, finesse: usize) -> DecodeResult<()> {
        let channel = self.channel_buffer(n, finesse)?;
        let Some(&word) = channel.get(finesse::POS_B2LHSLB_MAGIC) else {
            return Ok(());
        };
        if word & finesse::B2LHSLB_MAGIC_MASK != finesse::B2LHSLB_MAGIC {
            return Err(DecodeError::BadMagic {
                block: n,
                field: "B2LHSLB header",
                expected: finesse::B2LHSLB_MAGIC,
                found: word & finesse::B2LHSLB_MAGIC_MASK,
            });
        }
        Ok(())
    }

    /// Verify that the FINESSE offsets start right after the header and never decrease
    pub fn check_offsets(&self, n: usize) -> DecodeResult<()> {
        let block = self.block(n)?;
        let first = block.layout.first_finesse_offset();
        let offsets = header::POS_OFFSET_FINESSE.map(|pos| block.words[pos] as usize);

        if offsets[0] != first {
            return Err(DecodeError::BadOffset {
                block: n,
                channel: 0,
                offset: offsets[0],
                expected: first.to_string(),
            });
        }
        for f in 1..MAX_CHANNELS {
            if offsets[f] < offsets[f - 1] {
                return Err(DecodeError::BadOffset {
                    block: n,
                    channel: f,
                    offset: offsets[f],
                    expected: format!(">= {}", offsets[f - 1]),
                });
            }
        }
        Ok(())
    }

    /// Run every structural check, plus CRC-16 on present slots when enabled
    pub fn validate_block(&self, n: usize) -> DecodeResult<()> {
        self.check_header_magic(n)?;
        self.check_trailer_magic(n)?;
        self.check_offsets(n)?;
        for f in 0..MAX_CHANNELS {
            if self.channel_word_count(n, f)? == 0 {
                continue;
            }
            self.detector_payload_word_count(n, f)?;
            self.check_link_magic(n, f)?;
            if self.config.verify_crc {
                self.check_crc16(n, f)?;
            }
        }
        Ok(())
    }

    /// Validate every block in the buffer
    pub fn validate_all(&self) -> DecodeResult<()> {
        (0..self.num_blocks()).try_for_each(|n| self.validate_block(n))
    }

    // =========================================================================
    // Version-dependent extension points
    // =========================================================================

    /// Full 32-bit event number from the B2LFEE header
    pub fn fee_32bit_event_number(&self, n: usize, finesse: usize) -> DecodeResult<u32> {
        check_finesse(finesse)?;
        let block = self.block(n)?;
        Err(DecodeError::unsupported(
            "fee_32bit_event_number",
            block.layout.version,
        ))
    }

    /// Check the COPPER board magic words
    pub fn check_copper_magic(&self, n: usize) -> DecodeResult<()> {
        let block = self.block(n)?;
        Err(DecodeError::unsupported(
            "check_copper_magic",
            block.layout.version,
        ))
    }

    /// Cross-check utime, ctime and trigger type against the FEE headers
    pub fn check_utime_ctime_trg_type(&self, n: usize) -> DecodeResult<()> {
        let block = self.block(n)?;
        Err(DecodeError::unsupported(
            "check_utime_ctime_trg_type",
            block.layout.version,
        ))
    }

    /// COPPER driver checksum
    pub fn driver_checksum(&self, n: usize) -> DecodeResult<u32> {
        let block = self.block(n)?;
        Err(DecodeError::unsupported(
            "driver_checksum",
            block.layout.version,
        ))
    }

    /// Cross-check the event numbers embedded in the FINESSE headers
    pub fn check_event_number_consistency(&self, n: usize) -> DecodeResult<()> {
        let block = self.block(n)?;
        Err(DecodeError::unsupported(
            "check_event_number_consistency",
            block.layout.version,
        ))
    }

    /// Verify the whole-block XOR checksum stored in the trailer
    pub fn check_trailer_checksum(&self, n: usize) -> DecodeResult<()> {
        let block = self.block(n)?;
        let layout = block.layout;
        if !layout.has_trailer_checksum {
            return Err(DecodeError::unsupported(
                "check_trailer_checksum",
                layout.version,
            ));
        }
        verify_trailer_checksum(n, block.words, layout)
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    /// Human-readable summary of block `n` followed by a hex dump
    ///
    /// Fields that fail to decode are shown as errors; the hex dump is always
    /// appended. Only a block whose header cannot be located is an error.
    pub fn dump_block(&self, n: usize) -> DecodeResult<String> {
        use std::fmt::Write;

        let words = self.block_words(n)?;
        let mut out = String::new();
        match self.block(n) {
            Ok(block) => {
                let _ = writeln!(
                    out,
                    "=== Block {} ({} words, {}) ===",
                    n,
                    words.len(),
                    block.layout.version
                );
                match self.metadata(n) {
                    Ok(meta) => {
                        let _ = writeln!(out, "  {}", meta);
                    }
                    Err(e) => {
                        let _ = writeln!(out, "  metadata: {}", e);
                    }
                }
                for f in 0..MAX_CHANNELS {
                    let offset = block.words[header::POS_OFFSET_FINESSE[f]];
                    let line = self.channel_word_count_in(&block, f).and_then(|nwords| {
                        Ok((nwords, self.detector_payload_word_count(n, f)?))
                    });
                    let _ = match line {
                        Ok((nwords, payload)) => writeln!(
                            out,
                            "  FINESSE {}: offset {:5} nwords {:6} payload {:6}",
                            f, offset, nwords, payload
                        ),
                        Err(e) => writeln!(out, "  FINESSE {}: offset {:5} {}", f, offset, e),
                    };
                }
            }
            Err(e) => {
                let _ = writeln!(out, "=== Block {} ({} words) ===", n, words.len());
                let _ = writeln!(out, "  header: {}", e);
            }
        }
        out.push_str(&hex_dump(words));
        Ok(out)
    }
}

/// Compare the trailer checksum slot with the XOR of everything before the trailer
fn verify_trailer_checksum(n: usize, words: &[u32], layout: &Layout) -> DecodeResult<()> {
    let body = words.len() - layout.trailer_nwords;
    let stored = words[body + trailer::POS_CHKSUM];
    let computed = xor_checksum(&words[..body]);
    if stored != computed {
        return Err(DecodeError::TrailerChecksumMismatch {
            block: n,
            stored,
            computed,
        });
    }
    Ok(())
}

fn check_finesse(finesse: usize) -> DecodeResult<()> {
    if finesse >= MAX_CHANNELS {
        return Err(DecodeError::InvalidChannel(finesse));
    }
    Ok(())
}
