//! Packer for COPPER raw records
//!
//! Assembles a complete v1 block from up to four detector payloads and the
//! record metadata. The record length is computed before anything is written
//! and the buffer is allocated exactly once.

use tracing::trace;

use crate::checksum::{crc16_words, CRC16_SEED};
use crate::common::{EncodeError, RecordMetadata};
use crate::format::{
    exp_run_word, fee_header_word, fee_trailer_word, finesse, header, link_header_word, trailer,
    ttctime_trgtype_word, version_word, FormatVersion, DEFAULT_MAX_CHANNEL_WORDS, MAX_CHANNELS,
};

/// Detector payloads indexed by FINESSE slot; `None` or empty means no data
pub type ChannelPayloads<'a> = [Option<&'a [u32]>; MAX_CHANNELS];

/// Packer configuration
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct PackerConfig {
    /// Format generation to emit
    pub version: FormatVersion,
    /// Write the real CRC-16 into each FEE trailer. When false the CRC field
    /// is left at zero and the record will fail `check_crc16`.
    pub crc_enabled: bool,
    /// Upper bound (exclusive) for one framed FINESSE sub-buffer in words
    pub max_channel_words: usize,
}

impl Default for PackerConfig {
    fn default() -> Self {
        Self {
            version: FormatVersion::V1,
            crc_enabled: true,
            max_channel_words: DEFAULT_MAX_CHANNEL_WORDS,
        }
    }
}

/// Record packer
#[derive(Debug, Clone, Default)]
pub struct RecordPacker {
    config: PackerConfig,
}

impl RecordPacker {
    /// Create a packer with given configuration
    pub fn new(config: PackerConfig) -> Self {
        Self { config }
    }

    /// Create a packer with default configuration
    pub fn with_defaults() -> Self {
        Self::new(PackerConfig::default())
    }

    /// Packer configuration
    pub fn config(&self) -> &PackerConfig {
        &self.config
    }

    /// Total record length for the given payloads
    pub fn record_nwords(&self, channels: &ChannelPayloads<'_>) -> Result<usize, EncodeError> {
        let layout = self.config.version.layout();
        let mut nwords = layout.empty_record_nwords();
        for (channel, payload) in channels.iter().enumerate() {
            nwords += self.framed_nwords(channel, *payload)?;
        }
        if nwords > u32::MAX as usize {
            return Err(EncodeError::RecordTooLarge { nwords });
        }
        Ok(nwords)
    }

    fn framed_nwords(&self, channel: usize, payload: Option<&[u32]>) -> Result<usize, EncodeError> {
        let payload = match payload {
            Some(p) if !p.is_empty() => p,
            _ => return Ok(0),
        };
        let framed = payload.len() + self.config.version.layout().framing_nwords();
        if framed >= self.config.max_channel_words {
            return Err(EncodeError::ChannelTooLarge {
                channel,
                nwords: framed,
                limit: self.config.max_channel_words,
            });
        }
        Ok(framed)
    }

    /// Pack payloads and metadata into a new record
    ///
    /// The returned buffer length always equals its own `POS_NWORDS` field.
    pub fn pack(
        &self,
        channels: ChannelPayloads<'_>,
        meta: &RecordMetadata,
    ) -> Result<Vec<u32>, EncodeError> {
        let layout = self.config.version.layout();
        let length_nwords = self.record_nwords(&channels)?;
        let mut buf = vec![0u32; length_nwords];

        // RawHeader
        buf[header::POS_NWORDS] = length_nwords as u32;
        buf[header::POS_VERSION_HDRNWORDS] = version_word(layout.version, layout.header_nwords);
        buf[header::POS_EXP_RUN_NO] = exp_run_word(meta.exp, meta.run_subrun);
        buf[header::POS_EVE_NO] = meta.event_number;
        buf[header::POS_TTCTIME_TRGTYPE] = ttctime_trgtype_word(meta.tt_ctime, meta.trg_type);
        buf[header::POS_TTUTIME] = meta.tt_utime;
        buf[header::POS_NODE_ID] = meta.node_id;

        // FINESSE offsets
        let mut offset = layout.first_finesse_offset();
        for (channel, payload) in channels.iter().enumerate() {
            buf[header::POS_OFFSET_FINESSE[channel]] = offset as u32;
            offset += self.framed_nwords(channel, *payload)?;
        }

        let header_crc = crc16_words(
            CRC16_SEED,
            &[
                buf[header::POS_TTCTIME_TRGTYPE],
                buf[header::POS_EVE_NO],
                buf[header::POS_TTUTIME],
                buf[header::POS_EXP_RUN_NO],
            ],
        );

        let mut pos = layout.first_finesse_offset();
        for (channel, payload) in channels.iter().enumerate() {
            let payload = match payload {
                Some(p) if !p.is_empty() => *p,
                _ => continue,
            };

            // B2LHSLB header
            buf[pos + finesse::POS_B2LHSLB_MAGIC] = link_header_word(meta.event_number);
            pos += layout.size_link_header;

            // B2LFEE header
            buf[pos + finesse::POS_B2L_CTIME] = fee_header_word(meta.b2l_ctime);
            pos += layout.size_fee_header;

            // Detector payload
            buf[pos..pos + payload.len()].copy_from_slice(payload);
            pos += payload.len();

            // B2LFEE trailer
            let crc = if self.config.crc_enabled {
                crc16_words(header_crc, payload)
            } else {
                0
            };
            buf[pos + finesse::POS_B2LFEE_ERRCNT_CRC16] = fee_trailer_word(meta.event_number, crc);
            pos += layout.size_fee_trailer;

            // B2LHSLB trailer (no words in v1)
            pos += layout.size_link_trailer;

            trace!(channel, payload_nwords = payload.len(), crc, "Packed FINESSE");
        }

        // RawTrailer
        pos += layout.size_copper_trailer;
        buf[pos + trailer::POS_TERM_WORD] = trailer::MAGIC_WORD_TERM_TRAILER;
        pos += layout.trailer_nwords;

        debug_assert_eq!(pos, length_nwords);
        Ok(buf)
    }
}

/// Pack a record with the default configuration (v1, CRC enabled)
pub fn pack_detector_buffer(
    channels: ChannelPayloads<'_>,
    meta: &RecordMetadata,
) -> Result<Vec<u32>, EncodeError> {
    RecordPacker::with_defaults().pack(channels, meta)
}
