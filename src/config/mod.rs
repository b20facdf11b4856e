//! Configuration module for copper-raw tools
//!
//! Settings are loaded from a TOML file with two tables:
//! - `[codec]`: format version, word ceiling, CRC and dump behavior
//! - `[emulator]`: dummy data source parameters
//!
//! Every field has a default, so an empty file is a valid configuration.
//!
//! # Example
//! ```ignore
//! let config = Config::load("config.toml")?;
//! let reader = RecordReader::new(&words, config.codec.decoder_config())?;
//! ```

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

use crate::data_source_emulator::EmulatorConfig;
use crate::decoder::DecoderConfig;
use crate::format::{FormatVersion, DEFAULT_MAX_CHANNEL_WORDS, MAX_CHANNELS};
use crate::packer::PackerConfig;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub codec: CodecSettings,
    #[serde(default)]
    pub emulator: EmulatorConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the codec cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let framing = self.codec.version.layout().framing_nwords();
        // Smallest present channel is the framing plus one payload word
        if self.codec.max_channel_words <= framing + 1 {
            return Err(ConfigError::InvalidValue {
                field: "codec.max_channel_words",
                reason: format!("must exceed {} (framing plus one payload word)", framing + 1),
            });
        }
        if self.emulator.active_channels > MAX_CHANNELS {
            return Err(ConfigError::InvalidValue {
                field: "emulator.active_channels",
                reason: format!("{} > {}", self.emulator.active_channels, MAX_CHANNELS),
            });
        }
        let sigma = self.emulator.payload_sigma_words;
        if !sigma.is_finite() || sigma < 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "emulator.payload_sigma_words",
                reason: "must be a non-negative number".to_string(),
            });
        }
        Ok(())
    }
}

// =============================================================================
// Codec Configuration
// =============================================================================

/// Settings shared by the packer and the decoder
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CodecSettings {
    /// Format generation
    pub version: FormatVersion,
    /// Upper bound (exclusive) for one FINESSE sub-buffer in words
    pub max_channel_words: usize,
    /// Write CRC-16 into FEE trailers when packing
    pub crc_enabled: bool,
    /// Check CRC-16 when validating blocks
    pub verify_crc: bool,
    /// Log a hex dump of blocks failing their CRC check
    pub dump_on_error: bool,
}

impl Default for CodecSettings {
    fn default() -> Self {
        Self {
            version: FormatVersion::V1,
            max_channel_words: DEFAULT_MAX_CHANNEL_WORDS,
            crc_enabled: true,
            verify_crc: true,
            dump_on_error: true,
        }
    }
}

impl CodecSettings {
    /// Decoder view of these settings
    pub fn decoder_config(&self) -> DecoderConfig {
        DecoderConfig {
            max_channel_words: self.max_channel_words,
            dump_on_error: self.dump_on_error,
            verify_crc: self.verify_crc,
        }
    }

    /// Packer view of these settings
    pub fn packer_config(&self) -> PackerConfig {
        PackerConfig {
            version: self.version,
            crc_enabled: self.crc_enabled,
            max_channel_words: self.max_channel_words,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
