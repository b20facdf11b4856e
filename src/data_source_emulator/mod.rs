//! Emulator data source - generates dummy raw records for testing
//!
//! Produces well-formed v1 records with incrementing event numbers, advancing
//! trigger times and random detector payloads. Payload lengths follow a
//! normal distribution so that records of varying size exercise the codec.
//!
//! The RNG is seeded from the configuration, so a given config always
//! produces the same record stream.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use thiserror::Error;
use tracing::{debug, info};

use crate::common::{EncodeError, RecordMetadata};
use crate::format::{join_run_subrun, MAX_CHANNELS};
use crate::packer::{ChannelPayloads, PackerConfig, RecordPacker};

/// TTD clock ticks per second (127.22 MHz); ctime wraps here and utime advances
pub const CTIME_TICKS_PER_SECOND: u32 = 127_220_000;

/// Emulator configuration
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    /// Experiment number (10 bits)
    pub exp: u32,
    /// Run number (14 bits)
    pub run: u32,
    /// Subrun number (8 bits)
    pub subrun: u32,
    /// Node id written into every header
    pub node_id: u32,
    /// Number of FINESSE slots filled, starting from slot 0
    pub active_channels: usize,
    /// Mean detector payload length per channel in words
    pub payload_mean_words: f64,
    /// Standard deviation of the payload length in words
    pub payload_sigma_words: f64,
    /// Event number of the first record
    pub first_event: u32,
    /// Mean ctime ticks between consecutive triggers
    pub mean_trigger_interval_ticks: u32,
    /// Unix time of the first trigger (None = now)
    pub start_utime: Option<u32>,
    /// RNG seed
    pub seed: u64,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            exp: 1,
            run: 1,
            subrun: 0,
            node_id: 0x0100_0001,
            active_channels: MAX_CHANNELS,
            payload_mean_words: 32.0,
            payload_sigma_words: 8.0,
            first_event: 0,
            mean_trigger_interval_ticks: 12_722, // ~100 us
            start_utime: None,
            seed: 0,
        }
    }
}

/// Emulator errors
#[derive(Error, Debug)]
pub enum EmulatorError {
    #[error("Invalid payload size distribution: {0}")]
    Distribution(String),

    #[error("Packing failed: {0}")]
    Encode(#[from] EncodeError),
}

/// Dummy data source
///
/// Generates one packed record per call to [`DummyDataSource::next_record`].
pub struct DummyDataSource {
    config: EmulatorConfig,
    packer: RecordPacker,
    rng: StdRng,
    payload_size: Normal<f64>,
    event_number: u32,
    tt_ctime: u32,
    tt_utime: u32,
    records_generated: u64,
}

impl DummyDataSource {
    /// Create a new data source with the given configuration
    pub fn new(config: EmulatorConfig, packer: PackerConfig) -> Result<Self, EmulatorError> {
        let payload_size = Normal::new(config.payload_mean_words, config.payload_sigma_words)
            .map_err(|e| EmulatorError::Distribution(e.to_string()))?;

        let tt_utime = config.start_utime.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs() as u32)
                .unwrap_or(0)
        });

        info!(
            exp = config.exp,
            run = config.run,
            subrun = config.subrun,
            node_id = config.node_id,
            channels = config.active_channels,
            seed = config.seed,
            "Dummy data source created"
        );

        Ok(Self {
            rng: StdRng::seed_from_u64(config.seed),
            event_number: config.first_event,
            packer: RecordPacker::new(packer),
            payload_size,
            tt_ctime: 0,
            tt_utime,
            records_generated: 0,
            config,
        })
    }

    /// Configuration in use
    pub fn config(&self) -> &EmulatorConfig {
        &self.config
    }

    /// Number of records produced so far
    pub fn records_generated(&self) -> u64 {
        self.records_generated
    }

    /// Metadata the next record will carry
    pub fn next_metadata(&self) -> RecordMetadata {
        RecordMetadata {
            exp: self.config.exp,
            run_subrun: join_run_subrun(self.config.run, self.config.subrun),
            event_number: self.event_number,
            tt_ctime: self.tt_ctime,
            trg_type: 0,
            tt_utime: self.tt_utime,
            b2l_ctime: self.tt_ctime,
            node_id: self.config.node_id,
        }
    }

    /// Draw one payload length, at least one word and below the packer ceiling
    fn payload_len(&mut self) -> usize {
        let framing = self.packer.config().version.layout().framing_nwords();
        let max_payload = self
            .packer
            .config()
            .max_channel_words
            .saturating_sub(framing + 1)
            .max(1);
        let sample = self.payload_size.sample(&mut self.rng).round();
        (sample.max(1.0) as usize).min(max_payload)
    }

    /// Generate and pack the next record
    pub fn next_record(&mut self) -> Result<Vec<u32>, EmulatorError> {
        let meta = self.next_metadata();

        let mut payloads: Vec<Vec<u32>> = Vec::with_capacity(self.config.active_channels);
        for _ in 0..self.config.active_channels.min(MAX_CHANNELS) {
            let len = self.payload_len();
            payloads.push((0..len).map(|_| self.rng.gen()).collect());
        }

        let mut channels: ChannelPayloads<'_> = [None; MAX_CHANNELS];
        for (slot, payload) in channels.iter_mut().zip(payloads.iter()) {
            *slot = Some(payload.as_slice());
        }

        let record = self.packer.pack(channels, &meta)?;
        debug!(
            event = meta.event_number,
            nwords = record.len(),
            "Generated record"
        );

        self.advance();
        Ok(record)
    }

    /// Step event number and trigger time to the next trigger
    fn advance(&mut self) {
        self.records_generated += 1;
        self.event_number = self.event_number.wrapping_add(1);

        let max_step = self.config.mean_trigger_interval_ticks.saturating_mul(2).max(1);
        let step = self.rng.gen_range(1..=max_step);
        let ctime = self.tt_ctime as u64 + step as u64;
        let seconds = ctime / CTIME_TICKS_PER_SECOND as u64;
        self.tt_ctime = (ctime % CTIME_TICKS_PER_SECOND as u64) as u32;
        self.tt_utime = self.tt_utime.wrapping_add(seconds as u32);
    }
}

impl Iterator for DummyDataSource {
    type Item = Result<Vec<u32>, EmulatorError>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_record())
    }
}
