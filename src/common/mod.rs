//! Common data types shared across components
//!
//! This module defines the record-level metadata handed to the packer and
//! the error types every codec operation returns.

use serde::{Deserialize, Serialize};

pub mod cli;
pub use cli::{CommonArgs, EmulatorArgs, RawDumpArgs, RawDumpCommand};

pub mod error;
pub use error::{DecodeError, DecodeResult, EncodeError, ErrorCategory};

use crate::format::{join_run_subrun, split_run_subrun};

/// Record-level metadata written into the raw header
///
/// Passed by value to the packer for a single record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    /// Experiment number (10 bits)
    pub exp: u32,
    /// Run and subrun number packed as `run << 8 | subrun` (22 bits)
    pub run_subrun: u32,
    /// Event number
    pub event_number: u32,
    /// Trigger ctime (27 bits)
    pub tt_ctime: u32,
    /// Trigger type (4 bits)
    #[serde(default)]
    pub trg_type: u32,
    /// Trigger unix time
    pub tt_utime: u32,
    /// B2L link ctime written into each FEE header (27 bits)
    pub b2l_ctime: u32,
    /// Node id of the readout board
    pub node_id: u32,
}

impl RecordMetadata {
    /// Create metadata for an event of the given run
    pub fn new(exp: u32, run: u32, subrun: u32, event_number: u32) -> Self {
        Self {
            exp,
            run_subrun: join_run_subrun(run, subrun),
            event_number,
            ..Default::default()
        }
    }

    /// Run number part of `run_subrun`
    pub fn run(&self) -> u32 {
        split_run_subrun(self.run_subrun).0
    }

    /// Subrun number part of `run_subrun`
    pub fn subrun(&self) -> u32 {
        split_run_subrun(self.run_subrun).1
    }

    /// Format for display
    pub fn display(&self) -> String {
        format!(
            "Exp:{:4} Run:{:6} Sub:{:3} Eve:{:10} Node:0x{:08x} CT:{:9} UT:{:10} TT:{}",
            self.exp,
            self.run(),
            self.subrun(),
            self.event_number,
            self.node_id,
            self.tt_ctime,
            self.tt_utime,
            self.trg_type
        )
    }
}

impl std::fmt::Display for RecordMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_new_packs_run_subrun() {
        let meta = RecordMetadata::new(3, 1234, 5, 99);
        assert_eq!(meta.exp, 3);
        assert_eq!(meta.run(), 1234);
        assert_eq!(meta.subrun(), 5);
        assert_eq!(meta.event_number, 99);
        assert_eq!(meta.trg_type, 0);
    }

    #[test]
    fn test_metadata_display() {
        let meta = RecordMetadata::new(1, 7, 0, 42);
        let text = meta.to_string();
        assert!(text.contains("Exp:   1"));
        assert!(text.contains("Eve:        42"));
    }

    #[test]
    fn test_metadata_json_defaults_trg_type() {
        let json = r#"{"exp":1,"run_subrun":1792,"event_number":5,"tt_ctime":0,
            "tt_utime":0,"b2l_ctime":0,"node_id":16}"#;
        let meta: RecordMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.run(), 7);
        assert_eq!(meta.trg_type, 0);
        assert_eq!(meta.node_id, 16);
    }
}
