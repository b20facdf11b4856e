//! copper-raw: codec for COPPER/PCIe40 raw DAQ readout records
//!
//! Packs detector payloads into PostRawCOPPERFormat v1 records, reads header
//! fields and FINESSE sub-buffers back out, and verifies CRC-16 and magic
//! words. Around the codec sit a dummy data source and a raw record file
//! container used by the `emulator` and `rawdump` tools.

pub mod checksum;
pub mod common;
pub mod config;
pub mod data_source_emulator;
pub mod decoder;
pub mod format;
pub mod packer;
pub mod recorder;
