//! E2E tests for the raw record file format (write → read → verify)
//!
//! Records come from the seeded emulator, so every run writes the same file.
//! On read-back each record is compared word for word with what was written
//! and decoded again to check that payloads and CRCs survived the trip.

use std::io::Cursor;

use copper_raw::data_source_emulator::{DummyDataSource, EmulatorConfig};
use copper_raw::decoder::{DecoderConfig, RecordReader};
use copper_raw::format::MAX_CHANNELS;
use copper_raw::packer::PackerConfig;
use copper_raw::recorder::{
    self, ChecksumCalculator, FileFooter, FileFormatError, FileHeader, RawBlock,
    RecordFileReader, RecordFileWriter, FOOTER_SIZE,
};
use rand::prelude::*;
use rand::rngs::StdRng;

fn emulator_config(seed: u64) -> EmulatorConfig {
    EmulatorConfig {
        exp: 3,
        run: 42,
        subrun: 1,
        payload_mean_words: 24.0,
        payload_sigma_words: 10.0,
        first_event: 1000,
        start_utime: Some(1_700_000_000),
        seed,
        ..Default::default()
    }
}

fn generate(seed: u64, count: usize) -> Vec<Vec<u32>> {
    let source = DummyDataSource::new(emulator_config(seed), PackerConfig::default()).unwrap();
    source.take(count).map(|r| r.unwrap()).collect()
}

/// Write a complete file (header + records + footer) into a Vec<u8>
fn write_file(records: &[Vec<u32>]) -> (Vec<u8>, FileFooter) {
    let header = FileHeader::new(3, 42, 1, 0x0100_0001);
    let mut writer = RecordFileWriter::new(Vec::new(), &header).unwrap();
    for record in records {
        writer.write_record(record).unwrap();
    }
    writer.finish().unwrap()
}

fn quiet_decoder() -> DecoderConfig {
    DecoderConfig {
        dump_on_error: false,
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// Round trip
// ---------------------------------------------------------------------------

#[test]
fn test_write_read_identical_records() {
    let records = generate(1, 300);
    let (bytes, _) = write_file(&records);

    let mut reader = RecordFileReader::new(Cursor::new(bytes)).unwrap();
    let read: Vec<Vec<u32>> = reader.records().unwrap().map(|r| r.unwrap()).collect();

    assert_eq!(read.len(), records.len());
    for (i, (written, got)) in records.iter().zip(&read).enumerate() {
        assert_eq!(written, got, "record {} differs", i);
        let decoded = RecordReader::with_defaults(got).unwrap();
        decoded.validate_all().unwrap();
        assert_eq!(decoded.event_number(0).unwrap(), 1000 + i as u32);
    }
}

#[test]
fn test_header_survives() {
    let records = generate(2, 5);
    let mut header = FileHeader::new(3, 42, 1, 0x0100_0001);
    header.comment = "beam test".to_string();
    header
        .metadata
        .insert("crc_enabled".to_string(), "true".to_string());

    let mut writer = RecordFileWriter::new(Vec::new(), &header).unwrap();
    for record in &records {
        writer.write_record(record).unwrap();
    }
    let (bytes, _) = writer.finish().unwrap();

    let reader = RecordFileReader::new(Cursor::new(bytes)).unwrap();
    assert_eq!(reader.header().exp, 3);
    assert_eq!(reader.header().run_subrun, 42 << 8 | 1);
    assert_eq!(reader.header().comment, "beam test");
    assert_eq!(
        reader.header().metadata.get("crc_enabled").map(String::as_str),
        Some("true")
    );
}

#[test]
fn test_footer_statistics() {
    let records = generate(3, 120);
    let (bytes, footer) = write_file(&records);

    let expected_bytes: u64 = records.iter().map(|r| 4 + 4 * r.len() as u64).sum();
    assert_eq!(footer.total_records, 120);
    assert_eq!(footer.data_bytes, expected_bytes);
    assert_eq!(footer.first_event, 1000);
    assert_eq!(footer.last_event, 1119);
    assert!(footer.is_complete());

    let mut checksum = ChecksumCalculator::new();
    for record in &records {
        checksum.update_block(&RawBlock::from_words(record));
    }
    assert_eq!(footer.data_checksum, checksum.finalize());

    let mut reader = RecordFileReader::new(Cursor::new(bytes)).unwrap();
    let stored = reader.read_footer().unwrap();
    assert_eq!(stored.total_records, footer.total_records);
    assert_eq!(stored.data_checksum, footer.data_checksum);
}

#[test]
fn test_validate_clean_file() {
    let records = generate(4, 200);
    let (bytes, _) = write_file(&records);

    let mut reader = RecordFileReader::new(Cursor::new(bytes)).unwrap();
    let result = reader.validate(&quiet_decoder());
    assert!(result.is_valid, "errors: {:?}", result.errors);
    assert_eq!(result.records_read, 200);
    assert_eq!(result.corrupt_records, 0);
    assert_eq!(result.event_discontinuities, 0);
    assert!(!result.needs_recovery());
}

// ---------------------------------------------------------------------------
// Damage
// ---------------------------------------------------------------------------

#[test]
fn test_random_payload_bit_flips_detected() {
    let mut rng = StdRng::seed_from_u64(77);
    let records = generate(5, 50);

    for _ in 0..20 {
        let target = rng.gen_range(0..records.len());
        let reader = RecordReader::with_defaults(&records[target]).unwrap();
        let finesse = rng.gen_range(0..MAX_CHANNELS);
        let payload_len = reader.detector_payload_word_count(0, finesse).unwrap();
        if payload_len == 0 {
            continue;
        }
        let word = reader.offset(0, finesse).unwrap() + 2 + rng.gen_range(0..payload_len);

        let mut damaged = records.clone();
        damaged[target][word] ^= 1 << rng.gen_range(0..32);
        let (bytes, _) = write_file(&damaged);

        let mut file = RecordFileReader::new(Cursor::new(bytes)).unwrap();
        let result = file.validate(&quiet_decoder());
        assert!(!result.is_valid);
        assert_eq!(result.corrupt_records, 1);
        assert_eq!(result.records_read, 50);
    }
}

#[test]
fn test_bit_flip_after_writing_breaks_checksum() {
    let records = generate(6, 10);
    let (mut bytes, _) = write_file(&records);

    // Flip one bit inside the data section, away from any length prefix
    let data_end = bytes.len() - FOOTER_SIZE;
    let pos = data_end - 8;
    bytes[pos] ^= 0x01;

    let mut reader = RecordFileReader::new(Cursor::new(bytes)).unwrap();
    let result = reader.validate(&quiet_decoder());
    assert!(!result.is_valid);
    assert!(result.errors.iter().any(|e| e.contains("Checksum mismatch")));
}

#[test]
fn test_truncated_file_has_no_footer() {
    let records = generate(7, 30);
    let (bytes, _) = write_file(&records);
    let truncated = bytes[..bytes.len() - FOOTER_SIZE - 10].to_vec();

    let mut reader = RecordFileReader::new(Cursor::new(truncated)).unwrap();
    assert!(reader.footer().is_none());
    let result = reader.validate(&quiet_decoder());
    assert!(!result.is_valid);
    assert!(result.needs_recovery());
    assert_eq!(result.records_read, 29);
}

#[test]
fn test_garbage_is_not_a_record_file() {
    let mut rng = StdRng::seed_from_u64(8);
    let garbage: Vec<u8> = (0..256).map(|_| rng.gen()).collect();
    assert!(matches!(
        RecordFileReader::new(Cursor::new(garbage)),
        Err(FileFormatError::InvalidMagic) | Err(FileFormatError::TooShort)
    ));
}

#[test]
fn test_writer_rejects_malformed_record() {
    let header = FileHeader::new(3, 42, 1, 0x0100_0001);
    let mut writer = RecordFileWriter::new(Vec::new(), &header).unwrap();
    assert!(writer.write_record(&[14, 0, 0, 0]).is_err());

    let records = generate(9, 2);
    let both: Vec<u32> = records.concat();
    assert!(matches!(
        writer.write_record(&both),
        Err(FileFormatError::NotSingleRecord(2))
    ));
    assert_eq!(writer.records_written(), 0);
}

// ---------------------------------------------------------------------------
// Recovery
// ---------------------------------------------------------------------------

#[test]
fn test_recover_truncated_file() {
    let records = generate(10, 40);
    let (bytes, _) = write_file(&records);
    // Cut in the middle of the last record
    let truncated = bytes[..bytes.len() - FOOTER_SIZE - 12].to_vec();

    let mut source = RecordFileReader::new(Cursor::new(truncated)).unwrap();
    let (out, report) = recorder::recover(&mut source, Vec::new()).unwrap();
    assert_eq!(report.records_copied, 39);
    assert_eq!(report.records_skipped, 0);
    assert!(report.stopped_at.is_some());
    assert!(report.footer.is_complete());

    let mut recovered = RecordFileReader::new(Cursor::new(out)).unwrap();
    let result = recovered.validate(&quiet_decoder());
    assert!(result.is_valid, "errors: {:?}", result.errors);
    let read: Vec<Vec<u32>> = recovered.records().unwrap().map(|r| r.unwrap()).collect();
    assert_eq!(read, records[..39].to_vec());
}
