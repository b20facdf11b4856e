//! Recorder - stores packed raw records in files and reads them back
//!
//! File naming: run{RRRRRR}_{SSS}_e{EEEE}.craw
//!   - RRRRRR: Run number (6 digits, zero-padded)
//!   - SSS: Subrun number (3 digits)
//!   - EEEE: Experiment number (4 digits)
//!
//! File format (v1):
//! - Header: Magic "COPRAW01" + length (4 bytes) + MsgPack metadata
//! - Record blocks: word count (4 bytes LE) + record words (u32 LE, repeated)
//! - Footer: Fixed 64 bytes with magic "CPEND001", checksum, completion flag
//!
//! Records are stored as produced by the packer; every written record is
//! header-checked first so a file never contains a block the decoder would
//! reject as framing garbage.

mod format;

pub use format::{
    ChecksumCalculator, FileFooter, FileFormatError, FileHeader, FileValidationResult, RawBlock,
    FILE_FORMAT_VERSION, FILE_MAGIC, FOOTER_MAGIC, FOOTER_SIZE, MAX_BLOCK_NWORDS,
    MAX_HEADER_BYTES,
};

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::{debug, info, warn};

use crate::decoder::{DecoderConfig, EventSequenceChecker, RecordReader};

/// Maximum number of messages kept in `FileValidationResult::errors`
const MAX_REPORTED_ERRORS: usize = 100;

/// Build the conventional file name for a run
pub fn record_file_name(exp: u32, run: u32, subrun: u32) -> String {
    format!("run{:06}_{:03}_e{:04}.craw", run, subrun, exp)
}

fn report(errors: &mut Vec<String>, msg: String) {
    if errors.len() < MAX_REPORTED_ERRORS {
        errors.push(msg);
    }
}

// =============================================================================
// Writer
// =============================================================================

/// Writes records into a raw record file
pub struct RecordFileWriter<W: Write> {
    writer: W,
    footer: FileFooter,
    checksum: ChecksumCalculator,
    header_bytes: usize,
}

impl<W: Write> RecordFileWriter<W> {
    /// Start a file by writing its header
    pub fn new(mut writer: W, header: &FileHeader) -> Result<Self, FileFormatError> {
        let header_bytes = header.write_to(&mut writer)?;
        debug!(header_bytes, "Wrote file header");
        Ok(Self {
            writer,
            footer: FileFooter::new(),
            checksum: ChecksumCalculator::new(),
            header_bytes,
        })
    }

    /// Append one packed record
    ///
    /// The buffer must hold exactly one block with a valid raw header.
    pub fn write_record(&mut self, record: &[u32]) -> Result<(), FileFormatError> {
        let reader = RecordReader::with_defaults(record)?;
        if reader.num_blocks() != 1 {
            return Err(FileFormatError::NotSingleRecord(reader.num_blocks()));
        }
        let event_number = reader.event_number(0)?;

        let block = RawBlock::from_words(record);
        block.write_to(&mut self.writer)?;
        self.checksum.update_block(&block);
        self.footer.add_record(event_number, block.len_bytes());
        Ok(())
    }

    /// Records written so far
    pub fn records_written(&self) -> u64 {
        self.footer.total_records
    }

    /// Bytes written so far, header included
    pub fn bytes_written(&self) -> u64 {
        self.header_bytes as u64 + self.footer.data_bytes
    }

    /// Write the footer and flush; returns the inner writer and the footer
    pub fn finish(mut self) -> Result<(W, FileFooter), FileFormatError> {
        self.footer.data_checksum = self.checksum.finalize();
        self.footer.finalize();
        self.footer.write_to(&mut self.writer)?;
        self.writer.flush()?;

        info!(
            records = self.footer.total_records,
            data_bytes = self.footer.data_bytes,
            first_event = self.footer.first_event,
            last_event = self.footer.last_event,
            "Record file finished"
        );
        Ok((self.writer, self.footer))
    }
}

impl RecordFileWriter<BufWriter<File>> {
    /// Create a buffered file writer at `path`
    pub fn create<P: AsRef<Path>>(path: P, header: &FileHeader) -> Result<Self, FileFormatError> {
        let file = File::create(path.as_ref())?;
        info!(path = %path.as_ref().display(), "Created record file");
        Self::new(BufWriter::new(file), header)
    }
}

// =============================================================================
// Reader
// =============================================================================

/// Reads raw record files, with recovery support for incomplete ones
pub struct RecordFileReader<R> {
    reader: R,
    header: FileHeader,
    footer: Option<FileFooter>,
    header_size: u64,
    file_size: u64,
}

impl RecordFileReader<BufReader<File>> {
    /// Open a record file at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, FileFormatError> {
        Self::new(BufReader::new(File::open(path)?))
    }
}

impl<R: Read + Seek> RecordFileReader<R> {
    /// Read the header of a record file
    pub fn new(mut reader: R) -> Result<Self, FileFormatError> {
        let file_size = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;

        let header = FileHeader::read_from(&mut reader)?;
        let header_size = reader.stream_position()?;

        Ok(Self {
            reader,
            header,
            footer: None,
            header_size,
            file_size,
        })
    }

    /// File header
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Footer, if already read
    pub fn footer(&self) -> Option<&FileFooter> {
        self.footer.as_ref()
    }

    /// Try to read the footer (fails for files that were not finished)
    pub fn read_footer(&mut self) -> Result<FileFooter, FileFormatError> {
        if self.file_size < self.header_size + FOOTER_SIZE as u64 {
            return Err(FileFormatError::TooShort);
        }
        self.reader.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        let footer = FileFooter::read_from(&mut self.reader)?;
        self.footer = Some(footer);
        Ok(footer)
    }

    /// End of the record region: before the footer if there is one
    fn data_end(&mut self) -> u64 {
        match self.read_footer() {
            Ok(_) => self.file_size - FOOTER_SIZE as u64,
            Err(_) => self.file_size,
        }
    }

    /// Iterator over the stored records
    pub fn records(&mut self) -> Result<RecordIterator<'_, R>, FileFormatError> {
        let data_end = self.data_end();
        self.reader.seek(SeekFrom::Start(self.header_size))?;
        Ok(RecordIterator {
            reader: &mut self.reader,
            data_end,
            done: false,
        })
    }

    /// Check file integrity and decode every record
    ///
    /// A record that fails its checks is counted and reported but does not
    /// stop the scan; a broken block length does, since no later block
    /// boundary can be trusted.
    pub fn validate(&mut self, config: &DecoderConfig) -> FileValidationResult {
        let mut result = FileValidationResult {
            is_valid: false,
            header: self.header.clone(),
            footer: None,
            records_read: 0,
            corrupt_records: 0,
            event_discontinuities: 0,
            errors: Vec::new(),
        };
        match self.read_footer() {
            Ok(footer) => {
                if !footer.is_complete() {
                    report(
                        &mut result.errors,
                        FileFormatError::IncompleteFile.to_string(),
                    );
                }
                result.footer = Some(footer);
            }
            Err(e) => report(&mut result.errors, format!("Failed to read footer: {}", e)),
        }

        let data_end = if result.footer.is_some() {
            self.file_size - FOOTER_SIZE as u64
        } else {
            self.file_size
        };
        if let Err(e) = self.reader.seek(SeekFrom::Start(self.header_size)) {
            report(&mut result.errors, format!("Seek failed: {}", e));
            return result;
        }

        let mut checksum = ChecksumCalculator::new();
        let mut sequence = EventSequenceChecker::new();
        let mut framing_ok = true;

        loop {
            let block = match RawBlock::read_from(&mut self.reader, data_end) {
                Ok(Some(block)) => block,
                Ok(None) => break,
                Err(e) => {
                    framing_ok = false;
                    report(&mut result.errors, format!("Block {}: {}", result.records_read, e));
                    break;
                }
            };
            checksum.update_block(&block);
            let index = result.records_read;
            result.records_read += 1;

            let words = block.words();
            let decoded = RecordReader::new(&words, config.clone()).and_then(|reader| {
                reader.validate_all()?;
                reader.event_number(0)
            });
            match decoded {
                Ok(event_number) => {
                    if let Err(e) = sequence.observe(event_number) {
                        report(&mut result.errors, format!("Record {}: {}", index, e));
                    }
                }
                Err(e) => {
                    result.corrupt_records += 1;
                    warn!(record = index, error = %e, "Corrupt record");
                    report(&mut result.errors, format!("Record {}: {}", index, e));
                }
            }
        }
        result.event_discontinuities = sequence.discontinuities();

        if let Some(footer) = result.footer {
            let computed = checksum.finalize();
            let checksum_ok = computed == footer.data_checksum;
            if !checksum_ok {
                let e = FileFormatError::ChecksumMismatch {
                    expected: footer.data_checksum,
                    actual: computed,
                };
                report(&mut result.errors, e.to_string());
            }
            let count_ok = footer.total_records == result.records_read;
            if !count_ok {
                report(
                    &mut result.errors,
                    format!(
                        "Footer records {} but {} blocks found",
                        footer.total_records, result.records_read
                    ),
                );
            }
            result.is_valid = footer.is_complete()
                && checksum_ok
                && count_ok
                && framing_ok
                && result.corrupt_records == 0;
        }

        result
    }
}

/// Outcome of [`recover`]
#[derive(Debug, Clone)]
pub struct RecoveryReport {
    /// Records copied into the new file
    pub records_copied: u64,
    /// Records dropped because their raw header was unreadable
    pub records_skipped: u64,
    /// Framing error that ended the scan, if any
    pub stopped_at: Option<String>,
    /// Footer of the new file
    pub footer: FileFooter,
}

/// Copy every readable record of `source` into a new, finished file
///
/// Blocks are read until the end of data or the first framing error; a block
/// whose record header does not decode is skipped. CRC failures are not
/// filtered here, `validate` on the output still reports them.
pub fn recover<R: Read + Seek, W: Write>(
    source: &mut RecordFileReader<R>,
    out: W,
) -> Result<(W, RecoveryReport), FileFormatError> {
    let header = source.header().clone();
    let mut writer = RecordFileWriter::new(out, &header)?;
    let mut records_skipped = 0u64;
    let mut stopped_at = None;

    for (index, record) in source.records()?.enumerate() {
        let words = match record {
            Ok(words) => words,
            Err(e) => {
                warn!(block = index, error = %e, "Recovery stopped");
                stopped_at = Some(format!("Block {}: {}", index, e));
                break;
            }
        };
        if let Err(e) = writer.write_record(&words) {
            warn!(block = index, error = %e, "Skipping unreadable record");
            records_skipped += 1;
        }
    }

    let records_copied = writer.records_written();
    let (out, footer) = writer.finish()?;
    Ok((
        out,
        RecoveryReport {
            records_copied,
            records_skipped,
            stopped_at,
            footer,
        },
    ))
}

/// Iterator over the records of a file
pub struct RecordIterator<'a, R> {
    reader: &'a mut R,
    data_end: u64,
    done: bool,
}

impl<'a, R: Read + Seek> Iterator for RecordIterator<'a, R> {
    type Item = Result<Vec<u32>, FileFormatError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match RawBlock::read_from(self.reader, self.data_end) {
            Ok(Some(block)) => Some(Ok(block.words())),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
