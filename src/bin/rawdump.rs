//! rawdump - inspect raw record files
//!
//! Usage:
//!   rawdump validate <file>                 - Check every record and the file checksum
//!   rawdump dump <file> [--limit N] [--json] - Print decoded records
//!   rawdump info <file>                     - Show file header and footer
//!   rawdump recover <file> [--output <path>] - Rescue readable records of a damaged file

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::Parser;
use copper_raw::common::{RawDumpArgs, RawDumpCommand, RecordMetadata};
use copper_raw::config::Config;
use copper_raw::decoder::{DecoderConfig, RecordReader};
use copper_raw::format::MAX_CHANNELS;
use copper_raw::recorder::{self, FileValidationResult, RecordFileReader};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("copper_raw=warn".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let args = RawDumpArgs::parse();

    let config_path = &args.common.config_file;
    let config = if Path::new(config_path).exists() {
        Config::load(config_path)?
    } else {
        Config::default()
    };
    let decoder = config.codec.decoder_config();

    match args.command {
        RawDumpCommand::Validate { file } => validate_file(Path::new(&file), &decoder),
        RawDumpCommand::Dump { file, limit, json } => {
            dump_file(Path::new(&file), &decoder, limit, json)
        }
        RawDumpCommand::Info { file } => show_info(Path::new(&file)),
        RawDumpCommand::Recover { file, output } => {
            recover_file(Path::new(&file), output.map(PathBuf::from))
        }
    }
}

fn open(path: &Path) -> anyhow::Result<RecordFileReader<std::io::BufReader<File>>> {
    RecordFileReader::open(path).with_context(|| format!("Failed to open {}", path.display()))
}

fn validate_file(path: &Path, decoder: &DecoderConfig) -> anyhow::Result<()> {
    println!("Validating: {}", path.display());
    println!();

    let mut reader = open(path)?;
    let result = reader.validate(decoder);
    print_validation_result(&result);

    if result.is_valid {
        println!("\n\x1b[32m✓ File is valid\x1b[0m");
        Ok(())
    } else if result.needs_recovery() {
        println!("\n\x1b[33m⚠ File needs recovery\x1b[0m");
        println!("  Run: rawdump recover \"{}\"", path.display());
        bail!("file is not valid")
    } else {
        println!("\n\x1b[31m✗ File is corrupted\x1b[0m");
        bail!("file is corrupted")
    }
}

fn print_validation_result(result: &FileValidationResult) {
    println!("=== Validation ===");
    println!("  Records read:          {}", result.records_read);
    println!("  Corrupt records:       {}", result.corrupt_records);
    println!("  Event discontinuities: {}", result.event_discontinuities);
    match &result.footer {
        Some(footer) => {
            println!("  Footer records:        {}", footer.total_records);
            println!("  Footer complete:       {}", footer.is_complete());
        }
        None => println!("  Footer:                missing"),
    }
    if !result.errors.is_empty() {
        println!();
        println!("=== Errors ===");
        for error in &result.errors {
            println!("  {}", error);
        }
    }
}

/// One decoded record as printed by `dump --json`
#[derive(Serialize)]
struct RecordSummary {
    index: usize,
    nwords: usize,
    metadata: RecordMetadata,
    channels: Vec<ChannelSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct ChannelSummary {
    finesse: usize,
    offset: usize,
    payload_nwords: usize,
    crc_ok: bool,
}

fn summarize(index: usize, words: &[u32], decoder: &DecoderConfig) -> RecordSummary {
    let mut summary = RecordSummary {
        index,
        nwords: words.len(),
        metadata: RecordMetadata::default(),
        channels: Vec::new(),
        error: None,
    };

    let result = RecordReader::new(words, decoder.clone()).and_then(|reader| {
        summary.metadata = reader.metadata(0)?;
        for finesse in 0..MAX_CHANNELS {
            if !reader.has_channel(0, finesse)? {
                continue;
            }
            summary.channels.push(ChannelSummary {
                finesse,
                offset: reader.offset(0, finesse)?,
                payload_nwords: reader.detector_payload_word_count(0, finesse)?,
                crc_ok: reader.check_crc16(0, finesse).is_ok(),
            });
        }
        Ok(())
    });
    if let Err(e) = result {
        summary.error = Some(e.to_string());
    }
    summary
}

fn dump_file(
    path: &Path,
    decoder: &DecoderConfig,
    limit: Option<usize>,
    json: bool,
) -> anyhow::Result<()> {
    let mut reader = open(path)?;
    // Text dumps show CRC status inline; no need for block dumps in the log
    let decoder = DecoderConfig {
        dump_on_error: false,
        ..decoder.clone()
    };

    for (index, record) in reader
        .records()?
        .take(limit.unwrap_or(usize::MAX))
        .enumerate()
    {
        let words = record?;
        let summary = summarize(index, &words, &decoder);

        if json {
            println!("{}", serde_json::to_string(&summary)?);
            continue;
        }

        println!("Record {} ({} words)", summary.index, summary.nwords);
        match &summary.error {
            Some(error) => println!("  \x1b[31mError: {}\x1b[0m", error),
            None => println!("  {}", summary.metadata),
        }
        for ch in &summary.channels {
            println!(
                "  FINESSE {}: offset {:6} payload {:6} words  CRC {}",
                ch.finesse,
                ch.offset,
                ch.payload_nwords,
                if ch.crc_ok { "ok" } else { "\x1b[31mBAD\x1b[0m" }
            );
        }
    }

    Ok(())
}

fn show_info(path: &Path) -> anyhow::Result<()> {
    let mut reader = open(path)?;

    println!("File: {}", path.display());
    println!("Size: {} bytes", std::fs::metadata(path)?.len());
    println!();

    let header = reader.header().clone();
    let (run, subrun) = copper_raw::format::split_run_subrun(header.run_subrun);
    println!("=== Header ===");
    println!("  File Version:   {}", header.version);
    println!("  Record Format:  {}", header.record_format);
    println!("  Experiment:     {}", header.exp);
    println!("  Run:            {}", run);
    println!("  Subrun:         {}", subrun);
    println!("  Node ID:        0x{:08x}", header.node_id);
    println!("  Comment:        {}", header.comment);
    println!(
        "  Start Time:     {} (unix timestamp)",
        header.file_start_time_ns / 1_000_000_000
    );
    if !header.metadata.is_empty() {
        println!("  Metadata:       {:?}", header.metadata);
    }

    println!();
    println!("=== Footer ===");
    match reader.read_footer() {
        Ok(footer) => {
            println!("  Complete:       {}", footer.is_complete());
            println!("  Total Records:  {}", footer.total_records);
            println!("  Data Bytes:     {}", footer.data_bytes);
            println!("  Checksum:       {:016x}", footer.data_checksum);
            println!(
                "  Event Range:    {} - {}",
                footer.first_event, footer.last_event
            );
            println!(
                "  End Time:       {} (unix timestamp)",
                footer.file_end_time_ns / 1_000_000_000
            );
        }
        Err(e) => println!("  \x1b[33mCould not read footer: {}\x1b[0m", e),
    }

    Ok(())
}

fn recover_file(input: &Path, output: Option<PathBuf>) -> anyhow::Result<()> {
    println!("Recovering: {}", input.display());

    let mut source = open(input)?;
    let output = output.unwrap_or_else(|| {
        let stem = input.file_stem().unwrap_or_default().to_string_lossy();
        let parent = input.parent().unwrap_or(Path::new("."));
        parent.join(format!("{}_recovered.craw", stem))
    });
    if output == input {
        bail!("output must differ from input");
    }
    println!("  Output: {}", output.display());

    let out = BufWriter::new(File::create(&output)?);
    let (_, report) = recorder::recover(&mut source, out)?;

    println!("  Records copied:  {}", report.records_copied);
    println!("  Records skipped: {}", report.records_skipped);
    if let Some(reason) = &report.stopped_at {
        println!("  \x1b[33mStopped early: {}\x1b[0m", reason);
    }
    println!("\n\x1b[32m✓ Recovery complete\x1b[0m");
    Ok(())
}
