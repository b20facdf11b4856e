//! Emulator binary - writes a raw record file of dummy records
//!
//! Usage:
//!   cargo run --bin emulator                              # Use defaults
//!   cargo run --bin emulator -- --config config.toml      # Use config file
//!   cargo run --bin emulator -- --records 10 -o test.craw # 10 records
//!   cargo run --bin emulator -- --no-crc                  # Leave CRC fields at zero

use clap::Parser;
use copper_raw::common::EmulatorArgs;
use copper_raw::config::Config;
use copper_raw::data_source_emulator::DummyDataSource;
use copper_raw::recorder::{record_file_name, FileHeader, RecordFileWriter};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Initialize tracing (logging)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("copper_raw=info".parse()?))
        .init();

    let args = EmulatorArgs::parse();

    // Build configuration
    let config_path = &args.common.config_file;
    let mut config = if std::path::Path::new(config_path).exists() {
        info!(config_file = %config_path, "Loaded configuration");
        Config::load(config_path)?
    } else {
        warn!(config_file = %config_path, "Config file not found, using defaults");
        Config::default()
    };

    if let Some(seed) = args.seed {
        config.emulator.seed = seed;
    }
    if args.no_crc {
        config.codec.crc_enabled = false;
    }

    let emu = &config.emulator;
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| record_file_name(emu.exp, emu.run, emu.subrun));

    let mut header = FileHeader::new(emu.exp, emu.run, emu.subrun, emu.node_id);
    header.record_format = config.codec.version;
    header.comment = format!("emulator seed={}", emu.seed);
    header
        .metadata
        .insert("crc_enabled".to_string(), config.codec.crc_enabled.to_string());

    let mut source = DummyDataSource::new(config.emulator.clone(), config.codec.packer_config())?;
    let mut writer = RecordFileWriter::create(&output, &header)?;

    info!(records = args.records, output = %output, "Generating records");
    for _ in 0..args.records {
        let record = source.next_record()?;
        writer.write_record(&record)?;
    }

    let bytes = writer.bytes_written();
    let (_, footer) = writer.finish()?;
    info!(
        records = footer.total_records,
        bytes,
        first_event = footer.first_event,
        last_event = footer.last_event,
        output = %output,
        "Done"
    );

    Ok(())
}
