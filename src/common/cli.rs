//! CLI argument parsing for copper-raw tools
//!
//! `emulator` and `rawdump` each get one derive-based Args struct that
//! flattens [`CommonArgs`] for the shared `--config` option.

use clap::{Parser, Subcommand};

/// Common arguments shared across all tools
#[derive(Parser, Debug, Clone)]
pub struct CommonArgs {
    /// TOML file with `[codec]` and `[emulator]` tables
    #[arg(short = 'f', long = "config", default_value = "config.toml")]
    pub config_file: String,
}

/// Arguments for the dummy data source
#[derive(Parser, Debug, Clone)]
#[command(name = "emulator", about = "Write a file of randomly generated raw records")]
pub struct EmulatorArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Number of records to generate
    #[arg(short = 'n', long = "records", default_value = "1000")]
    pub records: u64,

    /// Output file path (default: run{RRRRRR}_{SSS}_e{EEEE}.craw)
    #[arg(short = 'o', long = "output")]
    pub output: Option<String>,

    /// Override the RNG seed from the config file
    #[arg(long)]
    pub seed: Option<u64>,

    /// Leave the FEE trailer CRC at zero
    #[arg(long = "no-crc")]
    pub no_crc: bool,
}

/// Arguments for the record file inspector
#[derive(Parser, Debug, Clone)]
#[command(name = "rawdump", about = "Decode, validate and dump raw record files")]
pub struct RawDumpArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    #[command(subcommand)]
    pub command: RawDumpCommand,
}

/// rawdump subcommands
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum RawDumpCommand {
    /// Check every record and the file checksum
    Validate {
        /// Record file
        file: String,
    },
    /// Print decoded records
    Dump {
        /// Record file
        file: String,
        /// Stop after N records
        #[arg(short = 'l', long)]
        limit: Option<usize>,
        /// One JSON object per record instead of text
        #[arg(long)]
        json: bool,
    },
    /// Print file header and footer
    Info {
        /// Record file
        file: String,
    },
    /// Copy the readable records of a damaged file into a new, finished file
    Recover {
        /// Record file
        file: String,
        /// Output path (default: <input>_recovered.craw)
        #[arg(short = 'o', long)]
        output: Option<String>,
    },
}
