use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use itertools::Itertools;
use tracing::{debug, Level};

use crashgen_common::log::{parse_log_file_bin, parse_log_file_text};
use crashgen_common::record::WriteRecord;
use crashgen_common::state::parse_state_file_bin;

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// print debug output
    #[clap(short, long, global = true)]
    verbose: bool,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read a log file and print a textual representation.
    ReadLog {
        /// log file to process
        #[clap(parse(from_os_str))]
        log: PathBuf,

        /// how many entries to skip
        #[clap(long)]
        skip: Option<usize>,

        /// the log is in text format
        #[clap(long)]
        text: bool,
    },

    /// Read a crash state file (from crashgen_permute generate) and print it.
    ReadStates {
        #[clap(parse(from_os_str))]
        states: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::ReadLog { log, skip, text } => {
            let file = BufReader::new(File::open(&log).context("could not open log file")?);
            let skip = skip.unwrap_or(0);
            debug!(skip, text, "reading log");
            let records: Box<dyn Iterator<Item = Result<WriteRecord>>> = if text {
                Box::new(parse_log_file_text(file))
            } else {
                Box::new(parse_log_file_bin(file))
            };
            for (i, record) in records.enumerate().skip(skip) {
                let record = record?;
                let marker = if record.is_checkpoint() {
                    " [checkpoint]"
                } else if record.is_barrier() {
                    " [barrier]"
                } else {
                    ""
                };
                println!("{:>8} {}{}", i, record, marker);
            }
        }
        Commands::ReadStates { states } => {
            let file = BufReader::new(File::open(&states).context("could not open states file")?);
            for state in parse_state_file_bin(file) {
                let state = state?;
                let entries = state
                    .entries
                    .iter()
                    .map(|(bio, sector)| match sector {
                        Some(sector) => format!("({}, {})", bio, sector),
                        None => format!("({})", bio),
                    })
                    .join(", ");
                println!(
                    "state {} checkpoint {}: {}",
                    state.id, state.last_checkpoint, entries
                );
            }
        }
    }
    Ok(())
}
