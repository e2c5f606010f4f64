use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, Level};

use crashgen_common::log::{parse_log_file_bin, parse_log_file_text};
use crashgen_common::record::WriteRecord;
use crashgen_common::state::new_state_writer_bin;
use crashgen_permute::config::Config;
use crashgen_permute::{segment, CrashStateReport, Deduplicator, Permuter};

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
    /// Split a log into epochs and print them.
    Segment {
        /// log file to process
        #[clap(parse(from_os_str))]
        log: PathBuf,
        /// the log is in text format
        #[clap(long)]
        text: bool,
    },

    /// Generate unique crash states from a log.
    Generate {
        /// Path to run configuration YAML
        #[clap(parse(from_os_str))]
        config: PathBuf,
        /// log file to process
        #[clap(parse(from_os_str))]
        log: PathBuf,
        /// Path to output directory. Default "."
        #[clap(long, parse(from_os_str))]
        output_dir: Option<PathBuf>,
        /// override the seed of the configuration
        #[clap(long)]
        seed: Option<u64>,
        /// override the number of crash states of the configuration
        #[clap(long)]
        count: Option<usize>,
        /// the log is in text format
        #[clap(long)]
        text: bool,
    },
}

fn read_log(path: &Path, text: bool) -> Result<Vec<WriteRecord>> {
    let f = File::open(path).context("could not open log file")?;
    let reader = BufReader::new(f);
    if text {
        parse_log_file_text(reader).collect()
    } else {
        parse_log_file_bin(reader).collect()
    }
}

/// One line of the crash state index.
#[derive(Serialize)]
struct IndexEntry {
    id: u64,
    hash: String,
    num_ops: usize,
    num_sectors: usize,
    state: CrashStateReport,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Segment { log, text } => {
            let records = read_log(&log, text)?;
            let epochs = segment(&records);
            println!("epoch\tops\tbarrier\toverlaps\tmeta\tcheckpoint");
            for (i, epoch) in epochs.iter().enumerate() {
                println!(
                    "{}\t{}\t{}\t{}\t{}\t{}",
                    i,
                    epoch.len(),
                    epoch.has_barrier,
                    epoch.overlaps,
                    epoch.num_meta,
                    epoch.checkpoint_epoch
                );
            }
            println!("{} records, {} epochs", records.len(), epochs.len());
        }
        Commands::Generate {
            config,
            log,
            output_dir,
            seed,
            count,
            text,
        } => {
            let config = Config::load(&config)?;
            let seed = seed.unwrap_or_else(|| config.seed());
            let count = count.unwrap_or_else(|| config.max_crash_states());

            let records = read_log(&log, text)?;
            let epochs = segment(&records);
            println!(
                "Read {} records, {} epochs. Generating up to {} crash states...",
                records.len(),
                epochs.len(),
                count
            );

            let state_dir = output_dir
                .unwrap_or_else(|| PathBuf::from("."))
                .join("crash_states");
            fs::create_dir_all(&state_dir).context("could not create output directory")?;
            let states_file =
                File::create(state_dir.join("states.bin")).context("could not create states file")?;
            let mut writer = new_state_writer_bin(BufWriter::new(states_file));

            let mut permuter = Permuter::new(config.permuter, seed);
            info!(permuter = ?config.permuter, seed, "generating crash states");
            let mut dedup = Deduplicator::new();
            let mut index = Vec::new();
            while index.len() < count {
                let (report, hash) = match config.sector_size {
                    Some(sector_size) => {
                        match dedup.next_unique_sector_state(&mut permuter, &epochs, sector_size) {
                            Some(state) => (CrashStateReport::from(&state), state.hash()),
                            None => break,
                        }
                    }
                    None => match dedup.next_unique_state(&mut permuter, &epochs) {
                        Some(state) => (CrashStateReport::from(&state), state.hash()),
                        None => break,
                    },
                };
                let id = index.len() as u64;
                report
                    .to_record(id)
                    .encode_into_std_write(&mut writer)
                    .context("could not write crash state")?;
                index.push(IndexEntry {
                    id,
                    hash: hash.to_string(),
                    num_ops: report.num_ops(),
                    num_sectors: report.num_sectors(),
                    state: report,
                });
            }
            writer.flush().context("could not write states file")?;

            let index_file =
                File::create(state_dir.join("index.yaml")).context("could not create index file")?;
            serde_yaml::to_writer(index_file, &index).context("could not write index file")?;
            println!(
                "Generation finished. {} unique crash states written to {}",
                index.len(),
                state_dir.display()
            );
            if index.len() < count {
                println!("State space exhausted before reaching {} states.", count);
            }
        }
    }
    Ok(())
}
