//! Argument parsing for running from the command line

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Command,
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the first header, the block geometry and the start time
    Header {
        /// GUPPI raw file
        file: PathBuf,
    },
    /// Count the data blocks in a file
    Count {
        /// GUPPI raw file
        file: PathBuf,
    },
    /// Summary statistics of one block
    Stats {
        /// GUPPI raw file
        file: PathBuf,
        /// Block to summarize, counting from zero
        #[clap(short, long, default_value_t = 0)]
        block: usize,
    },
    /// Read blocks and print their header sizes and polarization shapes
    Dump {
        /// GUPPI raw file
        file: PathBuf,
        /// First channel to extract, all channels if not given
        #[clap(short, long)]
        chan: Option<usize>,
        /// Number of channels to extract starting at `chan`
        #[clap(short, long, default_value_t = 1, value_parser = nonzero)]
        nchan: usize,
        /// Number of blocks to read
        #[clap(short, long, default_value_t = 1)]
        blocks: usize,
        /// Channel count the selection read length is scaled against
        #[clap(long, default_value_t = guppi_slurper::ASSUMED_CHANNELS, value_parser = nonzero)]
        assumed_channels: usize,
    },
    /// Detect Stokes I and write a sigproc filterbank
    Tofil {
        /// GUPPI raw file
        file: PathBuf,
        /// Output filterbank
        output: PathBuf,
    },
}

/// Match verbosity filter with tracing subscriber log levels
pub fn convert_filter(filter: log::LevelFilter) -> tracing_subscriber::filter::LevelFilter {
    match filter {
        log::LevelFilter::Off => tracing_subscriber::filter::LevelFilter::OFF,
        log::LevelFilter::Error => tracing_subscriber::filter::LevelFilter::ERROR,
        log::LevelFilter::Warn => tracing_subscriber::filter::LevelFilter::WARN,
        log::LevelFilter::Info => tracing_subscriber::filter::LevelFilter::INFO,
        log::LevelFilter::Debug => tracing_subscriber::filter::LevelFilter::DEBUG,
        log::LevelFilter::Trace => tracing_subscriber::filter::LevelFilter::TRACE,
    }
}

fn nonzero(s: &str) -> Result<usize, String> {
    match s.parse() {
        Ok(0) => Err("Must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(_) => Err("Invalid count".to_string()),
    }
}
