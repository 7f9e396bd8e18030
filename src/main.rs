use std::{fs::File, io::BufWriter, path::Path};

use clap::Parser;
use guppi_slurper::{
    filterbank::write_filterbank, ChannelSelection, Error, Geometry, GuppiRaw, ReadOutcome,
    ReaderOptions,
};
use tracing::info;

mod args;

fn header(path: &Path) -> Result<(), Error> {
    let mut reader = GuppiRaw::open(path)?;
    let (header, data_offset) = reader.read_header()?;
    for (key, value) in header.iter() {
        println!("{key:<8} = {value}");
    }
    println!("Data offset: {data_offset}");
    let geometry = Geometry::from_header(&header)?;
    println!(
        "Shape: {:?} ({} bits{})",
        geometry.shape(),
        geometry.n_bits,
        if geometry.channel_major {
            ", channel major"
        } else {
            ""
        }
    );
    if header.contains_key("STT_IMJD") && header.contains_key("STT_SMJD") {
        println!("Start: {}", header.start_epoch()?);
    }
    Ok(())
}

fn stats(path: &Path, block: usize) -> Result<(), Error> {
    let mut reader = GuppiRaw::open(path)?;
    let mut session = reader.session()?;
    session.seek_block(block)?;
    match session.next_block_stats()? {
        Some(s) => println!(
            "Block {block}: mean {} std {} max {} min {}",
            s.mean, s.std, s.max, s.min
        ),
        None => println!("No block {block} in {}", path.display()),
    }
    Ok(())
}

fn dump(
    path: &Path,
    selection: Option<ChannelSelection>,
    blocks: usize,
    assumed_channels: usize,
) -> Result<(), Error> {
    let options = ReaderOptions {
        assumed_channels,
        ..Default::default()
    };
    let mut reader = GuppiRaw::open_with(path, options)?;
    println!("{} blocks", reader.n_blocks()?);
    for i in 0..blocks {
        match reader.read_next_block(selection)? {
            ReadOutcome::Block(block) => println!(
                "Block {i}: {} header keys, X {:?}, Y {:?}",
                block.header.len(),
                block.x.shape(),
                block.y.shape()
            ),
            ReadOutcome::EndOfFile => {
                println!("End of file after {i} blocks");
                break;
            }
        }
    }
    Ok(())
}

fn tofil(path: &Path, output: &Path) -> Result<(), Error> {
    let mut reader = GuppiRaw::open(path)?;
    let out = BufWriter::new(File::create(output)?);
    let spectra = write_filterbank(&mut reader, out)?;
    info!("Wrote {spectra} spectra to {}", output.display());
    Ok(())
}

fn main() -> Result<(), Error> {
    let args = args::Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(args::convert_filter(args.verbose.log_level_filter()))
        .with_writer(std::io::stderr)
        .init();
    match args.command {
        args::Command::Header { file } => header(&file),
        args::Command::Count { file } => {
            println!("{}", GuppiRaw::open(&file)?.count_blocks()?);
            Ok(())
        }
        args::Command::Stats { file, block } => stats(&file, block),
        args::Command::Dump {
            file,
            chan,
            nchan,
            blocks,
            assumed_channels,
        } => dump(
            &file,
            chan.map(|index| ChannelSelection::new(index, nchan)),
            blocks,
            assumed_channels,
        ),
        args::Command::Tofil { file, output } => tofil(&file, &output),
    }
}
