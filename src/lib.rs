//! Readers and signal-source adapters for GUPPI raw voltage files.
//!
//! A GUPPI raw file is a sequence of records, each an 80-byte-per-line text
//! header followed by a binary block of channelized, dual-polarization
//! complex voltages. There is no index, so every block is found by walking
//! the headers in front of it.

pub mod complex;
pub mod decode;
pub mod error;
pub mod filterbank;
pub mod geometry;
pub mod header;
pub mod reader;
pub mod source;
pub mod unpack;

#[cfg(test)]
pub(crate) mod testing;

pub use complex::{Complex, ComplexByte, ComplexFloat};
pub use error::{Error, Result};
pub use decode::PolBlock;
pub use geometry::Geometry;
pub use header::{Header, HeaderValue};
pub use reader::{
    BlockRef, BlockStats, Blocks, ChannelSelection, ComplexBlock, GuppiRaw, OwnedBlock, ReadOutcome,
    ReaderOptions, Session,
};
pub use source::{GuppiSource, Work};

/// Size of a single header line in bytes
pub const RECORD_SIZE: usize = 80;
/// Payloads of files written with `DIRECTIO = 1` start on this boundary
pub const DIRECTIO_ALIGNMENT: u64 = 512;
/// Channel count the channel-selection read length is scaled against.
///
/// This only gives the right read length for 64-channel files; override it
/// with [`ReaderOptions::assumed_channels`] for anything else.
pub const ASSUMED_CHANNELS: usize = 64;
