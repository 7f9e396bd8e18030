//! Errors raised while reading GUPPI raw files

use std::path::PathBuf;

/// Errors that can occur while reading or decoding a GUPPI raw file.
///
/// Only [`Error::EndOfFile`] is part of normal operation: it is how a header
/// read reports that the file holds no further record.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("end of file")]
    EndOfFile,

    #[error("malformed header record {record:?} at byte {offset}")]
    HeaderParse { record: String, offset: u64 },

    #[error("malformed block: {0}")]
    MalformedBlock(String),

    #[error("header is missing required key {0}")]
    MissingKey(String),

    #[error("header key {key} has invalid value {value}")]
    InvalidValue { key: String, value: String },

    #[error("unsupported bits per sample: {0}")]
    UnsupportedBits(u32),

    #[error("unsupported number of polarization components: {0}")]
    UnsupportedPolarization(usize),

    #[error("payload at byte {offset} is truncated: wanted {wanted} bytes, {available} available")]
    TruncatedPayload {
        offset: u64,
        wanted: usize,
        available: u64,
    },

    #[error("channels {index}..{} do not fit in a block of {n_chan} channels", .index + .count)]
    InvalidSelection {
        index: usize,
        count: usize,
        n_chan: usize,
    },

    #[error("expected {expected} equally sized outputs, got {got}")]
    OutputMismatch { expected: usize, got: usize },

    #[error("reader for {} is closed", .0.display())]
    Closed(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("byte cast error: {0}")]
    ByteCast(#[from] byte_slice_cast::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
