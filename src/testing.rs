//! Builders for synthetic raw files used across the unit tests

use std::io::Write;

use tempfile::NamedTempFile;

use crate::{header::align_directio, RECORD_SIZE};

/// One space-padded header line
pub(crate) fn record(key: &str, value: &str) -> [u8; RECORD_SIZE] {
    let line = format!("{key:<8}= {value:>20}");
    let mut r = [b' '; RECORD_SIZE];
    r[..line.len()].copy_from_slice(line.as_bytes());
    r
}

/// A complete header, END line included
pub(crate) fn header_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut bytes: Vec<u8> = entries.iter().flat_map(|(k, v)| record(k, v)).collect();
    let mut end = [b' '; RECORD_SIZE];
    end[..3].copy_from_slice(b"END");
    bytes.extend(end);
    bytes
}

/// Header with just the keys needed to size a block
pub(crate) fn block_header(nchan: usize, npol: usize, nbits: u32, blocsize: usize) -> Vec<u8> {
    header_bytes(&[
        ("OBSNCHAN", &nchan.to_string()),
        ("NPOL", &npol.to_string()),
        ("NBITS", &nbits.to_string()),
        ("BLOCSIZE", &blocsize.to_string()),
    ])
}

/// A record written with DIRECTIO: the payload and the next header both start
/// on a 512-byte boundary. `entries` must include `DIRECTIO = 1`.
pub(crate) fn directio_record(entries: &[(&str, &str)], payload: &[u8]) -> Vec<u8> {
    let mut bytes = header_bytes(entries);
    bytes.resize(align_directio(bytes.len() as u64) as usize, 0);
    bytes.extend_from_slice(payload);
    bytes.resize(align_directio(bytes.len() as u64) as usize, 0);
    bytes
}

pub(crate) fn write_file(bytes: &[u8]) -> NamedTempFile {
    let mut f = NamedTempFile::new().expect("create temp file");
    f.write_all(bytes).expect("write temp file");
    f.flush().expect("flush temp file");
    f
}
