//! GUPPI header records.
//!
//! A header is a run of 80-byte ASCII lines of the form `KEY = VALUE`,
//! terminated by a line starting with `END`. The payload follows the
//! terminating line, shifted up to the next 512-byte boundary when the
//! header carries `DIRECTIO = 1`.

use std::fmt;
use std::io::{Read, Seek, SeekFrom};

use hifitime::Epoch;
use tracing::{trace, warn};

use crate::{
    error::{Error, Result},
    DIRECTIO_ALIGNMENT, RECORD_SIZE,
};

const SENTINEL: &str = "END";
const SECONDS_PER_DAY: f64 = 86400.0;

/// A typed header value
#[derive(Clone, Debug, PartialEq)]
pub enum HeaderValue {
    Str(String),
    Int(i64),
    Float(f64),
}

impl HeaderValue {
    /// Type a raw value string.
    ///
    /// Anything containing a single quote is a string, anything else
    /// containing a `.` is a float, and everything left must be an integer.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.contains('\'') {
            Some(Self::Str(raw.trim_matches('\'').trim().to_owned()))
        } else if raw.contains('.') {
            raw.parse().ok().map(Self::Float)
        } else {
            raw.parse().ok().map(Self::Int)
        }
    }

    /// Integer view of the value. Integral floats and numeric strings convert.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            Self::Float(_) => None,
            Self::Str(s) => s.parse().ok(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Str(s) => s.parse().ok(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "'{s}'"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v:?}"),
        }
    }
}

/// The key/value pairs of one header, in file order
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Header {
    entries: Vec<(String, HeaderValue)>,
}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, replacing (in place) any earlier value for the same key
    pub fn insert(&mut self, key: impl Into<String>, value: HeaderValue) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&HeaderValue> {
        self.entries
            .iter()
            .find_map(|(k, v)| (k == key).then_some(v))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn required(&self, key: &str) -> Result<&HeaderValue> {
        self.get(key).ok_or_else(|| Error::MissingKey(key.to_owned()))
    }

    fn invalid(key: &str, value: &HeaderValue) -> Error {
        Error::InvalidValue {
            key: key.to_owned(),
            value: value.to_string(),
        }
    }

    pub fn int(&self, key: &str) -> Result<i64> {
        let v = self.required(key)?;
        v.as_i64().ok_or_else(|| Self::invalid(key, v))
    }

    /// A required non-negative integer
    pub fn usize(&self, key: &str) -> Result<usize> {
        let v = self.required(key)?;
        v.as_i64()
            .and_then(|i| usize::try_from(i).ok())
            .ok_or_else(|| Self::invalid(key, v))
    }

    pub fn float(&self, key: &str) -> Result<f64> {
        let v = self.required(key)?;
        v.as_f64().ok_or_else(|| Self::invalid(key, v))
    }

    pub fn string(&self, key: &str) -> Result<&str> {
        let v = self.required(key)?;
        v.as_str().ok_or_else(|| Self::invalid(key, v))
    }

    /// True exactly when `key` is present and equal to 1
    pub fn flag(&self, key: &str) -> bool {
        self.get(key).and_then(HeaderValue::as_i64) == Some(1)
    }

    pub fn directio(&self) -> bool {
        self.flag("DIRECTIO")
    }

    /// Bytes between this header's data offset and the next header
    pub fn payload_span(&self) -> Result<u64> {
        let blocsize = self.usize("BLOCSIZE")? as u64;
        Ok(if self.directio() {
            align_directio(blocsize)
        } else {
            blocsize
        })
    }

    /// Start of the observation from the `STT_IMJD`, `STT_SMJD` and
    /// (optional) `STT_OFFS` keys
    pub fn start_epoch(&self) -> Result<Epoch> {
        let imjd = self.int("STT_IMJD")?;
        let smjd = self.float("STT_SMJD")?;
        let offs = match self.get("STT_OFFS") {
            Some(v) => v.as_f64().ok_or_else(|| Self::invalid("STT_OFFS", v))?,
            None => 0.0,
        };
        Ok(Epoch::from_mjd_utc(
            imjd as f64 + (smjd + offs) / SECONDS_PER_DAY,
        ))
    }
}

/// Round an offset up to the next DIRECTIO boundary
pub fn align_directio(offset: u64) -> u64 {
    match offset % DIRECTIO_ALIGNMENT {
        0 => offset,
        rem => offset + DIRECTIO_ALIGNMENT - rem,
    }
}

/// One parsed header line
#[derive(Clone, Debug, PartialEq)]
pub enum Record {
    End,
    Entry(String, HeaderValue),
}

/// Parse a single header line found at byte `offset`
pub fn parse_record(record: &[u8], offset: u64) -> Result<Record> {
    let malformed = || Error::HeaderParse {
        record: String::from_utf8_lossy(record).trim_end().to_owned(),
        offset,
    };
    let line = std::str::from_utf8(record).map_err(|_| malformed())?;
    if line.starts_with(SENTINEL) {
        return Ok(Record::End);
    }
    let (key, value) = line.split_once('=').ok_or_else(malformed)?;
    let key = key.trim();
    if key.is_empty() {
        return Err(malformed());
    }
    let value = HeaderValue::parse(value).ok_or_else(malformed)?;
    Ok(Record::Entry(key.to_owned(), value))
}

/// Read the header starting at the reader's current position.
///
/// Returns the header and the absolute offset of its payload. The reader is
/// put back where it started on every path, so the same header can be read
/// again. Running out of file before the `END` line is [`Error::EndOfFile`].
pub fn read_header<R: Read + Seek>(reader: &mut R, filesize: u64) -> Result<(Header, u64)> {
    let start = reader.stream_position()?;
    let parsed = read_records(reader, start, filesize);
    reader.seek(SeekFrom::Start(start))?;
    parsed
}

fn read_records<R: Read>(reader: &mut R, start: u64, filesize: u64) -> Result<(Header, u64)> {
    let mut header = Header::new();
    let mut record = [0u8; RECORD_SIZE];
    let mut pos = start;
    loop {
        if pos + RECORD_SIZE as u64 > filesize {
            if pos != start {
                warn!("Header at byte {start} runs past the end of the file");
            }
            return Err(Error::EndOfFile);
        }
        reader.read_exact(&mut record)?;
        let parsed = parse_record(&record, pos)?;
        pos += RECORD_SIZE as u64;
        match parsed {
            Record::End => break,
            Record::Entry(key, value) => header.insert(key, value),
        }
    }
    let data_offset = if header.directio() {
        align_directio(pos)
    } else {
        pos
    };
    trace!(
        "Header at byte {start}: {} keys, data at byte {data_offset}",
        header.len()
    );
    Ok((header, data_offset))
}
