//! Sequential reader for GUPPI raw files.
//!
//! The format has no index, so the reader keeps an explicit byte cursor that
//! always sits on a header boundary:
//!
//! * header peeks ([`GuppiRaw::read_header`], [`GuppiRaw::next_geometry`])
//!   leave it where it is,
//! * block reads move it to the header after the block,
//! * [`GuppiRaw::count_blocks`], [`GuppiRaw::reset`] and
//!   [`GuppiRaw::read_first_header`] leave it at the start of the file.
//!
//! Decoded polarizations live in buffers owned by the reader and are
//! overwritten by the next read. Copy them (or use [`GuppiRaw::blocks`]) to
//! keep them around.

use std::fmt;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};

use byte_slice_cast::AsSliceOf;
use tracing::{debug, info, warn};

use crate::{
    complex::ComplexFloat,
    decode::{decode_complex_into, decode_into, PolBlock},
    error::{Error, Result},
    geometry::Geometry,
    header::{read_header, Header},
    unpack::unpack,
    ASSUMED_CHANNELS,
};

/// Reader configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReaderOptions {
    /// Number of blocks in the file, if already known. Saves the linear scan
    /// in [`GuppiRaw::n_blocks`].
    pub n_blocks: Option<usize>,
    /// Channel count the read length of a [`ChannelSelection`] is scaled
    /// against
    pub assumed_channels: usize,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            n_blocks: None,
            assumed_channels: ASSUMED_CHANNELS,
        }
    }
}

/// A contiguous run of channels to extract from each block
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelSelection {
    pub index: usize,
    pub count: usize,
}

impl ChannelSelection {
    pub fn new(index: usize, count: usize) -> Self {
        Self { index, count }
    }
}

/// A decoded block, borrowing the reader's polarization buffers
#[derive(Debug)]
pub struct BlockRef<'a> {
    pub header: Header,
    pub x: &'a PolBlock,
    pub y: &'a PolBlock,
}

impl BlockRef<'_> {
    pub fn to_owned(&self) -> OwnedBlock {
        OwnedBlock {
            header: self.header.clone(),
            x: self.x.clone(),
            y: self.y.clone(),
        }
    }
}

/// A decoded block with its own storage
#[derive(Clone, Debug, PartialEq)]
pub struct OwnedBlock {
    pub header: Header,
    pub x: PolBlock,
    pub y: PolBlock,
}

/// Result of one step through the file
#[derive(Debug)]
pub enum ReadOutcome<'a> {
    Block(BlockRef<'a>),
    EndOfFile,
}

/// A block decoded to complex values in storage order
#[derive(Debug)]
pub struct ComplexBlock<'a> {
    pub header: Header,
    pub geometry: Geometry,
    pub data: &'a [ComplexFloat],
}

impl ComplexBlock<'_> {
    /// Shape of `data`: the block geometry with the component axis halved
    pub fn shape(&self) -> [usize; 3] {
        let [a, b, c] = self.geometry.shape();
        [a, b, c / 2]
    }
}

/// Summary statistics over the real and imaginary parts of a block
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BlockStats {
    pub mean: f32,
    pub std: f32,
    pub max: f32,
    pub min: f32,
}

impl BlockStats {
    pub fn from_complex(data: &[ComplexFloat]) -> Option<Self> {
        if data.is_empty() {
            return None;
        }
        let n = (data.len() * 2) as f64;
        let parts = || data.iter().flat_map(|c| [c.re, c.im]);
        let mean = parts().map(f64::from).sum::<f64>() / n;
        let var = parts().map(|v| (f64::from(v) - mean).powi(2)).sum::<f64>() / n;
        Some(Self {
            mean: mean as f32,
            std: var.sqrt() as f32,
            max: parts().fold(f32::MIN, f32::max),
            min: parts().fold(f32::MAX, f32::min),
        })
    }
}

/// Reader session over one GUPPI raw file
pub struct GuppiRaw {
    path: PathBuf,
    file: Option<File>,
    filesize: u64,
    cursor: u64,
    options: ReaderOptions,
    n_blocks: Option<usize>,
    raw: Vec<u8>,
    samples: Vec<i8>,
    x: PolBlock,
    y: PolBlock,
    complex: Vec<ComplexFloat>,
    last_header: Option<Header>,
    exhausted: bool,
}

impl fmt::Debug for GuppiRaw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuppiRaw")
            .field("path", &self.path)
            .field("open", &self.is_open())
            .field("filesize", &self.filesize)
            .field("cursor", &self.cursor)
            .field("n_blocks", &self.n_blocks)
            .finish()
    }
}

impl GuppiRaw {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, ReaderOptions::default())
    }

    pub fn open_with(path: impl AsRef<Path>, options: ReaderOptions) -> Result<Self> {
        let mut reader = Self {
            path: path.as_ref().to_owned(),
            file: None,
            filesize: 0,
            cursor: 0,
            options,
            n_blocks: options.n_blocks,
            raw: vec![],
            samples: vec![],
            x: PolBlock::default(),
            y: PolBlock::default(),
            complex: vec![],
            last_header: None,
            exhausted: false,
        };
        reader.reopen()?;
        Ok(reader)
    }

    /// (Re)open the file, rewinding to the start and refreshing its size
    pub fn reopen(&mut self) -> Result<()> {
        let file = File::open(&self.path)?;
        self.filesize = file.metadata()?.len();
        self.file = Some(file);
        self.cursor = 0;
        self.exhausted = false;
        info!(
            "Opened {} ({} bytes)",
            self.path.display(),
            self.filesize
        );
        Ok(())
    }

    /// Reopen the file for the lifetime of the returned guard, which closes
    /// it again when dropped
    pub fn session(&mut self) -> Result<Session<'_>> {
        self.reopen()?;
        Ok(Session { reader: self })
    }

    /// Release the file handle. Reads fail with [`Error::Closed`] until the
    /// reader is reopened.
    pub fn close(&mut self) {
        if self.file.take().is_some() {
            debug!("Closed {}", self.path.display());
        }
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn filesize(&self) -> u64 {
        self.filesize
    }

    /// Byte offset of the next header to be read
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn options(&self) -> &ReaderOptions {
        &self.options
    }

    /// Header of the most recent block read
    pub fn last_header(&self) -> Option<&Header> {
        self.last_header.as_ref()
    }

    /// Move back to the first header
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.exhausted = false;
    }

    fn file_at(&mut self, offset: u64) -> Result<&mut File> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| Error::Closed(self.path.clone()))?;
        file.seek(SeekFrom::Start(offset))?;
        Ok(file)
    }

    /// Parse the header under the cursor without moving it.
    ///
    /// Returns the header and the byte offset of its payload.
    pub fn read_header(&mut self) -> Result<(Header, u64)> {
        let filesize = self.filesize;
        let file = self.file_at(self.cursor)?;
        read_header(file, filesize)
    }

    pub fn read_first_header(&mut self) -> Result<Header> {
        self.cursor = 0;
        Ok(self.read_header()?.0)
    }

    /// Geometry of the block under the cursor
    pub fn next_geometry(&mut self) -> Result<Geometry> {
        Geometry::from_header(&self.read_header()?.0)
    }

    /// Walk every header in the file and count the blocks.
    ///
    /// Leaves the cursor at the start of the file and caches the count.
    pub fn count_blocks(&mut self) -> Result<usize> {
        self.cursor = 0;
        let mut count = 0;
        let walked = loop {
            match self.read_header() {
                Ok((header, data_offset)) => match header.payload_span() {
                    Ok(span) => {
                        self.cursor = data_offset + span;
                        count += 1;
                    }
                    Err(e) => break Err(e),
                },
                Err(Error::EndOfFile) => break Ok(count),
                Err(e) => break Err(e),
            }
        };
        self.cursor = 0;
        let count = walked?;
        debug!("Found {count} blocks in {}", self.path.display());
        self.n_blocks = Some(count);
        Ok(count)
    }

    /// Number of blocks in the file, from the options, an earlier count or a
    /// fresh scan. The cursor is left where it was.
    pub fn n_blocks(&mut self) -> Result<usize> {
        if let Some(n) = self.n_blocks {
            return Ok(n);
        }
        let cursor = self.cursor;
        let n = self.count_blocks();
        self.cursor = cursor;
        n
    }

    /// Position the cursor on block `index` (counting from zero) by walking
    /// the headers in front of it
    pub fn seek_block(&mut self, index: usize) -> Result<()> {
        self.reset();
        for _ in 0..index {
            let (header, data_offset) = self.read_header()?;
            self.cursor = data_offset + header.payload_span()?;
        }
        Ok(())
    }

    /// Read `len` payload bytes at `offset` into the raw buffer
    fn read_payload(&mut self, offset: u64, len: usize) -> Result<()> {
        if offset.checked_add(len as u64).map_or(true, |end| end > self.filesize) {
            return Err(Error::TruncatedPayload {
                offset,
                wanted: len,
                available: self.filesize.saturating_sub(offset),
            });
        }
        self.raw.resize(len, 0);
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| Error::Closed(self.path.clone()))?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut self.raw)?;
        Ok(())
    }

    /// Byte range and geometry of a channel selection within a block
    fn selection_range(
        &self,
        header: &Header,
        data_offset: u64,
        selection: ChannelSelection,
    ) -> Result<(u64, usize, Geometry)> {
        let full = Geometry::from_header(header)?;
        let assumed = self.options.assumed_channels;
        let invalid = || Error::InvalidSelection {
            index: selection.index,
            count: selection.count,
            n_chan: full.n_chan,
        };
        if selection.count == 0 || selection.count > assumed {
            return Err(invalid());
        }
        if full.n_chan != assumed {
            warn!(
                "Channel selection scales the read length for {assumed} channels, \
                 but the block has {}",
                full.n_chan
            );
        }
        let blocsize = header.usize("BLOCSIZE")?;
        let len = blocsize / (assumed / selection.count);
        let skip = selection
            .index
            .checked_mul(full.n_pol * full.n_bits as usize / 8)
            .filter(|skip| skip.checked_add(len).map_or(false, |end| end <= blocsize))
            .ok_or_else(invalid)?;
        let geometry = Geometry::solve(
            len,
            selection.count,
            full.n_pol,
            full.n_bits,
            full.channel_major,
        )?;
        Ok((data_offset + skip as u64, len, geometry))
    }

    /// Read and unpack the next block into the sample buffer. Returns the
    /// header, its geometry and the offset of the following header, or
    /// `None` at the end of the file. The cursor is left alone.
    fn load_next(
        &mut self,
        selection: Option<ChannelSelection>,
    ) -> Result<Option<(Header, Geometry, u64)>> {
        let (header, data_offset) = match self.read_header() {
            Ok(h) => h,
            Err(Error::EndOfFile) => return Ok(None),
            Err(e) => return Err(e),
        };
        let (offset, len, geometry) = match selection {
            Some(selection) => self.selection_range(&header, data_offset, selection)?,
            None => {
                let geometry = Geometry::from_header(&header)?;
                (data_offset, geometry.block_bytes(), geometry)
            }
        };
        debug!(
            "Block at byte {data_offset}: shape {:?}, {} bits",
            geometry.shape(),
            geometry.n_bits
        );
        self.read_payload(offset, len)?;
        if geometry.n_bits != 8 {
            unpack(&self.raw, geometry.n_bits, &mut self.samples)?;
        }
        // Always step over the whole payload, whatever was selected
        let next = data_offset + header.payload_span()?;
        Ok(Some((header, geometry, next)))
    }

    /// Unpacked samples of the block just loaded
    fn loaded_samples<'a>(raw: &'a [u8], samples: &'a [i8], n_bits: u32) -> Result<&'a [i8]> {
        if n_bits == 8 {
            Ok(raw.as_slice_of::<i8>()?)
        } else {
            Ok(samples)
        }
    }

    /// Decode the next block into X/Y polarizations
    fn advance(&mut self, selection: Option<ChannelSelection>) -> Result<Option<Header>> {
        let Some((header, geometry, next)) = self.load_next(selection)? else {
            return Ok(None);
        };
        let samples = Self::loaded_samples(&self.raw, &self.samples, geometry.n_bits)?;
        decode_into(samples, &geometry, &mut self.x, &mut self.y)?;
        self.cursor = next;
        self.last_header = Some(header.clone());
        Ok(Some(header))
    }

    /// Decode the next block, optionally keeping only a run of channels.
    ///
    /// Returns [`ReadOutcome::EndOfFile`] once no header is left. Reading
    /// again after that keeps returning it until [`GuppiRaw::reset`].
    pub fn read_next_block(
        &mut self,
        selection: Option<ChannelSelection>,
    ) -> Result<ReadOutcome<'_>> {
        Ok(match self.advance(selection)? {
            Some(header) => ReadOutcome::Block(BlockRef {
                header,
                x: &self.x,
                y: &self.y,
            }),
            None => ReadOutcome::EndOfFile,
        })
    }

    /// Like [`GuppiRaw::read_next_block`], but the end of the file is
    /// `Ok(None)`, and stays that way without touching the file until
    /// [`GuppiRaw::reset`]. Every other error is still returned.
    pub fn poll_next_block(
        &mut self,
        selection: Option<ChannelSelection>,
    ) -> Result<Option<BlockRef<'_>>> {
        if self.exhausted {
            return Ok(None);
        }
        match self.advance(selection)? {
            Some(header) => Ok(Some(BlockRef {
                header,
                x: &self.x,
                y: &self.y,
            })),
            None => {
                info!("File depleted: {}", self.path.display());
                self.exhausted = true;
                Ok(None)
            }
        }
    }

    /// Iterate over the remaining blocks, copying each one out
    pub fn blocks(&mut self, selection: Option<ChannelSelection>) -> Blocks<'_> {
        Blocks {
            reader: self,
            selection,
            done: false,
        }
    }

    /// Decode the next whole block to complex values, honoring `CHANMAJ`
    pub fn read_next_complex_block(&mut self) -> Result<Option<ComplexBlock<'_>>> {
        let Some((header, geometry, next)) = self.load_next(None)? else {
            return Ok(None);
        };
        let samples = Self::loaded_samples(&self.raw, &self.samples, geometry.n_bits)?;
        decode_complex_into(samples, &geometry, &mut self.complex)?;
        self.cursor = next;
        self.last_header = Some(header.clone());
        Ok(Some(ComplexBlock {
            header,
            geometry,
            data: &self.complex,
        }))
    }

    /// Statistics of the next block, `None` at the end of the file
    pub fn next_block_stats(&mut self) -> Result<Option<BlockStats>> {
        Ok(self
            .read_next_complex_block()?
            .and_then(|block| BlockStats::from_complex(block.data)))
    }
}

/// Guard returned by [`GuppiRaw::session`]; closes the file on drop
pub struct Session<'a> {
    reader: &'a mut GuppiRaw,
}

impl Deref for Session<'_> {
    type Target = GuppiRaw;

    fn deref(&self) -> &GuppiRaw {
        self.reader
    }
}

impl DerefMut for Session<'_> {
    fn deref_mut(&mut self) -> &mut GuppiRaw {
        self.reader
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        self.reader.close();
    }
}

/// Iterator over owned copies of the remaining blocks.
///
/// Ends at the end of the file, or after yielding an error.
pub struct Blocks<'a> {
    reader: &'a mut GuppiRaw,
    selection: Option<ChannelSelection>,
    done: bool,
}

impl Iterator for Blocks<'_> {
    type Item = Result<OwnedBlock>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.read_next_block(self.selection) {
            Ok(ReadOutcome::Block(block)) => Some(Ok(block.to_owned())),
            Ok(ReadOutcome::EndOfFile) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl std::iter::FusedIterator for Blocks<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        complex::ComplexByte,
        testing::{block_header, directio_record, header_bytes, write_file},
    };

    /// Two blocks of 2 channels, dual polarization, 8 bits, 16 bytes each
    fn two_block_file() -> (tempfile::NamedTempFile, Vec<u8>, Vec<u8>) {
        let first: Vec<u8> = (0..16).collect();
        let second: Vec<u8> = (0..16).map(|v: u8| (v as i8 - 8) as u8).collect();
        let mut bytes = block_header(2, 2, 8, 16);
        bytes.extend(&first);
        bytes.extend(block_header(2, 2, 8, 16));
        bytes.extend(&second);
        (write_file(&bytes), first, second)
    }

    #[test]
    fn test_end_to_end() -> Result<()> {
        let (file, _, second) = two_block_file();
        let mut reader = GuppiRaw::open(file.path())?;
        let first = match reader.read_next_block(None)? {
            ReadOutcome::Block(b) => b.to_owned(),
            ReadOutcome::EndOfFile => panic!("expected a block"),
        };
        assert_eq!(first.x.shape(), (2, 2));
        assert_eq!(first.x.get(0, 0), ComplexByte::new(0, 1));
        assert_eq!(first.y.get(1, 1), ComplexByte::new(14, 15));
        match reader.read_next_block(None)? {
            ReadOutcome::Block(b) => {
                assert_eq!(b.x.get(0, 0), ComplexByte::new(second[0] as i8, second[1] as i8));
                assert_eq!(b.x.get(0, 0), ComplexByte::new(-8, -7));
            }
            ReadOutcome::EndOfFile => panic!("expected a second block"),
        }
        assert!(matches!(reader.read_next_block(None)?, ReadOutcome::EndOfFile));
        // No auto-rewind
        assert!(matches!(reader.read_next_block(None)?, ReadOutcome::EndOfFile));
        reader.reset();
        match reader.read_next_block(None)? {
            ReadOutcome::Block(b) => assert_eq!(b.to_owned(), first),
            ReadOutcome::EndOfFile => panic!("expected the first block again"),
        }
        Ok(())
    }

    #[test]
    fn test_count_matches_reads() -> Result<()> {
        let (file, _, _) = two_block_file();
        let mut reader = GuppiRaw::open(file.path())?;
        assert_eq!(reader.count_blocks()?, 2);
        assert_eq!(reader.cursor(), 0);
        let read = reader.blocks(None).collect::<Result<Vec<_>>>()?;
        assert_eq!(read.len(), 2);
        assert_eq!(reader.n_blocks()?, 2);
        Ok(())
    }

    #[test]
    fn test_n_blocks_keeps_cursor() -> Result<()> {
        let (file, _, _) = two_block_file();
        let mut reader = GuppiRaw::open(file.path())?;
        reader.read_next_block(None)?;
        let cursor = reader.cursor();
        assert_ne!(cursor, 0);
        assert_eq!(reader.n_blocks()?, 2);
        assert_eq!(reader.cursor(), cursor);
        Ok(())
    }

    #[test]
    fn test_block_count_hint() -> Result<()> {
        let (file, _, _) = two_block_file();
        let options = ReaderOptions {
            n_blocks: Some(7),
            ..Default::default()
        };
        let mut reader = GuppiRaw::open_with(file.path(), options)?;
        assert_eq!(reader.n_blocks()?, 7);
        assert_eq!(reader.count_blocks()?, 2);
        assert_eq!(reader.n_blocks()?, 2);
        Ok(())
    }

    #[test]
    fn test_header_peek_is_idempotent() -> Result<()> {
        let (file, _, _) = two_block_file();
        let mut reader = GuppiRaw::open(file.path())?;
        let a = reader.read_header()?;
        let b = reader.read_header()?;
        assert_eq!(a, b);
        assert_eq!(reader.cursor(), 0);
        assert_eq!(a.1, 5 * 80);
        assert_eq!(reader.read_first_header()?, a.0);
        let g = reader.next_geometry()?;
        assert_eq!(g.shape(), [2, 2, 4]);
        Ok(())
    }

    #[test]
    fn test_polling() -> Result<()> {
        let (file, _, _) = two_block_file();
        let mut reader = GuppiRaw::open(file.path())?;
        assert!(reader.poll_next_block(None)?.is_some());
        assert!(reader.poll_next_block(None)?.is_some());
        assert!(reader.poll_next_block(None)?.is_none());
        assert!(reader.poll_next_block(None)?.is_none());
        assert_eq!(reader.last_header().unwrap().int("BLOCSIZE")?, 16);
        reader.reset();
        assert!(reader.poll_next_block(None)?.is_some());
        Ok(())
    }

    #[test]
    fn test_closed_reader() -> Result<()> {
        let (file, _, _) = two_block_file();
        let mut reader = GuppiRaw::open(file.path())?;
        reader.close();
        assert!(!reader.is_open());
        assert!(matches!(reader.read_next_block(None), Err(Error::Closed(_))));
        assert!(matches!(reader.read_first_header(), Err(Error::Closed(_))));
        assert!(matches!(reader.poll_next_block(None), Err(Error::Closed(_))));
        Ok(())
    }

    #[test]
    fn test_session_closes_on_drop() -> Result<()> {
        let (file, _, _) = two_block_file();
        let mut reader = GuppiRaw::open(file.path())?;
        reader.read_next_block(None)?;
        {
            let mut session = reader.session()?;
            // Entering a session starts from the top
            assert_eq!(session.cursor(), 0);
            assert!(session.poll_next_block(None)?.is_some());
        }
        assert!(!reader.is_open());
        assert!(matches!(reader.read_next_block(None), Err(Error::Closed(_))));
        reader.reopen()?;
        assert_eq!(reader.count_blocks()?, 2);
        Ok(())
    }

    #[test]
    fn test_session_closes_on_error() {
        let (file, _, _) = two_block_file();
        let mut reader = GuppiRaw::open(file.path()).unwrap();
        let failed = (|| -> Result<()> {
            let mut session = reader.session()?;
            session.seek_block(5)?;
            Ok(())
        })();
        assert!(matches!(failed, Err(Error::EndOfFile)));
        assert!(!reader.is_open());
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            GuppiRaw::open("/nonexistent/file.raw"),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn test_truncated_payload() -> Result<()> {
        let mut bytes = block_header(2, 2, 8, 16);
        bytes.extend([0u8; 10]);
        let file = write_file(&bytes);
        let mut reader = GuppiRaw::open(file.path())?;
        assert!(matches!(
            reader.read_next_block(None),
            Err(Error::TruncatedPayload {
                wanted: 16,
                available: 10,
                ..
            })
        ));
        Ok(())
    }

    #[test]
    fn test_malformed_header_is_fatal() -> Result<()> {
        let mut bytes = block_header(2, 2, 8, 16);
        bytes.extend([0u8; 16]);
        let mut junk = [b' '; 80];
        junk[..7].copy_from_slice(b"GARBAGE");
        bytes.extend(junk);
        bytes.extend(block_header(2, 2, 8, 16));
        bytes.extend([0u8; 16]);
        let file = write_file(&bytes);
        let mut reader = GuppiRaw::open(file.path())?;
        assert!(matches!(reader.read_next_block(None)?, ReadOutcome::Block(_)));
        match reader.read_next_block(None) {
            Err(Error::HeaderParse { offset, .. }) => assert_eq!(offset, 5 * 80 + 16),
            other => panic!("expected a header error, got {other:?}"),
        }
        assert!(matches!(
            reader.count_blocks(),
            Err(Error::HeaderParse { .. })
        ));
        assert_eq!(reader.cursor(), 0);
        Ok(())
    }

    #[test]
    fn test_malformed_geometry() -> Result<()> {
        let mut bytes = block_header(2, 2, 8, 15);
        bytes.extend([0u8; 15]);
        let file = write_file(&bytes);
        let mut reader = GuppiRaw::open(file.path())?;
        assert!(matches!(
            reader.read_next_block(None),
            Err(Error::MalformedBlock(_))
        ));
        Ok(())
    }

    #[test]
    fn test_oversized_blocsize() -> Result<()> {
        let mut bytes = block_header(2, 2, 8, 1 << 61);
        bytes.extend([0u8; 16]);
        let file = write_file(&bytes);
        let mut reader = GuppiRaw::open(file.path())?;
        assert!(matches!(
            reader.read_next_block(None),
            Err(Error::MalformedBlock(_))
        ));
        Ok(())
    }

    #[test]
    fn test_failed_decode_keeps_cursor() -> Result<()> {
        let mut bytes = block_header(2, 1, 8, 8);
        bytes.extend(0..8u8);
        let file = write_file(&bytes);
        let mut reader = GuppiRaw::open(file.path())?;
        assert!(matches!(
            reader.read_next_block(None),
            Err(Error::UnsupportedPolarization(1))
        ));
        assert_eq!(reader.cursor(), 0);
        assert!(reader.last_header().is_none());
        assert_eq!(reader.next_geometry()?.shape(), [2, 4, 1]);
        Ok(())
    }

    #[test]
    fn test_directio_blocks() -> Result<()> {
        let entries = [
            ("OBSNCHAN", "2"),
            ("NPOL", "2"),
            ("NBITS", "8"),
            ("BLOCSIZE", "16"),
            ("DIRECTIO", "1"),
        ];
        let payload: Vec<u8> = (100..116).collect();
        let mut bytes = directio_record(&entries, &payload);
        bytes.extend(directio_record(&entries, &payload));
        let file = write_file(&bytes);
        let mut reader = GuppiRaw::open(file.path())?;
        assert_eq!(reader.read_header()?.1, 512);
        assert_eq!(reader.count_blocks()?, 2);
        for block in reader.blocks(None) {
            let block = block?;
            assert_eq!(block.x.get(0, 0), ComplexByte::new(100, 101));
        }
        assert_eq!(reader.cursor(), 2048);
        Ok(())
    }

    #[test]
    fn test_two_bit_block() -> Result<()> {
        // 1 channel, 2 samples, 4 components at 2 bits is 2 bytes
        let mut bytes = block_header(1, 2, 2, 2);
        bytes.extend([0b1011_0001, 0b0001_1011]);
        let file = write_file(&bytes);
        let mut reader = GuppiRaw::open(file.path())?;
        match reader.read_next_block(None)? {
            ReadOutcome::Block(b) => {
                assert_eq!(b.x.channel(0), [ComplexByte::new(-12, -40), ComplexByte::new(40, 12)]);
                assert_eq!(b.y.channel(0), [ComplexByte::new(40, 12), ComplexByte::new(-12, -40)]);
            }
            ReadOutcome::EndOfFile => panic!("expected a block"),
        }
        Ok(())
    }

    #[test]
    fn test_four_bit_block() -> Result<()> {
        let mut bytes = block_header(1, 2, 4, 2);
        bytes.extend([0x1f, 0x7e]);
        let file = write_file(&bytes);
        let mut reader = GuppiRaw::open(file.path())?;
        match reader.read_next_block(None)? {
            ReadOutcome::Block(b) => {
                assert_eq!(b.x.get(0, 0), ComplexByte::new(1, -1));
                assert_eq!(b.y.get(0, 0), ComplexByte::new(7, -2));
            }
            ReadOutcome::EndOfFile => panic!("expected a block"),
        }
        Ok(())
    }

    /// A 64-channel, 2-sample block whose components count up from zero
    fn wide_file() -> tempfile::NamedTempFile {
        let payload: Vec<u8> = (0..512).map(|i| (i % 256) as u8).collect();
        let mut bytes = block_header(64, 2, 8, 512);
        bytes.extend(&payload);
        bytes.extend(block_header(64, 2, 8, 512));
        bytes.extend(&payload);
        write_file(&bytes)
    }

    #[test]
    fn test_channel_selection() -> Result<()> {
        let file = wide_file();
        let mut reader = GuppiRaw::open(file.path())?;
        let data_offset = reader.read_header()?.1;
        let selection = Some(ChannelSelection::new(3, 2));
        match reader.read_next_block(selection)? {
            ReadOutcome::Block(b) => {
                // 512 / (64 / 2) bytes starting 3 * 4 bytes in
                assert_eq!(b.x.shape(), (2, 2));
                assert_eq!(b.x.get(0, 0), ComplexByte::new(12, 13));
                assert_eq!(b.y.get(1, 1), ComplexByte::new(26, 27));
            }
            ReadOutcome::EndOfFile => panic!("expected a block"),
        }
        // The cursor skips the whole payload, not just the selection
        assert_eq!(reader.cursor(), data_offset + 512);
        assert!(matches!(reader.read_next_block(selection)?, ReadOutcome::Block(_)));
        assert!(matches!(reader.read_next_block(selection)?, ReadOutcome::EndOfFile));
        Ok(())
    }

    #[test]
    fn test_channel_selection_from_zero() -> Result<()> {
        let file = wide_file();
        let mut reader = GuppiRaw::open(file.path())?;
        match reader.read_next_block(Some(ChannelSelection::new(0, 1)))? {
            ReadOutcome::Block(b) => {
                assert_eq!(b.x.shape(), (1, 2));
                assert_eq!(b.x.get(0, 1), ComplexByte::new(4, 5));
            }
            ReadOutcome::EndOfFile => panic!("expected a block"),
        }
        Ok(())
    }

    #[test]
    fn test_invalid_selection() -> Result<()> {
        let file = wide_file();
        let mut reader = GuppiRaw::open(file.path())?;
        for selection in [ChannelSelection::new(0, 0), ChannelSelection::new(0, 65)] {
            assert!(matches!(
                reader.read_next_block(Some(selection)),
                Err(Error::InvalidSelection { .. })
            ));
        }
        // Reads past the end of the payload are refused
        for selection in [
            ChannelSelection::new(100, 32),
            ChannelSelection::new(usize::MAX / 2, 1),
            ChannelSelection::new(usize::MAX / 4 - 1, 64),
        ] {
            assert!(matches!(
                reader.read_next_block(Some(selection)),
                Err(Error::InvalidSelection { .. })
            ));
        }
        assert_eq!(reader.cursor(), 0);
        Ok(())
    }

    #[test]
    fn test_assumed_channels_override() -> Result<()> {
        let mut bytes = block_header(4, 2, 8, 32);
        bytes.extend(0..32u8);
        let file = write_file(&bytes);
        let options = ReaderOptions {
            assumed_channels: 4,
            ..Default::default()
        };
        let mut reader = GuppiRaw::open_with(file.path(), options)?;
        match reader.read_next_block(Some(ChannelSelection::new(1, 2)))? {
            ReadOutcome::Block(b) => {
                assert_eq!(b.x.shape(), (2, 2));
                assert_eq!(b.x.get(0, 0), ComplexByte::new(4, 5));
            }
            ReadOutcome::EndOfFile => panic!("expected a block"),
        }
        Ok(())
    }

    #[test]
    fn test_complex_block() -> Result<()> {
        let (file, _, _) = two_block_file();
        let mut reader = GuppiRaw::open(file.path())?;
        let block = reader.read_next_complex_block()?.expect("a block");
        assert_eq!(block.shape(), [2, 2, 2]);
        assert_eq!(block.data.len(), 8);
        assert_eq!(block.data[1], ComplexFloat::new(2.0, 3.0));
        assert!(reader.read_next_complex_block()?.is_some());
        assert!(reader.read_next_complex_block()?.is_none());
        Ok(())
    }

    #[test]
    fn test_complex_block_channel_major() -> Result<()> {
        let mut bytes = header_bytes(&[
            ("OBSNCHAN", "3"),
            ("NPOL", "2"),
            ("NBITS", "8"),
            ("BLOCSIZE", "24"),
            ("CHANMAJ", "1"),
        ]);
        bytes.extend(0..24u8);
        let file = write_file(&bytes);
        let mut reader = GuppiRaw::open(file.path())?;
        let block = reader.read_next_complex_block()?.expect("a block");
        assert_eq!(block.shape(), [2, 3, 2]);
        Ok(())
    }

    #[test]
    fn test_stats() -> Result<()> {
        let mut bytes = block_header(1, 2, 8, 4);
        bytes.extend([1u8, 3, (-2i8) as u8, 6]);
        let file = write_file(&bytes);
        let mut reader = GuppiRaw::open(file.path())?;
        let stats = reader.next_block_stats()?.expect("stats");
        assert_eq!(stats.mean, 2.0);
        assert_eq!(stats.max, 6.0);
        assert_eq!(stats.min, -2.0);
        assert!((stats.std - 8.5f32.sqrt()).abs() < 1e-6);
        assert_eq!(reader.next_block_stats()?, None);
        Ok(())
    }

    #[test]
    fn test_seek_block() -> Result<()> {
        let (file, _, _) = two_block_file();
        let mut reader = GuppiRaw::open(file.path())?;
        reader.seek_block(1)?;
        match reader.read_next_block(None)? {
            ReadOutcome::Block(b) => assert_eq!(b.x.get(0, 0), ComplexByte::new(-8, -7)),
            ReadOutcome::EndOfFile => panic!("expected the second block"),
        }
        reader.seek_block(2)?;
        assert!(matches!(reader.read_next_block(None)?, ReadOutcome::EndOfFile));
        assert!(matches!(reader.seek_block(3), Err(Error::EndOfFile)));
        Ok(())
    }

    #[test]
    fn test_empty_file() -> Result<()> {
        let file = write_file(&[]);
        let mut reader = GuppiRaw::open(file.path())?;
        assert_eq!(reader.count_blocks()?, 0);
        assert!(matches!(reader.read_next_block(None)?, ReadOutcome::EndOfFile));
        assert!(matches!(reader.read_first_header(), Err(Error::EndOfFile)));
        Ok(())
    }
}
