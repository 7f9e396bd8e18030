//! Streaming source that turns a raw file into per-channel complex streams.
//!
//! Each call to [`GuppiSource::work`] fills one output per channel and
//! polarization, ordered `[x0, y0, x1, y1, ...]`. Samples left over from a
//! block are kept and come out first on the next call.

use std::path::Path;

use tracing::{debug, info};

use crate::{
    complex::ComplexFloat,
    error::{Error, Result},
    reader::{ChannelSelection, GuppiRaw, ReadOutcome, ReaderOptions},
};

/// What a call to [`GuppiSource::work`] did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Work {
    /// Every output got this many samples
    Produced(usize),
    /// The file ran out before a full window could be filled
    Done,
}

#[derive(Debug)]
pub struct GuppiSource {
    reader: GuppiRaw,
    selection: Option<ChannelSelection>,
    repeat: bool,
    n_chan: usize,
    n_blocks: usize,
    block_idx: usize,
    // Pending samples per channel, consumed from `pos`
    x: Vec<Vec<ComplexFloat>>,
    y: Vec<Vec<ComplexFloat>>,
    pos: usize,
}

impl GuppiSource {
    pub fn new(
        path: impl AsRef<Path>,
        selection: Option<ChannelSelection>,
        repeat: bool,
    ) -> Result<Self> {
        Self::from_reader(
            GuppiRaw::open_with(path, ReaderOptions::default())?,
            selection,
            repeat,
        )
    }

    pub fn from_reader(
        mut reader: GuppiRaw,
        selection: Option<ChannelSelection>,
        repeat: bool,
    ) -> Result<Self> {
        let n_chan = match selection {
            Some(s) => s.count,
            None => reader.read_first_header()?.usize("OBSNCHAN")?,
        };
        let n_blocks = reader.count_blocks()?;
        info!("Streaming {n_chan} channels from {n_blocks} blocks");
        Ok(Self {
            reader,
            selection,
            repeat,
            n_chan,
            n_blocks,
            block_idx: 0,
            x: vec![vec![]; n_chan],
            y: vec![vec![]; n_chan],
            pos: 0,
        })
    }

    /// Number of channels, so the number of outputs is twice this
    pub fn n_chan(&self) -> usize {
        self.n_chan
    }

    pub fn n_outputs(&self) -> usize {
        2 * self.n_chan
    }

    fn pending(&self) -> usize {
        self.x.first().map_or(0, |x| x.len() - self.pos)
    }

    /// Append the next block to the pending samples. `false` once the file is
    /// used up and not repeating.
    fn load_block(&mut self) -> Result<bool> {
        if self.block_idx >= self.n_blocks {
            if !self.repeat {
                info!("End of file");
                return Ok(false);
            }
            debug!("Rewinding");
            self.reader.reset();
            self.block_idx = 0;
        }
        let block = match self.reader.read_next_block(self.selection)? {
            ReadOutcome::Block(b) => b,
            ReadOutcome::EndOfFile => {
                // Fewer blocks than counted; the file shrank under us
                self.n_blocks = self.block_idx;
                return Ok(false);
            }
        };
        if block.x.n_chan() != self.n_chan {
            return Err(Error::OutputMismatch {
                expected: 2 * self.n_chan,
                got: 2 * block.x.n_chan(),
            });
        }
        for (chan, (x, y)) in self.x.iter_mut().zip(self.y.iter_mut()).enumerate() {
            x.drain(..self.pos);
            y.drain(..self.pos);
            x.extend(block.x.channel(chan).iter().map(|c| c.to_f32()));
            y.extend(block.y.channel(chan).iter().map(|c| c.to_f32()));
        }
        self.pos = 0;
        self.block_idx += 1;
        debug!("Block {} of {}", self.block_idx, self.n_blocks);
        Ok(true)
    }

    /// Fill every output with the next window of samples.
    ///
    /// All outputs must have the same length, and there must be
    /// [`GuppiSource::n_outputs`] of them.
    pub fn work(&mut self, outputs: &mut [&mut [ComplexFloat]]) -> Result<Work> {
        if outputs.len() != self.n_outputs() {
            return Err(Error::OutputMismatch {
                expected: self.n_outputs(),
                got: outputs.len(),
            });
        }
        let window = outputs.first().map_or(0, |o| o.len());
        if let Some(o) = outputs.iter().find(|o| o.len() != window) {
            return Err(Error::OutputMismatch {
                expected: window,
                got: o.len(),
            });
        }
        // A whole pass over the file without new samples would never end
        let mut stalled = 0;
        while self.pending() < window {
            let before = self.pending();
            if !self.load_block()? {
                return Ok(Work::Done);
            }
            if self.pending() == before {
                stalled += 1;
                if stalled > self.n_blocks {
                    return Ok(Work::Done);
                }
            } else {
                stalled = 0;
            }
        }
        for (chan, pair) in outputs.chunks_exact_mut(2).enumerate() {
            let range = self.pos..self.pos + window;
            pair[0].copy_from_slice(&self.x[chan][range.clone()]);
            pair[1].copy_from_slice(&self.y[chan][range]);
        }
        self.pos += window;
        Ok(Work::Produced(window))
    }
}
