//! Stokes I detection and export to sigproc filterbank files

use std::io::Write;

use sigproc_filterbank::write::{PackSpectra, WriteFilterbank};
use tracing::{info, warn};

use crate::{
    complex::ComplexByte,
    decode::PolBlock,
    error::{Error, Result},
    header::Header,
    reader::{GuppiRaw, ReadOutcome},
};

pub fn stokes_i(pol_x: ComplexByte, pol_y: ComplexByte) -> f32 {
    pol_x.norm_sqr() + pol_y.norm_sqr()
}

/// Detect a block into `out` as time-major spectra: `n_samples` rows of
/// `n_chan` powers each
pub fn detect(x: &PolBlock, y: &PolBlock, out: &mut Vec<f32>) {
    assert_eq!(x.shape(), y.shape());
    let (n_chan, n_samples) = x.shape();
    out.clear();
    out.resize(n_chan * n_samples, 0.0);
    for chan in 0..n_chan {
        for (t, (&px, &py)) in x.channel(chan).iter().zip(y.channel(chan)).enumerate() {
            out[t * n_chan + chan] = stokes_i(px, py);
        }
    }
}

/// Filterbank header fields that can be taken from a raw header
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FilterbankMeta {
    pub n_chan: usize,
    /// Center of the first channel (MHz)
    pub fch1: Option<f64>,
    /// Channel width (MHz)
    pub foff: Option<f64>,
    /// Sample time (s)
    pub tsamp: Option<f64>,
    /// Start time (MJD)
    pub tstart: Option<f64>,
}

impl FilterbankMeta {
    pub fn from_header(header: &Header) -> Result<Self> {
        let n_chan = header.usize("OBSNCHAN")?;
        let bw = header.float("OBSBW").ok();
        let foff = bw.map(|bw| bw / n_chan as f64);
        let fch1 = match (header.float("OBSFREQ").ok(), bw, foff) {
            (Some(center), Some(bw), Some(foff)) => Some(center - bw / 2.0 + foff / 2.0),
            _ => None,
        };
        let tstart = match header.start_epoch() {
            Ok(epoch) => Some(epoch.to_mjd_utc_days()),
            Err(e) => {
                warn!("No start time for the filterbank header: {e}");
                None
            }
        };
        Ok(Self {
            n_chan,
            fch1,
            foff,
            tsamp: header.float("TBIN").ok(),
            tstart,
        })
    }

    fn writer(&self) -> WriteFilterbank<f32> {
        let mut fb = WriteFilterbank::new(self.n_chan, 1);
        fb.fch1 = self.fch1;
        fb.foff = self.foff;
        fb.tsamp = self.tsamp;
        fb.tstart = self.tstart;
        fb
    }
}

/// Detect every remaining block of `reader` and write it to `out` as a
/// filterbank, header first. Returns the number of spectra written.
pub fn write_filterbank<W: Write>(reader: &mut GuppiRaw, mut out: W) -> Result<usize> {
    let meta = FilterbankMeta::from_header(&reader.read_header()?.0)?;
    let mut fb = meta.writer();
    out.write_all(&fb.header_bytes())?;
    let mut powers = vec![];
    let mut spectra = 0;
    while let ReadOutcome::Block(block) = reader.read_next_block(None)? {
        if block.x.n_chan() != meta.n_chan {
            return Err(Error::MalformedBlock(format!(
                "block has {} channels, filterbank has {}",
                block.x.n_chan(),
                meta.n_chan
            )));
        }
        detect(block.x, block.y, &mut powers);
        for row in powers.chunks_exact(meta.n_chan) {
            out.write_all(&fb.pack(row))?;
            spectra += 1;
        }
    }
    out.flush()?;
    info!("Wrote {spectra} spectra of {} channels", meta.n_chan);
    Ok(spectra)
}
