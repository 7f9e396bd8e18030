//! Block geometry derived from a header

use crate::{
    error::{Error, Result},
    header::Header,
};

/// Components per sample for dual-polarization data: re/im for X then Y
pub const DUAL_POL_COMPONENTS: usize = 4;

/// Number of interleaved 8-bit components per time sample for a raw `NPOL`.
///
/// GUPPI raw files write `NPOL = 2` for dual-polarization complex voltages,
/// which is four components per sample (X re, X im, Y re, Y im). This is a
/// fixed convention of the raw format. Other values are taken as the
/// component count itself.
pub const fn pol_components(npol: usize) -> usize {
    match npol {
        2 => DUAL_POL_COMPONENTS,
        n => n,
    }
}

/// Shape of the sample array in one block
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Geometry {
    pub n_chan: usize,
    pub n_samples: usize,
    /// Components per sample, after [`pol_components`]
    pub n_pol: usize,
    pub n_bits: u32,
    /// Samples are stored (time, channel, component) instead of
    /// (channel, time, component)
    pub channel_major: bool,
}

impl Geometry {
    pub fn from_header(header: &Header) -> Result<Self> {
        let n_bits = header.usize("NBITS")?;
        let n_bits = u32::try_from(n_bits).map_err(|_| Error::InvalidValue {
            key: "NBITS".to_owned(),
            value: n_bits.to_string(),
        })?;
        Self::solve(
            header.usize("BLOCSIZE")?,
            header.usize("OBSNCHAN")?,
            pol_components(header.usize("NPOL")?),
            n_bits,
            header.flag("CHANMAJ"),
        )
    }

    /// Solve `block_bytes = n_chan * n_samples * n_pol * n_bits / 8` for the
    /// number of samples. The division has to be exact.
    pub fn solve(
        block_bytes: usize,
        n_chan: usize,
        n_pol: usize,
        n_bits: u32,
        channel_major: bool,
    ) -> Result<Self> {
        if !matches!(n_bits, 2 | 4 | 8) {
            return Err(Error::UnsupportedBits(n_bits));
        }
        let sample_bits = n_chan
            .checked_mul(n_pol)
            .and_then(|v| v.checked_mul(n_bits as usize));
        let (block_bits, sample_bits) = match (block_bytes.checked_mul(8), sample_bits) {
            (Some(b), Some(s)) if s != 0 && b % s == 0 => (b, s),
            _ => {
                return Err(Error::MalformedBlock(format!(
                    "{block_bytes} bytes is not a whole number of samples of \
                     {n_chan} channels x {n_pol} components x {n_bits} bits"
                )))
            }
        };
        Ok(Self {
            n_chan,
            n_samples: block_bits / sample_bits,
            n_pol,
            n_bits,
            channel_major,
        })
    }

    /// Array shape, in storage order
    pub fn shape(&self) -> [usize; 3] {
        if self.channel_major {
            [self.n_samples, self.n_chan, self.n_pol]
        } else {
            [self.n_chan, self.n_samples, self.n_pol]
        }
    }

    /// Number of components once unpacked to one byte each
    pub fn n_values(&self) -> usize {
        self.n_chan * self.n_samples * self.n_pol
    }

    /// Packed size of the block
    pub fn block_bytes(&self) -> usize {
        self.n_values() * self.n_bits as usize / 8
    }

    /// Index of the first component of `(chan, sample)` in the unpacked block
    pub fn offset(&self, chan: usize, sample: usize) -> usize {
        let flat = if self.channel_major {
            sample * self.n_chan + chan
        } else {
            chan * self.n_samples + sample
        };
        flat * self.n_pol
    }
}
