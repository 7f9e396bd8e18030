//! Demultiplexing of unpacked block samples into polarizations.
//!
//! [`decode_block`] allocates fresh outputs. [`decode_into`] writes into
//! existing buffers and only reallocates when the block shape changes. Both
//! produce the same values.

use tracing::trace;

use crate::{
    complex::{ComplexByte, ComplexFloat},
    error::{Error, Result},
    geometry::{Geometry, DUAL_POL_COMPONENTS},
};

/// One polarization of a block, indexed by (channel, sample)
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PolBlock {
    n_chan: usize,
    n_samples: usize,
    data: Vec<ComplexByte>,
}

impl PolBlock {
    pub fn new(n_chan: usize, n_samples: usize) -> Self {
        Self {
            n_chan,
            n_samples,
            data: vec![ComplexByte::default(); n_chan * n_samples],
        }
    }

    pub fn n_chan(&self) -> usize {
        self.n_chan
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.n_chan, self.n_samples)
    }

    /// Time series of one channel
    pub fn channel(&self, chan: usize) -> &[ComplexByte] {
        &self.data[chan * self.n_samples..(chan + 1) * self.n_samples]
    }

    pub fn get(&self, chan: usize, sample: usize) -> ComplexByte {
        self.channel(chan)[sample]
    }

    /// All samples, channel by channel
    pub fn as_slice(&self) -> &[ComplexByte] {
        &self.data
    }

    /// Make room for a block of the given shape. Existing storage is kept
    /// when the shape is unchanged.
    fn reshape(&mut self, n_chan: usize, n_samples: usize) {
        if self.shape() != (n_chan, n_samples) {
            trace!("Reallocating polarization buffer for {n_chan}x{n_samples}");
            *self = Self::new(n_chan, n_samples);
        }
    }
}

fn check_len(samples: &[i8], geometry: &Geometry) -> Result<()> {
    if samples.len() != geometry.n_values() {
        return Err(Error::MalformedBlock(format!(
            "decoded {} components, geometry {:?} needs {}",
            samples.len(),
            geometry.shape(),
            geometry.n_values()
        )));
    }
    Ok(())
}

/// Split dual-polarization samples into X (components 0 and 1) and Y
/// (components 2 and 3), reusing `x` and `y` when their shape matches.
pub fn decode_into(
    samples: &[i8],
    geometry: &Geometry,
    x: &mut PolBlock,
    y: &mut PolBlock,
) -> Result<()> {
    if geometry.n_pol != DUAL_POL_COMPONENTS {
        return Err(Error::UnsupportedPolarization(geometry.n_pol));
    }
    check_len(samples, geometry)?;
    x.reshape(geometry.n_chan, geometry.n_samples);
    y.reshape(geometry.n_chan, geometry.n_samples);
    for chan in 0..geometry.n_chan {
        let row = chan * geometry.n_samples;
        for t in 0..geometry.n_samples {
            let s = &samples[geometry.offset(chan, t)..][..DUAL_POL_COMPONENTS];
            x.data[row + t] = ComplexByte::new(s[0], s[1]);
            y.data[row + t] = ComplexByte::new(s[2], s[3]);
        }
    }
    Ok(())
}

/// [`decode_into`] with freshly allocated outputs
pub fn decode_block(samples: &[i8], geometry: &Geometry) -> Result<(PolBlock, PolBlock)> {
    let mut x = PolBlock::default();
    let mut y = PolBlock::default();
    decode_into(samples, geometry, &mut x, &mut y)?;
    Ok((x, y))
}

/// Pair up consecutive components as complex values, keeping storage order.
///
/// The output has shape `geometry.shape()` with the last axis halved.
pub fn decode_complex_into(
    samples: &[i8],
    geometry: &Geometry,
    out: &mut Vec<ComplexFloat>,
) -> Result<()> {
    if geometry.n_pol % 2 != 0 {
        return Err(Error::UnsupportedPolarization(geometry.n_pol));
    }
    check_len(samples, geometry)?;
    out.clear();
    out.extend(
        samples
            .chunks_exact(2)
            .map(|c| ComplexByte::new(c[0], c[1]).to_f32()),
    );
    Ok(())
}
