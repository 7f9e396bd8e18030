//! Expansion of 2-bit and 4-bit packed samples to one byte per component.
//!
//! Both widths are packed most significant bits first, so the first
//! component of a byte lives in its top bits.
//!
//! 2-bit codes map to fixed levels:
//!
//! | code | level |
//! |------|-------|
//! | 0b00 |    40 |
//! | 0b01 |    12 |
//! | 0b10 |   -12 |
//! | 0b11 |   -40 |
//!
//! 4-bit codes are two's complement nibbles, sign extended to `-8..=7`.

use crate::error::{Error, Result};

/// Output level for each 2-bit code
pub const TWO_BIT_LEVELS: [i8; 4] = [40, 12, -12, -40];

/// Number of components packed into `len` bytes
pub fn unpacked_len(len: usize, n_bits: u32) -> usize {
    len * 8 / n_bits as usize
}

/// Unpack `packed` into `out`, resizing it to fit
pub fn unpack(packed: &[u8], n_bits: u32, out: &mut Vec<i8>) -> Result<()> {
    match n_bits {
        2 => {
            out.resize(unpacked_len(packed.len(), 2), 0);
            unpack_2bit(packed, out);
        }
        4 => {
            out.resize(unpacked_len(packed.len(), 4), 0);
            unpack_4bit(packed, out);
        }
        8 => {
            out.clear();
            out.extend(packed.iter().map(|&b| b as i8));
        }
        n => return Err(Error::UnsupportedBits(n)),
    }
    Ok(())
}

pub fn unpack_2bit(packed: &[u8], out: &mut [i8]) {
    assert_eq!(out.len(), packed.len() * 4);
    for (byte, quad) in packed.iter().zip(out.chunks_exact_mut(4)) {
        for (i, v) in quad.iter_mut().enumerate() {
            *v = TWO_BIT_LEVELS[((byte >> (6 - 2 * i)) & 0b11) as usize];
        }
    }
}

pub fn unpack_4bit(packed: &[u8], out: &mut [i8]) {
    assert_eq!(out.len(), packed.len() * 2);
    for (&byte, pair) in packed.iter().zip(out.chunks_exact_mut(2)) {
        // Arithmetic shifts do the sign extension
        pair[0] = (byte as i8) >> 4;
        pair[1] = ((byte << 4) as i8) >> 4;
    }
}
