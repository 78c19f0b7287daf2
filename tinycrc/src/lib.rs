//! `tinycrc`: a tiny CRC implementation.
//!
//! This is a bitwise CRC implementation for any algorithm up to 32 bits wide.
//! It uses no lookup tables and a handful of registers, which matters when the
//! whole program has to fit in scratchpad memory. The flasher needs three
//! algorithms (CRC-7 for SD commands, CRC-16 for SD data blocks and CRC-32 for
//! GPT headers) and a table for each would cost more than the code using them.
//!
//! Algorithms are those defined in the `crc_catalog` crate, used by `crc` (a
//! crate that you should use instead if performance is important).

#![no_std]

use crc_catalog::{Algorithm, Width};

/// A CRC operation-in-progress using a particular algorithm.
///
/// The state is kept in a `u32` regardless of the algorithm's width. For
/// non-reflected algorithms the register is left-aligned, so that the top bit
/// of the register is always the top bit of the CRC; for reflected algorithms
/// it is right-aligned. This lets one update loop serve every width.
#[derive(Clone, Debug)]
pub struct Crc {
    /// Algorithm polynomial, pre-shifted (or pre-reflected) for the register.
    poly: u32,
    /// Width of the CRC in bits.
    width: u8,
    /// Should data be bit-reversed on the way in?
    reflect_in: bool,
    /// Should data be bit-reversed on the way out?
    reflect_out: bool,
    /// Value to XOR into the CRC at the end.
    xorout: u32,
    /// Current register value.
    value: u32,
}

impl Crc {
    /// Creates a new `Crc` using `algorithm`'s settings.
    ///
    /// Works for `Algorithm<u8>`, `Algorithm<u16>` and `Algorithm<u32>`.
    pub fn new<W: Width + Copy + Into<u32>>(algorithm: &Algorithm<W>) -> Self {
        let width = algorithm.width;
        debug_assert!(width > 0 && width <= 32);

        let poly = algorithm.poly.into();
        let init = algorithm.init.into();
        let (poly, value) = if algorithm.refin {
            (reflect(poly, width), reflect(init, width))
        } else {
            (poly << (32 - width), init << (32 - width))
        };
        Self {
            poly,
            width,
            reflect_in: algorithm.refin,
            reflect_out: algorithm.refout,
            xorout: algorithm.xorout.into(),
            value,
        }
    }

    /// Updates this CRC with the content of `data`.
    pub fn update(&mut self, data: &[u8]) {
        if self.reflect_in {
            for &byte in data {
                self.value ^= u32::from(byte);
                for _ in 0..8 {
                    self.value = (self.value >> 1) ^ ((self.value & 1) * self.poly);
                }
            }
        } else {
            for &byte in data {
                self.value ^= u32::from(byte) << 24;
                for _ in 0..8 {
                    self.value = (self.value << 1) ^ ((self.value >> 31) * self.poly);
                }
            }
        }
    }

    /// Performs any final computations required and returns the computed CRC,
    /// right-aligned in a `u32`.
    pub fn finish(self) -> u32 {
        let mut value = if self.reflect_in {
            self.value
        } else {
            self.value >> (32 - self.width)
        };
        if self.reflect_in ^ self.reflect_out {
            value = reflect(value, self.width);
        }
        value ^ self.xorout
    }
}

/// Convenience for the common case of checksumming one contiguous buffer.
pub fn checksum<W: Width + Copy + Into<u32>>(algorithm: &Algorithm<W>, data: &[u8]) -> u32 {
    let mut crc = Crc::new(algorithm);
    crc.update(data);
    crc.finish()
}

/// Reverses the low `width` bits of `value`.
fn reflect(value: u32, width: u8) -> u32 {
    value.reverse_bits() >> (32 - width)
}
