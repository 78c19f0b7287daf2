// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bus transaction boundaries.
//!
//! Backends speak their device protocols in terms of these traits and never
//! touch host controller registers. The SoC implementations live in
//! `soc::spi` and `soc::i2c`; tests substitute device models.

use core::fmt;

/// What to do with chip select once a segment finishes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Cs {
    /// Keep it asserted; the next segment continues the same transaction.
    Hold,
    /// Deassert it, ending the transaction.
    Release,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BusError {
    /// An I2C target did not acknowledge.
    Nack,
    /// The host controller did not finish within its poll ceiling.
    Timeout,
    /// A FIFO over- or underflowed.
    Overflow,
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BusError::Nack => "not acknowledged",
            BusError::Timeout => "host timeout",
            BusError::Overflow => "fifo overflow",
        })
    }
}

/// A half-duplex SPI host with several chip-select lines.
pub trait SpiHost {
    /// Selects the chip-select line and SCK frequency used by the following
    /// segments. The host rounds `freq_hz` down to what it can generate.
    fn configure(&mut self, csid: u8, freq_hz: u64) -> Result<(), BusError>;

    /// Shifts `data` out, discarding whatever comes back.
    fn write(&mut self, data: &[u8], cs: Cs) -> Result<(), BusError>;

    /// Shifts `buf.len()` bytes in while holding MOSI high.
    fn read(&mut self, buf: &mut [u8], cs: Cs) -> Result<(), BusError>;
}

/// An I2C host, addressed with 7-bit target addresses.
pub trait I2cHost {
    /// Writes `data` in one transaction. An empty `data` is an address probe.
    fn write(&mut self, addr: u8, data: &[u8]) -> Result<(), BusError>;

    /// Writes `data`, then issues a repeated start and reads `buf.len()` bytes.
    fn write_read(&mut self, addr: u8, data: &[u8], buf: &mut [u8]) -> Result<(), BusError>;
}
