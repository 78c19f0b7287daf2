// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Microchip 24FC1025 serial EEPROM on I2C.
//!
//! The 128 KiB array is split into two 64 KiB halves selected by the B0 bit of
//! the device address, so the part answers on two I2C addresses. Sectors never
//! straddle the halves.

use super::{Backend, Sector, SECTOR_SIZE};
use crate::bus::{BusError, I2cHost};
use crate::clock::Delay;
use crate::error::{BackendKind, DeviceError};

const CAPACITY_BYTES: u64 = 128 * 1024;
const PAGE_SIZE: usize = 128;
/// Fixed part of the 7-bit address, `1010`.
const DEVICE_CODE: u8 = 0x50;
/// Block select bit within the 7-bit address.
const B0: u8 = 1 << 2;

/// Address-only writes to attempt while the part is busy with a write cycle.
/// The cycle takes at most 5 ms; one poll is a start, a byte and a stop.
const ACK_POLLS: usize = 10_000;

pub struct Eeprom<I> {
    i2c: I,
    /// Chip-address strap (A1:A0).
    strap: u8,
}

impl<I: I2cHost> Eeprom<I> {
    pub fn new(i2c: I, strap: u8) -> Self {
        Self {
            i2c,
            strap: strap & 0b11,
        }
    }

    /// I2C address and in-block word address for a byte offset.
    fn locate(&self, offset: u64) -> (u8, [u8; 2]) {
        let block = if offset >= 0x1_0000 { B0 } else { 0 };
        let word = (offset & 0xFFFF) as u16;
        (DEVICE_CODE | block | self.strap, word.to_be_bytes())
    }

    /// Acknowledge polling: the part ignores its address until the internal
    /// write cycle completes.
    fn wait_write_cycle(&mut self, addr: u8) -> Result<(), DeviceError> {
        for _ in 0..ACK_POLLS {
            match self.i2c.write(addr, &[]) {
                Ok(()) => return Ok(()),
                Err(BusError::Nack) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(DeviceError::Busy)
    }
}

impl<I: I2cHost> Backend for Eeprom<I> {
    fn kind(&self) -> BackendKind {
        BackendKind::Eeprom
    }

    fn bus_frequency(&self) -> Option<u64> {
        None
    }

    fn settle_delay_us(&self) -> Option<u32> {
        None
    }

    fn init(&mut self, _delay: &Delay<'_>) -> Result<(), DeviceError> {
        let (addr, _) = self.locate(0);
        match self.i2c.write(addr, &[]) {
            Ok(()) => Ok(()),
            Err(BusError::Nack) => Err(DeviceError::NoResponse),
            Err(e) => Err(e.into()),
        }
    }

    fn capacity_sectors(&self) -> u64 {
        CAPACITY_BYTES / SECTOR_SIZE as u64
    }

    fn read_sector(&mut self, sector: u64, buf: &mut Sector) -> Result<(), DeviceError> {
        let (addr, word) = self.locate(sector * SECTOR_SIZE as u64);
        self.i2c.write_read(addr, &word, buf)?;
        Ok(())
    }

    fn write_sector(&mut self, sector: u64, buf: &Sector) -> Result<(), DeviceError> {
        let base = sector * SECTOR_SIZE as u64;
        let mut frame = [0u8; 2 + PAGE_SIZE];
        for (i, page) in buf.chunks_exact(PAGE_SIZE).enumerate() {
            let (addr, word) = self.locate(base + (i * PAGE_SIZE) as u64);
            frame[..2].copy_from_slice(&word);
            frame[2..].copy_from_slice(page);
            self.i2c.write(addr, &frame)?;
            self.wait_write_cycle(addr)?;
        }
        Ok(())
    }
}
