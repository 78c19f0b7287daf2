// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Infineon (Cypress) S25FS512S NOR flash on SPI.
//!
//! We use the 4-byte-address command set throughout so that the part's
//! address-length configuration doesn't matter, and assume the uniform 256 KiB
//! sector layout (no 4 KiB parameter sectors).

use hex_literal::hex;

use super::{Backend, Sector, SECTOR_SIZE};
use crate::bus::{Cs, SpiHost};
use crate::clock::{ClockContext, Delay};
use crate::error::{BackendKind, DeviceError};

/// Ceiling on SCK regardless of core clock.
pub const MAX_SPI_FREQ: u64 = 40 * 1000 * 1000;
/// Power-up time, t_PU.
pub const SETTLE_US: u32 = 300;
/// Chip select the flash sits on.
pub const CSID: u8 = 1;

/// Manufacturer, memory interface type and density bytes from RDID.
const JEDEC_ID: [u8; 3] = hex!("01 02 20");
const CAPACITY_BYTES: u64 = 64 * 1024 * 1024;
const PAGE_SIZE: usize = 256;
const ERASE_BLOCK_BYTES: u64 = 256 * 1024;
const ERASE_BLOCK_SECTORS: u64 = ERASE_BLOCK_BYTES / SECTOR_SIZE as u64;
/// Reset recovery, t_RPH.
const RESET_RECOVERY_US: u32 = 35;

/// Status polls before a page program is declared stuck. Page programming
/// takes well under a millisecond.
const PROGRAM_POLLS: usize = 100_000;
/// Sector erase can take a couple of seconds.
const ERASE_POLLS: usize = 50_000_000;

mod op {
    pub const WREN: u8 = 0x06;
    pub const RDSR1: u8 = 0x05;
    pub const RDID: u8 = 0x9F;
    pub const READ4: u8 = 0x13;
    pub const PP4: u8 = 0x12;
    pub const SE4: u8 = 0xDC;
    pub const RSTEN: u8 = 0x66;
    pub const RST: u8 = 0x99;
}

const SR1_WIP: u8 = 1 << 0;
const SR1_E_ERR: u8 = 1 << 5;
const SR1_P_ERR: u8 = 1 << 6;

/// SCK for the flash: a quarter of the core clock, capped at 40 MHz.
pub fn bus_frequency(core_hz: u64) -> u64 {
    MAX_SPI_FREQ.min(core_hz / 4)
}

pub struct NorFlash<S> {
    spi: S,
    csid: u8,
    spi_freq: u64,
}

impl<S: SpiHost> NorFlash<S> {
    pub fn new(spi: S, csid: u8, clock: &ClockContext) -> Self {
        Self {
            spi,
            csid,
            spi_freq: bus_frequency(clock.core_hz),
        }
    }

    fn command(&mut self, opcode: u8) -> Result<(), DeviceError> {
        self.spi.write(&[opcode], Cs::Release)?;
        Ok(())
    }

    fn addressed(&mut self, opcode: u8, addr: u32, cs: Cs) -> Result<(), DeviceError> {
        let a = addr.to_be_bytes();
        self.spi.write(&[opcode, a[0], a[1], a[2], a[3]], cs)?;
        Ok(())
    }

    fn status(&mut self) -> Result<u8, DeviceError> {
        let mut sr = [0u8];
        self.spi.write(&[op::RDSR1], Cs::Hold)?;
        self.spi.read(&mut sr, Cs::Release)?;
        Ok(sr[0])
    }

    /// Waits out an embedded program/erase operation and checks that it
    /// succeeded.
    fn wait_ready(&mut self, polls: usize) -> Result<(), DeviceError> {
        for _ in 0..polls {
            let sr = self.status()?;
            if sr & SR1_WIP == 0 {
                if sr & (SR1_E_ERR | SR1_P_ERR) != 0 {
                    return Err(DeviceError::Rejected(sr));
                }
                return Ok(());
            }
        }
        Err(DeviceError::Busy)
    }

    fn erase_block(&mut self, block: u64) -> Result<(), DeviceError> {
        self.command(op::WREN)?;
        self.addressed(op::SE4, (block * ERASE_BLOCK_BYTES) as u32, Cs::Release)?;
        self.wait_ready(ERASE_POLLS)
    }
}

fn byte_address(sector: u64) -> u32 {
    (sector * SECTOR_SIZE as u64) as u32
}

impl<S: SpiHost> Backend for NorFlash<S> {
    fn kind(&self) -> BackendKind {
        BackendKind::NorFlash
    }

    fn bus_frequency(&self) -> Option<u64> {
        Some(self.spi_freq)
    }

    fn settle_delay_us(&self) -> Option<u32> {
        Some(SETTLE_US)
    }

    fn init(&mut self, delay: &Delay<'_>) -> Result<(), DeviceError> {
        self.spi.configure(self.csid, self.spi_freq)?;

        // Get out of whatever state a previous boot stage left the part in.
        self.command(op::RSTEN)?;
        self.command(op::RST)?;
        delay.spin_us(RESET_RECOVERY_US).map_err(|_| DeviceError::Timeout)?;

        let mut id = [0u8; 3];
        self.spi.write(&[op::RDID], Cs::Hold)?;
        self.spi.read(&mut id, Cs::Release)?;
        if id == [0xFF; 3] || id == [0x00; 3] {
            return Err(DeviceError::NoResponse);
        }
        if id != JEDEC_ID {
            log::warn!("nor: unexpected JEDEC id {:02x?}", id);
            return Err(DeviceError::WrongDevice);
        }
        Ok(())
    }

    fn capacity_sectors(&self) -> u64 {
        CAPACITY_BYTES / SECTOR_SIZE as u64
    }

    fn prepare_write(&mut self, first: u64, count: u64) -> Result<(), (u64, DeviceError)> {
        if count == 0 {
            return Ok(());
        }
        let end = first + count;
        if first % ERASE_BLOCK_SECTORS != 0 || end % ERASE_BLOCK_SECTORS != 0 {
            log::warn!(
                "nor: sectors {}..{} share erase blocks with other data, which will be lost",
                first,
                end
            );
        }
        for block in first / ERASE_BLOCK_SECTORS..end.div_ceil(ERASE_BLOCK_SECTORS) {
            self.erase_block(block)
                .map_err(|e| (block * ERASE_BLOCK_SECTORS, e))?;
        }
        Ok(())
    }

    fn read_sector(&mut self, sector: u64, buf: &mut Sector) -> Result<(), DeviceError> {
        self.addressed(op::READ4, byte_address(sector), Cs::Hold)?;
        self.spi.read(buf, Cs::Release)?;
        Ok(())
    }

    fn write_sector(&mut self, sector: u64, buf: &Sector) -> Result<(), DeviceError> {
        let base = byte_address(sector);
        for (i, page) in buf.chunks_exact(PAGE_SIZE).enumerate() {
            self.command(op::WREN)?;
            self.addressed(op::PP4, base + (i * PAGE_SIZE) as u32, Cs::Hold)?;
            self.spi.write(page, Cs::Release)?;
            self.wait_ready(PROGRAM_POLLS)?;
        }
        Ok(())
    }
}
