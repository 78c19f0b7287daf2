// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! SD card in SPI mode.
//!
//! SD cards start in native mode and only enter SPI mode when they see CMD0
//! with their chip select asserted. Before that they need at least 74 clocks
//! with chip select *deasserted*. The SPI host can only clock SCK while some
//! chip select is asserted, so we assert a dummy line that nothing listens on
//! (by convention the last physical one) and clock out ones.
//!
//! CRC checking is switched on right after CMD0, so every command carries a
//! CRC7 and every data block a CRC16.

use crc_catalog::{CRC_16_XMODEM, CRC_7_MMC};

use super::{Backend, Sector, SECTOR_SIZE};
use crate::bus::{Cs, SpiHost};
use crate::clock::Delay;
use crate::error::{BackendKind, DeviceError};

/// Operating SCK. SPI mode tops out at 25 MHz without a high-speed switch.
pub const SPI_FREQ: u64 = 24 * 1000 * 1000;
/// Identification-phase SCK; cards are only required to answer up to 400 kHz
/// before initialization completes.
pub const INIT_FREQ: u64 = 400 * 1000;
/// Power-up settle time.
pub const SETTLE_US: u32 = 1000;
/// Chip select the card sits on.
pub const CSID: u8 = 0;

/// ACMD41 must report ready within one second.
const INIT_TIMEOUT_US: u32 = 1_000_000;
/// Upper bound on ACMD41 rounds should the deadline never pass.
const INIT_MAX_ROUNDS: u32 = 100_000;
/// NCR is at most 8 bytes; leave some slack.
const RESPONSE_POLLS: usize = 16;
/// Byte polls for a data token or for the end of busy. At 24 MHz one byte is
/// a third of a microsecond, so this is comfortably past the 250 ms write
/// timeout.
const DATA_POLLS: usize = 1_000_000;

mod cmd {
    pub const GO_IDLE_STATE: u8 = 0;
    pub const SEND_IF_COND: u8 = 8;
    pub const SEND_CSD: u8 = 9;
    pub const SEND_STATUS: u8 = 13;
    pub const SET_BLOCKLEN: u8 = 16;
    pub const READ_SINGLE_BLOCK: u8 = 17;
    pub const WRITE_BLOCK: u8 = 24;
    pub const APP_CMD: u8 = 55;
    pub const READ_OCR: u8 = 58;
    pub const CRC_ON_OFF: u8 = 59;
    pub const SD_SEND_OP_COND: u8 = 41;
}

const R1_IDLE: u8 = 0x01;
const R1_ILLEGAL_COMMAND: u8 = 0x04;
const TOKEN_START_BLOCK: u8 = 0xFE;
/// Voltage-accepted nibble and check pattern sent with CMD8.
const IF_COND_PATTERN: u32 = 0x1AA;
/// Host capacity support bit in the ACMD41 argument.
const ACMD41_HCS: u32 = 1 << 30;
/// Card capacity status bit, in the first OCR byte.
const OCR_CCS: u8 = 0x40;

pub struct SdCard<S> {
    spi: S,
    csid: u8,
    csid_dummy: u8,
    spi_freq: u64,
    /// SDHC/SDXC cards address blocks; standard capacity cards address bytes.
    block_addressing: bool,
    capacity: u64,
}

impl<S: SpiHost> SdCard<S> {
    pub fn new(spi: S, csid: u8, csid_dummy: u8) -> Self {
        Self {
            spi,
            csid,
            csid_dummy,
            spi_freq: SPI_FREQ,
            block_addressing: false,
            capacity: 0,
        }
    }

    /// Sends a command frame and waits for R1, leaving chip select asserted.
    fn start(&mut self, index: u8, arg: u32) -> Result<u8, DeviceError> {
        let mut frame = [0u8; 6];
        frame[0] = 0x40 | index;
        frame[1..5].copy_from_slice(&arg.to_be_bytes());
        frame[5] = ((tinycrc::checksum(&CRC_7_MMC, &frame[..5]) as u8) << 1) | 1;
        self.spi.write(&frame, Cs::Hold)?;

        let mut r1 = [0xFF];
        for _ in 0..RESPONSE_POLLS {
            self.spi.read(&mut r1, Cs::Hold)?;
            if r1[0] & 0x80 == 0 {
                return Ok(r1[0]);
            }
        }
        self.end()?;
        Err(DeviceError::NoResponse)
    }

    /// Ends a transaction, giving the card eight clocks to finish up.
    fn end(&mut self) -> Result<(), DeviceError> {
        self.spi.read(&mut [0xFF], Cs::Release)?;
        Ok(())
    }

    /// A complete command: R1 plus `extra` trailing response bytes.
    fn command(&mut self, index: u8, arg: u32, extra: &mut [u8]) -> Result<u8, DeviceError> {
        let r1 = self.start(index, arg)?;
        if !extra.is_empty() {
            self.spi.read(extra, Cs::Hold)?;
        }
        self.end()?;
        Ok(r1)
    }

    fn app_command(&mut self, index: u8, arg: u32) -> Result<u8, DeviceError> {
        let r1 = self.command(cmd::APP_CMD, 0, &mut [])?;
        if r1 & !R1_IDLE != 0 {
            return Err(DeviceError::Unexpected(r1));
        }
        self.command(index, arg, &mut [])
    }

    /// Polls for the start of a data block. Chip select must be held.
    fn wait_token(&mut self) -> Result<(), DeviceError> {
        let mut b = [0xFF];
        for _ in 0..DATA_POLLS {
            self.spi.read(&mut b, Cs::Hold)?;
            match b[0] {
                0xFF => continue,
                TOKEN_START_BLOCK => return Ok(()),
                // Anything else is an error token.
                other => return Err(DeviceError::Rejected(other)),
            }
        }
        Err(DeviceError::NoResponse)
    }

    /// Reads a data block of `buf.len()` bytes and checks its CRC. Chip select
    /// is released afterwards regardless of outcome.
    fn read_block(&mut self, buf: &mut [u8]) -> Result<(), DeviceError> {
        let result = self.wait_token().and_then(|()| {
            self.spi.read(buf, Cs::Hold)?;
            let mut crc = [0u8; 2];
            self.spi.read(&mut crc, Cs::Hold)?;
            if u16::from_be_bytes(crc) as u32 != tinycrc::checksum(&CRC_16_XMODEM, buf) {
                return Err(DeviceError::Crc);
            }
            Ok(())
        });
        self.end()?;
        result
    }

    fn address(&self, sector: u64) -> Result<u32, DeviceError> {
        let addr = if self.block_addressing {
            sector
        } else {
            sector * SECTOR_SIZE as u64
        };
        u32::try_from(addr).map_err(|_| DeviceError::Rejected(0))
    }

    fn wait_not_busy(&mut self) -> Result<(), DeviceError> {
        let mut b = [0u8];
        for _ in 0..DATA_POLLS {
            self.spi.read(&mut b, Cs::Hold)?;
            if b[0] == 0xFF {
                return Ok(());
            }
        }
        Err(DeviceError::Busy)
    }
}

/// Decodes the card size, in sectors, from a CSD register.
fn csd_capacity(csd: &[u8; 16]) -> Result<u64, DeviceError> {
    match csd[0] >> 6 {
        // CSD 1.0: standard capacity.
        0 => {
            let read_bl_len = u32::from(csd[5] & 0x0F);
            let c_size = (u64::from(csd[6] & 0x03) << 10)
                | (u64::from(csd[7]) << 2)
                | (u64::from(csd[8]) >> 6);
            let c_size_mult = (u32::from(csd[9] & 0x03) << 1) | (u32::from(csd[10]) >> 7);
            let bytes = (c_size + 1) << (c_size_mult + 2 + read_bl_len);
            Ok(bytes / SECTOR_SIZE as u64)
        }
        // CSD 2.0: high and extended capacity, in 512 KiB units.
        1 => {
            let c_size = (u64::from(csd[7] & 0x3F) << 16)
                | (u64::from(csd[8]) << 8)
                | u64::from(csd[9]);
            Ok((c_size + 1) * 1024)
        }
        _ => Err(DeviceError::Unexpected(csd[0])),
    }
}

impl<S: SpiHost> Backend for SdCard<S> {
    fn kind(&self) -> BackendKind {
        BackendKind::SdCard
    }

    fn bus_frequency(&self) -> Option<u64> {
        Some(self.spi_freq)
    }

    fn settle_delay_us(&self) -> Option<u32> {
        Some(SETTLE_US)
    }

    fn init(&mut self, delay: &Delay<'_>) -> Result<(), DeviceError> {
        // Power-up clocks with the card deselected.
        self.spi.configure(self.csid_dummy, INIT_FREQ)?;
        self.spi.write(&[0xFF; 10], Cs::Release)?;

        self.spi.configure(self.csid, INIT_FREQ)?;
        let r1 = self.command(cmd::GO_IDLE_STATE, 0, &mut [])?;
        if r1 != R1_IDLE {
            return Err(DeviceError::Unexpected(r1));
        }
        let r1 = self.command(cmd::CRC_ON_OFF, 1, &mut [])?;
        if r1 != R1_IDLE {
            return Err(DeviceError::Unexpected(r1));
        }

        let mut r7 = [0u8; 4];
        let r1 = self.command(cmd::SEND_IF_COND, IF_COND_PATTERN, &mut r7)?;
        // Version 1 cards don't know CMD8 and can't be high capacity.
        let v2 = r1 & R1_ILLEGAL_COMMAND == 0;
        if v2 {
            if r1 != R1_IDLE {
                return Err(DeviceError::Unexpected(r1));
            }
            if u32::from(r7[2] & 0x0F) << 8 | u32::from(r7[3]) != IF_COND_PATTERN {
                return Err(DeviceError::Unexpected(r7[3]));
            }
        }

        let arg = if v2 { ACMD41_HCS } else { 0 };
        let deadline = delay.deadline_us(INIT_TIMEOUT_US);
        let mut rounds = 0;
        loop {
            match self.app_command(cmd::SD_SEND_OP_COND, arg)? {
                0 => break,
                R1_IDLE => {}
                other => return Err(DeviceError::Unexpected(other)),
            }
            rounds += 1;
            if rounds >= INIT_MAX_ROUNDS || delay.expired(&deadline) {
                return Err(DeviceError::Timeout);
            }
        }

        if v2 {
            let mut ocr = [0u8; 4];
            let r1 = self.command(cmd::READ_OCR, 0, &mut ocr)?;
            if r1 != 0 {
                return Err(DeviceError::Unexpected(r1));
            }
            self.block_addressing = ocr[0] & OCR_CCS != 0;
        }
        if !self.block_addressing {
            let r1 = self.command(cmd::SET_BLOCKLEN, SECTOR_SIZE as u32, &mut [])?;
            if r1 != 0 {
                return Err(DeviceError::Unexpected(r1));
            }
        }

        let r1 = self.start(cmd::SEND_CSD, 0)?;
        if r1 != 0 {
            self.end()?;
            return Err(DeviceError::Unexpected(r1));
        }
        let mut csd = [0u8; 16];
        self.read_block(&mut csd)?;
        self.capacity = csd_capacity(&csd)?;

        log::debug!(
            "sd: {} sectors, {} addressing",
            self.capacity,
            if self.block_addressing { "block" } else { "byte" }
        );

        self.spi.configure(self.csid, self.spi_freq)?;
        Ok(())
    }

    fn capacity_sectors(&self) -> u64 {
        self.capacity
    }

    fn read_sector(&mut self, sector: u64, buf: &mut Sector) -> Result<(), DeviceError> {
        let addr = self.address(sector)?;
        let r1 = self.start(cmd::READ_SINGLE_BLOCK, addr)?;
        if r1 != 0 {
            self.end()?;
            return Err(DeviceError::Unexpected(r1));
        }
        self.read_block(buf)
    }

    fn write_sector(&mut self, sector: u64, buf: &Sector) -> Result<(), DeviceError> {
        let addr = self.address(sector)?;
        let r1 = self.start(cmd::WRITE_BLOCK, addr)?;
        if r1 != 0 {
            self.end()?;
            return Err(DeviceError::Unexpected(r1));
        }

        let crc = tinycrc::checksum(&CRC_16_XMODEM, buf) as u16;
        // One byte of NWR gap, then the start token.
        self.spi.write(&[0xFF, TOKEN_START_BLOCK], Cs::Hold)?;
        self.spi.write(buf, Cs::Hold)?;
        self.spi.write(&crc.to_be_bytes(), Cs::Hold)?;

        let mut response = [0xFF];
        self.spi.read(&mut response, Cs::Hold)?;
        let accepted = match response[0] & 0x1F {
            0x05 => self.wait_not_busy(),
            0x0B => Err(DeviceError::Crc),
            other => Err(DeviceError::Rejected(other)),
        };
        self.end()?;
        accepted?;

        // The data response only covers the transfer; programming errors show
        // up in the status register.
        let mut status = [0u8];
        let r1 = self.command(cmd::SEND_STATUS, 0, &mut status)?;
        if r1 != 0 || status[0] != 0 {
            return Err(DeviceError::Rejected(status[0] | r1));
        }
        Ok(())
    }
}
