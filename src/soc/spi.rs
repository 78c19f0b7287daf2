// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! OpenTitan SPI host, as instantiated in Cheshire with two chip selects.
//!
//! Every `SpiHost` call becomes one or more command segments. Segments are at
//! most 512 bytes (the command length field is 9 bits); all but the last of a
//! call keep chip select asserted, and the last follows the caller's `Cs`.

use static_assertions::const_assert_eq;
use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::registers::{ReadOnly, ReadWrite, WriteOnly};
use tock_registers::{register_bitfields, register_structs, LocalRegisterCopy};

use super::{poll, StaticRef};
use crate::bus::{BusError, Cs, SpiHost};

pub const SPI_HOST_BASE: usize = 0x0300_4000;
pub const NUM_CS: u8 = 2;

register_bitfields![u32,
    CONTROL [
        OUTPUT_EN OFFSET(29) NUMBITS(1) [],
        SW_RST OFFSET(30) NUMBITS(1) [],
        SPIEN OFFSET(31) NUMBITS(1) []
    ],
    STATUS [
        RXEMPTY OFFSET(24) NUMBITS(1) [],
        TXEMPTY OFFSET(28) NUMBITS(1) [],
        TXFULL OFFSET(29) NUMBITS(1) [],
        ACTIVE OFFSET(30) NUMBITS(1) [],
        READY OFFSET(31) NUMBITS(1) []
    ],
    CONFIGOPTS [
        CLKDIV OFFSET(0) NUMBITS(16) [],
        CSNIDLE OFFSET(16) NUMBITS(4) [],
        CSNTRAIL OFFSET(20) NUMBITS(4) [],
        CSNLEAD OFFSET(24) NUMBITS(4) []
    ],
    COMMAND [
        LEN OFFSET(0) NUMBITS(9) [],
        CSAAT OFFSET(9) NUMBITS(1) [],
        SPEED OFFSET(10) NUMBITS(2) [
            Standard = 0
        ],
        DIRECTION OFFSET(12) NUMBITS(2) [
            Rx = 1,
            Tx = 2
        ]
    ],
    ERROR_STATUS [
        OVERFLOW OFFSET(1) NUMBITS(1) [],
        UNDERFLOW OFFSET(2) NUMBITS(1) []
    ]
];

register_structs! {
    pub SpiHostRegisters {
        (0x00 => _reserved0),
        (0x10 => control: ReadWrite<u32, CONTROL::Register>),
        (0x14 => status: ReadOnly<u32, STATUS::Register>),
        (0x18 => configopts: [ReadWrite<u32, CONFIGOPTS::Register>; 2]),
        (0x20 => csid: ReadWrite<u32>),
        (0x24 => command: WriteOnly<u32, COMMAND::Register>),
        (0x28 => rxdata: ReadOnly<u32>),
        (0x2c => txdata: WriteOnly<u32>),
        (0x30 => _reserved1),
        (0x34 => error_status: ReadWrite<u32, ERROR_STATUS::Register>),
        (0x38 => _reserved2),
        (0x3c => @END),
    }
}

type Status = LocalRegisterCopy<u32, STATUS::Register>;

const_assert_eq!(NUM_CS, 2);

/// Generous chip-select lead, trail and idle times, in half SCK periods.
const CS_TIMING: u32 = 0xF;
const CLKDIV_MAX: u64 = 0xFFFF;
const MAX_SEGMENT: usize = 512;

/// Status polls for any single condition. At the slowest SCK we use (400 kHz)
/// a 512-byte segment takes about 10 ms.
const POLLS: usize = 10_000_000;

/// Clock divider for the fastest SCK not above `freq_hz`. SCK is
/// `core / (2 * (div + 1))`.
fn clkdiv(core_hz: u64, freq_hz: u64) -> u32 {
    let per_half = 2 * freq_hz.max(1);
    (core_hz.div_ceil(per_half).saturating_sub(1)).min(CLKDIV_MAX) as u32
}

/// Splits a `len`-byte call into `(start, end, hold)` segments.
fn segments(len: usize, cs: Cs) -> impl Iterator<Item = (usize, usize, bool)> {
    let count = len.div_ceil(MAX_SEGMENT);
    (0..count).map(move |i| {
        let start = i * MAX_SEGMENT;
        let end = (start + MAX_SEGMENT).min(len);
        let last = i + 1 == count;
        (start, end, !last || cs == Cs::Hold)
    })
}

pub struct SpiHostRegs {
    regs: StaticRef<SpiHostRegisters>,
    core_hz: u64,
}

impl SpiHostRegs {
    /// Resets and enables the host.
    ///
    /// # Safety
    ///
    /// The SPI host must be mapped at `base`, and nothing else may drive it
    /// while this value lives.
    pub unsafe fn new(base: usize, core_hz: u64) -> Self {
        let host = Self {
            regs: StaticRef::new(base as *const SpiHostRegisters),
            core_hz,
        };
        host.regs.control.write(CONTROL::SW_RST::SET);
        host.regs.control.set(0);
        host.regs.control.write(CONTROL::SPIEN::SET + CONTROL::OUTPUT_EN::SET);
        host
    }

    fn wait(&self, done: impl Fn(Status) -> bool) -> Result<(), BusError> {
        if poll(POLLS, || done(self.regs.status.extract())) {
            Ok(())
        } else {
            Err(BusError::Timeout)
        }
    }

    fn check_errors(&self) -> Result<(), BusError> {
        let err = self.regs.error_status.extract();
        if err.is_set(ERROR_STATUS::OVERFLOW) || err.is_set(ERROR_STATUS::UNDERFLOW) {
            // Write-one-to-clear.
            self.regs.error_status.set(err.get());
            return Err(BusError::Overflow);
        }
        Ok(())
    }

    fn command(&self, len: usize, rx: bool, hold: bool) -> Result<(), BusError> {
        self.wait(|s| s.is_set(STATUS::READY))?;
        let direction = if rx {
            COMMAND::DIRECTION::Rx
        } else {
            COMMAND::DIRECTION::Tx
        };
        self.regs.command.write(
            COMMAND::LEN.val(len as u32 - 1)
                + COMMAND::CSAAT.val(u32::from(hold))
                + COMMAND::SPEED::Standard
                + direction,
        );
        Ok(())
    }

    fn finish(&self) -> Result<(), BusError> {
        self.wait(|s| !s.is_set(STATUS::ACTIVE) && s.is_set(STATUS::TXEMPTY))?;
        self.check_errors()
    }

    /// TXDATA takes byte writes for a trailing partial word.
    fn write_tx_byte(&self, b: u8) {
        let txdata = core::ptr::addr_of!(self.regs.txdata) as *const WriteOnly<u32> as *mut u8;
        // Safety: `txdata` is a mapped register and the host accepts sub-word
        // writes to it.
        unsafe { core::ptr::write_volatile(txdata, b) };
    }
}

impl SpiHost for SpiHostRegs {
    fn configure(&mut self, csid: u8, freq_hz: u64) -> Result<(), BusError> {
        debug_assert!(csid < NUM_CS);
        let csid = csid.min(NUM_CS - 1);
        self.wait(|s| !s.is_set(STATUS::ACTIVE))?;
        self.regs.configopts[usize::from(csid)].write(
            CONFIGOPTS::CLKDIV.val(clkdiv(self.core_hz, freq_hz))
                + CONFIGOPTS::CSNIDLE.val(CS_TIMING)
                + CONFIGOPTS::CSNTRAIL.val(CS_TIMING)
                + CONFIGOPTS::CSNLEAD.val(CS_TIMING),
        );
        self.regs.csid.set(u32::from(csid));
        Ok(())
    }

    fn write(&mut self, data: &[u8], cs: Cs) -> Result<(), BusError> {
        for (start, end, hold) in segments(data.len(), cs) {
            let segment = &data[start..end];
            self.command(segment.len(), false, hold)?;
            let mut words = segment.chunks_exact(4);
            for w in &mut words {
                self.wait(|s| !s.is_set(STATUS::TXFULL))?;
                self.regs.txdata.set(u32::from_le_bytes([w[0], w[1], w[2], w[3]]));
            }
            for &b in words.remainder() {
                self.wait(|s| !s.is_set(STATUS::TXFULL))?;
                self.write_tx_byte(b);
            }
            self.finish()?;
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], cs: Cs) -> Result<(), BusError> {
        for (start, end, hold) in segments(buf.len(), cs) {
            let segment = &mut buf[start..end];
            self.command(segment.len(), true, hold)?;
            // The host packs received bytes into words, first byte lowest.
            for chunk in segment.chunks_mut(4) {
                self.wait(|s| !s.is_set(STATUS::RXEMPTY))?;
                let word = self.regs.rxdata.get().to_le_bytes();
                chunk.copy_from_slice(&word[..chunk.len()]);
            }
            self.finish()?;
        }
        Ok(())
    }
}
