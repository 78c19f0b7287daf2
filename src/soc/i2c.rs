// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! OpenTitan I2C host, standard mode.
//!
//! Transactions are queued as format FIFO entries: one per byte on the wire,
//! with flags for start, stop and reads. The host reports a missing
//! acknowledge through the `nak` interrupt state bit, which we poll.

use tock_registers::fields::FieldValue;
use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::registers::{ReadOnly, ReadWrite, WriteOnly};
use tock_registers::{register_bitfields, register_structs};

use super::StaticRef;
use crate::bus::{BusError, I2cHost};

pub const I2C_BASE: usize = 0x0300_3000;

register_bitfields![u32,
    INTR [
        NAK OFFSET(4) NUMBITS(1) []
    ],
    CTRL [
        ENABLEHOST OFFSET(0) NUMBITS(1) []
    ],
    STATUS [
        FMTFULL OFFSET(0) NUMBITS(1) [],
        FMTEMPTY OFFSET(2) NUMBITS(1) [],
        HOSTIDLE OFFSET(3) NUMBITS(1) [],
        RXEMPTY OFFSET(5) NUMBITS(1) []
    ],
    RDATA [
        DATA OFFSET(0) NUMBITS(8) []
    ],
    FDATA [
        FBYTE OFFSET(0) NUMBITS(8) [],
        START OFFSET(8) NUMBITS(1) [],
        STOP OFFSET(9) NUMBITS(1) [],
        READB OFFSET(10) NUMBITS(1) [],
        RCONT OFFSET(11) NUMBITS(1) []
    ],
    FIFO_CTRL [
        RXRST OFFSET(0) NUMBITS(1) [],
        FMTRST OFFSET(1) NUMBITS(1) []
    ],
    // All five timing registers pair two 16-bit cycle counts.
    TIMING [
        LOW OFFSET(0) NUMBITS(16) [],
        HIGH OFFSET(16) NUMBITS(16) []
    ]
];

register_structs! {
    pub I2cHostRegisters {
        (0x00 => intr_state: ReadWrite<u32, INTR::Register>),
        (0x04 => _reserved0),
        (0x10 => ctrl: ReadWrite<u32, CTRL::Register>),
        (0x14 => status: ReadOnly<u32, STATUS::Register>),
        (0x18 => rdata: ReadOnly<u32, RDATA::Register>),
        (0x1c => fdata: WriteOnly<u32, FDATA::Register>),
        (0x20 => fifo_ctrl: ReadWrite<u32, FIFO_CTRL::Register>),
        (0x24 => _reserved1),
        (0x30 => timing: [ReadWrite<u32, TIMING::Register>; 5]),
        (0x44 => @END),
    }
}

type Entry = FieldValue<u32, FDATA::Register>;

/// Bytes requested per read entry. Kept under the receive FIFO depth so each
/// chunk can be drained before the next is queued.
const READ_CHUNK: usize = 32;

/// Status polls for any single condition. A byte at 100 kHz is 90 us.
const POLLS: usize = 1_000_000;

/// Standard-mode minimum bus timings, in nanoseconds, as the `(low, high)`
/// halves of TIMING0 through TIMING4.
mod timing {
    pub const THIGH: u64 = 4_000;
    pub const TLOW: u64 = 4_700;
    pub const T_R: u64 = 1_000;
    pub const T_F: u64 = 300;
    pub const TSU_STA: u64 = 4_700;
    pub const THD_STA: u64 = 4_000;
    pub const TSU_DAT: u64 = 250;
    pub const THD_DAT: u64 = 1;
    pub const TSU_STO: u64 = 4_000;
    pub const T_BUF: u64 = 4_700;

    pub const PAIRS: [(u64, u64); 5] = [
        (THIGH, TLOW),
        (T_R, T_F),
        (TSU_STA, THD_STA),
        (TSU_DAT, THD_DAT),
        (TSU_STO, T_BUF),
    ];
}

/// Core cycles covering `ns`, rounded up, in the range of a timing field.
fn cycles(core_hz: u64, ns: u64) -> u32 {
    (ns.saturating_mul(core_hz)).div_ceil(1_000_000_000).clamp(1, 0xFFFF) as u32
}

fn address(addr: u8, read: bool) -> Entry {
    FDATA::START::SET + FDATA::FBYTE.val(u32::from(addr) << 1 | u32::from(read))
}

fn byte(b: u8) -> Entry {
    FDATA::FBYTE.val(u32::from(b))
}

pub struct I2cHostRegs {
    regs: StaticRef<I2cHostRegisters>,
}

impl I2cHostRegs {
    /// Programs standard-mode timing for `core_hz`, flushes the FIFOs and
    /// enables host mode.
    ///
    /// # Safety
    ///
    /// The I2C host must be mapped at `base`, and nothing else may drive it
    /// while this value lives.
    pub unsafe fn new(base: usize, core_hz: u64) -> Self {
        let host = Self {
            regs: StaticRef::new(base as *const I2cHostRegisters),
        };
        host.regs.ctrl.set(0);
        for (reg, (lo, hi)) in host.regs.timing.iter().zip(timing::PAIRS) {
            reg.write(
                TIMING::LOW.val(cycles(core_hz, lo)) + TIMING::HIGH.val(cycles(core_hz, hi)),
            );
        }
        host.regs
            .fifo_ctrl
            .write(FIFO_CTRL::RXRST::SET + FIFO_CTRL::FMTRST::SET);
        host.regs.intr_state.set(u32::MAX);
        host.regs.ctrl.write(CTRL::ENABLEHOST::SET);
        host
    }

    /// Abandons the current transaction after a missing acknowledge. The host
    /// issues the stop on its own.
    fn recover(&self) -> BusError {
        self.regs
            .fifo_ctrl
            .write(FIFO_CTRL::RXRST::SET + FIFO_CTRL::FMTRST::SET);
        self.regs.intr_state.write(INTR::NAK::SET);
        BusError::Nack
    }

    /// Polls until `ready` holds, bailing out as soon as the target NAKs.
    fn wait(&self, ready: impl Fn(&Self) -> bool) -> Result<(), BusError> {
        for _ in 0..POLLS {
            if self.regs.intr_state.is_set(INTR::NAK) {
                return Err(self.recover());
            }
            if ready(self) {
                return Ok(());
            }
        }
        Err(BusError::Timeout)
    }

    fn push(&self, entry: Entry) -> Result<(), BusError> {
        self.wait(|h| !h.regs.status.is_set(STATUS::FMTFULL))?;
        self.regs.fdata.write(entry);
        Ok(())
    }

    fn pop(&self) -> Result<u8, BusError> {
        self.wait(|h| !h.regs.status.is_set(STATUS::RXEMPTY))?;
        Ok(self.regs.rdata.read(RDATA::DATA) as u8)
    }

    /// Waits for the queued entries to go out and the bus to go idle.
    fn finish(&self) -> Result<(), BusError> {
        self.wait(|h| {
            let s = h.regs.status.extract();
            s.is_set(STATUS::FMTEMPTY) && s.is_set(STATUS::HOSTIDLE)
        })
    }

    /// Queues a start and the address byte, then the payload. The last
    /// payload entry (or the address, if there is none) carries `last`.
    fn send(&self, addr: u8, data: &[u8], last: Entry) -> Result<(), BusError> {
        match data.split_last() {
            None => self.push(address(addr, false) + last),
            Some((&tail, body)) => {
                self.push(address(addr, false))?;
                for &b in body {
                    self.push(byte(b))?;
                }
                self.push(byte(tail) + last)
            }
        }
    }
}

impl I2cHost for I2cHostRegs {
    fn write(&mut self, addr: u8, data: &[u8]) -> Result<(), BusError> {
        self.send(addr, data, FDATA::STOP::SET)?;
        self.finish()
    }

    fn write_read(&mut self, addr: u8, data: &[u8], buf: &mut [u8]) -> Result<(), BusError> {
        self.send(addr, data, FDATA::STOP::CLEAR)?;
        if buf.is_empty() {
            self.push(FDATA::STOP::SET)?;
            return self.finish();
        }

        self.push(address(addr, true))?;
        let count = buf.len().div_ceil(READ_CHUNK);
        for (i, chunk) in buf.chunks_mut(READ_CHUNK).enumerate() {
            let more = if i + 1 < count {
                FDATA::RCONT::SET
            } else {
                FDATA::STOP::SET
            };
            // A byte count of zero would mean 256.
            self.push(FDATA::READB::SET + more + FDATA::FBYTE.val(chunk.len() as u32))?;
            for b in chunk.iter_mut() {
                *b = self.pop()?;
            }
        }
        self.finish()
    }
}
