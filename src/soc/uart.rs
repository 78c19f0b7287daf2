// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! 16550-compatible UART, transmit only.

use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::registers::{ReadOnly, ReadWrite, WriteOnly};
use tock_registers::{register_bitfields, register_structs};

use super::{poll, StaticRef};
use crate::diag::Sink;

pub const UART_BASE: usize = 0x0300_2000;

register_bitfields![u32,
    FCR [
        FIFO_ENABLE OFFSET(0) NUMBITS(1) [],
        RX_RESET OFFSET(1) NUMBITS(1) [],
        TX_RESET OFFSET(2) NUMBITS(1) [],
        RX_TRIGGER OFFSET(6) NUMBITS(2) [
            Bytes14 = 3
        ]
    ],
    LCR [
        WORD_LENGTH OFFSET(0) NUMBITS(2) [
            Bits8 = 3
        ],
        DLAB OFFSET(7) NUMBITS(1) []
    ],
    MCR [
        AFE OFFSET(5) NUMBITS(1) []
    ],
    LSR [
        THRE OFFSET(5) NUMBITS(1) []
    ]
];

// Registers sit on a 4-byte stride. With LCR.DLAB set, the first two hold
// the divisor latch.
register_structs! {
    pub UartRegisters {
        (0x00 => thr_dll: WriteOnly<u32>),
        (0x04 => ier_dlm: ReadWrite<u32>),
        (0x08 => fcr: WriteOnly<u32, FCR::Register>),
        (0x0c => lcr: ReadWrite<u32, LCR::Register>),
        (0x10 => mcr: ReadWrite<u32, MCR::Register>),
        (0x14 => lsr: ReadOnly<u32, LSR::Register>),
        (0x18 => @END),
    }
}

/// How long to wait for room in the transmitter before dropping a byte. A
/// wedged UART must not stop a flash attempt.
const THRE_POLLS: usize = 100_000;

pub struct Uart {
    regs: StaticRef<UartRegisters>,
}

// Safety: the flasher runs on a single hart, and every access is a single
// register read or write.
unsafe impl Sync for Uart {}
unsafe impl Send for Uart {}

impl Uart {
    /// # Safety
    ///
    /// A 16550 must be mapped at `base`.
    pub const unsafe fn at(base: usize) -> Self {
        Self {
            regs: StaticRef::new(base as *const UartRegisters),
        }
    }

    /// Programs the baud rate divisor from the core clock and sets up 8N1.
    pub fn init(&self, core_hz: u64, baud: u32) {
        let divisor = (core_hz / (16 * u64::from(baud.max(1)))).clamp(1, 0xFFFF) as u32;
        self.regs.ier_dlm.set(0);
        self.regs.lcr.write(LCR::DLAB::SET);
        self.regs.thr_dll.set(divisor & 0xFF);
        self.regs.ier_dlm.set(divisor >> 8);
        self.regs.lcr.write(LCR::WORD_LENGTH::Bits8);
        self.regs.fcr.write(
            FCR::FIFO_ENABLE::SET
                + FCR::RX_RESET::SET
                + FCR::TX_RESET::SET
                + FCR::RX_TRIGGER::Bytes14,
        );
        self.regs.mcr.write(MCR::AFE::SET);
    }

    fn put(&self, byte: u8) {
        if poll(THRE_POLLS, || self.regs.lsr.is_set(LSR::THRE)) {
            self.regs.thr_dll.set(u32::from(byte));
        }
    }
}

impl Sink for Uart {
    fn write_bytes(&self, bytes: &[u8]) {
        for &b in bytes {
            self.put(b);
        }
    }
}
