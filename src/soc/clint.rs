// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! CLINT machine timer and the core cycle counter.

use tock_registers::interfaces::Readable;
use tock_registers::register_structs;
use tock_registers::registers::ReadOnly;

use super::StaticRef;
use crate::clock::{CycleCounter, Timer};

pub const CLINT_BASE: usize = 0x0204_0000;

register_structs! {
    pub ClintRegisters {
        (0x0000 => _reserved0),
        /// Free-running, at the reference frequency. A single 64-bit register
        /// on RV64.
        (0xbff8 => mtime: ReadOnly<u64>),
        (0xc000 => @END),
    }
}

/// The CLINT's free-running `mtime`, ticking at the reference frequency.
pub struct Clint {
    regs: StaticRef<ClintRegisters>,
}

impl Clint {
    /// # Safety
    ///
    /// A CLINT must be mapped at `base`.
    pub const unsafe fn at(base: usize) -> Self {
        Self {
            regs: StaticRef::new(base as *const ClintRegisters),
        }
    }
}

impl Timer for Clint {
    fn now(&self) -> u64 {
        self.regs.mtime.get()
    }
}

/// The `mcycle` CSR.
pub struct Mcycle;

impl CycleCounter for Mcycle {
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    fn cycles(&self) -> u64 {
        riscv::register::mcycle::read64()
    }

    #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
    fn cycles(&self) -> u64 {
        0
    }
}
