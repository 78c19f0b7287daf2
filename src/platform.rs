// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The Cheshire device factory: backends on the SoC's own SPI and I2C hosts.

use core::marker::PhantomData;

use crate::backend::eeprom::Eeprom;
use crate::backend::nor::{self, NorFlash};
use crate::backend::sdcard::{self, SdCard};
use crate::backend::Backend;
use crate::bsp::Bsp;
use crate::clock::ClockContext;
use crate::dispatch::Devices;
use crate::error::BackendKind;
use crate::soc::i2c::{I2cHostRegs, I2C_BASE};
use crate::soc::spi::{SpiHostRegs, SPI_HOST_BASE};

enum Device {
    Sd(SdCard<SpiHostRegs>),
    Nor(NorFlash<SpiHostRegs>),
    Eeprom(Eeprom<I2cHostRegs>),
}

pub struct CheshireDevices<B> {
    device: Option<Device>,
    _board: PhantomData<B>,
}

impl<B: Bsp> CheshireDevices<B> {
    /// # Safety
    ///
    /// The SPI and I2C hosts must be mapped at their usual addresses, and
    /// nothing else may use them while this value lives.
    pub unsafe fn new() -> Self {
        Self {
            device: None,
            _board: PhantomData,
        }
    }
}

impl<B: Bsp> Devices for CheshireDevices<B> {
    fn open(&mut self, kind: BackendKind, clock: &ClockContext) -> &mut dyn Backend {
        // Safety: exclusive use of both hosts is part of the contract of
        // `CheshireDevices::new`. Opening a device replaces the previous one.
        let device = unsafe {
            match kind {
                BackendKind::SdCard => Device::Sd(SdCard::new(
                    SpiHostRegs::new(SPI_HOST_BASE, clock.core_hz),
                    sdcard::CSID,
                    B::sd_dummy_cs(),
                )),
                BackendKind::NorFlash => Device::Nor(NorFlash::new(
                    SpiHostRegs::new(SPI_HOST_BASE, clock.core_hz),
                    nor::CSID,
                    clock,
                )),
                BackendKind::Eeprom => Device::Eeprom(Eeprom::new(
                    I2cHostRegs::new(I2C_BASE, clock.core_hz),
                    B::EEPROM_STRAP,
                )),
            }
        };

        match self.device.insert(device) {
            Device::Sd(card) => card,
            Device::Nor(flash) => flash,
            Device::Eeprom(eeprom) => eeprom,
        }
    }
}
