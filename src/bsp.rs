// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Types and hooks for implementing Board Support Packages (BSPs) for the
//! flasher.
//!
//! The SoC is the same everywhere; boards differ only in how it is wired up.
//! The exact properties that need to be described are in the `Bsp` trait
//! below.
//!
//! To implement a BSP:
//!
//! 1. Create a module within `bsp` named after your board.
//! 2. Define a type in the module called `Board`. This type will never be
//!    instantiated, so it can be arbitrary; an empty enum is easy.
//! 3. Implement `bsp::Bsp` for your `Board` type.
//! 4. Add a `target-board-*` feature to `Cargo.toml`.
//! 5. Add a branch to the `cfg_if` in `src/bin/flasher.rs` to detect your
//!    board and select the right `Board` type.

// As with the boot loaders this grew out of, every BSP is always compiled so
// that all of them keep building.
pub mod genesys2;
pub mod sim;
pub mod vcu128;

/// Requirements placed upon a BSP type.
pub trait Bsp {
    /// Shown in the startup banner.
    const NAME: &'static str;

    /// Chip-select lines wired out of the SPI host. The SD card's dummy
    /// chip select, used while clocking it into SPI mode, is the last one.
    const SPI_CHIP_SELECTS: u8 = 2;

    /// Levels on the EEPROM's A1:A0 address pins, as the low two bits of its
    /// I2C address.
    const EEPROM_STRAP: u8 = 0;

    const UART_BAUD: u32 = 115_200;

    /// Chip select of the line the SD card uses to get its dummy clocks.
    fn sd_dummy_cs() -> u8 {
        Self::SPI_CHIP_SELECTS.saturating_sub(1)
    }
}
