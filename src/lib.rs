// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Boot disk flasher for the Cheshire SoC.
//!
//! Loaded into memory by a debugger (or the boot ROM), the flasher copies an
//! image between memory and one of the boot devices: an SD card or a NOR
//! flash on the SPI host, or an EEPROM on the I2C host. What to do is read
//! from the SoC scratch registers (`config`), and the outcome is written back
//! there. Progress and failures go out on the UART (`diag`).
//!
//! Everything but the entry point lives in this library so that it can be
//! tested on the host against device models.

#![cfg_attr(not(test), no_std)]

pub mod backend;
pub mod bsp;
pub mod bus;
pub mod clock;
pub mod config;
pub mod diag;
pub mod dispatch;
pub mod error;
pub mod gpt;
pub mod platform;
pub mod soc;
pub mod transfer;

#[cfg(test)]
mod testutil;
