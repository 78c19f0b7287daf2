// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! BSP for the Digilent Genesys 2 FPGA board.
//!
//! The SD slot is on chip select 0 and the S25FS512S on a PMOD adapter on chip
//! select 1. The EEPROM sits on the PMOD I2C header with its address pins
//! grounded.
use super::Bsp;

pub enum Board {}

impl Bsp for Board {
    const NAME: &'static str = "genesys2";
}
