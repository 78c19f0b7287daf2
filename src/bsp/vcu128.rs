// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use super::Bsp;

/// Xilinx VCU128. The EEPROM on this board's I2C mux has A0 strapped high.
pub enum Board {}

impl Bsp for Board {
    const NAME: &'static str = "vcu128";
    const EEPROM_STRAP: u8 = 0b01;
}
