// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! RTL simulation with device models attached.
//!
//! The simulated UART is sampled by a testbench monitor that keeps up with
//! any rate, so we run it as fast as the divider allows for 50 MHz.

use super::Bsp;

pub enum Board {}

impl Bsp for Board {
    const NAME: &'static str = "sim";
    const UART_BAUD: u32 = 3_125_000;
}
