// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Storage backends.
//!
//! A backend wraps one device protocol on one bus and exposes the device as an
//! array of 512-byte sectors. Everything above this layer (dispatch, partition
//! lookup, the transfer loop) works through `&mut dyn Backend` and doesn't know
//! which device it is talking to.
//!
//! To add a backend:
//!
//! 1. Add a variant to `BackendKind`, numbered with the boot-mode value that
//!    should select it.
//! 2. Create a module here implementing `Backend` for the device.
//! 3. Teach the platform's `Devices::open` to construct it.

pub mod eeprom;
pub mod nor;
pub mod sdcard;

use crate::clock::Delay;
use crate::error::{BackendKind, DeviceError};

/// Size of every sector moved by the flasher, in bytes.
pub const SECTOR_SIZE: usize = 512;

pub type Sector = [u8; SECTOR_SIZE];

pub trait Backend {
    fn kind(&self) -> BackendKind;

    /// Bus clock chosen for this device, or `None` if the bus runs at its
    /// protocol default.
    fn bus_frequency(&self) -> Option<u64>;

    /// Time the device needs after `init` before it answers reliably, in
    /// microseconds, if it states one.
    fn settle_delay_us(&self) -> Option<u32>;

    /// Brings the device up. Called exactly once, before any other I/O.
    fn init(&mut self, delay: &Delay<'_>) -> Result<(), DeviceError>;

    /// Number of addressable sectors. Only meaningful after `init`.
    fn capacity_sectors(&self) -> u64;

    /// Gets `count` sectors starting at `first` ready to be written. Media
    /// that must be erased before programming do so here.
    ///
    /// On failure, returns the sector whose preparation failed along with the
    /// cause.
    fn prepare_write(&mut self, _first: u64, _count: u64) -> Result<(), (u64, DeviceError)> {
        Ok(())
    }

    fn read_sector(&mut self, sector: u64, buf: &mut Sector) -> Result<(), DeviceError>;

    fn write_sector(&mut self, sector: u64, buf: &Sector) -> Result<(), DeviceError>;
}
