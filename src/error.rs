// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error taxonomy for a flash attempt.
//!
//! Every `FlashError` is fatal to the attempt that produced it. Retrying is
//! done below this level (sector operations, device polls), never above it.

use core::fmt;

use num_derive::FromPrimitive;

use crate::bus::BusError;

/// Identity of a storage backend. The discriminants are the raw boot-mode
/// values that select each backend.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
pub enum BackendKind {
    SdCard = 1,
    NorFlash = 2,
    Eeprom = 3,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackendKind::SdCard => "SD card (SPI)",
            BackendKind::NorFlash => "NOR flash (SPI)",
            BackendKind::Eeprom => "EEPROM (I2C)",
        })
    }
}

/// Which way sectors move.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Direction {
    /// Device to memory.
    Read,
    /// Memory to device.
    Write,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Read => "read",
            Direction::Write => "write",
        })
    }
}

/// What a device did wrong. Backends report these; the layers above decide
/// whether they are worth another attempt.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DeviceError {
    /// The bus transaction itself failed.
    Bus(BusError),
    /// The device never produced a response.
    NoResponse,
    /// The device answered, but not with what the protocol requires.
    Unexpected(u8),
    /// Identification returned a device we don't know how to drive.
    WrongDevice,
    /// Data arrived with a bad checksum.
    Crc,
    /// The device refused the data it was given.
    Rejected(u8),
    /// Data read back after a write differs from what was written.
    Mismatch,
    /// The device stayed busy past its poll ceiling.
    Busy,
    /// A real-time deadline passed.
    Timeout,
}

impl From<BusError> for DeviceError {
    fn from(e: BusError) -> Self {
        DeviceError::Bus(e)
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::Bus(e) => write!(f, "bus error: {e}"),
            DeviceError::NoResponse => f.write_str("no response"),
            DeviceError::Unexpected(b) => write!(f, "unexpected response {b:#04x}"),
            DeviceError::WrongDevice => f.write_str("unrecognized device"),
            DeviceError::Crc => f.write_str("checksum mismatch"),
            DeviceError::Rejected(b) => write!(f, "rejected with {b:#04x}"),
            DeviceError::Mismatch => f.write_str("read-back mismatch"),
            DeviceError::Busy => f.write_str("stuck busy"),
            DeviceError::Timeout => f.write_str("timed out"),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FlashError {
    /// The boot-mode selector named no backend.
    UnsupportedMode(u32),
    /// Backend bring-up failed. Not retried.
    DeviceInit { kind: BackendKind, cause: DeviceError },
    /// A sector failed every attempt. `completed` sectors before it are good.
    SectorIo {
        sector: u64,
        direction: Direction,
        completed: u64,
    },
    /// No usable GPT, or no partition matching the selector.
    PartitionNotFound,
    /// The request runs past the end of the device or partition.
    Bounds { requested: u64, available: u64 },
    /// The reference clock stopped advancing during a spin.
    Timeout,
}

impl FlashError {
    /// Status reported through the result scratch register and exit path.
    /// Always negative.
    pub fn code(&self) -> i32 {
        match self {
            FlashError::UnsupportedMode(_) => -1,
            FlashError::DeviceInit { .. } => -2,
            FlashError::SectorIo { .. } => -3,
            FlashError::PartitionNotFound => -4,
            FlashError::Bounds { .. } => -5,
            FlashError::Timeout => -6,
        }
    }
}

impl fmt::Display for FlashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlashError::UnsupportedMode(mode) => {
                write!(f, "unsupported autonomous target mode {mode}")
            }
            FlashError::DeviceInit { kind, cause } => {
                write!(f, "{kind} initialization failed: {cause}")
            }
            FlashError::SectorIo {
                sector,
                direction,
                completed,
            } => write!(
                f,
                "sector {sector} {direction} failed ({completed} sectors done)"
            ),
            FlashError::PartitionNotFound => f.write_str("partition not found"),
            FlashError::Bounds {
                requested,
                available,
            } => write!(
                f,
                "request ends at sector {requested}, only {available} available"
            ),
            FlashError::Timeout => f.write_str("reference clock stalled"),
        }
    }
}
