// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Flash request handed over through the SoC scratch registers.
//!
//! Whoever loads the flasher (a debugger over JTAG, usually) deposits the
//! request in `SCRATCH[4..12]` before releasing the core, and reads the result
//! back from `SCRATCH[2]` afterwards. The layout is `FlashArgs`; it is shared
//! with the `xtask args` generator, so both ends agree by construction.

use core::mem::size_of;

use num_traits::FromPrimitive;
use static_assertions::{const_assert, const_assert_eq};
use zerocopy::{AsBytes, FromBytes};

use crate::backend::SECTOR_SIZE;
use crate::error::{BackendKind, Direction, FlashError};
use crate::gpt::PartitionSelector;

/// SoC register file.
pub mod regs {
    pub const BASE: usize = 0x0300_0000;
    pub const SCRATCH_COUNT: usize = 16;
    pub const BOOT_MODE: usize = BASE + 0x40;
    pub const RTC_FREQ: usize = BASE + 0x44;

    /// Where the result word goes.
    pub const RESULT_SCRATCH: usize = 2;
    /// First of the eight request words.
    pub const ARGS_SCRATCH: usize = 4;

    pub const fn scratch(n: usize) -> usize {
        BASE + 4 * n
    }
}

/// Flags word: set to read the device into memory rather than write it.
pub const FLAG_READ: u32 = 1 << 0;
const ADDRESSING_SHIFT: u32 = 1;
const ADDRESSING_MASK: u32 = 0b11;
const PARTITION_SHIFT: u32 = 8;
const PARTITION_MASK: u32 = 0xFF;

const ADDRESSING_PHYSICAL: u32 = 0;
const ADDRESSING_INDEX: u32 = 1;
const ADDRESSING_BOOT_TYPE: u32 = 2;

/// Raw request words, in scratch register order.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, AsBytes, FromBytes)]
#[repr(C)]
pub struct FlashArgs {
    pub mode: u32,
    pub length_lo: u32,
    pub length_hi: u32,
    pub offset_lo: u32,
    pub offset_hi: u32,
    pub image_base_lo: u32,
    pub image_base_hi: u32,
    pub flags: u32,
}

const_assert_eq!(size_of::<FlashArgs>(), 8 * 4);
const_assert!(regs::ARGS_SCRATCH + 8 <= regs::SCRATCH_COUNT);

fn join(lo: u32, hi: u32) -> u64 {
    u64::from(hi) << 32 | u64::from(lo)
}

fn split(value: u64) -> (u32, u32) {
    (value as u32, (value >> 32) as u32)
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BootTargetMode {
    SdCard,
    NorFlash,
    EepromI2c,
    Unsupported(u32),
}

impl BootTargetMode {
    pub fn from_raw(raw: u32) -> Self {
        match BackendKind::from_u32(raw) {
            Some(BackendKind::SdCard) => BootTargetMode::SdCard,
            Some(BackendKind::NorFlash) => BootTargetMode::NorFlash,
            Some(BackendKind::Eeprom) => BootTargetMode::EepromI2c,
            None => BootTargetMode::Unsupported(raw),
        }
    }

    pub fn raw(&self) -> u32 {
        match self {
            BootTargetMode::Unsupported(raw) => *raw,
            supported => supported.backend().map_or(0, |kind| kind as u32),
        }
    }

    /// The backend this mode selects, if any.
    pub fn backend(&self) -> Option<BackendKind> {
        match self {
            BootTargetMode::SdCard => Some(BackendKind::SdCard),
            BootTargetMode::NorFlash => Some(BackendKind::NorFlash),
            BootTargetMode::EepromI2c => Some(BackendKind::Eeprom),
            BootTargetMode::Unsupported(_) => None,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Addressing {
    /// Offsets are device sectors.
    Physical,
    /// Offsets are relative to a GPT partition.
    Partition(PartitionSelector),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TransferRequest {
    pub length_sectors: u64,
    pub offset_sectors: u64,
    pub image_base: usize,
    pub addressing: Addressing,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FlashConfig {
    pub mode: BootTargetMode,
    pub request: TransferRequest,
    pub direction: Direction,
}

impl FlashConfig {
    /// Decodes the request words. The only things that can be wrong with them,
    /// apart from the mode (checked by dispatch), are a reserved addressing
    /// value and an image that doesn't fit the address space.
    pub fn from_args(args: &FlashArgs) -> Result<Self, FlashError> {
        let addressing = match (args.flags >> ADDRESSING_SHIFT) & ADDRESSING_MASK {
            ADDRESSING_PHYSICAL => Addressing::Physical,
            ADDRESSING_INDEX => Addressing::Partition(PartitionSelector::Index(
                (args.flags >> PARTITION_SHIFT) & PARTITION_MASK,
            )),
            ADDRESSING_BOOT_TYPE => Addressing::Partition(PartitionSelector::BootType),
            reserved => {
                log::error!("reserved addressing mode {}", reserved);
                return Err(FlashError::PartitionNotFound);
            }
        };

        // The whole image must be addressable, not just its first byte.
        let base = join(args.image_base_lo, args.image_base_hi);
        let length_sectors = join(args.length_lo, args.length_hi);
        let image_end = length_sectors
            .checked_mul(SECTOR_SIZE as u64)
            .and_then(|bytes| base.checked_add(bytes));
        let image_base = match image_end.map(usize::try_from) {
            Some(Ok(_)) => usize::try_from(base).ok(),
            _ => None,
        };
        let Some(image_base) = image_base else {
            log::error!("image at {:#x} of {} sectors overflows memory", base, length_sectors);
            return Err(FlashError::Bounds {
                requested: image_end.unwrap_or(u64::MAX),
                available: usize::MAX as u64,
            });
        };

        Ok(FlashConfig {
            mode: BootTargetMode::from_raw(args.mode),
            request: TransferRequest {
                length_sectors,
                offset_sectors: join(args.offset_lo, args.offset_hi),
                image_base,
                addressing,
            },
            direction: if args.flags & FLAG_READ != 0 {
                Direction::Read
            } else {
                Direction::Write
            },
        })
    }

    /// Reads and decodes the request from the scratch registers.
    ///
    /// # Safety
    ///
    /// The SoC register file must be mapped at `regs::BASE`.
    pub unsafe fn from_scratch() -> Result<Self, FlashError> {
        let mut args = FlashArgs::new_zeroed();
        for (i, word) in args.as_bytes_mut().chunks_exact_mut(4).enumerate() {
            let addr = regs::scratch(regs::ARGS_SCRATCH + i) as *const u32;
            word.copy_from_slice(&core::ptr::read_volatile(addr).to_ne_bytes());
        }
        Self::from_args(&args)
    }
}

impl From<&FlashConfig> for FlashArgs {
    fn from(config: &FlashConfig) -> Self {
        let request = &config.request;
        let (length_lo, length_hi) = split(request.length_sectors);
        let (offset_lo, offset_hi) = split(request.offset_sectors);
        let (image_base_lo, image_base_hi) = split(request.image_base as u64);

        let mut flags = match config.direction {
            Direction::Read => FLAG_READ,
            Direction::Write => 0,
        };
        flags |= match request.addressing {
            Addressing::Physical => ADDRESSING_PHYSICAL << ADDRESSING_SHIFT,
            Addressing::Partition(PartitionSelector::Index(i)) => {
                ADDRESSING_INDEX << ADDRESSING_SHIFT | (i & PARTITION_MASK) << PARTITION_SHIFT
            }
            Addressing::Partition(PartitionSelector::BootType) => {
                ADDRESSING_BOOT_TYPE << ADDRESSING_SHIFT
            }
        };

        FlashArgs {
            mode: config.mode.raw(),
            length_lo,
            length_hi,
            offset_lo,
            offset_hi,
            image_base_lo,
            image_base_hi,
            flags,
        }
    }
}

/// Result register encoding: the status shifted up, with bit 0 marking the
/// word as written.
pub fn result_word(status: i32) -> u32 {
    (status as u32) << 1 | 1
}

/// Reads the reference clock frequency published by the SoC.
///
/// # Safety
///
/// The SoC register file must be mapped at `regs::BASE`.
pub unsafe fn reference_frequency() -> u32 {
    core::ptr::read_volatile(regs::RTC_FREQ as *const u32)
}

/// Publishes the attempt's status.
///
/// # Safety
///
/// The SoC register file must be mapped at `regs::BASE`.
pub unsafe fn publish_result(status: i32) {
    let addr = regs::scratch(regs::RESULT_SCRATCH) as *mut u32;
    core::ptr::write_volatile(addr, result_word(status));
}
