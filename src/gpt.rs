// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Partition lookup.
//!
//! Partition-relative requests are rebased onto the device by reading the
//! primary GPT. The table is only ever read, through the same retried sector
//! reads as a transfer.

use core::fmt;

use crc_catalog::CRC_32_ISO_HDLC;
use gpt_disk_io::{BlockIo, Disk};
use gpt_disk_types::{guid, BlockSize, GptPartitionType, Lba};

use crate::backend::{Backend, Sector, SECTOR_SIZE};
use crate::config::{Addressing, TransferRequest};
use crate::error::{Direction, FlashError};
use crate::transfer::{read_sector_retried, SectorSpan};

/// Partition type of Cheshire boot images.
pub const BOOT_PARTITION_TYPE: GptPartitionType =
    GptPartitionType(guid!("0269B26A-FD95-4CE4-98CF-941401412C62"));

const PRIMARY_HEADER_LBA: u64 = 1;
const SIGNATURE: &[u8; 8] = b"EFI PART";
const MIN_HEADER_SIZE: usize = 92;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PartitionSelector {
    /// Entry number in the partition array, from zero.
    Index(u32),
    /// First partition whose type is `BOOT_PARTITION_TYPE`.
    BootType,
}

impl fmt::Display for PartitionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionSelector::Index(i) => write!(f, "partition {i}"),
            PartitionSelector::BootType => f.write_str("boot partition"),
        }
    }
}

/// Presents a backend to `gpt_disk_io` as a read-only block device.
struct SectorDevice<'a> {
    backend: &'a mut dyn Backend,
}

impl BlockIo for SectorDevice<'_> {
    type Error = FlashError;

    fn block_size(&self) -> BlockSize {
        BlockSize::BS_512
    }

    fn num_blocks(&mut self) -> Result<u64, Self::Error> {
        Ok(self.backend.capacity_sectors())
    }

    fn read_blocks(&mut self, start_lba: Lba, dst: &mut [u8]) -> Result<(), Self::Error> {
        let start = start_lba.to_u64();
        if dst.len() % SECTOR_SIZE != 0 {
            return Err(FlashError::PartitionNotFound);
        }
        for (i, chunk) in dst.chunks_exact_mut(SECTOR_SIZE).enumerate() {
            let sector = start + i as u64;
            let buf: &mut Sector = chunk
                .try_into()
                .map_err(|_| FlashError::PartitionNotFound)?;
            read_sector_retried(&mut *self.backend, sector, buf).map_err(|cause| {
                log::error!("gpt: reading sector {}: {}", sector, cause);
                FlashError::SectorIo {
                    sector,
                    direction: Direction::Read,
                    completed: 0,
                }
            })?;
        }
        Ok(())
    }

    fn write_blocks(&mut self, start_lba: Lba, _src: &[u8]) -> Result<(), Self::Error> {
        Err(FlashError::SectorIo {
            sector: start_lba.to_u64(),
            direction: Direction::Write,
            completed: 0,
        })
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Logs why the table was unusable and turns it into `PartitionNotFound`.
fn unusable<E: fmt::Debug>(what: &'static str) -> impl FnOnce(E) -> FlashError {
    move |e| {
        log::error!("gpt: {}: {:?}", what, e);
        FlashError::PartitionNotFound
    }
}

/// Checks the signature and CRC of a raw primary header.
fn check_header(raw: &Sector) -> Result<(), FlashError> {
    if &raw[..8] != SIGNATURE {
        log::error!("gpt: no signature at LBA {}", PRIMARY_HEADER_LBA);
        return Err(FlashError::PartitionNotFound);
    }
    let size = u32::from_le_bytes([raw[12], raw[13], raw[14], raw[15]]) as usize;
    if !(MIN_HEADER_SIZE..=SECTOR_SIZE).contains(&size) {
        log::error!("gpt: implausible header size {}", size);
        return Err(FlashError::PartitionNotFound);
    }
    let stored = u32::from_le_bytes([raw[16], raw[17], raw[18], raw[19]]);

    // The CRC covers the header with its own CRC field zeroed.
    let mut crc = tinycrc::Crc::new(&CRC_32_ISO_HDLC);
    crc.update(&raw[..16]);
    crc.update(&[0; 4]);
    crc.update(&raw[20..size]);
    let computed = crc.finish();
    if computed != stored {
        log::error!("gpt: header crc {:#010x}, expected {:#010x}", computed, stored);
        return Err(FlashError::PartitionNotFound);
    }
    Ok(())
}

/// Finds the partition named by `selector` and returns its extent.
pub fn locate(
    backend: &mut dyn Backend,
    selector: PartitionSelector,
) -> Result<SectorSpan, FlashError> {
    let mut raw = [0u8; SECTOR_SIZE];
    read_sector_retried(backend, PRIMARY_HEADER_LBA, &mut raw)
        .map_err(unusable("reading header"))?;
    check_header(&raw)?;

    let capacity = backend.capacity_sectors();
    let mut disk = Disk::new(SectorDevice { backend }).map_err(unusable("opening disk"))?;
    let header = disk
        .read_primary_gpt_header(&mut [0u8; SECTOR_SIZE])
        .map_err(unusable("reading header"))?;
    let layout = header
        .get_partition_entry_array_layout()
        .map_err(unusable("entry array layout"))?;

    let mut block = [0u8; SECTOR_SIZE];
    let entries = disk
        .gpt_partition_entry_array_iter(layout, &mut block)
        .map_err(unusable("reading entries"))?;

    for (index, entry) in entries.enumerate() {
        let entry = entry.map_err(unusable("reading entry"))?;
        let partition_type = entry.partition_type_guid;
        let matches = match selector {
            PartitionSelector::Index(i) => index as u64 == u64::from(i),
            PartitionSelector::BootType => {
                entry.is_used() && partition_type == BOOT_PARTITION_TYPE
            }
        };
        if !matches {
            continue;
        }
        if !entry.is_used() {
            log::error!("gpt: {} is unused", selector);
            return Err(FlashError::PartitionNotFound);
        }

        let first = entry.starting_lba.to_u64();
        let last = entry.ending_lba.to_u64();
        let Some(length) = last.checked_sub(first).and_then(|n| n.checked_add(1)) else {
            log::error!("gpt: {} spans {}..={}", selector, first, last);
            return Err(FlashError::PartitionNotFound);
        };
        if last >= capacity {
            log::error!(
                "gpt: {} ends at {}, past the last sector {}",
                selector,
                last,
                capacity.saturating_sub(1)
            );
            return Err(FlashError::PartitionNotFound);
        }
        log::info!("gpt: {} is entry {}, sectors {}..={}", selector, index, first, last);
        return Ok(SectorSpan {
            offset: first,
            length,
        });
    }

    log::error!("gpt: no {}", selector);
    Err(FlashError::PartitionNotFound)
}

/// Turns a request into device sectors, looking up the partition first if the
/// request is partition-relative.
pub fn resolve(
    backend: &mut dyn Backend,
    request: &TransferRequest,
) -> Result<SectorSpan, FlashError> {
    let selector = match request.addressing {
        Addressing::Physical => {
            return Ok(SectorSpan {
                offset: request.offset_sectors,
                length: request.length_sectors,
            })
        }
        Addressing::Partition(selector) => selector,
    };

    let partition = locate(backend, selector)?;
    let requested = request
        .offset_sectors
        .checked_add(request.length_sectors)
        .unwrap_or(u64::MAX);
    if requested > partition.length {
        return Err(FlashError::Bounds {
            requested,
            available: partition.length,
        });
    }
    Ok(SectorSpan {
        offset: partition.offset + request.offset_sectors,
        length: request.length_sectors,
    })
}
