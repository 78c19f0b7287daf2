// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Sector transfer loop.
//!
//! Moves a span of sectors between a backend and the image in memory, one
//! sector at a time. Every sector gets a bounded number of attempts; writes
//! are read back and compared before they count. The first sector that runs
//! out of attempts ends the transfer, and everything before it is known good.

use crate::backend::{Backend, Sector, SECTOR_SIZE};
use crate::error::{DeviceError, Direction, FlashError};

/// Attempts per sector, including the first.
pub const MAX_SECTOR_ATTEMPTS: usize = 3;

/// How often to report progress, in sectors.
const PROGRESS_INTERVAL: u64 = 1024;

/// The in-memory side of a transfer. Sector indices are relative to the start
/// of the image, not the device.
pub trait ImageMemory {
    fn load(&self, index: u64, buf: &mut Sector);
    fn store(&mut self, index: u64, buf: &Sector);
}

/// An image at a fixed physical address, as handed over by the loader.
pub struct PhysicalImage {
    base: usize,
}

impl PhysicalImage {
    /// # Safety
    ///
    /// `base` must point to memory that is readable and writable for the
    /// whole span being transferred, and that nothing else uses for the
    /// duration of the transfer.
    pub unsafe fn new(base: usize) -> Self {
        Self { base }
    }

    fn sector_ptr(&self, index: u64) -> *mut u8 {
        (self.base + index as usize * SECTOR_SIZE) as *mut u8
    }
}

impl ImageMemory for PhysicalImage {
    fn load(&self, index: u64, buf: &mut Sector) {
        // Safety: covered by the contract of `PhysicalImage::new`.
        unsafe {
            core::ptr::copy_nonoverlapping(self.sector_ptr(index), buf.as_mut_ptr(), SECTOR_SIZE);
        }
    }

    fn store(&mut self, index: u64, buf: &Sector) {
        // Safety: covered by the contract of `PhysicalImage::new`.
        unsafe {
            core::ptr::copy_nonoverlapping(buf.as_ptr(), self.sector_ptr(index), SECTOR_SIZE);
        }
    }
}

/// A run of device sectors.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SectorSpan {
    pub offset: u64,
    pub length: u64,
}

/// What a successful transfer moved.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Report {
    pub bytes: u64,
    pub sectors: u64,
    pub first_sector: u64,
}

/// Runs `op` until it succeeds or runs out of attempts, returning the last
/// failure.
fn with_retries(
    sector: u64,
    mut op: impl FnMut() -> Result<(), DeviceError>,
) -> Result<(), DeviceError> {
    let mut attempt = 1;
    loop {
        match op() {
            Ok(()) => return Ok(()),
            Err(e) if attempt < MAX_SECTOR_ATTEMPTS => {
                log::debug!("sector {}: attempt {} failed: {}", sector, attempt, e);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Reads one sector with the same retry policy as a transfer.
pub fn read_sector_retried(
    backend: &mut dyn Backend,
    sector: u64,
    buf: &mut Sector,
) -> Result<(), DeviceError> {
    with_retries(sector, || backend.read_sector(sector, buf))
}

fn write_verified(
    backend: &mut dyn Backend,
    sector: u64,
    data: &Sector,
    check: &mut Sector,
) -> Result<(), DeviceError> {
    backend.write_sector(sector, data)?;
    backend.read_sector(sector, check)?;
    if check != data {
        return Err(DeviceError::Mismatch);
    }
    Ok(())
}

pub fn transfer(
    backend: &mut dyn Backend,
    image: &mut dyn ImageMemory,
    span: SectorSpan,
    direction: Direction,
) -> Result<Report, FlashError> {
    let available = backend.capacity_sectors();
    let requested = span.offset.checked_add(span.length).unwrap_or(u64::MAX);
    if requested > available {
        return Err(FlashError::Bounds {
            requested,
            available,
        });
    }
    if span.length == 0 {
        return Ok(Report {
            bytes: 0,
            sectors: 0,
            first_sector: span.offset,
        });
    }

    if direction == Direction::Write {
        backend
            .prepare_write(span.offset, span.length)
            .map_err(|(sector, cause)| {
                log::error!("preparing sector {} failed: {}", sector, cause);
                FlashError::SectorIo {
                    sector,
                    direction,
                    completed: 0,
                }
            })?;
    }

    let mut buf = [0u8; SECTOR_SIZE];
    let mut check = [0u8; SECTOR_SIZE];
    for index in 0..span.length {
        let sector = span.offset + index;
        let result = match direction {
            Direction::Read => read_sector_retried(backend, sector, &mut buf)
                .map(|()| image.store(index, &buf)),
            Direction::Write => {
                image.load(index, &mut buf);
                with_retries(sector, || write_verified(backend, sector, &buf, &mut check))
            }
        };
        if let Err(cause) = result {
            log::error!(
                "sector {} {} failed: {} ({} of {} sectors done)",
                sector,
                direction,
                cause,
                index,
                span.length
            );
            return Err(FlashError::SectorIo {
                sector,
                direction,
                completed: index,
            });
        }

        let done = index + 1;
        if done % PROGRESS_INTERVAL == 0 {
            log::info!("{} of {} sectors", done, span.length);
        }
    }

    Ok(Report {
        bytes: span.length * SECTOR_SIZE as u64,
        sectors: span.length,
        first_sector: span.offset,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendKind;
    use crate::testutil::{pattern_byte, MockBackend, RamImage};

    fn ready(backend: MockBackend) -> MockBackend {
        let mut b = backend;
        b.inits = 1;
        b
    }

    #[test]
    fn rejects_requests_past_the_end() {
        let mut dev = ready(MockBackend::new(BackendKind::SdCard, 100));
        let mut image = RamImage::sectors(16);

        let span = SectorSpan {
            offset: 90,
            length: 11,
        };
        assert_eq!(
            transfer(&mut dev, &mut image, span, Direction::Read),
            Err(FlashError::Bounds {
                requested: 101,
                available: 100
            })
        );
        assert_eq!(dev.reads, 0);

        let span = SectorSpan {
            offset: u64::MAX,
            length: 2,
        };
        assert!(matches!(
            transfer(&mut dev, &mut image, span, Direction::Write),
            Err(FlashError::Bounds { .. })
        ));
        assert!(dev.prepared.is_empty());

        // Exactly to the end is fine.
        let span = SectorSpan {
            offset: 90,
            length: 10,
        };
        assert!(transfer(&mut dev, &mut image, span, Direction::Read).is_ok());
    }

    #[test]
    fn zero_length_touches_nothing() {
        let mut dev = ready(MockBackend::new(BackendKind::NorFlash, 8));
        let mut image = RamImage::sectors(1);
        for offset in [0, 3, 8] {
            let span = SectorSpan { offset, length: 0 };
            for direction in [Direction::Read, Direction::Write] {
                let report = transfer(&mut dev, &mut image, span, direction).unwrap();
                assert_eq!(report.bytes, 0);
                assert_eq!(report.first_sector, offset);
            }
        }
        assert_eq!((dev.reads, dev.writes), (0, 0));
        assert!(dev.prepared.is_empty());
    }

    #[test]
    fn zero_length_past_the_end_is_still_out_of_bounds() {
        let mut dev = ready(MockBackend::new(BackendKind::NorFlash, 8));
        let mut image = RamImage::sectors(1);
        let span = SectorSpan {
            offset: 1_000_000,
            length: 0,
        };
        for direction in [Direction::Read, Direction::Write] {
            assert_eq!(
                transfer(&mut dev, &mut image, span, direction),
                Err(FlashError::Bounds {
                    requested: 1_000_000,
                    available: 8
                })
            );
        }
        assert_eq!((dev.reads, dev.writes), (0, 0));
        assert!(dev.prepared.is_empty());
    }

    #[test]
    fn read_survives_transient_failure() {
        let mut dev = ready(MockBackend::patterned(BackendKind::SdCard, 64));
        dev.fail_reads(21, MAX_SECTOR_ATTEMPTS - 1);
        let mut image = RamImage::sectors(32);

        let span = SectorSpan {
            offset: 16,
            length: 32,
        };
        let report = transfer(&mut dev, &mut image, span, Direction::Read).unwrap();
        assert_eq!(
            report,
            Report {
                bytes: 32 * 512,
                sectors: 32,
                first_sector: 16
            }
        );
        assert_eq!(image.bytes(), &dev.data[16 * 512..48 * 512]);
        assert_eq!(dev.reads, 32 + MAX_SECTOR_ATTEMPTS - 1);
    }

    #[test]
    fn write_retries_and_verifies() {
        let mut dev = ready(MockBackend::new(BackendKind::SdCard, 32));
        dev.fail_writes(5, 1);
        dev.corrupt_writes(6, 2);
        let mut image = RamImage::patterned(8);

        let span = SectorSpan {
            offset: 2,
            length: 8,
        };
        transfer(&mut dev, &mut image, span, Direction::Write).unwrap();
        assert_eq!(dev.prepared, vec![(2, 8)]);
        assert_eq!(&dev.data[2 * 512..10 * 512], image.bytes());
        // Outside the span nothing changed.
        assert!(dev.sector(1).iter().all(|&b| b == 0));
        assert!(dev.sector(10).iter().all(|&b| b == 0));
    }

    #[test]
    fn exhausted_retries_report_first_failure() {
        let mut dev = ready(MockBackend::new(BackendKind::Eeprom, 32));
        dev.fail_writes(9, MAX_SECTOR_ATTEMPTS);
        dev.fail_writes(12, MAX_SECTOR_ATTEMPTS);
        let mut image = RamImage::patterned(16);

        let span = SectorSpan {
            offset: 4,
            length: 16,
        };
        assert_eq!(
            transfer(&mut dev, &mut image, span, Direction::Write),
            Err(FlashError::SectorIo {
                sector: 9,
                direction: Direction::Write,
                completed: 5
            })
        );
        // Sectors before the failure are intact, after it untouched.
        assert_eq!(&dev.data[4 * 512..9 * 512], &image.bytes()[..5 * 512]);
        assert!(dev.sector(10).iter().all(|&b| b == 0));
    }

    #[test]
    fn exhausted_read_reports_sector() {
        let mut dev = ready(MockBackend::patterned(BackendKind::NorFlash, 8));
        dev.fail_reads(0, MAX_SECTOR_ATTEMPTS);
        let mut image = RamImage::sectors(8);
        let span = SectorSpan {
            offset: 0,
            length: 8,
        };
        assert_eq!(
            transfer(&mut dev, &mut image, span, Direction::Read),
            Err(FlashError::SectorIo {
                sector: 0,
                direction: Direction::Read,
                completed: 0
            })
        );
        assert_eq!(dev.reads, MAX_SECTOR_ATTEMPTS);
        assert_ne!(image.bytes()[1], pattern_byte(1));
    }
}
