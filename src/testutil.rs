// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host-side stand-ins for the clocks, buses and devices.

use std::cell::Cell;
use std::collections::{BTreeMap, VecDeque};

use crc_catalog::{CRC_16_XMODEM, CRC_7_MMC};

use crate::backend::{Backend, Sector, SECTOR_SIZE};
use crate::bus::{BusError, Cs, I2cHost, SpiHost};
use crate::clock::{ClockContext, CycleCounter, Delay, Timer};
use crate::error::{BackendKind, DeviceError};
use crate::transfer::ImageMemory;

/// Core cycles that pass on every timer read.
const CYCLES_PER_POLL: u64 = 61;

/// A core and reference clock pair that advance only when looked at.
pub struct SimClock {
    core_hz: u64,
    reference_hz: u32,
    cycles: Cell<u64>,
}

impl SimClock {
    pub fn new(core_hz: u64, reference_hz: u32) -> Self {
        Self {
            core_hz,
            reference_hz,
            cycles: Cell::new(0),
        }
    }

    pub fn context(&self) -> ClockContext {
        ClockContext {
            reference_hz: self.reference_hz,
            core_hz: self.core_hz,
        }
    }
}

impl Timer for SimClock {
    fn now(&self) -> u64 {
        let c = self.cycles.get() + CYCLES_PER_POLL;
        self.cycles.set(c);
        (u128::from(c) * u128::from(self.reference_hz) / u128::from(self.core_hz)) as u64
    }
}

impl CycleCounter for SimClock {
    fn cycles(&self) -> u64 {
        self.cycles.get()
    }
}

/// A reference clock that never ticks.
pub struct StoppedClock;

impl Timer for StoppedClock {
    fn now(&self) -> u64 {
        1234
    }
}

impl CycleCounter for StoppedClock {
    fn cycles(&self) -> u64 {
        0
    }
}

/// SD card in SPI mode, wired to chip select 0. Speaks just enough of the
/// protocol for `SdCard`: CRCs on, single-block reads and writes.
pub struct SdModel {
    present: bool,
    high_capacity: bool,
    data: Vec<u8>,
    selected: Option<u8>,
    configured: Option<(u8, u64)>,
    dummy_bytes: usize,
    dummy_before_cmd0: Option<usize>,
    frame: Vec<u8>,
    out: VecDeque<u8>,
    app: bool,
    op_cond_rounds: u32,
    ready: bool,
    write: Option<(u64, Vec<u8>)>,
    write_pending: Option<u64>,
    fail_writes: BTreeMap<u64, usize>,
    corrupt_reads: BTreeMap<u64, usize>,
}

const SD_CSID: u8 = 0;

impl SdModel {
    pub fn new(sectors: u64, high_capacity: bool) -> Self {
        assert_eq!(sectors % 1024, 0);
        Self {
            present: true,
            high_capacity,
            data: vec![0; sectors as usize * SECTOR_SIZE],
            selected: None,
            configured: None,
            dummy_bytes: 0,
            dummy_before_cmd0: None,
            frame: Vec::new(),
            out: VecDeque::new(),
            app: false,
            op_cond_rounds: 0,
            ready: false,
            write: None,
            write_pending: None,
            fail_writes: BTreeMap::new(),
            corrupt_reads: BTreeMap::new(),
        }
    }

    /// Empty slot: MISO floats high.
    pub fn absent() -> Self {
        let mut m = Self::new(1024, true);
        m.present = false;
        m
    }

    pub fn configured(&self) -> Option<(u8, u64)> {
        self.configured
    }

    pub fn dummy_clocks_before_cmd0(&self) -> usize {
        self.dummy_before_cmd0.unwrap_or(0)
    }

    pub fn sector(&self, n: u64) -> Sector {
        let start = n as usize * SECTOR_SIZE;
        self.data[start..start + SECTOR_SIZE].try_into().unwrap()
    }

    /// The next `count` writes to `sector` get a write-error data response.
    pub fn fail_writes(&mut self, sector: u64, count: usize) {
        self.fail_writes.insert(sector, count);
    }

    /// The next `count` reads of `sector` arrive with a bad CRC.
    pub fn corrupt_reads(&mut self, sector: u64, count: usize) {
        self.corrupt_reads.insert(sector, count);
    }

    fn sectors(&self) -> u64 {
        (self.data.len() / SECTOR_SIZE) as u64
    }

    fn card_selected(&self) -> bool {
        self.present && self.selected == Some(SD_CSID)
    }

    fn release(&mut self) {
        self.frame.clear();
        self.out.clear();
        self.write = None;
        self.write_pending = None;
    }

    fn r1(&self) -> u8 {
        if self.ready {
            0
        } else {
            0x01
        }
    }

    fn respond(&mut self, bytes: &[u8]) {
        // One byte of NCR.
        self.out.push_back(0xFF);
        self.out.extend(bytes.iter().copied());
    }

    fn data_block(&mut self, block: &[u8], corrupt: bool) {
        let crc = tinycrc::checksum(&CRC_16_XMODEM, block) as u16;
        self.out.push_back(0xFF);
        self.out.push_back(0xFE);
        let start = self.out.len();
        self.out.extend(block.iter().copied());
        if corrupt {
            self.out[start] ^= 0x01;
        }
        self.out.extend(crc.to_be_bytes());
    }

    fn csd(&self) -> [u8; 16] {
        let mut csd = [0u8; 16];
        if self.high_capacity {
            let c_size = self.sectors() / 1024 - 1;
            csd[0] = 0x40;
            csd[7] = (c_size >> 16) as u8 & 0x3F;
            csd[8] = (c_size >> 8) as u8;
            csd[9] = c_size as u8;
        } else {
            // READ_BL_LEN 9, C_SIZE_MULT 0: four sectors per C_SIZE unit.
            let c_size = self.sectors() / 4 - 1;
            csd[5] = 9;
            csd[6] = (c_size >> 10) as u8 & 0x03;
            csd[7] = (c_size >> 2) as u8;
            csd[8] = (c_size as u8 & 0x03) << 6;
        }
        csd
    }

    fn block_of(&self, arg: u32) -> Option<u64> {
        let sector = if self.high_capacity {
            u64::from(arg)
        } else {
            if arg % SECTOR_SIZE as u32 != 0 {
                return None;
            }
            u64::from(arg) / SECTOR_SIZE as u64
        };
        (sector < self.sectors()).then_some(sector)
    }

    fn command(&mut self, frame: &[u8]) {
        let index = frame[0] & 0x3F;
        let arg = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]);
        let crc = (tinycrc::checksum(&CRC_7_MMC, &frame[..5]) as u8) << 1 | 1;
        if crc != frame[5] {
            self.respond(&[self.r1() | 0x08]);
            return;
        }
        let app = core::mem::take(&mut self.app);
        match (app, index) {
            (_, 0) => {
                self.dummy_before_cmd0.get_or_insert(self.dummy_bytes);
                self.ready = false;
                self.op_cond_rounds = 0;
                self.respond(&[0x01]);
            }
            (_, 59) | (_, 16) => self.respond(&[self.r1()]),
            (_, 8) => {
                let r1 = self.r1();
                self.respond(&[r1, 0, 0, (arg >> 8) as u8 & 0x0F, arg as u8]);
            }
            (_, 55) => {
                self.app = true;
                self.respond(&[self.r1()]);
            }
            (true, 41) => {
                self.op_cond_rounds += 1;
                if self.op_cond_rounds >= 3 {
                    self.ready = true;
                }
                self.respond(&[self.r1()]);
            }
            (_, 58) => {
                let mut ocr0 = if self.ready { 0x80 } else { 0 };
                if self.high_capacity {
                    ocr0 |= 0x40;
                }
                let r1 = self.r1();
                self.respond(&[r1, ocr0, 0xFF, 0x80, 0x00]);
            }
            (_, 9) => {
                self.respond(&[self.r1()]);
                let csd = self.csd();
                self.data_block(&csd, false);
            }
            (_, 13) => self.respond(&[self.r1(), 0]),
            (_, 17) => match self.block_of(arg) {
                Some(sector) => {
                    self.respond(&[0]);
                    let corrupt = take_fault(&mut self.corrupt_reads, sector);
                    let start = sector as usize * SECTOR_SIZE;
                    let block = self.data[start..start + SECTOR_SIZE].to_vec();
                    self.data_block(&block, corrupt);
                }
                None => self.respond(&[0x40]),
            },
            (_, 24) => match self.block_of(arg) {
                Some(sector) => {
                    self.respond(&[0]);
                    self.write_pending = Some(sector);
                }
                None => self.respond(&[0x40]),
            },
            _ => self.respond(&[self.r1() | 0x04]),
        }
    }

    fn finish_write(&mut self, sector: u64, block: &[u8]) {
        let crc = u16::from_be_bytes([block[SECTOR_SIZE], block[SECTOR_SIZE + 1]]);
        let token = if take_fault(&mut self.fail_writes, sector) {
            0x0D
        } else if u32::from(crc) != tinycrc::checksum(&CRC_16_XMODEM, &block[..SECTOR_SIZE]) {
            0x0B
        } else {
            let start = sector as usize * SECTOR_SIZE;
            self.data[start..start + SECTOR_SIZE].copy_from_slice(&block[..SECTOR_SIZE]);
            0x05
        };
        self.out.push_back(0xE0 | token);
        if token == 0x05 {
            // Programming.
            self.out.extend([0x00; 4]);
        }
    }

    fn receive(&mut self, byte: u8) {
        if let Some((sector, mut block)) = self.write.take() {
            block.push(byte);
            if block.len() == SECTOR_SIZE + 2 {
                self.finish_write(sector, &block);
            } else {
                self.write = Some((sector, block));
            }
            return;
        }
        if let Some(sector) = self.write_pending {
            if byte == 0xFE {
                self.write_pending = None;
                self.write = Some((sector, Vec::with_capacity(SECTOR_SIZE + 2)));
            }
            return;
        }
        if self.frame.is_empty() && byte & 0xC0 != 0x40 {
            return;
        }
        self.frame.push(byte);
        if self.frame.len() == 6 {
            let frame = core::mem::take(&mut self.frame);
            self.out.clear();
            self.command(&frame);
        }
    }
}

fn take_fault(faults: &mut BTreeMap<u64, usize>, key: u64) -> bool {
    match faults.get_mut(&key) {
        Some(n) if *n > 0 => {
            *n -= 1;
            true
        }
        _ => false,
    }
}

impl SpiHost for SdModel {
    fn configure(&mut self, csid: u8, freq_hz: u64) -> Result<(), BusError> {
        self.configured = Some((csid, freq_hz));
        Ok(())
    }

    fn write(&mut self, data: &[u8], cs: Cs) -> Result<(), BusError> {
        self.selected = self.configured.map(|(csid, _)| csid);
        if self.card_selected() {
            for &b in data {
                self.receive(b);
            }
        } else if self.dummy_before_cmd0.is_none() {
            self.dummy_bytes += data.iter().filter(|&&b| b == 0xFF).count();
        }
        if cs == Cs::Release {
            self.release();
            self.selected = None;
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], cs: Cs) -> Result<(), BusError> {
        self.selected = self.configured.map(|(csid, _)| csid);
        for b in buf.iter_mut() {
            *b = if self.card_selected() {
                self.out.pop_front().unwrap_or(0xFF)
            } else {
                0xFF
            };
        }
        if cs == Cs::Release {
            self.release();
            self.selected = None;
        }
        Ok(())
    }
}

const NOR_SIZE: usize = 64 * 1024 * 1024;
const NOR_BLOCK: usize = 256 * 1024;

/// S25FS512S-like NOR flash: programming can only clear bits, erase sets a
/// whole 256 KiB block back to ones.
pub struct NorModel {
    id: [u8; 3],
    mem: Vec<u8>,
    configured: Option<(u8, u64)>,
    txn: Vec<u8>,
    read_pos: usize,
    wel: bool,
    busy: u32,
    error_bits: u8,
    fail_programs: usize,
    erased: Vec<u64>,
}

impl NorModel {
    pub fn new() -> Self {
        Self::with_id([0x01, 0x02, 0x20])
    }

    pub fn with_id(id: [u8; 3]) -> Self {
        Self {
            id,
            mem: vec![0xFF; NOR_SIZE],
            configured: None,
            txn: Vec::new(),
            read_pos: 0,
            wel: false,
            busy: 0,
            error_bits: 0,
            fail_programs: 0,
            erased: Vec::new(),
        }
    }

    pub fn configured(&self) -> Option<(u8, u64)> {
        self.configured
    }

    pub fn fill(&mut self, start: usize, len: usize, value: u8) {
        self.mem[start..start + len].fill(value);
    }

    pub fn erased_blocks(&self) -> &[u64] {
        &self.erased
    }

    pub fn fail_programs(&mut self, count: usize) {
        self.fail_programs = count;
    }

    fn output(&mut self) -> u8 {
        let pos = self.read_pos;
        self.read_pos += 1;
        match self.txn.first().copied() {
            Some(0x9F) => self.id.get(pos).copied().unwrap_or(0),
            Some(0x13) if self.txn.len() >= 5 => {
                self.mem[(nor_address(&self.txn) + pos) % NOR_SIZE]
            }
            Some(0x05) => {
                if self.busy > 0 {
                    self.busy -= 1;
                    0x01
                } else {
                    self.error_bits
                }
            }
            _ => 0xFF,
        }
    }

    fn end(&mut self) {
        let txn = core::mem::take(&mut self.txn);
        self.read_pos = 0;
        match txn.first().copied() {
            Some(0x06) => self.wel = true,
            Some(0x66) | Some(0x99) => {
                self.wel = false;
                self.error_bits = 0;
            }
            Some(0x12) if self.wel && txn.len() > 5 => {
                self.wel = false;
                self.busy = 3;
                if self.fail_programs > 0 {
                    self.fail_programs -= 1;
                    self.error_bits = 0x40;
                    return;
                }
                let addr = nor_address(&txn);
                let page = addr & !0xFF;
                for (i, &d) in txn[5..].iter().enumerate() {
                    self.mem[page | ((addr + i) & 0xFF)] &= d;
                }
            }
            Some(0xDC) if self.wel && txn.len() == 5 => {
                self.wel = false;
                self.busy = 5;
                let block = nor_address(&txn) / NOR_BLOCK;
                self.mem[block * NOR_BLOCK..(block + 1) * NOR_BLOCK].fill(0xFF);
                self.erased.push(block as u64);
            }
            _ => {}
        }
    }
}

fn nor_address(txn: &[u8]) -> usize {
    u32::from_be_bytes([txn[1], txn[2], txn[3], txn[4]]) as usize
}

impl SpiHost for NorModel {
    fn configure(&mut self, csid: u8, freq_hz: u64) -> Result<(), BusError> {
        self.configured = Some((csid, freq_hz));
        Ok(())
    }

    fn write(&mut self, data: &[u8], cs: Cs) -> Result<(), BusError> {
        self.txn.extend_from_slice(data);
        if cs == Cs::Release {
            self.end();
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], cs: Cs) -> Result<(), BusError> {
        for b in buf.iter_mut() {
            *b = self.output();
        }
        if cs == Cs::Release {
            self.end();
        }
        Ok(())
    }
}

const EEPROM_SIZE: usize = 128 * 1024;

/// 24FC1025-like EEPROM: 128-byte pages, two 64 KiB halves, and a write cycle
/// during which it doesn't acknowledge its address.
pub struct EepromModel {
    strap: u8,
    mem: Vec<u8>,
    pointer: usize,
    busy: u32,
    stall: bool,
    page_writes: usize,
    busy_nacks: usize,
}

impl EepromModel {
    pub fn new(strap: u8) -> Self {
        Self {
            strap,
            mem: vec![0xFF; EEPROM_SIZE],
            pointer: 0,
            busy: 0,
            stall: false,
            page_writes: 0,
            busy_nacks: 0,
        }
    }

    /// The write cycle never completes.
    pub fn stall_after_write(&mut self) {
        self.stall = true;
    }

    pub fn memory(&self) -> &[u8] {
        &self.mem
    }

    pub fn page_writes(&self) -> usize {
        self.page_writes
    }

    pub fn busy_nacks(&self) -> usize {
        self.busy_nacks
    }

    /// Decodes the target address, returning the selected half.
    fn select(&mut self, addr: u8) -> Result<usize, BusError> {
        if addr & !0x07 != 0x50 || addr & 0x03 != self.strap {
            return Err(BusError::Nack);
        }
        if self.busy > 0 {
            if !self.stall {
                self.busy -= 1;
            }
            self.busy_nacks += 1;
            return Err(BusError::Nack);
        }
        Ok(usize::from((addr >> 2) & 1))
    }

    fn set_pointer(&mut self, half: usize, data: &[u8]) {
        if data.len() >= 2 {
            self.pointer = half << 16 | usize::from(u16::from_be_bytes([data[0], data[1]]));
        }
    }
}

impl I2cHost for EepromModel {
    fn write(&mut self, addr: u8, data: &[u8]) -> Result<(), BusError> {
        let half = self.select(addr)?;
        self.set_pointer(half, data);
        if data.len() > 2 {
            let page = self.pointer & !0x7F;
            for (i, &d) in data[2..].iter().enumerate() {
                self.mem[page | ((self.pointer + i) & 0x7F)] = d;
            }
            self.page_writes += 1;
            self.busy = 3;
        }
        Ok(())
    }

    fn write_read(&mut self, addr: u8, data: &[u8], buf: &mut [u8]) -> Result<(), BusError> {
        let half = self.select(addr)?;
        self.set_pointer(half, data);
        for b in buf.iter_mut() {
            *b = self.mem[self.pointer];
            self.pointer = (self.pointer & 0x1_0000) | ((self.pointer + 1) & 0xFFFF);
        }
        Ok(())
    }
}

/// In-memory backend with fault injection.
pub struct MockBackend {
    pub kind: BackendKind,
    pub frequency: Option<u64>,
    pub settle_us: Option<u32>,
    pub data: Vec<u8>,
    pub inits: usize,
    pub init_error: Option<DeviceError>,
    pub prepared: Vec<(u64, u64)>,
    pub reads: usize,
    pub writes: usize,
    read_faults: BTreeMap<u64, usize>,
    write_faults: BTreeMap<u64, usize>,
    /// Writes that report success but store damaged data.
    silent_corruption: BTreeMap<u64, usize>,
}

impl MockBackend {
    pub fn new(kind: BackendKind, sectors: u64) -> Self {
        Self {
            kind,
            frequency: None,
            settle_us: None,
            data: vec![0; sectors as usize * SECTOR_SIZE],
            inits: 0,
            init_error: None,
            prepared: Vec::new(),
            reads: 0,
            writes: 0,
            read_faults: BTreeMap::new(),
            write_faults: BTreeMap::new(),
            silent_corruption: BTreeMap::new(),
        }
    }

    /// Fills every sector with a pattern derived from its index.
    pub fn patterned(kind: BackendKind, sectors: u64) -> Self {
        let mut m = Self::new(kind, sectors);
        for (i, b) in m.data.iter_mut().enumerate() {
            *b = pattern_byte(i);
        }
        m
    }

    pub fn fail_reads(&mut self, sector: u64, count: usize) {
        self.read_faults.insert(sector, count);
    }

    pub fn fail_writes(&mut self, sector: u64, count: usize) {
        self.write_faults.insert(sector, count);
    }

    pub fn corrupt_writes(&mut self, sector: u64, count: usize) {
        self.silent_corruption.insert(sector, count);
    }

    pub fn sector(&self, n: u64) -> &[u8] {
        let start = n as usize * SECTOR_SIZE;
        &self.data[start..start + SECTOR_SIZE]
    }

    pub fn sector_mut(&mut self, n: u64) -> &mut [u8] {
        let start = n as usize * SECTOR_SIZE;
        &mut self.data[start..start + SECTOR_SIZE]
    }
}

/// Recognizable, position-dependent filler.
pub fn pattern_byte(i: usize) -> u8 {
    ((i / SECTOR_SIZE) as u8).wrapping_mul(31) ^ (i as u8)
}

impl Backend for MockBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn bus_frequency(&self) -> Option<u64> {
        self.frequency
    }

    fn settle_delay_us(&self) -> Option<u32> {
        self.settle_us
    }

    fn init(&mut self, _delay: &Delay<'_>) -> Result<(), DeviceError> {
        self.inits += 1;
        match self.init_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn capacity_sectors(&self) -> u64 {
        (self.data.len() / SECTOR_SIZE) as u64
    }

    fn prepare_write(&mut self, first: u64, count: u64) -> Result<(), (u64, DeviceError)> {
        self.prepared.push((first, count));
        Ok(())
    }

    fn read_sector(&mut self, sector: u64, buf: &mut Sector) -> Result<(), DeviceError> {
        assert!(self.inits > 0, "read before init");
        self.reads += 1;
        if take_fault(&mut self.read_faults, sector) {
            return Err(DeviceError::Crc);
        }
        buf.copy_from_slice(self.sector(sector));
        Ok(())
    }

    fn write_sector(&mut self, sector: u64, buf: &Sector) -> Result<(), DeviceError> {
        assert!(self.inits > 0, "write before init");
        self.writes += 1;
        if take_fault(&mut self.write_faults, sector) {
            // A failed write may leave garbage behind.
            self.sector_mut(sector).fill(0xEE);
            return Err(DeviceError::Rejected(0x0D));
        }
        let corrupt = take_fault(&mut self.silent_corruption, sector);
        let dst = self.sector_mut(sector);
        dst.copy_from_slice(buf);
        if corrupt {
            dst[17] ^= 0x80;
        }
        Ok(())
    }
}

/// Image memory backed by a host buffer.
pub struct RamImage {
    data: Vec<u8>,
}

impl RamImage {
    pub fn sectors(n: usize) -> Self {
        Self {
            data: vec![0; n * SECTOR_SIZE],
        }
    }

    pub fn patterned(n: usize) -> Self {
        let mut image = Self::sectors(n);
        for (i, b) in image.data.iter_mut().enumerate() {
            *b = pattern_byte(i) ^ 0x3C;
        }
        image
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }
}

impl ImageMemory for RamImage {
    fn load(&self, index: u64, buf: &mut Sector) {
        let start = index as usize * SECTOR_SIZE;
        buf.copy_from_slice(&self.data[start..start + SECTOR_SIZE]);
    }

    fn store(&mut self, index: u64, buf: &Sector) {
        let start = index as usize * SECTOR_SIZE;
        self.data[start..start + SECTOR_SIZE].copy_from_slice(buf);
    }
}
