//! The flash writer façade (spec.md section 4.6): wraps a board's raw
//! [`FlashInterface`] with the erase-before-write bookkeeping the
//! original `flash_writer.h` leaves to its caller - per-sector erase
//! memoization so repeated small writes into one sector don't re-erase
//! it, an erase-verify pass before programming, and an address-range
//! guard against the application region.
//!
//! Flash sector size is assumed equal to [`TargetLayout::PAGE_SIZE`]
//! everywhere in this crate, the same assumption the config store makes
//! for its own pages (see `target.rs`).

use canboot_hal::FlashInterface;

use crate::crc::crc32;
use crate::target::TargetLayout;
use crate::{CanbootError, Result};

/// How many distinct sectors this session remembers as already erased.
/// Small and fixed because a field update typically touches one or two
/// sectors in a row; once the memo table is full the facade just starts
/// erasing again, which is always correct, only slower.
const MEMO_CAPACITY: usize = 8;

/// A chunk size used for the streaming erase-verify and CRC passes, so
/// neither needs a buffer as large as the region it's checking.
const CHUNK: usize = 64;

pub struct FlashWriter<F, T> {
    flash: F,
    erased_sectors: [Option<u32>; MEMO_CAPACITY],
    _target: core::marker::PhantomData<T>,
}

impl<F: FlashInterface, T: TargetLayout> FlashWriter<F, T> {
    pub fn new(flash: F) -> Self {
        FlashWriter {
            flash,
            erased_sectors: [None; MEMO_CAPACITY],
            _target: core::marker::PhantomData,
        }
    }

    pub fn inner(&self) -> &F {
        &self.flash
    }

    pub fn inner_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    fn sector_base(addr: u32) -> u32 {
        addr - (addr % T::PAGE_SIZE as u32)
    }

    fn in_app_region(addr: u32, end_exclusive: u32) -> bool {
        addr >= T::APP_ADDR && end_exclusive <= T::APP_END
    }

    fn remember_erased(&mut self, sector: u32) {
        if self.erased_sectors.iter().any(|s| *s == Some(sector)) {
            return;
        }
        if let Some(slot) = self.erased_sectors.iter_mut().find(|s| s.is_none()) {
            *slot = Some(sector);
        } else {
            // Memo table full: forget the oldest entry rather than grow
            // unbounded. Correct either way, just costs a redundant
            // erase next time that sector comes up.
            self.erased_sectors.rotate_left(1);
            *self.erased_sectors.last_mut().unwrap() = Some(sector);
        }
    }

    fn already_erased(&self, sector: u32) -> bool {
        self.erased_sectors.iter().any(|s| *s == Some(sector))
    }

    fn forget_sector(&mut self, sector: u32) {
        for slot in self.erased_sectors.iter_mut() {
            if *slot == Some(sector) {
                *slot = None;
            }
        }
    }

    /// Erases the sector containing `addr`, skipping the hardware erase
    /// if this session already erased that sector and nothing has been
    /// written to it since.
    pub fn erase_page(&mut self, addr: u32) -> Result<()> {
        if addr < T::APP_ADDR || addr >= T::APP_END {
            return Err(CanbootError::AddressOutOfRange);
        }
        let sector = Self::sector_base(addr);
        if self.already_erased(sector) {
            return Ok(());
        }
        self.flash.unlock();
        let result = self.flash.page_erase(sector);
        self.flash.lock();
        result.map_err(|_| CanbootError::FlashFailure)?;
        if !self.sector_reads_as_erased(sector) {
            return Err(CanbootError::FlashFailure);
        }
        self.remember_erased(sector);
        Ok(())
    }

    fn sector_reads_as_erased(&self, sector: u32) -> bool {
        let mut chunk = [0u8; CHUNK];
        let mut offset = 0u32;
        while (offset as usize) < T::PAGE_SIZE {
            let len = CHUNK.min(T::PAGE_SIZE - offset as usize);
            self.flash.read(sector + offset, &mut chunk[..len]);
            if chunk[..len].iter().any(|&b| b != 0xFF) {
                return false;
            }
            offset += len as u32;
        }
        true
    }

    /// Programs `data` at `addr`, first verifying the target range reads
    /// as erased (spec.md invariant: a write never silently corrupts a
    /// non-erased range).
    pub fn program(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        let end = addr.checked_add(data.len() as u32).ok_or(CanbootError::AddressOutOfRange)?;
        if !Self::in_app_region(addr, end) {
            return Err(CanbootError::AddressOutOfRange);
        }
        if !self.range_reads_as_erased(addr, data.len()) {
            return Err(CanbootError::NotErased);
        }
        self.flash.unlock();
        let result = self.flash.page_program(addr, data);
        self.flash.lock();
        result.map_err(|_| CanbootError::FlashFailure)?;
        self.forget_sector(Self::sector_base(addr));
        Ok(())
    }

    fn range_reads_as_erased(&self, addr: u32, len: usize) -> bool {
        let mut chunk = [0u8; CHUNK];
        let mut offset = 0usize;
        while offset < len {
            let n = CHUNK.min(len - offset);
            self.flash.read(addr + offset as u32, &mut chunk[..n]);
            if chunk[..n].iter().any(|&b| b != 0xFF) {
                return false;
            }
            offset += n;
        }
        true
    }
}

/// Streams a CRC-32 over `len` bytes of flash starting at `addr` without
/// materializing the whole range, used by both `CRC_REGION` and the
/// jump-to-application integrity check.
pub fn crc_region<F: FlashInterface>(flash: &F, addr: u32, len: u32) -> u32 {
    let mut chunk = [0u8; CHUNK];
    let mut crc = 0u32;
    let mut offset = 0u32;
    while offset < len {
        let n = CHUNK.min((len - offset) as usize);
        flash.read(addr + offset, &mut chunk[..n]);
        crc = crc32(crc, &chunk[..n]);
        offset += n as u32;
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::SimTarget;
    use canboot_hal::sim::SimFlash;

    fn writer() -> FlashWriter<SimFlash, SimTarget> {
        let flash = SimFlash::new(SimTarget::FLASH_BEGIN, (SimTarget::FLASH_END - SimTarget::FLASH_BEGIN) as usize);
        FlashWriter::new(flash)
    }

    #[test]
    fn erase_then_program_round_trips() {
        let mut w = writer();
        w.erase_page(SimTarget::APP_ADDR).unwrap();
        w.program(SimTarget::APP_ADDR, b"hello").unwrap();
        let mut out = [0u8; 5];
        w.inner().read(SimTarget::APP_ADDR, &mut out);
        assert_eq!(&out, b"hello");
    }

    #[test]
    fn program_without_erase_fails_not_erased() {
        let mut w = writer();
        w.erase_page(SimTarget::APP_ADDR).unwrap();
        w.program(SimTarget::APP_ADDR, b"first").unwrap();
        let err = w.program(SimTarget::APP_ADDR, b"second").unwrap_err();
        assert_eq!(err, CanbootError::NotErased);
    }

    #[test]
    fn erase_rejects_addresses_before_the_application_region() {
        let mut w = writer();
        let err = w.erase_page(SimTarget::CONFIG1_ADDR).unwrap_err();
        assert_eq!(err, CanbootError::AddressOutOfRange);
    }

    #[test]
    fn repeated_erase_of_same_sector_is_memoized() {
        let mut w = writer();
        w.erase_page(SimTarget::APP_ADDR).unwrap();
        w.program(SimTarget::APP_ADDR + 1, &[0u8; 4]).unwrap();
        // Erasing again before any write would be a correctness bug if it
        // skipped hardware erase while stale bytes remained, so instead
        // assert the memoized path still leaves the sector erased: after
        // a second erase_page call the sector must read back clean.
        w.erase_page(SimTarget::APP_ADDR).unwrap();
        let sector = SimTarget::APP_ADDR - (SimTarget::APP_ADDR % SimTarget::PAGE_SIZE as u32);
        assert!(w.sector_reads_as_erased(sector));
    }

    #[test]
    fn crc_region_streams_without_a_whole_range_buffer() {
        let mut w = writer();
        w.erase_page(SimTarget::APP_ADDR).unwrap();
        w.program(SimTarget::APP_ADDR, b"0123456789").unwrap();
        let crc = crc_region(w.inner(), SimTarget::APP_ADDR, 10);
        assert_eq!(crc, crate::crc::crc32(0, b"0123456789"));
    }
}
