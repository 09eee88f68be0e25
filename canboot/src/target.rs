//! Flash geometry for the running target, generalized from the
//! teacher's per-board `#[cfg(feature = "mcu")]` constants module into a
//! trait so a board crate supplies its own memory map without needing a
//! `canboot` feature per board.

/// The flash layout a board must describe: where the application lives,
/// where the two config copies live, and the page/sector sizes the
/// flash façade erases and verifies against.
pub trait TargetLayout {
    /// First address of the application region (inclusive).
    const APP_ADDR: u32;
    /// First address past the application region (exclusive).
    const APP_END: u32;
    /// Page-aligned base address of the first config copy.
    const CONFIG1_ADDR: u32;
    /// Page-aligned base address of the second config copy.
    const CONFIG2_ADDR: u32;
    /// Size in bytes of one config page (and of one flash sector, since
    /// a config copy occupies exactly one sector).
    const PAGE_SIZE: usize;
    /// First address of the flash memory region as a whole, used to
    /// bound-check `CRC_REGION` requests.
    const FLASH_BEGIN: u32;
    /// First address past the flash memory region.
    const FLASH_END: u32;
}

/// A small in-memory target used by tests and by `bootctl`'s simulated
/// backend: a 256 KiB flash with a 4 KiB page size and the application
/// region occupying everything after the two config pages.
#[derive(Debug, Clone, Copy)]
pub struct SimTarget;

impl TargetLayout for SimTarget {
    const APP_ADDR: u32 = 0x0000_2000;
    const APP_END: u32 = 0x0004_0000;
    const CONFIG1_ADDR: u32 = 0x0000_0000;
    const CONFIG2_ADDR: u32 = 0x0000_1000;
    const PAGE_SIZE: usize = 0x1000;
    const FLASH_BEGIN: u32 = 0x0000_0000;
    const FLASH_END: u32 = 0x0004_0000;
}
