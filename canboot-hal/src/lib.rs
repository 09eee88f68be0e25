#![cfg_attr(not(any(test, feature = "sim")), no_std)]
#![allow(clippy::upper_case_acronyms)]

//! Collaborator traits for the devices `canboot` treats as out-of-scope:
//! the bus driver, the flash controller, the monotonic clock, the status
//! LEDs and the warm-reset argument channel. A board crate implements
//! these against its own peripherals; `canboot` only ever talks to the
//! trait objects.
//!
//! [`sim`] is an in-memory stand-in for all five, used by `canboot`'s own
//! integration tests and by `bootctl` as its default backend.

#[cfg(feature = "sim")]
pub mod sim;

/// Bit of a bus identifier that marks the first frame of a datagram.
///
/// Cleared on every continuation frame of the same datagram.
pub const ID_START_MASK: u16 = 0x100;

/// One frame on the bus: an 11-bit identifier and 0..=8 payload bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusFrame {
    pub id: u16,
    pub dlc: u8,
    pub data: [u8; 8],
}

impl Default for BusFrame {
    fn default() -> Self {
        BusFrame {
            id: 0,
            dlc: 0,
            data: [0; 8],
        }
    }
}

impl BusFrame {
    pub fn new(id: u16, data: &[u8]) -> Self {
        debug_assert!(data.len() <= 8);
        let mut buf = [0u8; 8];
        let dlc = data.len().min(8);
        buf[..dlc].copy_from_slice(&data[..dlc]);
        BusFrame {
            id,
            dlc: dlc as u8,
            data: buf,
        }
    }

    /// The identifier with the start bit cleared - the source/destination
    /// address this frame carries, independent of its position in the
    /// datagram.
    pub fn address(&self) -> u16 {
        self.id & !ID_START_MASK
    }

    pub fn is_start(&self) -> bool {
        self.id & ID_START_MASK != 0
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[..self.dlc as usize]
    }
}

/// The bus driver: frame send/receive primitives. Send carries its own
/// bounded retry budget, per spec.md section 5.
pub trait CanInterface {
    type Error: core::fmt::Debug;

    /// Sends one frame, retrying internally up to `retries` times on a
    /// transient bus failure.
    fn send_frame(&mut self, id: u16, data: &[u8], retries: u8) -> Result<(), Self::Error>;

    /// Polls for the next received frame, if any is pending.
    fn recv_frame(&mut self) -> Option<BusFrame>;
}

/// The platform flash controller: raw erase/program/read primitives,
/// unlock-bracketed as required by the hardware.
pub trait FlashInterface {
    type Error: core::fmt::Debug;

    fn unlock(&mut self);
    fn lock(&mut self);

    /// Erases the page containing `addr`. `addr` is a page-aligned base.
    fn page_erase(&mut self, addr: u32) -> Result<(), Self::Error>;

    /// Programs `data` starting at `addr`. The caller guarantees the
    /// target range already reads as erased.
    fn page_program(&mut self, addr: u32, data: &[u8]) -> Result<(), Self::Error>;

    fn read(&self, addr: u32, buf: &mut [u8]);
}

/// A monotonic millisecond clock, the only time source the protocol
/// engine and its timers use.
pub trait Clock {
    fn now_ms(&self) -> u32;
}

/// The two status indicators driven by the main loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Led {
    Success,
    Error,
}

pub trait Indicator {
    fn set(&mut self, led: Led, on: bool);
}

/// Argument passed to the bootloader across a warm reset, carried in a
/// reserved RAM location behind the magic word the platform defines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RebootArg {
    StartApplication = 0,
    StartBootloader = 1,
    StartBootloaderNoTimeout = 2,
    /// Delegate to a vendor ROM bootloader, where the platform has one.
    StartStBootloader = 3,
}

/// The reboot-with-argument boundary: write the argument behind the
/// platform's magic and reset, or - on the entry side - read back
/// whatever argument the previous boot left.
pub trait Reboot {
    /// Resets the device, arranging for `arg` to be readable via
    /// [`Reboot::take_boot_argument`] after the reset completes.
    fn reboot_with_argument(&mut self, arg: RebootArg) -> !;

    /// Consumes the argument left by the previous reset, if the magic
    /// was present and valid. Returns `None` on a cold boot.
    fn take_boot_argument(&mut self) -> Option<RebootArg>;
}
