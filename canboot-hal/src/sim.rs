//! An in-memory stand-in for the bus, flash, clock, LEDs and reboot
//! channel, mirroring the original project's `platform/dummy` target.
//! Used by `canboot`'s integration tests and as `bootctl`'s default
//! backend when no real bus is attached.

extern crate std;

use std::collections::VecDeque;
use std::vec::Vec;

use crate::{BusFrame, CanInterface, Clock, FlashInterface, Indicator, Led, Reboot, RebootArg};

/// A loopback bus: frames pushed in via [`SimCan::push_host_frame`] are
/// what `recv_frame` yields; frames the node sends land in an outbound
/// queue a test driver drains with [`SimCan::take_replies`].
#[derive(Debug, Default)]
pub struct SimCan {
    inbound: VecDeque<BusFrame>,
    outbound: VecDeque<BusFrame>,
}

impl SimCan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_host_frame(&mut self, frame: BusFrame) {
        self.inbound.push_back(frame);
    }

    pub fn take_replies(&mut self) -> Vec<BusFrame> {
        self.outbound.drain(..).collect()
    }

    pub fn has_pending_frames(&self) -> bool {
        !self.inbound.is_empty()
    }
}

impl CanInterface for SimCan {
    type Error = core::convert::Infallible;

    fn send_frame(&mut self, id: u16, data: &[u8], _retries: u8) -> Result<(), Self::Error> {
        self.outbound.push_back(BusFrame::new(id, data));
        Ok(())
    }

    fn recv_frame(&mut self) -> Option<BusFrame> {
        self.inbound.pop_front()
    }
}

/// A byte-addressable flash region backed by a `Vec<u8>`, initialized to
/// the erased state (`0xFF`).
#[derive(Debug)]
pub struct SimFlash {
    base: u32,
    bytes: Vec<u8>,
    unlocked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimFlashError {
    Locked,
    OutOfRange,
}

impl SimFlash {
    pub fn new(base: u32, len: usize) -> Self {
        SimFlash {
            base,
            bytes: std::vec![0xFFu8; len],
            unlocked: false,
        }
    }

    fn offset(&self, addr: u32) -> Option<usize> {
        let off = addr.checked_sub(self.base)?;
        let off = off as usize;
        (off <= self.bytes.len()).then_some(off)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}

impl FlashInterface for SimFlash {
    type Error = SimFlashError;

    fn unlock(&mut self) {
        self.unlocked = true;
    }

    fn lock(&mut self) {
        self.unlocked = false;
    }

    fn page_erase(&mut self, addr: u32) -> Result<(), Self::Error> {
        if !self.unlocked {
            return Err(SimFlashError::Locked);
        }
        let off = self.offset(addr).ok_or(SimFlashError::OutOfRange)?;
        let end = (off + 4096).min(self.bytes.len());
        self.bytes[off..end].fill(0xFF);
        Ok(())
    }

    fn page_program(&mut self, addr: u32, data: &[u8]) -> Result<(), Self::Error> {
        if !self.unlocked {
            return Err(SimFlashError::Locked);
        }
        let off = self.offset(addr).ok_or(SimFlashError::OutOfRange)?;
        let end = off + data.len();
        if end > self.bytes.len() {
            return Err(SimFlashError::OutOfRange);
        }
        self.bytes[off..end].copy_from_slice(data);
        Ok(())
    }

    fn read(&self, addr: u32, buf: &mut [u8]) {
        let off = self.offset(addr).expect("sim flash read out of range");
        buf.copy_from_slice(&self.bytes[off..off + buf.len()]);
    }
}

/// A manually-advanced millisecond clock.
#[derive(Debug, Default)]
pub struct SimClock {
    now: u32,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&mut self, ms: u32) {
        self.now = self.now.wrapping_add(ms);
    }
}

impl Clock for SimClock {
    fn now_ms(&self) -> u32 {
        self.now
    }
}

/// Records the last-set state of each LED instead of driving a GPIO.
#[derive(Debug, Default)]
pub struct SimIndicator {
    pub success: bool,
    pub error: bool,
}

impl Indicator for SimIndicator {
    fn set(&mut self, led: Led, on: bool) {
        match led {
            Led::Success => self.success = on,
            Led::Error => self.error = on,
        }
    }
}

/// Records reboot calls instead of resetting the process; a seeded
/// argument is handed back once by [`Reboot::take_boot_argument`].
#[derive(Debug, Default)]
pub struct SimReboot {
    pub last_argument: Option<RebootArg>,
    seeded_argument: Option<RebootArg>,
}

impl SimReboot {
    pub fn new(seeded_argument: Option<RebootArg>) -> Self {
        SimReboot {
            last_argument: None,
            seeded_argument,
        }
    }
}

impl Reboot for SimReboot {
    fn reboot_with_argument(&mut self, arg: RebootArg) -> ! {
        self.last_argument = Some(arg);
        panic!("sim reboot requested with {:?} (test harness, not a real reset)", arg);
    }

    fn take_boot_argument(&mut self) -> Option<RebootArg> {
        self.seeded_argument.take()
    }
}
