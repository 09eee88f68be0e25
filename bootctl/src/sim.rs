//! The built-in backend: a whole bootloader node running in-process, so
//! `bootctl` has something to talk to without any bus hardware attached.
//! Mirrors the fixtures `canboot`'s own integration tests build (see
//! `canboot::mainloop`'s test module), just packaged as a [`CanInterface`]
//! instead of driven directly by a test function.

use std::collections::VecDeque;
use std::convert::Infallible;

use canboot::config::Config;
use canboot::mainloop::MainLoop;
use canboot::target::{SimTarget, TargetLayout};
use canboot_hal::sim::{SimCan, SimClock, SimFlash, SimIndicator, SimReboot};
use canboot_hal::{BusFrame, CanInterface};

type EmbeddedLoop = MainLoop<'static, SimClock, SimCan, SimFlash, SimTarget, SimReboot, SimIndicator>;

/// Leaks a zeroed buffer of `len` bytes to get a `'static` slice - the
/// embedded node's buffers need to outlive the [`MainLoop`] that borrows
/// them, and this process never outlives the command it was invoked for,
/// so the leak is bounded by one CLI invocation.
fn leaked_buf(len: usize) -> &'static mut [u8] {
    Box::leak(vec![0u8; len].into_boxed_slice())
}

pub struct SimBackend {
    main_loop: EmbeddedLoop,
    pending_replies: VecDeque<BusFrame>,
}

impl SimBackend {
    pub fn new(node_id: u8, name: &str, device_class: &str) -> Self {
        let flash = SimFlash::new(SimTarget::FLASH_BEGIN, (SimTarget::FLASH_END - SimTarget::FLASH_BEGIN) as usize);
        let config = Config::defaults(node_id, name, device_class);
        let mut main_loop = MainLoop::new(
            SimClock::new(),
            SimCan::new(),
            SimIndicator::default(),
            SimReboot::new(None),
            config,
            flash,
            leaked_buf(4096),
            leaked_buf(4096),
            leaked_buf(SimTarget::PAGE_SIZE),
            leaked_buf(SimTarget::PAGE_SIZE),
        );
        // A CLI invocation drives the loop directly, frame by frame; there
        // is no grace period to race against.
        main_loop.disable_boot_timeout();
        SimBackend {
            main_loop,
            pending_replies: VecDeque::new(),
        }
    }
}

impl CanInterface for SimBackend {
    type Error = Infallible;

    fn send_frame(&mut self, id: u16, data: &[u8], _retries: u8) -> Result<(), Self::Error> {
        self.main_loop.bus_mut().push_host_frame(BusFrame::new(id, data));
        self.main_loop.clock_mut().advance(1);
        self.main_loop.poll_once();
        self.pending_replies.extend(self.main_loop.bus_mut().take_replies());
        Ok(())
    }

    fn recv_frame(&mut self) -> Option<BusFrame> {
        self.pending_replies.pop_front()
    }
}
