//! The top-level event loop (spec.md section 4.8): pumps frames off the
//! bus, feeds them through the datagram reassembler, dispatches complete
//! datagrams addressed to this node, and answers a reassembly timeout or
//! a failed CRC the same way a successful dispatch answers a command -
//! with a short reply the host can always read back. Grounded in the
//! original `bootloader.c`'s main loop, generalized over the HAL traits
//! instead of one board's globals.

use canboot_hal::{BusFrame, CanInterface, Clock, Indicator, Led, Reboot, ID_START_MASK};

use crate::commands::{jump_decision, HandlerCtx};
use crate::config::{Config, ConfigStore};
use crate::datagram::{Framer, Reassembler};
use crate::dispatch::dispatch;
use crate::flash::FlashWriter;
use crate::target::TargetLayout;
use crate::timers::{BootTimer, DatagramTimer};
use crate::wire::WireError;

/// How many times a frame send is retried on a transient bus failure
/// before the loop gives up on that frame and moves on, mirroring the
/// original `return_datagram`'s bounded retry budget.
const MAX_SEND_RETRIES: u8 = 100;

pub struct MainLoop<'a, C, Bus, F, T, R, I>
where
    C: Clock,
    Bus: CanInterface,
    F: canboot_hal::FlashInterface,
    T: TargetLayout,
    R: Reboot,
    I: Indicator,
{
    clock: C,
    bus: Bus,
    indicator: I,
    reboot: R,
    config: Config,
    config_store: ConfigStore<T>,
    flash: FlashWriter<F, T>,
    boot_timer: BootTimer,
    datagram_timer: DatagramTimer,
    reassembler: Reassembler<'a>,
    reply_buf: &'a mut [u8],
    page_buf: &'a mut [u8],
    scratch: &'a mut [u8],
    status: u8,
    /// Address (with the start bit stripped) of whoever sent the
    /// datagram currently being reassembled or just completed, used as
    /// the destination of whatever reply that datagram earns.
    reply_dest: u8,
}

impl<'a, C, Bus, F, T, R, I> MainLoop<'a, C, Bus, F, T, R, I>
where
    C: Clock,
    Bus: CanInterface,
    F: canboot_hal::FlashInterface,
    T: TargetLayout,
    R: Reboot,
    I: Indicator,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        clock: C,
        bus: Bus,
        indicator: I,
        reboot: R,
        config: Config,
        flash: F,
        datagram_buf: &'a mut [u8],
        reply_buf: &'a mut [u8],
        page_buf: &'a mut [u8],
        scratch: &'a mut [u8],
    ) -> Self {
        let mut boot_timer = BootTimer::new();
        boot_timer.start(&clock);
        MainLoop {
            clock,
            bus,
            indicator,
            reboot,
            config,
            config_store: ConfigStore::new(),
            flash: FlashWriter::new(flash),
            boot_timer,
            datagram_timer: DatagramTimer::new(),
            reassembler: Reassembler::new(datagram_buf),
            reply_buf,
            page_buf,
            scratch,
            status: WireError::Unspecified.code() as u8,
            reply_dest: 0,
        }
    }

    /// Gives a host-side driver (`bootctl`'s simulated backend, or a test)
    /// access to the same bus the loop itself reads and writes, so it can
    /// feed in request frames and drain replies between polls.
    pub fn bus_mut(&mut self) -> &mut Bus {
        &mut self.bus
    }

    /// Lets a driver that owns the clock advance it between polls -
    /// `bootctl`'s simulated backend uses this to fast-forward past the
    /// datagram assembly timeout the same way the unit tests do.
    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }

    /// Disables the grace timer - used when startup already decided
    /// (via [`crate::boot::decide`]) that the application's CRC didn't
    /// check out and the node should stay in the bootloader
    /// indefinitely.
    pub fn disable_boot_timeout(&mut self) {
        self.boot_timer.disable();
    }

    /// One iteration pulling frames directly off the bus. Boards that
    /// feed frames through a [`crate::frame::FrameFifo`] instead should
    /// call [`MainLoop::poll_fifo`] in a loop and never call this.
    pub fn poll_once(&mut self) {
        self.check_timers();
        if let Some(frame) = self.bus.recv_frame() {
            self.handle_frame(frame);
        }
    }

    #[cfg(feature = "fifo")]
    pub fn poll_fifo<const N: usize>(&mut self, fifo: &crate::frame::FrameFifo<N>) {
        self.check_timers();
        if let Some(frame) = fifo.pop() {
            self.handle_frame(frame);
        }
    }

    fn check_timers(&mut self) {
        if self.boot_timer.is_enabled() && self.boot_timer.expired(&self.clock) {
            let arg = jump_decision::<F, T>(self.flash.inner(), &self.config);
            self.reboot.reboot_with_argument(arg);
        }
        if self.datagram_timer.is_running() && self.datagram_timer.expired(&self.clock) {
            self.datagram_timer.stop();
            self.status = WireError::DatagramTimeout.code() as u8;
            self.indicator.set(Led::Error, true);
            self.send_error_reply(WireError::DatagramTimeout);
        }
    }

    fn handle_frame(&mut self, frame: BusFrame) {
        let address = (frame.address() & 0xFF) as u8;
        if address != 0 && address != self.config.id {
            return; // not broadcast, not addressed to this node: ignore
        }

        self.datagram_timer.restart(&self.clock);

        if frame.is_start() {
            self.reassembler.start();
            self.reply_dest = address;
        }
        for &byte in frame.payload() {
            self.reassembler.input_byte(byte);
        }

        if !self.reassembler.is_complete() {
            return;
        }
        self.datagram_timer.stop();

        if !self.reassembler.is_valid() {
            self.status = WireError::CorruptDatagram.code() as u8;
            self.indicator.set(Led::Error, true);
            self.send_error_reply(WireError::CorruptDatagram);
            return;
        }

        if !self.reassembler.addressed_to(self.config.id) {
            return; // valid datagram, just not meant for us
        }

        self.boot_timer.disable();

        let reply_len = {
            let mut ctx = HandlerCtx {
                config: &mut self.config,
                flash: &mut self.flash,
                reboot: &mut self.reboot,
                config_store: &self.config_store,
                status: &mut self.status,
                page_buf: self.page_buf,
                scratch: self.scratch,
            };
            dispatch::<F, T, R>(self.reassembler.payload(), self.reply_buf, &mut ctx)
        };
        self.status = WireError::Success.code() as u8;
        self.indicator.set(Led::Error, false);
        self.indicator.set(Led::Success, true);
        self.send_reply(&self.reply_buf[..reply_len]);
    }

    fn send_error_reply(&mut self, code: WireError) {
        let mut buf = [0u8; 4];
        let n = {
            let mut w = crate::codec::Writer::new(&mut buf);
            let _ = w.write_u32(code.code());
            w.position()
        };
        self.send_reply(&buf[..n]);
    }

    fn send_reply(&mut self, payload: &[u8]) {
        let mut framer = Framer::new(self.reply_dest, payload);
        let mut first = true;
        loop {
            let mut chunk = [0u8; 8];
            let n = framer.output_bytes(&mut chunk);
            if n == 0 {
                break;
            }
            let id = if first {
                self.config.id as u16 | ID_START_MASK
            } else {
                self.config.id as u16
            };
            let _ = self.bus.send_frame(id, &chunk[..n], MAX_SEND_RETRIES);
            first = false;
        }
    }
}
