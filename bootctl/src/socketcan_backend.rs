//! A [`CanInterface`] over a real Linux SocketCAN interface, for driving
//! an actual node instead of the built-in simulated one. Linux-only and
//! off by default; enabled with the `socketcan-backend` feature.

use std::time::Duration;

use canboot_hal::{BusFrame, CanInterface};
use socketcan::{CanFrame, CanSocket, EmbeddedFrame, Frame, Socket, StandardId};

pub struct SocketCanBackend {
    socket: CanSocket,
}

impl SocketCanBackend {
    pub fn open(iface: &str) -> anyhow::Result<Self> {
        let socket = CanSocket::open(iface).map_err(|e| anyhow::anyhow!("opening CAN interface {}: {}", iface, e))?;
        socket
            .set_read_timeout(Duration::from_millis(50))
            .map_err(|e| anyhow::anyhow!("setting read timeout on {}: {}", iface, e))?;
        Ok(SocketCanBackend { socket })
    }
}

impl CanInterface for SocketCanBackend {
    type Error = anyhow::Error;

    fn send_frame(&mut self, id: u16, data: &[u8], retries: u8) -> anyhow::Result<()> {
        let can_id =
            StandardId::new(id).ok_or_else(|| anyhow::anyhow!("bus id {:#x} does not fit in 11 bits", id))?;
        let frame = CanFrame::new(can_id, data).ok_or_else(|| anyhow::anyhow!("frame payload too long"))?;
        let mut last_err = None;
        for _ in 0..=retries {
            match self.socket.write_frame(&frame) {
                Ok(()) => return Ok(()),
                Err(e) => last_err = Some(e),
            }
        }
        Err(anyhow::anyhow!("sending CAN frame failed after {} retries: {:?}", retries, last_err))
    }

    fn recv_frame(&mut self) -> Option<BusFrame> {
        match self.socket.read_frame() {
            Ok(CanFrame::Data(f)) => Some(BusFrame::new(f.raw_id() as u16, f.data())),
            _ => None,
        }
    }
}
