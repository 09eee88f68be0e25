//! The one [`CanInterface`] `bootctl` drives, regardless of which
//! concrete backend the command line selected.

use canboot_hal::{BusFrame, CanInterface};

use crate::sim::SimBackend;
#[cfg(feature = "socketcan-backend")]
use crate::socketcan_backend::SocketCanBackend;

pub enum Backend {
    Sim(SimBackend),
    #[cfg(feature = "socketcan-backend")]
    SocketCan(SocketCanBackend),
}

impl CanInterface for Backend {
    type Error = anyhow::Error;

    fn send_frame(&mut self, id: u16, data: &[u8], retries: u8) -> anyhow::Result<()> {
        match self {
            Backend::Sim(b) => b.send_frame(id, data, retries).map_err(|e| anyhow::anyhow!("{:?}", e)),
            #[cfg(feature = "socketcan-backend")]
            Backend::SocketCan(b) => b.send_frame(id, data, retries),
        }
    }

    fn recv_frame(&mut self) -> Option<BusFrame> {
        match self {
            Backend::Sim(b) => b.recv_frame(),
            #[cfg(feature = "socketcan-backend")]
            Backend::SocketCan(b) => b.recv_frame(),
        }
    }
}
