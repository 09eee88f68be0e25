use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Host-side console for the canboot field-upgrade protocol.
#[derive(Parser)]
#[command(name = "bootctl", version, about)]
pub struct Cli {
    /// Address of the node to talk to; 0 addresses every node on the bus.
    #[arg(long, default_value_t = 0)]
    pub node: u8,

    /// This host's own bus address, ORed onto the start frame of every
    /// request the same way a node ORs its own id onto a reply.
    #[arg(long, default_value_t = 0x7f)]
    pub local_id: u8,

    /// A Linux SocketCAN interface (e.g. can0) to talk to a real node
    /// over, instead of the built-in simulated one.
    #[cfg(feature = "socketcan-backend")]
    #[arg(long)]
    pub iface: Option<String>,

    /// Identity seeded into the simulated node's config record; ignored
    /// when `--iface` selects a real bus.
    #[arg(long, default_value_t = 1)]
    pub sim_node_id: u8,
    #[arg(long, default_value = "sim-node")]
    pub sim_node_name: String,
    #[arg(long, default_value = "canboot.sim")]
    pub sim_device_class: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Checks whether a node answers at all.
    Ping,
    /// Computes the CRC-32 of a flash region.
    CrcRegion { addr: u32, len: u32 },
    /// Erases one flash page, gated by device class and address range.
    EraseFlashPage { addr: u32, device_class: String },
    /// Reads a file and programs it into flash, gated the same way.
    WriteFlash { addr: u32, device_class: String, file: PathBuf },
    /// Reads bytes back out of flash.
    ReadFlash { addr: u32, len: u32 },
    /// Merges the given fields into the node's in-RAM config record.
    ConfigUpdate {
        #[arg(long)]
        id: Option<u8>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        device_class: Option<String>,
        #[arg(long)]
        application_crc: Option<u32>,
        #[arg(long)]
        application_size: Option<u32>,
        #[arg(long)]
        update_count: Option<u32>,
    },
    /// Persists the in-RAM config record to its two redundant flash copies.
    ConfigWriteToFlash,
    /// Reads the node's config record back as a map.
    ConfigRead,
    /// Asks the node to validate and jump to its resident application.
    /// Never earns a reply: the node either starts the application or
    /// falls back to an untimed bootloader session.
    JumpToApplication,
    /// Reports the status code of the last command the node handled.
    GetStatus,
}
