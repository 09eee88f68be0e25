#![cfg_attr(not(test), no_std)]
#![allow(non_snake_case)]

//! `canboot` is the core of a field-upgrade bootloader for a network of
//! microcontroller nodes on a shared CAN bus. It owns three tightly
//! coupled subsystems:
//!
//! - [`datagram`]: a framing state machine that reassembles variable
//!   length command payloads from fixed 8-byte bus frames and re-frames
//!   responses for transmission.
//! - [`dispatch`] and [`commands`]: a self-describing binary-encoded RPC
//!   surface over the reassembled datagrams.
//! - [`config`] and [`flash`]: a two-copy redundant configuration record
//!   protected by CRC, and the sequencing rules that keep the device
//!   recoverable across power loss during an update.
//!
//! The bus driver, flash controller, clock, LEDs and reset-argument
//! channel are all out of scope here; `canboot` only calls the traits in
//! [`canboot_hal`].

pub mod boot;
pub mod codec;
pub mod commands;
pub mod config;
pub mod crc;
pub mod datagram;
pub mod dispatch;
#[cfg(feature = "fifo")]
pub mod frame;
pub mod flash;
pub mod mainloop;
pub mod target;
pub mod timers;
pub mod wire;

use core::fmt;

/// The error type shared by every `canboot` subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanbootError {
    /// A codec read ran out of bytes, or a write ran out of room.
    Codec(codec::CodecError),
    /// The datagram reassembled to completion but failed its CRC, or
    /// grew past the reassembly buffer.
    CorruptDatagram,
    /// No further frames arrived before the assembly timeout fired.
    DatagramTimeout,
    /// The command-set version in the payload didn't match the
    /// compile-time constant.
    InvalidCommandSetVersion,
    /// The command index or argument framing couldn't be parsed.
    InvalidCommand,
    /// No handler is registered for the requested command index.
    CommandNotFound,
    /// A target address fell outside the application region.
    AddressOutOfRange,
    /// The requesting datagram's device class didn't match this node's.
    DeviceClassMismatch,
    /// The flash range targeted for a write did not read as erased.
    NotErased,
    /// The underlying flash controller reported a hardware failure.
    FlashFailure,
    /// Neither config page validated; the in-memory record is defaults.
    NoValidConfig,
    /// A config page's stored CRC didn't match its contents, or its
    /// address fell outside the flash region.
    InvalidConfigPage,

    #[doc(hidden)]
    __Nonexhaustive,
}

pub type Result<T> = core::result::Result<T, CanbootError>;

impl From<codec::CodecError> for CanbootError {
    fn from(e: codec::CodecError) -> Self {
        CanbootError::Codec(e)
    }
}

impl fmt::Display for CanbootError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CanbootError::Codec(e) => write!(f, "binary codec error: {:?}", e),
            CanbootError::CorruptDatagram => write!(f, "datagram failed CRC or size validation"),
            CanbootError::DatagramTimeout => write!(f, "datagram reassembly timed out"),
            CanbootError::InvalidCommandSetVersion => {
                write!(f, "command-set version mismatch")
            }
            CanbootError::InvalidCommand => write!(f, "malformed command message"),
            CanbootError::CommandNotFound => write!(f, "no handler for requested command index"),
            CanbootError::AddressOutOfRange => write!(f, "address outside the application region"),
            CanbootError::DeviceClassMismatch => write!(f, "device class does not match this node"),
            CanbootError::NotErased => write!(f, "target flash range is not erased"),
            CanbootError::FlashFailure => write!(f, "flash controller reported a failure"),
            CanbootError::NoValidConfig => write!(f, "no config page validated at startup"),
            CanbootError::InvalidConfigPage => write!(f, "config page CRC mismatch or bad address"),
            CanbootError::__Nonexhaustive => unreachable!(),
        }
    }
}

/// The single source-of-truth command-set version. Bumping this is a
/// protocol break: any mismatch between host and node is fatal for the
/// datagram that carries it.
pub const COMMAND_SET_VERSION: i32 = 2;

/// Maximum number of destination node IDs one datagram may carry (see
/// spec Open Questions: picked 255 for safety over the 128 one reference
/// implementation used).
pub const MAX_DESTINATIONS: usize = 255;
