//! The numeric error codes carried on the wire, grounded in the original
//! implementation's `error.h`: every handler that can fail in a way the
//! protocol names returns one of these, either as the body of an
//! otherwise ordinary reply (an in-band error) or as the sole payload of
//! a stand-alone error datagram the dispatcher builds itself.

use crate::CanbootError;

/// A wire error code. Kept as a flat `u32` enum rather than per-command
/// sub-types because the host decodes it the same way regardless of
/// which command produced it: read one uint and compare against the
/// constants below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum WireError {
    /// No specific code applies; the underlying cause isn't one the
    /// protocol names.
    Unspecified = 0,
    Success = 1,
    CorruptDatagram = 2,
    InvalidCommand = 3,
    CommandNotFound = 4,
    InvalidCommandSetVersion = 5,
    DatagramTimeout = 6,

    FlashEraseErrorBeforeApp = 10,
    FlashEraseErrorAfterApp = 11,
    FlashEraseErrorDeviceClassMismatch = 12,

    FlashWriteErrorBeforeApp = 20,
    FlashWriteErrorAfterApp = 21,
    FlashWriteErrorDeviceClassMismatch = 22,
    FlashWriteErrorUnknownSize = 23,
    FlashWriteErrorNotErased = 24,

    CrcErrorAddressUnspecified = 30,
    CrcErrorLengthUnspecified = 31,
    CrcErrorIllegalAddress = 32,
}

impl WireError {
    pub fn code(self) -> u32 {
        self as u32
    }
}

/// Maps a propagated [`CanbootError`] to the out-of-band code the
/// dispatcher writes when a handler can't even produce an in-band reply
/// (a malformed argument list, an overflowed response buffer, or a
/// framing-level failure caught before any handler ran).
impl From<CanbootError> for WireError {
    fn from(e: CanbootError) -> Self {
        match e {
            CanbootError::InvalidCommandSetVersion => WireError::InvalidCommandSetVersion,
            CanbootError::CommandNotFound => WireError::CommandNotFound,
            CanbootError::CorruptDatagram => WireError::CorruptDatagram,
            CanbootError::DatagramTimeout => WireError::DatagramTimeout,
            CanbootError::Codec(_) | CanbootError::InvalidCommand => WireError::InvalidCommand,
            _ => WireError::Unspecified,
        }
    }
}
