//! A bounded, zero-copy binary codec for MessagePack-style typed values,
//! grounded in the bounds-checked cursor idiom the teacher uses for its
//! device-tree blobs (`dt::reader`/`dt::writer`): a position tracked
//! against a fixed window, every access checked before it happens, and
//! byte-array reads returned as slices into the source buffer rather
//! than copied out.
//!
//! Handlers parse their arguments left to right and want zero-copy
//! access to the bulk bytes of a flash-write command; the reader's
//! `read_bin` gives them exactly that.

use byteorder::{BigEndian, ByteOrder};

/// Every codec operation reports success or one of these two failures.
/// The writer fails closed: a write that doesn't fit leaves the buffer
/// untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// Not enough bytes remained to decode the requested value, or the
    /// encoded marker didn't match the requested type.
    Short,
    /// The writer has no room left for this value.
    Overflow,
}

pub type CodecResult<T> = Result<T, CodecError>;

mod marker {
    pub const POSITIVE_FIXINT_MAX: u8 = 0x7f;
    pub const FIXMAP_MASK: u8 = 0x80;
    pub const FIXARRAY_MASK: u8 = 0x90;
    pub const FIXSTR_MASK: u8 = 0xa0;
    pub const NIL: u8 = 0xc0;
    pub const FALSE: u8 = 0xc2;
    pub const TRUE: u8 = 0xc3;
    pub const BIN8: u8 = 0xc4;
    pub const BIN16: u8 = 0xc5;
    pub const BIN32: u8 = 0xc6;
    pub const UINT8: u8 = 0xcc;
    pub const UINT16: u8 = 0xcd;
    pub const UINT32: u8 = 0xce;
    pub const UINT64: u8 = 0xcf;
    pub const INT8: u8 = 0xd0;
    pub const INT16: u8 = 0xd1;
    pub const INT32: u8 = 0xd2;
    pub const INT64: u8 = 0xd3;
    pub const STR8: u8 = 0xd9;
    pub const STR16: u8 = 0xda;
    pub const STR32: u8 = 0xdb;
    pub const ARRAY16: u8 = 0xdc;
    pub const ARRAY32: u8 = 0xdd;
    pub const MAP16: u8 = 0xde;
    pub const MAP32: u8 = 0xdf;
    pub const NEGATIVE_FIXINT_MIN: u8 = 0xe0;
}

/// A read-only cursor over a fixed byte window. Never reads past its
/// length bound: every accessor checks remaining length first.
#[derive(Debug, Clone, Copy)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, n: usize) -> CodecResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(CodecError::Short);
        }
        let start = self.pos;
        self.pos += n;
        Ok(&self.buf[start..self.pos])
    }

    fn byte(&mut self) -> CodecResult<u8> {
        Ok(self.take(1)?[0])
    }

    /// Reads an unsigned integer, accepting any marker width that fits
    /// `u64` (positive fixint through uint64) and widening it.
    pub fn read_u64(&mut self) -> CodecResult<u64> {
        let m = self.byte()?;
        match m {
            0..=marker::POSITIVE_FIXINT_MAX => Ok(m as u64),
            marker::UINT8 => Ok(self.byte()? as u64),
            marker::UINT16 => Ok(BigEndian::read_u16(self.take(2)?) as u64),
            marker::UINT32 => Ok(BigEndian::read_u32(self.take(4)?) as u64),
            marker::UINT64 => Ok(BigEndian::read_u64(self.take(8)?)),
            _ => Err(CodecError::Short),
        }
    }

    pub fn read_u32(&mut self) -> CodecResult<u32> {
        let v = self.read_u64()?;
        u32::try_from(v).map_err(|_| CodecError::Short)
    }

    pub fn read_u8(&mut self) -> CodecResult<u8> {
        let v = self.read_u64()?;
        u8::try_from(v).map_err(|_| CodecError::Short)
    }

    /// Reads a signed 32-bit integer (fixint, int8/16/32, or a uint that
    /// still fits in range).
    pub fn read_i32(&mut self) -> CodecResult<i32> {
        let m = self.byte()?;
        match m {
            0..=marker::POSITIVE_FIXINT_MAX => Ok(m as i32),
            marker::NEGATIVE_FIXINT_MIN..=0xff => Ok((m as i8) as i32),
            marker::INT8 => Ok(self.byte()? as i8 as i32),
            marker::INT16 => Ok(BigEndian::read_i16(self.take(2)?) as i32),
            marker::INT32 => Ok(BigEndian::read_i32(self.take(4)?)),
            marker::UINT8 => Ok(self.byte()? as i32),
            marker::UINT16 => Ok(BigEndian::read_u16(self.take(2)?) as i32),
            marker::UINT32 => {
                let v = BigEndian::read_u32(self.take(4)?);
                i32::try_from(v).map_err(|_| CodecError::Short)
            }
            _ => Err(CodecError::Short),
        }
    }

    pub fn read_bool(&mut self) -> CodecResult<bool> {
        match self.byte()? {
            marker::TRUE => Ok(true),
            marker::FALSE => Ok(false),
            _ => Err(CodecError::Short),
        }
    }

    /// Reads a length-prefixed string into `out`, which bounds the
    /// maximum number of bytes this call will accept. Returns the
    /// decoded `&str`.
    pub fn read_str<'b>(&mut self, out: &'b mut [u8]) -> CodecResult<&'b str> {
        let m = self.byte()?;
        let len = match m {
            marker::FIXSTR_MASK..=0xbf => (m & 0x1f) as usize,
            marker::STR8 => self.byte()? as usize,
            marker::STR16 => BigEndian::read_u16(self.take(2)?) as usize,
            marker::STR32 => BigEndian::read_u32(self.take(4)?) as usize,
            _ => return Err(CodecError::Short),
        };
        if len > out.len() {
            return Err(CodecError::Short);
        }
        let bytes = self.take(len)?;
        out[..len].copy_from_slice(bytes);
        core::str::from_utf8(&out[..len]).map_err(|_| CodecError::Short)
    }

    /// Reads a length-prefixed byte array and returns a slice into the
    /// reader's own input window - no copy, same lifetime as the window
    /// itself, so the caller may hold onto it after the reader moves on.
    pub fn read_bin(&mut self) -> CodecResult<&'a [u8]> {
        let m = self.byte()?;
        let len = match m {
            marker::BIN8 => self.byte()? as usize,
            marker::BIN16 => BigEndian::read_u16(self.take(2)?) as usize,
            marker::BIN32 => BigEndian::read_u32(self.take(4)?) as usize,
            _ => return Err(CodecError::Short),
        };
        self.take(len)
    }

    pub fn read_array_header(&mut self) -> CodecResult<u32> {
        let m = self.byte()?;
        match m {
            marker::FIXARRAY_MASK..=0x9f => Ok((m & 0x0f) as u32),
            marker::ARRAY16 => Ok(BigEndian::read_u16(self.take(2)?) as u32),
            marker::ARRAY32 => Ok(BigEndian::read_u32(self.take(4)?)),
            _ => Err(CodecError::Short),
        }
    }

    pub fn read_map_header(&mut self) -> CodecResult<u32> {
        let m = self.byte()?;
        match m {
            marker::FIXMAP_MASK..=0x8f => Ok((m & 0x0f) as u32),
            marker::MAP16 => Ok(BigEndian::read_u16(self.take(2)?) as u32),
            marker::MAP32 => Ok(BigEndian::read_u32(self.take(4)?)),
            _ => Err(CodecError::Short),
        }
    }

    /// True if the next marker is an array header (used by the
    /// dispatcher to treat "no argument array at all" as zero args).
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Skips one encoded value of any type, descending into arrays and
    /// maps recursively. Used by `Config::merge_from` to silently ignore
    /// a map key it doesn't recognize, without needing to know that
    /// key's value type ahead of time.
    pub fn skip_value(&mut self) -> CodecResult<()> {
        let m = self.byte()?;
        match m {
            0..=marker::POSITIVE_FIXINT_MAX => Ok(()),
            marker::NEGATIVE_FIXINT_MIN..=0xff => Ok(()),
            marker::NIL | marker::FALSE | marker::TRUE => Ok(()),
            marker::FIXSTR_MASK..=0xbf => {
                let len = (m & 0x1f) as usize;
                self.take(len)?;
                Ok(())
            }
            marker::FIXARRAY_MASK..=0x9f => {
                for _ in 0..(m & 0x0f) {
                    self.skip_value()?;
                }
                Ok(())
            }
            marker::FIXMAP_MASK..=0x8f => {
                for _ in 0..(m & 0x0f) * 2 {
                    self.skip_value()?;
                }
                Ok(())
            }
            marker::UINT8 | marker::INT8 => {
                self.take(1)?;
                Ok(())
            }
            marker::UINT16 | marker::INT16 => {
                self.take(2)?;
                Ok(())
            }
            marker::UINT32 | marker::INT32 => {
                self.take(4)?;
                Ok(())
            }
            marker::UINT64 | marker::INT64 => {
                self.take(8)?;
                Ok(())
            }
            marker::STR8 | marker::BIN8 => {
                let len = self.byte()? as usize;
                self.take(len)?;
                Ok(())
            }
            marker::STR16 | marker::BIN16 => {
                let len = BigEndian::read_u16(self.take(2)?) as usize;
                self.take(len)?;
                Ok(())
            }
            marker::STR32 | marker::BIN32 => {
                let len = BigEndian::read_u32(self.take(4)?) as usize;
                self.take(len)?;
                Ok(())
            }
            marker::ARRAY16 => {
                let len = BigEndian::read_u16(self.take(2)?);
                for _ in 0..len {
                    self.skip_value()?;
                }
                Ok(())
            }
            marker::ARRAY32 => {
                let len = BigEndian::read_u32(self.take(4)?);
                for _ in 0..len {
                    self.skip_value()?;
                }
                Ok(())
            }
            marker::MAP16 => {
                let len = BigEndian::read_u16(self.take(2)?);
                for _ in 0..len {
                    self.skip_value()?;
                    self.skip_value()?;
                }
                Ok(())
            }
            marker::MAP32 => {
                let len = BigEndian::read_u32(self.take(4)?);
                for _ in 0..len {
                    self.skip_value()?;
                    self.skip_value()?;
                }
                Ok(())
            }
            _ => Err(CodecError::Short),
        }
    }
}

/// A write-only cursor over a fixed byte window with a monotonic
/// position. Every write is bounds-checked before any byte is written,
/// so a failed write never leaves a partial value behind.
#[derive(Debug)]
pub struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Writer { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn written(&self) -> &[u8] {
        &self.buf[..self.pos]
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn reserve(&mut self, n: usize) -> CodecResult<&mut [u8]> {
        if self.remaining() < n {
            return Err(CodecError::Overflow);
        }
        let start = self.pos;
        self.pos += n;
        Ok(&mut self.buf[start..self.pos])
    }

    fn put_byte(&mut self, b: u8) -> CodecResult<()> {
        self.reserve(1)?[0] = b;
        Ok(())
    }

    pub fn write_bool(&mut self, v: bool) -> CodecResult<()> {
        self.put_byte(if v { marker::TRUE } else { marker::FALSE })
    }

    pub fn write_u64(&mut self, v: u64) -> CodecResult<()> {
        // Each arm reserves its marker and payload as one span before
        // writing anything, so a too-small buffer fails before any byte
        // is touched rather than leaving a marker with no payload.
        if v <= marker::POSITIVE_FIXINT_MAX as u64 {
            self.put_byte(v as u8)
        } else if v <= u8::MAX as u64 {
            let buf = self.reserve(2)?;
            buf[0] = marker::UINT8;
            buf[1] = v as u8;
            Ok(())
        } else if v <= u16::MAX as u64 {
            let buf = self.reserve(3)?;
            buf[0] = marker::UINT16;
            BigEndian::write_u16(&mut buf[1..], v as u16);
            Ok(())
        } else if v <= u32::MAX as u64 {
            let buf = self.reserve(5)?;
            buf[0] = marker::UINT32;
            BigEndian::write_u32(&mut buf[1..], v as u32);
            Ok(())
        } else {
            let buf = self.reserve(9)?;
            buf[0] = marker::UINT64;
            BigEndian::write_u64(&mut buf[1..], v);
            Ok(())
        }
    }

    pub fn write_u32(&mut self, v: u32) -> CodecResult<()> {
        self.write_u64(v as u64)
    }

    pub fn write_u8(&mut self, v: u8) -> CodecResult<()> {
        self.write_u64(v as u64)
    }

    pub fn write_i32(&mut self, v: i32) -> CodecResult<()> {
        if v >= 0 {
            return self.write_u64(v as u64);
        }
        if v >= -32 {
            return self.put_byte(v as u8);
        }
        if v >= i8::MIN as i32 {
            let buf = self.reserve(2)?;
            buf[0] = marker::INT8;
            buf[1] = v as i8 as u8;
            return Ok(());
        }
        if v >= i16::MIN as i32 {
            let buf = self.reserve(3)?;
            buf[0] = marker::INT16;
            BigEndian::write_i16(&mut buf[1..], v as i16);
            return Ok(());
        }
        let buf = self.reserve(5)?;
        buf[0] = marker::INT32;
        BigEndian::write_i32(&mut buf[1..], v);
        Ok(())
    }

    pub fn write_str(&mut self, s: &str) -> CodecResult<()> {
        let bytes = s.as_bytes();
        let len = bytes.len();
        let header_len = if len <= 31 {
            1
        } else if len <= u8::MAX as usize {
            2
        } else if len <= u16::MAX as usize {
            3
        } else {
            5
        };
        // Header and payload are reserved together so a too-small buffer
        // fails before the header marker is written.
        let buf = self.reserve(header_len + len)?;
        let (header, body) = buf.split_at_mut(header_len);
        if len <= 31 {
            header[0] = marker::FIXSTR_MASK | len as u8;
        } else if len <= u8::MAX as usize {
            header[0] = marker::STR8;
            header[1] = len as u8;
        } else if len <= u16::MAX as usize {
            header[0] = marker::STR16;
            BigEndian::write_u16(&mut header[1..], len as u16);
        } else {
            header[0] = marker::STR32;
            BigEndian::write_u32(&mut header[1..], len as u32);
        }
        body.copy_from_slice(bytes);
        Ok(())
    }

    pub fn write_bin(&mut self, data: &[u8]) -> CodecResult<()> {
        let len = data.len();
        let header_len = if len <= u8::MAX as usize {
            2
        } else if len <= u16::MAX as usize {
            3
        } else {
            5
        };
        let buf = self.reserve(header_len + len)?;
        let (header, body) = buf.split_at_mut(header_len);
        if len <= u8::MAX as usize {
            header[0] = marker::BIN8;
            header[1] = len as u8;
        } else if len <= u16::MAX as usize {
            header[0] = marker::BIN16;
            BigEndian::write_u16(&mut header[1..], len as u16);
        } else {
            header[0] = marker::BIN32;
            BigEndian::write_u32(&mut header[1..], len as u32);
        }
        body.copy_from_slice(data);
        Ok(())
    }

    /// Writes a bin header for `len` bytes and hands the caller a
    /// mutable slice of exactly that length to fill in place - lets
    /// `READ_FLASH` copy straight from the flash controller into the
    /// response buffer without a stack-sized intermediate.
    pub fn write_bin_from(&mut self, len: usize, fill: impl FnOnce(&mut [u8])) -> CodecResult<()> {
        let header_len = if len <= u8::MAX as usize {
            2
        } else if len <= u16::MAX as usize {
            3
        } else {
            5
        };
        let buf = self.reserve(header_len + len)?;
        let (header, body) = buf.split_at_mut(header_len);
        if len <= u8::MAX as usize {
            header[0] = marker::BIN8;
            header[1] = len as u8;
        } else if len <= u16::MAX as usize {
            header[0] = marker::BIN16;
            BigEndian::write_u16(&mut header[1..], len as u16);
        } else {
            header[0] = marker::BIN32;
            BigEndian::write_u32(&mut header[1..], len as u32);
        }
        fill(body);
        Ok(())
    }

    pub fn write_array_header(&mut self, len: u32) -> CodecResult<()> {
        if len <= 15 {
            self.put_byte(marker::FIXARRAY_MASK | len as u8)
        } else if len <= u16::MAX as u32 {
            let buf = self.reserve(3)?;
            buf[0] = marker::ARRAY16;
            BigEndian::write_u16(&mut buf[1..], len as u16);
            Ok(())
        } else {
            let buf = self.reserve(5)?;
            buf[0] = marker::ARRAY32;
            BigEndian::write_u32(&mut buf[1..], len);
            Ok(())
        }
    }

    pub fn write_map_header(&mut self, len: u32) -> CodecResult<()> {
        if len <= 15 {
            self.put_byte(marker::FIXMAP_MASK | len as u8)
        } else if len <= u16::MAX as u32 {
            let buf = self.reserve(3)?;
            buf[0] = marker::MAP16;
            BigEndian::write_u16(&mut buf[1..], len as u16);
            Ok(())
        } else {
            let buf = self.reserve(5)?;
            buf[0] = marker::MAP32;
            BigEndian::write_u32(&mut buf[1..], len);
            Ok(())
        }
    }
}
