//! The datagram framing state machine (spec.md section 4.3): reassembles
//! a variable-length, CRC-protected datagram from a run of fixed 8-byte
//! bus frames, and re-frames a response for transmission the same way.
//!
//! Wire layout, CRC(4) || D(1) || destinations(D) || L(4) || payload(L),
//! and the CRC-covers-everything-after-itself rule are both carried over
//! from the original `can_datagram.h`; the two independent state
//! machines below are a direct translation of its reader and writer
//! byte-at-a-time loops.

use crate::crc::crc32;
use crate::MAX_DESTINATIONS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    Crc,
    DestCount,
    Dest,
    Len,
    Data,
    Done,
}

/// Reassembles one datagram, one byte at a time, into a caller-owned
/// buffer. The buffer is reused across datagrams; [`Reassembler::start`]
/// resets every counter back to the CRC state.
pub struct Reassembler<'buf> {
    crc: u32,
    destinations: [u8; MAX_DESTINATIONS],
    dest_count: usize,
    payload: &'buf mut [u8],
    payload_len: usize,
    state: ReaderState,
    pos: usize,
    oversized: bool,
}

impl<'buf> Reassembler<'buf> {
    pub fn new(payload: &'buf mut [u8]) -> Self {
        Reassembler {
            crc: 0,
            destinations: [0; MAX_DESTINATIONS],
            dest_count: 0,
            payload,
            payload_len: 0,
            state: ReaderState::Crc,
            pos: 0,
            oversized: false,
        }
    }

    /// Called on the start frame of a new datagram: every counter
    /// returns to zero and the state returns to CRC, discarding whatever
    /// partial datagram was in flight.
    pub fn start(&mut self) {
        self.crc = 0;
        self.dest_count = 0;
        self.payload_len = 0;
        self.state = ReaderState::Crc;
        self.pos = 0;
        self.oversized = false;
    }

    /// Feeds one byte of the datagram stream through the state machine.
    pub fn input_byte(&mut self, byte: u8) {
        match self.state {
            ReaderState::Crc => {
                self.crc = (self.crc << 8) | byte as u32;
                self.pos += 1;
                if self.pos == 4 {
                    self.pos = 0;
                    self.state = ReaderState::DestCount;
                }
            }
            ReaderState::DestCount => {
                self.dest_count = (byte as usize).min(MAX_DESTINATIONS);
                if byte as usize > MAX_DESTINATIONS {
                    self.oversized = true;
                }
                self.pos = 0;
                self.state = if self.dest_count == 0 {
                    ReaderState::Len
                } else {
                    ReaderState::Dest
                };
            }
            ReaderState::Dest => {
                self.destinations[self.pos] = byte;
                self.pos += 1;
                if self.pos == self.dest_count {
                    self.pos = 0;
                    self.state = ReaderState::Len;
                }
            }
            ReaderState::Len => {
                self.payload_len = (self.payload_len << 8) | byte as usize;
                self.pos += 1;
                if self.pos == 4 {
                    self.pos = 0;
                    if self.payload_len > self.payload.len() {
                        self.oversized = true;
                    }
                    self.state = if self.payload_len == 0 {
                        ReaderState::Done
                    } else {
                        ReaderState::Data
                    };
                }
            }
            ReaderState::Data => {
                if self.pos < self.payload.len() {
                    self.payload[self.pos] = byte;
                }
                self.pos += 1;
                if self.pos == self.payload_len {
                    self.state = ReaderState::Done;
                }
            }
            ReaderState::Done => {
                // Extra bytes past completion are ignored; the main loop
                // is expected to stop feeding once `is_complete` is true.
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state == ReaderState::Done
    }

    /// True once the datagram is fully reassembled, fit within the
    /// reassembly buffer, and its trailing CRC matches.
    pub fn is_valid(&self) -> bool {
        self.is_complete() && !self.oversized && self.computed_crc() == self.crc
    }

    pub fn destinations(&self) -> &[u8] {
        &self.destinations[..self.dest_count]
    }

    /// True if `id` (or broadcast 0) appears in the destination list.
    pub fn addressed_to(&self, id: u8) -> bool {
        self.destinations().iter().any(|&d| d == id || d == 0)
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload[..self.payload_len.min(self.payload.len())]
    }

    fn computed_crc(&self) -> u32 {
        let mut c = crc32(0, &[self.dest_count as u8]);
        c = crc32(c, self.destinations());
        c = crc32(c, &(self.payload_len as u32).to_be_bytes());
        c = crc32(c, self.payload());
        c
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Crc,
    DestCount,
    Dest,
    Len,
    Data,
    Done,
}

/// Frames a reply datagram addressed to a single destination, emitting
/// it a handful of bytes at a time to match the bus's 8-byte frames.
/// Borrows its payload rather than owning it: the dispatcher already
/// has the reply sitting in the handler's own response buffer and there
/// is no need to copy it again.
pub struct Framer<'buf> {
    crc: u32,
    dest: u8,
    payload: &'buf [u8],
    state: WriterState,
    pos: usize,
}

impl<'buf> Framer<'buf> {
    pub fn new(dest: u8, payload: &'buf [u8]) -> Self {
        let mut crc = crc32(0, &[1u8]);
        crc = crc32(crc, &[dest]);
        crc = crc32(crc, &(payload.len() as u32).to_be_bytes());
        crc = crc32(crc, payload);
        Framer {
            crc,
            dest,
            payload,
            state: WriterState::Crc,
            pos: 0,
        }
    }

    /// Fills up to `out.len()` bytes (the caller passes at most 8, one
    /// bus frame's worth) and returns how many were written. Returns 0
    /// once every byte of the datagram has been emitted.
    pub fn output_bytes(&mut self, out: &mut [u8]) -> usize {
        let mut n = 0;
        while n < out.len() {
            match self.state {
                WriterState::Crc => {
                    out[n] = self.crc.to_be_bytes()[self.pos];
                    self.pos += 1;
                    n += 1;
                    if self.pos == 4 {
                        self.pos = 0;
                        self.state = WriterState::DestCount;
                    }
                }
                WriterState::DestCount => {
                    out[n] = 1;
                    n += 1;
                    self.pos = 0;
                    self.state = WriterState::Dest;
                }
                WriterState::Dest => {
                    out[n] = self.dest;
                    n += 1;
                    self.pos = 0;
                    self.state = WriterState::Len;
                }
                WriterState::Len => {
                    out[n] = (self.payload.len() as u32).to_be_bytes()[self.pos];
                    self.pos += 1;
                    n += 1;
                    if self.pos == 4 {
                        self.pos = 0;
                        self.state = if self.payload.is_empty() {
                            WriterState::Done
                        } else {
                            WriterState::Data
                        };
                    }
                }
                WriterState::Data => {
                    out[n] = self.payload[self.pos];
                    self.pos += 1;
                    n += 1;
                    if self.pos == self.payload.len() {
                        self.state = WriterState::Done;
                    }
                }
                WriterState::Done => break,
            }
        }
        n
    }

    pub fn is_done(&self) -> bool {
        self.state == WriterState::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(buf: &mut [u8], bytes: &[u8]) -> Reassembler {
        let mut r = Reassembler::new(buf);
        r.start();
        for &b in bytes {
            r.input_byte(b);
        }
        r
    }

    fn encode(dest_count: u8, destinations: &[u8], payload: &[u8]) -> alloc_free::Wire {
        let mut body = alloc_free::Wire::new();
        body.push(dest_count);
        body.extend(destinations);
        body.extend(&(payload.len() as u32).to_be_bytes());
        body.extend(payload);
        let crc = crc32(0, body.as_slice());
        let mut out = alloc_free::Wire::new();
        out.extend(&crc.to_be_bytes());
        out.extend(body.as_slice());
        out
    }

    #[test]
    fn reassembles_a_well_formed_datagram() {
        let wire = encode(1, &[7], b"ping");
        let mut buf = [0u8; 64];
        let r = feed(&mut buf, wire.as_slice());
        assert!(r.is_complete());
        assert!(r.is_valid());
        assert_eq!(r.destinations(), &[7]);
        assert_eq!(r.payload(), b"ping");
    }

    #[test]
    fn broadcast_destination_matches_every_id() {
        let wire = encode(1, &[0], b"x");
        let mut buf = [0u8; 64];
        let r = feed(&mut buf, wire.as_slice());
        assert!(r.addressed_to(7));
        assert!(r.addressed_to(0));
    }

    #[test]
    fn single_bit_flip_in_payload_fails_validation() {
        let mut wire = encode(1, &[7], b"ping");
        let last = wire.as_slice().len() - 1;
        wire.as_mut_slice()[last] ^= 0x01;
        let mut buf = [0u8; 64];
        let r = feed(&mut buf, wire.as_slice());
        assert!(r.is_complete());
        assert!(!r.is_valid());
    }

    #[test]
    fn payload_longer_than_buffer_is_oversized() {
        let wire = encode(1, &[7], &[0xAAu8; 16]);
        let mut buf = [0u8; 8]; // too small for a 16 byte payload
        let r = feed(&mut buf, wire.as_slice());
        assert!(r.is_complete());
        assert!(!r.is_valid());
    }

    #[test]
    fn reader_resets_cleanly_on_restart() {
        let wire = encode(1, &[7], b"first");
        let mut buf = [0u8; 64];
        let mut r = Reassembler::new(&mut buf);
        r.start();
        for &b in wire.as_slice() {
            r.input_byte(b);
        }
        assert!(r.is_valid());

        let wire2 = encode(1, &[9], b"second-datagram");
        r.start();
        for &b in wire2.as_slice() {
            r.input_byte(b);
        }
        assert!(r.is_valid());
        assert_eq!(r.destinations(), &[9]);
        assert_eq!(r.payload(), b"second-datagram");
    }

    #[test]
    fn framer_round_trips_through_an_eight_byte_chunked_reader() {
        let payload = b"pong-reply-body";
        let mut framer = Framer::new(3, payload);
        let mut wire = alloc_free::Wire::new();
        loop {
            let mut chunk = [0u8; 8];
            let n = framer.output_bytes(&mut chunk);
            if n == 0 {
                break;
            }
            wire.extend(&chunk[..n]);
        }
        assert!(framer.is_done());

        let mut buf = [0u8; 64];
        let r = feed(&mut buf, wire.as_slice());
        assert!(r.is_valid());
        assert_eq!(r.destinations(), &[3]);
        assert_eq!(r.payload(), payload);
    }

    /// A tiny fixed-capacity byte vector so these tests can build wire
    /// encodings without pulling in `alloc`.
    mod alloc_free {
        pub struct Wire {
            buf: [u8; 256],
            len: usize,
        }

        impl Wire {
            pub fn new() -> Self {
                Wire { buf: [0; 256], len: 0 }
            }

            pub fn push(&mut self, b: u8) {
                self.buf[self.len] = b;
                self.len += 1;
            }

            pub fn extend(&mut self, bytes: &[u8]) {
                self.buf[self.len..self.len + bytes.len()].copy_from_slice(bytes);
                self.len += bytes.len();
            }

            pub fn as_slice(&self) -> &[u8] {
                &self.buf[..self.len]
            }

            pub fn as_mut_slice(&mut self) -> &mut [u8] {
                &mut self.buf[..self.len]
            }
        }
    }
}
