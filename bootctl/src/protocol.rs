//! Request encoding and reply collection for the host side of the wire
//! protocol - the mirror image of [`canboot::dispatch`]: where the node
//! parses `version, index, argc, args...` out of a reassembled datagram,
//! this module is what writes that same shape in, then reassembles
//! whatever comes back.

use anyhow::{anyhow, bail, Context};
use canboot::codec::{CodecError, CodecResult, Writer};
use canboot::datagram::{Framer, Reassembler};
use canboot_hal::{CanInterface, ID_START_MASK};

/// Bounds how many frames [`send_command`] will poll for before giving
/// up on a reply - a host-side stand-in for the node's own datagram
/// assembly timeout, since nothing here has a clock to race against.
const MAX_POLL_FRAMES: usize = 10_000;

fn codec_err(e: CodecError) -> anyhow::Error {
    anyhow!("binary codec error: {:?}", e)
}

/// Builds one request datagram's payload: the command-set version, the
/// command index, an array header declaring `argc` elements, then
/// whatever `write_args` puts after it. `write_args` must write exactly
/// `argc` values for the handler on the other end to parse correctly.
pub fn build_request(
    buf: &mut [u8],
    index: i32,
    argc: u32,
    write_args: impl FnOnce(&mut Writer) -> CodecResult<()>,
) -> anyhow::Result<usize> {
    let mut w = Writer::new(buf);
    w.write_i32(canboot::COMMAND_SET_VERSION).map_err(codec_err)?;
    w.write_i32(index).map_err(codec_err)?;
    w.write_array_header(argc).map_err(codec_err)?;
    write_args(&mut w).map_err(codec_err)?;
    Ok(w.position())
}

/// Frames `payload` addressed to `dest` and sends it over `bus` one bus
/// frame at a time. Used directly (instead of through [`send_command`])
/// by requests that never earn a reply, such as `jump_to_application`.
///
/// `local_id` is this host's own address on the bus, ORed with the
/// datagram start bit on the first frame exactly as the node's own
/// `send_reply` does it (see `canboot::mainloop`).
pub fn send_frames<B: CanInterface>(bus: &mut B, dest: u8, local_id: u8, payload: &[u8]) -> anyhow::Result<()> {
    let mut framer = Framer::new(dest, payload);
    let mut first = true;
    loop {
        let mut chunk = [0u8; 8];
        let n = framer.output_bytes(&mut chunk);
        if n == 0 {
            break;
        }
        let id = if first {
            local_id as u16 | ID_START_MASK
        } else {
            local_id as u16
        };
        bus.send_frame(id, &chunk[..n], 100)
            .map_err(|e| anyhow!("{:?}", e))
            .context("sending request frame")?;
        first = false;
    }
    Ok(())
}

/// [`send_frames`], then polls `bus` for the reply datagram and
/// reassembles it, returning its raw bytes.
pub fn send_command<B: CanInterface>(
    bus: &mut B,
    dest: u8,
    local_id: u8,
    payload: &[u8],
) -> anyhow::Result<Vec<u8>> {
    send_frames(bus, dest, local_id, payload)?;

    let mut reply_buf = [0u8; 4096];
    let mut reassembler = Reassembler::new(&mut reply_buf);
    let mut started = false;
    for _ in 0..MAX_POLL_FRAMES {
        let frame = match bus.recv_frame() {
            Some(f) => f,
            None => continue,
        };
        if frame.is_start() {
            reassembler.start();
            started = true;
        }
        if !started {
            continue; // a continuation frame arriving before any start frame
        }
        for &byte in frame.payload() {
            reassembler.input_byte(byte);
        }
        if reassembler.is_complete() {
            if !reassembler.is_valid() {
                bail!("reply datagram failed its CRC");
            }
            return Ok(reassembler.payload().to_vec());
        }
    }
    bail!("no reply datagram arrived within {} polled frames", MAX_POLL_FRAMES)
}

#[cfg(test)]
mod tests {
    use super::*;
    use canboot::codec::Reader;
    use canboot::commands::PING;

    #[test]
    fn build_request_round_trips_through_dispatch() {
        let mut buf = [0u8; 32];
        let n = build_request(&mut buf, PING, 0, |_w| Ok(())).unwrap();
        let mut r = Reader::new(&buf[..n]);
        assert_eq!(r.read_i32().unwrap(), canboot::COMMAND_SET_VERSION);
        assert_eq!(r.read_i32().unwrap(), PING);
    }

    #[test]
    fn build_request_with_args_writes_declared_count_first() {
        let mut buf = [0u8; 32];
        let n = build_request(&mut buf, canboot::commands::CRC_REGION, 2, |w| {
            w.write_u32(0x2000)?;
            w.write_u32(64)?;
            Ok(())
        })
        .unwrap();
        let mut r = Reader::new(&buf[..n]);
        r.read_i32().unwrap();
        r.read_i32().unwrap();
        assert_eq!(r.read_array_header().unwrap(), 2);
        assert_eq!(r.read_u32().unwrap(), 0x2000);
        assert_eq!(r.read_u32().unwrap(), 64);
    }
}
