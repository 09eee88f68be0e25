//! Parses one reassembled datagram payload into a command-set version, a
//! command index, and an argument array, then looks the index up in
//! [`commands::table`] and runs the handler - grounded in the original
//! `execute_datagram_commands`, minus its switch statement.
//!
//! Every failure path, whether the payload doesn't even parse or the
//! handler itself returns `Err`, ends the same way: a short reply whose
//! entire body is one [`WireError`] code. The caller (the main loop)
//! doesn't need to distinguish the two; it just sends back whatever
//! [`dispatch`] wrote.

use canboot_hal::{FlashInterface, Reboot};

use crate::codec::{Reader, Writer};
use crate::commands::{self, HandlerCtx};
use crate::target::TargetLayout;
use crate::wire::WireError;

fn write_error(buf: &mut [u8], code: WireError) -> usize {
    let mut w = Writer::new(buf);
    // A fixed 8-byte reply always has room for one uint; this can't fail.
    let _ = w.write_u32(code.code());
    w.position()
}

/// Parses and runs one command datagram, writing the reply into
/// `out_buf` and returning its length. Never panics on malformed input:
/// every parse failure degrades to a short error reply instead.
pub fn dispatch<F: FlashInterface, T: TargetLayout, R: Reboot>(
    payload: &[u8],
    out_buf: &mut [u8],
    ctx: &mut HandlerCtx<F, T, R>,
) -> usize {
    let mut reader = Reader::new(payload);

    let version = match reader.read_i32() {
        Ok(v) => v,
        Err(_) => return write_error(out_buf, WireError::InvalidCommand),
    };
    if version != crate::COMMAND_SET_VERSION {
        return write_error(out_buf, WireError::InvalidCommandSetVersion);
    }

    let index = match reader.read_i32() {
        Ok(v) => v,
        Err(_) => return write_error(out_buf, WireError::InvalidCommand),
    };

    // An absent argument array (the reader is already exhausted) means
    // zero arguments rather than a parse failure.
    let argc = if reader.is_empty() {
        0
    } else {
        match reader.read_array_header() {
            Ok(n) => n,
            Err(_) => return write_error(out_buf, WireError::InvalidCommand),
        }
    };

    let handler = commands::table::<F, T, R>()
        .into_iter()
        .find(|(i, _)| *i == index)
        .map(|(_, h)| h);

    match handler {
        Some(h) => {
            let mut writer = Writer::new(out_buf);
            match h(argc, &mut reader, &mut writer, ctx) {
                Ok(n) => n,
                Err(e) => write_error(out_buf, WireError::from(e)),
            }
        }
        None => write_error(out_buf, WireError::CommandNotFound),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::PING;
    use crate::config::{Config, ConfigStore};
    use crate::target::SimTarget;
    use canboot_hal::sim::{SimFlash, SimReboot};
    use crate::flash::FlashWriter;

    fn encode_request(index: i32) -> ([u8; 16], usize) {
        let mut buf = [0u8; 16];
        let mut w = Writer::new(&mut buf);
        w.write_i32(crate::COMMAND_SET_VERSION).unwrap();
        w.write_i32(index).unwrap();
        w.write_array_header(0).unwrap();
        let n = w.position();
        (buf, n)
    }

    #[test]
    fn dispatches_ping_to_a_true_reply() {
        let flash = SimFlash::new(SimTarget::FLASH_BEGIN, (SimTarget::FLASH_END - SimTarget::FLASH_BEGIN) as usize);
        let mut flash = FlashWriter::new(flash);
        let mut config = Config::defaults(1, "node", "class");
        let store = ConfigStore::<SimTarget>::new();
        let mut reboot = SimReboot::new(None);
        let mut status = 0u8;
        let mut page_buf = [0u8; SimTarget::PAGE_SIZE];
        let mut scratch = [0u8; SimTarget::PAGE_SIZE];
        let mut ctx = HandlerCtx {
            config: &mut config,
            flash: &mut flash,
            reboot: &mut reboot,
            config_store: &store,
            status: &mut status,
            page_buf: &mut page_buf,
            scratch: &mut scratch,
        };

        let (req, n) = encode_request(PING);
        let mut reply = [0u8; 8];
        let len = dispatch(&req[..n], &mut reply, &mut ctx);
        let mut r = Reader::new(&reply[..len]);
        assert!(r.read_bool().unwrap());
    }

    #[test]
    fn mismatched_command_set_version_is_fatal() {
        let flash = SimFlash::new(SimTarget::FLASH_BEGIN, (SimTarget::FLASH_END - SimTarget::FLASH_BEGIN) as usize);
        let mut flash = FlashWriter::new(flash);
        let mut config = Config::defaults(1, "node", "class");
        let store = ConfigStore::<SimTarget>::new();
        let mut reboot = SimReboot::new(None);
        let mut status = 0u8;
        let mut page_buf = [0u8; SimTarget::PAGE_SIZE];
        let mut scratch = [0u8; SimTarget::PAGE_SIZE];
        let mut ctx = HandlerCtx {
            config: &mut config,
            flash: &mut flash,
            reboot: &mut reboot,
            config_store: &store,
            status: &mut status,
            page_buf: &mut page_buf,
            scratch: &mut scratch,
        };

        let mut buf = [0u8; 16];
        let mut w = Writer::new(&mut buf);
        w.write_i32(crate::COMMAND_SET_VERSION + 1).unwrap();
        w.write_i32(PING).unwrap();
        let n = w.position();

        let mut reply = [0u8; 8];
        let len = dispatch(&buf[..n], &mut reply, &mut ctx);
        let mut r = Reader::new(&reply[..len]);
        assert_eq!(r.read_u32().unwrap(), WireError::InvalidCommandSetVersion.code());
    }

    #[test]
    fn unknown_command_index_replies_command_not_found() {
        let flash = SimFlash::new(SimTarget::FLASH_BEGIN, (SimTarget::FLASH_END - SimTarget::FLASH_BEGIN) as usize);
        let mut flash = FlashWriter::new(flash);
        let mut config = Config::defaults(1, "node", "class");
        let store = ConfigStore::<SimTarget>::new();
        let mut reboot = SimReboot::new(None);
        let mut status = 0u8;
        let mut page_buf = [0u8; SimTarget::PAGE_SIZE];
        let mut scratch = [0u8; SimTarget::PAGE_SIZE];
        let mut ctx = HandlerCtx {
            config: &mut config,
            flash: &mut flash,
            reboot: &mut reboot,
            config_store: &store,
            status: &mut status,
            page_buf: &mut page_buf,
            scratch: &mut scratch,
        };

        let (req, n) = encode_request(999);
        let mut reply = [0u8; 8];
        let len = dispatch(&req[..n], &mut reply, &mut ctx);
        let mut r = Reader::new(&reply[..len]);
        assert_eq!(r.read_u32().unwrap(), WireError::CommandNotFound.code());
    }
}
