//! The ten command handlers (spec.md section 4.7), grounded in the
//! original `command.c` one for one: same address-range and device-class
//! guards, same choice between an in-band error code (the reply is still
//! a normal, positive-length datagram whose payload happens to be an
//! error value) and a handler simply returning `Err` for the dispatcher
//! to turn into a stand-alone error reply.
//!
//! Every handler takes the argument reader, the response writer, and a
//! [`HandlerCtx`] bundling everything else it might touch - the config
//! record, the flash façade, the reboot hook, and a page-sized scratch
//! pair owned by whoever drives the main loop. Nothing here reaches for
//! global state, so a test can build an independent fixture per case.

use canboot_hal::{FlashInterface, Reboot};

use crate::codec::{Reader, Writer};
use crate::config::{Config, ConfigStore, DEVICE_CLASS_MAX};
use crate::flash::{crc_region, FlashWriter};
use crate::target::TargetLayout;
use crate::wire::WireError;
use crate::Result;

pub const JUMP_TO_APPLICATION: i32 = 1;
pub const CRC_REGION: i32 = 2;
pub const ERASE_FLASH_PAGE: i32 = 3;
pub const WRITE_FLASH: i32 = 4;
pub const PING: i32 = 5;
pub const READ_FLASH: i32 = 6;
pub const CONFIG_UPDATE: i32 = 7;
pub const CONFIG_WRITE_TO_FLASH: i32 = 8;
pub const CONFIG_READ: i32 = 9;
pub const GET_STATUS: i32 = 10;

/// Everything a handler needs besides its arguments and response
/// buffer. Borrowed for the duration of one dispatch call.
pub struct HandlerCtx<'a, F: FlashInterface, T: TargetLayout, R: Reboot> {
    pub config: &'a mut Config,
    pub flash: &'a mut FlashWriter<F, T>,
    pub reboot: &'a mut R,
    pub config_store: &'a ConfigStore<T>,
    pub status: &'a mut u8,
    /// One page long; used only by `CONFIG_WRITE_TO_FLASH`.
    pub page_buf: &'a mut [u8],
    /// One page long; used by `CONFIG_WRITE_TO_FLASH` and by the config
    /// store's own validity reads. Shared rather than duplicated because
    /// handlers never run re-entrantly.
    pub scratch: &'a mut [u8],
}

/// A command handler. Higher-ranked over the argument reader's lifetime
/// so it can be stored in [`table`] independent of any one datagram's
/// buffer lifetime.
pub type HandlerFn<F, T, R> =
    for<'d, 'o, 'c> fn(u32, &mut Reader<'d>, &mut Writer<'o>, &mut HandlerCtx<'c, F, T, R>) -> Result<usize>;

/// The ten (index, handler) pairs, in the same order as the constants
/// above - a compile-time table rather than a big match statement, per
/// the spec's design note on re-architecting the original's dispatch
/// switch.
pub fn table<F: FlashInterface, T: TargetLayout, R: Reboot>() -> [(i32, HandlerFn<F, T, R>); 10] {
    [
        (JUMP_TO_APPLICATION, jump_to_application),
        (CRC_REGION, crc_region_cmd),
        (ERASE_FLASH_PAGE, erase_flash_page),
        (WRITE_FLASH, write_flash),
        (PING, ping),
        (READ_FLASH, read_flash),
        (CONFIG_UPDATE, config_update),
        (CONFIG_WRITE_TO_FLASH, config_write_to_flash),
        (CONFIG_READ, config_read),
        (GET_STATUS, get_status),
    ]
}

/// Checks the resident application's CRC against the config record and
/// either jumps to it or falls back to a no-timeout bootloader session.
/// Never returns: both branches end in a reset, so the `Result<usize>`
/// signature only exists to match every other handler's type.
pub fn jump_to_application<F: FlashInterface, T: TargetLayout, R: Reboot>(
    _argc: u32,
    _args: &mut Reader,
    _out: &mut Writer,
    ctx: &mut HandlerCtx<F, T, R>,
) -> Result<usize> {
    let arg = jump_decision::<F, T>(ctx.flash.inner(), ctx.config);
    ctx.reboot.reboot_with_argument(arg)
}

/// Computes the resident application's CRC and picks the reboot argument
/// that follows from it: `StartApplication` only when the image's CRC
/// matches `config.application_crc` and a size was actually recorded,
/// `StartBootloaderNoTimeout` otherwise. Shared by the `JUMP_TO_APPLICATION`
/// handler and the main loop's grace-timer expiry, so both paths apply the
/// same integrity gate before ever jumping into resident code.
pub fn jump_decision<F: FlashInterface, T: TargetLayout>(flash: &F, config: &Config) -> canboot_hal::RebootArg {
    let crc = crc_region(flash, T::APP_ADDR, config.application_size);
    if crc == config.application_crc && config.application_size > 0 {
        canboot_hal::RebootArg::StartApplication
    } else {
        canboot_hal::RebootArg::StartBootloaderNoTimeout
    }
}

fn crc_region_cmd<F: FlashInterface, T: TargetLayout, R: Reboot>(
    _argc: u32,
    args: &mut Reader,
    out: &mut Writer,
    ctx: &mut HandlerCtx<F, T, R>,
) -> Result<usize> {
    let addr = match args.read_u64() {
        Ok(v) => v as u32,
        Err(_) => {
            out.write_u32(WireError::CrcErrorAddressUnspecified.code())?;
            return Ok(out.position());
        }
    };
    let len = match args.read_u32() {
        Ok(v) => v,
        Err(_) => {
            out.write_u32(WireError::CrcErrorLengthUnspecified.code())?;
            return Ok(out.position());
        }
    };
    let end = addr.checked_add(len);
    let in_range = matches!(end, Some(e) if addr >= T::FLASH_BEGIN && addr < T::FLASH_END && e >= T::FLASH_BEGIN && e <= T::FLASH_END);
    if !in_range {
        out.write_u32(WireError::CrcErrorIllegalAddress.code())?;
        return Ok(out.position());
    }
    let crc = crc_region(ctx.flash.inner(), addr, len);
    out.write_u32(crc)?;
    Ok(out.position())
}

fn read_device_class<'b>(args: &mut Reader, buf: &'b mut [u8; DEVICE_CLASS_MAX]) -> Result<&'b str> {
    Ok(args.read_str(buf)?)
}

fn erase_flash_page<F: FlashInterface, T: TargetLayout, R: Reboot>(
    _argc: u32,
    args: &mut Reader,
    out: &mut Writer,
    ctx: &mut HandlerCtx<F, T, R>,
) -> Result<usize> {
    let addr = args.read_u64()? as u32;
    let mut class_buf = [0u8; DEVICE_CLASS_MAX];
    let class = read_device_class(args, &mut class_buf)?;

    if addr < T::APP_ADDR {
        out.write_u32(WireError::FlashEraseErrorBeforeApp.code())?;
        return Ok(out.position());
    }
    if addr >= T::APP_END {
        out.write_u32(WireError::FlashEraseErrorAfterApp.code())?;
        return Ok(out.position());
    }
    if class != ctx.config.device_class.as_str() {
        out.write_u32(WireError::FlashEraseErrorDeviceClassMismatch.code())?;
        return Ok(out.position());
    }

    match ctx.flash.erase_page(addr) {
        Ok(()) => out.write_u32(WireError::Success.code())?,
        Err(_) => out.write_u32(WireError::Unspecified.code())?,
    }
    Ok(out.position())
}

fn write_flash<F: FlashInterface, T: TargetLayout, R: Reboot>(
    _argc: u32,
    args: &mut Reader,
    out: &mut Writer,
    ctx: &mut HandlerCtx<F, T, R>,
) -> Result<usize> {
    let addr = args.read_u64()? as u32;
    let mut class_buf = [0u8; DEVICE_CLASS_MAX];
    let class = read_device_class(args, &mut class_buf)?;

    if addr < T::APP_ADDR {
        out.write_u32(WireError::FlashWriteErrorBeforeApp.code())?;
        return Ok(out.position());
    }
    if addr >= T::APP_END {
        out.write_u32(WireError::FlashWriteErrorAfterApp.code())?;
        return Ok(out.position());
    }
    if class != ctx.config.device_class.as_str() {
        out.write_u32(WireError::FlashWriteErrorDeviceClassMismatch.code())?;
        return Ok(out.position());
    }
    let bytes = match args.read_bin() {
        Ok(b) => b,
        Err(_) => {
            out.write_u32(WireError::FlashWriteErrorUnknownSize.code())?;
            return Ok(out.position());
        }
    };

    match ctx.flash.program(addr, bytes) {
        Ok(()) => out.write_bool(true)?,
        Err(crate::CanbootError::NotErased) => out.write_u32(WireError::FlashWriteErrorNotErased.code())?,
        Err(_) => out.write_u32(WireError::Unspecified.code())?,
    }
    Ok(out.position())
}

fn ping<F: FlashInterface, T: TargetLayout, R: Reboot>(
    _argc: u32,
    _args: &mut Reader,
    out: &mut Writer,
    _ctx: &mut HandlerCtx<F, T, R>,
) -> Result<usize> {
    out.write_bool(true)?;
    Ok(out.position())
}

fn read_flash<F: FlashInterface, T: TargetLayout, R: Reboot>(
    _argc: u32,
    args: &mut Reader,
    out: &mut Writer,
    ctx: &mut HandlerCtx<F, T, R>,
) -> Result<usize> {
    let addr = args.read_u64()? as u32;
    let size = args.read_u32()? as usize;
    let flash = ctx.flash.inner();
    out.write_bin_from(size, |dst| flash.read(addr, dst))?;
    Ok(out.position())
}

fn config_update<F: FlashInterface, T: TargetLayout, R: Reboot>(
    _argc: u32,
    args: &mut Reader,
    out: &mut Writer,
    ctx: &mut HandlerCtx<F, T, R>,
) -> Result<usize> {
    ctx.config.merge_from(args)?;
    out.write_bool(true)?;
    Ok(out.position())
}

fn config_write_to_flash<F: FlashInterface, T: TargetLayout, R: Reboot>(
    _argc: u32,
    _args: &mut Reader,
    out: &mut Writer,
    ctx: &mut HandlerCtx<F, T, R>,
) -> Result<usize> {
    let ok = ctx
        .config_store
        .write_to_flash(ctx.flash.inner_mut(), ctx.config, ctx.page_buf, ctx.scratch)?;
    out.write_bool(ok)?;
    Ok(out.position())
}

fn config_read<F: FlashInterface, T: TargetLayout, R: Reboot>(
    _argc: u32,
    _args: &mut Reader,
    out: &mut Writer,
    ctx: &mut HandlerCtx<F, T, R>,
) -> Result<usize> {
    ctx.config.write_map(out)?;
    Ok(out.position())
}

fn get_status<F: FlashInterface, T: TargetLayout, R: Reboot>(
    _argc: u32,
    _args: &mut Reader,
    out: &mut Writer,
    ctx: &mut HandlerCtx<F, T, R>,
) -> Result<usize> {
    out.write_u8(*ctx.status)?;
    Ok(out.position())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::target::SimTarget;
    use canboot_hal::sim::{SimFlash, SimReboot};

    fn fixture() -> (FlashWriter<SimFlash, SimTarget>, Config, ConfigStore<SimTarget>, SimReboot) {
        let flash = SimFlash::new(SimTarget::FLASH_BEGIN, (SimTarget::FLASH_END - SimTarget::FLASH_BEGIN) as usize);
        let writer = FlashWriter::new(flash);
        let config = Config::defaults(3, "left-arm", "CVRA.motorboard.v1");
        (writer, config, ConfigStore::new(), SimReboot::new(None))
    }

    #[test]
    fn ping_replies_true() {
        let (mut flash, mut config, store, mut reboot) = fixture();
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
        let mut args = Reader::new(&[]);
        let mut buf = [0u8; 8];
        let mut out = Writer::new(&mut buf);
        let n = ping(0, &mut args, &mut out, &mut ctx).unwrap();
        let mut r = Reader::new(&buf[..n]);
        assert!(r.read_bool().unwrap());
    }

    #[test]
    fn erase_flash_page_rejects_device_class_mismatch() {
        let (mut flash, mut config, store, mut reboot) = fixture();
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

        let mut arg_buf = [0u8; 64];
        let mut w = Writer::new(&mut arg_buf);
        w.write_u32(SimTarget::APP_ADDR).unwrap();
        w.write_str("some.other.board").unwrap();
        let n = w.position();
        let mut args = Reader::new(&arg_buf[..n]);

        let mut out_buf = [0u8; 8];
        let mut out = Writer::new(&mut out_buf);
        let len = erase_flash_page(2, &mut args, &mut out, &mut ctx).unwrap();
        let mut r = Reader::new(&out_buf[..len]);
        assert_eq!(r.read_u32().unwrap(), WireError::FlashEraseErrorDeviceClassMismatch.code());
    }

    #[test]
    fn erase_flash_page_rejects_address_before_application_region() {
        let (mut flash, mut config, store, mut reboot) = fixture();
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

        let mut arg_buf = [0u8; 64];
        let mut w = Writer::new(&mut arg_buf);
        w.write_u32(SimTarget::CONFIG1_ADDR).unwrap();
        w.write_str(ctx.config.device_class.as_str()).unwrap();
        let n = w.position();
        let mut args = Reader::new(&arg_buf[..n]);

        let mut out_buf = [0u8; 8];
        let mut out = Writer::new(&mut out_buf);
        let len = erase_flash_page(2, &mut args, &mut out, &mut ctx).unwrap();
        let mut r = Reader::new(&out_buf[..len]);
        assert_eq!(r.read_u32().unwrap(), WireError::FlashEraseErrorBeforeApp.code());
    }

    #[test]
    fn write_flash_rejects_device_class_mismatch_and_leaves_flash_untouched() {
        let (mut flash, mut config, store, mut reboot) = fixture();
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
        ctx.flash.erase_page(SimTarget::APP_ADDR).unwrap();

        let mut arg_buf = [0u8; 64];
        let mut w = Writer::new(&mut arg_buf);
        w.write_u32(SimTarget::APP_ADDR).unwrap();
        w.write_str("some.other.board").unwrap();
        w.write_bin(b"malicious-image").unwrap();
        let n = w.position();
        let mut args = Reader::new(&arg_buf[..n]);

        let mut out_buf = [0u8; 8];
        let mut out = Writer::new(&mut out_buf);
        let len = write_flash(3, &mut args, &mut out, &mut ctx).unwrap();
        let mut r = Reader::new(&out_buf[..len]);
        assert_eq!(r.read_u32().unwrap(), WireError::FlashWriteErrorDeviceClassMismatch.code());

        // the rejected write must not have touched flash state
        let mut readback = [0u8; 16];
        ctx.flash.inner().read(SimTarget::APP_ADDR, &mut readback);
        assert!(readback.iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn write_flash_then_read_flash_round_trips_bytes() {
        let (mut flash, mut config, store, mut reboot) = fixture();
        let mut status = 0u8;
        let mut page_buf = [0u8; SimTarget::PAGE_SIZE];
        let mut scratch = [0u8; SimTarget::PAGE_SIZE];

        {
            let mut ctx = HandlerCtx {
                config: &mut config,
                flash: &mut flash,
                reboot: &mut reboot,
                config_store: &store,
                status: &mut status,
                page_buf: &mut page_buf,
                scratch: &mut scratch,
            };
            ctx.flash.erase_page(SimTarget::APP_ADDR).unwrap();

            let mut arg_buf = [0u8; 64];
            let mut w = Writer::new(&mut arg_buf);
            w.write_u32(SimTarget::APP_ADDR).unwrap();
            w.write_str(ctx.config.device_class.as_str()).unwrap();
            w.write_bin(b"firmware-bytes").unwrap();
            let n = w.position();
            let mut args = Reader::new(&arg_buf[..n]);

            let mut out_buf = [0u8; 32];
            let mut out = Writer::new(&mut out_buf);
            let len = write_flash(3, &mut args, &mut out, &mut ctx).unwrap();
            let mut r = Reader::new(&out_buf[..len]);
            assert!(r.read_bool().unwrap());
        }

        let mut ctx = HandlerCtx {
            config: &mut config,
            flash: &mut flash,
            reboot: &mut reboot,
            config_store: &store,
            status: &mut status,
            page_buf: &mut page_buf,
            scratch: &mut scratch,
        };
        let mut arg_buf = [0u8; 16];
        let mut w = Writer::new(&mut arg_buf);
        w.write_u32(SimTarget::APP_ADDR).unwrap();
        w.write_u32(14).unwrap();
        let n = w.position();
        let mut args = Reader::new(&arg_buf[..n]);
        let mut out_buf = [0u8; 32];
        let mut out = Writer::new(&mut out_buf);
        let len = read_flash(2, &mut args, &mut out, &mut ctx).unwrap();
        let mut r = Reader::new(&out_buf[..len]);
        assert_eq!(r.read_bin().unwrap(), b"firmware-bytes");
    }

    #[test]
    fn jump_to_application_falls_back_to_no_timeout_on_crc_mismatch() {
        let (mut flash, mut config, store, mut reboot) = fixture();
        config.application_crc = 0xDEAD_BEEF;
        config.application_size = 16;
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
        let mut args = Reader::new(&[]);
        let mut out_buf = [0u8; 8];
        let mut out = Writer::new(&mut out_buf);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            jump_to_application(0, &mut args, &mut out, &mut ctx)
        }));
        assert!(result.is_err()); // SimReboot panics instead of resetting
    }
}
