//! `bootctl`: a host console for the canboot field-upgrade protocol. It
//! encodes one command-set request per invocation, frames and sends it
//! over a [`canboot_hal::CanInterface`], then decodes whatever comes
//! back - the same request/reply shape `canboot::dispatch` implements on
//! the node side, read from the other end of the wire.

mod cli;
mod protocol;
mod sim;
#[cfg(feature = "socketcan-backend")]
mod socketcan_backend;
mod transport;

use std::fs;

use anyhow::{bail, Context, Result};
use canboot::codec::{Reader, Writer};
use canboot::commands;
use canboot::config::{KEY_APPLICATION_CRC, KEY_APPLICATION_SIZE, KEY_DEVICE_CLASS, KEY_ID, KEY_NAME, KEY_UPDATE_COUNT};
use canboot::wire::WireError;
use clap::Parser;
use log::info;

use cli::{Cli, Command};
use transport::Backend;

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let mut backend = open_backend(&cli)?;

    match &cli.command {
        Command::Ping => {
            let reply = request(&mut backend, &cli, commands::PING, 0, |_w| Ok(()))?;
            println!("ping: {}", decode_bool_or_code(&reply));
        }
        Command::CrcRegion { addr, len } => {
            let reply = request(&mut backend, &cli, commands::CRC_REGION, 2, |w| {
                w.write_u32(*addr)?;
                w.write_u32(*len)?;
                Ok(())
            })?;
            let mut r = Reader::new(&reply);
            let v = codec(r.read_u32(), "decoding crc_region reply")?;
            println!("crc_region: 0x{:08x} (or an error code in the 30..=32 range - see wire docs)", v);
        }
        Command::EraseFlashPage { addr, device_class } => {
            let reply = request(&mut backend, &cli, commands::ERASE_FLASH_PAGE, 2, |w| {
                w.write_u32(*addr)?;
                w.write_str(device_class)?;
                Ok(())
            })?;
            let mut r = Reader::new(&reply);
            let code = codec(r.read_u32(), "decoding erase_flash_page reply")?;
            println!("erase_flash_page: {}", describe_code(code));
        }
        Command::WriteFlash { addr, device_class, file } => {
            let bytes = fs::read(file).with_context(|| format!("reading {}", file.display()))?;
            let reply = request(&mut backend, &cli, commands::WRITE_FLASH, 3, |w| {
                w.write_u32(*addr)?;
                w.write_str(device_class)?;
                w.write_bin(&bytes)?;
                Ok(())
            })?;
            println!("write_flash: {}", decode_bool_or_code(&reply));
        }
        Command::ReadFlash { addr, len } => {
            let reply = request(&mut backend, &cli, commands::READ_FLASH, 2, |w| {
                w.write_u32(*addr)?;
                w.write_u32(*len)?;
                Ok(())
            })?;
            let mut r = Reader::new(&reply);
            let bytes = codec(r.read_bin(), "decoding read_flash reply")?;
            println!("read_flash: {} bytes", bytes.len());
            println!("{}", hex(bytes));
        }
        Command::ConfigUpdate {
            id,
            name,
            device_class,
            application_crc,
            application_size,
            update_count,
        } => {
            let fields: Vec<(&str, Field)> = [
                id.map(|v| (KEY_ID, Field::U8(v))),
                name.clone().map(|v| (KEY_NAME, Field::Str(v))),
                device_class.clone().map(|v| (KEY_DEVICE_CLASS, Field::Str(v))),
                application_crc.map(|v| (KEY_APPLICATION_CRC, Field::U32(v))),
                application_size.map(|v| (KEY_APPLICATION_SIZE, Field::U32(v))),
                update_count.map(|v| (KEY_UPDATE_COUNT, Field::U32(v))),
            ]
            .into_iter()
            .flatten()
            .collect();
            if fields.is_empty() {
                bail!("config-update needs at least one field");
            }
            let reply = request(&mut backend, &cli, commands::CONFIG_UPDATE, 1, |w| {
                w.write_map_header(fields.len() as u32)?;
                for (key, value) in &fields {
                    w.write_str(key)?;
                    match value {
                        Field::U8(v) => w.write_u8(*v)?,
                        Field::U32(v) => w.write_u32(*v)?,
                        Field::Str(v) => w.write_str(v)?,
                    }
                }
                Ok(())
            })?;
            println!("config_update: {}", decode_bool_or_code(&reply));
        }
        Command::ConfigWriteToFlash => {
            let reply = request(&mut backend, &cli, commands::CONFIG_WRITE_TO_FLASH, 0, |_w| Ok(()))?;
            println!("config_write_to_flash: {}", decode_bool_or_code(&reply));
        }
        Command::ConfigRead => {
            let reply = request(&mut backend, &cli, commands::CONFIG_READ, 0, |_w| Ok(()))?;
            println!("{}", decode_config_map(&reply)?);
        }
        Command::JumpToApplication => {
            let mut buf = [0u8; 16];
            let n = protocol::build_request(&mut buf, commands::JUMP_TO_APPLICATION, 0, |_w| Ok(()))?;
            info!("sending jump_to_application; the node never replies to this one");
            let sent = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                protocol::send_frames(&mut backend, cli.node, cli.local_id, &buf[..n])
            }));
            match sent {
                Ok(result) => result?,
                Err(_) => println!("node reset while handling the request (expected - no reply is ever sent)"),
            }
            println!("jump_to_application: sent");
        }
        Command::GetStatus => {
            let reply = request(&mut backend, &cli, commands::GET_STATUS, 0, |_w| Ok(()))?;
            let mut r = Reader::new(&reply);
            let status = codec(r.read_u8(), "decoding get_status reply")?;
            println!("get_status: {}", describe_code(status as u32));
        }
    }

    Ok(())
}

enum Field {
    U8(u8),
    U32(u32),
    Str(String),
}

fn open_backend(cli: &Cli) -> Result<Backend> {
    #[cfg(feature = "socketcan-backend")]
    if let Some(iface) = &cli.iface {
        return Ok(Backend::SocketCan(socketcan_backend::SocketCanBackend::open(iface)?));
    }
    Ok(Backend::Sim(sim::SimBackend::new(
        cli.sim_node_id,
        &cli.sim_node_name,
        &cli.sim_device_class,
    )))
}

fn request(
    backend: &mut Backend,
    cli: &Cli,
    index: i32,
    argc: u32,
    write_args: impl FnOnce(&mut Writer) -> canboot::codec::CodecResult<()>,
) -> Result<Vec<u8>> {
    let mut buf = [0u8; 4096];
    let n = protocol::build_request(&mut buf, index, argc, write_args)?;
    protocol::send_command(backend, cli.node, cli.local_id, &buf[..n])
}

/// Some replies are a bare success value on the happy path and a wire
/// error code on every other path - the node-side handlers that do this
/// are documented at their definition in `canboot::commands`. The marker
/// byte tells the two apart: `read_bool` only succeeds on an actual bool.
fn decode_bool_or_code(bytes: &[u8]) -> String {
    let probe = Reader::new(bytes);
    if let Ok(ok) = { let mut p = probe; p.read_bool() } {
        return format!("ok: {}", ok);
    }
    let mut r = Reader::new(bytes);
    match r.read_u32() {
        Ok(code) => describe_code(code),
        Err(_) => "<unreadable reply>".to_string(),
    }
}

fn describe_code(code: u32) -> String {
    use WireError::*;
    let known: &[(u32, &str)] = &[
        (Unspecified.code(), "unspecified"),
        (Success.code(), "success"),
        (CorruptDatagram.code(), "corrupt datagram"),
        (InvalidCommand.code(), "invalid command"),
        (CommandNotFound.code(), "command not found"),
        (InvalidCommandSetVersion.code(), "invalid command-set version"),
        (DatagramTimeout.code(), "datagram timeout"),
        (FlashEraseErrorBeforeApp.code(), "erase address before application region"),
        (FlashEraseErrorAfterApp.code(), "erase address after application region"),
        (FlashEraseErrorDeviceClassMismatch.code(), "erase device class mismatch"),
        (FlashWriteErrorBeforeApp.code(), "write address before application region"),
        (FlashWriteErrorAfterApp.code(), "write address after application region"),
        (FlashWriteErrorDeviceClassMismatch.code(), "write device class mismatch"),
        (FlashWriteErrorUnknownSize.code(), "write missing byte payload"),
        (FlashWriteErrorNotErased.code(), "write target not erased"),
        (CrcErrorAddressUnspecified.code(), "crc address missing"),
        (CrcErrorLengthUnspecified.code(), "crc length missing"),
        (CrcErrorIllegalAddress.code(), "crc address out of range"),
    ];
    match known.iter().find(|(c, _)| *c == code) {
        Some((_, label)) => format!("{} ({})", code, label),
        None => format!("{} (unrecognized code)", code),
    }
}

fn decode_config_map(bytes: &[u8]) -> Result<String> {
    let mut r = Reader::new(bytes);
    let count = codec(r.read_map_header(), "decoding config_read reply")?;
    let mut out = String::new();
    let mut key_buf = [0u8; 64];
    let mut str_buf = [0u8; 64];
    for _ in 0..count {
        let key = codec(r.read_str(&mut key_buf), "decoding config_read key")?.to_string();
        let value = codec(
            match key.as_str() {
                KEY_ID => r.read_u8().map(|v| v.to_string()),
                KEY_NAME | KEY_DEVICE_CLASS => r.read_str(&mut str_buf).map(|v| v.to_string()),
                KEY_APPLICATION_CRC => r.read_u32().map(|v| format!("0x{:08x}", v)),
                KEY_APPLICATION_SIZE | KEY_UPDATE_COUNT => r.read_u32().map(|v| v.to_string()),
                _ => r.skip_value().map(|()| "<unrecognized>".to_string()),
            },
            "decoding config_read value",
        )?;
        out.push_str(&format!("{}: {}\n", key, value));
    }
    Ok(out.trim_end().to_string())
}

/// Converts a codec-level failure (which can't carry a `std::error::Error`
/// impl in a `no_std` crate) into an annotated `anyhow::Error`.
fn codec<T>(r: canboot::codec::CodecResult<T>, label: &str) -> Result<T> {
    r.map_err(|e| anyhow::anyhow!("{}: {:?}", label, e))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect::<Vec<_>>().join(" ")
}
