//! The persistent configuration record and its two-copy, CRC-protected
//! flash representation (spec.md section 3, section 4.5).
//!
//! A `Config` is read once at startup into RAM and only ever written
//! back to flash on an explicit `CONFIG_WRITE_TO_FLASH` command; the
//! dual-write sequence in [`ConfigStore::write_to_flash`] is the one
//! place that has to reason about power loss mid-update.

use byteorder::{BigEndian, ByteOrder};
use canboot_hal::FlashInterface;

use crate::codec::{Reader, Writer};
use crate::crc::crc32;
use crate::target::TargetLayout;
use crate::{CanbootError, Result};

pub const NAME_MAX: usize = 64;
pub const DEVICE_CLASS_MAX: usize = 64;

pub const KEY_ID: &str = "ID";
pub const KEY_NAME: &str = "name";
pub const KEY_DEVICE_CLASS: &str = "device_class";
pub const KEY_APPLICATION_CRC: &str = "application_crc";
pub const KEY_APPLICATION_SIZE: &str = "application_size";
pub const KEY_UPDATE_COUNT: &str = "update_count";

/// A fixed-capacity ASCII string, since `canboot` has no allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedString<const N: usize> {
    buf: [u8; N],
    len: usize,
}

impl<const N: usize> FixedString<N> {
    pub const fn empty() -> Self {
        FixedString { buf: [0; N], len: 0 }
    }

    /// Truncates `s` to `N` bytes if it doesn't fit rather than erroring
    /// - mirrors the original's fixed `char[64+1]` buffers, which simply
    /// can't represent a longer value.
    pub fn from_str_truncating(s: &str) -> Self {
        let mut out = Self::empty();
        let len = s.len().min(N);
        out.buf[..len].copy_from_slice(&s.as_bytes()[..len]);
        out.len = len;
        out
    }

    pub fn as_str(&self) -> &str {
        core::str::from_utf8(&self.buf[..self.len]).unwrap_or("")
    }
}

impl<const N: usize> Default for FixedString<N> {
    fn default() -> Self {
        Self::empty()
    }
}

/// The device's persistent record: identity, device class, the CRC and
/// size of the application image it currently trusts, and a monotonic
/// update counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub id: u8,
    pub name: FixedString<NAME_MAX>,
    pub device_class: FixedString<DEVICE_CLASS_MAX>,
    pub application_crc: u32,
    pub application_size: u32,
    pub update_count: u32,
}

impl Config {
    /// The "exact behaviour at invalid config is not yet defined"
    /// fallback (spec.md Open Questions (i)): fabricated in RAM only,
    /// never auto-persisted.
    pub fn defaults(id: u8, name: &str, device_class: &str) -> Self {
        Config {
            id,
            name: FixedString::from_str_truncating(name),
            device_class: FixedString::from_str_truncating(device_class),
            application_crc: 0,
            application_size: 0,
            update_count: 1,
        }
    }

    /// Serializes the six-key map this record is defined as (spec.md
    /// section 3), independent of any page framing.
    pub fn write_map(&self, w: &mut Writer) -> Result<()> {
        w.write_map_header(6)?;
        w.write_str(KEY_ID)?;
        w.write_u8(self.id)?;
        w.write_str(KEY_NAME)?;
        w.write_str(self.name.as_str())?;
        w.write_str(KEY_DEVICE_CLASS)?;
        w.write_str(self.device_class.as_str())?;
        w.write_str(KEY_APPLICATION_CRC)?;
        w.write_u32(self.application_crc)?;
        w.write_str(KEY_APPLICATION_SIZE)?;
        w.write_u32(self.application_size)?;
        w.write_str(KEY_UPDATE_COUNT)?;
        w.write_u32(self.update_count)?;
        Ok(())
    }

    /// Merges recognized keys from a serialized map into `self`; a key
    /// this build doesn't recognize has its value skipped rather than
    /// rejected, so a host sending a newer key set than this node
    /// understands still gets its known keys applied.
    pub fn merge_from(&mut self, r: &mut Reader) -> Result<()> {
        let count = r.read_map_header()?;
        let mut key_buf = [0u8; 64];
        for _ in 0..count {
            let key = r.read_str(&mut key_buf)?;
            match key {
                KEY_ID => self.id = r.read_u8()?,
                KEY_NAME => {
                    let mut name_buf = [0u8; NAME_MAX];
                    let name = r.read_str(&mut name_buf)?;
                    self.name = FixedString::from_str_truncating(name);
                }
                KEY_DEVICE_CLASS => {
                    let mut class_buf = [0u8; DEVICE_CLASS_MAX];
                    let class = r.read_str(&mut class_buf)?;
                    self.device_class = FixedString::from_str_truncating(class);
                }
                KEY_APPLICATION_CRC => self.application_crc = r.read_u32()?,
                KEY_APPLICATION_SIZE => self.application_size = r.read_u32()?,
                KEY_UPDATE_COUNT => self.update_count = r.read_u32()?,
                _ => r.skip_value()?,
            }
        }
        Ok(())
    }

    /// A full record parsed straight from a map, used to load a config
    /// page (which always carries every key).
    fn from_map(r: &mut Reader) -> Result<Self> {
        let mut config = Config::defaults(0, "", "");
        config.merge_from(r)?;
        Ok(config)
    }
}

/// Writes the CRC-prefixed page layout (spec.md section 3) into
/// `page_buf`: bytes 0..3 are the big-endian CRC-32 of bytes 4..; the
/// rest holds the serialized record, zero-padded to the end of the
/// buffer. `page_buf.len()` is the page size.
fn serialize_page(page_buf: &mut [u8], config: &Config) -> Result<()> {
    for b in page_buf.iter_mut() {
        *b = 0;
    }
    {
        let mut w = Writer::new(&mut page_buf[4..]);
        config.write_map(&mut w)?;
    }
    let crc = crc32(0, &page_buf[4..]);
    BigEndian::write_u32(&mut page_buf[0..4], crc);
    Ok(())
}

fn page_crc_matches(page_buf: &[u8]) -> bool {
    if page_buf.len() < 4 {
        return false;
    }
    let stored = BigEndian::read_u32(&page_buf[0..4]);
    stored == crc32(0, &page_buf[4..])
}

/// Owns the dual-copy config-page logic for a given target layout. Has
/// no state of its own; every operation takes the flash and a
/// caller-owned page-sized scratch buffer explicitly, the way the
/// original's `bootloader_main` owns its buffers on the stack rather
/// than the config module owning static storage.
pub struct ConfigStore<T> {
    _target: core::marker::PhantomData<T>,
}

impl<T: TargetLayout> ConfigStore<T> {
    pub fn new() -> Self {
        ConfigStore {
            _target: core::marker::PhantomData,
        }
    }

    /// True iff `page_addr` lies within the flash region and its stored
    /// CRC matches its contents.
    pub fn is_valid<F: FlashInterface>(&self, flash: &F, page_addr: u32, scratch: &mut [u8]) -> bool {
        if page_addr < T::FLASH_BEGIN || page_addr >= T::FLASH_END {
            return false;
        }
        flash.read(page_addr, scratch);
        page_crc_matches(scratch)
    }

    fn read_page<F: FlashInterface>(&self, flash: &F, page_addr: u32, scratch: &mut [u8]) -> Result<Config> {
        if !self.is_valid(flash, page_addr, scratch) {
            return Err(CanbootError::InvalidConfigPage);
        }
        let mut r = Reader::new(&scratch[4..]);
        Config::from_map(&mut r)
    }

    /// Startup load: `config1` wins if valid, else `config2`, else the
    /// fabricated defaults (spec.md section 4.5 / Open Questions (i)).
    pub fn load<F: FlashInterface>(
        &self,
        flash: &F,
        scratch: &mut [u8],
        default_id: u8,
        default_name: &str,
        default_device_class: &str,
    ) -> Config {
        if let Ok(c) = self.read_page(flash, T::CONFIG1_ADDR, scratch) {
            return c;
        }
        if let Ok(c) = self.read_page(flash, T::CONFIG2_ADDR, scratch) {
            return c;
        }
        Config::defaults(default_id, default_name, default_device_class)
    }

    fn write_and_verify<F: FlashInterface>(
        &self,
        flash: &mut F,
        page_addr: u32,
        page_buf: &[u8],
        scratch: &mut [u8],
    ) -> bool {
        flash.unlock();
        let ok = flash.page_erase(page_addr).is_ok() && flash.page_program(page_addr, page_buf).is_ok();
        flash.lock();
        ok && self.is_valid(flash, page_addr, scratch)
    }

    /// Executes the `CONFIG_WRITE_TO_FLASH` dual-write sequence: bumps
    /// `update_count`, then writes the two copies in whichever order
    /// leaves a valid copy standing at every instant (spec.md section
    /// 4.5). Returns whether both copies verified.
    ///
    /// `scratch` and `page_buf` must each be one page long; they are
    /// distinct because `is_valid` needs to read a copy back into
    /// `scratch` while `page_buf` still holds the not-yet-written new
    /// record.
    pub fn write_to_flash<F: FlashInterface>(
        &self,
        flash: &mut F,
        config: &mut Config,
        page_buf: &mut [u8],
        scratch: &mut [u8],
    ) -> Result<bool> {
        let config1_valid_before = self.is_valid(flash, T::CONFIG1_ADDR, scratch);
        let config2_valid_before = self.is_valid(flash, T::CONFIG2_ADDR, scratch);

        config.update_count += 1;
        serialize_page(page_buf, config)?;

        let success = if config2_valid_before {
            self.write_and_verify(flash, T::CONFIG1_ADDR, page_buf, scratch)
                && self.write_and_verify(flash, T::CONFIG2_ADDR, page_buf, scratch)
        } else if config1_valid_before {
            self.write_and_verify(flash, T::CONFIG2_ADDR, page_buf, scratch)
                && self.write_and_verify(flash, T::CONFIG1_ADDR, page_buf, scratch)
        } else {
            let a = self.write_and_verify(flash, T::CONFIG1_ADDR, page_buf, scratch);
            let b = self.write_and_verify(flash, T::CONFIG2_ADDR, page_buf, scratch);
            a && b
        };
        Ok(success)
    }
}

impl<T: TargetLayout> Default for ConfigStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::SimTarget;
    use canboot_hal::sim::SimFlash;

    fn sample_config() -> Config {
        let mut c = Config::defaults(42, "left-arm", "CVRA.motorboard.v1");
        c.application_crc = 0xAABB_CCDD;
        c.application_size = 12_345;
        c.update_count = 7;
        c
    }

    #[test]
    fn config_map_round_trips() {
        let original = sample_config();
        let mut buf = [0u8; 256];
        let mut w = Writer::new(&mut buf);
        original.write_map(&mut w).unwrap();
        let n = w.position();

        let mut r = Reader::new(&buf[..n]);
        let decoded = Config::from_map(&mut r).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn merge_ignores_unknown_keys_silently() {
        let mut buf = [0u8; 256];
        let mut w = Writer::new(&mut buf);
        w.write_map_header(3).unwrap();
        w.write_str("bootloader_variant").unwrap(); // a key this build has never heard of
        w.write_str("nrf52840").unwrap();
        w.write_str(KEY_NAME).unwrap();
        w.write_str("renamed").unwrap();
        w.write_str("firmware_signature").unwrap(); // another unknown, nested this time
        w.write_array_header(2).unwrap();
        w.write_u32(1).unwrap();
        w.write_u32(2).unwrap();
        let n = w.position();

        let mut config = sample_config();
        let mut r = Reader::new(&buf[..n]);
        config.merge_from(&mut r).unwrap();
        assert_eq!(config.name.as_str(), "renamed");
        assert_eq!(config.update_count, 7); // untouched
    }

    #[test]
    fn startup_prefers_config1_then_config2_then_defaults() {
        let store = ConfigStore::<SimTarget>::new();
        let mut flash = SimFlash::new(SimTarget::FLASH_BEGIN, (SimTarget::FLASH_END - SimTarget::FLASH_BEGIN) as usize);
        let mut scratch = [0u8; SimTarget::PAGE_SIZE];

        let loaded = store.load(&flash, &mut scratch, 9, "fallback", "unknown");
        assert_eq!(loaded.id, 9);
        assert_eq!(loaded.update_count, 1);

        let mut config = sample_config();
        let mut page_buf = [0u8; SimTarget::PAGE_SIZE];
        serialize_page(&mut page_buf, &config).unwrap();
        flash.unlock();
        flash.page_erase(SimTarget::CONFIG2_ADDR).unwrap();
        flash.page_program(SimTarget::CONFIG2_ADDR, &page_buf).unwrap();
        flash.lock();

        let loaded = store.load(&flash, &mut scratch, 9, "fallback", "unknown");
        assert_eq!(loaded, config);

        config.update_count = 99;
        serialize_page(&mut page_buf, &config).unwrap();
        flash.unlock();
        flash.page_erase(SimTarget::CONFIG1_ADDR).unwrap();
        flash.page_program(SimTarget::CONFIG1_ADDR, &page_buf).unwrap();
        flash.lock();

        let loaded = store.load(&flash, &mut scratch, 9, "fallback", "unknown");
        assert_eq!(loaded.update_count, 99);
    }

    #[test]
    fn dual_write_keeps_at_least_one_valid_copy_across_simulated_power_loss() {
        let store = ConfigStore::<SimTarget>::new();
        let mut flash = SimFlash::new(SimTarget::FLASH_BEGIN, (SimTarget::FLASH_END - SimTarget::FLASH_BEGIN) as usize);
        let mut scratch = [0u8; SimTarget::PAGE_SIZE];
        let mut page_buf = [0u8; SimTarget::PAGE_SIZE];

        // Seed both copies as valid, update_count = 7.
        let seed = sample_config();
        serialize_page(&mut page_buf, &seed).unwrap();
        for addr in [SimTarget::CONFIG1_ADDR, SimTarget::CONFIG2_ADDR] {
            flash.unlock();
            flash.page_erase(addr).unwrap();
            flash.page_program(addr, &page_buf).unwrap();
            flash.lock();
        }
        assert!(store.is_valid(&flash, SimTarget::CONFIG1_ADDR, &mut scratch));
        assert!(store.is_valid(&flash, SimTarget::CONFIG2_ADDR, &mut scratch));

        // CONFIG_UPDATE{name="foo"} then crash after config1 is written
        // but before config2 (S5): replicate the first half of
        // write_to_flash by hand.
        let mut updated = seed;
        updated.name = FixedString::from_str_truncating("foo");
        updated.update_count += 1;
        serialize_page(&mut page_buf, &updated).unwrap();
        let ok = store.write_and_verify(&mut flash, SimTarget::CONFIG1_ADDR, &page_buf, &mut scratch);
        assert!(ok); // crash happens right here, before config2 is touched

        let c1 = store.read_page(&flash, SimTarget::CONFIG1_ADDR, &mut scratch).unwrap();
        let c2 = store.read_page(&flash, SimTarget::CONFIG2_ADDR, &mut scratch).unwrap();
        assert_eq!(c1.name.as_str(), "foo");
        assert_eq!(c1.update_count, 8);
        assert_eq!(c2, seed); // untouched copy is still the pre-update record

        let booted = store.load(&flash, &mut scratch, 0, "", "");
        assert_eq!(booted, c1); // startup picks config1
    }

    #[test]
    fn update_count_strictly_increases_on_successful_write() {
        let store = ConfigStore::<SimTarget>::new();
        let mut flash = SimFlash::new(SimTarget::FLASH_BEGIN, (SimTarget::FLASH_END - SimTarget::FLASH_BEGIN) as usize);
        let mut config = sample_config();
        let before = config.update_count;
        let mut page_buf = [0u8; SimTarget::PAGE_SIZE];
        let mut scratch = [0u8; SimTarget::PAGE_SIZE];

        let ok = store
            .write_to_flash(&mut flash, &mut config, &mut page_buf, &mut scratch)
            .unwrap();
        assert!(ok);
        assert!(config.update_count >= before + 1);
    }
}
