//! Table-driven address decoding.

use std::collections::BTreeMap;
use std::fmt;

use memmap2::{MmapMut, MmapOptions};
use tracing::{debug, trace, warn};

use crate::bus::{AccessPolicy, Bus, ByteEnable, Peripherals};
use crate::config::*;
use crate::error::*;

/// Memory-mapped register block. Handlers see absolute addresses.
pub trait Mmio: Send {
    /// `None` marks a port nothing answers to.
    fn read(&mut self, addr: u32) -> Option<u32>;

    /// Side-effect-free read for display and the debugger.
    fn peek(&self, addr: u32) -> Option<u32>;

    fn write(&mut self, addr: u32, value: u32, mask: ByteEnable);

    /// Interrupt lines currently asserted, as `mip` bits.
    fn irq_lines(&self) -> u32 {
        0
    }
}

/// Word-addressed backing store on an anonymous mapping.
pub struct Store {
    host_mmap: MmapMut,
}

impl Store {
    pub fn new(len: u32) -> Result<Self> {
        let len = round_up!(len, 4) as usize;
        let host_mmap = MmapOptions::new().len(len).map_anon().map_err(|e| {
            warn!("Failed to create memory map: {}", e);
            Error::Io(e)
        })?;
        Ok(Self { host_mmap })
    }

    pub fn len(&self) -> u32 {
        self.host_mmap.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.host_mmap.is_empty()
    }

    fn word(&self, offset: u32) -> u32 {
        let i = round_down!(offset, 4) as usize;
        let b = &self.host_mmap[i..i + 4];
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }

    fn set_word(&mut self, offset: u32, value: u32, mask: ByteEnable) {
        let merged = mask.merge(self.word(offset), value);
        let i = round_down!(offset, 4) as usize;
        self.host_mmap[i..i + 4].copy_from_slice(&merged.to_le_bytes());
    }

    fn copy_in(&mut self, offset: u32, data: &[u8]) {
        let start = offset as usize;
        self.host_mmap[start..start + data.len()].copy_from_slice(data);
    }

    fn fill(&mut self, offset: u32, len: u32, value: u8) {
        let start = offset as usize;
        self.host_mmap[start..start + len as usize].fill(value);
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store").field("len", &self.len()).finish()
    }
}

pub enum Backing {
    /// Read-only to the CPU; image loads and the debugger may still write.
    Boot(Store),
    Ram(Store),
    Mmio(Box<dyn Mmio>),
}

impl fmt::Debug for Backing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backing::Boot(store) => f.debug_tuple("Boot").field(store).finish(),
            Backing::Ram(store) => f.debug_tuple("Ram").field(store).finish(),
            Backing::Mmio(_) => f.write_str("Mmio"),
        }
    }
}

#[derive(Debug)]
pub struct Region {
    pub name: &'static str,
    pub start: u32,
    pub size: u32,
    pub backing: Backing,
}

impl Region {
    pub fn boot(start: u32, size: u32) -> Result<Self> {
        Ok(Self { name: "boot", start, size, backing: Backing::Boot(Store::new(size)?) })
    }

    pub fn ram(start: u32, size: u32) -> Result<Self> {
        Ok(Self { name: "ram", start, size, backing: Backing::Ram(Store::new(size)?) })
    }

    pub fn mmio(start: u32, size: u32, handler: Box<dyn Mmio>) -> Self {
        Self { name: "mmio", start, size, backing: Backing::Mmio(handler) }
    }

    /// Exclusive end; may be 2^32.
    pub fn end(&self) -> u64 {
        self.start as u64 + self.size as u64
    }

    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.start && (addr as u64) < self.end()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusConfig {
    pub ram_size: u32,
    pub policy: AccessPolicy,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            ram_size: RAM_SIZE,
            policy: AccessPolicy::DEFAULT,
        }
    }
}

#[derive(Debug)]
pub struct Router {
    /// (start address, region)
    regions: BTreeMap<u32, Region>,
    policy: AccessPolicy,
}

impl Router {
    pub fn new(policy: AccessPolicy) -> Self {
        Self {
            regions: BTreeMap::new(),
            policy,
        }
    }

    /// Boot store, peripheral window and main store at their default places.
    pub fn with_default_map(config: &BusConfig, peripherals: Peripherals) -> Result<Self> {
        let mut router = Self::new(config.policy);
        router.add_region(Region::boot(BOOT_START, BOOT_SIZE)?)?;
        router.add_region(Region::mmio(MMIO_START, MMIO_SIZE, Box::new(peripherals)))?;
        router.add_region(Region::ram(RAM_START, config.ram_size)?)?;
        Ok(router)
    }

    pub fn add_region(&mut self, region: Region) -> Result<()> {
        if region.size == 0 {
            return Err(Error::EmptyRegion { name: region.name });
        }
        for existing in self.regions.values() {
            if (region.start as u64) < existing.end() && (existing.start as u64) < region.end() {
                warn!(
                    "Region '{}' at {:#x} overlaps '{}' at {:#x}",
                    region.name, region.start, existing.name, existing.start
                );
                return Err(Error::RegionOverlap { name: region.name, start: region.start });
            }
        }
        debug!("mapped {} [{:#010x}, {:#x})", region.name, region.start, region.end());
        self.regions.insert(region.start, region);
        Ok(())
    }

    pub fn policy(&self) -> AccessPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: AccessPolicy) {
        self.policy = policy;
    }

    pub fn regions(&self) -> impl Iterator<Item = &Region> {
        self.regions.values()
    }

    fn region(&self, addr: u32) -> Option<&Region> {
        self.regions
            .range(..=addr)
            .next_back()
            .map(|(_, region)| region)
            .filter(|region| region.contains(addr))
    }

    fn region_mut(&mut self, addr: u32) -> Option<&mut Region> {
        self.regions
            .range_mut(..=addr)
            .next_back()
            .map(|(_, region)| region)
            .filter(|region| region.contains(addr))
    }

    /// The store holding `addr..addr + len` and the offset of `addr` in it.
    fn store_range(&mut self, addr: u32, len: usize) -> Result<(&mut Store, u32)> {
        let too_large = Error::ImageTooLarge { addr, len };
        let Some(region) = self.region_mut(addr) else {
            return Err(too_large);
        };
        let offset = addr - region.start;
        if offset as u64 + len as u64 > region.size as u64 {
            return Err(too_large);
        }
        match &mut region.backing {
            Backing::Boot(store) | Backing::Ram(store) => Ok((store, offset)),
            Backing::Mmio(_) => Err(too_large),
        }
    }

    /// Copies an image into a boot or main store, bypassing write protection.
    /// The image must fit inside a single store.
    pub fn load(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        let (store, offset) = self.store_range(addr, data.len())?;
        store.copy_in(offset, data);
        Ok(())
    }

    /// Sets `len` bytes from `addr` to `value`, with the same rules as `load`.
    pub fn fill(&mut self, addr: u32, len: u32, value: u8) -> Result<()> {
        let (store, offset) = self.store_range(addr, len as usize)?;
        store.fill(offset, len, value);
        Ok(())
    }

    /// Debugger write of a single byte. Reaches the boot store too.
    pub fn poke(&mut self, addr: u32, value: u8) -> bool {
        let lane = ByteEnable::span(addr & 3, 1);
        let data = (value as u32).wrapping_mul(0x0101_0101);
        let Some(region) = self.region_mut(addr) else {
            return false;
        };
        let offset = addr - region.start;
        match &mut region.backing {
            Backing::Boot(store) | Backing::Ram(store) => store.set_word(offset, data, lane),
            Backing::Mmio(handler) => handler.write(round_down!(addr, 4), data, lane),
        }
        true
    }

    /// Interrupt lines asserted by any peripheral block.
    pub fn irq_lines(&self) -> u32 {
        self.regions
            .values()
            .filter_map(|region| match &region.backing {
                Backing::Mmio(handler) => Some(handler.irq_lines()),
                _ => None,
            })
            .fold(0, |lines, l| lines | l)
    }
}

impl Bus for Router {
    fn read(&mut self, addr: u32) -> Option<u32> {
        let addr = round_down!(addr, 4);
        let region = self.region_mut(addr)?;
        let offset = addr - region.start;
        match &mut region.backing {
            Backing::Boot(store) | Backing::Ram(store) => Some(store.word(offset)),
            Backing::Mmio(handler) => handler.read(addr),
        }
    }

    fn peek(&self, addr: u32) -> Option<u32> {
        let addr = round_down!(addr, 4);
        let region = self.region(addr)?;
        let offset = addr - region.start;
        match &region.backing {
            Backing::Boot(store) | Backing::Ram(store) => Some(store.word(offset)),
            Backing::Mmio(handler) => handler.peek(addr),
        }
    }

    fn write(&mut self, addr: u32, value: u32, mask: ByteEnable) {
        let addr = round_down!(addr, 4);
        let Some(region) = self.region_mut(addr) else {
            trace!("dropped write to unmapped {:#010x}", addr);
            return;
        };
        let offset = addr - region.start;
        match &mut region.backing {
            Backing::Boot(_) => trace!("dropped write to boot store at {:#010x}", addr),
            Backing::Ram(store) => store.set_word(offset, value, mask),
            Backing::Mmio(handler) => handler.write(addr, value, mask),
        }
    }

    fn policy(&self) -> AccessPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::access::{self, Width};

    fn router() -> Router {
        Router::with_default_map(&BusConfig::default(), Peripherals::default()).unwrap()
    }

    #[test]
    fn test_ram_read_write() {
        let mut bus = router();
        bus.write(RAM_START, 0x1234_5678, ByteEnable::ALL);
        assert_eq!(bus.read(RAM_START), Some(0x1234_5678));
        bus.write(RAM_START + 2, 0xffff_ffff, ByteEnable::LANE3);
        assert_eq!(bus.peek(RAM_START), Some(0xff34_5678));
    }

    #[test]
    fn test_unmapped_is_distinct_from_zero() {
        let mut bus = router();
        assert_eq!(bus.read(RAM_START + 0x100), Some(0));
        assert_eq!(bus.read(0x4000_0000), None);
        assert_eq!(bus.peek(0x4000_0000), None);
        assert_eq!(bus.peek(RAM_START + RAM_SIZE), None);
        assert_eq!(access::load(&mut bus, 0x4000_0000, Width::Word), 0);
    }

    #[test]
    fn test_boot_store_is_read_only() {
        let mut bus = router();
        bus.load(BOOT_START, &[0x13, 0x00, 0x00, 0x00]).unwrap();
        bus.write(BOOT_START, 0xffff_ffff, ByteEnable::ALL);
        assert_eq!(bus.read(BOOT_START), Some(0x0000_0013));

        assert!(bus.poke(BOOT_START + 3, 0xaa));
        assert_eq!(bus.read(BOOT_START), Some(0xaa00_0013));
    }

    #[test]
    fn test_overlapping_regions_rejected() {
        let mut bus = router();
        let err = bus.add_region(Region::ram(RAM_START + 0x1000, 0x1000).unwrap());
        assert!(matches!(err, Err(Error::RegionOverlap { .. })));
        let err = bus.add_region(Region::ram(MMIO_START - 0x10, 0x20).unwrap());
        assert!(matches!(err, Err(Error::RegionOverlap { .. })));
        bus.add_region(Region::ram(0x2000_0000, 0x100).unwrap()).unwrap();
        assert_eq!(bus.read(0x2000_00fc), Some(0));
        assert_eq!(bus.read(0x2000_0100), None);
    }

    #[test]
    fn test_region_at_top_of_address_space() {
        let mut bus = Router::new(AccessPolicy::ForceAligned);
        bus.add_region(Region::ram(0xffff_f000, 0x1000).unwrap()).unwrap();
        bus.write(0xffff_fffc, 7, ByteEnable::ALL);
        assert_eq!(bus.read(0xffff_fffc), Some(7));
    }

    #[test]
    fn test_load_out_of_range() {
        let mut bus = router();
        let image = vec![0u8; BOOT_SIZE as usize + 1];
        assert!(matches!(bus.load(BOOT_START, &image), Err(Error::ImageTooLarge { .. })));
        assert!(bus.load(0x4000_0000, &[1]).is_err());
        assert!(bus.load(MMIO_START, &[1]).is_err());
    }

    #[test]
    fn test_fill() {
        let mut bus = router();
        bus.write(RAM_START + 4, 0xdead_beef, ByteEnable::ALL);
        bus.fill(RAM_START + 5, 2, 0).unwrap();
        assert_eq!(bus.peek(RAM_START + 4), Some(0xde00_00ef));
        assert!(matches!(bus.fill(RAM_START, u32::MAX, 0), Err(Error::ImageTooLarge { .. })));
        assert!(matches!(bus.fill(BOOT_START + BOOT_SIZE - 4, 8, 0), Err(Error::ImageTooLarge { .. })));
        assert!(bus.fill(MMIO_START, 4, 0).is_err());
    }

    #[test]
    fn test_keyboard_pop_and_peek() {
        let peripherals = Peripherals::default();
        let keyboard = peripherals.keyboard.clone();
        let mut bus = Router::with_default_map(&BusConfig::default(), peripherals).unwrap();
        keyboard.push(b'a');
        keyboard.push(b'b');

        assert_eq!(bus.peek(KEYBOARD_POP), Some(b'a' as u32));
        assert_eq!(bus.peek(KEYBOARD_POP), Some(b'a' as u32));
        assert_eq!(bus.read(KEYBOARD_STATUS), Some(2));
        assert_eq!(bus.read(KEYBOARD_POP), Some(b'a' as u32));
        assert_eq!(bus.read(KEYBOARD_POP), Some(b'b' as u32));
        assert_eq!(bus.read(KEYBOARD_POP), Some(0));
        assert_eq!(bus.read(MMIO_START + 0x800), None);
    }
}
