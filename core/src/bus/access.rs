//! Byte and half-word accesses on top of the word-wide bus.
//!
//! The CPU path renders unmapped reads as zero; only the debugger path cares
//! about the difference.

use crate::bus::{Bus, ByteEnable};

/// Handling of half-word and word accesses that straddle a word boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessPolicy {
    /// Split into two aligned word accesses and recombine.
    Split,
    /// Clear the low address bits, silently dropping the misalignment.
    ForceAligned,
}

impl AccessPolicy {
    /// Chosen at build time by the `allow-unaligned` feature.
    pub const DEFAULT: Self = if cfg!(feature = "allow-unaligned") {
        AccessPolicy::Split
    } else {
        AccessPolicy::ForceAligned
    };
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    Byte,
    Half,
    Word,
}

impl Width {
    pub const fn bytes(self) -> u32 {
        match self {
            Width::Byte => 1,
            Width::Half => 2,
            Width::Word => 4,
        }
    }

    pub const fn value_mask(self) -> u32 {
        match self {
            Width::Byte => 0xff,
            Width::Half => 0xffff,
            Width::Word => 0xffff_ffff,
        }
    }
}

fn effective_addr(bus: &dyn Bus, addr: u32, width: Width) -> u32 {
    match bus.policy() {
        AccessPolicy::Split => addr,
        AccessPolicy::ForceAligned => addr & !(width.bytes() - 1),
    }
}

/// Instruction fetch. Instructions are always word-aligned.
pub fn fetch(bus: &mut dyn Bus, pc: u32) -> u32 {
    bus.read(round_down!(pc, 4)).unwrap_or(0)
}

/// Loads `width` bytes at `addr`, zero-extended.
pub fn load(bus: &mut dyn Bus, addr: u32, width: Width) -> u32 {
    let addr = effective_addr(bus, addr, width);
    let base = round_down!(addr, 4);
    let offset = addr & 3;

    let low = bus.read(base).unwrap_or(0) >> (offset * 8);
    let value = if offset + width.bytes() > 4 {
        let high = bus.read(base.wrapping_add(4)).unwrap_or(0);
        low | high << ((4 - offset) * 8)
    } else {
        low
    };
    value & width.value_mask()
}

/// Stores the low `width` bytes of `value` at `addr`.
pub fn store(bus: &mut dyn Bus, addr: u32, value: u32, width: Width) {
    let addr = effective_addr(bus, addr, width);
    let base = round_down!(addr, 4);
    let offset = addr & 3;
    let len = width.bytes();
    let value = value & width.value_mask();

    if offset + len <= 4 {
        // Replicate narrow values across the word so the lane mask picks the
        // right copy.
        let data = match (width, offset & 1) {
            (Width::Byte, _) => value.wrapping_mul(0x0101_0101),
            (Width::Half, 0) => value.wrapping_mul(0x0001_0001),
            _ => value << (offset * 8),
        };
        bus.write(base, data, ByteEnable::span(offset, len));
    } else {
        let first = 4 - offset;
        bus.write(base, value << (offset * 8), ByteEnable::span(offset, first));
        bus.write(
            base.wrapping_add(4),
            value >> (first * 8),
            ByteEnable::span(0, len - first),
        );
    }
}
