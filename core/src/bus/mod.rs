//! Memory/IO bus.
//!
//! Everything behind the bus is 32 bits wide. Sub-word accesses are built in
//! [`access`] from an aligned word address and a [`ByteEnable`] lane mask.

use bitflags::bitflags;

pub mod access;
pub mod devices;
pub mod router;

pub use access::{AccessPolicy, Width};
pub use devices::{HostLink, Joypad, KeyboardBuffer, LinkStatus, Peripherals};
pub use router::{Backing, BusConfig, Mmio, Region, Router, Store};

bitflags! {
    /// Byte lanes of a word-wide write that are actually modified.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ByteEnable: u8 {
        const LANE0 = 1 << 0;
        const LANE1 = 1 << 1;
        const LANE2 = 1 << 2;
        const LANE3 = 1 << 3;
        const ALL = 0b1111;
    }
}

impl ByteEnable {
    /// Lanes `offset..offset + len` of a word.
    pub fn span(offset: u32, len: u32) -> Self {
        debug_assert!(offset + len <= 4);
        let bits = ((1u32 << len) - 1) << offset;
        Self::from_bits_truncate(bits as u8)
    }

    /// Expands the lane mask to a 32-bit bit mask.
    pub fn bit_mask(self) -> u32 {
        (0..4)
            .filter(|lane| self.bits() & (1 << lane) != 0)
            .fold(0, |mask, lane| mask | 0xff << (lane * 8))
    }

    /// Combines `old` and `new`, taking the enabled lanes from `new`.
    pub fn merge(self, old: u32, new: u32) -> u32 {
        let mask = self.bit_mask();
        (old & !mask) | (new & mask)
    }
}

/// Word-wide access capability handed to the hart.
///
/// Addresses are byte addresses; implementations ignore the low two bits.
pub trait Bus {
    /// Returns `None` if nothing backs `addr`. May have device side effects.
    fn read(&mut self, addr: u32) -> Option<u32>;

    /// Like `read`, but never disturbs device state. Used for display and by
    /// the debugger.
    fn peek(&self, addr: u32) -> Option<u32>;

    /// Writes to unbacked or read-only addresses are dropped.
    fn write(&mut self, addr: u32, value: u32, mask: ByteEnable);

    /// How sub-word accesses crossing a word boundary are handled.
    fn policy(&self) -> AccessPolicy {
        AccessPolicy::default()
    }
}
