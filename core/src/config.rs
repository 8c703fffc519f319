//! Machine profile: memory map, device ports and debugger defaults.

use std::time::Duration;

/// Boot code store, read-only to the CPU.
pub const BOOT_START: u32 = 0x0000_0000;
pub const BOOT_SIZE: u32 = 0x0001_0000; // 64 KiB

/// Memory-mapped peripheral window.
pub const MMIO_START: u32 = 0x1000_0000;
pub const MMIO_SIZE: u32 = 0x0000_1000;

/// Host-link status/control register. Reads return `LinkStatus` bits.
pub const HOSTLINK_CTRL: u32 = MMIO_START;
/// Host-link data register. Reads pop one received byte, writes send one.
pub const HOSTLINK_DATA: u32 = MMIO_START + 0x04;
/// Keyboard buffer. Reading drops the front key.
pub const KEYBOARD_POP: u32 = MMIO_START + 0x10;
/// Number of keys waiting in the keyboard buffer.
pub const KEYBOARD_STATUS: u32 = MMIO_START + 0x14;
/// Controller input port, one bit per button.
pub const JOYPAD: u32 = MMIO_START + 0x20;

/// General read-write main store.
pub const RAM_START: u32 = 0x8000_0000;
pub const RAM_SIZE: u32 = 0x0010_0000; // 1 MiB

/// Program counter after reset.
pub const RESET_PC: u32 = BOOT_START;

/// `mip`/`mie` bit driven by the peripheral window.
pub const IRQ_EXTERNAL: u8 = 11;

/// Default gdb port
pub const GDB_PORT: u16 = 3777;

/// Interval to poll for events in the event loop
pub const POLL_INTERVAL: usize = 1024; // 1024 instructions

/// Longest a debugger poll may wait for data while execution is halted.
pub const HALTED_POLL_WAIT: Duration = Duration::from_secs(1);

/// Read timeout used by the server thread while the guest is running.
pub const RUNNING_POLL_WAIT: Duration = Duration::from_millis(10);

/// Longest a reply may block on a client that stopped reading.
pub const REPLY_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Largest packet payload accepted from, or advertised to, the debugger.
pub const MAX_PACKET_SIZE: usize = 0x1000;
