//! Peripheral ports in the MMIO window.
//!
//! The devices themselves belong to the embedding application; the handles
//! here are cloneable so the host side can feed keys and drain host-link
//! output while the router owns the guest-facing end.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use bitflags::bitflags;
use tracing::trace;

use crate::bus::{ByteEnable, Mmio};
use crate::config::*;
use crate::utils::lock;

bitflags! {
    /// `HOSTLINK_CTRL` read value.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LinkStatus: u32 {
        /// A received byte is waiting in `HOSTLINK_DATA`.
        const RX_READY = 1 << 0;
        /// `HOSTLINK_DATA` accepts a byte.
        const TX_READY = 1 << 1;
    }
}

/// Writing this bit to `HOSTLINK_CTRL` flushes both directions.
pub const LINK_RESET: u32 = 1 << 31;

#[derive(Debug, Clone, Default)]
pub struct KeyboardBuffer {
    keys: Arc<Mutex<VecDeque<u8>>>,
}

impl KeyboardBuffer {
    pub fn push(&self, key: u8) {
        lock(&self.keys).push_back(key);
    }

    pub fn pop(&self) -> Option<u8> {
        lock(&self.keys).pop_front()
    }

    pub fn peek(&self) -> Option<u8> {
        lock(&self.keys).front().copied()
    }

    pub fn len(&self) -> usize {
        lock(&self.keys).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.keys).is_empty()
    }
}

#[derive(Debug, Default)]
struct LinkQueues {
    /// host to guest
    rx: VecDeque<u8>,
    /// guest to host
    tx: Vec<u8>,
}

/// Byte channel between the guest and the host's file/serial protocol.
#[derive(Debug, Clone, Default)]
pub struct HostLink {
    queues: Arc<Mutex<LinkQueues>>,
}

impl HostLink {
    /// Queues bytes for the guest to read.
    pub fn send(&self, data: &[u8]) {
        lock(&self.queues).rx.extend(data);
    }

    /// Drains everything the guest has written so far.
    pub fn take_output(&self) -> Vec<u8> {
        std::mem::take(&mut lock(&self.queues).tx)
    }

    fn status(&self) -> LinkStatus {
        let mut status = LinkStatus::TX_READY;
        if !lock(&self.queues).rx.is_empty() {
            status |= LinkStatus::RX_READY;
        }
        status
    }
}

#[derive(Debug, Clone, Default)]
pub struct Joypad {
    buttons: Arc<AtomicU32>,
}

impl Joypad {
    pub fn set_buttons(&self, buttons: u32) {
        self.buttons.store(buttons, Ordering::Relaxed);
    }

    pub fn buttons(&self) -> u32 {
        self.buttons.load(Ordering::Relaxed)
    }
}

/// The machine's standard port block.
#[derive(Debug, Clone, Default)]
pub struct Peripherals {
    pub keyboard: KeyboardBuffer,
    pub hostlink: HostLink,
    pub joypad: Joypad,
}

impl Mmio for Peripherals {
    fn read(&mut self, addr: u32) -> Option<u32> {
        match addr {
            HOSTLINK_DATA => Some(lock(&self.hostlink.queues).rx.pop_front().unwrap_or(0) as u32),
            KEYBOARD_POP => Some(self.keyboard.pop().unwrap_or(0) as u32),
            _ => self.peek(addr),
        }
    }

    fn peek(&self, addr: u32) -> Option<u32> {
        let value = match addr {
            HOSTLINK_CTRL => self.hostlink.status().bits(),
            HOSTLINK_DATA => lock(&self.hostlink.queues).rx.front().copied().unwrap_or(0) as u32,
            KEYBOARD_POP => self.keyboard.peek().unwrap_or(0) as u32,
            KEYBOARD_STATUS => self.keyboard.len() as u32,
            JOYPAD => self.joypad.buttons(),
            _ => return None,
        };
        Some(value)
    }

    fn write(&mut self, addr: u32, value: u32, mask: ByteEnable) {
        match addr {
            HOSTLINK_DATA if mask.contains(ByteEnable::LANE0) => {
                lock(&self.hostlink.queues).tx.push(value as u8);
            }
            HOSTLINK_CTRL if mask.contains(ByteEnable::LANE3) && value & LINK_RESET != 0 => {
                let mut queues = lock(&self.hostlink.queues);
                queues.rx.clear();
                queues.tx.clear();
            }
            _ => trace!("ignored port write {:#010x} <- {:#x}", addr, value),
        }
    }

    fn irq_lines(&self) -> u32 {
        if self.keyboard.is_empty() {
            0
        } else {
            1 << IRQ_EXTERNAL
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hostlink_ports() {
        let mut ports = Peripherals::default();
        let link = ports.hostlink.clone();

        assert_eq!(ports.read(HOSTLINK_CTRL), Some(LinkStatus::TX_READY.bits()));
        link.send(b"hi");
        assert_eq!(ports.read(HOSTLINK_CTRL), Some((LinkStatus::TX_READY | LinkStatus::RX_READY).bits()));
        assert_eq!(ports.peek(HOSTLINK_DATA), Some(b'h' as u32));
        assert_eq!(ports.read(HOSTLINK_DATA), Some(b'h' as u32));
        assert_eq!(ports.read(HOSTLINK_DATA), Some(b'i' as u32));

        ports.write(HOSTLINK_DATA, 0x4141_4141, ByteEnable::LANE0);
        ports.write(HOSTLINK_DATA, 0x4242_4242, ByteEnable::ALL);
        assert_eq!(link.take_output(), b"AB");
        assert!(link.take_output().is_empty());
    }

    #[test]
    fn test_hostlink_reset() {
        let mut ports = Peripherals::default();
        let link = ports.hostlink.clone();
        link.send(b"xyz");
        ports.write(HOSTLINK_DATA, b'q' as u32, ByteEnable::LANE0);
        ports.write(HOSTLINK_CTRL, LINK_RESET, ByteEnable::ALL);
        assert_eq!(ports.read(HOSTLINK_CTRL), Some(LinkStatus::TX_READY.bits()));
        assert!(link.take_output().is_empty());
    }

    #[test]
    fn test_keyboard_raises_external_irq() {
        let ports = Peripherals::default();
        assert_eq!(ports.irq_lines(), 0);
        ports.keyboard.push(b'k');
        assert_eq!(ports.irq_lines(), 1 << IRQ_EXTERNAL);
    }

    #[test]
    fn test_joypad() {
        let mut ports = Peripherals::default();
        ports.joypad.set_buttons(0b1010);
        assert_eq!(ports.read(JOYPAD), Some(0b1010));
    }
}
