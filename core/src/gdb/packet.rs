//! Remote serial protocol framing: `$payload#xx`.

use tracing::{debug, trace};

use crate::config::MAX_PACKET_SIZE;
use crate::gdb::hex;

/// Out-of-band byte asking a running target to stop.
pub const INTERRUPT: u8 = 0x03;

pub fn checksum(payload: &[u8]) -> u8 {
    payload.iter().fold(0u8, |sum, &b| sum.wrapping_add(b))
}

/// Wraps `payload` in a packet. The checksum is written in uppercase.
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 4);
    out.push(b'$');
    out.extend_from_slice(payload);
    out.extend_from_slice(format!("#{:02X}", checksum(payload)).as_bytes());
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A packet with a valid checksum.
    Packet(Vec<u8>),
    /// A packet with a bad checksum or an oversized payload.
    Corrupt,
    Interrupt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ParserState {
    #[default]
    Idle,
    Payload,
    Checksum1,
    Checksum2,
}

#[derive(Debug, Default)]
pub struct PacketParser {
    state: ParserState,
    payload: Vec<u8>,
    /// High nibble of the received checksum, `None` if it was not hex.
    high: Option<u8>,
    overflow: bool,
}

impl PacketParser {
    pub fn new() -> Self {
        Self::default()
    }

    fn start(&mut self) {
        self.state = ParserState::Payload;
        self.payload.clear();
        self.overflow = false;
    }

    pub fn feed(&mut self, byte: u8) -> Option<Event> {
        match self.state {
            ParserState::Idle => match byte {
                b'$' => self.start(),
                INTERRUPT => return Some(Event::Interrupt),
                // Acks for our replies; nothing waits on them.
                b'+' | b'-' => {}
                _ => trace!("dropped stray byte {:#04x}", byte),
            },
            ParserState::Payload => match byte {
                b'#' => self.state = ParserState::Checksum1,
                b'$' => {
                    debug!("packet restarted before its checksum");
                    self.start();
                }
                _ if self.payload.len() >= MAX_PACKET_SIZE => self.overflow = true,
                _ => self.payload.push(byte),
            },
            ParserState::Checksum1 => {
                self.high = hex::digit(byte);
                self.state = ParserState::Checksum2;
            }
            ParserState::Checksum2 => {
                self.state = ParserState::Idle;
                let received = self.high.zip(hex::digit(byte)).map(|(hi, lo)| hi << 4 | lo);
                let payload = std::mem::take(&mut self.payload);
                if self.overflow || received != Some(checksum(&payload)) {
                    debug!("bad packet: {:?}", String::from_utf8_lossy(&payload));
                    return Some(Event::Corrupt);
                }
                return Some(Event::Packet(payload));
            }
        }
        None
    }
}
