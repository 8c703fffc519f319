//! Decoding of packet payloads into debugger commands.

use crate::gdb::hex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `?`
    StopReason,
    /// `g`
    ReadRegisters,
    /// `G`: raw register bytes, x0..x31 then pc, little-endian.
    WriteRegisters(Vec<u8>),
    /// `p`
    ReadRegister(u32),
    /// `P`
    WriteRegister(u32, u32),
    /// `m`
    ReadMemory { addr: u32, len: u32 },
    /// `M`
    WriteMemory { addr: u32, data: Vec<u8> },
    /// `Z0`
    InsertBreakpoint(u32),
    /// `z0`
    RemoveBreakpoint(u32),
    /// `c`, optionally resuming at another address.
    Continue(Option<u32>),
    /// `s`
    Step(Option<u32>),
    /// `D`
    Detach,
    /// `k`
    Kill,
    /// Queries and thread selection answered with a fixed reply.
    Canned(&'static str),
    /// A known command with bad arguments.
    Malformed,
    /// Anything else; answered with an empty packet.
    Unsupported,
}

fn split_once(data: &[u8], sep: u8) -> Option<(&[u8], &[u8])> {
    let idx = data.iter().position(|&b| b == sep)?;
    Some((&data[..idx], &data[idx + 1..]))
}

/// `addr,len`
fn addr_len(args: &[u8]) -> Option<(u32, u32)> {
    let (addr, len) = split_once(args, b',')?;
    Some((hex::parse_u32(addr)?, hex::parse_u32(len)?))
}

/// Optional resume address of `c` and `s`.
fn resume_addr(args: &[u8]) -> Option<Option<u32>> {
    if args.is_empty() {
        Some(None)
    } else {
        hex::parse_u32(args).map(Some)
    }
}

/// 32-bit register value as sent by the debugger: target byte order.
fn reg_value(text: &[u8]) -> Option<u32> {
    let bytes: [u8; 4] = hex::decode(text)?.try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}

fn canned(payload: &[u8]) -> Option<&'static str> {
    let reply = match payload {
        p if p.starts_with(b"qSupported") => "PacketSize=1000",
        p if p == b"qAttached" || p.starts_with(b"qAttached:") => "1",
        b"qTStatus" => "T0",
        b"qC" => "QC1",
        b"qOffsets" => "Text=0;Data=0;Bss=0",
        p if p.starts_with(b"qSymbol") => "OK",
        p if p.starts_with(b"Hg") || p.starts_with(b"Hc") => "OK",
        _ => return None,
    };
    Some(reply)
}

impl Command {
    pub fn parse(payload: &[u8]) -> Command {
        if let Some(reply) = canned(payload) {
            return Command::Canned(reply);
        }
        let Some((&head, args)) = payload.split_first() else {
            return Command::Unsupported;
        };
        let parsed = match head {
            b'?' if args.is_empty() => Some(Command::StopReason),
            b'g' if args.is_empty() => Some(Command::ReadRegisters),
            b'G' => hex::decode(args).map(Command::WriteRegisters),
            b'p' => hex::parse_u32(args).map(Command::ReadRegister),
            b'P' => split_once(args, b'=').and_then(|(reg, value)| {
                Some(Command::WriteRegister(hex::parse_u32(reg)?, reg_value(value)?))
            }),
            b'm' => addr_len(args).map(|(addr, len)| Command::ReadMemory { addr, len }),
            b'M' => split_once(args, b':').and_then(|(range, data)| {
                let (addr, len) = addr_len(range)?;
                let data = hex::decode(data)?;
                (data.len() == len as usize).then_some(Command::WriteMemory { addr, data })
            }),
            b'Z' | b'z' => {
                let Some((kind, rest)) = split_once(args, b',') else {
                    return Command::Malformed;
                };
                if kind != b"0" {
                    // Hardware breakpoints and watchpoints.
                    return Command::Unsupported;
                }
                split_once(rest, b',').and_then(|(addr, _kind)| hex::parse_u32(addr)).map(|addr| {
                    if head == b'Z' {
                        Command::InsertBreakpoint(addr)
                    } else {
                        Command::RemoveBreakpoint(addr)
                    }
                })
            }
            b'c' => resume_addr(args).map(Command::Continue),
            b's' => resume_addr(args).map(Command::Step),
            b'D' => Some(Command::Detach),
            b'k' => Some(Command::Kill),
            _ => return Command::Unsupported,
        };
        parsed.unwrap_or(Command::Malformed)
    }
}
