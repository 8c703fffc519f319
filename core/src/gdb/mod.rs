//! GDB remote serial protocol server.
//!
//! One client at a time. The server owns no emulator state: every command
//! locks the shared machine, does its work and releases the lock before the
//! reply is formatted and sent. When a running target stops, the controller
//! queues the signal through a [`StopListener`]; the server thread sends it
//! on its next poll, so the host loop never writes to the socket.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;

use gdbstub::arch::Registers;
use gdbstub::common::Signal;
use gdbstub_arch::riscv::reg::RiscvCoreRegs;
use tracing::{debug, info, warn};

use crate::config::*;
use crate::controller::{StopListener, StopReason};
use crate::emulator::Emulator;
use crate::error::{Error, Result};
use crate::state::{GENERAL_REGISTER_COUNT, State};

pub mod command;
pub mod hex;
pub mod packet;

use command::Command;
use packet::{Event, PacketParser, frame};

/// Register number of the pc in `p`/`P` packets.
pub const PC_REGNUM: u32 = GENERAL_REGISTER_COUNT as u32;

fn stop_reply(signal: Signal) -> String {
    format!("S{:02x}", signal.0)
}

fn core_regs(state: &State) -> RiscvCoreRegs<u32> {
    RiscvCoreRegs {
        x: *state.regs(),
        pc: state.pc,
    }
}

/// Queues a stop signal for the session when a running target halts.
struct StopNotifier {
    stops: Sender<Signal>,
}

impl StopListener for StopNotifier {
    fn on_stop(&mut self, reason: StopReason, _pc: u32) {
        let signal = match reason {
            StopReason::Interrupted => Signal::SIGINT,
            StopReason::Breakpoint(_) | StopReason::Halted => Signal::SIGTRAP,
        };
        // The session is gone if the receiver was dropped.
        let _ = self.stops.send(signal);
    }
}

struct Session {
    stream: TcpStream,
    parser: PacketParser,
    peer: SocketAddr,
    stops: Receiver<Signal>,
}

/// What to send back for one command.
struct Response {
    reply: Option<String>,
    close: bool,
}

impl Response {
    fn reply(text: impl Into<String>) -> Self {
        Self { reply: Some(text.into()), close: false }
    }

    fn silent() -> Self {
        Self { reply: None, close: false }
    }

    fn error() -> Self {
        Self::reply("E01")
    }
}

pub struct GdbServer {
    listener: TcpListener,
    emu: Emulator,
    session: Option<Session>,
}

impl GdbServer {
    pub fn bind(addr: SocketAddr, emu: Emulator) -> Result<Self> {
        let listener = TcpListener::bind(addr).map_err(|e| Error::IoError(e, format!("gdb listener {}", addr)))?;
        listener.set_nonblocking(true)?;
        info!("gdb server listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            emu,
            session: None,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Services the socket once. Returns at once if nothing is pending,
    /// except that a connected client of a halted target is waited on for
    /// up to a second.
    pub fn poll(&mut self) {
        self.poll_with(None);
    }

    /// Runs the server forever on the calling thread.
    pub fn serve(&mut self) {
        loop {
            if !self.is_connected() {
                self.accept();
                if !self.is_connected() {
                    std::thread::sleep(RUNNING_POLL_WAIT);
                    continue;
                }
            }
            self.poll_with(Some(RUNNING_POLL_WAIT));
        }
    }

    fn poll_with(&mut self, running_wait: Option<Duration>) {
        if self.session.is_none() {
            self.accept();
        }
        match self.flush_stops() {
            None => {
                self.teardown();
                return;
            }
            // Don't wait on the socket with a fresh stop reply in flight.
            Some(sent) if sent > 0 => return,
            Some(_) => {}
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let wait = if self.emu.is_running() { running_wait } else { Some(HALTED_POLL_WAIT) };
        let configured = match wait {
            Some(wait) => session
                .stream
                .set_nonblocking(false)
                .and_then(|()| session.stream.set_read_timeout(Some(wait))),
            None => session.stream.set_nonblocking(true),
        };
        if let Err(e) = configured {
            warn!("gdb socket setup failed: {}", e);
            self.teardown();
            return;
        }

        let mut buf = [0u8; 4096];
        let len = match session.stream.read(&mut buf) {
            Ok(0) => {
                self.teardown();
                return;
            }
            Ok(len) => len,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => return,
            Err(e) => {
                debug!("gdb read failed: {}", e);
                self.teardown();
                return;
            }
        };

        for &byte in &buf[..len] {
            let Some(event) = self.session.as_mut().and_then(|session| session.parser.feed(byte)) else {
                continue;
            };
            if !self.handle(event) {
                self.teardown();
                return;
            }
        }
        if self.flush_stops().is_none() {
            self.teardown();
        }
    }

    /// Sends every queued stop reply and returns how many went out, or
    /// `None` if the client is gone.
    fn flush_stops(&mut self) -> Option<usize> {
        let mut sent = 0;
        loop {
            let Some(signal) = self.session.as_ref().and_then(|session| session.stops.try_recv().ok()) else {
                return Some(sent);
            };
            if !self.send(&frame(stop_reply(signal).as_bytes())) {
                warn!("dropped stop reply {}", stop_reply(signal));
                return None;
            }
            sent += 1;
        }
    }

    fn accept(&mut self) {
        let (stream, peer) = match self.listener.accept() {
            Ok(conn) => conn,
            Err(e) if e.kind() == ErrorKind::WouldBlock => return,
            Err(e) => {
                warn!("gdb accept failed: {}", e);
                return;
            }
        };
        if let Err(e) = stream.set_nodelay(true).and_then(|()| stream.set_write_timeout(Some(REPLY_WRITE_TIMEOUT))) {
            warn!("dropping gdb client {}: {}", peer, e);
            return;
        }
        let (tx, stops) = mpsc::channel();
        let notifier = StopNotifier { stops: tx };

        {
            let mut machine = self.emu.lock();
            let pc = machine.pc();
            machine.ctrl.halt(StopReason::Halted, pc);
            machine.ctrl.set_listener(Box::new(notifier));
        }
        info!("gdb client connected from {}", peer);
        self.session = Some(Session {
            stream,
            parser: PacketParser::new(),
            peer,
            stops,
        });
    }

    fn teardown(&mut self) {
        if let Some(session) = self.session.take() {
            info!("gdb client {} disconnected", session.peer);
        }
        self.emu.lock().ctrl.reset_session();
    }

    fn send(&mut self, data: &[u8]) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        // Reads may have left the socket nonblocking; writes wait, bounded by
        // the write timeout.
        match session.stream.set_nonblocking(false).and_then(|()| session.stream.write_all(data)) {
            Ok(()) => true,
            Err(e) => {
                debug!("gdb write failed: {}", e);
                false
            }
        }
    }

    /// Returns `false` once the session should end.
    fn handle(&mut self, event: Event) -> bool {
        match event {
            Event::Packet(payload) => {
                if !self.send(b"+") {
                    return false;
                }
                let command = Command::parse(&payload);
                debug!("gdb <- {} ({:?})", String::from_utf8_lossy(&payload), command);
                let response = self.dispatch(command);
                if let Some(reply) = response.reply {
                    if !self.send(&frame(reply.as_bytes())) {
                        return false;
                    }
                }
                !response.close
            }
            Event::Corrupt => self.send(b"-"),
            Event::Interrupt => {
                let halted = {
                    let mut machine = self.emu.lock();
                    let pc = machine.pc();
                    machine.ctrl.halt(StopReason::Interrupted, pc)
                };
                // A running target reports through the stop listener.
                halted || self.send(&frame(stop_reply(Signal::SIGINT).as_bytes()))
            }
        }
    }

    fn dispatch(&mut self, command: Command) -> Response {
        match command {
            Command::StopReason => Response::reply(stop_reply(Signal::SIGTRAP)),
            Command::ReadRegisters => {
                let regs = core_regs(&self.emu.lock().hart.state);
                let mut out = String::with_capacity(66 * 4);
                regs.gdb_serialize(|byte| match byte {
                    Some(byte) => out.push_str(&hex::encode(&[byte])),
                    None => out.push_str("xx"),
                });
                Response::reply(out)
            }
            Command::WriteRegisters(bytes) => {
                let mut regs = RiscvCoreRegs::<u32>::default();
                if regs.gdb_deserialize(&bytes).is_err() {
                    return Response::error();
                }
                let mut machine = self.emu.lock();
                if machine.ctrl.is_running() {
                    return Response::error();
                }
                for (idx, &value) in regs.x.iter().enumerate() {
                    machine.hart.state.set_reg(idx as u8, value);
                }
                machine.hart.state.pc = regs.pc;
                Response::reply("OK")
            }
            Command::ReadRegister(reg) => {
                let value = {
                    let machine = self.emu.lock();
                    match reg {
                        PC_REGNUM => machine.hart.state.pc,
                        r if r < PC_REGNUM => machine.hart.state.reg(r as u8),
                        _ => return Response::error(),
                    }
                };
                Response::reply(hex::encode(&value.to_le_bytes()))
            }
            Command::WriteRegister(reg, value) => {
                let mut machine = self.emu.lock();
                if machine.ctrl.is_running() {
                    return Response::error();
                }
                match reg {
                    PC_REGNUM => machine.hart.state.pc = value,
                    r if r < PC_REGNUM => machine.hart.state.set_reg(r as u8, value),
                    _ => return Response::error(),
                }
                Response::reply("OK")
            }
            Command::ReadMemory { addr, len } => {
                let len = (len as usize).min(MAX_PACKET_SIZE / 2);
                let data = self.emu.lock().read_memory(addr, len);
                Response::reply(hex::encode(&data))
            }
            Command::WriteMemory { addr, data } => {
                if self.emu.lock().write_memory(addr, &data) {
                    Response::reply("OK")
                } else {
                    Response::error()
                }
            }
            Command::InsertBreakpoint(addr) => {
                self.emu.lock().ctrl.debugger_insert(addr);
                Response::reply("OK")
            }
            Command::RemoveBreakpoint(addr) => {
                if !self.emu.lock().ctrl.debugger_remove(addr) {
                    debug!("no debugger breakpoint at {:#010x}", addr);
                }
                Response::reply("OK")
            }
            Command::Continue(addr) => {
                let mut machine = self.emu.lock();
                if let Some(addr) = addr {
                    machine.hart.state.pc = addr;
                }
                machine.ctrl.go();
                Response::silent()
            }
            Command::Step(addr) => {
                {
                    let mut machine = self.emu.lock();
                    if let Some(addr) = addr {
                        machine.hart.state.pc = addr;
                    }
                    machine.step_once();
                }
                Response::reply(stop_reply(Signal::SIGTRAP))
            }
            Command::Detach => Response { reply: Some("OK".into()), close: true },
            Command::Kill => Response { reply: None, close: true },
            Command::Canned(reply) => Response::reply(reply),
            Command::Malformed => Response::error(),
            Command::Unsupported => Response::reply(""),
        }
    }
}
