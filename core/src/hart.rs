use std::sync::Arc;

use tracing::trace;

use crate::bus::{Bus, access};
use crate::csr::Csrs;
use crate::disasm::disassemble;
use crate::insn::{self, Decoder, Exec, Executor, InsnSet, Instruction};
use crate::state::State;
use crate::trap::{Exception, Trap};

#[derive(Debug)]
pub struct Hart {
    pub state: State,
    pub csr: Csrs,
    /// Trap raised by the most recent `step`, `Trap::None` otherwise.
    pub trap: Trap,
    decoders: Vec<Arc<dyn Decoder>>,
}

impl Default for Hart {
    fn default() -> Self {
        Self::new()
    }
}

impl Hart {
    pub const FULL_ISA: [InsnSet; 4] = [InsnSet::I, InsnSet::M, InsnSet::Zicsr, InsnSet::Zifencei];

    /// A hart implementing RV32IM, Zicsr and Zifencei.
    pub fn new() -> Self {
        let mut hart = Self::bare();
        for set in Self::FULL_ISA {
            hart.add_decoder(set);
        }
        hart
    }

    /// A hart with no instruction sets: every instruction is illegal.
    pub fn bare() -> Self {
        Self {
            state: State::default(),
            csr: Csrs::default(),
            trap: Trap::None,
            decoders: vec![],
        }
    }

    pub fn add_decoder(&mut self, set: InsnSet) {
        let decoder: Arc<dyn Decoder> = match set {
            InsnSet::I => Arc::new(insn::Rv32IDecoder),
            InsnSet::M => Arc::new(insn::Rv32MDecoder),
            InsnSet::Zicsr => Arc::new(insn::ZicsrDecoder),
            InsnSet::Zifencei => Arc::new(insn::ZifenceiDecoder),
        };
        self.decoders.push(decoder);
    }

    pub fn decode(&self, raw: u32) -> Option<(Instruction, Executor)> {
        self.decoders.iter().find_map(|decoder| decoder.decode(raw))
    }

    /// Level-sensitive interrupt line `bit` of `mip`.
    pub fn raise_interrupt(&mut self, bit: u8) {
        self.csr.set_pending(bit, true);
    }

    pub fn clear_interrupt(&mut self, bit: u8) {
        self.csr.set_pending(bit, false);
    }

    /// Fetches, decodes and executes one instruction.
    ///
    /// Never fails: guest anomalies become traps, recorded in `self.trap`
    /// and already vectored to `mtvec` when this returns.
    pub fn step(&mut self, bus: &mut dyn Bus) {
        self.trap = Trap::None;

        let pc = self.state.pc;
        let raw = access::fetch(bus, pc);
        trace!("pc@{:#010x}: {:08x}  {}", pc, raw, disassemble(raw, pc));

        let result = match self.decode(raw) {
            Some((insn, executor)) => {
                let mut cx = Exec {
                    state: &mut self.state,
                    csr: &mut self.csr,
                    bus,
                    pc,
                    next_pc: pc.wrapping_add(4),
                };
                executor(&mut cx, &insn).map(|()| cx.next_pc)
            }
            None => Err(Exception::IllegalInstruction),
        };

        self.csr.cycle = self.csr.cycle.wrapping_add(1);
        match result {
            Ok(next_pc) => {
                self.csr.instret = self.csr.instret.wrapping_add(1);
                self.state.pc = next_pc;
                if let Some(bit) = self.csr.pending_interrupt() {
                    self.take_trap(Trap::Interrupt(bit), next_pc, 0);
                }
            }
            Err(exception) => {
                let tval = match exception {
                    Exception::IllegalInstruction => raw,
                    Exception::Breakpoint => pc,
                    Exception::EnvironmentCall => 0,
                };
                self.take_trap(Trap::Exception(exception), pc, tval);
            }
        }
    }

    fn take_trap(&mut self, trap: Trap, epc: u32, tval: u32) {
        let Some(cause) = trap.cause() else {
            return;
        };
        self.trap = trap;
        self.state.pc = self.csr.enter_trap(cause, epc, tval);
        trace!("trap: {} (mepc {:#010x}) -> {:#010x}", trap, epc, self.state.pc);
    }
}
