//! A hart, its bus and the controller that paces it.

use tracing::{debug, info};

use crate::bus::{Bus, BusConfig, Peripherals, Router};
use crate::config::*;
use crate::controller::{Controller, ExecMode, StopReason};
use crate::csr::Csrs;
use crate::disasm::disassemble;
use crate::elf;
use crate::error::Result;
use crate::hart::Hart;
use crate::insn::InsnSet;
use crate::state::State;
use crate::trap::Trap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineConfig {
    pub bus: BusConfig,
    pub reset_pc: u32,
    /// Instruction sets the hart decodes.
    pub isa: Vec<InsnSet>,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            bus: BusConfig::default(),
            reset_pc: RESET_PC,
            isa: Hart::FULL_ISA.to_vec(),
        }
    }
}

/// Outcome of one instruction boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// The controller is halted; nothing ran.
    Idle,
    Retired,
    /// A breakpoint at this address halted the controller before it ran.
    Break(u32),
}

#[derive(Debug)]
pub struct Machine {
    pub hart: Hart,
    pub bus: Router,
    pub ctrl: Controller,
    reset_pc: u32,
}

impl Machine {
    pub fn new(config: &MachineConfig, peripherals: Peripherals) -> Result<Self> {
        let bus = Router::with_default_map(&config.bus, peripherals)?;
        let mut hart = Hart::bare();
        for &set in &config.isa {
            hart.add_decoder(set);
        }
        hart.state.pc = config.reset_pc;
        Ok(Self {
            hart,
            bus,
            ctrl: Controller::new(),
            reset_pc: config.reset_pc,
        })
    }

    pub fn pc(&self) -> u32 {
        self.hart.state.pc
    }

    /// Advances one instruction boundary as the controller's mode allows.
    pub fn tick(&mut self) -> Tick {
        match self.ctrl.mode() {
            ExecMode::Halted => Tick::Idle,
            ExecMode::Step => {
                self.retire();
                Tick::Retired
            }
            ExecMode::Running => {
                let pc = self.pc();
                if self.ctrl.should_break(pc) {
                    Tick::Break(pc)
                } else {
                    self.retire();
                    Tick::Retired
                }
            }
        }
    }

    /// Retires one instruction regardless of mode and breakpoints.
    pub fn step_once(&mut self) -> Trap {
        self.retire();
        self.hart.trap
    }

    fn retire(&mut self) {
        let lines = self.bus.irq_lines();
        self.hart.csr.set_pending(IRQ_EXTERNAL, lines & (1 << IRQ_EXTERNAL) != 0);
        self.hart.step(&mut self.bus);
        self.ctrl.retired();
    }

    /// Loads an ELF32 image, or a raw image at the reset address, and points
    /// the pc at its entry.
    pub fn load_image(&mut self, image: &[u8]) -> Result<u32> {
        let entry = if elf::is_elf(image) {
            elf::load_elf(image, &mut self.bus)?
        } else {
            self.bus.load(self.reset_pc, image)?;
            self.reset_pc
        };
        info!("loaded {} byte image, entry {:#010x}", image.len(), entry);
        self.hart.state.pc = entry;
        Ok(entry)
    }

    /// Clears registers and CSRs and halts. Memory and breakpoints survive.
    pub fn reset(&mut self) {
        debug!("reset to {:#010x}", self.reset_pc);
        self.hart.state = State::ZERO;
        self.hart.state.pc = self.reset_pc;
        self.hart.csr = Csrs::default();
        self.hart.trap = Trap::None;
        let pc = self.pc();
        self.ctrl.halt(StopReason::Halted, pc);
    }

    /// Debugger read. Stops at the first unmapped byte.
    pub fn read_memory(&self, addr: u32, len: usize) -> Vec<u8> {
        let mut data = Vec::with_capacity(len);
        for i in 0..len {
            let Some(a) = addr.checked_add(i as u32) else {
                break;
            };
            let Some(word) = self.bus.peek(a) else {
                break;
            };
            data.push((word >> ((a & 3) * 8)) as u8);
        }
        data
    }

    /// Debugger write. Returns `false` if some byte had nowhere to go; the
    /// bytes before it have been written.
    pub fn write_memory(&mut self, addr: u32, data: &[u8]) -> bool {
        for (i, &byte) in data.iter().enumerate() {
            let Some(a) = addr.checked_add(i as u32) else {
                return false;
            };
            if !self.bus.poke(a, byte) {
                return false;
            }
        }
        true
    }

    pub fn disassemble_at(&self, addr: u32) -> Option<String> {
        if addr & 3 != 0 {
            return None;
        }
        self.bus.peek(addr).map(|raw| disassemble(raw, addr))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::controller::Origin;
    use crate::trap::Exception;

    /// A machine with `program` in RAM and the pc at its start.
    pub fn machine_with_program(program: &[u32]) -> Machine {
        let mut machine = Machine::new(&MachineConfig::default(), Peripherals::default()).unwrap();
        let bytes: Vec<u8> = program.iter().flat_map(|insn| insn.to_le_bytes()).collect();
        machine.bus.load(RAM_START, &bytes).unwrap();
        machine.hart.state.pc = RAM_START;
        machine
    }

    /// addi t0, t0, 1
    pub const INC_T0: u32 = 0x00128293;

    #[test]
    fn test_breakpoint_determinism() {
        for n in 0..6u32 {
            let mut machine = machine_with_program(&[INC_T0; 8]);
            let target = RAM_START + 4 * n;
            machine.ctrl.add_breakpoint(target, None, Origin::Local).unwrap();
            machine.ctrl.go();

            let mut retired = 0;
            loop {
                match machine.tick() {
                    Tick::Retired => retired += 1,
                    Tick::Break(pc) => {
                        assert_eq!(pc, target);
                        break;
                    }
                    Tick::Idle => panic!("halted without a breakpoint"),
                }
                assert!(retired <= n, "ran past the breakpoint");
            }
            assert_eq!(retired, n);
            assert_eq!(machine.pc(), target);
            assert_eq!(machine.hart.state.reg(5), n);
            assert_eq!(machine.ctrl.mode(), ExecMode::Halted);
        }
    }

    #[test]
    fn test_resume_from_breakpoint_executes_it() {
        let mut machine = machine_with_program(&[INC_T0; 4]);
        machine.ctrl.add_breakpoint(RAM_START, None, Origin::Local).unwrap();
        machine.ctrl.go();
        assert_eq!(machine.tick(), Tick::Break(RAM_START));

        machine.ctrl.go();
        assert_eq!(machine.tick(), Tick::Retired);
        assert_eq!(machine.pc(), RAM_START + 4);
    }

    #[test]
    fn test_loop_hits_breakpoint_again() {
        // addi t0, t0, 1; jal x0, -4
        let mut machine = machine_with_program(&[INC_T0, 0xffdff06f]);
        machine.ctrl.add_breakpoint(RAM_START, None, Origin::Local).unwrap();
        machine.ctrl.go();
        assert_eq!(machine.tick(), Tick::Break(RAM_START));
        machine.ctrl.go();
        assert_eq!(machine.tick(), Tick::Retired);
        assert_eq!(machine.tick(), Tick::Retired);
        assert_eq!(machine.tick(), Tick::Break(RAM_START));
        assert_eq!(machine.hart.state.reg(5), 1);
    }

    #[test]
    fn test_step_ignores_breakpoints() {
        let mut machine = machine_with_program(&[INC_T0; 2]);
        machine.ctrl.add_breakpoint(RAM_START, None, Origin::Local).unwrap();
        machine.ctrl.step_into();
        assert_eq!(machine.tick(), Tick::Retired);
        assert_eq!(machine.tick(), Tick::Idle);
        assert_eq!(machine.pc(), RAM_START + 4);
    }

    #[test]
    fn test_unmapped_is_zero_for_cpu_and_missing_for_debugger() {
        // lui t0, 0x20000; lw t1, 0(t0)
        let mut machine = machine_with_program(&[0x200002b7, 0x0002a303]);
        machine.hart.state.set_reg(6, 0xdead);
        machine.ctrl.go();
        machine.tick();
        machine.tick();
        assert!(machine.hart.trap.is_none());
        assert_eq!(machine.hart.state.reg(6), 0);
        assert!(machine.read_memory(0x2000_0000, 4).is_empty());
        assert!(!machine.write_memory(0x2000_0000, &[1]));
    }

    #[test]
    fn test_read_memory_truncates_at_unmapped() {
        let machine = machine_with_program(&[]);
        let end = RAM_START + RAM_SIZE;
        assert_eq!(machine.read_memory(end - 2, 4).len(), 2);
        assert!(machine.read_memory(u32::MAX, 4).is_empty());
    }

    #[test]
    fn test_debugger_writes_reach_boot_store() {
        let mut machine = machine_with_program(&[]);
        assert!(machine.write_memory(BOOT_START + 1, &[0xaa, 0xbb]));
        assert_eq!(machine.read_memory(BOOT_START, 4), vec![0, 0xaa, 0xbb, 0]);
    }

    #[test]
    fn test_keyboard_interrupt() {
        let peripherals = Peripherals::default();
        let keyboard = peripherals.keyboard.clone();
        let mut machine = Machine::new(&MachineConfig::default(), peripherals).unwrap();
        let bytes: Vec<u8> = [INC_T0; 4].iter().flat_map(|insn| insn.to_le_bytes()).collect();
        machine.bus.load(RAM_START, &bytes).unwrap();
        machine.hart.state.pc = RAM_START;
        machine.hart.csr.mtvec = RAM_START + 0x100;
        machine.hart.csr.mie = 1 << IRQ_EXTERNAL;
        machine.hart.csr.mstatus = crate::csr::Mstatus::MIE;

        machine.step_once();
        assert!(machine.hart.trap.is_none());
        keyboard.push(b'a');
        assert_eq!(machine.step_once(), Trap::Interrupt(IRQ_EXTERNAL));
        assert_eq!(machine.pc(), RAM_START + 0x100);
        assert_eq!(machine.hart.csr.mepc, RAM_START + 8);
    }

    #[test]
    fn test_load_raw_image_and_reset() {
        let mut machine = Machine::new(&MachineConfig::default(), Peripherals::default()).unwrap();
        // ebreak
        let entry = machine.load_image(&0x00100073u32.to_le_bytes()).unwrap();
        assert_eq!(entry, RESET_PC);
        assert_eq!(machine.disassemble_at(RESET_PC).as_deref(), Some("ebreak"));
        assert_eq!(machine.step_once(), Trap::Exception(Exception::Breakpoint));

        machine.hart.state.set_reg(1, 5);
        machine.ctrl.go();
        machine.reset();
        assert_eq!(machine.pc(), RESET_PC);
        assert_eq!(machine.hart.state.reg(1), 0);
        assert_eq!(machine.ctrl.mode(), ExecMode::Halted);
    }

    #[test]
    fn test_restricted_isa() {
        let config = MachineConfig { isa: vec![InsnSet::I], ..MachineConfig::default() };
        let mut machine = Machine::new(&config, Peripherals::default()).unwrap();
        // mul a0, a1, a2
        machine.bus.load(RAM_START, &0x02c58533u32.to_le_bytes()).unwrap();
        machine.hart.state.pc = RAM_START;
        assert_eq!(machine.step_once(), Trap::Exception(Exception::IllegalInstruction));
        assert_eq!(machine.hart.csr.mtval, 0x02c58533);
    }

    #[test]
    fn test_load_elf_image() {
        let mut machine = Machine::new(&MachineConfig::default(), Peripherals::default()).unwrap();
        let image = crate::elf::tests::build_elf(RAM_START + 0x40, RAM_START, &INC_T0.to_le_bytes(), 4);
        assert_eq!(machine.load_image(&image).unwrap(), RAM_START + 0x40);
        assert_eq!(machine.pc(), RAM_START + 0x40);
        assert_eq!(machine.bus.peek(RAM_START), Some(INC_T0));
    }
}
