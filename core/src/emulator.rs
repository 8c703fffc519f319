//! Interface for users to interact with the emulator.
//! The machine is shared between the host loop and the debug server; each
//! side takes the lock for as little as one instruction or one command.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::bus::Peripherals;
use crate::controller::StopReason;
use crate::error::Result;
use crate::machine::{Machine, MachineConfig, Tick};
use crate::utils::lock;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOutcome {
    pub retired: usize,
    /// Set if a breakpoint stopped the run.
    pub breakpoint: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct Emulator {
    machine: Arc<Mutex<Machine>>,
}

impl Emulator {
    pub fn new(config: &MachineConfig, peripherals: Peripherals) -> Result<Self> {
        Ok(Self::from_machine(Machine::new(config, peripherals)?))
    }

    pub fn from_machine(machine: Machine) -> Self {
        Self {
            machine: Arc::new(Mutex::new(machine)),
        }
    }

    /// Exclusive access to the machine. A poisoned lock is recovered.
    pub fn lock(&self) -> MutexGuard<'_, Machine> {
        lock(&self.machine)
    }

    /// Advances up to `budget` instruction boundaries, releasing the lock
    /// between instructions. Stops early once the controller halts.
    pub fn run(&self, budget: usize) -> RunOutcome {
        let mut outcome = RunOutcome::default();
        for _ in 0..budget {
            match self.lock().tick() {
                Tick::Idle => break,
                Tick::Retired => outcome.retired += 1,
                Tick::Break(pc) => {
                    outcome.breakpoint = Some(pc);
                    break;
                }
            }
        }
        outcome
    }

    pub fn load_image(&self, image: &[u8]) -> Result<u32> {
        self.lock().load_image(image)
    }

    pub fn go(&self) {
        self.lock().ctrl.go();
    }

    pub fn step_into(&self) {
        self.lock().ctrl.step_into();
    }

    pub fn halt(&self) -> bool {
        let mut machine = self.lock();
        let pc = machine.pc();
        machine.ctrl.halt(StopReason::Halted, pc)
    }

    pub fn is_running(&self) -> bool {
        self.lock().ctrl.is_running()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RAM_START;
    use crate::controller::{ExecMode, Origin};
    use crate::machine::tests::{INC_T0, machine_with_program};

    #[test]
    fn test_run_budget_and_breakpoint() {
        let emu = Emulator::from_machine(machine_with_program(&[INC_T0; 16]));
        assert_eq!(emu.run(10), RunOutcome::default());

        emu.go();
        assert_eq!(emu.run(3), RunOutcome { retired: 3, breakpoint: None });
        assert!(emu.is_running());

        emu.lock().ctrl.add_breakpoint(RAM_START + 20, None, Origin::Local).unwrap();
        assert_eq!(emu.run(100), RunOutcome { retired: 2, breakpoint: Some(RAM_START + 20) });
        assert!(!emu.is_running());

        emu.step_into();
        assert_eq!(emu.run(100), RunOutcome { retired: 1, breakpoint: None });
        assert_eq!(emu.lock().ctrl.mode(), ExecMode::Halted);
    }

    #[test]
    fn test_halt_from_another_thread() {
        // jal x0, 0
        let emu = Emulator::from_machine(machine_with_program(&[0x0000006f]));
        emu.go();
        let remote = emu.clone();
        let handle = std::thread::spawn(move || {
            while remote.run(64).retired > 0 {}
        });
        while emu.lock().hart.csr.instret < 100 {
            std::thread::yield_now();
        }
        assert!(emu.halt());
        handle.join().unwrap();
        assert_eq!(emu.lock().pc(), RAM_START);
    }
}
