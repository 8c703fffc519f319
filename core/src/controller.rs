//! Execution modes and breakpoints.
//!
//! The controller decides, at every instruction boundary, whether the hart
//! may retire the next instruction. It never touches the hart itself; the
//! machine asks [`Controller::should_break`] before retiring and reports
//! retirement through [`Controller::retired`].

use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecMode {
    #[default]
    Halted,
    /// Retire exactly one instruction, then halt.
    Step,
    Running,
}

/// Who created a breakpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    Local,
    Debugger,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    pub addr: u32,
    pub enabled: bool,
    pub name: Option<String>,
    pub origin: Origin,
    /// Set while a debug session holds this breakpoint, whoever created it.
    pub debugger: bool,
    /// Enable flag to restore when the debugger lets go of a local breakpoint.
    local_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Breakpoint(u32),
    /// The debugger asked for a halt.
    Interrupted,
    /// A local halt request.
    Halted,
}

/// Notified whenever a Running controller stops.
pub trait StopListener: Send {
    fn on_stop(&mut self, reason: StopReason, pc: u32);
}

pub struct Controller {
    mode: ExecMode,
    breakpoints: HashMap<u32, Breakpoint>,
    breakpoints_enabled: bool,
    /// Address of the breakpoint that caused the last halt; cleared once an
    /// instruction retires.
    last_break: Option<u32>,
    listener: Option<Box<dyn StopListener>>,
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("mode", &self.mode)
            .field("breakpoints", &self.breakpoints)
            .field("breakpoints_enabled", &self.breakpoints_enabled)
            .field("last_break", &self.last_break)
            .field("listener", &self.listener.is_some())
            .finish()
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}

impl Controller {
    pub fn new() -> Self {
        Self {
            mode: ExecMode::Halted,
            breakpoints: HashMap::new(),
            breakpoints_enabled: true,
            last_break: None,
            listener: None,
        }
    }

    pub fn mode(&self) -> ExecMode {
        self.mode
    }

    pub fn is_running(&self) -> bool {
        self.mode == ExecMode::Running
    }

    /// Stops execution. Returns whether the controller was Running, in which
    /// case the stop listener has been told.
    pub fn halt(&mut self, reason: StopReason, pc: u32) -> bool {
        let was_running = self.mode == ExecMode::Running;
        self.mode = ExecMode::Halted;
        if was_running {
            debug!("halted at {:#010x}: {:?}", pc, reason);
            if let Some(listener) = self.listener.as_mut() {
                listener.on_stop(reason, pc);
            }
        }
        was_running
    }

    pub fn step_into(&mut self) {
        self.mode = ExecMode::Step;
    }

    pub fn go(&mut self) {
        self.mode = ExecMode::Running;
    }

    pub fn add_breakpoint(&mut self, addr: u32, name: Option<String>, origin: Origin) -> Result<()> {
        if self.breakpoints.contains_key(&addr) {
            return Err(Error::RepeatedBreakpoint(addr));
        }
        let debugger = origin == Origin::Debugger;
        self.breakpoints.insert(addr, Breakpoint { addr, enabled: true, name, origin, debugger, local_enabled: true });
        Ok(())
    }

    /// Debugger insert. Claims and arms an existing breakpoint, or creates one.
    pub fn debugger_insert(&mut self, addr: u32) {
        match self.breakpoints.get_mut(&addr) {
            Some(bp) => {
                if !bp.debugger {
                    bp.debugger = true;
                    bp.local_enabled = bp.enabled;
                }
                bp.enabled = true;
            }
            None => {
                let bp = Breakpoint {
                    addr,
                    enabled: true,
                    name: None,
                    origin: Origin::Debugger,
                    debugger: true,
                    local_enabled: true,
                };
                self.breakpoints.insert(addr, bp);
            }
        }
    }

    /// Debugger remove. Only drops the debugger's claim: breakpoints it
    /// created go away, local ones get their own enable flag back. Returns
    /// whether the debugger held a breakpoint at `addr`.
    pub fn debugger_remove(&mut self, addr: u32) -> bool {
        let Some(bp) = self.breakpoints.get_mut(&addr) else {
            return false;
        };
        if !bp.debugger {
            return false;
        }
        if bp.origin == Origin::Debugger {
            self.breakpoints.remove(&addr);
        } else {
            bp.debugger = false;
            bp.enabled = bp.local_enabled;
        }
        true
    }

    pub fn remove_breakpoint(&mut self, addr: u32) -> Result<Breakpoint> {
        self.breakpoints.remove(&addr).ok_or(Error::BreakpointNotFound(addr))
    }

    pub fn enable_breakpoint(&mut self, addr: u32, enabled: bool) -> Result<()> {
        let bp = self.breakpoints.get_mut(&addr).ok_or(Error::BreakpointNotFound(addr))?;
        bp.enabled = enabled;
        bp.local_enabled = enabled;
        Ok(())
    }

    /// Global switch; individual enable flags are kept.
    pub fn set_breakpoints_enabled(&mut self, enabled: bool) {
        self.breakpoints_enabled = enabled;
    }

    pub fn breakpoints_enabled(&self) -> bool {
        self.breakpoints_enabled
    }

    pub fn breakpoint(&self, addr: u32) -> Option<&Breakpoint> {
        self.breakpoints.get(&addr)
    }

    /// Breakpoints sorted by address.
    pub fn breakpoints(&self) -> Vec<&Breakpoint> {
        let mut list: Vec<_> = self.breakpoints.values().collect();
        list.sort_by_key(|bp| bp.addr);
        list
    }

    /// Removes all breakpoints, or only those created by `origin`.
    pub fn clear_breakpoints(&mut self, origin: Option<Origin>) {
        self.breakpoints.retain(|_, bp| origin.is_some_and(|origin| bp.origin != origin));
    }

    pub fn set_listener(&mut self, listener: Box<dyn StopListener>) {
        self.listener = Some(listener);
    }

    pub fn clear_listener(&mut self) {
        self.listener = None;
    }

    /// Checks the instruction boundary at `pc`. In Running mode an enabled
    /// breakpoint halts the controller, unless it is the one that caused the
    /// previous halt and nothing has retired since.
    pub fn should_break(&mut self, pc: u32) -> bool {
        if self.mode != ExecMode::Running || !self.breakpoints_enabled {
            return false;
        }
        let hit = self.breakpoints.get(&pc).is_some_and(|bp| bp.enabled);
        if !hit || self.last_break == Some(pc) {
            return false;
        }
        self.last_break = Some(pc);
        self.halt(StopReason::Breakpoint(pc), pc);
        true
    }

    /// Called after an instruction retires. A Step request is complete.
    pub fn retired(&mut self) {
        self.last_break = None;
        if self.mode == ExecMode::Step {
            self.mode = ExecMode::Halted;
        }
    }

    /// Drops everything a debug session installed and leaves the machine
    /// halted.
    pub fn reset_session(&mut self) {
        self.listener = None;
        let held: Vec<u32> = self.breakpoints.values().filter(|bp| bp.debugger).map(|bp| bp.addr).collect();
        for addr in held {
            self.debugger_remove(addr);
        }
        self.mode = ExecMode::Halted;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<(StopReason, u32)>>>);

    impl StopListener for Recorder {
        fn on_stop(&mut self, reason: StopReason, pc: u32) {
            self.0.lock().unwrap().push((reason, pc));
        }
    }

    #[test]
    fn test_breakpoint_bookkeeping() {
        let mut ctrl = Controller::new();
        ctrl.add_breakpoint(0x100, Some("main".into()), Origin::Local).unwrap();
        assert!(matches!(ctrl.add_breakpoint(0x100, None, Origin::Debugger), Err(Error::RepeatedBreakpoint(0x100))));
        ctrl.add_breakpoint(0x80, None, Origin::Debugger).unwrap();
        assert_eq!(ctrl.breakpoints().iter().map(|bp| bp.addr).collect::<Vec<_>>(), vec![0x80, 0x100]);

        ctrl.enable_breakpoint(0x100, false).unwrap();
        assert!(!ctrl.breakpoint(0x100).unwrap().enabled);
        assert!(matches!(ctrl.enable_breakpoint(0x104, true), Err(Error::BreakpointNotFound(0x104))));

        ctrl.clear_breakpoints(Some(Origin::Debugger));
        assert!(ctrl.breakpoint(0x80).is_none());
        assert!(ctrl.breakpoint(0x100).is_some());

        assert_eq!(ctrl.remove_breakpoint(0x100).unwrap().name.as_deref(), Some("main"));
        assert!(matches!(ctrl.remove_breakpoint(0x100), Err(Error::BreakpointNotFound(0x100))));
    }

    #[test]
    fn test_break_only_while_running() {
        let mut ctrl = Controller::new();
        ctrl.add_breakpoint(0x10, None, Origin::Local).unwrap();
        assert!(!ctrl.should_break(0x10));
        ctrl.step_into();
        assert!(!ctrl.should_break(0x10));
        ctrl.retired();
        assert_eq!(ctrl.mode(), ExecMode::Halted);

        ctrl.go();
        assert!(ctrl.should_break(0x10));
        assert_eq!(ctrl.mode(), ExecMode::Halted);
    }

    #[test]
    fn test_last_break_suppression() {
        let recorder = Recorder::default();
        let mut ctrl = Controller::new();
        ctrl.set_listener(Box::new(recorder.clone()));
        ctrl.add_breakpoint(0x10, None, Origin::Local).unwrap();

        ctrl.go();
        assert!(ctrl.should_break(0x10));

        // Resuming at the same address executes the instruction.
        ctrl.go();
        assert!(!ctrl.should_break(0x10));
        ctrl.retired();

        // Back at the breakpoint after a retirement: it fires again.
        assert!(ctrl.should_break(0x10));
        assert_eq!(*recorder.0.lock().unwrap(), vec![(StopReason::Breakpoint(0x10), 0x10); 2]);
    }

    #[test]
    fn test_global_and_individual_enable() {
        let mut ctrl = Controller::new();
        ctrl.add_breakpoint(0x10, None, Origin::Local).unwrap();
        ctrl.go();
        ctrl.set_breakpoints_enabled(false);
        assert!(!ctrl.should_break(0x10));
        ctrl.set_breakpoints_enabled(true);
        ctrl.enable_breakpoint(0x10, false).unwrap();
        assert!(!ctrl.should_break(0x10));
        ctrl.enable_breakpoint(0x10, true).unwrap();
        assert!(ctrl.should_break(0x10));
    }

    #[test]
    fn test_halt_notifies_only_when_running() {
        let recorder = Recorder::default();
        let mut ctrl = Controller::new();
        ctrl.set_listener(Box::new(recorder.clone()));
        assert!(!ctrl.halt(StopReason::Interrupted, 0));
        ctrl.go();
        assert!(ctrl.halt(StopReason::Interrupted, 4));
        assert_eq!(*recorder.0.lock().unwrap(), vec![(StopReason::Interrupted, 4)]);
    }

    #[test]
    fn test_reset_session() {
        let mut ctrl = Controller::new();
        ctrl.set_listener(Box::new(Recorder::default()));
        ctrl.add_breakpoint(0x10, None, Origin::Local).unwrap();
        ctrl.add_breakpoint(0x20, None, Origin::Debugger).unwrap();
        ctrl.add_breakpoint(0x30, None, Origin::Local).unwrap();
        ctrl.enable_breakpoint(0x30, false).unwrap();
        ctrl.debugger_insert(0x30);
        ctrl.go();
        ctrl.reset_session();
        assert_eq!(ctrl.mode(), ExecMode::Halted);
        assert!(ctrl.breakpoint(0x10).is_some());
        assert!(ctrl.breakpoint(0x20).is_none());
        let bp = ctrl.breakpoint(0x30).unwrap();
        assert!(!bp.debugger);
        assert!(!bp.enabled);
        assert!(ctrl.listener.is_none());
    }

    #[test]
    fn test_debugger_claims_local_breakpoint() {
        let mut ctrl = Controller::new();
        ctrl.add_breakpoint(0x10, Some("loop".into()), Origin::Local).unwrap();
        ctrl.enable_breakpoint(0x10, false).unwrap();

        // Inserting over a disabled local breakpoint arms it.
        ctrl.debugger_insert(0x10);
        let bp = ctrl.breakpoint(0x10).unwrap();
        assert!(bp.enabled);
        assert!(bp.debugger);
        assert_eq!(bp.origin, Origin::Local);
        ctrl.go();
        assert!(ctrl.should_break(0x10));

        // Removing only drops the claim.
        assert!(ctrl.debugger_remove(0x10));
        let bp = ctrl.breakpoint(0x10).unwrap();
        assert!(!bp.enabled);
        assert!(!bp.debugger);
        assert_eq!(bp.name.as_deref(), Some("loop"));

        // A local breakpoint the debugger never held is left alone.
        ctrl.enable_breakpoint(0x10, true).unwrap();
        assert!(!ctrl.debugger_remove(0x10));
        assert!(ctrl.breakpoint(0x10).unwrap().enabled);

        ctrl.debugger_insert(0x20);
        assert_eq!(ctrl.breakpoint(0x20).unwrap().origin, Origin::Debugger);
        assert!(ctrl.debugger_remove(0x20));
        assert!(ctrl.breakpoint(0x20).is_none());
        assert!(!ctrl.debugger_remove(0x20));
    }
}
