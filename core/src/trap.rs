//! Trap conditions raised by the hart.

use std::fmt;

/// High bit of `mcause`, set for interrupts.
pub const INTERRUPT_FLAG: u32 = 1 << 31;

/// Synchronous exceptions the hart can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Exception {
    IllegalInstruction,
    Breakpoint,
    EnvironmentCall,
}

impl Exception {
    /// Exception code as stored in `mcause`.
    pub const fn code(self) -> u32 {
        match self {
            Exception::IllegalInstruction => 2,
            Exception::Breakpoint => 3,
            // Environment call from M-mode
            Exception::EnvironmentCall => 11,
        }
    }
}

/// At most one trap is live per instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Trap {
    #[default]
    None,
    Exception(Exception),
    /// Carries the `mip` bit that was taken.
    Interrupt(u8),
}

impl Trap {
    pub fn is_none(&self) -> bool {
        matches!(self, Trap::None)
    }

    /// The `mcause` encoding, or `None` if no trap is live.
    pub fn cause(&self) -> Option<u32> {
        match *self {
            Trap::None => None,
            Trap::Exception(exc) => Some(exc.code()),
            Trap::Interrupt(bit) => Some(INTERRUPT_FLAG | bit as u32),
        }
    }
}

impl fmt::Display for Trap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trap::None => write!(f, "none"),
            Trap::Exception(Exception::IllegalInstruction) => write!(f, "illegal instruction"),
            Trap::Exception(Exception::Breakpoint) => write!(f, "breakpoint"),
            Trap::Exception(Exception::EnvironmentCall) => write!(f, "environment call"),
            Trap::Interrupt(bit) => write!(f, "interrupt {}", bit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cause_encoding() {
        assert_eq!(Trap::None.cause(), None);
        assert_eq!(Trap::Exception(Exception::IllegalInstruction).cause(), Some(2));
        assert_eq!(Trap::Exception(Exception::Breakpoint).cause(), Some(3));
        assert_eq!(Trap::Exception(Exception::EnvironmentCall).cause(), Some(11));
        assert_eq!(Trap::Interrupt(11).cause(), Some(0x8000_000b));
    }
}
