//! Current state of the CPU: general-purpose registers and program counter.

pub const GENERAL_REGISTER_COUNT: usize = 32;

/// ABI names, indexed by register number.
pub const REG_NAMES: [&str; GENERAL_REGISTER_COUNT] = [
    "zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2",
    "s0", "s1", "a0", "a1", "a2", "a3", "a4", "a5",
    "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7",
    "s8", "s9", "s10", "s11", "t3", "t4", "t5", "t6",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct State {
    pub pc: u32,
    // x0 must stay zero, so writes go through `set_reg`.
    x: [u32; GENERAL_REGISTER_COUNT],
}

impl State {
    pub const ZERO: Self = Self {
        pc: 0,
        x: [0; GENERAL_REGISTER_COUNT],
    };

    #[inline(always)]
    pub fn reg(&self, idx: u8) -> u32 {
        self.x[(idx & 0x1f) as usize]
    }

    /// Writes to x0 are discarded.
    #[inline(always)]
    pub fn set_reg(&mut self, idx: u8, value: u32) {
        if idx != 0 {
            self.x[(idx & 0x1f) as usize] = value;
        }
    }

    pub fn regs(&self) -> &[u32; GENERAL_REGISTER_COUNT] {
        &self.x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_registers_round_trip(idx in 1u8..32, value in any::<u32>()) {
            let mut state = State::default();
            state.set_reg(idx, value);
            prop_assert_eq!(state.reg(idx), value);
        }

        #[test]
        fn test_x0_hardwired(value in any::<u32>()) {
            let mut state = State::default();
            state.set_reg(0, value);
            prop_assert_eq!(state.reg(0), 0);
        }
    }
}
