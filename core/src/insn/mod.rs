//! Instruction decoding.

use std::fmt::Debug;

use crate::bus::Bus;
use crate::csr::Csrs;
use crate::state::State;
use crate::trap::Exception;

/// The 'imm' field has not been sign-extended yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    R {
        // [31:25] funct7
        // [24:20] rs2
        // [19:15] rs1
        // [14:12] funct3
        // [11:7] rd
        // [6:0] opcode
        funct7: u8,
        rs2: u8,
        rs1: u8,
        funct3: u8,
        rd: u8,
        opcode: u8,
        raw: u32,
    },
    I {
        // [31:20] imm[11:0]
        // [19:15] rs1
        // [14:12] funct3
        // [11:7] rd
        // [6:0] opcode
        imm: u32,
        rs1: u8,
        funct3: u8,
        rd: u8,
        opcode: u8,
        raw: u32,
    },
    S {
        // [31:25] imm[11:5]
        // [24:20] rs2
        // [19:15] rs1
        // [14:12] funct3
        // [11:7] imm[4:0]
        // [6:0] opcode
        imm: u32,
        rs2: u8,
        rs1: u8,
        funct3: u8,
        opcode: u8,
        raw: u32,
    },
    B {
        // [31:25] imm[12, 10:5]
        // [24:20] rs2
        // [19:15] rs1
        // [14:12] funct3
        // [11:7] imm[4:1, 11]
        // [6:0] opcode
        imm: u32,
        rs2: u8,
        rs1: u8,
        funct3: u8,
        opcode: u8,
        raw: u32,
    },
    U {
        // [31:12] imm[31:12]
        // [11:7] rd
        // [6:0] opcode
        imm: u32,
        rd: u8,
        opcode: u8,
        raw: u32,
    },
    J {
        // [31:12] imm[20, 10:1, 11, 19:12]
        // [11:7] rd
        // [6:0] opcode
        imm: u32,
        rd: u8,
        opcode: u8,
        raw: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsnType {
    R,
    I,
    S,
    B,
    U,
    J,
}

impl Instruction {
    /// Splits `raw` into the fields of format `insn_type`.
    pub fn new(raw: u32, insn_type: InsnType) -> Self {
        let opcode = (raw & 0x7f) as u8;
        let rd = ((raw >> 7) & 0x1f) as u8;
        let funct3 = ((raw >> 12) & 0x07) as u8;
        let rs1 = ((raw >> 15) & 0x1f) as u8;
        let rs2 = ((raw >> 20) & 0x1f) as u8;
        let funct7 = ((raw >> 25) & 0x7f) as u8;
        let imm = Self::extract_imm(raw, insn_type);

        use InsnType::*;
        match insn_type {
            R => Instruction::R { funct7, rs2, rs1, funct3, rd, opcode, raw },
            I => Instruction::I { imm, rs1, funct3, rd, opcode, raw },
            S => Instruction::S { imm, rs2, rs1, funct3, opcode, raw },
            B => Instruction::B { imm, rs2, rs1, funct3, opcode, raw },
            U => Instruction::U { imm, rd, opcode, raw },
            J => Instruction::J { imm, rd, opcode, raw },
        }
    }

    pub fn opcode(&self) -> u8 {
        match self {
            Instruction::R { opcode, .. } => *opcode,
            Instruction::I { opcode, .. } => *opcode,
            Instruction::S { opcode, .. } => *opcode,
            Instruction::B { opcode, .. } => *opcode,
            Instruction::U { opcode, .. } => *opcode,
            Instruction::J { opcode, .. } => *opcode,
        }
    }

    pub fn raw(&self) -> u32 {
        match self {
            Instruction::R { raw, .. } => *raw,
            Instruction::I { raw, .. } => *raw,
            Instruction::S { raw, .. } => *raw,
            Instruction::B { raw, .. } => *raw,
            Instruction::U { raw, .. } => *raw,
            Instruction::J { raw, .. } => *raw,
        }
    }

    pub fn imm(&self) -> Option<u32> {
        use Instruction::*;
        match self {
            R { .. } => None,
            I { imm, .. } => Some(*imm),
            S { imm, .. } => Some(*imm),
            B { imm, .. } => Some(*imm),
            U { imm, .. } => Some(*imm),
            J { imm, .. } => Some(*imm),
        }
    }

    /// Reassembles the immediate of `insn_type` from its scattered bit fields.
    /// The sign bit is left in place: bit 11 for I/S, 12 for B, 20 for J.
    pub fn extract_imm(raw: u32, insn_type: InsnType) -> u32 {
        use InsnType::*;
        match insn_type {
            R => 0,
            I => raw >> 20,
            S => (((raw >> 25) & 0x7f) << 5) | ((raw >> 7) & 0x1f),
            B => (((raw >> 31) & 0x1) << 12) | (((raw >> 25) & 0x3f) << 5) | (((raw >> 8) & 0xf) << 1) | (((raw >> 7) & 0x1) << 11),
            U => raw & 0xfffff000,
            J => (((raw >> 31) & 0x1) << 20) | (((raw >> 21) & 0x3ff) << 1) | (((raw >> 20) & 0x1) << 11) | (((raw >> 12) & 0xff) << 12),
        }
    }
}

macro_rules! gen_insn_unwrappers {
    ($dollar:tt, $($name:ident, $type:ident),*) => {
        $(
            #[allow(unused_macros)]
            macro_rules! $name {
                ($insn:expr, $dollar($field:ident),* => $body:block) => {
                    if let &$crate::insn::Instruction::$type { $dollar($field),*, .. } = $insn {
                        $body
                    } else {
                        // A decoder paired an executor with the wrong format.
                        return Err($crate::trap::Exception::IllegalInstruction);
                    }
                };
            }
        )*
    };
}

gen_insn_unwrappers!(
    $,
    r, R,
    i, I,
    s, S,
    b, B,
    u, U,
    j, J
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InsnSet {
    I,
    M,
    Zicsr,
    Zifencei,
}

impl InsnSet {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "i" => Some(InsnSet::I),
            "m" => Some(InsnSet::M),
            "zicsr" => Some(InsnSet::Zicsr),
            "zifencei" => Some(InsnSet::Zifencei),
            _ => None,
        }
    }
}

/// Everything an executor may touch while running one instruction.
pub struct Exec<'a> {
    pub state: &'a mut State,
    pub csr: &'a mut Csrs,
    pub bus: &'a mut dyn Bus,
    /// Address of the executing instruction.
    pub pc: u32,
    /// Where execution continues; defaults to `pc + 4`.
    pub next_pc: u32,
}

impl Exec<'_> {
    #[inline(always)]
    pub fn x(&self, reg: u8) -> u32 {
        self.state.reg(reg)
    }

    #[inline(always)]
    pub fn set_x(&mut self, reg: u8, value: u32) {
        self.state.set_reg(reg, value);
    }
}

pub type ExecResult = std::result::Result<(), Exception>;

/// Executors report traps through `Err` and must not write `rd` when they do.
pub type Executor = fn(&mut Exec<'_>, &Instruction) -> ExecResult;

pub trait Decoder: Debug + Send + Sync {
    fn decode(&self, raw: u32) -> Option<(Instruction, Executor)>;
}

pub mod rv32i;
pub mod rv32m;
pub mod zicsr;
pub mod zifencei;

pub use rv32i::Rv32IDecoder;
pub use rv32m::Rv32MDecoder;
pub use zicsr::ZicsrDecoder;
pub use zifencei::ZifenceiDecoder;
