//! RV32M: integer multiply and divide.
//!
//! Division never traps. Dividing by zero gives all ones (quotient) or the
//! dividend (remainder); `i32::MIN / -1` gives the dividend and a zero
//! remainder.

use crate::insn::{Decoder, Exec, ExecResult, Executor, InsnType, Instruction};
use crate::insn::rv32i::RV32I_OPCODE_OP;

pub const RV32M_FUNCT7: u8 = 0b0000001;

#[derive(Debug)]
pub struct Rv32MDecoder;

impl Decoder for Rv32MDecoder {
    fn decode(&self, raw: u32) -> Option<(Instruction, Executor)> {
        let opcode = (raw & 0x7f) as u8;
        let funct3 = ((raw >> 12) & 0x07) as u8;
        let funct7 = ((raw >> 25) & 0x7f) as u8;
        if opcode != RV32I_OPCODE_OP || funct7 != RV32M_FUNCT7 {
            return None;
        }

        let executor: Executor = match funct3 {
            0b000 => rv32m_mul,
            0b001 => rv32m_mulh,
            0b010 => rv32m_mulhsu,
            0b011 => rv32m_mulhu,
            0b100 => rv32m_div,
            0b101 => rv32m_divu,
            0b110 => rv32m_rem,
            _ => rv32m_remu,
        };
        Some((Instruction::new(raw, InsnType::R), executor))
    }
}

#[inline(always)]
fn op(cx: &mut Exec<'_>, insn: &Instruction, op: fn(u32, u32) -> u32) -> ExecResult {
    r!(insn, rd, rs1, rs2 => {
        let value = op(cx.x(rs1), cx.x(rs2));
        cx.set_x(rd, value);
        Ok(())
    })
}

pub fn mul(a: u32, b: u32) -> u32 {
    a.wrapping_mul(b)
}

pub fn mulh(a: u32, b: u32) -> u32 {
    ((a as i32 as i64 * b as i32 as i64) >> 32) as u32
}

pub fn mulhsu(a: u32, b: u32) -> u32 {
    ((a as i32 as i64 * b as i64) >> 32) as u32
}

pub fn mulhu(a: u32, b: u32) -> u32 {
    ((a as u64 * b as u64) >> 32) as u32
}

pub fn div(a: u32, b: u32) -> u32 {
    let (a, b) = (a as i32, b as i32);
    if b == 0 {
        u32::MAX
    } else if a == i32::MIN && b == -1 {
        a as u32
    } else {
        (a / b) as u32
    }
}

pub fn divu(a: u32, b: u32) -> u32 {
    if b == 0 { u32::MAX } else { a / b }
}

pub fn rem(a: u32, b: u32) -> u32 {
    let (a, b) = (a as i32, b as i32);
    if b == 0 {
        a as u32
    } else if a == i32::MIN && b == -1 {
        0
    } else {
        (a % b) as u32
    }
}

pub fn remu(a: u32, b: u32) -> u32 {
    if b == 0 { a } else { a % b }
}

pub fn rv32m_mul(cx: &mut Exec<'_>, insn: &Instruction) -> ExecResult {
    op(cx, insn, mul)
}

pub fn rv32m_mulh(cx: &mut Exec<'_>, insn: &Instruction) -> ExecResult {
    op(cx, insn, mulh)
}

pub fn rv32m_mulhsu(cx: &mut Exec<'_>, insn: &Instruction) -> ExecResult {
    op(cx, insn, mulhsu)
}

pub fn rv32m_mulhu(cx: &mut Exec<'_>, insn: &Instruction) -> ExecResult {
    op(cx, insn, mulhu)
}

pub fn rv32m_div(cx: &mut Exec<'_>, insn: &Instruction) -> ExecResult {
    op(cx, insn, div)
}

pub fn rv32m_divu(cx: &mut Exec<'_>, insn: &Instruction) -> ExecResult {
    op(cx, insn, divu)
}

pub fn rv32m_rem(cx: &mut Exec<'_>, insn: &Instruction) -> ExecResult {
    op(cx, insn, rem)
}

pub fn rv32m_remu(cx: &mut Exec<'_>, insn: &Instruction) -> ExecResult {
    op(cx, insn, remu)
}
