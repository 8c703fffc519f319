//! RV32I instruction set architecture

use crate::bus::access::{self, Width};
use crate::insn::{Decoder, Exec, ExecResult, Executor, InsnType, Instruction};
use crate::trap::Exception;

pub const RV32I_OPCODE_LOAD: u8 = 0b0000011;
pub const RV32I_OPCODE_STORE: u8 = 0b0100011;
pub const RV32I_OPCODE_OP_IMM: u8 = 0b0010011;
pub const RV32I_OPCODE_OP: u8 = 0b0110011;
pub const RV32I_OPCODE_BRANCH: u8 = 0b1100011;
pub const RV32I_OPCODE_JAL: u8 = 0b1101111;
pub const RV32I_OPCODE_JALR: u8 = 0b1100111;
pub const RV32I_OPCODE_LUI: u8 = 0b0110111;
pub const RV32I_OPCODE_AUIPC: u8 = 0b0010111;
pub const RV32I_OPCODE_FENCE: u8 = 0b0001111;
pub const RV32I_OPCODE_SYSTEM: u8 = 0b1110011;

pub const RV32I_ECALL: u32 = 0x00000073;
pub const RV32I_EBREAK: u32 = 0x00100073;

const FUNCT7_ALT: u8 = 0b0100000;

#[derive(Debug)]
pub struct Rv32IDecoder;

impl Decoder for Rv32IDecoder {
    fn decode(&self, raw: u32) -> Option<(Instruction, Executor)> {
        let opcode = (raw & 0x7f) as u8;
        let funct3 = ((raw >> 12) & 0x07) as u8;
        let funct7 = ((raw >> 25) & 0x7f) as u8;

        let (insn_type, executor): (InsnType, Executor) = match opcode {
            RV32I_OPCODE_LUI => (InsnType::U, rv32i_lui),
            RV32I_OPCODE_AUIPC => (InsnType::U, rv32i_auipc),
            RV32I_OPCODE_JAL => (InsnType::J, rv32i_jal),
            RV32I_OPCODE_JALR if funct3 == 0 => (InsnType::I, rv32i_jalr),
            RV32I_OPCODE_BRANCH => (InsnType::B, match funct3 {
                0b000 => rv32i_beq,
                0b001 => rv32i_bne,
                0b100 => rv32i_blt,
                0b101 => rv32i_bge,
                0b110 => rv32i_bltu,
                0b111 => rv32i_bgeu,
                _ => return None,
            }),
            RV32I_OPCODE_LOAD => (InsnType::I, match funct3 {
                0b000 => rv32i_lb,
                0b001 => rv32i_lh,
                0b010 => rv32i_lw,
                0b100 => rv32i_lbu,
                0b101 => rv32i_lhu,
                _ => return None,
            }),
            RV32I_OPCODE_STORE => (InsnType::S, match funct3 {
                0b000 => rv32i_sb,
                0b001 => rv32i_sh,
                0b010 => rv32i_sw,
                _ => return None,
            }),
            RV32I_OPCODE_OP_IMM => (InsnType::I, match (funct3, funct7) {
                (0b000, _) => rv32i_addi,
                (0b010, _) => rv32i_slti,
                (0b011, _) => rv32i_sltiu,
                (0b100, _) => rv32i_xori,
                (0b110, _) => rv32i_ori,
                (0b111, _) => rv32i_andi,
                (0b001, 0) => rv32i_slli,
                (0b101, 0) => rv32i_srli,
                (0b101, FUNCT7_ALT) => rv32i_srai,
                _ => return None,
            }),
            RV32I_OPCODE_OP => (InsnType::R, match (funct3, funct7) {
                (0b000, 0) => rv32i_add,
                (0b000, FUNCT7_ALT) => rv32i_sub,
                (0b001, 0) => rv32i_sll,
                (0b010, 0) => rv32i_slt,
                (0b011, 0) => rv32i_sltu,
                (0b100, 0) => rv32i_xor,
                (0b101, 0) => rv32i_srl,
                (0b101, FUNCT7_ALT) => rv32i_sra,
                (0b110, 0) => rv32i_or,
                (0b111, 0) => rv32i_and,
                _ => return None,
            }),
            RV32I_OPCODE_FENCE if funct3 == 0 => (InsnType::I, rv32i_fence),
            RV32I_OPCODE_SYSTEM => match raw {
                RV32I_ECALL => (InsnType::I, rv32i_ecall),
                RV32I_EBREAK => (InsnType::I, rv32i_ebreak),
                _ => return None,
            },
            _ => return None,
        };

        Some((Instruction::new(raw, insn_type), executor))
    }
}

#[inline(always)]
fn effective_addr(cx: &Exec<'_>, rs1: u8, imm: u32) -> u32 {
    cx.x(rs1).wrapping_add(sign_extend!(imm, 12) as u32)
}

pub fn rv32i_lui(cx: &mut Exec<'_>, insn: &Instruction) -> ExecResult {
    u!(insn, rd, imm => {
        cx.set_x(rd, imm);
        Ok(())
    })
}

pub fn rv32i_auipc(cx: &mut Exec<'_>, insn: &Instruction) -> ExecResult {
    u!(insn, rd, imm => {
        let value = cx.pc.wrapping_add(imm);
        cx.set_x(rd, value);
        Ok(())
    })
}

pub fn rv32i_jal(cx: &mut Exec<'_>, insn: &Instruction) -> ExecResult {
    j!(insn, rd, imm => {
        let target = cx.pc.wrapping_add(sign_extend!(imm, 21) as u32);
        cx.set_x(rd, cx.pc.wrapping_add(4));
        cx.next_pc = target;
        Ok(())
    })
}

pub fn rv32i_jalr(cx: &mut Exec<'_>, insn: &Instruction) -> ExecResult {
    i!(insn, rd, rs1, imm => {
        // Read rs1 before rd is written; they may be the same register.
        let target = effective_addr(cx, rs1, imm) & !1;
        cx.set_x(rd, cx.pc.wrapping_add(4));
        cx.next_pc = target;
        Ok(())
    })
}

#[inline(always)]
fn branch(cx: &mut Exec<'_>, insn: &Instruction, taken: fn(u32, u32) -> bool) -> ExecResult {
    b!(insn, rs1, rs2, imm => {
        if taken(cx.x(rs1), cx.x(rs2)) {
            cx.next_pc = cx.pc.wrapping_add(sign_extend!(imm, 13) as u32);
        }
        Ok(())
    })
}

pub fn rv32i_beq(cx: &mut Exec<'_>, insn: &Instruction) -> ExecResult {
    branch(cx, insn, |a, b| a == b)
}

pub fn rv32i_bne(cx: &mut Exec<'_>, insn: &Instruction) -> ExecResult {
    branch(cx, insn, |a, b| a != b)
}

pub fn rv32i_blt(cx: &mut Exec<'_>, insn: &Instruction) -> ExecResult {
    branch(cx, insn, |a, b| (a as i32) < (b as i32))
}

pub fn rv32i_bge(cx: &mut Exec<'_>, insn: &Instruction) -> ExecResult {
    branch(cx, insn, |a, b| (a as i32) >= (b as i32))
}

pub fn rv32i_bltu(cx: &mut Exec<'_>, insn: &Instruction) -> ExecResult {
    branch(cx, insn, |a, b| a < b)
}

pub fn rv32i_bgeu(cx: &mut Exec<'_>, insn: &Instruction) -> ExecResult {
    branch(cx, insn, |a, b| a >= b)
}

#[inline(always)]
fn load(cx: &mut Exec<'_>, insn: &Instruction, width: Width, signed: bool) -> ExecResult {
    i!(insn, rd, rs1, imm => {
        let addr = effective_addr(cx, rs1, imm);
        let value = access::load(cx.bus, addr, width);
        let bits = width.bytes() * 8;
        let value = if signed { sign_extend!(value, bits) as u32 } else { value };
        cx.set_x(rd, value);
        Ok(())
    })
}

pub fn rv32i_lb(cx: &mut Exec<'_>, insn: &Instruction) -> ExecResult {
    load(cx, insn, Width::Byte, true)
}

pub fn rv32i_lbu(cx: &mut Exec<'_>, insn: &Instruction) -> ExecResult {
    load(cx, insn, Width::Byte, false)
}

pub fn rv32i_lh(cx: &mut Exec<'_>, insn: &Instruction) -> ExecResult {
    load(cx, insn, Width::Half, true)
}

pub fn rv32i_lhu(cx: &mut Exec<'_>, insn: &Instruction) -> ExecResult {
    load(cx, insn, Width::Half, false)
}

pub fn rv32i_lw(cx: &mut Exec<'_>, insn: &Instruction) -> ExecResult {
    load(cx, insn, Width::Word, false)
}

#[inline(always)]
fn store(cx: &mut Exec<'_>, insn: &Instruction, width: Width) -> ExecResult {
    s!(insn, rs2, rs1, imm => {
        let addr = effective_addr(cx, rs1, imm);
        let value = cx.x(rs2);
        access::store(cx.bus, addr, value, width);
        Ok(())
    })
}

pub fn rv32i_sb(cx: &mut Exec<'_>, insn: &Instruction) -> ExecResult {
    store(cx, insn, Width::Byte)
}

pub fn rv32i_sh(cx: &mut Exec<'_>, insn: &Instruction) -> ExecResult {
    store(cx, insn, Width::Half)
}

pub fn rv32i_sw(cx: &mut Exec<'_>, insn: &Instruction) -> ExecResult {
    store(cx, insn, Width::Word)
}

#[inline(always)]
fn op_imm(cx: &mut Exec<'_>, insn: &Instruction, op: fn(u32, u32) -> u32) -> ExecResult {
    i!(insn, rd, rs1, imm => {
        let value = op(cx.x(rs1), sign_extend!(imm, 12) as u32);
        cx.set_x(rd, value);
        Ok(())
    })
}

pub fn rv32i_addi(cx: &mut Exec<'_>, insn: &Instruction) -> ExecResult {
    op_imm(cx, insn, u32::wrapping_add)
}

pub fn rv32i_slti(cx: &mut Exec<'_>, insn: &Instruction) -> ExecResult {
    op_imm(cx, insn, |a, b| ((a as i32) < (b as i32)) as u32)
}

pub fn rv32i_sltiu(cx: &mut Exec<'_>, insn: &Instruction) -> ExecResult {
    op_imm(cx, insn, |a, b| (a < b) as u32)
}

pub fn rv32i_xori(cx: &mut Exec<'_>, insn: &Instruction) -> ExecResult {
    op_imm(cx, insn, |a, b| a ^ b)
}

pub fn rv32i_ori(cx: &mut Exec<'_>, insn: &Instruction) -> ExecResult {
    op_imm(cx, insn, |a, b| a | b)
}

pub fn rv32i_andi(cx: &mut Exec<'_>, insn: &Instruction) -> ExecResult {
    op_imm(cx, insn, |a, b| a & b)
}

// Shift amounts only use the low 5 bits, which also strips funct7 from the
// immediate of the shift-immediate forms.

pub fn rv32i_slli(cx: &mut Exec<'_>, insn: &Instruction) -> ExecResult {
    op_imm(cx, insn, |a, b| a << (b & 0x1f))
}

pub fn rv32i_srli(cx: &mut Exec<'_>, insn: &Instruction) -> ExecResult {
    op_imm(cx, insn, |a, b| a >> (b & 0x1f))
}

pub fn rv32i_srai(cx: &mut Exec<'_>, insn: &Instruction) -> ExecResult {
    op_imm(cx, insn, |a, b| ((a as i32) >> (b & 0x1f)) as u32)
}

#[inline(always)]
fn op(cx: &mut Exec<'_>, insn: &Instruction, op: fn(u32, u32) -> u32) -> ExecResult {
    r!(insn, rd, rs1, rs2 => {
        let value = op(cx.x(rs1), cx.x(rs2));
        cx.set_x(rd, value);
        Ok(())
    })
}

pub fn rv32i_add(cx: &mut Exec<'_>, insn: &Instruction) -> ExecResult {
    op(cx, insn, u32::wrapping_add)
}

pub fn rv32i_sub(cx: &mut Exec<'_>, insn: &Instruction) -> ExecResult {
    op(cx, insn, u32::wrapping_sub)
}

pub fn rv32i_sll(cx: &mut Exec<'_>, insn: &Instruction) -> ExecResult {
    op(cx, insn, |a, b| a << (b & 0x1f))
}

pub fn rv32i_slt(cx: &mut Exec<'_>, insn: &Instruction) -> ExecResult {
    op(cx, insn, |a, b| ((a as i32) < (b as i32)) as u32)
}

pub fn rv32i_sltu(cx: &mut Exec<'_>, insn: &Instruction) -> ExecResult {
    op(cx, insn, |a, b| (a < b) as u32)
}

pub fn rv32i_xor(cx: &mut Exec<'_>, insn: &Instruction) -> ExecResult {
    op(cx, insn, |a, b| a ^ b)
}

pub fn rv32i_srl(cx: &mut Exec<'_>, insn: &Instruction) -> ExecResult {
    op(cx, insn, |a, b| a >> (b & 0x1f))
}

pub fn rv32i_sra(cx: &mut Exec<'_>, insn: &Instruction) -> ExecResult {
    op(cx, insn, |a, b| ((a as i32) >> (b & 0x1f)) as u32)
}

pub fn rv32i_or(cx: &mut Exec<'_>, insn: &Instruction) -> ExecResult {
    op(cx, insn, |a, b| a | b)
}

pub fn rv32i_and(cx: &mut Exec<'_>, insn: &Instruction) -> ExecResult {
    op(cx, insn, |a, b| a & b)
}

pub fn rv32i_fence(_cx: &mut Exec<'_>, _insn: &Instruction) -> ExecResult {
    Ok(())
}

pub fn rv32i_ecall(_cx: &mut Exec<'_>, _insn: &Instruction) -> ExecResult {
    Err(Exception::EnvironmentCall)
}

pub fn rv32i_ebreak(_cx: &mut Exec<'_>, _insn: &Instruction) -> ExecResult {
    Err(Exception::Breakpoint)
}
