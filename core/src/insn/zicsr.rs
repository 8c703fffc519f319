//! Zicsr, plus `mret` which shares its opcode.

use crate::insn::{Decoder, Exec, ExecResult, Executor, InsnType, Instruction};
use crate::trap::Exception;

pub const ZICSR_OPCODE: u8 = 0b1110011;
pub const ZICSR_FUNCT3_CSRRW: u8 = 0b001;
pub const ZICSR_FUNCT3_CSRRS: u8 = 0b010;
pub const ZICSR_FUNCT3_CSRRC: u8 = 0b011;
pub const ZICSR_FUNCT3_CSRRWI: u8 = 0b101;
pub const ZICSR_FUNCT3_CSRRSI: u8 = 0b110;
pub const ZICSR_FUNCT3_CSRRCI: u8 = 0b111;

pub const PRIV_MRET: u32 = 0x30200073;

#[derive(Debug)]
pub struct ZicsrDecoder;

impl Decoder for ZicsrDecoder {
    fn decode(&self, raw: u32) -> Option<(Instruction, Executor)> {
        let opcode = (raw & 0x7f) as u8;
        let funct3 = ((raw >> 12) & 0x7) as u8;
        if opcode != ZICSR_OPCODE {
            return None;
        }

        let executor: Executor = match funct3 {
            ZICSR_FUNCT3_CSRRW => zicsr_csrrw,
            ZICSR_FUNCT3_CSRRS => zicsr_csrrs,
            ZICSR_FUNCT3_CSRRC => zicsr_csrrc,
            ZICSR_FUNCT3_CSRRWI => zicsr_csrrwi,
            ZICSR_FUNCT3_CSRRSI => zicsr_csrrsi,
            ZICSR_FUNCT3_CSRRCI => zicsr_csrrci,
            0 if raw == PRIV_MRET => priv_mret,
            _ => return None,
        };
        Some((Instruction::new(raw, InsnType::I), executor))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CsrOp {
    Write,
    Set,
    Clear,
}

/// Shared body of the six CSR instructions. For the immediate forms the rs1
/// field is the 5-bit zero-extended operand.
fn csr_access(cx: &mut Exec<'_>, insn: &Instruction, op: CsrOp, immediate: bool) -> ExecResult {
    i!(insn, rd, rs1, imm => {
        let csr = (imm & 0xfff) as u16;
        let operand = if immediate { zero_extend!(rs1, 5) } else { cx.x(rs1) };

        // csrrw with rd = x0 does not read; set/clear with a zero rs1 field do not write.
        let reads = op != CsrOp::Write || rd != 0;
        let writes = op == CsrOp::Write || rs1 != 0;

        let old = if reads {
            cx.csr.read(csr).ok_or(Exception::IllegalInstruction)?
        } else {
            0
        };

        if writes {
            let new = match op {
                CsrOp::Write => operand,
                CsrOp::Set => old | operand,
                CsrOp::Clear => old & !operand,
            };
            cx.csr.write(csr, new).ok_or(Exception::IllegalInstruction)?;
        }

        cx.set_x(rd, old);
        Ok(())
    })
}

pub fn zicsr_csrrw(cx: &mut Exec<'_>, insn: &Instruction) -> ExecResult {
    csr_access(cx, insn, CsrOp::Write, false)
}

pub fn zicsr_csrrs(cx: &mut Exec<'_>, insn: &Instruction) -> ExecResult {
    csr_access(cx, insn, CsrOp::Set, false)
}

pub fn zicsr_csrrc(cx: &mut Exec<'_>, insn: &Instruction) -> ExecResult {
    csr_access(cx, insn, CsrOp::Clear, false)
}

pub fn zicsr_csrrwi(cx: &mut Exec<'_>, insn: &Instruction) -> ExecResult {
    csr_access(cx, insn, CsrOp::Write, true)
}

pub fn zicsr_csrrsi(cx: &mut Exec<'_>, insn: &Instruction) -> ExecResult {
    csr_access(cx, insn, CsrOp::Set, true)
}

pub fn zicsr_csrrci(cx: &mut Exec<'_>, insn: &Instruction) -> ExecResult {
    csr_access(cx, insn, CsrOp::Clear, true)
}

pub fn priv_mret(cx: &mut Exec<'_>, _insn: &Instruction) -> ExecResult {
    cx.next_pc = cx.csr.leave_trap();
    Ok(())
}
