//! Currently no-op: there is no instruction cache to flush.

use crate::insn::{Decoder, Exec, ExecResult, Executor, InsnType, Instruction};

pub const ZIFENCEI_OPCODE: u8 = 0b0001111;
pub const ZIFENCEI_FUNCT3: u8 = 0b001;

#[derive(Debug)]
pub struct ZifenceiDecoder;

impl Decoder for ZifenceiDecoder {
    fn decode(&self, raw: u32) -> Option<(Instruction, Executor)> {
        let opcode = (raw & 0x7f) as u8;
        let funct3 = ((raw >> 12) & 0x7) as u8;
        if opcode == ZIFENCEI_OPCODE && funct3 == ZIFENCEI_FUNCT3 {
            Some((Instruction::new(raw, InsnType::I), zifencei_fence_i as Executor))
        } else {
            None
        }
    }
}

pub fn zifencei_fence_i(_cx: &mut Exec<'_>, _insn: &Instruction) -> ExecResult {
    Ok(())
}
