//! Instruction disassembly for display and tracing.
//!
//! Accepts any bit pattern. Encodings the hart would reject render as
//! `.word 0x........`. Branch and jump targets are shown as absolute
//! addresses, so the caller passes the instruction's pc.

use crate::csr::*;
use crate::insn::rv32i::*;
use crate::insn::zicsr::PRIV_MRET;
use crate::insn::zifencei::ZIFENCEI_FUNCT3;
use crate::insn::{InsnType, Instruction};
use crate::state::REG_NAMES;

fn reg(idx: u8) -> &'static str {
    REG_NAMES[(idx & 0x1f) as usize]
}

fn csr_name(csr: u16) -> Option<&'static str> {
    let name = match csr {
        CSR_MSTATUS => "mstatus",
        CSR_MISA => "misa",
        CSR_MIE => "mie",
        CSR_MTVEC => "mtvec",
        CSR_MSCRATCH => "mscratch",
        CSR_MEPC => "mepc",
        CSR_MCAUSE => "mcause",
        CSR_MTVAL => "mtval",
        CSR_MIP => "mip",
        CSR_MCYCLE => "mcycle",
        CSR_MINSTRET => "minstret",
        CSR_MCYCLEH => "mcycleh",
        CSR_MINSTRETH => "minstreth",
        CSR_CYCLE => "cycle",
        CSR_INSTRET => "instret",
        CSR_CYCLEH => "cycleh",
        CSR_INSTRETH => "instreth",
        CSR_MHARTID => "mhartid",
        _ => return None,
    };
    Some(name)
}

fn line(mnemonic: &str, operands: String) -> String {
    if operands.is_empty() {
        mnemonic.to_string()
    } else {
        format!("{:<8}{}", mnemonic, operands)
    }
}

fn illegal(raw: u32) -> String {
    format!(".word 0x{:08x}", raw)
}

/// Renders one instruction as `mnemonic operands`, using ABI register names.
pub fn disassemble(raw: u32, pc: u32) -> String {
    let opcode = (raw & 0x7f) as u8;
    let funct3 = ((raw >> 12) & 0x7) as u8;
    let funct7 = ((raw >> 25) & 0x7f) as u8;

    match opcode {
        RV32I_OPCODE_LUI | RV32I_OPCODE_AUIPC => {
            let Instruction::U { rd, imm, .. } = Instruction::new(raw, InsnType::U) else {
                return illegal(raw);
            };
            let mnemonic = if opcode == RV32I_OPCODE_LUI { "lui" } else { "auipc" };
            line(mnemonic, format!("{}, {:#x}", reg(rd), imm >> 12))
        }
        RV32I_OPCODE_JAL => {
            let Instruction::J { rd, imm, .. } = Instruction::new(raw, InsnType::J) else {
                return illegal(raw);
            };
            let target = pc.wrapping_add(sign_extend!(imm, 21) as u32);
            line("jal", format!("{}, {:#x}", reg(rd), target))
        }
        RV32I_OPCODE_JALR if funct3 == 0 => {
            let Instruction::I { rd, rs1, imm, .. } = Instruction::new(raw, InsnType::I) else {
                return illegal(raw);
            };
            line("jalr", format!("{}, {}({})", reg(rd), sign_extend!(imm, 12), reg(rs1)))
        }
        RV32I_OPCODE_BRANCH => {
            let mnemonic = match funct3 {
                0b000 => "beq",
                0b001 => "bne",
                0b100 => "blt",
                0b101 => "bge",
                0b110 => "bltu",
                0b111 => "bgeu",
                _ => return illegal(raw),
            };
            let Instruction::B { rs1, rs2, imm, .. } = Instruction::new(raw, InsnType::B) else {
                return illegal(raw);
            };
            let target = pc.wrapping_add(sign_extend!(imm, 13) as u32);
            line(mnemonic, format!("{}, {}, {:#x}", reg(rs1), reg(rs2), target))
        }
        RV32I_OPCODE_LOAD => {
            let mnemonic = match funct3 {
                0b000 => "lb",
                0b001 => "lh",
                0b010 => "lw",
                0b100 => "lbu",
                0b101 => "lhu",
                _ => return illegal(raw),
            };
            let Instruction::I { rd, rs1, imm, .. } = Instruction::new(raw, InsnType::I) else {
                return illegal(raw);
            };
            line(mnemonic, format!("{}, {}({})", reg(rd), sign_extend!(imm, 12), reg(rs1)))
        }
        RV32I_OPCODE_STORE => {
            let mnemonic = match funct3 {
                0b000 => "sb",
                0b001 => "sh",
                0b010 => "sw",
                _ => return illegal(raw),
            };
            let Instruction::S { rs1, rs2, imm, .. } = Instruction::new(raw, InsnType::S) else {
                return illegal(raw);
            };
            line(mnemonic, format!("{}, {}({})", reg(rs2), sign_extend!(imm, 12), reg(rs1)))
        }
        RV32I_OPCODE_OP_IMM => {
            let Instruction::I { rd, rs1, imm, .. } = Instruction::new(raw, InsnType::I) else {
                return illegal(raw);
            };
            let shamt = imm & 0x1f;
            let simm = sign_extend!(imm, 12);
            let (mnemonic, operand) = match (funct3, funct7) {
                (0b000, _) => ("addi", simm.to_string()),
                (0b010, _) => ("slti", simm.to_string()),
                (0b011, _) => ("sltiu", simm.to_string()),
                (0b100, _) => ("xori", simm.to_string()),
                (0b110, _) => ("ori", simm.to_string()),
                (0b111, _) => ("andi", simm.to_string()),
                (0b001, 0) => ("slli", shamt.to_string()),
                (0b101, 0) => ("srli", shamt.to_string()),
                (0b101, 0b0100000) => ("srai", shamt.to_string()),
                _ => return illegal(raw),
            };
            line(mnemonic, format!("{}, {}, {}", reg(rd), reg(rs1), operand))
        }
        RV32I_OPCODE_OP => {
            let mnemonic = match (funct7, funct3) {
                (0, 0b000) => "add",
                (0b0100000, 0b000) => "sub",
                (0, 0b001) => "sll",
                (0, 0b010) => "slt",
                (0, 0b011) => "sltu",
                (0, 0b100) => "xor",
                (0, 0b101) => "srl",
                (0b0100000, 0b101) => "sra",
                (0, 0b110) => "or",
                (0, 0b111) => "and",
                (1, 0b000) => "mul",
                (1, 0b001) => "mulh",
                (1, 0b010) => "mulhsu",
                (1, 0b011) => "mulhu",
                (1, 0b100) => "div",
                (1, 0b101) => "divu",
                (1, 0b110) => "rem",
                (1, _) => "remu",
                _ => return illegal(raw),
            };
            let Instruction::R { rd, rs1, rs2, .. } = Instruction::new(raw, InsnType::R) else {
                return illegal(raw);
            };
            line(mnemonic, format!("{}, {}, {}", reg(rd), reg(rs1), reg(rs2)))
        }
        RV32I_OPCODE_FENCE => match funct3 {
            0 => line("fence", String::new()),
            ZIFENCEI_FUNCT3 => line("fence.i", String::new()),
            _ => illegal(raw),
        },
        RV32I_OPCODE_SYSTEM => disassemble_system(raw, funct3),
        _ => illegal(raw),
    }
}

fn disassemble_system(raw: u32, funct3: u8) -> String {
    match raw {
        RV32I_ECALL => return line("ecall", String::new()),
        RV32I_EBREAK => return line("ebreak", String::new()),
        PRIV_MRET => return line("mret", String::new()),
        _ => {}
    }
    let mnemonic = match funct3 {
        0b001 => "csrrw",
        0b010 => "csrrs",
        0b011 => "csrrc",
        0b101 => "csrrwi",
        0b110 => "csrrsi",
        0b111 => "csrrci",
        _ => return illegal(raw),
    };
    let Instruction::I { rd, rs1, imm, .. } = Instruction::new(raw, InsnType::I) else {
        return illegal(raw);
    };
    let csr = (imm & 0xfff) as u16;
    let csr = match csr_name(csr) {
        Some(name) => name.to_string(),
        None => format!("{:#x}", csr),
    };
    let source = if funct3 & 0b100 != 0 {
        rs1.to_string()
    } else {
        reg(rs1).to_string()
    };
    line(mnemonic, format!("{}, {}, {}", reg(rd), csr, source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_disassemble() {
        let pc = 0x8000_0000;
        assert_eq!(disassemble(0x00c58533, pc), "add     a0, a1, a2");
        assert_eq!(disassemble(0xfff00313, pc), "addi    t1, zero, -1");
        assert_eq!(disassemble(0x12345537, pc), "lui     a0, 0x12345");
        assert_eq!(disassemble(0x028000ef, pc), "jal     ra, 0x80000028");
        assert_eq!(disassemble(0xffd11ee3, pc), "bne     sp, t4, 0x7ffffffc");
        assert_eq!(disassemble(0x00842303, pc), "lw      t1, 8(s0)");
        assert_eq!(disassemble(0xfe740c23, pc), "sb      t2, -8(s0)");
        assert_eq!(disassemble(0x02c5c533, pc), "div     a0, a1, a2");
        assert_eq!(disassemble(0x00000073, pc), "ecall");
        assert_eq!(disassemble(0x30200073, pc), "mret");
        assert_eq!(disassemble(0x0000100f, pc), "fence.i");
        assert_eq!(disassemble(0x34102573, pc), "csrrs   a0, mepc, zero");
        assert_eq!(disassemble(0x3007d073, pc), "csrrwi  zero, mstatus, 15");
    }

    #[test]
    fn test_illegal_renders_as_word() {
        assert_eq!(disassemble(0xffff_ffff, 0), ".word 0xffffffff");
        assert_eq!(disassemble(0x0000_0000, 0), ".word 0x00000000");
        // funct3 = 3 is not a load
        assert_eq!(disassemble(0x0000_3003, 0), ".word 0x00003003");
    }

    proptest! {
        #[test]
        fn test_any_word_disassembles(raw in any::<u32>(), pc in any::<u32>()) {
            prop_assert!(!disassemble(raw, pc).is_empty());
        }
    }
}
