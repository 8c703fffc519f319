//! Machine-mode control and status registers.
//!
//! Only the registers needed for machine-mode traps are modeled, plus the
//! performance counters firmware commonly reads. Any other CSR number is
//! unimplemented and makes the accessing instruction illegal.

use bitflags::bitflags;

pub const CSR_MSTATUS: u16 = 0x300;
pub const CSR_MISA: u16 = 0x301;
pub const CSR_MIE: u16 = 0x304;
pub const CSR_MTVEC: u16 = 0x305;
pub const CSR_MSCRATCH: u16 = 0x340;
pub const CSR_MEPC: u16 = 0x341;
pub const CSR_MCAUSE: u16 = 0x342;
pub const CSR_MTVAL: u16 = 0x343;
pub const CSR_MIP: u16 = 0x344;
pub const CSR_MCYCLE: u16 = 0xB00;
pub const CSR_MINSTRET: u16 = 0xB02;
pub const CSR_MCYCLEH: u16 = 0xB80;
pub const CSR_MINSTRETH: u16 = 0xB82;
pub const CSR_CYCLE: u16 = 0xC00;
pub const CSR_INSTRET: u16 = 0xC02;
pub const CSR_CYCLEH: u16 = 0xC80;
pub const CSR_INSTRETH: u16 = 0xC82;
pub const CSR_MHARTID: u16 = 0xF14;

/// RV32 with the I and M extensions.
pub const MISA_RV32IM: u32 = (1 << 30) | (1 << 8) | (1 << 12);

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Mstatus: u32 {
        /// Machine interrupt enable.
        const MIE = 1 << 3;
        /// Machine previous interrupt enable.
        const MPIE = 1 << 7;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Csrs {
    pub mstatus: Mstatus,
    pub mie: u32,
    pub mtvec: u32,
    pub mscratch: u32,
    pub mepc: u32,
    pub mcause: u32,
    pub mtval: u32,
    pub mip: u32,
    /// Instructions executed, trapping ones included.
    pub cycle: u64,
    /// Instructions retired without a trap.
    pub instret: u64,
}

impl Csrs {
    /// The top two bits of a CSR number mark it read-only.
    pub const fn is_read_only(csr: u16) -> bool {
        (csr >> 10) & 0b11 == 0b11
    }

    pub fn read(&self, csr: u16) -> Option<u32> {
        let value = match csr {
            CSR_MSTATUS => self.mstatus.bits(),
            CSR_MISA => MISA_RV32IM,
            CSR_MIE => self.mie,
            CSR_MTVEC => self.mtvec,
            CSR_MSCRATCH => self.mscratch,
            CSR_MEPC => self.mepc,
            CSR_MCAUSE => self.mcause,
            CSR_MTVAL => self.mtval,
            CSR_MIP => self.mip,
            CSR_MCYCLE | CSR_CYCLE => self.cycle as u32,
            CSR_MCYCLEH | CSR_CYCLEH => (self.cycle >> 32) as u32,
            CSR_MINSTRET | CSR_INSTRET => self.instret as u32,
            CSR_MINSTRETH | CSR_INSTRETH => (self.instret >> 32) as u32,
            CSR_MHARTID => 0,
            _ => return None,
        };
        Some(value)
    }

    /// Returns `None` if the CSR is unimplemented or read-only.
    pub fn write(&mut self, csr: u16, value: u32) -> Option<()> {
        if Self::is_read_only(csr) {
            return None;
        }
        match csr {
            CSR_MSTATUS => self.mstatus = Mstatus::from_bits_truncate(value),
            // WARL: writes are accepted and ignored.
            CSR_MISA => {}
            CSR_MIE => self.mie = value,
            // Only direct mode is supported.
            CSR_MTVEC => self.mtvec = value & !0b11,
            CSR_MSCRATCH => self.mscratch = value,
            CSR_MEPC => self.mepc = value & !0b11,
            CSR_MCAUSE => self.mcause = value,
            CSR_MTVAL => self.mtval = value,
            CSR_MIP => self.mip = value,
            CSR_MCYCLE => self.cycle = (self.cycle & !0xffff_ffff) | value as u64,
            CSR_MCYCLEH => self.cycle = (self.cycle & 0xffff_ffff) | (value as u64) << 32,
            CSR_MINSTRET => self.instret = (self.instret & !0xffff_ffff) | value as u64,
            CSR_MINSTRETH => self.instret = (self.instret & 0xffff_ffff) | (value as u64) << 32,
            _ => return None,
        }
        Some(())
    }

    /// Records a trap and returns the address of the handler.
    pub fn enter_trap(&mut self, cause: u32, epc: u32, tval: u32) -> u32 {
        self.mcause = cause;
        self.mepc = epc;
        self.mtval = tval;
        let enabled = self.mstatus.contains(Mstatus::MIE);
        self.mstatus.set(Mstatus::MPIE, enabled);
        self.mstatus.remove(Mstatus::MIE);
        self.mtvec & !0b11
    }

    /// Undoes `enter_trap` and returns the resume address.
    pub fn leave_trap(&mut self) -> u32 {
        let enabled = self.mstatus.contains(Mstatus::MPIE);
        self.mstatus.set(Mstatus::MIE, enabled);
        self.mstatus.insert(Mstatus::MPIE);
        self.mepc
    }

    /// Highest-numbered interrupt that is both pending and enabled, if
    /// interrupts are globally enabled.
    pub fn pending_interrupt(&self) -> Option<u8> {
        if !self.mstatus.contains(Mstatus::MIE) {
            return None;
        }
        let pending = self.mip & self.mie;
        if pending == 0 {
            None
        } else {
            Some((31 - pending.leading_zeros()) as u8)
        }
    }

    pub fn set_pending(&mut self, bit: u8, level: bool) {
        let mask = 1u32 << (bit & 0x1f);
        if level {
            self.mip |= mask;
        } else {
            self.mip &= !mask;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trap_entry_and_return() {
        let mut csr = Csrs::default();
        csr.mtvec = 0x100;
        csr.mstatus = Mstatus::MIE;

        let vector = csr.enter_trap(11, 0x2000, 0);
        assert_eq!(vector, 0x100);
        assert_eq!(csr.mepc, 0x2000);
        assert_eq!(csr.mcause, 11);
        assert!(!csr.mstatus.contains(Mstatus::MIE));
        assert!(csr.mstatus.contains(Mstatus::MPIE));

        let resume = csr.leave_trap();
        assert_eq!(resume, 0x2000);
        assert!(csr.mstatus.contains(Mstatus::MIE));
        assert!(csr.mstatus.contains(Mstatus::MPIE));
    }

    #[test]
    fn test_trap_entry_with_interrupts_disabled() {
        let mut csr = Csrs::default();
        csr.mstatus = Mstatus::MPIE;
        csr.enter_trap(2, 0, 0);
        assert!(!csr.mstatus.contains(Mstatus::MPIE));
        csr.leave_trap();
        assert!(!csr.mstatus.contains(Mstatus::MIE));
        assert!(csr.mstatus.contains(Mstatus::MPIE));
    }

    #[test]
    fn test_pending_interrupt_prefers_highest_bit() {
        let mut csr = Csrs::default();
        csr.mie = (1 << 3) | (1 << 7) | (1 << 11);
        csr.mip = (1 << 3) | (1 << 7);
        assert_eq!(csr.pending_interrupt(), None);

        csr.mstatus = Mstatus::MIE;
        assert_eq!(csr.pending_interrupt(), Some(7));

        csr.set_pending(11, true);
        assert_eq!(csr.pending_interrupt(), Some(11));

        csr.mie = 1 << 3;
        assert_eq!(csr.pending_interrupt(), Some(3));
    }

    #[test]
    fn test_read_only_and_unknown_csrs() {
        let mut csr = Csrs::default();
        assert_eq!(csr.read(0x7c0), None);
        assert_eq!(csr.write(0x7c0, 1), None);
        assert_eq!(csr.write(CSR_MHARTID, 1), None);
        assert_eq!(csr.write(CSR_CYCLE, 1), None);
        assert_eq!(csr.read(CSR_MHARTID), Some(0));

        csr.cycle = 0x1_0000_0002;
        assert_eq!(csr.read(CSR_CYCLE), Some(2));
        assert_eq!(csr.read(CSR_CYCLEH), Some(1));
        csr.write(CSR_MCYCLE, 7).unwrap();
        assert_eq!(csr.cycle, 0x1_0000_0007);
    }
}
