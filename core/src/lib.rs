// Rvbox is the CPU and debugger core of a small RISC-V home computer.

#[macro_use]
mod utils;

pub mod config;
pub mod error;
pub mod state;
pub mod trap;
pub mod csr;
pub mod bus;
pub mod insn;
pub mod hart;
pub mod disasm;
pub mod elf;
pub mod controller;
pub mod machine;
pub mod emulator;
pub mod gdb;

pub use error::{
    Error,
    Result,
};
pub use insn::InsnSet;
