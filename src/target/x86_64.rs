//! The x86-64 System V style descriptor. R10 and r11 are left out of the
//! allocatable set; the assembler keeps them for expanding memory-to-memory
//! moves and flag materialization.

use super::{Architecture, MachineReg};

pub static DESCRIPTOR: Architecture = Architecture {
    name: "x86_64",
    word_size: 8,
    ret_reg: MachineReg::Rax,
    frame_reg: MachineReg::Rbp,
    // Callee-saved registers lead so expression temporaries survive calls
    allocatable: &[
        MachineReg::Rbx,
        MachineReg::R12,
        MachineReg::R13,
        MachineReg::R14,
        MachineReg::R15,
        MachineReg::Rcx,
        MachineReg::Rdx,
        MachineReg::Rsi,
        MachineReg::Rdi,
        MachineReg::R8,
        MachineReg::R9,
    ],
    mangle: mangle_symbol_name,
};

/// ELF-style mangling: user symbols pass through untouched unless they would
/// collide with an assembler directive-looking name, in which case they get
/// an underscore prefix.
fn mangle_symbol_name(name: &str) -> String {
    if name.starts_with('.') || name.is_empty() {
        format!("_{name}")
    } else {
        name.to_owned()
    }
}
