//! Target architecture descriptors. Lowering asks a descriptor for the word
//! size, the frame and return-value registers, and the symbol mangling
//! policy; everything else about the machine stays inside the assembler.

use hashbrown::HashMap;
use once_cell::sync::Lazy;

use crate::CompileError;

pub mod x86_64;

/// General purpose register, named by its full-width form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
#[rustfmt::skip]
pub enum MachineReg {
    Rax, Rbx, Rcx, Rdx,
    Rsi, Rdi, Rbp, Rsp,
    R8, R9, R10, R11, R12, R13, R14, R15,
}

impl MachineReg {
    /// The register's name at the given operand width in bytes.
    #[track_caller]
    pub fn name(self, width: usize) -> &'static str {
        use MachineReg::*;

        #[rustfmt::skip]
        let names: [&'static str; 4] = match self {
            Rax => ["al",   "ax",   "eax",  "rax"],
            Rbx => ["bl",   "bx",   "ebx",  "rbx"],
            Rcx => ["cl",   "cx",   "ecx",  "rcx"],
            Rdx => ["dl",   "dx",   "edx",  "rdx"],
            Rsi => ["sil",  "si",   "esi",  "rsi"],
            Rdi => ["dil",  "di",   "edi",  "rdi"],
            Rbp => ["bpl",  "bp",   "ebp",  "rbp"],
            Rsp => ["spl",  "sp",   "esp",  "rsp"],
            R8  => ["r8b",  "r8w",  "r8d",  "r8"],
            R9  => ["r9b",  "r9w",  "r9d",  "r9"],
            R10 => ["r10b", "r10w", "r10d", "r10"],
            R11 => ["r11b", "r11w", "r11d", "r11"],
            R12 => ["r12b", "r12w", "r12d", "r12"],
            R13 => ["r13b", "r13w", "r13d", "r13"],
            R14 => ["r14b", "r14w", "r14d", "r14"],
            R15 => ["r15b", "r15w", "r15d", "r15"],
        };

        match width {
            1 => names[0],
            2 => names[1],
            4 => names[2],
            8 => names[3],
            width => panic!("invalid register width {width}"),
        }
    }
}

/// Everything lowering needs to know about a target.
#[derive(Debug, Clone)]
pub struct Architecture {
    pub name: &'static str,
    /// Natural pointer/integer width in bytes
    pub word_size: usize,
    /// Register that carries scalar return values (and the hidden pointer
    /// for aggregate returns)
    pub ret_reg: MachineReg,
    /// Frame base register; positive offsets reach parameters, negative
    /// offsets reach locals
    pub frame_reg: MachineReg,
    /// Registers the lowering-time allocator may hand out. Excludes the
    /// frame and stack registers and the assembler's internal scratch pair.
    pub allocatable: &'static [MachineReg],
    /// Maps a source-level symbol name onto a target-level label
    pub mangle: fn(&str) -> String,
}

impl Architecture {
    /// Runs the mangler on a symbol that has no label yet.
    pub fn mangle_symbol(&self, symbol: &mut crate::sym::Symbol) {
        if symbol.label.is_none() {
            symbol.label = Some((self.mangle)(&symbol.name));
        }
    }
}

static TARGETS: Lazy<HashMap<&'static str, Architecture>> = Lazy::new(|| {
    let mut targets = HashMap::new();
    targets.insert(x86_64::DESCRIPTOR.name, x86_64::DESCRIPTOR.clone());
    targets
});

/// Looks up a registered architecture by name (e.g. `"x86_64"`).
pub fn lookup(name: &str) -> Option<&'static Architecture> {
    TARGETS.get(name)
}

/// Tracks which machine registers are holding live temporaries during the
/// lowering of one function. Registers are acquired either anonymously
/// ([`RegisterFile::alloc`]) or by name ([`RegisterFile::request`]) when a
/// calling convention pins the value to a specific register.
#[derive(Debug)]
pub struct RegisterFile {
    pool: &'static [MachineReg],
    in_use: Vec<MachineReg>,
}

impl RegisterFile {
    pub fn new(arch: &Architecture) -> Self {
        RegisterFile {
            pool: arch.allocatable,
            in_use: Vec::new(),
        }
    }

    pub fn is_free(&self, reg: MachineReg) -> bool {
        !self.in_use.contains(&reg)
    }

    /// Acquires any free register.
    pub fn alloc(&mut self) -> Result<MachineReg, CompileError> {
        let reg = self
            .pool
            .iter()
            .copied()
            .find(|reg| self.is_free(*reg))
            .ok_or_else(|| CompileError::Register("out of scratch registers".to_owned()))?;
        self.in_use.push(reg);
        Ok(reg)
    }

    /// Acquires a specific register, or `None` if it is already held.
    pub fn request(&mut self, reg: MachineReg) -> Option<MachineReg> {
        if !self.is_free(reg) {
            return None;
        }
        self.in_use.push(reg);
        Some(reg)
    }

    pub fn free(&mut self, reg: MachineReg) {
        if let Some(position) = self.in_use.iter().position(|held| *held == reg) {
            self.in_use.swap_remove(position);
        }
    }
}
