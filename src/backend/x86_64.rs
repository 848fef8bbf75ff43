//! NASM-flavoured x86-64 serialization of a lowered unit. The IR's
//! three-address instructions expand into two-address machine code here,
//! using r10/r11 — which lowering never hands out — as staging registers.

use core::fmt::Write;

use itertools::Itertools;

use crate::{
    ast::{BinaryOp, UnaryOp},
    lir::{BlockId, Instruction, IrUnit, Operand, Terminator},
    target::{Architecture, MachineReg},
};

const SCRATCH: MachineReg = MachineReg::R10;
const SCRATCH2: MachineReg = MachineReg::R11;

pub struct Assembler<'a> {
    output: String,
    unit: &'a IrUnit,
    arch: &'a Architecture,
}

impl<'a> Assembler<'a> {
    pub fn new(unit: &'a IrUnit, arch: &'a Architecture) -> Self {
        Self {
            output: String::new(),
            unit,
            arch,
        }
    }

    pub fn into_output(self) -> String {
        self.output
    }

    pub fn assemble(&mut self) {
        self.push_line("bits 64");
        self.push_line("section .text");

        for n in 0..self.unit.functions.len() {
            self.push_line("");
            self.assemble_function(n);
        }

        let initialized = self.unit.data.iter().filter(|d| d.init.is_some());
        let uninitialized = self.unit.data.iter().filter(|d| d.init.is_none());

        let data = initialized
            .map(|item| {
                format!(
                    "{}: {} {}",
                    item.label,
                    reservation_directive(item.size),
                    item.init.unwrap()
                )
            })
            .join("\n");
        let bss = uninitialized
            .map(|item| format!("{}: resb {}", item.label, item.size))
            .join("\n");

        if !data.is_empty() {
            self.push_line("");
            self.push_line("section .data");
            self.push_line(&data);
        }
        if !bss.is_empty() {
            self.push_line("");
            self.push_line("section .bss");
            self.push_line(&bss);
        }
    }

    fn assemble_function(&mut self, function: usize) {
        let block_ids = self.unit.functions[function].blocks.clone();
        for id in block_ids {
            if self.unit.blocks[id].is_dead() {
                continue;
            }
            self.assemble_block(id);
        }
    }

    fn assemble_block(&mut self, id: BlockId) {
        self.push_line(&format!("{id}:"));

        let instructions = self.unit.blocks[id].instructions.clone();
        for instruction in &instructions {
            self.assemble_instruction(instruction);
        }

        match self.unit.blocks[id].terminator {
            Some(Terminator::Jump { destination }) => self.emit(format!("jmp {destination}")),
            Some(Terminator::Branch {
                condition,
                if_true,
                if_false,
            }) => {
                let reg = self.load(SCRATCH, condition);
                self.emit(format!("cmp {reg}, 0"));
                self.emit(format!("jne {if_true}"));
                self.emit(format!("jmp {if_false}"));
            }
            Some(Terminator::Ret) => self.emit("ret"),
            // Open blocks only survive lowering when unreachable; emit
            // nothing past the label
            None => {}
        }
    }

    fn assemble_instruction(&mut self, instruction: &Instruction) {
        match instruction {
            Instruction::Prologue { label, frame_size } => {
                self.push_line(&format!("global {label}"));
                self.push_line(&format!("{label}:"));
                self.emit("push rbp");
                self.emit("mov rbp, rsp");
                self.emit(format!("sub rsp, {frame_size}"));
            }
            Instruction::Epilogue => {
                self.emit("mov rsp, rbp");
                self.emit("pop rbp");
            }
            Instruction::Move { dest, src } => self.assemble_move(*dest, *src),
            Instruction::Binary { op, dest, lhs, rhs } => {
                self.assemble_binary(*op, *dest, *lhs, *rhs)
            }
            Instruction::Unary { op, dest, src } => self.assemble_unary(*op, *dest, *src),
            Instruction::Push { src } => {
                // push always moves a full word; narrower sources widen first
                let word = self.arch.word_size;
                match *src {
                    Operand::Reg { reg, width } if width == word => {
                        self.emit(format!("push {}", reg.name(word)));
                    }
                    Operand::Imm { value, .. } => self.emit(format!("push {value}")),
                    src => {
                        let reg = self.load_widened(SCRATCH, src);
                        self.emit(format!("push {}", reg.name(word)));
                    }
                }
            }
            Instruction::Call { label } => self.emit(format!("call {label}")),
            Instruction::AdjustStack { bytes } => self.emit(format!("add rsp, {bytes}")),
        }
    }

    /// Moves of any width; memory-to-memory and oversized copies stage
    /// through the scratch pair a word at a time.
    fn assemble_move(&mut self, dest: Operand, src: Operand) {
        let word = self.arch.word_size;

        if dest.width() > word || src.width() > word {
            self.assemble_block_copy(dest, src);
            return;
        }

        match (dest, src) {
            (Operand::Reg { reg, .. }, src) => {
                self.load(reg, src);
            }
            (Operand::Mem { .. }, Operand::Mem { .. }) => {
                let staged = self.load(SCRATCH, src);
                self.store(
                    dest,
                    Operand::Reg {
                        reg: staged.reg,
                        width: staged.width,
                    },
                );
            }
            (Operand::Mem { .. }, src) => self.store(dest, src),
            (Operand::Imm { .. }, _) => unreachable!("move into an immediate"),
        }
    }

    /// Word-by-word copy for aggregates. Both sides must be memory (an
    /// aggregate never fits a register); `SCRATCH2` carries each chunk.
    fn assemble_block_copy(&mut self, dest: Operand, src: Operand) {
        let word = self.arch.word_size;

        let (Operand::Mem {
            base: dest_base,
            offset: dest_offset,
            size,
        }, Operand::Mem {
            base: src_base,
            offset: src_offset,
            ..
        }) = (dest, src)
        else {
            unreachable!("aggregate move with a non-memory side");
        };

        let mut copied = 0usize;
        while copied < size {
            let chunk = (size - copied).min(word);
            // chunks are 1, 2, 4 or 8 bytes
            let chunk = [8, 4, 2, 1].into_iter().find(|c| *c <= chunk).unwrap();

            let reg = SCRATCH2.name(chunk);
            self.emit(format!(
                "mov {reg}, {}",
                memory_reference(src_base, src_offset + copied as i64, chunk)
            ));
            self.emit(format!(
                "mov {}, {reg}",
                memory_reference(dest_base, dest_offset + copied as i64, chunk)
            ));
            copied += chunk;
        }
    }

    fn assemble_binary(&mut self, op: BinaryOp, dest: Operand, lhs: Operand, rhs: Operand) {
        match op {
            BinaryOp::Add
            | BinaryOp::Sub
            | BinaryOp::BitAnd
            | BinaryOp::BitOr
            | BinaryOp::BitXor => {
                let mnemonic = match op {
                    BinaryOp::Add => "add",
                    BinaryOp::Sub => "sub",
                    BinaryOp::BitAnd => "and",
                    BinaryOp::BitOr => "or",
                    BinaryOp::BitXor => "xor",
                    _ => unreachable!(),
                };
                let acc = self.load(SCRATCH, lhs);
                let rhs = self.sized_source(SCRATCH2, rhs, acc.width);
                self.emit(format!("{mnemonic} {acc}, {rhs}"));
                self.store(
                    dest,
                    Operand::Reg {
                        reg: acc.reg,
                        width: acc.width,
                    },
                );
            }
            BinaryOp::Mul => {
                let acc = self.load(SCRATCH, lhs);
                let rhs = self.load(SCRATCH2, rhs);
                self.emit(format!("imul {acc}, {rhs}"));
                self.store(
                    dest,
                    Operand::Reg {
                        reg: acc.reg,
                        width: acc.width,
                    },
                );
            }
            BinaryOp::Div | BinaryOp::Mod => self.assemble_division(op, dest, lhs, rhs),
            op if op.is_comparison() => {
                let l = self.load(SCRATCH, lhs);
                let r = self.sized_source(SCRATCH2, rhs, l.width);
                self.emit(format!("cmp {l}, {r}"));

                let set = match op {
                    BinaryOp::Eq => "sete",
                    BinaryOp::Ne => "setne",
                    BinaryOp::Lt => "setl",
                    BinaryOp::Le => "setle",
                    BinaryOp::Gt => "setg",
                    BinaryOp::Ge => "setge",
                    _ => unreachable!(),
                };
                self.emit(format!("{set} {}", SCRATCH.name(1)));
                if dest.width() > 1 {
                    self.emit(format!(
                        "movzx {}, {}",
                        SCRATCH.name(dest.width().max(4)),
                        SCRATCH.name(1)
                    ));
                }
                self.store(dest, Operand::Reg {
                    reg: SCRATCH,
                    width: dest.width(),
                });
            }
            BinaryOp::And | BinaryOp::Or => {
                unreachable!("short-circuit operators never reach instruction selection")
            }
            _ => unreachable!(),
        }
    }

    /// idiv wants the dividend in rax:rdx; both are saved around the
    /// operation since lowering may be holding them.
    fn assemble_division(&mut self, op: BinaryOp, dest: Operand, lhs: Operand, rhs: Operand) {
        let word = self.arch.word_size;

        self.emit("push rax");
        self.emit("push rdx");

        let divisor = self.load_widened(SCRATCH2, rhs);
        let _ = self.load_widened(MachineReg::Rax, lhs);
        self.emit("cqo");
        self.emit(format!("idiv {}", divisor.name(word)));

        let result = match op {
            BinaryOp::Div => MachineReg::Rax,
            _ => MachineReg::Rdx,
        };
        self.emit(format!(
            "mov {}, {}",
            SCRATCH.name(word),
            result.name(word)
        ));

        self.emit("pop rdx");
        self.emit("pop rax");

        self.store(dest, Operand::Reg {
            reg: SCRATCH,
            width: dest.width(),
        });
    }

    fn assemble_unary(&mut self, op: UnaryOp, dest: Operand, src: Operand) {
        let loaded = self.load(SCRATCH, src);
        let mnemonic = match op {
            UnaryOp::Neg => "neg",
            UnaryOp::BitNot => "not",
            UnaryOp::Not => unreachable!("logical not lowers to a comparison"),
        };
        self.emit(format!("{mnemonic} {loaded}"));
        self.store(dest, Operand::Reg {
            reg: SCRATCH,
            width: dest.width(),
        });
    }

    /// Loads `src` into `target` at `src`'s width, returning the sized name.
    fn load(&mut self, target: MachineReg, src: Operand) -> SizedReg {
        match src {
            Operand::Imm { value, width } => {
                let name = target.name(width.max(4));
                self.emit(format!("mov {name}, {value}"));
                SizedReg {
                    reg: target,
                    width: width.max(4),
                }
            }
            Operand::Reg { reg, width } => {
                if reg != target {
                    self.emit(format!("mov {}, {}", target.name(width), reg.name(width)));
                }
                SizedReg { reg: target, width }
            }
            Operand::Mem { base, offset, size } => {
                self.emit(format!(
                    "mov {}, {}",
                    target.name(size),
                    memory_reference(base, offset, size)
                ));
                SizedReg {
                    reg: target,
                    width: size,
                }
            }
        }
    }

    /// Loads `src` zero-extended to a full word.
    fn load_widened(&mut self, target: MachineReg, src: Operand) -> MachineReg {
        let word = self.arch.word_size;
        let loaded = self.load(target, src);
        match loaded.width {
            // 32-bit writes already clear the upper half
            width if width == word || width == 4 => {}
            _ => self.emit(format!("movzx {}, {loaded}", target.name(word))),
        }
        target
    }

    /// Stores a register or immediate into `dest`.
    fn store(&mut self, dest: Operand, src: Operand) {
        match (dest, src) {
            (Operand::Reg { reg, width }, src) => {
                if !src.is_reg(reg) {
                    let src = self.source_text(src, width);
                    self.emit(format!("mov {}, {src}", reg.name(width)));
                }
            }
            (Operand::Mem { base, offset, size }, src) => {
                let src = self.source_text(src, size);
                self.emit(format!(
                    "mov {}, {src}",
                    memory_reference(base, offset, size)
                ));
            }
            (Operand::Imm { .. }, _) => unreachable!("store into an immediate"),
        }
    }

    /// Renders a source operand at the given width, staging memory sources
    /// is never needed here (callers stage first when both sides are memory).
    fn source_text(&mut self, src: Operand, width: usize) -> String {
        match src {
            Operand::Imm { value, .. } => value.to_string(),
            Operand::Reg { reg, .. } => reg.name(width).to_owned(),
            Operand::Mem { base, offset, size } => memory_reference(base, offset, size),
        }
    }

    /// Renders `rhs` so it can appear as the second operand of a
    /// two-address instruction whose accumulator has `width`.
    fn sized_source(&mut self, staging: MachineReg, rhs: Operand, width: usize) -> String {
        match rhs {
            Operand::Imm { value, .. } => value.to_string(),
            Operand::Reg { reg, .. } => reg.name(width).to_owned(),
            Operand::Mem { .. } => {
                let loaded = self.load(staging, rhs);
                loaded.reg.name(width).to_owned()
            }
        }
    }

    fn emit(&mut self, line: impl AsRef<str>) {
        self.output.push_str("    ");
        self.push_line(line.as_ref());
    }

    fn push_line(&mut self, line: &str) {
        let _ = writeln!(self.output, "{line}");
    }
}

#[derive(Clone, Copy)]
struct SizedReg {
    reg: MachineReg,
    width: usize,
}

impl core::fmt::Display for SizedReg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.reg.name(self.width))
    }
}

fn memory_reference(base: MachineReg, offset: i64, size: usize) -> String {
    let prefix = match size {
        1 => "byte",
        2 => "word",
        4 => "dword",
        _ => "qword",
    };
    if offset == 0 {
        format!("{prefix} [{base}]")
    } else {
        format!("{prefix} [{base} {offset:+}]")
    }
}

fn reservation_directive(size: usize) -> &'static str {
    match size {
        1 => "db",
        2 => "dw",
        4 => "dd",
        _ => "dq",
    }
}
