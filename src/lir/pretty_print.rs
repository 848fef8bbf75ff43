//! Human-readable dump of a lowered unit, for debugging and for the tests
//! that assert on CFG shape.

use colored::Colorize;
use itertools::Itertools;

use crate::{
    index::Index,
    lir::{self, IrUnit},
};

pub fn pretty_print_unit(unit: &IrUnit) -> String {
    let mut out = unit
        .data
        .iter()
        .map(|item| {
            format!(
                "{} {} {} {}\n",
                "data".magenta(),
                item.label.blue(),
                item.size,
                match item.init {
                    Some(value) => format!("= {value}"),
                    None => "?".to_owned(),
                }
            )
        })
        .join("");

    for function in &unit.functions {
        out.push_str(&format!(
            "{} {} {}\n",
            "fn".magenta(),
            function.label.blue(),
            "{".white()
        ));

        for id in &function.blocks {
            let block = &unit.blocks[*id];
            if block.is_dead() {
                continue;
            }

            out.push_str(&format!("{}\n", format!("{id}:").bright_red()));

            for instruction in &block.instructions {
                out.push_str(&format!("    {instruction}\n"));
            }

            match block.terminator {
                Some(terminator) => out.push_str(&format!("    {terminator}\n")),
                None => out.push_str(&format!("    {}\n", "<open>".red())),
            }
        }

        out.push_str(&format!("{}\n", "}".white()));
    }

    out
}

impl core::fmt::Display for lir::BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, ".b{}", self.index())
    }
}

impl core::fmt::Display for lir::Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            lir::Operand::Imm { value, .. } => {
                write!(f, "{}", format!("{value}").purple())
            }
            lir::Operand::Reg { reg, width } => {
                write!(f, "{}", format!("%{}", reg.name(width)).yellow())
            }
            lir::Operand::Mem { base, offset, size } => {
                write!(f, "{}", format!("[{base} {offset:+}]:{size}").yellow())
            }
        }
    }
}

impl core::fmt::Display for lir::Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            lir::Instruction::Prologue { label, frame_size } => {
                write!(f, "{} {} {}", "prologue".cyan(), label.blue(), frame_size)
            }
            lir::Instruction::Epilogue => write!(f, "{}", "epilogue".cyan()),
            lir::Instruction::Move { dest, src } => {
                write!(f, "{dest} {} {src}", "=".white())
            }
            lir::Instruction::Binary { op, dest, lhs, rhs } => {
                write!(f, "{dest} {} {op:?} {lhs}, {rhs}", "=".white())
            }
            lir::Instruction::Unary { op, dest, src } => {
                write!(f, "{dest} {} {op:?} {src}", "=".white())
            }
            lir::Instruction::Push { src } => write!(f, "{} {src}", "push".cyan()),
            lir::Instruction::Call { label } => {
                write!(f, "{} {}", "call".cyan(), label.blue())
            }
            lir::Instruction::AdjustStack { bytes } => {
                write!(f, "{} {bytes:+}", "adjust-stack".cyan())
            }
        }
    }
}

impl core::fmt::Display for lir::Terminator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            lir::Terminator::Jump { destination } => {
                write!(f, "{} {}", "jmp".cyan(), destination.to_string().blue())
            }
            lir::Terminator::Branch {
                condition,
                if_true,
                if_false,
            } => {
                write!(
                    f,
                    "{} {condition} {} {}",
                    "br".cyan(),
                    if_true.to_string().blue(),
                    if_false.to_string().blue()
                )
            }
            lir::Terminator::Ret => write!(f, "{}", "ret".cyan()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use itertools::Itertools;

    #[test]
    fn dump_lists_each_live_block_once() {
        let mut unit = IrUnit::new();
        let (entry, epilogue) = unit.begin_function("f");
        let dead = unit.create_block();
        unit.jump(entry, epilogue);
        unit.ret(epilogue);
        unit.end_function();

        colored::control::set_override(false);
        let dump = pretty_print_unit(&unit);

        let labels = dump
            .lines()
            .filter(|line| line.ends_with(':'))
            .collect_vec();
        assert_eq!(labels, vec![format!("{entry}:"), format!("{epilogue}:")]);
        assert!(!dump.contains(&format!("{dead}:")));
    }
}
