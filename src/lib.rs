//! Backend of the `sluice` compiler. The frontend hands over a fully checked
//! syntax tree ([`ast::Ast`]) with resolved symbols ([`sym::SymbolTable`]);
//! this crate lowers it into a control-flow graph of basic blocks
//! ([`lir::IrUnit`]), plans every function's stack frame, and serializes the
//! result to x86-64 assembly.
//!
//! ```
//! use sluice::{ast::Ast, sym::{SymTag, SymbolTable}, ty::Type};
//!
//! let arch = sluice::target::lookup("x86_64").unwrap();
//!
//! let mut syms = SymbolTable::new();
//! let f = syms.add(SymTag::Scope, "f", Some(Type::function(Type::Void, vec![])));
//!
//! let mut ast = Ast::new();
//! let body = ast.code([]);
//! let f_impl = ast.fn_impl(f, body);
//! let module = ast.module();
//! ast.append_child(module, f_impl);
//!
//! let unit = sluice::lower::lower_unit(&ast, module, &mut syms, arch).unwrap();
//! let asm = sluice::backend::assembly_string(&unit, arch);
//! assert!(asm.contains("global f"));
//! ```

use thiserror::Error;

pub mod ast;
pub mod backend;
pub mod index;
pub mod lir;
pub mod lower;
pub mod sym;
pub mod target;
pub mod ty;

/// A fatal condition met during lowering or serialization. Nothing here is
/// recoverable: by the time lowering runs, user-facing diagnostics have
/// already been issued by the frontend, so every variant is a broken
/// contract between compiler stages.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("unhandled AST tag `{tag}` at {position} position")]
    UnhandledTag {
        position: &'static str,
        tag: String,
    },

    #[error("register allocation failed: {0}")]
    Register(String),

    #[error("lowering invariant broken: {0}")]
    Invariant(String),

    #[error("failed to write output: {0}")]
    Io(#[from] std::io::Error),
}
