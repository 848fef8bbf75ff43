//! Lowering: the one-pass walk that turns the statement tree into basic
//! blocks. The walk is top-down over the AST; blocks come out bottom-up, and
//! every statement hands back the *continuation* block its next sibling must
//! be lowered into.
//!
//! Three ambient block targets ride along: where `return` goes (the
//! function's epilogue), and where `break`/`continue` go inside the
//! innermost loop. The loop targets are saved and restored around every
//! nested loop body so the slots always mirror lexical nesting.

use log::{debug, trace};

use crate::{
    ast::{Ast, AstTag, NodeId},
    lir::{BlockId, Instruction, IrUnit},
    sym::{SymTag, SymbolId, SymbolTable},
    target::{Architecture, RegisterFile},
    ty::Type,
    CompileError,
};

mod expr;
mod stmt;

/// Lowers one module tree (and any modules it re-exports) into a fresh
/// [`IrUnit`].
pub fn lower_unit(
    ast: &Ast,
    module: NodeId,
    syms: &mut SymbolTable,
    arch: &Architecture,
) -> Result<IrUnit, CompileError> {
    let mut lowering = Lowering {
        ast,
        syms,
        arch,
        unit: IrUnit::new(),
        regs: RegisterFile::new(arch),
        return_to: None,
        break_to: None,
        continue_to: None,
    };

    lowering.lower_module(module)?;
    Ok(lowering.unit)
}

pub(crate) struct Lowering<'a> {
    pub(crate) ast: &'a Ast,
    pub(crate) syms: &'a mut SymbolTable,
    pub(crate) arch: &'a Architecture,
    pub(crate) unit: IrUnit,
    pub(crate) regs: RegisterFile,
    /// The function's epilogue block, set for the whole body
    pub(crate) return_to: Option<BlockId>,
    /// Innermost loop's exit block, if any
    pub(crate) break_to: Option<BlockId>,
    /// Innermost loop's re-test block, if any
    pub(crate) continue_to: Option<BlockId>,
}

impl<'a> Lowering<'a> {
    fn lower_module(&mut self, node: NodeId) -> Result<(), CompileError> {
        trace!("module");

        let children: Vec<NodeId> = self.ast.children(node).collect();
        for child in children {
            match self.ast[child].tag {
                AstTag::Using => {
                    if let Some(referent) = self.ast[child].r {
                        self.lower_module(referent)?;
                    }
                }
                AstTag::FnImpl => self.lower_fn_impl(child)?,
                AstTag::Decl => self.lower_global_decl(child)?,
                AstTag::Empty => trace!("empty"),
                tag => {
                    return Err(CompileError::UnhandledTag {
                        position: "module",
                        tag: tag.to_string(),
                    })
                }
            }
        }

        Ok(())
    }

    fn lower_fn_impl(&mut self, node: NodeId) -> Result<(), CompileError> {
        trace!("fn-impl");

        let symbol = self.ast[node]
            .symbol
            .ok_or_else(|| CompileError::Invariant("function without a symbol".to_owned()))?;

        self.arch.mangle_symbol(self.syms.get_mut(symbol));
        let label = self.syms[symbol].label.clone().unwrap();

        // Two words already on the stack: return address and the saved
        // frame pointer
        let word = self.arch.word_size;
        let mut last_offset = (2 * word) as i64;

        // Returning through a caller-allocated temporary? Its hidden pointer
        // sits before the parameters.
        if self.return_size(symbol) > word {
            last_offset += word as i64;
        }

        // Leading `Param` children get the incoming-argument offsets
        let children = self.syms[symbol].children.clone();
        for child in children {
            if self.syms[child].tag != SymTag::Param {
                break;
            }
            let size = self.symbol_size(child);
            let param = self.syms.get_mut(child);
            param.offset = last_offset;
            debug!("param {} at [{:+}]", param.name, param.offset);
            last_offset += size as i64;
        }

        // Stack grows down, so the frame reservation is the negation of the
        // lowest offset handed out
        let frame_size = (-assign_frame_offsets(self.arch, self.syms, symbol, 0)) as usize;

        let (entry, epilogue) = self.unit.begin_function(&label);
        self.return_to = Some(epilogue);

        self.unit
            .push(entry, Instruction::Prologue { label, frame_size });

        let body = self.ast[node]
            .r
            .ok_or_else(|| CompileError::Invariant("function without a body".to_owned()))?;
        self.lower_code(entry, body, epilogue)?;

        self.unit.push(epilogue, Instruction::Epilogue);
        self.unit.ret(epilogue);
        self.unit.end_function();
        self.return_to = None;

        Ok(())
    }

    fn symbol_size(&self, symbol: SymbolId) -> usize {
        self.syms[symbol]
            .dt
            .as_ref()
            .map(|dt| dt.size(self.arch))
            .unwrap_or(0)
    }

    /// Size of what a function symbol returns.
    fn return_size(&self, symbol: SymbolId) -> usize {
        self.syms[symbol]
            .dt
            .as_ref()
            .and_then(Type::return_type)
            .map(|ret| ret.size(self.arch))
            .unwrap_or(0)
    }

    /// Installs a new `break` target, returning the previous one for the
    /// caller to restore.
    pub(crate) fn set_break_to(&mut self, block: BlockId) -> Option<BlockId> {
        self.break_to.replace(block)
    }

    pub(crate) fn set_continue_to(&mut self, block: BlockId) -> Option<BlockId> {
        self.continue_to.replace(block)
    }
}

/// Walks a scope tree depth-first in declaration order, assigning each `Id`
/// symbol the next slot below the running offset. Returns the lowest offset
/// used; its negation is the scope's total auto-storage requirement.
///
/// Tags other than `Scope` and `Id` (parameters, type names) are skipped;
/// their storage is planned elsewhere or not at all.
pub fn assign_frame_offsets(
    arch: &Architecture,
    syms: &mut SymbolTable,
    scope: SymbolId,
    mut offset: i64,
) -> i64 {
    let children = syms[scope].children.clone();

    for child in children {
        match syms[child].tag {
            SymTag::Scope => offset = assign_frame_offsets(arch, syms, child, offset),
            SymTag::Id => {
                let size = syms[child]
                    .dt
                    .as_ref()
                    .map(|dt| dt.size(arch))
                    .unwrap_or(0);
                offset -= size as i64;
                let symbol = syms.get_mut(child);
                symbol.offset = offset;
                debug!("local {} at [{:+}]", symbol.name, symbol.offset);
            }
            _ => {}
        }
    }

    offset
}
