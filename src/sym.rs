//! The symbol arena shared between the frontend and the backend. The
//! frontend populates it during name resolution; lowering only reads the
//! declared types and writes back frame offsets and mangled labels.
//!
//! Symbols form a tree through `children`: a function symbol owns its
//! parameters followed by its top-level scope members, and nested `Scope`
//! symbols own the members of inner compound statements.

use crate::{
    index::{simple_index, IndexVec},
    ty::Type,
};

simple_index! {
    /// Identifies a symbol in a [`SymbolTable`]
    pub struct SymbolId;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum SymTag {
    /// A lexical scope with no storage of its own
    Scope,
    /// A local variable or a global
    Id,
    /// A function parameter
    Param,
    /// A typedef or record name; carries no storage
    TypeName,
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub tag: SymTag,
    pub name: String,
    pub children: Vec<SymbolId>,
    pub dt: Option<Type>,
    /// Frame-relative storage offset, written by the storage planner.
    /// Negative for locals, positive for parameters.
    pub offset: i64,
    /// Target-level symbol name; `None` until the mangler has run.
    pub label: Option<String>,
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: IndexVec<SymbolId, Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a free-standing symbol. Use [`SymbolTable::declare`] to attach it
    /// to a parent scope in one step.
    pub fn add(&mut self, tag: SymTag, name: &str, dt: Option<Type>) -> SymbolId {
        self.symbols.push(Symbol {
            tag,
            name: name.to_owned(),
            children: Vec::new(),
            dt,
            offset: 0,
            label: None,
        })
    }

    pub fn declare(
        &mut self,
        parent: SymbolId,
        tag: SymTag,
        name: &str,
        dt: Option<Type>,
    ) -> SymbolId {
        let id = self.add(tag, name, dt);
        self.symbols[parent].children.push(id);
        id
    }

    pub fn get(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id]
    }

    pub fn get_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id]
    }
}

impl core::ops::Index<SymbolId> for SymbolTable {
    type Output = Symbol;

    fn index(&self, id: SymbolId) -> &Symbol {
        self.get(id)
    }
}

impl core::ops::IndexMut<SymbolId> for SymbolTable {
    fn index_mut(&mut self, id: SymbolId) -> &mut Symbol {
        self.get_mut(id)
    }
}
