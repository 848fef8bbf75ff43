//! The data types attached to AST nodes and symbols. Sizes are not fixed by
//! the type alone; anything word-sized depends on the architecture the unit
//! is being lowered for.

use crate::target::Architecture;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    Void,
    Char,
    Bool,
    Int,
    Pointer(Box<Type>),
    Array(Box<Type>, usize),
    /// An aggregate with named layout already resolved by the frontend; only
    /// the overall width matters at this stage.
    Record { name: String, size: usize },
    Function {
        ret: Box<Type>,
        params: Vec<Type>,
    },
}

impl Type {
    /// Width of a value of this type in bytes.
    pub fn size(&self, arch: &Architecture) -> usize {
        match self {
            Type::Void => 0,
            Type::Char | Type::Bool => 1,
            Type::Int | Type::Pointer(_) => arch.word_size,
            Type::Array(element, length) => element.size(arch) * length,
            Type::Record { size, .. } => *size,
            // Function types only ever appear behind a symbol or pointer
            Type::Function { .. } => arch.word_size,
        }
    }

    /// The return type, for function types. Anything else has none.
    pub fn return_type(&self) -> Option<&Type> {
        match self {
            Type::Function { ret, .. } => Some(ret),
            _ => None,
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    pub fn pointer_to(self) -> Type {
        Type::Pointer(Box::new(self))
    }

    pub fn function(ret: Type, params: Vec<Type>) -> Type {
        Type::Function {
            ret: Box::new(ret),
            params,
        }
    }
}

impl core::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::Void => f.write_str("void"),
            Type::Char => f.write_str("char"),
            Type::Bool => f.write_str("bool"),
            Type::Int => f.write_str("int"),
            Type::Pointer(inner) => write!(f, "{inner}*"),
            Type::Array(element, length) => write!(f, "{element}[{length}]"),
            Type::Record { name, .. } => write!(f, "struct {name}"),
            Type::Function { ret, params } => {
                write!(f, "{ret}(")?;
                for (n, param) in params.iter().enumerate() {
                    if n != 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{param}")?;
                }
                f.write_str(")")
            }
        }
    }
}
