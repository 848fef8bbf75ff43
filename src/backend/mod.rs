//! Serialization of a lowered unit to target assembly. Lowering finishes
//! with every reachable block terminated; this stage only renders what it is
//! given and never restructures the graph.

use std::path::Path;

use crate::{lir::IrUnit, target::Architecture, CompileError};

pub mod x86_64;

/// Renders a unit as assembly text.
pub fn assembly_string(unit: &IrUnit, arch: &Architecture) -> String {
    let mut assembler = x86_64::Assembler::new(unit, arch);
    assembler.assemble();
    assembler.into_output()
}

/// Renders a unit and writes it to `output`.
pub fn write_assembly(
    unit: &IrUnit,
    arch: &Architecture,
    output: &Path,
) -> Result<(), CompileError> {
    std::fs::write(output, assembly_string(unit, arch))?;
    Ok(())
}
