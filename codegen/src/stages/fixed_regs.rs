//! Fixed-register assignment stage.
//!
//! Operands the instruction set pins to specific physical registers
//! (shift counts in CL, division in EDX:EAX, call and return values)
//! are bound through explicit copies so the allocator sees them as
//! ordinary blocked ranges.

use crate::compiler::{MethodCompiler, Stage};
use crate::result::CodegenResult;

/// The fixed-register stage.
pub struct FixedRegistersStage;

impl Stage for FixedRegistersStage {
    fn name(&self) -> &'static str {
        "fixed-registers"
    }

    fn run(&mut self, compiler: &mut MethodCompiler) -> CodegenResult<()> {
        compiler.isa.assign_fixed_registers(&mut compiler.func)
    }
}
