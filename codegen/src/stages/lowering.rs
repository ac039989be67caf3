//! Platform lowering stage.
//!
//! Replaces generic IR nodes with the current platform's instruction
//! nodes, one-to-one or one-to-many. The work happens in the back-end;
//! this stage is the pipeline's hook into it.

use crate::compiler::{MethodCompiler, Stage};
use crate::result::CodegenResult;

/// The platform-lowering stage.
pub struct LoweringStage;

impl Stage for LoweringStage {
    fn name(&self) -> &'static str {
        "platform-lowering"
    }

    fn run(&mut self, compiler: &mut MethodCompiler) -> CodegenResult<()> {
        compiler.isa.lower(&mut compiler.func, compiler.type_layout)
    }
}
