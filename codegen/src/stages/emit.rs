//! Code emission stage.
//!
//! Walks the blocks in layout order through the platform encoders,
//! resolving intra-method labels and collecting relocation requests for
//! the linker.

use crate::binemit::CodeBuffer;
use crate::compiler::{MethodCompiler, Stage};
use crate::result::CodegenResult;

/// The emission stage.
pub struct EmitStage;

impl Stage for EmitStage {
    fn name(&self) -> &'static str {
        "emit"
    }

    fn run(&mut self, compiler: &mut MethodCompiler) -> CodegenResult<()> {
        let mut buf = CodeBuffer::new();
        compiler.isa.emit(&compiler.func, &mut buf)?;
        let (code, relocs) = buf.finish();
        compiler.counters.update("emit.bytes", code.len() as u64);
        compiler
            .counters
            .update("emit.relocations", relocs.len() as u64);
        compiler.emitted = Some((code, relocs));
        Ok(())
    }
}
