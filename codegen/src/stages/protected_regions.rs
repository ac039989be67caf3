//! Protected-region materialization.
//!
//! The decoder already splits blocks at every try and handler boundary;
//! this stage validates the region table and raises the method flag that
//! switches off the optimizations blind to exceptional edges.

use crate::compiler::{MethodCompiler, Stage};
use crate::result::{CodegenError, CodegenResult};

/// The protected-regions stage.
pub struct ProtectedRegionsStage;

impl Stage for ProtectedRegionsStage {
    fn name(&self) -> &'static str {
        "protected-regions"
    }

    fn run(&mut self, compiler: &mut MethodCompiler) -> CodegenResult<()> {
        let md = compiler.type_system.method(compiler.method);
        let body = match &md.body {
            Some(body) => body,
            None => return Ok(()),
        };
        if body.regions.is_empty() {
            return Ok(());
        }

        let len = body.ops.len() as u32;
        for region in &body.regions {
            let well_formed = region.try_start < region.try_end
                && region.try_end <= region.handler_start
                && region.handler_start < region.handler_end
                && region.handler_end <= len;
            if !well_formed {
                return Err(CodegenError::TypeSystem(format!(
                    "malformed protected region in {}",
                    compiler.type_system.symbol_name(compiler.method)
                )));
            }
        }
        compiler.func.has_protected_regions = true;
        compiler
            .counters
            .update("protected_regions.count", body.regions.len() as u64);
        Ok(())
    }
}
