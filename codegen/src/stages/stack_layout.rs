//! Stack layout.
//!
//! Parameters sit above the frame header at positive frame-pointer
//! offsets in slot-creation order; locals and spill slots grow downward
//! at negative offsets. The method's frame size is the aligned extent of
//! the downward area.

use crate::compiler::{MethodCompiler, Stage};
use crate::ir::StackSlotKind;
use crate::result::CodegenResult;

/// The stack-layout stage.
pub struct StackLayoutStage;

impl Stage for StackLayoutStage {
    fn name(&self) -> &'static str {
        "stack-layout"
    }

    fn run(&mut self, compiler: &mut MethodCompiler) -> CodegenResult<()> {
        let isa = compiler.isa;
        let func = &mut compiler.func;
        let ptr = isa.ptr_size();

        let mut arg_offset = isa.frame_header_size() as i32;
        let mut local_offset: i32 = 0;
        for (_, slot) in func.stack_slots.iter_mut() {
            match slot.kind {
                StackSlotKind::IncomingArg => {
                    slot.offset = Some(arg_offset);
                    arg_offset += slot.size.max(ptr).div_ceil(ptr) as i32 * ptr as i32;
                }
                StackSlotKind::Local | StackSlotKind::Spill => {
                    let align = slot.size.clamp(1, 8).next_power_of_two() as i32;
                    local_offset -= slot.size.max(1) as i32;
                    local_offset -= local_offset.rem_euclid(align);
                    slot.offset = Some(local_offset);
                }
            }
        }

        let align = isa.stack_align() as i32;
        let frame = (-local_offset + align - 1) / align * align;
        func.frame_size = frame as u32;
        compiler
            .counters
            .update("stack_layout.frame_size", func.frame_size as u64);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Stage as _;
    use crate::ir::{Function, StackSlotData, SymbolName};
    use crate::testutil::TestContext;

    #[test]
    fn params_up_locals_down() {
        let ctx = TestContext::x86();
        let mut func = Function::new(SymbolName::from("t"));
        let block = func.dfg.make_block();
        func.layout.append_block(block);
        func.append_inst(block, crate::ir::InstData::new(crate::ir::Opcode::ReturnVoid));
        let p0 = func.create_stack_slot(StackSlotData::new(StackSlotKind::IncomingArg, 4));
        let p1 = func.create_stack_slot(StackSlotData::new(StackSlotKind::IncomingArg, 8));
        let l0 = func.create_stack_slot(StackSlotData::new(StackSlotKind::Local, 4));
        let s0 = func.create_stack_slot(StackSlotData::new(StackSlotKind::Spill, 8));

        let mut compiler = ctx.compiler(func);
        StackLayoutStage.run(&mut compiler).unwrap();
        let func = &compiler.func;

        // x86-32 frame header is 8 bytes: return address + saved ebp.
        assert_eq!(func.stack_slots[p0].offset, Some(8));
        assert_eq!(func.stack_slots[p1].offset, Some(12));
        assert_eq!(func.stack_slots[l0].offset, Some(-4));
        assert_eq!(func.stack_slots[s0].offset, Some(-16));
        // The frame covers both negative slots, aligned.
        assert_eq!(func.frame_size, 16);
    }
}
