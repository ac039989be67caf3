//! ARMv6 (A32) back-end.
//!
//! Soft-float: single-precision values live in general-purpose registers
//! and float arithmetic calls runtime helpers; double precision is not
//! supported on this target. Division also calls the runtime, ARMv6 has
//! no divide instruction.

pub mod regs;

mod emit;
mod lower;

use crate::binemit::CodeBuffer;
use crate::ir::{Function, InstData, Opcode, Operand, StackSlot, Ty};
use crate::isa::registers::{PReg, RegBank, RegClass};
use crate::isa::TargetIsa;
use crate::result::CodegenResult;
use crate::type_layout::TypeLayout;

/// The ARMv6 back-end.
pub struct Arm32Isa;

impl Arm32Isa {
    /// Create the backend.
    pub fn new() -> Self {
        Self
    }
}

impl Default for Arm32Isa {
    fn default() -> Self {
        Self::new()
    }
}

impl TargetIsa for Arm32Isa {
    fn name(&self) -> &'static str {
        "armv6"
    }

    fn ptr_size(&self) -> u32 {
        4
    }

    fn stack_align(&self) -> u32 {
        8
    }

    fn frame_header_size(&self) -> u32 {
        // Saved fp and lr.
        8
    }

    fn reg_bank(&self) -> &RegBank {
        &regs::BANK
    }

    fn scratch_regs(&self, class: RegClass) -> &'static [PReg] {
        match class {
            RegClass::Int => &regs::SCRATCH_INT,
            RegClass::Float => &regs::SCRATCH_FLOAT,
        }
    }

    fn reg_class_of(&self, _ty: Ty) -> RegClass {
        // Soft-float: everything allocates from the integer bank.
        RegClass::Int
    }

    fn lower(&self, func: &mut Function, layout: &TypeLayout) -> CodegenResult<()> {
        lower::lower(func, layout)
    }

    fn tweak(&self, func: &mut Function) -> CodegenResult<()> {
        lower::tweak(func)
    }

    fn assign_fixed_registers(&self, func: &mut Function) -> CodegenResult<()> {
        lower::assign_fixed_registers(func)
    }

    fn make_spill_load(
        &self,
        func: &mut Function,
        ty: Ty,
        slot: StackSlot,
        to: Operand,
    ) -> InstData {
        let mem = func.dfg.stack_local(ty, slot);
        let zero = func.dfg.iconst32(0);
        let mut data = InstData::new(Opcode::A32Ldr);
        data.results.push(to);
        data.operands.push(mem);
        data.operands.push(zero);
        data
    }

    fn make_spill_store(
        &self,
        func: &mut Function,
        ty: Ty,
        slot: StackSlot,
        from: Operand,
    ) -> InstData {
        let mem = func.dfg.stack_local(ty, slot);
        let zero = func.dfg.iconst32(0);
        let mut data = InstData::new(Opcode::A32Str);
        data.operands.push(mem);
        data.operands.push(zero);
        data.operands.push(from);
        data
    }

    fn emit(&self, func: &Function, buf: &mut CodeBuffer) -> CodegenResult<()> {
        emit::emit(func, buf)
    }
}
