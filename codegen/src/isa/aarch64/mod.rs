//! ARMv8 (AArch64) back-end.

pub mod regs;

mod emit;
mod lower;

use crate::binemit::CodeBuffer;
use crate::ir::{Function, InstData, Opcode, Operand, StackSlot, Ty};
use crate::isa::registers::{PReg, RegBank, RegClass};
use crate::isa::TargetIsa;
use crate::result::CodegenResult;
use crate::type_layout::TypeLayout;

/// The AArch64 back-end.
pub struct Aarch64Isa;

impl Aarch64Isa {
    /// Create the backend.
    pub fn new() -> Self {
        Self
    }
}

impl Default for Aarch64Isa {
    fn default() -> Self {
        Self::new()
    }
}

impl TargetIsa for Aarch64Isa {
    fn name(&self) -> &'static str {
        "armv8"
    }

    fn ptr_size(&self) -> u32 {
        8
    }

    fn stack_align(&self) -> u32 {
        16
    }

    fn frame_header_size(&self) -> u32 {
        // Saved x29 and x30.
        16
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
        let (opcode, ty) = match ty {
            Ty::R4 => (Opcode::A64LdrF, Ty::R4),
            Ty::R8 => (Opcode::A64LdrF, Ty::R8),
            Ty::I64 | Ty::Ptr | Ty::Object => (Opcode::A64Ldr, Ty::I64),
            _ => (Opcode::A64Ldr, Ty::I32),
        };
        let mut data = InstData::new(opcode);
        data.ty = Some(ty);
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
        let (opcode, ty) = match ty {
            Ty::R4 => (Opcode::A64StrF, Ty::R4),
            Ty::R8 => (Opcode::A64StrF, Ty::R8),
            Ty::I64 | Ty::Ptr | Ty::Object => (Opcode::A64Str, Ty::I64),
            _ => (Opcode::A64Str, Ty::I32),
        };
        let mut data = InstData::new(opcode);
        data.ty = Some(ty);
        data.operands.push(mem);
        data.operands.push(zero);
        data.operands.push(from);
        data
    }

    fn emit(&self, func: &Function, buf: &mut CodeBuffer) -> CodegenResult<()> {
        emit::emit(func, buf)
    }
}
