//! x86 and x64 back-end.
//!
//! One backend serves both modes: operand width comes from the node type
//! and 64-bit forms add a REX.W prefix. The calling convention is the
//! kernel's own: arguments in the outgoing stack area, integer results in
//! EAX (EDX:EAX for pairs), float results in XMM0.

pub mod regs;

mod emit;
mod lower;

use crate::binemit::CodeBuffer;
use crate::ir::{Function, InstData, Opcode, Operand, StackSlot, Ty};
use crate::isa::registers::{PReg, RegBank, RegClass};
use crate::isa::TargetIsa;
use crate::result::CodegenResult;
use crate::type_layout::TypeLayout;

/// The x86/x64 back-end.
pub struct X86Isa {
    x64: bool,
}

impl X86Isa {
    /// Create the backend; `x64` selects 64-bit mode.
    pub fn new(x64: bool) -> Self {
        Self { x64 }
    }
}

impl TargetIsa for X86Isa {
    fn name(&self) -> &'static str {
        if self.x64 {
            "x64"
        } else {
            "x86"
        }
    }

    fn ptr_size(&self) -> u32 {
        if self.x64 {
            8
        } else {
            4
        }
    }

    fn stack_align(&self) -> u32 {
        self.ptr_size()
    }

    fn frame_header_size(&self) -> u32 {
        // Return address plus the saved frame pointer.
        2 * self.ptr_size()
    }

    fn reg_bank(&self) -> &RegBank {
        if self.x64 {
            &regs::BANK64
        } else {
            &regs::BANK32
        }
    }

    fn scratch_regs(&self, class: RegClass) -> &'static [PReg] {
        match (class, self.x64) {
            (RegClass::Int, false) => &regs::SCRATCH32_INT,
            (RegClass::Int, true) => &regs::SCRATCH64_INT,
            (RegClass::Float, false) => &regs::SCRATCH32_FLOAT,
            (RegClass::Float, true) => &regs::SCRATCH64_FLOAT,
        }
    }

    fn lower(&self, func: &mut Function, layout: &TypeLayout) -> CodegenResult<()> {
        lower::lower(func, layout, self.x64)
    }

    fn tweak(&self, func: &mut Function) -> CodegenResult<()> {
        lower::tweak(func, self.x64)
    }

    fn assign_fixed_registers(&self, func: &mut Function) -> CodegenResult<()> {
        lower::assign_fixed_registers(func, self.x64)
    }

    fn make_spill_load(
        &self,
        func: &mut Function,
        ty: Ty,
        slot: StackSlot,
        to: Operand,
    ) -> InstData {
        let mem = func.dfg.stack_local(ty, slot);
        let (opcode, ty) = spill_op(ty, self.x64);
        let mut data = Function::inst_unary(opcode, to, mem);
        data.ty = Some(ty);
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
        let (opcode, ty) = spill_op(ty, self.x64);
        let mut data = Function::inst_unary(opcode, mem, from);
        data.ty = Some(ty);
        data
    }

    fn emit(&self, func: &Function, buf: &mut CodeBuffer) -> CodegenResult<()> {
        emit::emit(func, buf, self.x64)
    }
}

fn spill_op(ty: Ty, x64: bool) -> (Opcode, Ty) {
    match ty {
        Ty::R4 => (Opcode::X86Movss, Ty::R4),
        Ty::R8 => (Opcode::X86Movsd, Ty::R8),
        Ty::I64 => (Opcode::X86Mov, Ty::I64),
        Ty::Ptr | Ty::Object if x64 => (Opcode::X86Mov, Ty::I64),
        _ => (Opcode::X86Mov, Ty::I32),
    }
}
