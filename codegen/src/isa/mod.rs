//! Target ISA support.
//!
//! Each platform implements [`TargetIsa`]: lowering from generic IR to its
//! own instruction nodes, encoding tweaks, fixed-register binding, spill
//! helpers for the allocator, and binary emission. The launcher selects a
//! platform with [`lookup`] from a target triple.

pub mod registers;

#[cfg(feature = "arm64")]
pub mod aarch64;
#[cfg(feature = "arm32")]
pub mod arm32;
#[cfg(feature = "x86")]
pub mod x86;

use crate::binemit::CodeBuffer;
use crate::ir::{Function, InstData, Operand, StackSlot, Ty};
use crate::result::{CodegenError, CodegenResult};
use crate::type_layout::TypeLayout;
use registers::{PReg, RegBank, RegClass};
use target_lexicon::{Architecture, ArmArchitecture, Triple};

/// Methods that a platform back-end provides.
pub trait TargetIsa: Send + Sync {
    /// Short platform name (`"x86"`, `"x64"`, `"armv6"`, `"armv8"`).
    fn name(&self) -> &'static str;

    /// Native pointer size in bytes.
    fn ptr_size(&self) -> u32;

    /// Native pointer alignment in bytes.
    fn ptr_align(&self) -> u32 {
        self.ptr_size()
    }

    /// Stack alignment at call boundaries.
    fn stack_align(&self) -> u32;

    /// Size of the frame header between the frame base and the incoming
    /// arguments (return address plus saved frame pointer).
    fn frame_header_size(&self) -> u32;

    /// The registers this platform exposes.
    fn reg_bank(&self) -> &RegBank;

    /// Reserved scratch registers of `class`, used by spill fixups.
    fn scratch_regs(&self, class: RegClass) -> &'static [PReg];

    /// The register class values of `ty` live in. Soft-float targets keep
    /// single-precision values in integer registers.
    fn reg_class_of(&self, ty: Ty) -> RegClass {
        if ty.is_float() {
            RegClass::Float
        } else {
            RegClass::Int
        }
    }

    /// Replace generic IR nodes with platform nodes, one-to-one or
    /// one-to-many.
    fn lower(&self, func: &mut Function, layout: &TypeLayout) -> CodegenResult<()>;

    /// Enforce encoding constraints the lowering left implicit: constants
    /// out of positions that cannot encode them, shift counts coerced to
    /// 8-bit, calls through a register.
    fn tweak(&self, func: &mut Function) -> CodegenResult<()>;

    /// Bind operands constrained to specific physical registers via
    /// explicit copies.
    fn assign_fixed_registers(&self, func: &mut Function) -> CodegenResult<()>;

    /// A platform load of `ty` from `slot` into `to`, for spill fills.
    fn make_spill_load(
        &self,
        func: &mut Function,
        ty: Ty,
        slot: StackSlot,
        to: Operand,
    ) -> InstData;

    /// A platform store of `ty` from `from` into `slot`, for spills.
    fn make_spill_store(
        &self,
        func: &mut Function,
        ty: Ty,
        slot: StackSlot,
        from: Operand,
    ) -> InstData;

    /// Emit the whole function: prologue, every non-empty node in layout
    /// order, label fixups, relocation requests.
    fn emit(&self, func: &Function, buf: &mut CodeBuffer) -> CodegenResult<()>;
}

/// Look up the back-end for a target triple.
pub fn lookup(triple: &Triple) -> CodegenResult<Box<dyn TargetIsa>> {
    match triple.architecture {
        #[cfg(feature = "x86")]
        Architecture::X86_32(_) => Ok(Box::new(x86::X86Isa::new(false))),
        #[cfg(feature = "x86")]
        Architecture::X86_64 => Ok(Box::new(x86::X86Isa::new(true))),
        #[cfg(feature = "arm32")]
        Architecture::Arm(ArmArchitecture::Arm | ArmArchitecture::Armv6) => {
            Ok(Box::new(arm32::Arm32Isa::new()))
        }
        #[cfg(feature = "arm64")]
        Architecture::Aarch64(_) => Ok(Box::new(aarch64::Aarch64Isa::new())),
        other => Err(CodegenError::NotSupported(format!(
            "target architecture {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::str::FromStr;

    #[test]
    fn lookup_by_triple() {
        let triple = Triple::from_str("i686-unknown-none").unwrap();
        let isa = lookup(&triple).unwrap();
        assert_eq!(isa.name(), "x86");
        assert_eq!(isa.ptr_size(), 4);

        let triple = Triple::from_str("x86_64-unknown-none").unwrap();
        let isa = lookup(&triple).unwrap();
        assert_eq!(isa.name(), "x64");
        assert_eq!(isa.ptr_size(), 8);

        let triple = Triple::from_str("aarch64-unknown-none").unwrap();
        assert_eq!(lookup(&triple).unwrap().name(), "armv8");
    }

    #[test]
    fn unsupported_architecture() {
        let triple = Triple::from_str("riscv64gc-unknown-none-elf").unwrap();
        assert!(matches!(
            lookup(&triple),
            Err(CodegenError::NotSupported(_))
        ));
    }
}
