//! The stage pipeline.
//!
//! Stages run strictly in order; each communicates with the next only
//! through the IR graph and the method's counters. The canonical order is
//! assembled in [`crate::compiler::MethodCompiler::pipeline`].

pub mod constant_fold;
pub mod dce;
pub mod decode;
pub mod emit;
pub mod fixed_regs;
pub mod gvn;
pub mod inline;
pub mod leave_ssa;
pub mod lower64;
pub mod lowering;
pub mod protected_regions;
pub mod regalloc;
pub mod sccp;
pub mod ssa_construction;
pub mod stack_layout;
pub mod tweak;

use crate::ir::Ty;
use crate::type_layout::TypeLayout;
use crate::typesys::{PrimKind, TypeKind, TypeRef};

/// The operand type a value of managed type `t` has on the evaluation
/// stack: small integers widen to `I32`, references become `Object`,
/// user value types stay themselves.
pub(crate) fn value_ty(layout: &TypeLayout, t: TypeRef) -> Ty {
    let ts = layout.type_system();
    match ts.ty(t).kind {
        TypeKind::Primitive(p) => match p {
            PrimKind::Bool
            | PrimKind::Char
            | PrimKind::I1
            | PrimKind::I2
            | PrimKind::I4
            | PrimKind::U1
            | PrimKind::U2
            | PrimKind::U4 => Ty::I32,
            PrimKind::I8 | PrimKind::U8 => Ty::I64,
            PrimKind::R4 => Ty::R4,
            PrimKind::R8 => Ty::R8,
            PrimKind::I | PrimKind::U => Ty::Ptr,
        },
        TypeKind::ValueType => Ty::Value(t),
        _ => Ty::Object,
    }
}
