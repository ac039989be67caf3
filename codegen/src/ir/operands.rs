//! Operand data.
//!
//! An operand is a tagged value naming where an instruction input or output
//! lives: a constant, a virtual register (possibly SSA-versioned), a CPU
//! register, a method-scoped stack slot, or a linker-resolved symbol.
//! Operand *identity* is the [`Operand`](super::Operand) entity reference;
//! the data here is never compared for equality between slots.

use super::entities::{Operand, StackSlot};
use super::types::Ty;
use crate::isa::registers::PReg;
use core::fmt;
use std::sync::Arc;

/// A linker-level symbol name.
///
/// Cheap to clone; the same name may be referenced from many methods.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct SymbolName(Arc<str>);

impl SymbolName {
    /// Create a symbol name.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    /// The name as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SymbolName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SymbolName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A constant value.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum ConstValue {
    /// Integer constant, sign-extended to 64 bits.
    Int(i64),
    /// Single-precision constant.
    F32(f32),
    /// Double-precision constant.
    F64(f64),
    /// The null reference.
    Null,
}

impl ConstValue {
    /// The integer payload, if this is an integer constant.
    pub fn as_int(self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(v),
            _ => None,
        }
    }

    /// Bit pattern used for hashing and emission.
    pub fn bits(self) -> u64 {
        match self {
            Self::Int(v) => v as u64,
            Self::F32(v) => u64::from(v.to_bits()),
            Self::F64(v) => v.to_bits(),
            Self::Null => 0,
        }
    }
}

/// SSA bookkeeping attached to a virtual register operand.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SsaData {
    /// Version number; every version > 0 has exactly one defining node.
    pub version: u32,
    /// The pre-SSA virtual register this version renames.
    pub parent: Operand,
}

/// The residence and payload of an operand.
#[derive(Clone, PartialEq, Debug)]
pub enum OperandData {
    /// A constant.
    Constant {
        /// Managed type of the constant.
        ty: Ty,
        /// Payload.
        value: ConstValue,
    },
    /// A virtual register.
    VirtualReg {
        /// Managed type; fixed at allocation.
        ty: Ty,
        /// SSA version and parent, present only between SSA construction
        /// and Leave-SSA.
        ssa: Option<SsaData>,
    },
    /// A physical CPU register.
    CpuReg {
        /// Managed type of the value it holds.
        ty: Ty,
        /// Register descriptor.
        reg: PReg,
    },
    /// A method-scoped stack slot.
    StackLocal {
        /// Managed type of the slot.
        ty: Ty,
        /// The slot.
        slot: StackSlot,
    },
    /// A linker-resolved label.
    Symbol {
        /// Managed type (usually `Ptr`).
        ty: Ty,
        /// The name.
        name: SymbolName,
    },
}

impl OperandData {
    /// Managed type of the operand.
    pub fn ty(&self) -> Ty {
        match *self {
            Self::Constant { ty, .. }
            | Self::VirtualReg { ty, .. }
            | Self::CpuReg { ty, .. }
            | Self::StackLocal { ty, .. }
            | Self::Symbol { ty, .. } => ty,
        }
    }

    /// Is this a constant?
    pub fn is_constant(&self) -> bool {
        matches!(self, Self::Constant { .. })
    }

    /// Is this a virtual register?
    pub fn is_virtual_reg(&self) -> bool {
        matches!(self, Self::VirtualReg { .. })
    }

    /// Is this a CPU register?
    pub fn is_cpu_reg(&self) -> bool {
        matches!(self, Self::CpuReg { .. })
    }

    /// Is this an SSA-versioned virtual register?
    pub fn is_ssa(&self) -> bool {
        matches!(self, Self::VirtualReg { ssa: Some(_), .. })
    }

    /// SSA data, if present.
    pub fn ssa(&self) -> Option<SsaData> {
        match *self {
            Self::VirtualReg { ssa, .. } => ssa,
            _ => None,
        }
    }

    /// The integer payload of an integer constant.
    pub fn constant_int(&self) -> Option<i64> {
        match *self {
            Self::Constant { value, .. } => value.as_int(),
            _ => None,
        }
    }

    /// The constant payload, if any.
    pub fn constant(&self) -> Option<ConstValue> {
        match *self {
            Self::Constant { value, .. } => Some(value),
            _ => None,
        }
    }
}
