//! Value types carried by operands.
//!
//! The CIL evaluation stack only distinguishes a handful of categories:
//! 32-bit and 64-bit integers, single and double floats, unmanaged pointers,
//! object references, and user value types. Small integers are widened to
//! `I32` when loaded, exactly as the source stack machine prescribes, so the
//! narrow widths only survive in field types and load/store opcodes.

use crate::typesys::TypeRef;
use core::fmt;

/// The managed type of an operand.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Ty {
    /// 8-bit integer; appears on narrow stores and coerced shift counts.
    I8,
    /// 16-bit integer; appears on narrow stores.
    I16,
    /// 32-bit integer, signedness carried by the operation.
    I32,
    /// 64-bit integer.
    I64,
    /// IEEE-754 single precision.
    R4,
    /// IEEE-754 double precision.
    R8,
    /// Unmanaged pointer, native width.
    Ptr,
    /// Object reference, native width.
    Object,
    /// A user value type; size and residence come from the layout engine.
    Value(TypeRef),
}

impl Ty {
    /// Size in bytes for scalar types, given the target pointer size.
    ///
    /// Value types have no intrinsic size here; ask the layout engine.
    pub fn scalar_size(self, ptr_size: u32) -> Option<u32> {
        match self {
            Self::I8 => Some(1),
            Self::I16 => Some(2),
            Self::I32 => Some(4),
            Self::I64 => Some(8),
            Self::R4 => Some(4),
            Self::R8 => Some(8),
            Self::Ptr | Self::Object => Some(ptr_size),
            Self::Value(_) => None,
        }
    }

    /// Is this a floating-point type?
    pub fn is_float(self) -> bool {
        matches!(self, Self::R4 | Self::R8)
    }

    /// Is this an integer or pointer-width type?
    pub fn is_int(self) -> bool {
        matches!(
            self,
            Self::I8 | Self::I16 | Self::I32 | Self::I64 | Self::Ptr | Self::Object
        )
    }

    /// Is this a user value type?
    pub fn is_value_type(self) -> bool {
        matches!(self, Self::Value(_))
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::I8 => write!(f, "i8"),
            Self::I16 => write!(f, "i16"),
            Self::I32 => write!(f, "i32"),
            Self::I64 => write!(f, "i64"),
            Self::R4 => write!(f, "r4"),
            Self::R8 => write!(f, "r8"),
            Self::Ptr => write!(f, "ptr"),
            Self::Object => write!(f, "obj"),
            Self::Value(t) => write!(f, "val({t})"),
        }
    }
}
