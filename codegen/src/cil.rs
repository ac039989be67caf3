//! Parsed CIL method bodies.
//!
//! The metadata loader hands the compiler structured instruction lists,
//! not raw bytes: branch targets are instruction indices, tokens are
//! already resolved to type-system references. The decoder stage consumes
//! this form directly.

use crate::typesys::{FieldRef, MethodRef, TypeRef};

/// A comparison kind, shared by the materializing (`ceq`-family) and
/// branching (`beq`-family) instructions.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum CilCmp {
    /// Equal.
    Eq,
    /// Not equal (branch forms only).
    Ne,
    /// Signed less-than.
    Lt,
    /// Signed less-or-equal (branch forms only).
    Le,
    /// Signed greater-than.
    Gt,
    /// Signed greater-or-equal (branch forms only).
    Ge,
    /// Unsigned less-than.
    LtUn,
    /// Unsigned less-or-equal (branch forms only).
    LeUn,
    /// Unsigned greater-than.
    GtUn,
    /// Unsigned greater-or-equal (branch forms only).
    GeUn,
}

/// Target width of a `conv.*` instruction.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ConvTarget {
    /// `conv.i1`.
    I1,
    /// `conv.i2`.
    I2,
    /// `conv.i4`.
    I4,
    /// `conv.i8`.
    I8,
    /// `conv.u1`.
    U1,
    /// `conv.u2`.
    U2,
    /// `conv.u4`.
    U4,
    /// `conv.u8`.
    U8,
    /// `conv.r4`.
    R4,
    /// `conv.r8`.
    R8,
}

/// One CIL instruction. Branch targets are indices into the body's
/// instruction list.
#[derive(Clone, PartialEq, Debug)]
pub enum CilOp {
    /// No operation.
    Nop,
    /// Load argument `n`.
    LdArg(u16),
    /// Store to argument `n`.
    StArg(u16),
    /// Load local `n`.
    LdLoc(u16),
    /// Store to local `n`.
    StLoc(u16),
    /// Push a 32-bit constant.
    LdcI4(i32),
    /// Push a 64-bit constant.
    LdcI8(i64),
    /// Push a single-precision constant.
    LdcR4(f32),
    /// Push a double-precision constant.
    LdcR8(f64),
    /// Push null.
    LdNull,
    /// Duplicate the top of stack.
    Dup,
    /// Discard the top of stack.
    Pop,
    /// Add.
    Add,
    /// Subtract.
    Sub,
    /// Multiply.
    Mul,
    /// Signed divide.
    Div,
    /// Unsigned divide.
    DivUn,
    /// Signed remainder.
    Rem,
    /// Unsigned remainder.
    RemUn,
    /// Bitwise and.
    And,
    /// Bitwise or.
    Or,
    /// Bitwise xor.
    Xor,
    /// Shift left.
    Shl,
    /// Arithmetic shift right.
    Shr,
    /// Logical shift right.
    ShrUn,
    /// Negate.
    Neg,
    /// Bitwise not.
    Not,
    /// Numeric conversion.
    Conv(ConvTarget),
    /// Compare the top two values, pushing 0 or 1.
    Cmp(CilCmp),
    /// Unconditional branch.
    Br(u32),
    /// Branch when the top of stack is non-zero.
    BrTrue(u32),
    /// Branch when the top of stack is zero.
    BrFalse(u32),
    /// Compare the top two values and branch.
    Bc(CilCmp, u32),
    /// Multi-way branch on the top of stack; falls through when out of
    /// range.
    Switch(Vec<u32>),
    /// Direct call.
    Call(MethodRef),
    /// Virtual call.
    CallVirt(MethodRef),
    /// Allocate and construct an object.
    NewObj(MethodRef),
    /// Load an instance field.
    LdFld(FieldRef),
    /// Store to an instance field.
    StFld(FieldRef),
    /// Load a static field.
    LdSFld(FieldRef),
    /// Store to a static field.
    StSFld(FieldRef),
    /// Return, with a value on the stack when the method is non-void.
    Ret,
}

/// The handler kind of a protected region.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum HandlerKind {
    /// `catch` with a filter type.
    Catch,
    /// `finally`.
    Finally,
    /// `fault`.
    Fault,
}

/// A protected region of a method body. Ranges are half-open instruction
/// index ranges.
#[derive(Clone, Debug)]
pub struct ProtectedRegion {
    /// Handler kind.
    pub kind: HandlerKind,
    /// First instruction of the protected range.
    pub try_start: u32,
    /// One past the last instruction of the protected range.
    pub try_end: u32,
    /// First instruction of the handler.
    pub handler_start: u32,
    /// One past the last instruction of the handler.
    pub handler_end: u32,
}

/// A parsed method body.
#[derive(Clone, Debug, Default)]
pub struct CilBody {
    /// Local variable types, in slot order.
    pub locals: Vec<TypeRef>,
    /// The instruction list.
    pub ops: Vec<CilOp>,
    /// Protected regions, outermost first.
    pub regions: Vec<ProtectedRegion>,
}

impl CilBody {
    /// A body with instructions only.
    pub fn from_ops(ops: Vec<CilOp>) -> Self {
        Self {
            locals: Vec::new(),
            ops,
            regions: Vec::new(),
        }
    }
}
