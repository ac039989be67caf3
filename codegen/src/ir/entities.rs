//! IR entity references.
//!
//! Instruction nodes need to reference other entities in the method body:
//! basic blocks, operands, stack slots. These references are not Rust
//! references, both because the ownership rules would make graph mutation
//! painful and because 64-bit pointers waste space. Instead each entity is a
//! struct wrapping a `u32` index into an arena owned by the
//! [`Function`](super::Function). There is a separate index type per entity
//! so we don't lose type safety.
//!
//! Compact structures store `PackedOption<T>` instead of `Option<T>`; the
//! reserved `u32::MAX` value stands in for `None`.

use cranelift_entity::entity_impl;

/// An opaque reference to a basic block in a method.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Block(u32);
entity_impl!(Block, "block");

impl Block {
    /// Create a block reference from its number, as it appears in stage
    /// dumps.
    pub fn with_number(n: u32) -> Option<Self> {
        if n < u32::MAX {
            Some(Self(n))
        } else {
            None
        }
    }
}

/// An opaque reference to an instruction node.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Inst(u32);
entity_impl!(Inst, "inst");

/// An opaque reference to an operand slot.
///
/// Two operands are identity-equal iff their references are equal; the
/// underlying [`OperandData`](super::OperandData) is never compared.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Operand(u32);
entity_impl!(Operand, "opnd");

/// An opaque reference to a method-scoped stack slot.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct StackSlot(u32);
entity_impl!(StackSlot, "ss");

impl StackSlot {
    /// Create a stack slot reference from its number.
    pub fn with_number(n: u32) -> Option<Self> {
        if n < u32::MAX {
            Some(Self(n))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::string::ToString;

    #[test]
    fn block_with_number() {
        assert_eq!(Block::with_number(0).unwrap().to_string(), "block0");
        assert_eq!(Block::with_number(17).unwrap().to_string(), "block17");
        assert_eq!(Block::with_number(u32::MAX), None);
    }

    #[test]
    fn memory() {
        use core::mem;
        use cranelift_entity::packed_option::PackedOption;
        // This is the whole point of `PackedOption`.
        assert_eq!(
            mem::size_of::<Inst>(),
            mem::size_of::<PackedOption<Inst>>()
        );
    }
}
