//! Intermediate representation of a method.
//!
//! The IR is a control-flow graph of basic blocks holding instruction
//! nodes in intrusive doubly-linked lists. Nodes reference operand slots in
//! a per-method pool; opcode identities index a single flat descriptor
//! catalog spanning the generic IR and every platform instruction set.

pub mod condcodes;
pub mod dfg;
pub mod entities;
pub mod layout;
pub mod opcodes;
pub mod operands;
pub mod stackslot;
pub mod types;

mod function;

pub use self::condcodes::{CondCode, CondCodeOps, FloatCC, IntCC};
pub use self::dfg::{DataFlowGraph, InstData};
pub use self::entities::{Block, Inst, Operand, StackSlot};
pub use self::function::Function;
pub use self::layout::Layout;
pub use self::opcodes::{FlowControl, MemAccess, OpDesc, Opcode};
pub use self::operands::{ConstValue, OperandData, SsaData, SymbolName};
pub use self::stackslot::{StackSlotData, StackSlotKind};
pub use self::types::Ty;
