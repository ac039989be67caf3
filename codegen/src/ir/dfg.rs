//! Instruction and operand arenas.
//!
//! The `DataFlowGraph` owns every instruction node and operand slot in a
//! method. Node order is kept separately in the [`Layout`](super::Layout);
//! the two structures share the same entity references.

use super::entities::{Block, Inst, Operand, StackSlot};
use super::condcodes::CondCode;
use super::opcodes::Opcode;
use super::operands::{ConstValue, OperandData, SsaData, SymbolName};
use super::types::Ty;
use crate::isa::registers::PReg;
use core::fmt;
use cranelift_entity::PrimaryMap;
use smallvec::SmallVec;

/// Per-block bookkeeping. Blocks have no parameters; SSA joins are phi
/// nodes at the top of the block.
#[derive(Clone, Default, Debug)]
pub struct BlockData {}

/// An instruction node.
///
/// An *empty* node has had its opcode replaced by `Nop` and its slots
/// cleared; traversals skip it, and later stages may reuse the cell so
/// intrusive iterators stay valid.
#[derive(Clone, Debug)]
pub struct InstData {
    /// Descriptor identity.
    pub opcode: Opcode,
    /// Result slots.
    pub results: SmallVec<[Operand; 2]>,
    /// Operand slots.
    pub operands: SmallVec<[Operand; 4]>,
    /// Associated managed type, when the opcode is width-generic.
    pub ty: Option<Ty>,
    /// Condition, on conditional opcodes.
    pub cc: Option<CondCode>,
    /// Auxiliary block list: phi source blocks (parallel to `operands`),
    /// branch targets, or switch case targets with the default last.
    pub blocks: SmallVec<[Block; 2]>,
}

impl InstData {
    /// Create a node with empty slots for `opcode`.
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            results: SmallVec::new(),
            operands: SmallVec::new(),
            ty: None,
            cc: None,
            blocks: SmallVec::new(),
        }
    }

    /// Is this node an emptied placeholder?
    pub fn is_empty_node(&self) -> bool {
        self.opcode == Opcode::Nop
    }

    /// First result slot.
    pub fn result(&self) -> Operand {
        self.results[0]
    }

    /// Single branch target of a branch or conditional-branch node.
    pub fn branch_target(&self) -> Option<Block> {
        if self.opcode.is_branch() && self.blocks.len() == 1 {
            Some(self.blocks[0])
        } else {
            None
        }
    }
}

/// The arenas: instruction nodes, operand slots, and block identities.
#[derive(Clone, Default)]
pub struct DataFlowGraph {
    /// Instruction nodes.
    pub insts: PrimaryMap<Inst, InstData>,
    /// Operand slots.
    pub operands: PrimaryMap<Operand, OperandData>,
    blocks: PrimaryMap<Block, BlockData>,
    num_virtual_regs: u32,
}

impl DataFlowGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear everything.
    pub fn clear(&mut self) {
        self.insts.clear();
        self.operands.clear();
        self.blocks.clear();
        self.num_virtual_regs = 0;
    }

    /// Allocate a new block identity. The block is not inserted in the
    /// layout until `Layout::append_block`.
    pub fn make_block(&mut self) -> Block {
        self.blocks.push(BlockData::default())
    }

    /// Number of blocks allocated, including ones not (or no longer) in
    /// the layout.
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Number of instruction nodes allocated.
    pub fn num_insts(&self) -> usize {
        self.insts.len()
    }

    /// Number of virtual registers allocated.
    pub fn num_virtual_regs(&self) -> u32 {
        self.num_virtual_regs
    }

    /// Create an instruction node from prepared data.
    pub fn make_inst(&mut self, data: InstData) -> Inst {
        self.insts.push(data)
    }

    /// Empty a node: turn it into a no-op placeholder, keeping the cell so
    /// intrusive iterators and later reuse stay valid.
    pub fn empty_inst(&mut self, inst: Inst) {
        self.insts[inst] = InstData::new(Opcode::Nop);
    }

    // ---------------- operand constructors ----------------

    /// A 32-bit integer constant.
    pub fn iconst32(&mut self, value: i32) -> Operand {
        self.operands.push(OperandData::Constant {
            ty: Ty::I32,
            value: ConstValue::Int(i64::from(value)),
        })
    }

    /// A 64-bit integer constant.
    pub fn iconst64(&mut self, value: i64) -> Operand {
        self.operands.push(OperandData::Constant {
            ty: Ty::I64,
            value: ConstValue::Int(value),
        })
    }

    /// An integer constant of the given type.
    pub fn iconst(&mut self, ty: Ty, value: i64) -> Operand {
        self.operands.push(OperandData::Constant {
            ty,
            value: ConstValue::Int(value),
        })
    }

    /// A single-precision constant.
    pub fn f32const(&mut self, value: f32) -> Operand {
        self.operands.push(OperandData::Constant {
            ty: Ty::R4,
            value: ConstValue::F32(value),
        })
    }

    /// A double-precision constant.
    pub fn f64const(&mut self, value: f64) -> Operand {
        self.operands.push(OperandData::Constant {
            ty: Ty::R8,
            value: ConstValue::F64(value),
        })
    }

    /// The null reference.
    pub fn null_const(&mut self) -> Operand {
        self.operands.push(OperandData::Constant {
            ty: Ty::Object,
            value: ConstValue::Null,
        })
    }

    /// A symbol operand.
    pub fn symbol(&mut self, name: SymbolName, ty: Ty) -> Operand {
        self.operands.push(OperandData::Symbol { ty, name })
    }

    /// Allocate a fresh virtual register. Its type never changes.
    pub fn make_virtual_reg(&mut self, ty: Ty) -> Operand {
        self.num_virtual_regs += 1;
        self.operands.push(OperandData::VirtualReg { ty, ssa: None })
    }

    /// Allocate an SSA version of `parent`, which must be a virtual
    /// register.
    pub fn make_ssa_version(&mut self, parent: Operand, version: u32) -> Operand {
        let ty = self.operands[parent].ty();
        debug_assert!(self.operands[parent].is_virtual_reg());
        self.num_virtual_regs += 1;
        self.operands.push(OperandData::VirtualReg {
            ty,
            ssa: Some(SsaData { version, parent }),
        })
    }

    /// A physical register operand.
    pub fn cpu_reg(&mut self, ty: Ty, reg: PReg) -> Operand {
        self.operands.push(OperandData::CpuReg { ty, reg })
    }

    /// A stack-local operand.
    pub fn stack_local(&mut self, ty: Ty, slot: StackSlot) -> Operand {
        self.operands.push(OperandData::StackLocal { ty, slot })
    }

    // ---------------- queries ----------------

    /// Managed type of an operand.
    pub fn ty(&self, operand: Operand) -> Ty {
        self.operands[operand].ty()
    }

    /// Render one operand for stage dumps.
    pub fn display_operand(&self, operand: Operand) -> String {
        match &self.operands[operand] {
            OperandData::Constant { value, .. } => match value {
                ConstValue::Int(v) => format!("{v}"),
                ConstValue::F32(v) => format!("{v}f"),
                ConstValue::F64(v) => format!("{v}"),
                ConstValue::Null => "null".to_string(),
            },
            OperandData::VirtualReg { ssa: None, .. } => {
                format!("v{}", operand.as_u32())
            }
            OperandData::VirtualReg {
                ssa: Some(SsaData { version, parent }),
                ..
            } => format!("v{}.{}", parent.as_u32(), version),
            OperandData::CpuReg { reg, .. } => reg.name().to_string(),
            OperandData::StackLocal { slot, .. } => format!("{slot}"),
            OperandData::Symbol { name, .. } => format!("%{name}"),
        }
    }

    /// Render one instruction for stage dumps.
    pub fn display_inst(&self, data: &InstData) -> String {
        use core::fmt::Write;
        let mut s = String::new();
        for (i, &r) in data.results.iter().enumerate() {
            if i > 0 {
                s.push_str(", ");
            }
            s.push_str(&self.display_operand(r));
        }
        if !data.results.is_empty() {
            s.push_str(" = ");
        }
        s.push_str(data.opcode.name());
        if let Some(cc) = data.cc {
            let _ = write!(s, ".{cc}");
        }
        for (i, &o) in data.operands.iter().enumerate() {
            s.push_str(if i == 0 { " " } else { ", " });
            s.push_str(&self.display_operand(o));
        }
        for (i, &b) in data.blocks.iter().enumerate() {
            s.push_str(if i == 0 && data.operands.is_empty() {
                " "
            } else {
                ", "
            });
            let _ = write!(s, "{b}");
        }
        s
    }
}

impl fmt::Debug for DataFlowGraph {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DataFlowGraph")
            .field("insts", &self.insts.len())
            .field("operands", &self.operands.len())
            .field("blocks", &self.blocks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operand_identity() {
        let mut dfg = DataFlowGraph::new();
        let a = dfg.iconst32(7);
        let b = dfg.iconst32(7);
        // Same payload, distinct slots: not identity-equal.
        assert_ne!(a, b);
        assert_eq!(dfg.operands[a], dfg.operands[b]);
    }

    #[test]
    fn virtual_reg_types_are_fixed() {
        let mut dfg = DataFlowGraph::new();
        let v = dfg.make_virtual_reg(Ty::I64);
        assert_eq!(dfg.ty(v), Ty::I64);
        let s = dfg.make_ssa_version(v, 1);
        assert_eq!(dfg.ty(s), Ty::I64);
        assert_eq!(dfg.operands[s].ssa().unwrap().parent, v);
    }

    #[test]
    fn emptied_nodes_are_nops() {
        let mut dfg = DataFlowGraph::new();
        let v = dfg.make_virtual_reg(Ty::I32);
        let c = dfg.iconst32(1);
        let mut data = InstData::new(Opcode::Move32);
        data.results.push(v);
        data.operands.push(c);
        let inst = dfg.make_inst(data);
        dfg.empty_inst(inst);
        assert!(dfg.insts[inst].is_empty_node());
        assert!(dfg.insts[inst].results.is_empty());
    }
}
