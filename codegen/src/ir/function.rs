//! The per-method IR container.
//!
//! A `Function` owns the arenas, the layout, the stack slots, and the
//! per-method flags the stages communicate through. It is created by the
//! method compiler before decoding and dropped when emission finishes.

use super::dfg::{DataFlowGraph, InstData};
use super::entities::{Block, Inst, Operand, StackSlot};
use super::layout::Layout;
use super::opcodes::{FlowControl, Opcode};
use super::operands::SymbolName;
use super::stackslot::StackSlotData;
use super::types::Ty;
use core::fmt;
use cranelift_entity::PrimaryMap;

/// A method under compilation.
#[derive(Clone)]
pub struct Function {
    /// Linker symbol of the method.
    pub name: SymbolName,
    /// Arenas holding nodes and operands.
    pub dfg: DataFlowGraph,
    /// Block and node order.
    pub layout: Layout,
    /// Stack slots (locals, spills, incoming arguments).
    pub stack_slots: PrimaryMap<StackSlot, StackSlotData>,
    /// Virtual registers holding each parameter after the entry loads.
    pub params: Vec<Operand>,
    /// Virtual registers promoting each CIL local.
    pub locals: Vec<Operand>,
    /// Return type, `None` for void.
    pub ret_ty: Option<Ty>,
    /// Set by SSA construction, cleared by Leave-SSA.
    pub is_in_ssa_form: bool,
    /// Set when the method has protected regions; disables the
    /// optimizations that cannot see exceptional edges.
    pub has_protected_regions: bool,
    /// Total frame size, recorded by the stack-layout stage.
    pub frame_size: u32,
}

impl Function {
    /// Create an empty function with the given linker symbol.
    pub fn new(name: SymbolName) -> Self {
        Self {
            name,
            dfg: DataFlowGraph::new(),
            layout: Layout::new(),
            stack_slots: PrimaryMap::new(),
            params: Vec::new(),
            locals: Vec::new(),
            ret_ty: None,
            is_in_ssa_form: false,
            has_protected_regions: false,
            frame_size: 0,
        }
    }

    /// Allocate a stack slot.
    pub fn create_stack_slot(&mut self, data: StackSlotData) -> StackSlot {
        self.stack_slots.push(data)
    }

    /// Build a node and append it to `block`.
    pub fn append_inst(&mut self, block: Block, data: InstData) -> Inst {
        let inst = self.dfg.make_inst(data);
        self.layout.append_inst(inst, block);
        inst
    }

    /// The terminator group of `block`: the trailing contiguous run of
    /// branch-kind nodes (conditional branches followed by the closing
    /// jump), skipping empty nodes. Returns the first node of the group,
    /// or `None` for a block without terminators.
    pub fn terminator_group_start(&self, block: Block) -> Option<Inst> {
        let mut start = None;
        for inst in self.layout.block_insts(block).rev() {
            let data = &self.dfg.insts[inst];
            if data.is_empty_node() {
                continue;
            }
            if data.opcode.is_terminator() {
                start = Some(inst);
            } else {
                break;
            }
        }
        start
    }

    /// All successor blocks of `block`, in terminator order.
    pub fn block_successors(&self, block: Block) -> Vec<Block> {
        let mut succs = Vec::new();
        for inst in self.layout.block_insts(block) {
            let data = &self.dfg.insts[inst];
            if data.is_empty_node() {
                continue;
            }
            match data.opcode.flow_control() {
                FlowControl::Branch | FlowControl::ConditionalBranch | FlowControl::Switch => {
                    for &target in &data.blocks {
                        if !succs.contains(&target) {
                            succs.push(target);
                        }
                    }
                }
                _ => {}
            }
        }
        succs
    }

    /// Count the phi nodes at the top of `block`.
    pub fn phi_count(&self, block: Block) -> usize {
        self.layout
            .block_insts(block)
            .map(|inst| &self.dfg.insts[inst])
            .filter(|data| !data.is_empty_node())
            .take_while(|data| data.opcode.is_phi())
            .count()
    }

    /// Validate one node's shape against its descriptor. Variadic opcodes
    /// are validated structurally by the stages that build them.
    pub fn check_node_arity(&self, inst: Inst) -> bool {
        let data = &self.dfg.insts[inst];
        if data.is_empty_node() || data.opcode.is_variadic() {
            return true;
        }
        data.results.len() == data.opcode.result_count()
            && data.operands.len() == data.opcode.operand_count()
    }

    /// Render the whole function for a stage dump. Block headers use the
    /// `Block #<n>` form ending in the `L_XXXX` label consumed by the
    /// explorer to slice views.
    pub fn display(&self) -> String {
        use core::fmt::Write;
        let mut out = String::new();
        for (n, block) in self.layout.blocks().enumerate() {
            let _ = writeln!(out, "Block #{} L_{:04X}", n, block.as_u32());
            for inst in self.layout.block_insts(block) {
                let data = &self.dfg.insts[inst];
                if data.is_empty_node() {
                    continue;
                }
                let _ = writeln!(out, "  {}", self.dfg.display_inst(data));
            }
        }
        out
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "function {}:\n{}", self.name, self.display())
    }
}

/// Convenience constructors for common node shapes, used by the decoder
/// and by tests.
impl Function {
    /// `result = opcode operand` with one operand.
    pub fn inst_unary(opcode: Opcode, result: Operand, operand: Operand) -> InstData {
        let mut data = InstData::new(opcode);
        data.results.push(result);
        data.operands.push(operand);
        data
    }

    /// `result = opcode a, b`.
    pub fn inst_binary(opcode: Opcode, result: Operand, a: Operand, b: Operand) -> InstData {
        let mut data = InstData::new(opcode);
        data.results.push(result);
        data.operands.push(a);
        data.operands.push(b);
        data
    }

    /// A jump to `target`.
    pub fn inst_jmp(target: Block) -> InstData {
        let mut data = InstData::new(Opcode::Jmp);
        data.blocks.push(target);
        data
    }
}
