//! A control flow graph represented as mappings of basic blocks to their
//! predecessors and successors.
//!
//! Edges are derived from the terminator group of each block: every branch
//! kind node contributes its targets. The graph is recomputed from scratch
//! after stages that restructure blocks; stages that only edit within a
//! block may recompute a single block.

use crate::ir::{Block, Function};
use cranelift_entity::SecondaryMap;
use smallvec::SmallVec;

#[derive(Clone, Default)]
struct CfgNode {
    predecessors: SmallVec<[Block; 4]>,
    successors: SmallVec<[Block; 4]>,
}

/// Predecessor and successor arrays for every block.
pub struct ControlFlowGraph {
    data: SecondaryMap<Block, CfgNode>,
    valid: bool,
}

impl ControlFlowGraph {
    /// Allocate a new blank control flow graph.
    pub fn new() -> Self {
        Self {
            data: SecondaryMap::new(),
            valid: false,
        }
    }

    /// Allocate and compute the control flow graph for `func`.
    pub fn with_function(func: &Function) -> Self {
        let mut cfg = Self::new();
        cfg.compute(func);
        cfg
    }

    /// Clear all data.
    pub fn clear(&mut self) {
        self.data.clear();
        self.valid = false;
    }

    /// Compute the control flow graph of `func`, discarding any previous
    /// state.
    pub fn compute(&mut self, func: &Function) {
        self.clear();
        for block in func.layout.blocks() {
            for succ in func.block_successors(block) {
                self.add_edge(block, succ);
            }
        }
        self.valid = true;
    }

    fn add_edge(&mut self, from: Block, to: Block) {
        if !self.data[from].successors.contains(&to) {
            self.data[from].successors.push(to);
        }
        if !self.data[to].predecessors.contains(&from) {
            self.data[to].predecessors.push(from);
        }
    }

    /// Predecessors of `block`.
    pub fn preds(&self, block: Block) -> &[Block] {
        &self.data[block].predecessors
    }

    /// Successors of `block`.
    pub fn succs(&self, block: Block) -> &[Block] {
        &self.data[block].successors
    }

    /// Check if `compute` has run since the last `clear`.
    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{CondCode, InstData, IntCC, Opcode, SymbolName, Ty};

    #[test]
    fn empty_function() {
        let func = Function::new(SymbolName::from("t"));
        let cfg = ControlFlowGraph::with_function(&func);
        assert!(cfg.is_valid());
    }

    #[test]
    fn branches_and_jumps() {
        let mut func = Function::new(SymbolName::from("t"));
        let b0 = func.dfg.make_block();
        let b1 = func.dfg.make_block();
        let b2 = func.dfg.make_block();
        for b in [b0, b1, b2] {
            func.layout.append_block(b);
        }
        let x = func.dfg.make_virtual_reg(Ty::I32);
        let zero = func.dfg.iconst32(0);

        // b0: if x == 0 goto b2; goto b1
        let mut br = InstData::new(Opcode::CompareIntBranch32);
        br.operands.push(x);
        br.operands.push(zero);
        br.cc = Some(CondCode::Int(IntCC::Equal));
        br.blocks.push(b2);
        func.append_inst(b0, br);
        func.append_inst(b0, Function::inst_jmp(b1));
        // b1: goto b2
        func.append_inst(b1, Function::inst_jmp(b2));
        // b2: ret
        func.append_inst(b2, InstData::new(Opcode::ReturnVoid));

        let cfg = ControlFlowGraph::with_function(&func);
        assert_eq!(cfg.succs(b0), [b2, b1]);
        assert_eq!(cfg.succs(b1), [b2]);
        assert_eq!(cfg.preds(b2), [b0, b1]);
        assert_eq!(cfg.preds(b0), []);
        assert!(cfg.succs(b2).is_empty());
    }
}
