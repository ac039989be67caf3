//! A dominator tree and dominance frontiers.
//!
//! Immediate dominators are computed with the Cooper-Harvey-Kennedy
//! iterative algorithm over a reverse-postorder numbering. Dominance
//! frontiers feed phi placement during SSA construction.

use crate::flowgraph::ControlFlowGraph;
use crate::ir::{Block, Function};
use cranelift_entity::packed_option::PackedOption;
use cranelift_entity::SecondaryMap;
use rustc_hash::FxHashSet;
use smallvec::SmallVec;

#[derive(Clone, Default)]
struct DomNode {
    /// Reverse-postorder number, 1-based; 0 means unreachable.
    rpo_number: u32,
    idom: PackedOption<Block>,
}

/// Dominator tree for one method.
pub struct DominatorTree {
    nodes: SecondaryMap<Block, DomNode>,
    /// Blocks in postorder.
    postorder: Vec<Block>,
    valid: bool,
}

impl DominatorTree {
    /// Allocate and compute a dominator tree for `func`.
    pub fn with_function(func: &Function, cfg: &ControlFlowGraph) -> Self {
        let mut domtree = Self {
            nodes: SecondaryMap::new(),
            postorder: Vec::new(),
            valid: false,
        };
        domtree.compute(func, cfg);
        domtree
    }

    /// Is `block` reachable from the entry block?
    pub fn is_reachable(&self, block: Block) -> bool {
        self.nodes[block].rpo_number != 0
    }

    /// Blocks in postorder. Iterating this in reverse gives reverse
    /// postorder.
    pub fn cfg_postorder(&self) -> &[Block] {
        debug_assert!(self.valid);
        &self.postorder
    }

    /// The immediate dominator of `block`, or `None` for the entry block
    /// and unreachable blocks.
    pub fn idom(&self, block: Block) -> Option<Block> {
        self.nodes[block].idom.expand()
    }

    /// Does `a` dominate `b`? Every block dominates itself.
    pub fn dominates(&self, a: Block, b: Block) -> bool {
        let mut cur = b;
        loop {
            if cur == a {
                return true;
            }
            match self.idom(cur) {
                Some(idom) => cur = idom,
                None => return false,
            }
        }
    }

    /// Compute the tree, discarding previous state.
    pub fn compute(&mut self, func: &Function, cfg: &ControlFlowGraph) {
        debug_assert!(cfg.is_valid());
        self.nodes.clear();
        self.postorder.clear();
        self.valid = false;

        let entry = match func.layout.entry_block() {
            Some(entry) => entry,
            None => {
                self.valid = true;
                return;
            }
        };

        // Depth-first postorder walk.
        let mut visited = FxHashSet::default();
        let mut stack: Vec<(Block, usize)> = vec![(entry, 0)];
        visited.insert(entry);
        while let Some(&(block, next)) = stack.last() {
            let succs = cfg.succs(block);
            if next < succs.len() {
                stack.last_mut().unwrap().1 += 1;
                let succ = succs[next];
                if visited.insert(succ) {
                    stack.push((succ, 0));
                }
            } else {
                self.postorder.push(block);
                stack.pop();
            }
        }

        for (i, &block) in self.postorder.iter().rev().enumerate() {
            self.nodes[block].rpo_number = i as u32 + 1;
        }

        // Iterate to a fixed point.
        self.nodes[entry].idom = entry.into();
        let mut changed = true;
        while changed {
            changed = false;
            for &block in self.postorder.iter().rev() {
                if block == entry {
                    continue;
                }
                let mut new_idom: Option<Block> = None;
                for &pred in cfg.preds(block) {
                    if self.nodes[pred].idom.is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(cur) => self.intersect(pred, cur),
                    });
                }
                if let Some(new_idom) = new_idom {
                    if self.nodes[block].idom.expand() != Some(new_idom) {
                        self.nodes[block].idom = new_idom.into();
                        changed = true;
                    }
                }
            }
        }

        // The entry has no immediate dominator.
        self.nodes[entry].idom = None.into();
        self.valid = true;
    }

    fn intersect(&self, mut a: Block, mut b: Block) -> Block {
        while a != b {
            while self.nodes[a].rpo_number > self.nodes[b].rpo_number {
                a = self.nodes[a].idom.expand().expect("unreachable pred");
            }
            while self.nodes[b].rpo_number > self.nodes[a].rpo_number {
                b = self.nodes[b].idom.expand().expect("unreachable pred");
            }
        }
        a
    }

    /// Compute the dominance frontier of every block.
    pub fn dominance_frontiers(
        &self,
        cfg: &ControlFlowGraph,
    ) -> SecondaryMap<Block, SmallVec<[Block; 4]>> {
        debug_assert!(self.valid);
        let mut frontiers: SecondaryMap<Block, SmallVec<[Block; 4]>> = SecondaryMap::new();
        for &block in &self.postorder {
            let preds = cfg.preds(block);
            if preds.len() < 2 {
                continue;
            }
            let idom = match self.idom(block) {
                Some(idom) => idom,
                None => continue,
            };
            for &pred in preds {
                if !self.is_reachable(pred) {
                    continue;
                }
                let mut runner = pred;
                while runner != idom {
                    if !frontiers[runner].contains(&block) {
                        frontiers[runner].push(block);
                    }
                    runner = match self.idom(runner) {
                        Some(next) => next,
                        None => break,
                    };
                }
            }
        }
        frontiers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{CondCode, InstData, IntCC, Opcode, SymbolName, Ty};

    /// Diamond: b0 -> {b1, b2} -> b3.
    fn diamond() -> (Function, Block, Block, Block, Block) {
        let mut func = Function::new(SymbolName::from("t"));
        let b0 = func.dfg.make_block();
        let b1 = func.dfg.make_block();
        let b2 = func.dfg.make_block();
        let b3 = func.dfg.make_block();
        for b in [b0, b1, b2, b3] {
            func.layout.append_block(b);
        }
        let x = func.dfg.make_virtual_reg(Ty::I32);
        let zero = func.dfg.iconst32(0);
        let mut br = InstData::new(Opcode::CompareIntBranch32);
        br.operands.push(x);
        br.operands.push(zero);
        br.cc = Some(CondCode::Int(IntCC::Equal));
        br.blocks.push(b2);
        func.append_inst(b0, br);
        func.append_inst(b0, Function::inst_jmp(b1));
        func.append_inst(b1, Function::inst_jmp(b3));
        func.append_inst(b2, Function::inst_jmp(b3));
        func.append_inst(b3, InstData::new(Opcode::ReturnVoid));
        (func, b0, b1, b2, b3)
    }

    #[test]
    fn diamond_idoms() {
        let (func, b0, b1, b2, b3) = diamond();
        let cfg = ControlFlowGraph::with_function(&func);
        let domtree = DominatorTree::with_function(&func, &cfg);

        assert_eq!(domtree.idom(b0), None);
        assert_eq!(domtree.idom(b1), Some(b0));
        assert_eq!(domtree.idom(b2), Some(b0));
        assert_eq!(domtree.idom(b3), Some(b0));
        assert!(domtree.dominates(b0, b3));
        assert!(!domtree.dominates(b1, b3));
        assert!(domtree.dominates(b3, b3));
    }

    #[test]
    fn diamond_frontiers() {
        let (func, _b0, b1, b2, b3) = diamond();
        let cfg = ControlFlowGraph::with_function(&func);
        let domtree = DominatorTree::with_function(&func, &cfg);
        let frontiers = domtree.dominance_frontiers(&cfg);

        assert_eq!(frontiers[b1].as_slice(), [b3]);
        assert_eq!(frontiers[b2].as_slice(), [b3]);
        assert!(frontiers[b3].is_empty());
    }
}
