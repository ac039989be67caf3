//! Dead-code elimination.
//!
//! A node is dead when it has no side effects and none of its results are
//! used. The sweep walks blocks in postorder and nodes backward, repeating
//! until the live set stops growing so phi cycles in loops drain fully.

use crate::compiler::{MethodCompiler, Stage};
use crate::dominator_tree::DominatorTree;
use crate::flowgraph::ControlFlowGraph;
use crate::ir::Opcode;
use crate::result::CodegenResult;
use rustc_hash::FxHashSet;

/// The dead-code elimination stage.
pub struct DceStage;

impl Stage for DceStage {
    fn name(&self) -> &'static str {
        "dce"
    }

    fn run(&mut self, compiler: &mut MethodCompiler) -> CodegenResult<()> {
        let func = &mut compiler.func;
        let cfg = ControlFlowGraph::with_function(func);
        let domtree = DominatorTree::with_function(func, &cfg);

        // Seed liveness from every effectful node, then propagate through
        // operands until stable.
        let mut live = FxHashSet::default();
        let mut changed = true;
        while changed {
            changed = false;
            for &block in domtree.cfg_postorder() {
                for inst in func.layout.block_insts(block).rev() {
                    let data = &func.dfg.insts[inst];
                    if data.is_empty_node() {
                        continue;
                    }
                    let required = !data.opcode.is_pure() && data.opcode != Opcode::Phi;
                    let any_result_live = data.results.iter().any(|r| live.contains(r));
                    if required || any_result_live {
                        for &operand in &data.operands {
                            if live.insert(operand) {
                                changed = true;
                            }
                        }
                    }
                }
            }
        }

        let mut removed = 0u64;
        let blocks: Vec<_> = func.layout.blocks().collect();
        for block in blocks {
            let insts: Vec<_> = func.layout.block_insts(block).collect();
            for inst in insts {
                let data = &func.dfg.insts[inst];
                if data.is_empty_node() {
                    continue;
                }
                let removable = data.opcode.is_pure() || data.opcode == Opcode::Phi;
                if removable && !data.results.iter().any(|r| live.contains(r)) {
                    func.dfg.empty_inst(inst);
                    removed += 1;
                }
            }
        }
        compiler.counters.update("dce.removed", removed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Function, InstData, SymbolName, Ty};

    #[test]
    fn unused_pure_nodes_are_removed() {
        let mut func = Function::new(SymbolName::from("t"));
        let block = func.dfg.make_block();
        func.layout.append_block(block);
        let a = func.dfg.make_virtual_reg(Ty::I32);
        let b = func.dfg.make_virtual_reg(Ty::I32);
        let c1 = func.dfg.iconst32(1);
        let c2 = func.dfg.iconst32(2);
        // a = 1 + 2 (used by return), b = 1 + 1 (dead).
        let used = func.append_inst(block, Function::inst_binary(Opcode::Add32, a, c1, c2));
        let dead = func.append_inst(block, Function::inst_binary(Opcode::Add32, b, c1, c1));
        let mut ret = InstData::new(Opcode::Return);
        ret.operands.push(a);
        func.append_inst(block, ret);

        let ctx = crate::testutil::TestContext::x86();
        let mut compiler = ctx.compiler(func);
        DceStage.run(&mut compiler).unwrap();

        assert!(!compiler.func.dfg.insts[used].is_empty_node());
        assert!(compiler.func.dfg.insts[dead].is_empty_node());
    }
}
