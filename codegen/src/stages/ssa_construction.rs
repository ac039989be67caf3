//! SSA construction.
//!
//! Phi nodes are inserted at the iterated dominance frontiers of each
//! virtual register's definition blocks, then a renaming walk over the
//! dominator tree bumps SSA versions. Version 0 stands for the value a
//! register has before any definition on the path; it has no defining
//! node and Leave-SSA maps it back to the parent register.
//!
//! Address-taken registers (operands of `AddressOf`) keep their memory
//! semantics and are not renamed.

use crate::compiler::{MethodCompiler, Stage};
use crate::dominator_tree::DominatorTree;
use crate::flowgraph::ControlFlowGraph;
use crate::ir::{Block, Function, Inst, InstData, Opcode, Operand};
use crate::result::{CodegenError, CodegenResult};
use rustc_hash::{FxHashMap, FxHashSet};

/// The SSA-construction stage.
pub struct SsaConstructionStage;

impl Stage for SsaConstructionStage {
    fn name(&self) -> &'static str {
        "ssa-construction"
    }

    fn run(&mut self, compiler: &mut MethodCompiler) -> CodegenResult<()> {
        let cfg = ControlFlowGraph::with_function(&compiler.func);
        let domtree = DominatorTree::with_function(&compiler.func, &cfg);
        let mut builder = SsaBuilder::new(&mut compiler.func, &cfg, &domtree);
        builder.collect_variables();
        let phi_count = builder.insert_phis();
        builder.rename()?;
        compiler.func.is_in_ssa_form = true;
        compiler.counters.update("ssa.phis_inserted", phi_count);
        Ok(())
    }
}

struct SsaBuilder<'a> {
    func: &'a mut Function,
    cfg: &'a ControlFlowGraph,
    domtree: &'a DominatorTree,
    /// Renameable virtual registers.
    vars: FxHashSet<Operand>,
    /// Blocks containing a definition, per variable.
    def_blocks: FxHashMap<Operand, FxHashSet<Block>>,
    /// The variable a phi node merges.
    phi_var: FxHashMap<Inst, Operand>,
    /// Rename stacks.
    stacks: FxHashMap<Operand, Vec<Operand>>,
    /// Next version per variable; versions start at 1, 0 is the
    /// undefined-on-entry name.
    next_version: FxHashMap<Operand, u32>,
    /// The lazily created version-0 operand per variable.
    version0: FxHashMap<Operand, Operand>,
}

impl<'a> SsaBuilder<'a> {
    fn new(func: &'a mut Function, cfg: &'a ControlFlowGraph, domtree: &'a DominatorTree) -> Self {
        Self {
            func,
            cfg,
            domtree,
            vars: FxHashSet::default(),
            def_blocks: FxHashMap::default(),
            phi_var: FxHashMap::default(),
            stacks: FxHashMap::default(),
            next_version: FxHashMap::default(),
            version0: FxHashMap::default(),
        }
    }

    fn collect_variables(&mut self) {
        let mut address_taken = FxHashSet::default();
        for block in self.func.layout.blocks() {
            for inst in self.func.layout.block_insts(block) {
                let data = &self.func.dfg.insts[inst];
                if data.is_empty_node() {
                    continue;
                }
                if data.opcode == Opcode::AddressOf {
                    address_taken.insert(data.operands[0]);
                }
                for &result in &data.results {
                    if self.func.dfg.operands[result].is_virtual_reg() {
                        self.def_blocks.entry(result).or_default().insert(block);
                    }
                }
            }
        }
        self.vars = self
            .def_blocks
            .keys()
            .copied()
            .filter(|v| !address_taken.contains(v))
            .collect();
    }

    /// Semi-pruned placement: registers defined in a single block need no
    /// phis, their definition dominates every use the decoder created.
    fn insert_phis(&mut self) -> u64 {
        let frontiers = self.domtree.dominance_frontiers(self.cfg);
        let mut inserted = 0;
        let vars: Vec<Operand> = self.vars.iter().copied().collect();
        for var in vars {
            let defs = &self.def_blocks[&var];
            if defs.len() < 2 {
                continue;
            }
            let mut work: Vec<Block> = defs.iter().copied().collect();
            let mut placed: FxHashSet<Block> = FxHashSet::default();
            while let Some(block) = work.pop() {
                for &join in &frontiers[block] {
                    if !placed.insert(join) || !self.domtree.is_reachable(join) {
                        continue;
                    }
                    let preds = self.cfg.preds(join);
                    let mut data = InstData::new(Opcode::Phi);
                    data.results.push(var);
                    data.ty = Some(self.func.dfg.ty(var));
                    for &pred in preds {
                        data.operands.push(var);
                        data.blocks.push(pred);
                    }
                    let phi = self.func.dfg.make_inst(data);
                    self.func.layout.prepend_inst(phi, join);
                    self.phi_var.insert(phi, var);
                    inserted += 1;
                    // The phi is itself a definition.
                    if self.def_blocks.entry(var).or_default().insert(join) {
                        work.push(join);
                    }
                }
            }
        }
        inserted
    }

    fn rename(&mut self) -> CodegenResult<()> {
        let entry = match self.func.layout.entry_block() {
            Some(entry) => entry,
            None => return Ok(()),
        };

        // Dominator-tree children.
        let mut children: FxHashMap<Block, Vec<Block>> = FxHashMap::default();
        for block in self.func.layout.blocks() {
            if let Some(idom) = self.domtree.idom(block) {
                children.entry(idom).or_default().push(block);
            }
        }

        self.rename_block(entry, &children)
    }

    fn rename_block(
        &mut self,
        block: Block,
        children: &FxHashMap<Block, Vec<Block>>,
    ) -> CodegenResult<()> {
        let mut pushed: Vec<Operand> = Vec::new();

        let insts: Vec<Inst> = self.func.layout.block_insts(block).collect();
        for inst in insts {
            if self.func.dfg.insts[inst].is_empty_node() {
                continue;
            }
            let is_phi = self.func.dfg.insts[inst].opcode.is_phi();
            if !is_phi {
                // Uses first.
                let operands: Vec<(usize, Operand)> = self.func.dfg.insts[inst]
                    .operands
                    .iter()
                    .copied()
                    .enumerate()
                    .collect();
                for (slot, operand) in operands {
                    if self.vars.contains(&operand) {
                        let name = self.current_name(operand);
                        self.func.dfg.insts[inst].operands[slot] = name;
                    }
                }
            }
            // Definitions, including phi results.
            let results: Vec<(usize, Operand)> = self.func.dfg.insts[inst]
                .results
                .iter()
                .copied()
                .enumerate()
                .collect();
            for (slot, result) in results {
                if self.vars.contains(&result) {
                    let version = {
                        let next = self.next_version.entry(result).or_insert(1);
                        let v = *next;
                        *next += 1;
                        v
                    };
                    let name = self.func.dfg.make_ssa_version(result, version);
                    self.func.dfg.insts[inst].results[slot] = name;
                    self.stacks.entry(result).or_default().push(name);
                    pushed.push(result);
                }
            }
        }

        // Feed phi operands of the successors along this edge.
        let succs: Vec<Block> = self.cfg.succs(block).to_vec();
        for succ in succs {
            let phis: Vec<Inst> = self
                .func
                .layout
                .block_insts(succ)
                .filter(|&i| self.func.dfg.insts[i].opcode.is_phi())
                .collect();
            for phi in phis {
                let var = match self.phi_var.get(&phi) {
                    Some(&var) => var,
                    None => {
                        return Err(CodegenError::Verifier(
                            "phi node without a merge variable".to_string(),
                        ))
                    }
                };
                let slot = self.func.dfg.insts[phi]
                    .blocks
                    .iter()
                    .position(|&b| b == block)
                    .ok_or_else(|| {
                        CodegenError::Verifier(format!(
                            "phi in {succ} has no slot for predecessor {block}"
                        ))
                    })?;
                let name = self.current_name(var);
                self.func.dfg.insts[phi].operands[slot] = name;
            }
        }

        if let Some(kids) = children.get(&block) {
            for &child in kids {
                self.rename_block(child, children)?;
            }
        }

        for var in pushed {
            if let Some(stack) = self.stacks.get_mut(&var) {
                stack.pop();
            }
        }
        Ok(())
    }

    /// The SSA name currently naming `var`, or its version-0 operand when
    /// no definition reaches this point.
    fn current_name(&mut self, var: Operand) -> Operand {
        if let Some(name) = self.stacks.get(&var).and_then(|s| s.last()) {
            return *name;
        }
        if let Some(&v0) = self.version0.get(&var) {
            return v0;
        }
        let v0 = self.func.dfg.make_ssa_version(var, 0);
        self.version0.insert(var, v0);
        v0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{CondCode, IntCC, SymbolName, Ty};

    /// x = 1; if (c) x = 2; use x  — the classic single-phi diamond.
    fn build_diamond() -> (Function, Block, Block, Block, Block, Operand) {
        let mut func = Function::new(SymbolName::from("t"));
        let b0 = func.dfg.make_block();
        let b1 = func.dfg.make_block();
        let b2 = func.dfg.make_block();
        let b3 = func.dfg.make_block();
        for b in [b0, b1, b2, b3] {
            func.layout.append_block(b);
        }
        let x = func.dfg.make_virtual_reg(Ty::I32);
        let c = func.dfg.make_virtual_reg(Ty::I32);
        let one = func.dfg.iconst32(1);
        let two = func.dfg.iconst32(2);
        let zero = func.dfg.iconst32(0);

        func.append_inst(b0, Function::inst_unary(Opcode::Move32, x, one));
        let mut br = InstData::new(Opcode::CompareIntBranch32);
        br.operands.push(c);
        br.operands.push(zero);
        br.cc = Some(CondCode::Int(IntCC::NotEqual));
        br.blocks.push(b1);
        func.append_inst(b0, br);
        func.append_inst(b0, Function::inst_jmp(b2));

        func.append_inst(b1, Function::inst_unary(Opcode::Move32, x, two));
        func.append_inst(b1, Function::inst_jmp(b3));

        func.append_inst(b2, Function::inst_jmp(b3));

        let mut ret = InstData::new(Opcode::Return);
        ret.operands.push(x);
        func.append_inst(b3, ret);
        (func, b0, b1, b2, b3, x)
    }

    fn run_ssa(func: &mut Function) {
        let cfg = ControlFlowGraph::with_function(func);
        let domtree = DominatorTree::with_function(func, &cfg);
        let mut builder = SsaBuilder::new(func, &cfg, &domtree);
        builder.collect_variables();
        builder.insert_phis();
        builder.rename().unwrap();
        func.is_in_ssa_form = true;
    }

    #[test]
    fn phi_inserted_at_join() {
        let (mut func, _b0, _b1, _b2, b3, _x) = build_diamond();
        run_ssa(&mut func);

        assert!(func.is_in_ssa_form);
        assert_eq!(func.phi_count(b3), 1);
        let phi = func.layout.first_inst(b3).unwrap();
        let data = &func.dfg.insts[phi];
        assert_eq!(data.opcode, Opcode::Phi);
        // One operand per predecessor, parallel to the source blocks.
        assert_eq!(data.operands.len(), 2);
        assert_eq!(data.operands.len(), data.blocks.len());
        // Both incoming names are SSA versions of x with distinct versions.
        let v0 = func.dfg.operands[data.operands[0]].ssa().unwrap();
        let v1 = func.dfg.operands[data.operands[1]].ssa().unwrap();
        assert_eq!(v0.parent, v1.parent);
        assert_ne!(v0.version, v1.version);
    }

    #[test]
    fn every_versioned_register_has_one_definition() {
        let (mut func, ..) = build_diamond();
        run_ssa(&mut func);

        let mut defs: FxHashMap<Operand, usize> = FxHashMap::default();
        for block in func.layout.blocks() {
            for inst in func.layout.block_insts(block) {
                let data = &func.dfg.insts[inst];
                if data.is_empty_node() {
                    continue;
                }
                for &r in &data.results {
                    if func.dfg.operands[r].is_ssa() {
                        *defs.entry(r).or_insert(0) += 1;
                    }
                }
            }
        }
        for (operand, count) in defs {
            let ssa = func.dfg.operands[operand].ssa().unwrap();
            assert!(ssa.version > 0);
            assert_eq!(count, 1, "{operand} defined {count} times");
        }
    }

    #[test]
    fn uses_renamed_to_reaching_definitions() {
        let (mut func, _b0, _b1, _b2, b3, x) = build_diamond();
        run_ssa(&mut func);

        // The return now uses the phi result, not the original register.
        let ret = func.layout.last_inst(b3).unwrap();
        let used = func.dfg.insts[ret].operands[0];
        assert_ne!(used, x);
        assert!(func.dfg.operands[used].is_ssa());
        assert_eq!(func.dfg.operands[used].ssa().unwrap().parent, x);
    }
}
