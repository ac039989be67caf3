//! Sparse conditional constant propagation.
//!
//! The classic optimistic three-level lattice over the SSA def-use web,
//! tracking edge executability so constants discovered on one side of a
//! dead branch do not leak from the other. Nodes proven constant become
//! moves; branches with a known direction become jumps and the dead tail
//! of their terminator group is emptied.

use crate::compiler::{MethodCompiler, Stage};
use crate::ir::{
    Block, CondCode, ConstValue, FlowControl, Function, Inst, InstData, Opcode, Operand,
    OperandData, Ty,
};
use crate::result::CodegenResult;
use crate::stages::constant_fold::{eval, eval_int_cc};
use rustc_hash::{FxHashMap, FxHashSet};

/// The SCCP stage.
pub struct SccpStage;

impl Stage for SccpStage {
    fn name(&self) -> &'static str {
        "sccp"
    }

    fn run(&mut self, compiler: &mut MethodCompiler) -> CodegenResult<()> {
        if compiler.func.has_protected_regions {
            return Ok(());
        }
        let mut solver = Solver::new(&compiler.func);
        solver.solve(&compiler.func);
        let (constants, branches) = solver.rewrite(&mut compiler.func);
        compiler.counters.update("sccp.constants", constants);
        compiler.counters.update("sccp.branches_resolved", branches);
        Ok(())
    }
}

#[derive(Clone, Copy, PartialEq, Debug)]
enum Lattice {
    /// No evidence yet; optimistically unknown.
    Top,
    /// Proven to always hold this value.
    Const(ConstValue),
    /// Varies at run time.
    Bottom,
}

fn meet(a: Lattice, b: Lattice) -> Lattice {
    match (a, b) {
        (Lattice::Top, x) | (x, Lattice::Top) => x,
        (Lattice::Const(x), Lattice::Const(y)) if x == y => Lattice::Const(x),
        _ => Lattice::Bottom,
    }
}

struct Solver {
    values: FxHashMap<Operand, Lattice>,
    uses: FxHashMap<Operand, Vec<Inst>>,
    exec_blocks: FxHashSet<Block>,
    exec_edges: FxHashSet<(Block, Block)>,
    block_list: Vec<Block>,
    inst_list: Vec<Inst>,
}

impl Solver {
    fn new(func: &Function) -> Self {
        let mut uses: FxHashMap<Operand, Vec<Inst>> = FxHashMap::default();
        for block in func.layout.blocks() {
            for inst in func.layout.block_insts(block) {
                let data = &func.dfg.insts[inst];
                if data.is_empty_node() {
                    continue;
                }
                for &operand in &data.operands {
                    uses.entry(operand).or_default().push(inst);
                }
            }
        }
        Self {
            values: FxHashMap::default(),
            uses,
            exec_blocks: FxHashSet::default(),
            exec_edges: FxHashSet::default(),
            block_list: Vec::new(),
            inst_list: Vec::new(),
        }
    }

    fn lattice_of(&self, func: &Function, operand: Operand) -> Lattice {
        match &func.dfg.operands[operand] {
            OperandData::Constant { value, .. } => Lattice::Const(*value),
            OperandData::VirtualReg { ssa: Some(ssa), .. } if ssa.version > 0 => self
                .values
                .get(&operand)
                .copied()
                .unwrap_or(Lattice::Top),
            // Version 0, unrenamed registers and physical residences can
            // hold anything.
            _ => Lattice::Bottom,
        }
    }

    fn set(&mut self, operand: Operand, value: Lattice) {
        let old = self
            .values
            .get(&operand)
            .copied()
            .unwrap_or(Lattice::Top);
        let new = meet(old, value);
        if new != old {
            self.values.insert(operand, new);
            if let Some(users) = self.uses.get(&operand) {
                self.inst_list.extend(users.iter().copied());
            }
        }
    }

    fn mark_edge(&mut self, func: &Function, from: Block, to: Block) {
        if !self.exec_edges.insert((from, to)) {
            return;
        }
        if self.exec_blocks.insert(to) {
            self.block_list.push(to);
        } else {
            // Re-evaluate the phis of an already-live block: a new edge
            // may feed them new values.
            for inst in func.layout.block_insts(to) {
                let data = &func.dfg.insts[inst];
                if data.is_empty_node() {
                    continue;
                }
                if data.opcode.is_phi() {
                    self.inst_list.push(inst);
                } else {
                    break;
                }
            }
        }
    }

    fn solve(&mut self, func: &Function) {
        let entry = match func.layout.entry_block() {
            Some(entry) => entry,
            None => return,
        };
        self.exec_blocks.insert(entry);
        self.block_list.push(entry);

        while !self.block_list.is_empty() || !self.inst_list.is_empty() {
            while let Some(inst) = self.inst_list.pop() {
                if let Some(block) = func.layout.inst_block(inst) {
                    if !self.exec_blocks.contains(&block) {
                        continue;
                    }
                    self.eval_inst(func, block, inst);
                    if func.dfg.insts[inst].opcode.is_terminator() {
                        self.eval_terminators(func, block);
                    }
                }
            }
            if let Some(block) = self.block_list.pop() {
                for inst in func.layout.block_insts(block) {
                    if !func.dfg.insts[inst].is_empty_node() {
                        self.eval_inst(func, block, inst);
                    }
                }
                self.eval_terminators(func, block);
            }
        }
    }

    fn eval_inst(&mut self, func: &Function, block: Block, inst: Inst) {
        let data = &func.dfg.insts[inst];
        if data.opcode.is_phi() {
            let mut acc = Lattice::Top;
            for (&operand, &pred) in data.operands.iter().zip(data.blocks.iter()) {
                if self.exec_edges.contains(&(pred, block)) {
                    acc = meet(acc, self.lattice_of(func, operand));
                }
            }
            let result = data.results[0];
            self.set(result, acc);
            return;
        }
        if data.results.is_empty() {
            return;
        }
        if !data.opcode.is_pure() || data.results.len() != 1 {
            for &result in &data.results {
                self.set(result, Lattice::Bottom);
            }
            return;
        }

        let mut consts = Vec::with_capacity(data.operands.len());
        let mut any_top = false;
        let mut any_bottom = false;
        for &operand in &data.operands {
            match self.lattice_of(func, operand) {
                Lattice::Const(value) => consts.push(value),
                Lattice::Top => any_top = true,
                Lattice::Bottom => any_bottom = true,
            }
        }
        let result = data.results[0];
        let value = if any_bottom {
            Lattice::Bottom
        } else if any_top {
            // Some input is still unknown; stay optimistic.
            Lattice::Top
        } else {
            match eval(data.opcode, data.cc, &consts) {
                Some(value) => Lattice::Const(value),
                None => Lattice::Bottom,
            }
        };
        self.set(result, value);
    }

    /// Decide which outgoing edges of `block` are feasible.
    fn eval_terminators(&mut self, func: &Function, block: Block) {
        for inst in func.layout.block_insts(block) {
            let data = &func.dfg.insts[inst];
            if data.is_empty_node() {
                continue;
            }
            match data.opcode.flow_control() {
                FlowControl::Normal => continue,
                FlowControl::Branch => {
                    let target = data.blocks[0];
                    self.mark_edge(func, block, target);
                    return;
                }
                FlowControl::Return => return,
                FlowControl::ConditionalBranch => {
                    match self.branch_direction(func, data) {
                        Some(true) => {
                            self.mark_edge(func, block, data.blocks[0]);
                            return;
                        }
                        Some(false) => continue,
                        None => {
                            // Unknown either way; once any input turns
                            // Bottom this is re-run and both paths flow.
                            let cond_varies = data.operands.iter().any(|&o| {
                                matches!(self.lattice_of(func, o), Lattice::Bottom)
                            });
                            if cond_varies {
                                self.mark_edge(func, block, data.blocks[0]);
                                continue;
                            }
                            return;
                        }
                    }
                }
                FlowControl::Switch => {
                    match self.lattice_of(func, data.operands[0]) {
                        Lattice::Const(ConstValue::Int(index)) => {
                            let cases = data.blocks.len() - 1;
                            let target = if index >= 0 && (index as usize) < cases {
                                data.blocks[index as usize]
                            } else {
                                *data.blocks.last().unwrap()
                            };
                            self.mark_edge(func, block, target);
                        }
                        Lattice::Top => {}
                        _ => {
                            let targets: Vec<Block> = data.blocks.to_vec();
                            for target in targets {
                                self.mark_edge(func, block, target);
                            }
                        }
                    }
                    return;
                }
            }
        }
    }

    /// `Some(taken)` when the branch direction is proven.
    fn branch_direction(&self, func: &Function, data: &InstData) -> Option<bool> {
        let a = self.lattice_of(func, data.operands[0]);
        let b = self.lattice_of(func, data.operands[1]);
        let (a, b) = match (a, b) {
            (Lattice::Const(a), Lattice::Const(b)) => (a.as_int()?, b.as_int()?),
            _ => return None,
        };
        let cc = match data.cc? {
            CondCode::Int(cc) => cc,
            CondCode::Float(_) => return None,
        };
        let bits = if data.opcode == Opcode::CompareIntBranch64 {
            64
        } else {
            32
        };
        Some(eval_int_cc(cc, a, b, bits))
    }

    /// Apply the solution.
    fn rewrite(&self, func: &mut Function) -> (u64, u64) {
        let mut constants = 0u64;
        let mut branches = 0u64;
        let blocks: Vec<Block> = func.layout.blocks().collect();
        for block in blocks {
            let insts: Vec<Inst> = func.layout.block_insts(block).collect();
            if !self.exec_blocks.contains(&block) {
                // Unreachable: drop the contents, the block degenerates.
                for inst in insts {
                    if !func.dfg.insts[inst].is_empty_node() {
                        func.dfg.empty_inst(inst);
                    }
                }
                continue;
            }

            let mut dead_tail = false;
            for inst in insts {
                let data = &func.dfg.insts[inst];
                if data.is_empty_node() {
                    continue;
                }
                if dead_tail {
                    func.dfg.empty_inst(inst);
                    continue;
                }
                if data.opcode.flow_control() == FlowControl::ConditionalBranch {
                    match self.branch_direction(func, data) {
                        Some(true) => {
                            let target = data.blocks[0];
                            func.dfg.insts[inst] = Function::inst_jmp(target);
                            dead_tail = true;
                            branches += 1;
                        }
                        Some(false) => {
                            func.dfg.empty_inst(inst);
                            branches += 1;
                        }
                        None => {}
                    }
                    continue;
                }
                if (data.opcode.is_pure() || data.opcode.is_phi()) && data.results.len() == 1 {
                    let result = data.results[0];
                    if let Some(Lattice::Const(value)) = self.values.get(&result).copied() {
                        let ty = func.dfg.ty(result);
                        let constant = match value {
                            ConstValue::Int(v) => func.dfg.iconst(ty, v),
                            ConstValue::F32(v) => func.dfg.f32const(v),
                            ConstValue::F64(v) => func.dfg.f64const(v),
                            ConstValue::Null => func.dfg.null_const(),
                        };
                        let move_op = match ty {
                            Ty::I64 => Opcode::Move64,
                            Ty::R4 => Opcode::MoveR4,
                            Ty::R8 => Opcode::MoveR8,
                            Ty::Ptr | Ty::Object => Opcode::MoveObject,
                            _ => Opcode::Move32,
                        };
                        func.dfg.insts[inst] = Function::inst_unary(move_op, result, constant);
                        constants += 1;
                    }
                }
            }
        }
        (constants, branches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{IntCC, SymbolName};
    use crate::stages::ssa_construction::SsaConstructionStage;
    use crate::testutil::TestContext;

    /// if (1 == 1) x = 5 else x = 6; return x
    fn build_decidable_branch() -> Function {
        let mut func = Function::new(SymbolName::from("t"));
        let b0 = func.dfg.make_block();
        let b1 = func.dfg.make_block();
        let b2 = func.dfg.make_block();
        let b3 = func.dfg.make_block();
        for b in [b0, b1, b2, b3] {
            func.layout.append_block(b);
        }
        let x = func.dfg.make_virtual_reg(Ty::I32);
        let one_a = func.dfg.iconst32(1);
        let one_b = func.dfg.iconst32(1);
        let five = func.dfg.iconst32(5);
        let six = func.dfg.iconst32(6);

        let mut br = InstData::new(Opcode::CompareIntBranch32);
        br.operands.push(one_a);
        br.operands.push(one_b);
        br.cc = Some(CondCode::Int(IntCC::Equal));
        br.blocks.push(b1);
        func.append_inst(b0, br);
        func.append_inst(b0, Function::inst_jmp(b2));
        func.append_inst(b1, Function::inst_unary(Opcode::Move32, x, five));
        func.append_inst(b1, Function::inst_jmp(b3));
        func.append_inst(b2, Function::inst_unary(Opcode::Move32, x, six));
        func.append_inst(b2, Function::inst_jmp(b3));
        let mut ret = InstData::new(Opcode::Return);
        ret.operands.push(x);
        func.append_inst(b3, ret);
        func
    }

    #[test]
    fn proven_branch_becomes_jump_and_dead_side_empties() {
        let ctx = TestContext::x86();
        let mut compiler = ctx.compiler(build_decidable_branch());
        crate::compiler::Stage::run(&mut SsaConstructionStage, &mut compiler).unwrap();
        SccpStage.run(&mut compiler).unwrap();

        let func = &compiler.func;
        let blocks: Vec<Block> = func.layout.blocks().collect();
        let (b0, b2, b3) = (blocks[0], blocks[2], blocks[3]);

        // The conditional branch collapsed to a jump to the taken side.
        let first = func
            .layout
            .block_insts(b0)
            .find(|&i| !func.dfg.insts[i].is_empty_node())
            .unwrap();
        assert_eq!(func.dfg.insts[first].opcode, Opcode::Jmp);
        // The untaken side was emptied.
        assert!(func
            .layout
            .block_insts(b2)
            .all(|i| func.dfg.insts[i].is_empty_node()));
        // The phi at the join was proven constant and became a move.
        let first = func
            .layout
            .block_insts(b3)
            .find(|&i| !func.dfg.insts[i].is_empty_node())
            .unwrap();
        let data = &func.dfg.insts[first];
        assert_eq!(data.opcode, Opcode::Move32);
        assert_eq!(
            func.dfg.operands[data.operands[0]].constant(),
            Some(ConstValue::Int(5))
        );
    }
}
