//! SSA deconstruction.
//!
//! Phis are resolved into copies on every incoming edge: for each phi
//! `r = phi(v_1 .. v_k)` with source blocks `B_1 .. B_k`, a copy
//! `replace(r) <- replace(v_i)` lands at the end of each `B_i`, right
//! before the block's terminator group (the trailing contiguous run of
//! compare-branches and the closing jump). Afterwards every remaining
//! SSA operand is substituted: version 0 maps back to its pre-SSA parent,
//! any other version gets a fresh virtual register of the same type.
//! Stack-resident value types copy with `MoveCompound`, everything else
//! with the scalar move of its type.

use crate::compiler::{MethodCompiler, Stage};
use crate::ir::{Function, Opcode, Operand, Ty};
use crate::result::CodegenResult;
use crate::type_layout::TypeLayout;
use rustc_hash::FxHashMap;

/// The Leave-SSA stage.
pub struct LeaveSsaStage;

impl Stage for LeaveSsaStage {
    fn name(&self) -> &'static str {
        "leave-ssa"
    }

    fn run(&mut self, compiler: &mut MethodCompiler) -> CodegenResult<()> {
        let resolved = leave_ssa(&mut compiler.func, compiler.type_layout);
        compiler.counters.update("leave_ssa.phis_resolved", resolved);
        Ok(())
    }
}

/// Deconstruct SSA form in place. Returns the number of phis resolved.
pub(crate) fn leave_ssa(func: &mut Function, layout: &TypeLayout) -> u64 {
    let mut replacements: FxHashMap<Operand, Operand> = FxHashMap::default();
    let mut resolved = 0u64;

    let blocks: Vec<_> = func.layout.blocks().collect();
    for &block in &blocks {
        let phis: Vec<_> = func
            .layout
            .block_insts(block)
            .filter(|&i| func.dfg.insts[i].opcode.is_phi())
            .collect();
        for phi in phis {
            let data = func.dfg.insts[phi].clone();
            let dest = replace(func, &mut replacements, data.results[0]);
            for (&source, &pred) in data.operands.iter().zip(data.blocks.iter()) {
                let source = replace(func, &mut replacements, source);
                if source == dest {
                    continue;
                }
                let ty = func.dfg.ty(dest);
                let copy = Function::inst_unary(move_opcode(layout, ty), dest, source);
                let copy = func.dfg.make_inst(copy);
                match func.terminator_group_start(pred) {
                    Some(before) => func.layout.insert_inst_before(copy, before),
                    None => func.layout.append_inst(copy, pred),
                }
            }
            func.dfg.empty_inst(phi);
            resolved += 1;
        }
    }

    // Substitute the remaining SSA operands and results on every node.
    for &block in &blocks {
        let insts: Vec<_> = func.layout.block_insts(block).collect();
        for inst in insts {
            if func.dfg.insts[inst].is_empty_node() {
                continue;
            }
            let operand_count = func.dfg.insts[inst].operands.len();
            for slot in 0..operand_count {
                let operand = func.dfg.insts[inst].operands[slot];
                if func.dfg.operands[operand].is_ssa() {
                    let new = replace(func, &mut replacements, operand);
                    func.dfg.insts[inst].operands[slot] = new;
                }
            }
            let result_count = func.dfg.insts[inst].results.len();
            for slot in 0..result_count {
                let result = func.dfg.insts[inst].results[slot];
                if func.dfg.operands[result].is_ssa() {
                    let new = replace(func, &mut replacements, result);
                    func.dfg.insts[inst].results[slot] = new;
                }
            }
        }
    }

    func.is_in_ssa_form = false;
    resolved
}

/// The non-SSA replacement of an operand.
fn replace(
    func: &mut Function,
    replacements: &mut FxHashMap<Operand, Operand>,
    operand: Operand,
) -> Operand {
    let ssa = match func.dfg.operands[operand].ssa() {
        Some(ssa) => ssa,
        None => return operand,
    };
    if let Some(&existing) = replacements.get(&operand) {
        return existing;
    }
    let new = if ssa.version == 0 {
        ssa.parent
    } else {
        let ty = func.dfg.ty(operand);
        func.dfg.make_virtual_reg(ty)
    };
    replacements.insert(operand, new);
    new
}

fn move_opcode(layout: &TypeLayout, ty: Ty) -> Opcode {
    if layout.ty_stored_on_stack(ty) {
        return Opcode::MoveCompound;
    }
    match ty {
        Ty::I64 => Opcode::Move64,
        Ty::R4 => Opcode::MoveR4,
        Ty::R8 => Opcode::MoveR8,
        Ty::Ptr | Ty::Object => Opcode::MoveObject,
        _ => Opcode::Move32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Stage as _;
    use crate::ir::{Block, CondCode, Inst, InstData, IntCC, OperandData, SymbolName};
    use crate::stages::ssa_construction::SsaConstructionStage;
    use crate::testutil::TestContext;

    /// A tiny IR interpreter over 32-bit integers, used to prove that SSA
    /// deconstruction preserves program behavior.
    struct Interp<'f> {
        func: &'f Function,
        env: FxHashMap<Operand, i64>,
    }

    impl<'f> Interp<'f> {
        fn new(func: &'f Function, args: &[i64]) -> Self {
            let mut env = FxHashMap::default();
            for (&param, &value) in func.params.iter().zip(args.iter()) {
                env.insert(param, value);
            }
            Self { func, env }
        }

        fn value(&self, operand: Operand) -> i64 {
            match &self.func.dfg.operands[operand] {
                OperandData::Constant { value, .. } => value.as_int().unwrap_or(0),
                // A version-0 name reads the parent's incoming value.
                OperandData::VirtualReg { ssa: Some(ssa), .. } if ssa.version == 0 => self
                    .env
                    .get(&operand)
                    .or_else(|| self.env.get(&ssa.parent))
                    .copied()
                    .unwrap_or(0),
                _ => self.env.get(&operand).copied().unwrap_or(0),
            }
        }

        fn run(mut self) -> Option<i64> {
            let mut block = self.func.layout.entry_block()?;
            let mut prev: Option<Block> = None;
            loop {
                let mut next: Option<Block> = None;
                let insts: Vec<Inst> = self.func.layout.block_insts(block).collect();
                for inst in insts {
                    let data = &self.func.dfg.insts[inst];
                    if data.is_empty_node() {
                        continue;
                    }
                    match data.opcode {
                        Opcode::LoadParam => {
                            // Parameter registers are pre-seeded.
                            let seeded = self.value(data.operands[0]);
                            let _ = seeded;
                        }
                        Opcode::Move32 | Opcode::MoveObject => {
                            let v = self.value(data.operands[0]);
                            self.env.insert(data.results[0], v);
                        }
                        Opcode::Phi => {
                            let pred = prev.expect("phi in entry block");
                            let index = data
                                .blocks
                                .iter()
                                .position(|&b| b == pred)
                                .expect("phi covers the taken edge");
                            let v = self.value(data.operands[index]);
                            self.env.insert(data.results[0], v);
                        }
                        Opcode::Add32 => self.binop(inst, |a, b| {
                            i64::from((a as i32).wrapping_add(b as i32))
                        }),
                        Opcode::Sub32 => self.binop(inst, |a, b| {
                            i64::from((a as i32).wrapping_sub(b as i32))
                        }),
                        Opcode::MulSigned32 => self.binop(inst, |a, b| {
                            i64::from((a as i32).wrapping_mul(b as i32))
                        }),
                        Opcode::CompareInt32 => {
                            let data = &self.func.dfg.insts[inst];
                            let cc = match data.cc.unwrap() {
                                CondCode::Int(cc) => cc,
                                _ => unreachable!(),
                            };
                            let a = self.value(data.operands[0]);
                            let b = self.value(data.operands[1]);
                            let v = crate::stages::constant_fold::eval_int_cc(cc, a, b, 32);
                            self.env.insert(data.results[0], i64::from(v));
                        }
                        Opcode::CompareIntBranch32 => {
                            let cc = match data.cc.unwrap() {
                                CondCode::Int(cc) => cc,
                                _ => unreachable!(),
                            };
                            let a = self.value(data.operands[0]);
                            let b = self.value(data.operands[1]);
                            if crate::stages::constant_fold::eval_int_cc(cc, a, b, 32) {
                                next = Some(data.blocks[0]);
                                break;
                            }
                        }
                        Opcode::Jmp => {
                            next = Some(data.blocks[0]);
                            break;
                        }
                        Opcode::Return => {
                            return Some(self.value(data.operands[0]));
                        }
                        Opcode::ReturnVoid => return None,
                        other => panic!("interpreter does not model {other}"),
                    }
                }
                prev = Some(block);
                block = next.expect("block fell through without a terminator");
            }
        }

        fn binop(&mut self, inst: Inst, f: impl Fn(i64, i64) -> i64) {
            let data = &self.func.dfg.insts[inst];
            let a = self.value(data.operands[0]);
            let b = self.value(data.operands[1]);
            self.env.insert(data.results[0], f(a, b));
        }
    }

    /// abs-diff: if (a < b) r = b - a else r = a - b; return r
    fn build_abs_diff(func: &mut Function) -> (Block, Block, Block, Block) {
        let b0 = func.dfg.make_block();
        let b1 = func.dfg.make_block();
        let b2 = func.dfg.make_block();
        let b3 = func.dfg.make_block();
        for b in [b0, b1, b2, b3] {
            func.layout.append_block(b);
        }
        let a = func.dfg.make_virtual_reg(Ty::I32);
        let b = func.dfg.make_virtual_reg(Ty::I32);
        func.params.push(a);
        func.params.push(b);
        let r = func.dfg.make_virtual_reg(Ty::I32);

        let mut br = InstData::new(Opcode::CompareIntBranch32);
        br.operands.push(a);
        br.operands.push(b);
        br.cc = Some(CondCode::Int(IntCC::SignedLessThan));
        br.blocks.push(b1);
        func.append_inst(b0, br);
        func.append_inst(b0, Function::inst_jmp(b2));

        func.append_inst(b1, Function::inst_binary(Opcode::Sub32, r, b, a));
        func.append_inst(b1, Function::inst_jmp(b3));
        func.append_inst(b2, Function::inst_binary(Opcode::Sub32, r, a, b));
        func.append_inst(b2, Function::inst_jmp(b3));

        let mut ret = InstData::new(Opcode::Return);
        ret.operands.push(r);
        func.append_inst(b3, ret);
        (b0, b1, b2, b3)
    }

    #[test]
    fn phi_resolution_places_copies_before_terminators() {
        let ctx = TestContext::x86();
        let mut func = Function::new(SymbolName::from("t"));
        let (_b0, b1, b2, b3) = build_abs_diff(&mut func);
        let mut compiler = ctx.compiler(func);
        SsaConstructionStage.run(&mut compiler).unwrap();
        assert_eq!(compiler.func.phi_count(b3), 1);

        LeaveSsaStage.run(&mut compiler).unwrap();
        let func = &compiler.func;
        assert!(!func.is_in_ssa_form);

        // No phi remains anywhere, no operand reports itself as SSA.
        for block in func.layout.blocks() {
            for inst in func.layout.block_insts(block) {
                let data = &func.dfg.insts[inst];
                if data.is_empty_node() {
                    continue;
                }
                assert!(!data.opcode.is_phi());
                for &o in data.operands.iter().chain(data.results.iter()) {
                    assert!(!func.dfg.operands[o].is_ssa());
                }
            }
        }

        // Each predecessor of the join ends with a move right before its
        // terminator group, and both moves target the same register.
        let mut targets = Vec::new();
        for pred in [b1, b2] {
            let start = func.terminator_group_start(pred).unwrap();
            let before = func
                .layout
                .block_insts(pred)
                .take_while(|&i| i != start)
                .filter(|&i| !func.dfg.insts[i].is_empty_node())
                .last()
                .unwrap();
            let data = &func.dfg.insts[before];
            assert_eq!(data.opcode, Opcode::Move32);
            targets.push(data.results[0]);
        }
        assert_eq!(targets[0], targets[1]);
    }

    #[test]
    fn self_copies_are_skipped() {
        // A loop-header phi whose value flows around the back edge
        // unchanged: `x.2 = phi(x.1 from b0, x.2 from b1)`. The back-edge
        // copy resolves to `x' <- x'` and must be dropped.
        let ctx = TestContext::x86();
        let mut func = Function::new(SymbolName::from("t"));
        let b0 = func.dfg.make_block();
        let b1 = func.dfg.make_block();
        for b in [b0, b1] {
            func.layout.append_block(b);
        }
        let x = func.dfg.make_virtual_reg(Ty::I32);
        let x1 = func.dfg.make_ssa_version(x, 1);
        let x2 = func.dfg.make_ssa_version(x, 2);
        let one = func.dfg.iconst32(1);
        func.append_inst(b0, Function::inst_unary(Opcode::Move32, x1, one));
        func.append_inst(b0, Function::inst_jmp(b1));

        let mut phi = InstData::new(Opcode::Phi);
        phi.results.push(x2);
        phi.operands.push(x1);
        phi.operands.push(x2);
        phi.blocks.push(b0);
        phi.blocks.push(b1);
        func.append_inst(b1, phi);
        let zero = func.dfg.iconst32(0);
        let mut br = InstData::new(Opcode::CompareIntBranch32);
        br.operands.push(x2);
        br.operands.push(zero);
        br.cc = Some(CondCode::Int(IntCC::NotEqual));
        br.blocks.push(b1);
        func.append_inst(b1, br);
        let mut ret = InstData::new(Opcode::Return);
        ret.operands.push(x2);
        func.append_inst(b1, ret);

        let mut compiler = ctx.compiler(func);
        compiler.func.is_in_ssa_form = true;
        LeaveSsaStage.run(&mut compiler).unwrap();

        let func = &compiler.func;
        // The entry edge got its copy, the back edge did not.
        let entry_copies = func
            .layout
            .block_insts(b0)
            .filter(|&i| func.dfg.insts[i].opcode == Opcode::Move32)
            .count();
        assert_eq!(entry_copies, 2);
        let loop_copies = func
            .layout
            .block_insts(b1)
            .filter(|&i| func.dfg.insts[i].opcode == Opcode::Move32)
            .count();
        assert_eq!(loop_copies, 0);
    }

    #[test]
    fn leave_ssa_preserves_semantics() {
        let ctx = TestContext::x86();
        let mut func = Function::new(SymbolName::from("t"));
        build_abs_diff(&mut func);
        let mut compiler = ctx.compiler(func);
        SsaConstructionStage.run(&mut compiler).unwrap();

        let ssa_form = compiler.func.clone();
        LeaveSsaStage.run(&mut compiler).unwrap();
        let deconstructed = &compiler.func;

        for (a, b) in [(3, 9), (9, 3), (0, 0), (-5, 5), (i64::from(i32::MIN), 1)] {
            let want = Interp::new(&ssa_form, &[a, b]).run();
            let got = Interp::new(deconstructed, &[a, b]).run();
            assert_eq!(want, got, "inputs {a}, {b}");
        }
    }
}
