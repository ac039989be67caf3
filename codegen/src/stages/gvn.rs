//! Global value numbering.
//!
//! A dominator-tree walk with a scoped hash table: two pure nodes with the
//! same opcode, condition, type and operand identities compute the same
//! value, so the later one becomes a move from the earlier result.
//! Constants are keyed by value, everything else by operand identity.

use crate::compiler::{MethodCompiler, Stage};
use crate::dominator_tree::DominatorTree;
use crate::flowgraph::ControlFlowGraph;
use crate::ir::{Block, CondCode, Function, Opcode, Operand, OperandData, Ty};
use crate::result::CodegenResult;
use crate::scoped_hash_map::ScopedHashMap;
use rustc_hash::FxHashMap;

/// The value-numbering stage.
pub struct GvnStage;

impl Stage for GvnStage {
    fn name(&self) -> &'static str {
        "value-numbering"
    }

    fn run(&mut self, compiler: &mut MethodCompiler) -> CodegenResult<()> {
        // Exceptional edges make value availability unclear; skip.
        if compiler.func.has_protected_regions {
            return Ok(());
        }
        let cfg = ControlFlowGraph::with_function(&compiler.func);
        let domtree = DominatorTree::with_function(&compiler.func, &cfg);
        let entry = match compiler.func.layout.entry_block() {
            Some(entry) => entry,
            None => return Ok(()),
        };

        let mut children: FxHashMap<Block, Vec<Block>> = FxHashMap::default();
        for block in compiler.func.layout.blocks() {
            if let Some(idom) = domtree.idom(block) {
                children.entry(idom).or_default().push(block);
            }
        }

        let mut table: ScopedHashMap<NodeKey, Operand> = ScopedHashMap::new();
        let mut hits = 0u64;
        visit(
            &mut compiler.func,
            entry,
            &children,
            &mut table,
            &mut hits,
        );
        compiler.counters.update("value_numbering.hits", hits);
        Ok(())
    }
}

#[derive(PartialEq, Eq, Hash, Clone, PartialOrd, Ord)]
enum OpKey {
    /// Constants compare by type and bit pattern.
    Const(u8, u64),
    /// Everything else by identity.
    Slot(Operand),
}

#[derive(PartialEq, Eq, Hash, Clone)]
struct NodeKey {
    opcode: Opcode,
    cc: Option<CondCode>,
    ty: Option<Ty>,
    operands: Vec<OpKey>,
}

fn operand_key(func: &Function, operand: Operand) -> OpKey {
    match &func.dfg.operands[operand] {
        OperandData::Constant { ty, value } => {
            let tag = match ty {
                Ty::I32 => 0,
                Ty::I64 => 1,
                Ty::R4 => 2,
                Ty::R8 => 3,
                Ty::Ptr => 4,
                Ty::Object => 5,
                Ty::Value(_) => 6,
                Ty::I8 => 7,
                Ty::I16 => 8,
            };
            OpKey::Const(tag, value.bits())
        }
        _ => OpKey::Slot(operand),
    }
}

fn visit(
    func: &mut Function,
    block: Block,
    children: &FxHashMap<Block, Vec<Block>>,
    table: &mut ScopedHashMap<NodeKey, Operand>,
    hits: &mut u64,
) {
    table.increment_depth();

    let insts: Vec<_> = func.layout.block_insts(block).collect();
    for inst in insts {
        let data = &func.dfg.insts[inst];
        if data.is_empty_node()
            || !data.opcode.is_pure()
            || data.opcode == Opcode::Phi
            || data.results.len() != 1
        {
            continue;
        }
        let mut operands: Vec<OpKey> = data
            .operands
            .iter()
            .map(|&o| operand_key(func, o))
            .collect();
        if data.opcode.is_commutative() {
            operands.sort();
        }
        let key = NodeKey {
            opcode: data.opcode,
            cc: data.cc,
            ty: data.ty,
            operands,
        };
        let result = data.results[0];
        match table.get(&key) {
            Some(&existing) => {
                let ty = func.dfg.ty(result);
                let move_op = match ty {
                    Ty::I64 => Opcode::Move64,
                    Ty::R4 => Opcode::MoveR4,
                    Ty::R8 => Opcode::MoveR8,
                    Ty::Ptr | Ty::Object => Opcode::MoveObject,
                    _ => Opcode::Move32,
                };
                func.dfg.insts[inst] = Function::inst_unary(move_op, result, existing);
                *hits += 1;
            }
            None => table.insert(key, result),
        }
    }

    if let Some(kids) = children.get(&block) {
        for &child in kids {
            visit(func, child, children, table, hits);
        }
    }
    table.decrement_depth();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{InstData, SymbolName};
    use crate::testutil::TestContext;

    #[test]
    fn redundant_add_becomes_a_move() {
        let mut func = Function::new(SymbolName::from("t"));
        let block = func.dfg.make_block();
        func.layout.append_block(block);
        let x = func.dfg.make_virtual_reg(Ty::I32);
        let a = func.dfg.make_virtual_reg(Ty::I32);
        let b = func.dfg.make_virtual_reg(Ty::I32);
        let first = func.append_inst(block, Function::inst_binary(Opcode::Add32, a, x, x));
        let second = func.append_inst(block, Function::inst_binary(Opcode::Add32, b, x, x));
        let mut ret = InstData::new(Opcode::Return);
        ret.operands.push(b);
        func.append_inst(block, ret);

        let ctx = TestContext::x86();
        let mut compiler = ctx.compiler(func);
        GvnStage.run(&mut compiler).unwrap();

        let func = &compiler.func;
        assert_eq!(func.dfg.insts[first].opcode, Opcode::Add32);
        assert_eq!(func.dfg.insts[second].opcode, Opcode::Move32);
        assert_eq!(func.dfg.insts[second].operands[0], a);
    }

    #[test]
    fn equal_constants_are_one_value() {
        let mut func = Function::new(SymbolName::from("t"));
        let block = func.dfg.make_block();
        func.layout.append_block(block);
        let a = func.dfg.make_virtual_reg(Ty::I32);
        let b = func.dfg.make_virtual_reg(Ty::I32);
        let c1 = func.dfg.iconst32(7);
        let c2 = func.dfg.iconst32(7);
        let x = func.dfg.make_virtual_reg(Ty::I32);
        func.append_inst(block, Function::inst_binary(Opcode::Add32, a, x, c1));
        let second = func.append_inst(block, Function::inst_binary(Opcode::Add32, b, c2, x));
        let mut ret = InstData::new(Opcode::Return);
        ret.operands.push(b);
        func.append_inst(block, ret);

        let ctx = TestContext::x86();
        let mut compiler = ctx.compiler(func);
        GvnStage.run(&mut compiler).unwrap();
        // Commutative canonicalization makes x+7 and 7+x the same value.
        assert_eq!(compiler.func.dfg.insts[second].opcode, Opcode::Move32);
    }

    #[test]
    fn sibling_blocks_do_not_share_values() {
        let mut func = Function::new(SymbolName::from("t"));
        let b0 = func.dfg.make_block();
        let b1 = func.dfg.make_block();
        let b2 = func.dfg.make_block();
        for b in [b0, b1, b2] {
            func.layout.append_block(b);
        }
        let x = func.dfg.make_virtual_reg(Ty::I32);
        let zero = func.dfg.iconst32(0);
        let mut br = InstData::new(Opcode::CompareIntBranch32);
        br.operands.push(x);
        br.operands.push(zero);
        br.cc = Some(CondCode::Int(crate::ir::IntCC::Equal));
        br.blocks.push(b2);
        func.append_inst(b0, br);
        func.append_inst(b0, Function::inst_jmp(b1));

        let a = func.dfg.make_virtual_reg(Ty::I32);
        let b = func.dfg.make_virtual_reg(Ty::I32);
        func.append_inst(b1, Function::inst_binary(Opcode::Add32, a, x, x));
        func.append_inst(b1, InstData::new(Opcode::ReturnVoid));
        let sibling = func.append_inst(b2, Function::inst_binary(Opcode::Add32, b, x, x));
        func.append_inst(b2, InstData::new(Opcode::ReturnVoid));

        let ctx = TestContext::x86();
        let mut compiler = ctx.compiler(func);
        GvnStage.run(&mut compiler).unwrap();
        // b1 does not dominate b2: the sibling add must survive.
        assert_eq!(compiler.func.dfg.insts[sibling].opcode, Opcode::Add32);
    }
}
