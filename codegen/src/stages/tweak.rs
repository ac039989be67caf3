//! Platform tweak stage.
//!
//! Enforces the encoding constraints lowering left implicit: constants
//! move into registers where no immediate form exists, shift counts
//! coerce to 8-bit constants, calls through unencodable targets go
//! through a register, and two-address platforms get their destructive
//! operand shapes.

use crate::compiler::{MethodCompiler, Stage};
use crate::result::CodegenResult;

/// The platform-tweak stage.
pub struct TweakStage;

impl Stage for TweakStage {
    fn name(&self) -> &'static str {
        "platform-tweak"
    }

    fn run(&mut self, compiler: &mut MethodCompiler) -> CodegenResult<()> {
        compiler.isa.tweak(&mut compiler.func)
    }
}

#[cfg(test)]
mod tests {
    use crate::compiler::Stage as _;
    use crate::ir::{Function, InstData, Opcode, SymbolName, Ty};
    use crate::stages::lowering::LoweringStage;
    use crate::testutil::TestContext;

    #[test]
    fn shift_count_constant_is_coerced_to_imm8() {
        // shr v, 17: after the tweak the count is an 8-bit constant with
        // value 17; the 32-bit original is no longer referenced.
        let ctx = TestContext::x86();
        let mut func = Function::new(SymbolName::from("t"));
        let block = func.dfg.make_block();
        func.layout.append_block(block);
        let v = func.dfg.make_virtual_reg(Ty::I32);
        let d = func.dfg.make_virtual_reg(Ty::I32);
        let count = func.dfg.iconst32(17);
        func.append_inst(
            block,
            Function::inst_binary(Opcode::ShiftRight32, d, v, count),
        );
        let mut ret = InstData::new(Opcode::Return);
        ret.operands.push(d);
        func.append_inst(block, ret);

        let mut compiler = ctx.compiler(func);
        LoweringStage.run(&mut compiler).unwrap();
        super::TweakStage.run(&mut compiler).unwrap();

        let func = &compiler.func;
        let shr = func
            .layout
            .block_insts(block)
            .find(|&i| func.dfg.insts[i].opcode == Opcode::X86Shr)
            .unwrap();
        let coerced = func.dfg.insts[shr].operands[1];
        assert_ne!(coerced, count);
        assert_eq!(func.dfg.ty(coerced), Ty::I8);
        assert_eq!(func.dfg.operands[coerced].constant_int(), Some(17));
    }

    #[test]
    fn compare_left_constant_moves_to_a_register() {
        let ctx = TestContext::x86();
        let mut func = Function::new(SymbolName::from("t"));
        let block = func.dfg.make_block();
        func.layout.append_block(block);
        let v = func.dfg.make_virtual_reg(Ty::I32);
        let d = func.dfg.make_virtual_reg(Ty::I32);
        let c = func.dfg.iconst32(5);
        let mut cmp = Function::inst_binary(Opcode::CompareInt32, d, c, v);
        cmp.cc = Some(crate::ir::CondCode::Int(crate::ir::IntCC::Equal));
        func.append_inst(block, cmp);
        let mut ret = InstData::new(Opcode::Return);
        ret.operands.push(d);
        func.append_inst(block, ret);

        let mut compiler = ctx.compiler(func);
        LoweringStage.run(&mut compiler).unwrap();
        super::TweakStage.run(&mut compiler).unwrap();

        let func = &compiler.func;
        let cmp = func
            .layout
            .block_insts(block)
            .find(|&i| func.dfg.insts[i].opcode == Opcode::X86Cmp)
            .unwrap();
        // The left side is now a register fed by a preceding move.
        let lhs = func.dfg.insts[cmp].operands[0];
        assert!(func.dfg.operands[lhs].is_virtual_reg());
    }
}
