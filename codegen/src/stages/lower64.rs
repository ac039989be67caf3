//! Long-integer expansion.
//!
//! On 32-bit targets every 64-bit value is split into a low/high pair of
//! 32-bit registers: adds chain through carry, logic goes pairwise,
//! comparisons combine a high-word compare with an unsigned low-word
//! compare, and the operations without a short expansion (64-bit division,
//! variable shifts, int-to-float) call runtime helpers that return their
//! result in a register pair.

use crate::compiler::{MethodCompiler, Stage};
use crate::ir::{
    Function, Inst, InstData, IntCC, Opcode, Operand, SymbolName, Ty,
};
use crate::result::{CodegenError, CodegenResult};
use rustc_hash::FxHashMap;

/// The long-expansion stage.
pub struct Lower64Stage;

impl Stage for Lower64Stage {
    fn name(&self) -> &'static str {
        "long-expansion"
    }

    fn run(&mut self, compiler: &mut MethodCompiler) -> CodegenResult<()> {
        if compiler.isa.ptr_size() != 4 {
            return Ok(());
        }
        let mut expander = Expander {
            pairs: FxHashMap::default(),
            expanded: 0,
        };
        let blocks: Vec<_> = compiler.func.layout.blocks().collect();
        for block in blocks {
            let insts: Vec<_> = compiler.func.layout.block_insts(block).collect();
            for inst in insts {
                if compiler.func.dfg.insts[inst].is_empty_node() {
                    continue;
                }
                expander.expand(&mut compiler.func, inst)?;
            }
        }
        compiler
            .counters
            .update("long_expansion.expanded", expander.expanded);
        Ok(())
    }
}

struct Expander {
    pairs: FxHashMap<Operand, (Operand, Operand)>,
    expanded: u64,
}

impl Expander {
    /// The low/high pair standing in for a 64-bit operand.
    fn pair(&mut self, func: &mut Function, operand: Operand) -> (Operand, Operand) {
        if let Some(&pair) = self.pairs.get(&operand) {
            return pair;
        }
        let constant = func.dfg.operands[operand].constant();
        let pair = match constant {
            Some(value) => {
                let v = value.as_int().unwrap_or(0);
                let lo = func.dfg.iconst32(v as i32);
                let hi = func.dfg.iconst32((v >> 32) as i32);
                (lo, hi)
            }
            None => {
                let lo = func.dfg.make_virtual_reg(Ty::I32);
                let hi = func.dfg.make_virtual_reg(Ty::I32);
                (lo, hi)
            }
        };
        self.pairs.insert(operand, pair);
        pair
    }

    fn is_i64(&self, func: &Function, operand: Operand) -> bool {
        func.dfg.ty(operand) == Ty::I64
    }

    fn before(&mut self, func: &mut Function, at: Inst, data: InstData) {
        let inst = func.dfg.make_inst(data);
        func.layout.insert_inst_before(inst, at);
    }

    fn mv(&mut self, func: &mut Function, at: Inst, dst: Operand, src: Operand) {
        self.before(func, at, Function::inst_unary(Opcode::Move32, dst, src));
    }

    fn bin(
        &mut self,
        func: &mut Function,
        at: Inst,
        opcode: Opcode,
        a: Operand,
        b: Operand,
    ) -> Operand {
        let result = func.dfg.make_virtual_reg(Ty::I32);
        self.before(func, at, Function::inst_binary(opcode, result, a, b));
        result
    }

    fn cmp(
        &mut self,
        func: &mut Function,
        at: Inst,
        cc: IntCC,
        a: Operand,
        b: Operand,
    ) -> Operand {
        let result = func.dfg.make_virtual_reg(Ty::I32);
        let mut data = Function::inst_binary(Opcode::CompareInt32, result, a, b);
        data.cc = Some(crate::ir::CondCode::Int(cc));
        self.before(func, at, data);
        result
    }

    fn expand(&mut self, func: &mut Function, inst: Inst) -> CodegenResult<()> {
        use Opcode::*;
        let data = func.dfg.insts[inst].clone();
        let touches_i64 = data
            .results
            .iter()
            .chain(data.operands.iter())
            .any(|&o| self.is_i64(func, o));
        if !touches_i64 {
            return Ok(());
        }
        self.expanded += 1;

        match data.opcode {
            Move64 => {
                let (slo, shi) = self.pair(func, data.operands[0]);
                let (dlo, dhi) = self.pair(func, data.results[0]);
                self.mv(func, inst, dlo, slo);
                self.mv(func, inst, dhi, shi);
                func.dfg.empty_inst(inst);
            }
            Phi => {
                let (dlo, dhi) = self.pair(func, data.results[0]);
                let mut lo_phi = InstData::new(Phi);
                let mut hi_phi = InstData::new(Phi);
                lo_phi.results.push(dlo);
                hi_phi.results.push(dhi);
                lo_phi.ty = Some(Ty::I32);
                hi_phi.ty = Some(Ty::I32);
                for (&operand, &block) in data.operands.iter().zip(data.blocks.iter()) {
                    let (lo, hi) = self.pair(func, operand);
                    lo_phi.operands.push(lo);
                    hi_phi.operands.push(hi);
                    lo_phi.blocks.push(block);
                    hi_phi.blocks.push(block);
                }
                // Both replacements stay in the leading phi group.
                let block = func.layout.inst_block(inst).unwrap();
                let lo_inst = func.dfg.make_inst(lo_phi);
                let hi_inst = func.dfg.make_inst(hi_phi);
                func.layout.prepend_inst(hi_inst, block);
                func.layout.prepend_inst(lo_inst, block);
                func.dfg.empty_inst(inst);
            }
            Add64 | Sub64 => {
                let (alo, ahi) = self.pair(func, data.operands[0]);
                let (blo, bhi) = self.pair(func, data.operands[1]);
                let (dlo, dhi) = self.pair(func, data.results[0]);
                let carry = func.dfg.make_virtual_reg(Ty::I32);
                let (out_op, in_op) = if data.opcode == Add64 {
                    (AddCarryOut32, AddWithCarry32)
                } else {
                    (SubCarryOut32, SubWithCarry32)
                };
                let mut low = InstData::new(out_op);
                low.results.push(dlo);
                low.results.push(carry);
                low.operands.push(alo);
                low.operands.push(blo);
                self.before(func, inst, low);
                let mut high = InstData::new(in_op);
                high.results.push(dhi);
                high.operands.push(ahi);
                high.operands.push(bhi);
                high.operands.push(carry);
                self.before(func, inst, high);
                func.dfg.empty_inst(inst);
            }
            And64 | Or64 | Xor64 => {
                let op32 = match data.opcode {
                    And64 => And32,
                    Or64 => Or32,
                    _ => Xor32,
                };
                let (alo, ahi) = self.pair(func, data.operands[0]);
                let (blo, bhi) = self.pair(func, data.operands[1]);
                let (dlo, dhi) = self.pair(func, data.results[0]);
                self.before(func, inst, Function::inst_binary(op32, dlo, alo, blo));
                self.before(func, inst, Function::inst_binary(op32, dhi, ahi, bhi));
                func.dfg.empty_inst(inst);
            }
            Not64 => {
                let (slo, shi) = self.pair(func, data.operands[0]);
                let (dlo, dhi) = self.pair(func, data.results[0]);
                self.before(func, inst, Function::inst_unary(Not32, dlo, slo));
                self.before(func, inst, Function::inst_unary(Not32, dhi, shi));
                func.dfg.empty_inst(inst);
            }
            MulSigned64 => {
                let (alo, ahi) = self.pair(func, data.operands[0]);
                let (blo, bhi) = self.pair(func, data.operands[1]);
                let (dlo, dhi) = self.pair(func, data.results[0]);
                // dlo:carry = alo * blo; dhi = carry + alo*bhi + ahi*blo.
                let carry = func.dfg.make_virtual_reg(Ty::I32);
                let mut mul = InstData::new(MulHighUnsigned32);
                mul.results.push(dlo);
                mul.results.push(carry);
                mul.operands.push(alo);
                mul.operands.push(blo);
                self.before(func, inst, mul);
                let cross1 = self.bin(func, inst, MulSigned32, alo, bhi);
                let cross2 = self.bin(func, inst, MulSigned32, ahi, blo);
                let sum = self.bin(func, inst, Add32, carry, cross1);
                self.before(func, inst, Function::inst_binary(Add32, dhi, sum, cross2));
                func.dfg.empty_inst(inst);
            }
            DivSigned64 | DivUnsigned64 | RemSigned64 | RemUnsigned64 => {
                let helper = match data.opcode {
                    DivSigned64 => "mosa_rt_sdiv64",
                    DivUnsigned64 => "mosa_rt_udiv64",
                    RemSigned64 => "mosa_rt_srem64",
                    _ => "mosa_rt_urem64",
                };
                let (alo, ahi) = self.pair(func, data.operands[0]);
                let (blo, bhi) = self.pair(func, data.operands[1]);
                let (dlo, dhi) = self.pair(func, data.results[0]);
                let sym = func.dfg.symbol(SymbolName::from(helper), Ty::Ptr);
                let mut call = InstData::new(Call);
                call.results.push(dlo);
                call.results.push(dhi);
                call.operands.push(sym);
                call.operands.push(alo);
                call.operands.push(ahi);
                call.operands.push(blo);
                call.operands.push(bhi);
                self.before(func, inst, call);
                func.dfg.empty_inst(inst);
            }
            ShiftLeft64 | ShiftRight64 | ArithShiftRight64 => {
                self.expand_shift(func, inst, &data)?;
            }
            CompareInt64 => {
                let cc = match data.cc {
                    Some(crate::ir::CondCode::Int(cc)) => cc,
                    _ => {
                        return Err(CodegenError::Verifier(
                            "64-bit compare without an integer condition".to_string(),
                        ))
                    }
                };
                let result = data.results[0];
                let flag = self.compare64(func, inst, cc, data.operands[0], data.operands[1]);
                self.before(func, inst, Function::inst_unary(Move32, result, flag));
                func.dfg.empty_inst(inst);
            }
            CompareIntBranch64 => {
                let cc = match data.cc {
                    Some(crate::ir::CondCode::Int(cc)) => cc,
                    _ => {
                        return Err(CodegenError::Verifier(
                            "64-bit branch without an integer condition".to_string(),
                        ))
                    }
                };
                let flag = self.compare64(func, inst, cc, data.operands[0], data.operands[1]);
                let zero = func.dfg.iconst32(0);
                let node = &mut func.dfg.insts[inst];
                node.opcode = CompareIntBranch32;
                node.operands.clear();
                node.operands.push(flag);
                node.operands.push(zero);
                node.cc = Some(crate::ir::CondCode::Int(IntCC::NotEqual));
            }
            SignExtend32x64 => {
                let x = data.operands[0];
                let (dlo, dhi) = self.pair(func, data.results[0]);
                self.mv(func, inst, dlo, x);
                let c31 = func.dfg.iconst32(31);
                self.before(
                    func,
                    inst,
                    Function::inst_binary(ArithShiftRight32, dhi, x, c31),
                );
                func.dfg.empty_inst(inst);
            }
            ZeroExtend32x64 => {
                let x = data.operands[0];
                let (dlo, dhi) = self.pair(func, data.results[0]);
                self.mv(func, inst, dlo, x);
                let zero = func.dfg.iconst32(0);
                self.mv(func, inst, dhi, zero);
                func.dfg.empty_inst(inst);
            }
            Truncate64x32 | GetLow64 => {
                let (lo, _) = self.pair(func, data.operands[0]);
                let result = data.results[0];
                self.mv(func, inst, result, lo);
                func.dfg.empty_inst(inst);
            }
            GetHigh64 => {
                let (_, hi) = self.pair(func, data.operands[0]);
                let result = data.results[0];
                self.mv(func, inst, result, hi);
                func.dfg.empty_inst(inst);
            }
            Pack64 => {
                let (dlo, dhi) = self.pair(func, data.results[0]);
                self.mv(func, inst, dlo, data.operands[0]);
                self.mv(func, inst, dhi, data.operands[1]);
                func.dfg.empty_inst(inst);
            }
            ConvertI64ToR8 => {
                let (lo, hi) = self.pair(func, data.operands[0]);
                let sym = func.dfg.symbol(SymbolName::from("mosa_rt_l2d"), Ty::Ptr);
                let mut call = InstData::new(Call);
                call.results.push(data.results[0]);
                call.operands.push(sym);
                call.operands.push(lo);
                call.operands.push(hi);
                self.before(func, inst, call);
                func.dfg.empty_inst(inst);
            }
            Load64 => {
                let base = data.operands[0];
                let off = self.const_offset(func, data.operands[1])?;
                let (dlo, dhi) = self.pair(func, data.results[0]);
                let off_lo = func.dfg.iconst32(off);
                let off_hi = func.dfg.iconst32(off + 4);
                self.before(func, inst, Function::inst_binary(Load32, dlo, base, off_lo));
                self.before(func, inst, Function::inst_binary(Load32, dhi, base, off_hi));
                func.dfg.empty_inst(inst);
            }
            Store64 => {
                let base = data.operands[0];
                let off = self.const_offset(func, data.operands[1])?;
                let (vlo, vhi) = self.pair(func, data.operands[2]);
                let off_lo = func.dfg.iconst32(off);
                let off_hi = func.dfg.iconst32(off + 4);
                for (o, v) in [(off_lo, vlo), (off_hi, vhi)] {
                    let mut store = InstData::new(Store32);
                    store.operands.push(base);
                    store.operands.push(o);
                    store.operands.push(v);
                    self.before(func, inst, store);
                }
                func.dfg.empty_inst(inst);
            }
            LoadParam => {
                let slot = data.operands[0];
                let (dlo, dhi) = self.pair(func, data.results[0]);
                let addr = func.dfg.make_virtual_reg(Ty::Ptr);
                self.before(func, inst, Function::inst_unary(AddressOf, addr, slot));
                let zero = func.dfg.iconst32(0);
                let four = func.dfg.iconst32(4);
                self.before(func, inst, Function::inst_binary(Load32, dlo, addr, zero));
                self.before(func, inst, Function::inst_binary(Load32, dhi, addr, four));
                func.dfg.empty_inst(inst);
            }
            Return => {
                let (lo, hi) = self.pair(func, data.operands[0]);
                let node = &mut func.dfg.insts[inst];
                node.operands.clear();
                node.operands.push(lo);
                node.operands.push(hi);
            }
            Call => {
                let mut operands = Vec::with_capacity(data.operands.len() + 2);
                operands.push(data.operands[0]);
                for &arg in &data.operands[1..] {
                    if self.is_i64(func, arg) {
                        let (lo, hi) = self.pair(func, arg);
                        operands.push(lo);
                        operands.push(hi);
                    } else {
                        operands.push(arg);
                    }
                }
                let mut results = data.results.clone();
                if let Some(&r) = data.results.first() {
                    if self.is_i64(func, r) {
                        let (dlo, dhi) = self.pair(func, r);
                        results.clear();
                        results.push(dlo);
                        results.push(dhi);
                    }
                }
                let node = &mut func.dfg.insts[inst];
                node.operands = operands.into();
                node.results = results;
            }
            other => {
                return Err(CodegenError::NotSupported(format!(
                    "64-bit operands of {other} on a 32-bit target"
                )));
            }
        }
        Ok(())
    }

    fn const_offset(&self, func: &Function, operand: Operand) -> CodegenResult<i32> {
        func.dfg.operands[operand]
            .constant_int()
            .map(|v| v as i32)
            .ok_or_else(|| {
                CodegenError::Verifier("memory offset is not a constant".to_string())
            })
    }

    /// Constant 64-bit shifts expand inline; variable counts call the
    /// runtime helpers.
    fn expand_shift(
        &mut self,
        func: &mut Function,
        inst: Inst,
        data: &InstData,
    ) -> CodegenResult<()> {
        use Opcode::*;
        let (vlo, vhi) = self.pair(func, data.operands[0]);
        let (dlo, dhi) = self.pair(func, data.results[0]);
        let count_op = data.operands[1];

        if let Some(count) = func.dfg.operands[count_op].constant_int() {
            let c = (count as u32) & 63;
            match data.opcode {
                ShiftLeft64 => {
                    if c == 0 {
                        self.mv(func, inst, dlo, vlo);
                        self.mv(func, inst, dhi, vhi);
                    } else if c < 32 {
                        let cc = func.dfg.iconst32(c as i32);
                        let inv = func.dfg.iconst32((32 - c) as i32);
                        self.before(func, inst, Function::inst_binary(ShiftLeft32, dlo, vlo, cc));
                        let spill = self.bin(func, inst, ShiftRight32, vlo, inv);
                        let hi_sh = self.bin(func, inst, ShiftLeft32, vhi, cc);
                        self.before(func, inst, Function::inst_binary(Or32, dhi, hi_sh, spill));
                    } else {
                        let zero = func.dfg.iconst32(0);
                        self.mv(func, inst, dlo, zero);
                        let cc = func.dfg.iconst32((c - 32) as i32);
                        self.before(func, inst, Function::inst_binary(ShiftLeft32, dhi, vlo, cc));
                    }
                }
                ShiftRight64 | ArithShiftRight64 => {
                    let hi_op = if data.opcode == ShiftRight64 {
                        ShiftRight32
                    } else {
                        ArithShiftRight32
                    };
                    if c == 0 {
                        self.mv(func, inst, dlo, vlo);
                        self.mv(func, inst, dhi, vhi);
                    } else if c < 32 {
                        let cc = func.dfg.iconst32(c as i32);
                        let inv = func.dfg.iconst32((32 - c) as i32);
                        let spill = self.bin(func, inst, ShiftLeft32, vhi, inv);
                        let lo_sh = self.bin(func, inst, ShiftRight32, vlo, cc);
                        self.before(func, inst, Function::inst_binary(Or32, dlo, lo_sh, spill));
                        self.before(func, inst, Function::inst_binary(hi_op, dhi, vhi, cc));
                    } else {
                        let cc = func.dfg.iconst32((c - 32) as i32);
                        self.before(func, inst, Function::inst_binary(hi_op, dlo, vhi, cc));
                        if data.opcode == ShiftRight64 {
                            let zero = func.dfg.iconst32(0);
                            self.mv(func, inst, dhi, zero);
                        } else {
                            let c31 = func.dfg.iconst32(31);
                            self.before(
                                func,
                                inst,
                                Function::inst_binary(ArithShiftRight32, dhi, vhi, c31),
                            );
                        }
                    }
                }
                _ => unreachable!(),
            }
        } else {
            let helper = match data.opcode {
                ShiftLeft64 => "mosa_rt_shl64",
                ShiftRight64 => "mosa_rt_shr64",
                _ => "mosa_rt_sar64",
            };
            let sym = func.dfg.symbol(SymbolName::from(helper), Ty::Ptr);
            let mut call = InstData::new(Call);
            call.results.push(dlo);
            call.results.push(dhi);
            call.operands.push(sym);
            call.operands.push(vlo);
            call.operands.push(vhi);
            call.operands.push(count_op);
            self.before(func, inst, call);
        }
        func.dfg.empty_inst(inst);
        Ok(())
    }

    /// Materialize a 64-bit comparison as a 0/1 value.
    fn compare64(
        &mut self,
        func: &mut Function,
        inst: Inst,
        cc: IntCC,
        a: Operand,
        b: Operand,
    ) -> Operand {
        use Opcode::*;
        let (alo, ahi) = self.pair(func, a);
        let (blo, bhi) = self.pair(func, b);
        match cc {
            IntCC::Equal | IntCC::NotEqual => {
                let x = self.bin(func, inst, Xor32, alo, blo);
                let y = self.bin(func, inst, Xor32, ahi, bhi);
                let or = self.bin(func, inst, Or32, x, y);
                let zero = func.dfg.iconst32(0);
                self.cmp(func, inst, cc, or, zero)
            }
            _ => {
                // strict(hi) | (hi == hi' & unsigned(lo)).
                let strict_hi = self.cmp(func, inst, strict(cc), ahi, bhi);
                let eq_hi = self.cmp(func, inst, IntCC::Equal, ahi, bhi);
                let lo = self.cmp(func, inst, unsigned(cc), alo, blo);
                let both = self.bin(func, inst, And32, eq_hi, lo);
                self.bin(func, inst, Or32, strict_hi, both)
            }
        }
    }
}

/// The strict form of an ordering, keeping its signedness.
fn strict(cc: IntCC) -> IntCC {
    match cc {
        IntCC::SignedLessThanOrEqual => IntCC::SignedLessThan,
        IntCC::SignedGreaterThanOrEqual => IntCC::SignedGreaterThan,
        IntCC::UnsignedLessThanOrEqual => IntCC::UnsignedLessThan,
        IntCC::UnsignedGreaterThanOrEqual => IntCC::UnsignedGreaterThan,
        other => other,
    }
}

/// The unsigned form of an ordering, used for the low words.
fn unsigned(cc: IntCC) -> IntCC {
    match cc {
        IntCC::SignedLessThan => IntCC::UnsignedLessThan,
        IntCC::SignedLessThanOrEqual => IntCC::UnsignedLessThanOrEqual,
        IntCC::SignedGreaterThan => IntCC::UnsignedGreaterThan,
        IntCC::SignedGreaterThanOrEqual => IntCC::UnsignedGreaterThanOrEqual,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::SymbolName;
    use crate::testutil::TestContext;

    #[test]
    fn add64_becomes_a_carry_chain() {
        let mut func = Function::new(SymbolName::from("t"));
        let block = func.dfg.make_block();
        func.layout.append_block(block);
        let a = func.dfg.make_virtual_reg(Ty::I64);
        let b = func.dfg.make_virtual_reg(Ty::I64);
        let d = func.dfg.make_virtual_reg(Ty::I64);
        func.append_inst(block, Function::inst_binary(Opcode::Add64, d, a, b));
        let mut ret = InstData::new(Opcode::Return);
        ret.operands.push(d);
        func.append_inst(block, ret);

        let ctx = TestContext::x86();
        let mut compiler = ctx.compiler(func);
        Lower64Stage.run(&mut compiler).unwrap();

        let func = &compiler.func;
        let ops: Vec<_> = func
            .layout
            .block_insts(block)
            .map(|i| func.dfg.insts[i].opcode)
            .filter(|&o| o != Opcode::Nop)
            .collect();
        assert_eq!(
            ops,
            [
                Opcode::AddCarryOut32,
                Opcode::AddWithCarry32,
                Opcode::Return
            ]
        );
        // The return now carries the low/high pair.
        let ret = func.layout.last_inst(block).unwrap();
        assert_eq!(func.dfg.insts[ret].operands.len(), 2);
        // No 64-bit operand survives on any live node.
        for b in func.layout.blocks() {
            for i in func.layout.block_insts(b) {
                let data = &func.dfg.insts[i];
                if data.is_empty_node() {
                    continue;
                }
                for &o in data.operands.iter().chain(data.results.iter()) {
                    assert_ne!(func.dfg.ty(o), Ty::I64);
                }
            }
        }
    }

    #[test]
    fn constant_shift_expands_inline() {
        let mut func = Function::new(SymbolName::from("t"));
        let block = func.dfg.make_block();
        func.layout.append_block(block);
        let a = func.dfg.make_virtual_reg(Ty::I64);
        let d = func.dfg.make_virtual_reg(Ty::I64);
        let c = func.dfg.iconst32(40);
        func.append_inst(block, Function::inst_binary(Opcode::ShiftLeft64, d, a, c));
        let mut ret = InstData::new(Opcode::Return);
        ret.operands.push(d);
        func.append_inst(block, ret);

        let ctx = TestContext::x86();
        let mut compiler = ctx.compiler(func);
        Lower64Stage.run(&mut compiler).unwrap();

        // A shift by 40 keeps only the low word, shifted into the high.
        let func = &compiler.func;
        let ops: Vec<_> = func
            .layout
            .block_insts(block)
            .map(|i| func.dfg.insts[i].opcode)
            .filter(|&o| o != Opcode::Nop)
            .collect();
        assert_eq!(ops, [Opcode::Move32, Opcode::ShiftLeft32, Opcode::Return]);
    }

    #[test]
    fn division_calls_the_runtime(){
        let mut func = Function::new(SymbolName::from("t"));
        let block = func.dfg.make_block();
        func.layout.append_block(block);
        let a = func.dfg.make_virtual_reg(Ty::I64);
        let b = func.dfg.make_virtual_reg(Ty::I64);
        let d = func.dfg.make_virtual_reg(Ty::I64);
        func.append_inst(block, Function::inst_binary(Opcode::DivSigned64, d, a, b));
        let mut ret = InstData::new(Opcode::Return);
        ret.operands.push(d);
        func.append_inst(block, ret);

        let ctx = TestContext::x86();
        let mut compiler = ctx.compiler(func);
        Lower64Stage.run(&mut compiler).unwrap();

        let func = &compiler.func;
        let call = func
            .layout
            .block_insts(block)
            .find(|&i| func.dfg.insts[i].opcode == Opcode::Call)
            .unwrap();
        let data = &func.dfg.insts[call];
        assert_eq!(data.results.len(), 2);
        assert_eq!(data.operands.len(), 5);
    }
}
