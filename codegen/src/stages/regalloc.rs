//! Register allocation.
//!
//! A linear scan over coarse live intervals. Liveness runs per block,
//! intervals extend from the first definition or live-in boundary to the
//! last use or live-out boundary, so back edges are covered. Physical
//! registers mentioned by the fixed-register stage and everything
//! clobbered at call sites become blocked ranges the scan must steer
//! around; intervals that find no register spill to stack slots and their
//! use sites are patched through the platform's reserved scratch
//! registers.
//!
//! Compound virtual registers never go to registers at all: each gets a
//! stack slot, which is exactly what the address-based compound copies
//! expect.

use crate::compiler::{MethodCompiler, Stage};
use crate::ir::{
    Block, Function, Inst, Opcode, Operand, OperandData, StackSlot, StackSlotData, StackSlotKind,
};
use crate::isa::registers::{PReg, RegClass, RegisterSet};
use crate::isa::TargetIsa;
use crate::result::{CodegenError, CodegenResult};
use crate::type_layout::TypeLayout;
use rustc_hash::{FxHashMap, FxHashSet};

/// The register-allocation stage.
pub struct RegAllocStage;

impl Stage for RegAllocStage {
    fn name(&self) -> &'static str {
        "register-allocation"
    }

    fn run(&mut self, compiler: &mut MethodCompiler) -> CodegenResult<()> {
        let mut alloc = Allocator::new(compiler.isa, compiler.type_layout);
        alloc.run(&mut compiler.func)?;
        compiler.counters.update("regalloc.spills", alloc.spills);
        compiler
            .counters
            .update("regalloc.intervals", alloc.intervals_count);
        Ok(())
    }
}

#[derive(Clone, Copy, Debug)]
struct Interval {
    start: u32,
    end: u32,
}

impl Interval {
    fn overlaps(&self, other: &Interval) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

enum Assignment {
    Reg(PReg),
    Slot(StackSlot),
}

struct Allocator<'a> {
    isa: &'a dyn TargetIsa,
    layout: &'a TypeLayout,
    pub spills: u64,
    pub intervals_count: u64,
}

impl<'a> Allocator<'a> {
    fn new(isa: &'a dyn TargetIsa, layout: &'a TypeLayout) -> Self {
        Self {
            isa,
            layout,
            spills: 0,
            intervals_count: 0,
        }
    }

    fn run(&mut self, func: &mut Function) -> CodegenResult<()> {
        // 1. Linearize.
        let mut points: FxHashMap<Inst, u32> = FxHashMap::default();
        let mut block_range: FxHashMap<Block, (u32, u32)> = FxHashMap::default();
        let mut next = 0u32;
        for block in func.layout.blocks() {
            let start = next;
            for inst in func.layout.block_insts(block) {
                if func.dfg.insts[inst].is_empty_node() {
                    continue;
                }
                points.insert(inst, next);
                next += 1;
            }
            block_range.insert(block, (start, next.saturating_sub(1).max(start)));
        }

        // 2. Per-block liveness over virtual registers.
        let (live_in, live_out) = self.liveness(func);

        // 3. Intervals.
        let mut intervals: FxHashMap<Operand, Interval> = FxHashMap::default();
        let mut extend = |operand: Operand, point: u32| {
            let entry = intervals.entry(operand).or_insert(Interval {
                start: point,
                end: point,
            });
            entry.start = entry.start.min(point);
            entry.end = entry.end.max(point);
        };
        for block in func.layout.blocks() {
            let &(bs, be) = &block_range[&block];
            for &v in &live_in[&block] {
                extend(v, bs);
            }
            for &v in &live_out[&block] {
                extend(v, be);
            }
            for inst in func.layout.block_insts(block) {
                let data = &func.dfg.insts[inst];
                if data.is_empty_node() {
                    continue;
                }
                let p = points[&inst];
                for &operand in data.operands.iter().chain(data.results.iter()) {
                    if func.dfg.operands[operand].is_virtual_reg() {
                        extend(operand, p);
                    }
                }
            }
        }
        self.intervals_count = intervals.len() as u64;

        // 4. Blocked ranges for physical registers.
        let mut blocked: FxHashMap<PReg, Vec<Interval>> = FxHashMap::default();
        let bank = self.isa.reg_bank();
        for block in func.layout.blocks() {
            for inst in func.layout.block_insts(block) {
                let data = &func.dfg.insts[inst];
                if data.is_empty_node() {
                    continue;
                }
                let p = points[&inst];
                let here = Interval { start: p, end: p };
                for &operand in data.operands.iter().chain(data.results.iter()) {
                    if let OperandData::CpuReg { reg, .. } = func.dfg.operands[operand] {
                        blocked.entry(reg).or_default().push(here);
                    }
                }
                if is_call(data.opcode) {
                    // Calls clobber every allocatable register.
                    for reg in bank
                        .int_regs
                        .iter()
                        .chain(bank.float_regs.iter())
                        .copied()
                        .filter(|r| {
                            let mask = match r.class() {
                                RegClass::Int => bank.allocatable_int,
                                RegClass::Float => bank.allocatable_float,
                            };
                            mask & (1 << r.hw_enc()) != 0
                        })
                    {
                        blocked.entry(reg).or_default().push(here);
                    }
                }
            }
        }

        // 5. Linear scan over the sorted intervals, drawing from the
        // free-register set and expiring active intervals as the scan
        // advances.
        let mut order: Vec<(Operand, Interval)> = intervals
            .iter()
            .map(|(&v, &iv)| (v, iv))
            .collect();
        order.sort_by_key(|&(v, iv)| (iv.start, v));

        let mut free = RegisterSet::from_bank(bank);
        let mut active: Vec<(Interval, PReg)> = Vec::new();
        let mut assignments: FxHashMap<Operand, Assignment> = FxHashMap::default();
        for &(vreg, interval) in &order {
            let ty = func.dfg.ty(vreg);
            if ty.is_value_type() {
                // Compounds always live in memory.
                let size = self.layout.ty_size(ty).max(1);
                let slot =
                    func.create_stack_slot(StackSlotData::new(StackSlotKind::Local, size));
                assignments.insert(vreg, Assignment::Slot(slot));
                continue;
            }
            active.retain(|&(iv, reg)| {
                if iv.end < interval.start {
                    free.free(reg);
                    false
                } else {
                    true
                }
            });

            let class = self.isa.reg_class_of(ty);
            let chosen = free.iter(bank, class).find(|r| {
                blocked
                    .get(r)
                    .map_or(true, |ranges| !ranges.iter().any(|b| b.overlaps(&interval)))
            });
            match chosen {
                Some(reg) => {
                    free.take(reg);
                    active.push((interval, reg));
                    assignments.insert(vreg, Assignment::Reg(reg));
                }
                None => {
                    let size = self
                        .layout
                        .ty_size(ty)
                        .max(self.isa.ptr_size().min(4));
                    let slot =
                        func.create_stack_slot(StackSlotData::new(StackSlotKind::Spill, size));
                    assignments.insert(vreg, Assignment::Slot(slot));
                    self.spills += 1;
                }
            }
        }

        // 6. Rewrite operands and patch spilled uses through scratch.
        self.rewrite(func, &assignments)
    }

    fn liveness(
        &self,
        func: &Function,
    ) -> (
        FxHashMap<Block, FxHashSet<Operand>>,
        FxHashMap<Block, FxHashSet<Operand>>,
    ) {
        let blocks: Vec<Block> = func.layout.blocks().collect();
        let mut uses: FxHashMap<Block, FxHashSet<Operand>> = FxHashMap::default();
        let mut defs: FxHashMap<Block, FxHashSet<Operand>> = FxHashMap::default();
        for &block in &blocks {
            let mut u = FxHashSet::default();
            let mut d = FxHashSet::default();
            for inst in func.layout.block_insts(block) {
                let data = &func.dfg.insts[inst];
                if data.is_empty_node() {
                    continue;
                }
                for &operand in &data.operands {
                    if func.dfg.operands[operand].is_virtual_reg() && !d.contains(&operand) {
                        u.insert(operand);
                    }
                }
                for &result in &data.results {
                    if func.dfg.operands[result].is_virtual_reg() {
                        d.insert(result);
                    }
                }
            }
            uses.insert(block, u);
            defs.insert(block, d);
        }

        let mut live_in: FxHashMap<Block, FxHashSet<Operand>> = blocks
            .iter()
            .map(|&b| (b, FxHashSet::default()))
            .collect();
        let mut live_out: FxHashMap<Block, FxHashSet<Operand>> = blocks
            .iter()
            .map(|&b| (b, FxHashSet::default()))
            .collect();
        let mut changed = true;
        while changed {
            changed = false;
            for &block in blocks.iter().rev() {
                let mut out = FxHashSet::default();
                for succ in func.block_successors(block) {
                    if let Some(succ_in) = live_in.get(&succ) {
                        out.extend(succ_in.iter().copied());
                    }
                }
                let mut inn: FxHashSet<Operand> = uses[&block].clone();
                for &v in &out {
                    if !defs[&block].contains(&v) {
                        inn.insert(v);
                    }
                }
                if out != live_out[&block] {
                    live_out.insert(block, out);
                    changed = true;
                }
                if inn != live_in[&block] {
                    live_in.insert(block, inn);
                    changed = true;
                }
            }
        }
        (live_in, live_out)
    }

    fn rewrite(
        &mut self,
        func: &mut Function,
        assignments: &FxHashMap<Operand, Assignment>,
    ) -> CodegenResult<()> {
        let mut reg_operands: FxHashMap<Operand, Operand> = FxHashMap::default();
        let mut slot_operands: FxHashMap<Operand, Operand> = FxHashMap::default();

        let blocks: Vec<Block> = func.layout.blocks().collect();
        for block in blocks {
            let insts: Vec<Inst> = func.layout.block_insts(block).collect();
            for inst in insts {
                if func.dfg.insts[inst].is_empty_node() {
                    continue;
                }

                // Substitute assignments.
                let operand_count = func.dfg.insts[inst].operands.len();
                let result_count = func.dfg.insts[inst].results.len();
                for slot in 0..operand_count + result_count {
                    let (is_result, index) = if slot < operand_count {
                        (false, slot)
                    } else {
                        (true, slot - operand_count)
                    };
                    let operand = if is_result {
                        func.dfg.insts[inst].results[index]
                    } else {
                        func.dfg.insts[inst].operands[index]
                    };
                    if !func.dfg.operands[operand].is_virtual_reg() {
                        continue;
                    }
                    let ty = func.dfg.ty(operand);
                    let new = match assignments.get(&operand) {
                        Some(Assignment::Reg(reg)) => *reg_operands
                            .entry(operand)
                            .or_insert_with(|| func.dfg.cpu_reg(ty, *reg)),
                        Some(Assignment::Slot(stack_slot)) => {
                            let stack_slot = *stack_slot;
                            *slot_operands
                                .entry(operand)
                                .or_insert_with(|| func.dfg.stack_local(ty, stack_slot))
                        }
                        None => {
                            return Err(CodegenError::Verifier(
                                "virtual register without an interval".to_string(),
                            ))
                        }
                    };
                    if is_result {
                        func.dfg.insts[inst].results[index] = new;
                    } else {
                        func.dfg.insts[inst].operands[index] = new;
                    }
                }

                self.patch_spills(func, inst)?;
            }
        }
        Ok(())
    }

    /// Route stack-resident operands through scratch registers wherever
    /// the opcode demands a register.
    fn patch_spills(&mut self, func: &mut Function, inst: Inst) -> CodegenResult<()> {
        let data = func.dfg.insts[inst].clone();
        let allowance = memory_allowance(data.opcode);
        let mut memory_kept = false;

        // Uses draw scratch registers from the front, definitions from
        // the back, so a multiply's two results never collide with its
        // remaining source.
        let mut use_scratch = 0usize;
        let mut def_scratch_from_back = 0usize;

        // Two-address shapes share one scratch for the read and write of
        // the same slot.
        let mut shared: FxHashMap<Operand, Operand> = FxHashMap::default();

        let operand_count = data.operands.len();
        for index in 0..operand_count {
            let operand = data.operands[index];
            let (slot, ty) = match &func.dfg.operands[operand] {
                OperandData::StackLocal { slot, ty } => (*slot, *ty),
                _ => continue,
            };
            if allows_memory(&allowance, false, index, &mut memory_kept) {
                continue;
            }
            let scratch_reg = if let Some(&existing) = shared.get(&operand) {
                func.dfg.insts[inst].operands[index] = existing;
                continue;
            } else {
                let class = self.isa.reg_class_of(ty);
                let list = self.isa.scratch_regs(class);
                if use_scratch >= list.len() {
                    return Err(CodegenError::Verifier(
                        "ran out of spill scratch registers".to_string(),
                    ));
                }
                let r = list[use_scratch];
                use_scratch += 1;
                r
            };
            let scratch = func.dfg.cpu_reg(ty, scratch_reg);
            shared.insert(operand, scratch);
            let load = self.isa.make_spill_load(func, ty, slot, scratch);
            let load = func.dfg.make_inst(load);
            func.layout.insert_inst_before(load, inst);
            func.dfg.insts[inst].operands[index] = scratch;
        }

        let result_count = data.results.len();
        for index in 0..result_count {
            let result = data.results[index];
            let (slot, ty) = match &func.dfg.operands[result] {
                OperandData::StackLocal { slot, ty } => (*slot, *ty),
                _ => continue,
            };
            if allows_memory(&allowance, true, index, &mut memory_kept) {
                continue;
            }
            let scratch = if let Some(&existing) = shared.get(&result) {
                existing
            } else {
                let class = self.isa.reg_class_of(ty);
                let list = self.isa.scratch_regs(class);
                if def_scratch_from_back >= list.len() {
                    return Err(CodegenError::Verifier(
                        "ran out of spill scratch registers".to_string(),
                    ));
                }
                let r = list[list.len() - 1 - def_scratch_from_back];
                def_scratch_from_back += 1;
                func.dfg.cpu_reg(ty, r)
            };
            let store = self.isa.make_spill_store(func, ty, slot, scratch);
            let store = func.dfg.make_inst(store);
            func.layout.insert_inst_after(store, inst);
            func.dfg.insts[inst].results[index] = scratch;
        }
        Ok(())
    }
}

fn is_call(opcode: Opcode) -> bool {
    matches!(
        opcode,
        Opcode::X86Call | Opcode::A32Bl | Opcode::A32Blx | Opcode::A64Bl | Opcode::A64Blr
    )
}

/// Where an opcode tolerates a stack-resident operand.
enum Allowance {
    /// At most one register/memory slot, anywhere.
    AnyOne,
    /// Exactly these operand positions (never results).
    Operands(&'static [usize]),
    /// Registers only.
    None,
}

fn memory_allowance(opcode: Opcode) -> Allowance {
    use Opcode::*;
    match opcode {
        // One r/m slot in the x86 forms.
        X86Mov | X86Movss | X86Movsd | X86Add | X86Adc | X86Sub | X86Sbb | X86And | X86Or
        | X86Xor | X86Cmp | X86Imul | X86Not | X86Shl | X86Shr | X86Sar | X86Push
        | X86Ucomiss | X86Ucomisd | X86Addss | X86Addsd | X86Subss | X86Subsd | X86Mulss
        | X86Mulsd | X86Divss | X86Divsd | X86Movsx8 | X86Movsx16 | X86Movzx8 | X86Movzx16
        | X86Movsxd | X86Cvtsi2ss | X86Cvtsi2sd | X86Cvttss2si | X86Cvttsd2si | X86Cvtss2sd
        | X86Cvtsd2ss | X86Call | X86Mul | X86Idiv | X86Div => Allowance::AnyOne,
        // Address-forming operands.
        X86Lea | A32Lea | A64Lea => Allowance::Operands(&[0]),
        // Load/store bases fold into frame addressing.
        X86MovLoad | X86MovStore | X86MovsxLoad8 | X86MovsxLoad16 | X86MovzxLoad8
        | X86MovzxLoad16 | X86MovssLoad | X86MovssStore | X86MovsdLoad | X86MovsdStore
        | A32Ldr | A32Ldrb | A32Ldrh | A32Ldrsb | A32Ldrsh | A32Str | A32Strb | A32Strh
        | A64Ldr | A64Ldrb | A64Ldrh | A64Ldrsb | A64Ldrsh | A64LdrF | A64Str | A64Strb
        | A64Strh | A64StrF => Allowance::Operands(&[0]),
        _ => Allowance::None,
    }
}

fn allows_memory(
    allowance: &Allowance,
    is_result: bool,
    index: usize,
    memory_kept: &mut bool,
) -> bool {
    match allowance {
        Allowance::AnyOne => {
            if *memory_kept {
                false
            } else {
                *memory_kept = true;
                true
            }
        }
        Allowance::Operands(positions) => !is_result && positions.contains(&index),
        Allowance::None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Stage as _;
    use crate::ir::{InstData, SymbolName, Ty};
    use crate::stages::{
        fixed_regs::FixedRegistersStage, lowering::LoweringStage, tweak::TweakStage,
    };
    use crate::testutil::TestContext;

    fn build_sum_chain(func: &mut Function, terms: usize) {
        let block = func.dfg.make_block();
        func.layout.append_block(block);
        let mut acc = func.dfg.iconst32(1);
        for i in 0..terms {
            let v = func.dfg.make_virtual_reg(Ty::I32);
            let c = func.dfg.iconst32(i as i32);
            func.append_inst(block, Function::inst_binary(Opcode::Add32, v, acc, c));
            acc = v;
        }
        let mut ret = InstData::new(Opcode::Return);
        ret.operands.push(acc);
        func.append_inst(block, ret);
    }

    fn run_backend_pipeline(ctx: &TestContext, func: Function) -> Function {
        let mut compiler = ctx.compiler(func);
        LoweringStage.run(&mut compiler).unwrap();
        TweakStage.run(&mut compiler).unwrap();
        FixedRegistersStage.run(&mut compiler).unwrap();
        RegAllocStage.run(&mut compiler).unwrap();
        compiler.func
    }

    #[test]
    fn no_virtual_registers_remain() {
        let ctx = TestContext::x86();
        let mut func = Function::new(SymbolName::from("t"));
        build_sum_chain(&mut func, 4);
        let func = run_backend_pipeline(&ctx, func);

        for block in func.layout.blocks() {
            for inst in func.layout.block_insts(block) {
                let data = &func.dfg.insts[inst];
                if data.is_empty_node() {
                    continue;
                }
                for &o in data.operands.iter().chain(data.results.iter()) {
                    assert!(
                        !func.dfg.operands[o].is_virtual_reg(),
                        "virtual register survived allocation in {}",
                        data.opcode
                    );
                }
            }
        }
    }

    #[test]
    fn values_live_across_calls_are_spilled() {
        let ctx = TestContext::x86();
        let mut func = Function::new(SymbolName::from("t"));
        let block = func.dfg.make_block();
        func.layout.append_block(block);
        let v = func.dfg.make_virtual_reg(Ty::I32);
        let one = func.dfg.iconst32(1);
        func.append_inst(block, Function::inst_unary(Opcode::Move32, v, one));
        let callee = func.dfg.symbol(SymbolName::from("callee"), Ty::Ptr);
        let r = func.dfg.make_virtual_reg(Ty::I32);
        let mut call = InstData::new(Opcode::Call);
        call.results.push(r);
        call.operands.push(callee);
        func.append_inst(block, call);
        // v is used after the call, so its interval crosses the clobber.
        let sum = func.dfg.make_virtual_reg(Ty::I32);
        func.append_inst(block, Function::inst_binary(Opcode::Add32, sum, v, r));
        let mut ret = InstData::new(Opcode::Return);
        ret.operands.push(sum);
        func.append_inst(block, ret);

        let mut compiler = ctx.compiler(func);
        LoweringStage.run(&mut compiler).unwrap();
        TweakStage.run(&mut compiler).unwrap();
        FixedRegistersStage.run(&mut compiler).unwrap();
        let mut stage = RegAllocStage;
        stage.run(&mut compiler).unwrap();
        assert!(compiler.counters.get("regalloc.spills") >= 1);
    }

    #[test]
    fn compound_registers_get_stack_slots() {
        // A context whose type system carries a 12-byte value type.
        let mut ts = crate::typesys::TypeSystem::with_corlib();
        let vt = ts.lookup("System.ValueType").unwrap();
        let i4 = ts.lookup("System.Int32").unwrap();
        let big = ts.add_type(crate::typesys::TypeData::value_type("Big", Some(vt)));
        for name in ["a", "b", "c"] {
            ts.add_field(big, crate::typesys::FieldData::new(name, i4));
        }
        let object = ts.lookup("System.Object").unwrap();
        let holder = ts.add_type(crate::typesys::TypeData::class("T", Some(object)));
        let method = ts.add_method(
            holder,
            crate::typesys::MethodData::new("M", crate::typesys::MethodSig::default())
                .static_()
                .with_body(crate::cil::CilBody::default()),
        );
        let ts = std::sync::Arc::new(ts);
        let isa = crate::isa::lookup(&"i686-unknown-none".parse().unwrap()).unwrap();
        let type_layout = crate::type_layout::TypeLayout::new(ts.clone(), 4, 4);
        let ctx = TestContext {
            type_system: ts,
            type_layout,
            isa,
            options: crate::settings::Options::no_opt(),
            method,
        };

        let mut func = Function::new(SymbolName::from("t"));
        let block = func.dfg.make_block();
        func.layout.append_block(block);
        let a = func.dfg.make_virtual_reg(Ty::Value(big));
        let b = func.dfg.make_virtual_reg(Ty::Value(big));
        func.append_inst(block, Function::inst_unary(Opcode::MoveCompound, b, a));
        func.append_inst(block, InstData::new(Opcode::ReturnVoid));

        let func = run_backend_pipeline(&ctx, func);
        // Both compounds were assigned 12-byte stack slots.
        let compound_slots = func
            .stack_slots
            .values()
            .filter(|s| s.kind == StackSlotKind::Local && s.size == 12)
            .count();
        assert_eq!(compound_slots, 2);
    }
}
