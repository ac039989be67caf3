//! ARMv6 lowering, tweaks and fixed-register binding.
//!
//! ARMv6 has no divide instruction and this port is soft-float: integer
//! division, all double-precision work and the single-precision helpers
//! lower to runtime calls. Arguments travel in the outgoing stack area,
//! results come back in r0 (r0:r1 for pairs).

use super::regs;
use crate::ir::{
    CondCode, Function, Inst, InstData, IntCC, Opcode, Operand, OperandData, SymbolName, Ty,
};
use crate::result::{CodegenError, CodegenResult};
use crate::type_layout::TypeLayout;

fn before(func: &mut Function, at: Inst, data: InstData) -> Inst {
    let inst = func.dfg.make_inst(data);
    func.layout.insert_inst_before(inst, at);
    inst
}

fn insert_after(func: &mut Function, at: Inst, data: InstData) -> Inst {
    let inst = func.dfg.make_inst(data);
    func.layout.insert_inst_after(inst, at);
    inst
}

/// Lower the whole function to A32 nodes.
pub fn lower(func: &mut Function, layout: &TypeLayout) -> CodegenResult<()> {
    let blocks: Vec<_> = func.layout.blocks().collect();
    for block in blocks {
        let insts: Vec<_> = func.layout.block_insts(block).collect();
        for inst in insts {
            if func.dfg.insts[inst].is_empty_node() {
                continue;
            }
            lower_inst(func, layout, inst)?;
        }
    }
    Ok(())
}

fn runtime_binary(func: &mut Function, inst: Inst, data: &InstData, helper: &str) -> CodegenResult<()> {
    let args: Vec<Operand> = data.operands.to_vec();
    let target = func.dfg.symbol(SymbolName::new(helper), Ty::Ptr);
    let staged = stage_call(func, inst, target, &args, &data.results)?;
    func.dfg.insts[inst] = staged;
    Ok(())
}

fn lower_inst(func: &mut Function, layout: &TypeLayout, inst: Inst) -> CodegenResult<()> {
    use Opcode::*;
    let data = func.dfg.insts[inst].clone();
    let mut replace = |func: &mut Function, opcode| {
        let mut d = data.clone();
        d.opcode = opcode;
        func.dfg.insts[inst] = d;
    };

    match data.opcode {
        Nop => {}
        Phi => {
            return Err(CodegenError::Verifier(
                "phi reached platform lowering".to_string(),
            ))
        }
        Move32 | MoveObject | MoveR4 => replace(func, A32Mov),
        MoveCompound => {
            let size = layout.ty_size(func.dfg.ty(data.results[0]));
            let dst = func.dfg.make_virtual_reg(Ty::Ptr);
            before(func, inst, Function::inst_unary(A32Lea, dst, data.results[0]));
            let src = func.dfg.make_virtual_reg(Ty::Ptr);
            before(func, inst, Function::inst_unary(A32Lea, src, data.operands[0]));
            let size_const = func.dfg.iconst32(size as i32);
            let target = func.dfg.symbol(SymbolName::from("mosa_rt_memcpy"), Ty::Ptr);
            let staged = stage_call(func, inst, target, &[dst, src, size_const], &[])?;
            func.dfg.insts[inst] = staged;
        }
        LoadParam => {
            let ty = func.dfg.ty(data.results[0]);
            if ty == Ty::R8 {
                return Err(double_precision_unsupported());
            }
            if let Ty::Value(t) = ty {
                if layout.is_stored_on_stack(t) {
                    let size = layout.type_size(t);
                    let dst = func.dfg.make_virtual_reg(Ty::Ptr);
                    before(func, inst, Function::inst_unary(A32Lea, dst, data.results[0]));
                    let src = func.dfg.make_virtual_reg(Ty::Ptr);
                    before(func, inst, Function::inst_unary(A32Lea, src, data.operands[0]));
                    let size_const = func.dfg.iconst32(size as i32);
                    let target =
                        func.dfg.symbol(SymbolName::from("mosa_rt_memcpy"), Ty::Ptr);
                    let staged =
                        stage_call(func, inst, target, &[dst, src, size_const], &[])?;
                    func.dfg.insts[inst] = staged;
                    return Ok(());
                }
            }
            let zero = func.dfg.iconst32(0);
            let mut d = InstData::new(A32Ldr);
            d.results.push(data.results[0]);
            d.operands.push(data.operands[0]);
            d.operands.push(zero);
            func.dfg.insts[inst] = d;
        }
        AddressOf => replace(func, A32Lea),

        Add32 => replace(func, A32Add),
        Sub32 => replace(func, A32Sub),
        AddCarryOut32 => {
            let mut d = data.clone();
            d.opcode = A32Add;
            d.results.truncate(1);
            func.dfg.insts[inst] = d;
        }
        AddWithCarry32 => {
            let mut d = data.clone();
            d.opcode = A32Adc;
            d.operands.truncate(2);
            func.dfg.insts[inst] = d;
        }
        SubCarryOut32 => {
            let mut d = data.clone();
            d.opcode = A32Sub;
            d.results.truncate(1);
            func.dfg.insts[inst] = d;
        }
        SubWithCarry32 => {
            let mut d = data.clone();
            d.opcode = A32Sbc;
            d.operands.truncate(2);
            func.dfg.insts[inst] = d;
        }
        MulSigned32 => replace(func, A32Mul),
        MulHighUnsigned32 => replace(func, A32Umull),
        DivSigned32 => runtime_binary(func, inst, &data, "mosa_rt_sdiv32")?,
        DivUnsigned32 => runtime_binary(func, inst, &data, "mosa_rt_udiv32")?,
        RemSigned32 => runtime_binary(func, inst, &data, "mosa_rt_srem32")?,
        RemUnsigned32 => runtime_binary(func, inst, &data, "mosa_rt_urem32")?,
        And32 => replace(func, A32And),
        Or32 => replace(func, A32Orr),
        Xor32 => replace(func, A32Eor),
        Not32 => replace(func, A32Mvn),
        ShiftLeft32 => replace(func, A32Lsl),
        ShiftRight32 => replace(func, A32Lsr),
        ArithShiftRight32 => replace(func, A32Asr),

        AddR4 => runtime_binary(func, inst, &data, "mosa_rt_addr4")?,
        SubR4 => runtime_binary(func, inst, &data, "mosa_rt_subr4")?,
        MulR4 => runtime_binary(func, inst, &data, "mosa_rt_mulr4")?,
        DivR4 => runtime_binary(func, inst, &data, "mosa_rt_divr4")?,
        AddR8 | SubR8 | MulR8 | DivR8 | MoveR8 | CompareR8 | ConvertI32ToR8
        | ConvertR4ToR8 | ConvertR8ToR4 | ConvertR8ToI32 | LoadR8 | StoreR8 => {
            return Err(double_precision_unsupported());
        }

        CompareInt32 => {
            let mut cmp = InstData::new(A32Cmp);
            cmp.operands.push(data.operands[0]);
            cmp.operands.push(data.operands[1]);
            before(func, inst, cmp);
            let mut cset = InstData::new(A32Cset);
            cset.results.push(data.results[0]);
            cset.cc = data.cc;
            func.dfg.insts[inst] = cset;
        }
        CompareR4 => lower_float_compare(func, inst, &data)?,
        CompareIntBranch32 => {
            let mut cmp = InstData::new(A32Cmp);
            cmp.operands.push(data.operands[0]);
            cmp.operands.push(data.operands[1]);
            before(func, inst, cmp);
            let mut bcc = InstData::new(A32Bcc);
            bcc.cc = data.cc;
            bcc.blocks = data.blocks.clone();
            func.dfg.insts[inst] = bcc;
        }
        Jmp => replace(func, A32B),
        Switch => {
            let index = data.operands[0];
            let (cases, default) = data.blocks.split_at(data.blocks.len() - 1);
            for (i, &target) in cases.iter().enumerate() {
                let case = func.dfg.iconst32(i as i32);
                let mut cmp = InstData::new(A32Cmp);
                cmp.operands.push(index);
                cmp.operands.push(case);
                before(func, inst, cmp);
                let mut bcc = InstData::new(A32Bcc);
                bcc.cc = Some(CondCode::Int(IntCC::Equal));
                bcc.blocks.push(target);
                before(func, inst, bcc);
            }
            let mut b = InstData::new(A32B);
            b.blocks.push(default[0]);
            func.dfg.insts[inst] = b;
        }
        Return | ReturnVoid => {
            let mut ret = InstData::new(A32Ret);
            ret.operands = data.operands.clone();
            func.dfg.insts[inst] = ret;
        }
        Call => {
            let target = data.operands[0];
            let args: Vec<Operand> = data.operands[1..].to_vec();
            let staged = stage_call(func, inst, target, &args, &data.results)?;
            func.dfg.insts[inst] = staged;
        }

        SignExtend8x32 => replace(func, A32Sxtb),
        SignExtend16x32 => replace(func, A32Sxth),
        ZeroExtend8x32 => replace(func, A32Uxtb),
        ZeroExtend16x32 => replace(func, A32Uxth),
        ConvertI32ToR4 => runtime_binary(func, inst, &data, "mosa_rt_i2r4")?,
        ConvertR4ToI32 => runtime_binary(func, inst, &data, "mosa_rt_r42i")?,

        Load32 | LoadR4 => replace(func, A32Ldr),
        LoadSignExtend8x32 => replace(func, A32Ldrsb),
        LoadSignExtend16x32 => replace(func, A32Ldrsh),
        LoadZeroExtend8x32 => replace(func, A32Ldrb),
        LoadZeroExtend16x32 => replace(func, A32Ldrh),
        LoadCompound => {
            let dst = data.results[0];
            let size = layout.ty_size(func.dfg.ty(dst));
            let dst_addr = func.dfg.make_virtual_reg(Ty::Ptr);
            before(func, inst, Function::inst_unary(A32Lea, dst_addr, dst));
            let src_addr = address_of(func, inst, data.operands[0], data.operands[1]);
            let size_const = func.dfg.iconst32(size as i32);
            let target = func.dfg.symbol(SymbolName::from("mosa_rt_memcpy"), Ty::Ptr);
            let staged = stage_call(func, inst, target, &[dst_addr, src_addr, size_const], &[])?;
            func.dfg.insts[inst] = staged;
        }
        Store8 => replace(func, A32Strb),
        Store16 => replace(func, A32Strh),
        Store32 | StoreR4 => replace(func, A32Str),
        StoreCompound => {
            let value = data.operands[2];
            let size = layout.ty_size(func.dfg.ty(value));
            let src_addr = func.dfg.make_virtual_reg(Ty::Ptr);
            before(func, inst, Function::inst_unary(A32Lea, src_addr, value));
            let dst_addr = address_of(func, inst, data.operands[0], data.operands[1]);
            let size_const = func.dfg.iconst32(size as i32);
            let target = func.dfg.symbol(SymbolName::from("mosa_rt_memcpy"), Ty::Ptr);
            let staged = stage_call(func, inst, target, &[dst_addr, src_addr, size_const], &[])?;
            func.dfg.insts[inst] = staged;
        }

        already_lowered if already_lowered.name().starts_with("a32.") => {}
        other => {
            return Err(CodegenError::NotSupported(format!(
                "cannot lower {other} for armv6"
            )));
        }
    }
    Ok(())
}

fn double_precision_unsupported() -> CodegenError {
    CodegenError::NotSupported("double-precision arithmetic on the soft-float armv6 target".to_string())
}

/// `addr = base + offset` in a fresh register.
fn address_of(func: &mut Function, at: Inst, base: Operand, offset: Operand) -> Operand {
    let addr = func.dfg.make_virtual_reg(Ty::Ptr);
    before(func, at, Function::inst_unary(Opcode::A32Mov, addr, base));
    if func.dfg.operands[offset].constant_int() != Some(0) {
        before(
            func,
            at,
            Function::inst_binary(Opcode::A32Add, addr, addr, offset),
        );
    }
    addr
}

/// Float comparisons call the ordered-compare helpers and post-process
/// the 0/1 result.
fn lower_float_compare(func: &mut Function, inst: Inst, data: &InstData) -> CodegenResult<()> {
    use crate::ir::FloatCC::*;
    let cc = match data.cc {
        Some(CondCode::Float(cc)) => cc,
        _ => {
            return Err(CodegenError::Verifier(
                "float compare without float condition".to_string(),
            ))
        }
    };
    let (a, b) = (data.operands[0], data.operands[1]);
    // (helper, swapped operands, complemented result).
    let (helper, args, invert) = match cc {
        Equal => ("mosa_rt_feq4", [a, b], false),
        NotEqual => ("mosa_rt_feq4", [a, b], true),
        LessThan => ("mosa_rt_flt4", [a, b], false),
        GreaterThan => ("mosa_rt_flt4", [b, a], false),
        LessThanOrEqual => ("mosa_rt_fle4", [a, b], false),
        GreaterThanOrEqual => ("mosa_rt_fle4", [b, a], false),
        UnorderedOrLessThan => ("mosa_rt_fle4", [b, a], true),
        UnorderedOrGreaterThan => ("mosa_rt_fle4", [a, b], true),
        UnorderedOrLessThanOrEqual => ("mosa_rt_flt4", [b, a], true),
        UnorderedOrGreaterThanOrEqual => ("mosa_rt_flt4", [a, b], true),
    };
    let raw = func.dfg.make_virtual_reg(Ty::I32);
    let target = func.dfg.symbol(SymbolName::new(helper), Ty::Ptr);
    let staged = stage_call(func, inst, target, &args, &[raw])?;
    func.dfg.insts[inst] = staged;
    if invert {
        let one = func.dfg.iconst32(1);
        let flip = Function::inst_binary(Opcode::A32Eor, data.results[0], raw, one);
        insert_after(func, inst, flip);
    } else {
        let mv = Function::inst_unary(Opcode::A32Mov, data.results[0], raw);
        insert_after(func, inst, mv);
    }
    Ok(())
}

/// Stage outgoing arguments into the bottom of the stack. The staged call
/// node keeps the target and the argument-area size.
fn stage_call(
    func: &mut Function,
    inst: Inst,
    target: Operand,
    args: &[Operand],
    results: &[Operand],
) -> CodegenResult<InstData> {
    let mut total = 0u32;
    let mut offsets = Vec::with_capacity(args.len());
    for &arg in args {
        if func.dfg.ty(arg).is_value_type() {
            return Err(CodegenError::NotSupported(
                "passing a compound value by value in a call".to_string(),
            ));
        }
        offsets.push(total);
        total += 4;
    }
    let sp = func.dfg.cpu_reg(Ty::Ptr, regs::SP);
    if total > 0 {
        let amount = func.dfg.iconst32(total as i32);
        before(func, inst, Function::inst_binary(Opcode::A32Sub, sp, sp, amount));
        for (&arg, &offset) in args.iter().zip(offsets.iter()) {
            let off = func.dfg.iconst32(offset as i32);
            let mut store = InstData::new(Opcode::A32Str);
            store.operands.push(sp);
            store.operands.push(off);
            store.operands.push(arg);
            before(func, inst, store);
        }
    }
    let is_symbol = matches!(func.dfg.operands[target], OperandData::Symbol { .. });
    let mut call = InstData::new(if is_symbol {
        Opcode::A32Bl
    } else {
        Opcode::A32Blx
    });
    call.results.extend(results.iter().copied());
    call.operands.push(target);
    let total_const = func.dfg.iconst32(total as i32);
    call.operands.push(total_const);
    Ok(call)
}

// ---------------- tweaks ----------------

/// Constants that cannot ride in an A32 modified-immediate field move
/// into registers; shift counts coerce to 8-bit constants.
pub fn tweak(func: &mut Function) -> CodegenResult<()> {
    use Opcode::*;
    let blocks: Vec<_> = func.layout.blocks().collect();
    for block in blocks {
        let insts: Vec<_> = func.layout.block_insts(block).collect();
        for inst in insts {
            let data = func.dfg.insts[inst].clone();
            if data.is_empty_node() {
                continue;
            }
            match data.opcode {
                A32Cmp => {
                    constant_to_reg(func, inst, 0);
                    constant_to_reg_unless_imm(func, inst, 1);
                }
                A32Add | A32Adc | A32Sub | A32Sbc | A32And | A32Orr | A32Eor => {
                    constant_to_reg(func, inst, 0);
                    constant_to_reg_unless_imm(func, inst, 1);
                }
                A32Mul | A32Umull => {
                    constant_to_reg(func, inst, 0);
                    constant_to_reg(func, inst, 1);
                }
                A32Lsl | A32Lsr | A32Asr => {
                    constant_to_reg(func, inst, 0);
                    let count = data.operands[1];
                    if let Some(value) = func.dfg.operands[count].constant_int() {
                        let coerced = func.dfg.iconst(Ty::I8, value & 0xff);
                        func.dfg.insts[inst].operands[1] = coerced;
                    }
                }
                A32Str | A32Strb | A32Strh => {
                    constant_to_reg(func, inst, 0);
                    constant_to_reg(func, inst, 2);
                }
                A32Ldr | A32Ldrb | A32Ldrh | A32Ldrsb | A32Ldrsh => {
                    constant_to_reg(func, inst, 0);
                }
                A32Mvn | A32Sxtb | A32Sxth | A32Uxtb | A32Uxth => {
                    constant_to_reg(func, inst, 0);
                }
                _ => {}
            }
        }
    }
    Ok(())
}

/// Force `operands[slot]` into a register when it is a constant.
fn constant_to_reg(func: &mut Function, inst: Inst, slot: usize) {
    let operand = func.dfg.insts[inst].operands[slot];
    let is_const = func.dfg.operands[operand].is_constant()
        || matches!(func.dfg.operands[operand], OperandData::Symbol { .. });
    // Stack-slot bases stay; the emitter folds them into fp-relative
    // addressing.
    if !is_const {
        return;
    }
    let tmp = func.dfg.make_virtual_reg(Ty::I32);
    let mv = Function::inst_unary(Opcode::A32Mov, tmp, operand);
    before(func, inst, mv);
    func.dfg.insts[inst].operands[slot] = tmp;
}

/// Same, but A32 modified immediates may stay.
fn constant_to_reg_unless_imm(func: &mut Function, inst: Inst, slot: usize) {
    let operand = func.dfg.insts[inst].operands[slot];
    if let Some(value) = func.dfg.operands[operand].constant_int() {
        if super::emit::encode_imm(value as u32).is_some() {
            return;
        }
    }
    constant_to_reg(func, inst, slot);
}

// ---------------- fixed registers ----------------

/// Bind call and return values to r0/r1.
pub fn assign_fixed_registers(func: &mut Function) -> CodegenResult<()> {
    use Opcode::*;
    let blocks: Vec<_> = func.layout.blocks().collect();
    for block in blocks {
        let insts: Vec<_> = func.layout.block_insts(block).collect();
        for inst in insts {
            let data = func.dfg.insts[inst].clone();
            if data.is_empty_node() {
                continue;
            }
            match data.opcode {
                A32Bl | A32Blx => match data.results.len() {
                    0 => {}
                    1 => {
                        let result = data.results[0];
                        let r0 = func.dfg.cpu_reg(Ty::I32, regs::R0);
                        func.dfg.insts[inst].results[0] = r0;
                        insert_after(func, inst, Function::inst_unary(A32Mov, result, r0));
                    }
                    2 => {
                        let (lo, hi) = (data.results[0], data.results[1]);
                        let r0 = func.dfg.cpu_reg(Ty::I32, regs::R0);
                        let r1 = func.dfg.cpu_reg(Ty::I32, regs::R1);
                        {
                            let node = &mut func.dfg.insts[inst];
                            node.results[0] = r0;
                            node.results[1] = r1;
                        }
                        insert_after(func, inst, Function::inst_unary(A32Mov, hi, r1));
                        insert_after(func, inst, Function::inst_unary(A32Mov, lo, r0));
                    }
                    _ => {
                        return Err(CodegenError::Verifier(
                            "call with more than two results".to_string(),
                        ))
                    }
                },
                A32Ret => {
                    match data.operands.len() {
                        0 => {}
                        1 => {
                            let r0 = func.dfg.cpu_reg(Ty::I32, regs::R0);
                            let mv = Function::inst_unary(A32Mov, r0, data.operands[0]);
                            before(func, inst, mv);
                        }
                        2 => {
                            let r0 = func.dfg.cpu_reg(Ty::I32, regs::R0);
                            let r1 = func.dfg.cpu_reg(Ty::I32, regs::R1);
                            before(func, inst, Function::inst_unary(A32Mov, r0, data.operands[0]));
                            before(func, inst, Function::inst_unary(A32Mov, r1, data.operands[1]));
                        }
                        _ => {
                            return Err(CodegenError::Verifier(
                                "return with more than two operands".to_string(),
                            ))
                        }
                    }
                    func.dfg.insts[inst].operands.clear();
                }
                _ => {}
            }
        }
    }
    Ok(())
}
