//! AArch64 lowering, tweaks and fixed-register binding.

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

/// Lower the whole function to A64 nodes.
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

fn lower_inst(func: &mut Function, layout: &TypeLayout, inst: Inst) -> CodegenResult<()> {
    use Opcode::*;
    let data = func.dfg.insts[inst].clone();
    let mut replace = |func: &mut Function, opcode, ty: Option<Ty>| {
        let mut d = data.clone();
        d.opcode = opcode;
        d.ty = ty;
        func.dfg.insts[inst] = d;
    };

    match data.opcode {
        Nop => {}
        Phi => {
            return Err(CodegenError::Verifier(
                "phi reached platform lowering".to_string(),
            ))
        }
        Move32 => replace(func, A64Mov, Some(Ty::I32)),
        Move64 | MoveObject => replace(func, A64Mov, Some(Ty::I64)),
        MoveR4 => replace(func, A64FMov, Some(Ty::R4)),
        MoveR8 => replace(func, A64FMov, Some(Ty::R8)),
        MoveCompound => {
            let size = layout.ty_size(func.dfg.ty(data.results[0]));
            let dst = func.dfg.make_virtual_reg(Ty::Ptr);
            before(func, inst, Function::inst_unary(A64Lea, dst, data.results[0]));
            let src = func.dfg.make_virtual_reg(Ty::Ptr);
            before(func, inst, Function::inst_unary(A64Lea, src, data.operands[0]));
            emit_memcpy(func, inst, dst, src, size)?;
        }
        LoadParam => {
            let ty = func.dfg.ty(data.results[0]);
            let zero = func.dfg.iconst32(0);
            let (opcode, ty) = match ty {
                Ty::R4 => (A64LdrF, Ty::R4),
                Ty::R8 => (A64LdrF, Ty::R8),
                Ty::Value(t) if layout.is_stored_on_stack(t) => {
                    let size = layout.type_size(t);
                    let dst = func.dfg.make_virtual_reg(Ty::Ptr);
                    before(func, inst, Function::inst_unary(A64Lea, dst, data.results[0]));
                    let src = func.dfg.make_virtual_reg(Ty::Ptr);
                    before(func, inst, Function::inst_unary(A64Lea, src, data.operands[0]));
                    return emit_memcpy(func, inst, dst, src, size);
                }
                other => (A64Ldr, width_of(other)),
            };
            let mut d = InstData::new(opcode);
            d.ty = Some(ty);
            d.results.push(data.results[0]);
            d.operands.push(data.operands[0]);
            d.operands.push(zero);
            func.dfg.insts[inst] = d;
        }
        AddressOf => replace(func, A64Lea, None),

        Add32 => replace(func, A64Add, Some(Ty::I32)),
        Add64 => replace(func, A64Add, Some(Ty::I64)),
        Sub32 => replace(func, A64Sub, Some(Ty::I32)),
        Sub64 => replace(func, A64Sub, Some(Ty::I64)),
        MulSigned32 => replace(func, A64Mul, Some(Ty::I32)),
        MulSigned64 => replace(func, A64Mul, Some(Ty::I64)),
        DivSigned32 => replace(func, A64Sdiv, Some(Ty::I32)),
        DivSigned64 => replace(func, A64Sdiv, Some(Ty::I64)),
        DivUnsigned32 => replace(func, A64Udiv, Some(Ty::I32)),
        DivUnsigned64 => replace(func, A64Udiv, Some(Ty::I64)),
        RemSigned32 | RemSigned64 | RemUnsigned32 | RemUnsigned64 => {
            // rem = a - (a / b) * b, the udiv/sdiv plus msub idiom.
            let ty = if matches!(data.opcode, RemSigned64 | RemUnsigned64) {
                Ty::I64
            } else {
                Ty::I32
            };
            let signed = matches!(data.opcode, RemSigned32 | RemSigned64);
            let (a, b) = (data.operands[0], data.operands[1]);
            let quot = func.dfg.make_virtual_reg(func.dfg.ty(data.results[0]));
            let mut div = Function::inst_binary(
                if signed { A64Sdiv } else { A64Udiv },
                quot,
                a,
                b,
            );
            div.ty = Some(ty);
            before(func, inst, div);
            let mut msub = InstData::new(A64Msub);
            msub.ty = Some(ty);
            msub.results.push(data.results[0]);
            msub.operands.push(quot);
            msub.operands.push(b);
            msub.operands.push(a);
            func.dfg.insts[inst] = msub;
        }
        And32 => replace(func, A64And, Some(Ty::I32)),
        And64 => replace(func, A64And, Some(Ty::I64)),
        Or32 => replace(func, A64Orr, Some(Ty::I32)),
        Or64 => replace(func, A64Orr, Some(Ty::I64)),
        Xor32 => replace(func, A64Eor, Some(Ty::I32)),
        Xor64 => replace(func, A64Eor, Some(Ty::I64)),
        Not32 => replace(func, A64Mvn, Some(Ty::I32)),
        Not64 => replace(func, A64Mvn, Some(Ty::I64)),
        ShiftLeft32 => replace(func, A64Lsl, Some(Ty::I32)),
        ShiftLeft64 => replace(func, A64Lsl, Some(Ty::I64)),
        ShiftRight32 => replace(func, A64Lsr, Some(Ty::I32)),
        ShiftRight64 => replace(func, A64Lsr, Some(Ty::I64)),
        ArithShiftRight32 => replace(func, A64Asr, Some(Ty::I32)),
        ArithShiftRight64 => replace(func, A64Asr, Some(Ty::I64)),

        AddR4 => replace(func, A64FAdd, Some(Ty::R4)),
        AddR8 => replace(func, A64FAdd, Some(Ty::R8)),
        SubR4 => replace(func, A64FSub, Some(Ty::R4)),
        SubR8 => replace(func, A64FSub, Some(Ty::R8)),
        MulR4 => replace(func, A64FMul, Some(Ty::R4)),
        MulR8 => replace(func, A64FMul, Some(Ty::R8)),
        DivR4 => replace(func, A64FDiv, Some(Ty::R4)),
        DivR8 => replace(func, A64FDiv, Some(Ty::R8)),

        CompareInt32 | CompareInt64 => {
            let ty = if data.opcode == CompareInt64 {
                Ty::I64
            } else {
                Ty::I32
            };
            let mut cmp = InstData::new(A64Cmp);
            cmp.ty = Some(ty);
            cmp.operands.push(data.operands[0]);
            cmp.operands.push(data.operands[1]);
            before(func, inst, cmp);
            let mut cset = InstData::new(A64Cset);
            cset.results.push(data.results[0]);
            cset.cc = data.cc;
            func.dfg.insts[inst] = cset;
        }
        CompareR4 | CompareR8 => {
            let ty = if data.opcode == CompareR4 {
                Ty::R4
            } else {
                Ty::R8
            };
            let mut cmp = InstData::new(A64FCmp);
            cmp.ty = Some(ty);
            cmp.operands.push(data.operands[0]);
            cmp.operands.push(data.operands[1]);
            before(func, inst, cmp);
            let mut cset = InstData::new(A64Cset);
            cset.results.push(data.results[0]);
            cset.cc = data.cc;
            func.dfg.insts[inst] = cset;
        }
        CompareIntBranch32 | CompareIntBranch64 => {
            let ty = if data.opcode == CompareIntBranch64 {
                Ty::I64
            } else {
                Ty::I32
            };
            let mut cmp = InstData::new(A64Cmp);
            cmp.ty = Some(ty);
            cmp.operands.push(data.operands[0]);
            cmp.operands.push(data.operands[1]);
            before(func, inst, cmp);
            let mut bcc = InstData::new(A64Bcc);
            bcc.cc = data.cc;
            bcc.blocks = data.blocks.clone();
            func.dfg.insts[inst] = bcc;
        }
        Jmp => replace(func, A64B, None),
        Switch => {
            let index = data.operands[0];
            let (cases, default) = data.blocks.split_at(data.blocks.len() - 1);
            for (i, &target) in cases.iter().enumerate() {
                let case = func.dfg.iconst32(i as i32);
                let mut cmp = InstData::new(A64Cmp);
                cmp.ty = Some(Ty::I32);
                cmp.operands.push(index);
                cmp.operands.push(case);
                before(func, inst, cmp);
                let mut bcc = InstData::new(A64Bcc);
                bcc.cc = Some(CondCode::Int(IntCC::Equal));
                bcc.blocks.push(target);
                before(func, inst, bcc);
            }
            let mut b = InstData::new(A64B);
            b.blocks.push(default[0]);
            func.dfg.insts[inst] = b;
        }
        Return | ReturnVoid => {
            let mut ret = InstData::new(A64Ret);
            ret.operands = data.operands.clone();
            func.dfg.insts[inst] = ret;
        }
        Call => {
            let target = data.operands[0];
            let args: Vec<Operand> = data.operands[1..].to_vec();
            let staged = stage_call(func, inst, target, &args, &data.results)?;
            func.dfg.insts[inst] = staged;
        }

        SignExtend8x32 => replace(func, A64Sxt, Some(Ty::I8)),
        SignExtend16x32 => replace(func, A64Sxt, Some(Ty::I16)),
        SignExtend32x64 => replace(func, A64Sxt, Some(Ty::I64)),
        ZeroExtend8x32 => replace(func, A64Uxt, Some(Ty::I8)),
        ZeroExtend16x32 => replace(func, A64Uxt, Some(Ty::I16)),
        // A 32-bit register move zero-extends.
        ZeroExtend32x64 | Truncate64x32 => replace(func, A64Mov, Some(Ty::I32)),
        GetLow64 | GetHigh64 | Pack64 => {
            return Err(CodegenError::Verifier(format!(
                "{} on a 64-bit target",
                data.opcode
            )));
        }
        ConvertI32ToR4 => replace(func, A64Scvtf, Some(Ty::R4)),
        ConvertI32ToR8 | ConvertI64ToR8 => replace(func, A64Scvtf, Some(Ty::R8)),
        ConvertR4ToI32 | ConvertR8ToI32 => replace(func, A64Fcvtzs, Some(Ty::I32)),
        ConvertR4ToR8 => replace(func, A64Fcvt, Some(Ty::R8)),
        ConvertR8ToR4 => replace(func, A64Fcvt, Some(Ty::R4)),

        Load32 => replace(func, A64Ldr, Some(Ty::I32)),
        Load64 => replace(func, A64Ldr, Some(Ty::I64)),
        LoadR4 => replace(func, A64LdrF, Some(Ty::R4)),
        LoadR8 => replace(func, A64LdrF, Some(Ty::R8)),
        LoadSignExtend8x32 => replace(func, A64Ldrsb, Some(Ty::I32)),
        LoadSignExtend16x32 => replace(func, A64Ldrsh, Some(Ty::I32)),
        LoadZeroExtend8x32 => replace(func, A64Ldrb, Some(Ty::I32)),
        LoadZeroExtend16x32 => replace(func, A64Ldrh, Some(Ty::I32)),
        LoadCompound => {
            let dst = data.results[0];
            let size = layout.ty_size(func.dfg.ty(dst));
            let dst_addr = func.dfg.make_virtual_reg(Ty::Ptr);
            before(func, inst, Function::inst_unary(A64Lea, dst_addr, dst));
            let src_addr = address_of(func, inst, data.operands[0], data.operands[1]);
            emit_memcpy(func, inst, dst_addr, src_addr, size)?;
        }
        Store8 => replace(func, A64Strb, Some(Ty::I32)),
        Store16 => replace(func, A64Strh, Some(Ty::I32)),
        Store32 => replace(func, A64Str, Some(Ty::I32)),
        Store64 => replace(func, A64Str, Some(Ty::I64)),
        StoreR4 => replace(func, A64StrF, Some(Ty::R4)),
        StoreR8 => replace(func, A64StrF, Some(Ty::R8)),
        StoreCompound => {
            let value = data.operands[2];
            let size = layout.ty_size(func.dfg.ty(value));
            let src_addr = func.dfg.make_virtual_reg(Ty::Ptr);
            before(func, inst, Function::inst_unary(A64Lea, src_addr, value));
            let dst_addr = address_of(func, inst, data.operands[0], data.operands[1]);
            emit_memcpy(func, inst, dst_addr, src_addr, size)?;
        }

        already_lowered if already_lowered.name().starts_with("a64.") => {}
        other => {
            return Err(CodegenError::NotSupported(format!(
                "cannot lower {other} for armv8"
            )));
        }
    }
    Ok(())
}

fn width_of(ty: Ty) -> Ty {
    match ty {
        Ty::I64 | Ty::Ptr | Ty::Object => Ty::I64,
        _ => Ty::I32,
    }
}

fn address_of(func: &mut Function, at: Inst, base: Operand, offset: Operand) -> Operand {
    let addr = func.dfg.make_virtual_reg(Ty::Ptr);
    let mut mv = Function::inst_unary(Opcode::A64Mov, addr, base);
    mv.ty = Some(Ty::I64);
    before(func, at, mv);
    if func.dfg.operands[offset].constant_int() != Some(0) {
        let mut add = Function::inst_binary(Opcode::A64Add, addr, addr, offset);
        add.ty = Some(Ty::I64);
        before(func, at, add);
    }
    addr
}

fn emit_memcpy(
    func: &mut Function,
    inst: Inst,
    dst: Operand,
    src: Operand,
    size: u32,
) -> CodegenResult<()> {
    let size_const = func.dfg.iconst32(size as i32);
    let target = func.dfg.symbol(SymbolName::from("mosa_rt_memcpy"), Ty::Ptr);
    let staged = stage_call(func, inst, target, &[dst, src, size_const], &[])?;
    func.dfg.insts[inst] = staged;
    Ok(())
}

/// Stage outgoing arguments into the bottom of the stack.
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
        total += 8;
    }
    // Keep sp 16-aligned at the call.
    total = total.div_ceil(16) * 16;

    let sp = func.dfg.cpu_reg(Ty::Ptr, regs::SP);
    if total > 0 {
        let amount = func.dfg.iconst32(total as i32);
        let mut sub = Function::inst_binary(Opcode::A64Sub, sp, sp, amount);
        sub.ty = Some(Ty::I64);
        before(func, inst, sub);
        for (&arg, &offset) in args.iter().zip(offsets.iter()) {
            let off = func.dfg.iconst32(offset as i32);
            let ty = func.dfg.ty(arg);
            let (opcode, ty) = match ty {
                Ty::R4 => (Opcode::A64StrF, Ty::R4),
                Ty::R8 => (Opcode::A64StrF, Ty::R8),
                other => (Opcode::A64Str, width_of(other)),
            };
            let mut store = InstData::new(opcode);
            store.ty = Some(ty);
            store.operands.push(sp);
            store.operands.push(off);
            store.operands.push(arg);
            before(func, inst, store);
        }
    }
    let is_symbol = matches!(func.dfg.operands[target], OperandData::Symbol { .. });
    let mut call = InstData::new(if is_symbol {
        Opcode::A64Bl
    } else {
        Opcode::A64Blr
    });
    call.results.extend(results.iter().copied());
    call.operands.push(target);
    let total_const = func.dfg.iconst32(total as i32);
    call.operands.push(total_const);
    Ok(call)
}

// ---------------- tweaks ----------------

/// Arithmetic immediates may stay when they fit 12 bits; every other
/// constant moves into a register. Shifts are always by register.
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
                A64Add | A64Sub | A64Cmp => {
                    constant_to_reg(func, inst, 0, data.ty);
                    let rhs = data.operands[1];
                    let keep = func.dfg.operands[rhs]
                        .constant_int()
                        .is_some_and(|v| (0..4096).contains(&v));
                    if !keep {
                        constant_to_reg(func, inst, 1, data.ty);
                    }
                }
                A64Mul | A64Sdiv | A64Udiv | A64And | A64Orr | A64Eor | A64Lsl | A64Lsr
                | A64Asr => {
                    constant_to_reg(func, inst, 0, data.ty);
                    constant_to_reg(func, inst, 1, data.ty);
                }
                A64Msub => {
                    for slot in 0..3 {
                        constant_to_reg(func, inst, slot, data.ty);
                    }
                }
                A64Mvn | A64Sxt | A64Uxt | A64Scvtf | A64Fcvtzs | A64Fcvt => {
                    constant_to_reg(func, inst, 0, data.ty);
                }
                A64Str | A64Strb | A64Strh | A64StrF => {
                    constant_to_reg(func, inst, 0, Some(Ty::I64));
                    constant_to_reg(func, inst, 2, data.ty);
                }
                A64Ldr | A64Ldrb | A64Ldrh | A64Ldrsb | A64Ldrsh | A64LdrF => {
                    constant_to_reg(func, inst, 0, Some(Ty::I64));
                }
                A64FAdd | A64FSub | A64FMul | A64FDiv | A64FCmp => {
                    constant_to_reg(func, inst, 0, data.ty);
                    constant_to_reg(func, inst, 1, data.ty);
                }
                _ => {}
            }
        }
    }
    Ok(())
}

fn constant_to_reg(func: &mut Function, inst: Inst, slot: usize, ty: Option<Ty>) {
    let operand = func.dfg.insts[inst].operands[slot];
    let needs_reg = match &func.dfg.operands[operand] {
        OperandData::Constant { .. } | OperandData::Symbol { .. } => true,
        _ => false,
    };
    if !needs_reg {
        return;
    }
    let vreg_ty = match ty {
        Some(Ty::R4) => Ty::R4,
        Some(Ty::R8) => Ty::R8,
        Some(Ty::I64) => Ty::I64,
        _ => Ty::I32,
    };
    let tmp = func.dfg.make_virtual_reg(vreg_ty);
    let opcode = if vreg_ty.is_float() {
        Opcode::A64FMov
    } else {
        Opcode::A64Mov
    };
    let mut mv = Function::inst_unary(opcode, tmp, operand);
    mv.ty = ty.or(Some(Ty::I32));
    before(func, inst, mv);
    func.dfg.insts[inst].operands[slot] = tmp;
}

// ---------------- fixed registers ----------------

/// Bind call and return values to x0/v0.
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
                A64Bl | A64Blr => match data.results.len() {
                    0 => {}
                    1 => {
                        let result = data.results[0];
                        let ty = func.dfg.ty(result);
                        if ty.is_float() {
                            let v0 = func.dfg.cpu_reg(ty, regs::V0);
                            func.dfg.insts[inst].results[0] = v0;
                            let mut out = Function::inst_unary(A64FMov, result, v0);
                            out.ty = Some(ty);
                            insert_after(func, inst, out);
                        } else {
                            let x0 = func.dfg.cpu_reg(ty, regs::X0);
                            func.dfg.insts[inst].results[0] = x0;
                            let mut out = Function::inst_unary(A64Mov, result, x0);
                            out.ty = Some(width_of(ty));
                            insert_after(func, inst, out);
                        }
                    }
                    _ => {
                        return Err(CodegenError::Verifier(
                            "multi-result call on a 64-bit target".to_string(),
                        ))
                    }
                },
                A64Ret => {
                    match data.operands.len() {
                        0 => {}
                        1 => {
                            let value = data.operands[0];
                            let ty = func.dfg.ty(value);
                            if ty.is_float() {
                                let v0 = func.dfg.cpu_reg(ty, regs::V0);
                                let mut mv = Function::inst_unary(A64FMov, v0, value);
                                mv.ty = Some(ty);
                                before(func, inst, mv);
                            } else {
                                let x0 = func.dfg.cpu_reg(width_of(ty), regs::X0);
                                let mut mv = Function::inst_unary(A64Mov, x0, value);
                                mv.ty = Some(width_of(ty));
                                before(func, inst, mv);
                            }
                        }
                        _ => {
                            return Err(CodegenError::Verifier(
                                "multi-operand return on a 64-bit target".to_string(),
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
