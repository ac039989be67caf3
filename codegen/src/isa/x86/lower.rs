//! x86/x64 lowering, tweaks and fixed-register binding.
//!
//! Lowering replaces each generic node with one or more x86 nodes in
//! place. The tweak pass then enforces what the encoders cannot express:
//! two-address shapes, constants out of `cmp`'s left side, 8-bit shift
//! counts, call targets in registers. Finally the fixed-register pass
//! pins the operands the instruction set dictates (CL shift counts,
//! EDX:EAX for multiply/divide, EAX/XMM0 returns).

use super::regs;
use crate::ir::{
    CondCode, CondCodeOps, FloatCC, Function, Inst, InstData, IntCC, Opcode, Operand,
    OperandData, SymbolName, Ty,
};
use crate::result::{CodegenError, CodegenResult};
use crate::type_layout::TypeLayout;

fn before(func: &mut Function, at: Inst, data: InstData) -> Inst {
    let inst = func.dfg.make_inst(data);
    func.layout.insert_inst_before(inst, at);
    inst
}

fn width_ty(func: &Function, operand: Operand, ptr64: bool) -> Ty {
    match func.dfg.ty(operand) {
        Ty::I64 => Ty::I64,
        Ty::Ptr | Ty::Object if ptr64 => Ty::I64,
        Ty::R4 => Ty::R4,
        Ty::R8 => Ty::R8,
        _ => Ty::I32,
    }
}

/// Lower the whole function to x86 nodes.
pub fn lower(func: &mut Function, layout: &TypeLayout, x64: bool) -> CodegenResult<()> {
    let blocks: Vec<_> = func.layout.blocks().collect();
    for block in blocks {
        let insts: Vec<_> = func.layout.block_insts(block).collect();
        for inst in insts {
            if func.dfg.insts[inst].is_empty_node() {
                continue;
            }
            lower_inst(func, layout, inst, x64)?;
        }
    }
    Ok(())
}

fn lower_inst(func: &mut Function, layout: &TypeLayout, inst: Inst, x64: bool) -> CodegenResult<()> {
    use Opcode::*;
    let data = func.dfg.insts[inst].clone();
    let node = |opcode| {
        let mut d = data.clone();
        d.opcode = opcode;
        d
    };
    // The replacement for simple one-to-one cases: same slots, new opcode,
    // operand width recorded on the node.
    let mut replace = |func: &mut Function, opcode, ty: Option<Ty>| {
        let mut d = node(opcode);
        d.ty = ty;
        func.dfg.insts[inst] = d;
    };

    match data.opcode {
        Nop | Phi => {
            if data.opcode == Phi {
                return Err(CodegenError::Verifier(
                    "phi reached platform lowering".to_string(),
                ));
            }
        }
        Move32 => replace(func, X86Mov, Some(Ty::I32)),
        Move64 => replace(func, X86Mov, Some(Ty::I64)),
        MoveObject => {
            let ty = if x64 { Ty::I64 } else { Ty::I32 };
            replace(func, X86Mov, Some(ty));
        }
        MoveR4 => replace(func, X86Movss, Some(Ty::R4)),
        MoveR8 => replace(func, X86Movsd, Some(Ty::R8)),
        MoveCompound => {
            let size = layout.ty_size(func.dfg.ty(data.results[0]));
            lower_compound_copy(func, inst, data.results[0], data.operands[0], size, x64)?;
        }
        LoadParam => {
            let ty = func.dfg.ty(data.results[0]);
            match ty {
                Ty::R4 => replace(func, X86Movss, Some(Ty::R4)),
                Ty::R8 => replace(func, X86Movsd, Some(Ty::R8)),
                Ty::Value(t) if layout.is_stored_on_stack(t) => {
                    let size = layout.type_size(t);
                    lower_compound_copy(func, inst, data.results[0], data.operands[0], size, x64)?;
                }
                _ => replace(func, X86Mov, Some(width_ty(func, data.results[0], x64))),
            }
        }
        AddressOf => replace(func, X86Lea, None),

        Add32 => replace(func, X86Add, Some(Ty::I32)),
        Add64 => replace(func, X86Add, Some(Ty::I64)),
        Sub32 => replace(func, X86Sub, Some(Ty::I32)),
        Sub64 => replace(func, X86Sub, Some(Ty::I64)),
        AddCarryOut32 => {
            // The carry-out result lives in EFLAGS; only the sum remains.
            let mut d = node(X86Add);
            d.ty = Some(Ty::I32);
            d.results.truncate(1);
            func.dfg.insts[inst] = d;
        }
        AddWithCarry32 => {
            let mut d = node(X86Adc);
            d.ty = Some(Ty::I32);
            d.operands.truncate(2);
            func.dfg.insts[inst] = d;
        }
        SubCarryOut32 => {
            let mut d = node(X86Sub);
            d.ty = Some(Ty::I32);
            d.results.truncate(1);
            func.dfg.insts[inst] = d;
        }
        SubWithCarry32 => {
            let mut d = node(X86Sbb);
            d.ty = Some(Ty::I32);
            d.operands.truncate(2);
            func.dfg.insts[inst] = d;
        }
        MulSigned32 => replace(func, X86Imul, Some(Ty::I32)),
        MulSigned64 => replace(func, X86Imul, Some(Ty::I64)),
        MulHighUnsigned32 => replace(func, X86Mul, Some(Ty::I32)),
        DivSigned32 | DivSigned64 | RemSigned32 | RemSigned64 => {
            let ty = if matches!(data.opcode, DivSigned64 | RemSigned64) {
                Ty::I64
            } else {
                Ty::I32
            };
            let want_rem = matches!(data.opcode, RemSigned32 | RemSigned64);
            lower_division(func, inst, &data, ty, true, want_rem);
        }
        DivUnsigned32 | DivUnsigned64 | RemUnsigned32 | RemUnsigned64 => {
            let ty = if matches!(data.opcode, DivUnsigned64 | RemUnsigned64) {
                Ty::I64
            } else {
                Ty::I32
            };
            let want_rem = matches!(data.opcode, RemUnsigned32 | RemUnsigned64);
            lower_division(func, inst, &data, ty, false, want_rem);
        }
        And32 => replace(func, X86And, Some(Ty::I32)),
        And64 => replace(func, X86And, Some(Ty::I64)),
        Or32 => replace(func, X86Or, Some(Ty::I32)),
        Or64 => replace(func, X86Or, Some(Ty::I64)),
        Xor32 => replace(func, X86Xor, Some(Ty::I32)),
        Xor64 => replace(func, X86Xor, Some(Ty::I64)),
        Not32 => replace(func, X86Not, Some(Ty::I32)),
        Not64 => replace(func, X86Not, Some(Ty::I64)),
        ShiftLeft32 => replace(func, X86Shl, Some(Ty::I32)),
        ShiftLeft64 => replace(func, X86Shl, Some(Ty::I64)),
        ShiftRight32 => replace(func, X86Shr, Some(Ty::I32)),
        ShiftRight64 => replace(func, X86Shr, Some(Ty::I64)),
        ArithShiftRight32 => replace(func, X86Sar, Some(Ty::I32)),
        ArithShiftRight64 => replace(func, X86Sar, Some(Ty::I64)),

        AddR4 => replace(func, X86Addss, Some(Ty::R4)),
        AddR8 => replace(func, X86Addsd, Some(Ty::R8)),
        SubR4 => replace(func, X86Subss, Some(Ty::R4)),
        SubR8 => replace(func, X86Subsd, Some(Ty::R8)),
        MulR4 => replace(func, X86Mulss, Some(Ty::R4)),
        MulR8 => replace(func, X86Mulsd, Some(Ty::R8)),
        DivR4 => replace(func, X86Divss, Some(Ty::R4)),
        DivR8 => replace(func, X86Divsd, Some(Ty::R8)),

        CompareInt32 | CompareInt64 => {
            let ty = if data.opcode == CompareInt64 {
                Ty::I64
            } else {
                Ty::I32
            };
            let mut cmp = InstData::new(X86Cmp);
            cmp.ty = Some(ty);
            cmp.operands.push(data.operands[0]);
            cmp.operands.push(data.operands[1]);
            before(func, inst, cmp);
            let mut set = InstData::new(X86Setcc);
            set.results.push(data.results[0]);
            set.cc = data.cc;
            func.dfg.insts[inst] = set;
        }
        CompareR4 | CompareR8 => {
            let (ucomi, ty) = if data.opcode == CompareR4 {
                (X86Ucomiss, Ty::R4)
            } else {
                (X86Ucomisd, Ty::R8)
            };
            let cc = match data.cc {
                Some(CondCode::Float(cc)) => cc,
                _ => {
                    return Err(CodegenError::Verifier(
                        "float compare without float condition".to_string(),
                    ))
                }
            };
            // Normalize so the encoder only needs A/AE/B/BE and the
            // parity sequences for equality.
            let (a, b, cc) = match cc {
                FloatCC::LessThan
                | FloatCC::LessThanOrEqual
                | FloatCC::UnorderedOrGreaterThan
                | FloatCC::UnorderedOrGreaterThanOrEqual => {
                    (data.operands[1], data.operands[0], cc.swap_args())
                }
                _ => (data.operands[0], data.operands[1], cc),
            };
            let mut cmp = InstData::new(ucomi);
            cmp.ty = Some(ty);
            cmp.operands.push(a);
            cmp.operands.push(b);
            before(func, inst, cmp);
            let mut set = InstData::new(X86Setcc);
            set.results.push(data.results[0]);
            set.cc = Some(CondCode::Float(cc));
            func.dfg.insts[inst] = set;
        }
        CompareIntBranch32 | CompareIntBranch64 => {
            let ty = if data.opcode == CompareIntBranch64 {
                Ty::I64
            } else {
                Ty::I32
            };
            let mut cmp = InstData::new(X86Cmp);
            cmp.ty = Some(ty);
            cmp.operands.push(data.operands[0]);
            cmp.operands.push(data.operands[1]);
            before(func, inst, cmp);
            let mut jcc = InstData::new(X86Jcc);
            jcc.cc = data.cc;
            jcc.blocks = data.blocks.clone();
            func.dfg.insts[inst] = jcc;
        }

        Jmp => replace(func, X86Jmp, None),
        Switch => {
            let index = data.operands[0];
            let (cases, default) = data.blocks.split_at(data.blocks.len() - 1);
            for (i, &target) in cases.iter().enumerate() {
                let case = func.dfg.iconst32(i as i32);
                let mut cmp = InstData::new(X86Cmp);
                cmp.ty = Some(Ty::I32);
                cmp.operands.push(index);
                cmp.operands.push(case);
                before(func, inst, cmp);
                let mut jcc = InstData::new(X86Jcc);
                jcc.cc = Some(CondCode::Int(IntCC::Equal));
                jcc.blocks.push(target);
                before(func, inst, jcc);
            }
            let mut jmp = InstData::new(X86Jmp);
            jmp.blocks.push(default[0]);
            func.dfg.insts[inst] = jmp;
        }
        Return | ReturnVoid => {
            let mut ret = InstData::new(X86Ret);
            ret.operands = data.operands.clone();
            func.dfg.insts[inst] = ret;
        }
        Call => lower_call(func, layout, inst, &data, x64)?,

        SignExtend8x32 => replace(func, X86Movsx8, Some(Ty::I32)),
        SignExtend16x32 => replace(func, X86Movsx16, Some(Ty::I32)),
        SignExtend32x64 => replace(func, X86Movsxd, Some(Ty::I64)),
        ZeroExtend8x32 => replace(func, X86Movzx8, Some(Ty::I32)),
        ZeroExtend16x32 => replace(func, X86Movzx16, Some(Ty::I32)),
        // A plain 32-bit move zero-extends on x64.
        ZeroExtend32x64 | Truncate64x32 => replace(func, X86Mov, Some(Ty::I32)),
        GetLow64 | GetHigh64 | Pack64 => {
            return Err(CodegenError::Verifier(format!(
                "{} survived long expansion",
                data.opcode
            )));
        }
        ConvertI32ToR4 => replace(func, X86Cvtsi2ss, Some(Ty::I32)),
        ConvertI32ToR8 => replace(func, X86Cvtsi2sd, Some(Ty::I32)),
        ConvertI64ToR8 => replace(func, X86Cvtsi2sd, Some(Ty::I64)),
        ConvertR4ToI32 => replace(func, X86Cvttss2si, Some(Ty::I32)),
        ConvertR8ToI32 => replace(func, X86Cvttsd2si, Some(Ty::I32)),
        ConvertR4ToR8 => replace(func, X86Cvtss2sd, None),
        ConvertR8ToR4 => replace(func, X86Cvtsd2ss, None),

        Load32 => replace(func, X86MovLoad, Some(Ty::I32)),
        Load64 => replace(func, X86MovLoad, Some(Ty::I64)),
        LoadR4 => replace(func, X86MovssLoad, Some(Ty::R4)),
        LoadR8 => replace(func, X86MovsdLoad, Some(Ty::R8)),
        LoadSignExtend8x32 => replace(func, X86MovsxLoad8, Some(Ty::I32)),
        LoadSignExtend16x32 => replace(func, X86MovsxLoad16, Some(Ty::I32)),
        LoadZeroExtend8x32 => replace(func, X86MovzxLoad8, Some(Ty::I32)),
        LoadZeroExtend16x32 => replace(func, X86MovzxLoad16, Some(Ty::I32)),
        LoadCompound => {
            let dst = data.results[0];
            let size = layout.ty_size(func.dfg.ty(dst));
            let addr = func.dfg.make_virtual_reg(Ty::Ptr);
            lower_address(func, inst, addr, data.operands[0], data.operands[1], x64);
            lower_compound_from_addr(func, inst, dst, addr, size, x64)?;
        }
        Store8 => replace(func, X86MovStore, Some(Ty::I8)),
        Store16 => replace(func, X86MovStore, Some(Ty::I16)),
        Store32 => replace(func, X86MovStore, Some(Ty::I32)),
        Store64 => replace(func, X86MovStore, Some(Ty::I64)),
        StoreR4 => replace(func, X86MovssStore, Some(Ty::R4)),
        StoreR8 => replace(func, X86MovsdStore, Some(Ty::R8)),
        StoreCompound => {
            let value = data.operands[2];
            let size = layout.ty_size(func.dfg.ty(value));
            let addr = func.dfg.make_virtual_reg(Ty::Ptr);
            lower_address(func, inst, addr, data.operands[0], data.operands[1], x64);
            lower_compound_to_addr(func, inst, value, addr, size, x64)?;
        }

        already_lowered if already_lowered.name().starts_with("x86.") => {}
        other => {
            return Err(CodegenError::NotSupported(format!(
                "cannot lower {other} for x86"
            )));
        }
    }
    Ok(())
}

/// `addr = base + offset`.
fn lower_address(
    func: &mut Function,
    at: Inst,
    addr: Operand,
    base: Operand,
    offset: Operand,
    x64: bool,
) {
    let ty = if x64 { Ty::I64 } else { Ty::I32 };
    let mut mv = Function::inst_unary(Opcode::X86Mov, addr, base);
    mv.ty = Some(ty);
    before(func, at, mv);
    if func.dfg.operands[offset].constant_int() != Some(0) {
        let mut add = Function::inst_binary(Opcode::X86Add, addr, addr, offset);
        add.ty = Some(ty);
        before(func, at, add);
    }
}

/// Replace `inst` with a runtime block copy `dst <- src` of `size` bytes.
fn lower_compound_copy(
    func: &mut Function,
    inst: Inst,
    dst: Operand,
    src: Operand,
    size: u32,
    x64: bool,
) -> CodegenResult<()> {
    let dst_addr = func.dfg.make_virtual_reg(Ty::Ptr);
    before(func, inst, Function::inst_unary(Opcode::X86Lea, dst_addr, dst));
    let src_addr = func.dfg.make_virtual_reg(Ty::Ptr);
    before(func, inst, Function::inst_unary(Opcode::X86Lea, src_addr, src));
    emit_memcpy(func, inst, dst_addr, src_addr, size, x64)
}

fn lower_compound_from_addr(
    func: &mut Function,
    inst: Inst,
    dst: Operand,
    src_addr: Operand,
    size: u32,
    x64: bool,
) -> CodegenResult<()> {
    let dst_addr = func.dfg.make_virtual_reg(Ty::Ptr);
    before(func, inst, Function::inst_unary(Opcode::X86Lea, dst_addr, dst));
    emit_memcpy(func, inst, dst_addr, src_addr, size, x64)
}

fn lower_compound_to_addr(
    func: &mut Function,
    inst: Inst,
    src: Operand,
    dst_addr: Operand,
    size: u32,
    x64: bool,
) -> CodegenResult<()> {
    let src_addr = func.dfg.make_virtual_reg(Ty::Ptr);
    before(func, inst, Function::inst_unary(Opcode::X86Lea, src_addr, src));
    emit_memcpy(func, inst, dst_addr, src_addr, size, x64)
}

fn emit_memcpy(
    func: &mut Function,
    inst: Inst,
    dst: Operand,
    src: Operand,
    size: u32,
    x64: bool,
) -> CodegenResult<()> {
    let size_const = func.dfg.iconst32(size as i32);
    let target = func
        .dfg
        .symbol(SymbolName::from("mosa_rt_memcpy"), Ty::Ptr);
    let staged = stage_call(func, inst, target, &[dst, src, size_const], None, x64)?;
    func.dfg.insts[inst] = staged;
    Ok(())
}

fn lower_division(
    func: &mut Function,
    inst: Inst,
    data: &InstData,
    ty: Ty,
    signed: bool,
    want_rem: bool,
) {
    let (a, b) = (data.operands[0], data.operands[1]);
    let hi = func.dfg.make_virtual_reg(if ty == Ty::I64 { Ty::I64 } else { Ty::I32 });
    if signed {
        let mut cdq = Function::inst_unary(Opcode::X86Cdq, hi, a);
        cdq.ty = Some(ty);
        before(func, inst, cdq);
    } else {
        let zero = func.dfg.iconst32(0);
        let mut mv = Function::inst_unary(Opcode::X86Mov, hi, zero);
        mv.ty = Some(ty);
        before(func, inst, mv);
    }
    let quot = func.dfg.make_virtual_reg(func.dfg.ty(data.results[0]));
    let rem = func.dfg.make_virtual_reg(func.dfg.ty(data.results[0]));
    let mut div = InstData::new(if signed {
        Opcode::X86Idiv
    } else {
        Opcode::X86Div
    });
    div.ty = Some(ty);
    div.results.push(quot);
    div.results.push(rem);
    div.operands.push(hi);
    div.operands.push(a);
    div.operands.push(b);
    before(func, inst, div);
    let result = data.results[0];
    let chosen = if want_rem { rem } else { quot };
    let mut mv = Function::inst_unary(Opcode::X86Mov, result, chosen);
    mv.ty = Some(ty);
    func.dfg.insts[inst] = mv;
}

/// Stage outgoing arguments into the bottom of the stack, producing the
/// call node data that replaces the original node.
fn stage_call(
    func: &mut Function,
    inst: Inst,
    target: Operand,
    args: &[Operand],
    result: Option<&[Operand]>,
    x64: bool,
) -> CodegenResult<InstData> {
    let ptr_size: u32 = if x64 { 8 } else { 4 };
    let ptr_ty = if x64 { Ty::I64 } else { Ty::I32 };

    let mut offsets = Vec::with_capacity(args.len());
    let mut total = 0u32;
    for &arg in args {
        let ty = func.dfg.ty(arg);
        if ty.is_value_type() {
            return Err(CodegenError::NotSupported(
                "passing a compound value by value in a call".to_string(),
            ));
        }
        let size = ty.scalar_size(ptr_size).unwrap_or(ptr_size).max(ptr_size);
        offsets.push(total);
        total += size;
    }

    let esp = func.dfg.cpu_reg(ptr_ty, regs::ESP);
    if total > 0 {
        let amount = func.dfg.iconst32(total as i32);
        let mut sub = Function::inst_binary(Opcode::X86Sub, esp, esp, amount);
        sub.ty = Some(ptr_ty);
        before(func, inst, sub);
        for (&arg, &offset) in args.iter().zip(offsets.iter()) {
            let off = func.dfg.iconst32(offset as i32);
            let ty = func.dfg.ty(arg);
            let (store_op, store_ty) = match ty {
                Ty::R4 => (Opcode::X86MovssStore, Ty::R4),
                Ty::R8 => (Opcode::X86MovsdStore, Ty::R8),
                Ty::I64 => (Opcode::X86MovStore, Ty::I64),
                _ => (Opcode::X86MovStore, ptr_ty),
            };
            // Float constants go through a register first.
            let arg = if ty.is_float() && func.dfg.operands[arg].is_constant() {
                let tmp = func.dfg.make_virtual_reg(ty);
                let mov_op = if ty == Ty::R4 {
                    Opcode::X86Movss
                } else {
                    Opcode::X86Movsd
                };
                let mut mv = Function::inst_unary(mov_op, tmp, arg);
                mv.ty = Some(ty);
                before(func, inst, mv);
                tmp
            } else {
                arg
            };
            let mut store = InstData::new(store_op);
            store.ty = Some(store_ty);
            store.operands.push(esp);
            store.operands.push(off);
            store.operands.push(arg);
            before(func, inst, store);
        }
    }

    let mut call = InstData::new(Opcode::X86Call);
    if let Some(results) = result {
        call.results.extend(results.iter().copied());
    }
    call.operands.push(target);
    // The argument-area size rides on the node; emission releases it
    // after the call returns.
    call.ty = Some(ptr_ty);
    let total_const = func.dfg.iconst32(total as i32);
    call.operands.push(total_const);
    Ok(call)
}

fn lower_call(
    func: &mut Function,
    _layout: &TypeLayout,
    inst: Inst,
    data: &InstData,
    x64: bool,
) -> CodegenResult<()> {
    let target = data.operands[0];
    let args: Vec<Operand> = data.operands[1..].to_vec();
    let staged = stage_call(func, inst, target, &args, Some(&data.results), x64)?;
    func.dfg.insts[inst] = staged;
    Ok(())
}

// ---------------- tweaks ----------------

/// Encoding tweaks: two-address conversion, constants out of `cmp`'s
/// left side, 8-bit shift counts, call targets through registers.
pub fn tweak(func: &mut Function, x64: bool) -> CodegenResult<()> {
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
                X86Cmp => {
                    // The left side must be a register or stack slot.
                    constant_to_reg(func, inst, 0, data.ty);
                }
                X86Ucomiss | X86Ucomisd => {
                    // No immediate forms at all.
                    constant_to_reg(func, inst, 0, data.ty);
                    constant_to_reg(func, inst, 1, data.ty);
                }
                X86Mul => {
                    constant_to_reg(func, inst, 1, data.ty);
                }
                X86Idiv | X86Div => {
                    constant_to_reg(func, inst, 2, data.ty);
                }
                X86Cvtsi2ss | X86Cvtsi2sd | X86Cvttss2si | X86Cvttsd2si | X86Cvtss2sd
                | X86Cvtsd2ss | X86Movsx8 | X86Movsx16 | X86Movzx8 | X86Movzx16 | X86Movsxd => {
                    constant_to_reg(func, inst, 0, data.ty);
                }
                X86Shl | X86Shr | X86Sar => {
                    // Shift counts encode as CL or an 8-bit immediate.
                    let count = data.operands[1];
                    if let Some(value) = func.dfg.operands[count].constant_int() {
                        let coerced = func.dfg.iconst(Ty::I8, value & 0xff);
                        func.dfg.insts[inst].operands[1] = coerced;
                    }
                    two_address(func, inst, x64);
                }
                X86Call => {
                    let target = data.operands[0];
                    let ok = matches!(
                        func.dfg.operands[target],
                        OperandData::Symbol { .. }
                            | OperandData::VirtualReg { .. }
                            | OperandData::CpuReg { .. }
                    );
                    if !ok {
                        let ty = if x64 { Ty::I64 } else { Ty::I32 };
                        let tmp = func.dfg.make_virtual_reg(Ty::Ptr);
                        let mut mv = Function::inst_unary(X86Mov, tmp, target);
                        mv.ty = Some(ty);
                        before(func, inst, mv);
                        func.dfg.insts[inst].operands[0] = tmp;
                    }
                }
                X86Add | X86Adc | X86Sub | X86Sbb | X86And | X86Or | X86Xor => {
                    two_address(func, inst, x64);
                }
                X86Imul => {
                    // No immediate form in the two-operand encoding.
                    constant_to_reg(func, inst, 1, data.ty);
                    two_address(func, inst, x64);
                }
                X86Addss | X86Addsd | X86Subss | X86Subsd | X86Mulss | X86Mulsd | X86Divss
                | X86Divsd => {
                    two_address(func, inst, x64);
                    constant_to_reg(func, inst, 1, data.ty);
                }
                X86Not => {
                    two_address_unary(func, inst);
                }
                _ => {}
            }
        }
    }
    Ok(())
}

/// Hoist a constant operand into a register of its own width.
fn constant_to_reg(func: &mut Function, inst: Inst, slot: usize, node_ty: Option<Ty>) {
    let operand = func.dfg.insts[inst].operands[slot];
    if !func.dfg.operands[operand].is_constant() {
        return;
    }
    let ty = match func.dfg.ty(operand) {
        Ty::R4 => Ty::R4,
        Ty::R8 => Ty::R8,
        Ty::I64 => Ty::I64,
        _ if node_ty == Some(Ty::I64) => Ty::I64,
        _ => Ty::I32,
    };
    let tmp = func.dfg.make_virtual_reg(ty);
    let mut mv = Function::inst_unary(mov_for(ty), tmp, operand);
    mv.ty = Some(ty);
    before(func, inst, mv);
    func.dfg.insts[inst].operands[slot] = tmp;
}

fn ty_of_width(ty: Ty) -> Ty {
    match ty {
        Ty::R4 => Ty::R4,
        Ty::R8 => Ty::R8,
        Ty::I64 => Ty::I64,
        _ => Ty::I32,
    }
}

fn mov_for(ty: Ty) -> Opcode {
    match ty {
        Ty::R4 => Opcode::X86Movss,
        Ty::R8 => Opcode::X86Movsd,
        _ => Opcode::X86Mov,
    }
}

/// Rewrite `d = op a, b` into the two-address shape `d = op d, b` with a
/// leading `mov d, a`.
fn two_address(func: &mut Function, inst: Inst, _x64: bool) {
    let data = func.dfg.insts[inst].clone();
    let result = data.results[0];
    if data.operands[0] == result {
        return;
    }
    let ty = data.ty.unwrap_or(Ty::I32);
    let mut b = data.operands[1];
    if b == result {
        if data.opcode.is_commutative() {
            // Swapping avoids the clobber entirely.
            func.dfg.insts[inst].operands[0] = b;
            func.dfg.insts[inst].operands[1] = data.operands[0];
            return;
        }
        // The right side would be clobbered by the copy; save it first.
        let saved = func.dfg.make_virtual_reg(ty_of_width(ty));
        let mut mv = Function::inst_unary(mov_for(ty), saved, b);
        mv.ty = Some(ty);
        before(func, inst, mv);
        b = saved;
    }
    let mut mv = Function::inst_unary(mov_for(ty), result, data.operands[0]);
    mv.ty = Some(ty);
    before(func, inst, mv);
    let node = &mut func.dfg.insts[inst];
    node.operands[0] = result;
    node.operands[1] = b;
}

fn two_address_unary(func: &mut Function, inst: Inst) {
    let data = func.dfg.insts[inst].clone();
    let result = data.results[0];
    if data.operands[0] == result {
        return;
    }
    let ty = data.ty.unwrap_or(Ty::I32);
    let mut mv = Function::inst_unary(mov_for(ty), result, data.operands[0]);
    mv.ty = Some(ty);
    before(func, inst, mv);
    func.dfg.insts[inst].operands[0] = result;
}

// ---------------- fixed registers ----------------

/// Pin the operands the encodings dictate.
pub fn assign_fixed_registers(func: &mut Function, x64: bool) -> CodegenResult<()> {
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
                X86Cdq => {
                    let ty = data.ty.unwrap_or(Ty::I32);
                    let eax = func.dfg.cpu_reg(ty, regs::EAX);
                    let edx = func.dfg.cpu_reg(ty, regs::EDX);
                    let mut mv = Function::inst_unary(X86Mov, eax, data.operands[0]);
                    mv.ty = Some(ty);
                    before(func, inst, mv);
                    {
                        let node = &mut func.dfg.insts[inst];
                        node.operands[0] = eax;
                        node.results[0] = edx;
                    }
                    let mut out = Function::inst_unary(X86Mov, data.results[0], edx);
                    out.ty = Some(ty);
                    insert_after(func, inst, out);
                }
                X86Idiv | X86Div => {
                    let ty = data.ty.unwrap_or(Ty::I32);
                    let eax = func.dfg.cpu_reg(ty, regs::EAX);
                    let edx = func.dfg.cpu_reg(ty, regs::EDX);
                    let mut hi = Function::inst_unary(X86Mov, edx, data.operands[0]);
                    hi.ty = Some(ty);
                    before(func, inst, hi);
                    let mut lo = Function::inst_unary(X86Mov, eax, data.operands[1]);
                    lo.ty = Some(ty);
                    before(func, inst, lo);
                    {
                        let node = &mut func.dfg.insts[inst];
                        node.operands[0] = edx;
                        node.operands[1] = eax;
                        node.results[0] = eax;
                        node.results[1] = edx;
                    }
                    let mut rem_out = Function::inst_unary(X86Mov, data.results[1], edx);
                    rem_out.ty = Some(ty);
                    insert_after(func, inst, rem_out);
                    let mut quot_out = Function::inst_unary(X86Mov, data.results[0], eax);
                    quot_out.ty = Some(ty);
                    insert_after(func, inst, quot_out);
                }
                X86Mul => {
                    let ty = data.ty.unwrap_or(Ty::I32);
                    let eax = func.dfg.cpu_reg(ty, regs::EAX);
                    let edx = func.dfg.cpu_reg(ty, regs::EDX);
                    let mut mv = Function::inst_unary(X86Mov, eax, data.operands[0]);
                    mv.ty = Some(ty);
                    before(func, inst, mv);
                    {
                        let node = &mut func.dfg.insts[inst];
                        node.operands[0] = eax;
                        node.results[0] = eax;
                        node.results[1] = edx;
                    }
                    let mut hi_out = Function::inst_unary(X86Mov, data.results[1], edx);
                    hi_out.ty = Some(ty);
                    insert_after(func, inst, hi_out);
                    let mut lo_out = Function::inst_unary(X86Mov, data.results[0], eax);
                    lo_out.ty = Some(ty);
                    insert_after(func, inst, lo_out);
                }
                X86Shl | X86Shr | X86Sar => {
                    let count = data.operands[1];
                    let is_imm8 = func.dfg.ty(count) == Ty::I8
                        && func.dfg.operands[count].is_constant();
                    if !is_imm8 && !func.dfg.operands[count].is_cpu_reg() {
                        let ecx = func.dfg.cpu_reg(Ty::I32, regs::ECX);
                        let mut mv = Function::inst_unary(X86Mov, ecx, count);
                        mv.ty = Some(Ty::I32);
                        before(func, inst, mv);
                        func.dfg.insts[inst].operands[1] = ecx;
                    }
                }
                X86Setcc => {
                    // setcc needs a byte register; ECX always has one.
                    let ecx = func.dfg.cpu_reg(Ty::I32, regs::ECX);
                    let result = data.results[0];
                    func.dfg.insts[inst].results[0] = ecx;
                    let mut out = Function::inst_unary(X86Mov, result, ecx);
                    out.ty = Some(Ty::I32);
                    insert_after(func, inst, out);
                }
                X86Call => {
                    match data.results.len() {
                        0 => {}
                        1 => {
                            let result = data.results[0];
                            let ty = func.dfg.ty(result);
                            if ty.is_float() {
                                let xmm0 = func.dfg.cpu_reg(ty, regs::XMM0);
                                func.dfg.insts[inst].results[0] = xmm0;
                                let mov_op = if ty == Ty::R4 { X86Movss } else { X86Movsd };
                                let mut out = Function::inst_unary(mov_op, result, xmm0);
                                out.ty = Some(ty);
                                insert_after(func, inst, out);
                            } else {
                                let eax = func.dfg.cpu_reg(ty, regs::EAX);
                                func.dfg.insts[inst].results[0] = eax;
                                let mut out = Function::inst_unary(X86Mov, result, eax);
                                out.ty = Some(width(ty, x64));
                                insert_after(func, inst, out);
                            }
                        }
                        2 => {
                            // A 64-bit value returned as a low/high pair.
                            let (lo, hi) = (data.results[0], data.results[1]);
                            let eax = func.dfg.cpu_reg(Ty::I32, regs::EAX);
                            let edx = func.dfg.cpu_reg(Ty::I32, regs::EDX);
                            {
                                let node = &mut func.dfg.insts[inst];
                                node.results[0] = eax;
                                node.results[1] = edx;
                            }
                            let mut hi_out = Function::inst_unary(X86Mov, hi, edx);
                            hi_out.ty = Some(Ty::I32);
                            insert_after(func, inst, hi_out);
                            let mut lo_out = Function::inst_unary(X86Mov, lo, eax);
                            lo_out.ty = Some(Ty::I32);
                            insert_after(func, inst, lo_out);
                        }
                        _ => {
                            return Err(CodegenError::Verifier(
                                "call with more than two results".to_string(),
                            ))
                        }
                    }
                }
                X86Ret => {
                    match data.operands.len() {
                        0 => {}
                        1 => {
                            let value = data.operands[0];
                            let ty = func.dfg.ty(value);
                            if ty.is_float() {
                                let xmm0 = func.dfg.cpu_reg(ty, regs::XMM0);
                                let mov_op = if ty == Ty::R4 { X86Movss } else { X86Movsd };
                                let mut mv = Function::inst_unary(mov_op, xmm0, value);
                                mv.ty = Some(ty);
                                before(func, inst, mv);
                            } else {
                                let eax = func.dfg.cpu_reg(width(ty, x64), regs::EAX);
                                let mut mv = Function::inst_unary(X86Mov, eax, value);
                                mv.ty = Some(width(ty, x64));
                                before(func, inst, mv);
                            }
                        }
                        2 => {
                            let eax = func.dfg.cpu_reg(Ty::I32, regs::EAX);
                            let edx = func.dfg.cpu_reg(Ty::I32, regs::EDX);
                            let mut lo = Function::inst_unary(X86Mov, eax, data.operands[0]);
                            lo.ty = Some(Ty::I32);
                            before(func, inst, lo);
                            let mut hi = Function::inst_unary(X86Mov, edx, data.operands[1]);
                            hi.ty = Some(Ty::I32);
                            before(func, inst, hi);
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

fn width(ty: Ty, x64: bool) -> Ty {
    match ty {
        Ty::I64 => Ty::I64,
        Ty::Ptr | Ty::Object if x64 => Ty::I64,
        _ => Ty::I32,
    }
}

fn insert_after(func: &mut Function, at: Inst, data: InstData) -> Inst {
    let inst = func.dfg.make_inst(data);
    func.layout.insert_inst_after(inst, at);
    inst
}
