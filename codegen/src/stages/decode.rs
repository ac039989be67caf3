//! CIL decode.
//!
//! Translates the parsed stack-machine body into the initial IR block
//! graph. The evaluation stack is simulated with virtual registers; locals
//! and arguments are promoted to virtual registers, values crossing block
//! boundaries flow through per-block entry registers, and the graph is
//! built with a unique pre-header and a unique exit block.

use crate::cil::{CilBody, CilCmp, CilOp, ConvTarget, HandlerKind};
use crate::compiler::{MethodCompiler, Stage};
use crate::ir::{
    Block, CondCode, FloatCC, Function, InstData, IntCC, Opcode, Operand, StackSlotData,
    StackSlotKind, SymbolName, Ty,
};
use crate::result::{CodegenError, CodegenResult};
use crate::stages::{inline, value_ty};
use crate::typesys::{FieldRef, MethodRef, PrimKind};
use rustc_hash::{FxHashMap, FxHashSet};

/// The decoder stage.
pub struct DecodeStage;

impl Stage for DecodeStage {
    fn name(&self) -> &'static str {
        "decode"
    }

    fn run(&mut self, compiler: &mut MethodCompiler) -> CodegenResult<()> {
        let md = compiler.type_system.method(compiler.method);
        if md.is_internal || md.is_extern {
            return Err(CodegenError::NotSupported(format!(
                "method without managed body: {}",
                compiler.type_system.symbol_name(compiler.method)
            )));
        }
        let body = md.body.clone().ok_or_else(|| {
            CodegenError::TypeSystem(format!(
                "abstract method queued for compilation: {}",
                compiler.type_system.symbol_name(compiler.method)
            ))
        })?;

        let mut decoder = Decoder::new(compiler, &body);
        decoder.decode(&body)?;
        let count = body.ops.len() as u64;
        compiler.counters.update("decode.cil_instructions", count);
        Ok(())
    }
}

struct Decoder<'d, 'a> {
    c: &'d mut MethodCompiler<'a>,
    /// Op index -> block starting there.
    block_at: FxHashMap<u32, Block>,
    /// Stack registers a block starts with.
    entry_stack: FxHashMap<Block, Vec<Operand>>,
    /// Handler entry points and their kinds.
    handlers: FxHashMap<u32, HandlerKind>,
    cur_block: Block,
    stack: Vec<Operand>,
    terminated: bool,
    exit_block: Block,
    ret_vreg: Option<Operand>,
    /// Guard against inlining into an inlined body.
    inlining: bool,
}

impl<'d, 'a> Decoder<'d, 'a> {
    fn new(c: &'d mut MethodCompiler<'a>, body: &CilBody) -> Self {
        // Find block boundaries.
        let mut starts: FxHashSet<u32> = FxHashSet::default();
        starts.insert(0);
        let len = body.ops.len() as u32;
        let mut mark = |i: u32| {
            if i < len {
                starts.insert(i);
            }
        };
        for (i, op) in body.ops.iter().enumerate() {
            let i = i as u32;
            match op {
                CilOp::Br(t) | CilOp::BrTrue(t) | CilOp::BrFalse(t) | CilOp::Bc(_, t) => {
                    mark(*t);
                    mark(i + 1);
                }
                CilOp::Switch(targets) => {
                    for &t in targets {
                        mark(t);
                    }
                    mark(i + 1);
                }
                CilOp::Ret => mark(i + 1),
                _ => {}
            }
        }
        let mut handlers = FxHashMap::default();
        for region in &body.regions {
            mark(region.try_start);
            mark(region.try_end);
            mark(region.handler_start);
            mark(region.handler_end);
            handlers.insert(region.handler_start, region.kind);
        }

        let mut starts: Vec<u32> = starts.into_iter().collect();
        starts.sort_unstable();

        // Pre-header first, body blocks in op order, the exit block last.
        let pre_header = c.func.dfg.make_block();
        c.func.layout.append_block(pre_header);
        let mut block_at = FxHashMap::default();
        for &i in &starts {
            let block = c.func.dfg.make_block();
            c.func.layout.append_block(block);
            block_at.insert(i, block);
        }
        let exit_block = c.func.dfg.make_block();
        c.func.layout.append_block(exit_block);

        Self {
            c,
            block_at,
            entry_stack: FxHashMap::default(),
            handlers,
            cur_block: pre_header,
            stack: Vec::new(),
            terminated: false,
            exit_block,
            ret_vreg: None,
            inlining: false,
        }
    }

    fn decode(&mut self, body: &CilBody) -> CodegenResult<()> {
        self.build_pre_header(body)?;

        for (i, op) in body.ops.iter().enumerate() {
            let i = i as u32;
            if let Some(&block) = self.block_at.get(&i) {
                self.start_block(block)?;
            }
            if self.terminated {
                // Unreachable until the next block boundary.
                continue;
            }
            self.translate(i, op)?;
        }
        if !self.terminated {
            return Err(CodegenError::Verifier(
                "method body falls off the end".to_string(),
            ));
        }

        // The unique exit block.
        let exit = self.exit_block;
        match self.ret_vreg {
            Some(v) => {
                let mut data = InstData::new(Opcode::Return);
                data.operands.push(v);
                self.c.func.append_inst(exit, data);
            }
            None => {
                self.c.func.append_inst(exit, InstData::new(Opcode::ReturnVoid));
            }
        }
        Ok(())
    }

    /// Parameter loads and local zero-initialization, then a jump into
    /// the body.
    fn build_pre_header(&mut self, body: &CilBody) -> CodegenResult<()> {
        let md = self.c.type_system.method(self.c.method);
        let layout = self.c.type_layout;
        self.c.func.ret_ty = md.sig.ret.map(|t| value_ty(layout, t));
        if let Some(ty) = self.c.func.ret_ty {
            self.ret_vreg = Some(self.c.func.dfg.make_virtual_reg(ty));
        }

        let mut param_tys: Vec<Ty> = Vec::new();
        if !md.is_static {
            param_tys.push(Ty::Object);
        }
        for &p in &md.sig.params {
            param_tys.push(value_ty(layout, p));
        }

        let ptr_size = layout.ptr_size();
        for ty in param_tys {
            let size = layout.ty_size(ty).max(ptr_size).div_ceil(ptr_size) * ptr_size;
            let slot = self
                .c
                .func
                .create_stack_slot(StackSlotData::new(StackSlotKind::IncomingArg, size));
            let vreg = self.c.func.dfg.make_virtual_reg(ty);
            let arg = self.c.func.dfg.stack_local(ty, slot);
            let data = Function::inst_unary(Opcode::LoadParam, vreg, arg);
            self.c.func.append_inst(self.cur_block, data);
            self.c.func.params.push(vreg);
        }

        for &local in &body.locals {
            let ty = value_ty(layout, local);
            let vreg = self.c.func.dfg.make_virtual_reg(ty);
            self.zero_init(vreg, ty);
            self.c.func.locals.push(vreg);
        }

        let first = self.block_at[&0];
        let jmp = Function::inst_jmp(first);
        self.c.func.append_inst(self.cur_block, jmp);
        Ok(())
    }

    fn zero_init(&mut self, vreg: Operand, ty: Ty) {
        let data = match ty {
            Ty::I8 | Ty::I16 | Ty::I32 => {
                let zero = self.c.func.dfg.iconst32(0);
                Function::inst_unary(Opcode::Move32, vreg, zero)
            }
            Ty::I64 => {
                let zero = self.c.func.dfg.iconst64(0);
                Function::inst_unary(Opcode::Move64, vreg, zero)
            }
            Ty::R4 => {
                let zero = self.c.func.dfg.f32const(0.0);
                Function::inst_unary(Opcode::MoveR4, vreg, zero)
            }
            Ty::R8 => {
                let zero = self.c.func.dfg.f64const(0.0);
                Function::inst_unary(Opcode::MoveR8, vreg, zero)
            }
            Ty::Ptr | Ty::Object => {
                let null = self.c.func.dfg.null_const();
                Function::inst_unary(Opcode::MoveObject, vreg, null)
            }
            // Compound locals are zeroed by the runtime allocator when
            // boxed; as bare locals they start undefined like the source
            // leaves them before first assignment.
            Ty::Value(_) => return,
        };
        self.c.func.append_inst(self.cur_block, data);
    }

    fn start_block(&mut self, block: Block) -> CodegenResult<()> {
        if !self.terminated {
            // Fall-through edge into the new block.
            self.sync_entry_stack(block)?;
            let jmp = Function::inst_jmp(block);
            self.c.func.append_inst(self.cur_block, jmp);
        }
        self.cur_block = block;
        self.stack = self.entry_stack.get(&block).cloned().unwrap_or_default();
        self.terminated = false;

        // Find the op index of this block to detect handler entries.
        if let Some((&idx, _)) = self.block_at.iter().find(|&(_, &b)| b == block) {
            if let Some(&kind) = self.handlers.get(&idx) {
                if kind == HandlerKind::Catch {
                    // The runtime delivers the in-flight exception object.
                    let sym = self
                        .c
                        .func
                        .dfg
                        .symbol(SymbolName::from("mosa_rt_get_exception"), Ty::Ptr);
                    let result = self.c.func.dfg.make_virtual_reg(Ty::Object);
                    let mut data = InstData::new(Opcode::Call);
                    data.results.push(result);
                    data.operands.push(sym);
                    self.c.func.append_inst(block, data);
                    self.stack.push(result);
                }
            }
        }
        Ok(())
    }

    /// Make the current stack flow into `target`'s entry registers.
    fn sync_entry_stack(&mut self, target: Block) -> CodegenResult<()> {
        if !self.entry_stack.contains_key(&target) {
            let mut entries = Vec::with_capacity(self.stack.len());
            for &v in &self.stack {
                let ty = self.c.func.dfg.ty(v);
                entries.push(self.c.func.dfg.make_virtual_reg(ty));
            }
            self.entry_stack.insert(target, entries);
        }
        let entries = self.entry_stack[&target].clone();
        if entries.len() != self.stack.len() {
            return Err(CodegenError::Verifier(format!(
                "evaluation stack depth mismatch at {target}"
            )));
        }
        let moves: Vec<(Operand, Operand)> = entries
            .iter()
            .zip(self.stack.iter())
            .filter(|(&dst, &src)| dst != src)
            .map(|(&dst, &src)| (dst, src))
            .collect();
        for (dst, src) in moves {
            self.emit_move(dst, src);
        }
        Ok(())
    }

    fn emit(&mut self, data: InstData) {
        self.c.func.append_inst(self.cur_block, data);
    }

    fn emit_move(&mut self, dst: Operand, src: Operand) {
        let ty = self.c.func.dfg.ty(dst);
        let opcode = self.move_opcode(ty);
        let data = Function::inst_unary(opcode, dst, src);
        self.emit(data);
    }

    fn move_opcode(&self, ty: Ty) -> Opcode {
        match ty {
            Ty::I8 | Ty::I16 | Ty::I32 => Opcode::Move32,
            Ty::I64 => Opcode::Move64,
            Ty::R4 => Opcode::MoveR4,
            Ty::R8 => Opcode::MoveR8,
            Ty::Ptr | Ty::Object => Opcode::MoveObject,
            Ty::Value(t) => {
                if self.c.type_layout.is_stored_on_stack(t) {
                    Opcode::MoveCompound
                } else {
                    Opcode::MoveObject
                }
            }
        }
    }

    fn push(&mut self, v: Operand) {
        self.stack.push(v);
    }

    fn pop(&mut self) -> CodegenResult<Operand> {
        self.stack
            .pop()
            .ok_or_else(|| CodegenError::Verifier("evaluation stack underflow".to_string()))
    }

    fn def(&mut self, ty: Ty) -> Operand {
        self.c.func.dfg.make_virtual_reg(ty)
    }

    // ---------------- translation ----------------

    fn translate(&mut self, index: u32, op: &CilOp) -> CodegenResult<()> {
        match op {
            CilOp::Nop => {}
            CilOp::LdArg(n) => {
                let v = *self.c.func.params.get(*n as usize).ok_or_else(|| {
                    CodegenError::Verifier(format!("ldarg {n} out of range"))
                })?;
                self.push(v);
            }
            CilOp::StArg(n) => {
                let dst = *self.c.func.params.get(*n as usize).ok_or_else(|| {
                    CodegenError::Verifier(format!("starg {n} out of range"))
                })?;
                let v = self.pop()?;
                self.emit_move(dst, v);
            }
            CilOp::LdLoc(n) => {
                let v = *self.c.func.locals.get(*n as usize).ok_or_else(|| {
                    CodegenError::Verifier(format!("ldloc {n} out of range"))
                })?;
                self.push(v);
            }
            CilOp::StLoc(n) => {
                let dst = *self.c.func.locals.get(*n as usize).ok_or_else(|| {
                    CodegenError::Verifier(format!("stloc {n} out of range"))
                })?;
                let v = self.pop()?;
                self.emit_move(dst, v);
            }
            CilOp::LdcI4(v) => {
                let c = self.c.func.dfg.iconst32(*v);
                self.push(c);
            }
            CilOp::LdcI8(v) => {
                let c = self.c.func.dfg.iconst64(*v);
                self.push(c);
            }
            CilOp::LdcR4(v) => {
                let c = self.c.func.dfg.f32const(*v);
                self.push(c);
            }
            CilOp::LdcR8(v) => {
                let c = self.c.func.dfg.f64const(*v);
                self.push(c);
            }
            CilOp::LdNull => {
                let c = self.c.func.dfg.null_const();
                self.push(c);
            }
            CilOp::Dup => {
                let v = *self.stack.last().ok_or_else(|| {
                    CodegenError::Verifier("dup on empty stack".to_string())
                })?;
                self.push(v);
            }
            CilOp::Pop => {
                self.pop()?;
            }
            CilOp::Add => self.binary_arith(Opcode::Add32, Opcode::Add64, Opcode::AddR4, Opcode::AddR8)?,
            CilOp::Sub => self.binary_arith(Opcode::Sub32, Opcode::Sub64, Opcode::SubR4, Opcode::SubR8)?,
            CilOp::Mul => self.binary_arith(
                Opcode::MulSigned32,
                Opcode::MulSigned64,
                Opcode::MulR4,
                Opcode::MulR8,
            )?,
            CilOp::Div => self.binary_arith(
                Opcode::DivSigned32,
                Opcode::DivSigned64,
                Opcode::DivR4,
                Opcode::DivR8,
            )?,
            CilOp::DivUn => self.binary_int(Opcode::DivUnsigned32, Opcode::DivUnsigned64)?,
            CilOp::Rem => self.binary_int(Opcode::RemSigned32, Opcode::RemSigned64)?,
            CilOp::RemUn => self.binary_int(Opcode::RemUnsigned32, Opcode::RemUnsigned64)?,
            CilOp::And => self.binary_int(Opcode::And32, Opcode::And64)?,
            CilOp::Or => self.binary_int(Opcode::Or32, Opcode::Or64)?,
            CilOp::Xor => self.binary_int(Opcode::Xor32, Opcode::Xor64)?,
            CilOp::Shl => self.shift(Opcode::ShiftLeft32, Opcode::ShiftLeft64)?,
            CilOp::Shr => self.shift(Opcode::ArithShiftRight32, Opcode::ArithShiftRight64)?,
            CilOp::ShrUn => self.shift(Opcode::ShiftRight32, Opcode::ShiftRight64)?,
            CilOp::Neg => {
                let v = self.pop()?;
                let ty = self.c.func.dfg.ty(v);
                let result = self.def(ty);
                let data = match ty {
                    Ty::I32 => {
                        let zero = self.c.func.dfg.iconst32(0);
                        Function::inst_binary(Opcode::Sub32, result, zero, v)
                    }
                    Ty::I64 => {
                        let zero = self.c.func.dfg.iconst64(0);
                        Function::inst_binary(Opcode::Sub64, result, zero, v)
                    }
                    Ty::R4 => {
                        let minus_one = self.c.func.dfg.f32const(-1.0);
                        Function::inst_binary(Opcode::MulR4, result, v, minus_one)
                    }
                    Ty::R8 => {
                        let minus_one = self.c.func.dfg.f64const(-1.0);
                        Function::inst_binary(Opcode::MulR8, result, v, minus_one)
                    }
                    _ => {
                        return Err(CodegenError::Verifier("neg on a reference".to_string()));
                    }
                };
                self.emit(data);
                self.push(result);
            }
            CilOp::Not => {
                let v = self.pop()?;
                let ty = self.c.func.dfg.ty(v);
                let opcode = match ty {
                    Ty::I64 => Opcode::Not64,
                    _ => Opcode::Not32,
                };
                let result = self.def(ty);
                let data = Function::inst_unary(opcode, result, v);
                self.emit(data);
                self.push(result);
            }
            CilOp::Conv(target) => self.convert(*target)?,
            CilOp::Cmp(cmp) => {
                let b = self.pop()?;
                let a = self.pop()?;
                let result = self.compare_value(*cmp, a, b)?;
                self.push(result);
            }
            CilOp::Br(t) => {
                let target = self.target_block(*t)?;
                self.sync_entry_stack(target)?;
                self.emit(Function::inst_jmp(target));
                self.terminated = true;
            }
            CilOp::BrTrue(t) => self.branch_on_zero(*t, IntCC::NotEqual)?,
            CilOp::BrFalse(t) => self.branch_on_zero(*t, IntCC::Equal)?,
            CilOp::Bc(cmp, t) => {
                let b = self.pop()?;
                let a = self.pop()?;
                let target = self.target_block(*t)?;
                self.sync_entry_stack(target)?;
                let ty = self.c.func.dfg.ty(a);
                if ty.is_float() {
                    // Materialize the float comparison, branch on the flag.
                    let flag = self.compare_value(*cmp, a, b)?;
                    let zero = self.c.func.dfg.iconst32(0);
                    self.emit_cmp_branch(Ty::I32, IntCC::NotEqual, flag, zero, target);
                } else {
                    self.emit_cmp_branch(ty, int_cc(*cmp), a, b, target);
                }
                // Execution falls through into the next block.
            }
            CilOp::Switch(targets) => {
                let idx = self.pop()?;
                let default = self.block_at.get(&(index + 1)).copied().ok_or_else(|| {
                    CodegenError::Verifier("switch at end of body".to_string())
                })?;
                let mut data = InstData::new(Opcode::Switch);
                data.operands.push(idx);
                for &t in targets {
                    let target = self.target_block(t)?;
                    self.sync_entry_stack(target)?;
                    data.blocks.push(target);
                }
                self.sync_entry_stack(default)?;
                data.blocks.push(default);
                self.emit(data);
                self.terminated = true;
            }
            CilOp::Call(m) => self.call(*m, false)?,
            CilOp::CallVirt(m) => self.call(*m, true)?,
            CilOp::NewObj(ctor) => self.newobj(*ctor)?,
            CilOp::LdFld(f) => self.load_field(*f, false)?,
            CilOp::StFld(f) => self.store_field(*f, false)?,
            CilOp::LdSFld(f) => self.load_field(*f, true)?,
            CilOp::StSFld(f) => self.store_field(*f, true)?,
            CilOp::Ret => {
                if let Some(ret) = self.ret_vreg {
                    let v = self.pop()?;
                    self.emit_move(ret, v);
                }
                let exit = self.exit_block;
                self.emit(Function::inst_jmp(exit));
                self.terminated = true;
            }
        }
        Ok(())
    }

    fn binary_arith(
        &mut self,
        op32: Opcode,
        op64: Opcode,
        op_r4: Opcode,
        op_r8: Opcode,
    ) -> CodegenResult<()> {
        let b = self.pop()?;
        let a = self.pop()?;
        let ty = self.c.func.dfg.ty(a);
        let opcode = match ty {
            Ty::I64 => op64,
            Ty::R4 => op_r4,
            Ty::R8 => op_r8,
            Ty::Ptr if self.c.type_layout.ptr_size() == 8 => op64,
            _ => op32,
        };
        let result = self.def(ty);
        let data = Function::inst_binary(opcode, result, a, b);
        self.emit(data);
        self.push(result);
        Ok(())
    }

    fn binary_int(&mut self, op32: Opcode, op64: Opcode) -> CodegenResult<()> {
        let b = self.pop()?;
        let a = self.pop()?;
        let ty = self.c.func.dfg.ty(a);
        let opcode = match ty {
            Ty::I64 => op64,
            Ty::Ptr if self.c.type_layout.ptr_size() == 8 => op64,
            _ => op32,
        };
        let result = self.def(ty);
        let data = Function::inst_binary(opcode, result, a, b);
        self.emit(data);
        self.push(result);
        Ok(())
    }

    fn shift(&mut self, op32: Opcode, op64: Opcode) -> CodegenResult<()> {
        let count = self.pop()?;
        let value = self.pop()?;
        let ty = self.c.func.dfg.ty(value);
        let opcode = if ty == Ty::I64 { op64 } else { op32 };
        let result = self.def(ty);
        let data = Function::inst_binary(opcode, result, value, count);
        self.emit(data);
        self.push(result);
        Ok(())
    }

    fn compare_value(&mut self, cmp: CilCmp, a: Operand, b: Operand) -> CodegenResult<Operand> {
        let ty = self.c.func.dfg.ty(a);
        let result = self.def(Ty::I32);
        let (opcode, cc) = match ty {
            Ty::R4 => (Opcode::CompareR4, CondCode::Float(float_cc(cmp))),
            Ty::R8 => (Opcode::CompareR8, CondCode::Float(float_cc(cmp))),
            Ty::I64 => (Opcode::CompareInt64, CondCode::Int(int_cc(cmp))),
            Ty::Ptr | Ty::Object if self.c.type_layout.ptr_size() == 8 => {
                (Opcode::CompareInt64, CondCode::Int(int_cc(cmp)))
            }
            _ => (Opcode::CompareInt32, CondCode::Int(int_cc(cmp))),
        };
        let mut data = Function::inst_binary(opcode, result, a, b);
        data.cc = Some(cc);
        self.emit(data);
        Ok(result)
    }

    fn target_block(&self, t: u32) -> CodegenResult<Block> {
        self.block_at.get(&t).copied().ok_or_else(|| {
            CodegenError::TypeSystem(format!("branch target {t} outside the method body"))
        })
    }

    fn branch_on_zero(&mut self, t: u32, cc: IntCC) -> CodegenResult<()> {
        let v = self.pop()?;
        let target = self.target_block(t)?;
        self.sync_entry_stack(target)?;
        let ty = self.c.func.dfg.ty(v);
        let zero = match ty {
            Ty::I64 => self.c.func.dfg.iconst64(0),
            Ty::Ptr | Ty::Object => self.c.func.dfg.null_const(),
            _ => self.c.func.dfg.iconst32(0),
        };
        self.emit_cmp_branch(ty, cc, v, zero, target);
        Ok(())
    }

    fn emit_cmp_branch(&mut self, ty: Ty, cc: IntCC, a: Operand, b: Operand, target: Block) {
        let opcode = match ty {
            Ty::I64 => Opcode::CompareIntBranch64,
            Ty::Ptr | Ty::Object if self.c.type_layout.ptr_size() == 8 => {
                Opcode::CompareIntBranch64
            }
            _ => Opcode::CompareIntBranch32,
        };
        let mut data = InstData::new(opcode);
        data.operands.push(a);
        data.operands.push(b);
        data.cc = Some(CondCode::Int(cc));
        data.blocks.push(target);
        self.emit(data);
    }

    fn convert(&mut self, target: ConvTarget) -> CodegenResult<()> {
        let v = self.pop()?;
        let from = self.c.func.dfg.ty(v);
        let result = match target {
            ConvTarget::I1 => self.narrow_to_i32(v, from, Opcode::SignExtend8x32)?,
            ConvTarget::I2 => self.narrow_to_i32(v, from, Opcode::SignExtend16x32)?,
            ConvTarget::U1 => self.narrow_to_i32(v, from, Opcode::ZeroExtend8x32)?,
            ConvTarget::U2 => self.narrow_to_i32(v, from, Opcode::ZeroExtend16x32)?,
            ConvTarget::I4 | ConvTarget::U4 => match from {
                Ty::I32 => v,
                Ty::I64 => self.unary(Opcode::Truncate64x32, Ty::I32, v),
                Ty::R4 => self.unary(Opcode::ConvertR4ToI32, Ty::I32, v),
                Ty::R8 => self.unary(Opcode::ConvertR8ToI32, Ty::I32, v),
                Ty::Ptr => v,
                _ => {
                    return Err(CodegenError::NotSupported(
                        "conversion of a reference".to_string(),
                    ))
                }
            },
            ConvTarget::I8 => match from {
                Ty::I64 => v,
                Ty::I32 => self.unary(Opcode::SignExtend32x64, Ty::I64, v),
                _ => {
                    return Err(CodegenError::NotSupported(
                        "conv.i8 from floating point".to_string(),
                    ))
                }
            },
            ConvTarget::U8 => match from {
                Ty::I64 => v,
                Ty::I32 => self.unary(Opcode::ZeroExtend32x64, Ty::I64, v),
                _ => {
                    return Err(CodegenError::NotSupported(
                        "conv.u8 from floating point".to_string(),
                    ))
                }
            },
            ConvTarget::R4 => match from {
                Ty::R4 => v,
                Ty::R8 => self.unary(Opcode::ConvertR8ToR4, Ty::R4, v),
                Ty::I32 => self.unary(Opcode::ConvertI32ToR4, Ty::R4, v),
                _ => {
                    return Err(CodegenError::NotSupported(
                        "conv.r4 from 64-bit integer".to_string(),
                    ))
                }
            },
            ConvTarget::R8 => match from {
                Ty::R8 => v,
                Ty::R4 => self.unary(Opcode::ConvertR4ToR8, Ty::R8, v),
                Ty::I32 => self.unary(Opcode::ConvertI32ToR8, Ty::R8, v),
                Ty::I64 => self.unary(Opcode::ConvertI64ToR8, Ty::R8, v),
                _ => {
                    return Err(CodegenError::NotSupported(
                        "conv.r8 from a reference".to_string(),
                    ))
                }
            },
        };
        self.push(result);
        Ok(())
    }

    fn narrow_to_i32(&mut self, v: Operand, from: Ty, ext: Opcode) -> CodegenResult<Operand> {
        let v = match from {
            Ty::I64 => self.unary(Opcode::Truncate64x32, Ty::I32, v),
            Ty::R4 => self.unary(Opcode::ConvertR4ToI32, Ty::I32, v),
            Ty::R8 => self.unary(Opcode::ConvertR8ToI32, Ty::I32, v),
            _ => v,
        };
        Ok(self.unary(ext, Ty::I32, v))
    }

    fn unary(&mut self, opcode: Opcode, ty: Ty, v: Operand) -> Operand {
        let result = self.def(ty);
        let data = Function::inst_unary(opcode, result, v);
        self.emit(data);
        result
    }

    // ---------------- calls and objects ----------------

    fn call(&mut self, m: MethodRef, virt: bool) -> CodegenResult<()> {
        let ts = self.c.type_system;
        let md = ts.method(m);
        let argc = md.sig.params.len() + usize::from(!md.is_static);
        if self.stack.len() < argc {
            return Err(CodegenError::Verifier("call underflows the stack".to_string()));
        }
        let args: Vec<Operand> = self.stack.split_off(self.stack.len() - argc);

        // Calls to non-overridden virtuals devirtualize to direct calls.
        let devirt = virt && !self.c.type_layout.is_method_overridden(m);
        if !virt || devirt {
            if devirt {
                self.c.counters.update("decode.devirtualized", 1);
            }
            if !self.inlining
                && self.c.options.enable_inlining
                && inline::is_eligible(ts, self.c.options, self.c.method, m)
            {
                return self.inline_call(m, &args);
            }
            let sym = self
                .c
                .func
                .dfg
                .symbol(SymbolName::new(ts.symbol_name(m)), Ty::Ptr);
            self.finish_call(md.sig.ret, sym, &args)
        } else {
            // Virtual dispatch through the method table pointer stored at
            // the front of the object.
            let slot = self.c.type_layout.method_slot(m).ok_or_else(|| {
                CodegenError::TypeSystem(format!("no vtable slot for {}", ts.symbol_name(m)))
            })?;
            let this = args[0];
            let ptr_size = self.c.type_layout.ptr_size();
            let load = self.load_opcode_ptr();
            let zero = self.c.func.dfg.iconst32(0);
            let vtable = self.def(Ty::Ptr);
            let mut data = Function::inst_binary(load, vtable, this, zero);
            data.ty = Some(Ty::Ptr);
            self.emit(data);
            let off = self.c.func.dfg.iconst32((slot as u32 * ptr_size) as i32);
            let fnptr = self.def(Ty::Ptr);
            let mut data = Function::inst_binary(load, fnptr, vtable, off);
            data.ty = Some(Ty::Ptr);
            self.emit(data);
            self.finish_call(md.sig.ret, fnptr, &args)
        }
    }

    fn finish_call(
        &mut self,
        ret: Option<crate::typesys::TypeRef>,
        target: Operand,
        args: &[Operand],
    ) -> CodegenResult<()> {
        let mut data = InstData::new(Opcode::Call);
        let result = ret.map(|t| {
            let ty = value_ty(self.c.type_layout, t);
            self.def(ty)
        });
        if let Some(result) = result {
            data.results.push(result);
        }
        data.operands.push(target);
        data.operands.extend(args.iter().copied());
        self.emit(data);
        if let Some(result) = result {
            self.push(result);
        }
        Ok(())
    }

    /// Inline a small straight-line callee by re-decoding its body at the
    /// call site.
    fn inline_call(&mut self, m: MethodRef, args: &[Operand]) -> CodegenResult<()> {
        self.c.counters.update("decode.inlined", 1);
        let body = self
            .c
            .type_system
            .method(m)
            .body
            .clone()
            .expect("eligibility checked");
        let layout = self.c.type_layout;

        let saved_params = std::mem::replace(&mut self.c.func.params, args.to_vec());
        let saved_locals = std::mem::take(&mut self.c.func.locals);
        let saved_ret = self.ret_vreg;
        let saved_stack_len = self.stack.len();
        for &local in &body.locals {
            let ty = value_ty(layout, local);
            let vreg = self.c.func.dfg.make_virtual_reg(ty);
            self.zero_init(vreg, ty);
            self.c.func.locals.push(vreg);
        }
        let ret = self
            .c
            .type_system
            .method(m)
            .sig
            .ret
            .map(|t| value_ty(layout, t))
            .map(|ty| self.c.func.dfg.make_virtual_reg(ty));
        self.ret_vreg = ret;
        self.inlining = true;

        for op in &body.ops {
            match op {
                CilOp::Ret => {
                    if let Some(ret) = ret {
                        let v = self.pop()?;
                        self.emit_move(ret, v);
                    }
                    break;
                }
                other => self.translate(u32::MAX, other)?,
            }
        }

        self.inlining = false;
        self.ret_vreg = saved_ret;
        self.c.func.params = saved_params;
        self.c.func.locals = saved_locals;
        self.stack.truncate(saved_stack_len);
        if let Some(ret) = ret {
            self.push(ret);
        }
        Ok(())
    }

    fn newobj(&mut self, ctor: MethodRef) -> CodegenResult<()> {
        let ts = self.c.type_system;
        let md = ts.method(ctor);
        let class = md.decl_type.ok_or_else(|| {
            CodegenError::TypeSystem("constructor without declaring type".to_string())
        })?;
        let size = self.c.type_layout.type_size(class);

        // Allocate through the runtime, then run the constructor.
        let alloc = self
            .c
            .func
            .dfg
            .symbol(SymbolName::from("mosa_rt_allocate"), Ty::Ptr);
        let size_const = self.c.func.dfg.iconst32(size as i32);
        let obj = self.def(Ty::Object);
        let mut data = InstData::new(Opcode::Call);
        data.results.push(obj);
        data.operands.push(alloc);
        data.operands.push(size_const);
        self.emit(data);

        let argc = md.sig.params.len();
        if self.stack.len() < argc {
            return Err(CodegenError::Verifier("newobj underflows the stack".to_string()));
        }
        let mut args = vec![obj];
        args.extend(self.stack.split_off(self.stack.len() - argc));
        let sym = self
            .c
            .func
            .dfg
            .symbol(SymbolName::new(ts.symbol_name(ctor)), Ty::Ptr);
        self.finish_call(None, sym, &args)?;
        self.push(obj);
        Ok(())
    }

    // ---------------- fields ----------------

    fn load_opcode_ptr(&self) -> Opcode {
        if self.c.type_layout.ptr_size() == 8 {
            Opcode::Load64
        } else {
            Opcode::Load32
        }
    }

    fn field_access(&mut self, f: FieldRef, is_static: bool) -> CodegenResult<(Operand, Operand, Ty)> {
        let ts = self.c.type_system;
        let fd = ts.field(f);
        let field_ty = fd.ty;
        let ty = value_ty(self.c.type_layout, field_ty);
        if is_static {
            let decl = fd.decl_type.expect("field without declaring type");
            let name = format!("{}::{}", ts.ty(decl).name, fd.name);
            let base = self.c.func.dfg.symbol(SymbolName::new(name), Ty::Ptr);
            let zero = self.c.func.dfg.iconst32(0);
            Ok((base, zero, ty))
        } else {
            let obj = self.pop()?;
            let base = match self.c.func.dfg.ty(obj) {
                // Field access on a by-value struct goes through its
                // address; the register allocator keeps compounds in
                // stack slots.
                Ty::Value(_) => self.unary(Opcode::AddressOf, Ty::Ptr, obj),
                _ => obj,
            };
            let offset = self.c.type_layout.field_offset(f);
            let off = self.c.func.dfg.iconst32(offset as i32);
            Ok((base, off, ty))
        }
    }

    fn load_field(&mut self, f: FieldRef, is_static: bool) -> CodegenResult<()> {
        let (base, off, ty) = self.field_access(f, is_static)?;
        let fd = self.c.type_system.field(f);
        let prim = self.c.type_system.ty(fd.ty).primitive();
        let opcode = match (ty, prim) {
            (_, Some(PrimKind::Bool | PrimKind::U1)) => Opcode::LoadZeroExtend8x32,
            (_, Some(PrimKind::I1)) => Opcode::LoadSignExtend8x32,
            (_, Some(PrimKind::I2)) => Opcode::LoadSignExtend16x32,
            (_, Some(PrimKind::Char | PrimKind::U2)) => Opcode::LoadZeroExtend16x32,
            (Ty::I64, _) => Opcode::Load64,
            (Ty::R4, _) => Opcode::LoadR4,
            (Ty::R8, _) => Opcode::LoadR8,
            (Ty::Value(t), _) if self.c.type_layout.is_stored_on_stack(t) => Opcode::LoadCompound,
            (Ty::Ptr | Ty::Object | Ty::Value(_), _) => self.load_opcode_ptr(),
            _ => Opcode::Load32,
        };
        let result = self.def(ty);
        let mut data = Function::inst_binary(opcode, result, base, off);
        data.ty = Some(ty);
        self.emit(data);
        self.push(result);
        Ok(())
    }

    fn store_field(&mut self, f: FieldRef, is_static: bool) -> CodegenResult<()> {
        let value = self.pop()?;
        let (base, off, ty) = if is_static {
            self.field_access(f, true)?
        } else {
            self.field_access(f, false)?
        };
        let fd = self.c.type_system.field(f);
        let prim = self.c.type_system.ty(fd.ty).primitive();
        let opcode = match (ty, prim) {
            (_, Some(PrimKind::Bool | PrimKind::U1 | PrimKind::I1)) => Opcode::Store8,
            (_, Some(PrimKind::Char | PrimKind::U2 | PrimKind::I2)) => Opcode::Store16,
            (Ty::I64, _) => Opcode::Store64,
            (Ty::R4, _) => Opcode::StoreR4,
            (Ty::R8, _) => Opcode::StoreR8,
            (Ty::Value(t), _) if self.c.type_layout.is_stored_on_stack(t) => Opcode::StoreCompound,
            (Ty::Ptr | Ty::Object | Ty::Value(_), _) => {
                if self.c.type_layout.ptr_size() == 8 {
                    Opcode::Store64
                } else {
                    Opcode::Store32
                }
            }
            _ => Opcode::Store32,
        };
        let mut data = InstData::new(opcode);
        data.operands.push(base);
        data.operands.push(off);
        data.operands.push(value);
        data.ty = Some(ty);
        self.emit(data);
        Ok(())
    }
}

fn int_cc(cmp: CilCmp) -> IntCC {
    match cmp {
        CilCmp::Eq => IntCC::Equal,
        CilCmp::Ne => IntCC::NotEqual,
        CilCmp::Lt => IntCC::SignedLessThan,
        CilCmp::Le => IntCC::SignedLessThanOrEqual,
        CilCmp::Gt => IntCC::SignedGreaterThan,
        CilCmp::Ge => IntCC::SignedGreaterThanOrEqual,
        CilCmp::LtUn => IntCC::UnsignedLessThan,
        CilCmp::LeUn => IntCC::UnsignedLessThanOrEqual,
        CilCmp::GtUn => IntCC::UnsignedGreaterThan,
        CilCmp::GeUn => IntCC::UnsignedGreaterThanOrEqual,
    }
}

fn float_cc(cmp: CilCmp) -> FloatCC {
    match cmp {
        CilCmp::Eq => FloatCC::Equal,
        CilCmp::Ne => FloatCC::NotEqual,
        CilCmp::Lt => FloatCC::LessThan,
        CilCmp::Le => FloatCC::LessThanOrEqual,
        CilCmp::Gt => FloatCC::GreaterThan,
        CilCmp::Ge => FloatCC::GreaterThanOrEqual,
        CilCmp::LtUn => FloatCC::UnorderedOrLessThan,
        CilCmp::LeUn => FloatCC::UnorderedOrLessThanOrEqual,
        CilCmp::GtUn => FloatCC::UnorderedOrGreaterThan,
        CilCmp::GeUn => FloatCC::UnorderedOrGreaterThanOrEqual,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Options;
    use crate::type_layout::TypeLayout;
    use crate::typesys::{MethodData, MethodSig, TypeData, TypeSystem};
    use std::sync::Arc;

    fn compile_body(body: CilBody, ret: bool) -> crate::ir::Function {
        let mut ts = TypeSystem::with_corlib();
        let object = ts.lookup("System.Object").unwrap();
        let i4 = ts.lookup("System.Int32").unwrap();
        let holder = ts.add_type(TypeData::class("T", Some(object)));
        let sig = MethodSig::new(vec![i4, i4], ret.then_some(i4));
        let m = ts.add_method(
            holder,
            MethodData::new("M", sig).static_().with_body(body),
        );
        let ts = Arc::new(ts);
        let layout = TypeLayout::new(ts.clone(), 4, 4);
        let isa = crate::isa::lookup(&"i686-unknown-none".parse().unwrap()).unwrap();
        let options = Options::no_opt();
        let mut compiler = MethodCompiler::new(m, &ts, &layout, &*isa, &options);
        DecodeStage.run(&mut compiler).unwrap();
        compiler.func
    }

    #[test]
    fn straight_line_add() {
        let body = CilBody::from_ops(vec![
            CilOp::LdArg(0),
            CilOp::LdArg(1),
            CilOp::Add,
            CilOp::Ret,
        ]);
        let func = compile_body(body, true);

        // Pre-header, one body block, exit.
        let blocks: Vec<_> = func.layout.blocks().collect();
        assert_eq!(blocks.len(), 3);
        // Pre-header loads two parameters.
        let entry_ops: Vec<_> = func
            .layout
            .block_insts(blocks[0])
            .map(|i| func.dfg.insts[i].opcode)
            .collect();
        assert_eq!(
            entry_ops,
            [Opcode::LoadParam, Opcode::LoadParam, Opcode::Jmp]
        );
        // The body adds and jumps to the exit.
        let body_ops: Vec<_> = func
            .layout
            .block_insts(blocks[1])
            .map(|i| func.dfg.insts[i].opcode)
            .collect();
        assert_eq!(body_ops, [Opcode::Add32, Opcode::Move32, Opcode::Jmp]);
        // The unique exit returns.
        let exit_ops: Vec<_> = func
            .layout
            .block_insts(blocks[2])
            .map(|i| func.dfg.insts[i].opcode)
            .collect();
        assert_eq!(exit_ops, [Opcode::Return]);
    }

    #[test]
    fn conditional_produces_compare_branch_group() {
        // return a < b ? a : b
        let body = CilBody::from_ops(vec![
            CilOp::LdArg(0),
            CilOp::LdArg(1),
            CilOp::Bc(CilCmp::Lt, 5),
            CilOp::LdArg(1),
            CilOp::Ret,
            // 5:
            CilOp::LdArg(0),
            CilOp::Ret,
        ]);
        let func = compile_body(body, true);

        // The block with the conditional branch must end with the
        // compare-branch followed by the closing jump.
        let mut found = false;
        for block in func.layout.blocks() {
            let ops: Vec<_> = func
                .layout
                .block_insts(block)
                .map(|i| func.dfg.insts[i].opcode)
                .collect();
            if ops.contains(&Opcode::CompareIntBranch32) {
                let pos = ops
                    .iter()
                    .position(|&o| o == Opcode::CompareIntBranch32)
                    .unwrap();
                assert_eq!(ops[pos + 1..], [Opcode::Jmp]);
                found = true;
            }
        }
        assert!(found);
    }

    #[test]
    fn every_block_ends_with_a_terminator() {
        let body = CilBody::from_ops(vec![
            CilOp::LdArg(0),
            CilOp::BrTrue(4),
            CilOp::LdArg(1),
            CilOp::Ret,
            // 4:
            CilOp::LdArg(0),
            CilOp::Ret,
        ]);
        let func = compile_body(body, true);
        for block in func.layout.blocks() {
            let last = func
                .layout
                .block_insts(block)
                .filter(|&i| !func.dfg.insts[i].is_empty_node())
                .next_back()
                .expect("no empty blocks");
            assert!(
                func.dfg.insts[last].opcode.is_terminator(),
                "block {block} does not end in a terminator"
            );
        }
    }
}
