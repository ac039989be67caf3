//! x86/x64 binary code emission.

use super::regs;
use crate::binemit::{CodeBuffer, Reloc};
use crate::ir::{
    Block, CondCode, ConstValue, FloatCC, Function, Inst, InstData, IntCC, Opcode, Operand,
    OperandData, SymbolName, Ty,
};
use crate::result::{CodegenError, CodegenResult};

/// A resolved register/memory operand.
#[derive(Clone, Debug)]
enum Rm {
    Reg(u8),
    Mem { base: u8, disp: i32 },
    Sym { name: SymbolName, disp: i32 },
}

struct Emitter<'a> {
    func: &'a Function,
    buf: &'a mut CodeBuffer,
    x64: bool,
}

/// Emit the whole function.
pub fn emit(func: &Function, buf: &mut CodeBuffer, x64: bool) -> CodegenResult<()> {
    let mut e = Emitter { func, buf, x64 };
    e.prologue();
    let blocks: Vec<Block> = func.layout.blocks().collect();
    for block in blocks {
        e.buf.bind_label(block);
        for inst in func.layout.block_insts(block) {
            let data = &func.dfg.insts[inst];
            if data.is_empty_node() {
                continue;
            }
            if !func.check_node_arity(inst) {
                return Err(CodegenError::Verifier(format!(
                    "node shape does not match descriptor for {}",
                    data.opcode
                )));
            }
            e.buf.mark_inst(inst);
            e.emit_inst(inst, data)?;
        }
    }
    Ok(())
}

impl Emitter<'_> {
    fn prologue(&mut self) {
        // push ebp; mov ebp, esp; sub esp, frame.
        self.buf.put1(0x55);
        self.rex_rr(true, 4, 5);
        self.buf.put1(0x89);
        self.buf.put1(0xe5);
        let frame = self.func.frame_size;
        if frame > 0 {
            self.rex_rr(true, 0, 4);
            self.buf.put1(0x81);
            self.buf.put1(0xec);
            self.buf.put4(frame);
        }
    }

    fn epilogue(&mut self) {
        // mov esp, ebp; pop ebp; ret.
        self.rex_rr(true, 4, 5);
        self.buf.put1(0x89);
        self.buf.put1(0xec);
        self.buf.put1(0x5d);
        self.buf.put1(0xc3);
    }

    // ---------------- encoding primitives ----------------

    /// REX for a reg/reg form; emitted only when needed.
    fn rex_rr(&mut self, w: bool, reg: u8, rm: u8) {
        let w = w && self.x64;
        let r = (reg >> 3) & 1;
        let b = (rm >> 3) & 1;
        if w || r != 0 || b != 0 {
            self.buf
                .put1(0x40 | ((w as u8) << 3) | (r << 2) | b);
        }
    }

    fn rex_mem(&mut self, w: bool, reg: u8, base: u8) {
        self.rex_rr(w, reg, base)
    }

    fn modrm(&mut self, md: u8, reg: u8, rm: u8) {
        self.buf.put1((md << 6) | ((reg & 7) << 3) | (rm & 7));
    }

    /// ModR/M (+ SIB + displacement) addressing `[base + disp]`.
    fn mem(&mut self, reg: u8, base: u8, disp: i32) {
        let basel = base & 7;
        let need_sib = basel == 4;
        // EBP/R13 as base require an explicit displacement byte.
        let md = if disp == 0 && basel != 5 {
            0b00
        } else if (-128..=127).contains(&disp) {
            0b01
        } else {
            0b10
        };
        self.modrm(md, reg, if need_sib { 4 } else { basel });
        if need_sib {
            // scale=0, index=none, base.
            self.buf.put1(0x24);
        }
        match md {
            0b00 => {}
            0b01 => self.buf.put1(disp as u8),
            _ => self.buf.put4(disp as u32),
        }
    }

    /// ModR/M for an absolute 32-bit address with a relocation.
    fn mem_abs(&mut self, reg: u8, name: &SymbolName, disp: i32) {
        self.modrm(0b00, reg, 0b101);
        self.buf
            .reloc(Reloc::Abs4, name.clone(), i64::from(disp));
        self.buf.put4(0);
    }

    fn rm(&mut self, op_reg: u8, rm: &Rm) -> CodegenResult<()> {
        match rm {
            Rm::Reg(r) => self.modrm(0b11, op_reg, *r),
            Rm::Mem { base, disp } => self.mem(op_reg, *base, *disp),
            Rm::Sym { name, disp } => {
                let name = name.clone();
                self.mem_abs(op_reg, &name, *disp);
            }
        }
        Ok(())
    }

    // ---------------- operand resolution ----------------

    fn resolve(&self, operand: Operand) -> CodegenResult<Rm> {
        match &self.func.dfg.operands[operand] {
            OperandData::CpuReg { reg, .. } => Ok(Rm::Reg(reg.hw_enc())),
            OperandData::StackLocal { slot, .. } => {
                let offset = self.func.stack_slots[*slot].offset.ok_or_else(|| {
                    CodegenError::Verifier("stack slot without an offset".to_string())
                })?;
                Ok(Rm::Mem {
                    base: regs::EBP.hw_enc(),
                    disp: offset,
                })
            }
            OperandData::Symbol { name, .. } => Ok(Rm::Sym {
                name: name.clone(),
                disp: 0,
            }),
            OperandData::VirtualReg { .. } => Err(CodegenError::Verifier(
                "virtual register survived allocation".to_string(),
            )),
            OperandData::Constant { .. } => Err(CodegenError::Verifier(
                "constant in a register/memory position".to_string(),
            )),
        }
    }

    fn reg_of(&self, operand: Operand) -> CodegenResult<u8> {
        match self.resolve(operand)? {
            Rm::Reg(r) => Ok(r),
            _ => Err(CodegenError::Verifier(
                "operand must reside in a register".to_string(),
            )),
        }
    }

    fn imm_of(&self, operand: Operand) -> Option<i64> {
        match self.func.dfg.operands[operand].constant()? {
            ConstValue::Int(v) => Some(v),
            ConstValue::Null => Some(0),
            _ => None,
        }
    }

    fn is_imm(&self, operand: Operand) -> bool {
        self.imm_of(operand).is_some()
    }

    fn wide(&self, data: &InstData) -> bool {
        data.ty == Some(Ty::I64)
    }

    // ---------------- instructions ----------------

    fn emit_inst(&mut self, _inst: Inst, data: &InstData) -> CodegenResult<()> {
        use Opcode::*;
        match data.opcode {
            X86Mov => self.mov(data),
            X86Movss => self.sse_mov(data, 0xf3),
            X86Movsd => self.sse_mov(data, 0xf2),
            X86MovLoad => self.mov_load(data),
            X86MovStore => self.mov_store(data),
            X86Movsx8 => self.ext_rr(data, &[0x0f, 0xbe]),
            X86Movsx16 => self.ext_rr(data, &[0x0f, 0xbf]),
            X86Movzx8 => self.ext_rr(data, &[0x0f, 0xb6]),
            X86Movzx16 => self.ext_rr(data, &[0x0f, 0xb7]),
            X86Movsxd => {
                let dst = self.reg_of(data.results[0])?;
                let src = self.resolve(data.operands[0])?;
                self.rex_rr(true, dst, rm_enc(&src));
                self.buf.put1(0x63);
                self.rm(dst, &src)
            }
            X86MovsxLoad8 => self.ext_load(data, &[0x0f, 0xbe]),
            X86MovsxLoad16 => self.ext_load(data, &[0x0f, 0xbf]),
            X86MovzxLoad8 => self.ext_load(data, &[0x0f, 0xb6]),
            X86MovzxLoad16 => self.ext_load(data, &[0x0f, 0xb7]),
            X86MovssLoad => self.sse_load(data, 0xf3, 0x10),
            X86MovsdLoad => self.sse_load(data, 0xf2, 0x10),
            X86MovssStore => self.sse_store(data, 0xf3),
            X86MovsdStore => self.sse_store(data, 0xf2),
            X86Lea => {
                let dst = self.reg_of(data.results[0])?;
                let rm = self.resolve(data.operands[0])?;
                self.rex_mem(true, dst, rm_enc(&rm));
                self.buf.put1(0x8d);
                self.rm(dst, &rm)
            }

            X86Add => self.alu(data, 0x01, 0x03, 0),
            X86Adc => self.alu(data, 0x11, 0x13, 2),
            X86Sub => self.alu(data, 0x29, 0x2b, 5),
            X86Sbb => self.alu(data, 0x19, 0x1b, 3),
            X86And => self.alu(data, 0x21, 0x23, 4),
            X86Or => self.alu(data, 0x09, 0x0b, 1),
            X86Xor => self.alu(data, 0x31, 0x33, 6),
            X86Cmp => self.alu(data, 0x39, 0x3b, 7),
            X86Imul => {
                let dst = self.reg_of(data.results[0])?;
                let src = self.resolve(data.operands[1])?;
                self.rex_rr(self.wide(data), dst, rm_enc(&src));
                self.buf.put1(0x0f);
                self.buf.put1(0xaf);
                self.rm(dst, &src)
            }
            X86Mul => self.group3(data, data.operands[1], 4),
            X86Idiv => self.group3(data, data.operands[2], 7),
            X86Div => self.group3(data, data.operands[2], 6),
            X86Not => self.group3(data, data.operands[0], 2),
            X86Cdq => {
                if self.wide(data) {
                    self.buf.put1(0x48);
                }
                self.buf.put1(0x99);
                Ok(())
            }
            X86Shl => self.shift(data, 4),
            X86Shr => self.shift(data, 5),
            X86Sar => self.shift(data, 7),

            X86Ucomiss => self.sse_cmp(data, None),
            X86Ucomisd => self.sse_cmp(data, Some(0x66)),
            X86Setcc => self.setcc(data),
            X86Jcc => {
                let cc = match data.cc {
                    Some(CondCode::Int(cc)) => cc,
                    _ => {
                        return Err(CodegenError::Verifier(
                            "jcc with a non-integer condition".to_string(),
                        ))
                    }
                };
                self.buf.put1(0x0f);
                self.buf.put1(0x80 | int_cc_nibble(cc));
                self.buf.use_label_rel32(data.blocks[0]);
                Ok(())
            }
            X86Jmp => {
                self.buf.put1(0xe9);
                self.buf.use_label_rel32(data.blocks[0]);
                Ok(())
            }
            X86Call => self.call(data),
            X86Ret => {
                self.epilogue();
                Ok(())
            }
            X86Push => {
                let value = data.operands[0];
                if let Some(imm) = self.imm_of(value) {
                    self.buf.put1(0x68);
                    self.buf.put4(imm as u32);
                } else {
                    match self.resolve(value)? {
                        Rm::Reg(r) => {
                            self.rex_rr(false, 0, r);
                            self.buf.put1(0x50 + (r & 7));
                        }
                        rm => {
                            self.rex_mem(false, 6, rm_enc(&rm));
                            self.buf.put1(0xff);
                            self.rm(6, &rm)?;
                        }
                    }
                }
                Ok(())
            }
            X86Pop => {
                let r = self.reg_of(data.results[0])?;
                self.rex_rr(false, 0, r);
                self.buf.put1(0x58 + (r & 7));
                Ok(())
            }

            X86Addss => self.sse_alu(data, 0xf3, 0x58),
            X86Addsd => self.sse_alu(data, 0xf2, 0x58),
            X86Subss => self.sse_alu(data, 0xf3, 0x5c),
            X86Subsd => self.sse_alu(data, 0xf2, 0x5c),
            X86Mulss => self.sse_alu(data, 0xf3, 0x59),
            X86Mulsd => self.sse_alu(data, 0xf2, 0x59),
            X86Divss => self.sse_alu(data, 0xf3, 0x5e),
            X86Divsd => self.sse_alu(data, 0xf2, 0x5e),
            X86Cvtsi2ss => self.cvt_int_to_float(data, 0xf3),
            X86Cvtsi2sd => self.cvt_int_to_float(data, 0xf2),
            X86Cvttss2si => self.cvt_float_to_int(data, 0xf3),
            X86Cvttsd2si => self.cvt_float_to_int(data, 0xf2),
            X86Cvtss2sd => self.cvt_float_float(data, 0xf3),
            X86Cvtsd2ss => self.cvt_float_float(data, 0xf2),

            other => Err(CodegenError::NotSupported(format!(
                "no x86 encoding for {other}"
            ))),
        }
    }

    fn mov(&mut self, data: &InstData) -> CodegenResult<()> {
        let w = self.wide(data);
        let dst = self.resolve(data.results[0])?;
        let src = data.operands[0];

        // Symbol source: load the symbol's address as an immediate.
        if let OperandData::Symbol { name, .. } = &self.func.dfg.operands[src] {
            let name = name.clone();
            let dst = match dst {
                Rm::Reg(r) => r,
                _ => {
                    return Err(CodegenError::Verifier(
                        "symbol address into memory".to_string(),
                    ))
                }
            };
            if self.x64 {
                self.rex_rr(true, 0, dst);
                self.buf.put1(0xb8 + (dst & 7));
                self.buf.reloc(Reloc::Abs8, name, 0);
                self.buf.put8(0);
            } else {
                self.buf.put1(0xb8 + dst);
                self.buf.reloc(Reloc::Abs4, name, 0);
                self.buf.put4(0);
            }
            return Ok(());
        }

        if let Some(imm) = self.imm_of(src) {
            match dst {
                Rm::Reg(r) => {
                    if w && i32::try_from(imm).is_err() {
                        self.rex_rr(true, 0, r);
                        self.buf.put1(0xb8 + (r & 7));
                        self.buf.put8(imm as u64);
                    } else if w {
                        self.rex_rr(true, 0, r);
                        self.buf.put1(0xc7);
                        self.modrm(0b11, 0, r);
                        self.buf.put4(imm as u32);
                    } else {
                        self.rex_rr(false, 0, r);
                        self.buf.put1(0xb8 + (r & 7));
                        self.buf.put4(imm as u32);
                    }
                }
                rm => {
                    self.rex_mem(w, 0, rm_enc(&rm));
                    self.buf.put1(0xc7);
                    self.rm(0, &rm)?;
                    self.buf.put4(imm as u32);
                }
            }
            return Ok(());
        }

        let src = self.resolve(src)?;
        match (&dst, &src) {
            (Rm::Reg(d), _) => {
                self.rex_rr(w, *d, rm_enc(&src));
                self.buf.put1(0x8b);
                let d = *d;
                self.rm(d, &src)
            }
            (_, Rm::Reg(s)) => {
                self.rex_mem(w, *s, rm_enc(&dst));
                self.buf.put1(0x89);
                let s = *s;
                self.rm(s, &dst)
            }
            _ => Err(CodegenError::Verifier(
                "memory-to-memory move".to_string(),
            )),
        }
    }

    fn mov_load(&mut self, data: &InstData) -> CodegenResult<()> {
        let w = self.wide(data);
        let dst = self.reg_of(data.results[0])?;
        let disp = self
            .imm_of(data.operands[1])
            .ok_or_else(|| CodegenError::Verifier("load offset is not constant".to_string()))?
            as i32;
        let rm = self.base_mem(data.operands[0], disp)?;
        self.rex_mem(w, dst, rm_enc(&rm));
        self.buf.put1(0x8b);
        self.rm(dst, &rm)
    }

    fn mov_store(&mut self, data: &InstData) -> CodegenResult<()> {
        let disp = self
            .imm_of(data.operands[1])
            .ok_or_else(|| CodegenError::Verifier("store offset is not constant".to_string()))?
            as i32;
        let rm = self.base_mem(data.operands[0], disp)?;
        let value = data.operands[2];
        let ty = data.ty.unwrap_or(Ty::I32);
        if ty == Ty::I16 {
            self.buf.put1(0x66);
        }
        let w = ty == Ty::I64;
        if let Some(imm) = self.imm_of(value) {
            self.rex_mem(w, 0, rm_enc(&rm));
            self.buf.put1(match ty {
                Ty::I8 => 0xc6,
                _ => 0xc7,
            });
            self.rm(0, &rm)?;
            match ty {
                Ty::I8 => self.buf.put1(imm as u8),
                Ty::I16 => self.buf.put2(imm as u16),
                _ => self.buf.put4(imm as u32),
            }
            return Ok(());
        }
        let v = self.reg_of(value)?;
        if ty == Ty::I8 && !self.x64 && v >= 4 {
            return Err(CodegenError::NotSupported(
                "byte store from a register without a byte form".to_string(),
            ));
        }
        self.rex_mem(w, v, rm_enc(&rm));
        self.buf.put1(match ty {
            Ty::I8 => 0x88,
            _ => 0x89,
        });
        self.rm(v, &rm)
    }

    /// `[base + disp]` where base may be a register or a symbol.
    fn base_mem(&mut self, base: Operand, disp: i32) -> CodegenResult<Rm> {
        match &self.func.dfg.operands[base] {
            OperandData::Symbol { name, .. } => {
                if self.x64 {
                    // Materialize the absolute address in the scratch
                    // register first.
                    let scratch = regs::SCRATCH64_INT[0].hw_enc();
                    let name = name.clone();
                    self.rex_rr(true, 0, scratch);
                    self.buf.put1(0xb8 + (scratch & 7));
                    self.buf.reloc(Reloc::Abs8, name, 0);
                    self.buf.put8(0);
                    Ok(Rm::Mem {
                        base: scratch,
                        disp,
                    })
                } else {
                    Ok(Rm::Sym {
                        name: name.clone(),
                        disp,
                    })
                }
            }
            _ => {
                let base = self.reg_of(base)?;
                Ok(Rm::Mem { base, disp })
            }
        }
    }

    fn ext_rr(&mut self, data: &InstData, op: &[u8]) -> CodegenResult<()> {
        let dst = self.reg_of(data.results[0])?;
        let src = self.resolve(data.operands[0])?;
        self.rex_rr(false, dst, rm_enc(&src));
        for &b in op {
            self.buf.put1(b);
        }
        self.rm(dst, &src)
    }

    fn ext_load(&mut self, data: &InstData, op: &[u8]) -> CodegenResult<()> {
        let dst = self.reg_of(data.results[0])?;
        let disp = self
            .imm_of(data.operands[1])
            .ok_or_else(|| CodegenError::Verifier("load offset is not constant".to_string()))?
            as i32;
        let rm = self.base_mem(data.operands[0], disp)?;
        self.rex_mem(false, dst, rm_enc(&rm));
        for &b in op {
            self.buf.put1(b);
        }
        self.rm(dst, &rm)
    }

    /// Two-address ALU: `op0 (== result) OP= op1`.
    fn alu(&mut self, data: &InstData, op_mr: u8, op_rm: u8, ext: u8) -> CodegenResult<()> {
        let w = self.wide(data);
        let lhs = self.resolve(data.operands[0])?;
        let rhs = data.operands[1];
        if let Some(imm) = self.imm_of(rhs) {
            self.rex_mem(w, ext, rm_enc(&lhs));
            if (-128..=127).contains(&imm) {
                self.buf.put1(0x83);
                self.rm(ext, &lhs)?;
                self.buf.put1(imm as u8);
            } else {
                self.buf.put1(0x81);
                self.rm(ext, &lhs)?;
                self.buf.put4(imm as u32);
            }
            return Ok(());
        }
        let rhs = self.resolve(rhs)?;
        match (&lhs, &rhs) {
            (_, Rm::Reg(s)) => {
                self.rex_mem(w, *s, rm_enc(&lhs));
                self.buf.put1(op_mr);
                let s = *s;
                self.rm(s, &lhs)
            }
            (Rm::Reg(d), _) => {
                self.rex_mem(w, *d, rm_enc(&rhs));
                self.buf.put1(op_rm);
                let d = *d;
                self.rm(d, &rhs)
            }
            _ => Err(CodegenError::Verifier(
                "two memory operands in an ALU form".to_string(),
            )),
        }
    }

    /// F7-group unary forms over one r/m operand.
    fn group3(&mut self, data: &InstData, operand: Operand, ext: u8) -> CodegenResult<()> {
        let w = self.wide(data);
        let rm = self.resolve(operand)?;
        self.rex_mem(w, ext, rm_enc(&rm));
        self.buf.put1(0xf7);
        self.rm(ext, &rm)
    }

    fn shift(&mut self, data: &InstData, ext: u8) -> CodegenResult<()> {
        let w = self.wide(data);
        let value = self.resolve(data.operands[0])?;
        let count = data.operands[1];
        if let Some(imm) = self.imm_of(count) {
            self.rex_mem(w, ext, rm_enc(&value));
            self.buf.put1(0xc1);
            self.rm(ext, &value)?;
            self.buf.put1(imm as u8);
        } else {
            // Count in CL.
            debug_assert_eq!(self.reg_of(count)?, regs::ECX.hw_enc());
            self.rex_mem(w, ext, rm_enc(&value));
            self.buf.put1(0xd3);
            self.rm(ext, &value)?;
        }
        Ok(())
    }

    fn setcc(&mut self, data: &InstData) -> CodegenResult<()> {
        // Result was pinned to ECX by the fixed-register stage.
        debug_assert_eq!(self.reg_of(data.results[0])?, regs::ECX.hw_enc());
        match data.cc {
            Some(CondCode::Int(cc)) => {
                self.buf.put1(0x0f);
                self.buf.put1(0x90 | int_cc_nibble(cc));
                self.buf.put1(0xc1); // cl
            }
            Some(CondCode::Float(cc)) => match cc {
                FloatCC::Equal => {
                    // sete cl; setnp ch; and cl, ch.
                    self.buf.put1(0x0f);
                    self.buf.put1(0x94);
                    self.buf.put1(0xc1);
                    self.buf.put1(0x0f);
                    self.buf.put1(0x9b);
                    self.buf.put1(0xc5);
                    self.buf.put1(0x20);
                    self.buf.put1(0xe9);
                }
                FloatCC::NotEqual => {
                    // setne cl; setp ch; or cl, ch.
                    self.buf.put1(0x0f);
                    self.buf.put1(0x95);
                    self.buf.put1(0xc1);
                    self.buf.put1(0x0f);
                    self.buf.put1(0x9a);
                    self.buf.put1(0xc5);
                    self.buf.put1(0x08);
                    self.buf.put1(0xe9);
                }
                FloatCC::GreaterThan => self.set_simple(0x97)?,
                FloatCC::GreaterThanOrEqual => self.set_simple(0x93)?,
                FloatCC::UnorderedOrLessThan => self.set_simple(0x92)?,
                FloatCC::UnorderedOrLessThanOrEqual => self.set_simple(0x96)?,
                other => {
                    return Err(CodegenError::Verifier(format!(
                        "unnormalized float condition {other} at emission"
                    )))
                }
            },
            None => {
                return Err(CodegenError::Verifier(
                    "setcc without a condition".to_string(),
                ))
            }
        }
        // movzx ecx, cl.
        self.buf.put1(0x0f);
        self.buf.put1(0xb6);
        self.buf.put1(0xc9);
        Ok(())
    }

    fn set_simple(&mut self, op: u8) -> CodegenResult<()> {
        self.buf.put1(0x0f);
        self.buf.put1(op);
        self.buf.put1(0xc1);
        Ok(())
    }

    fn call(&mut self, data: &InstData) -> CodegenResult<()> {
        let target = data.operands[0];
        match &self.func.dfg.operands[target] {
            OperandData::Symbol { name, .. } => {
                self.buf.put1(0xe8);
                self.buf.reloc(Reloc::X86PCRel4, name.clone(), -4);
                self.buf.put4(0);
            }
            _ => {
                let rm = self.resolve(target)?;
                self.rex_mem(false, 2, rm_enc(&rm));
                self.buf.put1(0xff);
                self.rm(2, &rm)?;
            }
        }
        // Release the outgoing argument area.
        let total = self.imm_of(data.operands[1]).unwrap_or(0);
        if total > 0 {
            self.rex_rr(true, 0, 4);
            self.buf.put1(0x81);
            self.buf.put1(0xc4);
            self.buf.put4(total as u32);
        }
        Ok(())
    }

    // ---------------- SSE ----------------

    fn sse_prefix(&mut self, prefix: u8) {
        self.buf.put1(prefix);
    }

    fn sse_mov(&mut self, data: &InstData, prefix: u8) -> CodegenResult<()> {
        let dst = self.resolve(data.results[0])?;
        let src = data.operands[0];

        if let Some(value) = self.func.dfg.operands[src].constant() {
            let dst = match dst {
                Rm::Reg(r) => r,
                _ => {
                    return Err(CodegenError::Verifier(
                        "float constant into memory".to_string(),
                    ))
                }
            };
            return self.sse_load_const(dst, prefix, value);
        }

        let src = self.resolve(src)?;
        match (&dst, &src) {
            (Rm::Reg(d), _) => {
                self.sse_prefix(prefix);
                self.rex_mem(false, *d, rm_enc(&src));
                self.buf.put1(0x0f);
                self.buf.put1(0x10);
                let d = *d;
                self.rm(d, &src)
            }
            (_, Rm::Reg(s)) => {
                self.sse_prefix(prefix);
                self.rex_mem(false, *s, rm_enc(&dst));
                self.buf.put1(0x0f);
                self.buf.put1(0x11);
                let s = *s;
                self.rm(s, &dst)
            }
            _ => Err(CodegenError::Verifier(
                "memory-to-memory float move".to_string(),
            )),
        }
    }

    /// Materialize a float constant through the stack.
    fn sse_load_const(&mut self, dst: u8, prefix: u8, value: ConstValue) -> CodegenResult<()> {
        match (value, self.x64) {
            (ConstValue::F32(v), _) => {
                // push imm32; movss xmm, [esp]; add esp, ptr.
                self.buf.put1(0x68);
                self.buf.put4(v.to_bits());
                self.sse_prefix(prefix);
                self.rex_mem(false, dst, 4);
                self.buf.put1(0x0f);
                self.buf.put1(0x10);
                self.mem(dst, 4, 0);
                self.release_stack(if self.x64 { 8 } else { 4 });
            }
            (ConstValue::F64(v), false) => {
                let bits = v.to_bits();
                self.buf.put1(0x68);
                self.buf.put4((bits >> 32) as u32);
                self.buf.put1(0x68);
                self.buf.put4(bits as u32);
                self.sse_prefix(prefix);
                self.buf.put1(0x0f);
                self.buf.put1(0x10);
                self.mem(dst, 4, 0);
                self.release_stack(8);
            }
            (ConstValue::F64(v), true) => {
                let scratch = regs::SCRATCH64_INT[0].hw_enc();
                self.rex_rr(true, 0, scratch);
                self.buf.put1(0xb8 + (scratch & 7));
                self.buf.put8(v.to_bits());
                self.rex_rr(false, 0, scratch);
                self.buf.put1(0x50 + (scratch & 7));
                self.sse_prefix(prefix);
                self.rex_mem(false, dst, 4);
                self.buf.put1(0x0f);
                self.buf.put1(0x10);
                self.mem(dst, 4, 0);
                self.release_stack(8);
            }
            _ => {
                return Err(CodegenError::Verifier(
                    "integer constant in a float move".to_string(),
                ))
            }
        }
        Ok(())
    }

    fn release_stack(&mut self, amount: u32) {
        self.rex_rr(true, 0, 4);
        self.buf.put1(0x83);
        self.buf.put1(0xc4);
        self.buf.put1(amount as u8);
    }

    fn sse_load(&mut self, data: &InstData, prefix: u8, op: u8) -> CodegenResult<()> {
        let dst = self.reg_of(data.results[0])?;
        let disp = self
            .imm_of(data.operands[1])
            .ok_or_else(|| CodegenError::Verifier("load offset is not constant".to_string()))?
            as i32;
        let rm = self.base_mem(data.operands[0], disp)?;
        self.sse_prefix(prefix);
        self.rex_mem(false, dst, rm_enc(&rm));
        self.buf.put1(0x0f);
        self.buf.put1(op);
        self.rm(dst, &rm)
    }

    fn sse_store(&mut self, data: &InstData, prefix: u8) -> CodegenResult<()> {
        let disp = self
            .imm_of(data.operands[1])
            .ok_or_else(|| CodegenError::Verifier("store offset is not constant".to_string()))?
            as i32;
        let rm = self.base_mem(data.operands[0], disp)?;
        let value = self.reg_of(data.operands[2])?;
        self.sse_prefix(prefix);
        self.rex_mem(false, value, rm_enc(&rm));
        self.buf.put1(0x0f);
        self.buf.put1(0x11);
        self.rm(value, &rm)
    }

    fn sse_alu(&mut self, data: &InstData, prefix: u8, op: u8) -> CodegenResult<()> {
        let dst = self.reg_of(data.results[0])?;
        let src = self.resolve(data.operands[1])?;
        self.sse_prefix(prefix);
        self.rex_mem(false, dst, rm_enc(&src));
        self.buf.put1(0x0f);
        self.buf.put1(op);
        self.rm(dst, &src)
    }

    fn sse_cmp(&mut self, data: &InstData, prefix: Option<u8>) -> CodegenResult<()> {
        let a = self.reg_of(data.operands[0])?;
        let b = self.resolve(data.operands[1])?;
        if let Some(prefix) = prefix {
            self.buf.put1(prefix);
        }
        self.rex_mem(false, a, rm_enc(&b));
        self.buf.put1(0x0f);
        self.buf.put1(0x2e);
        self.rm(a, &b)
    }

    fn cvt_int_to_float(&mut self, data: &InstData, prefix: u8) -> CodegenResult<()> {
        let dst = self.reg_of(data.results[0])?;
        let src = self.resolve(data.operands[0])?;
        self.sse_prefix(prefix);
        self.rex_mem(self.wide(data), dst, rm_enc(&src));
        self.buf.put1(0x0f);
        self.buf.put1(0x2a);
        self.rm(dst, &src)
    }

    fn cvt_float_to_int(&mut self, data: &InstData, prefix: u8) -> CodegenResult<()> {
        let dst = self.reg_of(data.results[0])?;
        let src = self.resolve(data.operands[0])?;
        self.sse_prefix(prefix);
        self.rex_mem(self.wide(data), dst, rm_enc(&src));
        self.buf.put1(0x0f);
        self.buf.put1(0x2c);
        self.rm(dst, &src)
    }

    fn cvt_float_float(&mut self, data: &InstData, prefix: u8) -> CodegenResult<()> {
        let dst = self.reg_of(data.results[0])?;
        let src = self.resolve(data.operands[0])?;
        self.sse_prefix(prefix);
        self.rex_mem(false, dst, rm_enc(&src));
        self.buf.put1(0x0f);
        self.buf.put1(0x5a);
        self.rm(dst, &src)
    }
}

fn rm_enc(rm: &Rm) -> u8 {
    match rm {
        Rm::Reg(r) => *r,
        Rm::Mem { base, .. } => *base,
        Rm::Sym { .. } => 0,
    }
}

fn int_cc_nibble(cc: IntCC) -> u8 {
    match cc {
        IntCC::Equal => 0x4,
        IntCC::NotEqual => 0x5,
        IntCC::SignedLessThan => 0xc,
        IntCC::SignedGreaterThanOrEqual => 0xd,
        IntCC::SignedGreaterThan => 0xf,
        IntCC::SignedLessThanOrEqual => 0xe,
        IntCC::UnsignedLessThan => 0x2,
        IntCC::UnsignedGreaterThanOrEqual => 0x3,
        IntCC::UnsignedGreaterThan => 0x7,
        IntCC::UnsignedLessThanOrEqual => 0x6,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Function, SymbolName};
    use crate::isa::registers::PReg;

    fn emit_one(x64: bool, build: impl FnOnce(&mut Function) -> InstData) -> Vec<u8> {
        let mut func = Function::new(SymbolName::from("t"));
        let block = func.dfg.make_block();
        func.layout.append_block(block);
        let data = build(&mut func);
        func.append_inst(block, data);
        let mut buf = CodeBuffer::new();
        let mut e = Emitter {
            func: &func,
            buf: &mut buf,
            x64,
        };
        e.buf.bind_label(block);
        for inst in func.layout.block_insts(block) {
            let data = func.dfg.insts[inst].clone();
            e.emit_inst(inst, &data).unwrap();
        }
        let (bytes, _) = buf.finish();
        bytes
    }

    fn reg(func: &mut Function, r: PReg) -> Operand {
        func.dfg.cpu_reg(Ty::I32, r)
    }

    #[test]
    fn mov_imm() {
        let bytes = emit_one(false, |f| {
            let eax = reg(f, regs::EAX);
            let c = f.dfg.iconst32(42);
            let mut d = Function::inst_unary(Opcode::X86Mov, eax, c);
            d.ty = Some(Ty::I32);
            d
        });
        assert_eq!(bytes, [0xb8, 0x2a, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn add_rr() {
        let bytes = emit_one(false, |f| {
            let eax = reg(f, regs::EAX);
            let ebx = reg(f, regs::EBX);
            let mut d = Function::inst_binary(Opcode::X86Add, eax, eax, ebx);
            d.ty = Some(Ty::I32);
            d
        });
        // add eax, ebx.
        assert_eq!(bytes, [0x01, 0xd8]);
    }

    #[test]
    fn add_rr_wide() {
        let bytes = emit_one(true, |f| {
            let rax = reg(f, regs::EAX);
            let rbx = reg(f, regs::EBX);
            let mut d = Function::inst_binary(Opcode::X86Add, rax, rax, rbx);
            d.ty = Some(Ty::I64);
            d
        });
        // add rax, rbx.
        assert_eq!(bytes, [0x48, 0x01, 0xd8]);
    }

    #[test]
    fn single_and_double_subtract_use_distinct_prefixes() {
        let subss = emit_one(false, |f| {
            let a = f.dfg.cpu_reg(Ty::R4, regs::XMM0);
            let b = f.dfg.cpu_reg(Ty::R4, regs::XMM1);
            let mut d = Function::inst_binary(Opcode::X86Subss, a, a, b);
            d.ty = Some(Ty::R4);
            d
        });
        assert_eq!(subss, [0xf3, 0x0f, 0x5c, 0xc1]);
        let subsd = emit_one(false, |f| {
            let a = f.dfg.cpu_reg(Ty::R8, regs::XMM0);
            let b = f.dfg.cpu_reg(Ty::R8, regs::XMM1);
            let mut d = Function::inst_binary(Opcode::X86Subsd, a, a, b);
            d.ty = Some(Ty::R8);
            d
        });
        assert_eq!(subsd, [0xf2, 0x0f, 0x5c, 0xc1]);
    }

    #[test]
    fn stack_operand_addressing() {
        // mov eax, [ebp - 8].
        let bytes = emit_one(false, |f| {
            let eax = reg(f, regs::EAX);
            let slot = f.create_stack_slot(crate::ir::StackSlotData {
                kind: crate::ir::StackSlotKind::Spill,
                size: 4,
                offset: Some(-8),
            });
            let mem = f.dfg.stack_local(Ty::I32, slot);
            let mut d = Function::inst_unary(Opcode::X86Mov, eax, mem);
            d.ty = Some(Ty::I32);
            d
        });
        assert_eq!(bytes, [0x8b, 0x45, 0xf8]);
    }

    #[test]
    fn esp_base_needs_sib() {
        // mov [esp + 4], eax.
        let bytes = emit_one(false, |f| {
            let eax = reg(f, regs::EAX);
            let esp = reg(f, regs::ESP);
            let off = f.dfg.iconst32(4);
            let mut d = InstData::new(Opcode::X86MovStore);
            d.ty = Some(Ty::I32);
            d.operands.push(esp);
            d.operands.push(off);
            d.operands.push(eax);
            d
        });
        assert_eq!(bytes, [0x89, 0x44, 0x24, 0x04]);
    }

    #[test]
    fn call_symbol_requests_relocation() {
        let mut func = Function::new(SymbolName::from("t"));
        let block = func.dfg.make_block();
        func.layout.append_block(block);
        let callee = func.dfg.symbol(SymbolName::from("callee"), Ty::Ptr);
        let zero = func.dfg.iconst32(0);
        let mut call = InstData::new(Opcode::X86Call);
        call.operands.push(callee);
        call.operands.push(zero);
        call.ty = Some(Ty::I32);
        func.append_inst(block, call);

        let mut buf = CodeBuffer::new();
        let mut e = Emitter {
            func: &func,
            buf: &mut buf,
            x64: false,
        };
        e.buf.bind_label(block);
        for inst in func.layout.block_insts(block) {
            let data = func.dfg.insts[inst].clone();
            e.emit_inst(inst, &data).unwrap();
        }
        let (bytes, relocs) = buf.finish();
        assert_eq!(bytes, [0xe8, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(relocs.len(), 1);
        assert_eq!(relocs[0].kind, Reloc::X86PCRel4);
        assert_eq!(relocs[0].offset, 1);
        assert_eq!(relocs[0].addend, -4);
    }

    #[test]
    fn shift_by_coerced_imm8() {
        let bytes = emit_one(false, |f| {
            let eax = reg(f, regs::EAX);
            let c = f.dfg.iconst(Ty::I8, 17);
            let mut d = Function::inst_binary(Opcode::X86Shr, eax, eax, c);
            d.ty = Some(Ty::I32);
            d
        });
        // shr eax, 17.
        assert_eq!(bytes, [0xc1, 0xe8, 0x11]);
    }

    #[test]
    fn emission_is_deterministic() {
        let run = || {
            emit_one(false, |f| {
                let eax = reg(f, regs::EAX);
                let c = f.dfg.iconst32(1234);
                let mut d = Function::inst_binary(Opcode::X86Add, eax, eax, c);
                d.ty = Some(Ty::I32);
                d
            })
        };
        assert_eq!(run(), run());
    }
}
