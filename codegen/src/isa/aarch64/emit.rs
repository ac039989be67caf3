//! AArch64 binary code emission.
//!
//! Fixed 32-bit words. Constants materialize as full `movz`/`movk`
//! sequences so the emitted length never depends on resolution state;
//! frame offsets outside the unscaled load/store range compute their
//! address in x16 first.

use super::regs;
use crate::binemit::{CodeBuffer, Reloc};
use crate::ir::{
    Block, CondCode, ConstValue, FloatCC, Function, Inst, InstData, IntCC, Opcode, Operand,
    OperandData, Ty,
};
use crate::result::{CodegenError, CodegenResult};

struct Emitter<'a> {
    func: &'a Function,
    buf: &'a mut CodeBuffer,
}

/// Emit the whole function.
pub fn emit(func: &Function, buf: &mut CodeBuffer) -> CodegenResult<()> {
    let mut e = Emitter { func, buf };
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
        // stp x29, x30, [sp, #-16]!; mov x29, sp; sub sp, sp, #frame.
        self.buf.put4(0xa9bf_7bfd);
        self.buf.put4(0x9100_03fd);
        let frame = self.func.frame_size;
        if frame > 0 {
            if frame < 4096 {
                self.buf.put4(0xd100_0000 | (frame << 10) | (31 << 5) | 31);
            } else {
                let x16 = 16;
                self.mov_imm64(x16, u64::from(frame));
                // sub sp, sp, x16 (extended register form).
                self.buf.put4(0xcb20_63ff | (x16 << 16));
            }
        }
    }

    fn epilogue(&mut self) {
        // mov sp, x29; ldp x29, x30, [sp], #16; ret.
        self.buf.put4(0x9100_03bf);
        self.buf.put4(0xa8c1_7bfd);
        self.buf.put4(0xd65f_03c0);
    }

    // ---------------- primitives ----------------

    fn mov_imm32(&mut self, rd: u32, value: u32) {
        // movz + movk, always both halfwords.
        self.buf
            .put4(0x5280_0000 | ((value & 0xffff) << 5) | rd);
        self.buf
            .put4(0x7280_0000 | (1 << 21) | (((value >> 16) & 0xffff) << 5) | rd);
    }

    fn mov_imm64(&mut self, rd: u32, value: u64) {
        self.buf
            .put4(0xd280_0000 | (((value & 0xffff) as u32) << 5) | rd);
        for hw in 1..4u32 {
            let part = ((value >> (16 * hw)) & 0xffff) as u32;
            self.buf
                .put4(0xf280_0000 | (hw << 21) | (part << 5) | rd);
        }
    }

    fn mov_symbol(&mut self, rd: u32, name: &crate::ir::SymbolName) {
        // movz/movk sequence patched whole by the sequence relocation on
        // the first word.
        self.buf.reloc(Reloc::Arm64AbsMovSeq, name.clone(), 0);
        self.mov_imm64(rd, 0);
    }

    fn reg_of(&self, operand: Operand) -> CodegenResult<u32> {
        match &self.func.dfg.operands[operand] {
            OperandData::CpuReg { reg, .. } => Ok(u32::from(reg.hw_enc())),
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

    fn wide(&self, data: &InstData) -> bool {
        matches!(data.ty, Some(Ty::I64) | None)
    }

    /// `sf`-selected base words: picks the 64-bit or 32-bit encoding.
    fn sf(&self, data: &InstData, w64: u32, w32: u32) -> u32 {
        if self.wide(data) {
            w64
        } else {
            w32
        }
    }

    fn mem_of(&mut self, base: Operand, offset: Operand) -> CodegenResult<(u32, i32)> {
        let disp = self.imm_of(offset).unwrap_or(0) as i32;
        match &self.func.dfg.operands[base] {
            OperandData::StackLocal { slot, .. } => {
                let slot_off = self.func.stack_slots[*slot].offset.ok_or_else(|| {
                    CodegenError::Verifier("stack slot without an offset".to_string())
                })?;
                Ok((u32::from(regs::FP.hw_enc()), slot_off + disp))
            }
            OperandData::Symbol { name, .. } => {
                let x16 = 16;
                let name = name.clone();
                self.mov_symbol(x16, &name);
                Ok((x16, disp))
            }
            _ => Ok((self.reg_of(base)?, disp)),
        }
    }

    /// Unscaled 9-bit load/store, with address computation in x16 for
    /// offsets outside the range.
    fn ldst(&mut self, unscaled_base: u32, rt: u32, base: u32, off: i32) {
        let (base, off) = if (-256..256).contains(&off) {
            (base, off)
        } else {
            let x16 = 16;
            self.mov_imm64(x16, off as u64);
            // add x16, base, x16.
            self.buf.put4(0x8b00_0000 | (x16 << 16) | (base << 5) | x16);
            (x16, 0)
        };
        let imm9 = (off as u32) & 0x1ff;
        self.buf
            .put4(unscaled_base | (imm9 << 12) | (base << 5) | rt);
    }

    // ---------------- instructions ----------------

    fn emit_inst(&mut self, _inst: Inst, data: &InstData) -> CodegenResult<()> {
        use Opcode::*;
        match data.opcode {
            A64Mov => {
                let rd = self.reg_of(data.results[0])?;
                let src = data.operands[0];
                match &self.func.dfg.operands[src] {
                    OperandData::Symbol { name, .. } => {
                        let name = name.clone();
                        self.mov_symbol(rd, &name);
                    }
                    _ => {
                        if let Some(imm) = self.imm_of(src) {
                            if self.wide(data) {
                                self.mov_imm64(rd, imm as u64);
                            } else {
                                self.mov_imm32(rd, imm as u32);
                            }
                        } else {
                            let rm = self.reg_of(src)?;
                            // orr rd, zr, rm.
                            let base = self.sf(data, 0xaa00_03e0, 0x2a00_03e0);
                            self.buf.put4(base | (rm << 16) | rd);
                        }
                    }
                }
                Ok(())
            }
            A64FMov => {
                let rd = self.reg_of(data.results[0])?;
                let src = data.operands[0];
                if let Some(value) = self.func.dfg.operands[src].constant() {
                    // Bits through x16, then fmov from the gpr.
                    let x16 = 16;
                    match value {
                        ConstValue::F32(v) => {
                            self.mov_imm32(x16, v.to_bits());
                            self.buf.put4(0x1e27_0000 | (x16 << 5) | rd);
                        }
                        ConstValue::F64(v) => {
                            self.mov_imm64(x16, v.to_bits());
                            self.buf.put4(0x9e67_0000 | (x16 << 5) | rd);
                        }
                        _ => {
                            return Err(CodegenError::Verifier(
                                "integer constant in a float move".to_string(),
                            ))
                        }
                    }
                } else {
                    let rn = self.reg_of(src)?;
                    let base = if data.ty == Some(Ty::R8) {
                        0x1e60_4000
                    } else {
                        0x1e20_4000
                    };
                    self.buf.put4(base | (rn << 5) | rd);
                }
                Ok(())
            }
            A64Add => self.arith(data, 0x8b00_0000, 0x0b00_0000, 0x9100_0000, 0x1100_0000),
            A64Sub => self.arith(data, 0xcb00_0000, 0x4b00_0000, 0xd100_0000, 0x5100_0000),
            A64Mul => {
                // madd rd, rn, rm, zr.
                let rd = self.reg_of(data.results[0])?;
                let rn = self.reg_of(data.operands[0])?;
                let rm = self.reg_of(data.operands[1])?;
                let base = self.sf(data, 0x9b00_7c00, 0x1b00_7c00);
                self.buf.put4(base | (rm << 16) | (rn << 5) | rd);
                Ok(())
            }
            A64Msub => {
                let rd = self.reg_of(data.results[0])?;
                let rn = self.reg_of(data.operands[0])?;
                let rm = self.reg_of(data.operands[1])?;
                let ra = self.reg_of(data.operands[2])?;
                let base = self.sf(data, 0x9b00_8000, 0x1b00_8000);
                self.buf
                    .put4(base | (rm << 16) | (ra << 10) | (rn << 5) | rd);
                Ok(())
            }
            A64Sdiv => self.rrr(data, 0x9ac0_0c00, 0x1ac0_0c00),
            A64Udiv => self.rrr(data, 0x9ac0_0800, 0x1ac0_0800),
            A64And => self.rrr(data, 0x8a00_0000, 0x0a00_0000),
            A64Orr => self.rrr(data, 0xaa00_0000, 0x2a00_0000),
            A64Eor => self.rrr(data, 0xca00_0000, 0x4a00_0000),
            A64Mvn => {
                // orn rd, zr, rm.
                let rd = self.reg_of(data.results[0])?;
                let rm = self.reg_of(data.operands[0])?;
                let base = self.sf(data, 0xaa20_03e0, 0x2a20_03e0);
                self.buf.put4(base | (rm << 16) | rd);
                Ok(())
            }
            A64Lsl => self.rrr(data, 0x9ac0_2000, 0x1ac0_2000),
            A64Lsr => self.rrr(data, 0x9ac0_2400, 0x1ac0_2400),
            A64Asr => self.rrr(data, 0x9ac0_2800, 0x1ac0_2800),
            A64Cmp => {
                let rn = self.reg_of(data.operands[0])?;
                let rhs = data.operands[1];
                if let Some(imm) = self.imm_of(rhs) {
                    let base = self.sf(data, 0xf100_001f, 0x7100_001f);
                    self.buf.put4(base | (((imm as u32) & 0xfff) << 10) | (rn << 5));
                } else {
                    let rm = self.reg_of(rhs)?;
                    let base = self.sf(data, 0xeb00_001f, 0x6b00_001f);
                    self.buf.put4(base | (rm << 16) | (rn << 5));
                }
                Ok(())
            }
            A64FCmp => {
                let rn = self.reg_of(data.operands[0])?;
                let rm = self.reg_of(data.operands[1])?;
                let base = if data.ty == Some(Ty::R8) {
                    0x1e60_2000
                } else {
                    0x1e20_2000
                };
                self.buf.put4(base | (rm << 16) | (rn << 5));
                Ok(())
            }
            A64Cset => {
                // csinc rd, zr, zr, !cc.
                let rd = self.reg_of(data.results[0])?;
                let cc = cond_bits(data.cc)?;
                self.buf
                    .put4(0x1a9f_07e0 | ((cc ^ 1) << 12) | rd);
                Ok(())
            }
            A64Lea => {
                let rd = self.reg_of(data.results[0])?;
                let off = match &self.func.dfg.operands[data.operands[0]] {
                    OperandData::StackLocal { slot, .. } => self.func.stack_slots[*slot]
                        .offset
                        .ok_or_else(|| {
                            CodegenError::Verifier("stack slot without an offset".to_string())
                        })?,
                    _ => {
                        return Err(CodegenError::Verifier(
                            "lea of a non-stack operand".to_string(),
                        ))
                    }
                };
                let fp = u32::from(regs::FP.hw_enc());
                if (0..4096).contains(&off) {
                    self.buf
                        .put4(0x9100_0000 | ((off as u32) << 10) | (fp << 5) | rd);
                } else if (-4096..0).contains(&off) {
                    self.buf
                        .put4(0xd100_0000 | (((-off) as u32) << 10) | (fp << 5) | rd);
                } else {
                    let x16 = 16;
                    self.mov_imm64(x16, off as u64);
                    self.buf.put4(0x8b00_0000 | (x16 << 16) | (fp << 5) | rd);
                }
                Ok(())
            }
            A64B => {
                self.buf.put4(0x1400_0000);
                self.buf.use_label_arm26(data.blocks[0]);
                Ok(())
            }
            A64Bcc => {
                let cc = cond_bits(data.cc)?;
                self.buf.put4(0x5400_0000 | cc);
                self.buf.use_label_arm19(data.blocks[0]);
                Ok(())
            }
            A64Bl => {
                match &self.func.dfg.operands[data.operands[0]] {
                    OperandData::Symbol { name, .. } => {
                        self.buf.reloc(Reloc::Arm64Call, name.clone(), 0);
                        self.buf.put4(0x9400_0000);
                    }
                    _ => {
                        return Err(CodegenError::Verifier(
                            "bl target must be a symbol".to_string(),
                        ))
                    }
                }
                self.release_args(data)
            }
            A64Blr => {
                let rn = self.reg_of(data.operands[0])?;
                self.buf.put4(0xd63f_0000 | (rn << 5));
                self.release_args(data)
            }
            A64Ret => {
                self.epilogue();
                Ok(())
            }
            A64Ldr => {
                let rt = self.reg_of(data.results[0])?;
                let (base, off) = self.mem_of(data.operands[0], data.operands[1])?;
                let word = self.sf(data, 0xf840_0000, 0xb840_0000);
                self.ldst(word, rt, base, off);
                Ok(())
            }
            A64Str => {
                let rt = self.reg_of(data.operands[2])?;
                let (base, off) = self.mem_of(data.operands[0], data.operands[1])?;
                let word = self.sf(data, 0xf800_0000, 0xb800_0000);
                self.ldst(word, rt, base, off);
                Ok(())
            }
            A64Ldrb => self.narrow(data, 0x3840_0000, true),
            A64Ldrh => self.narrow(data, 0x7840_0000, true),
            A64Ldrsb => self.narrow(data, 0x38c0_0000, true),
            A64Ldrsh => self.narrow(data, 0x78c0_0000, true),
            A64Strb => self.narrow(data, 0x3800_0000, false),
            A64Strh => self.narrow(data, 0x7800_0000, false),
            A64LdrF => {
                let rt = self.reg_of(data.results[0])?;
                let (base, off) = self.mem_of(data.operands[0], data.operands[1])?;
                let word = if data.ty == Some(Ty::R8) {
                    0xfc40_0000
                } else {
                    0xbc40_0000
                };
                self.ldst(word, rt, base, off);
                Ok(())
            }
            A64StrF => {
                let rt = self.reg_of(data.operands[2])?;
                let (base, off) = self.mem_of(data.operands[0], data.operands[1])?;
                let word = if data.ty == Some(Ty::R8) {
                    0xfc00_0000
                } else {
                    0xbc00_0000
                };
                self.ldst(word, rt, base, off);
                Ok(())
            }
            A64Sxt => {
                let rd = self.reg_of(data.results[0])?;
                let rn = self.reg_of(data.operands[0])?;
                let word = match data.ty {
                    // sxtb/sxth on w registers, sxtw to an x register.
                    Some(Ty::I8) => 0x1340_1c00,
                    Some(Ty::I16) => 0x1340_3c00,
                    _ => 0x9340_7c00,
                };
                self.buf.put4(word | (rn << 5) | rd);
                Ok(())
            }
            A64Uxt => {
                let rd = self.reg_of(data.results[0])?;
                let rn = self.reg_of(data.operands[0])?;
                let word = match data.ty {
                    Some(Ty::I8) => 0x5340_1c00,
                    _ => 0x5340_3c00,
                };
                self.buf.put4(word | (rn << 5) | rd);
                Ok(())
            }
            A64FAdd => self.frrr(data, 0x1e60_2800, 0x1e20_2800),
            A64FSub => self.frrr(data, 0x1e60_3800, 0x1e20_3800),
            A64FMul => self.frrr(data, 0x1e60_0800, 0x1e20_0800),
            A64FDiv => self.frrr(data, 0x1e60_1800, 0x1e20_1800),
            A64Scvtf => {
                let rd = self.reg_of(data.results[0])?;
                let rn = self.reg_of(data.operands[0])?;
                let src64 = self.func.dfg.ty(data.operands[0]) == Ty::I64;
                let word = match (data.ty, src64) {
                    (Some(Ty::R4), false) => 0x1e22_0000,
                    (Some(Ty::R4), true) => 0x9e22_0000,
                    (_, false) => 0x1e62_0000,
                    (_, true) => 0x9e62_0000,
                };
                self.buf.put4(word | (rn << 5) | rd);
                Ok(())
            }
            A64Fcvtzs => {
                let rd = self.reg_of(data.results[0])?;
                let rn = self.reg_of(data.operands[0])?;
                let src_double = self.func.dfg.ty(data.operands[0]) == Ty::R8;
                let word = if src_double { 0x1e78_0000 } else { 0x1e38_0000 };
                self.buf.put4(word | (rn << 5) | rd);
                Ok(())
            }
            A64Fcvt => {
                let rd = self.reg_of(data.results[0])?;
                let rn = self.reg_of(data.operands[0])?;
                let word = if data.ty == Some(Ty::R8) {
                    // fcvt d, s.
                    0x1e22_c000
                } else {
                    // fcvt s, d.
                    0x1e62_4000
                };
                self.buf.put4(word | (rn << 5) | rd);
                Ok(())
            }
            other => Err(CodegenError::NotSupported(format!(
                "no armv8 encoding for {other}"
            ))),
        }
    }

    fn arith(
        &mut self,
        data: &InstData,
        reg64: u32,
        reg32: u32,
        imm64: u32,
        imm32: u32,
    ) -> CodegenResult<()> {
        let rd = self.reg_of(data.results[0])?;
        let rn = self.reg_of(data.operands[0])?;
        let rhs = data.operands[1];
        if let Some(imm) = self.imm_of(rhs) {
            let base = self.sf(data, imm64, imm32);
            self.buf
                .put4(base | (((imm as u32) & 0xfff) << 10) | (rn << 5) | rd);
        } else {
            let rm = self.reg_of(rhs)?;
            let base = self.sf(data, reg64, reg32);
            self.buf.put4(base | (rm << 16) | (rn << 5) | rd);
        }
        Ok(())
    }

    fn rrr(&mut self, data: &InstData, w64: u32, w32: u32) -> CodegenResult<()> {
        let rd = self.reg_of(data.results[0])?;
        let rn = self.reg_of(data.operands[0])?;
        let rm = self.reg_of(data.operands[1])?;
        let base = self.sf(data, w64, w32);
        self.buf.put4(base | (rm << 16) | (rn << 5) | rd);
        Ok(())
    }

    fn frrr(&mut self, data: &InstData, d: u32, s: u32) -> CodegenResult<()> {
        let rd = self.reg_of(data.results[0])?;
        let rn = self.reg_of(data.operands[0])?;
        let rm = self.reg_of(data.operands[1])?;
        let base = if data.ty == Some(Ty::R8) { d } else { s };
        self.buf.put4(base | (rm << 16) | (rn << 5) | rd);
        Ok(())
    }

    fn narrow(&mut self, data: &InstData, word: u32, load: bool) -> CodegenResult<()> {
        let rt = if load {
            self.reg_of(data.results[0])?
        } else {
            self.reg_of(data.operands[2])?
        };
        let (base, off) = self.mem_of(data.operands[0], data.operands[1])?;
        self.ldst(word, rt, base, off);
        Ok(())
    }

    fn release_args(&mut self, data: &InstData) -> CodegenResult<()> {
        let total = self.imm_of(data.operands[1]).unwrap_or(0) as u32;
        if total > 0 {
            // add sp, sp, #total.
            self.buf
                .put4(0x9100_0000 | (total << 10) | (31 << 5) | 31);
        }
        Ok(())
    }
}

fn cond_bits(cc: Option<CondCode>) -> CodegenResult<u32> {
    Ok(match cc {
        Some(CondCode::Int(cc)) => match cc {
            IntCC::Equal => 0,
            IntCC::NotEqual => 1,
            IntCC::UnsignedGreaterThanOrEqual => 2,
            IntCC::UnsignedLessThan => 3,
            IntCC::UnsignedGreaterThan => 8,
            IntCC::UnsignedLessThanOrEqual => 9,
            IntCC::SignedGreaterThanOrEqual => 10,
            IntCC::SignedLessThan => 11,
            IntCC::SignedGreaterThan => 12,
            IntCC::SignedLessThanOrEqual => 13,
        },
        Some(CondCode::Float(cc)) => match cc {
            FloatCC::Equal => 0,
            FloatCC::NotEqual => 1,
            FloatCC::LessThan => 4,           // mi
            FloatCC::LessThanOrEqual => 9,    // ls
            FloatCC::GreaterThan => 12,       // gt
            FloatCC::GreaterThanOrEqual => 10, // ge
            FloatCC::UnorderedOrLessThan => 11, // lt
            FloatCC::UnorderedOrLessThanOrEqual => 13, // le
            FloatCC::UnorderedOrGreaterThan => 8, // hi
            FloatCC::UnorderedOrGreaterThanOrEqual => 2, // hs
        },
        None => {
            return Err(CodegenError::Verifier(
                "conditional node without a condition".to_string(),
            ))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::SymbolName;

    fn emit_one(build: impl FnOnce(&mut Function) -> InstData) -> Vec<u8> {
        let mut func = Function::new(SymbolName::from("t"));
        let block = func.dfg.make_block();
        func.layout.append_block(block);
        let data = build(&mut func);
        func.append_inst(block, data);
        let mut buf = CodeBuffer::new();
        let mut e = Emitter {
            func: &func,
            buf: &mut buf,
        };
        e.buf.bind_label(block);
        for inst in func.layout.block_insts(block) {
            let data = func.dfg.insts[inst].clone();
            e.emit_inst(inst, &data).unwrap();
        }
        let (bytes, _) = buf.finish();
        bytes
    }

    fn word(bytes: &[u8]) -> u32 {
        u32::from_le_bytes(bytes[0..4].try_into().unwrap())
    }

    #[test]
    fn add_reg_64() {
        let bytes = emit_one(|f| {
            let x0 = f.dfg.cpu_reg(Ty::I64, regs::X0);
            let x1 = f.dfg.cpu_reg(Ty::I64, regs::X1);
            let x2 = f.dfg.cpu_reg(Ty::I64, regs::X2);
            let mut d = Function::inst_binary(Opcode::A64Add, x0, x1, x2);
            d.ty = Some(Ty::I64);
            d
        });
        // add x0, x1, x2.
        assert_eq!(word(&bytes), 0x8b02_0020);
    }

    #[test]
    fn add_imm_32() {
        let bytes = emit_one(|f| {
            let w0 = f.dfg.cpu_reg(Ty::I32, regs::X0);
            let c = f.dfg.iconst32(16);
            let mut d = Function::inst_binary(Opcode::A64Add, w0, w0, c);
            d.ty = Some(Ty::I32);
            d
        });
        // add w0, w0, #16.
        assert_eq!(word(&bytes), 0x1100_4000);
    }

    #[test]
    fn mov_imm32_is_movz_movk() {
        let bytes = emit_one(|f| {
            let w3 = f.dfg.cpu_reg(Ty::I32, regs::X3);
            let c = f.dfg.iconst32(0x12345);
            let mut d = Function::inst_unary(Opcode::A64Mov, w3, c);
            d.ty = Some(Ty::I32);
            d
        });
        assert_eq!(bytes.len(), 8);
        // movz w3, #0x2345; movk w3, #1, lsl #16.
        assert_eq!(word(&bytes[0..4]), 0x5284_68a3);
        assert_eq!(word(&bytes[4..8]), 0x72a0_0023);
    }

    #[test]
    fn cset_inverts_the_condition() {
        let bytes = emit_one(|f| {
            let w0 = f.dfg.cpu_reg(Ty::I32, regs::X0);
            let mut d = InstData::new(Opcode::A64Cset);
            d.results.push(w0);
            d.cc = Some(CondCode::Int(IntCC::Equal));
            d
        });
        // cset w0, eq == csinc w0, wzr, wzr, ne.
        assert_eq!(word(&bytes), 0x1a9f_17e0);
    }

    #[test]
    fn fadd_double_and_single_differ() {
        let fadd_d = emit_one(|f| {
            let v0 = f.dfg.cpu_reg(Ty::R8, regs::V0);
            let v1 = f.dfg.cpu_reg(Ty::R8, regs::V1);
            let mut d = Function::inst_binary(Opcode::A64FAdd, v0, v0, v1);
            d.ty = Some(Ty::R8);
            d
        });
        assert_eq!(word(&fadd_d), 0x1e61_2800);
        let fadd_s = emit_one(|f| {
            let v0 = f.dfg.cpu_reg(Ty::R4, regs::V0);
            let v1 = f.dfg.cpu_reg(Ty::R4, regs::V1);
            let mut d = Function::inst_binary(Opcode::A64FAdd, v0, v0, v1);
            d.ty = Some(Ty::R4);
            d
        });
        assert_eq!(word(&fadd_s), 0x1e21_2800);
    }

    #[test]
    fn stack_slot_folds_to_frame_pointer() {
        let bytes = emit_one(|f| {
            let x0 = f.dfg.cpu_reg(Ty::I64, regs::X0);
            let slot = f.create_stack_slot(crate::ir::StackSlotData {
                kind: crate::ir::StackSlotKind::Spill,
                size: 8,
                offset: Some(-16),
            });
            let mem = f.dfg.stack_local(Ty::I64, slot);
            let zero = f.dfg.iconst32(0);
            let mut d = InstData::new(Opcode::A64Ldr);
            d.ty = Some(Ty::I64);
            d.results.push(x0);
            d.operands.push(mem);
            d.operands.push(zero);
            d
        });
        // ldur x0, [x29, #-16].
        assert_eq!(word(&bytes), 0xf85f_03a0);
    }
}
