//! ARMv6 (A32) binary code emission.
//!
//! Every instruction is one 32-bit word with an AL condition field unless
//! the node carries a condition. Constants that do not fit a modified
//! immediate and symbol addresses load through an inline literal: an
//! `ldr rd, [pc]`, a branch over the literal word, then the word itself.

use super::regs;
use crate::binemit::{CodeBuffer, Reloc};
use crate::ir::{
    Block, CondCode, Function, Inst, InstData, IntCC, Opcode, Operand, OperandData,
};
use crate::result::{CodegenError, CodegenResult};

/// Encode an A32 modified immediate: an 8-bit value rotated right by an
/// even count. Returns the 12-bit field.
pub(crate) fn encode_imm(value: u32) -> Option<u32> {
    for rot in 0..16u32 {
        let rotated = value.rotate_left(rot * 2);
        if rotated < 0x100 {
            return Some((rot << 8) | rotated);
        }
    }
    None
}

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

const COND_AL: u32 = 0xe000_0000;

impl Emitter<'_> {
    fn prologue(&mut self) {
        // push {fp, lr}; mov fp, sp; sub sp, sp, #frame.
        self.buf.put4(0xe92d_4800);
        self.buf.put4(0xe1a0_b00d);
        let frame = self.func.frame_size;
        if frame > 0 {
            self.sub_sp(frame);
        }
    }

    fn sub_sp(&mut self, amount: u32) {
        if let Some(imm) = encode_imm(amount) {
            // sub sp, sp, #amount.
            self.buf.put4(COND_AL | 0x024d_d000 | imm);
        } else {
            let ip = regs::IP.hw_enc() as u32;
            self.mov_imm(ip, amount);
            // sub sp, sp, ip.
            self.buf.put4(COND_AL | 0x004d_d000 | ip);
        }
    }

    fn epilogue(&mut self) {
        // mov sp, fp; pop {fp, lr}; bx lr.
        self.buf.put4(0xe1a0_d00b);
        self.buf.put4(0xe8bd_4800);
        self.buf.put4(0xe12f_ff1e);
    }

    // ---------------- primitives ----------------

    /// Data-processing, register form. `op` is the 4-bit ALU opcode.
    fn dp_reg(&mut self, op: u32, s: bool, rn: u32, rd: u32, rm: u32) {
        self.buf
            .put4(COND_AL | (op << 21) | ((s as u32) << 20) | (rn << 16) | (rd << 12) | rm);
    }

    /// Data-processing, immediate form.
    fn dp_imm(&mut self, op: u32, s: bool, rn: u32, rd: u32, imm12: u32) {
        self.buf.put4(
            COND_AL
                | (1 << 25)
                | (op << 21)
                | ((s as u32) << 20)
                | (rn << 16)
                | (rd << 12)
                | imm12,
        );
    }

    /// Load an arbitrary 32-bit value: `mov`/`mvn` when encodable, an
    /// inline literal otherwise.
    fn mov_imm(&mut self, rd: u32, value: u32) {
        if let Some(imm) = encode_imm(value) {
            self.dp_imm(13, false, 0, rd, imm);
        } else if let Some(imm) = encode_imm(!value) {
            self.dp_imm(15, false, 0, rd, imm);
        } else {
            // ldr rd, [pc]; b over; .word value.
            self.buf.put4(COND_AL | 0x059f_0000 | (rd << 12));
            self.buf.put4(COND_AL | 0x0a00_0000);
            self.buf.put4(value);
        }
    }

    /// Load a symbol's address through an inline literal with an `Abs4`
    /// relocation on the literal word.
    fn mov_symbol(&mut self, rd: u32, name: &crate::ir::SymbolName) {
        self.buf.put4(COND_AL | 0x059f_0000 | (rd << 12));
        self.buf.put4(COND_AL | 0x0a00_0000);
        self.buf.reloc(Reloc::Abs4, name.clone(), 0);
        self.buf.put4(0);
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
        self.func.dfg.operands[operand].constant_int().or(
            match self.func.dfg.operands[operand].constant() {
                Some(crate::ir::ConstValue::Null) => Some(0),
                Some(crate::ir::ConstValue::F32(v)) => Some(i64::from(v.to_bits())),
                _ => None,
            },
        )
    }

    /// Resolve a load/store base+offset pair to `(base reg, offset)`,
    /// folding stack slots into fp-relative addresses.
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
                let ip = u32::from(regs::IP.hw_enc());
                let name = name.clone();
                self.mov_symbol(ip, &name);
                Ok((ip, disp))
            }
            _ => Ok((self.reg_of(base)?, disp)),
        }
    }

    /// Word/byte load-store with a 12-bit offset; larger offsets compute
    /// the address in ip first.
    fn ldst_word(&mut self, load: bool, byte: bool, rt: u32, base: u32, off: i32) {
        let (base, off) = self.shrink_offset(base, off, 4095);
        let u = off >= 0;
        let imm = off.unsigned_abs() & 0xfff;
        let mut word = COND_AL | 0x0400_0000 | (1 << 24) | (base << 16) | (rt << 12) | imm;
        if u {
            word |= 1 << 23;
        }
        if byte {
            word |= 1 << 22;
        }
        if load {
            word |= 1 << 20;
        }
        self.buf.put4(word);
    }

    /// Halfword and signed narrow loads use the misc format with a split
    /// 8-bit offset.
    fn ldst_misc(&mut self, sig: u32, load: bool, rt: u32, base: u32, off: i32) {
        let (base, off) = self.shrink_offset(base, off, 255);
        let u = off >= 0;
        let imm = off.unsigned_abs() & 0xff;
        let mut word = COND_AL
            | (1 << 24)
            | (1 << 22)
            | (base << 16)
            | (rt << 12)
            | ((imm >> 4) << 8)
            | 0x90
            | sig
            | (imm & 0xf);
        if u {
            word |= 1 << 23;
        }
        if load {
            word |= 1 << 20;
        }
        self.buf.put4(word);
    }

    fn shrink_offset(&mut self, base: u32, off: i32, max: i32) -> (u32, i32) {
        if off.abs() <= max {
            return (base, off);
        }
        let ip = u32::from(regs::IP.hw_enc());
        self.mov_imm(ip, off as u32);
        // add ip, base, ip.
        self.dp_reg(4, false, base, ip, ip);
        (ip, 0)
    }

    // ---------------- instructions ----------------

    fn emit_inst(&mut self, _inst: Inst, data: &InstData) -> CodegenResult<()> {
        use Opcode::*;
        match data.opcode {
            A32Mov => {
                let rd = self.reg_of(data.results[0])?;
                let src = data.operands[0];
                match &self.func.dfg.operands[src] {
                    OperandData::Symbol { name, .. } => {
                        let name = name.clone();
                        self.mov_symbol(rd, &name);
                    }
                    _ => {
                        if let Some(imm) = self.imm_of(src) {
                            self.mov_imm(rd, imm as u32);
                        } else {
                            let rm = self.reg_of(src)?;
                            self.dp_reg(13, false, 0, rd, rm);
                        }
                    }
                }
                Ok(())
            }
            A32Mvn => {
                let rd = self.reg_of(data.results[0])?;
                let rm = self.reg_of(data.operands[0])?;
                self.dp_reg(15, false, 0, rd, rm);
                Ok(())
            }
            A32Add => self.alu(data, 4),
            A32Adc => self.alu(data, 5),
            A32Sub => self.alu(data, 2),
            A32Sbc => self.alu(data, 6),
            A32And => self.alu(data, 0),
            A32Orr => self.alu(data, 12),
            A32Eor => self.alu(data, 1),
            A32Mul => {
                let rd = self.reg_of(data.results[0])?;
                let a = self.reg_of(data.operands[0])?;
                let b = self.reg_of(data.operands[1])?;
                self.buf
                    .put4(COND_AL | 0x0000_0090 | (rd << 16) | (b << 8) | a);
                Ok(())
            }
            A32Umull => {
                let lo = self.reg_of(data.results[0])?;
                let hi = self.reg_of(data.results[1])?;
                let a = self.reg_of(data.operands[0])?;
                let b = self.reg_of(data.operands[1])?;
                self.buf
                    .put4(COND_AL | 0x0080_0090 | (hi << 16) | (lo << 12) | (b << 8) | a);
                Ok(())
            }
            A32Lsl => self.shift(data, 0),
            A32Lsr => self.shift(data, 1),
            A32Asr => self.shift(data, 2),
            A32Cmp => {
                let a = self.reg_of(data.operands[0])?;
                let b = data.operands[1];
                if let Some(imm) = self.imm_of(b) {
                    let imm = encode_imm(imm as u32).ok_or_else(|| {
                        CodegenError::Verifier("unencodable compare immediate".to_string())
                    })?;
                    self.dp_imm(10, true, a, 0, imm);
                } else {
                    let b = self.reg_of(b)?;
                    self.dp_reg(10, true, a, 0, b);
                }
                Ok(())
            }
            A32Cset => {
                let rd = self.reg_of(data.results[0])?;
                let cc = int_cond(data.cc)?;
                // mov rd, #0; mov<cc> rd, #1.
                self.dp_imm(13, false, 0, rd, 0);
                self.buf
                    .put4((cc << 28) | 0x03a0_0001 | (rd << 12));
                Ok(())
            }
            A32Lea => {
                let rd = self.reg_of(data.results[0])?;
                let base = u32::from(regs::FP.hw_enc());
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
                if off >= 0 {
                    if let Some(imm) = encode_imm(off as u32) {
                        self.dp_imm(4, false, base, rd, imm);
                        return Ok(());
                    }
                } else if let Some(imm) = encode_imm((-off) as u32) {
                    self.dp_imm(2, false, base, rd, imm);
                    return Ok(());
                }
                let ip = u32::from(regs::IP.hw_enc());
                self.mov_imm(ip, off as u32);
                self.dp_reg(4, false, base, rd, ip);
                Ok(())
            }
            A32B => {
                self.buf.put4(COND_AL | 0x0a00_0000);
                self.buf.use_label_arm24(data.blocks[0]);
                Ok(())
            }
            A32Bcc => {
                let cc = int_cond(data.cc)?;
                self.buf.put4((cc << 28) | 0x0a00_0000);
                self.buf.use_label_arm24(data.blocks[0]);
                Ok(())
            }
            A32Bl => {
                match &self.func.dfg.operands[data.operands[0]] {
                    OperandData::Symbol { name, .. } => {
                        self.buf.reloc(Reloc::Arm32Call, name.clone(), -8);
                        self.buf.put4(COND_AL | 0x0b00_0000);
                    }
                    _ => {
                        return Err(CodegenError::Verifier(
                            "bl target must be a symbol".to_string(),
                        ))
                    }
                }
                self.release_args(data)?;
                Ok(())
            }
            A32Blx => {
                let rm = self.reg_of(data.operands[0])?;
                self.buf.put4(COND_AL | 0x012f_ff30 | rm);
                self.release_args(data)?;
                Ok(())
            }
            A32Ret => {
                self.epilogue();
                Ok(())
            }
            A32Ldr => self.load_store(data, true, |e, rt, b, o| e.ldst_word(true, false, rt, b, o)),
            A32Ldrb => self.load_store(data, true, |e, rt, b, o| e.ldst_word(true, true, rt, b, o)),
            A32Str => self.load_store(data, false, |e, rt, b, o| e.ldst_word(false, false, rt, b, o)),
            A32Strb => self.load_store(data, false, |e, rt, b, o| e.ldst_word(false, true, rt, b, o)),
            A32Ldrh => self.load_store(data, true, |e, rt, b, o| e.ldst_misc(0x20, true, rt, b, o)),
            A32Strh => self.load_store(data, false, |e, rt, b, o| e.ldst_misc(0x20, false, rt, b, o)),
            A32Ldrsb => self.load_store(data, true, |e, rt, b, o| e.ldst_misc(0x40, true, rt, b, o)),
            A32Ldrsh => self.load_store(data, true, |e, rt, b, o| e.ldst_misc(0x60, true, rt, b, o)),
            A32Sxtb => self.extend(data, 0x06af_0070),
            A32Sxth => self.extend(data, 0x06bf_0070),
            A32Uxtb => self.extend(data, 0x06ef_0070),
            A32Uxth => self.extend(data, 0x06ff_0070),
            other => Err(CodegenError::NotSupported(format!(
                "no armv6 encoding for {other}"
            ))),
        }
    }

    fn alu(&mut self, data: &InstData, op: u32) -> CodegenResult<()> {
        let rd = self.reg_of(data.results[0])?;
        let rn = self.reg_of(data.operands[0])?;
        let s = data.opcode.writes_flags();
        let b = data.operands[1];
        if let Some(imm) = self.imm_of(b) {
            let imm = encode_imm(imm as u32).ok_or_else(|| {
                CodegenError::Verifier("unencodable data-processing immediate".to_string())
            })?;
            self.dp_imm(op, s, rn, rd, imm);
        } else {
            let rm = self.reg_of(b)?;
            self.dp_reg(op, s, rn, rd, rm);
        }
        Ok(())
    }

    fn shift(&mut self, data: &InstData, ty: u32) -> CodegenResult<()> {
        let rd = self.reg_of(data.results[0])?;
        let rm = self.reg_of(data.operands[0])?;
        let count = data.operands[1];
        if let Some(imm) = self.imm_of(count) {
            let imm5 = (imm as u32) & 0x1f;
            self.buf
                .put4(COND_AL | 0x01a0_0000 | (rd << 12) | (imm5 << 7) | (ty << 5) | rm);
        } else {
            let rs = self.reg_of(count)?;
            self.buf
                .put4(COND_AL | 0x01a0_0010 | (rd << 12) | (rs << 8) | (ty << 5) | rm);
        }
        Ok(())
    }

    fn load_store(
        &mut self,
        data: &InstData,
        load: bool,
        encode: impl FnOnce(&mut Self, u32, u32, i32),
    ) -> CodegenResult<()> {
        let (base, off) = self.mem_of(data.operands[0], data.operands[1])?;
        let rt = if load {
            self.reg_of(data.results[0])?
        } else {
            self.reg_of(data.operands[2])?
        };
        encode(self, rt, base, off);
        Ok(())
    }

    fn extend(&mut self, data: &InstData, word: u32) -> CodegenResult<()> {
        let rd = self.reg_of(data.results[0])?;
        let rm = self.reg_of(data.operands[0])?;
        self.buf.put4(COND_AL | word | (rd << 12) | rm);
        Ok(())
    }

    fn release_args(&mut self, data: &InstData) -> CodegenResult<()> {
        let total = self.imm_of(data.operands[1]).unwrap_or(0) as u32;
        if total > 0 {
            if let Some(imm) = encode_imm(total) {
                // add sp, sp, #total.
                self.buf.put4(COND_AL | 0x028d_d000 | imm);
            } else {
                let ip = u32::from(regs::IP.hw_enc());
                self.mov_imm(ip, total);
                self.buf.put4(COND_AL | 0x008d_d000 | ip);
            }
        }
        Ok(())
    }
}

fn int_cond(cc: Option<CondCode>) -> CodegenResult<u32> {
    let cc = match cc {
        Some(CondCode::Int(cc)) => cc,
        _ => {
            return Err(CodegenError::Verifier(
                "conditional node without an integer condition".to_string(),
            ))
        }
    };
    Ok(match cc {
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
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{SymbolName, Ty};

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
    fn modified_immediates() {
        assert_eq!(encode_imm(0), Some(0));
        assert_eq!(encode_imm(0xff), Some(0xff));
        // 0xff000000 is 0xff rotated right by 8: rot field 4.
        assert_eq!(encode_imm(0xff00_0000), Some(0x4ff));
        assert_eq!(encode_imm(0x0000_1234), None);
    }

    #[test]
    fn add_register_form() {
        let bytes = emit_one(|f| {
            let r0 = f.dfg.cpu_reg(Ty::I32, regs::R0);
            let r1 = f.dfg.cpu_reg(Ty::I32, regs::R1);
            let r2 = f.dfg.cpu_reg(Ty::I32, regs::R2);
            Function::inst_binary(Opcode::A32Add, r0, r1, r2)
        });
        // adds r0, r1, r2 (the S bit rides on every add).
        assert_eq!(word(&bytes), 0xe091_0002);
    }

    #[test]
    fn mov_small_immediate() {
        let bytes = emit_one(|f| {
            let r3 = f.dfg.cpu_reg(Ty::I32, regs::R3);
            let c = f.dfg.iconst32(42);
            Function::inst_unary(Opcode::A32Mov, r3, c)
        });
        // mov r3, #42.
        assert_eq!(word(&bytes), 0xe3a0_302a);
    }

    #[test]
    fn mov_wide_immediate_uses_a_literal() {
        let bytes = emit_one(|f| {
            let r0 = f.dfg.cpu_reg(Ty::I32, regs::R0);
            let c = f.dfg.iconst32(0x0000_1234);
            Function::inst_unary(Opcode::A32Mov, r0, c)
        });
        assert_eq!(bytes.len(), 12);
        // ldr r0, [pc]; b +0; .word 0x1234.
        assert_eq!(word(&bytes[0..4]), 0xe59f_0000);
        assert_eq!(word(&bytes[4..8]), 0xea00_0000);
        assert_eq!(word(&bytes[8..12]), 0x0000_1234);
    }

    #[test]
    fn conditional_branch_condition_field() {
        let mut func = Function::new(SymbolName::from("t"));
        let block = func.dfg.make_block();
        func.layout.append_block(block);
        let mut bcc = InstData::new(Opcode::A32Bcc);
        bcc.cc = Some(CondCode::Int(IntCC::SignedLessThan));
        bcc.blocks.push(block);
        func.append_inst(block, bcc);
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
        // blt back to itself: cond LT(11), offset -2 words.
        assert_eq!(word(&bytes), 0xba00_0000 | 0x00ff_fffe);
    }
}
