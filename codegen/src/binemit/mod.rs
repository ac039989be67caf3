//! Binary machine code emission.
//!
//! The `CodeBuffer` receives the encoded bytes of one method. Branches to
//! blocks later in the layout are recorded as label fixups and patched
//! when the label binds; references to linker symbols become relocation
//! records the driver forwards to the linker.

use crate::ir::{Block, Inst, SymbolName};
use cranelift_entity::SecondaryMap;

/// Offset in bytes from the beginning of a function.
///
/// The compiler cross-compiles, so this is a fixed-width type rather than
/// the host's `usize`.
pub type CodeOffset = u32;

/// Addend to add to a symbol value.
pub type Addend = i64;

/// Relocation kinds understood by the linker.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Reloc {
    /// Absolute 4-byte address.
    Abs4,
    /// Absolute 8-byte address.
    Abs8,
    /// x86 PC-relative 4-byte, relative to the end of the instruction.
    X86PCRel4,
    /// A32 branch-and-link, 24-bit word offset.
    Arm32Call,
    /// A64 branch-and-link, 26-bit word offset.
    Arm64Call,
    /// A64 `movz`+`movk`×3 sequence loading a 64-bit absolute address.
    Arm64AbsMovSeq,
}

/// A relocation request recorded during emission.
#[derive(Clone, Debug)]
pub struct RelocRecord {
    /// Kind.
    pub kind: Reloc,
    /// Offset of the fixup within the emitted code.
    pub offset: CodeOffset,
    /// Target symbol.
    pub name: SymbolName,
    /// Addend.
    pub addend: Addend,
}

/// A pending intra-method branch fixup.
#[derive(Clone, Copy, Debug)]
enum LabelFixup {
    /// 32-bit PC-relative displacement, relative to the end of the field.
    Rel32 { at: CodeOffset },
    /// A32 24-bit word displacement in the low bits of the word at `at`;
    /// PC reads 8 bytes ahead.
    Arm24 { at: CodeOffset },
    /// A64 26-bit word displacement in the low bits of the word at `at`.
    Arm26 { at: CodeOffset },
    /// A64 19-bit word displacement in bits 5..24 of the word at `at`.
    Arm19 { at: CodeOffset },
}

/// Byte buffer with label and relocation support.
#[derive(Default)]
pub struct CodeBuffer {
    data: Vec<u8>,
    relocs: Vec<RelocRecord>,
    label_offsets: SecondaryMap<Block, CodeOffset>,
    label_bound: SecondaryMap<Block, bool>,
    fixups: Vec<(Block, LabelFixup)>,
    inst_offsets: SecondaryMap<Inst, CodeOffset>,
}

impl CodeBuffer {
    /// An empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current offset.
    pub fn offset(&self) -> CodeOffset {
        self.data.len() as CodeOffset
    }

    /// Emitted bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Recorded relocations.
    pub fn relocs(&self) -> &[RelocRecord] {
        &self.relocs
    }

    /// Add one byte.
    pub fn put1(&mut self, b: u8) {
        self.data.push(b);
    }

    /// Add two little-endian bytes.
    pub fn put2(&mut self, h: u16) {
        self.data.extend_from_slice(&h.to_le_bytes());
    }

    /// Add four little-endian bytes.
    pub fn put4(&mut self, w: u32) {
        self.data.extend_from_slice(&w.to_le_bytes());
    }

    /// Add eight little-endian bytes.
    pub fn put8(&mut self, d: u64) {
        self.data.extend_from_slice(&d.to_le_bytes());
    }

    /// Record the section offset of a node, for the debug map.
    pub fn mark_inst(&mut self, inst: Inst) {
        self.inst_offsets[inst] = self.offset();
    }

    /// Section offset recorded for a node.
    pub fn inst_offset(&self, inst: Inst) -> CodeOffset {
        self.inst_offsets[inst]
    }

    /// Bind `block`'s label at the current offset and patch every pending
    /// fixup against it.
    pub fn bind_label(&mut self, block: Block) {
        debug_assert!(!self.label_bound[block], "label bound twice");
        self.label_offsets[block] = self.offset();
        self.label_bound[block] = true;
        let mut pending = core::mem::take(&mut self.fixups);
        pending.retain(|&(target, fixup)| {
            if target == block {
                self.patch(fixup, self.label_offsets[block]);
                false
            } else {
                true
            }
        });
        self.fixups = pending;
    }

    /// Emit a 32-bit PC-relative displacement referring to `block`.
    pub fn use_label_rel32(&mut self, block: Block) {
        let at = self.offset();
        self.put4(0);
        self.pend(block, LabelFixup::Rel32 { at });
    }

    /// Patch the A32 branch word just emitted to target `block`.
    pub fn use_label_arm24(&mut self, block: Block) {
        let at = self.offset() - 4;
        self.pend(block, LabelFixup::Arm24 { at });
    }

    /// Patch the A64 branch word just emitted to target `block`.
    pub fn use_label_arm26(&mut self, block: Block) {
        let at = self.offset() - 4;
        self.pend(block, LabelFixup::Arm26 { at });
    }

    /// Patch the A64 conditional-branch word just emitted to target
    /// `block`.
    pub fn use_label_arm19(&mut self, block: Block) {
        let at = self.offset() - 4;
        self.pend(block, LabelFixup::Arm19 { at });
    }

    fn pend(&mut self, block: Block, fixup: LabelFixup) {
        if self.label_bound[block] {
            self.patch(fixup, self.label_offsets[block]);
        } else {
            self.fixups.push((block, fixup));
        }
    }

    fn patch(&mut self, fixup: LabelFixup, target: CodeOffset) {
        match fixup {
            LabelFixup::Rel32 { at } => {
                let disp = target as i64 - (at as i64 + 4);
                let bytes = (disp as i32).to_le_bytes();
                self.data[at as usize..at as usize + 4].copy_from_slice(&bytes);
            }
            LabelFixup::Arm24 { at } => {
                let disp = (target as i64 - (at as i64 + 8)) >> 2;
                let word = self.read4(at) | ((disp as u32) & 0x00ff_ffff);
                self.write4(at, word);
            }
            LabelFixup::Arm26 { at } => {
                let disp = (target as i64 - at as i64) >> 2;
                let word = self.read4(at) | ((disp as u32) & 0x03ff_ffff);
                self.write4(at, word);
            }
            LabelFixup::Arm19 { at } => {
                let disp = (target as i64 - at as i64) >> 2;
                let word = self.read4(at) | (((disp as u32) & 0x0007_ffff) << 5);
                self.write4(at, word);
            }
        }
    }

    fn read4(&self, at: CodeOffset) -> u32 {
        let bytes: [u8; 4] = self.data[at as usize..at as usize + 4]
            .try_into()
            .unwrap();
        u32::from_le_bytes(bytes)
    }

    fn write4(&mut self, at: CodeOffset, word: u32) {
        self.data[at as usize..at as usize + 4].copy_from_slice(&word.to_le_bytes());
    }

    /// Request a relocation at the current offset. The caller emits the
    /// placeholder field itself.
    pub fn reloc(&mut self, kind: Reloc, name: SymbolName, addend: Addend) {
        self.relocs.push(RelocRecord {
            kind,
            offset: self.offset(),
            name,
            addend,
        });
    }

    /// All labels must be bound when emission finishes.
    pub fn finish(self) -> (Vec<u8>, Vec<RelocRecord>) {
        debug_assert!(self.fixups.is_empty(), "unbound labels at finish");
        (self.data, self.relocs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cranelift_entity::EntityRef;

    #[test]
    fn backward_label() {
        let mut buf = CodeBuffer::new();
        let target = Block::new(0);
        buf.bind_label(target);
        buf.put1(0xe9);
        buf.use_label_rel32(target);
        // jmp rel32 back to offset 0: disp = 0 - 5 = -5.
        assert_eq!(buf.data(), &[0xe9, 0xfb, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn forward_label_patches_on_bind() {
        let mut buf = CodeBuffer::new();
        let target = Block::new(0);
        buf.put1(0xe9);
        buf.use_label_rel32(target);
        buf.put1(0x90);
        buf.bind_label(target);
        // Field ends at 5, target at 6: disp = 1.
        assert_eq!(buf.data(), &[0xe9, 0x01, 0x00, 0x00, 0x00, 0x90]);
    }

    #[test]
    fn reloc_records_offset() {
        let mut buf = CodeBuffer::new();
        buf.put1(0xe8);
        buf.reloc(Reloc::X86PCRel4, SymbolName::from("callee"), -4);
        buf.put4(0);
        let (_, relocs) = buf.finish();
        assert_eq!(relocs.len(), 1);
        assert_eq!(relocs[0].offset, 1);
        assert_eq!(relocs[0].kind, Reloc::X86PCRel4);
    }
}
