//! The linker interface and the in-memory object linker.
//!
//! Workers allocate symbols and hand in code plus relocation requests
//! concurrently; the single-threaded `finalize` assigns section virtual
//! addresses and patches every relocation in place. The result is a set
//! of laid-out sections ready for the object-file writer and the boot
//! packager.

use crate::binemit::{Addend, CodeOffset, Reloc};
use crate::result::{CodegenError, CodegenResult};
use rustc_hash::FxHashMap;
use std::sync::Mutex;

/// Output section kinds, in image order.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum SectionKind {
    /// Executable code.
    Text,
    /// Read-only data.
    ROData,
    /// Initialized data.
    Data,
    /// Zero-initialized data; occupies no file space.
    Bss,
}

impl SectionKind {
    /// All kinds in layout order.
    pub fn all() -> [SectionKind; 4] {
        [Self::Text, Self::ROData, Self::Data, Self::Bss]
    }

    /// Section name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Text => ".text",
            Self::ROData => ".rodata",
            Self::Data => ".data",
            Self::Bss => ".bss",
        }
    }
}

/// A defined symbol.
#[derive(Clone, Debug)]
pub struct Symbol {
    /// Name.
    pub name: String,
    /// Containing section.
    pub section: SectionKind,
    /// Offset inside the section.
    pub offset: u32,
    /// Size in bytes.
    pub size: u32,
}

#[derive(Clone, Debug)]
struct PendingReloc {
    kind: Reloc,
    section: SectionKind,
    /// Offset of the fixup within the section.
    offset: u32,
    target: String,
    addend: Addend,
}

/// A laid-out section after `finalize`.
pub struct Section {
    /// Kind.
    pub kind: SectionKind,
    /// Assigned virtual address.
    pub virtual_address: u64,
    /// Contents; empty for bss.
    pub data: Vec<u8>,
    /// Size including bss space.
    pub size: u32,
}

/// The finished image.
pub struct Image {
    /// Sections in layout order.
    pub sections: Vec<Section>,
    /// All symbols with their final virtual addresses.
    pub symbols: Vec<(Symbol, u64)>,
}

#[derive(Default)]
struct LinkerInner {
    sections: FxHashMap<SectionKind, Vec<u8>>,
    symbols: Vec<Symbol>,
    by_name: FxHashMap<String, usize>,
    relocs: Vec<PendingReloc>,
    externals: FxHashMap<String, u64>,
}

/// The linker sink the emitter and boot writer feed. Symbol insertion is
/// thread-safe; layout happens once in [`ObjectLinker::finalize`].
pub struct ObjectLinker {
    base_address: u64,
    section_align: u64,
    inner: Mutex<LinkerInner>,
}

impl ObjectLinker {
    /// Create a linker placing the image at `base_address`.
    pub fn new(base_address: u64) -> Self {
        Self {
            base_address,
            section_align: 0x1000,
            inner: Mutex::new(LinkerInner::default()),
        }
    }

    /// Image base address.
    pub fn base_address(&self) -> u64 {
        self.base_address
    }

    /// Load/virtual section alignment.
    pub fn section_alignment(&self) -> u64 {
        self.section_align
    }

    /// Declare an externally-provided symbol at a fixed address (runtime
    /// helpers linked by the boot packager).
    pub fn declare_external(&self, name: &str, address: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.externals.insert(name.to_string(), address);
    }

    /// Allocate `size` bytes for `name` in `section` with the requested
    /// alignment, returning the symbol's section offset.
    pub fn allocate(&self, name: &str, section: SectionKind, size: u32, align: u32) -> u32 {
        let mut inner = self.inner.lock().unwrap();
        let data = inner.sections.entry(section).or_default();
        let align = align.max(1) as usize;
        let offset = data.len().div_ceil(align) * align;
        data.resize(offset + size as usize, 0);
        let symbol = Symbol {
            name: name.to_string(),
            section,
            offset: offset as u32,
            size,
        };
        let index = inner.symbols.len();
        inner.symbols.push(symbol);
        inner.by_name.insert(name.to_string(), index);
        offset as u32
    }

    /// Write bytes into a previously allocated symbol.
    pub fn write(&self, name: &str, offset: u32, bytes: &[u8]) {
        let mut inner = self.inner.lock().unwrap();
        let index = *inner.by_name.get(name).expect("symbol not allocated");
        let Symbol {
            section,
            offset: sym_offset,
            size,
            ..
        } = inner.symbols[index].clone();
        debug_assert!(offset + bytes.len() as u32 <= size);
        let data = inner.sections.get_mut(&section).unwrap();
        let start = (sym_offset + offset) as usize;
        data[start..start + bytes.len()].copy_from_slice(bytes);
    }

    /// Request a relocation inside `in_symbol` at `offset` against
    /// `target`.
    pub fn link(&self, kind: Reloc, in_symbol: &str, offset: CodeOffset, target: &str, addend: Addend) {
        let mut inner = self.inner.lock().unwrap();
        let index = *inner.by_name.get(in_symbol).expect("symbol not allocated");
        let symbol = inner.symbols[index].clone();
        inner.relocs.push(PendingReloc {
            kind,
            section: symbol.section,
            offset: symbol.offset + offset,
            target: target.to_string(),
            addend,
        });
    }

    /// Look a symbol up by name.
    pub fn get_symbol(&self, name: &str) -> Option<Symbol> {
        let inner = self.inner.lock().unwrap();
        inner.by_name.get(name).map(|&i| inner.symbols[i].clone())
    }

    /// Assign virtual addresses and patch every relocation. Single
    /// threaded; runs after all methods have been ingested.
    pub fn finalize(self) -> CodegenResult<Image> {
        let inner = self.inner.into_inner().unwrap();

        // Lay sections out in order at aligned virtual addresses.
        let mut address = self.base_address;
        let mut section_addr: FxHashMap<SectionKind, u64> = FxHashMap::default();
        let mut sections = Vec::new();
        for kind in SectionKind::all() {
            let data = inner.sections.get(&kind).cloned().unwrap_or_default();
            address = address.div_ceil(self.section_align) * self.section_align;
            section_addr.insert(kind, address);
            let size = data.len() as u32;
            address += u64::from(size);
            sections.push(Section {
                kind,
                virtual_address: section_addr[&kind],
                data: if kind == SectionKind::Bss {
                    Vec::new()
                } else {
                    data
                },
                size,
            });
        }

        let symbol_address = |name: &str| -> CodegenResult<u64> {
            if let Some(&index) = inner.by_name.get(name) {
                let s = &inner.symbols[index];
                return Ok(section_addr[&s.section] + u64::from(s.offset));
            }
            if let Some(&addr) = inner.externals.get(name) {
                return Ok(addr);
            }
            Err(CodegenError::Linker(format!("undefined symbol {name}")))
        };

        // Patch.
        for reloc in &inner.relocs {
            let target = symbol_address(&reloc.target)?;
            let place = section_addr[&reloc.section] + u64::from(reloc.offset);
            let section = sections
                .iter_mut()
                .find(|s| s.kind == reloc.section)
                .unwrap();
            if reloc.section == SectionKind::Bss {
                return Err(CodegenError::Linker(
                    "relocation in a zero-initialized section".to_string(),
                ));
            }
            let at = reloc.offset as usize;
            let data = &mut section.data;
            match reloc.kind {
                Reloc::Abs4 => {
                    let value = (target as i64 + reloc.addend) as u32;
                    data[at..at + 4].copy_from_slice(&value.to_le_bytes());
                }
                Reloc::Abs8 => {
                    let value = (target as i64 + reloc.addend) as u64;
                    data[at..at + 8].copy_from_slice(&value.to_le_bytes());
                }
                Reloc::X86PCRel4 => {
                    let value = (target as i64 + reloc.addend - place as i64) as i32;
                    data[at..at + 4].copy_from_slice(&value.to_le_bytes());
                }
                Reloc::Arm32Call => {
                    let disp = (target as i64 + reloc.addend - place as i64) >> 2;
                    let mut word = u32::from_le_bytes(data[at..at + 4].try_into().unwrap());
                    word |= (disp as u32) & 0x00ff_ffff;
                    data[at..at + 4].copy_from_slice(&word.to_le_bytes());
                }
                Reloc::Arm64Call => {
                    let disp = (target as i64 + reloc.addend - place as i64) >> 2;
                    let mut word = u32::from_le_bytes(data[at..at + 4].try_into().unwrap());
                    word |= (disp as u32) & 0x03ff_ffff;
                    data[at..at + 4].copy_from_slice(&word.to_le_bytes());
                }
                Reloc::Arm64AbsMovSeq => {
                    let value = (target as i64 + reloc.addend) as u64;
                    for hw in 0..4usize {
                        let field = ((value >> (16 * hw)) & 0xffff) as u32;
                        let word_at = at + hw * 4;
                        let mut word =
                            u32::from_le_bytes(data[word_at..word_at + 4].try_into().unwrap());
                        word = (word & !(0xffff << 5)) | (field << 5);
                        data[word_at..word_at + 4].copy_from_slice(&word.to_le_bytes());
                    }
                }
            }
        }

        let symbols = inner
            .symbols
            .iter()
            .map(|s| {
                let addr = section_addr[&s.section] + u64::from(s.offset);
                (s.clone(), addr)
            })
            .collect();
        Ok(Image { sections, symbols })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_respects_alignment() {
        let linker = ObjectLinker::new(0x0040_0000);
        let a = linker.allocate("a", SectionKind::Text, 3, 1);
        let b = linker.allocate("b", SectionKind::Text, 4, 16);
        assert_eq!(a, 0);
        assert_eq!(b, 16);
    }

    #[test]
    fn pcrel_patching() {
        let linker = ObjectLinker::new(0x0040_0000);
        linker.allocate("caller", SectionKind::Text, 16, 16);
        linker.allocate("callee", SectionKind::Text, 16, 16);
        // call at offset 3 inside `caller` (after the E8 byte at 2).
        linker.write("caller", 2, &[0xe8, 0, 0, 0, 0]);
        linker.link(Reloc::X86PCRel4, "caller", 3, "callee", -4);
        let image = linker.finalize().unwrap();
        let text = &image.sections[0];
        let disp = i32::from_le_bytes(text.data[3..7].try_into().unwrap());
        // callee at +16, field at +3: 16 - 3 - 4 = 9.
        assert_eq!(disp, 9);
    }

    #[test]
    fn undefined_symbols_fail_the_build() {
        let linker = ObjectLinker::new(0x0040_0000);
        linker.allocate("caller", SectionKind::Text, 8, 4);
        linker.link(Reloc::Abs4, "caller", 0, "missing", 0);
        assert!(matches!(
            linker.finalize(),
            Err(CodegenError::Linker(_))
        ));
    }

    #[test]
    fn externals_resolve() {
        let linker = ObjectLinker::new(0x0040_0000);
        linker.allocate("caller", SectionKind::Text, 8, 4);
        linker.declare_external("mosa_rt_memcpy", 0x0010_0000);
        linker.link(Reloc::Abs4, "caller", 0, "mosa_rt_memcpy", 0);
        let image = linker.finalize().unwrap();
        let word = u32::from_le_bytes(image.sections[0].data[0..4].try_into().unwrap());
        assert_eq!(word, 0x0010_0000);
    }
}
