//! Multiboot 0.6.95 header writer.
//!
//! Emits the fixed-format block a multiboot-compliant loader scans for in
//! the first 8 KiB of the image: magic, flags, checksum, the address
//! quartet, and the entry point. The header and entry fields are written
//! as relocations so the values track the final layout; no video-mode
//! fields are emitted because flag bit 2 is not set.

use crate::binemit::Reloc;
use crate::linker::{ObjectLinker, SectionKind};
use crate::result::CodegenResult;

/// The multiboot magic value.
pub const MULTIBOOT_MAGIC: u32 = 0x1bad_b002;
/// Request memory info (bit 1) and page-aligned modules (bit 0).
pub const MULTIBOOT_FLAGS: u32 = 0x0000_0003;
/// The linker symbol carrying the header.
pub const MULTIBOOT_HEADER_SYMBOL: &str = "<$>mosa-multiboot-header";

/// Write the multiboot header, wiring its entry field to `entry_symbol`.
pub fn write_multiboot_header(linker: &ObjectLinker, entry_symbol: &str) -> CodegenResult<()> {
    linker.allocate(MULTIBOOT_HEADER_SYMBOL, SectionKind::Text, 64, 4);

    let checksum = 0u32
        .wrapping_sub(MULTIBOOT_MAGIC)
        .wrapping_sub(MULTIBOOT_FLAGS);
    linker.write(MULTIBOOT_HEADER_SYMBOL, 0, &MULTIBOOT_MAGIC.to_le_bytes());
    linker.write(MULTIBOOT_HEADER_SYMBOL, 4, &MULTIBOOT_FLAGS.to_le_bytes());
    linker.write(MULTIBOOT_HEADER_SYMBOL, 8, &checksum.to_le_bytes());

    // header_addr: the header's own final address.
    linker.link(
        Reloc::Abs4,
        MULTIBOOT_HEADER_SYMBOL,
        12,
        MULTIBOOT_HEADER_SYMBOL,
        0,
    );
    // load_addr: the image base.
    linker.write(
        MULTIBOOT_HEADER_SYMBOL,
        16,
        &(linker.base_address() as u32).to_le_bytes(),
    );
    // load_end_addr and bss_end_addr stay zero: load the whole image.
    // entry_addr resolves to the kernel entry point.
    linker.link(
        Reloc::Abs4,
        MULTIBOOT_HEADER_SYMBOL,
        28,
        entry_symbol,
        0,
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout() {
        let linker = ObjectLinker::new(0x0040_0000);
        linker.allocate("kernel_entry", SectionKind::Text, 16, 16);
        write_multiboot_header(&linker, "kernel_entry").unwrap();

        let symbol = linker.get_symbol(MULTIBOOT_HEADER_SYMBOL).unwrap();
        assert_eq!(symbol.size, 64);
        assert_eq!(symbol.section, SectionKind::Text);

        let image = linker.finalize().unwrap();
        let text = &image.sections[0];
        let base = symbol.offset as usize;
        let field = |i: usize| {
            u32::from_le_bytes(text.data[base + i..base + i + 4].try_into().unwrap())
        };

        assert_eq!(field(0), 0x1bad_b002);
        assert_eq!(field(4), 0x0000_0003);
        // checksum makes magic + flags + checksum wrap to zero.
        assert_eq!(
            field(0).wrapping_add(field(4)).wrapping_add(field(8)),
            0
        );
        // header_addr = section virtual address + section offset.
        assert_eq!(
            u64::from(field(12)),
            text.virtual_address + u64::from(symbol.offset)
        );
        // load_addr = image base; end addresses zeroed.
        assert_eq!(field(16), 0x0040_0000);
        assert_eq!(field(20), 0);
        assert_eq!(field(24), 0);
        // entry_addr resolves to the entry symbol.
        assert_eq!(u64::from(field(28)), text.virtual_address);
    }
}
