//! x86/x64 register banks.
//!
//! ESP and EBP are reserved for the stack frame. Two general-purpose and
//! two SSE registers per mode are reserved as spill scratch; byte-form
//! constraints keep the 32-bit allocatable set at EAX..EBX, which all have
//! low-byte encodings.

#![allow(missing_docs)]

use crate::isa::registers::{PReg, RegBank, RegClass};

/// General-purpose registers, indexed by hardware encoding.
pub const EAX: PReg = PReg::new(RegClass::Int, 0, "eax");
pub const ECX: PReg = PReg::new(RegClass::Int, 1, "ecx");
pub const EDX: PReg = PReg::new(RegClass::Int, 2, "edx");
pub const EBX: PReg = PReg::new(RegClass::Int, 3, "ebx");
pub const ESP: PReg = PReg::new(RegClass::Int, 4, "esp");
pub const EBP: PReg = PReg::new(RegClass::Int, 5, "ebp");
pub const ESI: PReg = PReg::new(RegClass::Int, 6, "esi");
pub const EDI: PReg = PReg::new(RegClass::Int, 7, "edi");
pub const R8: PReg = PReg::new(RegClass::Int, 8, "r8");
pub const R9: PReg = PReg::new(RegClass::Int, 9, "r9");
pub const R10: PReg = PReg::new(RegClass::Int, 10, "r10");
pub const R11: PReg = PReg::new(RegClass::Int, 11, "r11");
pub const R12: PReg = PReg::new(RegClass::Int, 12, "r12");
pub const R13: PReg = PReg::new(RegClass::Int, 13, "r13");
pub const R14: PReg = PReg::new(RegClass::Int, 14, "r14");
pub const R15: PReg = PReg::new(RegClass::Int, 15, "r15");

/// SSE registers.
pub const XMM0: PReg = PReg::new(RegClass::Float, 0, "xmm0");
pub const XMM1: PReg = PReg::new(RegClass::Float, 1, "xmm1");
pub const XMM2: PReg = PReg::new(RegClass::Float, 2, "xmm2");
pub const XMM3: PReg = PReg::new(RegClass::Float, 3, "xmm3");
pub const XMM4: PReg = PReg::new(RegClass::Float, 4, "xmm4");
pub const XMM5: PReg = PReg::new(RegClass::Float, 5, "xmm5");
pub const XMM6: PReg = PReg::new(RegClass::Float, 6, "xmm6");
pub const XMM7: PReg = PReg::new(RegClass::Float, 7, "xmm7");
pub const XMM8: PReg = PReg::new(RegClass::Float, 8, "xmm8");
pub const XMM9: PReg = PReg::new(RegClass::Float, 9, "xmm9");
pub const XMM10: PReg = PReg::new(RegClass::Float, 10, "xmm10");
pub const XMM11: PReg = PReg::new(RegClass::Float, 11, "xmm11");
pub const XMM12: PReg = PReg::new(RegClass::Float, 12, "xmm12");
pub const XMM13: PReg = PReg::new(RegClass::Float, 13, "xmm13");
pub const XMM14: PReg = PReg::new(RegClass::Float, 14, "xmm14");
pub const XMM15: PReg = PReg::new(RegClass::Float, 15, "xmm15");

/// The 32-bit mode bank.
pub static BANK32: RegBank = RegBank {
    int_regs: &[EAX, ECX, EDX, EBX, ESP, EBP, ESI, EDI],
    float_regs: &[XMM0, XMM1, XMM2, XMM3, XMM4, XMM5, XMM6, XMM7],
    // EAX..EBX; ESP/EBP are frame registers, ESI/EDI spill scratch.
    allocatable_int: 0b0000_1111,
    // XMM6/XMM7 are spill scratch.
    allocatable_float: 0b0011_1111,
};

/// The 64-bit mode bank.
pub static BANK64: RegBank = RegBank {
    int_regs: &[
        EAX, ECX, EDX, EBX, ESP, EBP, ESI, EDI, R8, R9, R10, R11, R12, R13, R14, R15,
    ],
    float_regs: &[
        XMM0, XMM1, XMM2, XMM3, XMM4, XMM5, XMM6, XMM7, XMM8, XMM9, XMM10, XMM11, XMM12, XMM13,
        XMM14, XMM15,
    ],
    // Everything except RSP/RBP (frame) and R10/R11 (spill scratch).
    allocatable_int: 0xffff & !(1 << 4) & !(1 << 5) & !(1 << 10) & !(1 << 11),
    // XMM14/XMM15 are spill scratch.
    allocatable_float: 0x3fff,
};

/// Spill scratch registers for 32-bit mode.
pub static SCRATCH32_INT: [PReg; 2] = [ESI, EDI];
/// Spill scratch registers for 64-bit mode.
pub static SCRATCH64_INT: [PReg; 2] = [R10, R11];
/// SSE spill scratch for 32-bit mode.
pub static SCRATCH32_FLOAT: [PReg; 2] = [XMM6, XMM7];
/// SSE spill scratch for 64-bit mode.
pub static SCRATCH64_FLOAT: [PReg; 2] = [XMM14, XMM15];
