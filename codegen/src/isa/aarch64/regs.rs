//! ARMv8 (AArch64) registers.
//!
//! x29 is the frame pointer, x30 the link register; x16/x17 (the
//! intra-procedure-call registers) and v14/v15 are spill scratch.

#![allow(missing_docs)]

use crate::isa::registers::{PReg, RegBank, RegClass};

macro_rules! xreg {
    ($name:ident, $n:expr, $s:expr) => {
        pub const $name: PReg = PReg::new(RegClass::Int, $n, $s);
    };
}
macro_rules! vreg {
    ($name:ident, $n:expr, $s:expr) => {
        pub const $name: PReg = PReg::new(RegClass::Float, $n, $s);
    };
}

xreg!(X0, 0, "x0");
xreg!(X1, 1, "x1");
xreg!(X2, 2, "x2");
xreg!(X3, 3, "x3");
xreg!(X4, 4, "x4");
xreg!(X5, 5, "x5");
xreg!(X6, 6, "x6");
xreg!(X7, 7, "x7");
xreg!(X8, 8, "x8");
xreg!(X9, 9, "x9");
xreg!(X10, 10, "x10");
xreg!(X11, 11, "x11");
xreg!(X12, 12, "x12");
xreg!(X13, 13, "x13");
xreg!(X14, 14, "x14");
xreg!(X15, 15, "x15");
xreg!(X16, 16, "x16");
xreg!(X17, 17, "x17");
xreg!(FP, 29, "x29");
xreg!(LR, 30, "x30");
xreg!(SP, 31, "sp");

vreg!(V0, 0, "v0");
vreg!(V1, 1, "v1");
vreg!(V2, 2, "v2");
vreg!(V3, 3, "v3");
vreg!(V4, 4, "v4");
vreg!(V5, 5, "v5");
vreg!(V6, 6, "v6");
vreg!(V7, 7, "v7");
vreg!(V8, 8, "v8");
vreg!(V9, 9, "v9");
vreg!(V10, 10, "v10");
vreg!(V11, 11, "v11");
vreg!(V12, 12, "v12");
vreg!(V13, 13, "v13");
vreg!(V14, 14, "v14");
vreg!(V15, 15, "v15");

/// The AArch64 bank. The register arrays are indexed by hardware
/// encoding, so the gap between x17 and x29 is filled with the reserved
/// registers themselves; none of them are allocatable.
pub static BANK: RegBank = RegBank {
    int_regs: &[
        X0, X1, X2, X3, X4, X5, X6, X7, X8, X9, X10, X11, X12, X13, X14, X15, X16, X17, X16, X16,
        X16, X16, X16, X16, X16, X16, X16, X16, X16, FP, LR, SP,
    ],
    float_regs: &[
        V0, V1, V2, V3, V4, V5, V6, V7, V8, V9, V10, V11, V12, V13, V14, V15,
    ],
    // x0..x14; x15..x17 are scratch.
    allocatable_int: 0x7fff,
    // v0..v13; v14/v15 are scratch.
    allocatable_float: 0x3fff,
};

/// Spill scratch registers.
pub static SCRATCH_INT: [PReg; 3] = [X15, X16, X17];
pub static SCRATCH_FLOAT: [PReg; 2] = [V14, V15];
