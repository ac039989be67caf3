//! ARMv6 registers.
//!
//! r11 is the frame pointer, r13/r14/r15 have their architectural roles,
//! and r8/r9/r12 are reserved as spill scratch. This port is soft-float, so
//! there is no float bank at all; single-precision values travel in
//! general-purpose registers.

#![allow(missing_docs)]

use crate::isa::registers::{PReg, RegBank, RegClass};

pub const R0: PReg = PReg::new(RegClass::Int, 0, "r0");
pub const R1: PReg = PReg::new(RegClass::Int, 1, "r1");
pub const R2: PReg = PReg::new(RegClass::Int, 2, "r2");
pub const R3: PReg = PReg::new(RegClass::Int, 3, "r3");
pub const R4: PReg = PReg::new(RegClass::Int, 4, "r4");
pub const R5: PReg = PReg::new(RegClass::Int, 5, "r5");
pub const R6: PReg = PReg::new(RegClass::Int, 6, "r6");
pub const R7: PReg = PReg::new(RegClass::Int, 7, "r7");
pub const R8: PReg = PReg::new(RegClass::Int, 8, "r8");
pub const R9: PReg = PReg::new(RegClass::Int, 9, "r9");
pub const R10: PReg = PReg::new(RegClass::Int, 10, "r10");
pub const FP: PReg = PReg::new(RegClass::Int, 11, "fp");
pub const IP: PReg = PReg::new(RegClass::Int, 12, "ip");
pub const SP: PReg = PReg::new(RegClass::Int, 13, "sp");
pub const LR: PReg = PReg::new(RegClass::Int, 14, "lr");
pub const PC: PReg = PReg::new(RegClass::Int, 15, "pc");

/// The ARMv6 bank.
pub static BANK: RegBank = RegBank {
    int_regs: &[
        R0, R1, R2, R3, R4, R5, R6, R7, R8, R9, R10, FP, IP, SP, LR, PC,
    ],
    float_regs: &[],
    // r0..r7 and r10; r8/r9/ip are scratch.
    allocatable_int: 0b0100_1111_1111,
    allocatable_float: 0,
};

/// Spill scratch registers.
pub static SCRATCH_INT: [PReg; 3] = [R8, R9, IP];
pub static SCRATCH_FLOAT: [PReg; 0] = [];
