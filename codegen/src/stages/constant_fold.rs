//! Constant folding.
//!
//! Nodes whose operands are all constants are replaced by moves of the
//! computed constant. The evaluator here is shared with the sparse
//! conditional constant propagation stage.

use crate::compiler::{MethodCompiler, Stage};
use crate::cursor::FuncCursor;
use crate::ir::{CondCode, ConstValue, FloatCC, Function, IntCC, Opcode, Ty};
use crate::result::CodegenResult;

/// The constant-folding stage.
pub struct ConstantFoldStage;

impl Stage for ConstantFoldStage {
    fn name(&self) -> &'static str {
        "constant-folding"
    }

    fn run(&mut self, compiler: &mut MethodCompiler) -> CodegenResult<()> {
        let func = &mut compiler.func;
        let blocks: Vec<_> = func.layout.blocks().collect();
        let mut folded = 0u64;
        let mut changed = true;
        while changed {
            changed = false;
            for &block in &blocks {
                let mut pos = FuncCursor::new(func).at_block_top(block);
                while let Some(inst) = pos.next_inst() {
                    let data = &pos.func.dfg.insts[inst];
                    if !data.opcode.is_pure() || data.results.len() != 1 {
                        continue;
                    }
                    // Moves of constants are already in folded form.
                    if matches!(
                        data.opcode,
                        Opcode::Move32
                            | Opcode::Move64
                            | Opcode::MoveR4
                            | Opcode::MoveR8
                            | Opcode::MoveObject
                    ) {
                        continue;
                    }
                    let consts: Option<Vec<ConstValue>> = data
                        .operands
                        .iter()
                        .map(|&o| pos.func.dfg.operands[o].constant())
                        .collect();
                    let consts = match consts {
                        Some(consts) => consts,
                        None => continue,
                    };
                    let value = match eval(data.opcode, data.cc, &consts) {
                        Some(value) => value,
                        None => continue,
                    };
                    let result = data.results[0];
                    let ty = pos.func.dfg.ty(result);
                    let constant = make_const(pos.func, ty, value);
                    let move_op = match ty {
                        Ty::I64 => Opcode::Move64,
                        Ty::R4 => Opcode::MoveR4,
                        Ty::R8 => Opcode::MoveR8,
                        _ => Opcode::Move32,
                    };
                    pos.func.dfg.insts[inst] = Function::inst_unary(move_op, result, constant);
                    folded += 1;
                    changed = true;
                }
            }
        }
        compiler.counters.update("constant_folding.folded", folded);
        Ok(())
    }
}

fn make_const(func: &mut Function, ty: Ty, value: ConstValue) -> crate::ir::Operand {
    match value {
        ConstValue::Int(v) => func.dfg.iconst(ty, v),
        ConstValue::F32(v) => func.dfg.f32const(v),
        ConstValue::F64(v) => func.dfg.f64const(v),
        ConstValue::Null => func.dfg.null_const(),
    }
}

/// Evaluate `opcode` over constant operands. Returns `None` when the
/// operation cannot be folded (division by a zero constant keeps its trap,
/// unknown opcodes stay put).
pub(crate) fn eval(opcode: Opcode, cc: Option<CondCode>, consts: &[ConstValue]) -> Option<ConstValue> {
    use ConstValue::*;
    use Opcode::*;

    let int = |i: usize| consts.get(i).and_then(|c| c.as_int());
    let f32v = |i: usize| match consts.get(i) {
        Some(&F32(v)) => Some(v),
        _ => None,
    };
    let f64v = |i: usize| match consts.get(i) {
        Some(&F64(v)) => Some(v),
        _ => None,
    };

    let value = match opcode {
        Move32 | Move64 | MoveR4 | MoveR8 | MoveObject => consts[0],
        Add32 => Int(i64::from((int(0)? as i32).wrapping_add(int(1)? as i32))),
        Add64 => Int(int(0)?.wrapping_add(int(1)?)),
        Sub32 => Int(i64::from((int(0)? as i32).wrapping_sub(int(1)? as i32))),
        Sub64 => Int(int(0)?.wrapping_sub(int(1)?)),
        MulSigned32 => Int(i64::from((int(0)? as i32).wrapping_mul(int(1)? as i32))),
        MulSigned64 => Int(int(0)?.wrapping_mul(int(1)?)),
        DivSigned32 => {
            let (a, b) = (int(0)? as i32, int(1)? as i32);
            if b == 0 || (a == i32::MIN && b == -1) {
                return None;
            }
            Int(i64::from(a / b))
        }
        DivSigned64 => {
            let (a, b) = (int(0)?, int(1)?);
            if b == 0 || (a == i64::MIN && b == -1) {
                return None;
            }
            Int(a / b)
        }
        DivUnsigned32 => {
            let (a, b) = (int(0)? as u32, int(1)? as u32);
            if b == 0 {
                return None;
            }
            Int(i64::from(a / b))
        }
        DivUnsigned64 => {
            let (a, b) = (int(0)? as u64, int(1)? as u64);
            if b == 0 {
                return None;
            }
            Int((a / b) as i64)
        }
        RemSigned32 => {
            let (a, b) = (int(0)? as i32, int(1)? as i32);
            if b == 0 || (a == i32::MIN && b == -1) {
                return None;
            }
            Int(i64::from(a % b))
        }
        RemUnsigned32 => {
            let (a, b) = (int(0)? as u32, int(1)? as u32);
            if b == 0 {
                return None;
            }
            Int(i64::from(a % b))
        }
        And32 | And64 => Int(int(0)? & int(1)?),
        Or32 | Or64 => Int(int(0)? | int(1)?),
        Xor32 | Xor64 => Int(int(0)? ^ int(1)?),
        Not32 => Int(i64::from(!(int(0)? as i32))),
        Not64 => Int(!int(0)?),
        ShiftLeft32 => Int(i64::from((int(0)? as i32) << (int(1)? as u32 & 31))),
        ShiftLeft64 => Int(int(0)? << (int(1)? as u32 & 63)),
        ShiftRight32 => Int(i64::from(((int(0)? as u32) >> (int(1)? as u32 & 31)) as i32)),
        ShiftRight64 => Int((int(0)? as u64 >> (int(1)? as u32 & 63)) as i64),
        ArithShiftRight32 => Int(i64::from((int(0)? as i32) >> (int(1)? as u32 & 31))),
        ArithShiftRight64 => Int(int(0)? >> (int(1)? as u32 & 63)),
        SignExtend8x32 => Int(i64::from(int(0)? as i8)),
        SignExtend16x32 => Int(i64::from(int(0)? as i16)),
        SignExtend32x64 => Int(i64::from(int(0)? as i32)),
        ZeroExtend8x32 => Int(i64::from(int(0)? as u8)),
        ZeroExtend16x32 => Int(i64::from(int(0)? as u16)),
        ZeroExtend32x64 => Int(i64::from(int(0)? as u32)),
        Truncate64x32 => Int(i64::from(int(0)? as i32)),
        AddR4 => F32(f32v(0)? + f32v(1)?),
        AddR8 => F64(f64v(0)? + f64v(1)?),
        SubR4 => F32(f32v(0)? - f32v(1)?),
        SubR8 => F64(f64v(0)? - f64v(1)?),
        MulR4 => F32(f32v(0)? * f32v(1)?),
        MulR8 => F64(f64v(0)? * f64v(1)?),
        DivR4 => F32(f32v(0)? / f32v(1)?),
        DivR8 => F64(f64v(0)? / f64v(1)?),
        ConvertI32ToR4 => F32(int(0)? as i32 as f32),
        ConvertI32ToR8 => F64(f64::from(int(0)? as i32)),
        ConvertR4ToR8 => F64(f64::from(f32v(0)?)),
        ConvertR8ToR4 => F32(f64v(0)? as f32),
        CompareInt32 => {
            let cc = match cc? {
                CondCode::Int(cc) => cc,
                CondCode::Float(_) => return None,
            };
            Int(i64::from(eval_int_cc(cc, int(0)? as i32 as i64, int(1)? as i32 as i64, 32)))
        }
        CompareInt64 => {
            let cc = match cc? {
                CondCode::Int(cc) => cc,
                CondCode::Float(_) => return None,
            };
            Int(i64::from(eval_int_cc(cc, int(0)?, int(1)?, 64)))
        }
        CompareR8 => {
            let cc = match cc? {
                CondCode::Float(cc) => cc,
                CondCode::Int(_) => return None,
            };
            Int(i64::from(eval_float_cc(cc, f64v(0)?, f64v(1)?)))
        }
        CompareR4 => {
            let cc = match cc? {
                CondCode::Float(cc) => cc,
                CondCode::Int(_) => return None,
            };
            Int(i64::from(eval_float_cc(
                cc,
                f64::from(f32v(0)?),
                f64::from(f32v(1)?),
            )))
        }
        _ => return None,
    };
    Some(value)
}

/// Evaluate an integer condition over sign-extended constants.
pub(crate) fn eval_int_cc(cc: IntCC, a: i64, b: i64, bits: u32) -> bool {
    let mask = if bits == 64 { u64::MAX } else { (1 << bits) - 1 };
    let (ua, ub) = (a as u64 & mask, b as u64 & mask);
    match cc {
        IntCC::Equal => a == b,
        IntCC::NotEqual => a != b,
        IntCC::SignedLessThan => a < b,
        IntCC::SignedLessThanOrEqual => a <= b,
        IntCC::SignedGreaterThan => a > b,
        IntCC::SignedGreaterThanOrEqual => a >= b,
        IntCC::UnsignedLessThan => ua < ub,
        IntCC::UnsignedLessThanOrEqual => ua <= ub,
        IntCC::UnsignedGreaterThan => ua > ub,
        IntCC::UnsignedGreaterThanOrEqual => ua >= ub,
    }
}

/// Evaluate a float condition with IEEE unordered semantics.
pub(crate) fn eval_float_cc(cc: FloatCC, a: f64, b: f64) -> bool {
    let unordered = a.is_nan() || b.is_nan();
    match cc {
        FloatCC::Equal => !unordered && a == b,
        FloatCC::NotEqual => unordered || a != b,
        FloatCC::LessThan => !unordered && a < b,
        FloatCC::LessThanOrEqual => !unordered && a <= b,
        FloatCC::GreaterThan => !unordered && a > b,
        FloatCC::GreaterThanOrEqual => !unordered && a >= b,
        FloatCC::UnorderedOrLessThan => unordered || a < b,
        FloatCC::UnorderedOrLessThanOrEqual => unordered || a <= b,
        FloatCC::UnorderedOrGreaterThan => unordered || a > b,
        FloatCC::UnorderedOrGreaterThanOrEqual => unordered || a >= b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapping_arithmetic() {
        let a = ConstValue::Int(i64::from(i32::MAX));
        let b = ConstValue::Int(1);
        assert_eq!(
            eval(Opcode::Add32, None, &[a, b]),
            Some(ConstValue::Int(i64::from(i32::MIN)))
        );
    }

    #[test]
    fn division_by_zero_is_not_folded() {
        let a = ConstValue::Int(10);
        let b = ConstValue::Int(0);
        assert_eq!(eval(Opcode::DivSigned32, None, &[a, b]), None);
        assert_eq!(eval(Opcode::DivUnsigned32, None, &[a, b]), None);
    }

    #[test]
    fn unsigned_comparison() {
        // -1 is the largest unsigned 32-bit value.
        assert!(eval_int_cc(IntCC::UnsignedGreaterThan, -1, 1, 32));
        assert!(!eval_int_cc(IntCC::SignedGreaterThan, -1, 1, 32));
    }

    #[test]
    fn nan_comparisons_are_unordered() {
        assert!(!eval_float_cc(FloatCC::Equal, f64::NAN, f64::NAN));
        assert!(eval_float_cc(FloatCC::NotEqual, f64::NAN, 0.0));
        assert!(eval_float_cc(FloatCC::UnorderedOrLessThan, f64::NAN, 0.0));
        assert!(!eval_float_cc(FloatCC::LessThan, f64::NAN, 0.0));
    }

    #[test]
    fn shifts_mask_their_count() {
        let v = ConstValue::Int(1);
        let c = ConstValue::Int(33);
        assert_eq!(
            eval(Opcode::ShiftLeft32, None, &[v, c]),
            Some(ConstValue::Int(2))
        );
    }
}
