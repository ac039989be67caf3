//! Inlining eligibility.
//!
//! Inlining happens while decoding: a call to a small, straight-line,
//! exception-free callee is expanded by re-decoding the callee's body at
//! the call site. Re-decoding reads only the shared `TypeSystem`, so the
//! per-method isolation of the worker pool is preserved.

use crate::cil::CilOp;
use crate::settings::Options;
use crate::typesys::{MethodRef, TypeSystem};

/// May `callee` be expanded at a call site inside `caller`?
pub(crate) fn is_eligible(
    ts: &TypeSystem,
    options: &Options,
    caller: MethodRef,
    callee: MethodRef,
) -> bool {
    if callee == caller {
        return false;
    }
    let md = ts.method(callee);
    let body = match &md.body {
        Some(body) => body,
        None => return false,
    };
    if !body.regions.is_empty() || body.ops.len() > options.inline_threshold {
        return false;
    }
    // Straight-line bodies only: no control flow, a single trailing return.
    for (i, op) in body.ops.iter().enumerate() {
        match op {
            CilOp::Br(_)
            | CilOp::BrTrue(_)
            | CilOp::BrFalse(_)
            | CilOp::Bc(..)
            | CilOp::Switch(_) => return false,
            CilOp::Ret => return i + 1 == body.ops.len(),
            _ => {}
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cil::CilBody;
    use crate::typesys::{MethodData, MethodSig, TypeData};

    #[test]
    fn straight_line_getter_is_eligible() {
        let mut ts = TypeSystem::with_corlib();
        let object = ts.lookup("System.Object").unwrap();
        let i4 = ts.lookup("System.Int32").unwrap();
        let t = ts.add_type(TypeData::class("T", Some(object)));
        let getter = ts.add_method(
            t,
            MethodData::new("get_X", MethodSig::new(vec![], Some(i4)))
                .static_()
                .with_body(CilBody::from_ops(vec![CilOp::LdcI4(42), CilOp::Ret])),
        );
        let caller = ts.add_method(
            t,
            MethodData::new("M", MethodSig::default()).static_(),
        );
        let options = Options::default();
        assert!(is_eligible(&ts, &options, caller, getter));
        // Recursion is never expanded.
        assert!(!is_eligible(&ts, &options, getter, getter));
    }

    #[test]
    fn branchy_bodies_are_rejected() {
        let mut ts = TypeSystem::with_corlib();
        let object = ts.lookup("System.Object").unwrap();
        let t = ts.add_type(TypeData::class("T", Some(object)));
        let branchy = ts.add_method(
            t,
            MethodData::new("B", MethodSig::default())
                .static_()
                .with_body(CilBody::from_ops(vec![
                    CilOp::LdcI4(1),
                    CilOp::BrTrue(3),
                    CilOp::Nop,
                    CilOp::Ret,
                ])),
        );
        let caller = ts.add_method(t, MethodData::new("M", MethodSig::default()).static_());
        assert!(!is_eligible(&ts, &Options::default(), caller, branchy));
    }
}
