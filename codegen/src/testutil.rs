//! Shared fixtures for stage unit tests.

use crate::cil::CilBody;
use crate::compiler::MethodCompiler;
use crate::counters::Counters;
use crate::ir::Function;
use crate::isa::TargetIsa;
use crate::settings::Options;
use crate::type_layout::TypeLayout;
use crate::typesys::{MethodData, MethodRef, MethodSig, TypeData, TypeSystem};
use std::sync::Arc;

/// Owns the shared services a `MethodCompiler` borrows.
pub(crate) struct TestContext {
    pub type_system: Arc<TypeSystem>,
    pub type_layout: TypeLayout,
    pub isa: Box<dyn TargetIsa>,
    pub options: Options,
    pub method: MethodRef,
}

impl TestContext {
    /// A corlib type system with one empty static method `T::M`, on the
    /// given target.
    pub fn with_triple(triple: &str) -> Self {
        let mut ts = TypeSystem::with_corlib();
        let object = ts.lookup("System.Object").unwrap();
        let holder = ts.add_type(TypeData::class("T", Some(object)));
        let method = ts.add_method(
            holder,
            MethodData::new("M", MethodSig::default())
                .static_()
                .with_body(CilBody::default()),
        );
        let ts = Arc::new(ts);
        let isa = crate::isa::lookup(&triple.parse().unwrap()).unwrap();
        let type_layout = TypeLayout::new(ts.clone(), isa.ptr_size(), isa.ptr_align());
        Self {
            type_system: ts,
            type_layout,
            isa,
            options: Options::no_opt(),
            method,
        }
    }

    /// 32-bit x86 context.
    pub fn x86() -> Self {
        Self::with_triple("i686-unknown-none")
    }

    /// A method compiler wrapping a hand-built function.
    pub fn compiler(&self, func: Function) -> MethodCompiler<'_> {
        MethodCompiler {
            method: self.method,
            func,
            type_system: &self.type_system,
            type_layout: &self.type_layout,
            isa: &*self.isa,
            options: &self.options,
            counters: Counters::new(),
            emitted: None,
        }
    }
}
