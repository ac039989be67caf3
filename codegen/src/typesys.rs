//! The managed type system consumed by the compiler.
//!
//! The metadata loader produces this already-parsed type-and-method graph;
//! the compiler only reads it. Types, methods and fields are entity
//! references into arenas owned by the `TypeSystem`, so the shared
//! structure can be handed to worker threads behind an `Arc` without
//! interior pointers.

use crate::cil::CilBody;
use core::fmt;
use cranelift_entity::{entity_impl, PrimaryMap};
use rustc_hash::FxHashMap;

/// An opaque reference to a managed type.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeRef(u32);
entity_impl!(TypeRef, "type");

/// An opaque reference to a method.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodRef(u32);
entity_impl!(MethodRef, "method");

/// An opaque reference to a field.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldRef(u32);
entity_impl!(FieldRef, "field");

/// Built-in primitive kinds.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum PrimKind {
    /// `System.Boolean`.
    Bool,
    /// `System.Char`.
    Char,
    /// `System.SByte`.
    I1,
    /// `System.Int16`.
    I2,
    /// `System.Int32`.
    I4,
    /// `System.Int64`.
    I8,
    /// `System.Byte`.
    U1,
    /// `System.UInt16`.
    U2,
    /// `System.UInt32`.
    U4,
    /// `System.UInt64`.
    U8,
    /// `System.Single`.
    R4,
    /// `System.Double`.
    R8,
    /// `System.IntPtr`.
    I,
    /// `System.UIntPtr`.
    U,
}

impl PrimKind {
    /// Size in bytes on a target with the given pointer size.
    pub fn size(self, ptr_size: u32) -> u32 {
        match self {
            Self::Bool | Self::I1 | Self::U1 => 1,
            Self::Char | Self::I2 | Self::U2 => 2,
            Self::I4 | Self::U4 | Self::R4 => 4,
            Self::I8 | Self::U8 | Self::R8 => 8,
            Self::I | Self::U => ptr_size,
        }
    }

    /// Is this kind signed?
    pub fn is_signed(self) -> bool {
        matches!(self, Self::I1 | Self::I2 | Self::I4 | Self::I8 | Self::I)
    }
}

/// The kind of a managed type.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum TypeKind {
    /// The `<Module>` pseudo-type; never laid out.
    Module,
    /// A reference type.
    Class,
    /// A user value type.
    ValueType,
    /// An interface.
    Interface,
    /// A built-in primitive value type.
    Primitive(PrimKind),
}

/// A managed type.
#[derive(Clone, Debug)]
pub struct TypeData {
    /// Namespace-qualified name.
    pub name: String,
    /// Kind.
    pub kind: TypeKind,
    /// Base type; `None` for `System.Object`, interfaces, and ghosts.
    pub base: Option<TypeRef>,
    /// Implemented interfaces.
    pub interfaces: Vec<TypeRef>,
    /// Fields in declaration order. Maintained by `TypeSystem::add_field`.
    pub fields: Vec<FieldRef>,
    /// Methods in declaration order. Maintained by `TypeSystem::add_method`.
    pub methods: Vec<MethodRef>,
    /// User-specified field offsets.
    pub is_explicit_layout: bool,
    /// Packing size; `None` means the native pointer alignment.
    pub packing: Option<u32>,
    /// Explicit class size; `-1` and `None` both mean unset.
    pub class_size: Option<i32>,
    /// Element type, for modifier types that wrap another type.
    pub element: Option<TypeRef>,
    /// Generic parameter count; open generics are never compiled.
    pub generic_params: u32,
}

impl TypeData {
    /// A plain class with the given base.
    pub fn class(name: impl Into<String>, base: Option<TypeRef>) -> Self {
        Self::with_kind(name, TypeKind::Class, base)
    }

    /// A sequential-layout value type.
    pub fn value_type(name: impl Into<String>, base: Option<TypeRef>) -> Self {
        Self::with_kind(name, TypeKind::ValueType, base)
    }

    /// An interface.
    pub fn interface(name: impl Into<String>) -> Self {
        Self::with_kind(name, TypeKind::Interface, None)
    }

    /// Arbitrary kind.
    pub fn with_kind(name: impl Into<String>, kind: TypeKind, base: Option<TypeRef>) -> Self {
        Self {
            name: name.into(),
            kind,
            base,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            is_explicit_layout: false,
            packing: None,
            class_size: None,
            element: None,
            generic_params: 0,
        }
    }

    /// Is this an interface?
    pub fn is_interface(&self) -> bool {
        self.kind == TypeKind::Interface
    }

    /// Is this a value type (user or primitive)?
    pub fn is_value_type(&self) -> bool {
        matches!(self.kind, TypeKind::ValueType | TypeKind::Primitive(_))
    }

    /// The primitive kind, if any.
    pub fn primitive(&self) -> Option<PrimKind> {
        match self.kind {
            TypeKind::Primitive(p) => Some(p),
            _ => None,
        }
    }
}

/// A method signature. Signatures compare structurally.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct MethodSig {
    /// Parameter types, excluding `this`.
    pub params: Vec<TypeRef>,
    /// Return type; `None` for void.
    pub ret: Option<TypeRef>,
}

impl MethodSig {
    /// A signature.
    pub fn new(params: Vec<TypeRef>, ret: Option<TypeRef>) -> Self {
        Self { params, ret }
    }
}

/// A managed method.
#[derive(Clone, Debug)]
pub struct MethodData {
    /// Plain name; explicit interface implementations carry the
    /// dotted interface prefix.
    pub name: String,
    /// Declaring type, filled in by `TypeSystem::add_method`.
    pub decl_type: Option<TypeRef>,
    /// Signature.
    pub sig: MethodSig,
    /// Participates in virtual dispatch.
    pub is_virtual: bool,
    /// Introduces a new vtable slot even when a base slot matches.
    pub is_new_slot: bool,
    /// Static method.
    pub is_static: bool,
    /// Internal call; has no managed body.
    pub is_internal: bool,
    /// Extern; has no managed body.
    pub is_extern: bool,
    /// Runtime special name (`.ctor`, `.cctor`).
    pub is_rt_special_name: bool,
    /// Generic parameter count.
    pub generic_params: u32,
    /// Explicit interface methods this method implements.
    pub overrides: Vec<MethodRef>,
    /// The parsed body, absent for abstract/extern/internal methods.
    pub body: Option<CilBody>,
}

impl MethodData {
    /// A method with the given name and signature and no body.
    pub fn new(name: impl Into<String>, sig: MethodSig) -> Self {
        Self {
            name: name.into(),
            decl_type: None,
            sig,
            is_virtual: false,
            is_new_slot: false,
            is_static: false,
            is_internal: false,
            is_extern: false,
            is_rt_special_name: false,
            generic_params: 0,
            overrides: Vec::new(),
            body: None,
        }
    }

    /// Builder: mark virtual.
    pub fn virtual_(mut self) -> Self {
        self.is_virtual = true;
        self
    }

    /// Builder: mark virtual new-slot.
    pub fn new_slot(mut self) -> Self {
        self.is_virtual = true;
        self.is_new_slot = true;
        self
    }

    /// Builder: mark static.
    pub fn static_(mut self) -> Self {
        self.is_static = true;
        self
    }

    /// Builder: attach a body.
    pub fn with_body(mut self, body: CilBody) -> Self {
        self.body = Some(body);
        self
    }

    /// The name with any explicit-interface prefix removed.
    pub fn clean_name(&self) -> &str {
        match self.name.rfind('.') {
            Some(dot) => &self.name[dot + 1..],
            None => &self.name,
        }
    }

    /// Is this an explicit interface implementation?
    pub fn is_explicit_impl(&self) -> bool {
        !self.overrides.is_empty()
    }
}

/// A managed field.
#[derive(Clone, Debug)]
pub struct FieldData {
    /// Name.
    pub name: String,
    /// Declaring type, filled in by `TypeSystem::add_field`.
    pub decl_type: Option<TypeRef>,
    /// Field type.
    pub ty: TypeRef,
    /// Static field.
    pub is_static: bool,
    /// Explicit byte offset, for explicit-layout types.
    pub offset: Option<u32>,
}

impl FieldData {
    /// An instance field.
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            decl_type: None,
            ty,
            is_static: false,
            offset: None,
        }
    }

    /// Builder: set an explicit offset.
    pub fn at_offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Builder: mark static.
    pub fn static_(mut self) -> Self {
        self.is_static = true;
        self
    }
}

/// The type-and-method graph the compiler consumes.
#[derive(Default)]
pub struct TypeSystem {
    types: PrimaryMap<TypeRef, TypeData>,
    methods: PrimaryMap<MethodRef, MethodData>,
    fields: PrimaryMap<FieldRef, FieldData>,
    by_name: FxHashMap<String, TypeRef>,
}

impl TypeSystem {
    /// An empty type system.
    pub fn new() -> Self {
        Self::default()
    }

    /// A type system pre-populated with `System.Object`, `System.ValueType`
    /// and the primitives, the way the metadata loader seeds corlib.
    pub fn with_corlib() -> Self {
        let mut ts = Self::new();
        let object = ts.add_type(TypeData::class("System.Object", None));
        let value_type = ts.add_type(TypeData::class("System.ValueType", Some(object)));
        for (name, prim) in [
            ("System.Boolean", PrimKind::Bool),
            ("System.Char", PrimKind::Char),
            ("System.SByte", PrimKind::I1),
            ("System.Int16", PrimKind::I2),
            ("System.Int32", PrimKind::I4),
            ("System.Int64", PrimKind::I8),
            ("System.Byte", PrimKind::U1),
            ("System.UInt16", PrimKind::U2),
            ("System.UInt32", PrimKind::U4),
            ("System.UInt64", PrimKind::U8),
            ("System.Single", PrimKind::R4),
            ("System.Double", PrimKind::R8),
            ("System.IntPtr", PrimKind::I),
            ("System.UIntPtr", PrimKind::U),
        ] {
            ts.add_type(TypeData::with_kind(
                name,
                TypeKind::Primitive(prim),
                Some(value_type),
            ));
        }
        ts
    }

    /// Register a type.
    pub fn add_type(&mut self, data: TypeData) -> TypeRef {
        let name = data.name.clone();
        let ty = self.types.push(data);
        self.by_name.insert(name, ty);
        ty
    }

    /// Register a method on `ty`.
    pub fn add_method(&mut self, ty: TypeRef, mut data: MethodData) -> MethodRef {
        data.decl_type = Some(ty);
        let method = self.methods.push(data);
        self.types[ty].methods.push(method);
        method
    }

    /// Register a field on `ty`.
    pub fn add_field(&mut self, ty: TypeRef, mut data: FieldData) -> FieldRef {
        data.decl_type = Some(ty);
        let field = self.fields.push(data);
        self.types[ty].fields.push(field);
        field
    }

    /// All types, in registration order.
    pub fn all_types(&self) -> impl Iterator<Item = TypeRef> + '_ {
        self.types.keys()
    }

    /// Type data.
    pub fn ty(&self, t: TypeRef) -> &TypeData {
        &self.types[t]
    }

    /// Method data.
    pub fn method(&self, m: MethodRef) -> &MethodData {
        &self.methods[m]
    }

    /// Field data.
    pub fn field(&self, f: FieldRef) -> &FieldData {
        &self.fields[f]
    }

    /// Look a type up by its namespace-qualified name.
    pub fn lookup(&self, name: &str) -> Option<TypeRef> {
        self.by_name.get(name).copied()
    }

    /// Is `t` the `System.Object` root?
    pub fn is_object(&self, t: TypeRef) -> bool {
        self.types[t].name == "System.Object"
    }

    /// A ghost type is neither rooted nor an interface; the layout engine
    /// skips it.
    pub fn is_ghost(&self, t: TypeRef) -> bool {
        let data = &self.types[t];
        data.base.is_none() && !data.is_interface() && !self.is_object(t)
    }

    /// The linker symbol for a method.
    pub fn symbol_name(&self, m: MethodRef) -> String {
        let data = &self.methods[m];
        match data.decl_type {
            Some(t) => format!("{}::{}", self.types[t].name, data.name),
            None => data.name.clone(),
        }
    }
}

impl fmt::Debug for TypeSystem {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TypeSystem")
            .field("types", &self.types.len())
            .field("methods", &self.methods.len())
            .field("fields", &self.fields.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corlib_primitives() {
        let ts = TypeSystem::with_corlib();
        let i4 = ts.lookup("System.Int32").unwrap();
        assert_eq!(ts.ty(i4).primitive(), Some(PrimKind::I4));
        assert_eq!(PrimKind::I4.size(4), 4);
        assert_eq!(PrimKind::I.size(8), 8);
        assert!(ts.ty(i4).is_value_type());
    }

    #[test]
    fn clean_names() {
        let m = MethodData::new("System.IDisposable.Dispose", MethodSig::default());
        assert_eq!(m.clean_name(), "Dispose");
        let m = MethodData::new("Dispose", MethodSig::default());
        assert_eq!(m.clean_name(), "Dispose");
    }

    #[test]
    fn ghost_detection() {
        let mut ts = TypeSystem::with_corlib();
        let ghost = ts.add_type(TypeData::class("Dangling", None));
        let object = ts.lookup("System.Object").unwrap();
        assert!(ts.is_ghost(ghost));
        assert!(!ts.is_ghost(object));
    }
}
