//! Type layout resolution.
//!
//! Associates every managed type with its size and field offsets, its
//! virtual-method table, and its interface dispatch tables. Resolution is
//! eager: the constructor walks every type in the system. Results are
//! memoized and served under a single mutex; layout resolution performs
//! mutual recursion across base types and interfaces, so a per-type lock
//! would deadlock. A visited-set guard stops recursive re-entry — no cycle
//! can actually close, value types cannot contain themselves.

use crate::ir::Ty;
use crate::typesys::{FieldRef, MethodRef, TypeKind, TypeRef, TypeSystem};
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::{Arc, Mutex};

fn align_up(value: u32, align: u32) -> u32 {
    debug_assert!(align > 0);
    value.div_ceil(align) * align
}

#[derive(Default)]
struct LayoutCache {
    resolved: FxHashSet<TypeRef>,
    in_progress: FxHashSet<TypeRef>,
    type_sizes: FxHashMap<TypeRef, u32>,
    field_offsets: FxHashMap<FieldRef, u32>,
    method_tables: FxHashMap<TypeRef, Vec<MethodRef>>,
    method_slots: FxHashMap<MethodRef, usize>,
    interface_slots: FxHashMap<TypeRef, u32>,
    interface_tables: FxHashMap<TypeRef, Vec<(TypeRef, Vec<Option<MethodRef>>)>>,
    overridden: FxHashSet<MethodRef>,
}

/// The layout engine. Shared read-mostly between method compilers; every
/// query goes through the internal lock.
pub struct TypeLayout {
    type_system: Arc<TypeSystem>,
    ptr_size: u32,
    ptr_align: u32,
    cache: Mutex<LayoutCache>,
}

impl TypeLayout {
    /// Create the engine and resolve every type in the system.
    /// `ptr_size` must be 4 or 8.
    pub fn new(type_system: Arc<TypeSystem>, ptr_size: u32, ptr_align: u32) -> Self {
        assert!(ptr_size == 4 || ptr_size == 8);
        let layout = Self {
            type_system,
            ptr_size,
            ptr_align,
            cache: Mutex::new(LayoutCache::default()),
        };
        {
            let mut cache = layout.cache.lock().unwrap();
            let mut resolver = Resolver {
                ts: &layout.type_system,
                ptr_size,
                ptr_align,
                cache: &mut cache,
            };
            for t in resolver.ts.all_types() {
                resolver.resolve(t);
            }
        }
        layout
    }

    /// Target pointer size in bytes.
    pub fn ptr_size(&self) -> u32 {
        self.ptr_size
    }

    /// Target pointer alignment in bytes.
    pub fn ptr_align(&self) -> u32 {
        self.ptr_align
    }

    /// The type system this layout was built from.
    pub fn type_system(&self) -> &TypeSystem {
        &self.type_system
    }

    /// Resolved size of `t` in bytes.
    pub fn type_size(&self, t: TypeRef) -> u32 {
        let mut cache = self.cache.lock().unwrap();
        self.resolver(&mut cache).resolve(t);
        cache.type_sizes.get(&t).copied().unwrap_or(0)
    }

    /// Byte offset of a non-static field inside its declaring type.
    /// Defined only for non-static fields; returns 0 for statics.
    pub fn field_offset(&self, f: FieldRef) -> u32 {
        let data = self.type_system.field(f);
        if data.is_static {
            return 0;
        }
        let decl = data.decl_type.expect("field without declaring type");
        let mut cache = self.cache.lock().unwrap();
        self.resolver(&mut cache).resolve(decl);
        cache.field_offsets.get(&f).copied().unwrap_or(0)
    }

    /// Size of the value stored in a field of type `t`: pointer-width for
    /// reference types, the resolved size otherwise.
    pub fn field_type_size(&self, t: TypeRef) -> u32 {
        let mut cache = self.cache.lock().unwrap();
        self.resolver(&mut cache).field_type_size(t)
    }

    /// The virtual-method table of `t`, base prefix first.
    pub fn method_table(&self, t: TypeRef) -> Vec<MethodRef> {
        let mut cache = self.cache.lock().unwrap();
        self.resolver(&mut cache).resolve(t);
        cache.method_tables.get(&t).cloned().unwrap_or_default()
    }

    /// The slot of `m` in its declaring type's method table.
    pub fn method_slot(&self, m: MethodRef) -> Option<usize> {
        let decl = self.type_system.method(m).decl_type?;
        let mut cache = self.cache.lock().unwrap();
        self.resolver(&mut cache).resolve(decl);
        cache.method_slots.get(&m).copied()
    }

    /// The dense slot index assigned to an interface type.
    pub fn interface_slot(&self, iface: TypeRef) -> Option<u32> {
        let mut cache = self.cache.lock().unwrap();
        self.resolver(&mut cache).resolve(iface);
        cache.interface_slots.get(&iface).copied()
    }

    /// The method table `t` exposes for `iface`, parallel to the
    /// interface's method list. Unimplemented slots are `None` and
    /// surface as type-system errors when dispatched.
    pub fn interface_table(&self, t: TypeRef, iface: TypeRef) -> Option<Vec<Option<MethodRef>>> {
        let mut cache = self.cache.lock().unwrap();
        self.resolver(&mut cache).resolve(t);
        cache
            .interface_tables
            .get(&t)?
            .iter()
            .find(|(i, _)| *i == iface)
            .map(|(_, table)| table.clone())
    }

    /// Has any derived type overridden `m`'s slot?
    pub fn is_method_overridden(&self, m: MethodRef) -> bool {
        let cache = self.cache.lock().unwrap();
        cache.overridden.contains(&m)
    }

    /// A compound type needs multi-word moves: a user value type larger
    /// than the native pointer, or a primitive wider than 8 bytes.
    pub fn is_compound(&self, t: TypeRef) -> bool {
        let data = self.type_system.ty(t);
        match data.kind {
            TypeKind::ValueType => self.type_size(t) > self.ptr_size,
            TypeKind::Primitive(p) => p.size(self.ptr_size) > 8,
            _ => false,
        }
    }

    /// Does a value of type `t` live on the stack rather than in
    /// registers? True for user value types, except a single-field value
    /// type wrapping a reference; scalars at most pointer-sized pass in
    /// registers.
    pub fn is_stored_on_stack(&self, t: TypeRef) -> bool {
        let ts = &*self.type_system;
        let data = ts.ty(t);
        if data.kind != TypeKind::ValueType {
            return false;
        }
        let instance_fields: Vec<_> = data
            .fields
            .iter()
            .filter(|&&f| !ts.field(f).is_static)
            .collect();
        if let [only] = instance_fields.as_slice() {
            let fty = ts.ty(ts.field(**only).ty);
            if !fty.is_value_type() {
                return false;
            }
        }
        true
    }

    /// `is_stored_on_stack` lifted to operand types.
    pub fn ty_stored_on_stack(&self, ty: Ty) -> bool {
        match ty {
            Ty::Value(t) => self.is_stored_on_stack(t),
            _ => false,
        }
    }

    /// Size of an operand type in bytes.
    pub fn ty_size(&self, ty: Ty) -> u32 {
        match ty {
            Ty::Value(t) => self.type_size(t),
            _ => ty.scalar_size(self.ptr_size).unwrap(),
        }
    }

    fn resolver<'a>(&'a self, cache: &'a mut LayoutCache) -> Resolver<'a> {
        Resolver {
            ts: &self.type_system,
            ptr_size: self.ptr_size,
            ptr_align: self.ptr_align,
            cache,
        }
    }
}

struct Resolver<'a> {
    ts: &'a TypeSystem,
    ptr_size: u32,
    ptr_align: u32,
    cache: &'a mut LayoutCache,
}

impl Resolver<'_> {
    fn resolve(&mut self, t: TypeRef) {
        if self.cache.resolved.contains(&t) || self.cache.in_progress.contains(&t) {
            return;
        }
        let data = self.ts.ty(t);

        // Module pseudo-types and ghosts have no layout. A modifier type
        // delegates to its element.
        if data.kind == TypeKind::Module || self.ts.is_ghost(t) {
            self.cache.resolved.insert(t);
            return;
        }
        if let Some(element) = data.element {
            self.resolve(element);
            self.cache.resolved.insert(t);
            return;
        }

        self.cache.in_progress.insert(t);

        if let Some(base) = data.base {
            self.resolve(base);
        }
        for &iface in &data.interfaces {
            self.resolve(iface);
            let next = self.cache.interface_slots.len() as u32;
            self.cache.interface_slots.entry(iface).or_insert(next);
        }

        let size = self.compute_size(t);
        self.cache.type_sizes.insert(t, size);

        self.build_method_table(t);
        if !data.is_interface() {
            self.build_interface_tables(t);
        }

        self.cache.in_progress.remove(&t);
        self.cache.resolved.insert(t);
    }

    fn field_type_size(&mut self, t: TypeRef) -> u32 {
        let data = self.ts.ty(t);
        match data.kind {
            TypeKind::Primitive(p) => p.size(self.ptr_size),
            TypeKind::ValueType => {
                self.resolve(t);
                self.cache.type_sizes.get(&t).copied().unwrap_or(0)
            }
            _ => self.ptr_size,
        }
    }

    fn compute_size(&mut self, t: TypeRef) -> u32 {
        let data = self.ts.ty(t);
        if let Some(p) = data.primitive() {
            return p.size(self.ptr_size);
        }
        if data.is_interface() {
            return 0;
        }

        let fields: Vec<FieldRef> = data
            .fields
            .iter()
            .copied()
            .filter(|&f| !self.ts.field(f).is_static)
            .collect();

        if data.is_explicit_layout {
            let mut size = 0;
            for f in fields {
                let offset = self.ts.field(f).offset.unwrap_or(0);
                self.cache.field_offsets.insert(f, offset);
                let fsize = self.field_type_size(self.ts.field(f).ty);
                size = size.max(offset + fsize);
            }
            match data.class_size {
                Some(class_size) if class_size != -1 => class_size as u32,
                _ => size,
            }
        } else {
            // Sequential: start after the base for reference types, append
            // each field at the current size, pad to the packing boundary.
            let mut size = match (data.kind, data.base) {
                (TypeKind::Class, Some(base)) => {
                    self.cache.type_sizes.get(&base).copied().unwrap_or(0)
                }
                _ => 0,
            };
            let packing = data.packing.unwrap_or(self.ptr_align);
            for f in fields {
                self.cache.field_offsets.insert(f, size);
                size += self.field_type_size(self.ts.field(f).ty);
                size = align_up(size, packing);
            }
            size
        }
    }

    fn build_method_table(&mut self, t: TypeRef) {
        let data = self.ts.ty(t);
        let mut table: Vec<MethodRef> = match data.base {
            Some(base) => self.cache.method_tables.get(&base).cloned().unwrap_or_default(),
            None => Vec::new(),
        };

        for &m in &data.methods {
            let md = self.ts.method(m);
            if md.is_virtual && !md.is_new_slot {
                match self.find_override_slot(&table, m) {
                    Some(slot) => {
                        self.mark_ancestors_overridden(t, slot);
                        table[slot] = m;
                        self.cache.method_slots.insert(m, slot);
                        continue;
                    }
                    None => {
                        // No matching base slot: appended as a new slot.
                        table.push(m);
                        self.cache.method_slots.insert(m, table.len() - 1);
                        continue;
                    }
                }
            }
            if md.is_virtual && md.is_new_slot {
                table.push(m);
                self.cache.method_slots.insert(m, table.len() - 1);
                continue;
            }
            let is_cctor = md.is_static && md.is_rt_special_name;
            if is_cctor || (!md.is_internal && !md.is_extern) {
                table.push(m);
                self.cache.method_slots.insert(m, table.len() - 1);
            }
        }

        self.cache.method_tables.insert(t, table);
    }

    /// Find the base slot `m` overrides: same name, equal signature.
    /// When the override is generic, non-generic candidates win.
    fn find_override_slot(&self, table: &[MethodRef], m: MethodRef) -> Option<usize> {
        let md = self.ts.method(m);
        let mut generic_match = None;
        for (slot, &candidate) in table.iter().enumerate() {
            let cd = self.ts.method(candidate);
            if !cd.is_virtual || cd.name != md.name || cd.sig != md.sig {
                continue;
            }
            if cd.generic_params == 0 {
                return Some(slot);
            }
            if generic_match.is_none() {
                generic_match = Some(slot);
            }
        }
        generic_match
    }

    /// Mark the occupant of `slot` in every ancestor's table as
    /// overridden.
    fn mark_ancestors_overridden(&mut self, t: TypeRef, slot: usize) {
        let mut cur = self.ts.ty(t).base;
        while let Some(base) = cur {
            if let Some(base_table) = self.cache.method_tables.get(&base) {
                if let Some(&occupant) = base_table.get(slot) {
                    self.cache.overridden.insert(occupant);
                }
            }
            cur = self.ts.ty(base).base;
        }
    }

    fn build_interface_tables(&mut self, t: TypeRef) {
        // Interfaces implemented by `t` or inherited from its bases.
        let mut interfaces: Vec<TypeRef> = Vec::new();
        let mut cur = Some(t);
        while let Some(ty) = cur {
            for &iface in &self.ts.ty(ty).interfaces {
                if !interfaces.contains(&iface) {
                    interfaces.push(iface);
                }
            }
            cur = self.ts.ty(ty).base;
        }
        if interfaces.is_empty() {
            return;
        }

        let mut tables = Vec::with_capacity(interfaces.len());
        for iface in interfaces {
            let imethods = self.ts.ty(iface).methods.clone();
            let mut table: Vec<Option<MethodRef>> = Vec::with_capacity(imethods.len());

            // Implicit matches first: most-derived wins, explicit
            // interface methods do not participate.
            for &im in &imethods {
                let imd = self.ts.method(im);
                let mut found = None;
                let mut cur = Some(t);
                'search: while let Some(ty) = cur {
                    for &m in &self.ts.ty(ty).methods {
                        let md = self.ts.method(m);
                        if md.is_static || md.is_explicit_impl() {
                            continue;
                        }
                        if md.clean_name() == imd.name && md.sig == imd.sig {
                            found = Some(m);
                            break 'search;
                        }
                    }
                    cur = self.ts.ty(ty).base;
                }
                table.push(found);
            }

            // Explicit overrides declared on `t` win over implicit ones.
            for &m in &self.ts.ty(t).methods {
                for &target in &self.ts.method(m).overrides {
                    if self.ts.method(target).decl_type == Some(iface) {
                        if let Some(idx) = imethods.iter().position(|&im| im == target) {
                            table[idx] = Some(m);
                        }
                    }
                }
            }

            tables.push((iface, table));
        }
        self.cache.interface_tables.insert(t, tables);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typesys::{FieldData, MethodData, MethodSig, TypeData};

    #[test]
    fn sequential_layout_default_packing() {
        let mut ts = TypeSystem::with_corlib();
        let vt = ts.lookup("System.ValueType").unwrap();
        let i4 = ts.lookup("System.Int32").unwrap();
        let i1 = ts.lookup("System.SByte").unwrap();
        let s = ts.add_type(TypeData::value_type("S", Some(vt)));
        let a = ts.add_field(s, FieldData::new("a", i4));
        let b = ts.add_field(s, FieldData::new("b", i1));
        let c = ts.add_field(s, FieldData::new("c", i4));

        let layout = TypeLayout::new(Arc::new(ts), 4, 4);
        assert_eq!(layout.field_offset(a), 0);
        assert_eq!(layout.field_offset(b), 4);
        assert_eq!(layout.field_offset(c), 8);
        assert_eq!(layout.type_size(s), 12);
    }

    #[test]
    fn sequential_layout_packed() {
        let mut ts = TypeSystem::with_corlib();
        let vt = ts.lookup("System.ValueType").unwrap();
        let i4 = ts.lookup("System.Int32").unwrap();
        let i1 = ts.lookup("System.SByte").unwrap();
        let mut data = TypeData::value_type("S", Some(vt));
        data.packing = Some(1);
        let s = ts.add_type(data);
        let a = ts.add_field(s, FieldData::new("a", i4));
        let b = ts.add_field(s, FieldData::new("b", i1));
        let c = ts.add_field(s, FieldData::new("c", i4));

        let layout = TypeLayout::new(Arc::new(ts), 4, 4);
        assert_eq!(layout.field_offset(a), 0);
        assert_eq!(layout.field_offset(b), 4);
        assert_eq!(layout.field_offset(c), 5);
        assert_eq!(layout.type_size(s), 9);
    }

    #[test]
    fn explicit_layout() {
        let mut ts = TypeSystem::with_corlib();
        let vt = ts.lookup("System.ValueType").unwrap();
        let i4 = ts.lookup("System.Int32").unwrap();
        let i1 = ts.lookup("System.SByte").unwrap();
        let mut data = TypeData::value_type("E", Some(vt));
        data.is_explicit_layout = true;
        data.class_size = Some(16);
        let e = ts.add_type(data);
        let x = ts.add_field(e, FieldData::new("x", i4).at_offset(0));
        let y = ts.add_field(e, FieldData::new("y", i4).at_offset(0));
        let z = ts.add_field(e, FieldData::new("z", i1).at_offset(8));

        let layout = TypeLayout::new(Arc::new(ts), 4, 4);
        assert_eq!(layout.type_size(e), 16);
        assert_eq!(layout.field_offset(x), 0);
        assert_eq!(layout.field_offset(y), 0);
        assert_eq!(layout.field_offset(z), 8);
    }

    #[test]
    fn virtual_dispatch_tables() {
        let mut ts = TypeSystem::with_corlib();
        let object = ts.lookup("System.Object").unwrap();
        let a = ts.add_type(TypeData::class("A", Some(object)));
        let a_m1 = ts.add_method(a, MethodData::new("M1", MethodSig::default()).new_slot());
        let a_m2 = ts.add_method(a, MethodData::new("M2", MethodSig::default()).new_slot());
        let b = ts.add_type(TypeData::class("B", Some(a)));
        let b_m1 = ts.add_method(b, MethodData::new("M1", MethodSig::default()).virtual_());
        let b_m3 = ts.add_method(b, MethodData::new("M3", MethodSig::default()).new_slot());

        let layout = TypeLayout::new(Arc::new(ts), 4, 4);
        assert_eq!(layout.method_table(b), vec![b_m1, a_m2, b_m3]);
        assert_eq!(layout.method_table(a), vec![a_m1, a_m2]);
        assert!(layout.is_method_overridden(a_m1));
        assert!(!layout.is_method_overridden(a_m2));
        assert!(!layout.is_method_overridden(b_m3));
        assert_eq!(layout.method_slot(b_m1), Some(0));
        assert_eq!(layout.method_slot(b_m3), Some(2));
    }

    #[test]
    fn method_table_prefix_is_monotone() {
        let mut ts = TypeSystem::with_corlib();
        let object = ts.lookup("System.Object").unwrap();
        let a = ts.add_type(TypeData::class("A", Some(object)));
        ts.add_method(a, MethodData::new("M1", MethodSig::default()).new_slot());
        let b = ts.add_type(TypeData::class("B", Some(a)));
        ts.add_method(b, MethodData::new("Extra", MethodSig::default()));

        let layout = TypeLayout::new(Arc::new(ts), 4, 4);
        assert!(layout.method_table(b).len() >= layout.method_table(a).len());
    }

    #[test]
    fn interface_dispatch() {
        let mut ts = TypeSystem::with_corlib();
        let object = ts.lookup("System.Object").unwrap();
        let iface = ts.add_type(TypeData::interface("IRun"));
        let i_run = ts.add_method(iface, MethodData::new("Run", MethodSig::default()).new_slot());
        let i_stop = ts.add_method(iface, MethodData::new("Stop", MethodSig::default()).new_slot());

        let mut cdata = TypeData::class("C", Some(object));
        cdata.interfaces.push(iface);
        let c = ts.add_type(cdata);
        let c_run = ts.add_method(c, MethodData::new("Run", MethodSig::default()).new_slot());
        // Explicit implementation of Stop.
        let mut stop = MethodData::new("IRun.Stop", MethodSig::default()).virtual_();
        stop.overrides.push(i_stop);
        let c_stop = ts.add_method(c, stop);
        let _ = i_run;

        let layout = TypeLayout::new(Arc::new(ts), 4, 4);
        assert_eq!(layout.interface_slot(iface), Some(0));
        let table = layout.interface_table(c, iface).unwrap();
        assert_eq!(table, vec![Some(c_run), Some(c_stop)]);
    }

    #[test]
    fn field_offsets_stay_inside_the_type() {
        let mut ts = TypeSystem::with_corlib();
        let vt = ts.lookup("System.ValueType").unwrap();
        let i4 = ts.lookup("System.Int32").unwrap();
        let i2 = ts.lookup("System.Int16").unwrap();
        let s = ts.add_type(TypeData::value_type("S", Some(vt)));
        let fields = [
            ts.add_field(s, FieldData::new("a", i2)),
            ts.add_field(s, FieldData::new("b", i4)),
            ts.add_field(s, FieldData::new("c", i2)),
        ];

        let ts = Arc::new(ts);
        let layout = TypeLayout::new(ts.clone(), 4, 4);
        let size = layout.type_size(s);
        for f in fields {
            let fsize = layout.field_type_size(ts.field(f).ty);
            assert!(layout.field_offset(f) + fsize <= size);
        }
    }

    #[test]
    fn stored_on_stack_and_compound() {
        let mut ts = TypeSystem::with_corlib();
        let object = ts.lookup("System.Object").unwrap();
        let vt = ts.lookup("System.ValueType").unwrap();
        let i4 = ts.lookup("System.Int32").unwrap();

        // Large value type: stored on stack and compound.
        let big = ts.add_type(TypeData::value_type("Big", Some(vt)));
        ts.add_field(big, FieldData::new("a", i4));
        ts.add_field(big, FieldData::new("b", i4));
        ts.add_field(big, FieldData::new("c", i4));

        // A single-field wrapper around a reference: register-resident.
        let wrapper = ts.add_type(TypeData::value_type("Handle", Some(vt)));
        ts.add_field(wrapper, FieldData::new("target", object));

        let layout = TypeLayout::new(Arc::new(ts), 4, 4);
        assert!(layout.is_stored_on_stack(big));
        assert!(layout.is_compound(big));
        assert!(!layout.is_stored_on_stack(wrapper));
        assert!(!layout.is_compound(wrapper));
        assert!(!layout.is_stored_on_stack(object));
        assert!(!layout.is_stored_on_stack(i4));
    }

    #[test]
    fn static_field_offset_is_zero() {
        let mut ts = TypeSystem::with_corlib();
        let vt = ts.lookup("System.ValueType").unwrap();
        let i4 = ts.lookup("System.Int32").unwrap();
        let s = ts.add_type(TypeData::value_type("S", Some(vt)));
        let f = ts.add_field(s, FieldData::new("counter", i4).static_());
        let layout = TypeLayout::new(Arc::new(ts), 4, 4);
        assert_eq!(layout.field_offset(f), 0);
    }
}
