//! Classes: a name, a superclass link, a field count, and a method table
//! indexed by the VM-global [`MethodSymbol`] (spec §4.7).
//!
//! The method table is a flat `Vec<MethodImpl>` sized to the symbol
//! table's current length, with `MethodImpl::None` standing in for "does
//! not implement this signature" -- the same sparse-by-padding approach
//! `djuru_core::SymbolTable` already documents for signature interning.

use std::cell::{Cell, RefCell};
use std::ptr::NonNull;

use djuru_core::{MethodSymbol, ObjHeader, ObjKind, Value};

use crate::config::ExternAllocateFn;
use crate::heap::{HasHeader, Heap};
use crate::interpreter::CoreClasses;
use crate::object::Finalizer;

/// A host- or corelib-implemented method body. Takes the heap (so a
/// primitive can allocate, e.g. `Num.toString`'s `StringObj`), the core
/// class table (so e.g. `Object.type`/`is(_)` can name a value's class
/// the same way `wrenGetClassInline` does), the receiver, and the
/// argument slice; returns the call's result or a value to raise as a
/// runtime error (spec §4.5's `Djuru.tike` path). Mirrors the reference
/// VM's `bool (*Primitive)(WrenVM* vm, Value* args)`, which gets the
/// same allocator and core-class access through `vm`.
pub type PrimitiveFn = fn(heap: &mut Heap, core: &CoreClasses, receiver: Value, args: &[Value]) -> Result<Value, Value>;

#[derive(Clone, Copy)]
pub enum MethodImpl {
    None,
    /// A `ClosureObj` allocation, for methods compiled from source.
    Block(NonNull<ObjHeader>),
    /// Built into the corelib (Object, Num, String, List, Map, ...).
    Primitive(PrimitiveFn),
    /// Bound by the host via `Config::bind_extern_method` (spec §6).
    Extern(PrimitiveFn),
    /// A constructor body, reachable only through the *static* table
    /// under its bare (unprefixed) signature. `ClassName.new(args)`
    /// compiles as an ordinary call against the class value, so the
    /// interpreter special-cases this variant: allocate a fresh
    /// `InstanceObj`, replace the receiver slot with it, then run the
    /// closure exactly like a `Block` call.
    Construct(NonNull<ObjHeader>),
}

#[repr(C)]
pub struct ClassObj {
    pub header: ObjHeader,
    pub name: Box<str>,
    superclass: Cell<Option<NonNull<ObjHeader>>>,
    /// Total fields across this class and all its superclasses, set by
    /// the class-binding pass once the superclass is resolved.
    field_count: Cell<u16>,
    pub is_extern: bool,
    /// Instance methods, looked up by receiver (an `InstanceObj`).
    methods: RefCell<Vec<MethodImpl>>,
    /// `static` methods and constructors, looked up by receiver (the
    /// `ClassObj` value itself). Kept separate rather than modeling a
    /// full Wren-style metaclass, since nothing else needs one here.
    statics: RefCell<Vec<MethodImpl>>,
    /// Set once, at load time, from `Config::bind_extern_class` when
    /// `is_extern` is true: replaces the ordinary `InstanceObj`
    /// allocation a `Construct` call would otherwise do with a
    /// host-supplied `ExternObj` payload (spec §6).
    extern_allocate: Cell<Option<ExternAllocateFn>>,
    extern_finalizer: Cell<Option<Finalizer>>,
}

unsafe impl HasHeader for ClassObj {}

impl ClassObj {
    #[must_use]
    pub fn new(name: Box<str>, is_extern: bool) -> ClassObj {
        ClassObj {
            header: ObjHeader::new(ObjKind::Class),
            name,
            superclass: Cell::new(None),
            field_count: Cell::new(0),
            is_extern,
            methods: RefCell::new(Vec::new()),
            statics: RefCell::new(Vec::new()),
            extern_allocate: Cell::new(None),
            extern_finalizer: Cell::new(None),
        }
    }

    #[must_use]
    pub fn extern_allocate(&self) -> Option<ExternAllocateFn> {
        self.extern_allocate.get()
    }

    #[must_use]
    pub fn extern_finalizer(&self) -> Option<Finalizer> {
        self.extern_finalizer.get()
    }

    pub fn set_extern_allocate(&self, allocate: ExternAllocateFn, finalizer: Option<Finalizer>) {
        self.extern_allocate.set(Some(allocate));
        self.extern_finalizer.set(finalizer);
    }

    #[must_use]
    pub fn superclass(&self) -> Option<NonNull<ObjHeader>> {
        self.superclass.get()
    }

    pub fn set_superclass(&self, superclass: Option<NonNull<ObjHeader>>) {
        self.superclass.set(superclass);
    }

    #[must_use]
    pub fn field_count(&self) -> u16 {
        self.field_count.get()
    }

    pub fn set_field_count(&self, count: u16) {
        self.field_count.set(count);
    }

    #[must_use]
    pub fn method(&self, symbol: MethodSymbol) -> MethodImpl {
        self.methods
            .borrow()
            .get(symbol.as_usize())
            .copied()
            .unwrap_or(MethodImpl::None)
    }

    /// Installs `method` at `symbol`, growing the table with `None`
    /// entries if the global symbol table has interned signatures this
    /// class has never seen.
    pub fn set_method(&self, symbol: MethodSymbol, method: MethodImpl) {
        let mut methods = self.methods.borrow_mut();
        if methods.len() <= symbol.as_usize() {
            methods.resize(symbol.as_usize() + 1, MethodImpl::None);
        }
        methods[symbol.as_usize()] = method;
    }

    #[must_use]
    pub fn implements(&self, symbol: MethodSymbol) -> bool {
        !matches!(self.method(symbol), MethodImpl::None)
    }

    /// Looks up `symbol` on this class, falling back to each superclass
    /// in turn (spec §4.7's single-inheritance method lookup).
    #[must_use]
    pub fn resolve_method(&self, symbol: MethodSymbol) -> MethodImpl {
        let here = self.method(symbol);
        if !matches!(here, MethodImpl::None) {
            return here;
        }
        match self.superclass() {
            // SAFETY: `superclass` is only ever set to a live `ClassObj`
            // allocation by the class-binding step in `CLASS`/`EndClass`.
            Some(super_ptr) => unsafe { &*super_ptr.cast::<ClassObj>().as_ptr() }.resolve_method(symbol),
            None => MethodImpl::None,
        }
    }

    /// Length of the backing method table, for the collector to walk
    /// without guessing how far symbols extend.
    #[must_use]
    pub fn method_table_len(&self) -> usize {
        self.methods.borrow().len()
    }

    #[must_use]
    pub fn method_at_index(&self, index: usize) -> MethodImpl {
        self.methods.borrow().get(index).copied().unwrap_or(MethodImpl::None)
    }

    #[must_use]
    pub fn static_method(&self, symbol: MethodSymbol) -> MethodImpl {
        self.statics
            .borrow()
            .get(symbol.as_usize())
            .copied()
            .unwrap_or(MethodImpl::None)
    }

    pub fn set_static_method(&self, symbol: MethodSymbol, method: MethodImpl) {
        let mut statics = self.statics.borrow_mut();
        if statics.len() <= symbol.as_usize() {
            statics.resize(symbol.as_usize() + 1, MethodImpl::None);
        }
        statics[symbol.as_usize()] = method;
    }

    /// Looks up `symbol` in this class's own static table, falling back
    /// to each superclass in turn -- a subclass inherits its parent's
    /// static methods and constructors the same way it inherits instance
    /// methods.
    #[must_use]
    pub fn resolve_static_method(&self, symbol: MethodSymbol) -> MethodImpl {
        let here = self.static_method(symbol);
        if !matches!(here, MethodImpl::None) {
            return here;
        }
        match self.superclass() {
            Some(super_ptr) => unsafe { &*super_ptr.cast::<ClassObj>().as_ptr() }.resolve_static_method(symbol),
            None => MethodImpl::None,
        }
    }

    #[must_use]
    pub fn static_method_table_len(&self) -> usize {
        self.statics.borrow().len()
    }

    #[must_use]
    pub fn static_method_at_index(&self, index: usize) -> MethodImpl {
        self.statics.borrow().get(index).copied().unwrap_or(MethodImpl::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_heap: &mut Heap, _core: &CoreClasses, _receiver: Value, _args: &[Value]) -> Result<Value, Value> {
        Ok(Value::NULL)
    }

    #[test]
    fn unset_method_slots_report_none() {
        let class = ClassObj::new("Widget".into(), false);
        assert!(!class.implements(MethodSymbol(3)));
    }

    #[test]
    fn set_method_grows_table_sparsely() {
        let class = ClassObj::new("Widget".into(), false);
        class.set_method(MethodSymbol(5), MethodImpl::Primitive(noop));
        assert!(class.implements(MethodSymbol(5)));
        assert!(!class.implements(MethodSymbol(2)));
    }
}
