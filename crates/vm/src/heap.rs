//! The single allocation routine and intrusive sweep list (spec §4.6).
//!
//! Every heap object is boxed, leaked into a raw pointer, and linked into
//! `Heap::head` via its own `ObjHeader::next`. There is no separate
//! bookkeeping table: the intrusive list *is* the set of live+condemned
//! objects between one collection and the next.

use std::ptr::NonNull;

use djuru_core::limits::{
    DEFAULT_HEAP_GROWTH_PERCENT, DEFAULT_INITIAL_HEAP_SIZE, DEFAULT_MIN_HEAP_SIZE, MAX_TEMP_ROOTS,
};
use djuru_core::ObjHeader;

pub struct Heap {
    head: Option<NonNull<ObjHeader>>,
    pub bytes_allocated: usize,
    pub next_gc: usize,
    pub min_heap_size: usize,
    pub growth_percent: u32,
    /// LIFO stack of pointers a caller needs to survive a second
    /// allocation before it is reachable any other way (spec §4.6).
    temp_roots: Vec<NonNull<ObjHeader>>,
}

impl Heap {
    #[must_use]
    pub fn new() -> Heap {
        Heap {
            head: None,
            bytes_allocated: 0,
            next_gc: DEFAULT_INITIAL_HEAP_SIZE,
            min_heap_size: DEFAULT_MIN_HEAP_SIZE,
            growth_percent: DEFAULT_HEAP_GROWTH_PERCENT,
            temp_roots: Vec::new(),
        }
    }

    /// Boxes `object`, links it at the head of the intrusive sweep list,
    /// and returns an opaque header pointer. `size` is an estimate in
    /// bytes, used only to drive the collection threshold.
    pub fn allocate<T>(&mut self, object: T, size: usize) -> NonNull<ObjHeader>
    where
        T: HasHeader,
    {
        let boxed = Box::new(object);
        let raw = Box::into_raw(boxed);
        // SAFETY: `T` begins with an `ObjHeader` by the `HasHeader`
        // contract (every concrete object type upholds this via
        // `#[repr(C)]`), so the cast below is a pointer reinterpretation
        // to the common prefix, not a type-punned read.
        let header_ptr = raw.cast::<ObjHeader>();
        let header = unsafe { &*header_ptr };
        header.next.set(self.head);
        self.head = NonNull::new(header_ptr);
        self.bytes_allocated += size;
        self.head.unwrap()
    }

    #[must_use]
    pub fn head(&self) -> Option<NonNull<ObjHeader>> {
        self.head
    }

    pub fn set_head(&mut self, head: Option<NonNull<ObjHeader>>) {
        self.head = head;
    }

    pub fn should_collect(&self) -> bool {
        self.bytes_allocated > self.next_gc
    }

    pub fn grow_after_collection(&mut self) {
        let grown = self.bytes_allocated * (100 + self.growth_percent as usize) / 100;
        self.next_gc = grown.max(self.min_heap_size);
    }

    pub fn push_temp_root(&mut self, ptr: NonNull<ObjHeader>) {
        debug_assert!(
            self.temp_roots.len() < MAX_TEMP_ROOTS,
            "temp root stack overflow: a caller forgot to pop"
        );
        self.temp_roots.push(ptr);
    }

    pub fn pop_temp_root(&mut self) {
        self.temp_roots.pop();
    }

    pub fn temp_roots(&self) -> &[NonNull<ObjHeader>] {
        &self.temp_roots
    }
}

impl Default for Heap {
    fn default() -> Heap {
        Heap::new()
    }
}

/// Marker for concrete heap object types: `#[repr(C)]` with
/// [`djuru_core::ObjHeader`] as the first field, so a pointer to the
/// object can be reinterpreted as a pointer to its header and back.
///
/// # Safety
/// Implementors must be `#[repr(C)]` with `header: ObjHeader` as the
/// first field.
pub unsafe trait HasHeader {}

/// Shared destructuring helper: recovers a typed pointer from a header
/// pointer of the matching kind.
///
/// # Safety
/// `header` must point to a live allocation whose concrete type is `T`.
#[must_use]
pub unsafe fn header_to<T: HasHeader>(header: NonNull<ObjHeader>) -> NonNull<T> {
    header.cast()
}
