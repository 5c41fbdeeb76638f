//! Tri-color mark-sweep collector (spec §4.6).
//!
//! Roots are: the loaded-modules table, the currently executing fiber
//! (transitively, through its caller chain and stack), every handle the
//! embedding host currently has pinned (spec §6 `make_handle`), and the
//! heap's own `temp_roots` stack for values a caller needs to survive
//! between two allocations before they're reachable any other way.
//! Marking is iterative (an explicit gray worklist) rather than
//! recursive, since a long list or deep object graph would otherwise
//! blow the native stack.

use std::ptr::NonNull;

use djuru_core::{ObjHeader, ObjKind, Value};

use crate::heap::Heap;
use crate::object::{ClassObj, ClosureObj, FiberObj, FunctionObj, InstanceObj, ListObj, MapObj, ModuleObj, UpvalueObj};

pub struct Roots<'a> {
    pub modules: &'a [NonNull<ObjHeader>],
    pub current_fiber: Option<NonNull<ObjHeader>>,
    /// Values pinned by the host through `api::Vm::make_handle`.
    pub handles: &'a [Value],
}

/// Runs one full collection: mark every object reachable from `roots`
/// plus the heap's temp-roots stack, then sweep the intrusive
/// allocation list, freeing everything left unmarked.
pub fn collect(heap: &mut Heap, roots: Roots<'_>) {
    let mut gray: Vec<NonNull<ObjHeader>> = Vec::new();

    for &module in roots.modules {
        mark_object(module, &mut gray);
    }
    if let Some(fiber) = roots.current_fiber {
        mark_object(fiber, &mut gray);
    }
    for &handle in roots.handles {
        mark_value(handle, &mut gray);
    }
    for &root in heap.temp_roots() {
        mark_object(root, &mut gray);
    }

    while let Some(ptr) = gray.pop() {
        blacken(ptr, &mut gray);
    }

    sweep(heap);
    heap.grow_after_collection();
}

fn mark_value(value: Value, gray: &mut Vec<NonNull<ObjHeader>>) {
    if let Some(ptr) = value.as_obj() {
        mark_object(ptr, gray);
    }
}

fn mark_object(ptr: NonNull<ObjHeader>, gray: &mut Vec<NonNull<ObjHeader>>) {
    // SAFETY: every reachable pointer here was produced by `Heap::allocate`
    // and stays live until this very sweep decides otherwise.
    let header = unsafe { ptr.as_ref() };
    if header.dark.get() {
        return;
    }
    header.dark.set(true);
    if let Some(class) = header.class.get() {
        mark_object(class, gray);
    }
    gray.push(ptr);
}

/// Marks everything a single object directly references (its "children"
/// in the object graph), based on its kind.
fn blacken(ptr: NonNull<ObjHeader>, gray: &mut Vec<NonNull<ObjHeader>>) {
    let kind = unsafe { ptr.as_ref() }.kind;
    match kind {
        ObjKind::String | ObjKind::Range => {}
        ObjKind::List => {
            let list = unsafe { &*ptr.cast::<ListObj>().as_ptr() };
            for &item in list.items.borrow().iter() {
                mark_value(item, gray);
            }
        }
        ObjKind::Map => {
            let map = unsafe { &*ptr.cast::<MapObj>().as_ptr() };
            let table = map.table.borrow();
            let mut bucket = table.iterate(None);
            while let Some(index) = bucket {
                if let Some((k, v)) = table.entry_at(index) {
                    mark_value(k, gray);
                    mark_value(v, gray);
                }
                bucket = table.iterate(Some(index));
            }
        }
        ObjKind::Function => {
            let function = unsafe { &*ptr.cast::<FunctionObj>().as_ptr() };
            for constant in function.constants.iter() {
                mark_value(constant.get(), gray);
            }
            mark_value(function.module, gray);
        }
        ObjKind::Closure => {
            let closure = unsafe { &*ptr.cast::<ClosureObj>().as_ptr() };
            mark_object(closure.function, gray);
            for &upvalue in closure.upvalues.iter() {
                mark_object(upvalue.cast::<ObjHeader>(), gray);
            }
        }
        ObjKind::Upvalue => {
            let upvalue = unsafe { &*ptr.cast::<UpvalueObj>().as_ptr() };
            if !upvalue.is_open() {
                mark_value(upvalue.get(), gray);
            }
        }
        ObjKind::Class => {
            let class = unsafe { &*ptr.cast::<ClassObj>().as_ptr() };
            if let Some(superclass) = class.superclass() {
                mark_object(superclass, gray);
            }
            // Method closures are reached through whichever closure
            // values the loader stored; `ClassObj` only keeps raw
            // `MethodImpl` entries, and `Block`/`Construct` variants hold
            // the closure pointer directly.
            use crate::object::MethodImpl;
            for index in 0..class.method_table_len() {
                if let MethodImpl::Block(closure) = class.method_at_index(index) {
                    mark_object(closure, gray);
                }
            }
            for index in 0..class.static_method_table_len() {
                match class.static_method_at_index(index) {
                    MethodImpl::Block(closure) | MethodImpl::Construct(closure) => {
                        mark_object(closure, gray);
                    }
                    _ => {}
                }
            }
        }
        ObjKind::Instance => {
            let instance = unsafe { &*ptr.cast::<InstanceObj>().as_ptr() };
            for &field in instance.fields.borrow().iter() {
                mark_value(field, gray);
            }
        }
        ObjKind::Extern => {
            // Host payloads are opaque `Box<dyn Any>`; the host is
            // responsible for keeping any Djuru values it stashed inside
            // reachable through its own roots.
        }
        ObjKind::Module => {
            let module = unsafe { &*ptr.cast::<ModuleObj>().as_ptr() };
            for &slot in module.slots.borrow().iter() {
                mark_value(slot, gray);
            }
        }
        ObjKind::Fiber => {
            let fiber = unsafe { &*ptr.cast::<FiberObj>().as_ptr() };
            for i in 0..fiber.stack_len() {
                mark_value(fiber.get(i), gray);
            }
            mark_value(fiber.error.get(), gray);
            if let Some(caller) = fiber.caller.get() {
                mark_object(caller, gray);
            }
            if let Some(pending) = fiber.pending_closure() {
                mark_object(pending, gray);
            }
            let mut cursor = fiber.open_upvalues_head();
            while let Some(header) = cursor {
                mark_object(header, gray);
                let upvalue = unsafe { &*header.cast::<UpvalueObj>().as_ptr() };
                cursor = upvalue.next_open.get();
            }
        }
    }
}

/// Walks the intrusive allocation list, dropping every object whose
/// `dark` bit is clear and relinking the survivors (cleared back to
/// white for the next cycle).
fn sweep(heap: &mut Heap) {
    let mut survivors_head: Option<NonNull<ObjHeader>> = None;
    let mut survivors_tail: Option<NonNull<ObjHeader>> = None;
    let mut cursor = heap.head();

    while let Some(ptr) = cursor {
        let header = unsafe { ptr.as_ref() };
        let next = header.next.get();
        if header.dark.get() {
            header.dark.set(false);
            header.next.set(None);
            match survivors_tail {
                Some(tail) => unsafe { tail.as_ref() }.next.set(Some(ptr)),
                None => survivors_head = Some(ptr),
            }
            survivors_tail = Some(ptr);
        } else {
            unsafe { free_object(ptr) };
        }
        cursor = next;
    }

    heap.set_head(survivors_head);
}

/// Drops the concrete allocation behind `ptr`, running an `Extern`
/// object's finalizer first.
///
/// # Safety
/// `ptr` must point at a live allocation made by `Heap::allocate` and
/// must never be dereferenced again afterwards.
unsafe fn free_object(ptr: NonNull<ObjHeader>) {
    use crate::object::ExternObj;
    let kind = ptr.as_ref().kind;
    match kind {
        ObjKind::String => drop(Box::from_raw(ptr.cast::<crate::object::StringObj>().as_ptr())),
        ObjKind::Class => drop(Box::from_raw(ptr.cast::<ClassObj>().as_ptr())),
        ObjKind::Closure => drop(Box::from_raw(ptr.cast::<ClosureObj>().as_ptr())),
        ObjKind::Function => drop(Box::from_raw(ptr.cast::<FunctionObj>().as_ptr())),
        ObjKind::Upvalue => drop(Box::from_raw(ptr.cast::<UpvalueObj>().as_ptr())),
        ObjKind::Instance => drop(Box::from_raw(ptr.cast::<InstanceObj>().as_ptr())),
        ObjKind::Extern => {
            let mut boxed = Box::from_raw(ptr.cast::<ExternObj>().as_ptr());
            boxed.finalize();
            drop(boxed);
        }
        ObjKind::List => drop(Box::from_raw(ptr.cast::<ListObj>().as_ptr())),
        ObjKind::Map => drop(Box::from_raw(ptr.cast::<MapObj>().as_ptr())),
        ObjKind::Range => drop(Box::from_raw(ptr.cast::<crate::object::RangeObj>().as_ptr())),
        ObjKind::Module => drop(Box::from_raw(ptr.cast::<ModuleObj>().as_ptr())),
        ObjKind::Fiber => drop(Box::from_raw(ptr.cast::<FiberObj>().as_ptr())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{ListObj, StringObj};

    #[test]
    fn unreachable_object_is_swept() {
        let mut heap = Heap::new();
        let kept = heap.allocate(StringObj::new("kept".into()), 16);
        let _dropped = heap.allocate(StringObj::new("dropped".into()), 16);

        collect(
            &mut heap,
            Roots {
                modules: &[kept],
                current_fiber: None,
                handles: &[],
            },
        );

        let mut count = 0;
        let mut cursor = heap.head();
        while let Some(ptr) = cursor {
            count += 1;
            cursor = unsafe { ptr.as_ref() }.next.get();
        }
        assert_eq!(count, 1);
    }

    #[test]
    fn list_contents_keep_their_elements_alive() {
        let mut heap = Heap::new();
        let string_ptr = heap.allocate(StringObj::new("alive".into()), 16);
        let list = ListObj::new();
        list.push(Value::from_obj(string_ptr));
        let list_ptr = heap.allocate(list, 32);

        collect(
            &mut heap,
            Roots {
                modules: &[list_ptr],
                current_fiber: None,
                handles: &[],
            },
        );

        let mut count = 0;
        let mut cursor = heap.head();
        while let Some(ptr) = cursor {
            count += 1;
            cursor = unsafe { ptr.as_ref() }.next.get();
        }
        assert_eq!(count, 2);
    }
}
